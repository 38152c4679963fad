use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

static MENUENTRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"menuentry\s+(?:'([^']+)'|"([^"]+)")"#).unwrap());
static SUBMENU_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"submenu\s+(?:'([^']+)'|"([^"]+)")"#).unwrap());
static LINUX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:linux|linuxefi)\s+(\S+)").unwrap());

/// One node of the boot menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MenuNode {
    Entry { title: String, linux_path: String },
    Submenu { title: String, children: Vec<MenuNode> },
}

impl MenuNode {
    pub fn title(&self) -> &str {
        match self {
            MenuNode::Entry { title, .. } | MenuNode::Submenu { title, .. } => title,
        }
    }

    pub fn is_submenu(&self) -> bool {
        matches!(self, MenuNode::Submenu { .. })
    }

    pub fn children(&self) -> &[MenuNode] {
        match self {
            MenuNode::Submenu { children, .. } => children,
            MenuNode::Entry { .. } => &[],
        }
    }
}

/// Flat view of the menu: submenus appear as their own row, and every row
/// inside a submenu has `is_submenu` set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuEntry {
    pub title: String,
    pub linux_path: String,
    pub is_submenu: bool,
}

pub fn flatten(nodes: &[MenuNode]) -> Vec<MenuEntry> {
    fn walk(nodes: &[MenuNode], in_submenu: bool, out: &mut Vec<MenuEntry>) {
        for node in nodes {
            match node {
                MenuNode::Entry { title, linux_path } => out.push(MenuEntry {
                    title: title.clone(),
                    linux_path: linux_path.clone(),
                    is_submenu: in_submenu,
                }),
                MenuNode::Submenu { title, children } => {
                    out.push(MenuEntry {
                        title: title.clone(),
                        linux_path: String::new(),
                        is_submenu: true,
                    });
                    walk(children, true, out);
                }
            }
        }
    }

    let mut out = Vec::new();
    walk(nodes, false, &mut out);
    out
}

/// Node at an index path such as `[1, 0]` (`"1>0"` in GRUB_DEFAULT syntax).
pub fn try_get_entry<'a>(nodes: &'a [MenuNode], path: &[usize]) -> Option<&'a MenuNode> {
    let (first, rest) = path.split_first()?;
    let mut node = nodes.get(*first)?;
    for &idx in rest {
        node = node.children().get(idx)?;
    }
    Some(node)
}

/// Index path of the first node titled `title`, depth-first.
pub fn find_path(nodes: &[MenuNode], title: &str) -> Option<Vec<usize>> {
    for (idx, node) in nodes.iter().enumerate() {
        if node.title() == title {
            return Some(vec![idx]);
        }
        if let Some(mut path) = find_path(node.children(), title) {
            path.insert(0, idx);
            return Some(path);
        }
    }
    None
}

pub fn path_to_string(path: &[usize]) -> String {
    path.iter().map(|x| x.to_string()).collect::<Vec<_>>().join(">")
}

pub fn string_to_path(s: &str) -> Vec<usize> {
    s.split('>').filter_map(|x| x.trim().parse::<usize>().ok()).collect()
}

struct OpenSubmenu {
    title: String,
    open_depth: i64,
    children: Vec<MenuNode>,
}

fn quoted_title(re: &Regex, line: &str) -> Option<String> {
    let caps = re.captures(line)?;
    caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str().to_string())
}

fn close_submenu(stack: &mut Vec<OpenSubmenu>, root: &mut Vec<MenuNode>) {
    if let Some(open) = stack.pop() {
        let node = MenuNode::Submenu {
            title: open.title,
            children: open.children,
        };
        match stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => root.push(node),
        }
    }
}

/// Builds the menu tree from grub.cfg text. A submenu stays open until the
/// running `{`/`}` count drops back to the depth it was declared at.
pub fn parse_menu(content: &str) -> Vec<MenuNode> {
    let mut root = Vec::new();
    let mut stack: Vec<OpenSubmenu> = Vec::new();
    let mut depth: i64 = 0;
    let mut offset = 0;

    for raw in content.split_inclusive('\n') {
        let line_start = offset;
        offset += raw.len();
        let line = raw.trim();

        if let Some(title) = quoted_title(&SUBMENU_RE, line) {
            stack.push(OpenSubmenu {
                title,
                open_depth: depth,
                children: Vec::new(),
            });
        }

        if let Some(title) = quoted_title(&MENUENTRY_RE, line) {
            let linux_path = extract_linux_path(&content[line_start..]);
            let node = MenuNode::Entry { title, linux_path };
            match stack.last_mut() {
                Some(open) => open.children.push(node),
                None => root.push(node),
            }
        }

        depth += line.matches('{').count() as i64;
        depth -= line.matches('}').count() as i64;

        while stack.last().is_some_and(|open| depth <= open.open_depth) {
            close_submenu(&mut stack, &mut root);
        }
    }

    while !stack.is_empty() {
        close_submenu(&mut stack, &mut root);
    }

    root
}

/// First `linux`/`linuxefi` line at or after the entry's declaration. An
/// entry without one picks up the next entry's kernel.
fn extract_linux_path(from_declaration: &str) -> String {
    LINUX_RE
        .captures(from_declaration)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct GrubMenuParser {
    grub_cfg_path: Option<PathBuf>,
}

impl GrubMenuParser {
    pub fn new(grub_cfg_path: impl Into<PathBuf>) -> Self {
        Self {
            grub_cfg_path: Some(grub_cfg_path.into()),
        }
    }

    /// Uses the first candidate that exists, in list order.
    pub fn from_candidates(candidates: &[PathBuf]) -> Self {
        let grub_cfg_path = candidates.iter().find(|p| p.exists()).cloned();
        match &grub_cfg_path {
            Some(path) => info!("using grub.cfg at {}", path.display()),
            None => warn!("could not find grub.cfg in standard locations"),
        }
        Self { grub_cfg_path }
    }

    pub fn grub_cfg_path(&self) -> Option<&Path> {
        self.grub_cfg_path.as_deref()
    }

    /// Missing grub.cfg yields an empty menu; read failures propagate.
    pub fn parse_menu_tree(&self) -> io::Result<Vec<MenuNode>> {
        let Some(path) = self.grub_cfg_path.as_deref().filter(|p| p.exists()) else {
            warn!("grub.cfg not found, menu is empty");
            return Ok(Vec::new());
        };

        let content = fs::read_to_string(path)?;
        let nodes = parse_menu(&content);
        info!("menu entries parsed from {}: {}", path.display(), flatten(&nodes).len());
        Ok(nodes)
    }

    pub fn parse_menu_entries(&self) -> io::Result<Vec<MenuEntry>> {
        Ok(flatten(&self.parse_menu_tree()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRUB_CFG: &str = r#"### BEGIN /etc/grub.d/10_linux ###
menuentry 'Ubuntu' --class ubuntu --class gnu-linux --class gnu --class os $menuentry_id_option 'gnulinux-simple-1234' {
	recordfail
	load_video
	linux	/boot/vmlinuz-6.8.0-45-generic root=UUID=1234 ro quiet splash
	initrd	/boot/initrd.img-6.8.0-45-generic
}
submenu 'Advanced options for Ubuntu' $menuentry_id_option 'gnulinux-advanced-1234' {
	menuentry 'Ubuntu, with Linux 6.8.0-45-generic' --class ubuntu $menuentry_id_option 'gnulinux-6.8.0-45-generic-advanced-1234' {
		linux	/boot/vmlinuz-6.8.0-45-generic root=UUID=1234 ro quiet splash
	}
	menuentry "Ubuntu, with Linux 6.8.0-45-generic (recovery mode)" {
		linuxefi	/boot/vmlinuz-6.8.0-45-generic root=UUID=1234 ro recovery nomodeset
	}
}
### END /etc/grub.d/10_linux ###
menuentry 'Windows Boot Manager (on /dev/nvme0n1p1)' --class windows --class os {
	insmod part_gpt
	chainloader /efi/Microsoft/Boot/bootmgfw.efi
}
menuentry 'UEFI Firmware Settings' $menuentry_id_option 'uefi-firmware' {
	fwsetup
}
"#;

    #[test]
    fn parses_tree_with_submenu() {
        let nodes = parse_menu(GRUB_CFG);
        let titles: Vec<&str> = nodes.iter().map(MenuNode::title).collect();
        assert_eq!(
            titles,
            vec![
                "Ubuntu",
                "Advanced options for Ubuntu",
                "Windows Boot Manager (on /dev/nvme0n1p1)",
                "UEFI Firmware Settings",
            ]
        );
        assert_eq!(nodes[1].children().len(), 2);
        assert_eq!(
            nodes[1].children()[1].title(),
            "Ubuntu, with Linux 6.8.0-45-generic (recovery mode)"
        );
    }

    #[test]
    fn flat_view_marks_submenu_rows() {
        let flat = flatten(&parse_menu(GRUB_CFG));
        assert_eq!(flat.len(), 6);
        assert_eq!(flat[0].linux_path, "/boot/vmlinuz-6.8.0-45-generic");
        assert!(!flat[0].is_submenu);
        assert!(flat[1].is_submenu);
        assert!(flat[2].is_submenu);
        assert!(flat[3].is_submenu);
        assert_eq!(flat[3].linux_path, "/boot/vmlinuz-6.8.0-45-generic");
        assert!(!flat[4].is_submenu);
        assert!(!flat[5].is_submenu);
    }

    #[test]
    fn linux_path_lookahead_overmatches_entries_without_kernel() {
        let cfg = "menuentry 'Memtest' {\n}\nmenuentry 'Linux' {\n  linux /vmlinuz\n}\n";
        let flat = flatten(&parse_menu(cfg));
        assert_eq!(flat[0].linux_path, "/vmlinuz");
        assert_eq!(flat[1].linux_path, "/vmlinuz");
    }

    #[test]
    fn index_paths_resolve_both_ways() {
        let nodes = parse_menu(GRUB_CFG);
        let path = find_path(&nodes, "Ubuntu, with Linux 6.8.0-45-generic").unwrap();
        assert_eq!(path, vec![1, 0]);
        assert_eq!(path_to_string(&path), "1>0");
        assert_eq!(string_to_path("1>0"), path);
        assert_eq!(
            try_get_entry(&nodes, &path).map(MenuNode::title),
            Some("Ubuntu, with Linux 6.8.0-45-generic")
        );
        assert!(try_get_entry(&nodes, &[9]).is_none());
        assert!(try_get_entry(&nodes, &[]).is_none());
    }

    #[test]
    fn missing_grub_cfg_is_empty_menu() {
        let parser = GrubMenuParser::from_candidates(&[PathBuf::from("/nonexistent/grub.cfg")]);
        assert!(parser.grub_cfg_path().is_none());
        assert!(parser.parse_menu_entries().unwrap().is_empty());
    }

    #[test]
    fn parser_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grub.cfg");
        fs::write(&path, GRUB_CFG).unwrap();

        let parser = GrubMenuParser::from_candidates(&[dir.path().join("missing.cfg"), path.clone()]);
        assert_eq!(parser.grub_cfg_path(), Some(path.as_path()));
        assert_eq!(parser.parse_menu_tree().unwrap().len(), 4);
    }
}
