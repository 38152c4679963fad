//! Properties of the `/etc/default/grub` merge.

use std::collections::BTreeSet;
use std::fs;

use grubconf::grub_config::{ConfigEntries, GrubConfigGenerator, GrubConfigLoader};
use proptest::prelude::*;

fn key_strategy() -> impl Strategy<Value = String> {
    "GRUB_[A-Z][A-Z0-9_]{0,6}"
}

fn value_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9]([a-z0-9 ./,:-]{0,10}[a-z0-9])?"
}

fn entries_strategy() -> impl Strategy<Value = ConfigEntries> {
    prop::collection::btree_map(key_strategy(), value_strategy(), 0..6)
        .prop_map(|map| ConfigEntries::from_pairs(map).unwrap())
}

/// Lines the generator must never touch: blanks, comments without `=`, and
/// assignments to keys outside the generated `GRUB_` namespace.
fn untouched_line_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        "# [a-z ]{0,20}[a-z]",
        "OTHER_[A-Z]{1,4}=[a-z0-9]{0,6}",
        "export OTHER_[A-Z]{1,4}=\"[a-z ]{0,6}\"",
    ]
}

/// Any line shape found in a real file, including ones the merge rewrites.
fn any_line_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        untouched_line_strategy(),
        (key_strategy(), "[a-z0-9]{0,6}").prop_map(|(k, v)| format!("{k}={v}")),
        (key_strategy(), "[a-z0-9]{0,6}").prop_map(|(k, v)| format!("#{k}=\"{v}\"")),
        (key_strategy(), "[a-z0-9]{0,6}").prop_map(|(k, v)| format!("export {k}='{v}'")),
    ]
}

fn lines_of(content: &str) -> Vec<String> {
    content.lines().map(String::from).collect()
}

proptest! {
    /// Feeding the output back in as the template changes nothing.
    #[test]
    fn generate_is_idempotent(
        entries in entries_strategy(),
        lines in prop::collection::vec(any_line_strategy(), 0..12),
        hidden in prop::collection::btree_set(key_strategy(), 0..3),
    ) {
        let generator = GrubConfigGenerator::new();
        let once = generator.generate(&entries, &lines, Some(&hidden));
        let twice = generator.generate(&entries, &lines_of(&once), Some(&hidden));
        prop_assert_eq!(once, twice);
    }

    /// Unrelated lines survive verbatim and in order.
    #[test]
    fn unrelated_lines_are_preserved(
        entries in entries_strategy(),
        lines in prop::collection::vec(untouched_line_strategy(), 0..12),
    ) {
        let output = GrubConfigGenerator::new().generate(&entries, &lines, None);
        let out_lines = lines_of(&output);

        let mut rest = out_lines.iter();
        for line in &lines {
            prop_assert!(rest.any(|l| l == line), "missing or reordered: {:?}", line);
        }
    }

    /// Generating from nothing and loading the result gives the entries back.
    #[test]
    fn generated_file_loads_back(entries in entries_strategy()) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grub");
        let no_lines: &[String] = &[];
        fs::write(&path, GrubConfigGenerator::new().generate(&entries, no_lines, None)).unwrap();

        let (loaded, _) = GrubConfigLoader::new(&path).load().unwrap();
        prop_assert_eq!(loaded, entries);
    }

    /// Hidden keys are always written commented out.
    #[test]
    fn hidden_keys_are_commented(
        entries in entries_strategy(),
        lines in prop::collection::vec(any_line_strategy(), 0..8),
    ) {
        let hidden: BTreeSet<String> = entries.keys().map(|k| k.to_string()).collect();
        let output = GrubConfigGenerator::new().generate(&entries, &lines, Some(&hidden));

        for line in lines_of(&output) {
            let bare = line.trim_start_matches('#').trim_start_matches("export ");
            if let Some((key, _)) = bare.split_once('=') {
                if hidden.contains(key) {
                    prop_assert!(line.starts_with('#'), "not hidden: {:?}", line);
                }
            }
        }
    }
}

#[test]
fn replaces_values_in_place() {
    let lines = vec!["GRUB_TIMEOUT=5".to_string(), "GRUB_DEFAULT=0".to_string()];
    let entries = ConfigEntries::from_pairs([("GRUB_TIMEOUT", "10"), ("GRUB_DEFAULT", "saved")]).unwrap();

    let output = GrubConfigGenerator::new().generate(&entries, &lines, None);
    assert_eq!(output, "GRUB_TIMEOUT=\"10\"\nGRUB_DEFAULT=\"saved\"\n");
    assert!(!output.contains("GRUB_TIMEOUT=5"));
}

#[test]
fn only_color_keys_are_exported() {
    let no_lines: &[String] = &[];
    let generator = GrubConfigGenerator::new();

    let colors = ConfigEntries::from_pairs([("GRUB_COLOR_NORMAL", "x/y")]).unwrap();
    assert!(generator
        .generate(&colors, no_lines, None)
        .starts_with("export GRUB_COLOR_NORMAL="));

    let timeout = ConfigEntries::from_pairs([("GRUB_TIMEOUT", "5")]).unwrap();
    assert!(!generator.generate(&timeout, no_lines, None).contains("export"));

    let exported = vec!["export GRUB_TIMEOUT=3".to_string()];
    assert_eq!(
        generator.generate(&timeout, &exported, None),
        "export GRUB_TIMEOUT=\"5\"\n"
    );
}

#[test]
fn hidden_key_replaces_existing_line() {
    let lines = vec!["GRUB_TIMEOUT=5".to_string(), "# keep".to_string()];
    let entries = ConfigEntries::from_pairs([("GRUB_TIMEOUT", "5"), ("GRUB_GFXMODE", "auto")]).unwrap();
    let hidden: BTreeSet<String> = ["GRUB_TIMEOUT", "GRUB_GFXMODE"].into_iter().map(String::from).collect();

    let output = GrubConfigGenerator::new().generate(&entries, &lines, Some(&hidden));
    assert_eq!(output, "#GRUB_TIMEOUT=\"5\"\n# keep\n#GRUB_GFXMODE=\"auto\"\n");
}

#[test]
fn empty_value_removes_line() {
    let lines = vec![
        "GRUB_BACKGROUND=/boot/grub/old.png".to_string(),
        "GRUB_TIMEOUT=5".to_string(),
    ];
    let entries = ConfigEntries::from_pairs([("GRUB_BACKGROUND", ""), ("GRUB_TIMEOUT", "5")]).unwrap();

    let output = GrubConfigGenerator::new().generate(&entries, &lines, None);
    assert_eq!(output, "GRUB_TIMEOUT=\"5\"\n");
}
