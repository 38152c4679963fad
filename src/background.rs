//! `GRUB_BACKGROUND` handling before a write: images outside `/boot/grub/`
//! are copied under the backgrounds directory, and `color:#RRGGBB` (or a
//! bare `#RRGGBB`) becomes a generated one-pixel PNG.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

static HEX_COLOR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#?([0-9a-fA-F]{6})$").unwrap());

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolidColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl SolidColor {
    /// Accepts `color:#RRGGBB`, `#RRGGBB` and `RRGGBB`, case-insensitive.
    pub fn parse(value: &str) -> Option<Self> {
        let mut spec = value.trim();
        if let Some(rest) = spec.strip_prefix("color:") {
            spec = rest.trim();
        }
        let hex = HEX_COLOR_RE.captures(spec)?.get(1)?.as_str();
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some(Self {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
        })
    }

    pub fn hex(&self) -> String {
        format!("{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    pub fn file_name(&self) -> String {
        format!("solid_{}.png", self.hex())
    }

    /// A 1x1 8-bit RGB PNG of this color.
    pub fn to_png(&self) -> Vec<u8> {
        let mut ihdr = Vec::with_capacity(13);
        ihdr.extend_from_slice(&1u32.to_be_bytes());
        ihdr.extend_from_slice(&1u32.to_be_bytes());
        // depth 8, color type 2 (RGB), deflate, adaptive filtering, no interlace
        ihdr.extend_from_slice(&[8, 2, 0, 0, 0]);

        // One scanline: filter byte 0 then the pixel.
        let scanline = [0, self.r, self.g, self.b];

        let mut png = Vec::with_capacity(64);
        png.extend_from_slice(PNG_SIGNATURE);
        write_chunk(&mut png, b"IHDR", &ihdr);
        write_chunk(&mut png, b"IDAT", &zlib_stored(&scanline));
        write_chunk(&mut png, b"IEND", &[]);
        png
    }
}

fn write_chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    let crc = crc32(kind.iter().chain(data));
    out.extend_from_slice(&crc.to_be_bytes());
}

/// zlib stream holding `data` in a single uncompressed deflate block.
/// Only valid for `data.len() <= u16::MAX`.
fn zlib_stored(data: &[u8]) -> Vec<u8> {
    let len = data.len() as u16;
    let mut out = Vec::with_capacity(data.len() + 11);
    out.extend_from_slice(&[0x78, 0x01]);
    out.push(0x01); // BFINAL, BTYPE=00
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&(!len).to_le_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(&adler32(data).to_be_bytes());
    out
}

fn crc32<'a>(bytes: impl IntoIterator<Item = &'a u8>) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in bytes {
        crc ^= byte as u32;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
        }
    }
    !crc
}

fn adler32(data: &[u8]) -> u32 {
    const MOD: u32 = 65521;
    let (mut a, mut b) = (1u32, 0u32);
    for &byte in data {
        a = (a + byte as u32) % MOD;
        b = (b + a) % MOD;
    }
    (b << 16) | a
}

/// What the apply will do with the configured background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackgroundPlan {
    /// Empty, already under `/boot/grub/`, or a missing file left for
    /// validation to report.
    Keep,
    Copy { src: PathBuf, dest: PathBuf },
    Solid { color: SolidColor, dest: PathBuf },
}

impl BackgroundPlan {
    pub fn for_value(value: &str, backgrounds_dir: &Path) -> Self {
        if value.is_empty() {
            return BackgroundPlan::Keep;
        }
        if let Some(color) = SolidColor::parse(value) {
            return BackgroundPlan::Solid {
                color,
                dest: backgrounds_dir.join(color.file_name()),
            };
        }

        let src = PathBuf::from(value);
        if value.starts_with("/boot/grub/") || src.starts_with(backgrounds_dir) || !src.exists() {
            return BackgroundPlan::Keep;
        }
        let Some(name) = src.file_name() else {
            return BackgroundPlan::Keep;
        };
        let dest = backgrounds_dir.join(name);
        BackgroundPlan::Copy { src, dest }
    }

    /// The value `GRUB_BACKGROUND` will hold once the plan has run.
    pub fn destination(&self) -> Option<&Path> {
        match self {
            BackgroundPlan::Keep => None,
            BackgroundPlan::Copy { dest, .. } | BackgroundPlan::Solid { dest, .. } => Some(dest),
        }
    }
}
