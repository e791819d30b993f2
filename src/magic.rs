//! File-type heuristics.
//!
//! Two concerns live here: the allow-filter deciding whether a magic string
//! names a file type worth scanning, and a content sniffer that derives a
//! magic string for files found by the backlog scanner (live socket events
//! carry the IDS's own magic string instead).

use std::collections::HashMap;
use std::path::Path;

use regex::Regex;

use crate::error::Result;

/// Magic string returned when a file cannot be inspected.
pub const UNKNOWN_FILE_TYPE: &str = "unknown file type";

/// Set of named patterns over magic strings that mark a file as relevant.
///
/// The rule set is fixed after construction; workers consult it lock-free.
pub struct MagicFilter {
    patterns: HashMap<String, Regex>,
}

impl Default for MagicFilter {
    fn default() -> Self {
        let mut patterns = HashMap::new();
        patterns.insert(
            "WinExecutables".to_string(),
            Regex::new(r"(for MS Windows|(ELF|Mach-O).*(executable|shared object))").unwrap(),
        );
        Self { patterns }
    }
}

impl MagicFilter {
    /// Build a filter from named patterns, replacing the built-in rule set.
    pub fn from_patterns(patterns: Vec<(String, String)>) -> Result<Self> {
        let mut compiled = HashMap::new();
        for (name, pattern) in patterns {
            compiled.insert(name, Regex::new(&pattern)?);
        }
        Ok(Self { patterns: compiled })
    }

    /// True if any configured pattern matches the magic string.
    pub fn is_allowed(&self, magic: &str) -> bool {
        self.patterns.values().any(|p| p.is_match(magic))
    }
}

/// Derive a magic description string for a file from its content.
///
/// Executable formats are parsed from their headers so that the resulting
/// strings carry the `for MS Windows` / `ELF ... executable` phrases the
/// filter patterns key on; everything else falls back to a coarse
/// content-based classification.
pub fn magic_from_file(path: &Path) -> String {
    let buf = match read_prefix(path, 4096) {
        Ok(buf) => buf,
        Err(_) => return UNKNOWN_FILE_TYPE.to_string(),
    };
    magic_from_bytes(&buf)
}

fn read_prefix(path: &Path, limit: usize) -> std::io::Result<Vec<u8>> {
    use std::io::Read;
    let file = std::fs::File::open(path)?;
    let mut buf = Vec::with_capacity(limit);
    file.take(limit as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Classify a byte prefix into a magic description string.
pub fn magic_from_bytes(buf: &[u8]) -> String {
    if buf.is_empty() {
        return "empty".to_string();
    }
    if let Some(desc) = sniff_pe(buf) {
        return desc;
    }
    if let Some(desc) = sniff_elf(buf) {
        return desc;
    }
    if let Some(desc) = sniff_macho(buf) {
        return desc;
    }
    if let Some(kind) = infer::get(buf) {
        return describe_inferred(kind);
    }
    if buf.iter().all(|&b| b == b'\t' || b == b'\n' || b == b'\r' || (0x20u8..0x7f).contains(&b)) {
        return "ASCII text".to_string();
    }
    if std::str::from_utf8(buf).is_ok() {
        return "Unicode text, UTF-8 text".to_string();
    }
    "data".to_string()
}

fn read_u16(buf: &[u8], offset: usize, little_endian: bool) -> Option<u16> {
    let bytes: [u8; 2] = buf.get(offset..offset + 2)?.try_into().ok()?;
    Some(if little_endian {
        u16::from_le_bytes(bytes)
    } else {
        u16::from_be_bytes(bytes)
    })
}

fn read_u32(buf: &[u8], offset: usize, little_endian: bool) -> Option<u32> {
    let bytes: [u8; 4] = buf.get(offset..offset + 4)?.try_into().ok()?;
    Some(if little_endian {
        u32::from_le_bytes(bytes)
    } else {
        u32::from_be_bytes(bytes)
    })
}

fn sniff_pe(buf: &[u8]) -> Option<String> {
    if buf.get(..2)? != b"MZ".as_slice() {
        return None;
    }
    let pe_offset = read_u32(buf, 0x3c, true)? as usize;
    if buf.get(pe_offset..pe_offset + 4) != Some(b"PE\0\0".as_slice()) {
        return Some("MS-DOS executable".to_string());
    }
    let machine = read_u16(buf, pe_offset + 4, true)?;
    let opt_offset = pe_offset + 24;
    let opt_magic = read_u16(buf, opt_offset, true)?;
    let class = match opt_magic {
        0x010b => "PE32",
        0x020b => "PE32+",
        _ => return Some("MS-DOS executable".to_string()),
    };
    let arch = match machine {
        0x014c => "Intel 80386",
        0x8664 => "x86-64",
        0xaa64 => "Aarch64",
        0x01c0 | 0x01c4 => "ARM",
        _ => "unknown processor",
    };
    // Subsystem lives at offset 68 of the optional header in both classes.
    let subsystem = match read_u16(buf, opt_offset + 68, true) {
        Some(2) => "GUI",
        Some(3) => "console",
        _ => "unknown",
    };
    Some(format!("{class} executable ({subsystem}) {arch}, for MS Windows"))
}

fn sniff_elf(buf: &[u8]) -> Option<String> {
    if buf.get(..4)? != b"\x7fELF".as_slice() {
        return None;
    }
    let class = match buf.get(4)? {
        1 => "32-bit",
        2 => "64-bit",
        _ => return Some("ELF".to_string()),
    };
    let (endian, little) = match buf.get(5)? {
        1 => ("LSB", true),
        2 => ("MSB", false),
        _ => return Some("ELF".to_string()),
    };
    let kind = match read_u16(buf, 16, little)? {
        1 => "relocatable",
        2 => "executable",
        3 => "shared object",
        4 => "core file",
        _ => "unknown type",
    };
    let arch = match read_u16(buf, 18, little)? {
        0x03 => "Intel 80386",
        0x28 => "ARM",
        0x3e => "x86-64",
        0xb7 => "ARM aarch64",
        0xf3 => "RISC-V",
        _ => "unknown machine",
    };
    Some(format!("ELF {class} {endian} {kind}, {arch}"))
}

fn sniff_macho(buf: &[u8]) -> Option<String> {
    let magic = read_u32(buf, 0, false)?;
    let (class, little) = match magic {
        0xfeedface => ("32-bit", false),
        0xcefaedfe => ("32-bit", true),
        0xfeedfacf => ("64-bit", false),
        0xcffaedfe => ("64-bit", true),
        0xcafebabe => return Some("Mach-O universal binary".to_string()),
        _ => return None,
    };
    let kind = match read_u32(buf, 12, little)? {
        2 => "executable",
        6 => "dynamically linked shared library",
        8 => "bundle",
        _ => "unknown type",
    };
    Some(format!("Mach-O {class} {kind}"))
}

fn describe_inferred(kind: infer::Type) -> String {
    match kind.mime_type() {
        "application/zip" => "Zip archive data".to_string(),
        "application/gzip" => "gzip compressed data".to_string(),
        "application/x-xz" => "XZ compressed data".to_string(),
        "application/pdf" => "PDF document".to_string(),
        "image/png" => "PNG image data".to_string(),
        "image/jpeg" => "JPEG image data".to_string(),
        other => format!("{other} data"),
    }
}
