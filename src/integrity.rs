use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use serde::Serialize;
use tracing::warn;

pub const DEFAULT_MIN_FILE_BYTES: u64 = 20;

const CHUNK_SIZE: usize = 64 * 1024;
const SNIFF_LEN: usize = 512;
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const MARKUP_EXTENSIONS: &[&str] = &["xml", "html", "htm"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Missing,
    TooSmall { size: u64 },
    Markup,
    ChecksumMismatch { expected: String, actual: String },
    SizeMismatch { expected: u64, actual: u64 },
    Unreadable { message: String },
    /// `verified` is false when no checksum or size was available.
    Intact { verified: bool },
}

impl Verdict {
    pub fn is_intact(&self) -> bool {
        matches!(self, Verdict::Intact { .. })
    }
}

pub fn inspect(
    path: &Path,
    min_bytes: u64,
    checksum: Option<&str>,
    expected_size: Option<u64>,
) -> Verdict {
    let size = match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => return Verdict::Missing,
    };
    if size < min_bytes {
        return Verdict::TooSmall { size };
    }
    match is_hidden_markup(path) {
        Ok(true) => return Verdict::Markup,
        Ok(false) => {}
        Err(err) => {
            return Verdict::Unreadable {
                message: err.to_string(),
            };
        }
    }

    if let Some(expected) = expected_size {
        if expected != size {
            return Verdict::SizeMismatch {
                expected,
                actual: size,
            };
        }
    }
    if let Some(expected) = checksum {
        return match md5_file(path) {
            Ok(actual) if actual.eq_ignore_ascii_case(expected.trim()) => {
                Verdict::Intact { verified: true }
            }
            Ok(actual) => Verdict::ChecksumMismatch {
                expected: expected.to_string(),
                actual,
            },
            Err(err) => Verdict::Unreadable {
                message: err.to_string(),
            },
        };
    }
    if expected_size.is_some() {
        return Verdict::Intact { verified: true };
    }

    warn!(path = %path.display(), "no checksum or size available; skipping verification");
    Verdict::Intact { verified: false }
}

pub fn is_broken(
    path: &Path,
    min_bytes: u64,
    checksum: Option<&str>,
    expected_size: Option<u64>,
) -> bool {
    !inspect(path, min_bytes, checksum, expected_size).is_intact()
}

pub fn md5_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn is_markup(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    file.by_ref().take(SNIFF_LEN as u64).read_to_end(&mut head)?;
    let body = head.strip_prefix(UTF8_BOM).unwrap_or(&head);
    Ok(body
        .iter()
        .find(|byte| !byte.is_ascii_whitespace())
        .map(|&byte| byte == b'<')
        .unwrap_or(false))
}

pub fn has_markup_name(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            MARKUP_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

pub fn is_hidden_markup(path: &Path) -> io::Result<bool> {
    if has_markup_name(path) {
        return Ok(false);
    }
    is_markup(path)
}

pub fn hidden_markup_check(files: &[PathBuf]) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut clean = Vec::new();
    let mut malformed = Vec::new();
    for file in files {
        match is_hidden_markup(file) {
            Ok(true) => {
                warn!(file = %file.display(), "file appears to be malformed and will be left unmodified");
                malformed.push(file.clone());
            }
            Ok(false) => clean.push(file.clone()),
            Err(err) => {
                warn!(file = %file.display(), error = %err, "cannot read downloaded file");
                malformed.push(file.clone());
            }
        }
    }
    (clean, malformed)
}
