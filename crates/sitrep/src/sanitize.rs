//! Upload checks and helpers for keeping paths out of logs.

use std::path::Path;

const MAX_FILENAME_LENGTH: usize = 255;
const FORBIDDEN_CHARS: [char; 9] = ['/', '\\', '<', '>', ':', '"', '|', '?', '*'];
const BINARY_SNIFF_LENGTH: usize = 8192;

/// Returns only the filename component of a path (no directory).
///
/// Safe for span fields: reveals the file name without exposing the full path.
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Checks an uploaded CSV before it is accepted. Returns a user-facing reason
/// on rejection.
pub fn validate_upload(filename: &str, content: &[u8], max_bytes: u64) -> Result<(), String> {
    validate_filename(filename)?;

    if content.is_empty() {
        return Err("file is empty".to_string());
    }
    if content.len() as u64 > max_bytes {
        return Err(format!(
            "file is {} bytes, the limit is {} bytes",
            content.len(),
            max_bytes
        ));
    }

    let utf16 = content.starts_with(&[0xFF, 0xFE]) || content.starts_with(&[0xFE, 0xFF]);
    let head = &content[..content.len().min(BINARY_SNIFF_LENGTH)];
    if !utf16 && head.contains(&0) {
        return Err("file looks binary, expected CSV text".to_string());
    }
    Ok(())
}

fn validate_filename(filename: &str) -> Result<(), String> {
    if filename.trim().is_empty() {
        return Err("filename is empty".to_string());
    }
    if filename.chars().count() > MAX_FILENAME_LENGTH {
        return Err(format!(
            "filename exceeds {} characters",
            MAX_FILENAME_LENGTH
        ));
    }
    if filename.contains("..") {
        return Err("filename must not contain '..'".to_string());
    }
    if let Some(c) = filename.chars().find(|c| FORBIDDEN_CHARS.contains(c) || c.is_control()) {
        return Err(format!("filename contains forbidden character {:?}", c));
    }

    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    if !extension.eq_ignore_ascii_case("csv") {
        return Err("only .csv files are accepted".to_string());
    }
    Ok(())
}

/// Display-safe version of an upload filename.
pub fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .trim()
        .chars()
        .map(|c| {
            if FORBIDDEN_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    if cleaned.is_empty() {
        "upload.csv".to_string()
    } else {
        cleaned
    }
}
