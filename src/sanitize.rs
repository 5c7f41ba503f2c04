//! Name sanitization shared by the upload engine (`UploadEngine::init`)
//! and the folder tree (`FolderTree::create`/`rename`). Rules are
//! spec.md §6 (files, reject-on-violation) and §4.7 (folders,
//! clean-and-truncate, never rejects).

use crate::error::{Error, Result};

const RESERVED_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

fn is_control(c: char) -> bool {
    c.is_control()
}

/// Validates and cleans an uploaded filename. Rejects anything that
/// looks like a traversal attempt rather than silently neutering it,
/// because a filename is attacker-controlled input used to build a
/// path component's *extension*, not the path itself.
pub fn sanitize_filename(raw: &str) -> Result<String> {
    if raw.is_empty() || raw.contains('\0') {
        return Err(invalid("filename is empty or contains a null byte"));
    }

    let lower = raw.to_lowercase();
    if lower.contains("..") || lower.contains("%2e%2e") || lower.contains("%2f") || lower.contains("%5c") {
        return Err(invalid("filename contains a path traversal sequence"));
    }

    // Take the basename: strip any directory components a client might
    // still have smuggled through despite the traversal check above.
    let basename = raw.rsplit(['/', '\\']).next().unwrap_or(raw);

    let cleaned: String = basename
        .chars()
        .map(|c| if RESERVED_CHARS.contains(&c) || is_control(c) { '_' } else { c })
        .collect();

    let trimmed = cleaned.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        return Err(invalid("filename is empty after sanitization"));
    }

    let capped: String = trimmed.chars().take(255).collect();
    Ok(capped)
}

/// Cleans a folder name for `FolderTree::create`/`rename`. Unlike
/// filenames this never rejects input — callers only need a name that's
/// safe to embed in a path string, which stripping already guarantees.
pub fn sanitize_folder_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if RESERVED_CHARS.contains(&c) || is_control(c) { '_' } else { c })
        .collect();
    cleaned.trim().chars().take(255).collect()
}

fn invalid(msg: &str) -> Error {
    Error::Validation { msg: msg.to_string(), context: Default::default() }
}

/// Resolves a MIME type from an explicit argument or, failing that, the
/// filename's extension. Falls back to the generic octet-stream type,
/// same convention `StorageBackend`'s neighbors in the pack use for
/// unrecognized extensions.
pub fn resolve_mime_type(provided: Option<&str>, filename: &str) -> String {
    if let Some(mime) = provided {
        if !mime.is_empty() {
            return mime.to_string();
        }
    }

    let ext = filename.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// The dotted suffix of `filename`, or empty if there is none — used by
/// storage-key generation per spec.md §6.
pub fn extension_of(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => format!(".{ext}"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_reserved_characters() {
        assert_eq!(sanitize_filename("a<b>c:d\"e").unwrap(), "a_b_c_d_e");
    }

    #[test]
    fn rejects_traversal_sequences() {
        assert!(sanitize_filename("../../etc/passwd").is_err());
        assert!(sanitize_filename("%2e%2e/secret").is_err());
    }

    #[test]
    fn rejects_empty_or_null() {
        assert!(sanitize_filename("").is_err());
        assert!(sanitize_filename("a\0b").is_err());
    }

    #[test]
    fn takes_basename() {
        assert_eq!(sanitize_filename("folder/name.txt").unwrap(), "name.txt");
    }

    #[test]
    fn sanitization_is_idempotent() {
        let once = sanitize_filename("my<>file.txt").unwrap();
        let twice = sanitize_filename(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn caps_length_at_255() {
        let long = "a".repeat(400);
        assert_eq!(sanitize_filename(&long).unwrap().len(), 255);
    }

    #[test]
    fn folder_name_never_rejects() {
        assert_eq!(sanitize_folder_name("../weird:name"), ".._weird_name");
    }

    #[test]
    fn extension_extraction() {
        assert_eq!(extension_of("report.pdf"), ".pdf");
        assert_eq!(extension_of("noext"), "");
    }
}
