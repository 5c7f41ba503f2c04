//! HTTP Range header parsing, per spec.md §6. Lives outside the download
//! engine proper because it's pure data transformation with no I/O —
//! easy to unit test exhaustively on its own.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSpec {
    pub start: u64,
    pub end: u64,
}

impl RangeSpec {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Parses a `Range: bytes=<a>-<b>` header against a known object size.
/// Supports `bytes=<a>-<b>`, `bytes=<a>-` (to end), and `bytes=-<n>`
/// (suffix, last `n` bytes). Returns `Ok(None)` when there is no header
/// to parse (the caller should do a full, non-ranged read); `Err` when
/// the header is present but malformed or unsatisfiable against `size`.
pub fn parse_range(header: Option<&str>, size: u64) -> Result<Option<RangeSpec>> {
    let Some(header) = header else {
        return Ok(None);
    };

    let spec = header
        .strip_prefix("bytes=")
        .ok_or_else(|| invalid_range("range header must start with 'bytes='"))?;

    let (a, b) = spec.split_once('-').ok_or_else(|| invalid_range("malformed range spec"))?;

    let range = if a.is_empty() {
        // Suffix range: last `n` bytes.
        let n: u64 = b.parse().map_err(|_| invalid_range("malformed suffix length"))?;
        if n == 0 {
            return Err(invalid_range("suffix range length must be positive"));
        }
        let start = size.saturating_sub(n);
        RangeSpec { start, end: size.saturating_sub(1) }
    } else {
        let start: u64 = a.parse().map_err(|_| invalid_range("malformed range start"))?;
        let end = if b.is_empty() {
            size.saturating_sub(1)
        } else {
            b.parse().map_err(|_| invalid_range("malformed range end"))?
        };
        RangeSpec { start, end }
    };

    if range.start > range.end || range.end >= size {
        return Err(invalid_range(&format!(
            "range {}-{} unsatisfiable for object of size {size}",
            range.start, range.end
        )));
    }

    Ok(Some(range))
}

fn invalid_range(msg: &str) -> Error {
    Error::Validation { msg: format!("invalid range: {msg}"), context: Default::default() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bounded_range() {
        let range = parse_range(Some("bytes=100-199"), 1000).unwrap().unwrap();
        assert_eq!(range.start, 100);
        assert_eq!(range.end, 199);
        assert_eq!(range.len(), 100);
    }

    #[test]
    fn parses_open_ended_range() {
        let range = parse_range(Some("bytes=900-"), 1000).unwrap().unwrap();
        assert_eq!(range.start, 900);
        assert_eq!(range.end, 999);
    }

    #[test]
    fn parses_suffix_range() {
        let range = parse_range(Some("bytes=-100"), 1000).unwrap().unwrap();
        assert_eq!(range.start, 900);
        assert_eq!(range.end, 999);
    }

    #[test]
    fn no_header_is_none() {
        assert!(parse_range(None, 1000).unwrap().is_none());
    }

    #[test]
    fn rejects_end_beyond_size() {
        assert!(parse_range(Some("bytes=0-1000"), 1000).is_err());
    }

    #[test]
    fn rejects_start_after_end() {
        assert!(parse_range(Some("bytes=500-100"), 1000).is_err());
    }
}
