//! Byte-range and conditional-request helpers for the static-file
//! collaborator.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A single satisfiable byte range, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes the range covers (both ends are inclusive).
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` value for a 206 response.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unsatisfiable;

/// `Content-Range` value for a 416 response.
pub fn unsatisfied_range(total: u64) -> String {
    format!("bytes */{total}")
}

/// Parse a `Range` header against a resource of `total` bytes.
///
/// Returns `None` for anything that is not a well-formed single byte range
/// (the caller then serves the full resource, per RFC 9110), and
/// `Some(Err(Unsatisfiable))` when the range cannot overlap the resource.
/// Supported forms: `bytes=a-b`, `bytes=a-`, `bytes=-n`.
pub fn parse(header: &str, total: u64) -> Option<Result<ByteRange, Unsatisfiable>> {
    let spec = header.strip_prefix("bytes=")?.trim();
    if spec.contains(',') {
        // multi-range requests are not supported; serve the full resource
        return None;
    }
    let (start_raw, end_raw) = spec.split_once('-')?;
    let start_raw = start_raw.trim();
    let end_raw = end_raw.trim();

    if start_raw.is_empty() {
        // suffix form: the last n bytes
        let n: u64 = end_raw.parse().ok()?;
        if n == 0 || total == 0 {
            return Some(Err(Unsatisfiable));
        }
        let start = total.saturating_sub(n);
        return Some(Ok(ByteRange {
            start,
            end: total - 1,
        }));
    }

    let start: u64 = start_raw.parse().ok()?;
    if start >= total {
        return Some(Err(Unsatisfiable));
    }
    let end = if end_raw.is_empty() {
        total - 1
    } else {
        let end: u64 = end_raw.parse().ok()?;
        if end < start {
            return None;
        }
        end.min(total - 1)
    };
    Some(Ok(ByteRange { start, end }))
}

/// `If-Modified-Since` comparison: true when the resource's mtime, rounded
/// down to whole seconds, is not newer than the header's timestamp.
pub fn not_modified_since(mtime: SystemTime, header: &str) -> bool {
    let Some(since) = parse_http_date(header) else {
        return false;
    };
    let mtime_secs = match mtime.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs(),
        Err(_) => return false,
    };
    let since_secs = match since.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs(),
        Err(_) => return false,
    };
    mtime_secs <= since_secs
}

/// Parse an IMF-fixdate (`Sun, 06 Nov 1994 08:49:37 GMT`).
pub fn parse_http_date(s: &str) -> Option<SystemTime> {
    let s = s.trim();
    // strip the weekday
    let rest = s.split_once(", ").map(|(_, r)| r).unwrap_or(s);
    let mut parts = rest.split_ascii_whitespace();
    let day: u64 = parts.next()?.parse().ok()?;
    let month = match parts.next()? {
        "Jan" => 1,
        "Feb" => 2,
        "Mar" => 3,
        "Apr" => 4,
        "May" => 5,
        "Jun" => 6,
        "Jul" => 7,
        "Aug" => 8,
        "Sep" => 9,
        "Oct" => 10,
        "Nov" => 11,
        "Dec" => 12,
        _ => return None,
    };
    let year: i64 = parts.next()?.parse().ok()?;
    let mut clock = parts.next()?.split(':');
    let hour: u64 = clock.next()?.parse().ok()?;
    let minute: u64 = clock.next()?.parse().ok()?;
    let second: u64 = clock.next()?.parse().ok()?;
    if parts.next() != Some("GMT") || day == 0 || day > 31 || hour > 23 || minute > 59 || second > 60
    {
        return None;
    }

    // days since the unix epoch, via the civil-date algorithm
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as u64;
    let mp = (month + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    let days = era * 146097 + doe as i64 - 719468;
    if days < 0 {
        return None;
    }
    let secs = days as u64 * 86400 + hour * 3600 + minute * 60 + second;
    Some(UNIX_EPOCH + Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_range() {
        assert_eq!(
            parse("bytes=0-4", 10),
            Some(Ok(ByteRange { start: 0, end: 4 }))
        );
        // end clamps to the resource
        assert_eq!(
            parse("bytes=5-100", 10),
            Some(Ok(ByteRange { start: 5, end: 9 }))
        );
    }

    #[test]
    fn test_open_range() {
        assert_eq!(
            parse("bytes=3-", 10),
            Some(Ok(ByteRange { start: 3, end: 9 }))
        );
    }

    #[test]
    fn test_suffix_range() {
        let range = parse("bytes=-4", 10).unwrap().unwrap();
        assert_eq!(range, ByteRange { start: 6, end: 9 });
        assert_eq!(range.content_range(10), "bytes 6-9/10");
        // suffix longer than the resource serves the whole thing
        assert_eq!(
            parse("bytes=-100", 10),
            Some(Ok(ByteRange { start: 0, end: 9 }))
        );
    }

    #[test]
    fn test_unsatisfiable() {
        assert_eq!(parse("bytes=10-12", 10), Some(Err(Unsatisfiable)));
        assert_eq!(parse("bytes=-0", 10), Some(Err(Unsatisfiable)));
        assert_eq!(unsatisfied_range(10), "bytes */10");
    }

    #[test]
    fn test_malformed_is_ignored() {
        assert_eq!(parse("bytes=4-2", 10), None);
        assert_eq!(parse("lines=1-2", 10), None);
        assert_eq!(parse("bytes=0-2,5-7", 10), None);
    }

    #[test]
    fn test_http_date() {
        let date = parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
        let secs = date.duration_since(UNIX_EPOCH).unwrap().as_secs();
        assert_eq!(secs, 784111777);
        assert!(parse_http_date("06 Nov 1994 08:49:37 GMT").is_some());
        assert!(parse_http_date("yesterday").is_none());
    }

    #[test]
    fn test_not_modified_since() {
        let header = "Sun, 06 Nov 1994 08:49:37 GMT";
        let exact = UNIX_EPOCH + Duration::from_secs(784111777);
        assert!(not_modified_since(exact, header));
        // sub-second precision is truncated before comparing
        assert!(not_modified_since(exact + Duration::from_millis(900), header));
        assert!(!not_modified_since(exact + Duration::from_secs(1), header));
    }
}
