//! Recording file naming.
//!
//! Recordings are named `[YYYYMMDD] <title> [<channel>][<stream id>].<ext>`.
//! Titles come straight from the broadcast page, so they are cleaned of
//! characters that are invalid on Windows, Linux or macOS while keeping
//! CJK text intact.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

/// Characters that are invalid in Windows filenames.
const WINDOWS_INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Windows reserved filenames (case-insensitive).
const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Maximum number of characters kept from a stream title.
pub const MAX_TITLE_CHARS: usize = 50;

/// Clean a stream title for use inside a filename.
///
/// Invalid and control characters are dropped, runs of whitespace collapse to
/// a single space, and the result is cut to [`MAX_TITLE_CHARS`] characters.
///
/// ```
/// use castcorder::utils::filename::sanitize_title;
///
/// assert_eq!(sanitize_title("hello?  world"), "hello world");
/// assert_eq!(sanitize_title("観覧:テスト"), "観覧テスト");
/// assert_eq!(sanitize_title("???"), "unnamed");
/// ```
pub fn sanitize_title(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .filter(|c| c.is_whitespace() || !(c.is_control() || WINDOWS_INVALID_CHARS.contains(c)))
        .collect();

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let truncated: String = collapsed.chars().take(MAX_TITLE_CHARS).collect();
    let trimmed = truncated.trim_matches(|c| c == ' ' || c == '.');

    if trimmed.is_empty() {
        return "unnamed".to_string();
    }

    let upper = trimmed.to_uppercase();
    if WINDOWS_RESERVED_NAMES
        .iter()
        .any(|reserved| upper == *reserved || upper.starts_with(&format!("{reserved}.")))
    {
        return format!("_{trimmed}");
    }

    trimmed.to_string()
}

/// Base name (without extension) of a recording.
pub fn recording_stem(
    title: &str,
    channel: &str,
    stream_id: &str,
    recorded_at: DateTime<Local>,
) -> String {
    format!(
        "[{}] {} [{}][{}]",
        recorded_at.format("%Y%m%d"),
        sanitize_title(title),
        channel,
        stream_id
    )
}

/// First free path `<dir>/<stem>.<ext>`, then `<stem> (2).<ext>`, `<stem> (3).<ext>`, ...
pub fn unique_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let first = dir.join(format!("{stem}.{ext}"));
    if !first.exists() {
        return first;
    }

    (2u32..)
        .map(|n| dir.join(format!("{stem} ({n}).{ext}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}
