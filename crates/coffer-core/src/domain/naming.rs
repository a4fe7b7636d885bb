//! Archive file naming: `{base}_{YYYYMMDD_HHMMSS}.tar.gz.enc`.

use chrono::{DateTime, NaiveDateTime, TimeZone};

pub const ARCHIVE_SUFFIX: &str = ".tar.gz.enc";
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

pub fn archive_file_name<Tz: TimeZone>(base_name: &str, at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{base_name}_{}{ARCHIVE_SUFFIX}", at.format(TIMESTAMP_FORMAT))
}

/// Does `file_name` look like an archive produced for `base_name`?
///
/// The part between `{base}_` and the suffix must parse as a timestamp, so
/// `vault_old_20240101_000000.tar.gz.enc` does not count as a `vault` archive.
pub fn is_archive_name(base_name: &str, file_name: &str) -> bool {
    let Some(rest) = file_name
        .strip_prefix(base_name)
        .and_then(|r| r.strip_prefix('_'))
    else {
        return false;
    };
    let Some(stamp) = rest.strip_suffix(ARCHIVE_SUFFIX) else {
        return false;
    };
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).is_ok()
}
