use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};

/// User metadata key holding the caller-supplied modification time
/// (sent as `x-amz-meta-mtime`).
pub const MTIME_KEY: &str = "mtime";
/// Secondary copy of the modification time for stores that rewrite `mtime`.
pub const CUSTOM_MTIME_KEY: &str = "custom-mtime";

/// Layout used by objects written before timestamps moved to RFC 3339.
const LEGACY_LAYOUT: &str = "%d %b %y %H:%M %z";

pub fn format_mtime(mod_time: DateTime<Utc>) -> String {
    mod_time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_mtime(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, LEGACY_LAYOUT))
        .map(|t| t.with_timezone(&Utc))
        .ok()
}

/// Modification time for an object: `mtime` metadata, then `custom-mtime`,
/// then the store's own last-modified stamp.
pub fn mod_time(
    metadata: Option<&HashMap<String, String>>,
    last_modified: Option<&aws_sdk_s3::primitives::DateTime>,
) -> Option<DateTime<Utc>> {
    let from_meta = metadata.and_then(|meta| {
        [MTIME_KEY, CUSTOM_MTIME_KEY]
            .iter()
            .filter_map(|key| meta.get(*key))
            .find_map(|value| parse_mtime(value))
    });
    from_meta.or_else(|| {
        last_modified.and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()))
    })
}
