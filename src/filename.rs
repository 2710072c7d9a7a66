//! Filename Codec (spec.md §4.3): encodes/decodes `(hash, modified, etag-hash?,
//! kind)` to/from filenames, and reads/writes expiration via file times.

use std::path::Path;

use filetime::FileTime;
use sha1::{Digest, Sha1};
use time::{format_description::FormatItem, macros::format_description, OffsetDateTime};
use uuid::Uuid;

use crate::error::Result;

const TIMESTAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour][minute][second]");

/// The three kinds of file the store manages, each with its own extension.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FileKind {
    /// `.response.json` — a persisted [`crate::model::ResponseEntry`].
    ResponseMeta,
    /// `.response.bin` — a persisted response body.
    ResponseBody,
    /// `.variation.json` — a persisted [`crate::variation::Variation`] indirection record.
    Variation,
}

impl FileKind {
    /// The extension string for this kind, e.g. `.response.json`.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::ResponseMeta => ".response.json",
            Self::ResponseBody => ".response.bin",
            Self::Variation => ".variation.json",
        }
    }
}

/// A parsed or freshly-built filename (spec.md §3 `FileName`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileName {
    /// A file under `root/` whose name encodes `(keyHash, modifiedUtc, etagHash?)`.
    Permanent {
        /// Lowercase hex SHA-1 of the cache key.
        key_hash: String,
        /// Second-precision UTC timestamp the name was minted at.
        modified_utc: OffsetDateTime,
        /// Lowercase hex SHA-1 of the quoted `ETag` value, if any.
        etag_hash: Option<String>,
        /// Which of the three file kinds this name is.
        kind: FileKind,
    },
    /// A UUID-named file under `root/temp/`, present only during publication.
    Temporary {
        /// The file's UUID.
        id: Uuid,
        /// Which of the three file kinds this name is.
        kind: FileKind,
    },
}

/// Lowercase hex SHA-1 of `s`.
#[must_use]
pub fn sha1_hex(s: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}

/// Strips surrounding `"` from a quoted `ETag` value before hashing, per
/// spec.md §3 ("SHA-1 over the ETag header value (quoted form)" — the form
/// actually hashed is the value as it appears on the wire, quotes included;
/// callers pass the raw header value through unchanged).
fn etag_hash(etag: &str) -> String {
    sha1_hex(etag)
}

impl FileName {
    /// Builds the permanent name for a response metadata file.
    #[must_use]
    pub fn metadata(key: &str, modified_utc: OffsetDateTime, etag: Option<&str>) -> Self {
        Self::Permanent {
            key_hash: sha1_hex(key),
            modified_utc: truncate_to_seconds(modified_utc),
            etag_hash: etag.map(etag_hash),
            kind: FileKind::ResponseMeta,
        }
    }

    /// Builds the permanent name for a variation indirection file.
    #[must_use]
    pub fn variation(key: &str, modified_utc: OffsetDateTime, etag: Option<&str>) -> Self {
        Self::Permanent {
            key_hash: sha1_hex(key),
            modified_utc: truncate_to_seconds(modified_utc),
            etag_hash: etag.map(etag_hash),
            kind: FileKind::Variation,
        }
    }

    /// Builds a fresh temporary name of `kind` under `temp/`.
    #[must_use]
    pub fn temporary(kind: FileKind) -> Self {
        Self::Temporary { id: Uuid::new_v4(), kind }
    }

    /// Derives the `.response.bin` sibling name of a `.response.json` metadata name.
    ///
    /// Only valid on names of kind [`FileKind::ResponseMeta`]; other kinds
    /// are returned with their kind swapped regardless, since callers are
    /// expected to only invoke this on metadata names (spec.md §4.3).
    #[must_use]
    pub fn to_response_file_name(&self) -> Self {
        match self.clone() {
            Self::Permanent { key_hash, modified_utc, etag_hash, .. } => {
                Self::Permanent { key_hash, modified_utc, etag_hash, kind: FileKind::ResponseBody }
            }
            Self::Temporary { id, .. } => Self::Temporary { id, kind: FileKind::ResponseBody },
        }
    }

    /// The `keyHash` prefix, for enumerating candidate files under `root/`.
    #[must_use]
    pub fn key_hash(&self) -> Option<&str> {
        match self {
            Self::Permanent { key_hash, .. } => Some(key_hash),
            Self::Temporary { .. } => None,
        }
    }

    /// The file kind.
    #[must_use]
    pub fn kind(&self) -> FileKind {
        match self {
            Self::Permanent { kind, .. } | Self::Temporary { kind, .. } => *kind,
        }
    }

    /// Serializes to the on-disk filename.
    #[must_use]
    pub fn to_file_name(&self) -> String {
        match self {
            Self::Permanent { key_hash, modified_utc, etag_hash, kind } => {
                let ts = modified_utc.format(TIMESTAMP_FORMAT).unwrap_or_default();
                format!("{key_hash}_{ts}Z_{}{}", etag_hash.as_deref().unwrap_or(""), kind.extension())
            }
            Self::Temporary { id, kind } => format!("{id}{}", kind.extension()),
        }
    }

    /// Parses a filename previously produced by [`FileName::to_file_name`].
    ///
    /// Returns `None` ([`crate::error::CacheError`]'s `CorruptFilename`
    /// policy row — spec.md §7) if it doesn't match the grammar; callers
    /// skip such files during enumeration and log at trace level.
    #[must_use]
    pub fn parse(file_name: &str) -> Option<Self> {
        let (basename, extension) = split_extension(file_name)?;
        let kind = match extension {
            ".response.json" => FileKind::ResponseMeta,
            ".response.bin" => FileKind::ResponseBody,
            ".variation.json" => FileKind::Variation,
            _ => return None,
        };

        let first_segment_len = basename.len();
        if first_segment_len == 36 {
            if let Ok(id) = Uuid::parse_str(basename) {
                return Some(Self::Temporary { id, kind });
            }
        }

        let (key_hash, rest) = basename.split_once('_')?;
        if rest.len() < 18 {
            return None;
        }
        let (ts, rest) = rest.split_at(18);
        if !ts.ends_with('Z') {
            return None;
        }
        let modified_utc = parse_compact_timestamp(&ts[..ts.len() - 1]).ok()?;
        let rest = rest.strip_prefix('_')?;
        let etag_hash = if rest.is_empty() { None } else { Some(rest.to_string()) };

        Some(Self::Permanent { key_hash: key_hash.to_string(), modified_utc, etag_hash, kind })
    }
}

fn parse_compact_timestamp(s: &str) -> std::result::Result<OffsetDateTime, time::error::Parse> {
    let dt = time::PrimitiveDateTime::parse(s, TIMESTAMP_FORMAT)?;
    Ok(dt.assume_utc())
}

/// Splits `file_name` into `(basename, extension)` where `extension` starts
/// at the first `.`, matching spec.md §4.3's parsing rule.
fn split_extension(file_name: &str) -> Option<(&str, &str)> {
    let dot = file_name.find('.')?;
    Some((&file_name[..dot], &file_name[dot..]))
}

fn truncate_to_seconds(t: OffsetDateTime) -> OffsetDateTime {
    t.replace_nanosecond(0).unwrap_or(t)
}

/// Reads a file's last-write time as a UTC instant — the encoded expiration.
pub fn get_expiration(path: &Path) -> Result<OffsetDateTime> {
    let metadata = std::fs::metadata(path)?;
    let mtime = FileTime::from_last_modification_time(&metadata);
    Ok(OffsetDateTime::from_unix_timestamp(mtime.unix_seconds()).unwrap_or(OffsetDateTime::UNIX_EPOCH))
}

/// Sets a file's last-write time to `instant` (the new expiration).
pub fn set_expiration(path: &Path, instant: OffsetDateTime) -> Result<()> {
    let metadata = std::fs::metadata(path)?;
    let atime = FileTime::from_last_access_time(&metadata);
    let mtime = FileTime::from_unix_time(instant.unix_timestamp(), 0);
    filetime::set_file_times(path, atime, mtime)?;
    Ok(())
}

/// Sets a file's last-access time to `now`, without touching its expiration.
pub fn refresh_access(path: &Path, now: OffsetDateTime) -> Result<()> {
    let metadata = std::fs::metadata(path)?;
    let mtime = FileTime::from_last_modification_time(&metadata);
    let atime = FileTime::from_unix_time(now.unix_timestamp(), 0);
    filetime::set_file_times(path, atime, mtime)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_metadata_name() {
        let modified = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let name = FileName::metadata("the-key", modified, Some("\"v1\""));
        let parsed = FileName::parse(&name.to_file_name()).expect("should parse");
        assert_eq!(name, parsed);
    }

    #[test]
    fn round_trips_metadata_name_without_etag() {
        let modified = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let name = FileName::metadata("the-key", modified, None);
        let parsed = FileName::parse(&name.to_file_name()).expect("should parse");
        assert_eq!(name, parsed);
    }

    #[test]
    fn temporary_names_round_trip() {
        let name = FileName::temporary(FileKind::ResponseBody);
        let parsed = FileName::parse(&name.to_file_name()).expect("should parse");
        assert_eq!(name, parsed);
    }

    #[test]
    fn to_response_file_name_swaps_extension_only() {
        let modified = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let meta = FileName::metadata("k", modified, None);
        let body = meta.to_response_file_name();
        assert_eq!(body.kind(), FileKind::ResponseBody);
        assert_eq!(body.key_hash(), meta.key_hash());
    }

    #[test]
    fn corrupt_filenames_fail_to_parse() {
        assert!(FileName::parse("garbage").is_none());
        assert!(FileName::parse("abc_not-a-timestampZ_.response.json").is_none());
    }
}
