//! Fingerprints: a single hash over the attributes that decide whether a
//! previously produced output is still valid.
//!
//! Files are fingerprinted by stamp (mtime and length), jobs by their
//! configuration. Neither is a cryptographic hash; they only need to be
//! stable from one run to the next.

use crate::env::FileStamp;
use std::hash::{Hash, Hasher};

/// A stable 64-bit fingerprint.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub u64);

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

const UNIT_SEPARATOR: u8 = 0x1F;

/// Incremental fingerprint builder.  Fields are separated so that
/// ("ab", "c") and ("a", "bc") hash differently.
#[derive(Default)]
pub struct FingerprintBuilder(std::collections::hash_map::DefaultHasher);

impl FingerprintBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_str(&mut self, s: &str) -> &mut Self {
        s.hash(&mut self.0);
        self.0.write_u8(UNIT_SEPARATOR);
        self
    }

    pub fn write_strs<'a>(&mut self, strs: impl IntoIterator<Item = &'a str>) -> &mut Self {
        for s in strs {
            s.hash(&mut self.0);
        }
        self.0.write_u8(UNIT_SEPARATOR);
        self
    }

    pub fn write_json(&mut self, value: &serde_json::Value) -> &mut Self {
        // serde_json maps are ordered by key, so serialization is deterministic.
        self.write_str(&value.to_string())
    }

    pub fn write_stamp(&mut self, stamp: Option<FileStamp>) -> &mut Self {
        match stamp {
            None => self.0.write_u8(0),
            Some(stamp) => {
                self.0.write_u8(1);
                self.0.write_u128(stamp.mtime_nanos);
                self.0.write_u64(stamp.len);
            }
        }
        self.0.write_u8(UNIT_SEPARATOR);
        self
    }

    pub fn write_fingerprint(&mut self, fp: Fingerprint) -> &mut Self {
        self.0.write_u64(fp.0);
        self.0.write_u8(UNIT_SEPARATOR);
        self
    }

    pub fn finish(&self) -> Fingerprint {
        Fingerprint(self.0.finish())
    }
}

/// Fingerprint of a file on disk, as identified by its path and stamp.
pub fn stamp_fingerprint(path: &str, stamp: Option<FileStamp>) -> Fingerprint {
    FingerprintBuilder::new()
        .write_str(path)
        .write_stamp(stamp)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separated_fields() {
        let a = FingerprintBuilder::new().write_str("ab").write_str("c").finish();
        let b = FingerprintBuilder::new().write_str("a").write_str("bc").finish();
        assert_ne!(a, b);
    }

    #[test]
    fn stamp_changes_fingerprint() {
        let old = FileStamp {
            mtime_nanos: 10,
            len: 3,
        };
        let new = FileStamp {
            mtime_nanos: 11,
            len: 3,
        };
        assert_eq!(
            stamp_fingerprint("a.c", Some(old)),
            stamp_fingerprint("a.c", Some(old))
        );
        assert_ne!(
            stamp_fingerprint("a.c", Some(old)),
            stamp_fingerprint("a.c", Some(new))
        );
        assert_ne!(
            stamp_fingerprint("a.c", Some(old)),
            stamp_fingerprint("a.c", None)
        );
    }
}
