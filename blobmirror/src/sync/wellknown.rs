//! Trivial payloads that are recorded as downloaded without moving any data.

use tracing::warn;

/// MD5 of zero bytes.
pub const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

/// Content larger than this is never treated as well-known, whatever its hash.
const EMPTY_HASH_SIZE_LIMIT: i64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WellKnownContent {
    pub size: i64,
    pub md5: &'static str,
    pub description: &'static str,
}

pub const WELL_KNOWN: &[WellKnownContent] = &[
    WellKnownContent {
        size: 0,
        md5: EMPTY_MD5,
        description: "empty payload",
    },
    WellKnownContent {
        size: 2,
        md5: "d751713988987e9331980363e24189ce",
        description: "empty JSON array `[]`",
    },
    WellKnownContent {
        size: 2,
        md5: "99914b932bd37a50b983c5e7c90ae93b",
        description: "empty JSON object `{}`",
    },
    WellKnownContent {
        size: 4,
        md5: "399fc6670871474cd7ce0458401fd299",
        description: "JSON array holding one empty string `[\"\"]`",
    },
];

pub fn lookup(size: i64, md5: &str) -> Option<&'static WellKnownContent> {
    WELL_KNOWN
        .iter()
        .find(|entry| entry.size == size && entry.md5.eq_ignore_ascii_case(md5))
}

/// Whether a `(size, hash)` pair is exempt from real transfer.
///
/// Objects below 1 MiB that report the empty-content hash count as empty too.
pub fn is_well_known(size: i64, md5: &str) -> bool {
    if lookup(size, md5).is_some() {
        return true;
    }
    if size == 0 {
        warn!(md5, "zero-size object with unexpected content hash");
        return false;
    }
    size > 0 && size < EMPTY_HASH_SIZE_LIMIT && md5.eq_ignore_ascii_case(EMPTY_MD5)
}
