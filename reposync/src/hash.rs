//! Git object hashing.
//!
//! The hash of a blob is the SHA-1 of `"blob " + decimal length + NUL + content`.
//! It must stay bit-exact with the remote or every file will look changed.

use std::fmt::Write;

use sha1::{Digest, Sha1};

/// Hash of the empty blob, as computed by Git.
pub const EMPTY_BLOB: &str = "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391";

/// Computes the Git blob hash of `content` as lowercase hex.
pub fn blob_hash(content: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(b"blob ");
    hasher.update(content.len().to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(content);
    to_hex(&hasher.finalize())
}

fn to_hex(digest: &[u8]) -> String {
    let mut hex = String::with_capacity(digest.len() * 2);
    for b in digest {
        let _ = write!(hex, "{b:0>2x}");
    }
    hex
}

/// Whether `s` looks like a full SHA-1 object name.
pub fn is_object_name(s: &str) -> bool {
    s.len() == 40 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
