//! ETag computation.
//!
//! Single-part objects carry the quoted hex MD5 of their content. Objects
//! assembled from a multipart session carry the MD5 of the concatenated
//! binary part digests followed by `-<part count>`, which is never a content
//! MD5 and is skipped by download integrity checks.

use digest::Digest;
use md5::Md5;

/// Hex-encoded MD5 digest of `data`.
///
/// # Examples
///
/// ```
/// use rustack_transfer_memory::checksums::md5_hex;
///
/// assert_eq!(md5_hex(b"hello"), "5d41402abc4b2a76b9719d911017c592");
/// ```
#[must_use]
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Quoted single-part ETag of `data`.
#[must_use]
pub fn etag(data: &[u8]) -> String {
    format!("\"{}\"", md5_hex(data))
}

/// Quoted multipart ETag of an object built from parts with the given
/// ETags (quoted or not), in part order.
#[must_use]
pub fn multipart_etag<'a>(part_etags: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Md5::new();
    let mut count = 0;
    for part in part_etags {
        // Part ETags come from `etag`, so they always decode.
        if let Ok(raw) = hex::decode(part.trim_matches('"')) {
            hasher.update(raw);
        }
        count += 1;
    }
    format!("\"{}-{count}\"", hex::encode(hasher.finalize()))
}
