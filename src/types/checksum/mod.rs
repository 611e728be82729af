#![forbid(unsafe_code)]

/// CRC32 over a serialized page: kind tag, revision and body.
pub fn page_crc32(kind: u8, revision: u32, body: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[kind]);
    hasher.update(&revision.to_be_bytes());
    hasher.update(body);
    hasher.finalize()
}
