use sha2::{Digest, Sha256};

/// Content digest used for `keyhash` and `valuehash`: lowercase hex SHA-256, always 64 chars.
pub fn content_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
