use sha2::{Digest, Sha256};

/// SHA-256 of raw bytes as lowercase hex. Used for content equality checks,
/// destination markers and index file names, so it must stay stable across
/// runs and platforms.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest() {
        // Well-known vector: sha256("") and sha256("abc").
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn same_bytes_same_hex() {
        assert_eq!(sha256_hex(b"blabla"), sha256_hex(b"blabla"));
        assert_ne!(sha256_hex(b"blabla"), sha256_hex(b"blabl"));
    }
}
