use digest::consts::U32;
use digest::Digest;

type Blake2b256 = blake2::Blake2b<U32>;

pub fn blake2_256(data: &[u8]) -> [u8; 32] {
    let mut dest = [0; 32];
    dest.copy_from_slice(Blake2b256::digest(data).as_slice());
    dest
}

/// Hashes several byte slices as if they were concatenated.
pub fn blake2_256_parts(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    for part in parts {
        hasher.update(part);
    }
    let mut dest = [0; 32];
    dest.copy_from_slice(hasher.finalize().as_slice());
    dest
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parts_hash_like_concatenation() {
        assert_eq!(blake2_256(b"helloworld"), blake2_256_parts(&[b"hello", b"world"]));
        assert_ne!(blake2_256(b"hello"), blake2_256(b"world"));
    }
}
