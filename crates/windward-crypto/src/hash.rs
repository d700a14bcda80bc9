use sha3::Digest as _;

pub use sha3::Keccak256;

use windward_core::types::Digest;

/// One-shot Keccak-256.
pub fn keccak256(bytes: &[u8]) -> Digest {
    let mut hasher = Keccak256::new();
    hasher.update(bytes);
    let out = hasher.finalize();
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&out);
    Digest::from_bytes(arr)
}

/// Keccak-256 over a sequence of segments without concatenating them.
pub fn keccak256_concat(segments: &[&[u8]]) -> Digest {
    let mut hasher = Keccak256::new();
    for s in segments {
        hasher.update(s);
    }
    let out = hasher.finalize();
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&out);
    Digest::from_bytes(arr)
}
