// 32 bit fnv-1a, the checksum of headers and legacy chunks

const OFFSET_BASIS: u32 = 2166136261;
const PRIME: u32 = 16777619;

pub(crate) fn fnv1a32(data: &[u8]) -> u32 {
    let mut hash = OFFSET_BASIS;
    for &byte in data {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}
