pub(crate) mod fnv;

use aes::{cipher::generic_array::GenericArray, Aes128};
use cfb_mode::{cipher::KeyIvInit, BufDecryptor, BufEncryptor};
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};

pub(crate) use self::fnv::fnv1a32;

/// AES-128-CFB keeping its position across calls, so a whole header or
/// body can be fed to it piece by piece.
pub(crate) type Aes128CfbEnc = BufEncryptor<Aes128>;
pub(crate) type Aes128CfbDec = BufDecryptor<Aes128>;

pub(crate) fn encryptor(key: &[u8; 16], iv: &[u8; 16]) -> Aes128CfbEnc {
    Aes128CfbEnc::new(GenericArray::from_slice(key), GenericArray::from_slice(iv))
}

pub(crate) fn decryptor(key: &[u8; 16], iv: &[u8; 16]) -> Aes128CfbDec {
    Aes128CfbDec::new(GenericArray::from_slice(key), GenericArray::from_slice(iv))
}

pub(crate) fn md5(parts: &[&[u8]]) -> [u8; 16] {
    let mut hasher = Md5::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// The 16 byte token sent in clear at the start of a request.
pub(crate) fn auth_hash(id: &[u8; 16], timestamp: i64) -> [u8; 16] {
    let mut mac =
        <Hmac<Md5> as Mac>::new_from_slice(id).expect("HMAC can take key of any size");
    mac.update(&(timestamp as u64).to_be_bytes());
    mac.finalize().into_bytes().into()
}

/// Header IV, a function of the timestamp alone.
pub(crate) fn timestamp_iv(timestamp: i64) -> [u8; 16] {
    let ts = (timestamp as u64).to_be_bytes();
    md5(&[&ts, &ts, &ts, &ts])
}

/// Response key and IV follow from the request body key and IV.
pub(crate) fn response_key_iv(body_key: &[u8; 16], body_iv: &[u8; 16]) -> ([u8; 16], [u8; 16]) {
    (md5(&[body_key]), md5(&[body_iv]))
}
