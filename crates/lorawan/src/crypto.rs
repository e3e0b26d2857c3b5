use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;

use crate::{Aes128Key, DevAddr};

pub(crate) fn encrypt_block(key: &Aes128Key, block: [u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new(GenericArray::from_slice(&key.0));
    let mut b = GenericArray::clone_from_slice(&block);
    cipher.encrypt_block(&mut b);
    let mut out = [0u8; 16];
    out.copy_from_slice(&b);
    out
}

pub(crate) fn decrypt_block(key: &Aes128Key, block: [u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new(GenericArray::from_slice(&key.0));
    let mut b = GenericArray::clone_from_slice(&block);
    cipher.decrypt_block(&mut b);
    let mut out = [0u8; 16];
    out.copy_from_slice(&b);
    out
}

/// Encrypts (or decrypts, the operation is symmetric) an FRMPayload.
///
/// The keystream is AES-128 over the `A_i` blocks keyed with the session key
/// (AppSKey for application ports, McAppSKey for multicast).
pub fn encrypt_frm_payload(
    key: &Aes128Key,
    uplink: bool,
    dev_addr: DevAddr,
    f_cnt: u32,
    data: &[u8],
) -> Vec<u8> {
    let mut a = [0u8; 16];
    a[0] = 0x01;
    a[5] = if uplink { 0x00 } else { 0x01 };
    a[6..10].copy_from_slice(&dev_addr.to_le_bytes());
    a[10..14].copy_from_slice(&f_cnt.to_le_bytes());

    let mut out = Vec::with_capacity(data.len());
    for (i, chunk) in data.chunks(16).enumerate() {
        a[15] = (i + 1) as u8;
        let s = encrypt_block(key, a);
        out.extend(chunk.iter().zip(s.iter()).map(|(d, k)| d ^ k));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> Aes128Key {
        "2b7e151628aed2a6abf7158809cf4f3c".parse().unwrap()
    }

    #[test]
    fn test_encrypt_is_involution() {
        let addr: DevAddr = "26011bda".parse().unwrap();
        let data = b"hello world, this spans two blocks";
        let encrypted = encrypt_frm_payload(&key(), false, addr, 10, data);
        assert_eq!(encrypted.len(), data.len());
        assert_ne!(&encrypted[..], &data[..]);
        let decrypted = encrypt_frm_payload(&key(), false, addr, 10, &encrypted);
        assert_eq!(&decrypted[..], &data[..]);
    }

    #[test]
    fn test_keystream_depends_on_counter_and_direction() {
        let addr: DevAddr = "26011bda".parse().unwrap();
        let data = [0u8; 8];
        let a = encrypt_frm_payload(&key(), false, addr, 1, &data);
        let b = encrypt_frm_payload(&key(), false, addr, 2, &data);
        let c = encrypt_frm_payload(&key(), true, addr, 1, &data);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_empty_payload() {
        let addr = DevAddr::default();
        assert!(encrypt_frm_payload(&key(), false, addr, 0, &[]).is_empty());
    }

    #[test]
    fn test_block_round_trip() {
        let block = [7u8; 16];
        let enc = encrypt_block(&key(), block);
        assert_eq!(decrypt_block(&key(), enc), block);
    }

    #[test]
    fn test_fips197_vector() {
        // FIPS-197 appendix C.1
        let k: Aes128Key = "000102030405060708090a0b0c0d0e0f".parse().unwrap();
        let pt: [u8; 16] = hex::decode("00112233445566778899aabbccddeeff")
            .unwrap()
            .try_into()
            .unwrap();
        let ct = encrypt_block(&k, pt);
        assert_eq!(hex::encode(ct), "69c4e0d86a7b0430d8cdb78070b4c55a");
    }
}
