//! Key masking: the invertible combination of a key with a server half.
//!
//! Both directions are XOR of two 256-bit values. With a uniformly random
//! server half, the client half alone is independent of the key and so is
//! the server half alone.

use crate::keys::{
    BlockCryptKey, BlockCryptKeyServerHalf, TlfCryptKey, TlfCryptKeyClientHalf,
    TlfCryptKeyServerHalf,
};
use crate::KEY_SIZE;

fn xor(a: &[u8; KEY_SIZE], b: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    let mut out = [0u8; KEY_SIZE];
    for (o, (x, y)) in out.iter_mut().zip(a.iter().zip(b.iter())) {
        *o = x ^ y;
    }
    out
}

/// Split `key` into the client half matching `server_half`.
pub fn mask_tlf_crypt_key(
    server_half: &TlfCryptKeyServerHalf,
    key: &TlfCryptKey,
) -> TlfCryptKeyClientHalf {
    TlfCryptKeyClientHalf::from_bytes(xor(server_half.as_bytes(), key.as_bytes()))
}

/// Recombine a server half and a client half into the folder key.
pub fn unmask_tlf_crypt_key(
    server_half: &TlfCryptKeyServerHalf,
    client_half: &TlfCryptKeyClientHalf,
) -> TlfCryptKey {
    TlfCryptKey::from_bytes(xor(server_half.as_bytes(), client_half.as_bytes()))
}

/// Derive a block key from its server half and the folder key of the
/// version the block was written under.
pub fn unmask_block_crypt_key(
    server_half: &BlockCryptKeyServerHalf,
    tlf_key: &TlfCryptKey,
) -> BlockCryptKey {
    BlockCryptKey::from_bytes(xor(server_half.as_bytes(), tlf_key.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn unmask_inverts_mask(key in any::<[u8; KEY_SIZE]>(), server in any::<[u8; KEY_SIZE]>()) {
            let key = TlfCryptKey::from_bytes(key);
            let server_half = TlfCryptKeyServerHalf::from_bytes(server);
            let client_half = mask_tlf_crypt_key(&server_half, &key);
            prop_assert_eq!(unmask_tlf_crypt_key(&server_half, &client_half), key);
        }
    }

    #[test]
    fn test_client_half_differs_from_key() {
        let key = TlfCryptKey::generate();
        let server_half = TlfCryptKeyServerHalf::generate();
        let client_half = mask_tlf_crypt_key(&server_half, &key);
        assert_ne!(client_half.as_bytes(), key.as_bytes());
        assert_ne!(client_half.as_bytes(), server_half.as_bytes());
    }

    #[test]
    fn test_block_key_depends_on_tlf_key() {
        let server_half = BlockCryptKeyServerHalf::generate();
        let k0 = TlfCryptKey::generate();
        let k1 = TlfCryptKey::generate();
        assert_ne!(
            unmask_block_crypt_key(&server_half, &k0),
            unmask_block_crypt_key(&server_half, &k1)
        );
        assert_eq!(
            unmask_block_crypt_key(&server_half, &k0),
            unmask_block_crypt_key(&server_half, &k0)
        );
    }
}
