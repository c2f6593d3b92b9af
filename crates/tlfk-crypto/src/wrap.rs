//! Client-half wrapping to a device public key
//!
//! Wrapped format (binary):
//! ```text
//! [24 bytes: random nonce][32 bytes: ciphertext][16 bytes: Poly1305 tag]
//! wrapping key = HKDF-SHA256(ikm = X25519(ephemeral, device),
//!                            info = "tlfk-client-half-v1" || ephemeral_pub || device_pub)
//! ```
//!
//! Binding both public keys into the HKDF info ties each wrapped half to
//! the bundle's ephemeral key and to the device it was issued for.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::error::CryptoError;
use crate::keys::{
    CryptPrivateKey, CryptPublicKey, TlfCryptKeyClientHalf, TlfEphemeralPrivateKey,
    TlfEphemeralPublicKey,
};
use crate::{KEY_SIZE, NONCE_SIZE, WRAPPED_CLIENT_HALF_SIZE};

const WRAP_INFO: &[u8] = b"tlfk-client-half-v1";

fn wrapping_key(
    shared: &[u8; KEY_SIZE],
    ephemeral: &TlfEphemeralPublicKey,
    device: &CryptPublicKey,
) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
    let mut info = Vec::with_capacity(WRAP_INFO.len() + 2 * KEY_SIZE);
    info.extend_from_slice(WRAP_INFO);
    info.extend_from_slice(ephemeral.as_bytes());
    info.extend_from_slice(device.as_bytes());

    let hkdf = Hkdf::<Sha256>::new(None, shared);
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(&info, &mut okm[..])
        .map_err(|e| CryptoError::Kdf(e.to_string()))?;
    Ok(okm)
}

/// Encrypt a client half so only the holder of `device`'s private key can
/// recover it.
pub fn encrypt_client_half(
    ephemeral: &TlfEphemeralPrivateKey,
    device: &CryptPublicKey,
    client_half: &TlfCryptKeyClientHalf,
) -> Result<Vec<u8>, CryptoError> {
    let shared = ephemeral.to_x25519().diffie_hellman(&device.to_x25519());
    if !shared.was_contributory() {
        return Err(CryptoError::Encrypt("low-order device public key".into()));
    }
    let key = wrapping_key(shared.as_bytes(), &ephemeral.public_key(), device)?;
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key[..]));

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, client_half.as_bytes().as_ref())
        .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

    let mut result = Vec::with_capacity(WRAPPED_CLIENT_HALF_SIZE);
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Recover a client half wrapped by [`encrypt_client_half`].
pub fn decrypt_client_half(
    device: &CryptPrivateKey,
    ephemeral: &TlfEphemeralPublicKey,
    wrapped: &[u8],
) -> Result<TlfCryptKeyClientHalf, CryptoError> {
    if wrapped.len() != WRAPPED_CLIENT_HALF_SIZE {
        return Err(CryptoError::InvalidLength {
            expected: WRAPPED_CLIENT_HALF_SIZE,
            got: wrapped.len(),
        });
    }

    let shared = device.to_x25519().diffie_hellman(&ephemeral.to_x25519());
    if !shared.was_contributory() {
        return Err(CryptoError::Decrypt);
    }
    let key = wrapping_key(shared.as_bytes(), ephemeral, &device.public_key())?;
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key[..]));

    let (nonce_bytes, ciphertext) = wrapped.split_at(NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);

    let mut plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::Decrypt)?;

    if plaintext.len() != KEY_SIZE {
        plaintext.zeroize();
        return Err(CryptoError::Decrypt);
    }

    let mut bytes = [0u8; KEY_SIZE];
    bytes.copy_from_slice(&plaintext);
    plaintext.zeroize();
    let half = TlfCryptKeyClientHalf::from_bytes(bytes);
    bytes.zeroize();
    Ok(half)
}
