//! tlfk-crypto: key material and primitives for folder and block keys
//!
//! Key hierarchy:
//! ```text
//! TLF Crypt Key (256-bit random, one per folder key version)
//!   ├── = client half XOR server half
//!   │     client half: per device, wrapped to the device's X25519 key
//!   │                  (ephemeral X25519 → HKDF-SHA256 → XChaCha20-Poly1305)
//!   │     server half: held by the key server, released per device
//!   └── Block Crypt Key = TLF Crypt Key XOR block server half
//! ```

pub mod error;
pub mod keys;
pub mod mask;
pub mod primitives;
pub mod wrap;

pub use error::CryptoError;
pub use keys::{
    BlockCryptKey, BlockCryptKeyServerHalf, CryptPrivateKey, CryptPublicKey, Kid, TlfCryptKey,
    TlfCryptKeyClientHalf, TlfCryptKeyServerHalf, TlfEphemeralPrivateKey, TlfEphemeralPublicKey,
    TlfPrivateKey, TlfPublicKey,
};
pub use mask::{mask_tlf_crypt_key, unmask_block_crypt_key, unmask_tlf_crypt_key};
pub use primitives::{CryptoPrimitives, StandardCrypto, TlfKeys};
pub use wrap::{decrypt_client_half, encrypt_client_half};

/// Size of every symmetric key and key half (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of a wrapped client half: nonce + ciphertext + tag
pub const WRAPPED_CLIENT_HALF_SIZE: usize = NONCE_SIZE + KEY_SIZE + TAG_SIZE;
