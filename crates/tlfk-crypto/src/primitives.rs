//! The crypto capability consumed by the key manager.

use crate::error::CryptoError;
use crate::keys::{
    BlockCryptKey, BlockCryptKeyServerHalf, CryptPrivateKey, CryptPublicKey, TlfCryptKey,
    TlfCryptKeyClientHalf, TlfCryptKeyServerHalf, TlfEphemeralPrivateKey, TlfEphemeralPublicKey,
    TlfPrivateKey, TlfPublicKey,
};
use crate::{mask, wrap};

/// Fresh key material for one folder key generation.
#[derive(Debug)]
pub struct TlfKeys {
    pub public: TlfPublicKey,
    pub private: TlfPrivateKey,
    pub ephemeral_public: TlfEphemeralPublicKey,
    pub ephemeral_private: TlfEphemeralPrivateKey,
    pub crypt_key: TlfCryptKey,
}

/// Cryptographic operations used to derive, split and wrap folder keys.
///
/// Implementations must draw all random material from a CSPRNG.
pub trait CryptoPrimitives: Send + Sync {
    fn make_random_tlf_keys(&self) -> Result<TlfKeys, CryptoError>;

    fn make_random_tlf_crypt_key_server_half(&self)
        -> Result<TlfCryptKeyServerHalf, CryptoError>;

    fn make_random_block_crypt_key_server_half(
        &self,
    ) -> Result<BlockCryptKeyServerHalf, CryptoError>;

    fn mask_tlf_crypt_key(
        &self,
        server_half: &TlfCryptKeyServerHalf,
        key: &TlfCryptKey,
    ) -> Result<TlfCryptKeyClientHalf, CryptoError>;

    fn unmask_tlf_crypt_key(
        &self,
        server_half: &TlfCryptKeyServerHalf,
        client_half: &TlfCryptKeyClientHalf,
    ) -> Result<TlfCryptKey, CryptoError>;

    fn unmask_block_crypt_key(
        &self,
        server_half: &BlockCryptKeyServerHalf,
        tlf_key: &TlfCryptKey,
    ) -> Result<BlockCryptKey, CryptoError>;

    /// Wrap a client half to `device` using the generation's ephemeral key.
    fn encrypt_tlf_crypt_key_client_half(
        &self,
        ephemeral: &TlfEphemeralPrivateKey,
        device: &CryptPublicKey,
        client_half: &TlfCryptKeyClientHalf,
    ) -> Result<Vec<u8>, CryptoError>;

    /// Unwrap a client half with the local device's private key.
    fn decrypt_tlf_crypt_key_client_half(
        &self,
        ephemeral: &TlfEphemeralPublicKey,
        wrapped: &[u8],
    ) -> Result<TlfCryptKeyClientHalf, CryptoError>;
}

/// Default implementation backed by the OS CSPRNG, X25519 and
/// XChaCha20-Poly1305.
pub struct StandardCrypto {
    device_key: Option<CryptPrivateKey>,
}

impl StandardCrypto {
    pub fn new(device_key: CryptPrivateKey) -> Self {
        Self {
            device_key: Some(device_key),
        }
    }

    /// A crypto handle that can rekey but cannot unwrap client halves.
    pub fn without_device_key() -> Self {
        Self { device_key: None }
    }

    pub fn device_public_key(&self) -> Option<CryptPublicKey> {
        self.device_key.as_ref().map(CryptPrivateKey::public_key)
    }
}

impl std::fmt::Debug for StandardCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardCrypto")
            .field("device_key", &self.device_public_key())
            .finish()
    }
}

impl CryptoPrimitives for StandardCrypto {
    fn make_random_tlf_keys(&self) -> Result<TlfKeys, CryptoError> {
        let private = TlfPrivateKey::generate();
        let ephemeral_private = TlfEphemeralPrivateKey::generate();
        Ok(TlfKeys {
            public: private.public_key(),
            private,
            ephemeral_public: ephemeral_private.public_key(),
            ephemeral_private,
            crypt_key: TlfCryptKey::generate(),
        })
    }

    fn make_random_tlf_crypt_key_server_half(
        &self,
    ) -> Result<TlfCryptKeyServerHalf, CryptoError> {
        Ok(TlfCryptKeyServerHalf::generate())
    }

    fn make_random_block_crypt_key_server_half(
        &self,
    ) -> Result<BlockCryptKeyServerHalf, CryptoError> {
        Ok(BlockCryptKeyServerHalf::generate())
    }

    fn mask_tlf_crypt_key(
        &self,
        server_half: &TlfCryptKeyServerHalf,
        key: &TlfCryptKey,
    ) -> Result<TlfCryptKeyClientHalf, CryptoError> {
        Ok(mask::mask_tlf_crypt_key(server_half, key))
    }

    fn unmask_tlf_crypt_key(
        &self,
        server_half: &TlfCryptKeyServerHalf,
        client_half: &TlfCryptKeyClientHalf,
    ) -> Result<TlfCryptKey, CryptoError> {
        Ok(mask::unmask_tlf_crypt_key(server_half, client_half))
    }

    fn unmask_block_crypt_key(
        &self,
        server_half: &BlockCryptKeyServerHalf,
        tlf_key: &TlfCryptKey,
    ) -> Result<BlockCryptKey, CryptoError> {
        Ok(mask::unmask_block_crypt_key(server_half, tlf_key))
    }

    fn encrypt_tlf_crypt_key_client_half(
        &self,
        ephemeral: &TlfEphemeralPrivateKey,
        device: &CryptPublicKey,
        client_half: &TlfCryptKeyClientHalf,
    ) -> Result<Vec<u8>, CryptoError> {
        wrap::encrypt_client_half(ephemeral, device, client_half)
    }

    fn decrypt_tlf_crypt_key_client_half(
        &self,
        ephemeral: &TlfEphemeralPublicKey,
        wrapped: &[u8],
    ) -> Result<TlfCryptKeyClientHalf, CryptoError> {
        let device_key = self.device_key.as_ref().ok_or(CryptoError::NoDeviceKey)?;
        wrap::decrypt_client_half(device_key, ephemeral, wrapped)
    }
}
