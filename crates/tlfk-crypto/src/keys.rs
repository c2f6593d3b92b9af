//! Key material types. Secrets are zeroized on drop and never printed;
//! public keys are X25519 points serialized as hex.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

use crate::error::CryptoError;
use crate::KEY_SIZE;

/// Context string for the key check value recorded in each key bundle.
const KEY_CHECK_CONTEXT: &str = "tlfk 2026-01-01 tlf crypt key check v1";

/// Fill a 256-bit buffer from the OS CSPRNG.
pub(crate) fn random_bytes() -> [u8; KEY_SIZE] {
    let mut bytes = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

fn decode_hex_key(s: &str) -> Result<[u8; KEY_SIZE], CryptoError> {
    let s = s.trim();
    let mut buf = [0u8; KEY_SIZE];
    hex::decode_to_slice(s, &mut buf).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    Ok(buf)
}

macro_rules! secret_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq)]
        pub struct $name {
            bytes: [u8; KEY_SIZE],
        }

        impl $name {
            pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
                Self { bytes }
            }

            pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
                &self.bytes
            }

            /// Draw a fresh value from the OS CSPRNG.
            pub fn generate() -> Self {
                Self::from_bytes(random_bytes())
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                self.bytes.zeroize();
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("bytes", &"[REDACTED]")
                    .finish()
            }
        }
    };
}

macro_rules! public_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name([u8; KEY_SIZE]);

        impl $name {
            pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
                &self.0
            }

            pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
                decode_hex_key(s).map(Self)
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub(crate) fn to_x25519(&self) -> X25519PublicKey {
                X25519PublicKey::from(self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl TryFrom<String> for $name {
            type Error = CryptoError;

            fn try_from(s: String) -> Result<Self, CryptoError> {
                Self::from_hex(&s)
            }
        }

        impl From<$name> for String {
            fn from(k: $name) -> Self {
                k.to_hex()
            }
        }
    };
}

macro_rules! key_pair {
    ($private:ident => $public:ident) => {
        impl $private {
            pub fn public_key(&self) -> $public {
                let public = X25519PublicKey::from(&self.to_x25519());
                $public::from_bytes(public.to_bytes())
            }

            pub(crate) fn to_x25519(&self) -> StaticSecret {
                StaticSecret::from(self.bytes)
            }
        }
    };
}

secret_key!(
    /// Folder master secret for one key version.
    TlfCryptKey
);
secret_key!(
    /// Device-specific share of a [`TlfCryptKey`], stored wrapped in the key bundle.
    TlfCryptKeyClientHalf
);
secret_key!(
    /// Key-server share of a [`TlfCryptKey`].
    TlfCryptKeyServerHalf
);
secret_key!(
    /// Per-block secret.
    BlockCryptKey
);
secret_key!(
    /// Key-server share of a [`BlockCryptKey`].
    BlockCryptKeyServerHalf
);
secret_key!(
    /// A device's long-lived X25519 private key.
    CryptPrivateKey
);
secret_key!(TlfPrivateKey);
secret_key!(
    /// Sender side of the client-half wrapping, generated fresh per rekey.
    TlfEphemeralPrivateKey
);

public_key!(
    /// A device's long-lived X25519 public key.
    CryptPublicKey
);
public_key!(TlfPublicKey);
public_key!(TlfEphemeralPublicKey);

key_pair!(CryptPrivateKey => CryptPublicKey);
key_pair!(TlfPrivateKey => TlfPublicKey);
key_pair!(TlfEphemeralPrivateKey => TlfEphemeralPublicKey);

impl CryptPrivateKey {
    /// Parse a hex-encoded private key (as stored in a device key file).
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let mut bytes = decode_hex_key(s)?;
        let key = Self::from_bytes(bytes);
        bytes.zeroize();
        Ok(key)
    }

    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.bytes))
    }
}

impl CryptPublicKey {
    /// Key identifier used to index key bundles and key server records.
    pub fn kid(&self) -> Kid {
        Kid(self.to_hex())
    }
}

impl TlfCryptKey {
    /// Non-secret check value for this key, recorded in the key bundle and
    /// compared after reconstruction.
    pub fn key_check(&self) -> [u8; KEY_SIZE] {
        blake3::derive_key(KEY_CHECK_CONTEXT, &self.bytes)
    }

    /// Short printable form of the key check value.
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.key_check()[..8])
    }
}

/// Identifier of a device public key (hex of the key bytes).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kid(String);

impl Kid {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Kid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keys_differ() {
        let k1 = TlfCryptKey::generate();
        let k2 = TlfCryptKey::generate();
        assert_ne!(k1.as_bytes(), k2.as_bytes(), "random keys must differ");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let key = TlfCryptKey::from_bytes([7u8; KEY_SIZE]);
        let printed = format!("{key:?}");
        assert!(printed.contains("REDACTED"));
        assert!(!printed.contains("7, 7"));
    }

    #[test]
    fn test_public_key_derivation_is_stable() {
        let private = CryptPrivateKey::generate();
        assert_eq!(private.public_key(), private.public_key());
        assert_ne!(private.public_key(), CryptPrivateKey::generate().public_key());
    }

    #[test]
    fn test_private_key_hex_roundtrip() {
        let private = CryptPrivateKey::generate();
        let parsed = CryptPrivateKey::from_hex(&private.to_hex()).unwrap();
        assert_eq!(private, parsed);
        assert!(CryptPrivateKey::from_hex("abcd").is_err());
    }

    #[test]
    fn test_public_key_serde_as_hex() {
        let public = CryptPrivateKey::generate().public_key();
        let json = serde_json::to_string(&public).unwrap();
        assert_eq!(json, format!("\"{}\"", public.to_hex()));
        let parsed: CryptPublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, public);
        assert_eq!(public.kid().as_str(), public.to_hex());
    }

    #[test]
    fn test_key_check_depends_on_key() {
        let k1 = TlfCryptKey::from_bytes([1u8; KEY_SIZE]);
        let k2 = TlfCryptKey::from_bytes([2u8; KEY_SIZE]);
        assert_eq!(k1.key_check(), k1.clone().key_check());
        assert_ne!(k1.key_check(), k2.key_check());
        assert_ne!(&k1.key_check(), k1.as_bytes());
        assert_eq!(k1.fingerprint().len(), 16);
    }
}
