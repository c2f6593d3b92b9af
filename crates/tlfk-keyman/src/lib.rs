//! tlfk-keyman: folder and block key management
//!
//! The [`KeyManager`] answers "what is the symmetric key for this folder or
//! block at this key version" and performs rekeys. It is wired to its
//! collaborators explicitly:
//!
//!   - [`KeyCache`]: process-local (folder, version) and block key cache
//!   - [`KeyOps`]: key server holding the server halves
//!   - [`tlfk_crypto::CryptoPrimitives`]: masking and client-half wrapping
//!   - [`Identity`]: current user/device and device keys of folder members

pub mod bundle;
pub mod cache;
pub mod devices;
pub mod error;
pub mod fs_ops;
pub mod identity;
pub mod manager;
pub mod ops;

pub use bundle::{FolderKeyMetadata, KeyBundle, WrappedClientHalf};
pub use cache::{KeyCache, MemoryKeyCache};
pub use devices::{DeviceDirectory, DeviceRecord};
pub use error::{KeyManagerError, KeyManagerResult};
pub use fs_ops::FsKeyOps;
pub use identity::{Identity, IdentityError, LocalIdentity};
pub use manager::{KeyManager, NewBlockKey};
pub use ops::{KeyOps, KeyOpsCalls, KeyOpsError, MemoryKeyOps};
