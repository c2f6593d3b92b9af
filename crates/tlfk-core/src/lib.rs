//! tlfk-core: identifiers, configuration and error types shared by the
//! tlfk key-management crates.

pub mod config;
pub mod error;
pub mod types;

pub use error::{TlfkError, TlfkResult};
pub use types::{
    BlockId, BlockPointer, FolderHandle, KeyVersion, Path, PathNode, TlfId, UserId,
};
