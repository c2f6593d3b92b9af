//! Identifier types for folders, key generations, users and blocks.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{TlfkError, TlfkResult};

/// Stable identifier of a top-level folder (TLF).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TlfId(uuid::Uuid);

impl TlfId {
    /// Allocate a fresh random folder id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for TlfId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for TlfId {
    type Err = TlfkError;

    fn from_str(s: &str) -> TlfkResult<Self> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| TlfkError::InvalidId(format!("folder id {s:?}: {e}")))
    }
}

/// Generation counter of a folder's key material.
///
/// Version 0 is the first generation; every rekey adds exactly one.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct KeyVersion(u32);

impl KeyVersion {
    pub const FIRST: KeyVersion = KeyVersion(0);

    pub const fn new(v: u32) -> Self {
        Self(v)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// The following generation, or `None` on overflow.
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }

    /// Position of this version's bundle in the metadata bundle list.
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for KeyVersion {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl fmt::Display for KeyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user identity as resolved by the identity service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Validate a user name. `,` and `#` are reserved by the folder display
    /// string, so they are rejected here.
    pub fn new(name: impl Into<String>) -> TlfkResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(TlfkError::InvalidId("empty user id".into()));
        }
        if name.contains([',', '#']) || name.chars().any(char::is_whitespace) {
            return Err(TlfkError::InvalidId(format!("user id {name:?}")));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = TlfkError;

    fn try_from(s: String) -> TlfkResult<Self> {
        Self::new(s)
    }
}

impl From<UserId> for String {
    fn from(u: UserId) -> Self {
        u.0
    }
}

impl FromStr for UserId {
    type Err = TlfkError;

    fn from_str(s: &str) -> TlfkResult<Self> {
        Self::new(s)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Size of a block id (BLAKE3 digest)
pub const BLOCK_ID_SIZE: usize = 32;

/// Content-addressed block identifier: BLAKE3 of the encrypted block.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlockId([u8; BLOCK_ID_SIZE]);

impl BlockId {
    pub fn from_bytes(bytes: [u8; BLOCK_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Hash encrypted block content into its id.
    pub fn from_content(content: &[u8]) -> Self {
        Self(*blake3::hash(content).as_bytes())
    }

    pub fn from_hex(s: &str) -> TlfkResult<Self> {
        let mut buf = [0u8; BLOCK_ID_SIZE];
        hex::decode_to_slice(s, &mut buf)
            .map_err(|e| TlfkError::InvalidId(format!("block id {s:?}: {e}")))?;
        Ok(Self(buf))
    }

    pub fn as_bytes(&self) -> &[u8; BLOCK_ID_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self.to_hex())
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl TryFrom<String> for BlockId {
    type Error = TlfkError;

    fn try_from(s: String) -> TlfkResult<Self> {
        Self::from_hex(&s)
    }
}

impl From<BlockId> for String {
    fn from(id: BlockId) -> Self {
        id.to_hex()
    }
}

/// Reference to a stored block, including the key generation it was
/// encrypted under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPointer {
    pub id: BlockId,
    pub key_version: KeyVersion,
    pub creator: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathNode {
    pub pointer: BlockPointer,
    pub name: String,
}

/// A resolved path inside a folder: the chain of block pointers from the
/// folder root to the node being operated on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    pub tlf: TlfId,
    pub nodes: Vec<PathNode>,
}

impl Path {
    pub fn new(tlf: TlfId, nodes: Vec<PathNode>) -> Self {
        Self { tlf, nodes }
    }

    pub fn tail_pointer(&self) -> Option<&BlockPointer> {
        self.nodes.last().map(|n| &n.pointer)
    }

    /// Key version recorded for `block`: the pointer in this path carrying
    /// that id, else the tail pointer.
    pub fn key_version_for(&self, block: &BlockId) -> Option<KeyVersion> {
        self.nodes
            .iter()
            .rev()
            .find(|n| &n.pointer.id == block)
            .map(|n| &n.pointer)
            .or_else(|| self.tail_pointer())
            .map(|p| p.key_version)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tlf)?;
        for node in &self.nodes {
            write!(f, "/{}", node.name)?;
        }
        Ok(())
    }
}

/// Membership of a folder as recorded in its metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderHandle {
    pub writers: Vec<UserId>,
    #[serde(default)]
    pub readers: Vec<UserId>,
}

impl FolderHandle {
    pub fn new(writers: Vec<UserId>, readers: Vec<UserId>) -> Self {
        Self { writers, readers }
    }

    /// Human-readable folder name: `alice,bob` or `alice,bob#carol` when the
    /// folder has readers.
    pub fn to_display_string(&self) -> String {
        let join = |users: &[UserId]| {
            users
                .iter()
                .map(UserId::as_str)
                .collect::<Vec<_>>()
                .join(",")
        };
        let mut s = join(&self.writers);
        if !self.readers.is_empty() {
            s.push('#');
            s.push_str(&join(&self.readers));
        }
        s
    }

    /// Every writer and reader, deduplicated.
    pub fn members(&self) -> BTreeSet<UserId> {
        self.writers
            .iter()
            .chain(self.readers.iter())
            .cloned()
            .collect()
    }
}

impl fmt::Display for FolderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}
