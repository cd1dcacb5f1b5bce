//! Namespace entries: files and directories with their chunk pointers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::codec;
use crate::error::{CoreError, Result};

/// POSIX-like attributes of an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    /// Modification time, Unix seconds.
    pub mtime: i64,
    /// Creation time, Unix seconds.
    pub crtime: i64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub mime: String,
    pub file_size: u64,
    /// Time to live in seconds; 0 = forever.
    pub ttl_sec: i32,
    /// Non-empty for symlinks.
    pub symlink_target: String,
}

/// A pointer to one piece of file content held by the volume layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunk {
    pub file_id: String,
    pub offset: i64,
    pub size: u64,
    pub modified_ts_ns: i64,
}

/// A file or directory in the namespace.
///
/// The entry carries only its own name; its location is the directory it is
/// stored under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub name: String,
    pub is_directory: bool,
    pub attributes: Attributes,
    pub chunks: Vec<FileChunk>,
    pub extended: BTreeMap<String, Vec<u8>>,
}

/// The stored part of an entry (everything except the name, which is the key).
#[derive(Serialize, Deserialize)]
struct EntryMeta<'a> {
    is_directory: bool,
    attributes: std::borrow::Cow<'a, Attributes>,
    chunks: std::borrow::Cow<'a, [FileChunk]>,
    extended: std::borrow::Cow<'a, BTreeMap<String, Vec<u8>>>,
}

impl Entry {
    /// Create an empty file entry.
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Create an empty directory entry.
    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_directory: true,
            attributes: Attributes {
                mode: 0o40755,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Check that the name is a single path component.
    pub fn validate_name(&self) -> Result<()> {
        let name = self.name.as_str();
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(CoreError::InvalidName(self.name.clone()));
        }
        Ok(())
    }

    /// Total size covered by the chunks.
    pub fn content_size(&self) -> u64 {
        self.chunks
            .iter()
            .map(|c| c.offset.max(0) as u64 + c.size)
            .max()
            .unwrap_or(0)
    }

    /// Encode everything but the name, the value a store keeps under the
    /// entry's full path.
    pub fn encode_attributes_and_chunks(&self) -> Result<Vec<u8>> {
        codec::encode(&EntryMeta {
            is_directory: self.is_directory,
            attributes: std::borrow::Cow::Borrowed(&self.attributes),
            chunks: std::borrow::Cow::Borrowed(&self.chunks),
            extended: std::borrow::Cow::Borrowed(&self.extended),
        })
    }

    /// Rebuild an entry from its name and the bytes produced by
    /// [`Entry::encode_attributes_and_chunks`].
    pub fn decode_attributes_and_chunks(name: impl Into<String>, bytes: &[u8]) -> Result<Self> {
        let meta: EntryMeta<'static> = codec::decode(bytes)?;
        Ok(Self {
            name: name.into(),
            is_directory: meta.is_directory,
            attributes: meta.attributes.into_owned(),
            chunks: meta.chunks.into_owned(),
            extended: meta.extended.into_owned(),
        })
    }
}
