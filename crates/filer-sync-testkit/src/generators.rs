//! Proptest generators for property-based testing.

use proptest::prelude::*;

use filer_sync_core::{Attributes, Entry, EventNotification, FileChunk, FullPath};

/// Generate an entry name.
pub fn entry_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9._-]{0,11}".prop_map(String::from)
}

/// Generate a directory one to three levels deep.
pub fn directory() -> impl Strategy<Value = FullPath> {
    prop::collection::vec("[a-c]", 1..=3).prop_map(|parts| {
        parts
            .iter()
            .fold(FullPath::root(), |dir, part| dir.child(part))
    })
}

/// Generate a file chunk.
pub fn chunk() -> impl Strategy<Value = FileChunk> {
    (1u32..1000, 0i64..1 << 30, 1u64..1 << 22, 0i64..i64::MAX / 2).prop_map(
        |(volume, offset, size, ts)| FileChunk {
            file_id: format!("{},{:x}", volume, offset),
            offset,
            size,
            modified_ts_ns: ts,
        },
    )
}

/// Generate a file or directory entry named `name`.
pub fn entry_named(name: String) -> impl Strategy<Value = Entry> {
    (
        any::<bool>(),
        0i64..2_000_000_000,
        0u32..0o7777,
        prop::collection::vec(chunk(), 0..3),
    )
        .prop_map(move |(is_directory, mtime, mode, chunks)| Entry {
            name: name.clone(),
            is_directory,
            attributes: Attributes {
                mtime,
                crtime: mtime,
                mode,
                file_size: chunks.iter().map(|c| c.size).sum(),
                ..Default::default()
            },
            chunks: if is_directory { Vec::new() } else { chunks },
            extended: Default::default(),
        })
}

/// Generate an entry with a random name.
pub fn entry() -> impl Strategy<Value = Entry> {
    entry_name().prop_flat_map(entry_named)
}

/// One mutation at one directory, before it is stamped into an event.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub directory: FullPath,
    pub notification: EventNotification,
}

/// Generate a create, update, delete or rename.
pub fn mutation() -> impl Strategy<Value = Mutation> {
    let create = (directory(), entry()).prop_map(|(directory, e)| Mutation {
        directory,
        notification: EventNotification::create(e),
    });
    let update = (directory(), entry()).prop_map(|(directory, e)| Mutation {
        directory,
        notification: EventNotification::update(e.clone(), e),
    });
    let delete = (directory(), entry(), any::<bool>()).prop_map(|(directory, e, chunks)| {
        Mutation {
            directory,
            notification: EventNotification::delete(e, chunks),
        }
    });
    let rename = (directory(), entry(), entry(), directory()).prop_map(
        |(directory, old, new, new_parent)| Mutation {
            directory,
            notification: EventNotification::rename(old, new, new_parent),
        },
    );

    prop_oneof![create, update, delete, rename]
}

/// Generate up to `max_len` mutations.
pub fn mutation_sequence(max_len: usize) -> impl Strategy<Value = Vec<Mutation>> {
    prop::collection::vec(mutation(), 0..=max_len)
}
