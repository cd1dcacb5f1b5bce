//! Change events: one namespace mutation as observed at its origin filer.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::entry::Entry;
use crate::error::Result;
use crate::path::FullPath;
use crate::types::{StoreSignature, TsNs};

/// The mutation described by a change event.
///
/// `old_entry` and `new_entry` are named relative to the event's directory,
/// except that `new_entry` lives in `new_parent_path` when it is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventNotification {
    pub old_entry: Option<Entry>,
    pub new_entry: Option<Entry>,
    pub delete_chunks: bool,
    pub new_parent_path: Option<FullPath>,
    /// Signatures of every store that already applied this mutation.
    pub signatures: Vec<StoreSignature>,
}

/// The shape of a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Rename,
    Delete,
    /// Neither an old nor a new entry.
    Empty,
}

impl EventNotification {
    /// A notification for a newly created entry.
    pub fn create(entry: Entry) -> Self {
        Self {
            new_entry: Some(entry),
            ..Default::default()
        }
    }

    /// A notification replacing `old` with `new` in place.
    pub fn update(old: Entry, new: Entry) -> Self {
        Self {
            old_entry: Some(old),
            new_entry: Some(new),
            ..Default::default()
        }
    }

    /// A notification removing an entry.
    pub fn delete(entry: Entry, delete_chunks: bool) -> Self {
        Self {
            old_entry: Some(entry),
            delete_chunks,
            ..Default::default()
        }
    }

    /// A notification moving `old` to `new` under `new_parent`.
    pub fn rename(old: Entry, new: Entry, new_parent: FullPath) -> Self {
        Self {
            old_entry: Some(old),
            new_entry: Some(new),
            new_parent_path: Some(new_parent),
            ..Default::default()
        }
    }

    /// Record that a store has applied this mutation.
    pub fn with_signature(mut self, signature: StoreSignature) -> Self {
        if !self.signatures.contains(&signature) {
            self.signatures.push(signature);
        }
        self
    }

    /// Check if a store has already applied this mutation.
    pub fn is_signed_by(&self, signature: StoreSignature) -> bool {
        self.signatures.contains(&signature)
    }

    /// Check that every entry carries a usable name.
    pub fn validate(&self) -> Result<()> {
        for entry in self.old_entry.iter().chain(self.new_entry.iter()) {
            entry.validate_name()?;
        }
        Ok(())
    }

    /// Classify the mutation. `directory` is the directory of the event.
    pub fn kind(&self, directory: &FullPath) -> MutationKind {
        match (&self.old_entry, &self.new_entry) {
            (None, None) => MutationKind::Empty,
            (None, Some(_)) => MutationKind::Create,
            (Some(_), None) => MutationKind::Delete,
            (Some(old), Some(new)) => {
                let moved = self
                    .new_parent_path
                    .as_ref()
                    .is_some_and(|parent| parent != directory);
                if moved || old.name != new.name {
                    MutationKind::Rename
                } else {
                    MutationKind::Update
                }
            }
        }
    }
}

/// One mutation as observed at its origin.
///
/// The payload is the encoded [`EventNotification`]; it is kept opaque so a
/// subscriber can forward events without understanding them, and decoded
/// only when the event is replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Directory the mutation happened under; the routing key.
    pub directory: FullPath,
    pub payload: Bytes,
    pub ts_ns: TsNs,
}

impl ChangeEvent {
    /// Build an event by encoding a notification.
    pub fn new(directory: FullPath, notification: &EventNotification, ts_ns: TsNs) -> Result<Self> {
        Ok(Self {
            directory,
            payload: Bytes::from(codec::encode(notification)?),
            ts_ns,
        })
    }

    /// Build an event from an already-encoded payload.
    pub fn from_payload(directory: FullPath, payload: impl Into<Bytes>, ts_ns: TsNs) -> Self {
        Self {
            directory,
            payload: payload.into(),
            ts_ns,
        }
    }

    /// Decode the payload.
    pub fn notification(&self) -> Result<EventNotification> {
        codec::decode(&self.payload)
    }

    /// Encode the whole event, as stored in the aggregation buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        codec::encode(self)
    }

    /// Decode an event produced by [`ChangeEvent::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        codec::decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir(s: &str) -> FullPath {
        FullPath::parse(s).unwrap()
    }

    #[test]
    fn test_kind_classification() {
        let d = dir("/docs");
        let a = Entry::file("a.txt");
        let b = Entry::file("b.txt");

        assert_eq!(EventNotification::create(a.clone()).kind(&d), MutationKind::Create);
        assert_eq!(
            EventNotification::update(a.clone(), a.clone()).kind(&d),
            MutationKind::Update
        );
        assert_eq!(
            EventNotification::update(a.clone(), b.clone()).kind(&d),
            MutationKind::Rename
        );
        assert_eq!(
            EventNotification::rename(a.clone(), a.clone(), dir("/archive")).kind(&d),
            MutationKind::Rename
        );
        assert_eq!(
            EventNotification::rename(a.clone(), a.clone(), d.clone()).kind(&d),
            MutationKind::Update
        );
        assert_eq!(EventNotification::delete(a, true).kind(&d), MutationKind::Delete);
        assert_eq!(EventNotification::default().kind(&d), MutationKind::Empty);
    }

    #[test]
    fn test_signatures_deduplicated() {
        let n = EventNotification::create(Entry::file("x"))
            .with_signature(StoreSignature(7))
            .with_signature(StoreSignature(7))
            .with_signature(StoreSignature(9));

        assert_eq!(n.signatures, vec![StoreSignature(7), StoreSignature(9)]);
        assert!(n.is_signed_by(StoreSignature(9)));
        assert!(!n.is_signed_by(StoreSignature(1)));
    }

    #[test]
    fn test_validate_checks_both_entries() {
        let good = Entry::file("a.txt");
        assert!(EventNotification::update(good.clone(), good.clone()).validate().is_ok());
        assert!(EventNotification::default().validate().is_ok());
        assert!(EventNotification::create(Entry::file("x/y")).validate().is_err());
        assert!(EventNotification::delete(Entry::file(""), false).validate().is_err());
        assert!(EventNotification::update(good, Entry::file("..")).validate().is_err());
    }

    #[test]
    fn test_event_payload_decodes() {
        let n = EventNotification::create(Entry::directory("photos"));
        let event = ChangeEvent::new(dir("/buckets"), &n, TsNs(42)).unwrap();

        assert_eq!(event.notification().unwrap(), n);
        assert_eq!(ChangeEvent::from_bytes(&event.to_bytes().unwrap()).unwrap(), event);
    }

    #[test]
    fn test_opaque_payload_fails_only_on_decode() {
        let event = ChangeEvent::from_payload(dir("/"), &b"not cbor"[..], TsNs(1));
        assert!(event.notification().is_err());
        // The envelope itself still encodes.
        assert!(event.to_bytes().is_ok());
    }
}
