//! Test fixtures and helpers.
//!
//! Common setup code for unit and integration tests.

use std::sync::Once;

use filer_sync_core::{
    ChangeEvent, Entry, EventNotification, FileChunk, FullPath, StoreSignature, TsNs,
};

/// Produces change events with strictly increasing timestamps, the way one
/// filer stamps its local mutations.
pub struct EventFactory {
    next_ts: i64,
    step: i64,
    signatures: Vec<StoreSignature>,
}

impl EventFactory {
    /// Start stamping at `ts`, one nanosecond apart.
    pub fn starting_at(ts: i64) -> Self {
        Self {
            next_ts: ts,
            step: 1,
            signatures: Vec::new(),
        }
    }

    /// Start stamping at the current wall-clock time.
    pub fn now() -> Self {
        Self::starting_at(TsNs::now().as_nanos())
    }

    /// Put `step` nanoseconds between consecutive events.
    pub fn with_step(mut self, step: i64) -> Self {
        self.step = step.max(1);
        self
    }

    /// Mark every following event as already applied by `signature`.
    pub fn signed_by(mut self, signature: StoreSignature) -> Self {
        self.signatures.push(signature);
        self
    }

    /// The timestamp the next event will carry.
    pub fn peek_ts(&self) -> TsNs {
        TsNs(self.next_ts)
    }

    fn stamp(&mut self) -> TsNs {
        let ts = TsNs(self.next_ts);
        self.next_ts += self.step;
        ts
    }

    /// Wrap any notification into the next event under `dir`.
    pub fn event(&mut self, dir: &str, notification: EventNotification) -> ChangeEvent {
        let notification = self
            .signatures
            .iter()
            .fold(notification, |n, sig| n.with_signature(*sig));
        let ts = self.stamp();
        ChangeEvent::new(path(dir), &notification, ts).expect("notification encodes")
    }

    /// A file created under `dir`.
    pub fn create(&mut self, dir: &str, name: &str) -> ChangeEvent {
        self.event(dir, EventNotification::create(file_entry(name, 0)))
    }

    /// A directory created under `dir`.
    pub fn mkdir(&mut self, dir: &str, name: &str) -> ChangeEvent {
        self.event(dir, EventNotification::create(Entry::directory(name)))
    }

    /// A file under `dir` rewritten to `size` bytes.
    pub fn update(&mut self, dir: &str, name: &str, size: u64) -> ChangeEvent {
        self.event(
            dir,
            EventNotification::update(file_entry(name, 0), file_entry(name, size)),
        )
    }

    /// A file removed from `dir`.
    pub fn delete(&mut self, dir: &str, name: &str) -> ChangeEvent {
        self.event(dir, EventNotification::delete(file_entry(name, 0), true))
    }

    /// A file moved from `dir/name` to `new_dir/new_name`.
    pub fn rename(&mut self, dir: &str, name: &str, new_dir: &str, new_name: &str) -> ChangeEvent {
        self.event(
            dir,
            EventNotification::rename(
                file_entry(name, 0),
                file_entry(new_name, 0),
                path(new_dir),
            ),
        )
    }

    /// An event whose payload is not a valid notification.
    pub fn garbage(&mut self, dir: &str) -> ChangeEvent {
        let ts = self.stamp();
        ChangeEvent::from_payload(path(dir), &b"\xff\xfe not a notification"[..], ts)
    }
}

/// A regular file entry with one chunk covering `size` bytes.
pub fn file_entry(name: &str, size: u64) -> Entry {
    let mut entry = Entry::file(name);
    entry.attributes.file_size = size;
    entry.attributes.mime = "application/octet-stream".into();
    if size > 0 {
        entry.chunks.push(FileChunk {
            file_id: format!("3,{:x}", size),
            offset: 0,
            size,
            modified_ts_ns: 1,
        });
    }
    entry
}

fn path(s: &str) -> FullPath {
    FullPath::parse(s).expect("fixture paths are absolute")
}

/// Install a fmt subscriber writing through the test harness. Honors
/// `RUST_LOG`; safe to call from every test.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use filer_sync_core::MutationKind;

    #[test]
    fn test_timestamps_strictly_increase() {
        let mut events = EventFactory::starting_at(100).with_step(5);
        let a = events.create("/d", "a");
        let b = events.update("/d", "a", 10);
        let c = events.delete("/d", "a");

        assert_eq!(a.ts_ns, TsNs(100));
        assert_eq!(b.ts_ns, TsNs(105));
        assert_eq!(c.ts_ns, TsNs(110));
        assert_eq!(events.peek_ts(), TsNs(115));
    }

    #[test]
    fn test_event_kinds() {
        let mut events = EventFactory::starting_at(1);
        let dir = path("/d");

        let kinds: Vec<_> = [
            events.create("/d", "a"),
            events.update("/d", "a", 3),
            events.rename("/d", "a", "/e", "b"),
            events.delete("/d", "a"),
        ]
        .iter()
        .map(|e| e.notification().unwrap().kind(&dir))
        .collect();

        assert_eq!(
            kinds,
            vec![
                MutationKind::Create,
                MutationKind::Update,
                MutationKind::Rename,
                MutationKind::Delete
            ]
        );
    }

    #[test]
    fn test_signed_events() {
        let mut events = EventFactory::starting_at(1).signed_by(StoreSignature(9));
        let n = events.create("/d", "a").notification().unwrap();
        assert!(n.is_signed_by(StoreSignature(9)));
    }

    #[test]
    fn test_garbage_does_not_decode() {
        let mut events = EventFactory::starting_at(1);
        assert!(events.garbage("/d").notification().is_err());
    }
}
