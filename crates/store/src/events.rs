//! Event append, replay, and live fan-out.
//!
//! Appends are serialized per aggregate and flushed to disk before any
//! subscriber sees the event. Subscriber channels are bounded; a
//! subscriber whose buffer is full is disconnected rather than blocking
//! the writer — the transport reconnects through replay.

use std::io::Write;
use std::sync::atomic::Ordering;

use chrono::Utc;
use tokio::sync::mpsc;

use tether_domain::event::Event;
use tether_domain::{Error, Result};

use crate::store::Store;

/// Buffered events per subscriber before it is disconnected.
const SUBSCRIBER_BUFFER: usize = 256;

pub(crate) struct Subscriber {
    pub id: u64,
    pub tx: mpsc::Sender<Event>,
}

impl Store {
    /// Append one event to an aggregate's log and fan it out.
    ///
    /// The parent id is enforced onto the event; a mismatching parent
    /// already present on the event is an input error. `ts` is stamped
    /// when missing.
    pub async fn append_event(&self, parent_id: &str, mut event: Event) -> Result<Event> {
        if !self.aggregate_exists(parent_id) {
            return Err(Error::NotFound(format!("aggregate {parent_id}")));
        }

        if Self::is_run_id(parent_id) {
            if event.session_id.is_some()
                || event.run_id.as_deref().is_some_and(|id| id != parent_id)
            {
                return Err(Error::InvalidInput("event parent mismatch".into()));
            }
            event.run_id = Some(parent_id.to_string());
        } else {
            if event.run_id.is_some()
                || event
                    .session_id
                    .as_deref()
                    .is_some_and(|id| id != parent_id)
            {
                return Err(Error::InvalidInput("event parent mismatch".into()));
            }
            event.session_id = Some(parent_id.to_string());
        }
        if event.ts.is_none() {
            event.ts = Some(Utc::now());
        }

        let line = serde_json::to_string(&event)?;

        {
            let lock = self.aggregate_lock(parent_id);
            let _guard = lock.lock().await;

            let path = self.events_path(parent_id);
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            writeln!(file, "{line}")?;
            file.flush()?;
            file.sync_data()?;
        }

        self.fan_out(parent_id, &event);
        Ok(event)
    }

    /// Register a live subscriber. Returns the subscriber id (for
    /// `unsubscribe`) and the receiving end.
    pub fn subscribe(&self, parent_id: &str) -> (u64, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .entry(parent_id.to_string())
            .or_default()
            .push(Subscriber { id, tx });
        (id, rx)
    }

    pub fn unsubscribe(&self, parent_id: &str, subscriber_id: u64) {
        let mut subs = self.subscribers.lock();
        if let Some(list) = subs.get_mut(parent_id) {
            list.retain(|s| s.id != subscriber_id);
            if list.is_empty() {
                subs.remove(parent_id);
            }
        }
    }

    /// Replay events from disk. `max = 0` means unbounded; otherwise the
    /// first `max` events of the log are returned. Lines that fail to
    /// parse are skipped.
    pub fn read_events(&self, parent_id: &str, max: usize) -> Result<Vec<Event>> {
        if !self.aggregate_exists(parent_id) {
            return Err(Error::NotFound(format!("aggregate {parent_id}")));
        }
        let path = self.events_path(parent_id);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut events = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(line) {
                Ok(ev) => events.push(ev),
                Err(e) => {
                    tracing::warn!(parent_id, error = %e, "skipping corrupt event line");
                }
            }
            if max > 0 && events.len() >= max {
                break;
            }
        }
        Ok(events)
    }

    fn events_path(&self, parent_id: &str) -> std::path::PathBuf {
        if Self::is_run_id(parent_id) {
            self.run_dir(parent_id).join("events.ndjson")
        } else {
            self.session_dir(parent_id).join("events.ndjson")
        }
    }

    /// Deliver an event to live subscribers. Called with no store lock
    /// held; a full or closed channel drops its subscriber.
    fn fan_out(&self, parent_id: &str, event: &Event) {
        let mut subs = self.subscribers.lock();
        let Some(list) = subs.get_mut(parent_id) else {
            return;
        };
        list.retain(|sub| match sub.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    parent_id,
                    subscriber = sub.id,
                    "disconnecting slow event subscriber"
                );
                false
            }
        });
        if list.is_empty() {
            subs.remove(parent_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_domain::event::kind;
    use tether_domain::session::SessionMode;

    async fn store_with_session() -> (tempfile::TempDir, Store, String) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let session = store
            .create_session("/w", None, SessionMode::Chat, None)
            .await
            .unwrap();
        (dir, store, session.id)
    }

    #[tokio::test]
    async fn append_then_read_round_trips_in_order() {
        let (_dir, store, sid) = store_with_session().await;
        for i in 0..5 {
            store
                .append_event(
                    &sid,
                    Event::new(kind::MODEL_OUTPUT_DELTA)
                        .with_data("delta", serde_json::json!(format!("d{i}"))),
                )
                .await
                .unwrap();
        }

        let events = store.read_events(&sid, 0).unwrap();
        // session_created + 5 deltas
        assert_eq!(events.len(), 6);
        for (i, ev) in events[1..].iter().enumerate() {
            assert_eq!(ev.data_str("delta"), Some(format!("d{i}").as_str()));
        }
    }

    #[tokio::test]
    async fn first_event_is_created_with_matching_workspace() {
        let (_dir, store, sid) = store_with_session().await;
        let events = store.read_events(&sid, 0).unwrap();
        assert_eq!(events[0].kind, kind::SESSION_CREATED);
        assert_eq!(events[0].data_str("workspace"), Some("/w"));
    }

    #[tokio::test]
    async fn parent_id_is_enforced() {
        let (_dir, store, sid) = store_with_session().await;

        let ev = store
            .append_event(&sid, Event::new(kind::TURN_STARTED))
            .await
            .unwrap();
        assert_eq!(ev.session_id.as_deref(), Some(sid.as_str()));
        assert!(ev.run_id.is_none());

        let mut wrong = Event::new(kind::TURN_STARTED);
        wrong.session_id = Some("sess_other".into());
        assert!(matches!(
            store.append_event(&sid, wrong).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn unknown_aggregate_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        assert!(matches!(
            store
                .append_event("sess_ghost", Event::new(kind::TURN_STARTED))
                .await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            store.read_events("run_ghost", 0),
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn read_events_bounded() {
        let (_dir, store, sid) = store_with_session().await;
        for _ in 0..10 {
            store
                .append_event(&sid, Event::new(kind::MODEL_OUTPUT_DELTA))
                .await
                .unwrap();
        }
        assert_eq!(store.read_events(&sid, 3).unwrap().len(), 3);
        assert_eq!(store.read_events(&sid, 0).unwrap().len(), 11);
    }

    #[tokio::test]
    async fn corrupt_lines_are_skipped_on_replay() {
        let (dir, store, sid) = store_with_session().await;
        let path = dir
            .path()
            .join("sessions")
            .join(&sid)
            .join("events.ndjson");
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{broken json").unwrap();

        store
            .append_event(&sid, Event::new(kind::TURN_STARTED))
            .await
            .unwrap();
        let events = store.read_events(&sid, 0).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, kind::TURN_STARTED);
    }

    #[tokio::test]
    async fn subscriber_receives_live_events() {
        let (_dir, store, sid) = store_with_session().await;
        let (sub_id, mut rx) = store.subscribe(&sid);

        store
            .append_event(&sid, Event::new(kind::TURN_STARTED))
            .await
            .unwrap();
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, kind::TURN_STARTED);

        store.unsubscribe(&sid, sub_id);
        store
            .append_event(&sid, Event::new(kind::TURN_COMPLETED))
            .await
            .unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn slow_subscriber_is_disconnected_not_blocking() {
        let (_dir, store, sid) = store_with_session().await;
        let (_sub_id, mut rx) = store.subscribe(&sid);

        // Overflow the bounded buffer without draining.
        for _ in 0..(SUBSCRIBER_BUFFER + 10) {
            store
                .append_event(&sid, Event::new(kind::MODEL_OUTPUT_DELTA))
                .await
                .unwrap();
        }

        // The subscriber got a full buffer and was then dropped.
        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_BUFFER);
    }

    #[tokio::test]
    async fn ndjson_lines_are_minified() {
        let (dir, store, sid) = store_with_session().await;
        store
            .append_event(
                &sid,
                Event::new(kind::MESSAGE_ADDED).with_data("role", serde_json::json!("user")),
            )
            .await
            .unwrap();
        let path = dir
            .path()
            .join("sessions")
            .join(&sid)
            .join("events.ndjson");
        let content = std::fs::read_to_string(path).unwrap();
        for line in content.lines() {
            assert!(!line.contains("\n"));
            assert!(line.starts_with('{') && line.ends_with('}'));
        }
        assert!(content.ends_with('\n'));
    }
}
