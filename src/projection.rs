//! Pure folds from the append-only record log into current-state views.
//!
//! A projection has no independent identity: it exists only as the result of
//! folding the log, and is recomputed whenever new records may have arrived
//! (on load, and periodically via [`spawn_refresh`]). All conflict
//! resolution lives here — the store itself never resolves anything.

use std::time::Duration;

use tokio::sync::watch;

use crate::client::StoreClient;
use crate::error::StoreError;
use crate::record::StoreRecord;

/// A current-state view derived by folding matching records.
///
/// # Contract
///
/// - [`apply`](Projection::apply) must be deterministic: given the same
///   sequence of records, it must produce the same state.
/// - Records are applied in ascending `created_at` order (ties broken by
///   record ID), so "later" records win whatever conflict rule the
///   projection implements.
/// - Malformed payloads must be silently skipped inside `apply`; a bad
///   record is never fatal to the whole fold.
pub trait Projection: Default + Clone + Send + Sync + 'static {
    /// Human-readable name, used in logs.
    const NAME: &'static str;

    /// The record kind this projection folds.
    const RECORD_KIND: &'static str;

    /// Apply a single record from the log.
    fn apply(&mut self, record: &StoreRecord);
}

/// Fold a set of records into a projection state.
///
/// Records of other kinds are ignored, so a caller may pass a mixed query
/// result. Input order does not matter: records are sorted into ascending
/// `created_at` order (ties broken by record ID) before folding, making the
/// result independent of server or network ordering.
pub fn project<P: Projection>(records: &[StoreRecord]) -> P {
    let mut ordered: Vec<&StoreRecord> = records
        .iter()
        .filter(|r| r.record_kind == P::RECORD_KIND)
        .collect();
    ordered.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.record_id.cmp(&b.record_id))
    });

    let mut state = P::default();
    for record in ordered {
        state.apply(record);
    }
    state
}

/// Query the store and fold the result into a fresh projection state.
///
/// # Errors
///
/// Returns [`StoreError`] if the query fails. The fold itself cannot fail.
pub async fn load<P: Projection>(client: &StoreClient, namespace: &str) -> Result<P, StoreError> {
    let records = client.query(namespace, P::RECORD_KIND, None).await?;
    Ok(project(&records))
}

/// Handle to a background refresh loop for one projection.
///
/// The loop re-queries the store on a fixed interval and publishes each
/// re-folded state through a [`watch`] channel. Dropping the handle aborts
/// the loop; in-flight queries are read-only, so abandoning them has no
/// side effects.
#[derive(Debug)]
pub struct RefreshHandle<P> {
    rx: watch::Receiver<P>,
    task: tokio::task::JoinHandle<()>,
}

impl<P: Clone> RefreshHandle<P> {
    /// Returns a clone of the most recently folded state.
    pub fn latest(&self) -> P {
        self.rx.borrow().clone()
    }

    /// Returns a receiver that observes every published re-fold.
    pub fn subscribe(&self) -> watch::Receiver<P> {
        self.rx.clone()
    }
}

impl<P> Drop for RefreshHandle<P> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn a refresh loop that re-folds `P` every `interval`.
///
/// The first fold happens immediately. A failed query is logged and the
/// previously published state is retained — the view goes stale rather than
/// blank when the store is unreachable.
///
/// # Arguments
///
/// * `client` - Store client to query through.
/// * `namespace` - Namespace to fold.
/// * `interval` - Time between re-folds.
pub fn spawn_refresh<P: Projection>(
    client: StoreClient,
    namespace: String,
    interval: Duration,
) -> RefreshHandle<P> {
    let (tx, rx) = watch::channel(P::default());
    let task = tokio::spawn(async move {
        loop {
            match load::<P>(&client, &namespace).await {
                Ok(state) => {
                    // All receivers dropped: nobody is watching, stop polling.
                    if tx.send(state).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        projection = P::NAME,
                        error = %e,
                        "projection refresh failed, keeping previous state"
                    );
                }
            }
            tokio::time::sleep(interval).await;
        }
    });
    RefreshHandle { rx, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::now_ms;
    use uuid::Uuid;

    /// A test projection that counts records and remembers the last writer.
    #[derive(Debug, Clone, Default, PartialEq)]
    struct WriterTrail {
        count: u64,
        last_writer: Option<String>,
    }

    impl Projection for WriterTrail {
        const NAME: &'static str = "writer-trail";
        const RECORD_KIND: &'static str = "trail";

        fn apply(&mut self, record: &StoreRecord) {
            self.count += 1;
            self.last_writer = Some(record.writer_id.clone());
        }
    }

    fn make_record(kind: &str, writer: &str, created_at: i64) -> StoreRecord {
        StoreRecord {
            record_id: Uuid::new_v4(),
            namespace: "desk-1".to_string(),
            record_kind: kind.to_string(),
            writer_id: writer.to_string(),
            payload: serde_json::Value::Null,
            created_at,
        }
    }

    #[test]
    fn project_folds_in_ascending_created_at_order() {
        // Records arrive newest-first, the query contract's order.
        let records = vec![
            make_record("trail", "carol", 300),
            make_record("trail", "bob", 200),
            make_record("trail", "alice", 100),
        ];
        let state: WriterTrail = project(&records);
        assert_eq!(state.count, 3);
        assert_eq!(state.last_writer.as_deref(), Some("carol"));
    }

    #[test]
    fn project_ignores_other_record_kinds() {
        let records = vec![
            make_record("trail", "alice", 100),
            make_record("unrelated", "bob", 200),
        ];
        let state: WriterTrail = project(&records);
        assert_eq!(state.count, 1);
    }

    #[test]
    fn project_of_empty_log_is_default() {
        let state: WriterTrail = project(&[]);
        assert_eq!(state, WriterTrail::default());
    }

    #[test]
    fn project_is_order_independent() {
        let a = make_record("trail", "alice", 100);
        let b = make_record("trail", "bob", 200);
        let forward: WriterTrail = project(&[a.clone(), b.clone()]);
        let reversed: WriterTrail = project(&[b, a]);
        assert_eq!(forward, reversed);
    }

    #[test]
    fn equal_timestamps_fold_deterministically() {
        let now = now_ms();
        let a = make_record("trail", "alice", now);
        let b = make_record("trail", "bob", now);
        let forward: WriterTrail = project(&[a.clone(), b.clone()]);
        let reversed: WriterTrail = project(&[b, a]);
        // Tie broken by record ID, so both inputs agree on the winner.
        assert_eq!(forward.last_writer, reversed.last_writer);
    }

    #[tokio::test]
    async fn load_queries_and_folds() {
        let client = StoreClient::in_memory();
        client
            .append("desk-1", "trail", "alice", &serde_json::Value::Null)
            .await
            .expect("append should succeed");
        client
            .append("desk-1", "trail", "bob", &serde_json::Value::Null)
            .await
            .expect("append should succeed");

        let state: WriterTrail = load(&client, "desk-1").await.expect("load should succeed");
        assert_eq!(state.count, 2);
        assert_eq!(state.last_writer.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn refresh_loop_picks_up_new_records() {
        let client = StoreClient::in_memory();
        let handle: RefreshHandle<WriterTrail> =
            spawn_refresh(client.clone(), "desk-1".to_string(), Duration::from_millis(10));
        let mut rx = handle.subscribe();

        // First publish: empty log.
        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("first refresh should publish")
            .expect("refresh loop should be alive");
        assert_eq!(handle.latest().count, 0);

        client
            .append("desk-1", "trail", "alice", &serde_json::Value::Null)
            .await
            .expect("append should succeed");

        // Poll until the loop re-folds the new record.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while handle.latest().count == 0 {
            assert!(
                tokio::time::Instant::now() < deadline,
                "refresh loop never observed the append"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(handle.latest().last_writer.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn dropping_the_handle_aborts_the_loop() {
        let client = StoreClient::in_memory();
        let handle: RefreshHandle<WriterTrail> =
            spawn_refresh(client, "desk-1".to_string(), Duration::from_millis(10));
        let task = handle.task.abort_handle();
        drop(handle);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(task.is_finished());
    }
}
