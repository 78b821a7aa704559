//! Thin, typed wrapper around the tonic-generated `RecordStoreClient`.
//!
//! Provides ergonomic async methods ([`StoreClient::append`] and
//! [`StoreClient::query`]) that accept and return Rust-native types so that
//! the projection and workflow modules never import tonic internals
//! directly. There is deliberately no update or delete method: all mutation
//! is forward-only appends, which makes the store trivially safe for
//! concurrent writers and pushes conflict resolution into the projections.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use tonic::transport::Channel;
use uuid::Uuid;

use crate::auth::{SessionCell, SessionInterceptor};
use crate::error::StoreError;
use crate::proto;
use crate::proto::record_store_client::RecordStoreClient;
use crate::record::{StoreRecord, decode_record, now_ms};

/// Plain (unauthenticated) gRPC client type alias.
type PlainClient = RecordStoreClient<Channel>;

/// Authenticated gRPC client with the session Bearer interceptor.
type AuthClient =
    RecordStoreClient<tonic::service::interceptor::InterceptedService<Channel, SessionInterceptor>>;

/// Internal transport enum supporting plain, authenticated, and in-process
/// channels.
enum StoreClientInner {
    /// Unauthenticated gRPC channel.
    Plain(PlainClient),
    /// gRPC channel with a [`SessionInterceptor`] injecting the current
    /// session as an `Authorization` header.
    Auth(AuthClient),
    /// In-process row table. Backs tests and standalone (offline) shells.
    Memory(MemoryStore),
}

/// In-process implementation of the record store row table.
///
/// Rows are held as proto [`Record`](proto::Record) values so the decode
/// path is identical to the network transport. Insert-only, like the real
/// backend.
#[derive(Default)]
struct MemoryStore {
    rows: std::sync::Mutex<Vec<proto::Record>>,
}

impl MemoryStore {
    fn append(&self, request: proto::AppendRequest) {
        let row = proto::Record {
            record_id: request.record_id,
            namespace: request.namespace,
            record_kind: request.record_kind,
            writer_id: request.writer_id,
            payload: request.payload,
            created_at_ms: request.created_at_ms,
        };
        self.rows.lock().expect("memory store poisoned").push(row);
    }

    fn query(&self, request: &proto::QueryRequest) -> Vec<proto::Record> {
        self.rows
            .lock()
            .expect("memory store poisoned")
            .iter()
            .filter(|row| {
                row.namespace == request.namespace
                    && row.record_kind == request.record_kind
                    && (request.writer_id.is_empty() || row.writer_id == request.writer_id)
            })
            .cloned()
            .collect()
    }
}

/// Typed client for the collaborative record store.
///
/// Wraps the tonic-generated [`RecordStoreClient`] and exposes the two
/// operations the store supports: [`append`](Self::append) and
/// [`query`](Self::query). Clone is cheap because the inner transport is
/// wrapped in an [`Arc`]; clones of an in-memory client share the same row
/// table, which is how tests simulate multiple concurrent writers.
#[derive(Clone)]
pub struct StoreClient {
    inner: Arc<StoreClientInner>,
    /// Latest `created_at` stamped by this client instance.
    ///
    /// `created_at` is writer-supplied; each writer's own stamps are kept
    /// strictly increasing so same-writer ordering never falls to the
    /// random record-ID tiebreak. Shared across clones so a cloned client
    /// cannot travel back in time relative to its sibling.
    last_stamp: Arc<AtomicI64>,
}

impl fmt::Debug for StoreClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variant = match *self.inner {
            StoreClientInner::Plain(_) => "Plain",
            StoreClientInner::Auth(_) => "Auth",
            StoreClientInner::Memory(_) => "Memory",
        };
        f.debug_struct("StoreClient")
            .field("transport", &variant)
            .finish()
    }
}

impl StoreClient {
    /// Connect to a record store gRPC server at the given endpoint.
    ///
    /// Creates an unauthenticated (plain) connection. For connections that
    /// carry the shell's session, use
    /// [`connect_with_session`](Self::connect_with_session).
    ///
    /// # Arguments
    ///
    /// * `endpoint` - The URI of the gRPC server (e.g., `"http://127.0.0.1:7151"`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Transport`] if the channel cannot be established.
    pub async fn connect(endpoint: &str) -> Result<Self, StoreError> {
        let client = RecordStoreClient::connect(endpoint.to_string()).await?;
        Ok(Self::from_variant(StoreClientInner::Plain(client)))
    }

    /// Connect to a record store gRPC server, authenticating every RPC with
    /// the shell's current session.
    ///
    /// The session is read from the [`SessionCell`] on every outgoing RPC,
    /// so sign-in and sign-out take effect on the next call without
    /// rebuilding the channel.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - The URI of the gRPC server.
    /// * `session` - The shell's authoritative session cell.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Transport`] if the channel cannot be established.
    pub async fn connect_with_session(
        endpoint: &str,
        session: SessionCell,
    ) -> Result<Self, StoreError> {
        let channel = tonic::transport::Endpoint::from_shared(endpoint.to_string())?
            .connect()
            .await?;
        let interceptor = SessionInterceptor { session };
        let client = RecordStoreClient::with_interceptor(channel, interceptor);
        Ok(Self::from_variant(StoreClientInner::Auth(client)))
    }

    /// Create a client backed by an in-process row table.
    ///
    /// Clones of the returned client share the same rows, which lets tests
    /// and offline shells exercise the full append/query/projection path
    /// without a server.
    pub fn in_memory() -> Self {
        Self::from_variant(StoreClientInner::Memory(MemoryStore::default()))
    }

    fn from_variant(inner: StoreClientInner) -> Self {
        Self {
            inner: Arc::new(inner),
            last_stamp: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Construct a `StoreClient` from a pre-built [`RecordStoreClient`].
    ///
    /// Used in tests to create clients with lazy channels.
    #[cfg(test)]
    pub(crate) fn from_inner(inner: PlainClient) -> Self {
        Self::from_variant(StoreClientInner::Plain(inner))
    }

    /// Stamp a `created_at` value: wall clock time, bumped past the
    /// previous stamp so two appends by this client (or its clones) never
    /// tie.
    ///
    /// A tie between a client's own records would leave their relative
    /// order to the record-ID tiebreak, which is random — the writer's own
    /// later append could then sort behind its earlier one. Strictly
    /// increasing stamps keep same-writer ordering deterministic;
    /// cross-writer ties remain undefined, as the protocol allows.
    fn stamp(&self) -> i64 {
        let now = now_ms();
        match self
            .last_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                Some(now.max(prev + 1))
            }) {
            Ok(prev) | Err(prev) => now.max(prev + 1),
        }
    }

    /// Append one record. Atomic: the record is fully written or not at all.
    ///
    /// This is a single best-effort attempt. Failures are surfaced to the
    /// caller and never retried automatically — a failed append is a failed
    /// user action.
    ///
    /// # Arguments
    ///
    /// * `namespace` - Namespace the record belongs to.
    /// * `record_kind` - Record kind tag (e.g. `desktop_state`).
    /// * `writer_id` - Identity of the writer, usually the session handle.
    /// * `payload` - JSON payload; serialized to bytes for the wire.
    ///
    /// # Returns
    ///
    /// The client-assigned record ID of the appended record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on transport or server failure,
    /// or [`StoreError::Encode`] if the payload cannot be serialized.
    pub async fn append(
        &self,
        namespace: &str,
        record_kind: &str,
        writer_id: &str,
        payload: &serde_json::Value,
    ) -> Result<Uuid, StoreError> {
        let record_id = Uuid::new_v4();
        let request = proto::AppendRequest {
            namespace: namespace.to_string(),
            record_kind: record_kind.to_string(),
            writer_id: writer_id.to_string(),
            payload: serde_json::to_vec(payload)?,
            record_id: record_id.to_string(),
            created_at_ms: self.stamp(),
        };

        tracing::debug!(namespace, record_kind, writer_id, %record_id, "appending record");

        // Clone the inner tonic client for each RPC call. This is cheap
        // because RecordStoreClient wraps the channel, an Arc'd hyper
        // connection pool.
        match self.inner.as_ref() {
            StoreClientInner::Plain(c) => {
                c.clone().append(request).await?;
            }
            StoreClientInner::Auth(c) => {
                c.clone().append(request).await?;
            }
            StoreClientInner::Memory(m) => m.append(request),
        }
        Ok(record_id)
    }

    /// Query all records matching `(namespace, record_kind)`, optionally
    /// restricted to a single writer.
    ///
    /// Returns records ordered by `created_at` **descending** (most recent
    /// first). The server's ordering is not trusted; the client re-sorts.
    /// Rows that fail to decode are skipped with a debug log — a malformed
    /// record is never fatal to a query. No deduplication or projection
    /// happens here; that is the projection layer's job.
    ///
    /// # Arguments
    ///
    /// * `namespace` - Namespace to query.
    /// * `record_kind` - Record kind to query.
    /// * `writer_id` - When `Some`, only records from this writer.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on transport or server failure.
    pub async fn query(
        &self,
        namespace: &str,
        record_kind: &str,
        writer_id: Option<&str>,
    ) -> Result<Vec<StoreRecord>, StoreError> {
        let request = proto::QueryRequest {
            namespace: namespace.to_string(),
            record_kind: record_kind.to_string(),
            writer_id: writer_id.unwrap_or_default().to_string(),
        };

        let rows = match self.inner.as_ref() {
            StoreClientInner::Plain(c) => c.clone().query(request).await?.into_inner().records,
            StoreClientInner::Auth(c) => c.clone().query(request).await?.into_inner().records,
            StoreClientInner::Memory(m) => m.query(&request),
        };

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            match decode_record(row) {
                Some(record) => records.push(record),
                None => {
                    tracing::debug!(record_id = %row.record_id, "skipping malformed record");
                }
            }
        }

        // Most recent first; record ID breaks ties deterministically.
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.record_id.cmp(&a.record_id))
        });
        Ok(records)
    }

    /// Insert a raw proto row directly into an in-memory store.
    ///
    /// Lets tests exercise the malformed-record path, which cannot be
    /// reached through [`append`](Self::append).
    #[cfg(test)]
    pub(crate) fn push_raw_row(&self, row: proto::Record) {
        match self.inner.as_ref() {
            StoreClientInner::Memory(m) => {
                m.rows.lock().expect("memory store poisoned").push(row);
            }
            _ => panic!("push_raw_row requires an in-memory client"),
        }
    }
}
