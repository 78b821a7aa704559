//! The authoritative session and the interceptor that injects it into RPCs.
//!
//! Exactly one [`SessionCell`] exists per shell process. Embedded frames
//! never touch it directly — they hold a derived cache synchronized over the
//! broadcast channel (see [`frame`](crate::frame)). This replaces the
//! duplicated per-component session globals the shell grew out of.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::record::now_ms;

/// A signed-in identity.
///
/// `None` at the `Option<Session>` level means unauthenticated. Frames hold
/// copies of this value that must be treated as possibly stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// User handle, also used as the writer ID for store appends.
    pub handle: String,
    /// When the session was established, unix milliseconds.
    pub authenticated_at: i64,
}

/// Shared, process-wide cell holding the single authoritative session.
///
/// Clone is cheap (the inner state is `Arc`-wrapped) and all clones observe
/// the same value. The cell itself carries no notification mechanism; the
/// shell broadcasts `AuthState` to frames whenever it mutates the cell.
///
/// # Panics
///
/// All accessors panic if the inner [`RwLock`] is poisoned (a writer
/// panicked while holding the lock). This is treated as an invariant
/// violation.
#[derive(Debug, Clone, Default)]
pub struct SessionCell {
    inner: Arc<RwLock<Option<Session>>>,
}

impl SessionCell {
    /// Create an empty (unauthenticated) cell.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a clone of the current session, or `None` if signed out.
    pub fn current(&self) -> Option<Session> {
        self.inner.read().expect("session cell poisoned").clone()
    }

    /// Returns `true` if a session is present.
    pub fn is_authenticated(&self) -> bool {
        self.inner.read().expect("session cell poisoned").is_some()
    }

    /// Replace the session with a fresh sign-in for `handle`.
    ///
    /// Stamps `authenticated_at` from the local clock. The caller is
    /// responsible for broadcasting the change to open frames.
    ///
    /// # Returns
    ///
    /// The newly stored session.
    pub fn sign_in(&self, handle: impl Into<String>) -> Session {
        let session = Session {
            handle: handle.into(),
            authenticated_at: now_ms(),
        };
        *self.inner.write().expect("session cell poisoned") = Some(session.clone());
        session
    }

    /// Clear the session.
    ///
    /// # Returns
    ///
    /// The session that was signed out, if any.
    pub fn sign_out(&self) -> Option<Session> {
        self.inner.write().expect("session cell poisoned").take()
    }
}

/// gRPC interceptor that injects the current session as a Bearer token.
///
/// The session is read from the [`SessionCell`] on every intercepted request
/// using a synchronous read lock, because tonic interceptors are called
/// synchronously. A sign-in or sign-out is therefore visible on the next
/// outgoing RPC without rebuilding the channel. When unauthenticated, no
/// `authorization` header is added.
#[derive(Clone)]
pub(crate) struct SessionInterceptor {
    /// The shell's authoritative session cell.
    pub(crate) session: SessionCell,
}

impl tonic::service::Interceptor for SessionInterceptor {
    fn call(&mut self, mut req: tonic::Request<()>) -> Result<tonic::Request<()>, tonic::Status> {
        if let Some(session) = self.session.current() {
            let value = format!("Bearer {}", session.handle)
                .parse::<tonic::metadata::MetadataValue<_>>()
                .map_err(|_| tonic::Status::internal("session handle has invalid characters"))?;
            req.metadata_mut().insert("authorization", value);
        }
        Ok(req)
    }
}
