//! The auth broadcast channel between the shell and its embedded frames.
//!
//! The shell and each frame are independent execution contexts that interact
//! only through these typed messages — neither side ever holds a reference
//! to the other's internals. Two message kinds exist: a frame asks for the
//! session with [`FrameToShell::RequestAuth`], and the shell answers (and
//! later pushes unsolicited updates) with [`ShellToFrame::AuthState`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth::{Session, SessionCell};

/// Per-frame channel depth. Auth traffic is a handful of messages over a
/// frame's lifetime, so a small buffer suffices.
pub(crate) const FRAME_CHANNEL_DEPTH: usize = 8;

/// Messages sent from an embedded frame to the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameToShell {
    /// Sent once on frame load to request the current session.
    RequestAuth {
        /// The requesting frame.
        frame_id: Uuid,
    },
}

/// Messages sent from the shell to an embedded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellToFrame {
    /// The shell's current session, `None` when signed out.
    ///
    /// Sent in reply to `RequestAuth` and, unsolicited, to every open frame
    /// whenever the shell's session changes. Applying the same message
    /// twice is a no-op on the frame side.
    AuthState {
        /// Identifies the sending shell instance. A frame only trusts
        /// messages carrying the token it was given at spawn.
        shell_token: Uuid,
        /// Current session value.
        session: Option<Session>,
    },
}

/// Shell-side registry of open frames and the fan-out over them.
///
/// Owns one [`mpsc::Sender`] per frame. The shell broadcasts `AuthState` to
/// *all* registered frames on every session change — frames are not
/// required to re-request. A frame whose receiving end is gone is dropped
/// from the registry on the next send.
#[derive(Debug)]
pub struct AuthBroadcaster {
    /// This shell instance's identity token, minted once at construction.
    shell_token: Uuid,
    frames: HashMap<Uuid, mpsc::Sender<ShellToFrame>>,
}

impl AuthBroadcaster {
    /// Create a broadcaster with a fresh shell token and no frames.
    pub fn new() -> Self {
        Self {
            shell_token: Uuid::new_v4(),
            frames: HashMap::new(),
        }
    }

    /// The token frames must see on every `AuthState` they accept.
    pub fn shell_token(&self) -> Uuid {
        self.shell_token
    }

    /// Number of currently registered frames.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Register a frame's sender. Called when a window opens.
    pub fn register(&mut self, frame_id: Uuid, tx: mpsc::Sender<ShellToFrame>) {
        self.frames.insert(frame_id, tx);
    }

    /// Remove a frame. Called when a window closes.
    ///
    /// # Returns
    ///
    /// `true` if the frame was registered.
    pub fn deregister(&mut self, frame_id: Uuid) -> bool {
        self.frames.remove(&frame_id).is_some()
    }

    /// Push the given session to every registered frame.
    ///
    /// Frames whose channel is closed (the frame task exited) are dropped
    /// from the registry; a broadcast never fails as a whole.
    pub async fn broadcast(&mut self, session: &Option<Session>) {
        let mut gone = Vec::new();
        for (frame_id, tx) in &self.frames {
            let msg = ShellToFrame::AuthState {
                shell_token: self.shell_token,
                session: session.clone(),
            };
            if tx.send(msg).await.is_err() {
                gone.push(*frame_id);
            }
        }
        for frame_id in gone {
            tracing::debug!(%frame_id, "dropping disconnected frame from broadcaster");
            self.frames.remove(&frame_id);
        }
    }

    /// Answer a single frame's `RequestAuth` with the given session.
    ///
    /// # Returns
    ///
    /// `false` if the frame is unknown or its channel is closed.
    pub async fn answer(&mut self, frame_id: Uuid, session: &Option<Session>) -> bool {
        let Some(tx) = self.frames.get(&frame_id) else {
            return false;
        };
        let msg = ShellToFrame::AuthState {
            shell_token: self.shell_token,
            session: session.clone(),
        };
        if tx.send(msg).await.is_err() {
            self.frames.remove(&frame_id);
            return false;
        }
        true
    }
}

impl Default for AuthBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Shell-side responder loop: answers `RequestAuth` messages with the
/// current session until all frame senders are dropped.
///
/// Runs as a background task owned by the shell. The session is re-read
/// from the [`SessionCell`] per request, so a frame that asks after a
/// sign-in sees the new session even if it missed the broadcast.
pub(crate) async fn run_auth_responder(
    mut rx: mpsc::Receiver<FrameToShell>,
    broadcaster: Arc<tokio::sync::Mutex<AuthBroadcaster>>,
    session: SessionCell,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            FrameToShell::RequestAuth { frame_id } => {
                let current = session.current();
                let answered = broadcaster.lock().await.answer(frame_id, &current).await;
                if !answered {
                    tracing::debug!(%frame_id, "auth request from unknown or closed frame");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(handle: &str) -> Option<Session> {
        Some(Session {
            handle: handle.to_string(),
            authenticated_at: 1_700_000_000_000,
        })
    }

    #[tokio::test]
    async fn broadcast_reaches_every_registered_frame() {
        let mut broadcaster = AuthBroadcaster::new();
        let (tx_a, mut rx_a) = mpsc::channel(FRAME_CHANNEL_DEPTH);
        let (tx_b, mut rx_b) = mpsc::channel(FRAME_CHANNEL_DEPTH);
        broadcaster.register(Uuid::new_v4(), tx_a);
        broadcaster.register(Uuid::new_v4(), tx_b);

        broadcaster.broadcast(&session("alice")).await;

        for rx in [&mut rx_a, &mut rx_b] {
            let msg = rx.recv().await.expect("frame should receive a broadcast");
            let ShellToFrame::AuthState { shell_token, session } = msg;
            assert_eq!(shell_token, broadcaster.shell_token());
            assert_eq!(session.map(|s| s.handle), Some("alice".to_string()));
        }
    }

    #[tokio::test]
    async fn broadcast_drops_disconnected_frames() {
        let mut broadcaster = AuthBroadcaster::new();
        let (tx_dead, rx_dead) = mpsc::channel(FRAME_CHANNEL_DEPTH);
        let (tx_live, mut rx_live) = mpsc::channel(FRAME_CHANNEL_DEPTH);
        broadcaster.register(Uuid::new_v4(), tx_dead);
        broadcaster.register(Uuid::new_v4(), tx_live);
        drop(rx_dead);

        broadcaster.broadcast(&None).await;
        assert_eq!(broadcaster.frame_count(), 1);
        assert!(rx_live.recv().await.is_some());
    }

    #[tokio::test]
    async fn answer_targets_one_frame() {
        let mut broadcaster = AuthBroadcaster::new();
        let frame_a = Uuid::new_v4();
        let (tx_a, mut rx_a) = mpsc::channel(FRAME_CHANNEL_DEPTH);
        let (tx_b, mut rx_b) = mpsc::channel(FRAME_CHANNEL_DEPTH);
        broadcaster.register(frame_a, tx_a);
        broadcaster.register(Uuid::new_v4(), tx_b);

        assert!(broadcaster.answer(frame_a, &session("alice")).await);

        assert!(rx_a.recv().await.is_some());
        assert!(
            rx_b.try_recv().is_err(),
            "answer must not fan out to other frames"
        );
    }

    #[tokio::test]
    async fn answer_to_unknown_frame_returns_false() {
        let mut broadcaster = AuthBroadcaster::new();
        assert!(!broadcaster.answer(Uuid::new_v4(), &None).await);
    }

    #[tokio::test]
    async fn deregister_removes_the_frame() {
        let mut broadcaster = AuthBroadcaster::new();
        let frame_id = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);
        broadcaster.register(frame_id, tx);
        assert!(broadcaster.deregister(frame_id));
        assert!(!broadcaster.deregister(frame_id));
        assert_eq!(broadcaster.frame_count(), 0);
    }

    #[tokio::test]
    async fn responder_answers_requests_with_current_session() {
        let broadcaster = Arc::new(tokio::sync::Mutex::new(AuthBroadcaster::new()));
        let cell = SessionCell::new();
        cell.sign_in("alice");

        let frame_id = Uuid::new_v4();
        let (frame_tx, mut frame_rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);
        broadcaster.lock().await.register(frame_id, frame_tx);

        let (shell_tx, shell_rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);
        let responder = tokio::spawn(run_auth_responder(
            shell_rx,
            Arc::clone(&broadcaster),
            cell.clone(),
        ));

        shell_tx
            .send(FrameToShell::RequestAuth { frame_id })
            .await
            .expect("send should succeed");

        let msg = frame_rx.recv().await.expect("frame should get an answer");
        let ShellToFrame::AuthState { session, .. } = msg;
        assert_eq!(session.map(|s| s.handle), Some("alice".to_string()));

        drop(shell_tx);
        responder.await.expect("responder should exit cleanly");
    }
}
