//! Frame-side half of the auth broadcast channel.
//!
//! Each embedded frame runs a small actor that drives the auth state
//! machine: request the session on load, wait a bounded time for the
//! shell's answer, fall back to a frame-local persistent cache when no
//! answer arrives, and keep applying unsolicited updates for the lifetime
//! of the frame. The frame never blocks its UI waiting for the shell: the
//! wait is bounded and the cache (or "unauthenticated") always gives it
//! something to render with.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::auth::Session;
use crate::channel::{FrameToShell, ShellToFrame};

/// File name of the frame-local session cache inside the cache dir.
const CACHE_FILE: &str = "session.json";

/// Auth synchronization state of one frame.
///
/// The machine has no terminal state; it runs for the lifetime of the
/// frame. A frame that timed out stays in `AwaitingResponse` serving its
/// cached session, and still moves to `Synced` if an answer arrives late.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAuthState {
    /// Frame loaded, no request sent yet.
    Uninitialized,
    /// `RequestAuth` sent, no `AuthState` received yet.
    AwaitingResponse,
    /// At least one `AuthState` received and applied.
    Synced,
}

/// Save the cached session atomically.
///
/// Writes to a temporary file then renames to `session.json` in `dir`.
/// Creates `dir` if it does not exist.
///
/// # Errors
///
/// Returns `io::Error` if directory creation, file writing, or renaming fails.
pub(crate) fn save_cached_session(dir: &Path, session: &Option<Session>) -> io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(CACHE_FILE);
    let tmp_path = dir.join(format!("{CACHE_FILE}.tmp"));
    let json = serde_json::to_string_pretty(session).map_err(io::Error::other)?;
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// Load the cached session from disk.
///
/// A missing or corrupt cache file is not an error — absence of cache means
/// "unauthenticated," so both cases return `None` (corruption with a warn).
pub(crate) fn load_cached_session(dir: &Path) -> Option<Session> {
    let path = dir.join(CACHE_FILE);
    match std::fs::read_to_string(&path) {
        Ok(content) => match serde_json::from_str::<Option<Session>>(&content) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "corrupt session cache, treating as unauthenticated"
                );
                None
            }
        },
        Err(_) => None,
    }
}

/// The frame-local auth state machine, free of any I/O scheduling.
///
/// [`run_frame`] drives this from the actor loop; tests drive it directly.
#[derive(Debug)]
pub struct FrameAuth {
    frame_id: Uuid,
    /// Token of the shell this frame was spawned by. Messages carrying any
    /// other token are from an unexpected counterpart and are dropped.
    shell_token: Uuid,
    state: FrameAuthState,
    session: Option<Session>,
    cache_dir: PathBuf,
}

impl FrameAuth {
    /// Create the machine in `Uninitialized` with no session.
    pub fn new(frame_id: Uuid, shell_token: Uuid, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            frame_id,
            shell_token,
            state: FrameAuthState::Uninitialized,
            session: None,
            cache_dir: cache_dir.into(),
        }
    }

    /// Current state.
    pub fn state(&self) -> FrameAuthState {
        self.state
    }

    /// The frame's current view of the session. Possibly stale.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Mark the request as sent.
    pub fn request_sent(&mut self) {
        self.state = FrameAuthState::AwaitingResponse;
    }

    /// Apply an incoming `AuthState` message.
    ///
    /// Validates the sender token before trusting the payload, caches the
    /// session (memory and disk), and moves to `Synced`. Idempotent:
    /// applying the same message twice leaves the cached session identical
    /// to applying it once.
    ///
    /// # Returns
    ///
    /// `true` if the message was accepted, `false` if it was dropped for
    /// carrying an unexpected shell token.
    pub fn apply(&mut self, msg: &ShellToFrame) -> bool {
        let ShellToFrame::AuthState { shell_token, session } = msg;
        if *shell_token != self.shell_token {
            tracing::warn!(
                frame_id = %self.frame_id,
                "dropping auth state from unexpected sender"
            );
            return false;
        }

        self.session = session.clone();
        self.state = FrameAuthState::Synced;
        // Cache persistence is best-effort: a frame with an unwritable cache
        // dir still works, it just loses the reload fallback.
        if let Err(e) = save_cached_session(&self.cache_dir, &self.session) {
            tracing::warn!(frame_id = %self.frame_id, error = %e, "failed to persist session cache");
        }
        true
    }

    /// Fall back to the persistent cache after the bounded wait expired.
    ///
    /// Absence of cache means unauthenticated. The state stays
    /// `AwaitingResponse` — a late answer is still welcome.
    pub fn fall_back(&mut self) {
        self.session = load_cached_session(&self.cache_dir);
        tracing::debug!(
            frame_id = %self.frame_id,
            cached = self.session.is_some(),
            "auth response timed out, serving cached session"
        );
    }
}

/// Configuration for a spawned frame actor.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Bounded wait for the first `AuthState` before falling back.
    pub response_timeout: Duration,
    /// Directory holding this frame's persistent session cache.
    pub cache_dir: PathBuf,
}

/// Owning handle to a running frame actor.
///
/// Dropping the handle aborts the actor, modeling the frame context being
/// torn down when its window closes. Abandoned in-flight work is read-only
/// and safe to discard.
#[derive(Debug)]
pub struct FrameHandle {
    frame_id: Uuid,
    session_rx: watch::Receiver<Option<Session>>,
    state_rx: watch::Receiver<FrameAuthState>,
    task: tokio::task::JoinHandle<()>,
}

impl FrameHandle {
    /// The frame's ID.
    pub fn frame_id(&self) -> Uuid {
        self.frame_id
    }

    /// The frame's current (possibly stale) view of the session.
    pub fn session(&self) -> Option<Session> {
        self.session_rx.borrow().clone()
    }

    /// The frame's current auth state.
    pub fn auth_state(&self) -> FrameAuthState {
        *self.state_rx.borrow()
    }

    /// Whether the actor task is still running.
    pub fn is_alive(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for FrameHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn a frame actor wired to the shell's channels.
///
/// # Arguments
///
/// * `frame_id` - Identity the frame uses in `RequestAuth`.
/// * `shell_token` - The spawning shell's token; the frame drops messages
///   carrying any other token.
/// * `to_shell` - Sender for frame-to-shell messages. A closed channel
///   (frame opened standalone, no parent context) triggers immediate
///   cache fallback.
/// * `from_shell` - Receiver for shell-to-frame messages.
/// * `config` - Timeout and cache location.
pub fn spawn_frame(
    frame_id: Uuid,
    shell_token: Uuid,
    to_shell: mpsc::Sender<FrameToShell>,
    from_shell: mpsc::Receiver<ShellToFrame>,
    config: FrameConfig,
) -> FrameHandle {
    let (session_tx, session_rx) = watch::channel(None);
    let (state_tx, state_rx) = watch::channel(FrameAuthState::Uninitialized);
    let task = tokio::spawn(run_frame(
        frame_id,
        shell_token,
        to_shell,
        from_shell,
        config,
        session_tx,
        state_tx,
    ));
    FrameHandle {
        frame_id,
        session_rx,
        state_rx,
        task,
    }
}

/// Actor loop driving one frame's [`FrameAuth`] machine.
async fn run_frame(
    frame_id: Uuid,
    shell_token: Uuid,
    to_shell: mpsc::Sender<FrameToShell>,
    mut from_shell: mpsc::Receiver<ShellToFrame>,
    config: FrameConfig,
    session_tx: watch::Sender<Option<Session>>,
    state_tx: watch::Sender<FrameAuthState>,
) {
    let mut auth = FrameAuth::new(frame_id, shell_token, config.cache_dir);
    let publish = |auth: &FrameAuth| {
        let _ = session_tx.send(auth.session().cloned());
        let _ = state_tx.send(auth.state());
    };

    // On load: request the session from the parent context. A frame opened
    // standalone has no reachable parent; fall back right away.
    let requested = to_shell
        .send(FrameToShell::RequestAuth { frame_id })
        .await
        .is_ok();
    if requested {
        auth.request_sent();
        publish(&auth);
        // A message rejected for carrying the wrong shell token must not
        // consume the bounded wait: keep listening until a valid answer
        // arrives or the deadline passes.
        let deadline = tokio::time::Instant::now() + config.response_timeout;
        let answered = loop {
            match tokio::time::timeout_at(deadline, from_shell.recv()).await {
                Ok(Some(msg)) => {
                    if auth.apply(&msg) {
                        break true;
                    }
                }
                // Shell side dropped the channel, or the wait elapsed.
                Ok(None) | Err(_) => break false,
            }
        };
        if !answered {
            auth.fall_back();
        }
    } else {
        auth.request_sent();
        auth.fall_back();
    }
    publish(&auth);

    // Live for the rest of the frame's lifetime: apply unsolicited updates
    // (login, logout, registration) and late answers.
    while let Some(msg) = from_shell.recv().await {
        if auth.apply(&msg) {
            publish(&auth);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::FRAME_CHANNEL_DEPTH;

    fn session(handle: &str) -> Session {
        Session {
            handle: handle.to_string(),
            authenticated_at: 1_700_000_000_000,
        }
    }

    fn auth_state(token: Uuid, handle: Option<&str>) -> ShellToFrame {
        ShellToFrame::AuthState {
            shell_token: token,
            session: handle.map(session),
        }
    }

    async fn wait_for<F: Fn() -> bool>(cond: F, what: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(tokio::time::Instant::now() < deadline, "timed out waiting: {what}");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    // --- cache persistence ---

    #[test]
    fn cache_save_then_load_roundtrips() {
        let dir = tempfile::tempdir().expect("failed to create tmpdir");
        let cached = Some(session("alice"));
        save_cached_session(dir.path(), &cached).expect("save should succeed");
        assert_eq!(load_cached_session(dir.path()), cached);
    }

    #[test]
    fn cache_save_creates_parent_dir() {
        let dir = tempfile::tempdir().expect("failed to create tmpdir");
        let nested = dir.path().join("frames").join("f-1");
        save_cached_session(&nested, &Some(session("alice"))).expect("save should succeed");
        assert!(load_cached_session(&nested).is_some());
    }

    #[test]
    fn missing_cache_loads_as_none() {
        let dir = tempfile::tempdir().expect("failed to create tmpdir");
        assert_eq!(load_cached_session(dir.path()), None);
    }

    #[test]
    fn corrupt_cache_loads_as_none() {
        let dir = tempfile::tempdir().expect("failed to create tmpdir");
        std::fs::write(dir.path().join(CACHE_FILE), "not valid json!!!")
            .expect("write should succeed");
        assert_eq!(load_cached_session(dir.path()), None);
    }

    #[test]
    fn cached_sign_out_loads_as_none() {
        let dir = tempfile::tempdir().expect("failed to create tmpdir");
        save_cached_session(dir.path(), &None).expect("save should succeed");
        assert_eq!(load_cached_session(dir.path()), None);
    }

    // --- state machine ---

    #[test]
    fn applying_the_same_auth_state_twice_is_idempotent() {
        let dir = tempfile::tempdir().expect("failed to create tmpdir");
        let token = Uuid::new_v4();
        let mut auth = FrameAuth::new(Uuid::new_v4(), token, dir.path());
        let msg = auth_state(token, Some("alice"));

        assert!(auth.apply(&msg));
        let after_once = auth.session().cloned();
        assert!(auth.apply(&msg));
        assert_eq!(auth.session().cloned(), after_once);
        assert_eq!(auth.state(), FrameAuthState::Synced);
    }

    #[test]
    fn wrong_shell_token_is_dropped() {
        let dir = tempfile::tempdir().expect("failed to create tmpdir");
        let mut auth = FrameAuth::new(Uuid::new_v4(), Uuid::new_v4(), dir.path());
        auth.request_sent();

        let forged = auth_state(Uuid::new_v4(), Some("mallory"));
        assert!(!auth.apply(&forged));
        assert_eq!(auth.session(), None);
        assert_eq!(auth.state(), FrameAuthState::AwaitingResponse);
    }

    #[test]
    fn unsolicited_sign_out_overwrites_the_cached_session() {
        let dir = tempfile::tempdir().expect("failed to create tmpdir");
        let token = Uuid::new_v4();
        let mut auth = FrameAuth::new(Uuid::new_v4(), token, dir.path());

        assert!(auth.apply(&auth_state(token, Some("alice"))));
        assert!(auth.apply(&auth_state(token, None)));
        assert_eq!(auth.session(), None);
        assert_eq!(auth.state(), FrameAuthState::Synced);
        // The sign-out also reached the persistent cache.
        assert_eq!(load_cached_session(dir.path()), None);
    }

    #[test]
    fn fall_back_uses_the_persistent_cache() {
        let dir = tempfile::tempdir().expect("failed to create tmpdir");
        save_cached_session(dir.path(), &Some(session("alice"))).expect("save should succeed");

        let mut auth = FrameAuth::new(Uuid::new_v4(), Uuid::new_v4(), dir.path());
        auth.request_sent();
        auth.fall_back();
        assert_eq!(auth.session().map(|s| s.handle.as_str()), Some("alice"));
        // A late answer is still acceptable after fallback.
        assert_eq!(auth.state(), FrameAuthState::AwaitingResponse);
    }

    // --- actor loop ---

    #[tokio::test]
    async fn frame_syncs_when_the_shell_answers() {
        let dir = tempfile::tempdir().expect("failed to create tmpdir");
        let token = Uuid::new_v4();
        let frame_id = Uuid::new_v4();
        let (to_shell_tx, mut to_shell_rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);
        let (from_shell_tx, from_shell_rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);

        let handle = spawn_frame(
            frame_id,
            token,
            to_shell_tx,
            from_shell_rx,
            FrameConfig {
                response_timeout: Duration::from_secs(5),
                cache_dir: dir.path().to_path_buf(),
            },
        );

        // Play the shell: answer the frame's request.
        let request = to_shell_rx.recv().await.expect("frame should request auth");
        assert_eq!(request, FrameToShell::RequestAuth { frame_id });
        from_shell_tx
            .send(auth_state(token, Some("alice")))
            .await
            .expect("send should succeed");

        wait_for(|| handle.auth_state() == FrameAuthState::Synced, "sync").await;
        assert_eq!(handle.session().map(|s| s.handle), Some("alice".to_string()));
    }

    #[tokio::test]
    async fn unanswered_frame_falls_back_to_cache_then_accepts_late_answer() {
        let dir = tempfile::tempdir().expect("failed to create tmpdir");
        save_cached_session(dir.path(), &Some(session("cached-carol")))
            .expect("save should succeed");

        let token = Uuid::new_v4();
        let (to_shell_tx, _to_shell_rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);
        let (from_shell_tx, from_shell_rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);

        let handle = spawn_frame(
            Uuid::new_v4(),
            token,
            to_shell_tx,
            from_shell_rx,
            FrameConfig {
                response_timeout: Duration::from_millis(20),
                cache_dir: dir.path().to_path_buf(),
            },
        );

        // Bounded wait expires; the cached session is served.
        wait_for(
            || handle.session().map(|s| s.handle) == Some("cached-carol".to_string()),
            "cache fallback",
        )
        .await;
        assert_eq!(handle.auth_state(), FrameAuthState::AwaitingResponse);

        // The shell answers late; the frame still syncs.
        from_shell_tx
            .send(auth_state(token, Some("alice")))
            .await
            .expect("send should succeed");
        wait_for(|| handle.auth_state() == FrameAuthState::Synced, "late sync").await;
        assert_eq!(handle.session().map(|s| s.handle), Some("alice".to_string()));
    }

    #[tokio::test]
    async fn forged_answer_does_not_consume_the_bounded_wait() {
        let dir = tempfile::tempdir().expect("failed to create tmpdir");
        let token = Uuid::new_v4();
        let (to_shell_tx, _to_shell_rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);
        let (from_shell_tx, from_shell_rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);

        let handle = spawn_frame(
            Uuid::new_v4(),
            token,
            to_shell_tx,
            from_shell_rx,
            FrameConfig {
                response_timeout: Duration::from_secs(5),
                cache_dir: dir.path().to_path_buf(),
            },
        );

        // A message from an unexpected counterpart arrives first; the frame
        // must keep waiting and still accept the genuine answer.
        from_shell_tx
            .send(auth_state(Uuid::new_v4(), Some("mallory")))
            .await
            .expect("send should succeed");
        from_shell_tx
            .send(auth_state(token, Some("alice")))
            .await
            .expect("send should succeed");

        wait_for(|| handle.auth_state() == FrameAuthState::Synced, "sync").await;
        assert_eq!(handle.session().map(|s| s.handle), Some("alice".to_string()));
    }

    #[tokio::test]
    async fn forged_answer_then_silence_falls_back_to_cache() {
        let dir = tempfile::tempdir().expect("failed to create tmpdir");
        save_cached_session(dir.path(), &Some(session("cached-carol")))
            .expect("save should succeed");

        let (to_shell_tx, _to_shell_rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);
        let (from_shell_tx, from_shell_rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);

        let handle = spawn_frame(
            Uuid::new_v4(),
            Uuid::new_v4(),
            to_shell_tx,
            from_shell_rx,
            FrameConfig {
                response_timeout: Duration::from_millis(40),
                cache_dir: dir.path().to_path_buf(),
            },
        );

        from_shell_tx
            .send(auth_state(Uuid::new_v4(), Some("mallory")))
            .await
            .expect("send should succeed");

        // No genuine answer follows; after the deadline the frame serves
        // the persisted cache, not the rejected payload.
        wait_for(
            || handle.session().map(|s| s.handle) == Some("cached-carol".to_string()),
            "cache fallback after forged answer",
        )
        .await;
        assert_eq!(handle.auth_state(), FrameAuthState::AwaitingResponse);
    }

    #[tokio::test]
    async fn standalone_frame_is_unauthenticated_without_blocking() {
        let dir = tempfile::tempdir().expect("failed to create tmpdir");
        let (to_shell_tx, to_shell_rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);
        // No parent context at all.
        drop(to_shell_rx);
        let (_from_shell_tx, from_shell_rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);

        let handle = spawn_frame(
            Uuid::new_v4(),
            Uuid::new_v4(),
            to_shell_tx,
            from_shell_rx,
            FrameConfig {
                response_timeout: Duration::from_secs(60),
                cache_dir: dir.path().to_path_buf(),
            },
        );

        // Despite the long timeout, the dead channel short-circuits.
        wait_for(
            || handle.auth_state() == FrameAuthState::AwaitingResponse,
            "standalone fallback",
        )
        .await;
        assert_eq!(handle.session(), None);
    }

    #[tokio::test]
    async fn dropping_the_handle_stops_the_actor() {
        let dir = tempfile::tempdir().expect("failed to create tmpdir");
        let (to_shell_tx, _to_shell_rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);
        let (_from_shell_tx, from_shell_rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);
        let handle = spawn_frame(
            Uuid::new_v4(),
            Uuid::new_v4(),
            to_shell_tx,
            from_shell_rx,
            FrameConfig {
                response_timeout: Duration::from_secs(60),
                cache_dir: dir.path().to_path_buf(),
            },
        );
        let task = handle.task.abort_handle();
        drop(handle);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(task.is_finished());
    }
}
