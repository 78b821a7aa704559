//! The desktop shell: the top-level object tying every subsystem together.
//!
//! A [`Shell`] owns the authoritative [`SessionCell`], the store client, the
//! window manager, the ticket desk, a background auth responder answering
//! frame requests, and a background refresh loop projecting the shared
//! desktop layout. Construction goes through [`ShellBuilder`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::WatchStream;

use crate::auth::{Session, SessionCell};
use crate::channel::{AuthBroadcaster, FRAME_CHANNEL_DEPTH, run_auth_responder};
use crate::client::StoreClient;
use crate::desktop::{DesktopLayout, IconPlacement, load_layout, save_layout, update_layout};
use crate::error::ShellError;
use crate::projection::{RefreshHandle, spawn_refresh};
use crate::registry::AppRegistry;
use crate::ticket::TicketDesk;
use crate::window::WindowManager;

/// Configures and opens a [`Shell`].
///
/// Defaults: in-memory store, empty registry, namespace `"shared-desktop"`,
/// administrator handle `"admin"`, three-second frame auth timeout, a
/// per-process temp directory for frame session caches, and a two-second
/// layout refresh interval.
#[derive(Debug, Clone)]
pub struct ShellBuilder {
    endpoint: Option<String>,
    registry: Option<AppRegistry>,
    registry_path: Option<PathBuf>,
    namespace: String,
    admin_handle: String,
    auth_timeout: Duration,
    cache_dir: Option<PathBuf>,
    refresh_interval: Duration,
}

impl Default for ShellBuilder {
    fn default() -> Self {
        Self {
            endpoint: None,
            registry: None,
            registry_path: None,
            namespace: "shared-desktop".to_string(),
            admin_handle: "admin".to_string(),
            auth_timeout: Duration::from_secs(3),
            cache_dir: None,
            refresh_interval: Duration::from_secs(2),
        }
    }
}

impl ShellBuilder {
    /// Start from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to a remote record store instead of the in-memory one.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Use an already-built app registry.
    pub fn registry(mut self, registry: AppRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Load the app registry from a JSON file at open time.
    ///
    /// Ignored if [`registry`](Self::registry) was also set.
    pub fn registry_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.registry_path = Some(path.into());
        self
    }

    /// The shared namespace all participants of this desktop write to.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// The handle whose session is allowed gated ticket operations.
    pub fn admin_handle(mut self, handle: impl Into<String>) -> Self {
        self.admin_handle = handle.into();
        self
    }

    /// How long a freshly opened frame waits for the shell's auth answer
    /// before falling back to its persisted session cache.
    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Root directory for per-frame session caches.
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// How often the desktop layout projection is re-folded.
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Open the shell: connect the store, load the registry, and start the
    /// auth responder and layout refresh tasks.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::Store`] if the store connection fails, or
    /// [`ShellError::RegistryIo`] / [`ShellError::RegistryFormat`] if the
    /// registry file cannot be loaded.
    pub async fn open(self) -> Result<Shell, ShellError> {
        let session = SessionCell::new();
        let client = match &self.endpoint {
            Some(endpoint) => StoreClient::connect_with_session(endpoint, session.clone()).await?,
            None => StoreClient::in_memory(),
        };

        let registry = match (self.registry, &self.registry_path) {
            (Some(registry), _) => registry,
            (None, Some(path)) => AppRegistry::from_path(path)?,
            (None, None) => AppRegistry::default(),
        };

        let broadcaster = AuthBroadcaster::new();
        let shell_token = broadcaster.shell_token();
        let broadcaster = Arc::new(tokio::sync::Mutex::new(broadcaster));

        let (to_shell_tx, to_shell_rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);
        let responder = tokio::spawn(run_auth_responder(
            to_shell_rx,
            Arc::clone(&broadcaster),
            session.clone(),
        ));

        let cache_root = self
            .cache_dir
            .unwrap_or_else(|| std::env::temp_dir().join("deskshell-frames"));
        let windows = WindowManager::new(
            registry,
            shell_token,
            to_shell_tx,
            Arc::clone(&broadcaster),
            cache_root,
            self.auth_timeout,
        );
        let tickets = TicketDesk::new(client.clone(), self.namespace.clone(), self.admin_handle);
        let layout = spawn_refresh::<DesktopLayout>(
            client.clone(),
            self.namespace.clone(),
            self.refresh_interval,
        );

        tracing::info!(namespace = %self.namespace, "shell opened");
        Ok(Shell {
            client,
            namespace: self.namespace,
            session,
            broadcaster,
            windows,
            tickets,
            layout,
            responder,
        })
    }
}

/// A running desktop shell session.
///
/// Dropping the shell stops its background tasks and every open frame.
pub struct Shell {
    client: StoreClient,
    namespace: String,
    session: SessionCell,
    broadcaster: Arc<tokio::sync::Mutex<AuthBroadcaster>>,
    windows: WindowManager,
    tickets: TicketDesk,
    layout: RefreshHandle<DesktopLayout>,
    responder: tokio::task::JoinHandle<()>,
}

impl Shell {
    /// Start configuring a shell.
    pub fn builder() -> ShellBuilder {
        ShellBuilder::new()
    }

    /// The shared namespace this shell reads and writes.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The store client, for direct record access.
    pub fn store(&self) -> &StoreClient {
        &self.client
    }

    /// The current session, or `None` when signed out.
    pub fn session(&self) -> Option<Session> {
        self.session.current()
    }

    /// The window manager.
    pub fn windows(&mut self) -> &mut WindowManager {
        &mut self.windows
    }

    /// Read-only view of the window manager.
    pub fn windows_ref(&self) -> &WindowManager {
        &self.windows
    }

    /// The ticket desk.
    pub fn tickets(&self) -> &TicketDesk {
        &self.tickets
    }

    /// Sign in as `handle` and push the new session to every open frame.
    ///
    /// # Returns
    ///
    /// The newly established session.
    pub async fn sign_in(&self, handle: impl Into<String>) -> Session {
        let session = self.session.sign_in(handle);
        self.broadcaster
            .lock()
            .await
            .broadcast(&Some(session.clone()))
            .await;
        tracing::info!(handle = %session.handle, "signed in");
        session
    }

    /// Sign out and push the cleared state to every open frame.
    ///
    /// # Returns
    ///
    /// The session that was signed out, if any.
    pub async fn sign_out(&self) -> Option<Session> {
        let previous = self.session.sign_out();
        self.broadcaster.lock().await.broadcast(&None).await;
        if let Some(session) = &previous {
            tracing::info!(handle = %session.handle, "signed out");
        }
        previous
    }

    /// The most recently folded desktop layout.
    pub fn layout(&self) -> DesktopLayout {
        self.layout.latest()
    }

    /// A receiver observing every layout re-fold.
    pub fn layout_updates(&self) -> watch::Receiver<DesktopLayout> {
        self.layout.subscribe()
    }

    /// The layout re-folds as an async stream, starting from the current
    /// state.
    pub fn layout_stream(&self) -> WatchStream<DesktopLayout> {
        WatchStream::new(self.layout.subscribe())
    }

    /// Place or replace a desktop icon, persisting the whole layout.
    ///
    /// # Errors
    ///
    /// [`ShellError::NotSignedIn`] without a session, or
    /// [`ShellError::Store`] if the write fails.
    pub async fn place_icon(
        &self,
        icon_id: &str,
        placement: IconPlacement,
    ) -> Result<DesktopLayout, ShellError> {
        let writer = self.writer()?;
        let layout = update_layout(&self.client, &self.namespace, &writer, |layout| {
            layout.icons.insert(icon_id.to_string(), placement);
        })
        .await?;
        Ok(layout)
    }

    /// Move an existing icon.
    ///
    /// A missing icon ID is rejected without appending: a snapshot that
    /// changes nothing would still be able to trample a concurrent peer's
    /// edit.
    ///
    /// # Errors
    ///
    /// [`ShellError::NotSignedIn`] without a session,
    /// [`ShellError::UnknownIcon`] if the icon is not on the desktop, or
    /// [`ShellError::Store`] if the write fails.
    pub async fn move_icon(&self, icon_id: &str, x: i32, y: i32) -> Result<DesktopLayout, ShellError> {
        let writer = self.writer()?;
        let mut layout = load_layout(&self.client, &self.namespace).await?;
        let Some(icon) = layout.icons.get_mut(icon_id) else {
            return Err(ShellError::UnknownIcon(icon_id.to_string()));
        };
        icon.x = x;
        icon.y = y;
        save_layout(&self.client, &self.namespace, &writer, &layout).await?;
        Ok(layout)
    }

    /// Show or hide a desktop icon.
    ///
    /// Like [`move_icon`](Self::move_icon), a missing icon ID is rejected
    /// before any append.
    ///
    /// # Errors
    ///
    /// [`ShellError::NotSignedIn`] without a session,
    /// [`ShellError::UnknownIcon`] if the icon is not on the desktop, or
    /// [`ShellError::Store`] if the write fails.
    pub async fn set_icon_visible(
        &self,
        icon_id: &str,
        visible: bool,
    ) -> Result<DesktopLayout, ShellError> {
        let writer = self.writer()?;
        let mut layout = load_layout(&self.client, &self.namespace).await?;
        let Some(icon) = layout.icons.get_mut(icon_id) else {
            return Err(ShellError::UnknownIcon(icon_id.to_string()));
        };
        icon.visible = visible;
        save_layout(&self.client, &self.namespace, &writer, &layout).await?;
        Ok(layout)
    }

    /// Change the desktop background color.
    ///
    /// # Errors
    ///
    /// [`ShellError::NotSignedIn`] without a session, or
    /// [`ShellError::Store`] if the write fails.
    pub async fn set_background_color(&self, color: &str) -> Result<DesktopLayout, ShellError> {
        let writer = self.writer()?;
        let layout = update_layout(&self.client, &self.namespace, &writer, |layout| {
            layout.background_color = color.to_string();
        })
        .await?;
        Ok(layout)
    }

    fn writer(&self) -> Result<String, ShellError> {
        self.session
            .current()
            .map(|s| s.handle)
            .ok_or(ShellError::NotSignedIn)
    }
}

impl Drop for Shell {
    fn drop(&mut self) {
        self.responder.abort();
    }
}

impl std::fmt::Debug for Shell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shell")
            .field("namespace", &self.namespace)
            .field("signed_in", &self.session.is_authenticated())
            .field("open_windows", &self.windows.len())
            .finish()
    }
}
