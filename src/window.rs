//! Registry-driven window manager for embedded-frame windows.
//!
//! Owns every [`WindowInstance`] exclusively: windows are created on open,
//! destroyed on close, and re-stacked on focus. Opening a window registers
//! the frame with the auth broadcaster and spawns its frame-side auth
//! actor, so a freshly opened app frame receives the session without any
//! caller involvement.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::channel::{AuthBroadcaster, FRAME_CHANNEL_DEPTH, FrameToShell};
use crate::error::WindowError;
use crate::frame::{FrameConfig, FrameHandle, spawn_frame};
use crate::registry::AppRegistry;

/// Pixel offset between successive cascading windows.
const CASCADE_STEP: i32 = 24;

/// How many cascade slots before wrapping back to the first position.
const CASCADE_WRAP: u32 = 10;

/// One open embedded-frame window.
///
/// Owned exclusively by the [`WindowManager`]; callers read it through
/// [`WindowManager::get`] and mutate it through the manager's methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInstance {
    /// The hosted app's registry ID.
    pub app_id: String,
    /// Left edge, pixels.
    pub x: i32,
    /// Top edge, pixels.
    pub y: i32,
    /// Width, pixels.
    pub width: u32,
    /// Height, pixels.
    pub height: u32,
    /// Stacking order; the focused window has the highest value.
    pub z_index: u32,
    /// Whether the window is currently shown.
    pub visible: bool,
}

struct OpenWindow {
    instance: WindowInstance,
    frame: FrameHandle,
}

/// Creator, destroyer, and stacker of embedded-frame windows.
pub struct WindowManager {
    registry: AppRegistry,
    shell_token: Uuid,
    to_shell: mpsc::Sender<FrameToShell>,
    broadcaster: Arc<tokio::sync::Mutex<AuthBroadcaster>>,
    cache_root: PathBuf,
    response_timeout: Duration,
    windows: HashMap<Uuid, OpenWindow>,
    /// Next z-index to hand out; grows monotonically per shell session.
    next_z: u32,
    /// Total windows ever opened, drives the cascade offset.
    opened: u32,
}

impl WindowManager {
    pub(crate) fn new(
        registry: AppRegistry,
        shell_token: Uuid,
        to_shell: mpsc::Sender<FrameToShell>,
        broadcaster: Arc<tokio::sync::Mutex<AuthBroadcaster>>,
        cache_root: PathBuf,
        response_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            shell_token,
            to_shell,
            broadcaster,
            cache_root,
            response_timeout,
            windows: HashMap::new(),
            next_z: 1,
            opened: 0,
        }
    }

    /// The registry this manager spawns windows from.
    pub fn registry(&self) -> &AppRegistry {
        &self.registry
    }

    /// Number of open windows.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Whether no windows are open.
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// IDs of all open windows, in no particular order.
    pub fn window_ids(&self) -> Vec<Uuid> {
        self.windows.keys().copied().collect()
    }

    /// Read one window's state.
    pub fn get(&self, window_id: Uuid) -> Option<&WindowInstance> {
        self.windows.get(&window_id).map(|w| &w.instance)
    }

    /// The auth handle of one window's frame.
    pub fn frame(&self, window_id: Uuid) -> Option<&FrameHandle> {
        self.windows.get(&window_id).map(|w| &w.frame)
    }

    /// The window currently on top of the stack, if any.
    pub fn top(&self) -> Option<Uuid> {
        self.windows
            .iter()
            .max_by_key(|(_, w)| w.instance.z_index)
            .map(|(id, _)| *id)
    }

    /// Open a window for `app_id`.
    ///
    /// Spawns the embedded frame's auth actor, registers it with the
    /// broadcaster, places the window at the next cascade position with the
    /// registry's initial size, and puts it on top of the stack.
    ///
    /// # Returns
    ///
    /// The new window's ID (also the frame ID on the auth channel).
    ///
    /// # Errors
    ///
    /// Returns [`WindowError::UnknownApp`] if `app_id` is not registered.
    pub async fn open(&mut self, app_id: &str) -> Result<Uuid, WindowError> {
        let descriptor = self
            .registry
            .get(app_id)
            .ok_or_else(|| WindowError::UnknownApp(app_id.to_string()))?;

        let window_id = Uuid::new_v4();
        let offset = CASCADE_STEP * (1 + (self.opened % CASCADE_WRAP) as i32);
        let instance = WindowInstance {
            app_id: descriptor.id.clone(),
            x: offset,
            y: offset,
            width: descriptor.width,
            height: descriptor.height,
            z_index: self.next_z,
            visible: true,
        };
        self.next_z += 1;
        self.opened += 1;

        let (from_shell_tx, from_shell_rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);
        self.broadcaster
            .lock()
            .await
            .register(window_id, from_shell_tx);
        let frame = spawn_frame(
            window_id,
            self.shell_token,
            self.to_shell.clone(),
            from_shell_rx,
            FrameConfig {
                response_timeout: self.response_timeout,
                cache_dir: self.cache_root.join(window_id.to_string()),
            },
        );

        tracing::info!(%window_id, app_id, "window opened");
        self.windows.insert(window_id, OpenWindow { instance, frame });
        Ok(window_id)
    }

    /// Close a window, destroying its frame and deregistering it from the
    /// broadcaster.
    ///
    /// # Errors
    ///
    /// Returns [`WindowError::NoSuchWindow`] if the window is not open.
    pub async fn close(&mut self, window_id: Uuid) -> Result<(), WindowError> {
        let window = self
            .windows
            .remove(&window_id)
            .ok_or(WindowError::NoSuchWindow(window_id))?;
        self.broadcaster.lock().await.deregister(window_id);
        // Dropping the handle aborts the frame actor.
        drop(window.frame);
        tracing::info!(%window_id, "window closed");
        Ok(())
    }

    /// Raise a window to the top of the stack.
    ///
    /// # Returns
    ///
    /// The window's new z-index.
    ///
    /// # Errors
    ///
    /// Returns [`WindowError::NoSuchWindow`] if the window is not open.
    pub fn focus(&mut self, window_id: Uuid) -> Result<u32, WindowError> {
        let window = self
            .windows
            .get_mut(&window_id)
            .ok_or(WindowError::NoSuchWindow(window_id))?;
        window.instance.z_index = self.next_z;
        self.next_z += 1;
        Ok(window.instance.z_index)
    }

    /// Move a window to an absolute position.
    ///
    /// # Errors
    ///
    /// Returns [`WindowError::NoSuchWindow`] if the window is not open.
    pub fn move_to(&mut self, window_id: Uuid, x: i32, y: i32) -> Result<(), WindowError> {
        let window = self
            .windows
            .get_mut(&window_id)
            .ok_or(WindowError::NoSuchWindow(window_id))?;
        window.instance.x = x;
        window.instance.y = y;
        Ok(())
    }

    /// Resize a window.
    ///
    /// # Errors
    ///
    /// Returns [`WindowError::NoSuchWindow`] if the window is not open.
    pub fn resize(&mut self, window_id: Uuid, width: u32, height: u32) -> Result<(), WindowError> {
        let window = self
            .windows
            .get_mut(&window_id)
            .ok_or(WindowError::NoSuchWindow(window_id))?;
        window.instance.width = width;
        window.instance.height = height;
        Ok(())
    }

    /// Show or hide a window without closing it.
    ///
    /// # Errors
    ///
    /// Returns [`WindowError::NoSuchWindow`] if the window is not open.
    pub fn set_visible(&mut self, window_id: Uuid, visible: bool) -> Result<(), WindowError> {
        let window = self
            .windows
            .get_mut(&window_id)
            .ok_or(WindowError::NoSuchWindow(window_id))?;
        window.instance.visible = visible;
        Ok(())
    }
}

impl std::fmt::Debug for WindowManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowManager")
            .field("open_windows", &self.windows.len())
            .field("next_z", &self.next_z)
            .finish()
    }
}
