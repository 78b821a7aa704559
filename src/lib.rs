//! A collaborative desktop shell runtime over an append-only record store.

pub(crate) mod proto {
    tonic::include_proto!("collabstore.v1");
}

mod auth;
pub use auth::{Session, SessionCell};
mod channel;
pub use channel::{AuthBroadcaster, FrameToShell, ShellToFrame};
mod client;
pub use client::StoreClient;
mod desktop;
pub use desktop::{DesktopLayout, IconPlacement, load_layout, save_layout, update_layout};
mod document;
pub use document::{DocClient, Document};
mod error;
pub use error::{ShellError, StoreError, TicketError, WindowError};
mod frame;
pub use frame::{FrameAuth, FrameAuthState, FrameConfig, FrameHandle, spawn_frame};
mod projection;
pub use projection::{Projection, RefreshHandle, load, project, spawn_refresh};
mod record;
pub use record::{
    DESKTOP_STATE_KIND, StoreRecord, TICKET_COUNTER_KIND, UPDATE_REQUEST_KIND, now_ms,
};
mod registry;
pub use registry::{AppDescriptor, AppRegistry};
mod shell;
pub use shell::{Shell, ShellBuilder};
mod ticket;
pub use ticket::{Ticket, TicketBoard, TicketComment, TicketDesk, TicketStatus};
mod window;
pub use window::{WindowInstance, WindowManager};
