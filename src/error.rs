//! Crate-level error types for store access, ticket workflow, and shell setup.

use crate::ticket::TicketStatus;

/// Error returned when an append or query against the collaborative store fails.
///
/// Store failures are surfaced to the immediate caller and never retried
/// automatically beyond the single best-effort attempt: a failed append is a
/// failed user action that the user must retry manually.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store backend rejected or failed the RPC.
    ///
    /// Covers network failures, server-side errors, and authorization
    /// rejections from the record store service.
    #[error("record store unavailable: {0}")]
    Unavailable(#[from] tonic::Status),

    /// The gRPC channel could not be established.
    #[error("record store transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// A payload could not be serialized to JSON bytes before the append.
    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Error returned by ticket workflow operations.
#[derive(Debug, thiserror::Error)]
pub enum TicketError {
    /// The caller's session handle is not the configured administrator.
    ///
    /// Status transitions and moderator comments are gated; the attempt
    /// appends nothing and the projected ticket is unchanged.
    #[error("permission denied: '{handle}' is not an administrator")]
    PermissionDenied {
        /// Handle of the session that attempted the gated operation.
        handle: String,
    },

    /// The operation requires a signed-in session and none was provided.
    #[error("not signed in")]
    Unauthenticated,

    /// No ticket with the given number exists in the projection.
    #[error("no ticket with number {0}")]
    NotFound(u64),

    /// The requested status change is not a legal workflow transition.
    #[error("cannot transition ticket from {from:?} to {to:?}")]
    InvalidTransition {
        /// Current projected status.
        from: TicketStatus,
        /// Requested status.
        to: TicketStatus,
    },

    /// The underlying store append or query failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Error returned by window manager operations.
#[derive(Debug, thiserror::Error)]
pub enum WindowError {
    /// The app ID is not present in the registry.
    #[error("unknown app '{0}'")]
    UnknownApp(String),

    /// No open window with the given ID.
    #[error("no open window {0}")]
    NoSuchWindow(uuid::Uuid),
}

/// Error returned by [`Shell`](crate::Shell) setup and desktop operations.
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    /// The app registry file could not be read.
    #[error("failed to read app registry: {0}")]
    RegistryIo(#[from] std::io::Error),

    /// The app registry file is not valid JSON of the expected shape.
    #[error("failed to parse app registry: {0}")]
    RegistryFormat(#[from] serde_json::Error),

    /// The store connection could not be established, or a layout write
    /// failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A layout edit was attempted without a signed-in session.
    ///
    /// Layout writes are attributed to the session handle, so there is no
    /// writer identity to append under when signed out.
    #[error("not signed in")]
    NotSignedIn,

    /// A layout edit referenced an icon that is not on the desktop.
    ///
    /// Rejected before the append: writing an unchanged whole snapshot
    /// would still race a concurrent peer's edit, for nothing.
    #[error("no icon '{0}' on the desktop")]
    UnknownIcon(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_names_the_handle() {
        let err = TicketError::PermissionDenied {
            handle: "mallory".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "permission denied: 'mallory' is not an administrator"
        );
    }

    #[test]
    fn invalid_transition_names_both_states() {
        let err = TicketError::InvalidTransition {
            from: TicketStatus::Pending,
            to: TicketStatus::Closed,
        };
        assert!(err.to_string().contains("Pending"));
        assert!(err.to_string().contains("Closed"));
    }

    #[test]
    fn store_error_wraps_tonic_status() {
        let status = tonic::Status::unavailable("backend down");
        let err = StoreError::from(status);
        assert!(err.to_string().contains("backend down"));
    }

    #[test]
    fn ticket_error_from_store_error_is_transparent() {
        let status = tonic::Status::deadline_exceeded("slow");
        let err = TicketError::from(StoreError::from(status));
        assert!(err.to_string().contains("slow"));
    }

    #[test]
    fn unknown_app_display() {
        let err = WindowError::UnknownApp("solitaire".to_string());
        assert_eq!(err.to_string(), "unknown app 'solitaire'");
    }

    // Verify `Send + Sync` bounds are satisfied so errors can cross thread
    // boundaries, which is required for use with `tokio` channels.
    const _: () = {
        #[allow(dead_code)]
        fn assert_send_sync<T: Send + Sync>() {}

        #[allow(dead_code)]
        fn check() {
            assert_send_sync::<StoreError>();
            assert_send_sync::<TicketError>();
            assert_send_sync::<WindowError>();
            assert_send_sync::<ShellError>();
        }
    };
}
