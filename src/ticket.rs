//! Ticket workflow: append-only update records, the folding rules that turn
//! them into tickets, and the gated operations that write them.
//!
//! Every change to a ticket is a new `update_request` record — there is no
//! in-place mutation anywhere. The fold groups records by ticket number and
//! applies an asymmetric merge: scalar fields (status, description,
//! submitter) are overwritten by later records, while comment lists are
//! **accumulated** across all records in ascending order. That asymmetry is
//! a core correctness rule, not an implementation detail: overwriting
//! comments would lose moderator replies written between a reader's fold
//! and a writer's append.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::auth::Session;
use crate::client::StoreClient;
use crate::error::{StoreError, TicketError};
use crate::projection::{Projection, load};
use crate::record::{StoreRecord, TICKET_COUNTER_KIND, UPDATE_REQUEST_KIND};

/// Workflow status of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    /// Submitted, not yet triaged.
    Pending,
    /// Accepted and being worked.
    Open,
    /// Resolved. May be reopened.
    Closed,
}

impl TicketStatus {
    /// Whether moving from `self` to `next` is a legal workflow transition.
    ///
    /// Legal moves: `pending → open`, `open → closed`, and `closed → open`
    /// (reopen). Everything else, including self-transitions, is rejected.
    pub fn can_transition_to(self, next: TicketStatus) -> bool {
        matches!(
            (self, next),
            (TicketStatus::Pending, TicketStatus::Open)
                | (TicketStatus::Open, TicketStatus::Closed)
                | (TicketStatus::Closed, TicketStatus::Open)
        )
    }
}

/// One comment on a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketComment {
    /// Handle of the comment author.
    pub author: String,
    /// Comment body.
    pub text: String,
}

/// Wire payload of an `update_request` record.
///
/// Every field except the number is optional: a record carries only the
/// fields it changes. `comments` contributes nothing when empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TicketUpdate {
    ticket_number: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<TicketStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    submitter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    comments: Vec<TicketComment>,
}

/// Wire payload of a `ticket_counter` record: one claimed number.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CounterClaim {
    value: u64,
}

/// A projected ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket number, unique per namespace modulo counter races.
    pub ticket_number: u64,
    /// Current workflow status.
    pub status: TicketStatus,
    /// Handle of the submitter.
    pub submitter: String,
    /// Problem description, latest value wins.
    pub description: String,
    /// All comments ever appended, in ascending record order.
    pub comments: Vec<TicketComment>,
    /// When the ticket was last moved to `open`, if ever.
    pub opened_at: Option<i64>,
    /// When the ticket was moved to `closed`; cleared on reopen.
    pub closed_at: Option<i64>,
}

impl Ticket {
    fn new(ticket_number: u64) -> Self {
        Self {
            ticket_number,
            status: TicketStatus::Pending,
            submitter: String::new(),
            description: String::new(),
            comments: Vec::new(),
            opened_at: None,
            closed_at: None,
        }
    }
}

/// Projected state of the whole ticket board.
///
/// Exactly one [`Ticket`] per number, no matter how many records share it —
/// that is the dedup guarantee. Numbers claimed by two distinct submitters
/// (the counter race) still resolve to a single ticket, but are listed in
/// [`collisions`](Self::collisions) so the anomaly is visible instead of
/// silently merging unrelated tickets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TicketBoard {
    /// All tickets, keyed by number.
    pub tickets: BTreeMap<u64, Ticket>,
    /// Numbers where two different submitters created "the same" ticket.
    pub collisions: BTreeSet<u64>,
}

impl Projection for TicketBoard {
    const NAME: &'static str = "ticket-board";
    const RECORD_KIND: &'static str = UPDATE_REQUEST_KIND;

    fn apply(&mut self, record: &StoreRecord) {
        let update = match serde_json::from_value::<TicketUpdate>(record.payload.clone()) {
            Ok(update) if update.ticket_number != 0 => update,
            Ok(_) => {
                tracing::debug!(record_id = %record.record_id, "skipping update with ticket number 0");
                return;
            }
            Err(e) => {
                tracing::debug!(record_id = %record.record_id, error = %e, "skipping malformed ticket update");
                return;
            }
        };

        let ticket = self
            .tickets
            .entry(update.ticket_number)
            .or_insert_with(|| Ticket::new(update.ticket_number));

        // Scalars: latest record wins.
        if let Some(submitter) = update.submitter {
            if !ticket.submitter.is_empty() && ticket.submitter != submitter {
                // Two creation records with different submitters: a counter
                // race produced the same "next" number twice.
                self.collisions.insert(update.ticket_number);
            }
            ticket.submitter = submitter;
        }
        if let Some(description) = update.description {
            ticket.description = description;
        }
        if let Some(status) = update.status {
            ticket.status = status;
            match status {
                TicketStatus::Open => {
                    ticket.opened_at = Some(record.created_at);
                    ticket.closed_at = None;
                }
                TicketStatus::Closed => {
                    ticket.closed_at = Some(record.created_at);
                }
                TicketStatus::Pending => {}
            }
        }

        // Comments: accumulated, never overwritten.
        ticket.comments.extend(update.comments);
    }
}

/// Fold of the counter log: the highest number claimed so far.
#[derive(Debug, Clone, Default, PartialEq)]
struct CounterHighWater {
    max_claimed: u64,
}

impl Projection for CounterHighWater {
    const NAME: &'static str = "ticket-counter";
    const RECORD_KIND: &'static str = TICKET_COUNTER_KIND;

    fn apply(&mut self, record: &StoreRecord) {
        match serde_json::from_value::<CounterClaim>(record.payload.clone()) {
            Ok(claim) => self.max_claimed = self.max_claimed.max(claim.value),
            Err(e) => {
                tracing::debug!(record_id = %record.record_id, error = %e, "skipping malformed counter claim");
            }
        }
    }
}

/// Gated operations over the ticket workflow.
///
/// Anyone signed in may submit a ticket and read the board; status
/// transitions and moderator comments require the caller's session handle
/// to match the configured administrator. An unauthorized attempt fails
/// with [`TicketError::PermissionDenied`] and appends nothing — never a
/// silent no-op.
#[derive(Debug, Clone)]
pub struct TicketDesk {
    client: StoreClient,
    namespace: String,
    admin_handle: String,
}

impl TicketDesk {
    /// Create a desk over `namespace`, with `admin_handle` as the sole
    /// administrator identity.
    pub fn new(
        client: StoreClient,
        namespace: impl Into<String>,
        admin_handle: impl Into<String>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            admin_handle: admin_handle.into(),
        }
    }

    /// Fold the current board state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn board(&self) -> Result<TicketBoard, StoreError> {
        load(&self.client, &self.namespace).await
    }

    /// Submit a new ticket. Initial status is always `pending`.
    ///
    /// Claims the next ticket number from the counter log. Two simultaneous
    /// submitters can legitimately claim the same number; the store accepts
    /// both and the board projection surfaces the collision.
    ///
    /// # Arguments
    ///
    /// * `session` - The caller's session; `None` is rejected.
    /// * `description` - The problem description.
    ///
    /// # Returns
    ///
    /// The claimed ticket number.
    ///
    /// # Errors
    ///
    /// [`TicketError::Unauthenticated`] without a session, or
    /// [`TicketError::Store`] on append/query failure.
    pub async fn submit(
        &self,
        session: Option<&Session>,
        description: &str,
    ) -> Result<u64, TicketError> {
        let session = session.ok_or(TicketError::Unauthenticated)?;
        let _span =
            tracing::info_span!("submit_ticket", submitter = %session.handle).entered();

        let number = self.claim_next_number(&session.handle).await?;
        let update = TicketUpdate {
            ticket_number: number,
            status: Some(TicketStatus::Pending),
            submitter: Some(session.handle.clone()),
            description: Some(description.to_string()),
            comments: Vec::new(),
        };
        self.append_update(&session.handle, &update).await?;
        tracing::info!(ticket_number = number, "ticket submitted");
        Ok(number)
    }

    /// Transition a ticket's status. Administrator only.
    ///
    /// Validates the move against the current fold before appending, so an
    /// illegal transition (e.g. `pending → closed`) or a missing ticket is
    /// rejected without writing anything.
    ///
    /// # Errors
    ///
    /// [`TicketError::Unauthenticated`], [`TicketError::PermissionDenied`],
    /// [`TicketError::NotFound`], [`TicketError::InvalidTransition`], or
    /// [`TicketError::Store`].
    pub async fn transition(
        &self,
        session: Option<&Session>,
        ticket_number: u64,
        next: TicketStatus,
    ) -> Result<(), TicketError> {
        let session = self.require_admin(session)?;
        let _span = tracing::info_span!("transition_ticket", ticket_number, ?next).entered();

        let board = self.board().await?;
        let ticket = board
            .tickets
            .get(&ticket_number)
            .ok_or(TicketError::NotFound(ticket_number))?;
        if !ticket.status.can_transition_to(next) {
            return Err(TicketError::InvalidTransition {
                from: ticket.status,
                to: next,
            });
        }

        let update = TicketUpdate {
            ticket_number,
            status: Some(next),
            ..TicketUpdate::default()
        };
        self.append_update(&session.handle, &update).await?;
        Ok(())
    }

    /// Append a moderator comment to a ticket. Administrator only.
    ///
    /// # Errors
    ///
    /// [`TicketError::Unauthenticated`], [`TicketError::PermissionDenied`],
    /// [`TicketError::NotFound`], or [`TicketError::Store`].
    pub async fn comment(
        &self,
        session: Option<&Session>,
        ticket_number: u64,
        text: &str,
    ) -> Result<(), TicketError> {
        let session = self.require_admin(session)?;

        let board = self.board().await?;
        if !board.tickets.contains_key(&ticket_number) {
            return Err(TicketError::NotFound(ticket_number));
        }

        let update = TicketUpdate {
            ticket_number,
            comments: vec![TicketComment {
                author: session.handle.clone(),
                text: text.to_string(),
            }],
            ..TicketUpdate::default()
        };
        self.append_update(&session.handle, &update).await?;
        Ok(())
    }

    fn require_admin<'s>(&self, session: Option<&'s Session>) -> Result<&'s Session, TicketError> {
        let session = session.ok_or(TicketError::Unauthenticated)?;
        if session.handle != self.admin_handle {
            return Err(TicketError::PermissionDenied {
                handle: session.handle.clone(),
            });
        }
        Ok(session)
    }

    /// Claim the next ticket number by appending to the counter log.
    ///
    /// The counter is just another append-only record kind: `next` is the
    /// highest claimed value plus one. There is no compare-and-swap, so two
    /// racing submitters can claim the same number; the collision is
    /// accepted here and surfaced by [`TicketBoard::collisions`].
    async fn claim_next_number(&self, writer_id: &str) -> Result<u64, StoreError> {
        let high_water: CounterHighWater = load(&self.client, &self.namespace).await?;
        let next = high_water.max_claimed + 1;
        let payload = serde_json::to_value(CounterClaim { value: next })?;
        self.client
            .append(&self.namespace, TICKET_COUNTER_KIND, writer_id, &payload)
            .await?;
        Ok(next)
    }

    async fn append_update(
        &self,
        writer_id: &str,
        update: &TicketUpdate,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_value(update)?;
        self.client
            .append(&self.namespace, UPDATE_REQUEST_KIND, writer_id, &payload)
            .await?;
        Ok(())
    }
}
