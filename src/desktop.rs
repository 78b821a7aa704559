//! Desktop layout: whole-snapshot records and their last-write-wins fold.
//!
//! Every layout write carries the **entire** icon map and background color.
//! The fold keeps the most recent parseable snapshot and discards all others
//! wholesale, so two writers racing on different icons will silently lose
//! one writer's whole edit. That is the documented semantics of this record
//! kind, not a bug: callers changing one icon must read-modify-write the
//! full map (see [`update_layout`]), and must understand that a concurrent
//! peer's edit may be discarded (`StaleWrite` — observable only by the edit
//! disappearing, never actively detected).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::client::StoreClient;
use crate::error::StoreError;
use crate::projection::{Projection, load};
use crate::record::{DESKTOP_STATE_KIND, StoreRecord};

/// Position and visibility of one desktop icon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IconPlacement {
    /// Horizontal position in pixels.
    pub x: i32,
    /// Vertical position in pixels.
    pub y: i32,
    /// Whether the icon is shown on the desktop.
    pub visible: bool,
    /// Caption rendered under the icon.
    pub label: String,
}

/// Wire payload of a `desktop_state` record: the full snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct LayoutSnapshot {
    #[serde(default)]
    icons: BTreeMap<String, IconPlacement>,
    #[serde(default = "default_background")]
    background_color: String,
}

fn default_background() -> String {
    "#008080".to_string()
}

/// Projected desktop layout: the most recent parseable snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesktopLayout {
    /// All icons, keyed by icon ID.
    pub icons: BTreeMap<String, IconPlacement>,
    /// Desktop background color, CSS hex.
    pub background_color: String,
    /// `created_at` of the winning snapshot record; 0 when no record exists.
    pub last_modified: i64,
    /// Writer of the winning snapshot record; empty when no record exists.
    pub modified_by: String,
}

impl Default for DesktopLayout {
    fn default() -> Self {
        Self {
            icons: BTreeMap::new(),
            background_color: default_background(),
            last_modified: 0,
            modified_by: String::new(),
        }
    }
}

impl Projection for DesktopLayout {
    const NAME: &'static str = "desktop-layout";
    const RECORD_KIND: &'static str = DESKTOP_STATE_KIND;

    fn apply(&mut self, record: &StoreRecord) {
        // Whole-snapshot last-write-wins: each parseable record replaces the
        // entire state. Records are folded in ascending created_at order, so
        // after the fold this equals the most recent parseable snapshot.
        match serde_json::from_value::<LayoutSnapshot>(record.payload.clone()) {
            Ok(snapshot) => {
                self.icons = snapshot.icons;
                self.background_color = snapshot.background_color;
                self.last_modified = record.created_at;
                self.modified_by = record.writer_id.clone();
            }
            Err(e) => {
                tracing::debug!(record_id = %record.record_id, error = %e, "skipping malformed layout snapshot");
            }
        }
    }
}

impl DesktopLayout {
    fn snapshot(&self) -> LayoutSnapshot {
        LayoutSnapshot {
            icons: self.icons.clone(),
            background_color: self.background_color.clone(),
        }
    }
}

/// Load the current layout by folding all `desktop_state` records.
///
/// # Errors
///
/// Returns [`StoreError`] if the query fails.
pub async fn load_layout(client: &StoreClient, namespace: &str) -> Result<DesktopLayout, StoreError> {
    load(client, namespace).await
}

/// Append a new whole snapshot of `layout`.
///
/// # Errors
///
/// Returns [`StoreError`] if the append fails. A failed append leaves the
/// log unchanged; the caller retries manually.
pub async fn save_layout(
    client: &StoreClient,
    namespace: &str,
    writer_id: &str,
    layout: &DesktopLayout,
) -> Result<Uuid, StoreError> {
    let payload = serde_json::to_value(layout.snapshot())?;
    client
        .append(namespace, DESKTOP_STATE_KIND, writer_id, &payload)
        .await
}

/// Read-modify-write the full layout through a mutation closure.
///
/// Loads the current fold, applies `mutate`, and appends the result as a
/// whole snapshot. This is the only supported way to "change one icon": the
/// record format has no field-level merge, so a partial write would wipe
/// every other icon. A concurrent peer writing between our read and our
/// append will have its snapshot discarded by the fold (last write wins).
///
/// # Errors
///
/// Returns [`StoreError`] if the query or append fails.
pub async fn update_layout<F>(
    client: &StoreClient,
    namespace: &str,
    writer_id: &str,
    mutate: F,
) -> Result<DesktopLayout, StoreError>
where
    F: FnOnce(&mut DesktopLayout),
{
    let mut layout = load_layout(client, namespace).await?;
    mutate(&mut layout);
    save_layout(client, namespace, writer_id, &layout).await?;
    Ok(layout)
}
