//! Thin client for the document store, the second external collaborator.
//!
//! Documents are opaque content blobs keyed by `(owner_id, doc_id)` with an
//! update timestamp — the shell's own markup lives here and is re-fetched by
//! the browser on load. This wrapper exists so maintenance tooling performs
//! structured read-modify-write instead of hand-patching content in place.

use std::fmt;
use std::sync::Arc;

use tonic::transport::Channel;

use crate::error::StoreError;
use crate::proto;
use crate::proto::document_store_client::DocumentStoreClient;
use crate::record::now_ms;

/// A document blob as returned by [`DocClient::read`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Opaque content bytes. No schema beyond this.
    pub content: Vec<u8>,
    /// Last update time, unix milliseconds.
    pub updated_at: i64,
}

enum DocClientInner {
    /// gRPC channel to the document store service.
    Grpc(DocumentStoreClient<Channel>),
    /// In-process document table for tests and offline use.
    Memory(std::sync::Mutex<std::collections::HashMap<(String, String), Document>>),
}

/// Typed client for the document store.
///
/// Clone is cheap; the inner transport is `Arc`-wrapped and in-memory clones
/// share the same table.
#[derive(Clone)]
pub struct DocClient {
    inner: Arc<DocClientInner>,
}

impl fmt::Debug for DocClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variant = match *self.inner {
            DocClientInner::Grpc(_) => "Grpc",
            DocClientInner::Memory(_) => "Memory",
        };
        f.debug_struct("DocClient")
            .field("transport", &variant)
            .finish()
    }
}

impl DocClient {
    /// Connect to a document store gRPC server at the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Transport`] if the channel cannot be established.
    pub async fn connect(endpoint: &str) -> Result<Self, StoreError> {
        let client = DocumentStoreClient::connect(endpoint.to_string()).await?;
        Ok(Self {
            inner: Arc::new(DocClientInner::Grpc(client)),
        })
    }

    /// Create a client backed by an in-process document table.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(DocClientInner::Memory(Default::default())),
        }
    }

    /// Read a document.
    ///
    /// A document that has never been written returns `Ok(None)` rather than
    /// an error, since callers routinely probe for documents that may not
    /// exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on transport or server failure.
    pub async fn read(&self, owner_id: &str, doc_id: &str) -> Result<Option<Document>, StoreError> {
        match self.inner.as_ref() {
            DocClientInner::Grpc(c) => {
                let request = proto::ReadDocumentRequest {
                    owner_id: owner_id.to_string(),
                    doc_id: doc_id.to_string(),
                };
                match c.clone().read(request).await {
                    Ok(response) => {
                        let body = response.into_inner();
                        Ok(Some(Document {
                            content: body.content,
                            updated_at: body.updated_at_ms,
                        }))
                    }
                    Err(status) if status.code() == tonic::Code::NotFound => Ok(None),
                    Err(status) => Err(status.into()),
                }
            }
            DocClientInner::Memory(table) => Ok(table
                .lock()
                .expect("document table poisoned")
                .get(&(owner_id.to_string(), doc_id.to_string()))
                .cloned()),
        }
    }

    /// Write (replace) a document's content.
    ///
    /// # Returns
    ///
    /// The new update timestamp, unix milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on transport or server failure.
    pub async fn write(
        &self,
        owner_id: &str,
        doc_id: &str,
        content: Vec<u8>,
    ) -> Result<i64, StoreError> {
        match self.inner.as_ref() {
            DocClientInner::Grpc(c) => {
                let request = proto::WriteDocumentRequest {
                    owner_id: owner_id.to_string(),
                    doc_id: doc_id.to_string(),
                    content,
                };
                let response = c.clone().write(request).await?;
                Ok(response.into_inner().updated_at_ms)
            }
            DocClientInner::Memory(table) => {
                let updated_at = now_ms();
                table.lock().expect("document table poisoned").insert(
                    (owner_id.to_string(), doc_id.to_string()),
                    Document {
                        content,
                        updated_at,
                    },
                );
                Ok(updated_at)
            }
        }
    }
}
