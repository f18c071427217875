//! Whole-document JSON store
//!
//! The entire state of the shop lives in one [`StoreDocument`]: read
//! whole at startup, replaced whole on each coordinated save. There
//! are no field-level transactions; consistency comes from the
//! closure-based access below plus the single-flight writer in
//! [`persist`].
//!
//! # Locking discipline
//!
//! `read`/`write` take a synchronous closure and drop the guard before
//! returning. Callers must never await while inside the closure: every
//! check-then-mutate sequence on shared state (stock re-check + pop,
//! order existence-check + remove) relies on running without a
//! suspension point in between.

mod persist;

pub use persist::PersistCoordinator;

use parking_lot::RwLock;
use shared::StoreDocument;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Shared handle to the in-memory store document.
///
/// Cheap to clone (Arc inside); all components read through it, the
/// persist coordinator is the only writer to disk.
#[derive(Debug, Clone)]
pub struct Store {
    doc: Arc<RwLock<StoreDocument>>,
    path: PathBuf,
}

impl Store {
    /// Open the store file, creating an empty document if the file
    /// does not exist yet.
    ///
    /// Accepts both the bare document layout and the legacy
    /// `{"data": {...}}` wrapper; always writes bare.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let doc = match std::fs::read_to_string(&path) {
            Ok(raw) => Self::parse_document(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Store file not found, starting empty");
                StoreDocument::default()
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            path = %path.display(),
            products = doc.products.len(),
            orders = doc.orders.len(),
            ledger = doc.ledger.len(),
            "Store loaded"
        );

        Ok(Self {
            doc: Arc::new(RwLock::new(doc)),
            path,
        })
    }

    fn parse_document(raw: &str) -> Result<StoreDocument, StoreError> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let inner = match value.get("data") {
            Some(data) if data.is_object() => data.clone(),
            _ => value,
        };
        Ok(serde_json::from_value(inner)?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read access. The closure must not await.
    pub fn read<R>(&self, f: impl FnOnce(&StoreDocument) -> R) -> R {
        f(&self.doc.read())
    }

    /// Write access. The closure must not await.
    pub fn write<R>(&self, f: impl FnOnce(&mut StoreDocument) -> R) -> R {
        f(&mut self.doc.write())
    }

    /// Serialize the current document for persistence.
    pub fn serialize(&self) -> Result<String, StoreError> {
        let doc = self.doc.read();
        Ok(serde_json::to_string_pretty(&*doc)?)
    }
}
