//! Shares one answer engine per document across concurrent sessions.
//!
//! Building an engine reads and indexes the whole document, so sessions on the
//! same document wait on a single build. Each session holds an [`EngineLease`];
//! when the last lease for an engine is returned the engine is dropped from the
//! cache and released. Failed or panicking builds are not cached.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use tokio::sync::OnceCell;

use super::engine::{AnswerEngine, AnswerEngineFactory, ConstructionError};
use crate::documents::DocumentId;

struct Slot {
    cell: OnceCell<Arc<dyn AnswerEngine>>,
    // Only changed while `EngineCache::entries` is locked.
    leases: AtomicUsize,
}

/// A session's claim on a shared engine. Hand it back with [`EngineCache::release`].
pub struct EngineLease {
    document_id: DocumentId,
    slot: Arc<Slot>,
    engine: Arc<dyn AnswerEngine>,
}

impl EngineLease {
    pub fn engine(&self) -> &Arc<dyn AnswerEngine> {
        &self.engine
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }
}

pub struct EngineCache {
    factory: Arc<dyn AnswerEngineFactory>,
    entries: Mutex<HashMap<DocumentId, Arc<Slot>>>,
}

impl EngineCache {
    pub fn new(factory: Arc<dyn AnswerEngineFactory>) -> Self {
        Self {
            factory,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<DocumentId, Arc<Slot>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the cached engine for `document_id`, building it from `artifact`
    /// if no live engine exists. Concurrent callers share one build.
    pub async fn acquire(
        &self,
        document_id: &DocumentId,
        artifact: &Path,
    ) -> Result<EngineLease, ConstructionError> {
        let slot = {
            let mut entries = self.entries();
            let slot = entries
                .entry(document_id.clone())
                .or_insert_with(|| {
                    Arc::new(Slot {
                        cell: OnceCell::new(),
                        leases: AtomicUsize::new(0),
                    })
                })
                .clone();
            slot.leases.fetch_add(1, Ordering::Relaxed);
            slot
        };

        let built = slot
            .cell
            .get_or_try_init(|| async {
                tracing::info!(document_id = %document_id, "building answer engine");
                AssertUnwindSafe(self.factory.construct(artifact))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        tracing::error!(document_id = %document_id, "answer engine build panicked");
                        Err(ConstructionError::Backend(
                            "answer engine construction panicked".to_string(),
                        ))
                    })
            })
            .await
            .cloned();

        match built {
            Ok(engine) => Ok(EngineLease {
                document_id: document_id.clone(),
                slot,
                engine,
            }),
            Err(err) => {
                self.detach(document_id, &slot);
                Err(err)
            }
        }
    }

    /// Returns a lease. Releases the engine if this was its last lease; release
    /// errors are logged and swallowed.
    pub async fn release(&self, lease: EngineLease) {
        let EngineLease {
            document_id,
            slot,
            engine,
        } = lease;

        if !self.detach(&document_id, &slot) {
            return;
        }

        tracing::debug!(document_id = %document_id, "releasing answer engine");
        if let Err(err) = engine.release().await {
            tracing::warn!(document_id = %document_id, "Answer engine release failed: {}", err);
        }
    }

    /// Forgets the cached engine for `document_id`. Sessions already holding a
    /// lease keep using it; the next `acquire` builds a fresh one.
    pub fn invalidate(&self, document_id: &DocumentId) -> bool {
        self.entries().remove(document_id).is_some()
    }

    pub fn cached_documents(&self) -> usize {
        self.entries().len()
    }

    pub fn lease_count(&self, document_id: &DocumentId) -> usize {
        self.entries()
            .get(document_id)
            .map(|slot| slot.leases.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Drops one lease; true when it was the last one for `slot`.
    fn detach(&self, document_id: &DocumentId, slot: &Arc<Slot>) -> bool {
        let mut entries = self.entries();
        let remaining = slot.leases.fetch_sub(1, Ordering::Relaxed) - 1;
        if remaining > 0 {
            return false;
        }

        let current = entries
            .get(document_id)
            .map(|cached| Arc::ptr_eq(cached, slot))
            .unwrap_or(false);
        if current {
            entries.remove(document_id);
        }
        true
    }
}
