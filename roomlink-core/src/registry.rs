//! Parent-owned entity collections
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::entity::ManagedEntity;
use crate::error::{LifecycleError, LifecycleResult};

/// Outcome of a bulk teardown
#[derive(Debug, Default)]
pub struct BulkRelease {
    /// Entries whose release was attempted
    pub attempted: usize,
    /// Identity and error of every entry that failed
    pub failures: Vec<(String, LifecycleError)>,
}

impl BulkRelease {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Fold the failures into a single error for the owning entity
    pub fn into_result(self, owner: &str) -> LifecycleResult<()> {
        if self.failures.is_empty() {
            return Ok(());
        }
        let reason = self
            .failures
            .iter()
            .map(|(id, e)| format!("{}: {}", id, e))
            .collect::<Vec<_>>()
            .join("; ");
        Err(LifecycleError::ReleaseFailed {
            entity: owner.to_string(),
            reason,
        })
    }
}

/// Insertion-ordered map from identity to entity.
///
/// Removing an entry releases it; [`detach`](Self::detach) hands the release
/// responsibility to the caller instead.
pub struct EntityRegistry<E: ManagedEntity> {
    label: String,
    entries: Mutex<IndexMap<E::Id, Arc<E>>>,
}

impl<E: ManagedEntity> EntityRegistry<E> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            entries: Mutex::new(IndexMap::new()),
        }
    }

    pub fn add(&self, entity: Arc<E>) -> LifecycleResult<()> {
        let mut entries = self.entries.lock();
        let id = entity.id().clone();
        if entries.contains_key(&id) {
            return Err(LifecycleError::DuplicateIdentity {
                identity: id.to_string(),
            });
        }
        debug!(registry = %self.label, id = %id, "Entity added");
        entries.insert(id, entity);
        Ok(())
    }

    /// Remove and release. `None` if the identity is not present, which is a
    /// normal outcome when teardown races.
    pub fn remove(&self, id: &E::Id) -> Option<Arc<E>> {
        let entity = self.detach(id)?;
        if let Err(e) = entity.release() {
            warn!(registry = %self.label, id = %id, error = %e, "Release on remove failed");
        }
        Some(entity)
    }

    /// Remove without releasing
    pub fn detach(&self, id: &E::Id) -> Option<Arc<E>> {
        let entity = self.entries.lock().shift_remove(id);
        if entity.is_some() {
            debug!(registry = %self.label, id = %id, "Entity removed");
        }
        entity
    }

    pub fn get(&self, id: &E::Id) -> Option<Arc<E>> {
        self.entries.lock().get(id).cloned()
    }

    pub fn contains(&self, id: &E::Id) -> bool {
        self.entries.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Entries in insertion order
    pub fn snapshot(&self) -> Vec<Arc<E>> {
        self.entries.lock().values().cloned().collect()
    }

    /// Release every entry exactly once.
    ///
    /// The collection is emptied under the lock and released outside it; a
    /// failing entry never stops the remaining ones.
    pub fn release_all(&self) -> BulkRelease {
        let drained: Vec<(E::Id, Arc<E>)> = self.entries.lock().drain(..).collect();
        let mut report = BulkRelease::default();

        for (id, entity) in drained {
            report.attempted += 1;
            if let Err(e) = entity.release() {
                report.failures.push((id.to_string(), e));
            }
        }

        if !report.is_clean() {
            error!(
                registry = %self.label,
                attempted = report.attempted,
                failed = report.failures.len(),
                "Bulk release finished with failures"
            );
        } else if report.attempted > 0 {
            debug!(registry = %self.label, released = report.attempted, "Bulk release finished");
        }
        report
    }
}
