//! Managed entity lifecycle
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


use parking_lot::Mutex;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{LifecycleError, LifecycleResult};

/// Entity lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    /// Handle obtained, not yet handed out
    Created,
    /// Usable
    Active,
    /// Terminal
    Released,
}

/// Anything whose native resources can be released
pub trait Releasable: Send + Sync {
    /// Release everything the entity owns. Idempotent: only the first call
    /// performs teardown, later calls return `Ok(())`.
    fn release(&self) -> LifecycleResult<()>;

    fn is_released(&self) -> bool;
}

/// An entity that lives in an [`crate::registry::EntityRegistry`]
pub trait ManagedEntity: Releasable {
    type Id: Clone + Eq + Hash + Display + Send + Sync;

    fn id(&self) -> &Self::Id;
}

/// State cell shared by every managed entity.
///
/// The lock is held across `with_active`, so a compound "if not released,
/// then call native" cannot interleave with `begin_release`.
pub struct Lifecycle {
    label: String,
    state: Mutex<EntityState>,
}

impl Lifecycle {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: Mutex::new(EntityState::Created),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> EntityState {
        *self.state.lock()
    }

    pub fn is_released(&self) -> bool {
        self.state() == EntityState::Released
    }

    pub fn activate(&self) -> LifecycleResult<()> {
        let mut state = self.state.lock();
        match *state {
            EntityState::Created => {
                *state = EntityState::Active;
                debug!(entity = %self.label, "Entity active");
                Ok(())
            }
            EntityState::Active => Ok(()),
            EntityState::Released => Err(LifecycleError::already_released(&self.label)),
        }
    }

    pub fn ensure_active(&self) -> LifecycleResult<()> {
        if self.is_released() {
            return Err(LifecycleError::already_released(&self.label));
        }
        Ok(())
    }

    /// Run `f` only if the entity is not released, holding the entity lock
    /// for the whole call. `f` must not release this same entity.
    pub fn with_active<T>(&self, f: impl FnOnce() -> LifecycleResult<T>) -> LifecycleResult<T> {
        let state = self.state.lock();
        if *state == EntityState::Released {
            return Err(LifecycleError::already_released(&self.label));
        }
        let result = f();
        drop(state);
        result
    }

    /// Mark the entity released. `true` exactly once; later calls log a warning.
    pub fn begin_release(&self) -> bool {
        let mut state = self.state.lock();
        if *state == EntityState::Released {
            warn!(entity = %self.label, "Entity released more than once");
            return false;
        }
        *state = EntityState::Released;
        debug!(entity = %self.label, "Entity releasing");
        true
    }
}

/// Collects failures across the steps of one entity's teardown so that every
/// step runs even if an earlier one fails.
pub(crate) struct Teardown {
    entity: String,
    failures: Vec<String>,
}

impl Teardown {
    pub(crate) fn new(entity: &str) -> Self {
        Self {
            entity: entity.to_string(),
            failures: Vec::new(),
        }
    }

    pub(crate) fn step<T>(&mut self, what: &str, result: LifecycleResult<T>) {
        if let Err(e) = result {
            warn!(entity = %self.entity, step = what, error = %e, "Teardown step failed");
            self.failures.push(format!("{}: {}", what, e));
        }
    }

    pub(crate) fn finish(self) -> LifecycleResult<()> {
        if self.failures.is_empty() {
            debug!(entity = %self.entity, "Entity released");
            return Ok(());
        }
        Err(LifecycleError::ReleaseFailed {
            entity: self.entity,
            reason: self.failures.join("; "),
        })
    }
}

/// Releases the wrapped entity when dropped.
///
/// Used when an entity is detached from its registry, handed to a listener,
/// and must be released once the callback returns, including the case where
/// the callback is dropped without running.
pub struct ReleaseGuard<E: Releasable + ?Sized> {
    entity: Arc<E>,
}

impl<E: Releasable + ?Sized> ReleaseGuard<E> {
    pub fn new(entity: Arc<E>) -> Self {
        Self { entity }
    }

    pub fn entity(&self) -> &Arc<E> {
        &self.entity
    }
}

impl<E: Releasable + ?Sized> Drop for ReleaseGuard<E> {
    fn drop(&mut self) {
        if let Err(e) = self.entity.release() {
            warn!(error = %e, "Deferred release failed");
        }
    }
}
