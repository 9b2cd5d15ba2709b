//! Reference-counted shared native objects
//!
//! Used for the media factory and the shared render context: one native object
//! per runtime, built on the first acquire and destroyed on the last release.
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
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::LifecycleResult;

/// A shared native object that knows how to tear itself down
pub trait SharedNative: Send + Sync + 'static {
    /// Called exactly once, on the 1→0 transition
    fn destroy(&self) -> LifecycleResult<()>;
}

/// Bookkeeping identity of whoever holds a reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerToken(String);

impl OwnerToken {
    pub fn new(name: impl Into<String>) -> Self {
        OwnerToken(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OwnerToken {
    fn from(name: &str) -> Self {
        OwnerToken::new(name)
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a `release` call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Other owners still hold references
    Retained { remaining: usize },
    /// Last reference dropped; the native object was destroyed
    Destroyed,
    /// Count was already zero. Clamped; always a caller bookkeeping bug.
    Underflow,
}

struct SingletonState<T> {
    instance: Option<Arc<T>>,
    count: usize,
    owners: HashMap<OwnerToken, usize>,
    constructed: u64,
    destroyed: u64,
    underflows: u64,
}

type Constructor<T> = Box<dyn Fn() -> LifecycleResult<T> + Send + Sync>;

/// Lazily constructed, reference-counted holder.
///
/// All transitions happen under one mutex, so concurrent acquire/release can
/// never double-construct or double-destroy.
pub struct RefCountedSingleton<T: SharedNative> {
    name: &'static str,
    constructor: Constructor<T>,
    state: Mutex<SingletonState<T>>,
}

impl<T: SharedNative> RefCountedSingleton<T> {
    pub fn new<F>(name: &'static str, constructor: F) -> Self
    where
        F: Fn() -> LifecycleResult<T> + Send + Sync + 'static,
    {
        Self {
            name,
            constructor: Box::new(constructor),
            state: Mutex::new(SingletonState {
                instance: None,
                count: 0,
                owners: HashMap::new(),
                constructed: 0,
                destroyed: 0,
                underflows: 0,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Take a reference, constructing the instance on the 0→1 transition.
    ///
    /// A failed construction leaves the count at zero.
    pub fn acquire(&self, owner: &OwnerToken) -> LifecycleResult<Arc<T>> {
        let mut state = self.state.lock();
        let instance = if let Some(instance) = state.instance.clone() {
            instance
        } else {
            let instance = Arc::new((self.constructor)()?);
            state.constructed += 1;
            state.instance = Some(instance.clone());
            debug!(singleton = self.name, owner = %owner, "Shared instance constructed");
            instance
        };
        state.count += 1;
        *state.owners.entry(owner.clone()).or_insert(0) += 1;
        debug!(singleton = self.name, owner = %owner, count = state.count, "Acquired");
        Ok(instance)
    }

    /// Drop a reference, destroying the instance on the 1→0 transition.
    pub fn release(&self, owner: &OwnerToken) -> ReleaseOutcome {
        let mut state = self.state.lock();
        if state.count == 0 {
            state.underflows += 1;
            warn!(singleton = self.name, owner = %owner, "Release without matching acquire; count clamped at zero");
            return ReleaseOutcome::Underflow;
        }

        match state.owners.get_mut(owner) {
            Some(held) => {
                *held -= 1;
                if *held == 0 {
                    state.owners.remove(owner);
                }
            }
            None => {
                warn!(singleton = self.name, owner = %owner, "Released by an owner holding no reference");
            }
        }

        state.count -= 1;
        if state.count > 0 {
            debug!(singleton = self.name, owner = %owner, count = state.count, "Released");
            return ReleaseOutcome::Retained {
                remaining: state.count,
            };
        }

        state.destroyed += 1;
        state.owners.clear();
        if let Some(instance) = state.instance.take() {
            if let Err(e) = instance.destroy() {
                warn!(singleton = self.name, error = %e, "Shared instance teardown failed");
            }
        }
        debug!(singleton = self.name, owner = %owner, "Shared instance destroyed");
        ReleaseOutcome::Destroyed
    }

    pub fn count(&self) -> usize {
        self.state.lock().count
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().instance.is_some()
    }

    pub fn constructed(&self) -> u64 {
        self.state.lock().constructed
    }

    pub fn destroyed(&self) -> u64 {
        self.state.lock().destroyed
    }

    /// Number of clamped releases observed so far
    pub fn underflows(&self) -> u64 {
        self.state.lock().underflows
    }

    /// Outstanding references per owner, sorted by owner
    pub fn owners(&self) -> Vec<(OwnerToken, usize)> {
        let mut owners: Vec<_> = self
            .state
            .lock()
            .owners
            .iter()
            .map(|(owner, held)| (owner.clone(), *held))
            .collect();
        owners.sort();
        owners
    }

    /// Acquire a reference wrapped in a lease that releases exactly once
    pub fn lease(self: &Arc<Self>, owner: OwnerToken) -> LifecycleResult<SingletonLease<T>> {
        let instance = self.acquire(&owner)?;
        Ok(SingletonLease {
            singleton: self.clone(),
            owner,
            instance,
            released: AtomicBool::new(false),
        })
    }
}

/// One owner's reference to a [`RefCountedSingleton`].
///
/// `release` is idempotent and dropping an unreleased lease releases it.
pub struct SingletonLease<T: SharedNative> {
    singleton: Arc<RefCountedSingleton<T>>,
    owner: OwnerToken,
    instance: Arc<T>,
    released: AtomicBool,
}

impl<T: SharedNative> SingletonLease<T> {
    pub fn get(&self) -> &Arc<T> {
        &self.instance
    }

    pub fn owner(&self) -> &OwnerToken {
        &self.owner
    }

    /// `None` when this lease was already released
    pub fn release(&self) -> Option<ReleaseOutcome> {
        if self.released.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(self.singleton.release(&self.owner))
    }
}

impl<T: SharedNative> Drop for SingletonLease<T> {
    fn drop(&mut self) {
        self.release();
    }
}
