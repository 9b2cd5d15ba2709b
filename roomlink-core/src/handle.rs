//! Native handles
//!
//! A [`Handle`] names exactly one native object. It is move-only and can never
//! be zero, so "not created" is unrepresentable. [`NativeResource`] owns a
//! handle and guarantees exactly one native teardown per successful creation.
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
use roomlink_types::RawHandle;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{LifecycleError, LifecycleResult};
use crate::native::{NativeEngine, NativeRequest};

/// Kind of native object behind a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    MediaFactory,
    RenderContext,
    AudioTrack,
    VideoTrack,
    DataTrack,
    RemoteTrack,
    Room,
    LocalParticipant,
    RemoteParticipant,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::MediaFactory => "media factory",
            ResourceKind::RenderContext => "render context",
            ResourceKind::AudioTrack => "audio track",
            ResourceKind::VideoTrack => "video track",
            ResourceKind::DataTrack => "data track",
            ResourceKind::RemoteTrack => "remote track",
            ResourceKind::Room => "room",
            ResourceKind::LocalParticipant => "local participant",
            ResourceKind::RemoteParticipant => "remote participant",
        };
        f.write_str(name)
    }
}

/// Opaque, non-zero native handle. Deliberately not `Clone`, `Copy` or `Default`.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Handle(NonZeroU64);

impl Handle {
    /// Wrap a raw value returned by the engine; zero yields `None`
    pub fn from_raw(raw: RawHandle) -> Option<Self> {
        NonZeroU64::new(raw).map(Handle)
    }

    pub fn raw(&self) -> RawHandle {
        self.0.get()
    }
}

/// One externally-owned native object
pub struct NativeResource {
    kind: ResourceKind,
    engine: Arc<dyn NativeEngine>,
    handle: Mutex<Option<Handle>>,
}

impl NativeResource {
    /// Ask the engine to create an object. A zero handle is a `CreationFailure`;
    /// nothing is retried.
    pub fn create(engine: Arc<dyn NativeEngine>, request: NativeRequest) -> LifecycleResult<Self> {
        let kind = request.kind();
        let raw = engine.create(request);
        let handle = Handle::from_raw(raw).ok_or_else(|| LifecycleError::CreationFailure {
            kind,
            reason: "native engine returned a null handle".to_string(),
        })?;
        debug!(kind = %kind, handle = raw, "Native resource created");
        Ok(Self::from_handle(engine, kind, handle))
    }

    /// Take ownership of a handle the engine created on its own, e.g. a
    /// participant announced in a room event.
    pub fn adopt(engine: Arc<dyn NativeEngine>, kind: ResourceKind, raw: RawHandle) -> LifecycleResult<Self> {
        let handle = Handle::from_raw(raw).ok_or_else(|| LifecycleError::CreationFailure {
            kind,
            reason: "native event carried a null handle".to_string(),
        })?;
        debug!(kind = %kind, handle = raw, "Native resource adopted");
        Ok(Self::from_handle(engine, kind, handle))
    }

    fn from_handle(engine: Arc<dyn NativeEngine>, kind: ResourceKind, handle: Handle) -> Self {
        Self {
            kind,
            engine,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn is_released(&self) -> bool {
        self.handle.lock().is_none()
    }

    /// Raw value for passing into another native request
    pub fn raw(&self) -> LifecycleResult<RawHandle> {
        self.handle
            .lock()
            .as_ref()
            .map(Handle::raw)
            .ok_or(LifecycleError::UseAfterRelease { kind: self.kind })
    }

    /// Run a native call against the live handle.
    ///
    /// The handle lock is held for the duration of `f`, so a concurrent
    /// `release` cannot tear the object down mid-call.
    pub fn with_handle<T>(&self, f: impl FnOnce(&dyn NativeEngine, RawHandle) -> T) -> LifecycleResult<T> {
        let guard = self.handle.lock();
        match guard.as_ref() {
            Some(handle) => Ok(f(self.engine.as_ref(), handle.raw())),
            None => Err(LifecycleError::UseAfterRelease { kind: self.kind }),
        }
    }

    /// Release the native object.
    ///
    /// Returns `Ok(true)` when this call performed the teardown and `Ok(false)`
    /// when the handle was already gone. A failing native teardown still leaves
    /// the handle released.
    pub fn release(&self) -> LifecycleResult<bool> {
        let taken = self.handle.lock().take();
        match taken {
            Some(handle) => {
                let raw = handle.raw();
                debug!(kind = %self.kind, handle = raw, "Releasing native resource");
                self.engine.release(self.kind, raw)?;
                Ok(true)
            }
            None => {
                warn!(kind = %self.kind, "Native resource released more than once");
                Ok(false)
            }
        }
    }
}

impl fmt::Debug for NativeResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeResource")
            .field("kind", &self.kind)
            .field("handle", &*self.handle.lock())
            .finish()
    }
}

impl Drop for NativeResource {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            debug!(kind = %self.kind, handle = handle.raw(), "Releasing native resource on drop");
            if let Err(e) = self.engine.release(self.kind, handle.raw()) {
                warn!(kind = %self.kind, error = %e, "Native release on drop failed");
            }
        }
    }
}
