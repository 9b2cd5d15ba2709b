//! Roomlink Core
//!
//! Native-resource lifecycle for the Roomlink media SDK:
//! - Move-only native handles with exactly-once release
//! - Reference-counted shared factories, constructed on first use
//! - Callback delivery onto one designated thread per listener
//! - Rooms, participants and tracks that release their children first
//!
//! All native work goes through a [`NativeEngine`]; [`LoopbackEngine`] is an
//! in-process implementation for tests and demos.
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


pub mod error;
pub mod handle;
pub mod native;
pub mod singleton;
pub mod dispatcher;
pub mod entity;
pub mod registry;
pub mod runtime;
pub mod track;
pub mod local_media;
pub mod participant;
pub mod room;
pub mod loopback;

// Re-export main types
pub use error::{LifecycleError, LifecycleResult};
pub use handle::{Handle, NativeResource, ResourceKind};
pub use native::{NativeEngine, NativeError, NativeRequest};
pub use singleton::{OwnerToken, RefCountedSingleton, ReleaseOutcome, SharedNative, SingletonLease};
pub use dispatcher::{CallbackBinding, CallbackHandle, CallbackThread};
pub use entity::{EntityState, Lifecycle, ManagedEntity, Releasable, ReleaseGuard};
pub use registry::{BulkRelease, EntityRegistry};
pub use runtime::{MediaFactory, MediaRuntime, RenderContext, RuntimeOptions};
pub use track::{LocalTrack, LocalTrackRequest, RemoteTrack};
pub use local_media::LocalMedia;
pub use participant::{LocalParticipant, RemoteParticipant, RemoteParticipantListener};
pub use room::{ConnectOptions, Room, RoomListener, RoomObserver, RoomState};
pub use loopback::LoopbackEngine;
