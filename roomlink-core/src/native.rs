//! Native engine collaborator surface
//!
//! The real-time media engine (ICE, SDP, RTP, codecs) lives behind this trait.
//! The core only creates and releases native objects through it and forwards a
//! handful of per-object calls. Every asynchronous notification comes back
//! through the [`RoomObserver`] handed over in [`NativeRequest::Room`].
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


use roomlink_types::{DataTrackOptions, RawHandle, TrackId};
use thiserror::Error;

use crate::handle::ResourceKind;
use crate::room::RoomObserver;

/// Failure reported by a native call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct NativeError(pub String);

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        NativeError(message.into())
    }
}

/// Arguments for a native factory call
#[derive(Debug, Clone)]
pub enum NativeRequest {
    MediaFactory,
    RenderContext,
    AudioTrack {
        factory: RawHandle,
        id: TrackId,
        name: String,
        enabled: bool,
    },
    VideoTrack {
        factory: RawHandle,
        render_context: Option<RawHandle>,
        id: TrackId,
        name: String,
        enabled: bool,
    },
    DataTrack {
        factory: RawHandle,
        id: TrackId,
        options: DataTrackOptions,
    },
    Room {
        factory: RawHandle,
        name: String,
        observer: RoomObserver,
    },
}

impl NativeRequest {
    pub fn kind(&self) -> ResourceKind {
        match self {
            NativeRequest::MediaFactory => ResourceKind::MediaFactory,
            NativeRequest::RenderContext => ResourceKind::RenderContext,
            NativeRequest::AudioTrack { .. } => ResourceKind::AudioTrack,
            NativeRequest::VideoTrack { .. } => ResourceKind::VideoTrack,
            NativeRequest::DataTrack { .. } => ResourceKind::DataTrack,
            NativeRequest::Room { .. } => ResourceKind::Room,
        }
    }
}

/// Calls the core makes into the native engine.
///
/// Implementations must not block on network I/O: long-running work happens on
/// engine threads and reports back through the room observer.
pub trait NativeEngine: Send + Sync + 'static {
    /// Create a native object. Returning `0` signals failure.
    fn create(&self, request: NativeRequest) -> RawHandle;

    /// Destroy a native object. Called at most once per handle.
    fn release(&self, kind: ResourceKind, handle: RawHandle) -> Result<(), NativeError>;

    fn set_track_enabled(&self, track: RawHandle, enabled: bool) -> bool;

    fn send_data(&self, track: RawHandle, payload: &[u8]) -> Result<(), NativeError>;

    fn publish_track(&self, participant: RawHandle, track: RawHandle) -> bool;

    fn unpublish_track(&self, participant: RawHandle, track: RawHandle) -> bool;

    /// Begin an asynchronous disconnect; completion arrives as a room event.
    fn disconnect(&self, room: RawHandle);

    /// Begin an asynchronous stats collection; results arrive as a room event.
    fn request_stats(&self, room: RawHandle);
}
