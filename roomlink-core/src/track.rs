//! Local and remote media tracks
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
use roomlink_types::{DataTrackOptions, Origin, RawHandle, TrackId, TrackKind, TrackPublication, TrackSid};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::entity::{Lifecycle, ManagedEntity, Releasable, Teardown};
use crate::error::{LifecycleError, LifecycleResult};
use crate::handle::{NativeResource, ResourceKind};
use crate::native::{NativeEngine, NativeRequest};
use crate::runtime::{MediaFactory, MediaRuntime, RenderContext};
use crate::singleton::{OwnerToken, SingletonLease};

/// What kind of local track to create
#[derive(Debug, Clone)]
pub enum LocalTrackRequest {
    Audio { enabled: bool, name: Option<String> },
    Video { enabled: bool, name: Option<String> },
    Data(DataTrackOptions),
}

impl LocalTrackRequest {
    pub fn kind(&self) -> TrackKind {
        match self {
            LocalTrackRequest::Audio { .. } => TrackKind::Audio,
            LocalTrackRequest::Video { .. } => TrackKind::Video,
            LocalTrackRequest::Data(_) => TrackKind::Data,
        }
    }
}

/// A track produced on this device.
///
/// Holds its own native handle plus a lease on the media factory, and for
/// video a lease on the shared render context when the runtime shares one.
pub struct LocalTrack {
    id: TrackId,
    name: String,
    kind: TrackKind,
    data_options: Option<DataTrackOptions>,
    enabled: Mutex<bool>,
    lifecycle: Lifecycle,
    native: NativeResource,
    render_context: Option<SingletonLease<RenderContext>>,
    factory: SingletonLease<MediaFactory>,
}

impl LocalTrack {
    /// Create the native track. On failure every lease taken so far is
    /// returned before the error propagates.
    pub fn create(runtime: &MediaRuntime, request: LocalTrackRequest) -> LifecycleResult<Arc<Self>> {
        if let LocalTrackRequest::Data(options) = &request {
            options.validate()?;
        }

        let id = TrackId::generate();
        let kind = request.kind();
        let owner = OwnerToken::new(format!("{}_track:{}", kind, id));

        let factory = runtime.lease_media_factory(owner.clone())?;
        let render_context = if kind == TrackKind::Video && runtime.options().share_render_context {
            Some(runtime.lease_render_context(owner)?)
        } else {
            None
        };

        let factory_raw = factory.get().raw()?;
        let (native_request, name, enabled, data_options) = match request {
            LocalTrackRequest::Audio { enabled, name } => {
                let name = name.unwrap_or_else(|| id.to_string());
                let native_request = NativeRequest::AudioTrack {
                    factory: factory_raw,
                    id: id.clone(),
                    name: name.clone(),
                    enabled,
                };
                (native_request, name, enabled, None)
            }
            LocalTrackRequest::Video { enabled, name } => {
                let render_raw = match &render_context {
                    Some(lease) => Some(lease.get().raw()?),
                    None => None,
                };
                let name = name.unwrap_or_else(|| id.to_string());
                let native_request = NativeRequest::VideoTrack {
                    factory: factory_raw,
                    render_context: render_raw,
                    id: id.clone(),
                    name: name.clone(),
                    enabled,
                };
                (native_request, name, enabled, None)
            }
            LocalTrackRequest::Data(options) => {
                let name = options.name.clone().unwrap_or_else(|| id.to_string());
                let native_request = NativeRequest::DataTrack {
                    factory: factory_raw,
                    id: id.clone(),
                    options: options.clone(),
                };
                (native_request, name, true, Some(options))
            }
        };

        let native = NativeResource::create(runtime.engine().clone(), native_request)?;
        let track = Self {
            lifecycle: Lifecycle::new(format!("{} track {}", kind, name)),
            id,
            name,
            kind,
            data_options,
            enabled: Mutex::new(enabled),
            native,
            render_context,
            factory,
        };
        track.lifecycle.activate()?;
        debug!(track_id = %track.id, kind = %kind, "Local track created");
        Ok(Arc::new(track))
    }

    pub fn id(&self) -> &TrackId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn origin(&self) -> Origin {
        Origin::Local
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.lock()
    }

    pub fn data_options(&self) -> Option<&DataTrackOptions> {
        self.data_options.as_ref()
    }

    /// Enable or disable the track. Returns whether the engine applied it.
    pub fn enable(&self, enabled: bool) -> LifecycleResult<bool> {
        if self.kind == TrackKind::Data {
            return Err(LifecycleError::Unsupported("data tracks cannot be disabled".to_string()));
        }
        self.lifecycle.with_active(|| {
            let applied = self
                .native
                .with_handle(|engine, raw| engine.set_track_enabled(raw, enabled))?;
            if applied {
                *self.enabled.lock() = enabled;
            }
            Ok(applied)
        })
    }

    /// Send a binary message over a data track
    pub fn send(&self, payload: &[u8]) -> LifecycleResult<()> {
        if self.kind != TrackKind::Data {
            return Err(LifecycleError::Unsupported(format!(
                "send on a {} track",
                self.kind
            )));
        }
        self.lifecycle.with_active(|| {
            self.native
                .with_handle(|engine, raw| engine.send_data(raw, payload))?
                .map_err(LifecycleError::from)
        })
    }

    pub fn send_text(&self, message: &str) -> LifecycleResult<()> {
        self.send(message.as_bytes())
    }

    pub(crate) fn raw(&self) -> LifecycleResult<RawHandle> {
        self.lifecycle.ensure_active()?;
        self.native.raw()
    }
}

impl Releasable for LocalTrack {
    fn release(&self) -> LifecycleResult<()> {
        if !self.lifecycle.begin_release() {
            return Ok(());
        }
        let mut teardown = Teardown::new(self.lifecycle.label());
        teardown.step("native track", self.native.release());
        if let Some(lease) = &self.render_context {
            lease.release();
        }
        self.factory.release();
        teardown.finish()
    }

    fn is_released(&self) -> bool {
        self.lifecycle.is_released()
    }
}

impl ManagedEntity for LocalTrack {
    type Id = TrackId;

    fn id(&self) -> &TrackId {
        &self.id
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("state", &self.lifecycle.state())
            .finish()
    }
}

/// A track received from a remote participant
pub struct RemoteTrack {
    sid: TrackSid,
    name: String,
    kind: TrackKind,
    playback_enabled: Mutex<bool>,
    lifecycle: Lifecycle,
    native: NativeResource,
}

impl RemoteTrack {
    /// Take ownership of the native track carried by a subscription event
    pub fn adopt(
        engine: Arc<dyn NativeEngine>,
        publication: &TrackPublication,
        raw: RawHandle,
    ) -> LifecycleResult<Arc<Self>> {
        let native = NativeResource::adopt(engine, ResourceKind::RemoteTrack, raw)?;
        let track = Self {
            sid: publication.sid.clone(),
            name: publication.name.clone(),
            kind: publication.kind,
            playback_enabled: Mutex::new(true),
            lifecycle: Lifecycle::new(format!("remote {} track {}", publication.kind, publication.sid)),
            native,
        };
        track.lifecycle.activate()?;
        Ok(Arc::new(track))
    }

    pub fn sid(&self) -> &TrackSid {
        &self.sid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn origin(&self) -> Origin {
        Origin::Remote
    }

    pub fn is_playback_enabled(&self) -> bool {
        *self.playback_enabled.lock()
    }

    pub fn set_playback_enabled(&self, enabled: bool) -> LifecycleResult<bool> {
        if self.kind == TrackKind::Data {
            return Err(LifecycleError::Unsupported("data tracks have no playback".to_string()));
        }
        self.lifecycle.with_active(|| {
            let applied = self
                .native
                .with_handle(|engine, raw| engine.set_track_enabled(raw, enabled))?;
            if applied {
                *self.playback_enabled.lock() = enabled;
            }
            Ok(applied)
        })
    }
}

impl Releasable for RemoteTrack {
    fn release(&self) -> LifecycleResult<()> {
        if !self.lifecycle.begin_release() {
            return Ok(());
        }
        let mut teardown = Teardown::new(self.lifecycle.label());
        teardown.step("native track", self.native.release());
        teardown.finish()
    }

    fn is_released(&self) -> bool {
        self.lifecycle.is_released()
    }
}

impl ManagedEntity for RemoteTrack {
    type Id = TrackSid;

    fn id(&self) -> &TrackSid {
        &self.sid
    }
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("sid", &self.sid)
            .field("kind", &self.kind)
            .field("state", &self.lifecycle.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackEngine;
    use crate::runtime::RuntimeOptions;

    fn runtime() -> (Arc<LoopbackEngine>, Arc<MediaRuntime>) {
        let engine = Arc::new(LoopbackEngine::new());
        let runtime = MediaRuntime::new(engine.clone());
        (engine, runtime)
    }

    fn audio(name: &str) -> LocalTrackRequest {
        LocalTrackRequest::Audio {
            enabled: true,
            name: Some(name.to_string()),
        }
    }

    #[test]
    fn test_audio_track_holds_factory_only() {
        let (engine, runtime) = runtime();
        let track = LocalTrack::create(&runtime, audio("mic")).unwrap();
        assert_eq!(track.name(), "mic");
        assert_eq!(track.kind(), TrackKind::Audio);
        assert_eq!(runtime.media_factory_count(), 1);
        assert_eq!(runtime.render_context_count(), 0);

        track.release().unwrap();
        assert_eq!(runtime.media_factory_count(), 0);
        assert_eq!(engine.released(ResourceKind::AudioTrack), 1);
        assert_eq!(engine.released(ResourceKind::MediaFactory), 1);
    }

    #[test]
    fn test_video_track_shares_render_context() {
        let (engine, runtime) = runtime();
        let front = LocalTrack::create(&runtime, LocalTrackRequest::Video { enabled: true, name: None }).unwrap();
        let back = LocalTrack::create(&runtime, LocalTrackRequest::Video { enabled: false, name: None }).unwrap();
        assert_eq!(runtime.render_context_count(), 2);
        assert_eq!(engine.created(ResourceKind::RenderContext), 1);
        assert!(!back.is_enabled());

        front.release().unwrap();
        assert_eq!(runtime.render_context_count(), 1);
        back.release().unwrap();
        assert_eq!(engine.live(ResourceKind::RenderContext), 0);
    }

    #[test]
    fn test_video_without_shared_context() {
        let engine = Arc::new(LoopbackEngine::new());
        let runtime = MediaRuntime::with_options(
            engine.clone(),
            RuntimeOptions {
                share_render_context: false,
            },
        );
        let track = LocalTrack::create(&runtime, LocalTrackRequest::Video { enabled: true, name: None }).unwrap();
        assert_eq!(engine.created(ResourceKind::RenderContext), 0);
        track.release().unwrap();
    }

    #[test]
    fn test_failed_creation_returns_leases() {
        let (engine, runtime) = runtime();
        engine.fail_next_creation(ResourceKind::VideoTrack);

        let result = LocalTrack::create(&runtime, LocalTrackRequest::Video { enabled: true, name: None });
        assert!(matches!(result, Err(LifecycleError::CreationFailure { .. })));
        assert_eq!(runtime.media_factory_count(), 0);
        assert_eq!(runtime.render_context_count(), 0);
        assert_eq!(engine.live(ResourceKind::MediaFactory), 0);
        assert_eq!(engine.live(ResourceKind::RenderContext), 0);
    }

    #[test]
    fn test_double_release_is_single_native_release() {
        let (engine, runtime) = runtime();
        let track = LocalTrack::create(&runtime, audio("mic")).unwrap();
        track.release().unwrap();
        track.release().unwrap();
        assert_eq!(engine.released(ResourceKind::AudioTrack), 1);
        assert_eq!(engine.invalid_releases(), 0);
        assert_eq!(runtime.underflows(), 0);
    }

    #[test]
    fn test_enable_after_release_fails() {
        let (engine, runtime) = runtime();
        let track = LocalTrack::create(&runtime, audio("mic")).unwrap();
        assert!(track.enable(false).unwrap());
        assert!(!track.is_enabled());
        assert_eq!(engine.is_enabled(track.raw().unwrap()), Some(false));

        track.release().unwrap();
        assert!(matches!(track.enable(true), Err(LifecycleError::AlreadyReleased { .. })));
    }

    #[test]
    fn test_data_track_send() {
        let (engine, runtime) = runtime();
        let options = DataTrackOptions {
            name: Some("chat".to_string()),
            ..DataTrackOptions::default()
        };
        let track = LocalTrack::create(&runtime, LocalTrackRequest::Data(options)).unwrap();
        track.send_text("hello").unwrap();
        track.send(&[1, 2, 3]).unwrap();

        let sent = engine.sent_payloads(track.raw().unwrap());
        assert_eq!(sent, vec![b"hello".to_vec(), vec![1, 2, 3]]);
        assert!(matches!(track.enable(false), Err(LifecycleError::Unsupported(_))));
    }

    #[test]
    fn test_send_on_audio_unsupported() {
        let (_engine, runtime) = runtime();
        let track = LocalTrack::create(&runtime, audio("mic")).unwrap();
        assert!(matches!(track.send_text("x"), Err(LifecycleError::Unsupported(_))));
    }

    #[test]
    fn test_invalid_data_options_rejected_before_any_lease() {
        let (_engine, runtime) = runtime();
        let options = DataTrackOptions {
            max_packet_life_time: Some(100),
            max_retransmits: Some(3),
            ..DataTrackOptions::default()
        };
        let result = LocalTrack::create(&runtime, LocalTrackRequest::Data(options));
        assert!(matches!(result, Err(LifecycleError::InvalidArgument(_))));
        assert_eq!(runtime.media_factory().constructed(), 0);
    }

    #[test]
    fn test_remote_track_adopt_and_release() {
        let engine = Arc::new(LoopbackEngine::new());
        let raw = engine.allocate(ResourceKind::RemoteTrack);
        let publication = TrackPublication {
            sid: TrackSid::new("MT1").unwrap(),
            name: "camera".to_string(),
            kind: TrackKind::Video,
            enabled: true,
        };

        let track = RemoteTrack::adopt(engine.clone(), &publication, raw).unwrap();
        assert!(track.set_playback_enabled(false).unwrap());
        assert!(!track.is_playback_enabled());

        track.release().unwrap();
        assert!(!engine.is_live(raw));
        assert!(track.set_playback_enabled(true).is_err());
    }
}
