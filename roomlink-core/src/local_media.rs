//! Local media: the owner of every track created on this device
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


use roomlink_types::{DataTrackOptions, TrackId, TrackKind};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::entity::{Lifecycle, Releasable, Teardown};
use crate::error::LifecycleResult;
use crate::registry::EntityRegistry;
use crate::runtime::{MediaFactory, MediaRuntime};
use crate::singleton::{OwnerToken, SingletonLease};
use crate::track::{LocalTrack, LocalTrackRequest};

pub struct LocalMedia {
    runtime: Arc<MediaRuntime>,
    lifecycle: Lifecycle,
    tracks: EntityRegistry<LocalTrack>,
    factory: SingletonLease<MediaFactory>,
}

impl LocalMedia {
    pub fn create(runtime: Arc<MediaRuntime>) -> LifecycleResult<Arc<Self>> {
        let owner = OwnerToken::new(format!("local_media:{}", Uuid::new_v4()));
        let factory = runtime.lease_media_factory(owner)?;
        let media = Self {
            runtime,
            lifecycle: Lifecycle::new("local media"),
            tracks: EntityRegistry::new("local tracks"),
            factory,
        };
        media.lifecycle.activate()?;
        info!("Local media created");
        Ok(Arc::new(media))
    }

    pub fn add_audio_track(&self, enabled: bool, name: Option<&str>) -> LifecycleResult<Arc<LocalTrack>> {
        self.add_track(LocalTrackRequest::Audio {
            enabled,
            name: name.map(str::to_string),
        })
    }

    pub fn add_video_track(&self, enabled: bool, name: Option<&str>) -> LifecycleResult<Arc<LocalTrack>> {
        self.add_track(LocalTrackRequest::Video {
            enabled,
            name: name.map(str::to_string),
        })
    }

    pub fn add_data_track(&self, options: DataTrackOptions) -> LifecycleResult<Arc<LocalTrack>> {
        self.add_track(LocalTrackRequest::Data(options))
    }

    fn add_track(&self, request: LocalTrackRequest) -> LifecycleResult<Arc<LocalTrack>> {
        self.lifecycle.with_active(|| {
            let track = LocalTrack::create(&self.runtime, request)?;
            if let Err(e) = self.tracks.add(track.clone()) {
                track.release()?;
                return Err(e);
            }
            Ok(track)
        })
    }

    /// Remove and release a track. `Ok(false)` if the track is unknown.
    pub fn remove_track(&self, id: &TrackId) -> LifecycleResult<bool> {
        self.lifecycle.with_active(|| {
            let removed = self.tracks.remove(id).is_some();
            if !removed {
                debug!(track_id = %id, "Removal of unknown track");
            }
            Ok(removed)
        })
    }

    pub fn track(&self, id: &TrackId) -> Option<Arc<LocalTrack>> {
        self.tracks.get(id)
    }

    pub fn tracks(&self) -> Vec<Arc<LocalTrack>> {
        self.tracks.snapshot()
    }

    pub fn audio_tracks(&self) -> Vec<Arc<LocalTrack>> {
        self.tracks_of(TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> Vec<Arc<LocalTrack>> {
        self.tracks_of(TrackKind::Video)
    }

    pub fn data_tracks(&self) -> Vec<Arc<LocalTrack>> {
        self.tracks_of(TrackKind::Data)
    }

    fn tracks_of(&self, kind: TrackKind) -> Vec<Arc<LocalTrack>> {
        self.tracks
            .snapshot()
            .into_iter()
            .filter(|track| track.kind() == kind)
            .collect()
    }
}

impl Releasable for LocalMedia {
    fn release(&self) -> LifecycleResult<()> {
        if !self.lifecycle.begin_release() {
            return Ok(());
        }
        let mut teardown = Teardown::new(self.lifecycle.label());
        teardown.step("tracks", self.tracks.release_all().into_result("local tracks"));
        self.factory.release();
        teardown.finish()
    }

    fn is_released(&self) -> bool {
        self.lifecycle.is_released()
    }
}

impl fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMedia")
            .field("state", &self.lifecycle.state())
            .field("tracks", &self.tracks.len())
            .finish()
    }
}
