//! Local and remote participants
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
use roomlink_types::{
    ParticipantInfo, ParticipantSid, RawHandle, RoomError, RoomEvent, TrackId, TrackPublication, TrackSid,
};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::dispatcher::{CallbackBinding, CallbackHandle};
use crate::entity::{Lifecycle, ManagedEntity, Releasable, ReleaseGuard, Teardown};
use crate::error::LifecycleResult;
use crate::handle::{NativeResource, ResourceKind};
use crate::native::NativeEngine;
use crate::registry::EntityRegistry;
use crate::track::{LocalTrack, RemoteTrack};

/// The participant representing this device in a connected room
pub struct LocalParticipant {
    sid: ParticipantSid,
    identity: String,
    lifecycle: Lifecycle,
    native: NativeResource,
    published: Mutex<Vec<TrackId>>,
}

impl LocalParticipant {
    pub(crate) fn adopt(engine: Arc<dyn NativeEngine>, info: &ParticipantInfo) -> LifecycleResult<Arc<Self>> {
        let native = NativeResource::adopt(engine, ResourceKind::LocalParticipant, info.handle)?;
        let participant = Self {
            sid: info.sid.clone(),
            identity: info.identity.clone(),
            lifecycle: Lifecycle::new(format!("local participant {}", info.sid)),
            native,
            published: Mutex::new(Vec::new()),
        };
        participant.lifecycle.activate()?;
        Ok(Arc::new(participant))
    }

    pub fn sid(&self) -> &ParticipantSid {
        &self.sid
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Publish a local track. `false` if the engine refused, e.g. because the
    /// track is already published.
    pub fn publish_track(&self, track: &LocalTrack) -> LifecycleResult<bool> {
        self.lifecycle.with_active(|| {
            let track_raw = track.raw()?;
            let published = self
                .native
                .with_handle(|engine, raw| engine.publish_track(raw, track_raw))?;
            if published {
                self.published.lock().push(track.id().clone());
                debug!(participant = %self.sid, track_id = %track.id(), "Track published");
            }
            Ok(published)
        })
    }

    pub fn unpublish_track(&self, track: &LocalTrack) -> LifecycleResult<bool> {
        self.lifecycle.with_active(|| {
            let track_raw = track.raw()?;
            let unpublished = self
                .native
                .with_handle(|engine, raw| engine.unpublish_track(raw, track_raw))?;
            if unpublished {
                self.published.lock().retain(|id| id != track.id());
                debug!(participant = %self.sid, track_id = %track.id(), "Track unpublished");
            }
            Ok(unpublished)
        })
    }

    pub fn published_tracks(&self) -> Vec<TrackId> {
        self.published.lock().clone()
    }
}

impl Releasable for LocalParticipant {
    fn release(&self) -> LifecycleResult<()> {
        if !self.lifecycle.begin_release() {
            return Ok(());
        }
        self.published.lock().clear();
        let mut teardown = Teardown::new(self.lifecycle.label());
        teardown.step("native participant", self.native.release());
        teardown.finish()
    }

    fn is_released(&self) -> bool {
        self.lifecycle.is_released()
    }
}

impl fmt::Debug for LocalParticipant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalParticipant")
            .field("sid", &self.sid)
            .field("identity", &self.identity)
            .field("state", &self.lifecycle.state())
            .finish()
    }
}

/// Track notifications for one remote participant.
///
/// Every method runs on the thread passed to
/// [`RemoteParticipant::set_listener`]; the participant and track arguments
/// stay unreleased until the method returns.
#[allow(unused_variables)]
pub trait RemoteParticipantListener: Send + Sync {
    fn on_track_published(&self, participant: &RemoteParticipant, publication: &TrackPublication) {}

    fn on_track_unpublished(&self, participant: &RemoteParticipant, publication: &TrackPublication) {}

    fn on_track_subscribed(&self, participant: &RemoteParticipant, track: &Arc<RemoteTrack>) {}

    fn on_track_unsubscribed(&self, participant: &RemoteParticipant, track: &Arc<RemoteTrack>) {}

    fn on_track_subscription_failed(
        &self,
        participant: &RemoteParticipant,
        track_sid: &TrackSid,
        error: &RoomError,
    ) {
    }
}

type ParticipantBinding = CallbackBinding<dyn RemoteParticipantListener>;

/// Another participant in the room
pub struct RemoteParticipant {
    sid: ParticipantSid,
    identity: String,
    engine: Arc<dyn NativeEngine>,
    lifecycle: Lifecycle,
    native: NativeResource,
    publications: Mutex<IndexMap<TrackSid, TrackPublication>>,
    tracks: EntityRegistry<RemoteTrack>,
    listener: Mutex<Option<ParticipantBinding>>,
}

impl RemoteParticipant {
    pub(crate) fn adopt(engine: Arc<dyn NativeEngine>, info: &ParticipantInfo) -> LifecycleResult<Arc<Self>> {
        let native = NativeResource::adopt(engine.clone(), ResourceKind::RemoteParticipant, info.handle)?;
        let publications = info
            .publications
            .iter()
            .map(|p| (p.sid.clone(), p.clone()))
            .collect();
        let participant = Self {
            sid: info.sid.clone(),
            identity: info.identity.clone(),
            engine,
            lifecycle: Lifecycle::new(format!("remote participant {}", info.sid)),
            native,
            publications: Mutex::new(publications),
            tracks: EntityRegistry::new(format!("tracks of {}", info.sid)),
            listener: Mutex::new(None),
        };
        participant.lifecycle.activate()?;
        Ok(Arc::new(participant))
    }

    pub fn sid(&self) -> &ParticipantSid {
        &self.sid
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Route this participant's track notifications to `listener` on the
    /// thread behind `handle`. Replaces any previous listener.
    pub fn set_listener(
        &self,
        listener: Arc<dyn RemoteParticipantListener>,
        handle: CallbackHandle,
    ) -> LifecycleResult<()> {
        let previous = self.lifecycle.with_active(|| {
            let binding = CallbackBinding::bind(format!("participant {}", self.sid), handle, listener);
            Ok(self.listener.lock().replace(binding))
        })?;
        if let Some(previous) = previous {
            previous.unbind();
        }
        Ok(())
    }

    pub fn publications(&self) -> Vec<TrackPublication> {
        self.publications.lock().values().cloned().collect()
    }

    pub fn remote_track(&self, sid: &TrackSid) -> Option<Arc<RemoteTrack>> {
        self.tracks.get(sid)
    }

    pub fn remote_tracks(&self) -> Vec<Arc<RemoteTrack>> {
        self.tracks.snapshot()
    }

    /// Apply a track event. Runs on the room's callback thread.
    pub(crate) fn handle_event(self: &Arc<Self>, event: RoomEvent) {
        let applied = self.lifecycle.with_active(|| {
            self.apply(event.clone());
            Ok(())
        });
        if applied.is_err() {
            debug!(participant = %self.sid, event = event.name(), "Event for released participant ignored");
            if let RoomEvent::TrackSubscribed { handle, .. } = event {
                self.discard_handle(handle);
            }
        }
    }

    fn apply(self: &Arc<Self>, event: RoomEvent) {
        match event {
            RoomEvent::TrackPublished { publication, .. } => {
                self.publications
                    .lock()
                    .insert(publication.sid.clone(), publication.clone());
                self.notify(move |listener, participant| {
                    listener.on_track_published(participant, &publication)
                });
            }
            RoomEvent::TrackUnpublished { track_sid, .. } => {
                let publication = self.publications.lock().shift_remove(&track_sid);
                if let Some(track) = self.tracks.detach(&track_sid) {
                    warn!(participant = %self.sid, track_sid = %track_sid, "Track unpublished while subscribed");
                    let guard = ReleaseGuard::new(track);
                    self.notify(move |listener, participant| {
                        listener.on_track_unsubscribed(participant, guard.entity())
                    });
                }
                if let Some(publication) = publication {
                    self.notify(move |listener, participant| {
                        listener.on_track_unpublished(participant, &publication)
                    });
                }
            }
            RoomEvent::TrackSubscribed {
                publication, handle, ..
            } => {
                let track = match RemoteTrack::adopt(self.engine.clone(), &publication, handle) {
                    Ok(track) => track,
                    Err(e) => {
                        warn!(participant = %self.sid, error = %e, "Subscribed track could not be adopted");
                        return;
                    }
                };
                if let Err(e) = self.tracks.add(track.clone()) {
                    warn!(participant = %self.sid, error = %e, "Duplicate track subscription");
                    if let Err(e) = track.release() {
                        warn!(participant = %self.sid, error = %e, "Duplicate track release failed");
                    }
                    return;
                }
                self.publications
                    .lock()
                    .insert(publication.sid.clone(), publication);
                self.notify(move |listener, participant| {
                    listener.on_track_subscribed(participant, &track)
                });
            }
            RoomEvent::TrackUnsubscribed { track_sid, .. } => match self.tracks.detach(&track_sid) {
                Some(track) => {
                    let guard = ReleaseGuard::new(track);
                    self.notify(move |listener, participant| {
                        listener.on_track_unsubscribed(participant, guard.entity())
                    });
                }
                None => debug!(participant = %self.sid, track_sid = %track_sid, "Unsubscribe for unknown track"),
            },
            RoomEvent::TrackSubscriptionFailed { track_sid, error, .. } => {
                warn!(participant = %self.sid, track_sid = %track_sid, error = %error, "Track subscription failed");
                self.notify(move |listener, participant| {
                    listener.on_track_subscription_failed(participant, &track_sid, &error)
                });
            }
            other => {
                debug!(participant = %self.sid, event = other.name(), "Event not handled by participant");
            }
        }
    }

    /// Post `f` to the participant listener. Dropped when no listener is set;
    /// anything `f` owns is dropped with it.
    fn notify<F>(self: &Arc<Self>, f: F) -> bool
    where
        F: FnOnce(&dyn RemoteParticipantListener, &RemoteParticipant) + Send + 'static,
    {
        let binding = self.listener.lock().clone();
        match binding {
            Some(binding) => {
                let participant = self.clone();
                binding.deliver(move |listener| f(listener, &participant))
            }
            None => false,
        }
    }

    fn discard_handle(&self, raw: RawHandle) {
        match NativeResource::adopt(self.engine.clone(), ResourceKind::RemoteTrack, raw) {
            Ok(native) => {
                if let Err(e) = native.release() {
                    warn!(participant = %self.sid, error = %e, "Late track release failed");
                }
            }
            Err(e) => warn!(participant = %self.sid, error = %e, "Late track handle rejected"),
        }
    }
}

impl Releasable for RemoteParticipant {
    fn release(&self) -> LifecycleResult<()> {
        if !self.lifecycle.begin_release() {
            return Ok(());
        }
        if let Some(binding) = self.listener.lock().take() {
            binding.unbind();
        }
        let mut teardown = Teardown::new(self.lifecycle.label());
        teardown.step(
            "remote tracks",
            self.tracks.release_all().into_result(&format!("tracks of {}", self.sid)),
        );
        self.publications.lock().clear();
        teardown.step("native participant", self.native.release());
        teardown.finish()
    }

    fn is_released(&self) -> bool {
        self.lifecycle.is_released()
    }
}

impl ManagedEntity for RemoteParticipant {
    type Id = ParticipantSid;

    fn id(&self) -> &ParticipantSid {
        &self.sid
    }
}

impl fmt::Debug for RemoteParticipant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteParticipant")
            .field("sid", &self.sid)
            .field("identity", &self.identity)
            .field("state", &self.lifecycle.state())
            .field("tracks", &self.tracks.len())
            .finish()
    }
}
