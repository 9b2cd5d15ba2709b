//! Room: the root of a connected session
//!
//! A room owns its local participant, every remote participant and their
//! subscribed tracks. Native events reach the room through a [`RoomObserver`]
//! and are applied on the callback thread chosen at connect time.
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
use roomlink_types::{
    ParticipantInfo, ParticipantSid, RawHandle, RoomError, RoomEvent, RoomSid, StatsReport,
};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dispatcher::{CallbackBinding, CallbackHandle};
use crate::entity::{Lifecycle, Releasable, Teardown};
use crate::error::{LifecycleError, LifecycleResult};
use crate::handle::{NativeResource, ResourceKind};
use crate::local_media::LocalMedia;
use crate::native::NativeRequest;
use crate::participant::{LocalParticipant, RemoteParticipant};
use crate::registry::EntityRegistry;
use crate::runtime::{MediaFactory, MediaRuntime};
use crate::singleton::{OwnerToken, SingletonLease};

/// Room notifications. Every method runs on the callback thread passed to
/// [`Room::connect`].
#[allow(unused_variables)]
pub trait RoomListener: Send + Sync {
    fn on_connected(&self, room: &Room);

    fn on_connect_failure(&self, room: &Room, error: &RoomError);

    /// The room releases itself once this returns
    fn on_disconnected(&self, room: &Room, error: Option<&RoomError>);

    fn on_participant_connected(&self, room: &Room, participant: &Arc<RemoteParticipant>) {}

    /// The participant is released once this returns
    fn on_participant_disconnected(&self, room: &Room, participant: &Arc<RemoteParticipant>) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    Connecting,
    Connected,
    Disconnected,
}

/// Parameters for [`Room::connect`]
#[derive(Clone)]
pub struct ConnectOptions {
    pub room_name: String,
    /// Tracks of this local media are published once connected
    pub local_media: Option<Arc<LocalMedia>>,
}

impl ConnectOptions {
    pub fn new(room_name: impl Into<String>) -> Self {
        Self {
            room_name: room_name.into(),
            local_media: None,
        }
    }

    pub fn with_local_media(mut self, local_media: Arc<LocalMedia>) -> Self {
        self.local_media = Some(local_media);
        self
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("room_name", &self.room_name)
            .field("local_media", &self.local_media.is_some())
            .finish()
    }
}

type RoomBinding = CallbackBinding<dyn RoomListener>;

/// Entity a room delivery leaves to be released. Dropped on the callback
/// thread after the room's delivery gate: a participant release may wait on
/// another listener thread that is itself releasing this room.
#[must_use]
struct AfterDelivery(Option<Arc<dyn Releasable>>);

impl AfterDelivery {
    fn nothing() -> Self {
        AfterDelivery(None)
    }

    fn release(entity: Arc<dyn Releasable>) -> Self {
        AfterDelivery(Some(entity))
    }
}

impl Drop for AfterDelivery {
    fn drop(&mut self) {
        if let Some(entity) = self.0.take() {
            if let Err(e) = entity.release() {
                error!(error = %e, "Release after delivery failed");
            }
        }
    }
}

/// Subscribed-track handle travelling with a queued event. Released if the
/// event never reaches the room.
struct PendingTrack {
    room: Weak<Room>,
    handle: Option<RawHandle>,
}

impl PendingTrack {
    fn claim(mut self) {
        self.handle = None;
    }
}

impl Drop for PendingTrack {
    fn drop(&mut self) {
        if let (Some(handle), Some(room)) = (self.handle.take(), self.room.upgrade()) {
            debug!(room = %room.name, handle, "Subscribed track dropped with its event");
            room.discard_track(handle);
        }
    }
}

type StatsCallback = Box<dyn FnOnce(Vec<StatsReport>) + Send>;

/// Entry point the native engine calls for room events. Cheap to clone and
/// safe to call from any thread; it only posts.
#[derive(Clone)]
pub struct RoomObserver {
    room: Weak<Room>,
    binding: RoomBinding,
}

impl RoomObserver {
    /// Queue `event` for the room's callback thread. `false` once the room is
    /// released.
    pub fn on_event(&self, event: RoomEvent) -> bool {
        let pending = PendingTrack {
            room: self.room.clone(),
            handle: match &event {
                RoomEvent::TrackSubscribed { handle, .. } => Some(*handle),
                _ => None,
            },
        };
        let room = self.room.clone();
        self.binding.deliver(move |listener| match room.upgrade() {
            Some(room) => {
                pending.claim();
                room.dispatch(event, listener)
            }
            None => AfterDelivery::nothing(),
        })
    }
}

impl fmt::Debug for RoomObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomObserver")
            .field("bound", &self.binding.is_bound())
            .field("thread", &self.binding.target().name())
            .finish()
    }
}

struct RoomInner {
    state: RoomState,
    sid: Option<RoomSid>,
    local_participant: Option<Arc<LocalParticipant>>,
    stats_callbacks: VecDeque<StatsCallback>,
}

pub struct Room {
    name: String,
    runtime: Arc<MediaRuntime>,
    local_media: Option<Arc<LocalMedia>>,
    lifecycle: Lifecycle,
    binding: RoomBinding,
    inner: Mutex<RoomInner>,
    participants: EntityRegistry<RemoteParticipant>,
    native: OnceLock<NativeResource>,
    factory: SingletonLease<MediaFactory>,
}

impl Room {
    /// Start connecting. The outcome arrives as `on_connected` or
    /// `on_connect_failure` on the thread behind `callbacks`.
    pub fn connect(
        runtime: Arc<MediaRuntime>,
        options: ConnectOptions,
        listener: Arc<dyn RoomListener>,
        callbacks: CallbackHandle,
    ) -> LifecycleResult<Arc<Self>> {
        let owner = OwnerToken::new(format!("room:{}:{}", options.room_name, Uuid::new_v4()));
        let factory = runtime.lease_media_factory(owner)?;
        let binding = CallbackBinding::bind(format!("room {}", options.room_name), callbacks, listener);

        let room = Arc::new(Self {
            lifecycle: Lifecycle::new(format!("room {}", options.room_name)),
            name: options.room_name,
            runtime,
            local_media: options.local_media,
            binding,
            inner: Mutex::new(RoomInner {
                state: RoomState::Connecting,
                sid: None,
                local_participant: None,
                stats_callbacks: VecDeque::new(),
            }),
            participants: EntityRegistry::new("remote participants"),
            native: OnceLock::new(),
            factory,
        });

        // Active before the engine can emit through the observer
        room.lifecycle.activate()?;
        if let Err(e) = room.open() {
            room.abandon();
            return Err(e);
        }
        if room.is_released() {
            room.release_unclaimed_native();
        } else {
            info!(room = %room.name, "Connecting to room");
        }
        Ok(room)
    }

    fn open(self: &Arc<Self>) -> LifecycleResult<()> {
        let observer = RoomObserver {
            room: Arc::downgrade(self),
            binding: self.binding.clone(),
        };
        let request = NativeRequest::Room {
            factory: self.factory.get().raw()?,
            name: self.name.clone(),
            observer,
        };
        let native = NativeResource::create(self.runtime.engine().clone(), request)?;
        self.native
            .set(native)
            .map_err(|_| LifecycleError::Dispatcher("room opened twice".to_string()))
    }

    fn abandon(&self) {
        if !self.lifecycle.begin_release() {
            return;
        }
        self.binding.unbind();
        self.factory.release();
        self.inner.lock().state = RoomState::Disconnected;
    }

    /// The room was released while the engine was still creating it, so the
    /// teardown ran before the handle was stored.
    fn release_unclaimed_native(&self) {
        let Some(native) = self.native.get() else {
            return;
        };
        if native.is_released() {
            return;
        }
        debug!(room = %self.name, "Releasing room handle stored after teardown");
        if let Err(e) = native.release() {
            warn!(room = %self.name, error = %e, "Room handle release failed");
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Server-assigned identifier, known once connected
    pub fn sid(&self) -> Option<RoomSid> {
        self.inner.lock().sid.clone()
    }

    pub fn state(&self) -> RoomState {
        self.inner.lock().state
    }

    pub fn local_participant(&self) -> Option<Arc<LocalParticipant>> {
        self.inner.lock().local_participant.clone()
    }

    pub fn remote_participants(&self) -> Vec<Arc<RemoteParticipant>> {
        self.participants.snapshot()
    }

    pub fn remote_participant(&self, sid: &ParticipantSid) -> Option<Arc<RemoteParticipant>> {
        self.participants.get(sid)
    }

    /// Ask the engine to disconnect; `on_disconnected` follows
    pub fn disconnect(&self) -> LifecycleResult<()> {
        self.lifecycle.with_active(|| {
            info!(room = %self.name, "Disconnecting from room");
            self.native()?.with_handle(|engine, raw| engine.disconnect(raw))
        })
    }

    /// Request a stats snapshot. Callbacks run on the room's callback thread
    /// in request order; pending callbacks are dropped if the room is released.
    pub fn get_stats<F>(&self, callback: F) -> LifecycleResult<()>
    where
        F: FnOnce(Vec<StatsReport>) + Send + 'static,
    {
        self.lifecycle.with_active(|| {
            let native = self.native()?;
            self.inner.lock().stats_callbacks.push_back(Box::new(callback));
            native.with_handle(|engine, raw| engine.request_stats(raw))
        })
    }

    fn native(&self) -> LifecycleResult<&NativeResource> {
        self.native.get().ok_or(LifecycleError::UseAfterRelease {
            kind: ResourceKind::Room,
        })
    }

    /// Apply one native event. Runs on the callback thread under the
    /// binding's delivery gate.
    fn dispatch(self: &Arc<Self>, event: RoomEvent, listener: &dyn RoomListener) -> AfterDelivery {
        if self.is_released() {
            debug!(room = %self.name, event = event.name(), "Event for released room ignored");
            if let RoomEvent::TrackSubscribed { handle, .. } = event {
                self.discard_track(handle);
            }
            return AfterDelivery::nothing();
        }
        match event {
            RoomEvent::Connected {
                room_sid,
                local_participant,
                participants,
            } => self.apply_connected(room_sid, local_participant, participants, listener),
            RoomEvent::ConnectFailure { error } => {
                warn!(room = %self.name, error = %error, "Failed to connect to room");
                self.inner.lock().state = RoomState::Disconnected;
                let release = AfterDelivery::release(self.clone());
                listener.on_connect_failure(self, &error);
                return release;
            }
            RoomEvent::Disconnected { error } => {
                info!(room = %self.name, error = ?error, "Disconnected from room");
                self.inner.lock().state = RoomState::Disconnected;
                let release = AfterDelivery::release(self.clone());
                listener.on_disconnected(self, error.as_ref());
                return release;
            }
            RoomEvent::ParticipantConnected { participant } => {
                if let Some(participant) = self.admit(&participant) {
                    info!(room = %self.name, participant = %participant.sid(), "Participant connected");
                    listener.on_participant_connected(self, &participant);
                }
            }
            RoomEvent::ParticipantDisconnected { participant_sid } => {
                match self.participants.detach(&participant_sid) {
                    Some(participant) => {
                        info!(room = %self.name, participant = %participant_sid, "Participant disconnected");
                        let release = AfterDelivery::release(participant.clone());
                        listener.on_participant_disconnected(self, &participant);
                        return release;
                    }
                    None => debug!(room = %self.name, participant = %participant_sid, "Unknown participant left"),
                }
            }
            RoomEvent::StatsReady { reports } => {
                let callback = self.inner.lock().stats_callbacks.pop_front();
                match callback {
                    Some(callback) => callback(reports),
                    None => debug!(room = %self.name, "Stats report without a pending request"),
                }
            }
            track_event => self.route_track_event(track_event),
        }
        AfterDelivery::nothing()
    }

    fn apply_connected(
        self: &Arc<Self>,
        room_sid: RoomSid,
        local: ParticipantInfo,
        participants: Vec<ParticipantInfo>,
        listener: &dyn RoomListener,
    ) {
        let local = match LocalParticipant::adopt(self.runtime.engine().clone(), &local) {
            Ok(local) => Some(local),
            Err(e) => {
                error!(room = %self.name, error = %e, "Local participant could not be adopted");
                None
            }
        };
        for info in &participants {
            self.admit(info);
        }
        {
            let mut inner = self.inner.lock();
            inner.state = RoomState::Connected;
            inner.sid = Some(room_sid.clone());
            inner.local_participant = local.clone();
        }
        if let (Some(local), Some(media)) = (&local, &self.local_media) {
            for track in media.tracks() {
                if let Err(e) = local.publish_track(&track) {
                    warn!(room = %self.name, track_id = %track.id(), error = %e, "Auto-publish failed");
                }
            }
        }
        info!(
            room = %self.name,
            room_sid = %room_sid,
            participants = participants.len(),
            "Connected to room"
        );
        listener.on_connected(self);
    }

    fn admit(&self, info: &ParticipantInfo) -> Option<Arc<RemoteParticipant>> {
        let participant = match RemoteParticipant::adopt(self.runtime.engine().clone(), info) {
            Ok(participant) => participant,
            Err(e) => {
                warn!(room = %self.name, participant = %info.sid, error = %e, "Participant could not be adopted");
                return None;
            }
        };
        if let Err(e) = self.participants.add(participant.clone()) {
            warn!(room = %self.name, error = %e, "Participant already present");
            if let Err(e) = participant.release() {
                warn!(room = %self.name, error = %e, "Duplicate participant release failed");
            }
            return None;
        }
        Some(participant)
    }

    fn route_track_event(&self, event: RoomEvent) {
        let Some(sid) = event.participant_sid().cloned() else {
            debug!(room = %self.name, event = event.name(), "Unroutable room event");
            return;
        };
        match self.participants.get(&sid) {
            Some(participant) => participant.handle_event(event),
            None => {
                debug!(room = %self.name, participant = %sid, event = event.name(), "Track event for unknown participant");
                if let RoomEvent::TrackSubscribed { handle, .. } = event {
                    self.discard_track(handle);
                }
            }
        }
    }

    fn discard_track(&self, raw: RawHandle) {
        let released = NativeResource::adopt(self.runtime.engine().clone(), ResourceKind::RemoteTrack, raw)
            .and_then(|native| native.release());
        if let Err(e) = released {
            warn!(room = %self.name, error = %e, "Orphaned track release failed");
        }
    }

}

impl Releasable for Room {
    /// Leaves first: callbacks are silenced, then remote participants and the
    /// local participant go, then the room handle, then the factory lease.
    fn release(&self) -> LifecycleResult<()> {
        if !self.lifecycle.begin_release() {
            return Ok(());
        }
        self.binding.unbind();

        let (was_connected, local, pending_stats) = {
            let mut inner = self.inner.lock();
            let was_connected = inner.state != RoomState::Disconnected;
            inner.state = RoomState::Disconnected;
            let pending = std::mem::take(&mut inner.stats_callbacks);
            (was_connected, inner.local_participant.take(), pending.len())
        };
        if pending_stats > 0 {
            debug!(room = %self.name, dropped = pending_stats, "Pending stats requests dropped");
        }

        let mut teardown = Teardown::new(self.lifecycle.label());
        teardown.step(
            "remote participants",
            self.participants.release_all().into_result("remote participants"),
        );
        if let Some(local) = local {
            teardown.step("local participant", local.release());
        }
        if let Some(native) = self.native.get() {
            if was_connected {
                teardown.step(
                    "disconnect",
                    native.with_handle(|engine, raw| engine.disconnect(raw)),
                );
            }
            teardown.step("native room", native.release());
        }
        self.factory.release();
        info!(room = %self.name, "Room released");
        teardown.finish()
    }

    fn is_released(&self) -> bool {
        self.lifecycle.is_released()
    }
}

impl Drop for Room {
    fn drop(&mut self) {
        if !self.is_released() {
            if let Err(e) = self.release() {
                warn!(room = %self.name, error = %e, "Release on drop failed");
            }
        }
    }
}

impl fmt::Debug for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Room")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("participants", &self.participants.len())
            .finish()
    }
}
