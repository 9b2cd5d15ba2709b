//! In-process loopback engine
//!
//! Hands out sequential handles, records every call it receives and lets the
//! caller inject failures and room events from any thread. Used by the demo
//! binary and the test suites in place of the real media engine.
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
use roomlink_types::{RawHandle, RoomEvent, StatsReport, TrackKind, TrackStats};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::handle::ResourceKind;
use crate::native::{NativeEngine, NativeError, NativeRequest};
use crate::room::RoomObserver;

#[derive(Default)]
struct LoopbackState {
    live: HashMap<RawHandle, ResourceKind>,
    created: HashMap<ResourceKind, u64>,
    released: HashMap<ResourceKind, u64>,
    invalid_releases: u64,
    fail_creations: HashMap<ResourceKind, usize>,
    fail_releases: HashSet<RawHandle>,
    observers: HashMap<RawHandle, RoomObserver>,
    rooms: Vec<RawHandle>,
    enabled: HashMap<RawHandle, bool>,
    published: HashMap<RawHandle, Vec<RawHandle>>,
    sent: HashMap<RawHandle, Vec<Vec<u8>>>,
    disconnects: Vec<RawHandle>,
}

/// Loopback implementation of [`NativeEngine`]
pub struct LoopbackEngine {
    next_handle: AtomicU64,
    state: Mutex<LoopbackState>,
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            state: Mutex::new(LoopbackState::default()),
        }
    }

    /// Make the next creation of `kind` return the null handle
    pub fn fail_next_creation(&self, kind: ResourceKind) {
        *self.state.lock().fail_creations.entry(kind).or_insert(0) += 1;
    }

    /// Make the native release of `handle` report an error
    pub fn fail_release_of(&self, handle: RawHandle) {
        self.state.lock().fail_releases.insert(handle);
    }

    /// Create an engine-owned object whose handle will be handed to the SDK
    /// inside an event (participants, subscribed remote tracks).
    pub fn allocate(&self, kind: ResourceKind) -> RawHandle {
        let raw = self.next_handle.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        state.live.insert(raw, kind);
        *state.created.entry(kind).or_insert(0) += 1;
        if kind == ResourceKind::RemoteTrack {
            state.enabled.insert(raw, true);
        }
        raw
    }

    /// Emit a room event as a native thread would. Returns whether the room
    /// still had a live observer that accepted it.
    pub fn emit(&self, room: RawHandle, event: RoomEvent) -> bool {
        let observer = self.state.lock().observers.get(&room).cloned();
        match observer {
            Some(observer) => observer.on_event(event),
            None => {
                debug!(room, event = event.name(), "No observer for room event");
                false
            }
        }
    }

    /// Handles of every room created so far, in creation order
    pub fn rooms(&self) -> Vec<RawHandle> {
        self.state.lock().rooms.clone()
    }

    pub fn last_room(&self) -> Option<RawHandle> {
        self.state.lock().rooms.last().copied()
    }

    pub fn created(&self, kind: ResourceKind) -> u64 {
        self.state.lock().created.get(&kind).copied().unwrap_or(0)
    }

    pub fn released(&self, kind: ResourceKind) -> u64 {
        self.state.lock().released.get(&kind).copied().unwrap_or(0)
    }

    pub fn live(&self, kind: ResourceKind) -> usize {
        self.state.lock().live.values().filter(|k| **k == kind).count()
    }

    pub fn is_live(&self, handle: RawHandle) -> bool {
        self.state.lock().live.contains_key(&handle)
    }

    /// Releases of handles that were unknown or already gone
    pub fn invalid_releases(&self) -> u64 {
        self.state.lock().invalid_releases
    }

    pub fn is_enabled(&self, track: RawHandle) -> Option<bool> {
        self.state.lock().enabled.get(&track).copied()
    }

    pub fn published_tracks(&self, participant: RawHandle) -> Vec<RawHandle> {
        self.state
            .lock()
            .published
            .get(&participant)
            .cloned()
            .unwrap_or_default()
    }

    pub fn sent_payloads(&self, track: RawHandle) -> Vec<Vec<u8>> {
        self.state.lock().sent.get(&track).cloned().unwrap_or_default()
    }

    pub fn disconnect_requests(&self) -> Vec<RawHandle> {
        self.state.lock().disconnects.clone()
    }

    fn build_stats(state: &LoopbackState, room: RawHandle) -> StatsReport {
        let mut report = StatsReport::new(format!("PC{}", room));
        for (handle, kind) in &state.live {
            let track_kind = match kind {
                ResourceKind::AudioTrack => TrackKind::Audio,
                ResourceKind::VideoTrack => TrackKind::Video,
                ResourceKind::DataTrack => TrackKind::Data,
                _ => continue,
            };
            let bytes = state
                .sent
                .get(handle)
                .map(|p| p.iter().map(|m| m.len() as u64).sum())
                .unwrap_or(0);
            report.local_tracks.push(TrackStats {
                track_sid: format!("MT{}", handle),
                kind: track_kind,
                packets: state.sent.get(handle).map(|p| p.len() as u64).unwrap_or(0),
                bytes,
                packets_lost: 0,
            });
        }
        report
    }
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeEngine for LoopbackEngine {
    fn create(&self, request: NativeRequest) -> RawHandle {
        let kind = request.kind();
        {
            let mut state = self.state.lock();
            if let Some(remaining) = state.fail_creations.get_mut(&kind) {
                if *remaining > 0 {
                    *remaining -= 1;
                    debug!(kind = %kind, "Loopback creation failure injected");
                    return 0;
                }
            }
        }

        let raw = self.allocate(kind);
        let mut state = self.state.lock();
        match request {
            NativeRequest::AudioTrack { enabled, .. } | NativeRequest::VideoTrack { enabled, .. } => {
                state.enabled.insert(raw, enabled);
            }
            NativeRequest::DataTrack { .. } => {
                state.enabled.insert(raw, true);
            }
            NativeRequest::Room { observer, .. } => {
                state.observers.insert(raw, observer);
                state.rooms.push(raw);
            }
            NativeRequest::MediaFactory | NativeRequest::RenderContext => {}
        }
        raw
    }

    fn release(&self, kind: ResourceKind, handle: RawHandle) -> Result<(), NativeError> {
        let mut state = self.state.lock();
        match state.live.remove(&handle) {
            Some(live_kind) if live_kind == kind => {
                *state.released.entry(kind).or_insert(0) += 1;
                state.observers.remove(&handle);
                state.enabled.remove(&handle);
                state.published.remove(&handle);
                if state.fail_releases.remove(&handle) {
                    return Err(NativeError::new(format!("release of {} {} failed", kind, handle)));
                }
                Ok(())
            }
            other => {
                state.invalid_releases += 1;
                warn!(kind = %kind, handle, found = ?other, "Loopback release of unknown handle");
                Err(NativeError::new(format!("unknown {} handle {}", kind, handle)))
            }
        }
    }

    fn set_track_enabled(&self, track: RawHandle, enabled: bool) -> bool {
        let mut state = self.state.lock();
        match state.enabled.get_mut(&track) {
            Some(current) => {
                *current = enabled;
                true
            }
            None => false,
        }
    }

    fn send_data(&self, track: RawHandle, payload: &[u8]) -> Result<(), NativeError> {
        let mut state = self.state.lock();
        if state.live.get(&track) != Some(&ResourceKind::DataTrack) {
            return Err(NativeError::new(format!("{} is not a data track", track)));
        }
        state.sent.entry(track).or_default().push(payload.to_vec());
        Ok(())
    }

    fn publish_track(&self, participant: RawHandle, track: RawHandle) -> bool {
        let mut state = self.state.lock();
        if !state.live.contains_key(&participant) || !state.live.contains_key(&track) {
            return false;
        }
        let published = state.published.entry(participant).or_default();
        if published.contains(&track) {
            return false;
        }
        published.push(track);
        true
    }

    fn unpublish_track(&self, participant: RawHandle, track: RawHandle) -> bool {
        let mut state = self.state.lock();
        match state.published.get_mut(&participant) {
            Some(published) => {
                let before = published.len();
                published.retain(|t| *t != track);
                published.len() != before
            }
            None => false,
        }
    }

    fn disconnect(&self, room: RawHandle) {
        let observer = {
            let mut state = self.state.lock();
            state.disconnects.push(room);
            state.observers.get(&room).cloned()
        };
        if let Some(observer) = observer {
            observer.on_event(RoomEvent::Disconnected { error: None });
        }
    }

    fn request_stats(&self, room: RawHandle) {
        let (observer, report) = {
            let state = self.state.lock();
            (state.observers.get(&room).cloned(), Self::build_stats(&state, room))
        };
        if let Some(observer) = observer {
            observer.on_event(RoomEvent::StatsReady {
                reports: vec![report],
            });
        }
    }
}
