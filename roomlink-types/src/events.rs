//! Events emitted by the native engine for a room
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


use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{ParticipantSid, RawHandle, RoomSid, TrackSid};
use crate::stats::StatsReport;
use crate::track::TrackPublication;

/// Error reported by the native engine for a room-level failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomError {
    pub code: u32,
    pub message: String,
}

impl RoomError {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for RoomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for RoomError {}

/// Participant description carried by native events.
///
/// `handle` transfers ownership of a native participant object to the SDK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub sid: ParticipantSid,
    pub identity: String,
    pub handle: RawHandle,
    #[serde(default)]
    pub publications: Vec<TrackPublication>,
}

/// Asynchronous notifications from the native room.
///
/// Native threads may emit these at any time; the SDK rethreads them onto the
/// room's callback thread before touching any state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RoomEvent {
    Connected {
        room_sid: RoomSid,
        local_participant: ParticipantInfo,
        participants: Vec<ParticipantInfo>,
    },
    ConnectFailure {
        error: RoomError,
    },
    Disconnected {
        error: Option<RoomError>,
    },
    ParticipantConnected {
        participant: ParticipantInfo,
    },
    ParticipantDisconnected {
        participant_sid: ParticipantSid,
    },
    TrackPublished {
        participant_sid: ParticipantSid,
        publication: TrackPublication,
    },
    TrackUnpublished {
        participant_sid: ParticipantSid,
        track_sid: TrackSid,
    },
    TrackSubscribed {
        participant_sid: ParticipantSid,
        publication: TrackPublication,
        handle: RawHandle,
    },
    TrackUnsubscribed {
        participant_sid: ParticipantSid,
        track_sid: TrackSid,
    },
    TrackSubscriptionFailed {
        participant_sid: ParticipantSid,
        track_sid: TrackSid,
        error: RoomError,
    },
    StatsReady {
        reports: Vec<StatsReport>,
    },
}

impl RoomEvent {
    /// Short name used in log fields
    pub fn name(&self) -> &'static str {
        match self {
            RoomEvent::Connected { .. } => "connected",
            RoomEvent::ConnectFailure { .. } => "connect_failure",
            RoomEvent::Disconnected { .. } => "disconnected",
            RoomEvent::ParticipantConnected { .. } => "participant_connected",
            RoomEvent::ParticipantDisconnected { .. } => "participant_disconnected",
            RoomEvent::TrackPublished { .. } => "track_published",
            RoomEvent::TrackUnpublished { .. } => "track_unpublished",
            RoomEvent::TrackSubscribed { .. } => "track_subscribed",
            RoomEvent::TrackUnsubscribed { .. } => "track_unsubscribed",
            RoomEvent::TrackSubscriptionFailed { .. } => "track_subscription_failed",
            RoomEvent::StatsReady { .. } => "stats_ready",
        }
    }

    /// Participant the event is scoped to, if any
    pub fn participant_sid(&self) -> Option<&ParticipantSid> {
        match self {
            RoomEvent::ParticipantConnected { participant } => Some(&participant.sid),
            RoomEvent::ParticipantDisconnected { participant_sid }
            | RoomEvent::TrackPublished { participant_sid, .. }
            | RoomEvent::TrackUnpublished { participant_sid, .. }
            | RoomEvent::TrackSubscribed { participant_sid, .. }
            | RoomEvent::TrackUnsubscribed { participant_sid, .. }
            | RoomEvent::TrackSubscriptionFailed { participant_sid, .. } => Some(participant_sid),
            _ => None,
        }
    }
}
