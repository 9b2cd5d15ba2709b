//! Stats records delivered by the native engine
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


use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::track::TrackKind;

/// Per-track counters inside a stats report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackStats {
    pub track_sid: String,
    pub kind: TrackKind,
    pub packets: u64,
    pub bytes: u64,
    #[serde(default)]
    pub packets_lost: u64,
}

/// One report per peer connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsReport {
    pub peer_connection_id: String,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub local_tracks: Vec<TrackStats>,
    #[serde(default)]
    pub remote_tracks: Vec<TrackStats>,
}

impl StatsReport {
    pub fn new(peer_connection_id: impl Into<String>) -> Self {
        Self {
            peer_connection_id: peer_connection_id.into(),
            generated_at: Utc::now(),
            local_tracks: Vec::new(),
            remote_tracks: Vec::new(),
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.local_tracks
            .iter()
            .chain(self.remote_tracks.iter())
            .map(|t| t.bytes)
            .sum()
    }
}
