//! Scripted room session
//!
//! Plays the part of the native engine from a blocking task: connects a room,
//! brings in a remote participant with one subscribed track, requests stats
//! and tears everything down again.
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


use anyhow::{anyhow, bail, Context, Result};
use roomlink_core::{
    CallbackHandle, ConnectOptions, LocalMedia, LoopbackEngine, MediaRuntime, Releasable,
    RemoteParticipant, RemoteParticipantListener, RemoteTrack, ResourceKind, Room, RoomListener,
};
use roomlink_types::{
    DataTrackOptions, ParticipantInfo, ParticipantSid, RawHandle, RoomError, RoomEvent, RoomSid, StatsReport,
    TrackKind, TrackPublication, TrackSid,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{info, warn};

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// What the listeners observed, forwarded to the async driver
#[derive(Debug)]
pub enum SessionEvent {
    Connected { participants: usize },
    ConnectFailure(RoomError),
    Disconnected,
    ParticipantConnected(ParticipantSid),
    ParticipantDisconnected(ParticipantSid),
    TrackSubscribed { participant: ParticipantSid, track: TrackSid },
}

struct DemoListener {
    events: mpsc::UnboundedSender<SessionEvent>,
    callbacks: CallbackHandle,
}

impl DemoListener {
    fn send(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

impl RoomListener for DemoListener {
    fn on_connected(&self, room: &Room) {
        for participant in room.remote_participants() {
            self.watch(&participant);
        }
        self.send(SessionEvent::Connected {
            participants: room.remote_participants().len(),
        });
    }

    fn on_connect_failure(&self, _room: &Room, error: &RoomError) {
        self.send(SessionEvent::ConnectFailure(error.clone()));
    }

    fn on_disconnected(&self, _room: &Room, error: Option<&RoomError>) {
        if let Some(error) = error {
            warn!(error = %error, "Room disconnected with error");
        }
        self.send(SessionEvent::Disconnected);
    }

    fn on_participant_connected(&self, _room: &Room, participant: &Arc<RemoteParticipant>) {
        self.watch(participant);
        self.send(SessionEvent::ParticipantConnected(participant.sid().clone()));
    }

    fn on_participant_disconnected(&self, _room: &Room, participant: &Arc<RemoteParticipant>) {
        self.send(SessionEvent::ParticipantDisconnected(participant.sid().clone()));
    }
}

impl DemoListener {
    fn watch(&self, participant: &Arc<RemoteParticipant>) {
        let listener = Arc::new(DemoListener {
            events: self.events.clone(),
            callbacks: self.callbacks.clone(),
        });
        if let Err(e) = participant.set_listener(listener, self.callbacks.clone()) {
            warn!(participant = %participant.sid(), error = %e, "Could not watch participant");
        }
    }
}

impl RemoteParticipantListener for DemoListener {
    fn on_track_subscribed(&self, participant: &RemoteParticipant, track: &Arc<RemoteTrack>) {
        info!(participant = %participant.sid(), track = %track.sid(), kind = %track.kind(), "Track subscribed");
        self.send(SessionEvent::TrackSubscribed {
            participant: participant.sid().clone(),
            track: track.sid().clone(),
        });
    }

    fn on_track_unsubscribed(&self, participant: &RemoteParticipant, track: &Arc<RemoteTrack>) {
        info!(participant = %participant.sid(), track = %track.sid(), "Track unsubscribed");
    }
}

/// Summary printed when the session ends
#[derive(Debug)]
pub struct SessionReport {
    pub stats: Vec<StatsReport>,
    pub factory_constructed: u64,
    pub factory_destroyed: u64,
    pub underflows: u64,
    pub invalid_releases: u64,
}

pub struct Session {
    engine: Arc<LoopbackEngine>,
    runtime: Arc<MediaRuntime>,
    callbacks: CallbackHandle,
}

impl Session {
    pub fn new(engine: Arc<LoopbackEngine>, runtime: Arc<MediaRuntime>, callbacks: CallbackHandle) -> Self {
        Self {
            engine,
            runtime,
            callbacks,
        }
    }

    pub async fn run(&self, room_name: &str) -> Result<SessionReport> {
        let media = LocalMedia::create(self.runtime.clone())?;
        media.add_audio_track(true, Some("microphone"))?;
        media.add_video_track(true, Some("camera"))?;
        let chat = media.add_data_track(DataTrackOptions {
            name: Some("chat".to_string()),
            ..DataTrackOptions::default()
        })?;

        let (tx, mut events) = mpsc::unbounded_channel();
        let listener = Arc::new(DemoListener {
            events: tx,
            callbacks: self.callbacks.clone(),
        });
        let room = Room::connect(
            self.runtime.clone(),
            ConnectOptions::new(room_name).with_local_media(media.clone()),
            listener,
            self.callbacks.clone(),
        )?;
        let room_handle = self
            .engine
            .last_room()
            .ok_or_else(|| anyhow!("engine did not register the room"))?;

        self.emit(room_handle, self.connected_event(room_name)?).await?;
        match next(&mut events).await? {
            SessionEvent::Connected { participants } => info!(participants, "Session connected"),
            SessionEvent::ConnectFailure(error) => bail!("connect failed: {}", error),
            other => bail!("unexpected event before connect: {:?}", other),
        }

        chat.send_text("hello from roomlink")?;

        let guest = self.participant("PA2", "guest", ResourceKind::RemoteParticipant)?;
        let guest_sid = guest.sid.clone();
        self.emit(room_handle, RoomEvent::ParticipantConnected { participant: guest }).await?;
        expect_participant_connected(&mut events, &guest_sid).await?;

        let publication = TrackPublication {
            sid: TrackSid::new("MT10")?,
            name: "guest-camera".to_string(),
            kind: TrackKind::Video,
            enabled: true,
        };
        let subscribed = RoomEvent::TrackSubscribed {
            participant_sid: guest_sid.clone(),
            publication,
            handle: self.engine.allocate(ResourceKind::RemoteTrack),
        };
        self.emit(room_handle, subscribed).await?;
        match next(&mut events).await? {
            SessionEvent::TrackSubscribed { participant, track } => {
                info!(participant = %participant, track = %track, "Remote track ready")
            }
            other => bail!("expected a subscription, got {:?}", other),
        }

        let (stats_tx, stats_rx) = oneshot::channel();
        room.get_stats(move |reports| {
            let _ = stats_tx.send(reports);
        })?;
        let stats = timeout(STEP_TIMEOUT, stats_rx)
            .await
            .context("stats request timed out")??;

        self.emit(
            room_handle,
            RoomEvent::ParticipantDisconnected {
                participant_sid: guest_sid,
            },
        )
        .await?;
        match next(&mut events).await? {
            SessionEvent::ParticipantDisconnected(sid) => info!(participant = %sid, "Guest left"),
            other => bail!("expected the guest to leave, got {:?}", other),
        }

        room.disconnect()?;
        loop {
            match next(&mut events).await? {
                SessionEvent::Disconnected => break,
                other => info!(event = ?other, "Event while disconnecting"),
            }
        }

        if let Err(e) = media.release() {
            warn!(error = %e, "Local media release reported failures");
        }
        room.release()?;

        let factory = self.runtime.media_factory();
        Ok(SessionReport {
            stats,
            factory_constructed: factory.constructed(),
            factory_destroyed: factory.destroyed(),
            underflows: self.runtime.underflows(),
            invalid_releases: self.engine.invalid_releases(),
        })
    }

    fn connected_event(&self, room_name: &str) -> Result<RoomEvent> {
        Ok(RoomEvent::Connected {
            room_sid: RoomSid::new(format!("RM-{}", room_name))?,
            local_participant: self.participant("PA0", "demo", ResourceKind::LocalParticipant)?,
            participants: vec![self.participant("PA1", "host", ResourceKind::RemoteParticipant)?],
        })
    }

    fn participant(&self, sid: &str, identity: &str, kind: ResourceKind) -> Result<ParticipantInfo> {
        Ok(ParticipantInfo {
            sid: ParticipantSid::new(sid)?,
            identity: identity.to_string(),
            handle: self.engine.allocate(kind),
            publications: vec![],
        })
    }

    /// Emit from a blocking task, the way a native engine thread would
    async fn emit(&self, room: RawHandle, event: RoomEvent) -> Result<()> {
        let engine = self.engine.clone();
        let name = event.name();
        let accepted = tokio::task::spawn_blocking(move || engine.emit(room, event)).await?;
        if !accepted {
            bail!("room rejected {} event", name);
        }
        Ok(())
    }
}

async fn next(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Result<SessionEvent> {
    timeout(STEP_TIMEOUT, events.recv())
        .await
        .context("timed out waiting for a room event")?
        .ok_or_else(|| anyhow!("listener channel closed"))
}

async fn expect_participant_connected(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    expected: &ParticipantSid,
) -> Result<()> {
    match next(events).await? {
        SessionEvent::ParticipantConnected(sid) if &sid == expected => Ok(()),
        other => bail!("expected {} to connect, got {:?}", expected, other),
    }
}
