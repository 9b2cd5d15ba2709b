//! Lifecycle integration tests
//!
//! Drive whole object graphs (runtime, local media, room, participants,
//! tracks) against the loopback engine and check that every native object
//! comes back exactly once.

use proptest::prelude::*;
use roomlink_config::SdkConfig;
use roomlink_core::{
    CallbackThread, ConnectOptions, LifecycleError, LocalMedia, LoopbackEngine, MediaRuntime,
    Releasable, RemoteParticipant, ResourceKind, Room, RoomListener, RuntimeOptions,
};
use roomlink_types::{
    DataTrackOptions, ParticipantInfo, ParticipantSid, RoomError, RoomEvent, RoomSid, TrackKind,
    TrackPublication, TrackSid,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

const ALL_KINDS: [ResourceKind; 9] = [
    ResourceKind::MediaFactory,
    ResourceKind::RenderContext,
    ResourceKind::AudioTrack,
    ResourceKind::VideoTrack,
    ResourceKind::DataTrack,
    ResourceKind::RemoteTrack,
    ResourceKind::Room,
    ResourceKind::LocalParticipant,
    ResourceKind::RemoteParticipant,
];

struct QuietListener;

impl RoomListener for QuietListener {
    fn on_connected(&self, _room: &Room) {}

    fn on_connect_failure(&self, _room: &Room, _error: &RoomError) {}

    fn on_disconnected(&self, _room: &Room, _error: Option<&RoomError>) {}

    fn on_participant_disconnected(&self, _room: &Room, participant: &Arc<RemoteParticipant>) {
        assert!(!participant.is_released());
    }
}

fn assert_nothing_live(engine: &LoopbackEngine) {
    for kind in ALL_KINDS {
        assert_eq!(engine.live(kind), 0, "{} still live", kind);
    }
    assert_eq!(engine.invalid_releases(), 0);
}

fn participant(engine: &LoopbackEngine, sid: &str, kind: ResourceKind) -> ParticipantInfo {
    ParticipantInfo {
        sid: ParticipantSid::new(sid).unwrap(),
        identity: format!("user-{}", sid),
        handle: engine.allocate(kind),
        publications: vec![],
    }
}

#[test]
fn test_two_owners_share_media_factory() {
    roomlink_logging::init_test_logging();
    let engine = Arc::new(LoopbackEngine::new());
    let runtime = MediaRuntime::new(engine.clone());
    let callbacks = CallbackThread::spawn("lifecycle-test").unwrap();

    let media = LocalMedia::create(runtime.clone()).unwrap();
    let room = Room::connect(
        runtime.clone(),
        ConnectOptions::new("shared"),
        Arc::new(QuietListener),
        callbacks.handle(),
    )
    .unwrap();

    assert_eq!(engine.created(ResourceKind::MediaFactory), 1);
    assert_eq!(runtime.media_factory_count(), 2);

    media.release().unwrap();
    assert_eq!(runtime.media_factory_count(), 1);
    assert_eq!(engine.live(ResourceKind::MediaFactory), 1);

    room.release().unwrap();
    assert_eq!(runtime.media_factory_count(), 0);
    assert_eq!(runtime.media_factory().constructed(), 1);
    assert_eq!(runtime.media_factory().destroyed(), 1);
    assert_eq!(runtime.underflows(), 0);
    assert_nothing_live(&engine);
}

#[test]
fn test_full_session_returns_every_handle() {
    roomlink_logging::init_test_logging();
    let engine = Arc::new(LoopbackEngine::new());
    let runtime = MediaRuntime::new(engine.clone());
    let callbacks = CallbackThread::spawn("lifecycle-test").unwrap();

    let media = LocalMedia::create(runtime.clone()).unwrap();
    media.add_audio_track(true, Some("mic")).unwrap();
    media.add_video_track(true, Some("camera")).unwrap();
    media.add_data_track(DataTrackOptions::default()).unwrap();

    let room = Room::connect(
        runtime.clone(),
        ConnectOptions::new("session").with_local_media(media.clone()),
        Arc::new(QuietListener),
        callbacks.handle(),
    )
    .unwrap();
    let raw = engine.last_room().unwrap();

    engine.emit(
        raw,
        RoomEvent::Connected {
            room_sid: RoomSid::new("RM1").unwrap(),
            local_participant: participant(&engine, "PA0", ResourceKind::LocalParticipant),
            participants: vec![
                participant(&engine, "PA1", ResourceKind::RemoteParticipant),
                participant(&engine, "PA2", ResourceKind::RemoteParticipant),
            ],
        },
    );
    for (sid, track) in [("PA1", "MT1"), ("PA1", "MT2"), ("PA2", "MT3")] {
        engine.emit(
            raw,
            RoomEvent::TrackSubscribed {
                participant_sid: ParticipantSid::new(sid).unwrap(),
                publication: TrackPublication {
                    sid: TrackSid::new(track).unwrap(),
                    name: track.to_lowercase(),
                    kind: TrackKind::Audio,
                    enabled: true,
                },
                handle: engine.allocate(ResourceKind::RemoteTrack),
            },
        );
    }
    engine.emit(
        raw,
        RoomEvent::ParticipantDisconnected {
            participant_sid: ParticipantSid::new("PA2").unwrap(),
        },
    );
    assert!(callbacks.handle().barrier(WAIT));

    assert_eq!(room.remote_participants().len(), 1);
    assert_eq!(engine.live(ResourceKind::RemoteTrack), 2);
    let local = room.local_participant().unwrap();
    assert_eq!(local.published_tracks().len(), 3);

    room.release().unwrap();
    media.release().unwrap();
    assert_nothing_live(&engine);
    assert_eq!(runtime.underflows(), 0);
}

#[test]
fn test_zero_handle_registers_nothing() {
    let engine = Arc::new(LoopbackEngine::new());
    let runtime = MediaRuntime::new(engine.clone());
    let media = LocalMedia::create(runtime.clone()).unwrap();

    engine.fail_next_creation(ResourceKind::DataTrack);
    let result = media.add_data_track(DataTrackOptions::default());
    match result {
        Err(LifecycleError::CreationFailure { kind, .. }) => assert_eq!(kind, ResourceKind::DataTrack),
        other => panic!("unexpected {:?}", other),
    }
    assert!(media.data_tracks().is_empty());
    assert_eq!(runtime.media_factory_count(), 1);

    media.release().unwrap();
    assert_nothing_live(&engine);
}

#[test]
fn test_factory_creation_failure_surfaces_to_caller() {
    let engine = Arc::new(LoopbackEngine::new());
    let runtime = MediaRuntime::new(engine.clone());
    engine.fail_next_creation(ResourceKind::MediaFactory);

    assert!(matches!(
        LocalMedia::create(runtime.clone()),
        Err(LifecycleError::CreationFailure { .. })
    ));
    assert_eq!(runtime.media_factory_count(), 0);

    let media = LocalMedia::create(runtime.clone()).unwrap();
    assert_eq!(runtime.media_factory_count(), 1);
    media.release().unwrap();
}

#[test]
fn test_config_controls_render_context_sharing() {
    let vars: HashMap<String, String> = [("ROOMLINK_SHARE_RENDER_CONTEXT", "false")]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let config = SdkConfig::from_vars(vars).unwrap();

    let engine = Arc::new(LoopbackEngine::new());
    let runtime = MediaRuntime::with_options(engine.clone(), RuntimeOptions::from(&config));
    let media = LocalMedia::create(runtime.clone()).unwrap();
    media.add_video_track(true, None).unwrap();

    assert_eq!(engine.created(ResourceKind::RenderContext), 0);
    assert_eq!(runtime.render_context_count(), 0);
    media.release().unwrap();
}

#[derive(Debug, Clone)]
enum Op {
    CreateMedia,
    AddTrack(usize, TrackKind),
    RemoveFirstTrack(usize),
    ReleaseMedia(usize),
}

fn op() -> impl Strategy<Value = Op> {
    let kind = prop_oneof![
        Just(TrackKind::Audio),
        Just(TrackKind::Video),
        Just(TrackKind::Data)
    ];
    prop_oneof![
        Just(Op::CreateMedia),
        (0..4usize, kind).prop_map(|(i, k)| Op::AddTrack(i, k)),
        (0..4usize).prop_map(Op::RemoveFirstTrack),
        (0..4usize).prop_map(Op::ReleaseMedia),
    ]
}

proptest! {
    #[test]
    fn prop_singletons_balance_under_any_sequence(ops in proptest::collection::vec(op(), 0..40)) {
        let engine = Arc::new(LoopbackEngine::new());
        let runtime = MediaRuntime::new(engine.clone());
        let mut medias: Vec<Arc<LocalMedia>> = Vec::new();

        for op in ops {
            match op {
                Op::CreateMedia => medias.push(LocalMedia::create(runtime.clone()).unwrap()),
                Op::AddTrack(i, kind) => {
                    if let Some(media) = medias.get(i) {
                        let _ = match kind {
                            TrackKind::Audio => media.add_audio_track(true, None),
                            TrackKind::Video => media.add_video_track(true, None),
                            TrackKind::Data => media.add_data_track(DataTrackOptions::default()),
                        };
                    }
                }
                Op::RemoveFirstTrack(i) => {
                    if let Some(media) = medias.get(i) {
                        if let Some(track) = media.tracks().first() {
                            let _ = media.remove_track(track.id());
                        }
                    }
                }
                Op::ReleaseMedia(i) => {
                    if let Some(media) = medias.get(i) {
                        media.release().unwrap();
                    }
                }
            }

            for singleton_counts in [
                (runtime.media_factory().constructed(), runtime.media_factory().destroyed(), runtime.media_factory_count()),
                (runtime.render_context().constructed(), runtime.render_context().destroyed(), runtime.render_context_count()),
            ] {
                let (constructed, destroyed, count) = singleton_counts;
                prop_assert_eq!(constructed, destroyed + u64::from(count > 0));
            }
        }

        for media in &medias {
            media.release().unwrap();
        }
        prop_assert_eq!(runtime.media_factory_count(), 0);
        prop_assert_eq!(runtime.underflows(), 0);
        prop_assert_eq!(engine.invalid_releases(), 0);
    }
}
