//! Stress tests for the lifecycle core
//!
//! Hammer shared singletons and room dispatch from many threads at once and
//! check that counts balance and nothing leaks.
//!
//! The heavier runs are ignored by default:
//! cargo test --test stress_test --release -- --ignored

use roomlink_core::{
    CallbackThread, ConnectOptions, LocalMedia, LoopbackEngine, MediaRuntime, Releasable,
    RemoteParticipant, ResourceKind, Room, RoomListener,
};
use roomlink_types::{DataTrackOptions, ParticipantInfo, ParticipantSid, RoomError, RoomEvent};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Default)]
struct CountingListener {
    joined: AtomicUsize,
}

impl RoomListener for CountingListener {
    fn on_connected(&self, _room: &Room) {}

    fn on_connect_failure(&self, _room: &Room, _error: &RoomError) {}

    fn on_disconnected(&self, _room: &Room, _error: Option<&RoomError>) {}

    fn on_participant_connected(&self, _room: &Room, _participant: &Arc<RemoteParticipant>) {
        self.joined.fetch_add(1, Ordering::SeqCst);
    }
}

async fn churn_tracks(workers: usize, rounds: usize) {
    let engine = Arc::new(LoopbackEngine::new());
    let runtime = MediaRuntime::new(engine.clone());
    let start = Instant::now();

    let mut handles = Vec::new();
    for worker in 0..workers {
        let runtime = runtime.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            for round in 0..rounds {
                let media = LocalMedia::create(runtime.clone()).unwrap();
                let audio = media.add_audio_track(true, None).unwrap();
                media.add_video_track(round % 2 == 0, None).unwrap();
                media.add_data_track(DataTrackOptions::default()).unwrap();
                if (worker + round) % 3 == 0 {
                    assert!(media.remove_track(audio.id()).unwrap());
                }
                media.release().unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let elapsed = start.elapsed();
    println!(
        "✅ {} media lifecycles across {} workers in {:?}",
        workers * rounds,
        workers,
        elapsed
    );

    assert_eq!(runtime.media_factory_count(), 0);
    assert_eq!(runtime.render_context_count(), 0);
    assert_eq!(
        runtime.media_factory().constructed(),
        runtime.media_factory().destroyed()
    );
    assert_eq!(runtime.underflows(), 0);
    assert_eq!(engine.invalid_releases(), 0);
    for kind in [
        ResourceKind::MediaFactory,
        ResourceKind::RenderContext,
        ResourceKind::AudioTrack,
        ResourceKind::VideoTrack,
        ResourceKind::DataTrack,
    ] {
        assert_eq!(engine.live(kind), 0, "{} leaked", kind);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_track_churn() {
    churn_tracks(8, 50).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[ignore] // Long-running; run manually
async fn test_heavy_track_churn() {
    churn_tracks(32, 500).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_release_racing_event_storm() {
    roomlink_logging::init_test_logging();
    let engine = Arc::new(LoopbackEngine::new());
    let runtime = MediaRuntime::new(engine.clone());
    let callbacks = CallbackThread::spawn("stress-callbacks").unwrap();
    let listener = Arc::new(CountingListener::default());

    let room = Room::connect(
        runtime.clone(),
        ConnectOptions::new("storm"),
        listener.clone(),
        callbacks.handle(),
    )
    .unwrap();
    let raw = engine.last_room().unwrap();

    let emitters = 4;
    let per_emitter = 200;
    let mut handles = Vec::new();
    for emitter in 0..emitters {
        let engine = engine.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let mut accepted = 0;
            for i in 0..per_emitter {
                let event = RoomEvent::ParticipantConnected {
                    participant: ParticipantInfo {
                        sid: ParticipantSid::new(format!("PA{}-{}", emitter, i)).unwrap(),
                        identity: format!("user-{}-{}", emitter, i),
                        handle: engine.allocate(ResourceKind::RemoteParticipant),
                        publications: vec![],
                    },
                };
                if engine.emit(raw, event) {
                    accepted += 1;
                }
            }
            accepted
        }));
    }

    tokio::time::sleep(Duration::from_millis(5)).await;
    let releasing = room.clone();
    tokio::task::spawn_blocking(move || releasing.release().unwrap())
        .await
        .unwrap();

    let mut accepted = 0;
    for handle in handles {
        accepted += handle.await.unwrap();
    }
    assert!(callbacks.handle().barrier(Duration::from_secs(5)));

    let joined = listener.joined.load(Ordering::SeqCst);
    println!("✅ {} events accepted, {} delivered before release", accepted, joined);
    assert!(joined <= accepted);
    assert!(room.remote_participants().is_empty());
    assert_eq!(engine.live(ResourceKind::Room), 0);
    assert_eq!(runtime.media_factory_count(), 0);
    assert_eq!(engine.invalid_releases(), 0);
}
