//! Callback delivery integration tests
//!
//! Native events are emitted from arbitrary threads; listeners must only ever
//! run on the thread chosen for them, in order, and never after release.

use parking_lot::Mutex;
use roomlink_core::{
    CallbackThread, ConnectOptions, LoopbackEngine, MediaRuntime, Releasable, RemoteParticipant,
    RemoteParticipantListener, RemoteTrack, ResourceKind, Room, RoomListener,
};
use roomlink_types::{
    ParticipantInfo, ParticipantSid, RawHandle, RoomError, RoomEvent, RoomSid, TrackKind,
    TrackPublication, TrackSid,
};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
struct Call {
    what: String,
    thread: Option<String>,
}

fn call(what: impl Into<String>) -> Call {
    Call {
        what: what.into(),
        thread: thread::current().name().map(str::to_string),
    }
}

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<Call>>,
}

impl Recorder {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn record(&self, what: impl Into<String>) {
        self.calls.lock().push(call(what));
    }
}

impl RoomListener for Recorder {
    fn on_connected(&self, _room: &Room) {
        self.record("connected");
    }

    fn on_connect_failure(&self, _room: &Room, error: &RoomError) {
        self.record(format!("connect_failure:{}", error.code));
    }

    fn on_disconnected(&self, _room: &Room, _error: Option<&RoomError>) {
        self.record("disconnected");
    }

    fn on_participant_connected(&self, _room: &Room, participant: &Arc<RemoteParticipant>) {
        self.record(format!("joined:{}", participant.sid()));
    }
}

impl RemoteParticipantListener for Recorder {
    fn on_track_subscribed(&self, _participant: &RemoteParticipant, track: &Arc<RemoteTrack>) {
        self.record(format!("subscribed:{}", track.sid()));
    }
}

struct Setup {
    engine: Arc<LoopbackEngine>,
    runtime: Arc<MediaRuntime>,
    callbacks: CallbackThread,
}

impl Setup {
    fn new(thread_name: &str) -> Self {
        roomlink_logging::init_test_logging();
        let engine = Arc::new(LoopbackEngine::new());
        Self {
            runtime: MediaRuntime::new(engine.clone()),
            engine,
            callbacks: CallbackThread::spawn(thread_name).unwrap(),
        }
    }

    fn connect(&self, listener: Arc<dyn RoomListener>) -> (Arc<Room>, RawHandle) {
        let room = Room::connect(
            self.runtime.clone(),
            ConnectOptions::new("callbacks"),
            listener,
            self.callbacks.handle(),
        )
        .unwrap();
        (room, self.engine.last_room().unwrap())
    }

    fn joined(&self, sid: &str) -> RoomEvent {
        RoomEvent::ParticipantConnected {
            participant: ParticipantInfo {
                sid: ParticipantSid::new(sid).unwrap(),
                identity: sid.to_lowercase(),
                handle: self.engine.allocate(ResourceKind::RemoteParticipant),
                publications: vec![],
            },
        }
    }

    fn settle(&self) {
        assert!(self.callbacks.handle().barrier(WAIT));
    }
}

#[test]
fn test_three_events_then_release_then_two() {
    let setup = Setup::new("callback-t");
    let recorder = Arc::new(Recorder::default());
    let (room, raw) = setup.connect(recorder.clone());

    // Emitted from a foreign thread, as the engine would
    let engine = setup.engine.clone();
    let events: Vec<_> = ["PA1", "PA2", "PA3"].iter().map(|sid| setup.joined(sid)).collect();
    thread::spawn(move || {
        for event in events {
            assert!(engine.emit(raw, event));
        }
    })
    .join()
    .unwrap();
    setup.settle();

    room.release().unwrap();
    for sid in ["PA4", "PA5"] {
        assert!(!setup.engine.emit(raw, setup.joined(sid)));
    }
    setup.settle();

    let calls = recorder.calls();
    let what: Vec<_> = calls.iter().map(|c| c.what.as_str()).collect();
    assert_eq!(what, vec!["joined:PA1", "joined:PA2", "joined:PA3"]);
    assert!(calls.iter().all(|c| c.thread.as_deref() == Some("callback-t")));
}

#[test]
fn test_queued_events_dropped_by_release() {
    let setup = Setup::new("callback-t");
    let recorder = Arc::new(Recorder::default());
    let (room, raw) = setup.connect(recorder.clone());

    // Park the callback thread so the next events stay queued
    let (release_gate, gate) = mpsc::channel::<()>();
    setup.callbacks.handle().post(move || {
        let _ = gate.recv_timeout(WAIT);
    });
    for sid in ["PA1", "PA2"] {
        assert!(setup.engine.emit(raw, setup.joined(sid)));
    }

    room.release().unwrap();
    release_gate.send(()).unwrap();
    setup.settle();

    assert!(recorder.calls().is_empty());
}

struct BlockingListener {
    entered: Mutex<mpsc::Sender<()>>,
    proceed: Mutex<mpsc::Receiver<()>>,
    saw_released: Mutex<Option<bool>>,
}

impl RoomListener for BlockingListener {
    fn on_connected(&self, _room: &Room) {}

    fn on_connect_failure(&self, _room: &Room, _error: &RoomError) {}

    fn on_disconnected(&self, _room: &Room, _error: Option<&RoomError>) {}

    fn on_participant_connected(&self, _room: &Room, participant: &Arc<RemoteParticipant>) {
        let _ = self.entered.lock().send(());
        let _ = self.proceed.lock().recv_timeout(WAIT);
        *self.saw_released.lock() = Some(participant.is_released());
    }
}

#[test]
fn test_release_waits_for_in_flight_callback() {
    let setup = Setup::new("callback-t");
    let (entered_tx, entered_rx) = mpsc::channel();
    let (proceed_tx, proceed_rx) = mpsc::channel();
    let listener = Arc::new(BlockingListener {
        entered: Mutex::new(entered_tx),
        proceed: Mutex::new(proceed_rx),
        saw_released: Mutex::new(None),
    });
    let (room, raw) = setup.connect(listener.clone());

    assert!(setup.engine.emit(raw, setup.joined("PA1")));
    entered_rx.recv_timeout(WAIT).unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    let releasing = room.clone();
    let releaser = thread::spawn(move || {
        releasing.release().unwrap();
        done_tx.send(()).unwrap();
    });

    // Release must not finish while the listener is still inside its callback
    assert!(done_rx.recv_timeout(Duration::from_millis(200)).is_err());
    proceed_tx.send(()).unwrap();
    done_rx.recv_timeout(WAIT).unwrap();
    releaser.join().unwrap();

    assert_eq!(*listener.saw_released.lock(), Some(false));
    assert_eq!(setup.engine.live(ResourceKind::RemoteParticipant), 0);
}

#[test]
fn test_participant_listener_runs_on_its_own_thread() {
    let setup = Setup::new("room-thread");
    let participant_thread = CallbackThread::spawn("participant-thread").unwrap();
    let room_recorder = Arc::new(Recorder::default());
    let track_recorder = Arc::new(Recorder::default());
    let (room, raw) = setup.connect(room_recorder.clone());

    setup.engine.emit(
        raw,
        RoomEvent::Connected {
            room_sid: RoomSid::new("RM1").unwrap(),
            local_participant: ParticipantInfo {
                sid: ParticipantSid::new("PA0").unwrap(),
                identity: "me".to_string(),
                handle: setup.engine.allocate(ResourceKind::LocalParticipant),
                publications: vec![],
            },
            participants: vec![],
        },
    );
    setup.engine.emit(raw, setup.joined("PA1"));
    setup.settle();

    let alice = room.remote_participant(&ParticipantSid::new("PA1").unwrap()).unwrap();
    alice
        .set_listener(track_recorder.clone(), participant_thread.handle())
        .unwrap();

    setup.engine.emit(
        raw,
        RoomEvent::TrackSubscribed {
            participant_sid: alice.sid().clone(),
            publication: TrackPublication {
                sid: TrackSid::new("MT1").unwrap(),
                name: "camera".to_string(),
                kind: TrackKind::Video,
                enabled: true,
            },
            handle: setup.engine.allocate(ResourceKind::RemoteTrack),
        },
    );
    setup.settle();
    assert!(participant_thread.handle().barrier(WAIT));

    let room_calls = room_recorder.calls();
    assert!(room_calls.iter().all(|c| c.thread.as_deref() == Some("room-thread")));
    assert_eq!(
        track_recorder.calls(),
        vec![Call {
            what: "subscribed:MT1".to_string(),
            thread: Some("participant-thread".to_string()),
        }]
    );

    room.release().unwrap();
}

struct ReleasesRoom {
    room: Mutex<Option<Arc<Room>>>,
    done: Mutex<mpsc::Sender<()>>,
}

impl RemoteParticipantListener for ReleasesRoom {
    fn on_track_subscribed(&self, _participant: &RemoteParticipant, _track: &Arc<RemoteTrack>) {
        // Give the room thread time to take the participant's departure
        thread::sleep(Duration::from_millis(100));
        let room = self.room.lock().take();
        if let Some(room) = room {
            room.release().unwrap();
            let _ = self.done.lock().send(());
        }
    }
}

#[test]
fn test_participant_listener_releases_room_while_participant_leaves() {
    let setup = Setup::new("room-thread");
    let participant_thread = CallbackThread::spawn("participant-thread").unwrap();
    let (room, raw) = setup.connect(Arc::new(Recorder::default()));
    setup.engine.emit(raw, setup.joined("PA1"));
    setup.settle();

    let (done_tx, done_rx) = mpsc::channel();
    let alice = room.remote_participant(&ParticipantSid::new("PA1").unwrap()).unwrap();
    alice
        .set_listener(
            Arc::new(ReleasesRoom {
                room: Mutex::new(Some(room.clone())),
                done: Mutex::new(done_tx),
            }),
            participant_thread.handle(),
        )
        .unwrap();

    setup.engine.emit(
        raw,
        RoomEvent::TrackSubscribed {
            participant_sid: alice.sid().clone(),
            publication: TrackPublication {
                sid: TrackSid::new("MT1").unwrap(),
                name: "mic".to_string(),
                kind: TrackKind::Audio,
                enabled: true,
            },
            handle: setup.engine.allocate(ResourceKind::RemoteTrack),
        },
    );
    setup.engine.emit(
        raw,
        RoomEvent::ParticipantDisconnected {
            participant_sid: alice.sid().clone(),
        },
    );

    done_rx
        .recv_timeout(Duration::from_secs(3))
        .expect("room release from the participant thread did not finish");
    setup.settle();
    assert!(participant_thread.handle().barrier(WAIT));
    setup.settle();

    assert!(room.is_released());
    assert!(alice.is_released());
    for kind in [
        ResourceKind::Room,
        ResourceKind::RemoteParticipant,
        ResourceKind::RemoteTrack,
    ] {
        assert_eq!(setup.engine.live(kind), 0, "{} leaked", kind);
    }
    assert_eq!(setup.runtime.media_factory_count(), 0);
    assert_eq!(setup.engine.invalid_releases(), 0);
}
