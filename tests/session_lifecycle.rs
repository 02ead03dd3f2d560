//! End-to-end session lifecycle tests against an in-memory muxer.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use sensor_recorder::mux::{MuxerFactory, MuxerProcess, StreamSink, StreamSpec};
use sensor_recorder::{
    RecorderError, RecorderStatus, RecordingConfig, RecordingSession, SensorChannel,
    SensorControl, SensorDescriptor, SensorEvent, SensorKind, SessionState, SourceId,
    WakeupPolicy,
};

const MS: i64 = 1_000_000; // nanoseconds

#[derive(Default)]
struct SinkState {
    data: Vec<u8>,
    closes: usize,
    fail_writes: bool,
}

struct MemorySink(Arc<Mutex<SinkState>>);

impl StreamSink for MemorySink {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        let mut state = self.0.lock();
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink broken"));
        }
        state.data.extend_from_slice(frame);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.0.lock().closes += 1;
        Ok(())
    }
}

struct MemoryMuxer {
    sinks: Vec<Arc<Mutex<SinkState>>>,
}

impl MuxerProcess for MemoryMuxer {
    fn take_sink(&mut self, index: usize) -> Result<Box<dyn StreamSink>, RecorderError> {
        Ok(Box::new(MemorySink(Arc::clone(&self.sinks[index]))))
    }

    fn wait(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Factory that exposes every spawned sink to the test.
#[derive(Default)]
struct MemoryMuxerFactory {
    sinks: Mutex<Vec<Arc<Mutex<SinkState>>>>,
    tags: Mutex<Vec<(String, String)>>,
    spawned: Mutex<usize>,
}

impl MemoryMuxerFactory {
    fn sink(&self, index: usize) -> Arc<Mutex<SinkState>> {
        Arc::clone(&self.sinks.lock()[index])
    }
}

impl MuxerFactory for MemoryMuxerFactory {
    fn spawn(
        &self,
        streams: &[StreamSpec],
        tags: &[(String, String)],
    ) -> Result<Box<dyn MuxerProcess>, RecorderError> {
        let sinks: Vec<_> = streams
            .iter()
            .map(|_| Arc::new(Mutex::new(SinkState::default())))
            .collect();
        *self.sinks.lock() = sinks.clone();
        *self.tags.lock() = tags.to_vec();
        *self.spawned.lock() += 1;
        Ok(Box::new(MemoryMuxer { sinks }))
    }
}

/// Host-side control that answers flush requests with an immediate
/// flush-completed signal, the way a drained hardware queue would.
#[derive(Default)]
struct TestControl {
    channels: Mutex<Vec<Arc<SensorChannel>>>,
    flushed: Mutex<Vec<SourceId>>,
    unregistered: Mutex<Vec<SourceId>>,
}

impl TestControl {
    fn adopt(&self, channels: &[Arc<SensorChannel>]) {
        self.channels.lock().extend(channels.iter().cloned());
    }
}

impl SensorControl for TestControl {
    fn flush(&self, source: SourceId) {
        self.flushed.lock().push(source);
        if let Some(channel) = self
            .channels
            .lock()
            .iter()
            .find(|c| c.source_id() == source)
        {
            channel.flush_completed();
        }
    }

    fn unregister(&self, source: SourceId) {
        self.unregistered.lock().push(source);
    }
}

fn descriptors() -> Vec<SensorDescriptor> {
    vec![
        SensorDescriptor::new(SourceId(0), SensorKind::Accelerometer, "accelerometer")
            .with_wakeup(true)
            .with_fifo_depth(100),
        SensorDescriptor::new(SourceId(1), SensorKind::Light, "light"),
    ]
}

fn event(source: SourceId, timestamp_ns: i64, values: &[f32]) -> SensorEvent {
    SensorEvent { source, timestamp_ns, values: values.to_vec() }
}

fn session() -> (RecordingSession, Arc<TestControl>, Arc<MemoryMuxerFactory>) {
    let control = Arc::new(TestControl::default());
    let factory = Arc::new(MemoryMuxerFactory::default());
    let session = RecordingSession::new(
        RecordingConfig::default(),
        Arc::<TestControl>::clone(&control),
        Arc::<MemoryMuxerFactory>::clone(&factory),
    );
    (session, control, factory)
}

/// Push the first event of each source from its own thread, as the hardware
/// would, and wait until the barrier has released them all.
fn resolve_barrier(session: &RecordingSession, firsts: &[(SourceId, i64, Vec<f32>)]) {
    let workers: Vec<_> = firsts
        .iter()
        .map(|(source, ts, values)| {
            let channel = session.channel(*source).unwrap();
            let event = event(*source, *ts, values);
            thread::spawn(move || channel.push(&event))
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
}

#[test]
fn test_full_lifecycle() {
    let (mut session, control, factory) = session();
    assert_eq!(session.state(), SessionState::Idle);

    session.start(&descriptors()).unwrap();
    assert_eq!(session.state(), SessionState::Starting);
    assert_eq!(session.status(), RecorderStatus::Preparing);
    control.adopt(session.channels());

    // barrier resolves at the maximum of the first timestamps
    resolve_barrier(
        &session,
        &[
            (SourceId(0), 100 * MS, vec![0.0; 3]),
            (SourceId(1), 250 * MS, vec![0.0]),
        ],
    );
    assert_eq!(session.state(), SessionState::Recording);
    assert_eq!(session.status(), RecorderStatus::Recording);

    // accelerometer first event (100ms) predates the 250ms start instant
    let accel = session.channel(SourceId(0)).unwrap();
    let light = session.channel(SourceId(1)).unwrap();
    assert_eq!(accel.samples_written(), 0);
    assert_eq!(light.samples_written(), 1);

    // steady 50 Hz delivery on both channels
    for i in 1..=10 {
        accel.push(&event(SourceId(0), (250 + 20 * i) * MS, &[1.0, 2.0, 3.0]));
        light.push(&event(SourceId(1), (250 + 20 * i) * MS, &[42.0]));
    }
    assert_eq!(accel.samples_written(), 10);
    assert_eq!(light.samples_written(), 11);

    let summary = session.stop().expect("active session yields a summary");
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.status(), RecorderStatus::Stopped);
    assert_eq!(summary.start_instant_ns, Some(250 * MS));
    assert_eq!(summary.streams.len(), 2);
    assert_eq!(summary.streams[0].samples, 10);
    assert_eq!(summary.streams[1].samples, 11);
    assert!(!summary.streams[0].failed);

    // every sink closed exactly once, all output in whole frames
    for (index, frame_len) in [(0, 12), (1, 4)] {
        let sink = factory.sink(index);
        let sink = sink.lock();
        assert_eq!(sink.closes, 1);
        assert_eq!(sink.data.len() % frame_len, 0);
    }
    assert_eq!(control.flushed.lock().len(), 2);

    // stop is idempotent: no second close, no error
    assert!(session.stop().is_none());
    assert_eq!(factory.sink(0).lock().closes, 1);
}

#[test]
fn test_start_while_active_is_a_noop() {
    let (mut session, control, factory) = session();
    session.start(&descriptors()).unwrap();
    control.adopt(session.channels());

    session.start(&descriptors()).unwrap();
    assert_eq!(*factory.spawned.lock(), 1);
    assert_eq!(session.state(), SessionState::Starting);

    session.stop();
}

#[test]
fn test_sink_failure_does_not_stop_siblings() {
    let (mut session, control, factory) = session();
    session.start(&descriptors()).unwrap();
    control.adopt(session.channels());
    resolve_barrier(
        &session,
        &[
            (SourceId(0), 0, vec![0.0; 3]),
            (SourceId(1), 0, vec![0.0]),
        ],
    );

    factory.sink(0).lock().fail_writes = true;

    let accel = session.channel(SourceId(0)).unwrap();
    let light = session.channel(SourceId(1)).unwrap();
    accel.push(&event(SourceId(0), 20 * MS, &[1.0; 3]));
    assert!(accel.is_failed());
    assert_eq!(control.unregistered.lock().as_slice(), &[SourceId(0)]);

    // the sibling keeps recording
    for i in 1..=5 {
        light.push(&event(SourceId(1), 20 * i * MS, &[1.0]));
    }
    assert_eq!(light.samples_written(), 6);

    let summary = session.stop().unwrap();
    assert!(summary.streams[0].failed);
    assert!(!summary.streams[1].failed);
    assert_eq!(summary.streams[1].samples, 6);
    // the broken sink is dropped without a close; the healthy one closes once
    assert_eq!(factory.sink(0).lock().closes, 0);
    assert_eq!(factory.sink(1).lock().closes, 1);
}

#[test]
fn test_stop_releases_a_stuck_barrier() {
    let (mut session, control, _factory) = session();
    session.start(&descriptors()).unwrap();
    control.adopt(session.channels());

    // only one of two sources ever reports; its push stays blocked
    let accel = session.channel(SourceId(0)).unwrap();
    let blocked = thread::spawn(move || {
        accel.push(&event(SourceId(0), 100 * MS, &[1.0; 3]));
    });

    while session.state() != SessionState::Starting {
        thread::yield_now();
    }
    let summary = session.stop().expect("stop must not deadlock");
    blocked.join().unwrap();

    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(summary.start_instant_ns, None);
    assert!(summary.streams.iter().all(|s| s.samples == 0));
}

#[test]
fn test_stuck_session_still_closes_sinks() {
    let (mut session, control, factory) = session();
    session.start(&descriptors()).unwrap();
    control.adopt(session.channels());

    session.stop().unwrap();
    assert_eq!(factory.sink(0).lock().closes, 1);
    assert_eq!(factory.sink(1).lock().closes, 1);
}

#[test]
fn test_wakeup_policy() {
    let no_wakeup = vec![SensorDescriptor::new(
        SourceId(0),
        SensorKind::Gyroscope,
        "gyroscope",
    )];

    let (mut session, _control, _factory) = session();
    assert!(matches!(
        session.start(&no_wakeup),
        Err(RecorderError::NoWakeupSource)
    ));
    assert_eq!(session.state(), SessionState::Idle);

    let control = Arc::new(TestControl::default());
    let factory = Arc::new(MemoryMuxerFactory::default());
    let config = RecordingConfig {
        wakeup_policy: WakeupPolicy::Warn,
        ..RecordingConfig::default()
    };
    let mut lenient = RecordingSession::new(config, control.clone(), factory);
    lenient.start(&no_wakeup).unwrap();
    assert_eq!(lenient.state(), SessionState::Starting);
    control.adopt(lenient.channels());
    lenient.stop();
}

#[test]
fn test_unknown_sensor_aborts_start() {
    let (mut session, _control, _factory) = session();
    let descriptors = vec![
        SensorDescriptor::new(SourceId(0), SensorKind::Accelerometer, "accelerometer")
            .with_wakeup(true),
        SensorDescriptor::new(SourceId(1), SensorKind::Other("step counter".into()), "steps"),
    ];
    assert!(matches!(
        session.start(&descriptors),
        Err(RecorderError::UnsupportedSensor(name)) if name == "steps"
    ));
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn test_duplicate_source_ids_abort_start() {
    let (mut session, _control, _factory) = session();
    let descriptors = vec![
        SensorDescriptor::new(SourceId(3), SensorKind::Accelerometer, "a").with_wakeup(true),
        SensorDescriptor::new(SourceId(3), SensorKind::Gyroscope, "b"),
    ];
    assert!(matches!(
        session.start(&descriptors),
        Err(RecorderError::DuplicateSource(SourceId(3)))
    ));
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn test_empty_descriptor_list_aborts_start() {
    let (mut session, _control, _factory) = session();
    assert!(matches!(session.start(&[]), Err(RecorderError::NoSources)));
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn test_muxer_receives_session_tags() -> anyhow::Result<()> {
    let (mut session, control, factory) = session();
    session.start(&descriptors())?;
    control.adopt(session.channels());

    let tags = factory.tags.lock().clone();
    let keys: Vec<&str> = tags.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(
        keys,
        ["recorder", "device_id", "platform", "fingerprint", "beginning"]
    );
    let beginning = &tags
        .iter()
        .find(|(k, _)| k == "beginning")
        .ok_or_else(|| anyhow::anyhow!("missing beginning tag"))?
        .1;
    // minute-precision ISO-8601 UTC, e.g. 2026-08-07T16:04Z
    assert_eq!(beginning.len(), 17);
    assert!(beginning.ends_with('Z'));
    assert!(beginning.contains('T'));

    session.stop();
    Ok(())
}

#[test]
fn test_session_events() {
    let (mut session, control, _factory) = session();
    let mut events = session.subscribe();

    session.start(&descriptors()).unwrap();
    control.adopt(session.channels());
    resolve_barrier(
        &session,
        &[
            (SourceId(0), 10 * MS, vec![0.0; 3]),
            (SourceId(1), 30 * MS, vec![0.0]),
        ],
    );
    session.stop().unwrap();

    match events.try_recv().unwrap() {
        sensor_recorder::SessionEvent::Started { start_instant_ns } => {
            assert_eq!(start_instant_ns, 30 * MS)
        }
        other => panic!("expected Started, got {:?}", other),
    }
    assert!(matches!(
        events.try_recv().unwrap(),
        sensor_recorder::SessionEvent::Stopped
    ));
}

/// A channel whose flush signal arrives only after stop() has begun
/// waiting for it: stop must block until the signal, then close cleanly.
#[test]
fn test_stop_waits_for_late_flush_signal() {
    struct LateFlushControl {
        channels: Mutex<Vec<Arc<SensorChannel>>>,
        flush_requested: Arc<AtomicBool>,
    }

    impl SensorControl for LateFlushControl {
        fn flush(&self, source: SourceId) {
            // signal completion from another thread, after a delay
            let channel = self
                .channels
                .lock()
                .iter()
                .find(|c| c.source_id() == source)
                .cloned();
            self.flush_requested.store(true, Ordering::SeqCst);
            if let Some(channel) = channel {
                thread::spawn(move || {
                    thread::sleep(std::time::Duration::from_millis(50));
                    channel.flush_completed();
                });
            }
        }

        fn unregister(&self, _source: SourceId) {}
    }

    let control = Arc::new(LateFlushControl {
        channels: Mutex::new(Vec::new()),
        flush_requested: Arc::new(AtomicBool::new(false)),
    });
    let factory = Arc::new(MemoryMuxerFactory::default());
    let mut session = RecordingSession::new(
        RecordingConfig::default(),
        control.clone(),
        Arc::<MemoryMuxerFactory>::clone(&factory),
    );

    let descriptors = vec![SensorDescriptor::new(
        SourceId(0),
        SensorKind::Accelerometer,
        "accelerometer",
    )
    .with_wakeup(true)];
    session.start(&descriptors).unwrap();
    control.channels.lock().extend(session.channels().iter().cloned());

    let accel = session.channel(SourceId(0)).unwrap();
    accel.push(&event(SourceId(0), 0, &[1.0; 3]));

    let summary = session.stop().unwrap();
    assert!(control.flush_requested.load(Ordering::SeqCst));
    assert_eq!(summary.streams[0].samples, 1);
    assert_eq!(factory.sink(0).lock().closes, 1);
}
