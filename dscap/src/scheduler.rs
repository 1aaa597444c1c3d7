//! Background capture workers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::capture::loopy_ds::{reconstruct, CarryOver, FrameGrabber, FrameInfo};
use crate::capture::Transport;
use crate::config::CaptureConfig;
use crate::error::{Error, Result};
use crate::frame::SharedFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Running,
    Stopping,
}

/// Outcome of one frame attempt, handed to the status callback.
#[derive(Debug)]
pub enum FrameStatus<'a> {
    Published(&'a FrameInfo),
    Failed(&'a Error),
}

/// Called by a worker after every frame attempt with its worker index.
pub type StatusCallback = Arc<dyn Fn(usize, FrameStatus<'_>) + Send + Sync>;

#[derive(Debug, Default)]
pub struct CaptureStats {
    published: AtomicU64,
    failed: AtomicU64,
    lines_received: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Frames written to the shared buffer.
    pub published: u64,
    /// Frame attempts that were dropped.
    pub failed: u64,
    /// Lines taken from payloads, out of 384 per frame.
    pub lines_received: u64,
}

impl CaptureStats {
    pub(crate) fn record_published(&self, lines: usize) {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.lines_received
            .fetch_add(lines as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            lines_received: self.lines_received.load(Ordering::Relaxed),
        }
    }
}

/// Owns the worker threads of one session.
pub(crate) struct Scheduler {
    state: CaptureState,
    stop: Option<Sender<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self {
            state: CaptureState::Idle,
            stop: None,
            workers: Vec::new(),
        }
    }

    pub(crate) fn state(&self) -> CaptureState {
        self.state
    }

    pub(crate) fn start<T: Transport + 'static>(
        &mut self,
        transport: &Arc<Mutex<T>>,
        frame: SharedFrame,
        config: &CaptureConfig,
        stats: &Arc<CaptureStats>,
        callback: Option<StatusCallback>,
    ) -> Result<()> {
        if self.state != CaptureState::Idle {
            return Err(Error::AlreadyRunning);
        }

        let count = if config.workers == 0 {
            warn!("worker count of 0 requested, starting 1");
            1
        } else {
            config.workers
        };

        // nothing is ever sent; dropping the sender is the stop signal
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);

        for id in 0..count {
            let worker = Worker {
                id,
                transport: Arc::clone(transport),
                frame: Arc::clone(&frame),
                stats: Arc::clone(stats),
                callback: callback.clone(),
                carry: config.carry,
                backoff: config.retry_backoff,
                stop: stop_rx.clone(),
                grabber: FrameGrabber::new(),
            };

            let spawned = thread::Builder::new()
                .name(format!("dscap-worker-{}", id))
                .spawn(move || worker.run());

            match spawned {
                Ok(handle) => self.workers.push(handle),
                Err(err) => {
                    drop(stop_tx);
                    self.join_all();
                    return Err(Error::Spawn(err));
                }
            }
        }

        info!("Started capture with {} worker(s)", count);
        self.stop = Some(stop_tx);
        self.state = CaptureState::Running;
        Ok(())
    }

    /// Signal every worker and wait for each to finish its current frame.
    pub(crate) fn stop(&mut self) {
        if self.state != CaptureState::Running {
            return;
        }

        self.state = CaptureState::Stopping;
        drop(self.stop.take());
        self.join_all();
        self.state = CaptureState::Idle;
        info!("Stopped capture");
    }

    fn join_all(&mut self) {
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("capture worker panicked");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker<T> {
    id: usize,
    transport: Arc<Mutex<T>>,
    frame: SharedFrame,
    stats: Arc<CaptureStats>,
    callback: Option<StatusCallback>,
    carry: CarryOver,
    backoff: Duration,
    stop: Receiver<()>,
    grabber: FrameGrabber,
}

impl<T: Transport> Worker<T> {
    fn run(mut self) {
        debug!("worker {} running", self.id);

        loop {
            if self.stop.try_recv() != Err(TryRecvError::Empty) {
                break;
            }

            match self.cycle() {
                Ok(()) => {}
                Err(Error::Closed) => {
                    warn!("worker {}: device closed", self.id);
                    break;
                }
                Err(_) => {
                    if self.stop.recv_timeout(self.backoff) != Err(RecvTimeoutError::Timeout) {
                        break;
                    }
                }
            }
        }

        debug!("worker {} done", self.id);
    }

    fn cycle(&mut self) -> Result<()> {
        let mut device = self.transport.lock();

        let info = match self.grabber.fetch(&mut *device) {
            Ok(info) => info,
            Err(err) => {
                drop(device);
                debug!("worker {}: frame dropped: {}", self.id, err);
                self.stats.record_failed();
                self.report(FrameStatus::Failed(&err));
                return Err(err);
            }
        };

        // Take the frame before the next worker can reach the device, so
        // deltas land in the order they were captured.
        let mut frame = self.frame.lock();
        drop(device);
        let lines = reconstruct(self.grabber.payload(), &info, &mut frame, self.carry);
        drop(frame);

        self.stats.record_published(lines);
        self.report(FrameStatus::Published(&info));
        Ok(())
    }

    fn report(&self, status: FrameStatus<'_>) {
        if let Some(callback) = &self.callback {
            callback(self.id, status);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    use super::*;
    use crate::capture::loopy_ds::FRAME_SIZE;
    use crate::capture::testing::{
        counting_payload, frame_replies, info_with_lines, Reply, ScriptHandle, ScriptedTransport,
    };
    use crate::frame::DualFrame;

    fn setup() -> (Arc<Mutex<ScriptedTransport>>, ScriptHandle) {
        let (transport, script) = ScriptedTransport::new();
        (Arc::new(Mutex::new(transport)), script)
    }

    fn config() -> CaptureConfig {
        CaptureConfig::default().with_retry_backoff(Duration::from_millis(1))
    }

    fn wait_for(stats: &CaptureStats, check: impl Fn(StatsSnapshot) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !check(stats.snapshot()) {
            assert!(Instant::now() < deadline, "timed out: {:?}", stats.snapshot());
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn publishes_exactly_the_good_frames() {
        let (transport, script) = setup();
        let payload = counting_payload();
        for _ in 0..3 {
            script.push(frame_replies(&payload, &info_with_lines(0..384, true), 0x4000));
        }

        let frame = DualFrame::shared();
        let stats = Arc::new(CaptureStats::default());
        let mut scheduler = Scheduler::new();
        scheduler
            .start(&transport, frame.clone(), &config(), &stats, None)
            .unwrap();
        assert_eq!(scheduler.state(), CaptureState::Running);

        // script runs dry after three frames, every later attempt fails
        wait_for(&stats, |s| s.published == 3 && s.failed > 0);
        scheduler.stop();

        assert_eq!(scheduler.state(), CaptureState::Idle);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.published, 3);
        assert_eq!(snapshot.lines_received, 3 * 384);
        assert_eq!(script.remaining(), 0);
        assert!(frame.lock().is_primed());
    }

    #[test]
    fn failed_start_command_keeps_worker_alive() {
        let (transport, script) = setup();
        script.push([Reply::Control(Err(Error::Transfer(rusb::Error::Io)))]);
        script.push(frame_replies(
            &counting_payload(),
            &info_with_lines(0..384, true),
            0x8000,
        ));

        let failures = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&failures);
        let callback: StatusCallback = Arc::new(move |_: usize, status: FrameStatus<'_>| {
            if let FrameStatus::Failed(Error::Transfer(rusb::Error::Io)) = status {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        let frame = DualFrame::shared();
        let stats = Arc::new(CaptureStats::default());
        let mut scheduler = Scheduler::new();
        scheduler
            .start(&transport, frame.clone(), &config(), &stats, Some(callback))
            .unwrap();

        wait_for(&stats, |s| s.published == 1);
        scheduler.stop();

        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert_eq!(frame.lock().top()[0], 1);
    }

    #[test]
    fn invalid_frame_leaves_buffer_untouched() {
        let (transport, script) = setup();
        script.push(frame_replies(
            &counting_payload(),
            &info_with_lines(0..384, false),
            0x8000,
        ));

        let frame = DualFrame::shared();
        let stats = Arc::new(CaptureStats::default());
        let mut scheduler = Scheduler::new();
        scheduler
            .start(&transport, frame.clone(), &config(), &stats, None)
            .unwrap();

        wait_for(&stats, |s| s.failed >= 2);
        scheduler.stop();

        let frame = frame.lock();
        assert_eq!(stats.snapshot().published, 0);
        assert!(!frame.is_primed());
        assert!(frame.pixels().iter().all(|&p| p == 0));
    }

    #[test]
    fn second_start_is_refused() {
        let (transport, _script) = setup();
        let frame = DualFrame::shared();
        let stats = Arc::new(CaptureStats::default());
        let mut scheduler = Scheduler::new();

        scheduler
            .start(&transport, frame.clone(), &config(), &stats, None)
            .unwrap();
        assert!(matches!(
            scheduler.start(&transport, frame, &config(), &stats, None),
            Err(Error::AlreadyRunning)
        ));
        scheduler.stop();
        // stopping twice is harmless
        scheduler.stop();
        assert_eq!(scheduler.state(), CaptureState::Idle);
    }

    #[test]
    fn several_workers_share_one_device() {
        let (transport, script) = setup();
        let payload = counting_payload();
        for _ in 0..8 {
            script.push(frame_replies(&payload, &info_with_lines(0..384, true), 0x4000));
        }

        let frame = DualFrame::shared();
        let stats = Arc::new(CaptureStats::default());
        let mut scheduler = Scheduler::new();
        scheduler
            .start(&transport, frame.clone(), &config().with_workers(3), &stats, None)
            .unwrap();

        wait_for(&stats, |s| s.published == 8);
        scheduler.stop();

        // exchanges never interleaved: every frame came through whole
        assert_eq!(stats.snapshot().lines_received, 8 * 384);
        assert_eq!(frame.lock().bottom()[1], 2);
    }

    #[test]
    fn closed_device_ends_workers() {
        let (transport, _script) = setup();
        transport.lock().close();

        let stats = Arc::new(CaptureStats::default());
        let mut scheduler = Scheduler::new();
        scheduler
            .start(&transport, DualFrame::shared(), &config(), &stats, None)
            .unwrap();

        wait_for(&stats, |s| s.failed == 1);
        scheduler.stop();
        assert_eq!(stats.snapshot().failed, 1);
    }

    /// Parks every bulk read until the test lets it through.
    struct GatedTransport {
        inner: ScriptedTransport,
        entered: Sender<()>,
        release: Receiver<()>,
    }

    impl Transport for GatedTransport {
        fn control_transfer(
            &mut self,
            request: crate::capture::ControlRequest,
            buf: &mut [u8],
        ) -> Result<usize> {
            self.inner.control_transfer(request, buf)
        }

        fn bulk_read(&mut self, buf: &mut [u8]) -> Result<usize> {
            let _ = self.entered.send(());
            let _ = self.release.recv();
            self.inner.bulk_read(buf)
        }

        fn close(&mut self) {
            self.inner.close();
        }

        fn is_open(&self) -> bool {
            self.inner.is_open()
        }
    }

    #[test]
    fn stop_waits_for_frame_in_flight() {
        let (inner, script) = ScriptedTransport::new();
        script.push(frame_replies(
            &counting_payload(),
            &info_with_lines(0..384, true),
            FRAME_SIZE,
        ));

        let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
        let (release_tx, release_rx) = crossbeam_channel::bounded(0);
        let transport = Arc::new(Mutex::new(GatedTransport {
            inner,
            entered: entered_tx,
            release: release_rx,
        }));

        let stats = Arc::new(CaptureStats::default());
        let mut scheduler = Scheduler::new();
        scheduler
            .start(&transport, DualFrame::shared(), &config(), &stats, None)
            .unwrap();

        // worker is now blocked inside the frame exchange
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let stopper = thread::spawn(move || {
            scheduler.stop();
            done_tx.send(()).unwrap();
            scheduler
        });

        assert_eq!(
            done_rx.recv_timeout(Duration::from_millis(100)),
            Err(RecvTimeoutError::Timeout)
        );
        assert_eq!(stats.snapshot().published, 0);

        release_tx.send(()).unwrap();
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let scheduler = stopper.join().unwrap();

        assert_eq!(scheduler.state(), CaptureState::Idle);
        assert_eq!(stats.snapshot().published, 1);
        assert_eq!(script.remaining(), 0);
    }
}
