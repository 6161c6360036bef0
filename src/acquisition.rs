//! Single-slot frame mailbox and the grab thread that feeds it.
//!
//! The grab thread publishes every completed frame into a [`FrameSlot`].
//! The slot keeps only the latest frame: a frame that is overwritten before
//! any consumer surfaced it counts as dropped. Consumers either block in
//! [`FrameSlot::await_frame`] or poll with [`FrameSlot::take`].
//!
//! Every streaming run is an epoch. Publishes tagged with an older epoch are
//! discarded, so a grab thread that is still shutting down can never leak a
//! frame into the next run. The binning an epoch was started with travels
//! with each of its frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, trace, warn};

use crate::error::{CameraError, Result};
use crate::params::Binning;
use crate::pixel_format::FormatCode;
use crate::traits::{CaptureStream, RawFrame};

/// Opaque reference to the frame currently held by a session's slot.
///
/// Valid until the next frame is published into the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHandle {
    /// Slot-wide publish counter, starting at 1.
    pub sequence: u64,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Declared pixel format.
    pub format: FormatCode,
    /// Length of the raw buffer in bytes.
    pub byte_len: usize,
    /// Capture timestamp reported by the device.
    pub timestamp: Duration,
}

/// Counters for one session's mailbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquisitionStats {
    /// Frames accepted into the slot.
    pub published: u64,
    /// Frames handed to a consumer.
    pub surfaced: u64,
    /// Frames overwritten before any consumer saw them.
    pub dropped: u64,
    /// The grab thread of the current run gave up after repeated stream
    /// errors. Cleared by the next run.
    pub faulted: bool,
}

/// Outcome of a blocking wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// A frame newer than the last surfaced one.
    Frame(FrameHandle),
    /// Streaming was stopped or the session destroyed.
    Cancelled,
    /// The deadline passed.
    TimedOut,
}

struct Published {
    sequence: u64,
    binning: Binning,
    frame: Arc<RawFrame>,
}

impl Published {
    fn handle(&self) -> FrameHandle {
        FrameHandle {
            sequence: self.sequence,
            width: self.frame.width,
            height: self.frame.height,
            format: self.frame.format,
            byte_len: self.frame.data.len(),
            timestamp: self.frame.metadata.timestamp,
        }
    }
}

#[derive(Default)]
struct SlotState {
    epoch: u64,
    binning: Binning,
    streaming: bool,
    closed: bool,
    next_sequence: u64,
    surfaced: u64,
    latest: Option<Published>,
    stats: AcquisitionStats,
}

impl SlotState {
    fn surface(&mut self) -> Option<FrameHandle> {
        let published = self.latest.as_ref()?;
        let handle = published.handle();
        if published.sequence > self.surfaced {
            self.surfaced = published.sequence;
            self.stats.surfaced += 1;
        }
        Some(handle)
    }

    fn has_unsurfaced(&self) -> bool {
        self.latest
            .as_ref()
            .is_some_and(|published| published.sequence > self.surfaced)
    }
}

/// Depth-1 mailbox between a grab thread and any number of consumers.
#[derive(Default)]
pub struct FrameSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl FrameSlot {
    /// Create an empty, idle slot.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a new streaming epoch whose frames were captured under
    /// `binning`, discarding any retained frame.
    pub fn begin(&self, binning: Binning) -> u64 {
        let mut state = self.lock();
        state.epoch += 1;
        state.binning = binning;
        state.streaming = true;
        state.stats.faulted = false;
        state.latest = None;
        state.surfaced = state.next_sequence;
        state.epoch
    }

    /// Close the current epoch and wake every waiter. The last frame stays
    /// available to [`FrameSlot::take`].
    pub fn end(&self) {
        self.lock().streaming = false;
        self.ready.notify_all();
    }

    /// Close `epoch` after its producer failed, flagging the fault in
    /// [`FrameSlot::stats`].
    pub fn fault(&self, epoch: u64) {
        let mut state = self.lock();
        if state.epoch == epoch && state.streaming {
            state.streaming = false;
            state.stats.faulted = true;
        }
        drop(state);
        self.ready.notify_all();
    }

    /// Permanently close the slot, releasing the retained frame.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.streaming = false;
        state.latest = None;
        drop(state);
        self.ready.notify_all();
    }

    /// Store `frame` as the latest frame of `epoch`.
    ///
    /// Returns `false` if the epoch is over and the frame was discarded.
    pub fn publish(&self, epoch: u64, frame: RawFrame) -> bool {
        let mut state = self.lock();
        if state.closed || !state.streaming || state.epoch != epoch {
            return false;
        }

        if state.has_unsurfaced() {
            state.stats.dropped += 1;
            trace!(dropped = state.stats.dropped, "Overwrote unconsumed frame");
        }

        state.next_sequence += 1;
        let sequence = state.next_sequence;
        state.latest = Some(Published {
            sequence,
            binning: state.binning,
            frame: Arc::new(frame),
        });
        state.stats.published += 1;
        drop(state);

        self.ready.notify_all();
        true
    }

    /// Block until a frame newer than the last surfaced one arrives, the
    /// epoch ends, or `timeout` elapses. `None` waits without a deadline.
    pub fn await_frame(&self, timeout: Option<Duration>) -> Wakeup {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.lock();
        let epoch = state.epoch;

        loop {
            if state.closed || !state.streaming || state.epoch != epoch {
                return Wakeup::Cancelled;
            }
            if state.has_unsurfaced() {
                if let Some(handle) = state.surface() {
                    return Wakeup::Frame(handle);
                }
            }

            state = match deadline {
                None => self
                    .ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Wakeup::TimedOut;
                    }
                    self.ready
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Latest completed frame of the current or last run, without blocking.
    pub fn take(&self) -> Option<FrameHandle> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        state.surface()
    }

    /// Raw frame behind `handle`, if it has not been recycled.
    pub fn frame(&self, handle: &FrameHandle) -> Result<Arc<RawFrame>> {
        let state = self.lock();
        match &state.latest {
            Some(published) if published.sequence == handle.sequence => {
                Ok(Arc::clone(&published.frame))
            }
            _ => Err(CameraError::StaleFrame),
        }
    }

    /// Raw frame behind `handle` together with the binning of the run that
    /// captured it.
    pub fn captured(&self, handle: &FrameHandle) -> Result<(Arc<RawFrame>, Binning)> {
        let state = self.lock();
        match &state.latest {
            Some(published) if published.sequence == handle.sequence => {
                Ok((Arc::clone(&published.frame), published.binning))
            }
            _ => Err(CameraError::StaleFrame),
        }
    }

    /// Whether an epoch is open.
    pub fn is_streaming(&self) -> bool {
        self.lock().streaming
    }

    /// Mailbox counters.
    pub fn stats(&self) -> AcquisitionStats {
        self.lock().stats
    }
}

/// Grab thread tuning.
#[derive(Debug, Clone, Copy)]
pub struct GrabberConfig {
    /// How long one poll of the stream may block.
    pub poll_interval: Duration,
    /// Consecutive stream errors after which the thread gives up.
    pub max_consecutive_errors: u32,
}

/// Background thread moving frames from a device stream into a slot.
pub struct Grabber {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Grabber {
    /// Spawn `grab-<serial>` feeding `slot` for `epoch`.
    pub fn spawn(
        serial: &str,
        mut stream: Box<dyn CaptureStream>,
        slot: Arc<FrameSlot>,
        epoch: u64,
        config: GrabberConfig,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let serial_owned = serial.to_owned();

        let thread = thread::Builder::new()
            .name(format!("grab-{serial}"))
            .spawn(move || {
                let mut consecutive_errors = 0u32;
                while flag.load(Ordering::Acquire) {
                    match stream.next_frame(config.poll_interval) {
                        Ok(Some(frame)) => {
                            consecutive_errors = 0;
                            if !slot.publish(epoch, frame) {
                                trace!(serial = %serial_owned, epoch, "Discarded frame from finished run");
                            }
                        }
                        Ok(None) => {}
                        Err(err) => {
                            consecutive_errors += 1;
                            warn!(serial = %serial_owned, error = %err, consecutive_errors, "Frame grab failed");
                            if consecutive_errors >= config.max_consecutive_errors {
                                error!(serial = %serial_owned, "Too many grab errors, stopping acquisition");
                                slot.fault(epoch);
                                break;
                            }
                        }
                    }
                }
                debug!(serial = %serial_owned, epoch, "Grab thread exiting");
            })?;

        Ok(Self {
            running,
            thread: Some(thread),
        })
    }

    /// Signal the thread and wait for it to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Grab thread panicked");
            }
        }
    }
}

impl Drop for Grabber {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::FrameMetadata;

    fn frame(sequence: u32) -> RawFrame {
        RawFrame {
            data: vec![0; 16],
            width: 4,
            height: 4,
            format: FormatCode(44),
            metadata: FrameMetadata {
                sequence,
                timestamp: Duration::from_millis(u64::from(sequence)),
                bytes_used: 16,
            },
        }
    }

    #[test]
    fn test_take_before_any_frame() {
        let slot = FrameSlot::new();
        assert!(slot.take().is_none());
        slot.begin(Binning::NONE);
        assert!(slot.take().is_none());
    }

    #[test]
    fn test_latest_frame_wins() {
        let slot = FrameSlot::new();
        let epoch = slot.begin(Binning::NONE);
        assert!(slot.publish(epoch, frame(1)));
        assert!(slot.publish(epoch, frame(2)));

        let handle = slot.take().expect("frame expected");
        assert_eq!(handle.timestamp, Duration::from_millis(2));
        assert_eq!(slot.stats().dropped, 1);
        assert_eq!(slot.stats().surfaced, 1);
    }

    #[test]
    fn test_await_returns_only_newer_frames() {
        let slot = FrameSlot::new();
        let epoch = slot.begin(Binning::NONE);
        slot.publish(epoch, frame(1));

        let first = slot.await_frame(Some(Duration::from_millis(10)));
        assert!(matches!(first, Wakeup::Frame(_)));

        let second = slot.await_frame(Some(Duration::from_millis(10)));
        assert_eq!(second, Wakeup::TimedOut);
    }

    #[test]
    fn test_recycled_frame_is_stale() {
        let slot = FrameSlot::new();
        let epoch = slot.begin(Binning::NONE);
        slot.publish(epoch, frame(1));
        let handle = slot.take().expect("frame expected");
        assert!(slot.frame(&handle).is_ok());

        slot.publish(epoch, frame(2));
        assert!(matches!(slot.frame(&handle), Err(CameraError::StaleFrame)));
    }

    #[test]
    fn test_stale_epoch_publish_discarded() {
        let slot = FrameSlot::new();
        let old = slot.begin(Binning::NONE);
        slot.end();
        let current = slot.begin(Binning::NONE);
        assert!(!slot.publish(old, frame(1)));
        assert!(slot.take().is_none());
        assert!(slot.publish(current, frame(2)));
    }

    #[test]
    fn test_begin_clears_previous_run() {
        let slot = FrameSlot::new();
        let epoch = slot.begin(Binning::NONE);
        slot.publish(epoch, frame(1));
        slot.end();
        assert!(slot.take().is_some());

        slot.begin(Binning::NONE);
        assert!(slot.take().is_none());
    }

    #[test]
    fn test_end_unblocks_waiter() {
        let slot = Arc::new(FrameSlot::new());
        slot.begin(Binning::NONE);

        let waiter = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || slot.await_frame(None))
        };
        thread::sleep(Duration::from_millis(50));
        slot.end();

        let wakeup = waiter.join().expect("waiter panicked");
        assert_eq!(wakeup, Wakeup::Cancelled);
    }

    #[test]
    fn test_close_releases_frame() {
        let slot = FrameSlot::new();
        let epoch = slot.begin(Binning::NONE);
        slot.publish(epoch, frame(1));
        slot.close();
        assert!(slot.take().is_none());
        assert!(!slot.publish(epoch, frame(2)));
    }

    struct CountingStream {
        next: u32,
    }

    impl CaptureStream for CountingStream {
        fn next_frame(&mut self, _timeout: Duration) -> Result<Option<RawFrame>> {
            self.next += 1;
            thread::sleep(Duration::from_millis(2));
            Ok(Some(frame(self.next)))
        }
    }

    struct FailingStream;

    impl CaptureStream for FailingStream {
        fn next_frame(&mut self, _timeout: Duration) -> Result<Option<RawFrame>> {
            Err(CameraError::Stream("sensor unplugged".to_owned()))
        }
    }

    fn config() -> GrabberConfig {
        GrabberConfig {
            poll_interval: Duration::from_millis(10),
            max_consecutive_errors: 3,
        }
    }

    #[test]
    fn test_grabber_feeds_slot() {
        let slot = Arc::new(FrameSlot::new());
        let epoch = slot.begin(Binning::NONE);
        let mut grabber = Grabber::spawn(
            "TEST",
            Box::new(CountingStream { next: 0 }),
            Arc::clone(&slot),
            epoch,
            config(),
        )
        .expect("spawn failed");

        let wakeup = slot.await_frame(Some(Duration::from_secs(2)));
        grabber.stop();
        assert!(matches!(wakeup, Wakeup::Frame(_)), "{wakeup:?}");
        assert!(slot.stats().published >= 1);
    }

    #[test]
    fn test_grabber_gives_up_after_errors() {
        let slot = Arc::new(FrameSlot::new());
        let epoch = slot.begin(Binning::NONE);
        let _grabber = Grabber::spawn("TEST", Box::new(FailingStream), Arc::clone(&slot), epoch, config())
            .expect("spawn failed");

        let wakeup = slot.await_frame(Some(Duration::from_secs(2)));
        assert_eq!(wakeup, Wakeup::Cancelled);
        assert!(!slot.is_streaming());
        assert!(slot.stats().faulted);

        slot.begin(Binning::NONE);
        assert!(!slot.stats().faulted, "a new run clears the fault");
    }

    #[test]
    fn test_fault_ignores_finished_epoch() {
        let slot = FrameSlot::new();
        let old = slot.begin(Binning::NONE);
        slot.end();
        slot.begin(Binning::NONE);
        slot.fault(old);
        assert!(slot.is_streaming());
        assert!(!slot.stats().faulted);
    }

    #[test]
    fn test_frame_keeps_binning_of_its_run() {
        let slot = FrameSlot::new();
        let binning = Binning::new(crate::params::BinningMode::Sum, 2, 2).expect("binning");
        let epoch = slot.begin(binning);
        slot.publish(epoch, frame(1));
        slot.end();

        let handle = slot.take().expect("frame expected");
        let (_, captured_with) = slot.captured(&handle).expect("frame expected");
        assert_eq!(captured_with, binning);
    }
}
