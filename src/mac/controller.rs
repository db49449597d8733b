//! Medium access controller for the half-duplex bus.
//!
//! A single task owns the bus. Every poll tick it drains inbound bytes,
//! cuts them into frames by declared length, and, when the line has
//! been silent long enough, transmits the head of the send queue. The
//! local echo of each transmission is compared against what was sent;
//! a mismatch means another node drove the line at the same time, and
//! the frame is retried after a random backoff.

use std::collections::VecDeque;
use std::io;

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, trace, warn};

use super::bus::{BusIo, MacConfig};
use crate::codec::{CodecError, MIN_FRAME_LEN};
use crate::core::{ConfigError, SendError};

/// Handle to a running medium access controller.
///
/// Created by [`MediumAccess::start`], which also returns the channel
/// delivering assembled inbound frames. Dropping the handle leaves the
/// task running; call [`shutdown`](Self::shutdown) to stop it.
#[derive(Debug)]
pub struct MediumAccess {
    send_tx: mpsc::UnboundedSender<Vec<u8>>,
    shutdown_tx: watch::Sender<bool>,
    max_frame_len: usize,
}

impl MediumAccess {
    /// Validate the configuration and spawn the bus task.
    ///
    /// The returned channel carries assembled inbound frames; bus I/O
    /// failures are delivered on it as errors so the consumer can
    /// report them upward.
    pub fn start<B: BusIo>(
        bus: B,
        config: MacConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<io::Result<Vec<u8>>>), ConfigError> {
        config.validate()?;
        let (send_tx, send_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let max_frame_len = config.max_frame_len;
        tokio::spawn(run(bus, config, send_rx, frame_tx, shutdown_rx));
        Ok((Self { send_tx, shutdown_tx, max_frame_len }, frame_rx))
    }

    /// Queue a wire frame for transmission.
    ///
    /// Frames leave in order, each waiting for a silent line.
    pub fn enqueue(&self, bytes: Vec<u8>) -> Result<(), SendError> {
        if bytes.len() > self.max_frame_len {
            return Err(SendError::Encode(CodecError::FrameTooLarge(bytes.len())));
        }
        self.send_tx.send(bytes).map_err(|_| SendError::ShutDown)
    }

    /// Stop the bus task. Idempotent; queued frames are dropped.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn run<B: BusIo>(
    mut bus: B,
    config: MacConfig,
    mut send_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    frame_tx: mpsc::UnboundedSender<io::Result<Vec<u8>>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut line = LineState::new(config.clone(), Instant::now());
    let mut queue: VecDeque<Vec<u8>> = VecDeque::new();
    let mut scratch = Vec::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            queued = send_rx.recv() => match queued {
                Some(frame) => queue.push_back(frame),
                None => break,
            },
            _ = sleep(config.poll_interval) => {}
        }

        let now = Instant::now();
        scratch.clear();
        match bus.read_available(&mut scratch) {
            Ok(0) => {}
            Ok(_) => {
                for frame in line.on_bytes(now, &scratch) {
                    if frame_tx.send(Ok(frame)).is_err() {
                        return;
                    }
                }
            }
            Err(error) => {
                warn!(%error, "bus read failed");
                let _ = frame_tx.send(Err(error));
                continue;
            }
        }
        line.flush_idle(now);

        if let Some(frame) = queue.front() {
            if line.clear_to_send(now) {
                match transmit(&mut bus, frame, &config).await {
                    Ok(echoed) if echo_matches(&echoed, frame) => {
                        trace!(len = frame.len(), "frame transmitted");
                        let sent = frame.len();
                        let leftover = echoed[sent..].to_vec();
                        queue.pop_front();
                        let now = Instant::now();
                        line.note_sent(now);
                        for frame in line.on_bytes(now, &leftover) {
                            if frame_tx.send(Ok(frame)).is_err() {
                                return;
                            }
                        }
                    }
                    Ok(_) => {
                        // Another node drove the line during our send.
                        let penalty = draw_penalty(&config);
                        warn!(?penalty, "collision detected, backing off");
                        line.note_collision(Instant::now(), penalty);
                    }
                    Err(error) => {
                        // An I/O failure is handled like a collision:
                        // the frame stays at the queue front and goes
                        // out again after the penalty.
                        let penalty = draw_penalty(&config);
                        warn!(%error, ?penalty, "bus write failed, retrying after backoff");
                        let _ = frame_tx.send(Err(error));
                        line.note_collision(Instant::now(), penalty);
                    }
                }
            }
        }
    }
    let _ = bus.set_transmit_enable(false);
    debug!("medium access controller stopped");
}

/// Random backoff after a failed transmission attempt, at least 1 ms.
fn draw_penalty(config: &MacConfig) -> Duration {
    let penalty_ms =
        rand::thread_rng().gen_range(1..=config.collision_penalty_max.as_millis() as u64);
    Duration::from_millis(penalty_ms)
}

/// Drive the line, then collect the echo for comparison.
///
/// Driver enable stays asserted until the echo has been collected so
/// the transceiver never cuts the frame short, and is released on
/// every exit path. Whatever was read past the echo belongs to the
/// inbound stream and is returned to the caller along with it.
async fn transmit<B: BusIo>(
    bus: &mut B,
    frame: &[u8],
    config: &MacConfig,
) -> io::Result<Vec<u8>> {
    bus.set_transmit_enable(true)?;
    let result = write_and_collect_echo(bus, frame, config).await;
    let released = bus.set_transmit_enable(false);
    let echoed = result?;
    released?;
    Ok(echoed)
}

async fn write_and_collect_echo<B: BusIo>(
    bus: &mut B,
    frame: &[u8],
    config: &MacConfig,
) -> io::Result<Vec<u8>> {
    bus.write_all(frame)?;
    let deadline = Instant::now() + config.echo_timeout;
    let mut echoed = Vec::with_capacity(frame.len());
    loop {
        bus.read_available(&mut echoed)?;
        if echoed.len() >= frame.len() || Instant::now() >= deadline {
            return Ok(echoed);
        }
        sleep(config.poll_interval).await;
    }
}

fn echo_matches(echoed: &[u8], sent: &[u8]) -> bool {
    echoed.len() >= sent.len() && &echoed[..sent.len()] == sent
}

/// Line bookkeeping, separated from the bus task for direct testing.
struct LineState {
    config: MacConfig,
    rx: Vec<u8>,
    last_activity: Instant,
    backoff_until: Instant,
}

impl LineState {
    fn new(config: MacConfig, now: Instant) -> Self {
        Self { config, rx: Vec::new(), last_activity: now, backoff_until: now }
    }

    /// Absorb inbound bytes and return every frame completed by them.
    fn on_bytes(&mut self, now: Instant, bytes: &[u8]) -> Vec<Vec<u8>> {
        if bytes.is_empty() {
            return Vec::new();
        }
        self.last_activity = now;
        self.rx.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while self.rx.len() >= 2 {
            let declared = u16::from_be_bytes([self.rx[0], self.rx[1]]) as usize;
            if declared < MIN_FRAME_LEN || declared > self.config.max_frame_len {
                // Length field is nonsense, the stream is desynchronized.
                // Discard and wait for the idle gap to resync.
                warn!(declared, buffered = self.rx.len(), "implausible frame length, resyncing");
                self.rx.clear();
                break;
            }
            if self.rx.len() < declared {
                break;
            }
            frames.push(self.rx.drain(..declared).collect());
        }
        frames
    }

    /// Discard a partial frame once the line has gone idle.
    fn flush_idle(&mut self, now: Instant) {
        if !self.rx.is_empty() && now.duration_since(self.last_activity) >= self.config.receive_idle
        {
            debug!(len = self.rx.len(), "discarding partial frame after idle gap");
            self.rx.clear();
        }
    }

    /// May a transmission start right now?
    fn clear_to_send(&self, now: Instant) -> bool {
        self.rx.is_empty()
            && now >= self.backoff_until
            && now.duration_since(self.last_activity) >= self.config.min_frame_spacing
    }

    fn note_sent(&mut self, now: Instant) {
        self.last_activity = now;
    }

    fn note_collision(&mut self, now: Instant, penalty: Duration) {
        self.last_activity = now;
        self.backoff_until = now + penalty;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// A frame-shaped byte buffer: valid 2-byte length, arbitrary body.
    fn shaped(len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        bytes[0..2].copy_from_slice(&(len as u16).to_be_bytes());
        bytes
    }

    #[derive(Default)]
    struct MockBusInner {
        incoming: Vec<u8>,
        written: Vec<Vec<u8>>,
        transmit_enable: bool,
        corrupt_next_echo: bool,
        fail_next_write: bool,
        reads_with_driver_enabled: usize,
    }

    #[derive(Clone, Default)]
    struct MockBus(Arc<Mutex<MockBusInner>>);

    impl MockBus {
        fn inject(&self, bytes: &[u8]) {
            self.0.lock().unwrap().incoming.extend_from_slice(bytes);
        }

        fn written(&self) -> Vec<Vec<u8>> {
            self.0.lock().unwrap().written.clone()
        }

        fn corrupt_next_echo(&self) {
            self.0.lock().unwrap().corrupt_next_echo = true;
        }

        fn fail_next_write(&self) {
            self.0.lock().unwrap().fail_next_write = true;
        }

        fn reads_with_driver_enabled(&self) -> usize {
            self.0.lock().unwrap().reads_with_driver_enabled
        }
    }

    impl BusIo for MockBus {
        fn read_available(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
            let mut inner = self.0.lock().unwrap();
            if inner.transmit_enable {
                inner.reads_with_driver_enabled += 1;
            }
            let len = inner.incoming.len();
            buf.append(&mut inner.incoming);
            Ok(len)
        }

        fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
            let mut inner = self.0.lock().unwrap();
            assert!(inner.transmit_enable, "write without driver enable");
            if inner.fail_next_write {
                inner.fail_next_write = false;
                return Err(io::Error::other("port gone"));
            }
            inner.written.push(bytes.to_vec());
            let mut echo = bytes.to_vec();
            if inner.corrupt_next_echo {
                inner.corrupt_next_echo = false;
                echo[0] ^= 0xff;
            }
            inner.incoming.extend_from_slice(&echo);
            Ok(())
        }

        fn set_transmit_enable(&mut self, enabled: bool) -> io::Result<()> {
            self.0.lock().unwrap().transmit_enable = enabled;
            Ok(())
        }
    }

    fn state() -> LineState {
        LineState::new(MacConfig::default(), Instant::now())
    }

    #[tokio::test(start_paused = true)]
    async fn test_length_based_extraction() {
        let mut line = state();
        let now = Instant::now();

        let first = shaped(14);
        let second = shaped(20);
        let mut stream = first.clone();
        stream.extend_from_slice(&second);

        // Arrives in two chunks split mid-frame.
        let frames = line.on_bytes(now, &stream[..20]);
        assert_eq!(frames, vec![first]);
        let frames = line.on_bytes(now, &stream[20..]);
        assert_eq!(frames, vec![second]);
        assert!(line.rx.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_runt_length_resyncs() {
        let mut line = state();
        let now = Instant::now();

        // Declared length below the minimum frame size.
        let frames = line.on_bytes(now, &[0x00, 0x03, 0xaa]);
        assert!(frames.is_empty());
        assert!(line.rx.is_empty());

        // Recovery: a well-formed frame right after is extracted.
        let frame = shaped(14);
        assert_eq!(line.on_bytes(now, &frame), vec![frame]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_gap_flushes_partial() {
        let mut line = state();
        let now = Instant::now();

        assert!(line.on_bytes(now, &[0x00, 0x20, 0x01]).is_empty());
        line.flush_idle(now + Duration::from_millis(50));
        assert!(!line.rx.is_empty());
        line.flush_idle(now + Duration::from_millis(121));
        assert!(line.rx.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_carrier_sense_spacing() {
        let mut line = state();
        let now = Instant::now();

        assert!(!line.clear_to_send(now + Duration::from_millis(100)));
        assert!(line.clear_to_send(now + Duration::from_millis(201)));

        // Inbound traffic restarts the silence clock.
        line.on_bytes(now + Duration::from_millis(300), &[0x00]);
        assert!(!line.clear_to_send(now + Duration::from_millis(400)));
        // And a buffered partial frame blocks sending outright.
        assert!(!line.clear_to_send(now + Duration::from_millis(600)));
        line.flush_idle(now + Duration::from_millis(600));
        assert!(line.clear_to_send(now + Duration::from_millis(600)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_collision_backoff_window() {
        let mut line = state();
        let now = Instant::now();
        line.note_collision(now, Duration::from_millis(300));
        assert!(!line.clear_to_send(now + Duration::from_millis(250)));
        assert!(line.clear_to_send(now + Duration::from_millis(501)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transmit_after_silent_line() {
        let bus = MockBus::default();
        let (mac, _frames) = MediumAccess::start(bus.clone(), MacConfig::default()).unwrap();

        let frame = shaped(14);
        mac.enqueue(frame.clone()).unwrap();
        sleep(Duration::from_millis(500)).await;

        assert_eq!(bus.written(), vec![frame]);
        mac.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_frame_delivery() {
        let bus = MockBus::default();
        let (mac, mut frames) = MediumAccess::start(bus.clone(), MacConfig::default()).unwrap();

        let frame = shaped(16);
        bus.inject(&frame);
        let delivered = frames.recv().await.unwrap().unwrap();
        assert_eq!(delivered, frame);
        mac.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_enable_held_through_echo() {
        let bus = MockBus::default();
        let (mac, _frames) = MediumAccess::start(bus.clone(), MacConfig::default()).unwrap();

        mac.enqueue(shaped(14)).unwrap();
        sleep(Duration::from_millis(500)).await;

        // The echo must be collected while the driver is still enabled.
        assert_eq!(bus.written().len(), 1);
        assert!(bus.reads_with_driver_enabled() >= 1);
        assert!(!bus.0.lock().unwrap().transmit_enable);
        mac.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_collision_retries_frame() {
        let bus = MockBus::default();
        let (mac, _frames) = MediumAccess::start(bus.clone(), MacConfig::default()).unwrap();
        bus.corrupt_next_echo();

        let frame = shaped(14);
        mac.enqueue(frame.clone()).unwrap();
        // Spacing, one collided attempt, worst-case penalty, retry.
        sleep(Duration::from_secs(2)).await;

        assert_eq!(bus.written(), vec![frame.clone(), frame]);
        mac.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_error_retries_frame() {
        let bus = MockBus::default();
        let (mac, mut frames) = MediumAccess::start(bus.clone(), MacConfig::default()).unwrap();
        bus.fail_next_write();

        let frame = shaped(14);
        mac.enqueue(frame.clone()).unwrap();
        sleep(Duration::from_secs(2)).await;

        // The failed attempt is reported, the frame is not lost.
        assert!(matches!(frames.try_recv(), Ok(Err(_))));
        assert_eq!(bus.written(), vec![frame]);
        mac.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversize_enqueue_rejected() {
        let bus = MockBus::default();
        let (mac, _frames) = MediumAccess::start(bus, MacConfig::default()).unwrap();
        let result = mac.enqueue(vec![0u8; 2048]);
        assert!(matches!(result, Err(SendError::Encode(CodecError::FrameTooLarge(2048)))));
        mac.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_after_shutdown_fails() {
        let bus = MockBus::default();
        let (mac, _frames) = MediumAccess::start(bus, MacConfig::default()).unwrap();
        mac.shutdown();
        sleep(Duration::from_millis(50)).await;
        assert!(matches!(mac.enqueue(shaped(14)), Err(SendError::ShutDown)));
    }
}
