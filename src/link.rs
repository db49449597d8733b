//! Serial physical layer: the medium access controller plus the codec.
//!
//! [`SerialLink`] turns raw bus buffers into decoded [`Frame`]s and
//! back, stamping outbound frames with the node's own address and
//! filtering inbound traffic addressed elsewhere. It implements
//! [`PhysicalLayer`], so an [`Obsidian`](crate::obsidian::Obsidian)
//! engine can run directly on top of it.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::codec::{decode_frame, encode_frame, Address, DecodeOutcome, Frame};
use crate::core::{
    ConfigError, NetworkConfig, PhysicalLayer, ProtocolKind, ReceiveListener, SendError,
};
use crate::mac::{BusIo, MacConfig, MediumAccess};
use crate::obsidian::ObsidianConfig;

/// A frame-level serial bus endpoint.
pub struct SerialLink {
    mac: MediumAccess,
    shared: Arc<LinkShared>,
}

struct LinkShared {
    address: Mutex<Option<Address>>,
    listeners: Mutex<Vec<Arc<dyn ReceiveListener>>>,
    max_frame_len: usize,
}

impl SerialLink {
    /// Start the medium access controller on `bus` and the decode task
    /// feeding registered listeners.
    pub fn start<B: BusIo>(bus: B, config: MacConfig) -> Result<Self, ConfigError> {
        let max_frame_len = config.max_frame_len;
        let (mac, frame_rx) = MediumAccess::start(bus, config)?;
        let shared = Arc::new(LinkShared {
            address: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            max_frame_len,
        });
        tokio::spawn(decode_loop(Arc::clone(&shared), frame_rx));
        Ok(Self { mac, shared })
    }
}

async fn decode_loop(
    shared: Arc<LinkShared>,
    mut frame_rx: mpsc::UnboundedReceiver<io::Result<Vec<u8>>>,
) {
    while let Some(event) = frame_rx.recv().await {
        let bytes = match event {
            Ok(bytes) => bytes,
            Err(error) => {
                // The controller keeps retrying on its own; listeners
                // only get told.
                warn!(%error, "bus i/o failure reported");
                let listeners = shared.listeners.lock().clone();
                for listener in listeners {
                    listener.on_error(&error);
                }
                continue;
            }
        };
        let accept = shared.address.lock().clone();
        match decode_frame(&bytes, shared.max_frame_len, accept.as_ref()) {
            Ok(DecodeOutcome::Frame(frame)) => {
                trace!(%frame, "frame received");
                let listeners = shared.listeners.lock().clone();
                let mut handed_off = false;
                for listener in listeners {
                    listener.on_frame(frame.clone());
                    handed_off = true;
                }
                if !handed_off {
                    debug!("no listeners registered, dropping frame");
                }
            }
            Ok(DecodeOutcome::NotForUs { target }) => {
                trace!(%target, "skipping frame for another node");
            }
            Err(error) => {
                warn!(%error, len = bytes.len(), "discarding undecodable buffer");
            }
        }
    }
    debug!("decode loop stopped");
}

impl PhysicalLayer for SerialLink {
    fn set_address(&self, address: &Address) {
        *self.shared.address.lock() = Some(address.clone());
    }

    fn add_receive_listener(&self, listener: Arc<dyn ReceiveListener>) {
        self.shared.listeners.lock().push(listener);
    }

    fn send_frame(&self, frame: &Frame) -> Result<(), SendError> {
        let sender = self.shared.address.lock().clone();
        let bytes = encode_frame(frame, sender.as_ref())?;
        self.mac.enqueue(bytes)
    }

    fn config(&self, kind: ProtocolKind) -> Option<NetworkConfig> {
        match kind {
            // The defaults are the RS485 profile this link drives.
            ProtocolKind::Obsidian => Some(NetworkConfig::Obsidian(ObsidianConfig::default())),
        }
    }

    fn shutdown(&self) {
        self.mac.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Mutex as StdMutex;

    use tokio::time::{sleep, Duration};

    use super::*;

    #[derive(Default)]
    struct LoopBusInner {
        incoming: Vec<u8>,
        written: Vec<u8>,
        fail_next_read: bool,
    }

    /// Bus that echoes writes cleanly and replays injected bytes.
    #[derive(Clone, Default)]
    struct LoopBus(Arc<StdMutex<LoopBusInner>>);

    impl LoopBus {
        fn inject(&self, bytes: &[u8]) {
            self.0.lock().unwrap().incoming.extend_from_slice(bytes);
        }

        fn written(&self) -> Vec<u8> {
            self.0.lock().unwrap().written.clone()
        }

        fn fail_next_read(&self) {
            self.0.lock().unwrap().fail_next_read = true;
        }
    }

    impl BusIo for LoopBus {
        fn read_available(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
            let mut inner = self.0.lock().unwrap();
            if inner.fail_next_read {
                inner.fail_next_read = false;
                return Err(io::Error::other("port gone"));
            }
            let len = inner.incoming.len();
            buf.append(&mut inner.incoming);
            Ok(len)
        }

        fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
            let mut inner = self.0.lock().unwrap();
            inner.written.extend_from_slice(bytes);
            let echo = bytes.to_vec();
            inner.incoming.extend_from_slice(&echo);
            Ok(())
        }

        fn set_transmit_enable(&mut self, _enabled: bool) -> io::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        frames: StdMutex<Vec<Frame>>,
        errors: StdMutex<Vec<String>>,
    }

    impl ReceiveListener for Recorder {
        fn on_frame(&self, frame: Frame) {
            self.frames.lock().unwrap().push(frame);
        }

        fn on_error(&self, error: &io::Error) {
            self.errors.lock().unwrap().push(error.to_string());
        }
    }

    fn link_with_recorder() -> (SerialLink, LoopBus, Arc<Recorder>) {
        let bus = LoopBus::default();
        let link = SerialLink::start(bus.clone(), MacConfig::default()).unwrap();
        link.set_address(&Address::master());
        let recorder = Arc::new(Recorder::default());
        link.add_receive_listener(Arc::clone(&recorder) as Arc<dyn ReceiveListener>);
        (link, bus, recorder)
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_frame_stamped_with_address() {
        let (link, bus, _recorder) = link_with_recorder();

        let frame = Frame::new(Address::new([0x12, 0xab]), 'd', 'w');
        link.send_frame(&frame).unwrap();
        sleep(Duration::from_millis(500)).await;

        let written = bus.written();
        let mut stamped = frame.clone();
        stamped.set_sender(&Address::master());
        assert_eq!(written, encode_frame(&stamped, None).unwrap());
        link.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_frame_decoded_and_delivered() {
        let (link, bus, recorder) = link_with_recorder();

        let mut frame = Frame::new(Address::master(), 'd', 'r');
        frame.set_sender(&Address::new([0x30, 0x01]));
        bus.inject(&encode_frame(&frame, None).unwrap());
        sleep(Duration::from_millis(100)).await;

        let received = recorder.frames.lock().unwrap().clone();
        assert_eq!(received, vec![frame]);
        link.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_frame_filtered() {
        let (link, bus, recorder) = link_with_recorder();

        let frame = Frame::new(Address::new([0x99, 0x99]), 'd', 'r');
        bus.inject(&encode_frame(&frame, None).unwrap());
        // Broadcast still comes through.
        let broadcast = Frame::new(Address::broadcast(), 'd', 'r');
        bus.inject(&encode_frame(&broadcast, None).unwrap());
        sleep(Duration::from_millis(100)).await;

        let received = recorder.frames.lock().unwrap().clone();
        assert_eq!(received, vec![broadcast]);
        link.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupt_buffer_discarded() {
        let (link, bus, recorder) = link_with_recorder();

        let frame = Frame::new(Address::master(), 'd', 'r');
        let mut bytes = encode_frame(&frame, None).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        bus.inject(&bytes);
        sleep(Duration::from_millis(100)).await;

        assert!(recorder.frames.lock().unwrap().is_empty());
        link.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_bus_error_reaches_listener() {
        let (link, bus, recorder) = link_with_recorder();

        bus.fail_next_read();
        sleep(Duration::from_millis(100)).await;

        let errors = recorder.errors.lock().unwrap().clone();
        assert_eq!(errors, vec!["port gone".to_string()]);
        // The link keeps working afterwards.
        let mut frame = Frame::new(Address::master(), 'd', 'r');
        frame.set_sender(&Address::new([0x30, 0x01]));
        bus.inject(&encode_frame(&frame, None).unwrap());
        sleep(Duration::from_millis(100)).await;
        assert_eq!(recorder.frames.lock().unwrap().clone(), vec![frame]);
        link.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_recommends_rs485_profile() {
        let (link, _bus, _recorder) = link_with_recorder();
        let Some(NetworkConfig::Obsidian(config)) = link.config(ProtocolKind::Obsidian) else {
            panic!("no profile recommended");
        };
        assert_eq!(config.reply_max_delay, Duration::from_millis(1000));
        link.shutdown();
    }
}
