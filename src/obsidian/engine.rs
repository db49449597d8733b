//! The Obsidian protocol engine.
//!
//! Three periodic loops (send/retry, join-offer broadcast, keepalive
//! poll) plus the inbound handler all work against one
//! [`EngineState`] behind a single mutex, so timeout expiry, frame
//! transmission, reply correlation and registry updates are atomic
//! with respect to each other. Listener callbacks are always invoked
//! after the lock is released.
//!
//! The engine enforces a single in-flight reply window: at most one
//! reply-expecting frame is unacknowledged at any time. Fire-and-forget
//! frames pass through the same FIFO but never occupy the window.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, trace, warn};

use super::config::ObsidianConfig;
use super::peer::{Peer, PeerRegistry};
use crate::codec::{Address, Frame, Parameter};
use crate::core::constants::{
    CMD_JOIN, CMD_JOIN_ACK, CMD_POLL, JOIN_ACCEPT, JOIN_DECLINE, MGMT_SUBJECT,
    PARAM_JOIN_DECISION, PARAM_NEXT_POLL_HINT, PARAM_OFFER_WINDOW, PARAM_PEER_DESCRIPTION,
    PARAM_PEER_VERSION, PARAM_REGISTRATION_ID, PARAM_REPLY_REQUEST, PARAM_REPLY_RESPONSE,
    POLL_TICK, POLL_TICK_IDLE, SEND_TICK,
};
use crate::core::{
    NetworkConfig, ObsidianError, PeerPersister, PhysicalLayer, ProtocolKind, ReceiveListener,
    ReplyListener, SendError,
};

/// A sent frame waiting for its reply.
struct Awaiting {
    reply_ref: u16,
    deadline: Instant,
}

/// A reply-expecting frame in the retransmission rotation.
struct RetryEntry {
    reply_ref: u16,
    attempts: u32,
}

/// Correlation-map entry: the original frame and whom to tell.
struct PendingReply {
    request: Frame,
    listener: Arc<dyn ReplyListener>,
}

/// All mutable engine state, guarded as one unit.
struct EngineState {
    send_queue: VecDeque<Frame>,
    retry_queue: VecDeque<RetryEntry>,
    awaiting: Option<Awaiting>,
    pending: HashMap<u16, PendingReply>,
    registry: PeerRegistry,
}

struct Inner<P: PhysicalLayer> {
    physical: P,
    config: ObsidianConfig,
    address: Address,
    state: Mutex<EngineState>,
    persister: Option<Box<dyn PeerPersister>>,
    listener: Option<Arc<dyn ReceiveListener>>,
    shutdown_tx: watch::Sender<bool>,
}

/// Builder for [`Obsidian`] engines.
pub struct ObsidianBuilder {
    address: Address,
    config: Option<ObsidianConfig>,
    persister: Option<Box<dyn PeerPersister>>,
    listener: Option<Arc<dyn ReceiveListener>>,
}

impl Default for ObsidianBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ObsidianBuilder {
    /// Start from the defaults: master address, no persistence, and
    /// the timing profile the physical layer recommends.
    pub fn new() -> Self {
        Self { address: Address::master(), config: None, persister: None, listener: None }
    }

    /// Address this engine owns on the bus.
    pub fn address(mut self, address: Address) -> Self {
        self.address = address;
        self
    }

    /// Explicit timing configuration, overriding the physical layer's
    /// recommendation.
    pub fn config(mut self, config: ObsidianConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Durable storage for the peer registry.
    pub fn persister(mut self, persister: impl PeerPersister) -> Self {
        self.persister = Some(Box::new(persister));
        self
    }

    /// Listener for application frames (everything that is not a reply
    /// or management traffic).
    pub fn receive_listener(mut self, listener: Arc<dyn ReceiveListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Start the engine on the given physical layer.
    ///
    /// Loads any persisted peers, registers the inbound handler and
    /// spawns the three background loops.
    pub fn start<P: PhysicalLayer>(self, physical: P) -> Result<Obsidian<P>, ObsidianError> {
        let config = match self.config {
            Some(config) => config,
            None => match physical.config(ProtocolKind::Obsidian) {
                Some(NetworkConfig::Obsidian(config)) => config,
                None => ObsidianConfig::default(),
            },
        };
        config.validate()?;
        physical.set_address(&self.address);

        let mut registry = PeerRegistry::new();
        if let Some(persister) = &self.persister {
            for peer in persister.load()? {
                registry.insert(peer);
            }
        }
        if !registry.is_empty() {
            info!(peers = registry.len(), "restored persisted peer registry");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(Inner {
            physical,
            config,
            address: self.address,
            state: Mutex::new(EngineState {
                send_queue: VecDeque::new(),
                retry_queue: VecDeque::new(),
                awaiting: None,
                pending: HashMap::new(),
                registry,
            }),
            persister: self.persister,
            listener: self.listener,
            shutdown_tx,
        });
        inner.physical.add_receive_listener(Arc::new(InboundHandler(Arc::downgrade(&inner))));

        let tasks = vec![
            tokio::spawn(send_loop(Arc::clone(&inner), shutdown_rx.clone())),
            tokio::spawn(poll_loop(Arc::clone(&inner), shutdown_rx.clone())),
            tokio::spawn(offer_loop(Arc::clone(&inner), shutdown_rx)),
        ];
        Ok(Obsidian { inner, tasks: Mutex::new(tasks) })
    }
}

/// Handle to a running Obsidian engine.
///
/// Clonable state lives behind an `Arc`; dropping the handle without
/// calling [`shutdown`](Self::shutdown) leaves the loops running until
/// the runtime stops.
pub struct Obsidian<P: PhysicalLayer> {
    inner: Arc<Inner<P>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<P: PhysicalLayer> Obsidian<P> {
    /// Start building an engine.
    pub fn builder() -> ObsidianBuilder {
        ObsidianBuilder::new()
    }

    /// The address this engine answers on.
    pub fn address(&self) -> &Address {
        &self.inner.address
    }

    /// The timing configuration in effect.
    pub fn config(&self) -> &ObsidianConfig {
        &self.inner.config
    }

    /// Queue a fire-and-forget frame.
    ///
    /// Fails if the frame already carries the reserved reply-request
    /// parameter or the engine has shut down.
    pub fn send_data(&self, frame: Frame) -> Result<(), SendError> {
        self.inner.send_data(frame)
    }

    /// Queue a frame that expects a reply.
    ///
    /// A fresh reply reference is attached to the frame; the listener
    /// fires with the reply, or with a timeout after
    /// `reply_repeat_count` unanswered retransmissions.
    pub fn send_with_reply(
        &self,
        frame: Frame,
        listener: Arc<dyn ReplyListener>,
    ) -> Result<(), SendError> {
        self.inner.send_with_reply(frame, listener)
    }

    /// Snapshot of the peer registry.
    pub fn peers(&self) -> Vec<Peer> {
        self.inner.state.lock().registry.snapshot()
    }

    /// Stop the background loops, wait for them, then shut down the
    /// physical layer. No sends are accepted once this begins.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        self.inner.physical.shutdown();
        info!("engine stopped");
    }
}

/// Routes inbound frames from the physical layer into the engine.
struct InboundHandler<P: PhysicalLayer>(Weak<Inner<P>>);

impl<P: PhysicalLayer> ReceiveListener for InboundHandler<P> {
    fn on_frame(&self, frame: Frame) {
        if let Some(inner) = self.0.upgrade() {
            inner.process_received_frame(frame);
        }
    }

    fn on_error(&self, error: &io::Error) {
        // The physical layer retries by itself; nothing to unwind here.
        warn!(%error, "physical layer reported an i/o failure");
    }
}

/// Confirms a join once the acknowledgement is answered.
struct JoinAckListener<P: PhysicalLayer> {
    inner: Weak<Inner<P>>,
    address: Address,
    registration_id: u32,
}

impl<P: PhysicalLayer> ReplyListener for JoinAckListener<P> {
    fn on_reply(&self, _request: &Frame, reply: &Frame) {
        if let Some(inner) = self.inner.upgrade() {
            inner.confirm_join(&self.address, self.registration_id, reply);
        }
    }

    fn on_timeout(&self, _request: &Frame) {
        warn!(peer = %self.address, "join acknowledgement went unanswered");
    }
}

/// Handles the answer to a keepalive poll.
struct PollListener<P: PhysicalLayer> {
    inner: Weak<Inner<P>>,
    address: Address,
}

impl<P: PhysicalLayer> ReplyListener for PollListener<P> {
    fn on_reply(&self, _request: &Frame, reply: &Frame) {
        if let Some(inner) = self.inner.upgrade() {
            inner.process_poll_reply(&self.address, reply);
        }
    }

    fn on_timeout(&self, _request: &Frame) {
        // The peer keeps its retry-delayed poll slot; deactivation is
        // the poll loop's job once the silence grows long enough.
        debug!(peer = %self.address, "poll went unanswered");
    }
}

async fn send_loop<P: PhysicalLayer>(inner: Arc<Inner<P>>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep(SEND_TICK) => {}
        }
        inner.send_tick(Instant::now());
    }
    debug!("send loop stopped");
}

async fn poll_loop<P: PhysicalLayer>(inner: Arc<Inner<P>>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let tick =
            if inner.state.lock().registry.is_empty() { POLL_TICK_IDLE } else { POLL_TICK };
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep(tick) => {}
        }
        inner.poll_tick(Instant::now());
    }
    debug!("poll loop stopped");
}

async fn offer_loop<P: PhysicalLayer>(inner: Arc<Inner<P>>, mut shutdown: watch::Receiver<bool>) {
    loop {
        inner.broadcast_join_offer();
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep(inner.config.join_offer_repeat) => {}
        }
    }
    debug!("join offer loop stopped");
}

/// Work to do after the state lock has been released.
enum Action {
    Transmit(Frame),
    Timeout { request: Frame, listener: Arc<dyn ReplyListener> },
}

enum Inbound {
    Reply { request: Frame, listener: Arc<dyn ReplyListener>, reply: Frame },
    JoinRequest(Frame),
    Forward(Frame),
    Drop,
}

impl<P: PhysicalLayer> Inner<P> {
    fn send_data(&self, frame: Frame) -> Result<(), SendError> {
        if frame.has_parameter(PARAM_REPLY_REQUEST) {
            return Err(SendError::ReservedParameter(PARAM_REPLY_REQUEST as char));
        }
        if *self.shutdown_tx.borrow() {
            return Err(SendError::ShutDown);
        }
        self.state.lock().send_queue.push_back(frame);
        Ok(())
    }

    fn send_with_reply(
        &self,
        mut frame: Frame,
        listener: Arc<dyn ReplyListener>,
    ) -> Result<(), SendError> {
        if frame.has_parameter(PARAM_REPLY_REQUEST) {
            return Err(SendError::ReservedParameter(PARAM_REPLY_REQUEST as char));
        }
        if *self.shutdown_tx.borrow() {
            return Err(SendError::ShutDown);
        }
        let mut state = self.state.lock();
        let mut rng = rand::thread_rng();
        let reply_ref = loop {
            let candidate: u16 = rng.gen_range(1..=u16::MAX);
            if !state.pending.contains_key(&candidate) {
                break candidate;
            }
        };
        frame.add_parameter(Parameter::uint16(PARAM_REPLY_REQUEST, reply_ref))?;
        state.pending.insert(reply_ref, PendingReply { request: frame.clone(), listener });
        state.send_queue.push_back(frame);
        Ok(())
    }

    /// One pass of the send/retry loop.
    ///
    /// Expires the awaiting window if its deadline passed, then, with
    /// the window free, transmits the next queued frame or retransmits
    /// the oldest retry entry.
    fn send_tick(&self, now: Instant) {
        let mut actions: Vec<Action> = Vec::new();
        {
            let mut state = self.state.lock();

            if let Some(awaiting) = &state.awaiting {
                if now >= awaiting.deadline {
                    let reply_ref = awaiting.reply_ref;
                    state.awaiting = None;
                    let attempts = state
                        .retry_queue
                        .iter()
                        .find(|e| e.reply_ref == reply_ref)
                        .map(|e| e.attempts);
                    match attempts {
                        Some(attempts) if attempts >= self.config.reply_repeat_count => {
                            state.retry_queue.retain(|e| e.reply_ref != reply_ref);
                            if let Some(pending) = state.pending.remove(&reply_ref) {
                                warn!(reply_ref, attempts, "no reply after final retry, abandoning");
                                actions.push(Action::Timeout {
                                    request: pending.request,
                                    listener: pending.listener,
                                });
                            }
                        }
                        // Already queued for retransmission.
                        Some(_) => {}
                        None => {
                            state.retry_queue.push_back(RetryEntry { reply_ref, attempts: 0 });
                        }
                    }
                }
            }

            if state.awaiting.is_none() {
                if let Some(frame) = state.send_queue.pop_front() {
                    if let Some(reply_ref) =
                        frame.parameter(PARAM_REPLY_REQUEST).and_then(Parameter::as_u16)
                    {
                        state.awaiting = Some(Awaiting {
                            reply_ref,
                            deadline: now + self.config.reply_max_delay,
                        });
                    }
                    actions.push(Action::Transmit(frame));
                } else if let Some(mut entry) = state.retry_queue.pop_front() {
                    let request = state.pending.get(&entry.reply_ref).map(|p| p.request.clone());
                    if let Some(request) = request {
                        entry.attempts += 1;
                        trace!(
                            reply_ref = entry.reply_ref,
                            attempt = entry.attempts,
                            "retransmitting"
                        );
                        state.awaiting = Some(Awaiting {
                            reply_ref: entry.reply_ref,
                            deadline: now + self.config.reply_max_delay,
                        });
                        actions.push(Action::Transmit(request));
                        state.retry_queue.push_back(entry);
                    }
                    // No pending entry: the reply arrived meanwhile and
                    // the retry entry is simply dropped.
                }
            }
        }

        for action in actions {
            match action {
                Action::Transmit(frame) => {
                    if let Err(error) = self.physical.send_frame(&frame) {
                        warn!(%error, "physical layer rejected frame");
                    }
                }
                Action::Timeout { request, listener } => listener.on_timeout(&request),
            }
        }
    }

    fn process_received_frame(self: &Arc<Self>, frame: Frame) {
        let now = Instant::now();
        let reply_ref = frame.parameter(PARAM_REPLY_RESPONSE).and_then(Parameter::as_u16);

        let outcome = {
            let mut state = self.state.lock();

            if let Some(peer) = state.registry.get_mut(frame.sender()) {
                peer.touch(now);
                if !peer.is_active() {
                    warn!(peer = %frame.sender(), "frame from peer marked inactive");
                }
            }

            if let Some(reply_ref) = reply_ref {
                match state.pending.remove(&reply_ref) {
                    Some(pending) => {
                        if state.awaiting.as_ref().is_some_and(|a| a.reply_ref == reply_ref) {
                            state.awaiting = None;
                        }
                        state.retry_queue.retain(|e| e.reply_ref != reply_ref);
                        Inbound::Reply {
                            request: pending.request,
                            listener: pending.listener,
                            reply: frame,
                        }
                    }
                    None => {
                        warn!(reply_ref, "reply with unknown reference, discarding");
                        Inbound::Drop
                    }
                }
            } else if frame.subject_char() == MGMT_SUBJECT && frame.command_char() == CMD_JOIN {
                if frame.target().is_broadcast() {
                    // Another node's join offer, not a request to us.
                    debug!(sender = %frame.sender(), "ignoring foreign join offer");
                    Inbound::Drop
                } else {
                    Inbound::JoinRequest(frame)
                }
            } else {
                Inbound::Forward(frame)
            }
        };

        match outcome {
            Inbound::Reply { request, listener, reply } => listener.on_reply(&request, &reply),
            Inbound::JoinRequest(frame) => {
                if let Err(error) = self.process_join_request(&frame) {
                    warn!(%error, sender = %frame.sender(), "join handling failed");
                }
            }
            Inbound::Forward(frame) => match &self.listener {
                Some(listener) => listener.on_frame(frame),
                None => debug!("no receive listener registered, dropping frame"),
            },
            Inbound::Drop => {}
        }
    }

    /// Answer a join request with an acknowledgement.
    ///
    /// An unknown address, or a known one presenting its own
    /// registration id, is accepted; a known address with a different
    /// id signals an address conflict and is declined without retry.
    fn process_join_request(self: &Arc<Self>, frame: &Frame) -> Result<(), SendError> {
        let sender = frame.sender().clone();
        if sender.is_empty() || sender.is_broadcast() {
            warn!("join request without a usable sender address");
            return Ok(());
        }
        let requested_id = frame.parameter(PARAM_REGISTRATION_ID).and_then(Parameter::as_u32);

        let accepted_id = {
            let state = self.state.lock();
            match state.registry.get(&sender) {
                None => Some(requested_id.unwrap_or_else(epoch_seconds)),
                Some(peer) if requested_id == Some(peer.registration_id()) => {
                    Some(peer.registration_id())
                }
                Some(peer) => {
                    warn!(
                        peer = %sender,
                        known = peer.registration_id(),
                        ?requested_id,
                        "registration id conflict, declining join"
                    );
                    None
                }
            }
        };

        match accepted_id {
            Some(registration_id) => {
                info!(peer = %sender, registration_id, "accepting join request");
                let mut ack = Frame::new(sender.clone(), MGMT_SUBJECT, CMD_JOIN_ACK);
                ack.add_parameter(Parameter::char(PARAM_JOIN_DECISION, JOIN_ACCEPT))?;
                ack.add_parameter(Parameter::uint32(PARAM_REGISTRATION_ID, registration_id))?;
                let listener = Arc::new(JoinAckListener {
                    inner: Arc::downgrade(self),
                    address: sender,
                    registration_id,
                });
                self.send_with_reply(ack, listener)
            }
            None => {
                let mut ack = Frame::new(sender, MGMT_SUBJECT, CMD_JOIN_ACK);
                ack.add_parameter(Parameter::char(PARAM_JOIN_DECISION, JOIN_DECLINE))?;
                self.send_data(ack)
            }
        }
    }

    /// The peer answered the join acknowledgement: registration holds.
    fn confirm_join(&self, address: &Address, registration_id: u32, reply: &Frame) {
        let now = Instant::now();
        let description =
            reply.parameter(PARAM_PEER_DESCRIPTION).and_then(Parameter::as_str).unwrap_or("");
        let version =
            reply.parameter(PARAM_PEER_VERSION).and_then(Parameter::as_str).unwrap_or("");
        let interval = self.poll_interval_from(reply);
        {
            let mut state = self.state.lock();
            let mut peer = state
                .registry
                .get(address)
                .cloned()
                .unwrap_or_else(|| Peer::new(address.clone(), registration_id));
            peer.set_active(true);
            peer.touch(now);
            peer.set_identity(description.to_string(), version.to_string());
            peer.schedule_poll(now + interval);
            state.registry.insert(peer);
        }
        self.persist();
        info!(peer = %address, registration_id, description, version, "peer registered");
    }

    /// One pass of the keepalive loop: visit the next peer in rotation.
    fn poll_tick(self: &Arc<Self>, now: Instant) {
        enum Visit {
            Nothing,
            Deactivated(Address),
            Poll(Address),
        }

        let visit = {
            let mut state = self.state.lock();
            let Some(address) = state.registry.advance() else {
                return;
            };
            let silence_limit = 2 * self.config.next_poll_max;
            let retry_delay = self.config.poll_retry_delay;
            match state.registry.get_mut(&address) {
                Some(peer) if peer.is_active() => {
                    if now.duration_since(peer.last_seen()) > silence_limit {
                        peer.set_active(false);
                        Visit::Deactivated(address)
                    } else if now >= peer.next_poll_at() {
                        // Re-arm before sending so an unanswered poll is
                        // retried after the retry delay, not every tick.
                        peer.schedule_poll(now + retry_delay);
                        Visit::Poll(address)
                    } else {
                        Visit::Nothing
                    }
                }
                _ => Visit::Nothing,
            }
        };

        match visit {
            Visit::Deactivated(address) => {
                warn!(peer = %address, "peer silent too long, marking inactive");
                self.persist();
            }
            Visit::Poll(address) => {
                debug!(peer = %address, "polling peer");
                let frame = Frame::new(address.clone(), MGMT_SUBJECT, CMD_POLL);
                let listener =
                    Arc::new(PollListener { inner: Arc::downgrade(self), address: address.clone() });
                if let Err(error) = self.send_with_reply(frame, listener) {
                    warn!(%error, peer = %address, "failed to queue poll");
                }
            }
            Visit::Nothing => {}
        }
    }

    fn process_poll_reply(&self, address: &Address, reply: &Frame) {
        let now = Instant::now();
        let interval = self.poll_interval_from(reply);
        {
            let mut state = self.state.lock();
            if let Some(peer) = state.registry.get_mut(address) {
                peer.touch(now);
                peer.schedule_poll(now + interval);
            }
        }
        self.persist();
        trace!(peer = %address, ?interval, "poll answered");

        // A peer may answer a poll with application payload instead of
        // a plain management frame; hand that payload onward.
        if reply.subject_char() != MGMT_SUBJECT {
            if let Some(listener) = &self.listener {
                listener.on_frame(reply.clone());
            }
        }
    }

    fn broadcast_join_offer(&self) {
        let result: Result<(), SendError> = (|| {
            let mut offer = Frame::new(Address::broadcast(), MGMT_SUBJECT, CMD_JOIN);
            let window = self.config.join_offer_window.as_secs().min(u64::from(u16::MAX)) as u16;
            offer.add_parameter(Parameter::uint16(PARAM_OFFER_WINDOW, window))?;
            self.send_data(offer)
        })();
        match result {
            Ok(()) => trace!("join offer broadcast queued"),
            Err(error) => warn!(%error, "failed to queue join offer"),
        }
    }

    /// Next poll interval from a reply's hint, clamped to the bounds.
    fn poll_interval_from(&self, reply: &Frame) -> Duration {
        let suggested = reply
            .parameter(PARAM_NEXT_POLL_HINT)
            .and_then(Parameter::as_u32)
            .map(|secs| Duration::from_secs(secs.into()))
            .unwrap_or(self.config.next_poll_max);
        self.config.clamp_poll_interval(suggested)
    }

    fn persist(&self) {
        if let Some(persister) = &self.persister {
            let peers = self.state.lock().registry.snapshot();
            if let Err(error) = persister.store(&peers) {
                warn!(%error, "peer persistence failed");
            }
        }
    }
}

fn epoch_seconds() -> u32 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as u32).unwrap_or(0)
}
