//! Transports: the [`Transport`] seam, an in-memory loopback link with a
//! lossy unreliable lane, and the host-side [`Hub`] that fans envelopes out
//! to per-participant links.

use std::collections::BTreeMap;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tandem_config::NetworkConfig;

use crate::bandwidth::NetworkCounters;
use crate::channel::{Channel, Envelope};
use crate::messages::{Message, MessageError, ParticipantId, deserialize_message, serialize_message};

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Errors surfaced by a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The other end of the link is gone.
    #[error("peer disconnected")]
    Disconnected,

    /// The message could not be encoded.
    #[error("failed to encode message: {0}")]
    Encode(#[from] MessageError),
}

/// A bidirectional, message-oriented link to one peer.
pub trait Transport {
    /// Queue `message` on `channel`. Unreliable sends may be silently lost.
    fn send(&mut self, channel: Channel, message: &Message) -> Result<(), TransportError>;

    /// Drain every message that has arrived. Undecodable frames are skipped.
    fn receive(&mut self) -> Result<Vec<Message>, TransportError>;
}

// ---------------------------------------------------------------------------
// LinkConfig
// ---------------------------------------------------------------------------

/// Behavior of the unreliable lane of a [`LoopbackEndpoint`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkConfig {
    /// Probability that an unreliable frame is discarded.
    pub drop_rate: f64,
    /// Probability that an unreliable frame is held back behind the next one.
    pub reorder_rate: f64,
    /// Seed for the drop/reorder generator.
    pub seed: u64,
}

impl LinkConfig {
    /// A link that never drops or reorders.
    pub fn perfect() -> Self {
        Self {
            drop_rate: 0.0,
            reorder_rate: 0.0,
            seed: 0,
        }
    }

    /// Link settings from config. `salt` decorrelates links sharing a seed.
    pub fn from_network(config: &NetworkConfig, salt: u64) -> Self {
        Self {
            drop_rate: probability(config.drop_rate),
            reorder_rate: probability(config.reorder_rate),
            seed: config.seed.wrapping_add(salt.wrapping_mul(0x9E37_79B9_7F4A_7C15)),
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::perfect()
    }
}

/// Clamp to `[0, 1]`; NaN means "never".
fn probability(rate: f64) -> f64 {
    if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) }
}

// ---------------------------------------------------------------------------
// LoopbackEndpoint
// ---------------------------------------------------------------------------

/// One end of an in-process link created by [`loopback_pair`].
///
/// Both channels share one FIFO, so reliable frames keep their order. The
/// unreliable lane drops frames or delays one behind the next frame sent.
pub struct LoopbackEndpoint {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    drop_rate: f64,
    reorder_rate: f64,
    rng: StdRng,
    held_back: Option<Vec<u8>>,
    counters: Arc<NetworkCounters>,
}

/// Create a connected pair of loopback endpoints.
pub fn loopback_pair(config: LinkConfig) -> (LoopbackEndpoint, LoopbackEndpoint) {
    let (a_tx, b_rx) = unbounded();
    let (b_tx, a_rx) = unbounded();
    let a = LoopbackEndpoint::new(a_tx, a_rx, config, config.seed);
    let b = LoopbackEndpoint::new(b_tx, b_rx, config, !config.seed);
    (a, b)
}

impl LoopbackEndpoint {
    fn new(tx: Sender<Vec<u8>>, rx: Receiver<Vec<u8>>, config: LinkConfig, seed: u64) -> Self {
        Self {
            tx,
            rx,
            drop_rate: probability(config.drop_rate),
            reorder_rate: probability(config.reorder_rate),
            rng: StdRng::seed_from_u64(seed),
            held_back: None,
            counters: Arc::new(NetworkCounters::new()),
        }
    }

    /// Shared handle to this endpoint's counters.
    pub fn counters(&self) -> Arc<NetworkCounters> {
        Arc::clone(&self.counters)
    }

    fn push(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.tx.send(frame).map_err(|_| TransportError::Disconnected)
    }

    fn release_held_back(&mut self) -> Result<(), TransportError> {
        if let Some(frame) = self.held_back.take() {
            self.counters.record_reorder();
            self.push(frame)?;
        }
        Ok(())
    }
}

impl Transport for LoopbackEndpoint {
    fn send(&mut self, channel: Channel, message: &Message) -> Result<(), TransportError> {
        let frame = serialize_message(message)?;
        self.counters.record_send(channel, frame.len() as u64);

        if channel == Channel::UnreliableUnordered {
            if self.rng.random_bool(self.drop_rate) {
                self.counters.record_drop();
                tracing::trace!("loopback dropped unreliable frame");
                return Ok(());
            }
            if self.held_back.is_none() && self.rng.random_bool(self.reorder_rate) {
                self.held_back = Some(frame);
                return Ok(());
            }
        }

        self.push(frame)?;
        self.release_held_back()
    }

    fn receive(&mut self) -> Result<Vec<Message>, TransportError> {
        let mut messages = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(frame) => {
                    self.counters.record_receive(frame.len() as u64);
                    match deserialize_message(&frame) {
                        Ok(message) => messages.push(message),
                        Err(err) => tracing::warn!("discarding undecodable frame: {err}"),
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) if messages.is_empty() => {
                    return Err(TransportError::Disconnected);
                }
                Err(TryRecvError::Disconnected) => break,
            }
        }
        Ok(messages)
    }
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

/// Result of [`Hub::poll`].
#[derive(Debug, Default)]
pub struct HubPoll {
    /// Messages received, tagged with the sending participant.
    pub messages: Vec<(ParticipantId, Message)>,
    /// Participants whose link failed since the last poll.
    pub lost: Vec<ParticipantId>,
}

/// Host-side set of links, one per remote participant.
pub struct Hub<T> {
    links: BTreeMap<ParticipantId, T>,
    lost: Vec<ParticipantId>,
}

impl<T: Transport> Hub<T> {
    /// Creates an empty hub.
    pub fn new() -> Self {
        Self {
            links: BTreeMap::new(),
            lost: Vec::new(),
        }
    }

    /// Attach the link to `participant`, replacing any previous one.
    pub fn connect(&mut self, participant: ParticipantId, link: T) {
        self.links.insert(participant, link);
    }

    /// Detach and return the link to `participant`.
    pub fn disconnect(&mut self, participant: ParticipantId) -> Option<T> {
        self.links.remove(&participant)
    }

    /// The link to `participant`, if connected.
    pub fn link(&self, participant: ParticipantId) -> Option<&T> {
        self.links.get(&participant)
    }

    /// Connected participants in id order.
    pub fn participants(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.links.keys().copied()
    }

    /// Send one envelope to every addressed link. A failing link is
    /// dropped and reported by the next [`Hub::poll`].
    pub fn dispatch(&mut self, envelope: &Envelope) {
        let mut failed = Vec::new();
        for (&participant, link) in self.links.iter_mut() {
            if !envelope.recipient.includes(participant) {
                continue;
            }
            if let Err(err) = link.send(envelope.channel, &envelope.message) {
                tracing::warn!("link to {participant} failed: {err}");
                failed.push(participant);
            }
        }
        for participant in failed {
            self.links.remove(&participant);
            self.lost.push(participant);
        }
    }

    /// Dispatch a batch of envelopes in order.
    pub fn dispatch_all(&mut self, envelopes: impl IntoIterator<Item = Envelope>) {
        for envelope in envelopes {
            self.dispatch(&envelope);
        }
    }

    /// Drain all links.
    pub fn poll(&mut self) -> HubPoll {
        let mut poll = HubPoll {
            messages: Vec::new(),
            lost: std::mem::take(&mut self.lost),
        };
        for (&participant, link) in self.links.iter_mut() {
            match link.receive() {
                Ok(messages) => poll
                    .messages
                    .extend(messages.into_iter().map(|m| (participant, m))),
                Err(err) => {
                    tracing::info!("link to {participant} closed: {err}");
                    poll.lost.push(participant);
                }
            }
        }
        for participant in &poll.lost {
            self.links.remove(participant);
        }
        poll
    }
}

impl<T: Transport> Default for Hub<T> {
    fn default() -> Self {
        Self::new()
    }
}
