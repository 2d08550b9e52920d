//! Per-peer congestion state.
//!
//! A [`RemoteEndpoint`] holds everything the congestion layer knows about one
//! peer: its RTO, the estimator memory, the exchanges currently in flight
//! and the two bounded send queues. The [`RemoteEndpointManager`] maps peer
//! addresses to endpoints, creating them on first contact.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::exchange::{Exchange, ExchangeId};
use crate::config::NetworkConfig;
use crate::core::constants::MIN_RTO;
use crate::message::OutboundMessage;

/// Quality of the RTT samples a peer currently yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EstimatorKind {
    /// Sample from a first transmission: unambiguous.
    #[default]
    Strong,
    /// Sample after one or two retransmissions.
    Weak,
    /// Too many retransmissions; samples are discarded.
    NoEstimator,
}

impl EstimatorKind {
    /// Kind of the sample taken after `retransmissions` resends.
    pub fn from_retransmissions(retransmissions: u32) -> Self {
        match retransmissions {
            0 => EstimatorKind::Strong,
            1 | 2 => EstimatorKind::Weak,
            _ => EstimatorKind::NoEstimator,
        }
    }
}

/// A message parked in one of the per-peer queues.
#[derive(Debug, Clone)]
pub(crate) struct QueuedMessage {
    pub(crate) exchange: Arc<Exchange>,
    pub(crate) message: OutboundMessage,
}

/// Bookkeeping for an admitted confirmable exchange.
#[derive(Debug, Clone)]
pub struct ExchangeInfo {
    exchange: Arc<Exchange>,
    registered_at: Instant,
    vbf: f64,
}

impl ExchangeInfo {
    /// The exchange.
    pub fn exchange(&self) -> &Arc<Exchange> {
        &self.exchange
    }

    /// Admission instant, the start of the RTT sample.
    pub fn registered_at(&self) -> Instant {
        self.registered_at
    }

    /// Backoff factor fixed at admission.
    pub fn vbf(&self) -> f64 {
        self.vbf
    }
}

/// Read-only view of a peer's state.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEndpointSnapshot {
    /// Peer address.
    pub peer: SocketAddr,
    /// Current, possibly backed-off, RTO.
    pub rto: Duration,
    /// Latest estimator output.
    pub estimated_rto: Duration,
    /// Kind of samples the peer currently yields.
    pub estimator_state: EstimatorKind,
    /// Admitted confirmable exchanges.
    pub ongoing: usize,
    /// Confirmable exchanges waiting for admission.
    pub queued_confirmable: usize,
    /// Non-confirmable messages waiting for pacing.
    pub queued_non_confirmable: usize,
    /// Non-confirmables since the last confirmable.
    pub non_confirmable_counter: u32,
    /// Whether the pacing loop is running.
    pub processing_non: bool,
}

/// State of one peer, generic over the estimator's private memory.
#[derive(Debug)]
pub struct RemoteEndpoint<S> {
    peer: SocketAddr,
    rto: Duration,
    estimated_rto: Duration,
    max_rto: Duration,
    last_rto_update: Instant,
    estimator_state: EstimatorKind,
    has_strong_estimate: bool,
    has_weak_estimate: bool,
    memory: S,
    non_confirmable_counter: u32,
    confirmable_queue: VecDeque<QueuedMessage>,
    non_confirmable_queue: VecDeque<QueuedMessage>,
    ongoing: HashMap<ExchangeId, ExchangeInfo>,
    processing_non: bool,
    queue_limit: usize,
}

impl<S: Default> RemoteEndpoint<S> {
    /// Fresh peer with `initial_rto` and empty queues.
    pub fn new(peer: SocketAddr, initial_rto: Duration, max_rto: Duration, queue_limit: usize) -> Self {
        Self {
            peer,
            rto: initial_rto,
            estimated_rto: initial_rto,
            max_rto,
            last_rto_update: Instant::now(),
            estimator_state: EstimatorKind::Strong,
            has_strong_estimate: false,
            has_weak_estimate: false,
            memory: S::default(),
            non_confirmable_counter: 0,
            confirmable_queue: VecDeque::new(),
            non_confirmable_queue: VecDeque::new(),
            ongoing: HashMap::new(),
            processing_non: false,
            queue_limit,
        }
    }
}

impl<S> RemoteEndpoint<S> {
    /// Peer address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    // ========================================================================
    // RTO
    // ========================================================================

    /// Current RTO.
    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// Latest estimator output.
    pub fn estimated_rto(&self) -> Duration {
        self.estimated_rto
    }

    /// Upper bound for every RTO.
    pub fn max_rto(&self) -> Duration {
        self.max_rto
    }

    /// When the estimator last changed the RTO.
    pub fn last_rto_update(&self) -> Instant {
        self.last_rto_update
    }

    /// Store a new estimator value as both estimated and current RTO,
    /// clamped to `[MIN_RTO, max_rto]`.
    pub fn update_rto(&mut self, rto: Duration) {
        let rto = self.bounded(rto);
        tracing::trace!(peer = %self.peer, rto_ms = rto.as_millis() as u64, "rto updated");
        self.estimated_rto = rto;
        self.rto = rto;
        self.last_rto_update = Instant::now();
    }

    /// Record a backed-off RTO without touching the estimate.
    pub fn set_current_rto(&mut self, rto: Duration) {
        self.rto = self.bounded(rto);
    }

    fn bounded(&self, rto: Duration) -> Duration {
        rto.max(MIN_RTO).min(self.max_rto)
    }

    /// Drop any backoff: current RTO := estimated RTO.
    pub fn match_current_rto(&mut self) {
        self.rto = self.estimated_rto;
    }

    // ========================================================================
    // Estimator bookkeeping
    // ========================================================================

    /// Kind of samples the peer currently yields.
    pub fn estimator_state(&self) -> EstimatorKind {
        self.estimator_state
    }

    /// Classify the peer by the retransmissions of its latest exchange.
    pub fn set_estimator_state(&mut self, retransmissions: u32) {
        self.estimator_state = EstimatorKind::from_retransmissions(retransmissions);
    }

    /// Whether the estimator of `kind` has seen a sample.
    pub fn has_estimate(&self, kind: EstimatorKind) -> bool {
        match kind {
            EstimatorKind::Strong => self.has_strong_estimate,
            EstimatorKind::Weak => self.has_weak_estimate,
            EstimatorKind::NoEstimator => false,
        }
    }

    /// Remember that the estimator of `kind` was initialized.
    pub fn mark_estimated(&mut self, kind: EstimatorKind) {
        match kind {
            EstimatorKind::Strong => self.has_strong_estimate = true,
            EstimatorKind::Weak => self.has_weak_estimate = true,
            EstimatorKind::NoEstimator => {}
        }
    }

    /// Estimator private memory.
    pub fn memory(&self) -> &S {
        &self.memory
    }

    /// Estimator private memory, mutably.
    pub fn memory_mut(&mut self) -> &mut S {
        &mut self.memory
    }

    // ========================================================================
    // Non-confirmable counter
    // ========================================================================

    /// Non-confirmables since the last confirmable.
    pub fn non_confirmable_counter(&self) -> u32 {
        self.non_confirmable_counter
    }

    pub(crate) fn increase_non_confirmable_counter(&mut self) -> u32 {
        self.non_confirmable_counter += 1;
        self.non_confirmable_counter
    }

    pub(crate) fn reset_non_confirmable_counter(&mut self) {
        self.non_confirmable_counter = 0;
    }

    // ========================================================================
    // Ongoing exchanges
    // ========================================================================

    /// Admitted exchanges still registered.
    pub fn ongoing_exchanges(&self) -> usize {
        self.ongoing.len()
    }

    /// Drop entries of exchanges that already reached an outcome.
    pub(crate) fn purge_completed(&mut self) {
        let peer = self.peer;
        self.ongoing.retain(|id, info| {
            let keep = !info.exchange.is_complete();
            if !keep {
                tracing::trace!(%peer, exchange = %id, "purging completed exchange");
            }
            keep
        });
    }

    pub(crate) fn register_exchange(&mut self, exchange: Arc<Exchange>, now: Instant, vbf: f64) {
        self.ongoing.insert(
            exchange.id(),
            ExchangeInfo {
                exchange,
                registered_at: now,
                vbf,
            },
        );
    }

    /// Backoff factor fixed when `id` was admitted.
    pub fn exchange_vbf(&self, id: ExchangeId) -> Option<f64> {
        self.ongoing.get(&id).map(ExchangeInfo::vbf)
    }

    pub(crate) fn remove_exchange_info(&mut self, id: ExchangeId) -> Option<ExchangeInfo> {
        self.ongoing.remove(&id)
    }

    // ========================================================================
    // Queues
    // ========================================================================

    /// Confirmable exchanges waiting for admission.
    pub fn confirmable_queue_len(&self) -> usize {
        self.confirmable_queue.len()
    }

    /// Non-confirmable messages waiting for pacing.
    pub fn non_confirmable_queue_len(&self) -> usize {
        self.non_confirmable_queue.len()
    }

    /// Returns `false`, leaving the queue untouched, when it is full.
    pub(crate) fn enqueue_confirmable(&mut self, queued: QueuedMessage) -> bool {
        if self.confirmable_queue.len() >= self.queue_limit {
            return false;
        }
        self.confirmable_queue.push_back(queued);
        true
    }

    pub(crate) fn poll_confirmable(&mut self) -> Option<QueuedMessage> {
        self.confirmable_queue.pop_front()
    }

    /// Returns `false`, leaving the queue untouched, when it is full.
    pub(crate) fn enqueue_non_confirmable(&mut self, queued: QueuedMessage) -> bool {
        if self.non_confirmable_queue.len() >= self.queue_limit {
            return false;
        }
        self.non_confirmable_queue.push_back(queued);
        true
    }

    pub(crate) fn poll_non_confirmable(&mut self) -> Option<QueuedMessage> {
        self.non_confirmable_queue.pop_front()
    }

    /// Whether the pacing loop is running.
    pub fn processing_non(&self) -> bool {
        self.processing_non
    }

    pub(crate) fn set_processing_non(&mut self, processing: bool) {
        self.processing_non = processing;
    }

    /// Copy of the externally interesting fields.
    pub fn snapshot(&self) -> RemoteEndpointSnapshot {
        RemoteEndpointSnapshot {
            peer: self.peer,
            rto: self.rto,
            estimated_rto: self.estimated_rto,
            estimator_state: self.estimator_state,
            ongoing: self.ongoing.len(),
            queued_confirmable: self.confirmable_queue.len(),
            queued_non_confirmable: self.non_confirmable_queue.len(),
            non_confirmable_counter: self.non_confirmable_counter,
            processing_non: self.processing_non,
        }
    }
}

/// Shared handle to one peer's state.
pub type SharedRemoteEndpoint<S> = Arc<Mutex<RemoteEndpoint<S>>>;

/// Concurrent peer table. Entries are created on first lookup and never
/// evicted.
#[derive(Debug)]
pub struct RemoteEndpointManager<S> {
    endpoints: DashMap<SocketAddr, SharedRemoteEndpoint<S>>,
    initial_rto: Duration,
    max_rto: Duration,
    queue_limit: usize,
}

impl<S: Default> RemoteEndpointManager<S> {
    /// Empty table; new peers start at `ACK_TIMEOUT`.
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            endpoints: DashMap::new(),
            initial_rto: config.ack_timeout,
            max_rto: config.max_rto,
            queue_limit: config.exchange_limit,
        }
    }

    /// Endpoint for `peer`, created if absent.
    pub fn remote_endpoint(&self, peer: SocketAddr) -> SharedRemoteEndpoint<S> {
        if let Some(existing) = self.get(&peer) {
            return existing;
        }
        let entry = self.endpoints.entry(peer).or_insert_with(|| {
            tracing::debug!(%peer, "new remote endpoint");
            Arc::new(Mutex::new(RemoteEndpoint::new(
                peer,
                self.initial_rto,
                self.max_rto,
                self.queue_limit,
            )))
        });
        Arc::clone(entry.value())
    }
}

impl<S> RemoteEndpointManager<S> {
    /// Endpoint for `peer` if one exists.
    pub fn get(&self, peer: &SocketAddr) -> Option<SharedRemoteEndpoint<S>> {
        self.endpoints.get(peer).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of known peers.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Whether no peer has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
