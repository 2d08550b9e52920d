//! Per-peer congestion control on top of the reliability layer.
//!
//! The [`CongestionControlLayer`] decides *whether* and *when* a message may
//! go out; the [`ReliabilityLayer`] it wraps handles retransmission. It
//! enforces NSTART per peer, queues confirmable exchanges that exceed it,
//! paces non-confirmable traffic at one message per RTO, turns every
//! `MAX_SUCCESSIVE_NONS + 1`-th non-confirmable into a confirmable one to
//! keep RTT samples flowing, and feeds those samples to an [`RtoEstimator`].
//!
//! Lock order is exchange, then remote endpoint. Paths that start on the
//! remote endpoint release it before touching the reliability layer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use super::estimator::RtoEstimator;
use super::exchange::Exchange;
use super::reliability::{ReliabilityLayer, RetransmissionTimeout};
use super::remote::{
    EstimatorKind, QueuedMessage, RemoteEndpoint, RemoteEndpointManager, RemoteEndpointSnapshot,
};
use super::scheduler::{Scheduler, TaskKey};
use super::timing::{backoff, dither};
use crate::config::NetworkConfig;
use crate::core::{MessageLayer, Outbox};
use crate::message::{EmptyMessage, MessageType, OutboundMessage, Request, Response};

/// Retransmission timeouts derived from the peer's RTO.
///
/// First attempt: the peer's current RTO, or with dithering the estimated
/// RTO drawn from `[RTO, RTO × ACK_RANDOM_FACTOR]`. Retries: the previous
/// timeout times the VBF fixed at admission, capped at `MAX_RTO`; the
/// result becomes the peer's current RTO but never reaches the estimator.
struct AdaptiveTimeout<E: RtoEstimator> {
    config: Arc<NetworkConfig>,
    remotes: Arc<RemoteEndpointManager<E::State>>,
    estimator: Arc<E>,
    dithering: Arc<AtomicBool>,
}

impl<E: RtoEstimator> RetransmissionTimeout for AdaptiveTimeout<E> {
    fn timeout(&self, exchange: &Exchange, attempt: u32, previous: Duration) -> Duration {
        let endpoint = self.remotes.remote_endpoint(exchange.peer());
        let mut remote = endpoint.lock();

        if attempt == 0 {
            if self.dithering.load(Ordering::Relaxed) {
                remote.match_current_rto();
                dither(remote.rto(), self.config.ack_random_factor).min(self.config.max_rto)
            } else {
                remote.rto()
            }
        } else {
            let vbf = remote
                .exchange_vbf(exchange.id())
                .unwrap_or_else(|| self.estimator.calculate_vbf(remote.rto()));
            let timeout = backoff(previous, vbf, self.config.max_rto);
            remote.set_current_rto(timeout);
            timeout
        }
    }
}

/// Result of offering a message to a peer.
enum Admission {
    /// Registered against NSTART; send now.
    Admitted(OutboundMessage),
    /// Not subject to admission (ACK, RST); send now.
    PassThrough(OutboundMessage),
    /// Waiting in the confirmable queue.
    Queued,
    /// Waiting in the non-confirmable queue.
    Paced { start: bool },
    /// Queue full.
    Dropped,
}

/// Congestion control layer, generic over the RTO estimator.
pub struct CongestionControlLayer<E: RtoEstimator> {
    config: Arc<NetworkConfig>,
    reliability: ReliabilityLayer,
    scheduler: Scheduler,
    remotes: Arc<RemoteEndpointManager<E::State>>,
    estimator: Arc<E>,
    dithering: Arc<AtomicBool>,
}

impl<E: RtoEstimator> Clone for CongestionControlLayer<E> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            reliability: self.reliability.clone(),
            scheduler: self.scheduler.clone(),
            remotes: Arc::clone(&self.remotes),
            estimator: Arc::clone(&self.estimator),
            dithering: Arc::clone(&self.dithering),
        }
    }
}

impl<E: RtoEstimator> std::fmt::Debug for CongestionControlLayer<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CongestionControlLayer")
            .field("algorithm", &self.estimator.name())
            .field("peers", &self.remotes.len())
            .field("dithering", &self.applies_dithering())
            .finish_non_exhaustive()
    }
}

impl<E: RtoEstimator> CongestionControlLayer<E> {
    /// Layer using `estimator`, sending through `outbox`.
    pub fn new(
        config: impl Into<Arc<NetworkConfig>>,
        estimator: E,
        scheduler: Scheduler,
        outbox: Arc<dyn Outbox>,
    ) -> Self {
        let config = config.into();
        let remotes = Arc::new(RemoteEndpointManager::new(&config));
        let dithering = Arc::new(AtomicBool::new(estimator.applies_dithering()));
        let estimator = Arc::new(estimator);

        let timeouts = Arc::new(AdaptiveTimeout {
            config: Arc::clone(&config),
            remotes: Arc::clone(&remotes),
            estimator: Arc::clone(&estimator),
            dithering: Arc::clone(&dithering),
        });
        let reliability =
            ReliabilityLayer::with_timeouts(Arc::clone(&config), scheduler.clone(), outbox, timeouts);

        tracing::debug!(algorithm = estimator.name(), "congestion control enabled");

        Self {
            config,
            reliability,
            scheduler,
            remotes,
            estimator,
            dithering,
        }
    }

    /// The RTO estimator.
    pub fn estimator(&self) -> &E {
        &self.estimator
    }

    /// Peer table.
    pub fn remote_endpoints(&self) -> &RemoteEndpointManager<E::State> {
        &self.remotes
    }

    /// Read-only view of `peer`, if it has been seen.
    pub fn remote_snapshot(&self, peer: &SocketAddr) -> Option<RemoteEndpointSnapshot> {
        self.remotes.get(peer).map(|endpoint| endpoint.lock().snapshot())
    }

    /// Whether first-attempt timeouts are randomized.
    pub fn applies_dithering(&self) -> bool {
        self.dithering.load(Ordering::Relaxed)
    }

    /// Turn dithering of first-attempt timeouts on or off.
    pub fn set_dithering(&self, enabled: bool) {
        self.dithering.store(enabled, Ordering::Relaxed);
    }

    // ========================================================================
    // Send path
    // ========================================================================

    fn send(&self, exchange: &Arc<Exchange>, message: OutboundMessage) {
        // Already retransmitting: admission happened on the first send.
        if exchange.failed_transmissions() > 0 {
            self.forward(exchange, message);
            return;
        }

        if let Some(message) = self.process_message(exchange, message) {
            self.forward(exchange, message);
        }
    }

    fn forward(&self, exchange: &Arc<Exchange>, message: OutboundMessage) {
        match message {
            OutboundMessage::Request(request) => self.reliability.send_request(exchange, request),
            OutboundMessage::Response(response) => {
                self.reliability.send_response(exchange, response)
            }
        }
    }

    /// Admission or queueing by message type. Returns the message if it
    /// may be sent right away.
    fn process_message(
        &self,
        exchange: &Arc<Exchange>,
        mut message: OutboundMessage,
    ) -> Option<OutboundMessage> {
        let peer = exchange.peer();
        let endpoint = self.remotes.remote_endpoint(peer);

        let admission = {
            let mut remote = endpoint.lock();
            match message.mtype() {
                MessageType::Con => self.check_nstart(&mut remote, exchange, message),
                MessageType::Non => {
                    if remote.non_confirmable_counter() >= self.config.max_successive_nons {
                        tracing::debug!(%peer, exchange = %exchange.id(), "sending non-confirmable as confirmable");
                        message.set_type(MessageType::Con);
                        remote.reset_non_confirmable_counter();
                        self.check_nstart(&mut remote, exchange, message)
                    } else if remote.enqueue_non_confirmable(QueuedMessage {
                        exchange: Arc::clone(exchange),
                        message,
                    }) {
                        remote.increase_non_confirmable_counter();
                        let start = !remote.processing_non();
                        if start {
                            remote.set_processing_non(true);
                        }
                        Admission::Paced { start }
                    } else {
                        Admission::Dropped
                    }
                }
                MessageType::Ack | MessageType::Rst => Admission::PassThrough(message),
            }
        };

        match admission {
            Admission::Admitted(message) => {
                self.schedule_sweep(exchange);
                Some(message)
            }
            Admission::PassThrough(message) => Some(message),
            Admission::Queued => {
                tracing::debug!(%peer, exchange = %exchange.id(), "nstart reached, exchange queued");
                self.release_queued(peer);
                None
            }
            Admission::Paced { start } => {
                if start {
                    self.schedule_pacing(peer, Duration::ZERO);
                }
                None
            }
            Admission::Dropped => {
                tracing::warn!(%peer, exchange = %exchange.id(), "send queue full, message dropped");
                None
            }
        }
    }

    /// NSTART check and registration, in one critical section.
    ///
    /// Admits only when a slot is free and nobody is queued ahead.
    fn check_nstart(
        &self,
        remote: &mut RemoteEndpoint<E::State>,
        exchange: &Arc<Exchange>,
        message: OutboundMessage,
    ) -> Admission {
        remote.purge_completed();

        if remote.ongoing_exchanges() < self.config.nstart as usize
            && remote.confirmable_queue_len() == 0
        {
            self.admit(remote, exchange);
            return Admission::Admitted(message);
        }

        let queued = QueuedMessage {
            exchange: Arc::clone(exchange),
            message,
        };
        if remote.enqueue_confirmable(queued) {
            Admission::Queued
        } else {
            Admission::Dropped
        }
    }

    fn admit(&self, remote: &mut RemoteEndpoint<E::State>, exchange: &Arc<Exchange>) {
        let now = Instant::now();
        let vbf = self.estimator.calculate_vbf(remote.rto());
        remote.register_exchange(Arc::clone(exchange), now, vbf);
        self.estimator.check_aging(remote, now);

        tracing::trace!(
            peer = %remote.peer(),
            exchange = %exchange.id(),
            ongoing = remote.ongoing_exchanges(),
            vbf,
            "exchange admitted"
        );
    }

    /// Admit queued confirmable exchanges while slots are free.
    fn release_queued(&self, peer: SocketAddr) {
        let endpoint = self.remotes.remote_endpoint(peer);

        let released = {
            let mut remote = endpoint.lock();
            remote.purge_completed();

            let mut released = Vec::new();
            while remote.ongoing_exchanges() < self.config.nstart as usize {
                let Some(queued) = remote.poll_confirmable() else {
                    break;
                };
                if queued.exchange.is_complete() {
                    tracing::trace!(%peer, exchange = %queued.exchange.id(), "skipping completed queued exchange");
                    continue;
                }
                self.admit(&mut remote, &queued.exchange);
                released.push(queued);
            }
            released
        };

        for queued in released {
            tracing::debug!(%peer, exchange = %queued.exchange.id(), "releasing queued exchange");
            self.schedule_sweep(&queued.exchange);
            self.forward(&queued.exchange, queued.message);
        }
    }

    // ========================================================================
    // Sweep
    // ========================================================================

    fn schedule_sweep(&self, exchange: &Arc<Exchange>) {
        let layer = self.clone();
        let target = Arc::clone(exchange);
        self.scheduler.schedule(
            TaskKey::Sweep(exchange.id()),
            self.config.max_transaction_duration,
            move || layer.sweep(&target),
        );
    }

    fn sweep(&self, exchange: &Arc<Exchange>) {
        let removed = self
            .remotes
            .remote_endpoint(exchange.peer())
            .lock()
            .remove_exchange_info(exchange.id())
            .is_some();
        if !removed {
            tracing::trace!(exchange = %exchange.id(), "sweep found nothing to remove");
            return;
        }

        tracing::debug!(exchange = %exchange.id(), peer = %exchange.peer(), "sweeping exchange");
        self.reliability.sweep(exchange);
        self.release_queued(exchange.peer());
    }

    // ========================================================================
    // Pacing
    // ========================================================================

    fn schedule_pacing(&self, peer: SocketAddr, delay: Duration) {
        let layer = self.clone();
        self.scheduler
            .schedule(TaskKey::Pacing(peer), delay, move || layer.pace(peer));
    }

    /// Send one queued non-confirmable and come back after one RTO.
    fn pace(&self, peer: SocketAddr) {
        let endpoint = self.remotes.remote_endpoint(peer);

        let (next, rto) = {
            let mut remote = endpoint.lock();
            match remote.poll_non_confirmable() {
                Some(next) => (next, remote.rto()),
                None => {
                    remote.set_processing_non(false);
                    tracing::trace!(%peer, "pacing idle");
                    return;
                }
            }
        };

        tracing::trace!(%peer, exchange = %next.exchange.id(), "paced send");
        self.forward(&next.exchange, next.message);
        self.schedule_pacing(peer, rto);
    }

    // ========================================================================
    // Receive path
    // ========================================================================

    /// Runs inside the exchange's critical section once its timer is
    /// disarmed, so no retransmission can slip in between the reply and
    /// the sample, and no purge can drop the registration first.
    fn on_reply(&self, exchange: &Exchange, retransmissions: u32) {
        let endpoint = self.remotes.remote_endpoint(exchange.peer());
        let mut remote = endpoint.lock();
        if retransmissions != 0 {
            remote.set_estimator_state(retransmissions);
        }

        if let Some(info) = remote.remove_exchange_info(exchange.id()) {
            let rtt = Instant::now().saturating_duration_since(info.registered_at());
            self.process_rtt_measurement(rtt, retransmissions, &mut remote);
            self.scheduler.cancel(&TaskKey::Sweep(exchange.id()));
        }
    }

    fn process_rtt_measurement(
        &self,
        rtt: Duration,
        retransmissions: u32,
        remote: &mut RemoteEndpoint<E::State>,
    ) {
        let kind = if retransmissions == 0 {
            EstimatorKind::Strong
        } else {
            remote.estimator_state()
        };

        if kind == EstimatorKind::NoEstimator {
            tracing::trace!(peer = %remote.peer(), rtt_ms = rtt.as_millis() as u64, "rtt sample discarded");
            return;
        }

        if remote.has_estimate(kind) {
            self.estimator.update(rtt, kind, remote);
        } else {
            self.estimator.initialize(rtt, kind, remote);
            remote.mark_estimated(kind);
        }

        tracing::debug!(
            peer = %remote.peer(),
            rtt_ms = rtt.as_millis() as u64,
            ?kind,
            rto_ms = remote.rto().as_millis() as u64,
            "rtt sample"
        );
    }
}

impl<E: RtoEstimator> MessageLayer for CongestionControlLayer<E> {
    fn send_request(&self, exchange: &Arc<Exchange>, request: Request) {
        self.send(exchange, OutboundMessage::Request(request));
    }

    fn send_response(&self, exchange: &Arc<Exchange>, response: Response) {
        self.send(exchange, OutboundMessage::Response(response));
    }

    fn receive_response(&self, exchange: &Arc<Exchange>, response: Response) {
        self.reliability
            .settle_response(exchange, response, |retransmissions| {
                self.on_reply(exchange, retransmissions)
            });
        self.release_queued(exchange.peer());
    }

    fn receive_empty_message(&self, exchange: &Arc<Exchange>, message: EmptyMessage) {
        self.reliability
            .settle_empty_message(exchange, message, |retransmissions| {
                self.on_reply(exchange, retransmissions)
            });
        self.release_queued(exchange.peer());
    }

    fn cancel(&self, exchange: &Arc<Exchange>) {
        self.reliability.cancel(exchange);
        let removed = self
            .remotes
            .remote_endpoint(exchange.peer())
            .lock()
            .remove_exchange_info(exchange.id())
            .is_some();
        if removed {
            self.scheduler.cancel(&TaskKey::Sweep(exchange.id()));
        }
        self.release_queued(exchange.peer());
    }
}
