//! Exchanges: one request/response interaction with a peer.
//!
//! An [`Exchange`] is shared between the application, the layers and the
//! scheduled tasks through an `Arc`. Its mutable part sits behind one mutex;
//! every timer firing, reply and cancellation is a single critical section
//! on it, which is what makes "resend after completion" impossible.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tokio::time::Instant;

use crate::core::ExchangeObserver;
use crate::message::{Request, Response};

static NEXT_EXCHANGE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique exchange identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExchangeId(u64);

impl ExchangeId {
    fn next() -> Self {
        Self(NEXT_EXCHANGE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a raw value, for keys built outside an exchange.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which side started the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// We sent the request.
    Local,
    /// The peer sent the request; we answer it.
    Remote,
}

/// How an exchange ended. Recorded once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// A response arrived for our request.
    Responded(Response),
    /// The peer acknowledged the confirmable response we sent.
    Acknowledged,
    /// The peer answered with a reset.
    Rejected,
    /// Retransmissions were exhausted without a reply.
    TimedOut,
    /// The bookkeeping sweep removed the exchange before it resolved.
    Swept,
    /// The application gave up.
    Cancelled,
}

impl ExchangeOutcome {
    /// Whether the peer answered at all.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ExchangeOutcome::Responded(_) | ExchangeOutcome::Acknowledged
        )
    }
}

/// Mutable part of an exchange.
#[derive(Debug, Default)]
pub(crate) struct ExchangeState {
    pub(crate) request: Option<Request>,
    pub(crate) response: Option<Response>,
    pub(crate) failed_transmissions: u32,
    pub(crate) current_timeout: Duration,
    /// Bumped whenever a retransmission timer is armed or disarmed; a timer
    /// that wakes with an older value is stale.
    pub(crate) timer_generation: u64,
    pub(crate) acknowledged: bool,
    pub(crate) outcome: Option<ExchangeOutcome>,
}

/// One request/response interaction with a peer.
pub struct Exchange {
    id: ExchangeId,
    peer: SocketAddr,
    origin: Origin,
    created_at: Instant,
    completed: AtomicBool,
    state: Mutex<ExchangeState>,
    observer: Option<Arc<dyn ExchangeObserver>>,
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("origin", &self.origin)
            .field("completed", &self.is_complete())
            .finish_non_exhaustive()
    }
}

impl Exchange {
    /// New exchange with `peer`.
    pub fn new(peer: SocketAddr, origin: Origin) -> Self {
        Self {
            id: ExchangeId::next(),
            peer,
            origin,
            created_at: Instant::now(),
            completed: AtomicBool::new(false),
            state: Mutex::new(ExchangeState::default()),
            observer: None,
        }
    }

    /// Client-side exchange: we send the request.
    pub fn local(peer: SocketAddr) -> Self {
        Self::new(peer, Origin::Local)
    }

    /// Server-side exchange: we answer the peer's request.
    pub fn remote(peer: SocketAddr) -> Self {
        Self::new(peer, Origin::Remote)
    }

    /// Attach application callbacks.
    pub fn with_observer(mut self, observer: Arc<dyn ExchangeObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Identifier.
    pub fn id(&self) -> ExchangeId {
        self.id
    }

    /// Peer address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Which side started the exchange.
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Creation instant.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Whether a terminal outcome has been recorded. Never takes the lock.
    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Terminal outcome, if any.
    pub fn outcome(&self) -> Option<ExchangeOutcome> {
        self.state.lock().outcome.clone()
    }

    /// Number of retransmissions so far.
    pub fn failed_transmissions(&self) -> u32 {
        self.state.lock().failed_transmissions
    }

    /// Timeout of the most recently armed retransmission timer.
    pub fn current_timeout(&self) -> Duration {
        self.state.lock().current_timeout
    }

    /// Whether the peer acknowledged our confirmable message.
    pub fn is_acknowledged(&self) -> bool {
        self.state.lock().acknowledged
    }

    /// Last request sent on this exchange.
    pub fn current_request(&self) -> Option<Request> {
        self.state.lock().request.clone()
    }

    /// Last response sent on this exchange.
    pub fn current_response(&self) -> Option<Response> {
        self.state.lock().response.clone()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ExchangeState> {
        self.state.lock()
    }

    /// Record `outcome` unless one is already set. Returns the outcome to
    /// report once the lock is released.
    pub(crate) fn finish(
        &self,
        state: &mut ExchangeState,
        outcome: ExchangeOutcome,
    ) -> Option<ExchangeOutcome> {
        if state.outcome.is_some() {
            return None;
        }
        tracing::debug!(exchange = %self.id, peer = %self.peer, ?outcome, "exchange complete");
        state.outcome = Some(outcome.clone());
        self.completed.store(true, Ordering::Release);
        Some(outcome)
    }

    pub(crate) fn notify_complete(&self, outcome: &ExchangeOutcome) {
        if let Some(observer) = &self.observer {
            observer.on_complete(self, outcome);
        }
    }

    pub(crate) fn notify_retransmission(&self, attempt: u32) {
        if let Some(observer) = &self.observer {
            observer.on_retransmission(self, attempt);
        }
    }

    pub(crate) fn notify_acknowledged(&self) {
        if let Some(observer) = &self.observer {
            observer.on_acknowledged(self);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "10.0.0.1:5683".parse().unwrap()
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Exchange::local(peer());
        let b = Exchange::local(peer());
        assert_ne!(a.id(), b.id());
        assert!(b.id().get() > a.id().get());
    }

    #[test]
    fn test_outcome_recorded_once() {
        let exchange = Exchange::local(peer());
        assert!(!exchange.is_complete());

        let mut state = exchange.lock();
        assert_eq!(
            exchange.finish(&mut state, ExchangeOutcome::TimedOut),
            Some(ExchangeOutcome::TimedOut)
        );
        assert_eq!(exchange.finish(&mut state, ExchangeOutcome::Cancelled), None);
        drop(state);

        assert!(exchange.is_complete());
        assert_eq!(exchange.outcome(), Some(ExchangeOutcome::TimedOut));
    }

    #[test]
    fn test_display() {
        assert_eq!(ExchangeId::from_raw(42).to_string(), "#42");
    }

    #[test]
    fn test_outcome_success() {
        assert!(ExchangeOutcome::Acknowledged.is_success());
        assert!(!ExchangeOutcome::Rejected.is_success());
        assert!(!ExchangeOutcome::Swept.is_success());
    }
}
