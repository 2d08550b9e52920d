//! Retransmission of confirmable messages.
//!
//! The [`ReliabilityLayer`] arms one timer per confirmable message and
//! resends the stored message until it is answered or `MAX_RETRANSMIT`
//! timer firings have passed. How long each timer runs is decided by a
//! [`RetransmissionTimeout`] policy; the congestion layer plugs its own in.
//!
//! Every firing, reply and cancellation runs under the exchange lock and the
//! resend happens inside the same critical section as the staleness check.

use std::sync::Arc;
use std::time::Duration;

use super::exchange::{Exchange, ExchangeOutcome, ExchangeState, Origin};
use super::scheduler::{Scheduler, TaskKey};
use super::timing::{backoff, dither};
use crate::config::NetworkConfig;
use crate::core::{MessageLayer, Outbox};
use crate::message::{EmptyMessage, MessageType, Request, Response};

/// Chooses the next retransmission timeout.
pub trait RetransmissionTimeout: Send + Sync {
    /// Timeout for the timer armed after `attempt` retransmissions.
    ///
    /// `previous` is the timeout of the last timer (zero on the first
    /// attempt). Called with the exchange lock held: implementations must
    /// not lock the exchange.
    fn timeout(&self, exchange: &Exchange, attempt: u32, previous: Duration) -> Duration;
}

/// RFC 7252 binary exponential backoff.
///
/// The first timeout is drawn from `[ACK_TIMEOUT, ACK_TIMEOUT ×
/// ACK_RANDOM_FACTOR]`; each retry multiplies by `ACK_TIMEOUT_SCALE`, capped
/// at `MAX_RTO`.
#[derive(Debug, Clone)]
pub struct BinaryBackoff {
    ack_timeout: Duration,
    random_factor: f64,
    scale: f64,
    max_rto: Duration,
}

impl BinaryBackoff {
    /// Policy from `config`.
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            ack_timeout: config.ack_timeout,
            random_factor: config.ack_random_factor,
            scale: config.ack_timeout_scale,
            max_rto: config.max_rto,
        }
    }
}

impl RetransmissionTimeout for BinaryBackoff {
    fn timeout(&self, _exchange: &Exchange, attempt: u32, previous: Duration) -> Duration {
        if attempt == 0 {
            dither(self.ack_timeout, self.random_factor).min(self.max_rto)
        } else {
            backoff(previous, self.scale, self.max_rto)
        }
    }
}

/// Reliable delivery of confirmable messages.
#[derive(Clone)]
pub struct ReliabilityLayer {
    config: Arc<NetworkConfig>,
    scheduler: Scheduler,
    outbox: Arc<dyn Outbox>,
    timeouts: Arc<dyn RetransmissionTimeout>,
}

impl std::fmt::Debug for ReliabilityLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReliabilityLayer")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl ReliabilityLayer {
    /// Layer with [`BinaryBackoff`] timeouts.
    pub fn new(
        config: impl Into<Arc<NetworkConfig>>,
        scheduler: Scheduler,
        outbox: Arc<dyn Outbox>,
    ) -> Self {
        let config = config.into();
        let timeouts = Arc::new(BinaryBackoff::new(&config));
        Self::with_timeouts(config, scheduler, outbox, timeouts)
    }

    /// Layer with a custom timeout policy.
    pub fn with_timeouts(
        config: impl Into<Arc<NetworkConfig>>,
        scheduler: Scheduler,
        outbox: Arc<dyn Outbox>,
        timeouts: Arc<dyn RetransmissionTimeout>,
    ) -> Self {
        Self {
            config: config.into(),
            scheduler,
            outbox,
            timeouts,
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Arm the retransmission timer for the next attempt.
    fn prepare_retransmission(&self, exchange: &Arc<Exchange>, state: &mut ExchangeState) {
        let timeout = self.timeouts.timeout(
            exchange,
            state.failed_transmissions,
            state.current_timeout,
        );
        state.current_timeout = timeout;
        state.timer_generation += 1;
        let generation = state.timer_generation;

        tracing::trace!(
            exchange = %exchange.id(),
            peer = %exchange.peer(),
            attempt = state.failed_transmissions,
            timeout_ms = timeout.as_millis() as u64,
            "retransmission timer armed"
        );

        let layer = self.clone();
        let target = Arc::clone(exchange);
        self.scheduler.schedule(
            TaskKey::Retransmission(exchange.id()),
            timeout,
            move || layer.retransmit(&target, generation),
        );
    }

    fn disarm(&self, exchange: &Exchange, state: &mut ExchangeState) {
        state.timer_generation += 1;
        self.scheduler
            .cancel(&TaskKey::Retransmission(exchange.id()));
    }

    /// Timer body.
    fn retransmit(&self, exchange: &Arc<Exchange>, generation: u64) {
        let mut state = exchange.lock();
        if state.outcome.is_some() || state.acknowledged || state.timer_generation != generation {
            tracing::trace!(exchange = %exchange.id(), "stale retransmission timer");
            return;
        }

        state.failed_transmissions += 1;
        let attempt = state.failed_transmissions;

        if attempt >= self.config.max_retransmit {
            let outcome = exchange.finish(&mut state, ExchangeOutcome::TimedOut);
            drop(state);
            tracing::debug!(
                exchange = %exchange.id(),
                peer = %exchange.peer(),
                attempts = attempt,
                "retransmissions exhausted"
            );
            if let Some(outcome) = outcome {
                exchange.notify_complete(&outcome);
            }
            return;
        }

        // Prefer the message that matches the origin, else whatever is stored.
        let resent = match (exchange.origin(), &state.request, &state.response) {
            (Origin::Remote, _, Some(response)) | (_, None, Some(response)) => {
                self.outbox.send_response(exchange, response);
                true
            }
            (_, Some(request), _) => {
                self.outbox.send_request(exchange, request);
                true
            }
            (_, None, None) => false,
        };
        if !resent {
            let outcome = exchange.finish(&mut state, ExchangeOutcome::TimedOut);
            drop(state);
            tracing::warn!(exchange = %exchange.id(), "nothing stored to retransmit");
            if let Some(outcome) = outcome {
                exchange.notify_complete(&outcome);
            }
            return;
        }

        tracing::debug!(
            exchange = %exchange.id(),
            peer = %exchange.peer(),
            attempt,
            "retransmitting"
        );
        self.prepare_retransmission(exchange, &mut state);
        drop(state);

        exchange.notify_retransmission(attempt);
    }

    /// Receive a response. `on_reply` runs inside the exchange's critical
    /// section, after the timer is disarmed and before the outcome is
    /// recorded, with the number of retransmissions so far.
    pub(crate) fn settle_response<F>(&self, exchange: &Arc<Exchange>, response: Response, on_reply: F)
    where
        F: FnOnce(u32),
    {
        let outcome = {
            let mut state = exchange.lock();
            state.acknowledged = true;
            self.disarm(exchange, &mut state);
            on_reply(state.failed_transmissions);
            exchange.finish(&mut state, ExchangeOutcome::Responded(response))
        };
        if let Some(outcome) = outcome {
            exchange.notify_complete(&outcome);
        }
    }

    /// Receive an empty ACK or RST, with `on_reply` as in
    /// [`settle_response`](Self::settle_response).
    pub(crate) fn settle_empty_message<F>(
        &self,
        exchange: &Arc<Exchange>,
        message: EmptyMessage,
        on_reply: F,
    ) where
        F: FnOnce(u32),
    {
        let (acknowledged, outcome) = {
            let mut state = exchange.lock();
            self.disarm(exchange, &mut state);
            on_reply(state.failed_transmissions);
            match message.mtype() {
                MessageType::Rst => (
                    false,
                    exchange.finish(&mut state, ExchangeOutcome::Rejected),
                ),
                _ => {
                    let first = !state.acknowledged;
                    state.acknowledged = true;
                    let outcome = match exchange.origin() {
                        Origin::Remote => exchange.finish(&mut state, ExchangeOutcome::Acknowledged),
                        // A separate response is still to come.
                        Origin::Local => None,
                    };
                    (first, outcome)
                }
            }
        };

        if acknowledged {
            exchange.notify_acknowledged();
        }
        if let Some(outcome) = outcome {
            exchange.notify_complete(&outcome);
        }
    }

    /// Complete `exchange` as swept if it is still open.
    pub(crate) fn sweep(&self, exchange: &Arc<Exchange>) {
        let outcome = {
            let mut state = exchange.lock();
            self.disarm(exchange, &mut state);
            exchange.finish(&mut state, ExchangeOutcome::Swept)
        };
        if let Some(outcome) = outcome {
            exchange.notify_complete(&outcome);
        }
    }
}

impl MessageLayer for ReliabilityLayer {
    fn send_request(&self, exchange: &Arc<Exchange>, request: Request) {
        let mut state = exchange.lock();
        if state.outcome.is_some() {
            tracing::trace!(exchange = %exchange.id(), "exchange complete, request not sent");
            return;
        }

        self.outbox.send_request(exchange, &request);
        let confirmable = request.mtype().is_confirmable();
        state.request = Some(request);
        if confirmable {
            self.prepare_retransmission(exchange, &mut state);
        }
    }

    fn send_response(&self, exchange: &Arc<Exchange>, response: Response) {
        let mut state = exchange.lock();
        if state.outcome.is_some() {
            tracing::trace!(exchange = %exchange.id(), "exchange complete, response not sent");
            return;
        }

        self.outbox.send_response(exchange, &response);
        let confirmable = response.mtype().is_confirmable();
        state.response = Some(response);
        if confirmable {
            self.prepare_retransmission(exchange, &mut state);
        }
    }

    fn receive_response(&self, exchange: &Arc<Exchange>, response: Response) {
        self.settle_response(exchange, response, |_| {});
    }

    fn receive_empty_message(&self, exchange: &Arc<Exchange>, message: EmptyMessage) {
        self.settle_empty_message(exchange, message, |_| {});
    }

    fn cancel(&self, exchange: &Arc<Exchange>) {
        let outcome = {
            let mut state = exchange.lock();
            self.disarm(exchange, &mut state);
            exchange.finish(&mut state, ExchangeOutcome::Cancelled)
        };
        if let Some(outcome) = outcome {
            exchange.notify_complete(&outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ExchangeObserver;
    use crate::message::{Method, OutboundMessage, ResponseCode};
    use crate::stack::outbox::{ChannelOutbox, Transmission};
    use parking_lot::Mutex;
    use std::net::SocketAddr;
    use tokio::runtime::Handle;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn peer() -> SocketAddr {
        "10.0.0.7:5683".parse().unwrap()
    }

    fn no_dither() -> NetworkConfig {
        NetworkConfig::builder()
            .ack_random_factor(1.0)
            .build()
            .unwrap()
    }

    fn layer(config: NetworkConfig) -> (ReliabilityLayer, UnboundedReceiver<Transmission>) {
        let (outbox, rx) = ChannelOutbox::new();
        let layer = ReliabilityLayer::new(config, Scheduler::new(Handle::current()), Arc::new(outbox));
        (layer, rx)
    }

    #[derive(Default)]
    struct Recorder {
        retransmissions: Mutex<Vec<u32>>,
        outcomes: Mutex<Vec<ExchangeOutcome>>,
    }

    impl ExchangeObserver for Recorder {
        fn on_retransmission(&self, _exchange: &Exchange, attempt: u32) {
            self.retransmissions.lock().push(attempt);
        }

        fn on_complete(&self, _exchange: &Exchange, outcome: &ExchangeOutcome) {
            self.outcomes.lock().push(outcome.clone());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_binary_backoff_until_timeout() {
        let (layer, mut rx) = layer(no_dither());
        let recorder = Arc::new(Recorder::default());
        let exchange = Arc::new(Exchange::local(peer()).with_observer(recorder.clone()));
        let start = tokio::time::Instant::now();

        layer.send_request(&exchange, Request::new(Method::Get));
        assert!(rx.try_recv().is_ok());

        let mut sends = Vec::new();
        for _ in 0..3 {
            let transmission = rx.recv().await.unwrap();
            sends.push(transmission.at.duration_since(start));
        }
        assert_eq!(
            sends,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(6),
                Duration::from_secs(14)
            ]
        );

        tokio::time::sleep(Duration::from_millis(16_001)).await;
        assert_eq!(exchange.outcome(), Some(ExchangeOutcome::TimedOut));
        assert!(rx.try_recv().is_err());
        assert_eq!(*recorder.retransmissions.lock(), vec![1, 2, 3]);
        assert_eq!(*recorder.outcomes.lock(), vec![ExchangeOutcome::TimedOut]);
        assert_eq!(exchange.current_timeout(), Duration::from_secs(16));
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_stops_timer() {
        let (layer, mut rx) = layer(no_dither());
        let exchange = Arc::new(Exchange::local(peer()));

        layer.send_request(&exchange, Request::new(Method::Get));
        tokio::time::sleep(Duration::from_millis(500)).await;

        let response = Response::new(ResponseCode::CONTENT).with_type(MessageType::Ack);
        layer.receive_response(&exchange, response.clone());
        assert_eq!(
            exchange.outcome(),
            Some(ExchangeOutcome::Responded(response))
        );

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(rx.try_iter_count(), 1);
        assert_eq!(exchange.failed_transmissions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_ack_waits_for_separate_response() {
        let (layer, mut rx) = layer(no_dither());
        let recorder = Arc::new(Recorder::default());
        let exchange = Arc::new(Exchange::local(peer()).with_observer(recorder.clone()));

        layer.send_request(&exchange, Request::new(Method::Post));
        layer.receive_empty_message(&exchange, EmptyMessage::ack(1));
        assert!(exchange.is_acknowledged());
        assert!(!exchange.is_complete());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(rx.try_iter_count(), 1);
        assert!(recorder.retransmissions.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmable_response_acknowledged() {
        let (layer, mut rx) = layer(no_dither());
        let exchange = Arc::new(Exchange::remote(peer()));

        layer.send_response(&exchange, Response::new(ResponseCode::CONTENT));
        tokio::time::sleep(Duration::from_millis(2100)).await;
        // One retransmission of the stored response
        assert_eq!(rx.try_iter_count(), 2);

        layer.receive_empty_message(&exchange, EmptyMessage::ack(9));
        assert_eq!(exchange.outcome(), Some(ExchangeOutcome::Acknowledged));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_rejects() {
        let (layer, _rx) = layer(no_dither());
        let exchange = Arc::new(Exchange::local(peer()));

        layer.send_request(&exchange, Request::new(Method::Get));
        layer.receive_empty_message(&exchange, EmptyMessage::rst(3));
        assert_eq!(exchange.outcome(), Some(ExchangeOutcome::Rejected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_confirmable_sent_once() {
        let (layer, mut rx) = layer(no_dither());
        let exchange = Arc::new(Exchange::local(peer()));

        layer.send_request(
            &exchange,
            Request::new(Method::Get).with_type(MessageType::Non),
        );
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(rx.try_iter_count(), 1);
        assert!(!exchange.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_final() {
        let (layer, mut rx) = layer(no_dither());
        let recorder = Arc::new(Recorder::default());
        let exchange = Arc::new(Exchange::local(peer()).with_observer(recorder.clone()));

        layer.send_request(&exchange, Request::new(Method::Get));
        layer.cancel(&exchange);
        layer.receive_response(&exchange, Response::new(ResponseCode::CONTENT));
        layer.send_request(&exchange, Request::new(Method::Get));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(rx.try_iter_count(), 1);
        assert_eq!(*recorder.outcomes.lock(), vec![ExchangeOutcome::Cancelled]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dithered_first_timeout() {
        let config = NetworkConfig::builder()
            .ack_timeout(Duration::from_millis(1000))
            .build()
            .unwrap();
        let (layer, _rx) = layer(config);

        for _ in 0..20 {
            let exchange = Arc::new(Exchange::local(peer()));
            layer.send_request(&exchange, Request::new(Method::Get));
            let timeout = exchange.current_timeout();
            assert!(timeout >= Duration::from_millis(1000));
            assert!(timeout <= Duration::from_millis(1500));
            layer.cancel(&exchange);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_hook_runs_before_completion() {
        let (layer, _rx) = layer(no_dither());
        let exchange = Arc::new(Exchange::local(peer()));

        layer.send_request(&exchange, Request::new(Method::Get));
        tokio::time::sleep(Duration::from_millis(2001)).await;

        let mut seen = None;
        layer.settle_response(&exchange, Response::new(ResponseCode::CONTENT), |retransmissions| {
            seen = Some((retransmissions, exchange.is_complete()));
        });
        assert_eq!(seen, Some((1, false)));
        assert!(exchange.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_on_remote_exchange_is_retransmitted() {
        let (layer, mut rx) = layer(no_dither());
        let exchange = Arc::new(Exchange::remote(peer()));

        layer.send_request(&exchange, Request::new(Method::Get));
        tokio::time::sleep(Duration::from_millis(2001)).await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(first.message, OutboundMessage::Request(_)));
        assert!(matches!(second.message, OutboundMessage::Request(_)));
        assert_eq!(exchange.failed_transmissions(), 1);
        assert!(!exchange.is_complete());
    }

    trait TryIterCount {
        fn try_iter_count(&mut self) -> usize;
    }

    impl TryIterCount for UnboundedReceiver<Transmission> {
        fn try_iter_count(&mut self) -> usize {
            let mut count = 0;
            while self.try_recv().is_ok() {
                count += 1;
            }
            count
        }
    }
}
