//! Seams between the reliability core and its collaborators.
//!
//! - [`Outbox`] is the downstream transport: fire-and-forget sends.
//! - [`ExchangeObserver`] is how the application learns what happened to an
//!   exchange it started.
//! - [`MessageLayer`] is the upstream API, implemented by both the plain
//!   reliability layer and the congestion control layer.

use std::sync::Arc;

use crate::message::{EmptyMessage, Request, Response};
use crate::stack::{Exchange, ExchangeOutcome};

/// Downstream transport primitive.
///
/// Implementations must not call back into the layer synchronously: the
/// reliability layer holds the exchange lock while resending so that a
/// reply racing with a timer cannot cause a resend after completion.
pub trait Outbox: Send + Sync + 'static {
    /// Put a request on the wire.
    fn send_request(&self, exchange: &Exchange, request: &Request);

    /// Put a response on the wire.
    fn send_response(&self, exchange: &Exchange, response: &Response);
}

/// Application-side callbacks for one exchange.
pub trait ExchangeObserver: Send + Sync {
    /// A confirmable message was sent again. `attempt` starts at 1.
    fn on_retransmission(&self, exchange: &Exchange, attempt: u32) {
        let _ = (exchange, attempt);
    }

    /// The peer acknowledged our confirmable message.
    fn on_acknowledged(&self, exchange: &Exchange) {
        let _ = exchange;
    }

    /// The exchange reached its terminal outcome. Called exactly once.
    fn on_complete(&self, exchange: &Exchange, outcome: &ExchangeOutcome);
}

/// Send and receive entry points of a message layer.
pub trait MessageLayer: Send + Sync {
    /// Originate or continue a request.
    fn send_request(&self, exchange: &Arc<Exchange>, request: Request);

    /// Answer a request.
    fn send_response(&self, exchange: &Arc<Exchange>, response: Response);

    /// A response matched to `exchange` arrived.
    fn receive_response(&self, exchange: &Arc<Exchange>, response: Response);

    /// An empty ACK or RST matched to `exchange` arrived.
    fn receive_empty_message(&self, exchange: &Arc<Exchange>, message: EmptyMessage);

    /// The application gave up on `exchange`.
    fn cancel(&self, exchange: &Arc<Exchange>);
}
