//! Channel-backed [`Outbox`].

use std::net::SocketAddr;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

use super::exchange::{Exchange, ExchangeId};
use crate::core::Outbox;
use crate::message::{OutboundMessage, Request, Response};

/// One message handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Transmission {
    /// Exchange the message belongs to.
    pub exchange: ExchangeId,
    /// Destination.
    pub peer: SocketAddr,
    /// The message.
    pub message: OutboundMessage,
    /// When it was handed over.
    pub at: Instant,
}

/// Outbox that forwards every send to an unbounded channel.
///
/// The receiving end is typically a socket task; tests read it directly.
#[derive(Debug, Clone)]
pub struct ChannelOutbox {
    tx: UnboundedSender<Transmission>,
}

impl ChannelOutbox {
    /// Outbox and the receiver of its transmissions.
    pub fn new() -> (Self, UnboundedReceiver<Transmission>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn push(&self, exchange: &Exchange, message: OutboundMessage) {
        let transmission = Transmission {
            exchange: exchange.id(),
            peer: exchange.peer(),
            message,
            at: Instant::now(),
        };
        if self.tx.send(transmission).is_err() {
            tracing::warn!(exchange = %exchange.id(), peer = %exchange.peer(), "transport closed, message dropped");
        }
    }
}

impl Outbox for ChannelOutbox {
    fn send_request(&self, exchange: &Exchange, request: &Request) {
        self.push(exchange, OutboundMessage::Request(request.clone()));
    }

    fn send_response(&self, exchange: &Exchange, response: &Response) {
        self.push(exchange, OutboundMessage::Response(response.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Method, ResponseCode};

    #[tokio::test]
    async fn test_forwards_in_order() {
        let (outbox, mut rx) = ChannelOutbox::new();
        let exchange = Exchange::local("10.0.0.2:5683".parse().unwrap());

        outbox.send_request(&exchange, &Request::new(Method::Get));
        outbox.send_response(&exchange, &Response::new(ResponseCode::CONTENT));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.exchange, exchange.id());
        assert!(matches!(first.message, OutboundMessage::Request(_)));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second.message, OutboundMessage::Response(_)));
    }

    #[tokio::test]
    async fn test_closed_receiver_is_not_fatal() {
        let (outbox, rx) = ChannelOutbox::new();
        drop(rx);
        let exchange = Exchange::local("10.0.0.2:5683".parse().unwrap());
        outbox.send_request(&exchange, &Request::new(Method::Get));
    }
}
