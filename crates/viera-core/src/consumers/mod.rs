// ── Consumer chain ──
//
// Each dequeued message is offered to registered consumers in
// registration order. The first consumer declaring the message's kind
// owns it: it either handles it or rejects it, and no later consumer is
// consulted. A message nobody claims is reported, never silently dropped.

mod discovery;
mod property;
mod state;

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::queue::{MessageKind, Queue, QueueMessage};

pub use discovery::DiscoveryConsumer;
pub use property::PropertyStateConsumer;
pub use state::ConnectionStateConsumer;

/// A handler for one kind of queue message.
pub trait Consumer: Send + Sync {
    /// Kind of message this consumer claims.
    fn kind(&self) -> MessageKind;

    /// Handle a claimed message. `false` means the message matched but
    /// was invalid for the current state.
    fn consume(&self, message: &QueueMessage) -> bool;
}

/// Result of one dispatch tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The queue was empty.
    Idle,
    Handled(MessageKind),
    Rejected(MessageKind),
    /// No registered consumer claims this kind.
    Unconsumed(MessageKind),
}

/// Ordered registry of consumers.
#[derive(Default)]
pub struct Consumers {
    chain: Vec<Box<dyn Consumer>>,
    unconsumed: AtomicU64,
}

impl Consumers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a consumer; earlier registrations take precedence.
    pub fn register(&mut self, consumer: impl Consumer + 'static) {
        self.chain.push(Box::new(consumer));
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Number of messages no consumer claimed so far.
    pub fn unconsumed(&self) -> u64 {
        self.unconsumed.load(Ordering::Relaxed)
    }

    /// Dequeue and process exactly one message.
    pub fn dispatch(&self, queue: &Queue) -> DispatchOutcome {
        match queue.dequeue() {
            Some(message) => self.handle(&message),
            None => DispatchOutcome::Idle,
        }
    }

    /// Offer `message` to the chain.
    pub fn handle(&self, message: &QueueMessage) -> DispatchOutcome {
        let kind = message.kind();
        let Some(consumer) = self.chain.iter().find(|c| c.kind() == kind) else {
            self.unconsumed.fetch_add(1, Ordering::Relaxed);
            warn!(
                %kind,
                device = %message.device(),
                consumers = self.chain.len(),
                "no consumer claimed message"
            );
            return DispatchOutcome::Unconsumed(kind);
        };

        if consumer.consume(message) {
            DispatchOutcome::Handled(kind)
        } else {
            debug!(%kind, device = %message.device(), "message rejected");
            DispatchOutcome::Rejected(kind)
        }
    }
}

impl std::fmt::Debug for Consumers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumers")
            .field("kinds", &self.chain.iter().map(|c| c.kind()).collect::<Vec<_>>())
            .field("unconsumed", &self.unconsumed())
            .finish()
    }
}
