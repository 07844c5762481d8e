//! Worker runtime for the AfriVerse pipeline.
//!
//! Every pipeline stage runs as a worker: one address, one ordered mailbox,
//! typed message handlers, and independent interval timers. Workers never
//! call each other directly; they exchange [`Message`]s through a shared
//! [`Router`].
//!
//! - Handlers for one worker run one at a time, in arrival order.
//! - Timers run on their own tasks and never wait on the mailbox.
//! - A handler that returns `Err` or panics is answered with the failure
//!   result of the job it was handling; the worker keeps running.

mod router;
mod worker;

use chrono::{DateTime, Utc};

use afriverse_shared::{Message, WorkerAddress};

pub use router::{Mailbox, Router};
pub use worker::{Context, WorkerBuilder, WorkerHandle};

/// A message in flight, with its routing header.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Who put the message on the wire.
    pub sender: WorkerAddress,
    /// Who should receive results produced while handling it.
    pub reply_to: WorkerAddress,
    pub message: Message,
    pub sent_at: DateTime<Utc>,
}

impl Envelope {
    pub fn new(sender: WorkerAddress, reply_to: WorkerAddress, message: Message) -> Self {
        Self {
            sender,
            reply_to,
            message,
            sent_at: Utc::now(),
        }
    }
}
