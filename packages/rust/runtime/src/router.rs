//! Address → mailbox routing, shared by every worker in a process.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use afriverse_shared::{Message, WorkerAddress};

use crate::Envelope;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Process-wide directory of live mailboxes.
///
/// Cloning is cheap; all clones see the same registrations. Mailboxes are
/// unbounded, so delivery never blocks the sender and messages from one
/// sender arrive in the order they were sent.
#[derive(Clone, Default)]
pub struct Router {
    mailboxes: Arc<RwLock<HashMap<WorkerAddress, UnboundedSender<Envelope>>>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a mailbox for `address`, replacing any previous registration.
    pub(crate) fn register(&self, address: WorkerAddress) -> UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.mailboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address, tx);
        rx
    }

    /// Close the mailbox for `address`. Queued messages are still drained.
    pub(crate) fn deregister(&self, address: &WorkerAddress) {
        self.mailboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(address);
    }

    pub fn is_registered(&self, address: &WorkerAddress) -> bool {
        self.mailboxes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(address)
    }

    /// Fire-and-forget delivery. Unknown or closed addresses drop the message.
    pub fn deliver(&self, to: &WorkerAddress, envelope: Envelope) {
        let kind = envelope.message.kind();
        let tx = self
            .mailboxes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(to)
            .cloned();

        match tx {
            Some(tx) => {
                if tx.send(envelope).is_err() {
                    warn!(%to, ?kind, "mailbox closed, message dropped");
                } else {
                    debug!(%to, ?kind, "message delivered");
                }
            }
            None => warn!(%to, ?kind, "no worker at address, message dropped"),
        }
    }

    /// Send `message` from `from` to `to`; results come back to `from`.
    pub fn send(&self, from: &WorkerAddress, to: &WorkerAddress, message: impl Into<Message>) {
        let envelope = Envelope::new(from.clone(), from.clone(), message.into());
        self.deliver(to, envelope);
    }

    /// Register a receive-only mailbox for a caller outside the worker set.
    pub fn mailbox(&self, name: &str) -> Mailbox {
        let address = WorkerAddress::new(name);
        let rx = self.register(address.clone());
        Mailbox {
            address,
            router: self.clone(),
            rx,
        }
    }
}

// ---------------------------------------------------------------------------
// Mailbox
// ---------------------------------------------------------------------------

/// Mailbox of an external requester (CLI, tests). Deregisters on drop.
pub struct Mailbox {
    address: WorkerAddress,
    router: Router,
    rx: UnboundedReceiver<Envelope>,
}

impl Mailbox {
    pub fn address(&self) -> &WorkerAddress {
        &self.address
    }

    /// Send a job; every result produced for it comes back here.
    pub fn send(&self, to: &WorkerAddress, message: impl Into<Message>) {
        self.router.send(&self.address, to, message);
    }

    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Like [`Mailbox::recv`], giving up after `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Envelope> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .ok()
            .flatten()
    }
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        self.router.deregister(&self.address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afriverse_shared::{QueryRequest, QueryResponse};

    #[tokio::test]
    async fn mailbox_receives_in_send_order() {
        let router = Router::new();
        let mut inbox = router.mailbox("requester");
        let sender = WorkerAddress::new("sender");

        for i in 0..5 {
            router.send(&sender, inbox.address(), QueryRequest::new(format!("q{i}")));
        }

        for i in 0..5 {
            let envelope = inbox.recv().await.expect("message");
            assert_eq!(envelope.sender, sender);
            match envelope.message {
                Message::QueryRequest(q) => assert_eq!(q.query, format!("q{i}")),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn unknown_address_is_dropped_silently() {
        let router = Router::new();
        let nowhere = WorkerAddress::new("nowhere");
        router.send(&nowhere, &nowhere, QueryResponse::failed("x"));
        assert!(!router.is_registered(&nowhere));
    }

    #[tokio::test]
    async fn dropping_a_mailbox_deregisters_it() {
        let router = Router::new();
        let inbox = router.mailbox("temp");
        let address = inbox.address().clone();
        assert!(router.is_registered(&address));
        drop(inbox);
        assert!(!router.is_registered(&address));
    }
}
