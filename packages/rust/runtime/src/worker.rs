//! Worker construction, dispatch loop, and timers.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use afriverse_shared::{
    AfriverseError, Contract, FaultReply, Message, MessageKind, Result, WorkerAddress,
};

use crate::{Envelope, Router};

type BoxFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type Handler = Box<dyn Fn(Context, Message) -> BoxFuture + Send + Sync>;
type TimerFn = Arc<dyn Fn(Context) -> BoxFuture + Send + Sync>;

struct Timer {
    period: Duration,
    tick: TimerFn,
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Handle given to every handler and timer invocation.
#[derive(Clone)]
pub struct Context {
    address: WorkerAddress,
    sender: WorkerAddress,
    reply_to: WorkerAddress,
    router: Router,
}

impl Context {
    /// This worker's own address.
    pub fn address(&self) -> &WorkerAddress {
        &self.address
    }

    /// Address that delivered the message being handled.
    pub fn sender(&self) -> &WorkerAddress {
        &self.sender
    }

    /// Original requester of the job being handled.
    pub fn reply_to(&self) -> &WorkerAddress {
        &self.reply_to
    }

    /// Send a new job owned by this worker. Results come back here.
    pub fn send(&self, to: &WorkerAddress, message: impl Into<Message>) {
        self.router.send(&self.address, to, message);
    }

    /// Answer the original requester.
    pub fn reply(&self, message: impl Into<Message>) {
        let envelope = Envelope::new(
            self.address.clone(),
            self.address.clone(),
            message.into(),
        );
        self.router.deliver(&self.reply_to, envelope);
    }

    /// Hand follow-up work to another worker on behalf of the original requester.
    pub fn forward(&self, to: &WorkerAddress, message: impl Into<Message>) {
        let envelope = Envelope::new(self.address.clone(), self.reply_to.clone(), message.into());
        self.router.deliver(to, envelope);
    }
}

// ---------------------------------------------------------------------------
// WorkerBuilder
// ---------------------------------------------------------------------------

/// Collects message handlers and interval timers, then spawns the worker.
///
/// `on_message` and `on_interval` are independent registrations: a worker
/// can have any number of each.
pub struct WorkerBuilder {
    address: WorkerAddress,
    handlers: HashMap<MessageKind, Handler>,
    timers: Vec<Timer>,
}

impl WorkerBuilder {
    /// Start a worker with a freshly minted address.
    pub fn new(name: &str) -> Self {
        Self::with_address(WorkerAddress::new(name))
    }

    /// Start a worker at an address minted earlier (so routes can be wired first).
    pub fn with_address(address: WorkerAddress) -> Self {
        Self {
            address,
            handlers: HashMap::new(),
            timers: Vec::new(),
        }
    }

    pub fn address(&self) -> &WorkerAddress {
        &self.address
    }

    /// Handle every incoming `T`. Registering `T` twice keeps the last handler.
    pub fn on_message<T, F, Fut>(mut self, handler: F) -> Self
    where
        T: Contract,
        F: Fn(Context, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let boxed: Handler = Box::new(move |ctx: Context, message: Message| -> BoxFuture {
            match T::try_from(message) {
                Ok(payload) => Box::pin(handler(ctx, payload)),
                Err(other) => {
                    let kind = other.kind();
                    Box::pin(async move {
                        Err(AfriverseError::validation(format!(
                            "handler for {:?} received {kind:?}",
                            T::KIND
                        )))
                    })
                }
            }
        });
        self.handlers.insert(T::KIND, boxed);
        self
    }

    /// Run `tick` every `period`, independent of mailbox traffic.
    pub fn on_interval<F, Fut>(mut self, period: Duration, tick: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.timers.push(Timer {
            period,
            tick: Arc::new(move |ctx: Context| -> BoxFuture { Box::pin(tick(ctx)) }),
        });
        self
    }

    /// Register the mailbox with `router` and start the dispatch loop and timers.
    pub fn spawn(self, router: &Router) -> WorkerHandle {
        let Self {
            address,
            handlers,
            timers,
        } = self;

        let rx = router.register(address.clone());
        info!(
            %address,
            handlers = handlers.len(),
            timers = timers.len(),
            "worker started"
        );

        let timer_tasks = timers
            .into_iter()
            .map(|timer| tokio::spawn(run_timer(address.clone(), router.clone(), timer)))
            .collect();

        let mailbox_task = tokio::spawn(run_mailbox(address.clone(), router.clone(), handlers, rx));

        WorkerHandle {
            address,
            router: router.clone(),
            mailbox_task,
            timer_tasks,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkerHandle
// ---------------------------------------------------------------------------

/// A running worker.
pub struct WorkerHandle {
    address: WorkerAddress,
    router: Router,
    mailbox_task: JoinHandle<()>,
    timer_tasks: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn address(&self) -> &WorkerAddress {
        &self.address
    }

    /// Stop the timers, close the mailbox, and wait for queued messages to drain.
    pub async fn shutdown(self) {
        for task in &self.timer_tasks {
            task.abort();
        }
        self.router.deregister(&self.address);
        if let Err(e) = self.mailbox_task.await {
            warn!(address = %self.address, error = %e, "mailbox loop ended abnormally");
        }
        info!(address = %self.address, "worker stopped");
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

async fn run_mailbox(
    address: WorkerAddress,
    router: Router,
    handlers: HashMap<MessageKind, Handler>,
    mut rx: UnboundedReceiver<Envelope>,
) {
    while let Some(envelope) = rx.recv().await {
        let kind = envelope.message.kind();
        let Some(handler) = handlers.get(&kind) else {
            warn!(%address, ?kind, sender = %envelope.sender, "no handler registered, message dropped");
            continue;
        };

        let queued_ms = (Utc::now() - envelope.sent_at).num_milliseconds();
        debug!(%address, ?kind, queued_ms, "dispatching message");

        let fault = FaultReply::for_message(&envelope.message);
        let reply_to = envelope.reply_to.clone();
        let ctx = Context {
            address: address.clone(),
            sender: envelope.sender,
            reply_to: envelope.reply_to,
            router: router.clone(),
        };

        // Spawning isolates panics; awaiting keeps handlers serialized.
        let outcome = match tokio::spawn(handler(ctx, envelope.message)).await {
            Ok(result) => result,
            Err(join_error) => Err(AfriverseError::Handler(describe_join_error(join_error))),
        };

        if let Err(e) = outcome {
            error!(%address, ?kind, error = %e, "handler failed");
            if let Some(reply) = fault.reply(&address, &e.to_string()) {
                router.deliver(
                    &reply_to,
                    Envelope::new(address.clone(), address.clone(), reply),
                );
            }
        }
    }
    debug!(%address, "mailbox closed");
}

async fn run_timer(address: WorkerAddress, router: Router, timer: Timer) {
    let mut ticker = interval(timer.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let ctx = Context {
            address: address.clone(),
            sender: address.clone(),
            reply_to: address.clone(),
            router: router.clone(),
        };

        let outcome = match tokio::spawn((timer.tick)(ctx)).await {
            Ok(result) => result,
            Err(join_error) => Err(AfriverseError::Handler(describe_join_error(join_error))),
        };

        if let Err(e) = outcome {
            warn!(%address, error = %e, "timer task failed");
        }
    }
}

fn describe_join_error(err: JoinError) -> String {
    if err.is_panic() {
        format!("panicked: {}", panic_message(err.into_panic()))
    } else {
        "cancelled".into()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(s) => *s,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(s) => (*s).to_string(),
            Err(_) => "unknown panic payload".into(),
        },
    }
}
