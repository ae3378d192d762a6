//! Worker dispatch loop.
//!
//! A `Worker` owns one bidirectional `TriggerStream` to the runtime. The
//! reader side (this loop) decodes each inbound trigger, runs the handler and
//! pushes the correlated response onto an [`AsyncNotifier`]; the writer side
//! is the request stream tonic drains from that queue. Only the writer writes.
//!
//! On a graceful stop the reader stops first; the queue is then closed so the
//! writer flushes every queued response before the request stream ends.
//!
//! Triggers are processed one at a time: a trigger is decoded, handled,
//! encoded and enqueued before the next inbound message is read.

mod handler;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::watch;
use tonic::Status;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::{DecodeError, FaasError, FaasResult};
use crate::notifier::AsyncNotifier;
use crate::response::Response;
use crate::transport::proto::{self, server_message};
use crate::transport::{self, ClientMessage, FaasServiceClient, ServerMessage};
use crate::trigger::Trigger;

pub use handler::TriggerHandler;

/// Upper bound on flushing queued responses after a graceful stop.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Identifies a worker in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(uuid::Uuid);

impl WorkerId {
    /// Creates a new random worker ID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a worker's stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// Not started yet.
    Idle,
    /// Handshake queued, connecting to the runtime.
    Connecting,
    /// Stream open, waiting for the runtime's `init_response`.
    AwaitingInitAck,
    /// Serving triggers.
    Dispatching,
    /// No longer reading; flushing queued responses.
    Closing,
    /// Stream released.
    Closed,
}

/// Dispatches triggers from one runtime stream to one handler.
pub struct Worker {
    id: WorkerId,
    handler: Arc<dyn TriggerHandler>,
    config: WorkerConfig,
    state: watch::Sender<WorkerState>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Worker {
    /// Creates an idle worker for `handler`.
    #[must_use]
    pub fn new(handler: impl TriggerHandler, config: WorkerConfig) -> Self {
        Self::from_arc(Arc::new(handler), config)
    }

    /// Creates an idle worker sharing an existing handler.
    #[must_use]
    pub fn from_arc(handler: Arc<dyn TriggerHandler>, config: WorkerConfig) -> Self {
        let (state, _) = watch::channel(WorkerState::Idle);
        Self {
            id: WorkerId::new(),
            handler,
            config,
            state,
        }
    }

    /// This worker's ID.
    #[must_use]
    pub const fn id(&self) -> WorkerId {
        self.id
    }

    /// Connection settings.
    #[must_use]
    pub const fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    fn transition(&self, next: WorkerState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(worker = %self.id, from = ?prev, to = ?next, "worker state changed");
        }
    }

    /// Connects to the runtime and serves triggers until the runtime closes
    /// the stream or the stream fails.
    pub async fn run(&self) -> FaasResult<()> {
        self.run_with_shutdown(std::future::pending()).await
    }

    /// Like [`Worker::run`], also stopping when `shutdown` resolves.
    ///
    /// The writer is stopped and the stream released on every exit path,
    /// including a failed connect and cancellation of this future. When the
    /// loop stops without a stream error, responses already queued are
    /// flushed before the request stream ends. A trigger whose handler is
    /// running when `shutdown` resolves is still answered.
    pub async fn run_with_shutdown<F>(&self, shutdown: F) -> FaasResult<()>
    where
        F: Future<Output = ()>,
    {
        let outbound = AsyncNotifier::new();
        let mut session = Session::open(self, &outbound);

        info!(worker = %self.id, address = %self.config.service_address, "connecting to runtime");
        let channel = transport::connect(&self.config.service_address).await.map_err(|err| {
            error!(worker = %self.id, error = %err, "failed to connect to runtime");
            err
        })?;

        let mut client = FaasServiceClient::new(channel);
        let inbound = client
            .trigger_stream(outbound.stream())
            .await
            .map_err(|status| {
                error!(worker = %self.id, error = %status, "failed to open trigger stream");
                FaasError::Stream(status)
            })?
            .into_inner();

        let result = self.serve(inbound, &outbound, shutdown).await;
        session.stop_writer();
        if result.is_ok() {
            self.drain(&outbound).await;
        }
        session.close();
        result
    }

    async fn drain(&self, outbound: &AsyncNotifier<ClientMessage>) {
        let pending = outbound.len();
        if tokio::time::timeout(DRAIN_TIMEOUT, outbound.drained()).await.is_err() {
            warn!(
                worker = %self.id,
                unsent = outbound.len(),
                "request stream did not finish flushing responses"
            );
        } else if pending > 0 {
            debug!(worker = %self.id, flushed = pending, "flushed queued responses");
        }
    }

    /// Runs the dispatch loop over an already open stream.
    ///
    /// The caller is responsible for having queued the `init_request`. Returns
    /// `Ok(())` when the inbound stream ends or `shutdown` resolves, and
    /// `FaasError::Stream` when the inbound stream fails.
    pub async fn serve<S, F>(&self, inbound: S, outbound: &AsyncNotifier<ClientMessage>, shutdown: F) -> FaasResult<()>
    where
        S: Stream<Item = Result<ServerMessage, Status>>,
        F: Future<Output = ()>,
    {
        tokio::pin!(inbound);
        tokio::pin!(shutdown);

        self.transition(WorkerState::AwaitingInitAck);

        loop {
            let next = tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!(worker = %self.id, "shutdown requested");
                    return Ok(());
                }
                next = inbound.next() => next,
            };

            match next {
                None => {
                    info!(worker = %self.id, "runtime closed the trigger stream");
                    return Ok(());
                }
                Some(Err(status)) => {
                    error!(worker = %self.id, error = %status, "trigger stream failed");
                    return Err(FaasError::Stream(status));
                }
                Some(Ok(message)) => {
                    if let Some(reply) = self.handle_message(message).await {
                        outbound.push(reply);
                    }
                }
            }
        }
    }

    async fn handle_message(&self, message: ServerMessage) -> Option<ClientMessage> {
        let ServerMessage { id, content } = message;
        match content {
            Some(server_message::Content::InitResponse(_)) => {
                info!(worker = %self.id, "runtime acknowledged worker");
                self.transition(WorkerState::Dispatching);
                None
            }
            Some(server_message::Content::TriggerRequest(request)) => {
                if self.state() == WorkerState::AwaitingInitAck {
                    debug!(worker = %self.id, id = %id, "trigger received before init acknowledgement");
                }
                self.dispatch_trigger(&id, request).await
            }
            None => {
                let err = DecodeError::MissingContent { id };
                warn!(worker = %self.id, error = %err, "skipping server message");
                None
            }
        }
    }

    /// Decodes, handles and encodes one trigger.
    ///
    /// Returns `None` only when the trigger cannot be decoded; every decoded
    /// trigger gets exactly one response.
    async fn dispatch_trigger(&self, id: &str, request: proto::TriggerRequest) -> Option<ClientMessage> {
        let trigger = match Trigger::from_wire(id, request) {
            Ok(trigger) => trigger,
            Err(err) => {
                warn!(worker = %self.id, id = %id, error = %err, "skipping undecodable trigger");
                return None;
            }
        };

        let kind = trigger.kind();
        let default = Response::default_for(&trigger);
        let mut failure = default.clone();
        failure.mark_failed();

        debug!(worker = %self.id, id = %id, kind = %kind, "dispatching trigger");
        let response = match handler::invoke(self.handler.as_ref(), trigger).await {
            Ok(reply) => reply.resolve(default),
            Err(err) => {
                warn!(worker = %self.id, id = %id, kind = %kind, error = %err, "handler failed");
                failure.clone()
            }
        };

        let encoded = response.to_wire(kind).or_else(|err| {
            error!(worker = %self.id, id = %id, error = %err, "invalid handler response, answering with failure");
            failure.to_wire(kind)
        });

        match encoded {
            Ok(wire) => Some(transport::trigger_response(id, wire)),
            Err(err) => {
                error!(worker = %self.id, id = %id, error = %err, "failed to encode failure response");
                None
            }
        }
    }
}

/// Owns the writer side of one stream.
///
/// Closing (explicitly or on drop) closes the outbound queue, which ends the
/// request stream once its queued messages are written, and moves the worker
/// to `Closed` exactly once.
struct Session<'a> {
    worker: &'a Worker,
    outbound: AsyncNotifier<ClientMessage>,
    open: bool,
}

impl<'a> Session<'a> {
    fn open(worker: &'a Worker, outbound: &AsyncNotifier<ClientMessage>) -> Self {
        worker.transition(WorkerState::Connecting);
        outbound.push(transport::init_request());

        Self {
            worker,
            outbound: outbound.clone(),
            open: true,
        }
    }

    /// Lets the writer finish what is queued, then end the request stream.
    fn stop_writer(&self) {
        if self.open {
            self.worker.transition(WorkerState::Closing);
            self.outbound.close();
        }
    }

    fn close(&mut self) {
        if self.open {
            self.stop_writer();
            self.open = false;
            self.worker.transition(WorkerState::Closed);
            debug!(worker = %self.worker.id, "stream released");
        }
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.close();
    }
}
