use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Notify};
use tokio_stream::wrappers::{TcpListenerStream, UnboundedReceiverStream};
use tokio_stream::StreamExt;
use tonic::transport::Server;
use tonic::{Request, Status, Streaming};

use nitric_faas::transport::proto::{client_message, trigger_request, trigger_response};
use nitric_faas::transport::{self, proto, ClientMessage, FaasService, FaasServiceServer, ServerMessage};
use nitric_faas::{FaasServer, Reply, Trigger, Worker, WorkerConfig, WorkerState};

type ToWorker = mpsc::UnboundedSender<Result<ServerMessage, Status>>;

/// Runtime stand-in: forwards everything the worker sends to the test and
/// streams whatever the test queues back to the worker.
struct MockRuntime {
    from_worker: mpsc::UnboundedSender<ClientMessage>,
    to_worker: Mutex<Option<mpsc::UnboundedReceiver<Result<ServerMessage, Status>>>>,
}

#[tonic::async_trait]
impl FaasService for MockRuntime {
    type TriggerStreamStream = UnboundedReceiverStream<Result<ServerMessage, Status>>;

    async fn trigger_stream(
        &self,
        request: Request<Streaming<ClientMessage>>,
    ) -> Result<tonic::Response<Self::TriggerStreamStream>, Status> {
        let mut inbound = request.into_inner();
        let forward = self.from_worker.clone();
        tokio::spawn(async move {
            while let Some(Ok(msg)) = inbound.next().await {
                if forward.send(msg).is_err() {
                    break;
                }
            }
        });

        let rx = self
            .to_worker
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Status::already_exists("stream already opened"))?;
        Ok(tonic::Response::new(UnboundedReceiverStream::new(rx)))
    }
}

struct Runtime {
    addr: SocketAddr,
    to_worker: ToWorker,
    from_worker: mpsc::UnboundedReceiver<ClientMessage>,
}

impl Runtime {
    async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (to_worker, to_worker_rx) = mpsc::unbounded_channel();
        let (from_worker_tx, from_worker) = mpsc::unbounded_channel();
        let mock = MockRuntime {
            from_worker: from_worker_tx,
            to_worker: Mutex::new(Some(to_worker_rx)),
        };

        tokio::spawn(
            Server::builder()
                .add_service(FaasServiceServer::new(mock))
                .serve_with_incoming(TcpListenerStream::new(listener)),
        );

        Self {
            addr,
            to_worker,
            from_worker,
        }
    }

    fn config(&self) -> WorkerConfig {
        WorkerConfig::default().with_service_address(self.addr.to_string())
    }

    fn send(&self, msg: ServerMessage) {
        self.to_worker.send(Ok(msg)).unwrap();
    }

    async fn recv(&mut self) -> ClientMessage {
        tokio::time::timeout(Duration::from_secs(5), self.from_worker.recv())
            .await
            .expect("worker message within timeout")
            .expect("worker stream open")
    }

    /// Expects the handshake and acknowledges it.
    async fn accept_worker(&mut self) {
        let init = self.recv().await;
        assert!(init.id.is_empty());
        assert!(matches!(init.content, Some(client_message::Content::InitRequest(_))));
        self.send(transport::init_response());
    }
}

fn http(method: &str, path: &str, data: &[u8]) -> proto::TriggerRequest {
    proto::TriggerRequest {
        data: data.to_vec(),
        context: Some(trigger_request::Context::Http(proto::HttpTriggerContext {
            method: method.to_string(),
            path: path.to_string(),
            ..Default::default()
        })),
    }
}

fn topic(name: &str, data: &[u8]) -> proto::TriggerRequest {
    proto::TriggerRequest {
        data: data.to_vec(),
        context: Some(trigger_request::Context::Topic(proto::TopicTriggerContext {
            topic: name.to_string(),
        })),
    }
}

fn trigger_response_of(msg: ClientMessage) -> proto::TriggerResponse {
    match msg.content {
        Some(client_message::Content::TriggerResponse(resp)) => resp,
        other => panic!("expected trigger response, got {other:?}"),
    }
}

async fn ok_unless_topic(trigger: Trigger) -> anyhow::Result<Reply> {
    if trigger.context().as_topic().is_some() {
        anyhow::bail!("boom");
    }
    Ok(Reply::from("ok"))
}

async fn wait_for_state(worker: &Worker, state: WorkerState) {
    let mut states = worker.subscribe_state();
    tokio::time::timeout(Duration::from_secs(5), states.wait_for(|s| *s == state))
        .await
        .expect("state reached within timeout")
        .expect("worker alive");
}

#[tokio::test]
async fn handshake_then_http_round_trip() {
    let mut runtime = Runtime::start().await;
    let worker = Arc::new(Worker::new(ok_unless_topic, runtime.config()));
    let task = {
        let worker = Arc::clone(&worker);
        tokio::spawn(async move { worker.run().await })
    };

    runtime.accept_worker().await;
    wait_for_state(&worker, WorkerState::Dispatching).await;

    runtime.send(transport::trigger_request("1", http("GET", "/", b"")));
    let msg = runtime.recv().await;
    assert_eq!(msg.id, "1");
    let resp = trigger_response_of(msg);
    assert_eq!(resp.data, b"ok");
    assert_eq!(
        resp.context,
        Some(trigger_response::Context::Http(proto::HttpResponseContext {
            status: 200,
            headers: Default::default(),
        }))
    );

    drop(runtime.to_worker);
    let result = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert_eq!(worker.state(), WorkerState::Closed);
}

#[tokio::test]
async fn topic_failure_does_not_restart_stream() {
    let mut runtime = Runtime::start().await;
    let worker = Worker::new(ok_unless_topic, runtime.config());
    let task = tokio::spawn(async move { worker.run().await });

    runtime.accept_worker().await;

    runtime.send(transport::trigger_request("7", topic("orders", b"{}")));
    let msg = runtime.recv().await;
    assert_eq!(msg.id, "7");
    let resp = trigger_response_of(msg);
    assert!(resp.data.is_empty());
    assert_eq!(
        resp.context,
        Some(trigger_response::Context::Topic(proto::TopicResponseContext { success: false }))
    );

    runtime.send(transport::trigger_request("8", http("GET", "/", b"")));
    let msg = runtime.recv().await;
    assert_eq!(msg.id, "8");
    assert_eq!(trigger_response_of(msg).data, b"ok");

    assert!(!task.is_finished());
    task.abort();
}

#[tokio::test]
async fn dict_reply_is_encoded_as_json() {
    let mut runtime = Runtime::start().await;
    let worker = Worker::new(
        |_trigger: Trigger| async move { Ok::<_, anyhow::Error>(serde_json::json!({"key": "value", "num": 123})) },
        runtime.config(),
    );
    let task = tokio::spawn(async move { worker.run().await });

    runtime.accept_worker().await;
    runtime.send(transport::trigger_request("json", http("GET", "/", b"")));

    let resp = trigger_response_of(runtime.recv().await);
    assert_eq!(resp.data, br#"{"key": "value", "num": 123}"#);
    let Some(trigger_response::Context::Http(ctx)) = resp.context else {
        panic!("expected http context");
    };
    assert_eq!(ctx.headers.get("Content-Type").map(String::as_str), Some("application/json"));

    task.abort();
}

#[tokio::test]
async fn runtime_stream_error_is_surfaced_after_cleanup() {
    let mut runtime = Runtime::start().await;
    let worker = Arc::new(Worker::new(ok_unless_topic, runtime.config()));
    let task = {
        let worker = Arc::clone(&worker);
        tokio::spawn(async move { worker.run().await })
    };

    runtime.accept_worker().await;
    runtime.to_worker.send(Err(Status::internal("membrane crashed"))).unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(err.is_stream(), "unexpected error: {err}");
    assert_eq!(worker.state(), WorkerState::Closed);
}

#[tokio::test]
async fn server_runs_workers_until_shutdown() {
    let mut runtime = Runtime::start().await;
    let server = FaasServer::new(runtime.config()).with_handler(ok_unless_topic);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(server.run_with_shutdown(async move {
        let _ = stop_rx.await;
    }));

    runtime.accept_worker().await;
    runtime.send(transport::trigger_request("a", http("POST", "/orders", b"{}")));
    assert_eq!(runtime.recv().await.id, "a");

    stop_tx.send(()).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn shutdown_during_handler_still_answers_trigger() {
    let mut runtime = Runtime::start().await;
    let started = Arc::new(Notify::new());
    let handler = {
        let started = Arc::clone(&started);
        move |_trigger: Trigger| {
            let started = Arc::clone(&started);
            async move {
                started.notify_one();
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, anyhow::Error>(Reply::from("late"))
            }
        }
    };
    let worker = Arc::new(Worker::new(handler, runtime.config()));
    let task = {
        let worker = Arc::clone(&worker);
        let started = Arc::clone(&started);
        tokio::spawn(async move { worker.run_with_shutdown(async move { started.notified().await }).await })
    };

    runtime.accept_worker().await;
    runtime.send(transport::trigger_request("p1", http("GET", "/slow", b"")));

    let msg = runtime.recv().await;
    assert_eq!(msg.id, "p1");
    assert_eq!(trigger_response_of(msg).data, b"late");

    let result = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert_eq!(worker.state(), WorkerState::Closed);
}

#[tokio::test]
async fn unreachable_runtime_is_connection_refused() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let worker = Worker::new(ok_unless_topic, WorkerConfig::default().with_service_address(addr.to_string()));
    let err = worker.run().await.unwrap_err();
    assert!(err.is_connection_refused(), "unexpected error: {err}");
    assert_eq!(worker.state(), WorkerState::Closed);
}
