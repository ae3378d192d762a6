//! # nitric-faas - FaaS workers for the Nitric runtime
//!
//! A worker opens one long-lived bidirectional gRPC stream to the runtime,
//! announces itself, and then answers every trigger the runtime forwards
//! (HTTP requests or topic events) with exactly one correlated response.
//!
//! ## Core Concepts
//!
//! - **Trigger**: An inbound HTTP request or topic event, plus its raw payload
//! - **Response**: The answer to a trigger, always of the same variant
//! - **Worker**: The dispatch loop owning one stream and one handler
//! - **FaasServer**: A registry running one worker per registered handler
//!
//! ## Usage
//!
//! ```rust,ignore
//! use nitric_faas::{FaasServer, Reply, Trigger};
//!
//! async fn hello(trigger: Trigger) -> anyhow::Result<Reply> {
//!     let name = trigger
//!         .context()
//!         .as_http()
//!         .and_then(|http| http.query_param("name"))
//!         .unwrap_or("world")
//!         .to_string();
//!     Ok(Reply::from(format!("Hello, {name}!")))
//! }
//!
//! FaasServer::from_env().with_handler(hello).run().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod logging;
pub mod notifier;
pub mod response;
pub mod server;
pub mod transport;
pub mod trigger;
pub mod worker;

// Re-export primary types at crate root for convenience
pub use config::WorkerConfig;
pub use error::{DecodeError, FaasError, FaasResult};
pub use notifier::AsyncNotifier;
pub use response::{HttpResponseContext, Reply, Response, ResponseContext, ResponseData, TopicResponseContext};
pub use server::FaasServer;
pub use trigger::{HttpTriggerContext, TopicTriggerContext, Trigger, TriggerContext, TriggerKind};
pub use worker::{TriggerHandler, Worker, WorkerId, WorkerState};
