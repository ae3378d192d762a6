//! gRPC transport layer for the FaaS worker.
//!
//! The runtime exposes a single bidirectional `TriggerStream` RPC. This module
//! owns the generated bindings, the envelope constructors and the connect
//! path, including the classification of "could not reach runtime" failures.

use std::error::Error as StdError;
use std::io;

use tonic::transport::{Channel, Endpoint};

use crate::error::{FaasError, FaasResult};

pub mod proto {
    #![allow(missing_docs, clippy::pedantic)]
    tonic::include_proto!("nitric.faas.v1");
}

pub use proto::faas_service_client::FaasServiceClient;
pub use proto::faas_service_server::{FaasService, FaasServiceServer};
pub use proto::{ClientMessage, ServerMessage};

use proto::{client_message, server_message};

/// The handshake message a worker sends before anything else.
#[must_use]
pub fn init_request() -> ClientMessage {
    ClientMessage {
        id: String::new(),
        content: Some(client_message::Content::InitRequest(proto::InitRequest {})),
    }
}

/// Stamps a trigger response with the correlation id of its request.
#[must_use]
pub fn trigger_response(id: impl Into<String>, response: proto::TriggerResponse) -> ClientMessage {
    ClientMessage {
        id: id.into(),
        content: Some(client_message::Content::TriggerResponse(response)),
    }
}

/// The runtime's handshake acknowledgement.
#[must_use]
pub fn init_response() -> ServerMessage {
    ServerMessage {
        id: String::new(),
        content: Some(server_message::Content::InitResponse(proto::InitResponse {})),
    }
}

/// Wraps a trigger request in a server envelope.
#[must_use]
pub fn trigger_request(id: impl Into<String>, request: proto::TriggerRequest) -> ServerMessage {
    ServerMessage {
        id: id.into(),
        content: Some(server_message::Content::TriggerRequest(request)),
    }
}

/// Builds the tonic endpoint for a runtime address.
///
/// Bare `host:port` addresses are treated as plaintext `http://`.
pub fn endpoint(address: &str) -> FaasResult<Endpoint> {
    if address.trim().is_empty() {
        return Err(FaasError::config("service address is empty"));
    }
    let uri = if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{address}")
    };
    Endpoint::from_shared(uri).map_err(|e| FaasError::config(format!("invalid service address '{address}': {e}")))
}

/// Opens a channel to the runtime.
///
/// A refused connection is reported as `FaasError::ConnectionRefused`, every
/// other failure as `FaasError::Transport`.
pub async fn connect(address: &str) -> FaasResult<Channel> {
    let endpoint = endpoint(address)?;
    endpoint.connect().await.map_err(|err| {
        if is_connection_refused(&err) {
            FaasError::ConnectionRefused {
                address: address.to_string(),
            }
        } else {
            FaasError::Transport(err)
        }
    })
}

/// Walks the source chain looking for an `io::ErrorKind::ConnectionRefused`.
pub(crate) fn is_connection_refused(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        current = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Wrapper(io::Error);

    impl std::fmt::Display for Wrapper {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "wrapped")
        }
    }

    impl StdError for Wrapper {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn init_request_has_empty_id() {
        let msg = init_request();
        assert!(msg.id.is_empty());
        assert!(matches!(msg.content, Some(client_message::Content::InitRequest(_))));
    }

    #[test]
    fn trigger_response_carries_id() {
        let msg = trigger_response("abc", proto::TriggerResponse::default());
        assert_eq!(msg.id, "abc");
        assert!(matches!(msg.content, Some(client_message::Content::TriggerResponse(_))));
    }

    #[test]
    fn endpoint_accepts_bare_host_port() {
        let ep = endpoint("127.0.0.1:50051").unwrap();
        assert_eq!(ep.uri().scheme_str(), Some("http"));
        assert_eq!(ep.uri().host(), Some("127.0.0.1"));
        assert_eq!(ep.uri().port_u16(), Some(50051));
    }

    #[test]
    fn endpoint_rejects_empty_address() {
        let err = endpoint("  ").unwrap_err();
        assert!(matches!(err, FaasError::Config { .. }));
    }

    #[test]
    fn refused_detected_through_source_chain() {
        let nested = Wrapper(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert!(is_connection_refused(&nested));

        let other = Wrapper(io::Error::from(io::ErrorKind::TimedOut));
        assert!(!is_connection_refused(&other));
    }

    #[tokio::test]
    async fn connect_to_closed_port_is_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = connect(&addr.to_string()).await.unwrap_err();
        assert!(err.is_connection_refused(), "unexpected error: {err}");
    }
}
