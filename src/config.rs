//! Worker configuration.
//!
//! The only input the worker needs is the runtime's address, normally
//! injected by the runtime through the `SERVICE_ADDRESS` environment variable.

use tonic::transport::Endpoint;

use crate::error::FaasResult;
use crate::transport;

/// Environment variable carrying the runtime address.
pub const SERVICE_ADDRESS_ENV: &str = "SERVICE_ADDRESS";

/// Address used when nothing is configured.
pub const DEFAULT_SERVICE_ADDRESS: &str = "127.0.0.1:50051";

/// Worker configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Address of the runtime, `host:port` or a full `http(s)://` URI.
    pub service_address: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            service_address: DEFAULT_SERVICE_ADDRESS.to_string(),
        }
    }
}

impl WorkerConfig {
    /// Reads the configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let service_address = lookup(SERVICE_ADDRESS_ENV)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_SERVICE_ADDRESS.to_string());
        Self { service_address }
    }

    /// Overrides the runtime address.
    #[must_use]
    pub fn with_service_address(mut self, address: impl Into<String>) -> Self {
        self.service_address = address.into();
        self
    }

    /// The tonic endpoint for the configured address.
    pub fn endpoint(&self) -> FaasResult<Endpoint> {
        transport::endpoint(&self.service_address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_address() {
        assert_eq!(WorkerConfig::default().service_address, "127.0.0.1:50051");
    }

    #[test]
    fn lookup_overrides_default() {
        let cfg = WorkerConfig::from_lookup(|key| {
            (key == SERVICE_ADDRESS_ENV).then(|| " runtime:9000 ".to_string())
        });
        assert_eq!(cfg.service_address, "runtime:9000");
    }

    #[test]
    fn blank_value_falls_back_to_default() {
        let cfg = WorkerConfig::from_lookup(|_| Some("   ".to_string()));
        assert_eq!(cfg, WorkerConfig::default());
    }

    #[test]
    fn endpoint_uses_configured_address() {
        let cfg = WorkerConfig::default().with_service_address("https://runtime.internal:443");
        let ep = cfg.endpoint().unwrap();
        assert_eq!(ep.uri().scheme_str(), Some("https"));
        assert_eq!(ep.uri().host(), Some("runtime.internal"));
    }
}
