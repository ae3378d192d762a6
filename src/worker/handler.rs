//! User handler contract.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use crate::error::FaasError;
use crate::response::Reply;
use crate::trigger::Trigger;

/// A function invoked once per trigger.
///
/// Any `async fn(Trigger) -> anyhow::Result<R>` with `R: Into<Reply>` is a
/// handler through the blanket impl below.
#[tonic::async_trait]
pub trait TriggerHandler: Send + Sync + 'static {
    /// Handles one trigger. An `Err` is answered with a failure response.
    async fn handle(&self, trigger: Trigger) -> anyhow::Result<Reply>;
}

#[tonic::async_trait]
impl<F, Fut, R> TriggerHandler for F
where
    F: Fn(Trigger) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    R: Into<Reply> + Send + 'static,
{
    async fn handle(&self, trigger: Trigger) -> anyhow::Result<Reply> {
        (self)(trigger).await.map(Into::into)
    }
}

/// Runs the handler, turning both errors and panics into `FaasError::Handler`.
pub(crate) async fn invoke(handler: &dyn TriggerHandler, trigger: Trigger) -> Result<Reply, FaasError> {
    match AssertUnwindSafe(handler.handle(trigger)).catch_unwind().await {
        Ok(Ok(reply)) => Ok(reply),
        Ok(Err(err)) => Err(FaasError::handler(format!("{err:#}"))),
        Err(payload) => Err(FaasError::handler(format!(
            "handler panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
