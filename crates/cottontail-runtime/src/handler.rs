//! Handler types and failure containment.
//!
//! Route handlers, hooks and error handlers are stored type-erased as
//! `Arc<dyn Fn(..) -> BoxFuture<..>>`. Registration methods accept plain
//! closures returning futures and box them here.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use cottontail_core::{ConsumeError, Delivery, FailurePoint, Signature};
use futures::FutureExt;
use futures::future::BoxFuture;

use crate::consumer::Consumer;

/// A route handler.
///
/// Receives the consumer (for state and helpers) and the delivery.
pub type BoxedHandler<S> =
    Arc<dyn Fn(Consumer<S>, Arc<Delivery>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A callback invoked with every contained failure before the error policy
/// is applied.
pub type ErrorHandler<S> =
    Arc<dyn Fn(Consumer<S>, Arc<Delivery>, ConsumeError) -> BoxFuture<'static, ()> + Send + Sync>;

pub(crate) fn boxed_handler<S, F, Fut>(handler: F) -> BoxedHandler<S>
where
    F: Fn(Consumer<S>, Arc<Delivery>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |consumer: Consumer<S>, delivery: Arc<Delivery>| {
        handler(consumer, delivery).boxed()
    })
}

pub(crate) fn boxed_error_handler<S, F, Fut>(handler: F) -> ErrorHandler<S>
where
    F: Fn(Consumer<S>, Arc<Delivery>, ConsumeError) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(
        move |consumer: Consumer<S>, delivery: Arc<Delivery>, error: ConsumeError| {
            handler(consumer, delivery, error).boxed()
        },
    )
}

/// A failure raised by user code.
#[derive(Debug)]
pub(crate) enum Failure {
    Error(anyhow::Error),
    Panic(String),
}

impl Failure {
    pub(crate) fn into_consume_error(self, point: FailurePoint, signature: Signature) -> ConsumeError {
        match self {
            Self::Error(error) => ConsumeError::failed(point, signature, error),
            Self::Panic(message) => ConsumeError::panicked(point, signature, message),
        }
    }

    pub(crate) fn into_anyhow(self) -> anyhow::Error {
        match self {
            Self::Error(error) => error,
            Self::Panic(message) => anyhow::anyhow!("panicked: {message}"),
        }
    }
}

/// Awaits user code, turning both returned errors and panics into a
/// [`Failure`].
pub(crate) async fn contain<F>(future: F) -> Result<(), Failure>
where
    F: Future<Output = anyhow::Result<()>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(Failure::Error(error)),
        Err(payload) => Err(Failure::Panic(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_contain_passes_success_through() {
        assert!(contain(async { Ok(()) }).await.is_ok());
    }

    #[tokio::test]
    async fn test_contain_keeps_returned_error() {
        let failure = contain(async { Err(anyhow::anyhow!("boom")) })
            .await
            .unwrap_err();
        let error = failure.into_consume_error(FailurePoint::Handler, Signature::new("x", "y", "z"));

        assert_eq!(error.point(), FailurePoint::Handler);
        assert_eq!(error.user_error().map(|e| e.to_string()).as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_contain_catches_panics() {
        let failure = contain(async {
            if true {
                panic!("handler exploded");
            }
            Ok(())
        })
        .await
        .unwrap_err();

        match failure {
            Failure::Panic(message) => assert_eq!(message, "handler exploded"),
            Failure::Error(e) => panic!("expected panic, got {e}"),
        }
    }

    #[tokio::test]
    async fn test_formatted_panic_message_is_kept() {
        let code = 7;
        let failure = contain(async move {
            if code > 0 {
                panic!("exit code {code}");
            }
            Ok(())
        })
        .await
        .unwrap_err();

        assert_eq!(failure.into_anyhow().to_string(), "panicked: exit code 7");
    }
}
