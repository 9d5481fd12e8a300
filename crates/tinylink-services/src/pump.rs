//! Pump - an optional hook that advances the socket layer by one step.
//!
//! Stacks that are not driven by their own tasks (a polled embedded
//! stack, a scripted test transport) register a pump. Suspended reads
//! and writes then call it on every retry instead of parking, and the
//! pump is what delivers the events they are waiting for.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::futures::Notified;

/// One step of socket-layer event processing.
pub type Pump = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as a [`Pump`].
pub fn pump_fn<F, Fut>(f: F) -> Pump
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// Wait for progress: run the pump if there is one, else park on `notified`.
pub(crate) async fn suspend(pump: Option<&Pump>, notified: Pin<&mut Notified<'_>>) {
    match pump {
        Some(pump) => {
            pump().await;
            // A pump with nothing to do must not starve other tasks.
            tokio::task::yield_now().await;
        }
        None => notified.await,
    }
}
