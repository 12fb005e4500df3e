//! Asynchronous utilities for use with Tokio.
//!
//! Everything that touches the network or the filesystem is async. The text
//! cleaning itself is plain synchronous code, and CPU-heavy image work is
//! pushed onto Tokio's blocking pool with
//! [`spawn_blocking_propagating_panics`].

use std::pin::Pin;

use futures::Stream;

pub mod io;

/// A type alias for a boxed stream. This is used to make it easier to work
/// streams that return complex types.
pub type BoxedStream<Item> = Pin<Box<dyn Stream<Item = Item> + Send>>;

/// Wrapper around [`tokio::task::spawn_blocking`] that propagates panics from
/// the background task.
pub async fn spawn_blocking_propagating_panics<F, T>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => value,
        Err(err) => std::panic::resume_unwind(err.into_panic()),
    }
}
