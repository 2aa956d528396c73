//! Output streams of an engaged gearbox.
//!
//! Every [`Sink`] keeps the engaged gearbox alive. Dropping the last sink tears
//! the gearbox down: the driver task is aborted, which in turn aborts the
//! current gear's pump and releases everything it subscribed to.
//!
//! A sink listens from its first poll until it ends or is dropped. A sink that
//! was never polled leaves its outputs unread, and nothing is kept for it.

use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{FusedStream, Stream, StreamExt};
use tokio::task::AbortHandle;
use tracing::debug;

use crate::error::{GearError, GearboxError, GearboxResult};
use crate::replay::{Interest, Lane};

/// Aborts the driver task when the last sink is dropped.
pub(crate) struct Teardown {
    driver: AbortHandle,
}

impl Teardown {
    pub(crate) fn new(driver: AbortHandle) -> Self {
        Self { driver }
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        if !self.driver.is_finished() {
            debug!("all sinks dropped; tearing down gearbox");
        }
        self.driver.abort();
    }
}

/// One long-lived output stream.
///
/// Yields the values of whichever gear is current. An `Err` item is terminal:
/// the sink ends right after it.
pub struct Sink<T> {
    name: String,
    /// `None` once terminated.
    lane: Option<Lane<T>>,
    interest: Arc<Interest>,
    polled: bool,
    _teardown: Arc<Teardown>,
}

impl<T> Sink<T> {
    pub(crate) fn new(name: String, lane: Lane<T>, interest: Arc<Interest>, teardown: Arc<Teardown>) -> Self {
        Self {
            name,
            lane: Some(lane),
            interest,
            polled: false,
            _teardown: teardown,
        }
    }

    fn terminate(&mut self) {
        self.lane = None;
        self.interest.clear();
    }

    /// The external sink name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Stream for Sink<T> {
    type Item = Result<T, GearError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if !self.polled {
            self.polled = true;
            self.interest.mark();
        }
        let Some(lane) = self.lane.as_mut() else {
            return Poll::Ready(None);
        };
        match lane.poll_next_unpin(cx) {
            Poll::Ready(Some(Err(err))) => {
                self.terminate();
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                self.terminate();
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl<T> FusedStream for Sink<T> {
    fn is_terminated(&self) -> bool {
        self.lane.is_none()
    }
}

impl<T> Drop for Sink<T> {
    fn drop(&mut self) {
        self.interest.clear();
    }
}

impl<T> fmt::Debug for Sink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sink")
            .field("name", &self.name)
            .field("listening", &(self.polled && self.lane.is_some()))
            .field("terminated", &self.lane.is_none())
            .finish_non_exhaustive()
    }
}

/// Sinks returned by [`Gearbox::engage`](crate::Gearbox::engage).
///
/// Keyed by external sink name. The key set is fixed when the gearbox is built.
pub struct Outputs<S, V> {
    names: Vec<String>,
    sinks: BTreeMap<String, Sink<V>>,
    state: Option<Sink<S>>,
}

impl<S, V> Outputs<S, V> {
    pub(crate) fn new(sinks: BTreeMap<String, Sink<V>>, state: Sink<S>) -> Self {
        Self {
            names: sinks.keys().cloned().collect(),
            sinks,
            state: Some(state),
        }
    }

    /// All sink names, including sinks already taken.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Number of sinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if the gearbox exposes no sinks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Returns true if `name` is one of the sink names.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Take the sink called `name`.
    pub fn take(&mut self, name: &str) -> GearboxResult<Sink<V>> {
        self.sinks.remove(name).ok_or_else(|| GearboxError::UnknownSink {
            name: name.to_string(),
        })
    }

    /// Take the recovered state sink.
    pub fn take_state(&mut self) -> GearboxResult<Sink<S>> {
        self.state.take().ok_or_else(|| GearboxError::UnknownSink {
            name: "state".to_string(),
        })
    }

    /// Consume into the remaining projection sinks.
    #[must_use]
    pub fn into_sinks(self) -> BTreeMap<String, Sink<V>> {
        self.sinks
    }
}

impl<S, V> fmt::Debug for Outputs<S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outputs")
            .field("names", &self.names)
            .field("available", &self.sinks.keys().collect::<Vec<_>>())
            .field("state", &self.state.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;
    use futures::FutureExt;

    use super::*;

    async fn teardown() -> (Arc<Teardown>, tokio::task::JoinHandle<()>) {
        let driver = tokio::spawn(futures::future::pending::<()>());
        (Arc::new(Teardown::new(driver.abort_handle())), driver)
    }

    fn pending_sink(name: &str, teardown: Arc<Teardown>) -> Sink<u32> {
        Sink::new(name.to_string(), stream::pending().boxed(), Arc::default(), teardown)
    }

    #[tokio::test]
    async fn sink_terminates_after_error() {
        let (teardown, _driver) = teardown().await;
        let lane = stream::iter(vec![Ok(1), Err(GearError::failed("boom")), Ok(2)]).boxed();
        let interest = Arc::new(Interest::default());
        let mut sink = Sink::new("count".to_string(), lane, Arc::clone(&interest), teardown);

        assert_eq!(sink.next().await, Some(Ok(1)));
        assert!(interest.is_active());
        assert_eq!(sink.next().await, Some(Err(GearError::failed("boom"))));
        assert!(sink.is_terminated());
        assert!(!interest.is_active());
        assert_eq!(sink.next().await, None);
    }

    #[tokio::test]
    async fn sink_listens_from_first_poll_until_dropped() {
        let (teardown, _driver) = teardown().await;
        let interest = Arc::new(Interest::default());
        let mut sink = Sink::<u32>::new("count".to_string(), stream::pending().boxed(), Arc::clone(&interest), teardown);
        assert!(!interest.is_active());

        assert!(sink.next().now_or_never().is_none());
        assert!(interest.is_active());

        drop(sink);
        assert!(!interest.is_active());
    }

    #[tokio::test]
    async fn dropping_last_sink_aborts_driver() {
        let (teardown, driver) = teardown().await;
        let a = pending_sink("a", Arc::clone(&teardown));
        let b = pending_sink("b", teardown);

        drop(a);
        tokio::task::yield_now().await;
        assert!(!driver.is_finished());

        drop(b);
        let err = driver.await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn outputs_take_each_sink_once() {
        let (teardown, _driver) = teardown().await;
        let mut sinks = BTreeMap::new();
        sinks.insert("x".to_string(), pending_sink("x", Arc::clone(&teardown)));
        let state = pending_sink("state", teardown);
        let mut outputs = Outputs::new(sinks, state);

        assert_eq!(outputs.names().collect::<Vec<_>>(), vec!["x"]);
        assert!(outputs.contains("x"));
        let sink = outputs.take("x").unwrap();
        assert_eq!(sink.name(), "x");
        assert!(matches!(outputs.take("x"), Err(GearboxError::UnknownSink { .. })));
        assert!(outputs.contains("x"));
        assert_eq!(outputs.len(), 1);

        let mut state = outputs.take_state().unwrap();
        assert!(state.next().now_or_never().is_none());
        assert!(outputs.take_state().is_err());
    }
}
