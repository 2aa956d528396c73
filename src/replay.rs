//! Replay layer: one shared, single-slot view of the current projection table.
//!
//! The driver publishes one [`ProjectionTable`] per activated gear into a
//! `tokio::sync::watch` channel. Every sink subscribes to that channel and is
//! handed the latest table on first poll, then each newer one. Only the most
//! recent table is retained; superseded tables are dropped as soon as they are
//! replaced.
//!
//! A table does not hold values. Each output of a gear is a [`Tap`] that only
//! carries values while a sink listens on it, so an output nobody reads keeps
//! nothing. A sink listens from the moment it switches to the table, or from
//! activation when it was already being read by then.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::{UnboundedReceiverStream, WatchStream};

use crate::error::GearError;

/// A stream of values produced for one sink by one gear.
pub(crate) type Lane<T> = BoxStream<'static, Result<T, GearError>>;

/// Stream of published tables, starting with the current one.
pub(crate) type TableStream<S, V> = WatchStream<Arc<ProjectionTable<S, V>>>;

/// Whether a sink is being read: set on its first poll, cleared when it ends
/// or is dropped.
#[derive(Debug, Default)]
pub(crate) struct Interest(AtomicBool);

impl Interest {
    pub(crate) fn mark(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub(crate) fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub(crate) fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// The interest flag of every sink of one engagement.
#[derive(Debug, Default)]
pub(crate) struct Interests {
    teeth: BTreeMap<String, Arc<Interest>>,
    state: Arc<Interest>,
}

impl Interests {
    pub(crate) fn new<'a>(teeth: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            teeth: teeth
                .into_iter()
                .map(|name| (name.to_string(), Arc::default()))
                .collect(),
            state: Arc::default(),
        }
    }

    /// Flag of the sink fed by `tooth`. Unknown teeth have nobody reading them.
    pub(crate) fn tooth(&self, tooth: &str) -> Arc<Interest> {
        self.teeth.get(tooth).cloned().unwrap_or_default()
    }

    pub(crate) fn state(&self) -> Arc<Interest> {
        Arc::clone(&self.state)
    }
}

struct TapInner<T> {
    tx: Option<mpsc::UnboundedSender<T>>,
    /// Opened at activation for a sink that was already being read.
    pending: Option<mpsc::UnboundedReceiver<T>>,
    closed: bool,
}

impl<T> TapInner<T> {
    /// Release both ends once the sink stopped reading. Returns whether a
    /// value sent now would reach a reader.
    fn refresh(&mut self, interest: &Interest) -> bool {
        if !interest.is_active() {
            self.tx = None;
            self.pending = None;
        }
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

/// One output of one activated gear.
pub(crate) struct Tap<T> {
    interest: Arc<Interest>,
    inner: Mutex<TapInner<T>>,
}

impl<T> Tap<T> {
    pub(crate) fn new(interest: Arc<Interest>) -> Self {
        let mut inner = TapInner {
            tx: None,
            pending: None,
            closed: false,
        };
        if interest.is_active() {
            let (tx, rx) = mpsc::unbounded_channel();
            inner.tx = Some(tx);
            inner.pending = Some(rx);
        }
        Self {
            interest,
            inner: Mutex::new(inner),
        }
    }

    /// Start listening. Replaces any earlier listener; `None` once closed.
    fn listen(&self) -> Option<mpsc::UnboundedReceiver<T>> {
        let mut inner = self.inner.lock().ok()?;
        if let Some(rx) = inner.pending.take() {
            return Some(rx);
        }
        if inner.closed {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inner.tx = Some(tx);
        Some(rx)
    }

    /// Returns true if a value sent now would reach a sink.
    pub(crate) fn is_listened(&self) -> bool {
        self.inner
            .lock()
            .map(|mut inner| inner.refresh(&self.interest))
            .unwrap_or(false)
    }

    /// Hand `value` to the listening sink, or drop it.
    pub(crate) fn send(&self, value: T) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if !inner.refresh(&self.interest) {
            return;
        }
        let delivered = inner.tx.as_ref().map(|tx| tx.send(value).is_ok());
        if delivered == Some(false) {
            inner.tx = None;
        }
    }

    /// No more values: the listening sink sees the lane end.
    pub(crate) fn close(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.tx = None;
            inner.closed = true;
        }
    }
}

/// Writing end of a [`Tap`], held by the pump. Closes the tap when dropped.
pub(crate) struct Outlet<T>(Arc<Tap<T>>);

impl<T> Outlet<T> {
    pub(crate) fn new(tap: Arc<Tap<T>>) -> Self {
        Self(tap)
    }

    pub(crate) fn is_listened(&self) -> bool {
        self.0.is_listened()
    }

    pub(crate) fn send(&self, value: T) {
        self.0.send(value);
    }
}

impl<T> Drop for Outlet<T> {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// The outputs of one activated gear.
pub(crate) struct ProjectionTable<S, V> {
    generation: u64,
    teeth: BTreeMap<String, Arc<Tap<V>>>,
    state: Option<Arc<Tap<Result<S, GearError>>>>,
    failure: Option<GearError>,
}

impl<S, V> ProjectionTable<S, V>
where
    S: Send + 'static,
    V: Send + 'static,
{
    /// Table in place before any gear was activated: every lane never emits.
    pub(crate) fn idle() -> Self {
        Self {
            generation: 0,
            teeth: BTreeMap::new(),
            state: None,
            failure: None,
        }
    }

    /// Table of a running gear.
    pub(crate) fn live(
        generation: u64,
        teeth: BTreeMap<String, Arc<Tap<V>>>,
        state: Arc<Tap<Result<S, GearError>>>,
    ) -> Self {
        Self {
            generation,
            teeth,
            state: Some(state),
            failure: None,
        }
    }

    /// Table of a gear that could not be activated.
    pub(crate) fn failed(generation: u64, failure: GearError) -> Self {
        Self {
            generation,
            teeth: BTreeMap::new(),
            state: None,
            failure: Some(failure),
        }
    }

    /// Listen on the output for `tooth`.
    ///
    /// A failed table yields its failure; an unknown tooth never emits.
    pub(crate) fn subscribe_tooth(&self, tooth: &str) -> Lane<V> {
        if let Some(failure) = &self.failure {
            return stream::once(futures::future::ready(Err(failure.clone()))).boxed();
        }
        match self.teeth.get(tooth) {
            Some(tap) => match tap.listen() {
                Some(rx) => UnboundedReceiverStream::new(rx).map(Ok).boxed(),
                None => stream::empty().boxed(),
            },
            None => stream::pending().boxed(),
        }
    }

    /// Listen on the recovered state output.
    pub(crate) fn subscribe_state(&self) -> Lane<S> {
        if let Some(failure) = &self.failure {
            return stream::once(futures::future::ready(Err(failure.clone()))).boxed();
        }
        match &self.state {
            Some(tap) => match tap.listen() {
                Some(rx) => UnboundedReceiverStream::new(rx).boxed(),
                None => stream::empty().boxed(),
            },
            None => stream::pending().boxed(),
        }
    }
}

impl<S, V> fmt::Debug for ProjectionTable<S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectionTable")
            .field("generation", &self.generation)
            .field("teeth", &self.teeth.keys().collect::<Vec<_>>())
            .field("failure", &self.failure)
            .finish()
    }
}

/// Single-slot multicast of the current projection table.
pub(crate) struct Replay<S, V> {
    tx: watch::Sender<Arc<ProjectionTable<S, V>>>,
}

impl<S, V> Replay<S, V>
where
    S: Send + 'static,
    V: Send + 'static,
{
    /// Start with `initial` as the current table.
    pub(crate) fn new(initial: ProjectionTable<S, V>) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx }
    }

    /// Make `table` current, dropping the previous one.
    pub(crate) fn publish(&self, table: ProjectionTable<S, V>) {
        // send_replace stores the value even when no sink is subscribed.
        let _previous = self.tx.send_replace(Arc::new(table));
    }

    /// Subscribe: the current table first, then every newer one.
    pub(crate) fn subscribe(&self) -> TableStream<S, V> {
        WatchStream::new(self.tx.subscribe())
    }
}

impl<S, V> fmt::Debug for Replay<S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replay")
            .field("generation", &self.tx.borrow().generation)
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}
