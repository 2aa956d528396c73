//! Transmissions: the time-varying source of gears.

use std::fmt;

use futures::stream::{BoxStream, Stream, StreamExt};

use crate::gear::Gear;

/// A stream of gears.
pub type GearStream<Src, A, S, V> = BoxStream<'static, Gear<Src, A, S, V>>;

type GearStreamFactory<Src, A, S, V> = Box<dyn FnOnce(&Src) -> GearStream<Src, A, S, V> + Send>;

/// Supplies gears over time: either directly, or built from the upstream sources.
pub enum Transmission<Src, A, S, V> {
    /// A ready-made gear stream.
    Stream(GearStream<Src, A, S, V>),
    /// Builds the gear stream from the sources. Invoked once per engagement.
    Factory(GearStreamFactory<Src, A, S, V>),
}

impl<Src, A, S, V> Transmission<Src, A, S, V> {
    /// Wrap a gear stream.
    pub fn from_stream<G>(gears: G) -> Self
    where
        G: Stream<Item = Gear<Src, A, S, V>> + Send + 'static,
    {
        Self::Stream(gears.boxed())
    }

    /// Wrap a function from sources to a gear stream.
    pub fn from_fn<F, G>(factory: F) -> Self
    where
        F: FnOnce(&Src) -> G + Send + 'static,
        G: Stream<Item = Gear<Src, A, S, V>> + Send + 'static,
    {
        Self::Factory(Box::new(move |sources: &Src| factory(sources).boxed()))
    }

    /// Resolve into the gear stream for `sources`.
    pub fn into_stream(self, sources: &Src) -> GearStream<Src, A, S, V> {
        match self {
            Self::Stream(gears) => gears,
            Self::Factory(factory) => factory(sources),
        }
    }
}

impl<Src, A, S, V> fmt::Debug for Transmission<Src, A, S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream(_) => f.write_str("Transmission::Stream"),
            Self::Factory(_) => f.write_str("Transmission::Factory"),
        }
    }
}
