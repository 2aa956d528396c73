//! The gearbox engine.
//!
//! A [`Gearbox`] is configured once (default gear, default filter, sink renames)
//! and can then be engaged any number of times. Each engagement spawns one
//! driver task that reads the transmission, activates every incoming gear and
//! publishes its projection table; each sink follows the current table's output
//! for its tooth, switching whenever a newer gear becomes current. A sink
//! receives values from the moment it is first polled; what a gear produced
//! before then is not kept.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, error, info};

use crate::config::{GearboxBuilder, GearboxConfig};
use crate::defaults::Fallbacks;
use crate::error::{GearboxError, GearboxResult, ValidationError};
use crate::replay::{Interests, ProjectionTable, Replay, TableStream};
use crate::runner::{spin, PumpGuard, Spin};
use crate::sink::{Outputs, Sink, Teardown};
use crate::switch::SwitchExt;
use crate::tooth::ToothTable;
use crate::transmission::{GearStream, Transmission};

struct GearboxInner<Src, A, S, V> {
    fallbacks: Fallbacks<Src, A, S>,
    teeth: ToothTable<S, V>,
    /// tooth -> sink
    sinks: BTreeMap<String, String>,
}

/// Dynamic stream composition engine.
///
/// Cloning is cheap; clones share the same validated configuration.
pub struct Gearbox<Src, A, S, V> {
    inner: Arc<GearboxInner<Src, A, S, V>>,
}

impl<Src, A, S, V> Clone for Gearbox<Src, A, S, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Src, A, S: 'static, V> Gearbox<Src, A, S, V> {
    /// Start configuring a gearbox.
    #[must_use]
    pub fn builder() -> GearboxBuilder<Src, A, S, V> {
        GearboxBuilder::new()
    }
}

impl<Src, A, S, V> Gearbox<Src, A, S, V> {
    /// The fixed tooth names.
    pub fn tooth_names(&self) -> impl Iterator<Item = &str> {
        self.inner.teeth.names()
    }

    /// The external sink names, one per tooth.
    pub fn sink_names(&self) -> impl Iterator<Item = &str> {
        self.inner.sinks.values().map(String::as_str)
    }

    /// External sink name of `tooth`.
    #[must_use]
    pub fn sink_name(&self, tooth: &str) -> Option<&str> {
        self.inner.sinks.get(tooth).map(String::as_str)
    }
}

impl<Src, A, S, V> Gearbox<Src, A, S, V>
where
    Src: Send + Sync + 'static,
    A: Default + Send + Sync + 'static,
    S: Clone + Default + Send + Sync + 'static,
    V: Send + 'static,
{
    /// Validate `config` and build a gearbox.
    ///
    /// Fails when a default tooth has no view, a tooth name is empty, or the
    /// sink map renames an unknown tooth or maps two teeth to one sink.
    pub fn from_config(config: GearboxConfig<Src, A, S, V>) -> Result<Self, ValidationError> {
        let teeth = ToothTable::from_defaults(&config.default_gear.teeth, &config.default_filter)?;
        let sinks = config.sink_map.assign(teeth.names())?;
        let fallbacks = Fallbacks::from_default_gear(&config.default_gear, config.fallback_model_delay);

        debug!(teeth = teeth.len(), renames = config.sink_map.len(), "gearbox configured");

        Ok(Self {
            inner: Arc::new(GearboxInner {
                fallbacks,
                teeth,
                sinks,
            }),
        })
    }

    /// Engage the gearbox: follow `transmission` and return one sink per tooth.
    ///
    /// Must be called from within a Tokio runtime. A factory transmission is
    /// invoked exactly once, here, with `sources`.
    pub fn engage(&self, transmission: Transmission<Src, A, S, V>, sources: Src) -> GearboxResult<Outputs<S, V>> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| GearboxError::NoRuntime)?;

        let sources = Arc::new(sources);
        let gears = transmission.into_stream(&sources);
        let replay = Replay::new(ProjectionTable::idle());
        let interests = Interests::new(self.inner.teeth.names());

        let tooth_tables: Vec<(String, String, TableStream<S, V>)> = self
            .inner
            .sinks
            .iter()
            .map(|(tooth, sink)| (tooth.clone(), sink.clone(), replay.subscribe()))
            .collect();
        let state_tables = replay.subscribe();

        let sink_interests: Vec<_> = tooth_tables.iter().map(|(tooth, _, _)| interests.tooth(tooth)).collect();
        let state_interest = interests.state();

        let driver = runtime.spawn(drive(Arc::clone(&self.inner), sources, gears, replay, interests));
        let teardown = Arc::new(Teardown::new(driver.abort_handle()));

        let sinks: BTreeMap<String, Sink<V>> = tooth_tables
            .into_iter()
            .zip(sink_interests)
            .map(|((tooth, sink, tables), interest)| {
                let lane = tables
                    .map(move |table| table.subscribe_tooth(&tooth))
                    .boxed()
                    .switch_latest()
                    .boxed();
                (sink.clone(), Sink::new(sink, lane, interest, Arc::clone(&teardown)))
            })
            .collect();

        let state_lane = state_tables
            .map(|table| table.subscribe_state())
            .boxed()
            .switch_latest()
            .boxed();
        let state = Sink::new("state".to_string(), state_lane, state_interest, teardown);

        info!(sinks = sinks.len(), "gearbox engaged");
        Ok(Outputs::new(sinks, state))
    }
}

/// Driver task: the single subscription to the transmission.
async fn drive<Src, A, S, V>(
    inner: Arc<GearboxInner<Src, A, S, V>>,
    sources: Arc<Src>,
    mut gears: GearStream<Src, A, S, V>,
    replay: Replay<S, V>,
    interests: Interests,
) where
    Src: Send + Sync + 'static,
    A: Default + Send + Sync + 'static,
    S: Clone + Default + Send + Sync + 'static,
    V: Send + 'static,
{
    let mut generation = 0_u64;
    let mut current: Option<PumpGuard> = None;

    while let Some(gear) = gears.next().await {
        generation += 1;

        // Tear down the previous gear before the next one starts producing.
        if let Some(previous) = current.take() {
            debug!(generation = previous.generation(), "gear superseded");
            drop(previous);
        }

        match spin(&gear, &*sources, &inner.fallbacks, &inner.teeth, &interests, generation) {
            Ok(Spin { table, pump }) => {
                debug!(generation, label = gear.label_str().unwrap_or(""), "gear engaged");
                current = Some(PumpGuard::spawn(generation, pump));
                replay.publish(table);
            }
            Err(err) => {
                error!(generation, error = %err, "gear construction failed; gearbox stopped");
                replay.publish(ProjectionTable::failed(generation, err));
                return;
            }
        }
    }

    debug!(generation, "transmission completed");
    if let Some(current) = current {
        current.finish().await;
    }
}

impl<Src, A, S, V> fmt::Debug for Gearbox<Src, A, S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gearbox")
            .field("teeth", &self.inner.teeth)
            .field("sinks", &self.inner.sinks)
            .finish()
    }
}
