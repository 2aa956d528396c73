//! Gearbox configuration.
//!
//! Configuration is fixed for the lifetime of a gearbox: it is assembled with
//! [`GearboxBuilder`], validated once, and never mutated afterwards. The
//! serializable subset lives in [`GearboxSettings`] so it can be loaded from JSON.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::gear::Gear;
use crate::gearbox::Gearbox;
use crate::tooth::{pass_all, FilterFn};

/// Rename table from tooth name to external sink name.
///
/// Teeth without an entry keep their own name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SinkMap(BTreeMap<String, String>);

impl SinkMap {
    /// Create an empty (identity) map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rename `tooth` to `sink`.
    pub fn insert(&mut self, tooth: impl Into<String>, sink: impl Into<String>) {
        self.0.insert(tooth.into(), sink.into());
    }

    /// External name for `tooth`.
    #[must_use]
    pub fn sink_name<'a>(&'a self, tooth: &'a str) -> &'a str {
        self.0.get(tooth).map_or(tooth, String::as_str)
    }

    /// Number of explicit renames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no renames are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate explicit `(tooth, sink)` renames.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Compute the `tooth -> sink` assignment for a fixed tooth set.
    ///
    /// Every rename must name a fixed tooth, and no two teeth may share a sink.
    pub fn assign<'a, I>(&self, teeth: I) -> Result<BTreeMap<String, String>, ValidationError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let teeth: Vec<&str> = teeth.into_iter().collect();

        for tooth in self.0.keys() {
            if !teeth.contains(&tooth.as_str()) {
                return Err(ValidationError::UnknownSinkSource { tooth: tooth.clone() });
            }
        }

        let mut by_sink: BTreeMap<&str, &str> = BTreeMap::new();
        let mut assignment = BTreeMap::new();
        for tooth in teeth {
            let sink = self.sink_name(tooth);
            if let Some(first) = by_sink.insert(sink, tooth) {
                let (first, second) = if first <= tooth { (first, tooth) } else { (tooth, first) };
                return Err(ValidationError::DuplicateSinkName {
                    sink: sink.to_string(),
                    first: first.to_string(),
                    second: second.to_string(),
                });
            }
            assignment.insert(tooth.to_string(), sink.to_string());
        }
        Ok(assignment)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SinkMap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Serializable gearbox settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GearboxSettings {
    /// Tooth to sink renames.
    pub sink_map: SinkMap,
    /// Delay before the built-in model emits its single default state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_model_delay_ms: Option<u64>,
}

impl GearboxSettings {
    /// Parse settings from JSON.
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(json).map_err(|e| ValidationError::InvalidSettings {
            reason: e.to_string(),
        })
    }

    /// The fallback model delay as a `Duration`.
    #[must_use]
    pub fn fallback_model_delay(&self) -> Option<Duration> {
        self.fallback_model_delay_ms.map(Duration::from_millis)
    }
}

/// Immutable gearbox configuration.
pub struct GearboxConfig<Src, A, S, V> {
    /// Supplies default steps and the fixed tooth set.
    pub default_gear: Gear<Src, A, S, V>,
    /// Filter for teeth that declare none.
    pub default_filter: FilterFn<S>,
    /// Tooth to sink renames.
    pub sink_map: SinkMap,
    /// Delay before the built-in model emits. `None` emits immediately.
    pub fallback_model_delay: Option<Duration>,
}

impl<Src, A, S: 'static, V> Default for GearboxConfig<Src, A, S, V> {
    fn default() -> Self {
        Self {
            default_gear: Gear::new(),
            default_filter: pass_all(),
            sink_map: SinkMap::new(),
            fallback_model_delay: None,
        }
    }
}

impl<Src, A, S, V> fmt::Debug for GearboxConfig<Src, A, S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GearboxConfig")
            .field("default_gear", &self.default_gear)
            .field("sink_map", &self.sink_map)
            .field("fallback_model_delay", &self.fallback_model_delay)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Gearbox`].
pub struct GearboxBuilder<Src, A, S, V> {
    config: GearboxConfig<Src, A, S, V>,
}

impl<Src, A, S: 'static, V> GearboxBuilder<Src, A, S, V> {
    /// Create a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: GearboxConfig::default(),
        }
    }
}

impl<Src, A, S: 'static, V> Default for GearboxBuilder<Src, A, S, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Src, A, S, V> GearboxBuilder<Src, A, S, V> {
    /// Set the default gear.
    #[must_use]
    pub fn default_gear(mut self, gear: Gear<Src, A, S, V>) -> Self {
        self.config.default_gear = gear;
        self
    }

    /// Set the default filter.
    #[must_use]
    pub fn default_filter<P>(mut self, filter: P) -> Self
    where
        P: Fn(&S) -> bool + Send + Sync + 'static,
    {
        self.config.default_filter = Arc::new(filter);
        self
    }

    /// Rename one tooth's sink.
    #[must_use]
    pub fn rename(mut self, tooth: impl Into<String>, sink: impl Into<String>) -> Self {
        self.config.sink_map.insert(tooth, sink);
        self
    }

    /// Replace the whole rename table.
    #[must_use]
    pub fn sink_map(mut self, sink_map: SinkMap) -> Self {
        self.config.sink_map = sink_map;
        self
    }

    /// Set the built-in model delay.
    #[must_use]
    pub fn fallback_model_delay(mut self, delay: Duration) -> Self {
        self.config.fallback_model_delay = Some(delay);
        self
    }

    /// Apply serializable settings.
    #[must_use]
    pub fn settings(mut self, settings: GearboxSettings) -> Self {
        let delay = settings.fallback_model_delay();
        self.config.sink_map = settings.sink_map;
        self.config.fallback_model_delay = delay;
        self
    }

    /// The configuration assembled so far.
    #[must_use]
    pub fn config(&self) -> &GearboxConfig<Src, A, S, V> {
        &self.config
    }
}

impl<Src, A, S, V> GearboxBuilder<Src, A, S, V>
where
    Src: Send + Sync + 'static,
    A: Default + Send + Sync + 'static,
    S: Clone + Default + Send + Sync + 'static,
    V: Send + 'static,
{
    /// Validate the configuration and build the gearbox.
    pub fn build(self) -> Result<Gearbox<Src, A, S, V>, ValidationError> {
        Gearbox::from_config(self.config)
    }
}
