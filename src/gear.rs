//! Behavior gears.
//!
//! A [`Gear`] bundles everything needed to turn upstream sources into named
//! output projections: an intent step (sources to actions), a model step
//! (actions to a state stream), a catch step (recovery from a failed state
//! stream) and a set of teeth (named projections of state). Every part is
//! optional; missing parts are filled from the gearbox defaults when the gear
//! becomes active.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::stream::BoxStream;

use crate::error::GearError;
use crate::tooth::{FilterFn, Tooth, ViewFn};

/// A stream of state values. An `Err` item is the stream's failure and ends it.
pub type StateStream<S> = BoxStream<'static, Result<S, GearError>>;

/// Interprets upstream sources into an actions value.
pub type IntentFn<Src, A> = Arc<dyn Fn(&Src) -> Result<A, GearError> + Send + Sync>;

/// Derives a state stream from actions.
pub type ModelFn<A, S> = Arc<dyn Fn(&A) -> Result<StateStream<S>, GearError> + Send + Sync>;

/// Produces a replacement state stream after the state stream failed.
pub type CatchFn<A, S> = Arc<dyn Fn(GearError, &A) -> StateStream<S> + Send + Sync>;

/// Named tooth declarations of a gear.
pub type Teeth<S, V> = BTreeMap<String, Tooth<S, V>>;

/// One bundle of intent/model/catch/teeth behavior.
///
/// Gears are immutable once built; cloning is cheap.
pub struct Gear<Src, A, S, V> {
    pub(crate) label: Option<String>,
    pub(crate) intent: Option<IntentFn<Src, A>>,
    pub(crate) model: Option<ModelFn<A, S>>,
    pub(crate) catch: Option<CatchFn<A, S>>,
    pub(crate) teeth: Teeth<S, V>,
}

impl<Src, A, S, V> Gear<Src, A, S, V> {
    /// Create an empty gear: every part falls back to the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            label: None,
            intent: None,
            model: None,
            catch: None,
            teeth: BTreeMap::new(),
        }
    }

    /// Set a label used in logs.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the intent step.
    #[must_use]
    pub fn intent<F>(mut self, intent: F) -> Self
    where
        F: Fn(&Src) -> Result<A, GearError> + Send + Sync + 'static,
    {
        self.intent = Some(Arc::new(intent));
        self
    }

    /// Set the model step.
    #[must_use]
    pub fn model<F>(mut self, model: F) -> Self
    where
        F: Fn(&A) -> Result<StateStream<S>, GearError> + Send + Sync + 'static,
    {
        self.model = Some(Arc::new(model));
        self
    }

    /// Set the catch step.
    #[must_use]
    pub fn catch<F>(mut self, catch: F) -> Self
    where
        F: Fn(GearError, &A) -> StateStream<S> + Send + Sync + 'static,
    {
        self.catch = Some(Arc::new(catch));
        self
    }

    /// Declare a tooth.
    #[must_use]
    pub fn tooth(mut self, name: impl Into<String>, tooth: Tooth<S, V>) -> Self {
        self.teeth.insert(name.into(), tooth);
        self
    }

    /// Declare a bare-view tooth.
    #[must_use]
    pub fn view<F>(self, name: impl Into<String>, view: F) -> Self
    where
        F: Fn(&S) -> V + Send + Sync + 'static,
    {
        self.tooth(name, Tooth::Bare(Arc::new(view) as ViewFn<S, V>))
    }

    /// Declare a tooth with its own filter and view.
    #[must_use]
    pub fn filtered<P, F>(self, name: impl Into<String>, filter: P, view: F) -> Self
    where
        P: Fn(&S) -> bool + Send + Sync + 'static,
        F: Fn(&S) -> V + Send + Sync + 'static,
    {
        self.tooth(
            name,
            Tooth::Full {
                filter: Some(Arc::new(filter) as FilterFn<S>),
                view: Some(Arc::new(view) as ViewFn<S, V>),
            },
        )
    }

    /// The label, if any.
    #[must_use]
    pub fn label_str(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Declared teeth.
    #[must_use]
    pub fn teeth(&self) -> &Teeth<S, V> {
        &self.teeth
    }

    /// Returns true if the gear declares its own intent step.
    #[must_use]
    pub fn has_intent(&self) -> bool {
        self.intent.is_some()
    }

    /// Returns true if the gear declares its own model step.
    #[must_use]
    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Returns true if the gear declares its own catch step.
    #[must_use]
    pub fn has_catch(&self) -> bool {
        self.catch.is_some()
    }
}

impl<Src, A, S, V> Default for Gear<Src, A, S, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Src, A, S, V> Clone for Gear<Src, A, S, V> {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            intent: self.intent.clone(),
            model: self.model.clone(),
            catch: self.catch.clone(),
            teeth: self.teeth.clone(),
        }
    }
}

impl<Src, A, S, V> fmt::Debug for Gear<Src, A, S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gear")
            .field("label", &self.label)
            .field("intent", &self.intent.is_some())
            .field("model", &self.model.is_some())
            .field("catch", &self.catch.is_some())
            .field("teeth", &self.teeth.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestGear = Gear<(), (), u32, u32>;

    #[test]
    fn gear_new_is_empty() {
        let gear = TestGear::new();
        assert!(!gear.has_intent());
        assert!(!gear.has_model());
        assert!(!gear.has_catch());
        assert!(gear.teeth().is_empty());
        assert!(gear.label_str().is_none());
    }

    #[test]
    fn gear_builder_records_parts() {
        let gear = TestGear::new()
            .label("counter")
            .intent(|_| Ok(()))
            .view("count", |s| *s)
            .filtered("even", |s| s % 2 == 0, |s| *s);

        assert_eq!(gear.label_str(), Some("counter"));
        assert!(gear.has_intent());
        assert!(!gear.has_model());
        assert_eq!(gear.teeth().len(), 2);
        assert!(matches!(gear.teeth()["count"], Tooth::Bare(_)));
        assert!(matches!(gear.teeth()["even"], Tooth::Full { .. }));
    }

    #[test]
    fn gear_redeclaring_tooth_replaces_it() {
        let gear = TestGear::new()
            .view("count", |s| *s)
            .filtered("count", |_| true, |s| s + 1);
        assert_eq!(gear.teeth().len(), 1);
        assert!(matches!(gear.teeth()["count"], Tooth::Full { .. }));
    }

    #[test]
    fn gear_debug_lists_parts() {
        let gear = TestGear::new().label("g").view("count", |s| *s);
        let dbg = format!("{gear:?}");
        assert!(dbg.contains("\"g\""));
        assert!(dbg.contains("count"));
    }
}
