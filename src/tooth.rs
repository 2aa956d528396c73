//! Teeth: named projections of gear state.
//!
//! A tooth is declared either as a bare view function or as a record with an
//! optional filter and view. [`ToothTable`] precomputes, once per gearbox, the
//! default `(filter, view)` pair for every tooth of the default gear and resolves
//! later declarations against those defaults.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ValidationError;

/// Predicate deciding whether a state value reaches a projection.
pub type FilterFn<S> = Arc<dyn Fn(&S) -> bool + Send + Sync>;

/// Maps a state value to a projection value.
pub type ViewFn<S, V> = Arc<dyn Fn(&S) -> V + Send + Sync>;

/// A tooth declaration.
pub enum Tooth<S, V> {
    /// A view function; the filter comes from the defaults.
    Bare(ViewFn<S, V>),
    /// A record with an optional filter and view.
    Full {
        /// Falls back to the default filter.
        filter: Option<FilterFn<S>>,
        /// Falls back to the default gear's view for the same name.
        view: Option<ViewFn<S, V>>,
    },
}

impl<S, V> Clone for Tooth<S, V> {
    fn clone(&self) -> Self {
        match self {
            Self::Bare(view) => Self::Bare(Arc::clone(view)),
            Self::Full { filter, view } => Self::Full {
                filter: filter.clone(),
                view: view.clone(),
            },
        }
    }
}

impl<S, V> fmt::Debug for Tooth<S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bare(_) => f.write_str("Tooth::Bare"),
            Self::Full { filter, view } => f
                .debug_struct("Tooth::Full")
                .field("filter", &filter.is_some())
                .field("view", &view.is_some())
                .finish(),
        }
    }
}

/// A fully resolved tooth.
pub struct ToothSpec<S, V> {
    /// Effective filter.
    pub filter: FilterFn<S>,
    /// Effective view.
    pub view: ViewFn<S, V>,
}

impl<S, V> ToothSpec<S, V> {
    /// Apply filter then view.
    pub fn project(&self, state: &S) -> Option<V> {
        (self.filter)(state).then(|| (self.view)(state))
    }
}

impl<S, V> Clone for ToothSpec<S, V> {
    fn clone(&self) -> Self {
        Self {
            filter: Arc::clone(&self.filter),
            view: Arc::clone(&self.view),
        }
    }
}

impl<S, V> fmt::Debug for ToothSpec<S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ToothSpec")
    }
}

/// The filter used when nothing else applies: every state passes.
#[must_use]
pub fn pass_all<S: 'static>() -> FilterFn<S> {
    Arc::new(|_: &S| true)
}

/// Default `(filter, view)` pairs for the fixed tooth set.
///
/// The key set is the closed set of projection names a gearbox will ever expose.
pub struct ToothTable<S, V> {
    defaults: BTreeMap<String, ToothSpec<S, V>>,
}

impl<S, V> ToothTable<S, V> {
    /// Precompute defaults from the default gear's teeth.
    pub fn from_defaults(
        teeth: &BTreeMap<String, Tooth<S, V>>,
        default_filter: &FilterFn<S>,
    ) -> Result<Self, ValidationError> {
        let mut defaults = BTreeMap::new();
        for (name, tooth) in teeth {
            if name.is_empty() {
                return Err(ValidationError::EmptyToothName);
            }
            let spec = match tooth {
                Tooth::Bare(view) => ToothSpec {
                    filter: Arc::clone(default_filter),
                    view: Arc::clone(view),
                },
                Tooth::Full { filter, view } => {
                    let view = view.clone().ok_or_else(|| ValidationError::MissingView {
                        tooth: name.clone(),
                    })?;
                    ToothSpec {
                        filter: filter.clone().unwrap_or_else(|| Arc::clone(default_filter)),
                        view,
                    }
                }
            };
            defaults.insert(name.clone(), spec);
        }
        Ok(Self { defaults })
    }

    /// The fixed tooth names, in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.defaults.keys().map(String::as_str)
    }

    /// Number of fixed teeth.
    #[must_use]
    pub fn len(&self) -> usize {
        self.defaults.len()
    }

    /// Returns true if no teeth are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defaults.is_empty()
    }

    /// Returns true if `name` belongs to the fixed set.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.defaults.contains_key(name)
    }

    /// The default pair for a fixed tooth.
    #[must_use]
    pub fn default_for(&self, name: &str) -> Option<&ToothSpec<S, V>> {
        self.defaults.get(name)
    }

    /// Resolve a later declaration for a fixed tooth.
    ///
    /// Returns `None` only when `name` is outside the fixed set.
    #[must_use]
    pub fn resolve(&self, name: &str, declared: Option<&Tooth<S, V>>) -> Option<ToothSpec<S, V>> {
        let default = self.defaults.get(name)?;
        let spec = match declared {
            None => default.clone(),
            Some(Tooth::Bare(view)) => ToothSpec {
                filter: Arc::clone(&default.filter),
                view: Arc::clone(view),
            },
            Some(Tooth::Full { filter, view }) => ToothSpec {
                filter: filter.clone().unwrap_or_else(|| Arc::clone(&default.filter)),
                view: view.clone().unwrap_or_else(|| Arc::clone(&default.view)),
            },
        };
        Some(spec)
    }

    /// Resolve every fixed tooth against a gear's declarations.
    #[must_use]
    pub fn resolve_all(&self, declared: &BTreeMap<String, Tooth<S, V>>) -> Vec<(String, ToothSpec<S, V>)> {
        self.defaults
            .keys()
            .filter_map(|name| {
                self.resolve(name, declared.get(name))
                    .map(|spec| (name.clone(), spec))
            })
            .collect()
    }

    /// Declared names that fall outside the fixed set.
    pub fn undeclared<'a>(
        &'a self,
        declared: &'a BTreeMap<String, Tooth<S, V>>,
    ) -> impl Iterator<Item = &'a str> + 'a {
        declared
            .keys()
            .filter(move |name| !self.defaults.contains_key(name.as_str()))
            .map(String::as_str)
    }
}

impl<S, V> fmt::Debug for ToothTable<S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToothTable")
            .field("names", &self.defaults.keys().collect::<Vec<_>>())
            .finish()
    }
}
