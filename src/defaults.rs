//! Default resolution for gear steps.
//!
//! Each step of an incoming gear is taken from the gear itself, else from the
//! default gear, else from a built-in fallback:
//!
//! - intent: ignores the sources and returns `A::default()`
//! - model: ignores the actions and emits one `S::default()`, then completes
//! - catch: re-raises the error as a failed stream

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};

use crate::error::GearError;
use crate::gear::{CatchFn, Gear, IntentFn, ModelFn};

/// Effective steps of one gear activation.
pub struct ResolvedGear<Src, A, S> {
    /// Sources to actions.
    pub intent: IntentFn<Src, A>,
    /// Actions to raw state.
    pub model: ModelFn<A, S>,
    /// Raw state failure to recovered state.
    pub catch: CatchFn<A, S>,
}

/// Fallback steps, computed once per gearbox.
pub struct Fallbacks<Src, A, S> {
    intent: IntentFn<Src, A>,
    model: ModelFn<A, S>,
    catch: CatchFn<A, S>,
}

impl<Src, A, S> Fallbacks<Src, A, S>
where
    Src: 'static,
    A: Default + 'static,
    S: Default + Send + 'static,
{
    /// Build fallbacks from the default gear.
    ///
    /// `model_delay` postpones the built-in model's single emission.
    pub fn from_default_gear<V>(default_gear: &Gear<Src, A, S, V>, model_delay: Option<Duration>) -> Self {
        Self {
            intent: default_gear.intent.clone().unwrap_or_else(builtin_intent),
            model: default_gear
                .model
                .clone()
                .unwrap_or_else(|| builtin_model(model_delay)),
            catch: default_gear.catch.clone().unwrap_or_else(builtin_catch),
        }
    }
}

impl<Src, A, S> Fallbacks<Src, A, S> {
    /// Fill the missing steps of `gear`.
    pub fn resolve<V>(&self, gear: &Gear<Src, A, S, V>) -> ResolvedGear<Src, A, S> {
        ResolvedGear {
            intent: gear.intent.clone().unwrap_or_else(|| Arc::clone(&self.intent)),
            model: gear.model.clone().unwrap_or_else(|| Arc::clone(&self.model)),
            catch: gear.catch.clone().unwrap_or_else(|| Arc::clone(&self.catch)),
        }
    }
}

impl<Src, A, S> fmt::Debug for Fallbacks<Src, A, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Fallbacks")
    }
}

fn builtin_intent<Src: 'static, A: Default + 'static>() -> IntentFn<Src, A> {
    Arc::new(|_: &Src| Ok::<A, GearError>(A::default()))
}

fn builtin_model<A, S>(delay: Option<Duration>) -> ModelFn<A, S>
where
    A: 'static,
    S: Default + Send + 'static,
{
    Arc::new(move |_: &A| {
        let state = stream::once(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok::<S, GearError>(S::default())
        });
        Ok::<_, GearError>(state.boxed())
    })
}

fn builtin_catch<A: 'static, S: Send + 'static>() -> CatchFn<A, S> {
    Arc::new(|err: GearError, _: &A| stream::once(async move { Err::<S, GearError>(err) }).boxed())
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestGear = Gear<u32, u32, u32, u32>;

    async fn collect(fallbacks: &Fallbacks<u32, u32, u32>, gear: &TestGear, sources: u32) -> Vec<Result<u32, GearError>> {
        let resolved = fallbacks.resolve(gear);
        let actions = (resolved.intent)(&sources).unwrap();
        (resolved.model)(&actions).unwrap().collect().await
    }

    #[tokio::test]
    async fn builtin_fallbacks_emit_one_default_state() {
        let fallbacks = Fallbacks::from_default_gear(&TestGear::new(), None);
        let items = collect(&fallbacks, &TestGear::new(), 7).await;
        assert_eq!(items, vec![Ok(0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn builtin_model_honours_delay() {
        let fallbacks = Fallbacks::from_default_gear(&TestGear::new(), Some(Duration::from_millis(300)));
        let start = tokio::time::Instant::now();
        let items = collect(&fallbacks, &TestGear::new(), 7).await;
        assert_eq!(items, vec![Ok(0)]);
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn default_gear_steps_override_builtins() {
        let default_gear = TestGear::new()
            .intent(|src| Ok(src + 1))
            .model(|actions| Ok(stream::iter(vec![Ok(*actions), Ok(actions * 2)]).boxed()));
        let fallbacks = Fallbacks::from_default_gear(&default_gear, None);
        let items = collect(&fallbacks, &TestGear::new(), 1).await;
        assert_eq!(items, vec![Ok(2), Ok(4)]);
    }

    #[tokio::test]
    async fn gear_steps_override_default_gear() {
        let default_gear = TestGear::new().intent(|src| Ok(src + 1));
        let fallbacks = Fallbacks::from_default_gear(&default_gear, None);
        let gear = TestGear::new()
            .intent(|src| Ok(src * 10))
            .model(|actions| Ok(stream::iter(vec![Ok(*actions)]).boxed()));
        let items = collect(&fallbacks, &gear, 3).await;
        assert_eq!(items, vec![Ok(30)]);
    }

    #[tokio::test]
    async fn builtin_catch_reraises() {
        let fallbacks = Fallbacks::from_default_gear(&TestGear::new(), None);
        let resolved = fallbacks.resolve(&TestGear::new());
        let items: Vec<_> = (resolved.catch)(GearError::failed("boom"), &0).collect().await;
        assert_eq!(items, vec![Err(GearError::failed("boom"))]);
    }
}
