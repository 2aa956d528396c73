//! Gear activation.
//!
//! [`spin`] turns one gear into a [`ProjectionTable`] plus a pump future. The
//! pump reads the gear's raw state stream once and fans every state value out
//! to the tooth outputs (filtered and mapped) and to the recovered state
//! output. Outputs no sink listens on are skipped. When the raw state stream
//! fails, tooth outputs are closed and the state output switches to the gear's
//! catch stream.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::defaults::Fallbacks;
use crate::error::{GearError, GearStage};
use crate::gear::{CatchFn, Gear, StateStream};
use crate::replay::{Interests, Outlet, ProjectionTable, Tap};
use crate::tooth::{ToothSpec, ToothTable};

/// An activated gear: its outputs, and the future that feeds them.
pub(crate) struct Spin<S, V> {
    pub table: ProjectionTable<S, V>,
    pub pump: BoxFuture<'static, ()>,
}

struct ToothLane<S, V> {
    spec: ToothSpec<S, V>,
    outlet: Outlet<V>,
}

/// Activate `gear` against `sources`.
///
/// Errors from intent or model are construction failures.
pub(crate) fn spin<Src, A, S, V>(
    gear: &Gear<Src, A, S, V>,
    sources: &Src,
    fallbacks: &Fallbacks<Src, A, S>,
    teeth: &ToothTable<S, V>,
    interests: &Interests,
    generation: u64,
) -> Result<Spin<S, V>, GearError>
where
    A: Send + Sync + 'static,
    S: Clone + Send + 'static,
    V: Send + 'static,
{
    for tooth in teeth.undeclared(&gear.teeth) {
        warn!(generation, tooth, "ignoring tooth outside the fixed set");
    }

    let steps = fallbacks.resolve(gear);
    let actions = (steps.intent)(sources).map_err(|e| e.in_stage(GearStage::Intent))?;
    let state = (steps.model)(&actions).map_err(|e| e.in_stage(GearStage::Model))?;

    let mut lanes = Vec::with_capacity(teeth.len());
    let mut taps = BTreeMap::new();
    for (name, spec) in teeth.resolve_all(&gear.teeth) {
        let tap = Arc::new(Tap::new(interests.tooth(&name)));
        lanes.push(ToothLane {
            spec,
            outlet: Outlet::new(Arc::clone(&tap)),
        });
        taps.insert(name, tap);
    }
    let state_tap = Arc::new(Tap::new(interests.state()));

    let table = ProjectionTable::live(generation, taps, Arc::clone(&state_tap));
    let pump = pump(generation, state, actions, steps.catch, lanes, Outlet::new(state_tap)).boxed();
    Ok(Spin { table, pump })
}

async fn pump<A, S, V>(
    generation: u64,
    mut state: StateStream<S>,
    actions: A,
    catch: CatchFn<A, S>,
    lanes: Vec<ToothLane<S, V>>,
    state_out: Outlet<Result<S, GearError>>,
) where
    A: Send + Sync,
    S: Clone + Send,
    V: Send,
{
    let failure = loop {
        let value = match state.next().await {
            Some(Ok(value)) => value,
            Some(Err(err)) => break Some(err),
            None => break None,
        };
        for lane in lanes.iter().filter(|lane| lane.outlet.is_listened()) {
            if let Some(projected) = lane.spec.project(&value) {
                lane.outlet.send(projected);
            }
        }
        state_out.send(Ok(value));
    };

    // Tooth outputs read raw state only; they end with it.
    drop(lanes);
    drop(state);

    match failure {
        None => debug!(generation, "state stream completed"),
        Some(err) => {
            warn!(generation, error = %err, "state stream failed; switching to catch");
            recover(generation, catch(err, &actions), &state_out).await;
        }
    }
}

async fn recover<S>(
    generation: u64,
    mut recovered: StateStream<S>,
    state_out: &Outlet<Result<S, GearError>>,
) where
    S: Send,
{
    while let Some(item) = recovered.next().await {
        if let Err(err) = &item {
            warn!(generation, error = %err, "catch stream failed");
            state_out.send(item);
            return;
        }
        state_out.send(item);
    }
    debug!(generation, "catch stream completed");
}

/// The running pump of the current gear. Dropping the guard aborts the pump.
pub(crate) struct PumpGuard {
    generation: u64,
    handle: JoinHandle<()>,
}

impl PumpGuard {
    pub(crate) fn spawn(generation: u64, pump: BoxFuture<'static, ()>) -> Self {
        Self {
            generation,
            handle: tokio::spawn(pump),
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Wait for the pump to run to completion.
    pub(crate) async fn finish(mut self) {
        if let Err(err) = (&mut self.handle).await {
            if err.is_panic() {
                warn!(generation = self.generation, "gear pump panicked");
            }
        }
    }
}

impl Drop for PumpGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use futures::stream;
    use futures::FutureExt;

    use super::*;
    use crate::tooth::pass_all;

    type TestGear = Gear<u32, u32, u32, u32>;

    fn table() -> ToothTable<u32, u32> {
        let default_gear = TestGear::new()
            .view("plain", |s| *s)
            .filtered("even", |s| s % 2 == 0, |s| s * 10);
        ToothTable::from_defaults(default_gear.teeth(), &pass_all()).unwrap()
    }

    fn fallbacks() -> Fallbacks<u32, u32, u32> {
        Fallbacks::from_default_gear(&TestGear::new(), None)
    }

    /// Every sink already being read.
    fn reading() -> Interests {
        let interests = Interests::new(["plain", "even"]);
        interests.tooth("plain").mark();
        interests.tooth("even").mark();
        interests.state().mark();
        interests
    }

    fn activate(gear: &TestGear, sources: u32) -> Spin<u32, u32> {
        spin(gear, &sources, &fallbacks(), &table(), &reading(), 1).unwrap()
    }

    async fn drain(spin: Spin<u32, u32>) -> (Vec<u32>, Vec<u32>, Vec<Result<u32, GearError>>) {
        let Spin { table, pump } = spin;
        let plain = table.subscribe_tooth("plain");
        let even = table.subscribe_tooth("even");
        let state = table.subscribe_state();
        pump.await;
        let plain = plain.map(Result::unwrap).collect().await;
        let even = even.map(Result::unwrap).collect().await;
        let state = state.collect().await;
        (plain, even, state)
    }

    #[tokio::test]
    async fn spin_projects_filtered_and_mapped_state() {
        let gear = TestGear::new().model(|_| Ok(stream::iter(vec![Ok(1), Ok(2), Ok(3), Ok(4)]).boxed()));
        let (plain, even, state) = drain(activate(&gear, 0)).await;
        assert_eq!(plain, vec![1, 2, 3, 4]);
        assert_eq!(even, vec![20, 40]);
        assert_eq!(state, vec![Ok(1), Ok(2), Ok(3), Ok(4)]);
    }

    #[tokio::test]
    async fn spin_uses_gear_teeth_over_defaults() {
        let gear = TestGear::new()
            .model(|_| Ok(stream::iter(vec![Ok(1), Ok(2)]).boxed()))
            .view("plain", |s| s + 100)
            .view("unknown", |s| *s);
        let spin = activate(&gear, 0);
        assert!(spin.table.subscribe_tooth("unknown").next().now_or_never().is_none());
        let (plain, even, _) = drain(spin).await;
        assert_eq!(plain, vec![101, 102]);
        // Bare redeclaration would change the view; "even" kept its default record.
        assert_eq!(even, vec![20]);
    }

    #[tokio::test]
    async fn spin_feeds_intent_into_model() {
        let gear = TestGear::new()
            .intent(|src| Ok(src * 2))
            .model(|actions| Ok(stream::iter(vec![Ok(*actions)]).boxed()));
        let (plain, _, _) = drain(activate(&gear, 21)).await;
        assert_eq!(plain, vec![42]);
    }

    #[tokio::test]
    async fn unread_teeth_are_not_projected() {
        let projected = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&projected);
        let gear = TestGear::new()
            .model(|_| Ok(stream::iter(vec![Ok(1), Ok(2)]).boxed()))
            .view("even", move |s| {
                seen.store(true, Ordering::SeqCst);
                *s
            });
        let interests = Interests::new(["plain", "even"]);
        interests.tooth("plain").mark();
        let Spin { table, pump } = spin(&gear, &0, &fallbacks(), &table(), &interests, 1).unwrap();
        let plain = table.subscribe_tooth("plain");
        pump.await;

        assert_eq!(plain.map(Result::unwrap).collect::<Vec<_>>().await, vec![1, 2]);
        assert!(!projected.load(Ordering::SeqCst));
        assert_eq!(table.subscribe_tooth("even").next().await, None);
        assert_eq!(table.subscribe_state().next().await, None);
    }

    #[tokio::test]
    async fn failed_state_closes_teeth_and_recovers_state() {
        let gear = TestGear::new()
            .model(|_| {
                Ok(stream::iter(vec![Ok(2), Err(GearError::failed("boom")), Ok(4)]).boxed())
            })
            .catch(|err, actions| {
                assert_eq!(err, GearError::failed("boom"));
                stream::iter(vec![Ok(actions + 100)]).boxed()
            });
        let (plain, even, state) = drain(activate(&gear, 0)).await;
        assert_eq!(plain, vec![2]);
        assert_eq!(even, vec![20]);
        assert_eq!(state, vec![Ok(2), Ok(100)]);
    }

    #[tokio::test]
    async fn failed_catch_propagates_on_state_lane() {
        let gear = TestGear::new().model(|_| Ok(stream::iter(vec![Err(GearError::failed("boom"))]).boxed()));
        let (plain, _, state) = drain(activate(&gear, 0)).await;
        assert!(plain.is_empty());
        assert_eq!(state, vec![Err(GearError::failed("boom"))]);
    }

    #[test]
    fn intent_failure_is_a_construction_error() {
        let gear = TestGear::new().intent(|_| Err(GearError::failed("no sources")));
        let err = spin(&gear, &0, &fallbacks(), &table(), &reading(), 1).err().unwrap();
        assert_eq!(
            err,
            GearError::Construction {
                stage: GearStage::Intent,
                message: "no sources".to_string(),
            }
        );
    }

    #[test]
    fn model_failure_is_a_construction_error() {
        let gear = TestGear::new().model(|_| Err(GearError::failed("no model")));
        let err = spin(&gear, &0, &fallbacks(), &table(), &reading(), 1).err().unwrap();
        assert!(matches!(err, GearError::Construction { stage: GearStage::Model, .. }));
    }

    #[tokio::test]
    async fn dropping_guard_aborts_pump() {
        let gear = TestGear::new().model(|_| Ok(stream::pending().boxed()));
        let Spin { table, pump } = activate(&gear, 0);
        let mut plain = table.subscribe_tooth("plain");

        let guard = PumpGuard::spawn(1, pump);
        assert_eq!(guard.generation(), 1);
        tokio::task::yield_now().await;
        assert!(plain.next().now_or_never().is_none());

        drop(guard);
        assert_eq!(plain.next().await, None);
    }

    #[tokio::test]
    async fn finish_waits_for_pump() {
        let seen = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&seen);
        let pump = async move {
            tokio::task::yield_now().await;
            flag.store(true, Ordering::SeqCst);
        }
        .boxed();
        PumpGuard::spawn(1, pump).finish().await;
        assert!(seen.load(Ordering::SeqCst));
    }
}
