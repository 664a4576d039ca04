use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    marker::PhantomData,
    rc::Rc,
};

use derive_ex::derive_ex;
use tracing::debug;

use crate::{
    core::SignalContext, watch_immediate, AwaitState, Snapshot, SnapshotSignal, Subscription, Trigger,
};

#[cfg(test)]
mod tests;

/// A request to run the reducer registered under `kind`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action<P> {
    pub kind: String,
    pub payload: P,
}

impl<P> Action<P> {
    pub fn new(kind: impl Into<String>, payload: P) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// Arguments passed to a reducer.
#[derive(Debug)]
pub struct ReducerArgs<P, RD> {
    pub kind: String,
    pub payload: P,
    /// Last value of the dependencies registered for `kind`, or `None` if there are none.
    pub deps: Option<RD>,
}

type Reducer<P, RD, A, E> = Box<dyn Fn(ReducerArgs<P, RD>) -> Trigger<A, E>>;
type DepsGetter<RD> = Box<dyn FnMut(&mut SignalContext) -> RD>;

/// Reducers of an [`AwaitReducer`], keyed by action kind.
pub struct Reducers<P: 'static, RD: 'static, A: 'static, E: 'static> {
    reducers: BTreeMap<String, Reducer<P, RD, A, E>>,
    deps: BTreeMap<String, DepsGetter<RD>>,
}

impl<P: 'static, RD: 'static, A: 'static, E: 'static> Reducers<P, RD, A, E> {
    pub fn new() -> Self {
        Self {
            reducers: BTreeMap::new(),
            deps: BTreeMap::new(),
        }
    }

    /// Registers the reducer for actions of `kind`.
    pub fn reducer(
        mut self,
        kind: impl Into<String>,
        f: impl Fn(ReducerArgs<P, RD>) -> Trigger<A, E> + 'static,
    ) -> Self {
        self.reducers.insert(kind.into(), Box::new(f));
        self
    }

    /// Registers dependencies watched for actions of `kind`.
    pub fn deps(
        mut self,
        kind: impl Into<String>,
        f: impl FnMut(&mut SignalContext) -> RD + 'static,
    ) -> Self {
        self.deps.insert(kind.into(), Box::new(f));
        self
    }
}
impl<P: 'static, RD: 'static, A: 'static, E: 'static> Default for Reducers<P, RD, A, E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates [`Action`]s of a fixed kind.
#[derive_ex(Clone, bound())]
pub struct ActionCreator<P> {
    kind: Rc<str>,
    _phantom: PhantomData<fn(P)>,
}

impl<P> ActionCreator<P> {
    pub fn kind(&self) -> &str {
        &self.kind
    }
    pub fn create(&self, payload: P) -> Action<P> {
        Action::new(&*self.kind, payload)
    }
}

/// An [`ActionCreator`] for every registered reducer.
#[derive_ex(Clone, bound())]
pub struct Actions<P>(Rc<BTreeMap<String, ActionCreator<P>>>);

impl<P> Actions<P> {
    pub fn get(&self, kind: &str) -> Option<&ActionCreator<P>> {
        self.0.get(kind)
    }
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// An [`AwaitState`] driven by named actions.
#[derive_ex(Clone, bound())]
pub struct AwaitReducer<T: 'static, E: 'static, D: 'static, A: 'static, P: 'static, RD: 'static> {
    state: AwaitState<T, E, D, A>,
    inner: Rc<ReducerInner<P, RD, A, E>>,
    actions: Actions<P>,
}

struct ReducerInner<P: 'static, RD: 'static, A: 'static, E: 'static> {
    reducers: BTreeMap<String, Reducer<P, RD, A, E>>,
    deps: Rc<RefCell<HashMap<String, RD>>>,
    _watches: Vec<Subscription>,
}

impl<T, E, D, A, P, RD> AwaitReducer<T, E, D, A, P, RD>
where
    T: Clone + 'static,
    E: Clone + 'static,
    D: 'static,
    A: Clone + 'static,
    P: 'static,
    RD: Clone + 'static,
{
    pub fn new(state: AwaitState<T, E, D, A>, reducers: Reducers<P, RD, A, E>) -> Self {
        let Reducers {
            reducers,
            deps: getters,
        } = reducers;
        let deps = Rc::new(RefCell::new(HashMap::new()));
        let mut watches = Vec::new();
        for (kind, getter) in getters {
            let d = deps.clone();
            watches.push(watch_immediate(getter, move |value: &RD, _, _| {
                d.borrow_mut().insert(kind.clone(), value.clone());
            }));
        }
        let actions = reducers
            .keys()
            .map(|kind| {
                let creator = ActionCreator {
                    kind: kind.as_str().into(),
                    _phantom: PhantomData,
                };
                (kind.clone(), creator)
            })
            .collect();
        Self {
            state,
            inner: Rc::new(ReducerInner {
                reducers,
                deps,
                _watches: watches,
            }),
            actions: Actions(Rc::new(actions)),
        }
    }

    /// Same as [`new`](Self::new), with reducers built by `f`, which is called exactly once.
    pub fn from_factory(
        state: AwaitState<T, E, D, A>,
        f: impl FnOnce() -> Reducers<P, RD, A, E>,
    ) -> Self {
        Self::new(state, f())
    }

    /// Runs the reducer for `action` and passes its result to [`AwaitState::set_resolve`].
    ///
    /// `None` re-runs the handler without an argument.
    /// An action of an unregistered kind is ignored.
    pub fn dispatch(&self, action: impl Into<Option<Action<P>>>) {
        let Some(Action { kind, payload }) = action.into() else {
            self.state.set_resolve(Trigger::Refresh);
            return;
        };
        let Some(reducer) = self.inner.reducers.get(&kind) else {
            debug!(kind = %kind, "ignore action without reducer");
            return;
        };
        let deps = self.inner.deps.borrow().get(&kind).cloned();
        let trigger = reducer(ReducerArgs {
            kind,
            payload,
            deps,
        });
        self.state.set_resolve(trigger);
    }

    pub fn actions(&self) -> &Actions<P> {
        &self.actions
    }

    /// Returns the last published snapshot and adds a dependency to the specified `SignalContext`.
    pub fn get(&self, sc: &mut SignalContext) -> Rc<Snapshot<T, E>> {
        self.state.get(sc)
    }
    pub fn to_signal(&self) -> SnapshotSignal<T, E> {
        self.state.to_signal()
    }
    pub fn is_first(&self) -> bool {
        self.state.is_first()
    }
}
