use std::{cell::RefCell, rc::Rc};

use derive_ex::derive_ex;
use tracing::trace;

use crate::{
    core::SignalContext, watch_immediate, AwaitCell, AwaitOptions, Operation, Snapshot, SnapshotSignal,
    Subscription,
};


/// What [`AwaitState::set_resolve`] should run the handler with.
pub enum Trigger<A: 'static, E: 'static> {
    /// Run the handler without an argument.
    Refresh,
    /// Run the handler with a value.
    Value(A),
    /// Run the handler with the value of an operation, once it resolves.
    Operation(Operation<A, E>),
}
impl<A: 'static, E: 'static> From<Operation<A, E>> for Trigger<A, E> {
    fn from(op: Operation<A, E>) -> Self {
        Trigger::Operation(op)
    }
}

/// An [`AwaitCell`] re-run imperatively through [`set_resolve`](Self::set_resolve).
///
/// The handler `handle(deps, arg)` produces the operation to track.
/// `deps` is computed when the state is created and kept up to date while it is alive.
#[derive_ex(Clone, bound())]
pub struct AwaitState<T: 'static, E: 'static, D: 'static, A: 'static> {
    cell: AwaitCell<T, E>,
    inner: Rc<StateInner<T, E, D, A>>,
}

struct StateInner<T: 'static, E: 'static, D: 'static, A: 'static> {
    /// Set when the state is created.
    deps: Rc<RefCell<Option<D>>>,
    #[allow(clippy::type_complexity)]
    handle: Box<dyn Fn(&D, Option<A>) -> Operation<T, E>>,
    _watch: Subscription,
}

impl<T, E, A> AwaitState<T, E, (), A>
where
    T: Clone + 'static,
    E: Clone + 'static,
    A: Clone + 'static,
{
    /// Create a state without dependencies.
    ///
    /// Unless `jump_first` is set, `handle(None)` is tracked immediately.
    pub fn new(
        handle: impl Fn(Option<A>) -> Operation<T, E> + 'static,
        options: AwaitOptions<T, E>,
    ) -> Self {
        Self::build(
            (),
            Subscription::empty(),
            Box::new(move |_: &(), arg: Option<A>| handle(arg)),
            options,
        )
    }
}

impl<T, E, D, A> AwaitState<T, E, D, A>
where
    T: Clone + 'static,
    E: Clone + 'static,
    D: Clone + 'static,
    A: Clone + 'static,
{
    /// Create a state whose handler receives the value of `deps`.
    ///
    /// Unless `jump_first` is set, `handle(deps, None)` is tracked immediately.
    pub fn with_deps(
        deps: impl FnMut(&mut SignalContext) -> D + 'static,
        handle: impl Fn(&D, Option<A>) -> Operation<T, E> + 'static,
        options: AwaitOptions<T, E>,
    ) -> Self {
        let current = Rc::new(RefCell::new(None));
        let c = current.clone();
        let w = watch_immediate(deps, move |value: &D, _, _| {
            *c.borrow_mut() = Some(value.clone());
        });
        Self::build_shared(current, w, Box::new(handle), options)
    }
}

impl<T, E, D, A> AwaitState<T, E, D, A>
where
    T: Clone + 'static,
    E: Clone + 'static,
    D: 'static,
    A: Clone + 'static,
{
    #[allow(clippy::type_complexity)]
    fn build(
        deps: D,
        w: Subscription,
        handle: Box<dyn Fn(&D, Option<A>) -> Operation<T, E>>,
        options: AwaitOptions<T, E>,
    ) -> Self {
        Self::build_shared(Rc::new(RefCell::new(Some(deps))), w, handle, options)
    }

    #[allow(clippy::type_complexity)]
    fn build_shared(
        deps: Rc<RefCell<Option<D>>>,
        w: Subscription,
        handle: Box<dyn Fn(&D, Option<A>) -> Operation<T, E>>,
        options: AwaitOptions<T, E>,
    ) -> Self {
        let inner = Rc::new(StateInner {
            deps,
            handle,
            _watch: w,
        });
        let resolve = if options.jump_first {
            None
        } else {
            Some(inner.call(None))
        };
        let cell = AwaitCell::new(resolve, options);
        Self { cell, inner }
    }

    /// Run the handler again and track the operation it returns.
    ///
    /// Does nothing until the first settlement has been published.
    pub fn set_resolve(&self, trigger: impl Into<Trigger<A, E>>) {
        if self.cell.is_first() {
            trace!("set_resolve ignored before the first settlement");
            return;
        }
        let op = match trigger.into() {
            Trigger::Refresh => self.inner.call(None),
            Trigger::Value(arg) => self.inner.call(Some(arg)),
            Trigger::Operation(op) => {
                let inner = self.inner.clone();
                op.then(move |arg| inner.call(Some(arg)))
            }
        };
        self.cell.set(op);
    }

    /// Same as `set_resolve(Trigger::Refresh)`.
    pub fn refresh(&self) {
        self.set_resolve(Trigger::Refresh)
    }

    /// Returns the last published snapshot and adds a dependency to the specified `SignalContext`.
    pub fn get(&self, sc: &mut SignalContext) -> Rc<Snapshot<T, E>> {
        self.cell.get(sc)
    }
    pub fn to_signal(&self) -> SnapshotSignal<T, E> {
        self.cell.to_signal()
    }
    pub fn is_first(&self) -> bool {
        self.cell.is_first()
    }
}

impl<T: 'static, E: 'static, D: 'static, A: 'static> StateInner<T, E, D, A> {
    fn call(&self, arg: Option<A>) -> Operation<T, E> {
        match &*self.deps.borrow() {
            Some(deps) => (self.handle)(deps, arg),
            None => unreachable!("dependencies are evaluated when the state is created"),
        }
    }
}
