use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::{Rc, Weak},
    time::Duration,
};

use derive_ex::derive_ex;
use tracing::{debug, trace};

use crate::{
    core::{
        schedule_notify, spawn_local, BindKey, BindSink, BindSource, NotifyContext, SignalContext,
        SinkBindings,
    },
    operation::{Operation, OperationId, OperationTable},
    utils::timer::sleep,
    Snapshot, Status,
};


/// Delay between the settlement of an operation and its publication, unless configured otherwise.
pub const DEFAULT_DELAY: Duration = Duration::from_millis(300);

/// Configuration of an [`AwaitCell`] and of the adapters built on it.
pub struct AwaitOptions<T: 'static, E: 'static> {
    pub(crate) init: T,
    pub(crate) delay: Duration,
    pub(crate) jump_first: bool,
    pub(crate) callbacks: Callbacks<T, E>,
}

impl<T: 'static, E: 'static> AwaitOptions<T, E> {
    /// Options with `init` as the value published before anything has resolved.
    pub fn new(init: T) -> Self {
        Self {
            init,
            delay: DEFAULT_DELAY,
            jump_first: false,
            callbacks: Callbacks::new(),
        }
    }

    /// Time to wait after an operation settles before publishing the result.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Start already resolved with the initial value, skipping the first pending phase.
    pub fn jump_first(mut self, jump_first: bool) -> Self {
        self.jump_first = jump_first;
        self
    }

    /// Called with the current `first` flag when an operation starts being tracked.
    pub fn on_start(mut self, f: impl Fn(bool) + 'static) -> Self {
        self.callbacks.on_start = Some(Rc::new(f));
        self
    }

    /// Called with the value when a successful operation is published.
    pub fn on_end(mut self, f: impl Fn(&T) + 'static) -> Self {
        self.callbacks.on_end = Some(Rc::new(f));
        self
    }

    /// Called with the error when a failed operation is published.
    pub fn on_error(mut self, f: impl Fn(&E) + 'static) -> Self {
        self.callbacks.on_error = Some(Rc::new(f));
        self
    }

    /// Called after `on_end` or `on_error`, with the `first` flag as it was before the publication.
    pub fn on_final(mut self, f: impl Fn(bool) + 'static) -> Self {
        self.callbacks.on_final = Some(Rc::new(f));
        self
    }
}

#[derive_ex(Clone, bound())]
pub(crate) struct Callbacks<T: 'static, E: 'static> {
    on_start: Option<Rc<dyn Fn(bool)>>,
    on_end: Option<Rc<dyn Fn(&T)>>,
    on_error: Option<Rc<dyn Fn(&E)>>,
    on_final: Option<Rc<dyn Fn(bool)>>,
}
impl<T: 'static, E: 'static> Callbacks<T, E> {
    fn new() -> Self {
        Self {
            on_start: None,
            on_end: None,
            on_error: None,
            on_final: None,
        }
    }
}

/// How a cell starts out.
pub(crate) enum Entry<T: 'static, E: 'static> {
    /// Not an operation: settled with the initial value.
    Value,
    Operation(Operation<T, E>),
    /// Pending until an operation is supplied by the owner.
    Deferred,
}

/// Reactive cell tracking the result of the most recently supplied [`Operation`].
///
/// Reading the cell with [`get`](Self::get) returns the last published [`Snapshot`] and registers a dependency.
/// Writing an operation with [`set`](Self::set) starts tracking it:
/// when it settles, the result is published after the configured delay,
/// unless another operation has been supplied in the meantime.
#[derive_ex(Clone, bound())]
pub struct AwaitCell<T: 'static, E: 'static>(Rc<AwaitNode<T, E>>);

impl<T, E> AwaitCell<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    /// Create a cell tracking `resolve`.
    ///
    /// If `resolve` is `None`, the cell starts resolved with the initial value.
    pub fn new(resolve: Option<Operation<T, E>>, options: AwaitOptions<T, E>) -> Self {
        let entry = match resolve {
            Some(op) => Entry::Operation(op),
            None => Entry::Value,
        };
        Self::with_entry(entry, options)
    }

    pub(crate) fn with_entry(entry: Entry<T, E>, options: AwaitOptions<T, E>) -> Self {
        let AwaitOptions {
            init,
            delay,
            jump_first,
            callbacks,
        } = options;
        let node = Rc::new(AwaitNode {
            data: RefCell::new(AwaitData {
                status: Status::Pending,
                first: true,
                data: init.clone(),
                error: None,
                current: None,
                snapshot: None,
                operations: OperationTable::new(),
                cancels: HashMap::new(),
            }),
            sinks: RefCell::new(SinkBindings::new()),
            callbacks,
            delay,
        });
        if jump_first {
            let op = Operation::resolved(init.clone());
            {
                let mut d = node.data.borrow_mut();
                d.operations.track(&op);
                d.operations.settle(&op, Ok(init));
            }
            node.supply(op);
        } else {
            match entry {
                Entry::Value => {
                    let mut d = node.data.borrow_mut();
                    d.first = false;
                    d.status = Status::Resolved;
                }
                Entry::Operation(op) => {
                    node.supply(op);
                }
                Entry::Deferred => {}
            }
        }
        Self(node)
    }

    /// Returns the last published snapshot and adds a dependency on this cell to the specified `SignalContext`.
    pub fn get(&self, sc: &mut SignalContext) -> Rc<Snapshot<T, E>> {
        self.0.sinks.borrow_mut().bind(self.0.clone(), sc);
        self.0.snapshot()
    }

    /// Supplies a new operation.
    ///
    /// Returns `false` and does nothing if `resolve` is `None` or is the operation already being tracked.
    /// An operation that has already settled in this cell is published again immediately,
    /// without delay and without calling the callbacks.
    pub fn set(&self, resolve: impl Into<Option<Operation<T, E>>>) -> bool {
        let Some(op) = resolve.into() else {
            return false;
        };
        let accepted = self.0.supply(op);
        if accepted {
            let node = Rc::downgrade(&self.0);
            schedule_notify(node);
        }
        accepted
    }

    /// Whether no settlement has been published yet. Does not add a dependency.
    pub fn is_first(&self) -> bool {
        self.0.data.borrow().first
    }

    /// Returns a read-only view of this cell.
    pub fn to_signal(&self) -> SnapshotSignal<T, E> {
        SnapshotSignal(self.clone())
    }
}

/// Read-only view of an [`AwaitCell`].
#[derive_ex(Clone, bound())]
pub struct SnapshotSignal<T: 'static, E: 'static>(AwaitCell<T, E>);

impl<T, E> SnapshotSignal<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    /// Returns the last published snapshot and adds a dependency to the specified `SignalContext`.
    pub fn get(&self, sc: &mut SignalContext) -> Rc<Snapshot<T, E>> {
        self.0.get(sc)
    }
    pub fn is_first(&self) -> bool {
        self.0.is_first()
    }
}

#[derive(Clone)]
struct CancelToken(Rc<Cell<bool>>);

impl CancelToken {
    fn new() -> Self {
        Self(Rc::new(Cell::new(true)))
    }
    fn cancel(&self) {
        self.0.set(false);
    }
    fn is_active(&self) -> bool {
        self.0.get()
    }
}

struct AwaitData<T: 'static, E: 'static> {
    status: Status,
    first: bool,
    data: T,
    error: Option<E>,
    current: Option<Operation<T, E>>,
    snapshot: Option<Rc<Snapshot<T, E>>>,
    operations: OperationTable<T, E>,
    cancels: HashMap<OperationId, CancelToken>,
}
impl<T: Clone + 'static, E: Clone + 'static> AwaitData<T, E> {
    fn apply(&mut self, result: &Result<T, E>) {
        match result {
            Ok(value) => {
                self.status = Status::Resolved;
                self.data = value.clone();
                self.error = None;
            }
            Err(e) => {
                self.status = Status::Rejected;
                self.error = Some(e.clone());
            }
        }
        self.snapshot = None;
    }
}

struct AwaitNode<T: 'static, E: 'static> {
    data: RefCell<AwaitData<T, E>>,
    sinks: RefCell<SinkBindings>,
    callbacks: Callbacks<T, E>,
    delay: Duration,
}

impl<T, E> AwaitNode<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    fn snapshot(&self) -> Rc<Snapshot<T, E>> {
        let d = &mut *self.data.borrow_mut();
        d.snapshot
            .get_or_insert_with(|| {
                Rc::new(Snapshot {
                    first: d.first,
                    status: d.status,
                    data: d.data.clone(),
                    error: d.error.clone(),
                })
            })
            .clone()
    }

    fn supply(self: &Rc<Self>, op: Operation<T, E>) -> bool {
        let first = {
            let d = &mut *self.data.borrow_mut();
            if let Some(current) = &d.current {
                if current.ptr_eq(&op) {
                    return false;
                }
                if let Some(token) = d.cancels.remove(&current.id()) {
                    debug!(op = %current.id(), by = %op.id(), "operation superseded");
                    token.cancel();
                }
            }
            if let Some(result) = d.operations.settled(&op).cloned() {
                trace!(op = %op.id(), "replay settled operation");
                d.current = Some(op);
                d.apply(&result);
                d.first = false;
                return true;
            }
            if d.operations.track(&op) {
                trace!(op = %op.id(), "track operation");
            } else {
                trace!(op = %op.id(), "resume tracking operation");
            }
            let token = CancelToken::new();
            d.cancels.insert(op.id(), token.clone());
            d.current = Some(op.clone());
            d.status = Status::Pending;
            d.error = None;
            d.snapshot = None;
            spawn_local(Self::settle(Rc::downgrade(self), op, token));
            d.first
        };
        if let Some(f) = &self.callbacks.on_start {
            f(first);
        }
        true
    }

    async fn settle(this: Weak<Self>, op: Operation<T, E>, token: CancelToken) {
        let result = op.clone().await;
        let delay = {
            let Some(this) = this.upgrade() else {
                return;
            };
            this.data.borrow_mut().operations.settle(&op, result.clone());
            this.delay
        };
        sleep(delay).await;
        if !token.is_active() {
            trace!(op = %op.id(), "drop stale settlement");
            return;
        }
        if let Some(this) = this.upgrade() {
            this.publish(&op, &result);
        }
    }

    fn publish(self: &Rc<Self>, op: &Operation<T, E>, result: &Result<T, E>) {
        let first = {
            let d = &mut *self.data.borrow_mut();
            d.cancels.remove(&op.id());
            d.apply(result);
            debug!(op = %op.id(), status = %d.status, "publish settlement");
            let first = d.first;
            d.first = false;
            first
        };
        match result {
            Ok(value) => {
                if let Some(f) = &self.callbacks.on_end {
                    f(value);
                }
            }
            Err(e) => {
                if let Some(f) = &self.callbacks.on_error {
                    f(e);
                }
            }
        }
        if let Some(f) = &self.callbacks.on_final {
            f(first);
        }
        let node = Rc::downgrade(self);
        schedule_notify(node);
    }
}

impl<T: 'static, E: 'static> BindSource for AwaitNode<T, E> {
    fn unbind(self: Rc<Self>, key: BindKey) {
        if let Ok(mut sinks) = self.sinks.try_borrow_mut() {
            sinks.unbind(key);
        }
    }
}
impl<T: 'static, E: 'static> BindSink for AwaitNode<T, E> {
    fn notify(self: Rc<Self>, nc: &mut NotifyContext) {
        SinkBindings::notify(&self.sinks, nc);
    }
}
