use std::{
    any::Any,
    cell::RefCell,
    future::Future,
    mem::{replace, take},
    pin::Pin,
    rc::{Rc, Weak},
    sync::{Arc, Condvar, Mutex, MutexGuard},
    task::{Context, Wake, Waker},
    thread::AccessError,
    time::{Duration, Instant},
};

use derive_ex::derive_ex;
use parse_display::Display;
use slabmap::SlabMap;

use crate::utils::timer::TimerQueue;


thread_local! {
    static GLOBALS: RefCell<Globals> = RefCell::new(Globals::new());
}

struct Globals {
    is_runtime_exists: bool,
    actions: Vec<Action>,
    notifys: Vec<NotifyTask>,
    tasks: Vec<Task>,
    futures: LocalFutures,
    timers: TimerQueue,
}
impl Globals {
    fn new() -> Self {
        Self {
            is_runtime_exists: false,
            actions: Vec::new(),
            notifys: Vec::new(),
            tasks: Vec::new(),
            futures: LocalFutures::new(),
            timers: TimerQueue::new(),
        }
    }
    fn with<T>(f: impl FnOnce(&mut Self) -> T) -> T {
        GLOBALS.with(|g| f(&mut g.borrow_mut()))
    }
    fn try_with<T>(f: impl FnOnce(&mut Self) -> T) -> Result<T, AccessError> {
        GLOBALS.try_with(|g| f(&mut g.borrow_mut()))
    }
    fn assert_exists(&self) {
        if !self.is_runtime_exists {
            panic!("`Runtime` is not created.");
        }
    }
    fn push_action(&mut self, action: Action) {
        self.assert_exists();
        self.actions.push(action);
        self.futures.wakes.notify();
    }
    fn push_notify(&mut self, source: Weak<dyn BindSink>) {
        self.notifys.push(NotifyTask { source });
        self.futures.wakes.notify();
    }
    fn push_task(&mut self, task: Task) {
        self.tasks.push(task);
        self.futures.wakes.notify();
    }

    fn finish_runtime(&mut self) -> Leftovers {
        self.is_runtime_exists = false;
        Leftovers {
            _actions: take(&mut self.actions),
            _notifys: take(&mut self.notifys),
            _tasks: take(&mut self.tasks),
            _futures: self.futures.drain(),
        }
    }
}

pub(crate) fn with_timers<T>(f: impl FnOnce(&mut TimerQueue) -> T) -> T {
    Globals::with(|g| f(&mut g.timers))
}
pub(crate) fn try_with_timers<T>(f: impl FnOnce(&mut TimerQueue) -> T) -> Option<T> {
    GLOBALS
        .try_with(|g| g.try_borrow_mut().ok().map(|mut g| f(&mut g.timers)))
        .ok()
        .flatten()
}

// Dropped outside of `GLOBALS`; a pending `Sleep` removes its timer on drop.
struct Leftovers {
    _actions: Vec<Action>,
    _notifys: Vec<NotifyTask>,
    _tasks: Vec<Task>,
    _futures: Vec<LocalFuture>,
}

/// Error returned by [`Runtime::try_new`].
#[derive(Debug, Display, PartialEq, Eq)]
#[display("only one `Runtime` can exist in the same thread at the same time")]
pub struct RuntimeExistsError {
    _private: (),
}

impl std::error::Error for RuntimeExistsError {}

/// Reactive runtime.
///
/// Drives actions, change notifications, effects, spawned futures and timers of the current thread.
#[derive_ex(Default)]
#[default(Self::new())]
pub struct Runtime {
    ac: ActionContext,
    actions_buffer: Vec<Action>,
    notifys_buffer: Vec<NotifyTask>,
    tasks_buffer: Vec<Task>,
}
impl Runtime {
    /// Create the runtime of the current thread.
    ///
    /// Panics if a `Runtime` already exists in this thread.
    pub fn new() -> Self {
        match Self::try_new() {
            Ok(rt) => rt,
            Err(e) => panic!("{e}"),
        }
    }
    pub fn try_new() -> Result<Self, RuntimeExistsError> {
        if Globals::with(|g| replace(&mut g.is_runtime_exists, true)) {
            return Err(RuntimeExistsError { _private: () });
        }
        Ok(Self {
            ac: ActionContext {
                nc: NotifyContext { _private: () },
            },
            actions_buffer: Vec::new(),
            notifys_buffer: Vec::new(),
            tasks_buffer: Vec::new(),
        })
    }

    pub fn ac(&mut self) -> &mut ActionContext {
        &mut self.ac
    }

    /// Returns a [`SignalContext`] that does not track dependencies.
    ///
    /// Pending notifications are applied first, so the values read are current.
    pub fn sc(&mut self) -> SignalContext<'_> {
        self.apply_notify();
        SignalContext::untracked()
    }

    /// Perform scheduled actions.
    ///
    /// Returns `true` if any action was performed.
    pub fn run_actions(&mut self) -> bool {
        let mut handled = false;
        let mut actions = take(&mut self.actions_buffer);
        while Globals::with(|g| swap_vec(&mut g.actions, &mut actions)) {
            for action in actions.drain(..) {
                action.call(&mut self.ac);
                handled = true;
            }
        }
        self.actions_buffer = actions;
        handled
    }

    fn apply_notify(&mut self) -> bool {
        let mut handled = false;
        let mut notifys = take(&mut self.notifys_buffer);
        while Globals::with(|g| swap_vec(&mut g.notifys, &mut notifys)) {
            for notify in notifys.drain(..) {
                notify.call(&mut self.ac.nc);
                handled = true;
            }
        }
        self.notifys_buffer = notifys;
        handled
    }

    /// Perform scheduled tasks (effects and watches whose dependencies changed).
    ///
    /// Returns `true` if any task was performed.
    pub fn run_tasks(&mut self) -> bool {
        self.apply_notify();
        let mut tasks = take(&mut self.tasks_buffer);
        Globals::with(|g| swap_vec(&mut g.tasks, &mut tasks));
        let handled = !tasks.is_empty();
        for task in tasks.drain(..) {
            task.run();
        }
        self.tasks_buffer = tasks;
        handled
    }

    /// Poll the spawned futures that have been woken.
    ///
    /// Returns `true` if any future was polled.
    pub fn run_futures(&mut self) -> bool {
        let mut keys = Globals::with(|g| g.futures.wakes.take());
        keys.sort_unstable();
        keys.dedup();
        let mut handled = false;
        for key in keys {
            let Some((mut future, waker)) = Globals::with(|g| g.futures.take(key)) else {
                continue;
            };
            handled = true;
            let mut cx = Context::from_waker(&waker);
            if future.as_mut().poll(&mut cx).is_ready() {
                drop(future);
                Globals::with(|g| g.futures.remove(key));
            } else {
                Globals::with(|g| g.futures.restore(key, future));
            }
        }
        handled
    }

    /// Wake the futures waiting for timers that have expired.
    ///
    /// Returns `true` if any timer expired.
    pub fn run_timers(&mut self) -> bool {
        let wakers = Globals::with(|g| g.timers.expire(Instant::now()));
        let handled = !wakers.is_empty();
        for waker in wakers {
            waker.wake();
        }
        handled
    }

    /// Repeat until there are no more processes to do
    /// [`run_actions`](Self::run_actions), [`run_tasks`](Self::run_tasks),
    /// [`run_futures`](Self::run_futures), or [`run_timers`](Self::run_timers).
    pub fn update(&mut self) {
        loop {
            if self.run_actions() {
                continue;
            }
            if self.run_tasks() {
                continue;
            }
            if self.run_futures() {
                continue;
            }
            if self.run_timers() {
                continue;
            }
            break;
        }
    }

    /// Keep calling [`update`](Self::update) for `duration`, sleeping while there is nothing to do.
    pub fn run_for(&mut self, duration: Duration) {
        self.run_until(Instant::now() + duration)
    }

    /// Keep calling [`update`](Self::update) until `deadline`, sleeping while there is nothing to do.
    pub fn run_until(&mut self, deadline: Instant) {
        loop {
            self.update();
            if Instant::now() >= deadline {
                break;
            }
            let next = Globals::with(|g| g.timers.next_instant());
            let until = next.map_or(deadline, |next| next.min(deadline));
            self.park_until(until);
        }
    }

    fn park_until(&self, until: Instant) {
        let wakes = Globals::with(|g| g.futures.wakes.clone());
        let requests = wakes.lock();
        if !requests.keys.is_empty() || requests.notified {
            return;
        }
        let timeout = until.saturating_duration_since(Instant::now());
        let (mut requests, _) = wakes.0.condvar.wait_timeout(requests, timeout).unwrap();
        requests.notified = false;
    }
}
impl Drop for Runtime {
    fn drop(&mut self) {
        let leftovers = Globals::with(|g| g.finish_runtime());
        drop(leftovers);
        let timers = Globals::with(|g| replace(&mut g.timers, TimerQueue::new()));
        drop(timers);
    }
}

fn swap_vec<T>(from: &mut Vec<T>, to: &mut Vec<T>) -> bool {
    std::mem::swap(from, to);
    !to.is_empty()
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct BindKey(usize);

/// A node that can be depended on.
pub trait BindSource: 'static {
    fn unbind(self: Rc<Self>, key: BindKey);
}

/// A node that is told when something it depends on has changed.
pub trait BindSink: 'static {
    fn notify(self: Rc<Self>, nc: &mut NotifyContext);
}

struct SourceBinding {
    source: Rc<dyn BindSource>,
    key: BindKey,
}

/// Dependencies collected by a sink while it was running.
#[derive(Default)]
pub struct SourceBindings(Vec<SourceBinding>);

impl SourceBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` collecting its dependencies, then release the dependencies of the previous run.
    pub fn update<T>(
        &mut self,
        sink: Weak<dyn BindSink>,
        f: impl FnOnce(&mut SignalContext) -> T,
    ) -> T {
        let mut s = Sink {
            sink,
            sources: SourceBindings::new(),
        };
        let ret = f(&mut SignalContext { sink: Some(&mut s) });
        let old = std::mem::replace(self, s.sources);
        drop(old);
        ret
    }
    pub fn clear(&mut self) {
        for b in self.0.drain(..) {
            b.source.unbind(b.key);
        }
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
impl Drop for SourceBindings {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Sinks depending on a source.
#[derive(Default)]
pub struct SinkBindings(SlabMap<Weak<dyn BindSink>>);

impl SinkBindings {
    pub fn new() -> Self {
        Self(SlabMap::new())
    }
    /// Adds a dependency from the sink of `sc` (if any) to `this`.
    pub fn bind(&mut self, this: Rc<dyn BindSource>, sc: &mut SignalContext) {
        let Some(sink) = &mut sc.sink else {
            return;
        };
        let key = BindKey(self.0.insert(sink.sink.clone()));
        sink.sources.0.push(SourceBinding { source: this, key });
    }
    pub fn unbind(&mut self, key: BindKey) {
        self.0.remove(key.0);
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Notify every live sink.
    ///
    /// The bindings are not borrowed while sinks are notified.
    pub fn notify(this: &RefCell<Self>, nc: &mut NotifyContext) {
        let sinks: Vec<_> = this.borrow().0.values().filter_map(Weak::upgrade).collect();
        for sink in sinks {
            sink.notify(nc);
        }
    }
}

struct Sink {
    sink: Weak<dyn BindSink>,
    sources: SourceBindings,
}

/// Context for retrieving state and tracking dependencies.
pub struct SignalContext<'s> {
    sink: Option<&'s mut Sink>,
}

impl<'s> SignalContext<'s> {
    pub(crate) fn untracked() -> Self {
        Self { sink: None }
    }

    /// Call a function with a [`SignalContext`] that does not track dependencies.
    pub fn untrack<T>(&mut self, f: impl FnOnce(&mut SignalContext) -> T) -> T {
        f(&mut SignalContext::untracked())
    }

    pub fn is_tracking(&self) -> bool {
        self.sink.is_some()
    }
}

/// Context for state invalidation notification.
pub struct NotifyContext {
    _private: (),
}

/// Context for changing state.
pub struct ActionContext {
    nc: NotifyContext,
}

impl ActionContext {
    pub fn nc(&mut self) -> &mut NotifyContext {
        &mut self.nc
    }
    pub fn sc(&mut self) -> SignalContext<'_> {
        SignalContext::untracked()
    }
}

/// Schedules a change notification of `source` for the next [`Runtime::update`].
///
/// If [`NotifyContext`] is available, notify directly instead.
pub fn schedule_notify(source: Weak<dyn BindSink>) {
    let _ = Globals::try_with(|g| g.push_notify(source));
}

struct NotifyTask {
    source: Weak<dyn BindSink>,
}
impl NotifyTask {
    fn call(self, nc: &mut NotifyContext) {
        if let Some(source) = self.source.upgrade() {
            source.notify(nc)
        }
    }
}

/// Spawns a new action.
///
/// The action runs on the next [`Runtime::update`] or [`Runtime::run_actions`].
pub fn spawn_action(f: impl FnOnce(&mut ActionContext) + 'static) {
    Globals::with(|g| g.push_action(Action(Box::new(f))))
}

struct Action(Box<dyn FnOnce(&mut ActionContext)>);

impl Action {
    fn call(self, ac: &mut ActionContext) {
        (self.0)(ac)
    }
}

pub struct Task(RawTask);

impl Task {
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Task(RawTask::Box(Box::new(f)))
    }
    pub fn from_weak_fn<T: Any>(this: Weak<T>, f: impl Fn(Rc<T>) + Copy + 'static) -> Self {
        Task(RawTask::Weak {
            this,
            f: Box::new(move |this| {
                if let Some(this) = this.upgrade() {
                    if let Ok(this) = this.downcast() {
                        f(this)
                    }
                }
            }),
        })
    }
    pub fn schedule(self) {
        let _ = Globals::try_with(|g| g.push_task(self));
    }
    fn run(self) {
        match self.0 {
            RawTask::Box(f) => f(),
            RawTask::Weak { this, f } => f(this),
        }
    }
}

enum RawTask {
    Box(Box<dyn FnOnce()>),
    Weak {
        this: Weak<dyn Any>,
        #[allow(clippy::type_complexity)]
        f: Box<dyn Fn(Weak<dyn Any>)>,
    },
}

/// Spawns a future on the runtime of the current thread.
///
/// The future is first polled on the next [`Runtime::update`], and is dropped when it completes or when the runtime is dropped.
pub fn spawn_local(future: impl Future<Output = ()> + 'static) {
    Globals::with(|g| {
        g.assert_exists();
        g.futures.spawn(Box::pin(future))
    })
}

type LocalFuture = Pin<Box<dyn Future<Output = ()>>>;

struct LocalFutureEntry {
    future: Option<LocalFuture>,
    waker: Option<Waker>,
}

struct LocalFutures {
    entries: SlabMap<LocalFutureEntry>,
    wakes: WakeRequests,
}
impl LocalFutures {
    fn new() -> Self {
        Self {
            entries: SlabMap::new(),
            wakes: WakeRequests::default(),
        }
    }
    fn spawn(&mut self, future: LocalFuture) {
        let key = self.entries.insert(LocalFutureEntry {
            future: Some(future),
            waker: None,
        });
        let wakes = self.wakes.clone();
        self.entries[key].waker = Some(Arc::new(RawWake { wakes, key }).into());
        self.wakes.push(key);
    }
    fn take(&mut self, key: usize) -> Option<(LocalFuture, Waker)> {
        let entry = self.entries.get_mut(key)?;
        let waker = entry.waker.clone()?;
        Some((entry.future.take()?, waker))
    }
    fn restore(&mut self, key: usize, future: LocalFuture) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.future = Some(future);
        }
    }
    fn remove(&mut self, key: usize) {
        self.entries.remove(key);
    }
    fn drain(&mut self) -> Vec<LocalFuture> {
        let mut entries = take(&mut self.entries);
        entries.values_mut().filter_map(|e| e.future.take()).collect()
    }
}

#[derive(Clone, Default)]
struct WakeRequests(Arc<WakeShared>);

#[derive(Default)]
struct WakeShared {
    requests: Mutex<RawWakeRequests>,
    condvar: Condvar,
}

#[derive(Default)]
struct RawWakeRequests {
    keys: Vec<usize>,
    notified: bool,
}

impl WakeRequests {
    fn lock(&self) -> MutexGuard<'_, RawWakeRequests> {
        self.0.requests.lock().unwrap()
    }
    fn push(&self, key: usize) {
        self.lock().keys.push(key);
        self.0.condvar.notify_all();
    }
    fn take(&self) -> Vec<usize> {
        let mut requests = self.lock();
        requests.notified = false;
        take(&mut requests.keys)
    }
    fn notify(&self) {
        self.lock().notified = true;
        self.0.condvar.notify_all();
    }
}

struct RawWake {
    wakes: WakeRequests,
    key: usize,
}

impl Wake for RawWake {
    fn wake(self: Arc<Self>) {
        self.wakes.push(self.key);
    }
    fn wake_by_ref(self: &Arc<Self>) {
        self.wakes.push(self.key);
    }
}
