use std::{
    cell::{Cell, RefCell},
    mem::take,
    rc::{Rc, Weak},
};

use crate::{
    core::{BindSink, NotifyContext, SignalContext, SourceBindings, Task},
    Subscription,
};


/// Functions registered to run before the next invocation of a watch or effect, and when it is dropped.
#[derive(Default)]
pub struct Cleanup(Vec<Box<dyn FnOnce()>>);

impl Cleanup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `f` to run before the next invocation, or when the owner is dropped.
    pub fn on_cleanup(&mut self, f: impl FnOnce() + 'static) {
        self.0.push(Box::new(f));
    }

    fn run(&mut self) {
        for f in take(&mut self.0) {
            f();
        }
    }
}
impl Drop for Cleanup {
    fn drop(&mut self) {
        self.run();
    }
}

/// Call a function each time a dependency changes.
///
/// The function is first called on the next [`Runtime::update`](crate::core::Runtime::update),
/// then again on every update after a dependency has changed.
///
/// If the [`Subscription`] returned from this function is dropped, the function will not be called again.
pub fn effect(mut f: impl FnMut(&mut SignalContext) + 'static) -> Subscription {
    effect_with_cleanup(move |sc, _| f(sc))
}

/// Same as [`effect`], with a [`Cleanup`] that is run before each re-run and when the effect is dropped.
pub fn effect_with_cleanup(f: impl FnMut(&mut SignalContext, &mut Cleanup) + 'static) -> Subscription {
    let node = EffectNode::new(f);
    node.schedule();
    Subscription::from_rc(node)
}

/// Same as [`effect_with_cleanup`], with an [`EffectPause`] that stops and resumes it.
pub(crate) fn effect_pausable(
    f: impl FnMut(&mut SignalContext, &mut Cleanup) + 'static,
) -> (Subscription, EffectPause) {
    let node = EffectNode::new(f);
    node.schedule();
    let pause = Rc::downgrade(&node) as Weak<dyn Pausable>;
    (Subscription::from_rc(node), EffectPause(pause))
}

/// Pauses an effect while keeping its dependencies.
///
/// Notifications received while paused are dropped.
/// A run that was already due when the effect was paused happens after it resumes.
pub(crate) struct EffectPause(Weak<dyn Pausable>);

impl EffectPause {
    pub fn pause(&self) {
        if let Some(node) = self.0.upgrade() {
            node.set_paused(true);
        }
    }
    pub fn resume(&self) {
        if let Some(node) = self.0.upgrade() {
            node.set_paused(false);
        }
    }
}

trait Pausable: 'static {
    fn set_paused(self: Rc<Self>, paused: bool);
}

struct EffectData<F> {
    f: F,
    sources: SourceBindings,
    cleanup: Cleanup,
}

struct EffectNode<F> {
    is_dirty: Cell<bool>,
    is_paused: Cell<bool>,
    data: RefCell<EffectData<F>>,
}
impl<F> EffectNode<F>
where
    F: FnMut(&mut SignalContext, &mut Cleanup) + 'static,
{
    fn new(f: F) -> Rc<Self> {
        Rc::new(Self {
            is_dirty: Cell::new(true),
            is_paused: Cell::new(false),
            data: RefCell::new(EffectData {
                f,
                sources: SourceBindings::new(),
                cleanup: Cleanup::new(),
            }),
        })
    }

    fn schedule(self: &Rc<Self>) {
        Task::from_weak_fn(Rc::downgrade(self), Self::call).schedule()
    }
    fn call(self: Rc<Self>) {
        if self.is_paused.get() || !self.is_dirty.replace(false) {
            return;
        }
        let sink = Rc::downgrade(&self) as Weak<dyn BindSink>;
        let d = &mut *self.data.borrow_mut();
        d.cleanup.run();
        let cleanup = &mut d.cleanup;
        let f = &mut d.f;
        d.sources.update(sink, |sc| f(sc, cleanup));
    }
}

impl<F> BindSink for EffectNode<F>
where
    F: FnMut(&mut SignalContext, &mut Cleanup) + 'static,
{
    fn notify(self: Rc<Self>, _nc: &mut NotifyContext) {
        if self.is_paused.get() {
            return;
        }
        if !self.is_dirty.replace(true) {
            self.schedule();
        }
    }
}
impl<F> Pausable for EffectNode<F>
where
    F: FnMut(&mut SignalContext, &mut Cleanup) + 'static,
{
    fn set_paused(self: Rc<Self>, paused: bool) {
        self.is_paused.set(paused);
        if !paused && self.is_dirty.get() {
            self.schedule();
        }
    }
}

/// Watch the value returned by `deps`, calling `f(new, old, cleanup)` each time a dependency changes.
///
/// `deps` is evaluated immediately to collect the dependencies, but `f` is not called until they change.
pub fn watch<D: 'static>(
    deps: impl FnMut(&mut SignalContext) -> D + 'static,
    f: impl FnMut(&D, Option<&D>, &mut Cleanup) + 'static,
) -> Subscription {
    watch_with(deps, f, false)
}

/// Same as [`watch`], but `f` is also called immediately, with no old value.
pub fn watch_immediate<D: 'static>(
    deps: impl FnMut(&mut SignalContext) -> D + 'static,
    f: impl FnMut(&D, Option<&D>, &mut Cleanup) + 'static,
) -> Subscription {
    watch_with(deps, f, true)
}

/// [`watch`] or [`watch_immediate`], chosen at runtime.
pub fn watch_with<D, G, F>(deps: G, f: F, immediate: bool) -> Subscription
where
    D: 'static,
    G: FnMut(&mut SignalContext) -> D + 'static,
    F: FnMut(&D, Option<&D>, &mut Cleanup) + 'static,
{
    let node = Rc::new(WatchNode {
        is_dirty: Cell::new(false),
        data: RefCell::new(WatchData {
            deps,
            f,
            sources: SourceBindings::new(),
            value: None,
            cleanup: Cleanup::new(),
        }),
    });
    node.run(immediate);
    Subscription::from_rc(node)
}

struct WatchData<D, G, F> {
    deps: G,
    f: F,
    sources: SourceBindings,
    value: Option<D>,
    cleanup: Cleanup,
}

struct WatchNode<D, G, F> {
    is_dirty: Cell<bool>,
    data: RefCell<WatchData<D, G, F>>,
}
impl<D, G, F> WatchNode<D, G, F>
where
    D: 'static,
    G: FnMut(&mut SignalContext) -> D + 'static,
    F: FnMut(&D, Option<&D>, &mut Cleanup) + 'static,
{
    fn schedule(self: &Rc<Self>) {
        Task::from_weak_fn(Rc::downgrade(self), Self::call).schedule()
    }
    fn call(self: Rc<Self>) {
        if self.is_dirty.replace(false) {
            self.run(true);
        }
    }
    fn run(self: &Rc<Self>, fire: bool) {
        let sink = Rc::downgrade(self) as Weak<dyn BindSink>;
        let d = &mut *self.data.borrow_mut();
        let value = d.sources.update(sink, &mut d.deps);
        if fire {
            d.cleanup.run();
            (d.f)(&value, d.value.as_ref(), &mut d.cleanup);
        }
        d.value = Some(value);
    }
}
impl<D, G, F> BindSink for WatchNode<D, G, F>
where
    D: 'static,
    G: FnMut(&mut SignalContext) -> D + 'static,
    F: FnMut(&D, Option<&D>, &mut Cleanup) + 'static,
{
    fn notify(self: Rc<Self>, _nc: &mut NotifyContext) {
        if !self.is_dirty.replace(true) {
            self.schedule();
        }
    }
}
