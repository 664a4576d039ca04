use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use derive_ex::derive_ex;
use tracing::{debug, trace};

use crate::{
    await_cell::Entry,
    core::SignalContext,
    effect_fn::{effect_pausable, EffectPause},
    watch_with, AwaitCell, AwaitOptions, Cleanup, Operation, Snapshot,
    SnapshotSignal, State, Subscription,
};

#[cfg(test)]
mod tests;

/// An [`AwaitCell`] re-run whenever its dependencies change.
///
/// The cell is pending until the watch first supplies an operation.
#[derive_ex(Clone, bound())]
pub struct AwaitWatch<T: 'static, E: 'static> {
    cell: AwaitCell<T, E>,
    controls: WatchControls,
}

impl<T, E> AwaitWatch<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    /// Watches `deps`, calling `handle(new, old, cleanup)` on every change and tracking the operation it returns.
    ///
    /// `handle` is called immediately with no old value,
    /// unless `jump_first` is set, in which case that first call is skipped.
    pub fn new<D: 'static>(
        deps: impl FnMut(&mut SignalContext) -> D + 'static,
        handle: impl FnMut(&D, Option<&D>, &mut Cleanup) -> Operation<T, E> + 'static,
        options: AwaitOptions<T, E>,
    ) -> Self {
        let jump_first = options.jump_first;
        let cell = AwaitCell::with_entry(Entry::Deferred, options);
        let update_flag = State::new(false);
        let deps = Rc::new(RefCell::new(deps));
        let handle = Rc::new(RefCell::new(handle));
        let first = Rc::new(Cell::new(true));
        let start = {
            let cell = cell.clone();
            let update_flag = update_flag.clone();
            move |immediate: bool| {
                let deps = deps.clone();
                let handle = handle.clone();
                let cell = cell.clone();
                let first = first.clone();
                let update_flag = update_flag.clone();
                watch_with(
                    move |sc| {
                        update_flag.get(sc);
                        (*deps.borrow_mut())(sc)
                    },
                    move |new: &D, old, cleanup| {
                        if first.replace(false) && jump_first {
                            trace!("skip first watch call");
                            return;
                        }
                        let op = (*handle.borrow_mut())(new, old, cleanup);
                        cell.set(op);
                    },
                    immediate,
                )
            }
        };
        let watcher = Watcher::Watch {
            subscription: RefCell::new(Some(start(true))),
            start: Box::new(start),
        };
        Self::build(cell, update_flag, watcher)
    }

    /// Runs `handle` on every change of the dependencies it reads, tracking the operation it returns.
    ///
    /// `handle` is first called on the next [`Runtime::update`](crate::core::Runtime::update).
    /// `jump_first` is ignored.
    pub fn new_effect(
        mut handle: impl FnMut(&mut SignalContext, &mut Cleanup) -> Operation<T, E> + 'static,
        options: AwaitOptions<T, E>,
    ) -> Self {
        let cell = AwaitCell::with_entry(Entry::Deferred, options.jump_first(false));
        let update_flag = State::new(false);
        let (subscription, pause) = {
            let cell = cell.clone();
            let update_flag = update_flag.clone();
            effect_pausable(move |sc, cleanup| {
                update_flag.get(sc);
                let op = handle(sc, cleanup);
                cell.set(op);
            })
        };
        let watcher = Watcher::Effect {
            pause,
            is_paused: Cell::new(false),
            _subscription: subscription,
        };
        Self::build(cell, update_flag, watcher)
    }

    fn build(cell: AwaitCell<T, E>, update_flag: State<bool>, watcher: Watcher) -> Self {
        let controls = WatchControls(Rc::new(ControlsInner {
            is_first: {
                let cell = cell.clone();
                Box::new(move || cell.is_first())
            },
            update_flag,
            is_watching: State::new(true),
            watcher,
        }));
        Self { cell, controls }
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
    pub fn controls(&self) -> &WatchControls {
        &self.controls
    }
}

/// Controls of an [`AwaitWatch`].
#[derive(Clone)]
pub struct WatchControls(Rc<ControlsInner>);

struct ControlsInner {
    is_first: Box<dyn Fn() -> bool>,
    update_flag: State<bool>,
    is_watching: State<bool>,
    watcher: Watcher,
}

enum Watcher {
    /// Dropped by `un_watch` and registered again, without an immediate call, by `re_watch`.
    Watch {
        start: Box<dyn Fn(bool) -> Subscription>,
        subscription: RefCell<Option<Subscription>>,
    },
    /// Paused by `un_watch`, keeping its dependencies.
    Effect {
        pause: EffectPause,
        is_paused: Cell<bool>,
        _subscription: Subscription,
    },
}

impl Watcher {
    /// Returns `false` if already stopped.
    fn stop(&self) -> bool {
        match self {
            Watcher::Watch { subscription, .. } => {
                let s = subscription.borrow_mut().take();
                s.is_some()
            }
            Watcher::Effect {
                pause, is_paused, ..
            } => {
                if is_paused.replace(true) {
                    return false;
                }
                pause.pause();
                true
            }
        }
    }

    /// Returns `false` if already running.
    fn resume(&self) -> bool {
        match self {
            Watcher::Watch {
                start,
                subscription,
            } => {
                if subscription.borrow().is_some() {
                    return false;
                }
                let s = start(false);
                *subscription.borrow_mut() = Some(s);
                true
            }
            Watcher::Effect {
                pause, is_paused, ..
            } => {
                if !is_paused.replace(false) {
                    return false;
                }
                pause.resume();
                true
            }
        }
    }
}

impl WatchControls {
    /// Re-runs the handler on the next update, as if a dependency had changed.
    ///
    /// Does nothing until the first settlement has been published.
    pub fn update(&self) {
        if (self.0.is_first)() {
            trace!("update ignored before the first settlement");
            return;
        }
        self.0.update_flag.update_deferred(|f| *f = !*f);
    }

    /// Stops watching. Changes made while stopped are not replayed by [`re_watch`](Self::re_watch).
    pub fn un_watch(&self) {
        if self.0.watcher.stop() {
            debug!("stop watching");
            self.0.is_watching.set_deferred(false);
        }
    }

    /// Starts watching again after [`un_watch`](Self::un_watch).
    pub fn re_watch(&self) {
        if self.0.watcher.resume() {
            debug!("resume watching");
            self.0.is_watching.set_deferred(true);
        }
    }

    /// Whether the dependencies are being watched. Adds a dependency to the specified `SignalContext`.
    pub fn is_watching(&self, sc: &mut SignalContext) -> bool {
        self.0.is_watching.get(sc)
    }
}
