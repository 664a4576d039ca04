use std::{
    cell::{Ref, RefCell},
    mem::replace,
    rc::Rc,
};

use derive_ex::derive_ex;
use serde::{Deserialize, Serialize};

use crate::core::{
    schedule_notify, ActionContext, BindKey, BindSink, BindSource, NotifyContext, SignalContext,
    SinkBindings,
};


/// A shared value whose readers are re-run when it is written.
///
/// Adapters use it for their internal flags; applications use it for the inputs their operations depend on.
#[derive(Default)]
#[derive_ex(Clone, bound())]
pub struct State<T: 'static>(Rc<StateNode<T>>);

impl<T: 'static> State<T> {
    pub fn new(value: T) -> Self {
        Self(Rc::new(StateNode {
            sinks: RefCell::new(SinkBindings::new()),
            value: RefCell::new(value),
        }))
    }

    /// Borrows the value, adding a dependency to the specified `SignalContext`.
    pub fn borrow<'a>(&'a self, sc: &mut SignalContext) -> Ref<'a, T> {
        self.0.sinks.borrow_mut().bind(self.0.clone(), sc);
        self.0.value.borrow()
    }

    /// Clones the value, adding a dependency to the specified `SignalContext`.
    pub fn get(&self, sc: &mut SignalContext) -> T
    where
        T: Clone,
    {
        self.borrow(sc).clone()
    }

    /// Replaces the value and notifies the readers.
    pub fn set(&self, value: T, ac: &mut ActionContext) {
        self.replace(value, ac);
    }

    /// Replaces the value, notifies the readers and returns the old value.
    pub fn replace(&self, value: T, ac: &mut ActionContext) -> T {
        let old = replace(&mut *self.0.value.borrow_mut(), value);
        self.0.changed(ac.nc());
        old
    }

    /// Same as [`set`](Self::set), but readers are not notified if `value` equals the current value.
    pub fn set_dedup(&self, value: T, ac: &mut ActionContext)
    where
        T: PartialEq,
    {
        let changed = {
            let mut current = self.0.value.borrow_mut();
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        };
        if changed {
            self.0.changed(ac.nc());
        }
    }

    /// Replaces the value without an [`ActionContext`].
    ///
    /// Readers are notified on the next [`Runtime::update`](crate::core::Runtime::update).
    pub fn set_deferred(&self, value: T) {
        self.update_deferred(|v| *v = value);
    }

    /// Modifies the value in place without an [`ActionContext`].
    ///
    /// Readers are notified on the next [`Runtime::update`](crate::core::Runtime::update).
    pub fn update_deferred(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.0.value.borrow_mut());
        let node = Rc::downgrade(&self.0);
        schedule_notify(node);
    }
}
impl<T: std::fmt::Debug> std::fmt::Debug for State<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.value.try_borrow() {
            Ok(value) => std::fmt::Debug::fmt(&*value, f),
            Err(_) => f.write_str("<borrowed>"),
        }
    }
}
impl<T: Serialize> Serialize for State<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let value = self
            .0
            .value
            .try_borrow()
            .map_err(|_| <S::Error as serde::ser::Error>::custom("state is mutably borrowed"))?;
        value.serialize(serializer)
    }
}
impl<'de, T: Deserialize<'de>> Deserialize<'de> for State<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(State::new(T::deserialize(deserializer)?))
    }
}

#[derive(Default)]
struct StateNode<T: 'static> {
    sinks: RefCell<SinkBindings>,
    value: RefCell<T>,
}
impl<T: 'static> StateNode<T> {
    fn changed(&self, nc: &mut NotifyContext) {
        SinkBindings::notify(&self.sinks, nc)
    }
}

impl<T: 'static> BindSource for StateNode<T> {
    fn unbind(self: Rc<Self>, key: BindKey) {
        if let Ok(mut sinks) = self.sinks.try_borrow_mut() {
            sinks.unbind(key);
        }
    }
}
impl<T: 'static> BindSink for StateNode<T> {
    fn notify(self: Rc<Self>, nc: &mut NotifyContext) {
        self.changed(nc);
    }
}
