use crate::{
    core::SignalContext, effect, watch, AwaitCell, Operation, Snapshot, SnapshotSignal,
    Subscription,
};

#[cfg(test)]
mod tests;

/// Renders a snapshot signal through a slot function.
///
/// The slot is called on the next update, then again each time a new snapshot is published.
/// Dropping the view stops the calls.
#[derive(Debug)]
pub struct AwaitView {
    _effect: Subscription,
}

impl AwaitView {
    pub fn new<T, E>(signal: SnapshotSignal<T, E>, mut slot: impl FnMut(&Snapshot<T, E>) + 'static) -> Self
    where
        T: Clone + 'static,
        E: Clone + 'static,
    {
        Self {
            _effect: effect(move |sc| slot(&signal.get(sc))),
        }
    }
}

/// Supplies `cell` with each new operation returned by `source`.
///
/// The operation returned when the binding is created is not supplied.
/// `None` is ignored.
pub fn bind_resolve<T, E>(
    cell: &AwaitCell<T, E>,
    source: impl FnMut(&mut SignalContext) -> Option<Operation<T, E>> + 'static,
) -> Subscription
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    let cell = cell.clone();
    watch(source, move |op, _, _| {
        cell.set(op.clone());
    })
}
