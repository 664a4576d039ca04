//! Reactive tracking of asynchronous results.
//!
//! An [`AwaitCell`] tracks the most recently supplied [`Operation`] and publishes its result as a [`Snapshot`].
//! [`AwaitState`], [`AwaitReducer`] and [`AwaitWatch`] decide when a new operation is started.

pub mod core;

mod await_cell;
mod await_reducer;
mod await_state;
mod await_watch;
mod effect_fn;
mod operation;
mod snapshot;
mod state;
mod subscription;
mod utils;
mod view;

pub use crate::core::{spawn_action, spawn_local, ActionContext, SignalContext};
pub use await_cell::{AwaitCell, AwaitOptions, SnapshotSignal, DEFAULT_DELAY};
pub use await_reducer::*;
pub use await_state::*;
pub use await_watch::*;
pub use effect_fn::*;
pub use operation::{Operation, OperationId};
pub use snapshot::*;
pub use state::*;
pub use subscription::*;
pub use utils::timer::{sleep, sleep_until, Sleep};
pub use view::*;
