use std::{
    collections::HashMap,
    future::{Future, IntoFuture},
    rc::{Rc, Weak},
    sync::atomic::{AtomicUsize, Ordering},
};

use derive_ex::derive_ex;
use futures::future::{FutureExt, LocalBoxFuture, Shared};
use parse_display::Display;

#[cfg(test)]
mod tests;

/// Identity of an [`Operation`].
///
/// Clones of an operation share the identity; separately created operations never do, even if they produce equal results.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("#{0}")]
pub struct OperationId(usize);

impl OperationId {
    fn next() -> Self {
        static NEXT_ID: AtomicUsize = AtomicUsize::new(0);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A single asynchronous computation producing `Result<T, E>`.
///
/// The underlying future runs at most once, no matter how many times the operation is awaited or cloned.
/// Awaiting an operation polls the shared future, so someone has to await it for it to make progress.
#[derive_ex(Clone, bound())]
pub struct Operation<T: 'static, E: 'static>(Rc<OperationNode<T, E>>);

struct OperationNode<T: 'static, E: 'static> {
    id: OperationId,
    future: Shared<LocalBoxFuture<'static, Result<T, E>>>,
}

impl<T, E> Operation<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    /// Create an operation that runs `future` once, however many times it is awaited.
    pub fn new(future: impl Future<Output = Result<T, E>> + 'static) -> Self {
        Self(Rc::new(OperationNode {
            id: OperationId::next(),
            future: future.boxed_local().shared(),
        }))
    }
    /// Create an operation that settles with `result`.
    pub fn from_result(result: Result<T, E>) -> Self {
        Self::new(std::future::ready(result))
    }
    /// Create an operation that resolves with `value`.
    pub fn resolved(value: T) -> Self {
        Self::from_result(Ok(value))
    }
    /// Create an operation that rejects with `error`.
    pub fn rejected(error: E) -> Self {
        Self::from_result(Err(error))
    }

    /// Returns the result if the underlying future has already completed.
    pub fn peek(&self) -> Option<&Result<T, E>> {
        self.0.future.peek()
    }

    /// Creates a new operation that runs `f` on the value of this one.
    ///
    /// A failure of this operation fails the new one without calling `f`.
    pub fn then<U: Clone + 'static>(
        self,
        f: impl FnOnce(T) -> Operation<U, E> + 'static,
    ) -> Operation<U, E> {
        Operation::new(async move {
            let value = self.await?;
            f(value).await
        })
    }
}
impl<T: 'static, E: 'static> Operation<T, E> {
    /// Returns the identity shared by all clones of this operation.
    pub fn id(&self) -> OperationId {
        self.0.id
    }
    /// Returns `true` if both values are clones of the same operation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
    fn downgrade(&self) -> Weak<OperationNode<T, E>> {
        Rc::downgrade(&self.0)
    }
}
impl<T, E> IntoFuture for Operation<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    type Output = Result<T, E>;
    type IntoFuture = Shared<LocalBoxFuture<'static, Result<T, E>>>;

    fn into_future(self) -> Self::IntoFuture {
        self.0.future.clone()
    }
}
impl<T: 'static, E: 'static> std::fmt::Debug for Operation<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Operation({})", self.id())
    }
}

/// Per-tracker record of the operations seen so far.
///
/// An entry exists once an operation has been tracked, and its settlement is written at most once.
/// Entries of operations that no longer exist are pruned.
pub(crate) struct OperationTable<T: 'static, E: 'static> {
    records: HashMap<OperationId, OperationRecord<T, E>>,
}

struct OperationRecord<T: 'static, E: 'static> {
    op: Weak<OperationNode<T, E>>,
    settled: Option<Result<T, E>>,
}

impl<T: 'static, E: 'static> OperationTable<T, E> {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
        }
    }

    /// Records `op` as tracked. Returns `false` if it already was.
    pub fn track(&mut self, op: &Operation<T, E>) -> bool {
        if self.is_tracked(op) {
            return false;
        }
        self.records.retain(|_, r| r.op.strong_count() > 0);
        self.records.insert(
            op.id(),
            OperationRecord {
                op: op.downgrade(),
                settled: None,
            },
        );
        true
    }
    pub fn is_tracked(&self, op: &Operation<T, E>) -> bool {
        self.records.contains_key(&op.id())
    }

    /// Records the settlement of a tracked operation. Later settlements of the same operation are ignored.
    pub fn settle(&mut self, op: &Operation<T, E>, result: Result<T, E>) {
        if let Some(r) = self.records.get_mut(&op.id()) {
            if r.settled.is_none() {
                r.settled = Some(result);
            }
        }
    }
    pub fn settled(&self, op: &Operation<T, E>) -> Option<&Result<T, E>> {
        self.records.get(&op.id())?.settled.as_ref()
    }
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.records.len()
    }
}
