use std::future::pending;

use futures::channel::oneshot;

use crate::Operation;

/// An operation settled by sending on the returned sender.
///
/// If the sender is dropped, the operation never settles.
pub fn deferred<T, E>() -> (oneshot::Sender<Result<T, E>>, Operation<T, E>)
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    let (tx, rx) = oneshot::channel();
    let op = Operation::new(async move {
        match rx.await {
            Ok(result) => result,
            Err(_) => pending().await,
        }
    });
    (tx, op)
}
