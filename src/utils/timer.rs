use std::{
    collections::BTreeMap,
    future::Future,
    pin::Pin,
    task::{Context, Poll, Waker},
    time::{Duration, Instant},
};

use slabmap::SlabMap;

use crate::core::{try_with_timers, with_timers};

#[cfg(test)]
mod tests;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    instant: Instant,
    seq: usize,
}

struct Entry {
    waker: Waker,
    key: Key,
}
impl Entry {
    fn set_waker(&mut self, waker: &Waker) {
        if !self.waker.will_wake(waker) {
            self.waker = waker.clone();
        }
    }
}

/// Timers of the current thread, expired by [`Runtime::run_timers`](crate::core::Runtime::run_timers).
pub(crate) struct TimerQueue {
    next_seq: usize,
    tasks: BTreeMap<Key, usize>,
    entries: SlabMap<Option<Entry>>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self {
            next_seq: 0,
            tasks: BTreeMap::new(),
            entries: SlabMap::new(),
        }
    }

    fn insert(&mut self, instant: Instant, waker: Waker) -> usize {
        let key = Key {
            instant,
            seq: self.next_seq,
        };
        self.next_seq = self.next_seq.wrapping_add(1);
        let id = self.entries.insert(Some(Entry { waker, key }));
        self.tasks.insert(key, id);
        id
    }

    fn poll_or_remove(&mut self, id: usize, cx: &Context) -> Poll<()> {
        if let Some(Some(e)) = self.entries.get_mut(id) {
            e.set_waker(cx.waker());
            Poll::Pending
        } else {
            self.entries.remove(id);
            Poll::Ready(())
        }
    }

    fn remove(&mut self, id: usize) {
        if let Some(Some(e)) = self.entries.remove(id) {
            self.tasks.remove(&e.key);
        }
    }

    /// Removes the timers due at `now` and returns their wakers.
    pub fn expire(&mut self, now: Instant) -> Vec<Waker> {
        let mut wakers = Vec::new();
        while let Some((&key, &id)) = self.tasks.first_key_value() {
            if key.instant > now {
                break;
            }
            self.tasks.remove(&key);
            if let Some(entry) = self.entries.get_mut(id).and_then(Option::take) {
                wakers.push(entry.waker);
            }
        }
        wakers
    }

    pub fn next_instant(&self) -> Option<Instant> {
        self.tasks.first_key_value().map(|(key, _)| key.instant)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }
}

/// Future returned by [`sleep`] and [`sleep_until`].
#[must_use = "futures do nothing unless polled"]
pub struct Sleep {
    /// `None` if the deadline is too far to be represented; such a sleep never completes.
    instant: Option<Instant>,
    id: Option<usize>,
    is_ready: bool,
}

impl Future for Sleep {
    type Output = ();
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.is_ready {
            return Poll::Ready(());
        }
        let Some(instant) = this.instant else {
            return Poll::Pending;
        };
        let poll = match this.id {
            Some(id) => with_timers(|q| q.poll_or_remove(id, cx)),
            None if instant <= Instant::now() => Poll::Ready(()),
            None => {
                this.id = Some(with_timers(|q| q.insert(instant, cx.waker().clone())));
                Poll::Pending
            }
        };
        if poll.is_ready() {
            this.id = None;
            this.is_ready = true;
        }
        poll
    }
}
impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            try_with_timers(|q| q.remove(id));
        }
    }
}

/// Completes after `duration` has elapsed.
///
/// The timer is only expired while the [`Runtime`](crate::core::Runtime) of the current thread is updating.
/// A zero duration completes on the first poll.
/// A duration too long to be represented as an [`Instant`] never completes.
pub fn sleep(duration: Duration) -> Sleep {
    Sleep {
        instant: Instant::now().checked_add(duration),
        id: None,
        is_ready: false,
    }
}

/// Completes once `instant` has been reached.
pub fn sleep_until(instant: Instant) -> Sleep {
    Sleep {
        instant: Some(instant),
        id: None,
        is_ready: false,
    }
}
