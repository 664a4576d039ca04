use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    task::{Context, Poll, Wake, Waker},
    time::{Duration, Instant},
};

use assert_call::{call, CallRecorder};
use futures::task::noop_waker;

use super::*;
use crate::core::{spawn_local, Runtime};

struct CountingWake(AtomicUsize);

impl CountingWake {
    fn new() -> Arc<Self> {
        Arc::new(Self(AtomicUsize::new(0)))
    }
    fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}
impl Wake for CountingWake {
    fn wake(self: Arc<Self>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn expire_due_timers() {
    let mut q = TimerQueue::new();
    let now = Instant::now();
    let early = CountingWake::new();
    let late = CountingWake::new();
    q.insert(now + Duration::from_millis(20), Waker::from(late.clone()));
    q.insert(now + Duration::from_millis(10), Waker::from(early.clone()));
    assert_eq!(q.len(), 2);
    assert_eq!(q.next_instant(), Some(now + Duration::from_millis(10)));

    for w in q.expire(now + Duration::from_millis(15)) {
        w.wake();
    }
    assert_eq!((early.count(), late.count()), (1, 0));
    assert_eq!(q.len(), 1);

    for w in q.expire(now + Duration::from_millis(20)) {
        w.wake();
    }
    assert_eq!((early.count(), late.count()), (1, 1));
    assert_eq!(q.next_instant(), None);
}

#[test]
fn expired_entry_is_ready_once() {
    let mut q = TimerQueue::new();
    let now = Instant::now();
    let waker = noop_waker();
    let cx = Context::from_waker(&waker);
    let id = q.insert(now, waker.clone());
    assert_eq!(q.poll_or_remove(id, &cx), Poll::Pending);
    assert_eq!(q.expire(now).len(), 1);
    assert_eq!(q.poll_or_remove(id, &cx), Poll::Ready(()));
}

#[test]
fn removed_timer_never_expires() {
    let mut q = TimerQueue::new();
    let now = Instant::now();
    let id = q.insert(now, noop_waker());
    q.remove(id);
    assert_eq!(q.len(), 0);
    assert!(q.expire(now).is_empty());
}

#[test]
fn sleep_completes_while_running() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    spawn_local(async {
        sleep(Duration::from_millis(30)).await;
        call!("woke");
    });
    rt.update();
    cr.verify(());

    rt.run_for(Duration::from_millis(80));
    cr.verify("woke");
}

#[test]
fn zero_sleep_is_ready_on_first_poll() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    spawn_local(async {
        sleep(Duration::ZERO).await;
        call!("woke");
    });
    rt.update();
    cr.verify("woke");
}

#[test]
fn dropped_sleep_removes_timer() {
    let _rt = Runtime::new();
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    let mut s = Box::pin(sleep(Duration::from_secs(60)));
    assert_eq!(s.as_mut().poll(&mut cx), Poll::Pending);
    assert_eq!(with_timers(|q| q.len()), 1);
    drop(s);
    assert_eq!(with_timers(|q| q.len()), 0);
}

#[test]
fn unrepresentable_sleep_never_completes() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    spawn_local(async {
        sleep(Duration::MAX).await;
        call!("woke");
    });
    rt.update();
    rt.run_for(Duration::from_millis(10));
    cr.verify(());
    assert_eq!(with_timers(|q| q.len()), 0);
}
