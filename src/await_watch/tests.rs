use std::{cell::RefCell, rc::Rc, time::Duration};

use assert_call::{call, CallRecorder};
use futures::channel::oneshot;

use crate::{
    core::Runtime, utils::test_helpers::deferred, AwaitOptions, AwaitWatch, Operation, State,
    Status,
};

type Watch = AwaitWatch<i32, String>;

fn options() -> AwaitOptions<i32, String> {
    AwaitOptions::new(0).delay(Duration::ZERO)
}

fn doubled(q: &State<i32>, options: AwaitOptions<i32, String>) -> Watch {
    let q = q.clone();
    AwaitWatch::new(
        move |sc| q.get(sc),
        |new: &i32, old: Option<&i32>, _| {
            call!("handle {new} {old:?}");
            Operation::resolved(new * 2)
        },
        options,
    )
}

#[test]
fn handler_runs_immediately_and_on_change() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let q = State::new(1);
    let w = doubled(&q, options());
    cr.verify("handle 1 None");
    assert_eq!(w.get(&mut rt.sc()).status, Status::Pending);

    rt.update();
    assert_eq!(w.get(&mut rt.sc()).data, 2);

    q.set(3, rt.ac());
    rt.update();
    cr.verify("handle 3 Some(1)");
    assert_eq!(w.get(&mut rt.sc()).data, 6);
}

#[test]
fn pending_until_first_operation() {
    let mut rt = Runtime::new();
    let q = State::new(1);
    let w = Watch::new(
        move |sc| q.get(sc),
        |_: &i32, _, _| deferred::<i32, String>().1,
        options(),
    );
    rt.update();
    let s = w.get(&mut rt.sc());
    assert_eq!(s.status, Status::Pending);
    assert!(s.first);
    assert_eq!(s.data, 0);
}

#[test]
fn jump_first_skips_first_call() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let q = State::new(1);
    let w = doubled(&q, options().jump_first(true));
    cr.verify(());
    let s = w.get(&mut rt.sc());
    assert_eq!(s.status, Status::Resolved);
    assert_eq!(s.data, 0);
    assert!(!s.first);

    q.set(2, rt.ac());
    rt.update();
    cr.verify("handle 2 Some(1)");
    assert_eq!(w.get(&mut rt.sc()).data, 4);
}

#[test]
fn update_reruns_handler() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let q = State::new(1);
    let w = doubled(&q, options());
    cr.verify("handle 1 None");

    rt.update();
    w.controls().update();
    rt.update();
    cr.verify("handle 1 Some(1)");
}

#[test]
fn update_ignored_before_first_settlement() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let (tx, op) = deferred::<i32, String>();
    let w = Watch::new(
        |_| (),
        move |_, _, _| {
            call!("handle");
            op.clone()
        },
        options(),
    );
    cr.verify("handle");

    w.controls().update();
    rt.update();
    cr.verify(());

    tx.send(Ok(1)).unwrap();
    rt.update();
    w.controls().update();
    rt.update();
    cr.verify("handle");
}

#[test]
fn un_watch_and_re_watch() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let q = State::new(1);
    let w = doubled(&q, options());
    cr.verify("handle 1 None");
    rt.update();
    assert!(w.controls().is_watching(&mut rt.sc()));

    w.controls().un_watch();
    assert!(!w.controls().is_watching(&mut rt.sc()));
    q.set(2, rt.ac());
    rt.update();
    cr.verify(());
    assert_eq!(w.get(&mut rt.sc()).data, 2);

    w.controls().re_watch();
    assert!(w.controls().is_watching(&mut rt.sc()));
    rt.update();
    cr.verify(());

    q.set(3, rt.ac());
    rt.update();
    cr.verify("handle 3 Some(2)");
    assert_eq!(w.get(&mut rt.sc()).data, 6);
}

#[test]
fn cleanup_runs_before_next_call() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let q = State::new(1);
    let w = {
        let q = q.clone();
        Watch::new(
            move |sc| q.get(sc),
            |new: &i32, _, cleanup| {
                let new = *new;
                call!("handle {new}");
                cleanup.on_cleanup(move || call!("cleanup {new}"));
                Operation::resolved(new)
            },
            options(),
        )
    };
    cr.verify("handle 1");
    rt.update();

    q.set(2, rt.ac());
    rt.update();
    cr.verify(["cleanup 1", "handle 2"]);

    drop(w);
    cr.verify("cleanup 2");
}

#[test]
fn only_latest_change_is_published() {
    let mut rt = Runtime::new();
    let senders: Rc<RefCell<Vec<oneshot::Sender<Result<i32, String>>>>> = Rc::default();
    let q = State::new(0);
    let w = {
        let q = q.clone();
        let senders = senders.clone();
        Watch::new(
            move |sc| q.get(sc),
            move |_: &i32, _, _| {
                let (tx, op) = deferred();
                senders.borrow_mut().push(tx);
                op
            },
            options(),
        )
    };
    q.set(1, rt.ac());
    rt.update();
    q.set(2, rt.ac());
    rt.update();
    let mut txs = senders.take();
    assert_eq!(txs.len(), 3);

    txs.pop().unwrap().send(Ok(2)).unwrap();
    rt.update();
    assert_eq!(w.get(&mut rt.sc()).data, 2);

    for (i, tx) in txs.into_iter().enumerate() {
        tx.send(Ok(i as i32 + 10)).unwrap();
    }
    rt.update();
    assert_eq!(w.get(&mut rt.sc()).data, 2);
}

#[test]
fn effect_form() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let q = State::new(1);
    let w = {
        let q = q.clone();
        Watch::new_effect(
            move |sc, _| {
                let value = q.get(sc);
                call!("effect {value}");
                Operation::resolved(value * 10)
            },
            options().jump_first(true),
        )
    };
    cr.verify(());
    assert!(w.is_first());

    rt.update();
    cr.verify("effect 1");
    assert_eq!(w.get(&mut rt.sc()).data, 10);

    q.set(2, rt.ac());
    rt.update();
    cr.verify("effect 2");

    w.controls().update();
    rt.update();
    cr.verify("effect 2");

    w.controls().un_watch();
    q.set(3, rt.ac());
    rt.update();
    cr.verify(());

    w.controls().re_watch();
    rt.update();
    cr.verify(());
    assert_eq!(w.get(&mut rt.sc()).data, 20);

    q.set(4, rt.ac());
    rt.update();
    cr.verify("effect 4");
    assert_eq!(w.get(&mut rt.sc()).data, 40);
}

#[test]
fn effect_re_watch_skips_changes_made_while_stopped() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let q = State::new(1);
    let w = {
        let q = q.clone();
        Watch::new_effect(
            move |sc, _| {
                let value = q.get(sc);
                call!("effect {value}");
                Operation::resolved(value)
            },
            options(),
        )
    };
    rt.update();
    cr.verify("effect 1");

    w.controls().un_watch();
    assert!(!w.controls().is_watching(&mut rt.sc()));
    q.set(2, rt.ac());
    rt.update();
    w.controls().re_watch();
    assert!(w.controls().is_watching(&mut rt.sc()));
    rt.update();
    cr.verify(());
    assert_eq!(w.get(&mut rt.sc()).data, 1);

    q.set(3, rt.ac());
    rt.update();
    cr.verify("effect 3");
}

#[test]
fn effect_change_before_un_watch_runs_after_re_watch() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let q = State::new(1);
    let w = {
        let q = q.clone();
        Watch::new_effect(
            move |sc, _| {
                let value = q.get(sc);
                call!("effect {value}");
                Operation::resolved(value)
            },
            options(),
        )
    };
    rt.update();
    cr.verify("effect 1");

    q.set(2, rt.ac());
    w.controls().un_watch();
    rt.update();
    cr.verify(());

    w.controls().re_watch();
    rt.update();
    cr.verify("effect 2");
}
