use std::future::IntoFuture;

use assert_call::{call, CallRecorder};
use futures::executor::block_on;

use super::*;

type Op = Operation<i32, String>;

#[test]
fn identity() {
    let a = Op::resolved(1);
    let b = Op::resolved(1);
    let a2 = a.clone();
    assert_eq!(a.id(), a2.id());
    assert!(a.ptr_eq(&a2));
    assert_ne!(a.id(), b.id());
    assert!(!a.ptr_eq(&b));
    assert!(a.id().to_string().starts_with('#'));
    assert_eq!(format!("{a:?}"), format!("Operation({})", a.id()));
}

#[test]
fn future_runs_once() {
    let mut cr = CallRecorder::new();
    let op = Op::new(async {
        call!("run");
        Ok(5)
    });
    cr.verify(());
    assert_eq!(op.peek(), None);

    assert_eq!(block_on(op.clone().into_future()), Ok(5));
    assert_eq!(block_on(op.clone().into_future()), Ok(5));
    cr.verify("run");
    assert_eq!(op.peek(), Some(&Ok(5)));
}

#[test]
fn then_chains_value() {
    let op = Op::resolved(2).then(|v| Operation::resolved(v.to_string()));
    assert_eq!(block_on(op.into_future()), Ok("2".to_string()));
}

#[test]
fn then_skips_on_error() {
    let mut cr = CallRecorder::new();
    let op = Op::rejected("e".into()).then(|v| {
        call!("then");
        Operation::resolved(v)
    });
    assert_eq!(block_on(op.into_future()), Err("e".to_string()));
    cr.verify(());
}

#[test]
fn table_track_once() {
    let mut t = OperationTable::new();
    let op = Op::resolved(1);
    assert!(!t.is_tracked(&op));
    assert!(t.track(&op));
    assert!(!t.track(&op));
    assert!(t.is_tracked(&op));
    assert!(t.is_tracked(&op.clone()));
    assert!(!t.is_tracked(&Op::resolved(1)));
}

#[test]
fn table_settlement_is_written_once() {
    let mut t = OperationTable::new();
    let op = Op::resolved(1);
    t.settle(&op, Ok(1));
    assert_eq!(t.settled(&op), None);

    t.track(&op);
    assert_eq!(t.settled(&op), None);
    t.settle(&op, Ok(1));
    t.settle(&op, Err("late".into()));
    assert_eq!(t.settled(&op), Some(&Ok(1)));
}

#[test]
fn table_prunes_dropped_operations() {
    let mut t = OperationTable::new();
    let a = Op::resolved(1);
    let b = Op::resolved(2);
    t.track(&a);
    t.track(&b);
    assert_eq!(t.len(), 2);

    drop(a);
    let c = Op::resolved(3);
    t.track(&c);
    assert_eq!(t.len(), 2);
    assert!(t.is_tracked(&b));
}
