use std::time::Duration;

use assert_call::{call, CallRecorder};

use crate::{
    bind_resolve, core::Runtime, AwaitCell, AwaitOptions, AwaitView, Operation, State,
};

fn cell() -> AwaitCell<i32, String> {
    AwaitCell::new(
        Some(Operation::resolved(1)),
        AwaitOptions::new(0).delay(Duration::ZERO),
    )
}

#[test]
fn slot_called_on_publish() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let cell = cell();
    let _view = AwaitView::new(cell.to_signal(), |s| {
        call!("{} {} {}", s.status, s.data, s.first)
    });
    cr.verify(());

    rt.update();
    cr.verify(["pending 0 true", "resolved 1 false"]);

    cell.set(Operation::rejected("e".to_string()));
    rt.update();
    cr.verify(["pending 1 false", "rejected 1 false"]);
}

#[test]
fn drop_view() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let cell = cell();
    let view = AwaitView::new(cell.to_signal(), |s| call!("{}", s.status));
    drop(view);
    rt.update();
    cr.verify(());
}

#[test]
fn bind_resolve_supplies_new_operations() {
    let mut rt = Runtime::new();
    let cell = cell();
    rt.update();

    let source = State::new(None);
    let _b = bind_resolve(&cell, {
        let source = source.clone();
        move |sc| source.get(sc)
    });
    rt.update();
    assert_eq!(cell.get(&mut rt.sc()).data, 1);

    source.set(Some(Operation::resolved(5)), rt.ac());
    rt.update();
    assert_eq!(cell.get(&mut rt.sc()).data, 5);

    source.set(None, rt.ac());
    rt.update();
    assert_eq!(cell.get(&mut rt.sc()).data, 5);
}
