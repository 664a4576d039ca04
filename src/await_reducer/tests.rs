use std::time::Duration;

use assert_call::{call, CallRecorder};

use crate::{
    core::Runtime, utils::test_helpers::deferred, Action, AwaitOptions, AwaitReducer, AwaitState,
    Operation, ReducerArgs, Reducers, State, Trigger,
};

type Reducer = AwaitReducer<i32, String, (), i32, i32, i32>;

fn state() -> AwaitState<i32, String, (), i32> {
    AwaitState::new(
        |arg: Option<i32>| {
            call!("handle {arg:?}");
            Operation::resolved(arg.unwrap_or(0))
        },
        AwaitOptions::new(0).delay(Duration::ZERO),
    )
}

fn reducers() -> Reducers<i32, i32, i32, String> {
    Reducers::new()
        .reducer("add", |args: ReducerArgs<i32, i32>| {
            call!("reduce {} {} {:?}", args.kind, args.payload, args.deps);
            Trigger::Value(args.payload + 1)
        })
        .reducer("load", |args: ReducerArgs<i32, i32>| {
            call!("reduce {} {} {:?}", args.kind, args.payload, args.deps);
            Trigger::Operation(Operation::resolved(args.payload))
        })
}

#[test]
fn dispatch_runs_reducer() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let r = Reducer::new(state(), reducers());
    rt.update();
    cr.verify("handle None");

    r.dispatch(Action::new("add", 4));
    cr.verify(["reduce add 4 None", "handle Some(5)"]);
    rt.update();
    assert_eq!(r.get(&mut rt.sc()).data, 5);

    r.dispatch(Action::new("load", 7));
    cr.verify("reduce load 7 None");
    rt.update();
    cr.verify("handle Some(7)");
    assert_eq!(r.get(&mut rt.sc()).data, 7);
}

#[test]
fn dispatch_none_reruns_handler() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let r = Reducer::new(state(), reducers());
    rt.update();
    cr.verify("handle None");

    r.dispatch(None);
    cr.verify("handle None");
}

#[test]
fn unknown_action_is_ignored() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let r = Reducer::new(state(), reducers());
    rt.update();
    cr.verify("handle None");
    let before = r.get(&mut rt.sc());

    r.dispatch(Action::new("remove", 1));
    rt.update();
    cr.verify(());
    assert_eq!(*r.get(&mut rt.sc()), *before);
}

#[test]
fn dispatch_before_first_settlement() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let (tx, op) = deferred::<i32, String>();
    let state = AwaitState::new(
        move |arg: Option<i32>| {
            call!("handle {arg:?}");
            op.clone()
        },
        AwaitOptions::new(0).delay(Duration::ZERO),
    );
    let r = Reducer::new(state, reducers());
    cr.verify("handle None");

    r.dispatch(Action::new("add", 1));
    cr.verify("reduce add 1 None");

    tx.send(Ok(3)).unwrap();
    rt.update();
    assert_eq!(r.get(&mut rt.sc()).data, 3);
}

#[test]
fn reducer_receives_watched_deps() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let factor = State::new(2);
    let r = Reducer::new(
        state(),
        reducers()
            .reducer("scale", |args: ReducerArgs<i32, i32>| {
                call!("reduce {} {} {:?}", args.kind, args.payload, args.deps);
                Trigger::Value(args.payload * args.deps.unwrap_or(1))
            })
            .deps("scale", {
                let factor = factor.clone();
                move |sc| factor.get(sc)
            }),
    );
    rt.update();
    cr.verify("handle None");

    r.dispatch(Action::new("scale", 5));
    cr.verify(["reduce scale 5 Some(2)", "handle Some(10)"]);

    factor.set(3, rt.ac());
    rt.update();
    cr.verify(());

    r.dispatch(Action::new("scale", 5));
    cr.verify(["reduce scale 5 Some(3)", "handle Some(15)"]);
    r.dispatch(Action::new("add", 5));
    cr.verify(["reduce add 5 None", "handle Some(6)"]);
}

#[test]
fn actions_have_a_creator_per_reducer() {
    let _rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let r = Reducer::new(state(), reducers());
    cr.verify("handle None");
    let actions = r.actions();
    assert_eq!(actions.kinds().collect::<Vec<_>>(), ["add", "load"]);
    assert_eq!(actions.len(), 2);

    let add = actions.get("add").unwrap();
    assert_eq!(add.kind(), "add");
    assert_eq!(add.create(3), Action::new("add", 3));
    assert!(actions.get("remove").is_none());
}

#[test]
fn factory_is_called_once() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let r = Reducer::from_factory(state(), || {
        call!("factory");
        reducers()
    });
    cr.verify(["handle None", "factory"]);

    rt.update();
    r.dispatch(Action::new("add", 1));
    r.dispatch(Action::new("add", 2));
    cr.verify([
        "reduce add 1 None",
        "handle Some(2)",
        "reduce add 2 None",
        "handle Some(3)",
    ]);
}

#[test]
fn deps_evaluated_once_per_kind_on_creation() {
    let mut rt = Runtime::new();
    let mut cr = CallRecorder::new();
    let factor = State::new(2);
    let r = Reducer::new(
        state(),
        reducers().deps("add", {
            let factor = factor.clone();
            move |sc| {
                call!("deps");
                factor.get(sc)
            }
        }),
    );
    cr.verify(["handle None", "deps"]);
    rt.update();
    cr.verify(());

    r.dispatch(Action::new("add", 1));
    cr.verify(["reduce add 1 Some(2)", "handle Some(2)"]);
}
