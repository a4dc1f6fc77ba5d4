use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use pretty_assertions::assert_eq;
use wrapp_inject::{Collection, InvokeError, Next, Outcome, Provider};

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

#[derive(Clone, Default, Debug, PartialEq)]
struct S0(u32);
#[derive(Clone, Default, Debug, PartialEq)]
struct S1(u32);
#[derive(Clone, Default, Debug, PartialEq)]
struct S2(u32);
#[derive(Clone, Default, Debug, PartialEq)]
struct S3(u32);
#[derive(Clone, Default, Debug, PartialEq)]
struct S4(u32);
#[derive(Clone, Default, Debug, PartialEq)]
struct S5(u32);

#[test]
fn static_phase_runs_once_and_unused_providers_never_run() {
    let s1_runs = counter();
    let s2_runs = counter();
    let s4_runs = counter();
    let s5_runs = counter();

    let (s1, s2, s4, s5) = (
        s1_runs.clone(),
        s2_runs.clone(),
        s4_runs.clone(),
        s5_runs.clone(),
    );
    let chain = Collection::new("scenario")
        .add(
            Provider::func("s0 to s1", move |s0: S0| {
                s1.fetch_add(1, Ordering::SeqCst);
                (S1(s0.0 + 1),)
            })
            .cacheable(),
        )
        .add(
            Provider::func("s1 to s2", move |s1: S1| {
                s2.fetch_add(1, Ordering::SeqCst);
                (S2(s1.0 * 10),)
            })
            .cacheable(),
        )
        .add(
            Provider::func("s3 to s4", move |s3: S3| {
                s4.fetch_add(1, Ordering::SeqCst);
                (S4(s3.0),)
            })
            .cacheable(),
        )
        .add(
            Provider::func("s2 to s5", move |s2: S2| {
                s5.fetch_add(1, Ordering::SeqCst);
                (S5(s2.0 + 5),)
            })
            .cacheable(),
        );

    let (invoker, initializer) = chain
        .binder()
        .invoke::<(S3,), (S5,)>()
        .init::<(S0,), (S2,)>()
        .bind()
        .unwrap();

    assert_eq!(initializer.init((S0(1),)), (S2(20),));
    assert_eq!(initializer.init((S0(7),)), (S2(20),));
    assert_eq!(count(&s1_runs), 1);
    assert_eq!(count(&s2_runs), 1);

    for n in 0..3 {
        assert_eq!(invoker.invoke((S3(n),)), (S5(25),));
    }
    assert_eq!(count(&s5_runs), 3);
    assert_eq!(count(&s4_runs), 0);
    assert_eq!(count(&s1_runs), 1);
}

#[test]
fn static_failures_skip_the_rest_of_the_chain() {
    let (loads, derivations, ends) = (counter(), counter(), counter());
    let (load_seen, derive_seen, end_seen) = (loads.clone(), derivations.clone(), ends.clone());
    let chain = Collection::new("static failure")
        .add_constant(S0(4))
        .add(
            Provider::fallible("load", move |_: S0| {
                load_seen.fetch_add(1, Ordering::SeqCst);
                Err::<(S1,), _>("static boom")
            })
            .cacheable(),
        )
        .add(
            Provider::func("derive", move |s1: S1| {
                derive_seen.fetch_add(1, Ordering::SeqCst);
                (S2(s1.0 * 2),)
            })
            .cacheable(),
        )
        .add(Provider::func("end", move |s2: S2| {
            end_seen.fetch_add(1, Ordering::SeqCst);
            (S3(s2.0),)
        }));

    let (invoker, initializer) = chain
        .binder()
        .invoke::<(), (S3, Outcome)>()
        .init::<(), (Outcome, S1)>()
        .bind()
        .unwrap();

    let (outcome, s1) = initializer.init(());
    assert_eq!(
        outcome.error().map(ToString::to_string).as_deref(),
        Some("static boom")
    );
    assert_eq!(s1, S1::default());

    for _ in 0..2 {
        let (s3, outcome) = invoker.invoke(());
        assert_eq!(s3, S3::default());
        assert_eq!(
            outcome.error().map(ToString::to_string).as_deref(),
            Some("static boom")
        );
    }
    assert_eq!((count(&loads), count(&derivations), count(&ends)), (1, 0, 0));
}

#[derive(Clone, Default, Debug, PartialEq)]
struct Seed(u64);
#[derive(Clone, Debug)]
struct Table(Arc<Vec<u64>>);
#[derive(Clone, Default, Debug, PartialEq)]
struct Query(usize);
#[derive(Clone, Default, Debug, PartialEq)]
struct Answer(u64);

#[test]
fn cacheable_providers_with_static_inputs_run_once_per_binding() {
    let expansions = counter();
    let seen = expansions.clone();
    let chain = Collection::new("lookup")
        .add(
            Provider::func("expand", move |seed: Seed| {
                seen.fetch_add(1, Ordering::SeqCst);
                (Table(Arc::new((0..16).map(|i| seed.0 * i).collect())),)
            })
            .cacheable(),
        )
        .add(Provider::func("answer", |table: Table, query: Query| {
            (Answer(table.0[query.0]),)
        }));

    let (invoker, initializer) = chain
        .binder()
        .invoke::<(Query,), (Answer,)>()
        .init::<(Seed,), ()>()
        .bind()
        .unwrap();

    assert_eq!(invoker.try_invoke((Query(1),)), Err(InvokeError::NotInitialized));
    initializer.init((Seed(3),));
    for i in 0..100 {
        assert_eq!(invoker.invoke((Query(i % 16),)), (Answer(3 * (i % 16) as u64),));
    }
    assert_eq!(count(&expansions), 1);
    assert!(initializer.is_initialized());
}

#[derive(Clone, Default, Debug, PartialEq)]
struct Length(usize);

#[test]
fn memoized_results_are_shared_between_bindings() {
    let computed = counter();
    let seen = computed.clone();
    let measure = Provider::keyed_func("measure", move |word: String| {
        seen.fetch_add(1, Ordering::SeqCst);
        (Length(word.len()),)
    })
    .memoize();
    let report = Provider::func("report", |length: Length| (length,));

    let bind = |word: &str| {
        Collection::new("measure")
            .add_constant(word.to_string())
            .add(measure.clone())
            .add(report.clone())
            .bind::<(), (Length,)>()
            .unwrap()
    };

    let first = bind("hello");
    assert_eq!(first.invoke(()), (Length(5),));
    assert_eq!(count(&computed), 1);

    let second = bind("hello");
    assert_eq!(second.invoke(()), (Length(5),));
    assert_eq!(count(&computed), 1);

    let third = bind("goodbye");
    assert_eq!(third.invoke(()), (Length(7),));
    assert_eq!(count(&computed), 2);
}

#[test]
fn singletons_run_once_for_the_process() {
    let runs = counter();
    let seen = runs.clone();
    let connect = Provider::func("connect", move || {
        (Length(seen.fetch_add(1, Ordering::SeqCst) + 10),)
    })
    .singleton();

    for _ in 0..3 {
        let invoker = Collection::new("singleton")
            .add(connect.clone())
            .add(Provider::func("report", |length: Length| (length,)))
            .bind::<(), (Length,)>()
            .unwrap();
        assert_eq!(invoker.invoke(()), (Length(10),));
    }
    assert_eq!(count(&runs), 1);
}

#[derive(Clone, Default, Debug, PartialEq)]
struct Attempt(u32);
#[derive(Clone, Default, Debug, PartialEq)]
struct Checked(u32);
#[derive(Clone, Default, Debug, PartialEq)]
struct Approved;
#[derive(Clone, Default, Debug, PartialEq)]
struct Audit;
#[derive(Clone, Default, Debug, PartialEq)]
struct Status(bool);

fn checkout(before: Arc<AtomicUsize>, after: Arc<AtomicUsize>, ended: Arc<AtomicUsize>) -> Collection {
    Collection::new("checkout")
        .add(Provider::func("count before", move |attempt: Attempt| {
            before.fetch_add(1, Ordering::SeqCst);
            (Checked(attempt.0),)
        }))
        .add(Provider::fallible("check", |checked: Checked| {
            if checked.0 % 2 == 0 {
                Err(format!("attempt {} rejected", checked.0))
            } else {
                Ok((Approved,))
            }
        }))
        .add(Provider::func("count after", move |_: Approved| {
            after.fetch_add(1, Ordering::SeqCst);
            (Audit,)
        }))
        .add(Provider::func("end", move |_: Audit| {
            ended.fetch_add(1, Ordering::SeqCst);
        }))
}

#[test]
fn failures_skip_the_rest_of_the_invocation() {
    let (before, after, ended) = (counter(), counter(), counter());
    let invoker = checkout(before.clone(), after.clone(), ended.clone())
        .bind::<(Attempt,), (Outcome,)>()
        .unwrap();

    let (outcome,) = invoker.invoke((Attempt(1),));
    assert!(outcome.is_ok());

    let (outcome,) = invoker.invoke((Attempt(2),));
    assert_eq!(
        outcome.error().map(ToString::to_string).as_deref(),
        Some("attempt 2 rejected")
    );
    assert_eq!((count(&before), count(&after), count(&ended)), (2, 1, 1));

    let (outcome,) = invoker.invoke((Attempt(3),));
    assert!(outcome.is_ok());
    assert_eq!((count(&before), count(&after), count(&ended)), (3, 2, 2));
}

#[test]
fn failures_reach_the_nearest_receiver() {
    let (before, after, ended) = (counter(), counter(), counter());
    let chain = Collection::new("status")
        .add(Provider::wrapper("status", |next: Next<(), (Outcome,)>| {
            let (outcome,) = next.call(());
            (Status(outcome.is_ok()),)
        }))
        .add_collection(&checkout(before, after, ended.clone()));

    let invoker = chain.bind::<(Attempt,), (Status,)>().unwrap();
    assert_eq!(invoker.invoke((Attempt(5),)), (Status(true),));
    assert_eq!(invoker.invoke((Attempt(6),)), (Status(false),));
    assert_eq!(count(&ended), 1);
}

#[test]
fn handled_failures_do_not_reach_outer_wrappers() {
    let (inner_failures, outer_failures) = (counter(), counter());
    let (inner_seen, outer_seen) = (inner_failures.clone(), outer_failures.clone());
    let chain = Collection::new("nested")
        .add(Provider::wrapper(
            "outer",
            move |next: Next<(), (Outcome,)>| {
                let (outcome,) = next.call(());
                if !outcome.is_ok() {
                    outer_seen.fetch_add(1, Ordering::SeqCst);
                }
                (outcome,)
            },
        ))
        .add(Provider::wrapper(
            "inner",
            move |next: Next<(), (Outcome,)>| {
                let (outcome,) = next.call(());
                if !outcome.is_ok() {
                    inner_seen.fetch_add(1, Ordering::SeqCst);
                }
            },
        ))
        .add(Provider::fallible("fail", || Err::<(), _>("boom")))
        .add(Provider::func("end", || ()));

    let invoker = chain.bind::<(), (Outcome,)>().unwrap();
    let (outcome,) = invoker.invoke(());
    assert!(outcome.is_ok());
    assert_eq!(count(&inner_failures), 1);
    assert_eq!(count(&outer_failures), 0);
}

#[derive(Clone, Default, Debug, PartialEq)]
struct Request {
    allowed: bool,
}
#[derive(Clone, Default, Debug, PartialEq)]
struct Response(String);

#[test]
fn skipped_continuations_return_zero_values() {
    let handled = counter();
    let seen = handled.clone();
    let chain = Collection::new("gate")
        .add(Provider::wrapper(
            "gate",
            |next: Next<(), (Response,)>, request: Request| {
                if request.allowed {
                    next.call(());
                }
            },
        ))
        .add(Provider::func("handle", move || {
            seen.fetch_add(1, Ordering::SeqCst);
            (Response("handled".into()),)
        }));

    let invoker = chain.bind::<(Request,), (Response,)>().unwrap();
    assert_eq!(
        invoker.invoke((Request { allowed: true },)),
        (Response("handled".into()),)
    );
    assert_eq!(invoker.invoke((Request { allowed: false },)), (Response::default(),));
    assert_eq!(count(&handled), 1);
}

#[test]
fn wrappers_can_retry_the_rest_of_the_chain() {
    let tries = counter();
    let seen = tries.clone();
    let chain = Collection::new("retry")
        .add(Provider::wrapper("retry", |next: Next<(), (Outcome,)>| {
            let mut outcome = Outcome::ok();
            for _ in 0..3 {
                (outcome,) = next.call(());
                if outcome.is_ok() {
                    break;
                }
            }
            (outcome,)
        }))
        .add(Provider::fallible("flaky", move || {
            if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("not yet")
            } else {
                Ok(())
            }
        }))
        .add(Provider::func("end", || ()));

    let invoker = chain.bind::<(), (Outcome,)>().unwrap();
    let (outcome,) = invoker.invoke(());
    assert!(outcome.is_ok());
    assert_eq!(count(&tries), 3);
}

#[test]
fn binding_twice_gives_equal_independent_pipelines() {
    let chain = Collection::new("round trip")
        .add_constant(String::from("localhost"))
        .add(Provider::func("address", |host: String, attempt: Attempt| {
            (Response(format!("{host}:{}", attempt.0)),)
        }))
        .add(Provider::func("reply", |response: Response| (response,)));

    let first = chain.bind::<(Attempt,), (Response,)>().unwrap();
    let second = chain.bind::<(Attempt,), (Response,)>().unwrap();
    assert_eq!(first.summary(), second.summary());
    for port in [80, 443] {
        assert_eq!(first.invoke((Attempt(port),)), second.invoke((Attempt(port),)));
    }
}

#[test]
fn run_binds_and_invokes_once() {
    let runs = counter();
    let seen = runs.clone();
    Collection::new("run")
        .add(Provider::func("work", move || {
            seen.fetch_add(1, Ordering::SeqCst);
        }))
        .must_run();
    assert_eq!(count(&runs), 1);
}
