//! The executable form of a chain.
//!
//! Consecutive injectors run in one loop ([Stage::Batch]); a wrapper nests the rest of the
//! chain behind an [ErasedNext] continuation ([Stage::Wrap]); the final provider ends it.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;

use crate::{
    provider::{FuncImpl, WrapImpl},
    types::{erase, Outcome, SharedError, Slots, Value},
};

use super::slots::{read, OutputPlan};

/// One injector or literal
pub(crate) enum Step {
    Literal {
        value: Value,
        outputs: OutputPlan,
    },
    Call {
        name: Arc<str>,
        call: FuncImpl,
        inputs: Vec<usize>,
        outputs: OutputPlan,
        /// Up slot a failure is written to, `None` in the static phase
        outcome: Option<usize>,
    },
}

impl Step {
    /// Runs the step against the downward array; a failure is returned, not written
    pub(crate) fn run(&self, down: &mut Slots) -> Result<(), SharedError> {
        match self {
            Step::Literal { value, outputs } => {
                outputs.write(down, vec![value.clone()]);
                Ok(())
            }
            Step::Call {
                name,
                call,
                inputs,
                outputs,
                ..
            } => match call(&read(down, inputs)) {
                Ok(values) => {
                    outputs.write(down, values);
                    Ok(())
                }
                Err(error) => {
                    tracing::debug!("Provider '{name}' failed: {error}");
                    Err(SharedError::from(error))
                }
            },
        }
    }
}

pub(crate) struct WrapStep {
    pub name: Arc<str>,
    pub call: WrapImpl,
    pub inputs: Vec<usize>,
    /// Where the values passed to the continuation go
    pub outputs: Arc<OutputPlan>,
    /// Up slots handed back by the continuation
    pub received: Arc<[usize]>,
    pub returns: Vec<usize>,
    /// Received [Outcome] slot the wrapper does not return; the failure stops here
    pub handled: Option<usize>,
    pub calls_inner: bool,
}

pub(crate) struct FinalStep {
    pub name: Arc<str>,
    pub call: FuncImpl,
    pub inputs: Vec<usize>,
    pub returns: Vec<usize>,
}

/// The run phase, from some point of the chain to its end
pub(crate) enum Stage {
    Batch { steps: Vec<Step>, next: Arc<Stage> },
    Wrap { wrapper: WrapStep, inner: Arc<Stage> },
    Final(FinalStep),
}

/// Runs `stage` and everything after it.
///
/// Values flowing down are read from and written to `down`; values flowing up are written to
/// `up`, which has one slot per returned type.
pub(crate) fn execute(stage: &Stage, down: &mut Slots, up: &mut Slots) {
    let mut stage = stage;
    loop {
        match stage {
            Stage::Batch { steps, next } => {
                for step in steps {
                    if let Err(error) = step.run(down) {
                        fail(step, error, up);
                        return;
                    }
                }
                stage = next;
            }
            Stage::Wrap { wrapper, inner } => {
                run_wrapper(wrapper, inner, down, up);
                return;
            }
            Stage::Final(last) => {
                match (last.call)(&read(down, &last.inputs)) {
                    Ok(values) => {
                        for (slot, value) in last.returns.iter().zip(values) {
                            up[*slot] = Some(value);
                        }
                    }
                    Err(error) => tracing::warn!("Final provider '{}' failed: {error}", last.name),
                }
                return;
            }
        }
    }
}

fn fail(step: &Step, error: SharedError, up: &mut Slots) {
    match step {
        Step::Call {
            outcome: Some(slot),
            ..
        } => up[*slot] = Some(erase(Outcome::from_shared(error))),
        Step::Call { name, .. } => {
            tracing::warn!("Failure of '{name}' has no receiver and was dropped: {error}");
        }
        Step::Literal { .. } => {}
    }
}

fn run_wrapper(wrapper: &WrapStep, inner: &Arc<Stage>, down: &mut Slots, up: &mut Slots) {
    let state = Arc::new(NextState {
        rest: inner.clone(),
        snapshot: down.clone(),
        outputs: wrapper.outputs.clone(),
        received: wrapper.received.clone(),
        up_len: up.len(),
        last_up: Mutex::new(None),
        calls: AtomicUsize::new(0),
    });

    let returns = (wrapper.call)(
        ErasedNext {
            state: state.clone(),
        },
        &read(down, &wrapper.inputs),
    );

    if wrapper.calls_inner && state.calls.load(Ordering::Acquire) == 0 {
        tracing::warn!(
            "Wrapper '{}' is marked calls_inner but did not call its continuation",
            wrapper.name
        );
    }

    // Whatever the inner chain returned, or nothing if it never ran
    *up = state
        .last_up
        .lock()
        .take()
        .unwrap_or_else(|| vec![None; state.up_len]);
    if let Some(slot) = wrapper.handled {
        up[slot] = None;
    }
    for (slot, value) in wrapper.returns.iter().zip(returns) {
        up[*slot] = Some(value);
    }
}

struct NextState {
    rest: Arc<Stage>,
    /// The downward array as the wrapper saw it
    snapshot: Slots,
    outputs: Arc<OutputPlan>,
    received: Arc<[usize]>,
    up_len: usize,
    /// Upward array of the latest continuation call
    last_up: Mutex<Option<Slots>>,
    calls: AtomicUsize,
}

/// Type erased continuation of a wrapper
#[derive(Clone)]
pub(crate) struct ErasedNext {
    state: Arc<NextState>,
}

impl ErasedNext {
    /// Runs the rest of the chain on a copy of the wrapper's downward array with `values`
    /// written into it, and returns the values the wrapper receives
    pub(crate) fn call(&self, values: Vec<Value>) -> Vec<Option<Value>> {
        let state = &self.state;
        let mut down = state.snapshot.clone();
        state.outputs.write(&mut down, values);

        let mut up = vec![None; state.up_len];
        execute(&state.rest, &mut down, &mut up);

        let received = state.received.iter().map(|slot| up[*slot].clone()).collect();
        *state.last_up.lock() = Some(up);
        state.calls.fetch_add(1, Ordering::AcqRel);
        received
    }

    pub(crate) fn calls(&self) -> usize {
        self.state.calls.load(Ordering::Acquire)
    }
}
