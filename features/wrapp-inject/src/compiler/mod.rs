//! Turns a resolved chain into a [CompiledChain].
//!
//! Every included node becomes a step reading its inputs from, and writing its outputs to,
//! fixed positions of one value array. Literals and static injectors form the static phase,
//! which runs once and produces the template array every invocation starts from.

mod pipeline;
mod slots;
mod summary;

use std::sync::{Arc, OnceLock};

use rustc_hash::FxHashMap;

pub(crate) use pipeline::ErasedNext;
pub use summary::{ChainSummary, EdgeSummary, SlotSummary};

use crate::{
    cache,
    characterize::{Class, Endpoint, Node, Signature},
    dependency::Source,
    errors::{CompileError, InvokeError},
    provider::{FuncImpl, Shape},
    registry::TypeCode,
    resolver::Resolution,
    types::{erase, Outcome, SharedError, Slots, Value},
};

use pipeline::{execute, FinalStep, Stage, Step, WrapStep};
use slots::{LooseWrite, OutputPlan, SlotKey, SlotLayout};

/// Where an endpoint output is read from
#[derive(Debug, Clone, Copy)]
enum Readback {
    Slot(usize),
    /// The static phase's failure if there was one, else the slot if any
    Outcome(Option<usize>),
}

struct InitPlan {
    inputs: Vec<usize>,
    outputs: Vec<Readback>,
}

/// Result of the static phase
struct StaticState {
    base: Slots,
    error: Option<SharedError>,
}

/// A bound chain, shared by its invokers and initializer
pub(crate) struct CompiledChain {
    down_len: usize,
    init: Option<InitPlan>,
    invoke_inputs: Vec<usize>,
    invoke_outputs: Vec<Readback>,
    static_steps: Vec<Step>,
    run: Arc<Stage>,
    up_len: usize,
    state: OnceLock<StaticState>,
    pub summary: ChainSummary,
    pub warnings: Vec<String>,
}

impl CompiledChain {
    fn run_static(&self, init_values: Vec<Value>) -> StaticState {
        let mut base = vec![None; self.down_len];
        if let Some(init) = &self.init {
            for (slot, value) in init.inputs.iter().zip(init_values) {
                base[*slot] = Some(value);
            }
        }

        for step in &self.static_steps {
            if let Err(error) = step.run(&mut base) {
                tracing::debug!("Static phase stopped: {error}");
                return StaticState {
                    base,
                    error: Some(error),
                };
            }
        }
        tracing::trace!("Static phase ran {} steps", self.static_steps.len());
        StaticState { base, error: None }
    }

    fn read_back(readbacks: &[Readback], slots: &Slots, error: Option<&SharedError>) -> Vec<Option<Value>> {
        readbacks
            .iter()
            .map(|readback| match (readback, error) {
                (Readback::Outcome(_), Some(error)) => {
                    Some(erase(Outcome::from_shared(error.clone())))
                }
                (Readback::Outcome(Some(slot)) | Readback::Slot(slot), _) => slots[*slot].clone(),
                (Readback::Outcome(None), None) => None,
            })
            .collect()
    }

    pub(crate) fn has_init(&self) -> bool {
        self.init.is_some()
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.state.get().is_some()
    }

    /// Runs the static phase unless it already ran; the first call's values win
    pub(crate) fn initialize(&self, values: Vec<Value>) -> Vec<Option<Value>> {
        let state = self.state.get_or_init(|| self.run_static(values));
        let outputs = self.init.as_ref().map_or(&[][..], |init| &init.outputs[..]);
        Self::read_back(outputs, &state.base, state.error.as_ref())
    }

    /// Runs the chain once
    pub(crate) fn invoke(&self, values: Vec<Value>) -> Result<Vec<Option<Value>>, InvokeError> {
        let state = match &self.init {
            Some(_) => self.state.get().ok_or(InvokeError::NotInitialized)?,
            None => self.state.get_or_init(|| self.run_static(Vec::new())),
        };

        if let Some(error) = &state.error {
            return Ok(Self::read_back(
                &self.invoke_outputs,
                &vec![None; self.up_len],
                Some(error),
            ));
        }

        let mut down = state.base.clone();
        for (slot, value) in self.invoke_inputs.iter().zip(values) {
            down[*slot] = Some(value);
        }
        let mut up = vec![None; self.up_len];
        execute(&self.run, &mut down, &mut up);

        Ok(Self::read_back(&self.invoke_outputs, &up, None))
    }
}

/// Loose conversions each producer writes, by producer
fn loose_writes(
    nodes: &[Node],
    resolution: &Resolution,
    layout: &SlotLayout,
) -> FxHashMap<usize, Vec<LooseWrite>> {
    let mut writes: FxHashMap<usize, Vec<LooseWrite>> = FxHashMap::default();
    for (index, node) in nodes.iter().enumerate() {
        if !resolution.included[index] {
            continue;
        }
        let sources = &resolution.dependencies.nodes[index].inputs;
        for (code, source) in node.flows.input.iter().zip(sources) {
            let Some(Source::Loose { producer, upcast }) = source else {
                continue;
            };
            let slot = layout.down(SlotKey::Converted {
                code: *code,
                producer: *producer,
            });
            let producer_writes = writes.entry(*producer).or_default();
            if producer_writes.iter().any(|write| write.slot == slot) {
                continue;
            }
            let provider = nodes[*producer]
                .provider
                .as_ref()
                .expect("loose producers are providers");
            let upcast = &provider.upcasts[*upcast];
            producer_writes.push(LooseWrite {
                output: nodes[*producer]
                    .flows
                    .output
                    .iter()
                    .position(|output| *output == upcast.from)
                    .expect("upcasts convert one of the producer's outputs"),
                convert: upcast.convert.clone(),
                slot,
            });
        }
    }
    writes
}

struct Builder<'a> {
    nodes: &'a [Node],
    resolution: &'a Resolution,
    layout: SlotLayout,
    loose: FxHashMap<usize, Vec<LooseWrite>>,
}

impl Builder<'_> {
    fn inputs(&self, index: usize) -> Vec<usize> {
        let node = &self.nodes[index];
        node.flows
            .input
            .iter()
            .zip(&self.resolution.dependencies.nodes[index].inputs)
            .map(|(code, source)| self.layout.input(*code, *source))
            .collect()
    }

    fn outputs(&self, index: usize) -> OutputPlan {
        OutputPlan {
            slots: self.nodes[index]
                .flows
                .output
                .iter()
                .map(|code| self.layout.down(SlotKey::Type(*code)))
                .collect(),
            loose: self.loose.get(&index).cloned().unwrap_or_default(),
        }
    }

    fn up_slots(&self, codes: &[TypeCode]) -> Vec<usize> {
        codes.iter().map(|code| self.layout.up(*code)).collect()
    }

    /// The provider's function with its caching applied
    fn call(&self, index: usize) -> FuncImpl {
        let node = &self.nodes[index];
        let provider = node.provider.as_ref().expect("only providers are called");
        let Shape::Func { call, keys, .. } = &*provider.shape else {
            unreachable!("injectors and finals are functions");
        };

        if node.memoize {
            let keys = keys.clone().expect("memoized providers are keyed");
            cache::memoize(provider.id(), call.clone(), keys)
        } else if node.annotations.singleton {
            cache::singleton(provider.id(), call.clone())
        } else {
            call.clone()
        }
    }

    fn step(&self, index: usize) -> Step {
        let node = &self.nodes[index];
        if let Some(Shape::Constant { value, .. }) = node.provider.as_ref().map(|p| &*p.shape) {
            return Step::Literal {
                value: value.clone(),
                outputs: self.outputs(index),
            };
        }
        let outcome = (node.class == Class::FallibleInjector)
            .then(|| self.layout.up(TypeCode::of::<Outcome>()));
        Step::Call {
            name: node.name.clone(),
            call: self.call(index),
            inputs: self.inputs(index),
            outputs: self.outputs(index),
            outcome,
        }
    }

    fn wrap_step(&self, index: usize) -> WrapStep {
        let node = &self.nodes[index];
        let provider = node.provider.as_ref().expect("wrappers are providers");
        let Shape::Wrapper { call, .. } = &*provider.shape else {
            unreachable!("wrapper nodes have a wrapper shape");
        };
        let outcome = TypeCode::of::<Outcome>();
        let handled = (node.flows.received.contains(&outcome)
            && !node.flows.returns.contains(&outcome))
        .then(|| self.layout.up(outcome));
        WrapStep {
            name: node.name.clone(),
            call: call.clone(),
            inputs: self.inputs(index),
            outputs: Arc::new(self.outputs(index)),
            received: Arc::from(self.up_slots(&node.flows.received)),
            returns: self.up_slots(&node.flows.returns),
            handled,
            calls_inner: node.annotations.calls_inner,
        }
    }

    fn final_step(&self, index: usize) -> FinalStep {
        let node = &self.nodes[index];
        FinalStep {
            name: node.name.clone(),
            call: self.call(index),
            inputs: self.inputs(index),
            returns: self.up_slots(&node.flows.returns),
        }
    }

    /// Init outputs are read from the static array, invoke outputs from the up array
    fn endpoint_outputs(&self, endpoint: &Endpoint, bypass: bool) -> Vec<Readback> {
        let outcome = TypeCode::of::<Outcome>();
        endpoint
            .outputs
            .iter()
            .map(|code| match (*code == outcome, bypass) {
                (true, true) => Readback::Outcome(None),
                (true, false) => Readback::Outcome(Some(self.layout.up(*code))),
                (false, true) => Readback::Slot(self.layout.down(SlotKey::Type(*code))),
                (false, false) => Readback::Slot(self.layout.up(*code)),
            })
            .collect()
    }
}

/// Compiles the included nodes of a resolved chain
pub(crate) fn compile(
    nodes: &[Node],
    resolution: &Resolution,
    signature: &Signature,
    warnings: Vec<String>,
) -> Result<CompiledChain, CompileError> {
    let included: Vec<usize> = (0..nodes.len())
        .filter(|index| resolution.included[*index])
        .collect();

    let finals: Vec<usize> = included
        .iter()
        .copied()
        .filter(|index| nodes[*index].class == Class::Final)
        .collect();
    let final_index = match finals.as_slice() {
        [] => return Err(CompileError::MissingFinal),
        [single] => *single,
        _ => {
            return Err(CompileError::MultipleFinals {
                finals: finals.iter().map(|index| nodes[*index].name.to_string()).collect(),
            })
        }
    };

    let layout = SlotLayout::new(nodes, &resolution.included, &resolution.dependencies);
    let loose = loose_writes(nodes, resolution, &layout);
    let builder = Builder {
        nodes,
        resolution,
        layout,
        loose,
    };

    let mut init = None;
    let mut invoke_inputs = Vec::new();
    let mut invoke_outputs = Vec::new();
    let mut static_steps = Vec::new();
    let mut run_nodes = Vec::new();
    for index in included.iter().copied() {
        let node = &nodes[index];
        match node.class {
            Class::Init => {
                let endpoint = signature.init.as_ref().expect("init nodes come from an init signature");
                init = Some(InitPlan {
                    inputs: node
                        .flows
                        .output
                        .iter()
                        .map(|code| builder.layout.down(SlotKey::Type(*code)))
                        .collect(),
                    outputs: builder.endpoint_outputs(endpoint, true),
                });
            }
            Class::Invoke => {
                invoke_inputs = node
                    .flows
                    .output
                    .iter()
                    .map(|code| builder.layout.down(SlotKey::Type(*code)))
                    .collect();
                invoke_outputs = builder.endpoint_outputs(&signature.invoke, false);
            }
            Class::Literal | Class::StaticInjector | Class::FallibleStaticInjector => {
                static_steps.push(builder.step(index));
            }
            Class::Injector | Class::FallibleInjector | Class::Wrapper => run_nodes.push(index),
            Class::Final => {}
        }
    }

    // Built from the end: consecutive injectors share a batch, a wrapper nests the rest
    let mut stage = Arc::new(Stage::Final(builder.final_step(final_index)));
    let mut batch: Vec<Step> = Vec::new();
    for index in run_nodes.into_iter().rev() {
        if nodes[index].class == Class::Wrapper {
            if !batch.is_empty() {
                batch.reverse();
                stage = Arc::new(Stage::Batch {
                    steps: std::mem::take(&mut batch),
                    next: stage,
                });
            }
            stage = Arc::new(Stage::Wrap {
                wrapper: builder.wrap_step(index),
                inner: stage,
            });
        } else {
            batch.push(builder.step(index));
        }
    }
    if !batch.is_empty() {
        batch.reverse();
        stage = Arc::new(Stage::Batch {
            steps: batch,
            next: stage,
        });
    }

    let summary = ChainSummary::new(
        nodes,
        &resolution.included,
        &builder.layout,
        &resolution.dependencies,
    );
    tracing::debug!(
        "Compiled chain: {} static steps, {} down slots, {} up slots",
        static_steps.len(),
        builder.layout.down_len(),
        builder.layout.up_len()
    );

    Ok(CompiledChain {
        down_len: builder.layout.down_len(),
        init,
        invoke_inputs,
        invoke_outputs,
        static_steps,
        run: stage,
        up_len: builder.layout.up_len(),
        state: OnceLock::new(),
        summary,
        warnings,
    })
}
