//! Data flow between the nodes of a chain.
//!
//! Nodes are addressed by their index in the chain; edges are index pairs stored once in
//! [Dependencies::edges] and referenced from both ends.

use rustc_hash::FxHashMap;

use crate::{
    characterize::{Class, Node},
    registry::TypeCode,
    types::Outcome,
};

/// Direction a value travels along an edge
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum FlowKind {
    /// Input satisfied by an output of an earlier node
    Down,
    /// Received value satisfied by a return of a later node
    Up,
    /// Init output read from the static phase
    Bypass,
}

/// How the produced type matches the consumed one
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum Via {
    Exact,
    /// Converted by one of the producer's declared upcasts
    Loose { from: TypeCode },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Edge {
    pub consumer: usize,
    pub producer: usize,
    /// The type as consumed
    pub code: TypeCode,
    pub flow: FlowKind,
    pub via: Via,
}

/// Producer of one downward input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    Exact(usize),
    Loose { producer: usize, upcast: usize },
}

impl Source {
    pub(crate) fn producer(self) -> usize {
        match self {
            Source::Exact(producer) | Source::Loose { producer, .. } => producer,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct NodeDependencies {
    /// Producer per entry of the node's input flow
    pub inputs: Vec<Option<Source>>,
    /// Producer per entry of the node's bypass flow
    pub bypass: Vec<Option<usize>>,
    /// Edges where this node is the consumer
    pub uses: Vec<usize>,
    /// Edges where this node is the producer
    pub used_by: Vec<usize>,
    /// Consumed types nothing included provides
    pub unmet: Vec<TypeCode>,
    /// Produced types that must be consumed but are not
    pub unconsumed: Vec<TypeCode>,
}

impl NodeDependencies {
    pub(crate) fn is_valid(&self) -> bool {
        self.unmet.is_empty() && self.unconsumed.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Dependencies {
    pub nodes: Vec<NodeDependencies>,
    pub edges: Vec<Edge>,
}

impl Dependencies {
    fn link(&mut self, edge: Edge) {
        let index = self.edges.len();
        self.nodes[edge.consumer].uses.push(index);
        self.nodes[edge.producer].used_by.push(index);
        self.edges.push(edge);
    }

    pub(crate) fn uses(&self, node: usize) -> impl Iterator<Item = &Edge> {
        self.nodes[node].uses.iter().map(|edge| &self.edges[*edge])
    }

    pub(crate) fn used_by(&self, node: usize) -> impl Iterator<Item = &Edge> {
        self.nodes[node].used_by.iter().map(|edge| &self.edges[*edge])
    }
}

/// Computes producers and consumers of every flow given which nodes are included.
///
/// Never fails: missing producers and missing consumers are recorded on the node.
pub(crate) fn calculate(nodes: &[Node], included: &[bool]) -> Dependencies {
    let mut dependencies = Dependencies {
        nodes: vec![NodeDependencies::default(); nodes.len()],
        edges: Vec::new(),
    };
    down_pass(nodes, included, &mut dependencies);
    up_pass(nodes, included, &mut dependencies);
    consumption(nodes, included, &mut dependencies);
    dependencies
}

fn down_pass(nodes: &[Node], included: &[bool], dependencies: &mut Dependencies) {
    let init = nodes.iter().position(|node| node.class == Class::Init);
    // Most recent included producer of each type
    let mut latest: FxHashMap<TypeCode, usize> = FxHashMap::default();

    for (index, node) in nodes.iter().enumerate() {
        if node.class == Class::Invoke {
            if let Some(init) = init {
                resolve_bypass(nodes, init, included, &latest, dependencies);
            }
        }

        for code in &node.flows.input {
            let source = match latest.get(code) {
                Some(producer) => Some(Source::Exact(*producer)),
                None => loose_source(nodes, included, index, *code),
            };
            dependencies.nodes[index].inputs.push(source);
            match source {
                Some(source) if included[index] => dependencies.link(Edge {
                    consumer: index,
                    producer: source.producer(),
                    code: *code,
                    flow: FlowKind::Down,
                    via: via_of(nodes, source),
                }),
                Some(_) => {}
                None => dependencies.nodes[index].unmet.push(*code),
            }
        }

        if included[index] {
            for code in &node.flows.output {
                latest.insert(*code, index);
            }
        }
    }
}

fn resolve_bypass(
    nodes: &[Node],
    init: usize,
    included: &[bool],
    latest: &FxHashMap<TypeCode, usize>,
    dependencies: &mut Dependencies,
) {
    for code in &nodes[init].flows.bypass {
        let producer = latest.get(code).copied();
        dependencies.nodes[init].bypass.push(producer);
        match producer {
            Some(producer) if included[init] => dependencies.link(Edge {
                consumer: init,
                producer,
                code: *code,
                flow: FlowKind::Bypass,
                via: Via::Exact,
            }),
            Some(_) => {}
            None => dependencies.nodes[init].unmet.push(*code),
        }
    }
}

fn via_of(nodes: &[Node], source: Source) -> Via {
    match source {
        Source::Exact(_) => Via::Exact,
        Source::Loose { producer, upcast } => {
            let provider = nodes[producer]
                .provider
                .as_ref()
                .expect("loose producers are providers");
            Via::Loose {
                from: provider.upcasts[upcast].from,
            }
        }
    }
}

/// Best loose producer of `code` for the consumer at `consumer`.
///
/// Candidates are ranked by distance, then by whether the converted type lives in the same
/// module as the requested one, then by how many upcasts the producer declares for the same
/// output, then by type code.
fn loose_source(nodes: &[Node], included: &[bool], consumer: usize, code: TypeCode) -> Option<Source> {
    let namespace = code.info().namespace();
    let mut best: Option<((usize, bool, usize, TypeCode), Source)> = None;

    for producer in 0..consumer {
        let node = &nodes[producer];
        if !included[producer] || !node.annotations.loose {
            continue;
        }
        let Some(provider) = &node.provider else {
            continue;
        };
        for (upcast_index, upcast) in provider.upcasts.iter().enumerate() {
            if upcast.to != code || !node.flows.output.contains(&upcast.from) {
                continue;
            }
            let breadth = provider
                .upcasts
                .iter()
                .filter(|other| other.from == upcast.from)
                .count();
            let score = (
                consumer - producer,
                upcast.from.info().namespace() != namespace,
                breadth,
                upcast.from,
            );
            if best.as_ref().map_or(true, |(best_score, _)| score < *best_score) {
                best = Some((
                    score,
                    Source::Loose {
                        producer,
                        upcast: upcast_index,
                    },
                ));
            }
        }
    }

    best.map(|(_, source)| source)
}

/// Binds received types to the returns of later nodes.
///
/// A receiver sees every producer up to and including the first one that always returns the
/// type. Fallible providers only return an [Outcome] when they fail, so an [Outcome] receiver
/// uses every fallible provider until the first wrapper returning one. A wrapper that
/// receives an [Outcome] without returning it handles the failures behind it, and hides them
/// from receivers further up.
fn up_pass(nodes: &[Node], included: &[bool], dependencies: &mut Dependencies) {
    let outcome = TypeCode::of::<Outcome>();
    let static_fallibles: Vec<usize> = (0..nodes.len())
        .filter(|index| included[*index] && nodes[*index].class == Class::FallibleStaticInjector)
        .collect();

    for (receiver, node) in nodes.iter().enumerate().rev() {
        if !included[receiver] {
            continue;
        }
        for code in &node.flows.received {
            let mut producers = Vec::new();
            let mut handled_inside = false;
            if node.class != Class::Init {
                for (producer, candidate) in nodes.iter().enumerate().skip(receiver + 1) {
                    if !included[producer] {
                        continue;
                    }
                    if *code == outcome && handles_failures(candidate) {
                        handled_inside = true;
                        break;
                    }
                    if !candidate.flows.returns.contains(code) {
                        continue;
                    }
                    producers.push(producer);
                    if !candidate.class.is_fallible() {
                        break;
                    }
                }
            }
            let endpoint = matches!(node.class, Class::Init | Class::Invoke);
            if endpoint && *code == outcome {
                producers.extend(static_fallibles.iter().copied());
            }

            if producers.is_empty() && !handled_inside && !(endpoint && *code == outcome) {
                dependencies.nodes[receiver].unmet.push(*code);
            }
            for producer in producers {
                dependencies.link(Edge {
                    consumer: receiver,
                    producer,
                    code: *code,
                    flow: FlowKind::Up,
                    via: Via::Exact,
                });
            }
        }
    }
}

fn handles_failures(node: &Node) -> bool {
    let outcome = TypeCode::of::<Outcome>();
    node.class == Class::Wrapper
        && node.flows.received.contains(&outcome)
        && !node.flows.returns.contains(&outcome)
}

fn consumption(nodes: &[Node], included: &[bool], dependencies: &mut Dependencies) {
    for (producer, node) in nodes.iter().enumerate() {
        if !included[producer] {
            continue;
        }

        if node.annotations.must_consume {
            for code in &node.flows.output {
                let consumed = dependencies.used_by(producer).any(|edge| {
                    edge.consumer != producer
                        && edge.flow != FlowKind::Up
                        && match edge.via {
                            Via::Exact => edge.code == *code,
                            Via::Loose { from } => from == *code,
                        }
                });
                if !consumed {
                    dependencies.nodes[producer].unconsumed.push(*code);
                }
            }
        }

        if node.class == Class::Final || node.annotations.consumption_optional {
            continue;
        }
        for code in &node.flows.returns {
            let consumed = dependencies
                .used_by(producer)
                .any(|edge| edge.flow == FlowKind::Up && edge.code == *code);
            if !consumed {
                dependencies.nodes[producer].unconsumed.push(*code);
            }
        }
    }
}
