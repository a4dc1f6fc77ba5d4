use crate::{
    characterize::{Node, NodeKey},
    dependency::{Dependencies, FlowKind, Via},
    registry::TypeCode,
};

use super::slots::{SlotKey, SlotLayout};

/// What a downward slot of a bound chain holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotSummary {
    Type(TypeCode),
    /// The output of a loose producer converted to `code`
    Converted { code: TypeCode, producer: NodeKey },
}

/// One dependency between two included nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeSummary {
    pub consumer: NodeKey,
    pub producer: NodeKey,
    pub code: TypeCode,
    pub flow: FlowKind,
    pub via: Via,
}

/// Layout of a bound chain: what runs, in which order, and which value goes where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSummary {
    /// Included nodes in execution order
    pub included: Vec<NodeKey>,
    pub down_slots: Vec<SlotSummary>,
    pub up_slots: Vec<TypeCode>,
    pub edges: Vec<EdgeSummary>,
}

impl ChainSummary {
    pub(crate) fn new(
        nodes: &[Node],
        included: &[bool],
        layout: &SlotLayout,
        dependencies: &Dependencies,
    ) -> Self {
        let included_keys = nodes
            .iter()
            .zip(included)
            .filter(|(_, included)| **included)
            .map(|(node, _)| node.key)
            .collect();
        let down_slots = layout
            .down_keys
            .iter()
            .map(|key| match key {
                SlotKey::Type(code) => SlotSummary::Type(*code),
                SlotKey::Converted { code, producer } => SlotSummary::Converted {
                    code: *code,
                    producer: nodes[*producer].key,
                },
            })
            .collect();
        let edges = dependencies
            .edges
            .iter()
            .map(|edge| EdgeSummary {
                consumer: nodes[edge.consumer].key,
                producer: nodes[edge.producer].key,
                code: edge.code,
                flow: edge.flow,
                via: edge.via,
            })
            .collect();

        Self {
            included: included_keys,
            down_slots,
            up_slots: layout.up_keys.clone(),
            edges,
        }
    }

    pub fn includes(&self, key: NodeKey) -> bool {
        self.included.contains(&key)
    }

    /// Providers `consumer` depends on, in both directions
    pub fn producers_of(&self, consumer: NodeKey) -> Vec<NodeKey> {
        self.edges
            .iter()
            .filter(|edge| edge.consumer == consumer)
            .map(|edge| edge.producer)
            .collect()
    }
}
