use rustc_hash::FxHashMap;

use crate::{
    characterize::Node,
    dependency::{Dependencies, Source},
    provider::Converter,
    registry::TypeCode,
    types::{Slots, Value},
};

/// What a downward slot holds
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub(crate) enum SlotKey {
    /// The latest value of a type
    Type(TypeCode),
    /// A loose producer's output converted to `code`
    Converted { code: TypeCode, producer: usize },
}

/// Positions of every value in the downward and upward arrays
#[derive(Debug, Default)]
pub(crate) struct SlotLayout {
    down: FxHashMap<SlotKey, usize>,
    pub down_keys: Vec<SlotKey>,
    up: FxHashMap<TypeCode, usize>,
    pub up_keys: Vec<TypeCode>,
}

impl SlotLayout {
    /// Assigns slots in the order keys are first seen walking the included nodes
    pub(crate) fn new(nodes: &[Node], included: &[bool], dependencies: &Dependencies) -> Self {
        let mut layout = Self::default();
        for (index, node) in nodes.iter().enumerate() {
            if !included[index] {
                continue;
            }
            for (code, source) in node.flows.input.iter().zip(&dependencies.nodes[index].inputs) {
                if let Some(Source::Loose { producer, .. }) = source {
                    layout.assign_down(SlotKey::Converted {
                        code: *code,
                        producer: *producer,
                    });
                }
            }
            for code in &node.flows.output {
                layout.assign_down(SlotKey::Type(*code));
            }
            for code in node.flows.returns.iter().chain(&node.flows.received) {
                layout.assign_up(*code);
            }
        }
        layout
    }

    fn assign_down(&mut self, key: SlotKey) {
        if !self.down.contains_key(&key) {
            self.down.insert(key, self.down_keys.len());
            self.down_keys.push(key);
        }
    }

    fn assign_up(&mut self, code: TypeCode) {
        if !self.up.contains_key(&code) {
            self.up.insert(code, self.up_keys.len());
            self.up_keys.push(code);
        }
    }

    pub(crate) fn down(&self, key: SlotKey) -> usize {
        *self
            .down
            .get(&key)
            .expect("every consumed key is produced by an included node")
    }

    pub(crate) fn up(&self, code: TypeCode) -> usize {
        *self
            .up
            .get(&code)
            .expect("every returned or received type has an up slot")
    }

    /// Slot an input is read from
    pub(crate) fn input(&self, code: TypeCode, source: Option<Source>) -> usize {
        match source.expect("included nodes have a producer for every input") {
            Source::Exact(_) => self.down(SlotKey::Type(code)),
            Source::Loose { producer, .. } => self.down(SlotKey::Converted { code, producer }),
        }
    }

    pub(crate) fn down_len(&self) -> usize {
        self.down_keys.len()
    }

    pub(crate) fn up_len(&self) -> usize {
        self.up_keys.len()
    }
}

/// A conversion written next to a loose producer's output
#[derive(Clone)]
pub(crate) struct LooseWrite {
    /// Position in the producer's outputs
    pub output: usize,
    pub convert: Converter,
    pub slot: usize,
}

/// Where a node's downward outputs go
#[derive(Clone, Default)]
pub(crate) struct OutputPlan {
    pub slots: Vec<usize>,
    pub loose: Vec<LooseWrite>,
}

impl OutputPlan {
    pub(crate) fn write(&self, down: &mut Slots, values: Vec<Value>) {
        for write in &self.loose {
            down[write.slot] = Some((write.convert)(&values[write.output]));
        }
        for (slot, value) in self.slots.iter().zip(values) {
            down[*slot] = Some(value);
        }
    }
}

/// Reads the values at `slots`
///
/// # Panics
/// If a slot is empty, which a resolved chain never reads
pub(crate) fn read(down: &Slots, slots: &[usize]) -> Vec<Value> {
    slots
        .iter()
        .map(|slot| {
            down[*slot]
                .clone()
                .expect("inputs are written before they are read")
        })
        .collect()
}
