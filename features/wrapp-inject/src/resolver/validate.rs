use crate::{
    dependency::{calculate, Dependencies},
    registry::TypeCode,
};

use super::{Reason, State};

impl State<'_> {
    /// Excludes invalid nodes, and the clusters they belong to, until every included node is
    /// valid. Returns the dependencies of the final set.
    pub(super) fn validate(&mut self) -> Dependencies {
        loop {
            let dependencies = calculate(self.nodes, &self.included);
            let violators: Vec<usize> = (0..self.nodes.len())
                .filter(|index| self.included[*index] && !dependencies.nodes[*index].is_valid())
                .collect();
            if violators.is_empty() {
                return dependencies;
            }

            for index in violators {
                let reason = self.reason_for(index, &dependencies);
                self.exclude(index, reason);
            }
        }
    }

    /// Excludes a node and every other member of its cluster
    pub(super) fn exclude(&mut self, index: usize, reason: Reason) {
        if !self.included[index] {
            return;
        }
        tracing::trace!("Excluding '{}': {reason:?}", self.nodes[index].name);
        self.included[index] = false;
        self.reasons[index] = Some(reason);

        let Some(cluster) = self.nodes[index].annotations.cluster else {
            return;
        };
        for member in 0..self.nodes.len() {
            if self.included[member] && self.nodes[member].annotations.cluster == Some(cluster) {
                self.included[member] = false;
                self.reasons[member] = Some(Reason::ClusterMember { member: index });
            }
        }
    }

    fn reason_for(&self, index: usize, dependencies: &Dependencies) -> Reason {
        let node = &dependencies.nodes[index];
        match node.unmet.first() {
            Some(code) => Reason::Unmet {
                code: *code,
                lost: self.lost_producer(index, *code),
            },
            None => Reason::Unconsumed {
                code: *node
                    .unconsumed
                    .first()
                    .expect("invalid nodes have an unmet or an unconsumed flow"),
            },
        }
    }

    /// The closest excluded node that produces `code` in either direction
    fn lost_producer(&self, index: usize, code: TypeCode) -> Option<usize> {
        (0..self.nodes.len())
            .filter(|candidate| *candidate != index && !self.included[*candidate])
            .filter(|candidate| {
                let flows = &self.nodes[*candidate].flows;
                flows.output.contains(&code) || flows.returns.contains(&code)
            })
            .min_by_key(|candidate| candidate.abs_diff(index))
    }
}
