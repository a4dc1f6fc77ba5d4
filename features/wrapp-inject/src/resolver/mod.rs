//! Decides which nodes make up the chain.
//!
//! Every node starts included. [State::validate] excludes nodes whose flows cannot be satisfied
//! until nothing changes, then [State::eliminate] tries to drop every node the required and
//! desired ones do not need.

mod eliminate;
mod explain;
mod reorder;
mod validate;

pub(crate) use reorder::reorder;

use crate::{
    characterize::{Class, Node},
    config::InjectConfig,
    dependency::Dependencies,
    errors::ResolveError,
    registry::TypeCode,
};

/// Why a node was excluded
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Reason {
    /// Nothing included provides `code`; `lost` is an excluded node that would have
    Unmet { code: TypeCode, lost: Option<usize> },
    /// `code` must be consumed but nothing included does
    Unconsumed { code: TypeCode },
    /// Excluded together with another member of its cluster
    ClusterMember { member: usize },
    /// Not needed by any required, desired or wanted node
    Eliminated,
}

impl Reason {
    /// The node whose exclusion caused this one
    fn cause(&self) -> Option<usize> {
        match self {
            Reason::Unmet { lost, .. } => *lost,
            Reason::ClusterMember { member } => Some(*member),
            Reason::Unconsumed { .. } | Reason::Eliminated => None,
        }
    }
}

/// The included set and the dependencies between its members
#[derive(Debug)]
pub(crate) struct Resolution {
    pub included: Vec<bool>,
    pub dependencies: Dependencies,
    /// One per desired node that could not be included
    pub warnings: Vec<String>,
}

/// Per node inclusion flags of one resolution
#[derive(Clone)]
pub(crate) struct State<'a> {
    nodes: &'a [Node],
    included: Vec<bool>,
    reasons: Vec<Option<Reason>>,
}

impl<'a> State<'a> {
    fn new(nodes: &'a [Node]) -> Self {
        Self {
            nodes,
            included: vec![true; nodes.len()],
            reasons: vec![None; nodes.len()],
        }
    }

    fn is_required(&self, index: usize) -> bool {
        let node = &self.nodes[index];
        node.annotations.required
            || matches!(node.class, Class::Init | Class::Invoke | Class::Final)
    }

    /// Nodes the chain is built for
    fn is_root(&self, index: usize) -> bool {
        let node = &self.nodes[index];
        self.is_required(index) || node.annotations.desired || node.is_wanted()
    }

    /// Desired nodes are kept when possible; losing one is reported, not fatal
    fn excluded_desired(&self) -> Vec<String> {
        (0..self.nodes.len())
            .filter(|index| self.nodes[*index].annotations.desired && !self.included[*index])
            .map(|index| {
                let warning = format!(
                    "desired provider '{}' was excluded: {}",
                    self.nodes[index].name,
                    self.explain(index).join(", ")
                );
                tracing::warn!("{warning}");
                warning
            })
            .collect()
    }

    fn excluded_count(&self) -> usize {
        self.included.iter().filter(|included| !**included).count()
    }

    fn check_required(&self, config: &InjectConfig) -> Result<(), ResolveError> {
        let Some(index) = (0..self.nodes.len())
            .find(|index| self.is_required(*index) && !self.included[*index])
        else {
            return Ok(());
        };

        let report = if config.report_exclusions {
            self.report()
        } else {
            Vec::new()
        };
        Err(ResolveError::RequiredExcluded {
            provider: self.nodes[index].name.to_string(),
            chain: self.explain(index),
            report,
        })
    }
}

/// Finds the smallest valid set of nodes containing every required one
pub(crate) fn resolve(nodes: &[Node], config: &InjectConfig) -> Result<Resolution, ResolveError> {
    let mut state = State::new(nodes);

    let dependencies = state.validate();
    state.check_required(config)?;
    tracing::trace!(
        "Validation excluded {} of {} nodes",
        state.excluded_count(),
        nodes.len()
    );

    state.eliminate(dependencies);

    let mut check = state.clone();
    let dependencies = check.validate();
    if check.included != state.included {
        let changed: Vec<String> = (0..nodes.len())
            .filter(|index| check.included[*index] != state.included[*index])
            .map(|index| nodes[index].name.to_string())
            .collect();
        return Err(ResolveError::Internal(format!(
            "revalidating the resolved chain excluded {changed:?}"
        )));
    }

    tracing::debug!(
        "Resolved chain with {} of {} nodes",
        nodes.len() - state.excluded_count(),
        nodes.len()
    );
    let warnings = state.excluded_desired();
    Ok(Resolution {
        included: state.included,
        dependencies,
        warnings,
    })
}
