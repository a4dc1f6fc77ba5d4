use std::collections::{BTreeMap, VecDeque};

use rustc_hash::FxHashSet;

use crate::{dependency::Dependencies, provider::ClusterId};

use super::{Reason, State};

impl State<'_> {
    /// Nodes reachable from `roots` by following what they use. Reaching one member of a
    /// cluster reaches all of them.
    fn reachable(&self, roots: &[usize], dependencies: &Dependencies) -> FxHashSet<usize> {
        let mut reached: FxHashSet<usize> = FxHashSet::default();
        let mut queue: VecDeque<usize> = roots.iter().copied().collect();

        while let Some(index) = queue.pop_front() {
            if !reached.insert(index) {
                continue;
            }
            queue.extend(dependencies.uses(index).map(|edge| edge.producer));
            if let Some(cluster) = self.nodes[index].annotations.cluster {
                queue.extend(self.cluster_members(cluster));
            }
        }
        reached
    }

    fn cluster_members(&self, cluster: ClusterId) -> impl Iterator<Item = usize> + '_ {
        (0..self.nodes.len())
            .filter(move |member| self.nodes[*member].annotations.cluster == Some(cluster))
    }

    /// Removal candidates: included, not required, and unreachable or shunned.
    /// A cluster is one candidate; candidates are ordered by their last member.
    fn candidates(&self, dependencies: &Dependencies, roots: &[usize]) -> Vec<Vec<usize>> {
        let reachable = self.reachable(roots, dependencies);
        let mut clusters: BTreeMap<ClusterId, Vec<usize>> = BTreeMap::new();
        let mut groups = Vec::new();

        for index in 0..self.nodes.len() {
            let node = &self.nodes[index];
            if !self.included[index]
                || self.is_required(index)
                || (reachable.contains(&index) && !node.annotations.shun)
            {
                continue;
            }
            match node.annotations.cluster {
                Some(cluster) => clusters.entry(cluster).or_default().push(index),
                None => groups.push(vec![index]),
            }
        }

        for (cluster, members) in clusters {
            // A cluster with a required member can never go
            let all: Vec<usize> = self
                .cluster_members(cluster)
                .filter(|member| self.included[*member])
                .collect();
            if all.iter().any(|member| self.is_required(*member)) {
                tracing::trace!("Keeping cluster of {members:?}, it has a required member");
                continue;
            }
            groups.push(all);
        }

        groups.sort_by_key(|group| group.iter().copied().max());
        groups
    }

    /// Tries to exclude every candidate, last first, keeping each exclusion that leaves all
    /// roots included
    pub(super) fn eliminate(&mut self, dependencies: Dependencies) {
        let nodes = self.nodes;
        let roots: Vec<usize> = (0..self.nodes.len())
            .filter(|index| self.included[*index] && self.is_root(*index))
            .collect();
        let groups = self.candidates(&dependencies, &roots);

        for group in groups.into_iter().rev() {
            if group.iter().all(|member| !self.included[*member]) {
                continue;
            }

            let mut trial = self.clone();
            for member in &group {
                trial.exclude(*member, Reason::Eliminated);
            }
            trial.validate();

            let names: Vec<&str> = group.iter().map(|member| &*nodes[*member].name).collect();
            if roots.iter().all(|root| trial.included[*root]) {
                tracing::trace!("Eliminated {names:?}");
                *self = trial;
            } else {
                tracing::trace!("Kept {names:?}, the chain needs them");
            }
        }
    }
}
