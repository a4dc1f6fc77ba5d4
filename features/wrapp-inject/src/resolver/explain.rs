use rustc_hash::FxHashSet;

use super::{Reason, State};

impl State<'_> {
    fn describe(&self, index: usize, reason: &Reason) -> String {
        let name = &self.nodes[index].name;
        match reason {
            Reason::Unmet { code, lost: None } => format!("'{name}' has no provider for {code}"),
            Reason::Unmet {
                code,
                lost: Some(lost),
            } => format!(
                "'{name}' lost its provider of {code}, '{}'",
                self.nodes[*lost].name
            ),
            Reason::Unconsumed { code } => format!("nothing consumes the {code} of '{name}'"),
            Reason::ClusterMember { member } => format!(
                "'{name}' shares a cluster with '{}'",
                self.nodes[*member].name
            ),
            Reason::Eliminated => format!("'{name}' is not needed"),
        }
    }

    /// Why `index` is excluded, following each cause back to where it started
    pub(super) fn explain(&self, index: usize) -> Vec<String> {
        let mut chain = Vec::new();
        let mut visited = FxHashSet::default();
        let mut current = Some(index);

        while let Some(index) = current {
            if !visited.insert(index) {
                break;
            }
            let Some(reason) = &self.reasons[index] else {
                break;
            };
            chain.push(self.describe(index, reason));
            current = reason.cause();
        }
        chain
    }

    /// One line per node excluded for a reason other than not being needed
    pub(super) fn report(&self) -> Vec<String> {
        self.reasons
            .iter()
            .enumerate()
            .filter_map(|(index, reason)| match reason {
                Some(Reason::Eliminated) | None => None,
                Some(reason) => Some(self.describe(index, reason)),
            })
            .collect()
    }
}
