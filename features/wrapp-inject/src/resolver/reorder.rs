use std::collections::BTreeSet;

use crate::{
    characterize::{Class, Group, Node},
    errors::ResolveError,
};

/// Moves providers marked `reorder` within their phase.
///
/// Unmarked nodes keep their relative order. A marked node goes after every node of its phase
/// producing one of its inputs and before every node consuming one of its outputs; when
/// several nodes could go next, marked ones go first, then the one declared earliest.
pub(crate) fn reorder(nodes: Vec<Node>) -> Result<Vec<Node>, ResolveError> {
    if !nodes.iter().any(|node| node.annotations.reorder) {
        return Ok(nodes);
    }

    let statics: Vec<usize> = segment(&nodes, |group| group == Group::Static);
    let run: Vec<usize> = segment(&nodes, |group| matches!(group, Group::Run | Group::Final));
    let static_order = order_segment(&nodes, &statics)?;
    let run_order = order_segment(&nodes, &run)?;

    // Layout: [init] literals statics invoke run.. final
    let rest: Vec<usize> = (0..nodes.len())
        .filter(|index| !statics.contains(index) && !run.contains(index))
        .collect();
    let mut ordered = Vec::with_capacity(nodes.len());
    let mut slots: Vec<Option<Node>> = nodes.into_iter().map(Some).collect();
    let mut take = |index: usize| slots[index].take().expect("each node is placed once");

    for index in rest {
        let node = take(index);
        let is_invoke = node.class == Class::Invoke;
        if is_invoke {
            ordered.extend(static_order.iter().map(|index| take(*index)));
        }
        ordered.push(node);
        if is_invoke {
            ordered.extend(run_order.iter().map(|index| take(*index)));
        }
    }
    Ok(ordered)
}

fn segment(nodes: &[Node], in_segment: impl Fn(Group) -> bool) -> Vec<usize> {
    (0..nodes.len())
        .filter(|index| in_segment(nodes[*index].group()))
        .collect()
}

/// Kahn's algorithm over the placement constraints of one segment
fn order_segment(nodes: &[Node], segment: &[usize]) -> Result<Vec<usize>, ResolveError> {
    let count = segment.len();
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); count];
    let mut predecessors = vec![0_usize; count];
    let mut constrain = |before: usize, after: usize| {
        successors[before].push(after);
        predecessors[after] += 1;
    };

    let movable = |local: usize| nodes[segment[local]].annotations.reorder;
    let fixed: Vec<usize> = (0..count).filter(|local| !movable(*local)).collect();
    for pair in fixed.windows(2) {
        constrain(pair[0], pair[1]);
    }

    for moved in (0..count).filter(|local| movable(*local)) {
        let flows = &nodes[segment[moved]].flows;
        for other in (0..count).filter(|other| *other != moved) {
            let other_flows = &nodes[segment[other]].flows;
            if other_flows.output.iter().any(|code| flows.input.contains(code)) {
                constrain(other, moved);
            }
            if other_flows.input.iter().any(|code| flows.output.contains(code)) {
                constrain(moved, other);
            }
            if nodes[segment[other]].class == Class::Final {
                constrain(moved, other);
            }
        }
    }

    // Ready nodes ordered by (fixed, declaration position)
    let key = |local: usize| (!movable(local), nodes[segment[local]].position, local);
    let mut ready: BTreeSet<(bool, usize, usize)> = (0..count)
        .filter(|local| predecessors[*local] == 0)
        .map(key)
        .collect();

    let mut order = Vec::with_capacity(count);
    while let Some((_, _, local)) = ready.pop_first() {
        order.push(segment[local]);
        for next in &successors[local] {
            predecessors[*next] -= 1;
            if predecessors[*next] == 0 {
                ready.insert(key(*next));
            }
        }
    }

    if order.len() < count {
        let providers = (0..count)
            .filter(|local| predecessors[*local] > 0)
            .map(|local| nodes[segment[local]].name.to_string())
            .collect();
        return Err(ResolveError::ReorderCycle { providers });
    }
    if order.iter().ne(segment.iter()) {
        tracing::debug!("Reordered {} providers", order.len());
    }
    Ok(order)
}
