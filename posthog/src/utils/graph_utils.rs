use std::collections::HashMap;

use petgraph::{
    algo::toposort,
    graph::{DiGraph, NodeIndex},
};

use crate::flags::flag_models::FeatureFlag;
use crate::properties::property_models::PropertyType;

/// Fill in `dependency_chain` on every `flag`-typed filter the server left
/// blank.
///
/// The chain lists the transitive flag dependencies of the referenced flag,
/// dependencies first and the referenced flag last, so the evaluator can walk
/// it front to back without ever revisiting the graph. Any cycle through the
/// referenced flag collapses the chain to empty, which the evaluator treats
/// as inconclusive.
pub fn populate_dependency_chains(flags: &mut [FeatureFlag]) {
    let direct_deps: HashMap<String, Vec<String>> = flags
        .iter()
        .map(|flag| (flag.key.clone(), referenced_flag_keys(flag)))
        .collect();

    for flag in flags.iter_mut() {
        for condition in flag.filters.groups.iter_mut() {
            let Some(properties) = condition.properties.as_mut() else {
                continue;
            };
            for filter in properties.iter_mut() {
                if filter.prop_type == PropertyType::Flag && filter.dependency_chain.is_none() {
                    filter.dependency_chain =
                        Some(dependency_chain_for(&filter.key, &direct_deps));
                }
            }
        }
    }
}

fn referenced_flag_keys(flag: &FeatureFlag) -> Vec<String> {
    flag.filters
        .groups
        .iter()
        .flat_map(|condition| condition.properties.iter().flatten())
        .filter(|filter| filter.prop_type == PropertyType::Flag)
        .map(|filter| filter.key.clone())
        .collect()
}

/// Compute the evaluation order for one referenced flag.
///
/// Edges point from dependent to dependency, so a topological sort yields
/// dependents before dependencies; the reversed order is what the evaluator
/// wants. Every node in the subgraph is reachable from the target, which
/// lands the target itself at the very end.
fn dependency_chain_for(target: &str, direct_deps: &HashMap<String, Vec<String>>) -> Vec<String> {
    let mut graph = DiGraph::<String, ()>::new();
    let mut indices: HashMap<String, NodeIndex> = HashMap::new();

    let mut queue = vec![target.to_string()];
    while let Some(key) = queue.pop() {
        if indices.contains_key(&key) {
            continue;
        }
        let index = graph.add_node(key.clone());
        indices.insert(key.clone(), index);
        for dep in direct_deps.get(&key).into_iter().flatten() {
            queue.push(dep.clone());
        }
    }

    for (key, &index) in &indices {
        for dep in direct_deps.get(key).into_iter().flatten() {
            if let Some(&dep_index) = indices.get(dep) {
                graph.add_edge(index, dep_index, ());
            }
        }
    }

    match toposort(&graph, None) {
        Ok(order) => order
            .into_iter()
            .rev()
            .map(|index| graph[index].clone())
            .collect(),
        Err(_) => {
            tracing::warn!("dependency cycle through flag '{target}', marking inconclusive");
            Vec::new()
        }
    }
}
