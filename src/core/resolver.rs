//! RK-005: Dependency DAG construction and reference validation.
//!
//! Stacks form a DAG through their imports; resources inside a template
//! form one through `Ref`, `Fn::GetAtt` and `DependsOn`. Both orders are
//! computed with Kahn's algorithm with deterministic (alphabetical)
//! tie-breaking.

use super::error::{Error, Result};
use super::intrinsic;
use super::template::Template;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};

/// Deployment order of stacks. `graph` maps each stack to the stacks it
/// depends on.
pub fn stack_order(graph: &IndexMap<String, Vec<String>>) -> Result<Vec<String>> {
    for deps in graph.values() {
        for dep in deps {
            if !graph.contains_key(dep) {
                return Err(Error::UnknownStack(dep.clone()));
            }
        }
    }
    let ids: Vec<String> = graph.keys().cloned().collect();
    let deps: HashMap<String, Vec<String>> =
        graph.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    kahn(&ids, &deps)
}

/// Creation order of resources inside one template.
pub fn creation_order(template: &Template) -> Result<Vec<String>> {
    let ids: Vec<String> = template.resources.keys().cloned().collect();
    let mut deps: HashMap<String, Vec<String>> = HashMap::new();
    for (id, resource) in &template.resources {
        let mut edges: Vec<String> = intrinsic::references(&resource.properties)
            .into_iter()
            .filter(|r| template.resources.contains_key(r))
            .collect();
        for d in &resource.depends_on {
            if template.resources.contains_key(d) && !edges.contains(d) {
                edges.push(d.clone());
            }
        }
        deps.insert(id.clone(), edges);
    }
    kahn(&ids, &deps)
}

/// Every `Ref`, `Fn::GetAtt` and `DependsOn` target must exist in the same
/// template, and the resource graph must be acyclic.
pub fn validate_template(stack: &str, template: &Template) -> Result<()> {
    let dangling = |from: &str, to: &str| Error::DanglingReference {
        stack: stack.to_string(),
        from: from.to_string(),
        to: to.to_string(),
    };

    for (id, resource) in &template.resources {
        for target in intrinsic::references(&resource.properties) {
            if !template.resources.contains_key(&target)
                && !template.parameters.contains_key(&target)
            {
                return Err(dangling(id, &target));
            }
        }
        for dep in &resource.depends_on {
            if !template.resources.contains_key(dep) {
                return Err(dangling(id, dep));
            }
        }
    }
    for (id, output) in &template.outputs {
        for target in intrinsic::references(&output.value) {
            if !template.resources.contains_key(&target)
                && !template.parameters.contains_key(&target)
            {
                return Err(dangling(id, &target));
            }
        }
    }

    creation_order(template).map(|_| ())
}

/// Kahn's algorithm. `deps[id]` lists what `id` must come after.
fn kahn(ids: &[String], deps: &HashMap<String, Vec<String>>) -> Result<Vec<String>> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for id in ids {
        in_degree.insert(id.as_str(), 0);
        dependents.insert(id.as_str(), Vec::new());
    }
    for id in ids {
        for dep in deps.get(id).into_iter().flatten() {
            if let Some(list) = dependents.get_mut(dep.as_str()) {
                list.push(id.as_str());
                *in_degree.entry(id.as_str()).or_default() += 1;
            }
        }
    }

    let mut zero_degree: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| *id)
        .collect();
    zero_degree.sort_unstable();
    let mut queue: VecDeque<&str> = zero_degree.into_iter().collect();

    let mut order = Vec::with_capacity(ids.len());
    while let Some(current) = queue.pop_front() {
        order.push(current.to_string());

        let mut next_ready: Vec<&str> = Vec::new();
        for &next in dependents.get(current).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    next_ready.push(next);
                }
            }
        }
        next_ready.sort_unstable();
        queue.extend(next_ready);
    }

    if order.len() != ids.len() {
        let ordered: HashSet<&str> = order.iter().map(|s| s.as_str()).collect();
        let mut cycle_members: Vec<&str> = ids
            .iter()
            .map(|s| s.as_str())
            .filter(|id| !ordered.contains(id))
            .collect();
        cycle_members.sort_unstable();
        return Err(Error::DependencyCycle(cycle_members.join(", ")));
    }

    Ok(order)
}
