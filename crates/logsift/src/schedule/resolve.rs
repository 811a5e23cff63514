use std::collections::{HashMap, HashSet};

use crate::error::ConfigError;
use crate::parser::model::LogType;
use crate::plugin::PluginDescriptor;
use crate::store::Query;

/// One validated plugin. Dependencies and dependents are node ids.
#[derive(Debug)]
pub struct PluginNode {
    pub name: String,
    pub inputs: Vec<String>,
    pub output: String,
    pub query: Query,
    pub dependencies: Vec<usize>,
    pub dependents: Vec<usize>,
    pub workbook: Option<String>,
}

/// Immutable execution plan. Node ids follow registration order.
#[derive(Debug)]
pub struct Schedule {
    nodes: Vec<PluginNode>,
    order: Vec<usize>,
}

impl Schedule {
    /// Validate descriptors and build the plan. Nothing is executed and no
    /// state is touched when this fails.
    pub fn resolve(descriptors: &[PluginDescriptor]) -> Result<Self, ConfigError> {
        let index = index_names(descriptors)?;
        let producers = check_outputs(descriptors)?;

        let mut nodes = Vec::with_capacity(descriptors.len());
        for d in descriptors {
            // Repeated names collapse to one edge.
            let mut dependencies: Vec<usize> = Vec::with_capacity(d.dependencies.len());
            for dep in &d.dependencies {
                let id = index.get(dep.as_str()).copied().ok_or_else(|| {
                    ConfigError::MissingDependency {
                        plugin: d.name.clone(),
                        missing: dep.clone(),
                    }
                })?;
                if !dependencies.contains(&id) {
                    dependencies.push(id);
                }
            }

            nodes.push(PluginNode {
                name: d.name.clone(),
                inputs: d.inputs.clone(),
                output: d.output.clone(),
                query: build_query(d)?,
                dependencies,
                dependents: Vec::new(),
                workbook: d.workbook.clone(),
            });
        }

        if let Some(cycle) = find_cycle(&nodes) {
            return Err(ConfigError::DependencyCycle(cycle));
        }

        check_inputs(&nodes, &producers)?;

        for id in 0..nodes.len() {
            for dep in nodes[id].dependencies.clone() {
                if !nodes[dep].dependents.contains(&id) {
                    nodes[dep].dependents.push(id);
                }
            }
        }

        let order = topological_order(&nodes);
        Ok(Self { nodes, order })
    }

    pub fn nodes(&self) -> &[PluginNode] {
        &self.nodes
    }

    pub fn node(&self, id: usize) -> &PluginNode {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Dependencies before dependents; ties keep registration order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == name)
    }

    /// Every node reachable through dependent edges, in discovery order.
    pub fn transitive_dependents(&self, id: usize) -> Vec<usize> {
        let mut seen = vec![false; self.nodes.len()];
        let mut out = Vec::new();
        let mut stack: Vec<usize> = self.nodes[id].dependents.iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            if std::mem::replace(&mut seen[next], true) {
                continue;
            }
            out.push(next);
            stack.extend(self.nodes[next].dependents.iter().rev().copied());
        }
        out
    }
}

fn index_names(descriptors: &[PluginDescriptor]) -> Result<HashMap<&str, usize>, ConfigError> {
    let mut index = HashMap::with_capacity(descriptors.len());
    for (id, d) in descriptors.iter().enumerate() {
        if d.name.trim().is_empty() {
            return Err(ConfigError::EmptyPluginName);
        }
        if index.insert(d.name.as_str(), id).is_some() {
            return Err(ConfigError::DuplicatePlugin(d.name.clone()));
        }
    }
    Ok(index)
}

/// Output collections must be distinct and never a log-type collection.
fn check_outputs(descriptors: &[PluginDescriptor]) -> Result<HashMap<&str, usize>, ConfigError> {
    let mut producers: HashMap<&str, usize> = HashMap::new();
    for (id, d) in descriptors.iter().enumerate() {
        if d.output.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "plugin '{}' has an empty output collection",
                d.name
            )));
        }
        if let Some(log_type) = LogType::for_collection(&d.output) {
            return Err(ConfigError::CollectionConflict {
                plugin: d.name.clone(),
                collection: d.output.clone(),
                owner: format!("log type '{}'", log_type.as_str()),
            });
        }
        if let Some(other) = producers.insert(d.output.as_str(), id) {
            return Err(ConfigError::CollectionConflict {
                plugin: d.name.clone(),
                collection: d.output.clone(),
                owner: format!("plugin '{}'", descriptors[other].name),
            });
        }
    }
    Ok(producers)
}

fn build_query(d: &PluginDescriptor) -> Result<Query, ConfigError> {
    if d.inputs.is_empty() {
        return Err(ConfigError::NoInputs {
            plugin: d.name.clone(),
        });
    }
    let filter = d.filter.clone().ok_or_else(|| ConfigError::IncompleteQuery {
        plugin: d.name.clone(),
        missing: "filter",
    })?;
    let projection = d.projection.clone().ok_or_else(|| ConfigError::IncompleteQuery {
        plugin: d.name.clone(),
        missing: "projection",
    })?;
    Query::new(filter, projection).map_err(|e| ConfigError::InvalidQuery {
        plugin: d.name.clone(),
        reason: e.to_string(),
    })
}

/// Inputs must be log-type collections or the output of a (transitive)
/// dependency, so every read happens after the write completed.
fn check_inputs(nodes: &[PluginNode], producers: &HashMap<&str, usize>) -> Result<(), ConfigError> {
    for (id, node) in nodes.iter().enumerate() {
        let upstream = ancestors(nodes, id);
        for input in &node.inputs {
            if LogType::for_collection(input).is_some() {
                continue;
            }
            match producers.get(input.as_str()) {
                None => {
                    return Err(ConfigError::UnknownCollection {
                        plugin: node.name.clone(),
                        collection: input.clone(),
                    })
                }
                Some(&producer) if !upstream.contains(&producer) => {
                    return Err(ConfigError::UndeclaredDependency {
                        plugin: node.name.clone(),
                        collection: input.clone(),
                        producer: nodes[producer].name.clone(),
                    })
                }
                Some(_) => {}
            }
        }
    }
    Ok(())
}

fn ancestors(nodes: &[PluginNode], id: usize) -> HashSet<usize> {
    let mut seen = HashSet::new();
    let mut stack = nodes[id].dependencies.clone();
    while let Some(next) = stack.pop() {
        if seen.insert(next) {
            stack.extend(nodes[next].dependencies.iter().copied());
        }
    }
    seen
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    Active,
    Done,
}

/// Depth-first search over dependency edges. Returns the first cycle found
/// as a closed path of names (`a -> b -> a`).
fn find_cycle(nodes: &[PluginNode]) -> Option<Vec<String>> {
    let mut marks = vec![Mark::Unvisited; nodes.len()];
    let mut path = Vec::new();

    fn visit(
        id: usize,
        nodes: &[PluginNode],
        marks: &mut [Mark],
        path: &mut Vec<usize>,
    ) -> Option<Vec<String>> {
        marks[id] = Mark::Active;
        path.push(id);
        for &dep in &nodes[id].dependencies {
            match marks[dep] {
                Mark::Active => {
                    let start = path.iter().position(|&p| p == dep).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|&p| nodes[p].name.clone()).collect();
                    cycle.push(nodes[dep].name.clone());
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = visit(dep, nodes, marks, path) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }
        path.pop();
        marks[id] = Mark::Done;
        None
    }

    (0..nodes.len()).find_map(|id| {
        if marks[id] == Mark::Unvisited {
            visit(id, nodes, &mut marks, &mut path)
        } else {
            None
        }
    })
}

/// Kahn's algorithm, always taking the lowest ready id.
fn topological_order(nodes: &[PluginNode]) -> Vec<usize> {
    let mut remaining: Vec<usize> = nodes.iter().map(|n| n.dependencies.len()).collect();
    let mut ready: std::collections::BTreeSet<usize> =
        (0..nodes.len()).filter(|&id| remaining[id] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(id) = ready.pop_first() {
        order.push(id);
        for &dependent in &nodes[id].dependents {
            remaining[dependent] -= 1;
            if remaining[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }
    order
}
