//! Dependency graph over one batch of plugin descriptors

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::application::errors::PluginError;
use crate::domain::entities::PluginDescriptor;

/// Plugin name -> (dependency name -> constraint)
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, BTreeMap<String, String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_descriptors<'a>(descriptors: impl IntoIterator<Item = &'a PluginDescriptor>) -> Self {
        let mut graph = Self::new();
        for descriptor in descriptors {
            graph.add(&descriptor.name, descriptor.dependencies.clone());
        }
        graph
    }

    pub fn add(&mut self, name: &str, dependencies: BTreeMap<String, String>) {
        self.nodes.insert(name.to_string(), dependencies);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn dependencies(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.nodes.get(name)
    }

    /// Order the batch so every plugin follows its dependencies
    ///
    /// Dependencies found in `loaded` are already running and add no edge.
    /// Any other dependency outside the batch fails the whole batch, as does
    /// a cycle; the cycle error names every node that could not be ordered.
    pub fn load_order(&self, loaded: &BTreeSet<String>) -> Result<Vec<String>, PluginError> {
        let mut in_degree: BTreeMap<&str, usize> = self.nodes.keys().map(|k| (k.as_str(), 0)).collect();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

        for (name, deps) in &self.nodes {
            for (dep, constraint) in deps {
                if self.nodes.contains_key(dep) {
                    dependents.entry(dep.as_str()).or_default().push(name.as_str());
                    *in_degree.entry(name.as_str()).or_insert(0) += 1;
                } else if !loaded.contains(dep) {
                    tracing::error!("Plugin {} depends on missing plugin {}", name, dep);
                    return Err(PluginError::DependencyNotFound {
                        plugin: name.clone(),
                        dependency: dep.clone(),
                        constraint: constraint.clone(),
                    });
                }
            }
        }

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(node) = queue.pop_front() {
            order.push(node.to_string());
            for dependent in dependents.get(node).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*dependent);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let remaining: Vec<String> = self
                .nodes
                .keys()
                .filter(|name| !order.contains(name))
                .cloned()
                .collect();
            return Err(PluginError::CircularDependency(remaining));
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `deps` is space separated
    fn graph(edges: &[(&str, &str)]) -> DependencyGraph {
        let mut g = DependencyGraph::new();
        for (name, deps) in edges {
            let deps = deps
                .split_whitespace()
                .map(|d| (d.to_string(), String::new()))
                .collect();
            g.add(name, deps);
        }
        g
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_dependencies_come_first() {
        let g = graph(&[
            ("app", "db log"),
            ("db", "log"),
            ("log", ""),
            ("extra", "app"),
        ]);
        let order = g.load_order(&BTreeSet::new()).unwrap();
        assert_eq!(order.len(), 4);
        assert!(position(&order, "log") < position(&order, "db"));
        assert!(position(&order, "db") < position(&order, "app"));
        assert!(position(&order, "app") < position(&order, "extra"));
    }

    #[test]
    fn test_cycle_names_every_unordered_node() {
        let g = graph(&[("x", "y"), ("y", "x"), ("z", "x"), ("free", "")]);
        match g.load_order(&BTreeSet::new()) {
            Err(PluginError::CircularDependency(nodes)) => {
                assert_eq!(nodes, vec!["x", "y", "z"]);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_missing_dependency() {
        let g = graph(&[("a", "ghost")]);
        assert!(matches!(
            g.load_order(&BTreeSet::new()),
            Err(PluginError::DependencyNotFound { .. })
        ));

        let loaded: BTreeSet<String> = ["ghost".to_string()].into_iter().collect();
        assert_eq!(g.load_order(&loaded).unwrap(), vec!["a"]);
    }
}
