//! Dependency resolution: start/stop order from declared dependencies.
//!
//! Depth-first topological sort with three-color marking. Roots are visited
//! in name order, and each node's dependencies in declaration order, so the
//! output is deterministic for a given graph.

use std::collections::{BTreeMap, HashMap};

use crate::types::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Computes an order where every dependency precedes its dependents.
#[derive(Debug)]
pub struct DependencyResolver<'a> {
    graph: &'a BTreeMap<String, Vec<String>>,
    marks: HashMap<&'a str, Mark>,
    order: Vec<String>,
}

impl<'a> DependencyResolver<'a> {
    /// Resolve `graph` (service → declared dependencies) into a start order.
    ///
    /// Fails with [`Error::CircularDependency`] on the first cycle found and
    /// [`Error::UnknownDependency`] on an edge to an unregistered name.
    pub fn resolve(graph: &'a BTreeMap<String, Vec<String>>) -> Result<Vec<String>> {
        let mut resolver = Self {
            graph,
            marks: HashMap::with_capacity(graph.len()),
            order: Vec::with_capacity(graph.len()),
        };
        for name in graph.keys() {
            resolver.visit(name)?;
        }
        Ok(resolver.order)
    }

    fn visit(&mut self, name: &'a str) -> Result<()> {
        match self.marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::InProgress) => return Err(Error::CircularDependency(name.to_string())),
            None => {}
        }

        let graph = self.graph;
        let deps = match graph.get(name) {
            Some(deps) => deps,
            None => return Err(Error::NotRegistered(name.to_string())),
        };

        self.marks.insert(name, Mark::InProgress);
        for dep in deps {
            if !graph.contains_key(dep) {
                return Err(Error::unknown_dependency(name, dep.as_str()));
            }
            self.visit(dep)?;
        }
        self.marks.insert(name, Mark::Done);
        self.order.push(name.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn graph(edges: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        edges
            .iter()
            .map(|(name, deps)| {
                (
                    name.to_string(),
                    deps.iter().map(|d| d.to_string()).collect(),
                )
            })
            .collect()
    }

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn test_dependency_precedes_dependent() {
        let g = graph(&[("b", &["a"]), ("a", &[])]);
        let order = DependencyResolver::resolve(&g).unwrap();
        assert_eq!(order, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_diamond() {
        let g = graph(&[
            ("app", &["db", "cache"]),
            ("cache", &["net"]),
            ("db", &["net"]),
            ("net", &[]),
        ]);
        let order = DependencyResolver::resolve(&g).unwrap();

        assert_eq!(order.len(), 4);
        assert!(position(&order, "net") < position(&order, "db"));
        assert!(position(&order, "net") < position(&order, "cache"));
        assert!(position(&order, "db") < position(&order, "app"));
        assert!(position(&order, "cache") < position(&order, "app"));
    }

    #[test]
    fn test_deterministic_for_independent_services() {
        let g = graph(&[("zeta", &[]), ("alpha", &[]), ("mid", &[])]);
        let first = DependencyResolver::resolve(&g).unwrap();
        let second = DependencyResolver::resolve(&g).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_two_cycle() {
        let g = graph(&[("a", &["b"]), ("b", &["a"])]);
        let err = DependencyResolver::resolve(&g).unwrap_err();
        assert!(matches!(err, Error::CircularDependency(_)));
    }

    #[test]
    fn test_self_cycle() {
        let g = graph(&[("loop", &["loop"])]);
        let err = DependencyResolver::resolve(&g).unwrap_err();
        assert!(matches!(err, Error::CircularDependency(name) if name == "loop"));
    }

    #[test]
    fn test_long_cycle_behind_healthy_prefix() {
        let g = graph(&[
            ("a", &[]),
            ("b", &["a", "c"]),
            ("c", &["d"]),
            ("d", &["b"]),
        ]);
        assert!(matches!(
            DependencyResolver::resolve(&g),
            Err(Error::CircularDependency(_))
        ));
    }

    #[test]
    fn test_unknown_dependency() {
        let g = graph(&[("api", &["auth"])]);
        let err = DependencyResolver::resolve(&g).unwrap_err();
        match err {
            Error::UnknownDependency { service, dependency } => {
                assert_eq!(service, "api");
                assert_eq!(dependency, "auth");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_graph() {
        let g = BTreeMap::new();
        assert!(DependencyResolver::resolve(&g).unwrap().is_empty());
    }

    /// Random DAG: node i may only depend on nodes with a smaller index.
    fn dag() -> impl Strategy<Value = BTreeMap<String, Vec<String>>> {
        (1usize..12).prop_flat_map(|n| {
            prop::collection::vec(prop::collection::vec(any::<prop::sample::Index>(), 0..4), n)
                .prop_map(move |picks| {
                    picks
                        .into_iter()
                        .enumerate()
                        .map(|(i, deps)| {
                            let mut names: Vec<String> = if i == 0 {
                                Vec::new()
                            } else {
                                deps.iter().map(|d| format!("svc{:02}", d.index(i))).collect()
                            };
                            names.dedup();
                            (format!("svc{i:02}"), names)
                        })
                        .collect()
                })
        })
    }

    proptest! {
        #[test]
        fn prop_every_dependency_precedes_dependent(g in dag()) {
            let order = DependencyResolver::resolve(&g).unwrap();
            prop_assert_eq!(order.len(), g.len());
            for (name, deps) in &g {
                for dep in deps {
                    prop_assert!(position(&order, dep) < position(&order, name));
                }
            }
        }
    }
}
