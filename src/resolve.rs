//! Dependency Resolver: wire order of a container's fields.
//!
//! Builds a graph with an edge from every size field and every prerequisite
//! field to the field that needs it, then runs Kahn's algorithm. Among fields
//! that are ready at the same time the earliest declared goes first, so
//! declaration order survives wherever no dependency says otherwise.

use crate::error::SchemaError;
use crate::model::Field;
use log::trace;
use std::collections::{BTreeSet, HashMap};

/// Field dependency graph of one container (or struct).
#[derive(Debug)]
pub struct DependencyGraph<'a> {
    names: Vec<&'a str>,
    /// `dependents[d]`: fields that need `d` first.
    dependents: Vec<Vec<usize>>,
    /// `dependencies[f]`: fields `f` needs first.
    dependencies: Vec<Vec<usize>>,
}

impl<'a> DependencyGraph<'a> {
    pub fn build(fields: &'a [Field], context: &str) -> Result<Self, SchemaError> {
        let index: HashMap<&str, usize> = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.as_str(), i))
            .collect();
        let mut dependents = vec![Vec::new(); fields.len()];
        let mut dependencies: Vec<Vec<usize>> = vec![Vec::new(); fields.len()];

        for (i, f) in fields.iter().enumerate() {
            if let Some(size_field) = f.linkage.size_field() {
                let d = *index.get(size_field).ok_or_else(|| SchemaError::MissingArraySizeField {
                    field: f.name.clone(),
                    size_field: Some(size_field.to_string()),
                    context: context.to_string(),
                })?;
                add_edge(&mut dependents, &mut dependencies, d, i);
            }
            for p in &f.prerequisites {
                let d = *index.get(p.sibling()).ok_or_else(|| {
                    SchemaError::UnknownPrerequisiteField {
                        field: f.name.clone(),
                        prerequisite: p.field.clone(),
                        context: context.to_string(),
                    }
                })?;
                add_edge(&mut dependents, &mut dependencies, d, i);
            }
        }

        Ok(DependencyGraph {
            names: fields.iter().map(|f| f.name.as_str()).collect(),
            dependents,
            dependencies,
        })
    }

    /// Stable topological order as indices into the declaration list.
    pub fn topological_sort(&self, context: &str) -> Result<Vec<usize>, SchemaError> {
        let mut in_degree: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<usize> = (0..self.names.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.names.len());

        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &dependent in &self.dependents[next] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() < self.names.len() {
            let cycle = self.find_cycle(&in_degree);
            return Err(SchemaError::CyclicFieldDependency {
                cycle,
                context: context.to_string(),
            });
        }
        Ok(order)
    }

    /// Every field left with a nonzero in-degree waits on another such field, so
    /// following dependencies from any of them must revisit a node.
    fn find_cycle(&self, in_degree: &[usize]) -> Vec<String> {
        let Some(start) = (0..self.names.len()).find(|&i| in_degree[i] > 0) else {
            return Vec::new();
        };
        let mut path = vec![start];
        let mut current = start;
        loop {
            let next = self.dependencies[current]
                .iter()
                .copied()
                .find(|&d| in_degree[d] > 0);
            let Some(next) = next else {
                break;
            };
            if let Some(pos) = path.iter().position(|&p| p == next) {
                let mut cycle: Vec<String> =
                    path[pos..].iter().map(|&i| self.names[i].to_string()).collect();
                cycle.push(self.names[next].to_string());
                return cycle;
            }
            path.push(next);
            current = next;
        }
        path.iter().map(|&i| self.names[i].to_string()).collect()
    }
}

fn add_edge(dependents: &mut [Vec<usize>], dependencies: &mut [Vec<usize>], from: usize, to: usize) {
    if !dependencies[to].contains(&from) {
        dependencies[to].push(from);
        dependents[from].push(to);
    }
}

/// Fields of a container in wire order.
pub fn resolve_order(fields: &[Field], context: &str) -> Result<Vec<Field>, SchemaError> {
    let graph = DependencyGraph::build(fields, context)?;
    let order = graph.topological_sort(context)?;
    trace!(
        "{}: wire order {:?}",
        context,
        order.iter().map(|&i| fields[i].name.as_str()).collect::<Vec<_>>()
    );
    Ok(order.into_iter().map(|i| fields[i].clone()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Literal, Operator};
    use crate::format::{Element, Format, IntFormat};
    use crate::model::{Linkage, Prerequisite};

    fn int(name: &str) -> Field {
        Field {
            name: name.to_string(),
            tag: None,
            mandatory: false,
            format: Format::Int(IntFormat::U32),
            linkage: Linkage::None,
            prerequisites: Vec::new(),
            origin: None,
            length_prefix: None,
        }
    }

    fn array(name: &str, size_field: &str) -> Field {
        Field {
            format: Format::Array(Element::Int(IntFormat::U32)),
            linkage: Linkage::ArraySize { size_field: size_field.to_string() },
            ..int(name)
        }
    }

    fn gated(mut f: Field, on: &str) -> Field {
        f.prerequisites.push(Prerequisite {
            field: on.to_string(),
            operation: Operator::Eq,
            value: Literal::Int(1),
        });
        f
    }

    fn names(fields: &[Field]) -> Vec<&str> {
        fields.iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn declaration_order_kept_without_constraints() {
        let fields = vec![int("c"), int("a"), int("b")];
        assert_eq!(names(&resolve_order(&fields, "t").unwrap()), vec!["c", "a", "b"]);
    }

    #[test]
    fn size_field_moves_before_array() {
        let fields = vec![array("items", "count"), int("x"), int("count")];
        let order = resolve_order(&fields, "t").unwrap();
        assert_eq!(names(&order), vec!["x", "count", "items"]);
    }

    #[test]
    fn multi_level_prerequisites() {
        // c needs b, b needs a; declared in reverse.
        let fields = vec![gated(int("c"), "b"), gated(int("b"), "a"), int("a"), int("z")];
        let order = resolve_order(&fields, "t").unwrap();
        assert_eq!(names(&order), vec!["a", "b", "c", "z"]);
    }

    #[test]
    fn dotted_prerequisite_depends_on_struct_field() {
        let mut status = int("result");
        status.format = Format::Struct;
        status.linkage = Linkage::Struct { struct_type: "R".into() };
        let fields = vec![gated(int("data"), "result.error"), status];
        let order = resolve_order(&fields, "t").unwrap();
        assert_eq!(names(&order), vec!["result", "data"]);
    }

    #[test]
    fn mutual_dependency_is_a_cycle() {
        let fields = vec![gated(int("f"), "g"), array("g", "f")];
        match resolve_order(&fields, "message 'M' request") {
            Err(SchemaError::CyclicFieldDependency { cycle, context }) => {
                assert_eq!(cycle.first(), cycle.last());
                assert!(cycle.contains(&"f".to_string()));
                assert!(cycle.contains(&"g".to_string()));
                assert_eq!(context, "message 'M' request");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let fields = vec![int("a"), gated(int("b"), "b")];
        match resolve_order(&fields, "t") {
            Err(SchemaError::CyclicFieldDependency { cycle, .. }) => {
                assert_eq!(cycle, vec!["b".to_string(), "b".to_string()])
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn cycle_behind_acyclic_prefix() {
        let fields = vec![
            int("a"),
            gated(int("x"), "z"),
            gated(int("y"), "x"),
            gated(int("z"), "y"),
        ];
        match resolve_order(&fields, "t") {
            Err(SchemaError::CyclicFieldDependency { cycle, .. }) => {
                assert_eq!(cycle.len(), 4);
                assert!(!cycle.contains(&"a".to_string()));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn every_edge_respected() {
        let fields = vec![
            gated(array("items", "n"), "flag"),
            int("flag"),
            gated(int("extra"), "items"),
            int("n"),
        ];
        let order = resolve_order(&fields, "t").unwrap();
        let pos = |n: &str| order.iter().position(|f| f.name == n).unwrap();
        assert!(pos("n") < pos("items"));
        assert!(pos("flag") < pos("items"));
        assert!(pos("items") < pos("extra"));
    }

    #[test]
    fn unknown_size_field_rejected() {
        let fields = vec![array("items", "ghost")];
        assert!(matches!(
            resolve_order(&fields, "t"),
            Err(SchemaError::MissingArraySizeField { .. })
        ));
    }
}
