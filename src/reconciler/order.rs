//! Dependency ordering.
//!
//! A stable topological sort: among descriptors whose dependencies are all
//! ordered, the one declared first comes first. Malformed graphs are rejected
//! before any remote call.

use super::ReconcileError;
use crate::descriptor::{ResourceDescriptor, ResourceRef};
use std::collections::{BTreeSet, HashMap};

/// Indices of `descriptors` in reconciliation order
pub fn dependency_order(descriptors: &[ResourceDescriptor]) -> Result<Vec<usize>, ReconcileError> {
    let mut index: HashMap<ResourceRef, usize> = HashMap::with_capacity(descriptors.len());
    for (i, desc) in descriptors.iter().enumerate() {
        if index.insert(desc.resource_ref(), i).is_some() {
            return Err(ReconcileError::DuplicateDescriptor(desc.resource_ref()));
        }
    }

    // edges[d] lists the descriptors that depend on d
    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); descriptors.len()];
    let mut waiting_on: Vec<usize> = vec![0; descriptors.len()];
    for (i, desc) in descriptors.iter().enumerate() {
        let mut seen = BTreeSet::new();
        for dep in &desc.dependencies {
            let Some(&d) = index.get(dep) else {
                return Err(ReconcileError::UnknownDependency {
                    resource: desc.resource_ref(),
                    dependency: dep.clone(),
                });
            };
            if seen.insert(d) {
                edges[d].push(i);
                waiting_on[i] += 1;
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..descriptors.len())
        .filter(|i| waiting_on[*i] == 0)
        .collect();
    let mut order = Vec::with_capacity(descriptors.len());
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &dependent in &edges[next] {
            waiting_on[dependent] -= 1;
            if waiting_on[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() < descriptors.len() {
        return Err(ReconcileError::CyclicDependency {
            members: find_cycle(descriptors, &index, &waiting_on),
        });
    }
    Ok(order)
}

/// Walk unresolved dependencies from the first blocked descriptor until one repeats
fn find_cycle(
    descriptors: &[ResourceDescriptor],
    index: &HashMap<ResourceRef, usize>,
    waiting_on: &[usize],
) -> Vec<ResourceRef> {
    let blocked = |i: usize| waiting_on[i] > 0;
    let Some(start) = (0..descriptors.len()).find(|i| blocked(*i)) else {
        return Vec::new();
    };

    let mut path: Vec<usize> = Vec::new();
    let mut current = start;
    loop {
        if let Some(pos) = path.iter().position(|p| *p == current) {
            return path[pos..]
                .iter()
                .map(|i| descriptors[*i].resource_ref())
                .collect();
        }
        path.push(current);
        // Every blocked descriptor has at least one blocked dependency
        let next = descriptors[current]
            .dependencies
            .iter()
            .filter_map(|dep| index.get(dep).copied())
            .find(|d| blocked(*d));
        match next {
            Some(next) => current = next,
            None => {
                return path
                    .iter()
                    .map(|i| descriptors[*i].resource_ref())
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{IdentityKey, ResourceKind};

    fn sa(name: &str) -> ResourceDescriptor {
        ResourceDescriptor::new(
            ResourceKind::ServiceAccount,
            IdentityKey::scoped("prod", name),
        )
    }

    fn names(descriptors: &[ResourceDescriptor], order: &[usize]) -> Vec<String> {
        order
            .iter()
            .map(|i| descriptors[*i].key.name.clone())
            .collect()
    }

    #[test]
    fn test_independent_descriptors_keep_declaration_order() {
        let descs = vec![sa("a"), sa("b"), sa("c")];
        let order = dependency_order(&descs).unwrap();
        assert_eq!(names(&descs, &order), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_dependencies_run_first() {
        let a = sa("a");
        let b = sa("b");
        let descs = vec![
            sa("c").depends_on(b.resource_ref()),
            b.depends_on(a.resource_ref()),
            a,
            sa("d"),
        ];
        let order = dependency_order(&descs).unwrap();
        assert_eq!(names(&descs, &order), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_cycle_names_its_members() {
        let a = sa("a");
        let b = sa("b");
        let descs = vec![
            sa("root"),
            a.clone().depends_on(b.resource_ref()),
            b.clone().depends_on(a.resource_ref()),
            sa("leaf").depends_on(a.resource_ref()),
        ];
        match dependency_order(&descs) {
            Err(ReconcileError::CyclicDependency { members }) => {
                assert_eq!(members, vec![a.resource_ref(), b.resource_ref()]);
            }
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let a = sa("a");
        let descs = vec![a.clone().depends_on(a.resource_ref())];
        assert!(matches!(
            dependency_order(&descs),
            Err(ReconcileError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_duplicates_and_unknown_dependencies_are_rejected() {
        assert!(matches!(
            dependency_order(&[sa("a"), sa("a")]),
            Err(ReconcileError::DuplicateDescriptor(_))
        ));
        assert!(matches!(
            dependency_order(&[sa("a").depends_on(sa("ghost").resource_ref())]),
            Err(ReconcileError::UnknownDependency { .. })
        ));
    }
}
