//! Dependency resolution and planning.
//!
//! Orders change sets topologically by their declared dependencies and splits
//! the result into what the ledger already holds and what still has to run.
//! Among change sets with no ordering constraint between them, an `initial`
//! change set goes first and the rest keep declaration order.

use super::changeset::ChangeSet;
use super::error::MigrationError;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// Result of planning against a ledger.
#[derive(Debug, Clone, Default)]
pub struct MigrationPlan<'a> {
    /// Change sets already in the ledger, in dependency order.
    pub applied: Vec<&'a ChangeSet>,
    /// Change sets to apply, in order.
    pub pending: Vec<&'a ChangeSet>,
}

impl<'a> MigrationPlan<'a> {
    /// Check if nothing needs to be applied.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Ids of the pending change sets, in apply order.
    pub fn pending_ids(&self) -> Vec<&'a str> {
        self.pending.iter().map(|cs| cs.id()).collect()
    }

    /// Ids of the applied change sets, in dependency order.
    pub fn applied_ids(&self) -> Vec<&'a str> {
        self.applied.iter().map(|cs| cs.id()).collect()
    }
}

/// Topological planner.
pub struct Planner;

impl Planner {
    /// Order every change set so each comes after its dependencies.
    ///
    /// Fails with [`MigrationError::MissingDependency`] for an unknown
    /// dependency, [`MigrationError::Cycle`] if no total order exists, and
    /// [`MigrationError::Validation`] for duplicate ids.
    pub fn order(change_sets: &[ChangeSet]) -> Result<Vec<&ChangeSet>, MigrationError> {
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(change_sets.len());
        for (i, cs) in change_sets.iter().enumerate() {
            if index.insert(cs.id(), i).is_some() {
                return Err(MigrationError::validation(
                    cs.id(),
                    "id is declared by more than one change set",
                ));
            }
        }

        let mut remaining = vec![0usize; change_sets.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); change_sets.len()];
        for (i, cs) in change_sets.iter().enumerate() {
            for dep in cs.dependencies() {
                let &d = index.get(dep.as_str()).ok_or_else(|| {
                    MigrationError::MissingDependency {
                        change_set: cs.id().to_string(),
                        dependency: dep.clone(),
                    }
                })?;
                remaining[i] += 1;
                dependents[d].push(i);
            }
        }

        // Ready set keyed by (not initial, declaration index).
        let mut ready: BTreeSet<(bool, usize)> = remaining
            .iter()
            .enumerate()
            .filter(|(_, &n)| n == 0)
            .map(|(i, _)| (!change_sets[i].is_initial(), i))
            .collect();

        let mut order = Vec::with_capacity(change_sets.len());
        while let Some((_, i)) = ready.pop_first() {
            order.push(&change_sets[i]);
            for &next in &dependents[i] {
                remaining[next] -= 1;
                if remaining[next] == 0 {
                    ready.insert((!change_sets[next].is_initial(), next));
                }
            }
        }

        if order.len() != change_sets.len() {
            let ids = remaining
                .iter()
                .enumerate()
                .filter(|(_, &n)| n > 0)
                .map(|(i, _)| change_sets[i].id().to_string())
                .collect();
            return Err(MigrationError::Cycle { ids });
        }

        Ok(order)
    }

    /// Plan which change sets still need to run.
    ///
    /// `applied` is the set of ids recorded in the ledger.
    pub fn plan<'a>(
        change_sets: &'a [ChangeSet],
        applied: &BTreeSet<String>,
    ) -> Result<MigrationPlan<'a>, MigrationError> {
        let order = Self::order(change_sets)?;

        for id in applied {
            if !change_sets.iter().any(|cs| cs.id() == id) {
                warn!(change_set = %id, "ledger records a change set that is not defined");
            }
        }

        let (done, pending): (Vec<&ChangeSet>, Vec<&ChangeSet>) =
            order.into_iter().partition(|cs| applied.contains(cs.id()));

        debug!(
            applied = done.len(),
            pending = pending.len(),
            "planned change sets"
        );
        Ok(MigrationPlan {
            applied: done,
            pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FieldDef;
    use crate::migration::{ChangeSetRecord, ErrorKind, Operation};

    fn cs(id: &str, deps: &[&str]) -> ChangeSet {
        let mut record = ChangeSetRecord::new(id)
            .with_operation(Operation::create_entity(id, [FieldDef::auto_id("id")]));
        for dep in deps {
            record = record.with_dependency(*dep);
        }
        record.build().unwrap()
    }

    fn initial(id: &str) -> ChangeSet {
        ChangeSetRecord::new(id)
            .initial()
            .with_operation(Operation::create_entity(id, [FieldDef::auto_id("id")]))
            .build()
            .unwrap()
    }

    fn ids<'a>(order: &[&'a ChangeSet]) -> Vec<&'a str> {
        order.iter().map(|cs| cs.id()).collect()
    }

    fn assert_respects_edges(order: &[&ChangeSet]) {
        for (pos, cs) in order.iter().enumerate() {
            for dep in cs.dependencies() {
                let dep_pos = order.iter().position(|c| c.id() == dep).unwrap();
                assert!(dep_pos < pos, "{} must come after {}", cs.id(), dep);
            }
        }
    }

    #[test]
    fn test_chain_declared_backwards() {
        let sets = vec![cs("c", &["b"]), cs("b", &["a"]), initial("a")];
        let order = Planner::order(&sets).unwrap();
        assert_eq!(ids(&order), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_diamond() {
        let sets = vec![
            initial("root"),
            cs("left", &["root"]),
            cs("right", &["root"]),
            cs("join", &["right", "left"]),
        ];
        let order = Planner::order(&sets).unwrap();
        assert_eq!(ids(&order), vec!["root", "left", "right", "join"]);
        assert_respects_edges(&order);
    }

    #[test]
    fn test_tie_break_is_declaration_order() {
        let sets = vec![cs("x", &[]), cs("m", &[]), cs("a", &[])];
        let order = Planner::order(&sets).unwrap();
        assert_eq!(ids(&order), vec!["x", "m", "a"]);
    }

    #[test]
    fn test_initial_goes_first() {
        let sets = vec![cs("loose", &[]), initial("0001"), cs("0002", &["0001"])];
        let order = Planner::order(&sets).unwrap();
        assert_eq!(order[0].id(), "0001");
        assert_respects_edges(&order);
    }

    #[test]
    fn test_wide_graph_respects_edges() {
        let sets = vec![
            cs("f", &["d", "e"]),
            cs("e", &["b"]),
            cs("d", &["b", "c"]),
            cs("c", &["a"]),
            cs("b", &["a"]),
            initial("a"),
            cs("g", &[]),
        ];
        let order = Planner::order(&sets).unwrap();
        assert_eq!(order.len(), sets.len());
        assert_eq!(order[0].id(), "a");
        assert_respects_edges(&order);
    }

    #[test]
    fn test_cycle_detected() {
        let sets = vec![initial("a"), cs("b", &["a", "c"]), cs("c", &["b"])];
        let err = Planner::order(&sets).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cycle);
        match err {
            MigrationError::Cycle { ids } => assert_eq!(ids, vec!["b", "c"]),
            other => panic!("expected Cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_dependency() {
        let sets = vec![initial("0001"), cs("0004", &["0003"])];
        let err = Planner::plan(&sets, &BTreeSet::new()).unwrap_err();

        match err {
            MigrationError::MissingDependency {
                change_set,
                dependency,
            } => {
                assert_eq!(change_set, "0004");
                assert_eq!(dependency, "0003");
            }
            other => panic!("expected MissingDependency, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let sets = vec![initial("a"), cs("a", &[])];
        assert_eq!(
            Planner::order(&sets).unwrap_err().kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_plan_skips_applied() {
        let sets = vec![initial("a"), cs("b", &["a"]), cs("c", &["b"])];
        let applied: BTreeSet<String> = ["a".to_string()].into_iter().collect();

        let plan = Planner::plan(&sets, &applied).unwrap();
        assert_eq!(plan.applied_ids(), vec!["a"]);
        assert_eq!(plan.pending_ids(), vec!["b", "c"]);

        let all: BTreeSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        assert!(Planner::plan(&sets, &all).unwrap().is_empty());
    }
}
