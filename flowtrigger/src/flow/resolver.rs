//! Next-level resolution

use super::{BranchId, Flow, FlowError, LevelId};
use crate::condition::{evaluate_group, TraceNode};
use crate::events::EventData;
use serde::{Deserialize, Serialize};

/// Where an instance goes after completing a level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextLevel {
    /// Continue at this level
    Level(LevelId),
    /// The flow is finished
    Complete,
}

/// What decided the next level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedBy {
    /// A matching branch
    Branch(BranchId),
    /// No branch matched, the next level by order was taken
    Sequential,
    /// No branch matched and no later level exists
    End,
}

/// Record of one branch evaluated during resolution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BranchEvaluation {
    /// Branch evaluated
    pub branch_id: BranchId,
    /// Its priority
    pub priority: i32,
    /// Its target level
    pub to_level_id: LevelId,
    /// Whether its conditions matched
    pub matched: bool,
    /// Condition trace
    pub trace: TraceNode,
}

/// Outcome of resolving the next level
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    /// Next level or completion
    pub next: NextLevel,
    /// What decided it
    pub via: ResolvedBy,
    /// Branches evaluated, in evaluation order
    pub evaluations: Vec<BranchEvaluation>,
}

/// Picks the next level of a flow from its branches
#[derive(Debug, Clone, Copy)]
pub struct BranchResolver<'a> {
    flow: &'a Flow,
}

impl<'a> BranchResolver<'a> {
    /// Create a resolver over a flow
    pub fn new(flow: &'a Flow) -> Self {
        Self { flow }
    }

    /// Resolve the level that follows `level_id` given the instance data
    ///
    /// Branches leaving the level are tried by ascending priority, ties broken
    /// by creation order; the first match wins. Without a match the next level
    /// by order is taken, and without one the flow completes. A branch with no
    /// conditions is simply a branch that always matches.
    pub fn resolve_next(
        &self,
        level_id: &LevelId,
        data: &EventData,
    ) -> Result<Resolution, FlowError> {
        if self.flow.level(level_id).is_none() {
            return Err(FlowError::LevelNotFound(level_id.clone()));
        }

        let mut candidates: Vec<_> = self.flow.branches_from(level_id).collect();
        candidates.sort_by_key(|(index, branch)| (branch.priority, *index));

        let mut evaluations = Vec::new();
        for (_, branch) in candidates {
            let outcome = evaluate_group(branch.conditions.as_ref(), data);
            evaluations.push(BranchEvaluation {
                branch_id: branch.id.clone(),
                priority: branch.priority,
                to_level_id: branch.to_level_id.clone(),
                matched: outcome.matched,
                trace: outcome.trace,
            });
            if outcome.matched {
                tracing::debug!(
                    flow_id = %self.flow.id(),
                    from = %level_id,
                    to = %branch.to_level_id,
                    branch = %branch.id,
                    "branch matched"
                );
                return Ok(Resolution {
                    next: NextLevel::Level(branch.to_level_id.clone()),
                    via: ResolvedBy::Branch(branch.id.clone()),
                    evaluations,
                });
            }
        }

        let resolution = match self.flow.next_level_after(level_id) {
            Some(level) => Resolution {
                next: NextLevel::Level(level.id.clone()),
                via: ResolvedBy::Sequential,
                evaluations,
            },
            None => Resolution {
                next: NextLevel::Complete,
                via: ResolvedBy::End,
                evaluations,
            },
        };
        tracing::debug!(
            flow_id = %self.flow.id(),
            from = %level_id,
            next = ?resolution.next,
            "no branch matched"
        );
        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Condition, ConditionGroup, Operator};
    use crate::flow::{Branch, Level};
    use serde_json::json;

    fn data(value: serde_json::Value) -> EventData {
        value.as_object().cloned().unwrap()
    }

    fn amount_over(limit: i64) -> ConditionGroup {
        ConditionGroup::and(vec![Condition::new(
            "amount",
            Operator::GreaterThan,
            Some(json!(limit)),
        )
        .unwrap()
        .into()])
    }

    fn flow() -> Flow {
        let mut flow = Flow::new("f", "F");
        for (id, order) in [("a", 1), ("b", 2), ("c", 3), ("d", 5)] {
            flow.add_level(Level::new(id, order)).unwrap();
        }
        flow
    }

    #[test]
    fn test_matching_branch_skips_ahead() {
        let mut flow = flow();
        flow.add_branch(Branch::new("big", "a", "c", 0).when(amount_over(1000)))
            .unwrap();
        let resolver = BranchResolver::new(&flow);

        let hit = resolver
            .resolve_next(&LevelId::from("a"), &data(json!({"amount": 5000})))
            .unwrap();
        assert_eq!(hit.next, NextLevel::Level(LevelId::from("c")));
        assert_eq!(hit.via, ResolvedBy::Branch(BranchId::from("big")));

        let miss = resolver
            .resolve_next(&LevelId::from("a"), &data(json!({"amount": 5})))
            .unwrap();
        assert_eq!(miss.next, NextLevel::Level(LevelId::from("b")));
        assert_eq!(miss.via, ResolvedBy::Sequential);
        assert_eq!(miss.evaluations.len(), 1);
        assert!(!miss.evaluations[0].matched);
    }

    #[test]
    fn test_priority_then_creation_order() {
        let mut flow = flow();
        flow.add_branch(Branch::new("late", "a", "d", 5)).unwrap();
        flow.add_branch(Branch::new("first-created", "a", "b", 1)).unwrap();
        flow.add_branch(Branch::new("second-created", "a", "c", 1)).unwrap();

        let resolution = BranchResolver::new(&flow)
            .resolve_next(&LevelId::from("a"), &EventData::new())
            .unwrap();
        assert_eq!(
            resolution.via,
            ResolvedBy::Branch(BranchId::from("first-created"))
        );
        assert_eq!(resolution.evaluations.len(), 1);
    }

    #[test]
    fn test_null_conditions_are_catch_all() {
        let mut flow = flow();
        flow.add_branch(Branch::new("guarded", "b", "d", 0).when(amount_over(10)))
            .unwrap();
        flow.add_branch(Branch::new("fallback", "b", "c", 9)).unwrap();

        let resolution = BranchResolver::new(&flow)
            .resolve_next(&LevelId::from("b"), &data(json!({"amount": 1})))
            .unwrap();
        assert_eq!(resolution.next, NextLevel::Level(LevelId::from("c")));
        assert_eq!(resolution.evaluations.len(), 2);
    }

    #[test]
    fn test_last_level_completes() {
        let flow = flow();
        let resolution = BranchResolver::new(&flow)
            .resolve_next(&LevelId::from("d"), &EventData::new())
            .unwrap();
        assert_eq!(resolution.next, NextLevel::Complete);
        assert_eq!(resolution.via, ResolvedBy::End);
        assert!(matches!(
            BranchResolver::new(&flow).resolve_next(&LevelId::from("nope"), &EventData::new()),
            Err(FlowError::LevelNotFound(_))
        ));
    }
}
