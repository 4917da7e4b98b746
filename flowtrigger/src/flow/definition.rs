//! Flow structure: levels, tasks and branches

use super::{BranchId, FlowError, FlowId, LevelId, TaskId};
use crate::condition::ConditionGroup;
use crate::validation::{Validatable, ValidationError, ValidationResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Lifecycle status of a flow definition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowStatus {
    /// Editable, cannot be started
    #[default]
    Draft,
    /// Frozen, can be started
    Published,
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowStatus::Draft => f.write_str("DRAFT"),
            FlowStatus::Published => f.write_str("PUBLISHED"),
        }
    }
}

fn default_required() -> bool {
    true
}

/// A task placed on a level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelTask {
    /// Task identifier
    pub task_id: TaskId,
    /// Position within the level
    #[serde(default)]
    pub order: i32,
    /// Whether the task must be submitted for the level to complete
    #[serde(default = "default_required")]
    pub required: bool,
}

impl LevelTask {
    /// A required task at the given position
    pub fn new(task_id: impl Into<TaskId>, order: i32) -> Self {
        Self {
            task_id: task_id.into(),
            order,
            required: true,
        }
    }

    /// Mark the task as optional
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// A step of a flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    /// Level identifier, unique in the flow
    pub id: LevelId,
    /// Position in the flow, unique but not necessarily contiguous
    pub order: i32,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Tasks of the level, kept sorted by their order
    #[serde(default)]
    pub tasks: Vec<LevelTask>,
}

impl Level {
    /// An empty level
    pub fn new(id: impl Into<LevelId>, order: i32) -> Self {
        Self {
            id: id.into(),
            order,
            name: None,
            tasks: Vec::new(),
        }
    }

    /// Add a task while building the level
    pub fn with_task(mut self, task: LevelTask) -> Self {
        self.tasks.push(task);
        self
    }

    fn check_tasks(&self) -> ValidationResult<()> {
        let mut seen = std::collections::HashSet::new();
        for task in &self.tasks {
            if !seen.insert(&task.task_id) {
                return Err(ValidationError::DuplicateTask {
                    task: task.task_id.to_string(),
                    level: self.id.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// A conditional route from one level to a later one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    /// Branch identifier, unique in the flow
    pub id: BranchId,
    /// Level the branch leaves from
    pub from_level_id: LevelId,
    /// Level the branch leads to
    pub to_level_id: LevelId,
    /// Conditions on the instance data; `None` matches unconditionally
    #[serde(default)]
    pub conditions: Option<ConditionGroup>,
    /// Lower values are evaluated first
    #[serde(default)]
    pub priority: i32,
}

impl Branch {
    /// An unconditional branch
    pub fn new(
        id: impl Into<BranchId>,
        from_level_id: impl Into<LevelId>,
        to_level_id: impl Into<LevelId>,
        priority: i32,
    ) -> Self {
        Self {
            id: id.into(),
            from_level_id: from_level_id.into(),
            to_level_id: to_level_id.into(),
            conditions: None,
            priority,
        }
    }

    /// Attach conditions
    pub fn when(mut self, conditions: ConditionGroup) -> Self {
        self.conditions = Some(conditions);
        self
    }
}

/// Serialized form of a [`Flow`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlowDefinition {
    /// Flow identifier
    pub id: FlowId,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Lifecycle status
    #[serde(default)]
    pub status: FlowStatus,
    /// Levels in any order
    #[serde(default)]
    pub levels: Vec<Level>,
    /// Branches in creation order
    #[serde(default)]
    pub branches: Vec<Branch>,
}

/// A multi-level flow
///
/// Levels live in an arena sorted by order with an id index; branches are
/// kept in creation order with a per-level adjacency list of branch indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FlowDefinition", into = "FlowDefinition")]
pub struct Flow {
    id: FlowId,
    name: String,
    status: FlowStatus,
    levels: Vec<Level>,
    level_index: HashMap<LevelId, usize>,
    branches: Vec<Branch>,
    outgoing: HashMap<LevelId, Vec<usize>>,
}

impl Flow {
    /// Create an empty draft flow
    pub fn new(id: impl Into<FlowId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: FlowStatus::Draft,
            levels: Vec::new(),
            level_index: HashMap::new(),
            branches: Vec::new(),
            outgoing: HashMap::new(),
        }
    }

    /// Flow identifier
    pub fn id(&self) -> &FlowId {
        &self.id
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lifecycle status
    pub fn status(&self) -> FlowStatus {
        self.status
    }

    /// Whether instances can be started
    pub fn is_published(&self) -> bool {
        self.status == FlowStatus::Published
    }

    /// Levels in ascending order
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    /// Branches in creation order
    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    fn ensure_draft(&self) -> Result<(), FlowError> {
        if self.is_published() {
            return Err(FlowError::StructureFrozen(self.id.clone()));
        }
        Ok(())
    }

    fn reindex(&mut self) {
        self.level_index = self
            .levels
            .iter()
            .enumerate()
            .map(|(i, level)| (level.id.clone(), i))
            .collect();
    }

    /// Add a level
    pub fn add_level(&mut self, mut level: Level) -> Result<(), FlowError> {
        self.ensure_draft()?;
        if self.level_index.contains_key(&level.id) {
            return Err(ValidationError::DuplicateLevel(level.id.to_string()).into());
        }
        if let Some(existing) = self.levels.iter().find(|l| l.order == level.order) {
            return Err(ValidationError::DuplicateLevelOrder {
                first: existing.id.to_string(),
                second: level.id.to_string(),
                order: level.order,
            }
            .into());
        }
        level.check_tasks()?;
        level.tasks.sort_by_key(|task| task.order);

        let position = self.levels.partition_point(|l| l.order < level.order);
        self.levels.insert(position, level);
        self.reindex();
        Ok(())
    }

    /// Place a task on an existing level
    pub fn add_task(&mut self, level_id: &LevelId, task: LevelTask) -> Result<(), FlowError> {
        self.ensure_draft()?;
        let index = *self
            .level_index
            .get(level_id)
            .ok_or_else(|| ValidationError::UnknownLevel(level_id.to_string()))?;
        let level = &mut self.levels[index];
        if level.tasks.iter().any(|t| t.task_id == task.task_id) {
            return Err(ValidationError::DuplicateTask {
                task: task.task_id.to_string(),
                level: level_id.to_string(),
            }
            .into());
        }
        let position = level.tasks.partition_point(|t| t.order <= task.order);
        level.tasks.insert(position, task);
        Ok(())
    }

    fn check_branch(&self, branch: &Branch) -> ValidationResult<()> {
        let from = self
            .level(&branch.from_level_id)
            .ok_or_else(|| ValidationError::UnknownLevel(branch.from_level_id.to_string()))?;
        let to = self
            .level(&branch.to_level_id)
            .ok_or_else(|| ValidationError::UnknownLevel(branch.to_level_id.to_string()))?;
        if to.order <= from.order {
            return Err(ValidationError::BackwardBranch {
                branch: branch.id.to_string(),
                from: from.id.to_string(),
                from_order: from.order,
                to: to.id.to_string(),
                to_order: to.order,
            });
        }
        if let Some(conditions) = &branch.conditions {
            conditions.validate()?;
        }
        Ok(())
    }

    /// Add a branch; its target must come strictly after its source
    pub fn add_branch(&mut self, branch: Branch) -> Result<(), FlowError> {
        self.ensure_draft()?;
        if self.branches.iter().any(|b| b.id == branch.id) {
            return Err(ValidationError::DuplicateBranch(branch.id.to_string()).into());
        }
        self.check_branch(&branch)?;

        self.outgoing
            .entry(branch.from_level_id.clone())
            .or_default()
            .push(self.branches.len());
        self.branches.push(branch);
        Ok(())
    }

    /// Freeze the structure so instances can be started
    pub fn publish(&mut self) -> Result<(), FlowError> {
        if self.is_published() {
            return Ok(());
        }
        self.validate()?;
        self.status = FlowStatus::Published;
        tracing::info!(flow_id = %self.id, levels = self.levels.len(), "flow published");
        Ok(())
    }

    /// Level with the lowest order
    pub fn first_level(&self) -> Option<&Level> {
        self.levels.first()
    }

    /// Look up a level by id
    pub fn level(&self, id: &LevelId) -> Option<&Level> {
        self.level_index.get(id).map(|&i| &self.levels[i])
    }

    /// The level following `id` in ascending order
    pub fn next_level_after(&self, id: &LevelId) -> Option<&Level> {
        self.level_index
            .get(id)
            .and_then(|&i| self.levels.get(i + 1))
    }

    /// Branches leaving a level, with their creation index
    pub fn branches_from<'a>(
        &'a self,
        id: &LevelId,
    ) -> impl Iterator<Item = (usize, &'a Branch)> + 'a {
        self.outgoing
            .get(id)
            .map(|indices| indices.as_slice())
            .unwrap_or_default()
            .iter()
            .map(move |&i| (i, &self.branches[i]))
    }
}

impl Validatable for Flow {
    fn validate(&self) -> ValidationResult<()> {
        if self.levels.is_empty() {
            return Err(ValidationError::EmptyFlow(self.id.to_string()));
        }
        self.levels.iter().try_for_each(Level::check_tasks)?;
        self.branches
            .iter()
            .try_for_each(|branch| self.check_branch(branch))
    }
}

impl TryFrom<FlowDefinition> for Flow {
    type Error = FlowError;

    fn try_from(def: FlowDefinition) -> Result<Self, Self::Error> {
        let mut flow = Flow::new(def.id, def.name);
        for level in def.levels {
            flow.add_level(level)?;
        }
        for branch in def.branches {
            flow.add_branch(branch)?;
        }
        if def.status == FlowStatus::Published {
            flow.publish()?;
        }
        Ok(flow)
    }
}

impl From<Flow> for FlowDefinition {
    fn from(flow: Flow) -> Self {
        Self {
            id: flow.id,
            name: flow.name,
            status: flow.status,
            levels: flow.levels,
            branches: flow.branches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Condition, Operator};
    use serde_json::json;

    fn three_levels() -> Flow {
        let mut flow = Flow::new("onboarding", "Onboarding");
        flow.add_level(Level::new("c", 30)).unwrap();
        flow.add_level(Level::new("a", 10).with_task(LevelTask::new("intake", 1)))
            .unwrap();
        flow.add_level(Level::new("b", 20)).unwrap();
        flow
    }

    #[test]
    fn test_levels_are_kept_in_order() {
        let flow = three_levels();
        let ids: Vec<_> = flow.levels().iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(flow.first_level().unwrap().id.as_str(), "a");
        assert_eq!(
            flow.next_level_after(&LevelId::from("b")).unwrap().id.as_str(),
            "c"
        );
        assert!(flow.next_level_after(&LevelId::from("c")).is_none());
    }

    #[test]
    fn test_duplicate_level_id_and_order_rejected() {
        let mut flow = three_levels();
        assert!(matches!(
            flow.add_level(Level::new("a", 40)),
            Err(FlowError::Validation(ValidationError::DuplicateLevel(_)))
        ));
        assert!(matches!(
            flow.add_level(Level::new("d", 20)),
            Err(FlowError::Validation(ValidationError::DuplicateLevelOrder { order: 20, .. }))
        ));
    }

    #[test]
    fn test_tasks_sorted_and_unique() {
        let mut flow = three_levels();
        let a = LevelId::from("a");
        flow.add_task(&a, LevelTask::new("approval", 0)).unwrap();
        let tasks: Vec<_> = flow.level(&a).unwrap().tasks.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(tasks, vec!["approval", "intake"]);
        assert!(flow.add_task(&a, LevelTask::new("intake", 5)).is_err());
        assert!(flow
            .add_task(&LevelId::from("zzz"), LevelTask::new("x", 0))
            .is_err());
    }

    #[test]
    fn test_branch_must_point_forward() {
        let mut flow = three_levels();
        let err = flow.add_branch(Branch::new("back", "c", "a", 0)).unwrap_err();
        assert!(matches!(
            err,
            FlowError::Validation(ValidationError::BackwardBranch { .. })
        ));
        assert!(flow.add_branch(Branch::new("self", "b", "b", 0)).is_err());
        assert!(flow.add_branch(Branch::new("ghost", "a", "z", 0)).is_err());
        flow.add_branch(Branch::new("skip", "a", "c", 0)).unwrap();
        assert!(matches!(
            flow.add_branch(Branch::new("skip", "a", "b", 0)),
            Err(FlowError::Validation(ValidationError::DuplicateBranch(_)))
        ));
        assert_eq!(flow.branches_from(&LevelId::from("a")).count(), 1);
        assert_eq!(flow.branches_from(&LevelId::from("b")).count(), 0);
    }

    #[test]
    fn test_publish_freezes_structure() {
        let mut flow = three_levels();
        flow.publish().unwrap();
        assert!(flow.is_published());

        assert!(matches!(
            flow.add_level(Level::new("d", 40)),
            Err(FlowError::StructureFrozen(_))
        ));
        assert!(matches!(
            flow.add_task(&LevelId::from("a"), LevelTask::new("t", 0)),
            Err(FlowError::StructureFrozen(_))
        ));
        assert!(matches!(
            flow.add_branch(Branch::new("x", "a", "b", 0)),
            Err(FlowError::StructureFrozen(_))
        ));
        assert_eq!(flow.levels().len(), 3);
    }

    #[test]
    fn test_publish_requires_levels() {
        let mut flow = Flow::new("empty", "Empty");
        assert!(matches!(
            flow.publish(),
            Err(FlowError::Validation(ValidationError::EmptyFlow(_)))
        ));
        assert_eq!(flow.status(), FlowStatus::Draft);
    }

    #[test]
    fn test_yaml_definition_is_validated() {
        let yaml = r#"
id: approval
name: Approval
status: PUBLISHED
levels:
  - id: submit
    order: 1
    tasks:
      - task_id: request
  - id: manager
    order: 2
  - id: finance
    order: 3
branches:
  - id: big-spend
    from_level_id: submit
    to_level_id: finance
    priority: 1
    conditions:
      operator: AND
      children:
        - field: amount
          operator: greater_than
          value: 1000
"#;
        let flow: Flow = serde_yaml::from_str(yaml).unwrap();
        assert!(flow.is_published());
        assert_eq!(flow.branches().len(), 1);
        assert!(flow.level(&LevelId::from("submit")).unwrap().tasks[0].required);

        let backwards = yaml.replace("to_level_id: finance", "to_level_id: submit");
        assert!(serde_yaml::from_str::<Flow>(&backwards).is_err());
    }

    #[test]
    fn test_serialized_flow_round_trips() {
        let mut flow = three_levels();
        flow.add_branch(
            Branch::new("vip", "a", "c", 0).when(ConditionGroup::and(vec![Condition::new(
                "vip",
                Operator::IsTrue,
                None,
            )
            .unwrap()
            .into()])),
        )
        .unwrap();
        flow.publish().unwrap();
        let value = serde_json::to_value(&flow).unwrap();
        assert_eq!(value["status"], json!("PUBLISHED"));
        let back: Flow = serde_json::from_value(value).unwrap();
        assert_eq!(back, flow);
    }
}
