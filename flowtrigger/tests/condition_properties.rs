//! Property tests for the condition evaluator and branch resolver

use flowtrigger::condition::{evaluate, evaluate_group, Condition, ConditionGroup, ConditionNode, Operator};
use flowtrigger::flow::BranchResolver;
use flowtrigger::{Branch, EventData, Flow, Level, LevelId, NextLevel};
use proptest::prelude::*;
use serde_json::{json, Value};

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i32>().prop_map(|n| json!(n)),
        "[a-z]{0,6}".prop_map(Value::String),
        any::<bool>().prop_map(Value::Bool),
        Just(Value::Null),
    ]
}

fn event_data() -> impl Strategy<Value = EventData> {
    prop::collection::btree_map("[a-c]", scalar(), 0..4)
        .prop_map(|map| map.into_iter().collect())
}

fn leaf() -> impl Strategy<Value = ConditionNode> {
    let operator = prop_oneof![
        Just(Operator::Equals),
        Just(Operator::NotEquals),
        Just(Operator::GreaterThan),
        Just(Operator::LessThan),
        Just(Operator::Contains),
        Just(Operator::NotContains),
    ];
    ("[a-c]", operator, scalar().prop_filter("comparison value", |v| !v.is_null()))
        .prop_filter_map("valid leaf", |(field, operator, value)| {
            Condition::new(field, operator, Some(value)).ok().map(ConditionNode::from)
        })
}

fn tree() -> impl Strategy<Value = ConditionNode> {
    leaf().prop_recursive(3, 16, 4, |inner| {
        (any::<bool>(), prop::collection::vec(inner, 0..4)).prop_map(|(and, children)| {
            if and {
                ConditionGroup::and(children).into()
            } else {
                ConditionGroup::or(children).into()
            }
        })
    })
}

proptest! {
    #[test]
    fn evaluation_is_deterministic(node in tree(), data in event_data()) {
        let first = evaluate(Some(&node), &data);
        let second = evaluate(Some(&node), &data);
        prop_assert_eq!(first.matched, second.matched);
        prop_assert_eq!(first.trace, second.trace);
    }

    #[test]
    fn missing_tree_always_matches(data in event_data()) {
        prop_assert!(evaluate(None, &data).matched);
        prop_assert!(evaluate_group(None, &data).matched);
    }

    #[test]
    fn empty_groups_have_identity_values(data in event_data()) {
        prop_assert!(evaluate_group(Some(&ConditionGroup::and(vec![])), &data).matched);
        prop_assert!(!evaluate_group(Some(&ConditionGroup::or(vec![])), &data).matched);
    }

    #[test]
    fn absent_fields_follow_negation_policy(value in scalar().prop_filter("value", |v| !v.is_null())) {
        let data = EventData::new();
        for operator in [Operator::NotEquals, Operator::NotContains] {
            let node = ConditionNode::from(Condition::new("missing", operator, Some(value.clone())).unwrap());
            prop_assert!(evaluate(Some(&node), &data).matched);
        }
        for operator in [Operator::Equals, Operator::Contains] {
            let node = ConditionNode::from(Condition::new("missing", operator, Some(value.clone())).unwrap());
            prop_assert!(!evaluate(Some(&node), &data).matched);
        }
    }

    #[test]
    fn trace_matches_result(node in tree(), data in event_data()) {
        let outcome = evaluate(Some(&node), &data);
        prop_assert_eq!(outcome.trace.matched(), outcome.matched);
    }

    #[test]
    fn lowest_priority_catch_all_wins(priorities in prop::collection::vec(-5i32..5, 1..6)) {
        let mut flow = Flow::new("f", "F");
        flow.add_level(Level::new("start", 0)).unwrap();
        for index in 0..priorities.len() {
            flow.add_level(Level::new(format!("target{index}").as_str(), index as i32 + 1)).unwrap();
        }
        for (index, priority) in priorities.iter().enumerate() {
            let target = format!("target{index}");
            flow.add_branch(Branch::new(format!("b{index}").as_str(), "start", target.as_str(), *priority))
                .unwrap();
        }

        let resolution = BranchResolver::new(&flow)
            .resolve_next(&LevelId::from("start"), &EventData::new())
            .unwrap();

        let lowest = priorities.iter().min().copied().unwrap_or_default();
        let winner = priorities.iter().position(|p| *p == lowest).unwrap_or_default();
        prop_assert_eq!(
            resolution.next,
            NextLevel::Level(LevelId::from(format!("target{winner}").as_str()))
        );
        prop_assert_eq!(resolution.evaluations.len(), 1);
    }
}
