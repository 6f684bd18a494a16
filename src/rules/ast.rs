//! Compiled condition AST
//!
//! Conditions arrive as untyped documents and are compiled here into a
//! closed tagged union. Every node and check is validated during
//! compilation; evaluation never sees an unknown operator, period name,
//! timezone, or malformed path.

use chrono::Weekday;
use chrono_tz::Tz;
use serde_json::Value;

use crate::paths;

/// A node in the condition tree
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionNode {
    Single(Check),
    All(Vec<ConditionNode>),
    Any(Vec<ConditionNode>),
}

impl ConditionNode {
    /// Compile a condition document into the typed AST
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let obj = value
            .as_object()
            .ok_or_else(|| "condition must be an object".to_string())?;

        let node_type = obj
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("single");

        match node_type {
            "single" => {
                let check = Check::from_value(obj)?;
                Ok(ConditionNode::Single(check))
            }
            "all" | "any" => {
                let children = obj
                    .get("conditions")
                    .and_then(Value::as_array)
                    .ok_or_else(|| format!("'{}' node requires a 'conditions' array", node_type))?;
                if children.is_empty() {
                    return Err(format!("'{}' node has no child conditions", node_type));
                }
                let parsed: Result<Vec<_>, _> =
                    children.iter().map(ConditionNode::from_value).collect();
                let parsed = parsed?;
                Ok(if node_type == "all" {
                    ConditionNode::All(parsed)
                } else {
                    ConditionNode::Any(parsed)
                })
            }
            other => Err(format!("unknown condition node type '{}'", other)),
        }
    }

    /// Collect every narrative check in the tree (for search prefetch)
    pub fn collect_narrative_checks<'a>(&'a self, out: &mut Vec<&'a NarrativeCheck>) {
        match self {
            ConditionNode::Single(Check::Narrative(check)) => out.push(check),
            ConditionNode::Single(_) => {}
            ConditionNode::All(children) | ConditionNode::Any(children) => {
                for child in children {
                    child.collect_narrative_checks(out);
                }
            }
        }
    }
}

/// A leaf condition
#[derive(Debug, Clone, PartialEq)]
pub enum Check {
    /// Dotted-path check against the trait map
    Trait(PathCheck),

    /// Dotted-path check against the context bag
    Context(PathCheck),

    /// Time-of-day / day-of-week check
    Time(TimeCheck),

    /// Semantic narrative search check
    Narrative(NarrativeCheck),
}

impl Check {
    fn from_value(obj: &serde_json::Map<String, Value>) -> Result<Self, String> {
        if let Some(check) = obj.get("trait_check") {
            return PathCheck::from_value(check, "path").map(Check::Trait);
        }
        if let Some(check) = obj.get("context_check") {
            return PathCheck::from_value(check, "field").map(Check::Context);
        }
        if let Some(check) = obj.get("time_check") {
            return TimeCheck::from_value(check).map(Check::Time);
        }
        if let Some(check) = obj.get("narrative_check") {
            return NarrativeCheck::from_value(check).map(Check::Narrative);
        }
        Err("single condition requires one of trait_check, context_check, \
             time_check, narrative_check"
            .to_string())
    }
}

/// Comparison operator for trait and context checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Exists,
    NotExists,
    Equals,
    NotEquals,
    Greater,
    Less,
    Contains,
}

impl Operator {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exists" => Some(Operator::Exists),
            "not_exists" => Some(Operator::NotExists),
            "equals" => Some(Operator::Equals),
            "not_equals" => Some(Operator::NotEquals),
            "greater" => Some(Operator::Greater),
            "less" => Some(Operator::Less),
            "contains" => Some(Operator::Contains),
            _ => None,
        }
    }

    /// Whether the operator compares against a configured value
    pub fn needs_value(&self) -> bool {
        !matches!(self, Operator::Exists | Operator::NotExists)
    }
}

/// A dotted-path check with an operator and optional expected value
#[derive(Debug, Clone, PartialEq)]
pub struct PathCheck {
    pub path: String,
    pub operator: Operator,
    pub value: Option<Value>,
}

impl PathCheck {
    fn from_value(value: &Value, path_key: &str) -> Result<Self, String> {
        let obj = value
            .as_object()
            .ok_or_else(|| "check must be an object".to_string())?;

        let path = obj
            .get(path_key)
            .and_then(Value::as_str)
            .ok_or_else(|| format!("check requires a string '{}'", path_key))?;
        if paths::parse(path).is_none() {
            return Err(format!("malformed path '{}'", path));
        }

        let operator_str = obj
            .get("operator")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("check on '{}' requires an operator", path))?;
        let operator = Operator::parse(operator_str)
            .ok_or_else(|| format!("unknown operator '{}'", operator_str))?;

        let expected = obj.get("value").cloned();
        if operator.needs_value() && expected.is_none() {
            return Err(format!(
                "operator '{}' on '{}' requires a value",
                operator_str, path
            ));
        }

        Ok(PathCheck {
            path: path.to_string(),
            operator,
            value: expected,
        })
    }
}

/// Named period of the day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl Period {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "morning" => Some(Period::Morning),
            "afternoon" => Some(Period::Afternoon),
            "evening" => Some(Period::Evening),
            "night" => Some(Period::Night),
            _ => None,
        }
    }

    /// `[start, end)` hour bounds; night wraps past midnight
    pub fn bounds(&self) -> (u32, u32) {
        match self {
            Period::Morning => (5, 12),
            Period::Afternoon => (12, 17),
            Period::Evening => (17, 21),
            Period::Night => (21, 5),
        }
    }

    pub fn contains(&self, hour: u32) -> bool {
        hour_in_range(hour, self.bounds())
    }
}

/// Half-open hour range membership with wrap-around
pub fn hour_in_range(hour: u32, (start, end): (u32, u32)) -> bool {
    if start <= end {
        start <= hour && hour < end
    } else {
        hour >= start || hour < end
    }
}

/// Time-based condition; all present sub-checks must pass
#[derive(Debug, Clone, PartialEq)]
pub struct TimeCheck {
    pub period: Option<Period>,
    pub hour_range: Option<(u32, u32)>,
    pub day_of_week: Option<Vec<Weekday>>,
    pub timezone: Option<Tz>,
}

impl TimeCheck {
    fn from_value(value: &Value) -> Result<Self, String> {
        let obj = value
            .as_object()
            .ok_or_else(|| "time_check must be an object".to_string())?;

        let period = match obj.get("period") {
            Some(p) => {
                let name = p
                    .as_str()
                    .ok_or_else(|| "time_check period must be a string".to_string())?;
                Some(Period::parse(name).ok_or_else(|| format!("unknown period '{}'", name))?)
            }
            None => None,
        };

        let hour_range = match obj.get("hour_range") {
            Some(range) => {
                let parts = range
                    .as_array()
                    .filter(|a| a.len() == 2)
                    .ok_or_else(|| "hour_range must be a [start, end] pair".to_string())?;
                let start = parts[0]
                    .as_u64()
                    .filter(|h| *h <= 23)
                    .ok_or_else(|| "hour_range start must be an hour in 0..=23".to_string())?;
                let end = parts[1]
                    .as_u64()
                    .filter(|h| *h <= 23)
                    .ok_or_else(|| "hour_range end must be an hour in 0..=23".to_string())?;
                Some((start as u32, end as u32))
            }
            None => None,
        };

        let day_of_week = match obj.get("day_of_week") {
            Some(days) => {
                let names = days
                    .as_array()
                    .ok_or_else(|| "day_of_week must be a list of day names".to_string())?;
                let mut parsed = Vec::with_capacity(names.len());
                for name in names {
                    let name = name
                        .as_str()
                        .ok_or_else(|| "day_of_week entries must be strings".to_string())?;
                    let day: Weekday = name
                        .to_lowercase()
                        .parse()
                        .map_err(|_| format!("unknown day of week '{}'", name))?;
                    parsed.push(day);
                }
                Some(parsed)
            }
            None => None,
        };

        let timezone = match obj.get("timezone") {
            Some(tz) => {
                let name = tz
                    .as_str()
                    .ok_or_else(|| "timezone must be a string".to_string())?;
                Some(
                    name.parse::<Tz>()
                        .map_err(|_| format!("unknown timezone '{}'", name))?,
                )
            }
            None => None,
        };

        Ok(TimeCheck {
            period,
            hour_range,
            day_of_week,
            timezone,
        })
    }
}

fn default_narrative_threshold() -> f64 {
    0.7
}

/// Semantic narrative search condition
#[derive(Debug, Clone, PartialEq)]
pub struct NarrativeCheck {
    pub query: String,

    /// Minimum similarity score for a match
    pub threshold: f64,

    /// Optional narrative type filter
    pub narrative_type: Option<String>,

    /// Maximum matches fetched
    pub limit: usize,
}

impl NarrativeCheck {
    fn from_value(value: &Value) -> Result<Self, String> {
        let obj = value
            .as_object()
            .ok_or_else(|| "narrative_check must be an object".to_string())?;

        let query = obj
            .get("query")
            .and_then(Value::as_str)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| "narrative_check requires a non-empty query".to_string())?;

        let threshold = match obj.get("threshold") {
            Some(t) => t
                .as_f64()
                .filter(|t| (0.0..=1.0).contains(t))
                .ok_or_else(|| "narrative_check threshold must be in [0, 1]".to_string())?,
            None => default_narrative_threshold(),
        };

        let narrative_type = obj
            .get("narrative_type")
            .and_then(Value::as_str)
            .map(str::to_string);

        let limit = match obj.get("limit") {
            Some(l) => l
                .as_u64()
                .filter(|l| *l >= 1)
                .ok_or_else(|| "narrative_check limit must be a positive integer".to_string())?
                as usize,
            None => 5,
        };

        Ok(NarrativeCheck {
            query: query.to_string(),
            threshold,
            narrative_type,
            limit,
        })
    }

    /// Cache key for one evaluation pass
    pub fn cache_key(&self) -> String {
        format!(
            "{}|{}|{:.3}",
            self.query,
            self.narrative_type.as_deref().unwrap_or(""),
            self.threshold
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_single_trait_check() {
        let node = ConditionNode::from_value(&json!({
            "type": "single",
            "trait_check": {
                "path": "current_state.energy_level",
                "operator": "equals",
                "value": "high"
            }
        }))
        .unwrap();

        match node {
            ConditionNode::Single(Check::Trait(check)) => {
                assert_eq!(check.path, "current_state.energy_level");
                assert_eq!(check.operator, Operator::Equals);
                assert_eq!(check.value, Some(json!("high")));
            }
            other => panic!("unexpected node: {other:?}"),
        }
    }

    #[test]
    fn test_type_defaults_to_single() {
        let node = ConditionNode::from_value(&json!({
            "time_check": {"period": "morning"}
        }))
        .unwrap();
        assert!(matches!(node, ConditionNode::Single(Check::Time(_))));
    }

    #[test]
    fn test_parse_nested_all_any() {
        let node = ConditionNode::from_value(&json!({
            "type": "all",
            "conditions": [
                {"time_check": {"period": "morning"}},
                {
                    "type": "any",
                    "conditions": [
                        {"trait_check": {"path": "a.b", "operator": "exists"}},
                        {"context_check": {"field": "c.d", "operator": "exists"}}
                    ]
                }
            ]
        }))
        .unwrap();

        match node {
            ConditionNode::All(children) => {
                assert_eq!(children.len(), 2);
                assert!(matches!(children[1], ConditionNode::Any(_)));
            }
            other => panic!("unexpected node: {other:?}"),
        }
    }

    #[test]
    fn test_compile_rejects_malformed_conditions() {
        // Unknown operator
        assert!(ConditionNode::from_value(&json!({
            "trait_check": {"path": "a.b", "operator": "matches", "value": 1}
        }))
        .is_err());

        // Value-requiring operator without a value
        assert!(ConditionNode::from_value(&json!({
            "trait_check": {"path": "a.b", "operator": "greater"}
        }))
        .is_err());

        // Malformed path
        assert!(ConditionNode::from_value(&json!({
            "trait_check": {"path": "a..b", "operator": "exists"}
        }))
        .is_err());

        // Unknown period and out-of-range hour
        assert!(ConditionNode::from_value(&json!({
            "time_check": {"period": "dawn"}
        }))
        .is_err());
        assert!(ConditionNode::from_value(&json!({
            "time_check": {"hour_range": [9, 24]}
        }))
        .is_err());

        // Empty composite
        assert!(ConditionNode::from_value(&json!({
            "type": "all", "conditions": []
        }))
        .is_err());

        // Unknown node type
        assert!(ConditionNode::from_value(&json!({
            "type": "none", "conditions": [{}]
        }))
        .is_err());
    }

    #[test]
    fn test_period_bounds_and_wraparound() {
        assert!(Period::Morning.contains(5));
        assert!(Period::Morning.contains(11));
        assert!(!Period::Morning.contains(12));

        assert!(Period::Night.contains(23));
        assert!(Period::Night.contains(2));
        assert!(!Period::Night.contains(5));
        assert!(!Period::Night.contains(12));

        // Explicit wrap-around range
        assert!(hour_in_range(23, (22, 6)));
        assert!(hour_in_range(3, (22, 6)));
        assert!(!hour_in_range(12, (22, 6)));
    }

    #[test]
    fn test_narrative_check_defaults() {
        let node = ConditionNode::from_value(&json!({
            "narrative_check": {"query": "focused in the morning"}
        }))
        .unwrap();

        match node {
            ConditionNode::Single(Check::Narrative(check)) => {
                assert_eq!(check.threshold, 0.7);
                assert_eq!(check.limit, 5);
                assert!(check.narrative_type.is_none());
            }
            other => panic!("unexpected node: {other:?}"),
        }
    }

    #[test]
    fn test_collect_narrative_checks() {
        let node = ConditionNode::from_value(&json!({
            "type": "any",
            "conditions": [
                {"narrative_check": {"query": "morning focus"}},
                {
                    "type": "all",
                    "conditions": [
                        {"narrative_check": {"query": "deep work"}},
                        {"time_check": {"period": "morning"}}
                    ]
                }
            ]
        }))
        .unwrap();

        let mut checks = Vec::new();
        node.collect_narrative_checks(&mut checks);
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0].query, "morning focus");
        assert_eq!(checks[1].query, "deep work");
    }

    #[test]
    fn test_day_of_week_parsing_is_case_insensitive() {
        let node = ConditionNode::from_value(&json!({
            "time_check": {"day_of_week": ["Monday", "FRIDAY"]}
        }))
        .unwrap();

        match node {
            ConditionNode::Single(Check::Time(check)) => {
                assert_eq!(
                    check.day_of_week,
                    Some(vec![Weekday::Mon, Weekday::Fri])
                );
            }
            other => panic!("unexpected node: {other:?}"),
        }
    }
}
