//! Rule set loading and validation
//!
//! Rule sets upload as YAML or JSON and compile into typed structures
//! here. Validation runs before anything is evaluated and collects every
//! problem it finds, so an operator sees the whole list at once instead
//! of fixing errors one upload at a time. A compiled rule set is immutable
//! for the lifetime of an evaluation; weight adjustments produce a new
//! document (see `feedback::adjust_rule_weight`).

use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{PersonaKitError, Result};
use crate::paths;
use crate::rules::ast::ConditionNode;
use crate::types::Priority;

/// Identifying metadata for a rule set
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSetMetadata {
    pub id: String,
    pub name: String,
    pub description: String,

    /// Default persona TTL for this rule set, in hours
    pub default_ttl_hours: Option<u32>,
}

/// A suggestion template referenced by rule actions
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    /// Title with literal `{param}` placeholders
    pub title: String,

    /// Description with literal `{param}` placeholders
    pub description: String,

    pub priority: Priority,

    /// Passed through to emitted suggestions verbatim
    pub metadata: Value,
}

impl Template {
    /// Suggestion type carried in the template metadata, falling back to
    /// the template id
    pub fn suggestion_type<'a>(&'a self, template_id: &'a str) -> &'a str {
        self.metadata
            .get("suggestion_type")
            .and_then(Value::as_str)
            .unwrap_or(template_id)
    }
}

/// Where a template parameter's value comes from
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParameterSource {
    pub from_trait: Option<String>,
    pub from_context: Option<String>,

    /// Static fallback when the path resolves to nothing
    pub default: Option<Value>,

    /// Optional named transform; unknown names degrade to the raw value
    pub transform: Option<String>,
}

/// A `generate_suggestion` action
#[derive(Debug, Clone, PartialEq)]
pub struct SuggestionAction {
    /// Template id; guaranteed to exist by validation
    pub template: String,

    pub parameters: BTreeMap<String, ParameterSource>,
}

/// One rule: a compiled condition tree plus actions and a weight
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub id: String,
    pub conditions: ConditionNode,
    pub actions: Vec<SuggestionAction>,

    /// Influence multiplier; rules with weight <= 0 never fire
    pub weight: f64,

    /// Adjustment bookkeeping (last_adjusted, adjustment_reason,
    /// original_weight), written by the rule-level weight adjuster
    pub metadata: Value,
}

/// A complete, validated rule set
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSet {
    pub metadata: RuleSetMetadata,

    /// Dotted trait paths that must exist before personas can be generated
    pub required_traits: Vec<String>,

    pub rules: Vec<Rule>,
    pub templates: BTreeMap<String, Template>,
}

impl RuleSet {
    /// Parse and validate a YAML rule set document
    pub fn from_yaml(text: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(text)?;
        Self::from_value(&value)
    }

    /// Parse and validate a JSON rule set document
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(&value)
    }

    /// Compile a rule set from a parsed document, collecting all
    /// validation errors
    pub fn from_value(value: &Value) -> Result<Self> {
        let mut errors: Vec<String> = Vec::new();

        let obj = match value.as_object() {
            Some(obj) => obj,
            None => {
                return Err(PersonaKitError::Validation(
                    "rule set must be an object".to_string(),
                ))
            }
        };

        let metadata = parse_metadata(obj.get("metadata"), &mut errors);
        let required_traits = parse_required_traits(obj.get("required_traits"), &mut errors);
        let templates = parse_templates(obj.get("templates"), &mut errors);
        let rules = parse_rules(obj.get("rules"), &mut errors);

        // Dangling template references are a load-time error, never an
        // evaluation-time one
        for rule in &rules {
            for action in &rule.actions {
                if !templates.contains_key(&action.template) {
                    errors.push(format!(
                        "rule '{}' references unknown template '{}'",
                        rule.id, action.template
                    ));
                }
            }
        }

        if !errors.is_empty() {
            return Err(PersonaKitError::Validation(errors.join("; ")));
        }

        Ok(RuleSet {
            metadata: metadata.expect("metadata parsed when no errors"),
            required_traits,
            rules,
            templates,
        })
    }
}

fn parse_metadata(value: Option<&Value>, errors: &mut Vec<String>) -> Option<RuleSetMetadata> {
    let obj = match value.and_then(Value::as_object) {
        Some(obj) => obj,
        None => {
            errors.push("missing metadata".to_string());
            return None;
        }
    };

    let mut field = |name: &str| -> String {
        match obj.get(name).and_then(Value::as_str) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => {
                errors.push(format!("metadata missing required field '{}'", name));
                String::new()
            }
        }
    };

    let id = field("id");
    let name = field("name");
    let description = field("description");

    let default_ttl_hours = obj
        .get("default_ttl_hours")
        .and_then(Value::as_u64)
        .map(|h| h as u32);

    Some(RuleSetMetadata {
        id,
        name,
        description,
        default_ttl_hours,
    })
}

fn parse_required_traits(value: Option<&Value>, errors: &mut Vec<String>) -> Vec<String> {
    let Some(value) = value else {
        return Vec::new();
    };
    let Some(list) = value.as_array() else {
        errors.push("required_traits must be a list of paths".to_string());
        return Vec::new();
    };

    let mut traits = Vec::with_capacity(list.len());
    for item in list {
        match item.as_str() {
            Some(path) if paths::parse(path).is_some() => traits.push(path.to_string()),
            Some(path) => errors.push(format!("malformed required trait path '{}'", path)),
            None => errors.push("required_traits entries must be strings".to_string()),
        }
    }
    traits
}

fn parse_templates(
    value: Option<&Value>,
    errors: &mut Vec<String>,
) -> BTreeMap<String, Template> {
    let obj = match value.and_then(Value::as_object) {
        Some(obj) => obj,
        None => {
            errors.push("missing templates".to_string());
            return BTreeMap::new();
        }
    };

    let mut templates = BTreeMap::new();
    for (id, template) in obj {
        let Some(template) = template.as_object() else {
            errors.push(format!("template '{}' must be an object", id));
            continue;
        };

        let priority = match template.get("priority").and_then(Value::as_str) {
            Some(p) => match Priority::parse(p) {
                Some(priority) => priority,
                None => {
                    errors.push(format!("template '{}' has unknown priority '{}'", id, p));
                    continue;
                }
            },
            None => Priority::default(),
        };

        templates.insert(
            id.clone(),
            Template {
                title: template
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                description: template
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                priority,
                metadata: template.get("metadata").cloned().unwrap_or(Value::Null),
            },
        );
    }
    templates
}

fn parse_rules(value: Option<&Value>, errors: &mut Vec<String>) -> Vec<Rule> {
    let list = match value.and_then(Value::as_array) {
        Some(list) if !list.is_empty() => list,
        _ => {
            errors.push("missing rules".to_string());
            return Vec::new();
        }
    };

    let mut rules = Vec::with_capacity(list.len());
    for (index, rule) in list.iter().enumerate() {
        let Some(obj) = rule.as_object() else {
            errors.push(format!("rule #{} must be an object", index));
            continue;
        };

        let id = match obj.get("id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                errors.push(format!("rule #{} missing id", index));
                continue;
            }
        };

        let weight = match obj.get("weight").and_then(Value::as_f64) {
            Some(weight) => weight,
            None => {
                errors.push(format!("rule '{}' missing weight", id));
                continue;
            }
        };

        let conditions = match obj.get("conditions") {
            Some(conditions) => match ConditionNode::from_value(conditions) {
                Ok(node) => node,
                Err(e) => {
                    errors.push(format!("rule '{}': {}", id, e));
                    continue;
                }
            },
            None => {
                errors.push(format!("rule '{}' missing conditions", id));
                continue;
            }
        };

        let actions = match obj.get("actions").and_then(Value::as_array) {
            Some(actions) if !actions.is_empty() => {
                match parse_actions(&id, actions, errors) {
                    Some(actions) => actions,
                    None => continue,
                }
            }
            _ => {
                errors.push(format!("rule '{}' missing actions", id));
                continue;
            }
        };

        rules.push(Rule {
            id,
            conditions,
            actions,
            weight,
            metadata: obj.get("metadata").cloned().unwrap_or(Value::Null),
        });
    }
    rules
}

fn parse_actions(
    rule_id: &str,
    actions: &[Value],
    errors: &mut Vec<String>,
) -> Option<Vec<SuggestionAction>> {
    let mut parsed = Vec::with_capacity(actions.len());
    let mut failed = false;

    for action in actions {
        let action_type = action.get("type").and_then(Value::as_str);
        if action_type != Some("generate_suggestion") {
            errors.push(format!(
                "rule '{}' has unknown action type '{}'",
                rule_id,
                action_type.unwrap_or("<missing>")
            ));
            failed = true;
            continue;
        }

        let Some(body) = action.get("generate_suggestion").and_then(Value::as_object) else {
            errors.push(format!(
                "rule '{}' action missing generate_suggestion body",
                rule_id
            ));
            failed = true;
            continue;
        };

        let Some(template) = body.get("template").and_then(Value::as_str) else {
            errors.push(format!("rule '{}' action missing template", rule_id));
            failed = true;
            continue;
        };

        let mut parameters = BTreeMap::new();
        if let Some(params) = body.get("parameters").and_then(Value::as_object) {
            for (name, source) in params {
                match parse_parameter(rule_id, name, source) {
                    Ok(source) => {
                        parameters.insert(name.clone(), source);
                    }
                    Err(e) => {
                        errors.push(e);
                        failed = true;
                    }
                }
            }
        }

        parsed.push(SuggestionAction {
            template: template.to_string(),
            parameters,
        });
    }

    (!failed).then_some(parsed)
}

fn parse_parameter(
    rule_id: &str,
    name: &str,
    source: &Value,
) -> std::result::Result<ParameterSource, String> {
    let obj = source
        .as_object()
        .ok_or_else(|| format!("rule '{}' parameter '{}' must be an object", rule_id, name))?;

    let path_field = |key: &str| -> std::result::Result<Option<String>, String> {
        match obj.get(key) {
            Some(v) => {
                let path = v.as_str().filter(|p| paths::parse(p).is_some()).ok_or_else(
                    || format!("rule '{}' parameter '{}' has malformed {}", rule_id, name, key),
                )?;
                Ok(Some(path.to_string()))
            }
            None => Ok(None),
        }
    };

    Ok(ParameterSource {
        from_trait: path_field("from_trait")?,
        from_context: path_field("from_context")?,
        default: obj.get("default").cloned(),
        transform: obj
            .get("transform")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}
