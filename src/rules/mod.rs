//! Declarative rule engine
//!
//! Rule sets are uploaded as YAML or JSON documents and compiled into a
//! closed condition AST at load time, so malformed configurations fail
//! fast instead of mid-evaluation. The engine itself is stateless: it
//! evaluates a compiled rule set against a mindscape, a context bag, and
//! the narrative search capability, and emits ranked suggestions.

pub mod ast;
pub mod config;
pub mod engine;

pub use ast::{Check, ConditionNode, NarrativeCheck, Operator, PathCheck, Period, TimeCheck};
pub use config::{ParameterSource, Rule, RuleSet, RuleSetMetadata, SuggestionAction, Template};
pub use engine::RuleEngine;
