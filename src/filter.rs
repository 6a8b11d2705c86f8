//! Filter evaluation
//!
//! A [`FilterGroup`] is a boolean tree of AND/OR groups over comparison
//! leaves. Leaves resolve their `field` with the same dotted-path scheme as
//! the template engine, and any string operand is template-resolved against
//! the context before comparison, so a filter can express things like
//! "message.content contains {{server.clientNickname}}".
//!
//! All regexes are compiled once, at load time; evaluation never compiles.
//! Comparisons are strict: a null or absent field is matched only by
//! `notExists`.

use crate::config::{FilterConfig, FilterGroup, FilterNode, FilterOp, FilterOperator};
use crate::error::FilterError;
use crate::template;
use regex::Regex;
use serde_json::Value;

/// Compile a regex with JS-style flags applied as inline modifiers.
/// Unsupported flags (`g`, `u`, `y`) are ignored.
pub(crate) fn compile_regex(pattern: &str, flags: &str) -> Result<Regex, regex::Error> {
    let inline: String = flags
        .chars()
        .filter(|c| matches!(c, 'i' | 'm' | 's' | 'x' | 'U'))
        .collect();
    if inline.is_empty() {
        Regex::new(pattern)
    } else {
        Regex::new(&format!("(?{}){}", inline, pattern))
    }
}

/// A filter tree with every regex pre-compiled.
#[derive(Debug)]
pub struct CompiledGroup {
    operator: FilterOperator,
    children: Vec<CompiledNode>,
}

#[derive(Debug)]
enum CompiledNode {
    Group(CompiledGroup),
    Leaf(CompiledLeaf),
}

#[derive(Debug)]
struct CompiledLeaf {
    field: String,
    op: FilterOp,
    value: Option<Value>,
    regex: Option<Regex>,
}

/// Validate and compile a filter group. Empty groups and invalid regexes
/// are load-time errors.
pub fn compile(group: &FilterGroup) -> Result<CompiledGroup, FilterError> {
    if group.filters.is_empty() {
        return Err(FilterError::EmptyGroup);
    }
    let mut children = Vec::with_capacity(group.filters.len());
    for node in &group.filters {
        children.push(match node {
            FilterNode::Group(inner) => CompiledNode::Group(compile(inner)?),
            FilterNode::Leaf(leaf) => CompiledNode::Leaf(compile_leaf(leaf)?),
        });
    }
    Ok(CompiledGroup {
        operator: group.operator,
        children,
    })
}

fn compile_leaf(leaf: &FilterConfig) -> Result<CompiledLeaf, FilterError> {
    let regex = match leaf.operator {
        FilterOp::Matches | FilterOp::NotMatches => {
            let pattern = leaf
                .pattern
                .as_deref()
                .ok_or_else(|| FilterError::MissingPattern {
                    field: leaf.field.clone(),
                })?;
            let flags = leaf.flags.as_deref().unwrap_or("");
            Some(
                compile_regex(pattern, flags).map_err(|source| FilterError::InvalidRegex {
                    pattern: pattern.to_string(),
                    source,
                })?,
            )
        }
        _ => None,
    };
    match leaf.operator {
        FilterOp::Equals
        | FilterOp::NotEquals
        | FilterOp::Contains
        | FilterOp::NotContains
        | FilterOp::In
        | FilterOp::NotIn
            if leaf.value.is_none() =>
        {
            return Err(FilterError::MissingValue {
                field: leaf.field.clone(),
            });
        }
        _ => {}
    }
    Ok(CompiledLeaf {
        field: leaf.field.clone(),
        op: leaf.operator,
        value: leaf.value.clone(),
        regex,
    })
}

impl CompiledGroup {
    /// Evaluate the tree against a context. AND stops at the first false
    /// child, OR at the first true one.
    pub fn evaluate(&self, context: &Value) -> bool {
        match self.operator {
            FilterOperator::And => self.children.iter().all(|c| c.evaluate(context)),
            FilterOperator::Or => self.children.iter().any(|c| c.evaluate(context)),
        }
    }
}

impl CompiledNode {
    fn evaluate(&self, context: &Value) -> bool {
        match self {
            CompiledNode::Group(group) => group.evaluate(context),
            CompiledNode::Leaf(leaf) => leaf.evaluate(context),
        }
    }
}

impl CompiledLeaf {
    fn evaluate(&self, context: &Value) -> bool {
        let field = template::resolve_path(context, &self.field).filter(|v| !v.is_null());

        // Null and absent fields are matched only by notExists.
        let field = match (field, self.op) {
            (None, FilterOp::NotExists) => return true,
            (None, _) => return false,
            (Some(_), FilterOp::NotExists) => return false,
            (Some(_), FilterOp::Exists) => return true,
            (Some(v), _) => v,
        };

        let operand = self.value.as_ref().map(|v| resolve_operand(v, context));

        match self.op {
            FilterOp::Equals => operand.map(|v| &v == field).unwrap_or(false),
            FilterOp::NotEquals => operand.map(|v| &v != field).unwrap_or(false),
            FilterOp::Contains => contains(field, operand.as_ref()),
            FilterOp::NotContains => match field {
                Value::String(_) | Value::Array(_) => !contains(field, operand.as_ref()),
                _ => true,
            },
            FilterOp::Matches => match field {
                Value::String(s) => self.regex.as_ref().is_some_and(|r| r.is_match(s)),
                _ => false,
            },
            FilterOp::NotMatches => match field {
                Value::String(s) => self.regex.as_ref().is_some_and(|r| !r.is_match(s)),
                _ => false,
            },
            FilterOp::In => match operand {
                Some(Value::Array(items)) => items.contains(field),
                _ => false,
            },
            FilterOp::NotIn => match operand {
                Some(Value::Array(items)) => !items.contains(field),
                _ => true,
            },
            FilterOp::Exists | FilterOp::NotExists => unreachable!("handled above"),
        }
    }
}

/// Template-resolve string operands; resolve strings inside arrays too so
/// `in` lists can reference context values.
fn resolve_operand(value: &Value, context: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(template::process(s, context)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| resolve_operand(v, context)).collect())
        }
        other => other.clone(),
    }
}

fn contains(field: &Value, operand: Option<&Value>) -> bool {
    let Some(operand) = operand else {
        return false;
    };
    match field {
        Value::String(haystack) => match operand {
            Value::String(needle) => haystack.contains(needle.as_str()),
            _ => false,
        },
        Value::Array(items) => items.contains(operand),
        _ => false,
    }
}
