//! Typed report parameters and the string coercion rules applied to form input.

use crate::error::{Result, ServiceError};
use serde::Serialize;
use std::fmt;

/// Descriptor class used by templates for list parameters.
pub const LIST_CLASS: &str = "java.util.List";

/// List parameter whose tokens must be numeric entity identifiers.
pub const ENTITY_IDS_PARAMETER: &str = "EntityIds";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Null,
    Text(String),
    Texts(Vec<String>),
    Ids(Vec<i64>),
}

impl ParameterValue {
    /// Renders the value back into the text an operator would type in the form.
    pub fn display(&self, class: &str) -> String {
        match self {
            ParameterValue::Null => String::new(),
            ParameterValue::Texts(values) if is_list_class(class) => values.join(","),
            ParameterValue::Ids(values) if is_list_class(class) => join_ids(values),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Null => Ok(()),
            ParameterValue::Text(value) => f.write_str(value),
            ParameterValue::Texts(values) => write!(f, "[{}]", values.join(", ")),
            ParameterValue::Ids(values) => {
                let joined: Vec<String> = values.iter().map(i64::to_string).collect();
                write!(f, "[{}]", joined.join(", "))
            }
        }
    }
}

fn join_ids(values: &[i64]) -> String {
    values
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

pub fn is_list_class(class: &str) -> bool {
    class == LIST_CLASS || class.eq_ignore_ascii_case("list")
}

/// Converts a raw form or default-expression string into the typed value for `class`.
pub fn to_value(name: &str, class: &str, raw: Option<&str>) -> Result<ParameterValue> {
    if !is_list_class(class) {
        return Ok(raw.map_or(ParameterValue::Null, |value| {
            ParameterValue::Text(value.to_string())
        }));
    }

    let raw = match raw {
        Some(value) if !value.trim().is_empty() => value,
        _ => return Ok(ParameterValue::Texts(Vec::new())),
    };

    let tokens = split_list(raw);
    if name == ENTITY_IDS_PARAMETER {
        let ids = tokens
            .into_iter()
            .map(|token| {
                token
                    .parse::<i64>()
                    .map_err(|source| ServiceError::InvalidIdentifier {
                        token: token.to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok(ParameterValue::Ids(ids));
    }

    Ok(ParameterValue::Texts(
        tokens.into_iter().map(str::to_string).collect(),
    ))
}

/// Splits on commas, trimming each token. Trailing empty tokens are dropped, inner ones kept.
fn split_list(raw: &str) -> Vec<&str> {
    let mut tokens: Vec<&str> = raw.trim().split(',').map(str::trim).collect();
    while tokens.last().is_some_and(|token| token.is_empty()) {
        tokens.pop();
    }
    tokens
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportParameter {
    name: String,
    class: String,
    value: ParameterValue,
}

impl ReportParameter {
    pub fn new(name: impl Into<String>, class: impl Into<String>, raw: Option<&str>) -> Result<Self> {
        let name = name.into();
        let class = class.into();
        let value = to_value(&name, &class, raw)?;
        Ok(Self { name, class, value })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn value(&self) -> &ParameterValue {
        &self.value
    }

    pub fn display_value(&self) -> String {
        self.value.display(&self.class)
    }

    /// Re-derives the typed value from a newly submitted raw string.
    pub fn assign(&mut self, raw: Option<&str>) -> Result<()> {
        self.value = to_value(&self.name, &self.class, raw)?;
        Ok(())
    }

    /// Form field name the parameter is submitted under.
    pub fn field_name(&self) -> String {
        format!("params[{}]", self.name)
    }
}
