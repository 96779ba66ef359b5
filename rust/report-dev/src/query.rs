//! Runs console query text and shapes the entities into a display table.

use crate::{
    datasource::{DataSource, Entity, FieldValue, Schema},
    error::{Result, ServiceError},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

const ID_HEADER: &str = "id";
const COLLECTION_PLACEHOLDER: &str = "[]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    Table(QueryTable),
    Empty,
}

#[derive(Clone)]
pub struct QueryRunner {
    source: Arc<dyn DataSource>,
}

impl QueryRunner {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self { source }
    }

    pub async fn run(&self, query_text: &str) -> Result<QueryOutcome> {
        let entities = self
            .source
            .find(query_text)
            .await
            .map_err(ServiceError::Query)?;

        Ok(tabulate(&entities))
    }
}

/// Builds the table from the first entity's schema. Mixed result types are not detected:
/// later entities missing a column render blank cells, extra columns are dropped.
pub fn tabulate(entities: &[Entity]) -> QueryOutcome {
    let Some(first) = entities.first() else {
        return QueryOutcome::Empty;
    };
    let schema: &Schema = first.schema();
    let with_id = !schema.is_virtual_type();
    debug!(
        plugin = schema.plugin(),
        schema = schema.name(),
        entities = entities.len(),
        "tabulating query result"
    );

    let mut headers = Vec::new();
    if with_id {
        headers.push(ID_HEADER.to_string());
    }
    headers.extend(schema.fields().map(str::to_string));

    let rows = entities
        .iter()
        .map(|entity| {
            let mut row = Vec::with_capacity(headers.len());
            if with_id {
                row.push(entity.id().map(|id| id.to_string()).unwrap_or_default());
            }
            row.extend(
                schema
                    .fields()
                    .enumerate()
                    .map(|(position, field)| cell(entity.field_at(position, field))),
            );
            row
        })
        .collect();

    QueryOutcome::Table(QueryTable { headers, rows })
}

fn cell(value: Option<&FieldValue>) -> String {
    match value {
        None => String::new(),
        Some(FieldValue::Collection(_)) => COLLECTION_PLACEHOLDER.to_string(),
        Some(other) => other.to_string(),
    }
}
