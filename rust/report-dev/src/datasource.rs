//! Data-layer seam used by the query console, plus the Postgres-backed implementation.

use crate::db::PgPool;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::{
    error::Error as StdError,
    fmt::{self, Write as _},
    net::IpAddr,
    sync::Arc,
    time::Duration,
};
use tokio_postgres::types::{FromSql, Kind, Type};
use tracing::{debug, warn};

/// Executes free-form query text against the data layer.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn find(&self, query_text: &str) -> anyhow::Result<Vec<Entity>>;
}

/// Shape of a result entity as reported by the data layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    plugin: String,
    name: String,
    fields: Vec<String>,
    virtual_type: bool,
}

impl Schema {
    pub fn new(plugin: impl Into<String>, name: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            plugin: plugin.into(),
            name: name.into(),
            fields,
            virtual_type: false,
        }
    }

    /// Marks the schema as defined at runtime, with no backing identifier.
    pub fn into_virtual(mut self) -> Self {
        self.virtual_type = true;
        self
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }

    pub fn is_virtual_type(&self) -> bool {
        self.virtual_type
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Collection(Vec<FieldValue>),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(value) => f.write_str(value),
            FieldValue::Int(value) => write!(f, "{value}"),
            FieldValue::Float(value) => write!(f, "{value}"),
            FieldValue::Bool(value) => write!(f, "{value}"),
            FieldValue::Collection(values) => {
                f.write_str("[")?;
                for (idx, value) in values.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// One result row. Fields keep the column order of the schema, so repeated column names
/// each keep their own value.
#[derive(Debug, Clone)]
pub struct Entity {
    id: Option<i64>,
    schema: Arc<Schema>,
    fields: Vec<(String, Option<FieldValue>)>,
}

impl Entity {
    pub fn new(id: Option<i64>, schema: Arc<Schema>) -> Self {
        Self {
            id,
            schema,
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Option<FieldValue>) -> Self {
        self.fields.push((name.into(), value));
        self
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// First field called `name`. `None` covers both a null value and a field the entity
    /// does not carry.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .and_then(|(_, value)| value.as_ref())
    }

    /// Field at `position` when it is called `name`, otherwise the first field called `name`.
    pub fn field_at(&self, position: usize, name: &str) -> Option<&FieldValue> {
        match self.fields.get(position) {
            Some((field, value)) if field == name => value.as_ref(),
            _ => self.field(name),
        }
    }
}

const PG_PLUGIN: &str = "postgres";
const ID_COLUMN: &str = "id";

type BoxError = Box<dyn StdError + Sync + Send>;

/// Runs query text as read-only SQL through the shared pool.
#[derive(Clone)]
pub struct PgDataSource {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PgDataSource {
    pub fn new(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }
}

#[async_trait]
impl DataSource for PgDataSource {
    async fn find(&self, query_text: &str) -> anyhow::Result<Vec<Entity>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|err| anyhow!("failed to acquire database connection: {err:?}"))?;

        let tx = conn
            .build_transaction()
            .read_only(true)
            .start()
            .await
            .context("failed to open read-only transaction")?;
        tx.batch_execute(&format!(
            "SET LOCAL statement_timeout = {}",
            self.statement_timeout.as_millis()
        ))
        .await
        .context("failed to apply statement timeout")?;

        let rows = match tx.query(query_text, &[]).await {
            Ok(rows) => rows,
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback after failed query did not complete");
                }
                return Err(err.into());
            }
        };
        tx.rollback().await?;
        debug!(rows = rows.len(), "query text executed");

        let Some(first) = rows.first() else {
            return Ok(Vec::new());
        };
        let layout = RowLayout::new(
            first
                .columns()
                .iter()
                .map(|column| (column.name(), column.type_())),
        );
        rows.iter()
            .map(|row| -> anyhow::Result<Entity> {
                let cells = (0..row.len())
                    .map(|idx| {
                        row.try_get::<_, Cell>(idx).map(|cell| cell.0).with_context(|| {
                            format!("failed to decode column '{}'", row.columns()[idx].name())
                        })
                    })
                    .collect::<anyhow::Result<Vec<_>>>()?;
                Ok(layout.entity(cells))
            })
            .collect()
    }
}

/// Maps result columns onto a schema. The first integer `id` column becomes the entity
/// identifier; every other column, repeated names included, is a field in column order.
struct RowLayout {
    schema: Arc<Schema>,
    id_position: Option<usize>,
}

impl RowLayout {
    fn new<'a>(columns: impl IntoIterator<Item = (&'a str, &'a Type)>) -> Self {
        let columns: Vec<_> = columns.into_iter().collect();
        let id_position = columns
            .iter()
            .position(|(name, ty)| is_id_column(name, ty));
        let fields = columns
            .iter()
            .enumerate()
            .filter(|(idx, _)| Some(*idx) != id_position)
            .map(|(_, (name, _))| name.to_string())
            .collect();

        let schema = Schema::new(PG_PLUGIN, "row", fields);
        let schema = if id_position.is_some() {
            schema
        } else {
            schema.into_virtual()
        };
        Self {
            schema: Arc::new(schema),
            id_position,
        }
    }

    fn entity(&self, cells: Vec<Option<FieldValue>>) -> Entity {
        let mut entity = Entity::new(None, Arc::clone(&self.schema));
        let mut names = self.schema.fields();
        for (idx, value) in cells.into_iter().enumerate() {
            if Some(idx) == self.id_position {
                if let Some(FieldValue::Int(id)) = value {
                    entity.id = Some(id);
                }
            } else if let Some(name) = names.next() {
                entity = entity.with_field(name, value);
            }
        }
        entity
    }
}

fn is_id_column(name: &str, ty: &Type) -> bool {
    name == ID_COLUMN && matches!(*ty, Type::INT2 | Type::INT4 | Type::INT8)
}

/// A single column value in its display form, accepted for every column type.
struct Cell(Option<FieldValue>);

impl<'a> FromSql<'a> for Cell {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        field_value(ty, raw).map(|value| Cell(Some(value)))
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, BoxError> {
        Ok(Cell(None))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

fn field_value(ty: &Type, raw: &[u8]) -> Result<FieldValue, BoxError> {
    if let Kind::Array(_) = ty.kind() {
        // Contents are never displayed; nested arrays stay an opaque collection.
        let values = Vec::<Cell>::from_sql(ty, raw)
            .map(|cells| cells.into_iter().filter_map(|cell| cell.0).collect())
            .unwrap_or_default();
        return Ok(FieldValue::Collection(values));
    }

    let value = match *ty {
        Type::BOOL => FieldValue::Bool(bool::from_sql(ty, raw)?),
        Type::INT2 => FieldValue::Int(i16::from_sql(ty, raw)?.into()),
        Type::INT4 => FieldValue::Int(i32::from_sql(ty, raw)?.into()),
        Type::INT8 => FieldValue::Int(i64::from_sql(ty, raw)?),
        Type::OID => FieldValue::Int(u32::from_sql(ty, raw)?.into()),
        Type::FLOAT4 => FieldValue::Float(f32::from_sql(ty, raw)?.into()),
        Type::FLOAT8 => FieldValue::Float(f64::from_sql(ty, raw)?),
        Type::NUMERIC => FieldValue::Text(numeric_text(ty, raw)?),
        Type::MONEY => FieldValue::Text(money_text(i64::from_sql(&Type::INT8, raw)?)),
        Type::CHAR => FieldValue::Text(char::from(i8::from_sql(ty, raw)? as u8).to_string()),
        Type::TIMESTAMPTZ => FieldValue::Text(DateTime::<Utc>::from_sql(ty, raw)?.to_rfc3339()),
        Type::TIMESTAMP => FieldValue::Text(NaiveDateTime::from_sql(ty, raw)?.to_string()),
        Type::DATE => FieldValue::Text(NaiveDate::from_sql(ty, raw)?.to_string()),
        Type::TIME => FieldValue::Text(NaiveTime::from_sql(ty, raw)?.to_string()),
        Type::INTERVAL => FieldValue::Text(interval_text(raw)?),
        Type::UUID => FieldValue::Text(uuid::Uuid::from_sql(ty, raw)?.to_string()),
        Type::JSON | Type::JSONB => {
            FieldValue::Text(serde_json::Value::from_sql(ty, raw)?.to_string())
        }
        Type::INET | Type::CIDR => FieldValue::Text(inet_text(raw)?),
        Type::BYTEA => FieldValue::Text(hex_text(raw)),
        // Text-like types (varchar, enums, xml, citext, ...) send their text form as-is.
        _ => FieldValue::Text(raw_text(raw)),
    };
    Ok(value)
}

fn numeric_text(ty: &Type, raw: &[u8]) -> Result<String, BoxError> {
    // Sign word of the binary header carries the special values.
    match raw.get(4..6) {
        Some([0xC0, 0x00]) => Ok("NaN".to_string()),
        Some([0xD0, 0x00]) => Ok("Infinity".to_string()),
        Some([0xF0, 0x00]) => Ok("-Infinity".to_string()),
        _ => Ok(Decimal::from_sql(ty, raw)?.to_string()),
    }
}

fn money_text(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    format!("{sign}{}.{:02}", cents / 100, cents % 100)
}

/// Postgres-style interval text, e.g. `1 year 2 mons 3 days 04:05:06.5`.
fn interval_text(raw: &[u8]) -> Result<String, BoxError> {
    let raw: [u8; 16] = raw
        .try_into()
        .map_err(|_| format!("invalid interval length {}", raw.len()))?;
    let mut micros = [0u8; 8];
    micros.copy_from_slice(&raw[0..8]);
    let mut days = [0u8; 4];
    days.copy_from_slice(&raw[8..12]);
    let mut months = [0u8; 4];
    months.copy_from_slice(&raw[12..16]);
    let micros = i64::from_be_bytes(micros);
    let days = i32::from_be_bytes(days);
    let months = i32::from_be_bytes(months);

    let mut parts = Vec::new();
    for (value, unit) in [(months / 12, "year"), (months % 12, "mon"), (days, "day")] {
        if value != 0 {
            let plural = if value == 1 { "" } else { "s" };
            parts.push(format!("{value} {unit}{plural}"));
        }
    }

    if micros != 0 || parts.is_empty() {
        let sign = if micros < 0 {
            "-"
        } else if months < 0 || days < 0 {
            "+"
        } else {
            ""
        };
        let total = micros.unsigned_abs();
        let secs = total / 1_000_000;
        let mut time = format!(
            "{sign}{:02}:{:02}:{:02}",
            secs / 3600,
            secs / 60 % 60,
            secs % 60
        );
        let fraction = total % 1_000_000;
        if fraction != 0 {
            let digits = format!("{fraction:06}");
            time.push('.');
            time.push_str(digits.trim_end_matches('0'));
        }
        parts.push(time);
    }

    Ok(parts.join(" "))
}

fn inet_text(raw: &[u8]) -> Result<String, BoxError> {
    let [family, bits, is_cidr, len, address @ ..] = raw else {
        return Err("invalid inet value".into());
    };
    if usize::from(*len) != address.len() {
        return Err("invalid inet address length".into());
    }
    let (address, max_bits) = match (*family, address) {
        (2, [a, b, c, d]) => (IpAddr::from([*a, *b, *c, *d]), 32),
        (3, octets) => {
            let octets: [u8; 16] = octets
                .try_into()
                .map_err(|_| "invalid inet6 address length")?;
            (IpAddr::from(octets), 128)
        }
        _ => return Err(format!("unknown inet family {family}").into()),
    };
    if *is_cidr == 0 && *bits == max_bits {
        Ok(address.to_string())
    } else {
        Ok(format!("{address}/{bits}"))
    }
}

fn hex_text(raw: &[u8]) -> String {
    let mut out = String::with_capacity(2 + raw.len() * 2);
    out.push_str("\\x");
    for byte in raw {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn raw_text(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(text) if !text.chars().any(|c| c.is_control() && !c.is_whitespace()) => {
            text.to_string()
        }
        _ => hex_text(raw),
    }
}
