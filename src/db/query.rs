//! Composable predicates and sort orders over the entries table.
//!
//! The view engine builds a [`Query`]; the SQLite store compiles it with
//! `push_predicate` into bound SQL. Nothing here touches the database.

use crate::model::DeclaredStatus;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Id,
    Category,
    EntryDate,
    Title,
}

impl Field {
    fn column(self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::Category => "category",
            Field::EntryDate => "entry_ts",
            Field::Title => "COALESCE(title, '')",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Text(String),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Cmp {
    fn sql(self) -> &'static str {
        match self {
            Cmp::Eq => " = ",
            Cmp::Lt => " < ",
            Cmp::Le => " <= ",
            Cmp::Gt => " > ",
            Cmp::Ge => " >= ",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
    Compare { field: Field, cmp: Cmp, value: Value },
    HasPrefix { field: Field, prefix: String },
    /// Publish-state visibility; see [`crate::publish::effective_state`].
    Visible {
        now: DateTime<Utc>,
        include_future: bool,
    },
}

impl Predicate {
    pub fn compare(field: Field, cmp: Cmp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            field,
            cmp,
            value: value.into(),
        }
    }

    pub fn eq(field: Field, value: impl Into<Value>) -> Self {
        Self::compare(field, Cmp::Eq, value)
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::All(mut parts) => {
                parts.push(other);
                Predicate::All(parts)
            }
            first => Predicate::All(vec![first, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Any(mut parts) => {
                parts.push(other);
                Predicate::Any(parts)
            }
            first => Predicate::Any(vec![first, other]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn reversed(self) -> Self {
        match self {
            Direction::Asc => Direction::Desc,
            Direction::Desc => Direction::Asc,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub predicate: Predicate,
    /// Sort keys in priority order.
    pub sort: Vec<(Field, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn all() -> Self {
        Self {
            predicate: Predicate::All(Vec::new()),
            sort: vec![(Field::Id, Direction::Asc)],
            limit: None,
        }
    }
}

pub(crate) fn push_predicate(qb: &mut QueryBuilder<'_, Sqlite>, predicate: &Predicate) {
    match predicate {
        Predicate::All(parts) if parts.is_empty() => {
            qb.push("1 = 1");
        }
        Predicate::Any(parts) if parts.is_empty() => {
            qb.push("1 = 0");
        }
        Predicate::All(parts) | Predicate::Any(parts) => {
            let joiner = if matches!(predicate, Predicate::All(_)) {
                " AND "
            } else {
                " OR "
            };
            qb.push("(");
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    qb.push(joiner);
                }
                push_predicate(qb, part);
            }
            qb.push(")");
        }
        Predicate::Compare { field, cmp, value } => {
            qb.push(field.column()).push(cmp.sql());
            push_value(qb, value);
        }
        Predicate::HasPrefix { field, prefix } => {
            // substr avoids LIKE wildcard escaping
            qb.push("substr(")
                .push(field.column())
                .push(", 1, ")
                .push_bind(prefix.chars().count() as i64)
                .push(") = ")
                .push_bind(prefix.clone());
        }
        Predicate::Visible {
            now,
            include_future,
        } => {
            if *include_future {
                qb.push("status IN (")
                    .push_bind(DeclaredStatus::Published.as_str())
                    .push(", ")
                    .push_bind(DeclaredStatus::Scheduled.as_str())
                    .push(")");
            } else {
                qb.push("(status = ")
                    .push_bind(DeclaredStatus::Published.as_str())
                    .push(" OR (status = ")
                    .push_bind(DeclaredStatus::Scheduled.as_str())
                    .push(" AND entry_ts <= ")
                    .push_bind(now.timestamp_millis())
                    .push("))");
            }
        }
    }
}

fn push_value(qb: &mut QueryBuilder<'_, Sqlite>, value: &Value) {
    match value {
        Value::Int(v) => {
            qb.push_bind(*v);
        }
        Value::Text(v) => {
            qb.push_bind(v.clone());
        }
    }
}

pub(crate) fn push_order_and_limit(qb: &mut QueryBuilder<'_, Sqlite>, query: &Query) {
    if !query.sort.is_empty() {
        qb.push(" ORDER BY ");
        for (i, (field, direction)) in query.sort.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            qb.push(field.column());
            qb.push(match direction {
                Direction::Asc => " ASC",
                Direction::Desc => " DESC",
            });
        }
    }
    if let Some(limit) = query.limit {
        qb.push(" LIMIT ").push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    }
}
