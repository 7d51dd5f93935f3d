//! The query contract of the hosted store and its adapters.
//!
//! The core only ever talks to a [`RemoteStore`]; the HTTP adapter targets a
//! PostgREST endpoint, the memory adapter evaluates the same contract
//! in-process.

pub mod memory;
pub mod postgrest;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::StoreError;

pub use memory::MemoryStore;
pub use postgrest::PostgrestStore;

/// A single record as exchanged with the store.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Gte,
    Lte,
}

impl Op {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Gte => "gte",
            Self::Lte => "lte",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: String,
    pub op: Op,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

/// Equality match selecting the record(s) an update or delete applies to.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub column: String,
    pub value: Value,
}

impl Match {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self {
            column: column.to_string(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub predicates: Vec<Predicate>,
    pub order: Option<OrderBy>,
}

impl Query {
    pub fn select(table: &str) -> Self {
        Self {
            table: table.to_string(),
            predicates: vec![],
            order: None,
        }
    }

    pub fn filter(mut self, column: &str, op: Op, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate {
            column: column.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(OrderBy {
            column: column.to_string(),
            ascending,
        });
        self
    }
}

/// select / insert / update / delete over a single table.
///
/// Every failure, whatever its cause, is reported as a [`StoreError`].
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn select(&self, query: &Query) -> Result<Vec<Row>, StoreError>;

    async fn insert(&self, table: &str, row: Row) -> Result<Row, StoreError>;

    async fn update(&self, table: &str, matcher: &Match, patch: Row) -> Result<Row, StoreError>;

    async fn delete(&self, table: &str, matcher: &Match) -> Result<(), StoreError>;
}
