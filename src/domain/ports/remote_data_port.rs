//! Remote data service port: table queries, writes and object storage.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::domain::errors::RemoteError;

/// Comparison applied by a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gt,
}

impl FilterOp {
    /// Operator token used in query strings (`eq`, `gt`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Gt => "gt",
        }
    }
}

/// Column filter shared by queries and subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: String,
}

impl Filter {
    #[must_use]
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    #[must_use]
    pub fn gt(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            op: FilterOp::Gt,
            value: value.into(),
        }
    }

    /// Renders the filter as `column=op.value`.
    #[must_use]
    pub fn to_expression(&self) -> String {
        format!("{}={}.{}", self.column, self.op.as_str(), self.value)
    }
}

/// Sort order for a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

/// A read against one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub table: String,
    pub filters: Vec<Filter>,
    pub order: Option<OrderBy>,
}

impl Query {
    #[must_use]
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
            order: None,
        }
    }

    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn order_asc(mut self, column: impl Into<String>) -> Self {
        self.order = Some(OrderBy {
            column: column.into(),
            ascending: true,
        });
        self
    }
}

/// Port for the hosted backend's CRUD and storage API.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteDataPort: Send + Sync {
    /// Returns the rows matching `query`, in the requested order.
    async fn query(&self, query: &Query) -> Result<Vec<Value>, RemoteError>;

    /// Inserts a row and returns it as stored.
    async fn insert(&self, table: &str, row: Value) -> Result<Value, RemoteError>;

    /// Applies `changes` to the row with the given `id` and returns it.
    async fn update(&self, table: &str, id: &str, changes: Value) -> Result<Value, RemoteError>;

    /// Deletes the row with the given `id`.
    async fn delete(&self, table: &str, id: &str) -> Result<(), RemoteError>;

    /// Uploads an object to storage.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), RemoteError>;

    /// Creates a time-limited URL for a stored object.
    async fn signed_url(&self, bucket: &str, path: &str, ttl: Duration)
    -> Result<String, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_expression() {
        assert_eq!(Filter::eq("channel_id", "c1").to_expression(), "channel_id=eq.c1");
        assert_eq!(
            Filter::gt("inserted_at", "2024-01-01T00:00:00Z").to_expression(),
            "inserted_at=gt.2024-01-01T00:00:00Z"
        );
    }

    #[test]
    fn test_query_builder() {
        let query = Query::table("messages")
            .filter(Filter::eq("channel_id", "c1"))
            .order_asc("inserted_at");

        assert_eq!(query.table, "messages");
        assert_eq!(query.filters.len(), 1);
        assert_eq!(
            query.order,
            Some(OrderBy {
                column: "inserted_at".to_string(),
                ascending: true
            })
        );
    }
}
