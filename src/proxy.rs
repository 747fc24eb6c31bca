//! The execution-engine boundary.
//!
//! [`DbProxy`] is the sole contract the builder core depends on: terminal
//! `Scope` calls assemble a [`WhereReq`] and delegate here. Rows cross the
//! boundary as JSON object maps, so any engine — relational, document,
//! in-memory — can implement the trait against the same request shape.

use crate::context::Ctx;
use crate::error::DbError;

/// Neutral row representation crossing the engine boundary.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Hard ceiling on the effective limit of `count`/`find_paginate`.
pub const DEFAULT_LIMIT: i64 = 2000;

/// Backend-neutral request assembled by a `Scope` terminal call.
///
/// `cond` is a list of rendered filter strings; engines conjoin the
/// entries with AND. `orders` entries already carry their direction
/// suffix. `unscoped` tells read-side operations to skip the default
/// soft-delete filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereReq {
    pub table_name: String,
    pub cond: Vec<String>,
    pub selects: Vec<String>,
    pub omits: Vec<String>,
    pub groups: Vec<String>,
    pub orders: Vec<String>,
    pub limit: i64,
    pub offset: u64,
    pub unscoped: bool,
}

/// Outcome of an `update` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateResult {
    pub rows_affected: u64,
    /// Rendered statement, for diagnostics.
    pub sql: String,
}

/// Outcome of a (soft) `delete` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteResult {
    pub rows_affected: u64,
}

/// Page descriptor returned by `find_paginate`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Paginate {
    /// Total matching rows before limit/offset.
    pub total: i64,
    pub offset: u64,
    /// Effective (clamped) limit used for the page.
    pub limit: i64,
}

/// Execution engine contract.
///
/// Implementations must honor the request's `Ctx` (cancellation and
/// deadline) and report zero matching rows from [`DbProxy::first`] as
/// `DbError::NotFound`; every other failure is engine-specific and is
/// surfaced to callers unchanged. `delete` is logically a soft delete:
/// engines set the deletion marker rather than removing rows.
pub trait DbProxy: Send + Sync {
    /// All rows matching the request.
    fn find(&self, ctx: &Ctx, req: &WhereReq) -> Result<Vec<Row>, DbError>;

    /// First matching row; `DbError::NotFound` when zero rows match.
    fn first(&self, ctx: &Ctx, req: &WhereReq) -> Result<Row, DbError>;

    /// Insert one record; returns the stored row (with any engine-assigned
    /// fields such as the id filled in). `selects`/`omits` on the request
    /// restrict the inserted columns.
    fn create(&self, ctx: &Ctx, req: &WhereReq, record: &Row) -> Result<Row, DbError>;

    /// Apply `values` to every matching row.
    fn update(&self, ctx: &Ctx, req: &WhereReq, values: &Row) -> Result<UpdateResult, DbError>;

    /// Soft-delete every matching row (set the deletion marker).
    fn delete(&self, ctx: &Ctx, req: &WhereReq) -> Result<DeleteResult, DbError>;

    /// Count of matching rows.
    fn count(&self, ctx: &Ctx, req: &WhereReq) -> Result<i64, DbError>;

    /// Page of matching rows plus the total before limit/offset.
    fn find_paginate(&self, ctx: &Ctx, req: &WhereReq) -> Result<(Vec<Row>, Paginate), DbError>;

    /// Rendered query for the request, without executing it.
    fn to_sql(&self, ctx: &Ctx, req: &WhereReq) -> Result<String, DbError>;

    /// Ensure backing tables exist. Idempotent.
    fn auto_migrate(&self, tables: &[String]) -> Result<(), DbError>;

    /// Upsert by primary key; returns the stored row.
    fn save(&self, ctx: &Ctx, req: &WhereReq, record: &Row) -> Result<Row, DbError>;
}
