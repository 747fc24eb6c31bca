//! Per-query builder state.
//!
//! A [`Scope`] is single-use: created fresh by `Model::new_scope` (or a
//! `Model` convenience constructor), mutated by one chain of calls that
//! each consume and return it, and consumed by exactly one terminal call
//! (see [`execution`](self)). The consuming signatures make the
//! one-chain/one-terminal lifecycle a compile-time property; a scope is
//! never shared between threads.
//!
//! Mutators do not validate mutual exclusivity: field lists accumulate
//! across calls unless a `reset_*` variant is used, and ordering direction
//! is last-call-wins.

mod execution;

use crate::cond::{Cond, IntoClauses};
use crate::model::{Model, Record};
use crate::proxy::DbProxy;
use crate::value::Value;
use std::marker::PhantomData;
use std::sync::Arc;

/// Single-use fluent query builder bound to a record type.
///
/// # Example
///
/// ```no_run
/// use dbx::{Ctx, MemDb, Model, ModelConfig, Record};
/// use serde::{Deserialize, Serialize};
/// use std::sync::Arc;
///
/// #[derive(Debug, Default, Serialize, Deserialize)]
/// struct ModelUser {
///     id: i64,
///     deleted_at: i64,
///     status: i64,
/// }
/// impl Record for ModelUser {
///     const TYPE_NAME: &'static str = "ModelUser";
/// }
///
/// # fn main() -> Result<(), dbx::DbError> {
/// let user: Model<ModelUser> = Model::new(ModelConfig::default(), Arc::new(MemDb::new()));
/// let ctx = Ctx::background();
///
/// let active = user
///     .new_scope()
///     .and_where(("status", 1))
///     .order_asc("id")
///     .set_limit(10)
///     .find(&ctx)?;
/// # Ok(())
/// # }
/// ```
pub struct Scope<T: Record> {
    pub(crate) cond: Cond,
    pub(crate) table: Option<String>,
    pub(crate) limit: i64,
    pub(crate) offset: u64,
    pub(crate) selects: Vec<String>,
    pub(crate) omits: Vec<String>,
    pub(crate) groups: Vec<String>,
    pub(crate) orders: Vec<String>,
    pub(crate) order_desc: bool,
    pub(crate) unscoped: bool,
    pub(crate) soft_delete: bool,
    pub(crate) not_found_err_code: i32,
    pub(crate) model_table: String,
    pub(crate) engine: Arc<dyn DbProxy>,
    pub(crate) engine_override: Option<Arc<dyn DbProxy>>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> Scope<T> {
    pub(crate) fn new(
        model_table: String,
        not_found_err_code: i32,
        soft_delete: bool,
        engine: Arc<dyn DbProxy>,
    ) -> Self {
        Self {
            cond: Cond::top(),
            table: None,
            limit: 0,
            offset: 0,
            selects: Vec::new(),
            omits: Vec::new(),
            groups: Vec::new(),
            orders: Vec::new(),
            order_desc: false,
            unscoped: false,
            soft_delete,
            not_found_err_code,
            model_table,
            engine,
            engine_override: None,
            _record: PhantomData,
        }
    }

    // --- Filtering ---

    /// Append clause(s) joined by AND. See [`Cond::and_where`] for the
    /// accepted argument forms.
    pub fn and_where<A: IntoClauses>(mut self, args: A) -> Self {
        self.cond.and_where(args);
        self
    }

    /// Append clause(s) joined by OR. See [`Cond::or_where`].
    pub fn or_where<A: IntoClauses>(mut self, args: A) -> Self {
        self.cond.or_where(args);
        self
    }

    /// `` `field` < 'value' ``
    pub fn lt(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.cond.where_op(field, "<", value.into());
        self
    }

    /// `` `field` <= 'value' ``
    pub fn lte(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.cond.where_op(field, "<=", value.into());
        self
    }

    /// `` `field` > 'value' ``
    pub fn gt(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.cond.where_op(field, ">", value.into());
        self
    }

    /// `` `field` >= 'value' ``
    pub fn gte(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.cond.where_op(field, ">=", value.into());
        self
    }

    /// `` `field` IN (…) ``. An empty list renders the constant-false
    /// clause `1 = 0`; a non-empty list is de-duplicated before binding.
    pub fn where_in<I, V>(mut self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.cond
            .where_in(field, false, values.into_iter().map(Into::into).collect());
        self
    }

    /// `` `field` NOT IN (…) ``. An empty list adds no clause: an empty
    /// exclusion set excludes nothing.
    pub fn where_not_in<I, V>(mut self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.cond
            .where_in(field, true, values.into_iter().map(Into::into).collect());
        self
    }

    /// Attach an explicitly built sub-group joined by AND.
    pub fn and_group(mut self, group: Cond) -> Self {
        self.cond.and_group(group);
        self
    }

    /// Attach an explicitly built sub-group joined by OR.
    pub fn or_group(mut self, group: Cond) -> Self {
        self.cond.or_group(group);
        self
    }

    /// Qualifier prepended to bare field names of this scope's filter.
    pub fn set_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cond.set_table_prefix(prefix);
        self
    }

    // --- Projection / grouping / ordering ---

    /// Add fields to the select list (accumulates across calls).
    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selects.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Clear the select list, then add `fields`.
    pub fn reset_select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selects.clear();
        self.select(fields)
    }

    /// Add fields to the omit list (columns excluded from writes).
    pub fn omit<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.omits.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Add a GROUP BY field (accumulates across calls).
    pub fn group(mut self, field: impl Into<String>) -> Self {
        self.groups.push(field.into());
        self
    }

    /// Clear the group list, then add `field`.
    pub fn reset_group(mut self, field: impl Into<String>) -> Self {
        self.groups.clear();
        self.group(field)
    }

    /// Add an order field, ascending. Direction applies to all order
    /// fields; the last `order_*` call wins.
    pub fn order_asc(mut self, field: impl Into<String>) -> Self {
        self.orders.push(field.into());
        self.order_desc = false;
        self
    }

    /// Add an order field, descending. Last call wins for direction.
    pub fn order_desc(mut self, field: impl Into<String>) -> Self {
        self.orders.push(field.into());
        self.order_desc = true;
        self
    }

    /// Clear the order list, then order ascending by `field`.
    pub fn reset_order_asc(mut self, field: impl Into<String>) -> Self {
        self.orders.clear();
        self.order_asc(field)
    }

    /// Clear the order list, then order descending by `field`.
    pub fn reset_order_desc(mut self, field: impl Into<String>) -> Self {
        self.orders.clear();
        self.order_desc(field)
    }

    // --- Paging ---

    /// Row cap; 0 means unlimited. `count`/`find_paginate` clamp the
    /// effective value (negative → 10, above [`crate::DEFAULT_LIMIT`] →
    /// the maximum).
    pub fn set_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn set_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    // --- Targeting ---

    /// Skip the default soft-delete filter for this query.
    pub fn unscoped(mut self) -> Self {
        self.unscoped = true;
        self
    }

    /// Alias for [`Scope::unscoped`].
    pub fn with_trash(self) -> Self {
        self.unscoped()
    }

    /// Query a different table than the model's derived name.
    pub fn use_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Execute against a different engine than the model's.
    pub fn use_db(mut self, engine: Arc<dyn DbProxy>) -> Self {
        self.engine_override = Some(engine);
        self
    }

    /// Re-bind the accumulated builder state onto a different record type
    /// mid-chain. Filter, projection, paging, and overrides carry over;
    /// table name, not-found code, soft-delete policy, and engine come
    /// from the new model.
    pub fn retarget<U: Record>(self, model: &Model<U>) -> Scope<U> {
        Scope {
            cond: self.cond,
            table: self.table,
            limit: self.limit,
            offset: self.offset,
            selects: self.selects,
            omits: self.omits,
            groups: self.groups,
            orders: self.orders,
            order_desc: self.order_desc,
            unscoped: self.unscoped,
            soft_delete: model.soft_delete_enabled(),
            not_found_err_code: model.not_found_err_code(),
            model_table: model.table_name().to_string(),
            engine: model.engine(),
            engine_override: self.engine_override,
            _record: PhantomData,
        }
    }

    /// Effective table name: `use_table` override if set, else the bound
    /// model's derived name.
    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.model_table)
    }

    pub(crate) fn effective_engine(&self) -> Arc<dyn DbProxy> {
        match &self.engine_override {
            Some(engine) => Arc::clone(engine),
            None => Arc::clone(&self.engine),
        }
    }
}
