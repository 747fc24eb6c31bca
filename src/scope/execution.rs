//! Terminal calls: request assembly and engine dispatch.
//!
//! Each terminal consumes its scope, assembles a backend-neutral
//! [`WhereReq`], and delegates to the effective engine. The builder never
//! retries and never reinterprets engine errors; the single exception is
//! the not-found sentinel, which `first` re-tags with the model's code and
//! which the `first_or_create`/`first_or_update` protocol branches on.

use crate::cond::Attrs;
use crate::context::Ctx;
use crate::error::DbError;
use crate::model::Record;
use crate::proxy::{DeleteResult, Paginate, Row, UpdateResult, WhereReq, DEFAULT_LIMIT};
use crate::scope::Scope;

/// Effective limit for `count`/`find_paginate`: negative means a
/// defensive small page, zero stays unlimited, anything above the ceiling
/// is capped.
fn clamp_limit(limit: i64) -> i64 {
    if limit < 0 {
        10
    } else if limit > DEFAULT_LIMIT {
        DEFAULT_LIMIT
    } else {
        limit
    }
}

/// Overlay `row` onto the record type's zero value, so projected rows
/// deserialize with unselected fields defaulted.
fn from_row<T: Record>(row: Row) -> Result<T, DbError> {
    let mut base = serde_json::to_value(T::default())?;
    match base.as_object_mut() {
        Some(fields) => {
            for (k, v) in row {
                fields.insert(k, v);
            }
        }
        None => {
            return Err(DbError::Parse(format!(
                "record type {} does not serialize to an object",
                T::TYPE_NAME
            )))
        }
    }
    Ok(serde_json::from_value(base)?)
}

fn to_row<T: Record>(record: &T) -> Result<Row, DbError> {
    match serde_json::to_value(record)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(DbError::Parse(format!(
            "record type {} does not serialize to an object",
            T::TYPE_NAME
        ))),
    }
}

fn attrs_to_row(attrs: &Attrs) -> Row {
    let mut row = Row::new();
    for (k, v) in attrs {
        row.insert(k.clone(), v.clone().into());
    }
    row
}

/// `attributes` overlaid by `values`; values win on key collision.
fn merge_attrs(attrs: &Attrs, values: &Attrs) -> Row {
    let mut row = attrs_to_row(attrs);
    for (k, v) in values {
        row.insert(k.clone(), v.clone().into());
    }
    row
}

impl<T: Record> Scope<T> {
    pub(crate) fn build_req(&self) -> WhereReq {
        let mut cond = Vec::with_capacity(1);
        let rendered = self.cond.to_string();
        if !rendered.is_empty() {
            cond.push(rendered);
        }
        let direction = if self.order_desc { "desc" } else { "asc" };
        WhereReq {
            table_name: self.table_name().to_string(),
            cond,
            selects: self.selects.clone(),
            omits: self.omits.clone(),
            groups: self.groups.clone(),
            orders: self
                .orders
                .iter()
                .map(|f| format!("`{f}` {direction}"))
                .collect(),
            limit: self.limit,
            offset: self.offset,
            // Engines skip the read-side soft-delete filter when the scope
            // was unscoped or the model opted out of soft deletion.
            unscoped: self.unscoped || !self.soft_delete,
        }
    }

    /// All matching records.
    pub fn find(self, ctx: &Ctx) -> Result<Vec<T>, DbError> {
        let req = self.build_req();
        log::debug!("find table={} cond={:?}", req.table_name, req.cond);
        let rows = self.effective_engine().find(ctx, &req)?;
        rows.into_iter().map(from_row).collect()
    }

    /// First matching record.
    ///
    /// # Errors
    ///
    /// `DbError::NotFound` carrying the model's not-found code when zero
    /// rows match; any other engine error unchanged.
    pub fn first(self, ctx: &Ctx) -> Result<T, DbError> {
        let req = self.build_req();
        match self.effective_engine().first(ctx, &req) {
            Ok(row) => from_row(row),
            Err(e) if e.is_not_found() => Err(DbError::NotFound {
                code: self.not_found_err_code,
                table: req.table_name,
            }),
            Err(e) => Err(e),
        }
    }

    /// Insert `record`; returns the stored record with engine-assigned
    /// fields (id) filled in. Never applies the soft-delete filter.
    pub fn create(self, ctx: &Ctx, record: &T) -> Result<T, DbError> {
        let req = self.build_req();
        let row = to_row(record)?;
        let stored = self.effective_engine().create(ctx, &req, &row)?;
        from_row(stored)
    }

    /// Upsert `record` by primary key. Never applies the soft-delete
    /// filter.
    pub fn save(self, ctx: &Ctx, record: &T) -> Result<T, DbError> {
        let req = self.build_req();
        let row = to_row(record)?;
        let stored = self.effective_engine().save(ctx, &req, &row)?;
        from_row(stored)
    }

    /// Apply `values` to every matching record.
    pub fn update(self, ctx: &Ctx, values: &Attrs) -> Result<UpdateResult, DbError> {
        let req = self.build_req();
        log::debug!("update table={} cond={:?}", req.table_name, req.cond);
        self.effective_engine()
            .update(ctx, &req, &attrs_to_row(values))
    }

    /// Soft-delete every matching record (sets the deletion marker; rows
    /// remain reachable through an unscoped query).
    pub fn delete(self, ctx: &Ctx) -> Result<DeleteResult, DbError> {
        let req = self.build_req();
        log::debug!("delete table={} cond={:?}", req.table_name, req.cond);
        self.effective_engine().delete(ctx, &req)
    }

    /// Count of matching records, with the effective limit clamped.
    pub fn count(self, ctx: &Ctx) -> Result<i64, DbError> {
        let mut req = self.build_req();
        req.limit = clamp_limit(self.limit);
        self.effective_engine().count(ctx, &req)
    }

    /// Page of matching records plus the total before paging, with the
    /// effective limit clamped.
    pub fn find_paginate(self, ctx: &Ctx) -> Result<(Vec<T>, Paginate), DbError> {
        let mut req = self.build_req();
        req.limit = clamp_limit(self.limit);
        let (rows, page) = self.effective_engine().find_paginate(ctx, &req)?;
        let records = rows
            .into_iter()
            .map(from_row)
            .collect::<Result<Vec<T>, DbError>>()?;
        Ok((records, page))
    }

    /// Rendered query for this scope, without executing it.
    pub fn to_sql(self, ctx: &Ctx) -> Result<String, DbError> {
        let req = self.build_req();
        self.effective_engine().to_sql(ctx, &req)
    }

    /// Look up one record matching `attrs` (ANDed equality); create it
    /// from the `attrs` ∪ `values` merge (values win on key collision)
    /// when the lookup reports not-found.
    ///
    /// Returns `(record, true)` when a record was created, `(record,
    /// false)` when the lookup found one. Any lookup error other than
    /// not-found surfaces unchanged.
    ///
    /// The lookup-then-write sequence is not atomic: with no uniqueness
    /// enforcement in the engine, a concurrent identical call can insert a
    /// second record.
    pub fn first_or_create(
        mut self,
        ctx: &Ctx,
        attrs: Attrs,
        values: Attrs,
    ) -> Result<(T, bool), DbError> {
        self.cond.and_where(&attrs);
        let req = self.build_req();
        let engine = self.effective_engine();
        match engine.first(ctx, &req) {
            Ok(row) => Ok((from_row(row)?, false)),
            Err(e) if e.is_not_found() => {
                let merged = merge_attrs(&attrs, &values);
                let stored = engine.create(ctx, &req, &merged)?;
                Ok((from_row(stored)?, true))
            }
            Err(e) => Err(e),
        }
    }

    /// Look up one record matching `attrs`; apply the `attrs` ∪ `values`
    /// merge via a single `update` scoped to those same attributes.
    ///
    /// Unlike [`Scope::first_or_create`] this **never inserts**: on a
    /// not-found lookup the update simply matches zero rows. The flag is
    /// `true` once the update call succeeded — on the found path and the
    /// not-found path alike — so callers needing to distinguish "updated
    /// an existing record" from "nothing matched" must check the engine's
    /// row count via [`Scope::update`] instead. The returned record is the
    /// looked-up row with the merge applied, or, when nothing matched, a
    /// record built from the merge alone.
    ///
    /// Any lookup error other than not-found surfaces unchanged. Like
    /// `first_or_create`, the sequence is not atomic.
    pub fn first_or_update(
        mut self,
        ctx: &Ctx,
        attrs: Attrs,
        values: Attrs,
    ) -> Result<(T, bool), DbError> {
        self.cond.and_where(&attrs);
        let req = self.build_req();
        let engine = self.effective_engine();
        let merged = merge_attrs(&attrs, &values);
        match engine.first(ctx, &req) {
            Ok(mut row) => {
                engine.update(ctx, &req, &merged)?;
                for (k, v) in &merged {
                    row.insert(k.clone(), v.clone());
                }
                Ok((from_row(row)?, true))
            }
            Err(e) if e.is_not_found() => {
                engine.update(ctx, &req, &merged)?;
                Ok((from_row(merged)?, true))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemDb;
    use crate::model::{Model, ModelConfig};
    use crate::value::Value;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct ModelUser {
        id: i64,
        deleted_at: i64,
        status: i64,
        nickname: String,
    }

    impl Record for ModelUser {
        const TYPE_NAME: &'static str = "ModelUser";
    }

    fn user_model() -> Model<ModelUser> {
        Model::new(ModelConfig::default(), Arc::new(MemDb::new()))
    }

    #[test]
    fn test_clamp_limit_rules() {
        assert_eq!(clamp_limit(-5), 10);
        assert_eq!(clamp_limit(0), 0);
        assert_eq!(clamp_limit(300), 300);
        assert_eq!(clamp_limit(50_000), DEFAULT_LIMIT);
    }

    #[test]
    fn test_build_req_assembly() {
        let req = user_model()
            .new_scope()
            .and_where(("status", 1))
            .select(["id", "nickname"])
            .group("status")
            .order_desc("id")
            .set_limit(25)
            .set_offset(50)
            .build_req();
        assert_eq!(req.table_name, "user");
        assert_eq!(req.cond, vec!["`status` = '1'".to_string()]);
        assert_eq!(req.selects, vec!["id", "nickname"]);
        assert_eq!(req.groups, vec!["status"]);
        assert_eq!(req.orders, vec!["`id` desc"]);
        assert_eq!(req.limit, 25);
        assert_eq!(req.offset, 50);
        assert!(!req.unscoped);
    }

    #[test]
    fn test_build_req_empty_cond_omitted() {
        let req = user_model().new_scope().build_req();
        assert!(req.cond.is_empty());
    }

    #[test]
    fn test_build_req_unscoped_flag() {
        assert!(user_model().unscoped().build_req().unscoped);
        assert!(user_model().with_trash().build_req().unscoped);

        // Models with soft delete disabled are always unscoped.
        let plain: Model<ModelUser> = Model::new(
            ModelConfig {
                not_found_err_code: 0,
                soft_delete: false,
            },
            Arc::new(MemDb::new()),
        );
        assert!(plain.new_scope().build_req().unscoped);
    }

    #[test]
    fn test_first_maps_not_found_to_model_code() {
        let model: Model<ModelUser> = Model::new(
            ModelConfig {
                not_found_err_code: 5000,
                soft_delete: true,
            },
            Arc::new(MemDb::new()),
        );
        let err = model
            .and_where(("id", 1))
            .first(&Ctx::background())
            .unwrap_err();
        assert_eq!(
            err,
            DbError::NotFound {
                code: 5000,
                table: "user".to_string()
            }
        );
    }

    #[test]
    fn test_merge_values_win_on_collision() {
        let mut attrs = Attrs::new();
        attrs.insert("nickname".to_string(), Value::from("a"));
        attrs.insert("status".to_string(), Value::from(1));
        let mut values = Attrs::new();
        values.insert("nickname".to_string(), Value::from("b"));
        let merged = merge_attrs(&attrs, &values);
        assert_eq!(merged["nickname"], serde_json::json!("b"));
        assert_eq!(merged["status"], serde_json::json!(1));
    }

    #[test]
    fn test_from_row_overlays_partial_rows() {
        let mut row = Row::new();
        row.insert("id".to_string(), serde_json::json!(9));
        let user: ModelUser = from_row(row).unwrap();
        assert_eq!(user.id, 9);
        assert_eq!(user.nickname, "");
    }
}
