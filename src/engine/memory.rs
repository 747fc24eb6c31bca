//! In-memory reference engine.
//!
//! `MemDb` implements the full [`DbProxy`] contract against process-local
//! tables. It exists as the crate's reference engine and test harness; any
//! relational or document engine implements the same trait against the
//! same requests. Soft-delete semantics match the relational original:
//! `delete` stamps `deleted_at` with the current epoch second and read
//! operations skip stamped rows unless the request is unscoped.

use crate::context::Ctx;
use crate::engine::eval::{self, FilterExpr};
use crate::error::DbError;
use crate::proxy::{DbProxy, DeleteResult, Paginate, Row, UpdateResult, WhereReq};
use crate::value::escape_string;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Table {
    rows: Vec<Row>,
    last_id: i64,
}

impl Table {
    fn alloc_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn note_id(&mut self, id: i64) {
        if id > self.last_id {
            self.last_id = id;
        }
    }
}

/// Process-local `DbProxy` engine.
///
/// Tables are created on demand by writes and by `auto_migrate`; reads
/// against an absent table see an empty table. All operations honor the
/// request `Ctx`.
#[derive(Debug, Default)]
pub struct MemDb {
    tables: Mutex<HashMap<String, Table>>,
}

impl MemDb {
    pub fn new() -> Self {
        Self::default()
    }

    fn compile(req: &WhereReq) -> Result<Vec<FilterExpr>, DbError> {
        req.cond.iter().map(|c| eval::parse(c)).collect()
    }

    fn row_matches(req: &WhereReq, exprs: &[FilterExpr], row: &Row) -> bool {
        if !req.unscoped && !is_live(row) {
            return false;
        }
        exprs.iter().all(|e| eval::matches(e, row))
    }

    /// Matching rows with ordering and grouping applied; offset/limit and
    /// projection are the caller's concern.
    fn matched_rows(table: &Table, req: &WhereReq, exprs: &[FilterExpr]) -> Vec<Row> {
        let mut rows: Vec<Row> = table
            .rows
            .iter()
            .filter(|row| Self::row_matches(req, exprs, row))
            .cloned()
            .collect();
        sort_rows(&mut rows, &req.orders);
        if !req.groups.is_empty() {
            rows = first_per_group(rows, &req.groups);
        }
        rows
    }
}

fn is_live(row: &Row) -> bool {
    match row.get("deleted_at") {
        Some(v) => v.as_i64().unwrap_or(0) == 0,
        None => true,
    }
}

/// Parse an order entry of the form `` `field` asc `` / `` `field` desc ``.
fn order_key(entry: &str) -> (String, bool) {
    let mut parts = entry.split_whitespace();
    let field = parts
        .next()
        .unwrap_or_default()
        .trim_matches('`')
        .to_string();
    let desc = parts
        .next()
        .is_some_and(|d| d.eq_ignore_ascii_case("desc"));
    (field, desc)
}

fn sort_rows(rows: &mut [Row], orders: &[String]) {
    if orders.is_empty() {
        return;
    }
    let keys: Vec<(String, bool)> = orders.iter().map(|o| order_key(o)).collect();
    rows.sort_by(|a, b| {
        for (field, desc) in &keys {
            let left = a.get(field).map(eval::json_text).unwrap_or_default();
            let right = b.get(field).map(eval::json_text).unwrap_or_default();
            let ord = eval::compare_text(&left, &right);
            if ord != Ordering::Equal {
                return if *desc { ord.reverse() } else { ord };
            }
        }
        Ordering::Equal
    });
}

/// MySQL-style non-aggregated grouping: the first row of each distinct
/// group-key tuple survives.
fn first_per_group(rows: Vec<Row>, groups: &[String]) -> Vec<Row> {
    let mut seen: Vec<Vec<String>> = Vec::new();
    let mut out = Vec::new();
    for row in rows {
        let key: Vec<String> = groups
            .iter()
            .map(|g| row.get(g).map(eval::json_text).unwrap_or_default())
            .collect();
        if !seen.contains(&key) {
            seen.push(key);
            out.push(row);
        }
    }
    out
}

fn page(rows: Vec<Row>, limit: i64, offset: u64) -> Vec<Row> {
    let iter = rows.into_iter().skip(offset as usize);
    if limit > 0 {
        iter.take(limit as usize).collect()
    } else {
        iter.collect()
    }
}

fn project(mut row: Row, req: &WhereReq) -> Row {
    if !req.selects.is_empty() {
        row.retain(|k, _| req.selects.iter().any(|s| s == k));
    }
    for omit in &req.omits {
        row.remove(omit);
    }
    row
}

fn sql_literal(value: &serde_json::Value) -> String {
    format!("'{}'", escape_string(&eval::json_text(value)))
}

/// Diagnostic SELECT rendering shared by `to_sql`.
fn render_select(req: &WhereReq) -> String {
    let cols = if req.selects.is_empty() {
        "*".to_string()
    } else {
        req.selects
            .iter()
            .map(|s| format!("`{s}`"))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let mut sql = format!("SELECT {cols} FROM `{}`", req.table_name);
    let mut conds: Vec<String> = Vec::new();
    if !req.unscoped {
        conds.push("`deleted_at` = '0'".to_string());
    }
    conds.extend(req.cond.iter().cloned());
    if !conds.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conds.join(" AND "));
    }
    if !req.groups.is_empty() {
        sql.push_str(" GROUP BY ");
        sql.push_str(
            &req.groups
                .iter()
                .map(|g| format!("`{g}`"))
                .collect::<Vec<_>>()
                .join(", "),
        );
    }
    if !req.orders.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&req.orders.join(", "));
    }
    if req.limit > 0 {
        sql.push_str(&format!(" LIMIT {}", req.limit));
    }
    if req.offset > 0 {
        sql.push_str(&format!(" OFFSET {}", req.offset));
    }
    sql
}

impl DbProxy for MemDb {
    fn find(&self, ctx: &Ctx, req: &WhereReq) -> Result<Vec<Row>, DbError> {
        ctx.check()?;
        let exprs = Self::compile(req)?;
        let tables = self.tables.lock().map_err(poisoned)?;
        let rows = match tables.get(&req.table_name) {
            Some(table) => Self::matched_rows(table, req, &exprs),
            None => Vec::new(),
        };
        Ok(page(rows, req.limit, req.offset)
            .into_iter()
            .map(|row| project(row, req))
            .collect())
    }

    fn first(&self, ctx: &Ctx, req: &WhereReq) -> Result<Row, DbError> {
        ctx.check()?;
        let exprs = Self::compile(req)?;
        let tables = self.tables.lock().map_err(poisoned)?;
        let rows = match tables.get(&req.table_name) {
            Some(table) => Self::matched_rows(table, req, &exprs),
            None => Vec::new(),
        };
        rows.into_iter()
            .next()
            .map(|row| project(row, req))
            .ok_or_else(|| DbError::not_found(&req.table_name))
    }

    fn create(&self, ctx: &Ctx, req: &WhereReq, record: &Row) -> Result<Row, DbError> {
        ctx.check()?;
        let mut tables = self.tables.lock().map_err(poisoned)?;
        let table = tables.entry(req.table_name.clone()).or_default();
        let mut stored = record.clone();
        if !req.selects.is_empty() {
            stored.retain(|k, _| k == "id" || req.selects.iter().any(|s| s == k));
        }
        for omit in &req.omits {
            if omit != "id" {
                stored.remove(omit);
            }
        }
        let id = match stored.get("id").and_then(serde_json::Value::as_i64) {
            Some(id) if id != 0 => {
                table.note_id(id);
                id
            }
            _ => table.alloc_id(),
        };
        stored.insert("id".to_string(), serde_json::Value::from(id));
        table.rows.push(stored.clone());
        log::debug!("memdb create table={} id={}", req.table_name, id);
        Ok(stored)
    }

    fn update(&self, ctx: &Ctx, req: &WhereReq, values: &Row) -> Result<UpdateResult, DbError> {
        ctx.check()?;
        let exprs = Self::compile(req)?;
        let mut tables = self.tables.lock().map_err(poisoned)?;
        let table = tables.entry(req.table_name.clone()).or_default();
        let mut rows_affected = 0u64;
        for row in &mut table.rows {
            if Self::row_matches(req, &exprs, row) {
                for (k, v) in values {
                    row.insert(k.clone(), v.clone());
                }
                rows_affected += 1;
            }
        }
        let assignments = values
            .iter()
            .map(|(k, v)| format!("`{k}` = {}", sql_literal(v)))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("UPDATE `{}` SET {assignments}", req.table_name);
        if !req.cond.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&req.cond.join(" AND "));
        }
        Ok(UpdateResult { rows_affected, sql })
    }

    fn delete(&self, ctx: &Ctx, req: &WhereReq) -> Result<DeleteResult, DbError> {
        ctx.check()?;
        let exprs = Self::compile(req)?;
        let stamp = chrono::Utc::now().timestamp();
        let mut tables = self.tables.lock().map_err(poisoned)?;
        let table = tables.entry(req.table_name.clone()).or_default();
        let mut rows_affected = 0u64;
        for row in &mut table.rows {
            if Self::row_matches(req, &exprs, row) {
                row.insert("deleted_at".to_string(), serde_json::Value::from(stamp));
                rows_affected += 1;
            }
        }
        log::debug!(
            "memdb soft delete table={} rows={}",
            req.table_name,
            rows_affected
        );
        Ok(DeleteResult { rows_affected })
    }

    fn count(&self, ctx: &Ctx, req: &WhereReq) -> Result<i64, DbError> {
        ctx.check()?;
        let exprs = Self::compile(req)?;
        let tables = self.tables.lock().map_err(poisoned)?;
        let rows = match tables.get(&req.table_name) {
            Some(table) => Self::matched_rows(table, req, &exprs),
            None => Vec::new(),
        };
        Ok(page(rows, req.limit, req.offset).len() as i64)
    }

    fn find_paginate(&self, ctx: &Ctx, req: &WhereReq) -> Result<(Vec<Row>, Paginate), DbError> {
        ctx.check()?;
        let exprs = Self::compile(req)?;
        let tables = self.tables.lock().map_err(poisoned)?;
        let rows = match tables.get(&req.table_name) {
            Some(table) => Self::matched_rows(table, req, &exprs),
            None => Vec::new(),
        };
        let total = rows.len() as i64;
        let page_rows = page(rows, req.limit, req.offset)
            .into_iter()
            .map(|row| project(row, req))
            .collect();
        Ok((
            page_rows,
            Paginate {
                total,
                offset: req.offset,
                limit: req.limit,
            },
        ))
    }

    fn to_sql(&self, ctx: &Ctx, req: &WhereReq) -> Result<String, DbError> {
        ctx.check()?;
        Ok(render_select(req))
    }

    fn auto_migrate(&self, tables: &[String]) -> Result<(), DbError> {
        let mut map = self.tables.lock().map_err(poisoned)?;
        for table in tables {
            map.entry(table.clone()).or_default();
        }
        Ok(())
    }

    fn save(&self, ctx: &Ctx, req: &WhereReq, record: &Row) -> Result<Row, DbError> {
        ctx.check()?;
        let mut tables = self.tables.lock().map_err(poisoned)?;
        let table = tables.entry(req.table_name.clone()).or_default();
        let id = record.get("id").and_then(serde_json::Value::as_i64).unwrap_or(0);
        if id != 0 {
            // Upsert applies regardless of the soft-delete marker.
            for row in &mut table.rows {
                if row.get("id").and_then(serde_json::Value::as_i64) == Some(id) {
                    *row = record.clone();
                    return Ok(record.clone());
                }
            }
            table.note_id(id);
            table.rows.push(record.clone());
            return Ok(record.clone());
        }
        let mut stored = record.clone();
        let id = table.alloc_id();
        stored.insert("id".to_string(), serde_json::Value::from(id));
        table.rows.push(stored.clone());
        Ok(stored)
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> DbError {
    DbError::Backend("memdb table lock poisoned".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn req(table: &str) -> WhereReq {
        WhereReq {
            table_name: table.to_string(),
            ..WhereReq::default()
        }
    }

    fn seed(db: &MemDb, table: &str, rows: Vec<serde_json::Value>) {
        let ctx = Ctx::background();
        for row in rows {
            let row = row.as_object().cloned().unwrap_or_default();
            db.create(&ctx, &req(table), &row).unwrap();
        }
    }

    #[test]
    fn test_create_assigns_auto_increment_ids() {
        let db = MemDb::new();
        let ctx = Ctx::background();
        let a = db
            .create(&ctx, &req("user"), &Row::new())
            .unwrap();
        let b = db.create(&ctx, &req("user"), &Row::new()).unwrap();
        assert_eq!(a["id"], json!(1));
        assert_eq!(b["id"], json!(2));
    }

    #[test]
    fn test_explicit_id_advances_counter() {
        let db = MemDb::new();
        let ctx = Ctx::background();
        let mut row = Row::new();
        row.insert("id".to_string(), json!(10));
        db.create(&ctx, &req("user"), &row).unwrap();
        let next = db.create(&ctx, &req("user"), &Row::new()).unwrap();
        assert_eq!(next["id"], json!(11));
    }

    #[test]
    fn test_find_applies_filter_order_and_paging() {
        let db = MemDb::new();
        seed(
            &db,
            "user",
            vec![
                json!({"status": 1, "rank": 3, "deleted_at": 0}),
                json!({"status": 1, "rank": 1, "deleted_at": 0}),
                json!({"status": 2, "rank": 2, "deleted_at": 0}),
                json!({"status": 1, "rank": 2, "deleted_at": 0}),
            ],
        );
        let mut r = req("user");
        r.cond = vec!["`status` = '1'".to_string()];
        r.orders = vec!["`rank` asc".to_string()];
        r.limit = 2;
        let rows = db.find(&Ctx::background(), &r).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["rank"], json!(1));
        assert_eq!(rows[1]["rank"], json!(2));
    }

    #[test]
    fn test_soft_delete_hides_rows_until_unscoped() {
        let db = MemDb::new();
        seed(&db, "user", vec![json!({"status": 1, "deleted_at": 0})]);
        let ctx = Ctx::background();
        let res = db.delete(&ctx, &req("user")).unwrap();
        assert_eq!(res.rows_affected, 1);

        // Row is gone from scoped reads but still present unscoped.
        assert!(db.find(&ctx, &req("user")).unwrap().is_empty());
        let mut unscoped = req("user");
        unscoped.unscoped = true;
        let rows = db.find(&ctx, &unscoped).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0]["deleted_at"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_update_reports_rows_affected_and_sql() {
        let db = MemDb::new();
        seed(
            &db,
            "user",
            vec![
                json!({"status": 1, "deleted_at": 0}),
                json!({"status": 1, "deleted_at": 0}),
            ],
        );
        let mut r = req("user");
        r.cond = vec!["`status` = '1'".to_string()];
        let mut values = Row::new();
        values.insert("status".to_string(), json!(9));
        let res = db.update(&Ctx::background(), &r, &values).unwrap();
        assert_eq!(res.rows_affected, 2);
        assert!(res.sql.starts_with("UPDATE `user` SET `status` = '9'"));
    }

    #[test]
    fn test_count_honors_group_and_limit() {
        let db = MemDb::new();
        seed(
            &db,
            "user",
            vec![
                json!({"status": 1, "deleted_at": 0}),
                json!({"status": 1, "deleted_at": 0}),
                json!({"status": 2, "deleted_at": 0}),
            ],
        );
        let ctx = Ctx::background();
        assert_eq!(db.count(&ctx, &req("user")).unwrap(), 3);

        let mut grouped = req("user");
        grouped.groups = vec!["status".to_string()];
        assert_eq!(db.count(&ctx, &grouped).unwrap(), 2);

        let mut limited = req("user");
        limited.limit = 2;
        assert_eq!(db.count(&ctx, &limited).unwrap(), 2);
    }

    #[test]
    fn test_paginate_total_before_paging() {
        let db = MemDb::new();
        seed(
            &db,
            "user",
            (0..5).map(|i| json!({"rank": i, "deleted_at": 0})).collect(),
        );
        let mut r = req("user");
        r.limit = 2;
        r.offset = 2;
        r.orders = vec!["`rank` asc".to_string()];
        let (rows, info) = db.find_paginate(&Ctx::background(), &r).unwrap();
        assert_eq!(info.total, 5);
        assert_eq!(info.limit, 2);
        assert_eq!(info.offset, 2);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["rank"], json!(2));
    }

    #[test]
    fn test_save_upserts_by_id() {
        let db = MemDb::new();
        let ctx = Ctx::background();
        let stored = db.save(&ctx, &req("user"), &Row::new()).unwrap();
        let id = stored["id"].as_i64().unwrap();

        let mut changed = stored.clone();
        changed.insert("nickname".to_string(), json!("after"));
        db.save(&ctx, &req("user"), &changed).unwrap();

        let mut lookup = req("user");
        lookup.cond = vec![format!("`id` = '{id}'")];
        lookup.unscoped = true;
        let row = db.first(&ctx, &lookup).unwrap();
        assert_eq!(row["nickname"], json!("after"));
        assert_eq!(db.count(&ctx, &lookup).unwrap(), 1);
    }

    #[test]
    fn test_first_not_found_on_empty_table() {
        let db = MemDb::new();
        let err = db.first(&Ctx::background(), &req("user")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_to_sql_renders_without_executing() {
        let db = MemDb::new();
        let mut r = req("user");
        r.cond = vec!["`status` = '1'".to_string()];
        r.selects = vec!["id".to_string()];
        r.orders = vec!["`id` asc".to_string()];
        r.limit = 10;
        let sql = db.to_sql(&Ctx::background(), &r).unwrap();
        assert_eq!(
            sql,
            "SELECT `id` FROM `user` WHERE `deleted_at` = '0' AND `status` = '1' ORDER BY `id` asc LIMIT 10"
        );
        // Nothing was executed or created.
        assert!(db.tables.lock().unwrap().is_empty());
    }

    #[test]
    fn test_cancelled_ctx_rejected() {
        let db = MemDb::new();
        let ctx = Ctx::background();
        ctx.cancel();
        assert!(matches!(
            db.find(&ctx, &req("user")),
            Err(DbError::Cancelled(_))
        ));
    }

    #[test]
    fn test_unsupported_filter_is_error_not_match_all() {
        let db = MemDb::new();
        seed(&db, "user", vec![json!({"deleted_at": 0})]);
        let mut r = req("user");
        r.cond = vec!["`name` LIKE 'x%'".to_string()];
        assert!(matches!(
            db.find(&Ctx::background(), &r),
            Err(DbError::Backend(_))
        ));
    }

    #[test]
    fn test_auto_migrate_idempotent() {
        let db = MemDb::new();
        db.auto_migrate(&["user".to_string()]).unwrap();
        seed(&db, "user", vec![json!({"deleted_at": 0})]);
        db.auto_migrate(&["user".to_string()]).unwrap();
        assert_eq!(db.count(&Ctx::background(), &req("user")).unwrap(), 1);
    }
}
