//! Static per-record-type descriptors.
//!
//! A [`Model`] is created once per record type at process setup, holds the
//! derived table name and lookup policy, and hands out fresh single-use
//! [`Scope`]s. The engine is injected at construction; there is no global
//! default. Per-record wrapper types are expected to hold their `Model` as
//! a named field and delegate explicitly:
//!
//! ```
//! use dbx::{MemDb, Model, ModelConfig, Record, Scope};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct ModelUser {
//!     id: i64,
//!     deleted_at: i64,
//!     nickname: String,
//! }
//!
//! impl Record for ModelUser {
//!     const TYPE_NAME: &'static str = "ModelUser";
//! }
//!
//! struct TUser {
//!     model: Model<ModelUser>,
//! }
//!
//! impl TUser {
//!     fn active(&self) -> Scope<ModelUser> {
//!         self.model.and_where(("status", 1))
//!     }
//! }
//!
//! let user = TUser {
//!     model: Model::new(ModelConfig::default(), Arc::new(MemDb::new())),
//! };
//! assert_eq!(user.model.table_name(), "user");
//! ```

use crate::cond::IntoClauses;
use crate::error::DbError;
use crate::proxy::DbProxy;
use crate::scope::Scope;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

/// A queryable record type.
///
/// Records serialize to flat JSON objects; by convention they carry an
/// integer `id` primary key and an integer `deleted_at` soft-delete marker
/// (0 = live). `Default` supplies the zero value that projected or partial
/// rows are overlaid onto when results are marshaled back.
pub trait Record: Serialize + DeserializeOwned + Default {
    /// Declared type name, e.g. `"ModelUser"`. Input to
    /// [`derive_table_name`]; must not be empty.
    const TYPE_NAME: &'static str;
}

/// Policy knobs supplied at `Model` construction.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Code attached to the not-found error this model's lookups produce.
    pub not_found_err_code: i32,
    /// When false, read terminals never inject the soft-delete filter.
    pub soft_delete: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            not_found_err_code: 0,
            soft_delete: true,
        }
    }
}

/// Static descriptor of a record type: derived table name, not-found
/// policy, soft-delete policy, and the execution engine to use.
///
/// Immutable after construction and safe to share across threads; every
/// query starts from [`Model::new_scope`] or one of the convenience
/// constructors.
pub struct Model<T: Record> {
    table_name: String,
    not_found_err_code: i32,
    soft_delete: bool,
    engine: Arc<dyn DbProxy>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> Model<T> {
    /// Build the descriptor for `T`.
    ///
    /// # Panics
    ///
    /// Panics if `T::TYPE_NAME` is empty — a programming-contract
    /// violation, not a recoverable error.
    pub fn new(config: ModelConfig, engine: Arc<dyn DbProxy>) -> Self {
        assert!(
            !T::TYPE_NAME.is_empty(),
            "Model requires a non-empty Record::TYPE_NAME"
        );
        Self {
            table_name: derive_table_name(T::TYPE_NAME),
            not_found_err_code: config.not_found_err_code,
            soft_delete: config.soft_delete,
            engine,
            _record: PhantomData,
        }
    }

    /// Derived table name (immutable).
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn not_found_err_code(&self) -> i32 {
        self.not_found_err_code
    }

    pub fn soft_delete_enabled(&self) -> bool {
        self.soft_delete
    }

    pub fn engine(&self) -> Arc<dyn DbProxy> {
        Arc::clone(&self.engine)
    }

    /// A fresh single-use scope bound to this model.
    pub fn new_scope(&self) -> Scope<T> {
        Scope::new(
            self.table_name.clone(),
            self.not_found_err_code,
            self.soft_delete,
            Arc::clone(&self.engine),
        )
    }

    /// New scope pre-seeded with an AND clause.
    pub fn and_where<A: IntoClauses>(&self, args: A) -> Scope<T> {
        self.new_scope().and_where(args)
    }

    /// New scope pre-seeded with an OR clause.
    pub fn or_where<A: IntoClauses>(&self, args: A) -> Scope<T> {
        self.new_scope().or_where(args)
    }

    /// New scope with a projection.
    pub fn select<I, S>(&self, fields: I) -> Scope<T>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.new_scope().select(fields)
    }

    /// New scope that skips the default soft-delete filter.
    pub fn unscoped(&self) -> Scope<T> {
        self.new_scope().unscoped()
    }

    /// Alias for [`Model::unscoped`].
    pub fn with_trash(&self) -> Scope<T> {
        self.unscoped()
    }

    /// Ensure this model's table exists on its engine.
    ///
    /// # Errors
    ///
    /// Surfaces the engine error unchanged.
    pub fn auto_migrate(&self) -> Result<(), DbError> {
        self.engine.auto_migrate(&[self.table_name.clone()])
    }
}

/// Derive a table name from a declared type name.
///
/// Strips pointer markers and a `pkg.` qualifier, strips a leading
/// `Model` literal prefix, converts the remaining PascalCase to
/// snake_case (underscore before every interior uppercase), and rejoins a
/// lowercased qualifier as a leading prefix. Pure and total: defined for
/// every legal type name, single-word and unprefixed names included.
///
/// ```
/// use dbx::derive_table_name;
///
/// assert_eq!(derive_table_name("ModelUserInfo"), "user_info");
/// assert_eq!(derive_table_name("dbx.ModelUser"), "dbx_user");
/// assert_eq!(derive_table_name("Order"), "order");
/// ```
pub fn derive_table_name(type_name: &str) -> String {
    let trimmed = type_name.trim_start_matches('*');
    let (qualifier, bare) = match trimmed.rsplit_once('.') {
        Some((q, b)) => (Some(q), b),
        None => (None, trimmed),
    };
    let stripped = match bare.strip_prefix("Model") {
        // A type literally named "Model" keeps its own name.
        Some(rest) if !rest.is_empty() => rest,
        _ => bare,
    };
    let snake = camel_to_snake(stripped);
    match qualifier {
        Some(q) => format!("{}_{}", q.to_lowercase(), snake),
        None => snake,
    }
}

fn camel_to_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() && i > 0 {
            out.push('_');
        }
        for lower in c.to_lowercase() {
            out.push(lower);
        }
    }
    out
}
