//! # dbx
//!
//! Storage-engine-agnostic query scope builder: describe the record set
//! you want through a fluent [`Scope`], and a pluggable engine behind the
//! [`DbProxy`] trait turns the assembled request into actual reads and
//! writes. The crate ships [`MemDb`], an in-memory reference engine.
//!
//! ```
//! use dbx::{attrs, Ctx, MemDb, Model, ModelConfig, Record};
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
//! # fn main() -> Result<(), dbx::DbError> {
//! let user: Model<ModelUser> = Model::new(ModelConfig::default(), Arc::new(MemDb::new()));
//! user.auto_migrate()?;
//!
//! let ctx = Ctx::background();
//! let (ada, created) = user.new_scope().first_or_create(
//!     &ctx,
//!     attrs! { "nickname" => "ada" },
//!     attrs! {},
//! )?;
//! assert!(created);
//!
//! let found = user.and_where(("nickname", "ada")).first(&ctx)?;
//! assert_eq!(found.id, ada.id);
//! # Ok(())
//! # }
//! ```

pub mod cond;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
mod macros;
pub mod model;
pub mod proxy;
pub mod scope;
pub mod value;

pub use cond::{Attrs, Cond, IntoClauses};
pub use config::DbConfig;
pub use context::Ctx;
pub use engine::MemDb;
pub use error::DbError;
pub use model::{derive_table_name, Model, ModelConfig, Record};
pub use proxy::{
    DbProxy, DeleteResult, Paginate, Row, UpdateResult, WhereReq, DEFAULT_LIMIT,
};
pub use scope::Scope;
pub use value::{escape_string, Value};
