//! # Repository Module
//!
//! One repository per table. Each holds a clone of the pool and exposes
//! the queries the engine needs, nothing more.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SyncRecordRepository   sync_records   create / finish / begin_retry   │
//! │                                        due_for_retry / reset / purge   │
//! │                                        history / stats                 │
//! │  SettingsRepository     sync_settings  load / save / set_last_sync     │
//! │  PosProductRepository   pos_products   link / apply inventory values   │
//! │                                        import / list_linked            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All statements are runtime-checked (`sqlx::query` / `query_as`), so the
//! crate builds without a live database.

pub mod product;
pub mod settings;
pub mod sync_record;
