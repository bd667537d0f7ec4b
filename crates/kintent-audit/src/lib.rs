//! # kintent-audit
//!
//! Append-only audit trail for kintent.
//!
//! Every change set handed to the executor produces exactly one
//! [`AuditRecord`], including rejected ones and every retry or conflict
//! re-diff attempt. Records are written as JSON Lines and are never mutated.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use kintent_audit::{AuditFilter, AuditLog, Outcome};
//! use kintent_core::AuditConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let log = AuditLog::open(&AuditConfig::default())?;
//! let rolled_back = log
//!     .query(&AuditFilter {
//!         outcome: Some(Outcome::RolledBack),
//!         limit: Some(20),
//!         ..Default::default()
//!     })
//!     .await?;
//! for record in rolled_back {
//!     println!("#{} {}", record.sequence, record.detail);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod logger;
pub mod record;
pub mod storage;

pub use error::AuditError;
pub use logger::{AuditFilter, AuditLog};
pub use record::{AuditRecord, ChangeRecord, Outcome};
pub use storage::{AuditStorage, DualStorage, FileStorage, MemoryStorage, create_storage};
