//! # Roster Common Library
//!
//! Core of the music-program roster service:
//! - Field-level encryption at rest ([`cipher`])
//! - Identity-based row reconciliation and sheet combination ([`reconcile`])
//! - View queries: filters, sorting, mailing lists ([`view`], [`mailing`])
//! - CSV import/export ([`csv_io`])
//! - SQLite persistence ([`db`]) and the [`roster::Roster`] service on top
//! - Accounts and sessions ([`api`]), bootstrap configuration ([`config`])

pub mod api;
pub mod cipher;
pub mod config;
pub mod csv_io;
pub mod db;
pub mod error;
pub mod fields;
pub mod mailing;
pub mod reconcile;
pub mod registry;
pub mod roster;
pub mod view;

pub use cipher::{CipherError, CipherMode, FieldCipher};
pub use error::{Error, Result};
pub use fields::{FieldMap, FieldValue};
pub use roster::Roster;
