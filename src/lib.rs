//! Teller sorts your transactions: an explicit rule store, the approval
//! history, and a research fallback, consulted in that order until one of
//! them can name a category.

pub mod cli;
pub mod db;
pub mod engine;
pub mod error;
pub mod fmt;
pub mod history;
pub mod importer;
pub mod matcher;
pub mod models;
pub mod research;
pub mod scoring;
pub mod settings;
pub mod split;
pub mod store;

pub use engine::Engine;
pub use error::{Result, TellerError};
