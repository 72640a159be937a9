//! Journal Service - single-source-of-truth double-entry ledger.

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
