//! HTTP handlers for journal-service.

pub mod accounts;
pub mod cogs;
pub mod journal;
pub mod periods;
pub mod reports;

pub use accounts::*;
pub use cogs::*;
pub use journal::*;
pub use periods::*;
pub use reports::*;
