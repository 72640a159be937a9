//! Services for journal-service.

pub mod balance;
pub mod cash_flow;
pub mod cogs;
pub mod database;
pub mod idempotency;
pub mod metrics;
pub mod numbering;
pub mod period;
pub mod posting;
pub mod validator;

pub use balance::{signed_delta, BalancePropagator};
pub use cash_flow::{CashFlowAggregator, CashFlowRules};
pub use cogs::{CogsCalculator, PgSalesSource, SalesSource};
pub use database::Database;
pub use idempotency::IdempotencyGuard;
pub use metrics::{get_metrics, init_metrics};
pub use period::PeriodCloser;
pub use posting::JournalEngine;
pub use validator::LedgerValidator;
