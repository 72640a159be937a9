//! Configuration module for journal-service.

use crate::services::cash_flow::CashFlowRules;
use rust_decimal::Decimal;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub policy: PostingPolicy,
    pub accounts: AccountMapping,
    pub cash_flow: CashFlowRules,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Knobs of the posting engine and the validator.
#[derive(Debug, Clone)]
pub struct PostingPolicy {
    /// Cached-balance drift the validator tolerates before reporting, and the
    /// cash-flow reconciliation slack. Entries themselves must balance exactly.
    pub balance_tolerance: Decimal,
    /// Attempts for a post that hits a serialization failure or deadlock.
    pub max_post_retries: u32,
    /// Attempts to allocate a free entry number within one post.
    pub max_numbering_attempts: u32,
    /// Drift above this is CRITICAL.
    pub drift_critical_threshold: Decimal,
    /// Drift below this is LOW.
    pub drift_low_threshold: Decimal,
}

impl Default for PostingPolicy {
    fn default() -> Self {
        Self {
            balance_tolerance: Decimal::new(1, 2),
            max_post_retries: 3,
            max_numbering_attempts: 5,
            drift_critical_threshold: Decimal::from(1_000_000),
            drift_low_threshold: Decimal::from(1_000),
        }
    }
}

/// Default account codes used by automatic postings. Resolved by code at
/// posting time, never by stored id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountMapping {
    pub cash: String,
    pub bank: String,
    pub accounts_receivable: String,
    pub inventory: String,
    pub accounts_payable: String,
    pub tax_payable: String,
    pub sales_revenue: String,
    pub cogs: String,
    /// Equity account that absorbs net income when a period closes.
    pub retained_earnings: String,
}

impl Default for AccountMapping {
    fn default() -> Self {
        Self {
            cash: "1101".to_string(),
            bank: "1102".to_string(),
            accounts_receivable: "1201".to_string(),
            inventory: "1301".to_string(),
            accounts_payable: "2101".to_string(),
            tax_payable: "2103".to_string(),
            sales_revenue: "4101".to_string(),
            cogs: "5101".to_string(),
            retained_earnings: "3201".to_string(),
        }
    }
}

impl AccountMapping {
    /// `(role, code)` for every mapped account.
    pub fn codes(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("cash", &self.cash),
            ("bank", &self.bank),
            ("accounts_receivable", &self.accounts_receivable),
            ("inventory", &self.inventory),
            ("accounts_payable", &self.accounts_payable),
            ("tax_payable", &self.tax_payable),
            ("sales_revenue", &self.sales_revenue),
            ("cogs", &self.cogs),
            ("retained_earnings", &self.retained_earnings),
        ]
    }

    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cash: env::var("ACCOUNT_CODE_CASH").unwrap_or(defaults.cash),
            bank: env::var("ACCOUNT_CODE_BANK").unwrap_or(defaults.bank),
            accounts_receivable: env::var("ACCOUNT_CODE_RECEIVABLE")
                .unwrap_or(defaults.accounts_receivable),
            inventory: env::var("ACCOUNT_CODE_INVENTORY").unwrap_or(defaults.inventory),
            accounts_payable: env::var("ACCOUNT_CODE_PAYABLE")
                .unwrap_or(defaults.accounts_payable),
            tax_payable: env::var("ACCOUNT_CODE_TAX_PAYABLE").unwrap_or(defaults.tax_payable),
            sales_revenue: env::var("ACCOUNT_CODE_REVENUE").unwrap_or(defaults.sales_revenue),
            cogs: env::var("ACCOUNT_CODE_COGS").unwrap_or(defaults.cogs),
            retained_earnings: env::var("ACCOUNT_CODE_RETAINED_EARNINGS")
                .unwrap_or(defaults.retained_earnings),
        }
    }
}

/// Parse an optional environment variable, rejecting malformed values.
fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value '{}'", key, raw))
        }),
        Err(_) => Ok(default),
    }
}

impl PostingPolicy {
    fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();
        let policy = Self {
            balance_tolerance: parse_env("LEDGER_BALANCE_TOLERANCE", defaults.balance_tolerance)?,
            max_post_retries: parse_env("LEDGER_MAX_POST_RETRIES", defaults.max_post_retries)?,
            max_numbering_attempts: parse_env(
                "LEDGER_MAX_NUMBERING_ATTEMPTS",
                defaults.max_numbering_attempts,
            )?,
            drift_critical_threshold: parse_env(
                "LEDGER_DRIFT_CRITICAL_THRESHOLD",
                defaults.drift_critical_threshold,
            )?,
            drift_low_threshold: parse_env(
                "LEDGER_DRIFT_LOW_THRESHOLD",
                defaults.drift_low_threshold,
            )?,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.balance_tolerance < Decimal::ZERO {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "LEDGER_BALANCE_TOLERANCE must not be negative"
            )));
        }
        if self.max_post_retries == 0 || self.max_numbering_attempts == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "retry and numbering attempts must be at least 1"
            )));
        }
        if self.drift_low_threshold > self.drift_critical_threshold {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "LEDGER_DRIFT_LOW_THRESHOLD must not exceed LEDGER_DRIFT_CRITICAL_THRESHOLD"
            )));
        }
        Ok(())
    }
}

impl DatabaseConfig {
    /// Connection URL with the password masked, for logs.
    pub fn redacted_url(&self) -> String {
        let Some(scheme_end) = self.url.find("://").map(|i| i + 3) else {
            return self.url.clone();
        };
        let Some(at) = self.url.rfind('@').filter(|&at| at > scheme_end) else {
            return self.url.clone();
        };
        match self.url[scheme_end..at].find(':') {
            Some(colon) => format!(
                "{}:****{}",
                &self.url[..scheme_end + colon],
                &self.url[at..]
            ),
            None => self.url.clone(),
        }
    }

    fn from_env() -> Result<Self, AppError> {
        Ok(Self {
            url: env::var("DATABASE_URL").map_err(|_| {
                AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
            })?,
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
        })
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let cash_flow = match env::var("CASH_FLOW_RULES") {
            Ok(raw) => CashFlowRules::parse(&raw).map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("CASH_FLOW_RULES: {}", e))
            })?,
            Err(_) => CashFlowRules::default(),
        };

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "journal-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig::from_env()?,
            policy: PostingPolicy::from_env()?,
            accounts: AccountMapping::from_env(),
            cash_flow,
        })
    }
}
