//! Chart of accounts and cash/bank registration tests.
//!
//! These tests require a PostgreSQL database at TEST_DATABASE_URL.
//! Run with: cargo test -p journal-service -- --ignored

mod common;

use common::{date, setup, simple};
use journal_service::models::{AccountType, CreateAccount, CreateCashBank, SourceType};
use rust_decimal_macros::dec;
use serial_test::serial;
use service_core::error::AppError;

fn petty_cash() -> CreateAccount {
    CreateAccount {
        code: "1103".to_string(),
        name: "Petty Cash".to_string(),
        account_type: AccountType::Asset,
        parent_code: Some("1000".to_string()),
        is_header: false,
    }
}

fn link(code: &str) -> CreateCashBank {
    CreateCashBank {
        code: code.to_string(),
        name: "Petty cash box".to_string(),
        account_code: "1103".to_string(),
        allow_negative: false,
    }
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_account_with_posted_history_cannot_gain_a_sub_ledger() {
    let ledger = setup().await;
    let c = &ledger.chart;
    let petty = ledger
        .state
        .db
        .create_account(&petty_cash())
        .await
        .expect("create account")
        .account_id;

    for (source_id, day, debit, credit) in [(1, 10, petty, c.equity), (2, 20, c.equity, petty)] {
        ledger
            .state
            .engine
            .post(&simple(
                SourceType::Manual,
                source_id,
                "ADJUSTMENT",
                date(2024, 1, day),
                debit,
                credit,
                dec!(100),
            ))
            .await
            .expect("post");
    }
    assert_eq!(ledger.balance(petty).await, dec!(0));

    let result = ledger.state.db.create_cash_bank(&link("BANK-02")).await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));
    assert_eq!(ledger.count("cash_banks").await, 2);

    let statement = ledger
        .state
        .cash_flow
        .aggregate(date(2024, 1, 1), date(2024, 1, 15))
        .await
        .expect("cash flow");
    assert!(statement.is_reconciled(dec!(0)));
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_fresh_account_can_be_linked_once() {
    let ledger = setup().await;
    ledger
        .state
        .db
        .create_account(&petty_cash())
        .await
        .expect("create account");

    let cash_bank = ledger
        .state
        .db
        .create_cash_bank(&link("PETTY-01"))
        .await
        .expect("link fresh account");
    assert_eq!(cash_bank.balance, dec!(0));
    assert!(cash_bank.is_active);

    let again = ledger.state.db.create_cash_bank(&link("PETTY-02")).await;
    assert!(matches!(again, Err(AppError::Conflict(_))));
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_cash_bank_log_lists_each_movement_in_order() {
    let ledger = setup().await;
    let c = &ledger.chart;

    for (source_id, day, debit, credit, amount) in [
        (1, 2, c.cash, c.equity, dec!(500)),
        (2, 3, c.inventory, c.cash, dec!(120)),
    ] {
        ledger
            .state
            .engine
            .post(&simple(
                SourceType::CashBank,
                source_id,
                "CASH",
                date(2024, 3, day),
                debit,
                credit,
                amount,
            ))
            .await
            .expect("post");
    }

    let log = ledger
        .state
        .db
        .cash_bank_transactions(c.cash_bank_cash)
        .await
        .expect("transactions");
    let movements: Vec<_> = log.iter().map(|t| (t.amount, t.balance_after)).collect();
    assert_eq!(movements, vec![(dec!(500), dec!(500)), (dec!(-120), dec!(380))]);
    assert!(ledger
        .state
        .db
        .cash_bank_transactions(c.cash_bank_bank)
        .await
        .expect("transactions")
        .is_empty());
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_account_mapping_gaps_are_reported_by_code() {
    let ledger = setup().await;
    let mapping = ledger.state.config.accounts.codes();
    let codes: Vec<&str> = mapping.iter().map(|(_, code)| *code).collect();

    let missing = ledger
        .state
        .db
        .missing_account_codes(&codes)
        .await
        .expect("check mapping");
    assert!(missing.is_empty(), "{:?}", missing);

    let missing = ledger
        .state
        .db
        .missing_account_codes(&["1101", "3999", "6101"])
        .await
        .expect("check codes");
    assert_eq!(missing, vec!["3999".to_string(), "6101".to_string()]);
}
