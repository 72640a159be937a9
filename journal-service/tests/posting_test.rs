//! Posting engine integration tests.
//!
//! These tests require a PostgreSQL database at TEST_DATABASE_URL.
//! Run with: cargo test -p journal-service -- --ignored

mod common;

use common::{date, request, setup, simple};
use futures::future::join_all;
use journal_service::error::{InvalidAccountReason, LedgerError};
use journal_service::models::{JournalLineInput, JournalStatus, PostOutcome, SourceType};
use rust_decimal_macros::dec;
use serial_test::serial;

#[tokio::test]
#[ignore]
#[serial]
async fn test_balanced_post_moves_account_and_sub_ledger_together() {
    let ledger = setup().await;
    let c = &ledger.chart;

    let outcome = ledger
        .state
        .engine
        .post(&simple(
            SourceType::CashBank,
            1,
            "CAPITAL",
            date(2024, 1, 2),
            c.cash,
            c.equity,
            dec!(1000000),
        ))
        .await
        .expect("Failed to post");

    assert!(outcome.is_new());
    let journal = outcome.into_journal();
    assert_eq!(journal.entry.entry_number.as_deref(), Some("JE-2024/01/0001"));
    assert_eq!(journal.entry.parsed_status(), Some(JournalStatus::Posted));
    assert_eq!(journal.entry.total_debit, dec!(1000000));
    assert_eq!(journal.lines.len(), 2);

    assert_eq!(ledger.balance(c.cash).await, dec!(1000000));
    assert_eq!(ledger.balance(c.equity).await, dec!(1000000));
    assert_eq!(ledger.cash_bank_balance(c.cash_bank_cash).await, dec!(1000000));
    assert_eq!(ledger.count("cash_bank_transactions").await, 1);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_unbalanced_entry_leaves_no_trace() {
    let ledger = setup().await;
    let c = &ledger.chart;

    let result = ledger
        .state
        .engine
        .post(&request(
            SourceType::Manual,
            7,
            "ADJUSTMENT",
            date(2024, 1, 5),
            vec![
                JournalLineInput::debit(c.cash, dec!(100)),
                JournalLineInput::credit(c.equity, dec!(99)),
            ],
        ))
        .await;

    assert!(matches!(result, Err(LedgerError::UnbalancedEntry { .. })));
    assert_eq!(ledger.count("journal_entries").await, 0);
    assert_eq!(ledger.count("journal_lines").await, 0);
    assert_eq!(ledger.count("posting_intents").await, 0);
    assert_eq!(ledger.count("journal_sequences").await, 0);
    assert_eq!(ledger.balance(c.cash).await, dec!(0));
    assert_eq!(ledger.cash_bank_balance(c.cash_bank_cash).await, dec!(0));
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_repeated_post_returns_existing_journal() {
    let ledger = setup().await;
    let c = &ledger.chart;
    let req = simple(
        SourceType::Sale,
        42,
        "SALE",
        date(2024, 1, 10),
        c.receivable,
        c.revenue,
        dec!(250000),
    );

    let first = ledger.state.engine.post(&req).await.expect("first post");
    let second = ledger.state.engine.post(&req).await.expect("second post");

    assert!(first.is_new());
    assert!(matches!(second, PostOutcome::AlreadyPosted(_)));
    assert_eq!(
        first.journal().entry.journal_id,
        second.journal().entry.journal_id
    );
    assert_eq!(ledger.count("journal_entries").await, 1);
    assert_eq!(ledger.balance(c.receivable).await, dec!(250000));
    assert!(!ledger
        .state
        .engine
        .should_post(&req.key())
        .await
        .expect("should_post"));
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_concurrent_posts_of_one_key_create_one_journal() {
    let ledger = setup().await;
    let c = &ledger.chart;
    let req = simple(
        SourceType::Payment,
        900,
        "PAYMENT",
        date(2024, 2, 1),
        c.receivable,
        c.revenue,
        dec!(1500),
    );

    let mut handles = Vec::new();
    for _ in 0..6 {
        let engine = ledger.state.engine.clone();
        let req = req.clone();
        handles.push(tokio::spawn(async move { engine.post(&req).await }));
    }

    let mut journal_ids = Vec::new();
    let mut new_posts = 0;
    for joined in join_all(handles).await {
        let outcome = joined.expect("task panicked").expect("post failed");
        if outcome.is_new() {
            new_posts += 1;
        }
        journal_ids.push(outcome.journal().entry.journal_id);
    }

    assert_eq!(new_posts, 1);
    journal_ids.dedup();
    assert_eq!(journal_ids.len(), 1);
    assert_eq!(ledger.count("journal_entries").await, 1);
    assert_eq!(ledger.balance(c.receivable).await, dec!(1500));
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_strict_cash_bank_rejects_overdraft_atomically() {
    let ledger = setup().await;
    let c = &ledger.chart;

    ledger
        .state
        .engine
        .post(&simple(
            SourceType::CashBank,
            1,
            "CAPITAL",
            date(2024, 3, 1),
            c.cash,
            c.equity,
            dec!(100),
        ))
        .await
        .expect("funding post");

    let result = ledger
        .state
        .engine
        .post(&simple(
            SourceType::Purchase,
            2,
            "PURCHASE",
            date(2024, 3, 2),
            c.inventory,
            c.cash,
            dec!(150),
        ))
        .await;

    assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));
    assert_eq!(ledger.balance(c.cash).await, dec!(100));
    assert_eq!(ledger.balance(c.inventory).await, dec!(0));
    assert_eq!(ledger.cash_bank_balance(c.cash_bank_cash).await, dec!(100));
    assert_eq!(ledger.count("journal_entries").await, 1);
    // The rejected post releases its claim.
    assert!(ledger
        .state
        .engine
        .should_post(&journal_service::models::PostingKey::new(
            SourceType::Purchase,
            2,
            "PURCHASE"
        ))
        .await
        .expect("should_post"));
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_header_account_is_not_postable() {
    let ledger = setup().await;
    let c = &ledger.chart;

    let result = ledger
        .state
        .engine
        .post(&simple(
            SourceType::Manual,
            3,
            "ADJUSTMENT",
            date(2024, 1, 3),
            c.assets_header,
            c.equity,
            dec!(10),
        ))
        .await;

    match result {
        Err(LedgerError::InvalidAccount { account, reason }) => {
            assert_eq!(account, "1000");
            assert_eq!(reason, InvalidAccountReason::Header);
        }
        other => panic!("expected header rejection, got {:?}", other),
    }
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_entry_numbers_are_sequential_per_month() {
    let ledger = setup().await;
    let c = &ledger.chart;

    let mut numbers = Vec::new();
    for (source_id, month, day) in [(1, 1, 5), (2, 1, 20), (3, 2, 1)] {
        let outcome = ledger
            .state
            .engine
            .post(&simple(
                SourceType::Sale,
                source_id,
                "SALE",
                date(2024, month, day),
                c.receivable,
                c.revenue,
                dec!(10),
            ))
            .await
            .expect("post");
        numbers.push(outcome.into_journal().entry.entry_number);
    }

    assert_eq!(
        numbers,
        vec![
            Some("JE-2024/01/0001".to_string()),
            Some("JE-2024/01/0002".to_string()),
            Some("JE-2024/02/0001".to_string()),
        ]
    );
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_draft_moves_no_balance_until_posted() {
    let ledger = setup().await;
    let c = &ledger.chart;
    let req = simple(
        SourceType::Manual,
        55,
        "ACCRUAL",
        date(2024, 4, 30),
        c.receivable,
        c.revenue,
        dec!(800),
    );

    let draft = ledger.state.engine.save_draft(&req).await.expect("draft");
    assert_eq!(draft.entry.parsed_status(), Some(JournalStatus::Draft));
    assert!(draft.entry.entry_number.is_none());
    assert_eq!(ledger.balance(c.receivable).await, dec!(0));

    let posted = ledger
        .state
        .engine
        .post_draft(draft.entry.journal_id)
        .await
        .expect("post draft");
    assert!(posted.is_new());
    assert_eq!(posted.journal().entry.journal_id, draft.entry.journal_id);
    assert_eq!(
        posted.journal().entry.entry_number.as_deref(),
        Some("JE-2024/04/0001")
    );
    assert_eq!(ledger.balance(c.receivable).await, dec!(800));

    let again = ledger
        .state
        .engine
        .post_draft(draft.entry.journal_id)
        .await
        .expect("second post of draft");
    assert!(!again.is_new());
    assert_eq!(ledger.balance(c.receivable).await, dec!(800));
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_cached_balance_rejects_direct_writes() {
    let ledger = setup().await;
    let c = &ledger.chart;

    let result = sqlx::query("UPDATE accounts SET balance = 5 WHERE account_id = $1")
        .bind(c.cash)
        .execute(ledger.pool())
        .await;

    assert!(result.is_err());
    assert_eq!(ledger.balance(c.cash).await, dec!(0));
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_find_by_source_lists_every_purpose() {
    let ledger = setup().await;
    let c = &ledger.chart;

    for (purpose, amount) in [("SALE", dec!(300)), ("COGS", dec!(120))] {
        ledger
            .state
            .engine
            .post(&simple(
                SourceType::Sale,
                77,
                purpose,
                date(2024, 5, 1),
                c.receivable,
                c.revenue,
                amount,
            ))
            .await
            .expect("post");
    }

    let entries = ledger
        .state
        .engine
        .find_by_source(SourceType::Sale, 77)
        .await
        .expect("find");
    let purposes: Vec<_> = entries.iter().map(|e| e.entry.purpose.as_str()).collect();
    assert_eq!(entries.len(), 2);
    assert!(purposes.contains(&"SALE"));
    assert!(purposes.contains(&"COGS"));
    assert!(entries.iter().all(|e| e.lines.len() == 2));
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_one_cent_imbalance_is_never_posted() {
    let ledger = setup().await;
    let c = &ledger.chart;

    let result = ledger
        .state
        .engine
        .post(&request(
            SourceType::CashBank,
            8,
            "CAPITAL",
            date(2024, 1, 6),
            vec![
                JournalLineInput::debit(c.cash, dec!(100.00)),
                JournalLineInput::credit(c.equity, dec!(99.99)),
            ],
        ))
        .await;

    assert!(matches!(result, Err(LedgerError::UnbalancedEntry { .. })));
    assert_eq!(ledger.count("journal_entries").await, 0);
    assert_eq!(ledger.balance(c.cash).await, dec!(0));
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_deactivated_cash_bank_blocks_posting_to_its_account() {
    let ledger = setup().await;
    let c = &ledger.chart;

    sqlx::query("UPDATE cash_banks SET is_active = FALSE WHERE cash_bank_id = $1")
        .bind(c.cash_bank_bank)
        .execute(ledger.pool())
        .await
        .expect("deactivate cash bank");

    let result = ledger
        .state
        .engine
        .post(&simple(
            SourceType::CashBank,
            9,
            "CAPITAL",
            date(2024, 1, 7),
            c.bank,
            c.equity,
            dec!(40),
        ))
        .await;

    match result {
        Err(LedgerError::InvalidAccount { account, reason }) => {
            assert_eq!(account, "1102");
            assert_eq!(reason, InvalidAccountReason::Inactive);
        }
        other => panic!("expected inactive rejection, got {:?}", other),
    }
    assert_eq!(ledger.balance(c.bank).await, dec!(0));
    assert_eq!(ledger.count("cash_bank_transactions").await, 0);
}
