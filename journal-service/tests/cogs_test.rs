//! COGS recognition integration tests.
//!
//! These tests require a PostgreSQL database at TEST_DATABASE_URL.
//! Run with: cargo test -p journal-service -- --ignored

mod common;

use common::{date, setup};
use futures::future::join_all;
use journal_service::models::{CogsOutcome, CogsSkipReason, SaleStatus};
use rust_decimal_macros::dec;
use serial_test::serial;

#[tokio::test]
#[ignore]
#[serial]
async fn test_concurrent_cogs_requests_post_once() {
    let ledger = setup().await;
    let c = &ledger.chart;
    ledger
        .insert_sale(
            501,
            "INVOICED",
            date(2024, 7, 1),
            &[(dec!(10), dec!(50000)), (dec!(5), dec!(50000))],
        )
        .await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let cogs = ledger.state.cogs.clone();
        handles.push(tokio::spawn(async move { cogs.compute_and_post(501).await }));
    }

    let mut posted = 0;
    for joined in join_all(handles).await {
        match joined.expect("task panicked").expect("cogs failed") {
            CogsOutcome::Posted { journal } => {
                posted += 1;
                assert_eq!(journal.entry.total_debit, dec!(750000));
                assert_eq!(
                    journal.entry.description.as_deref(),
                    Some("COGS for INV-00501")
                );
                assert_eq!(
                    journal.lines[0].description.as_deref(),
                    Some("Cost of goods sold")
                );
                assert_eq!(
                    journal.lines[1].description.as_deref(),
                    Some("Inventory relieved")
                );
            }
            CogsOutcome::AlreadyPosted { .. } => {}
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    assert_eq!(posted, 1);
    assert_eq!(ledger.count("journal_entries").await, 1);
    assert_eq!(ledger.balance(c.cogs).await, dec!(750000));
    assert_eq!(ledger.balance(c.inventory).await, dec!(-750000));
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_ineligible_and_costless_sales_are_skipped() {
    let ledger = setup().await;
    ledger
        .insert_sale(601, "DRAFT", date(2024, 7, 2), &[(dec!(1), dec!(10))])
        .await;
    ledger
        .insert_sale(602, "PAID", date(2024, 7, 2), &[(dec!(3), dec!(0))])
        .await;

    let cogs = &ledger.state.cogs;
    assert!(matches!(
        cogs.compute_and_post(601).await.expect("draft sale"),
        CogsOutcome::NoOp {
            reason: CogsSkipReason::NotEligible(SaleStatus::Draft)
        }
    ));
    assert!(matches!(
        cogs.compute_and_post(602).await.expect("zero cost sale"),
        CogsOutcome::NoOp {
            reason: CogsSkipReason::ZeroCost
        }
    ));
    assert!(matches!(
        cogs.compute_and_post(999).await.expect("missing sale"),
        CogsOutcome::NoOp {
            reason: CogsSkipReason::SaleNotFound
        }
    ));
    assert_eq!(ledger.count("journal_entries").await, 0);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_pending_and_overdue_sales_are_skipped_not_failed() {
    let ledger = setup().await;
    ledger
        .insert_sale(700, "PENDING", date(2024, 7, 3), &[(dec!(2), dec!(40))])
        .await;
    ledger
        .insert_sale(701, "OVERDUE", date(2024, 7, 3), &[(dec!(1), dec!(40))])
        .await;

    let cogs = &ledger.state.cogs;
    assert!(matches!(
        cogs.compute_and_post(700).await.expect("pending sale"),
        CogsOutcome::NoOp {
            reason: CogsSkipReason::NotEligible(SaleStatus::Pending)
        }
    ));
    assert!(matches!(
        cogs.compute_and_post(701).await.expect("overdue sale"),
        CogsOutcome::NoOp {
            reason: CogsSkipReason::NotEligible(SaleStatus::Overdue)
        }
    ));
    assert_eq!(ledger.count("journal_entries").await, 0);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_backfill_posts_missing_cogs_and_skips_existing() {
    let ledger = setup().await;
    ledger
        .insert_sale(701, "INVOICED", date(2024, 8, 1), &[(dec!(2), dec!(125.50))])
        .await;
    ledger
        .insert_sale(702, "PAID", date(2024, 8, 15), &[(dec!(1), dec!(1000))])
        .await;
    ledger
        .insert_sale(703, "PAID", date(2024, 9, 1), &[(dec!(1), dec!(1))])
        .await;

    let cogs = &ledger.state.cogs;
    cogs.compute_and_post(701).await.expect("live cogs");

    let report = cogs
        .backfill(date(2024, 8, 1), date(2024, 8, 31))
        .await
        .expect("backfill");
    assert_eq!(report.candidates, 2);
    assert_eq!(report.posted, 1);
    assert_eq!(report.already_posted, 1);
    assert!(report.failures.is_empty());

    let entries = ledger
        .state
        .engine
        .find_by_source(journal_service::models::SourceType::Sale, 702)
        .await
        .expect("find");
    assert_eq!(entries.len(), 1);
    assert!(entries[0]
        .entry
        .description
        .as_deref()
        .is_some_and(|d| d.starts_with("COGS-BACKFILL")));

    let summary = cogs
        .summary(date(2024, 8, 1), date(2024, 8, 31))
        .await
        .expect("summary");
    assert_eq!(summary.total_cogs, dec!(1251.00));
    assert_eq!(summary.journal_count, 2);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_backfill_rejects_inverted_range() {
    let ledger = setup().await;
    let result = ledger
        .state
        .cogs
        .backfill(date(2024, 9, 30), date(2024, 9, 1))
        .await;
    assert!(matches!(
        result,
        Err(journal_service::error::LedgerError::InvalidRange { .. })
    ));
}
