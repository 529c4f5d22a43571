//! End-to-end advisor runs over the scripted in-memory warehouse.

use advisor::{Advisor, AdvisorError, AdvisorSettings, CatalogError, ColumnBenchError};
use anyhow::Result;
use common::TableRef;
use common::config::ApplyPolicy;
use common::testing::InMemoryWarehouse;
use common::warehouse::CatalogRow;
use std::sync::Arc;
use std::time::Duration;
use tests_integration::{
    SALES_COLUMNS, SCHEMA, TABLE, config_from_toml, init_test_logging, sales_table,
    sales_warehouse, settings,
};

fn winner(advice: &advisor::Advice, column: &str) -> Option<String> {
    advice
        .columns
        .iter()
        .find(|c| c.column.name == column)
        .and_then(|c| c.selection.as_ref())
        .map(|s| s.winner.config.key())
}

#[tokio::test]
async fn test_full_run_recommends_per_column() -> Result<()> {
    init_test_logging();
    let warehouse = sales_warehouse();
    let advisor = Advisor::new(Arc::new(warehouse.clone()), settings(3));

    let advice = advisor.run().await?;

    let names: Vec<_> = advice.columns.iter().map(|c| c.column.name.as_str()).collect();
    assert_eq!(names, SALES_COLUMNS);
    assert_eq!(winner(&advice, "id").as_deref(), Some("ZLIB_9"));
    assert_eq!(winner(&advice, "region").as_deref(), Some("RLE_TYPE_1"));
    assert_eq!(winner(&advice, "amount").as_deref(), Some("RLE_TYPE_3"));

    let script = advice.plan.to_string();
    assert!(script.contains("COLUMN amount ENCODING (compresstype=RLE_TYPE, COMPRESSLEVEL=3)"));
    assert!(script.contains("ALTER TABLE sales RENAME TO sales_old;"));
    assert!(!advice.applied);

    let stats = warehouse.stats();
    assert!(stats.live_objects.is_empty(), "leaked {:?}", stats.live_objects);
    assert!(stats.peak_sessions <= 3);
    assert!(stats.executed.is_empty());

    assert_eq!(advice.metrics.columns_benchmarked, SALES_COLUMNS.len());
    assert_eq!(advice.metrics.candidates_measured, SALES_COLUMNS.len() * 8);
    Ok(())
}

#[tokio::test]
async fn test_worker_count_does_not_change_advice() -> Result<()> {
    init_test_logging();
    let warehouse = sales_warehouse()
        .with_delay("id", Duration::from_millis(20))
        .with_delay("region", Duration::from_millis(5));

    let serial = Advisor::new(Arc::new(warehouse.clone()), settings(1))
        .advise()
        .await?;
    let parallel = Advisor::new(Arc::new(warehouse.clone()), settings(4))
        .advise()
        .await?;

    assert_eq!(serial.columns, parallel.columns);
    assert_eq!(serial.plan, parallel.plan);
    Ok(())
}

#[tokio::test]
async fn test_failed_column_is_reported_and_run_continues() -> Result<()> {
    init_test_logging();
    let warehouse = sales_warehouse().fail_column("note");
    let advisor = Advisor::new(Arc::new(warehouse.clone()), settings(2));

    let advice = advisor.advise().await?;

    let note = advice
        .columns
        .iter()
        .find(|c| c.column.name == "note")
        .expect("note column");
    assert!(note.selection.is_none());
    assert!(matches!(
        note.error,
        Some(ColumnBenchError::NoSuccessfulCandidates { .. })
    ));
    assert_eq!(advice.plan.manual_review.len(), 1);
    assert!(!advice.plan.to_string().contains("COLUMN note"));
    assert!(advice.report().contains("-- note could not be benchmarked"));
    assert_eq!(
        advice.columns.iter().filter(|c| c.selection.is_some()).count(),
        SALES_COLUMNS.len() - 1
    );
    assert!(warehouse.stats().live_objects.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_missing_table_is_fatal() {
    init_test_logging();
    let warehouse = InMemoryWarehouse::new();
    let advisor = Advisor::new(
        Arc::new(warehouse),
        AdvisorSettings::new(TableRef::new(SCHEMA, "missing")),
    );

    let err = advisor.advise().await.unwrap_err();
    assert!(matches!(
        err,
        AdvisorError::Catalog(CatalogError::TableNotFound(_))
    ));
}

#[tokio::test]
async fn test_lost_connection_is_fatal() {
    init_test_logging();
    let warehouse = sales_warehouse().disconnect_on("amount");
    let advisor = Advisor::new(Arc::new(warehouse), settings(2));

    let err = advisor.advise().await.unwrap_err();
    assert!(matches!(err, AdvisorError::Connectivity(_)));
}

#[tokio::test]
async fn test_current_encoding_is_marked() -> Result<()> {
    init_test_logging();
    let rows = vec![
        CatalogRow {
            name: "amount".to_string(),
            ordinal: 1,
            options: Some(vec![
                "compresstype=zlib".to_string(),
                "compresslevel=1".to_string(),
                "blocksize=32768".to_string(),
            ]),
        },
        CatalogRow {
            name: "id".to_string(),
            ordinal: 2,
            options: Some(vec![
                "compresstype=zlib".to_string(),
                "compresslevel=9".to_string(),
            ]),
        },
    ];
    let warehouse = sales_warehouse().with_catalog_rows(SCHEMA, TABLE, rows);
    let advice = Advisor::new(Arc::new(warehouse), settings(2))
        .advise()
        .await?;

    let report = advice.report();
    assert!(report.contains("-- amount ZLIB 1 1020 bytes 100.00 % <<<CURRENT"));
    assert!(report.contains("-- amount RLE_TYPE 3 1000 bytes 98.04 % <<<RECOMMENDED"));
    assert!(report.contains("<<<CURRENT <<<RECOMMENDED"));

    // `id` already uses its recommendation, `amount` changes
    assert_eq!(advice.plan.changes(), 1);
    Ok(())
}

#[tokio::test]
async fn test_execute_policy_applies_plan() -> Result<()> {
    init_test_logging();
    let warehouse = sales_warehouse();
    let mut settings = settings(2);
    settings.apply = ApplyPolicy::Execute;

    let advice = Advisor::new(Arc::new(warehouse.clone()), settings)
        .run()
        .await?;

    assert!(advice.applied);
    let executed = warehouse.stats().executed;
    assert_eq!(executed.first().map(String::as_str), Some("SET search_path TO public"));
    assert_eq!(executed.last().map(String::as_str), Some("COMMIT"));
    Ok(())
}

#[tokio::test]
async fn test_failed_swap_is_rolled_back() {
    init_test_logging();
    let warehouse = sales_warehouse().fail_statement("ALTER TABLE sales_new_type RENAME");
    let mut settings = settings(2);
    settings.apply = ApplyPolicy::Execute;

    let err = Advisor::new(Arc::new(warehouse.clone()), settings)
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, AdvisorError::PlanExecution { .. }));
    let executed = warehouse.stats().executed;
    let rollback = executed.iter().position(|sql| sql == "ROLLBACK");
    let discard = executed
        .iter()
        .position(|sql| sql == "DROP TABLE IF EXISTS sales_new_type");
    assert!(rollback.is_some());
    assert!(discard > rollback, "shadow dropped before rollback: {executed:?}");
}

#[tokio::test]
async fn test_column_timeout_reports_and_cleans_up() -> Result<()> {
    init_test_logging();
    let warehouse = sales_warehouse().with_delay("note", Duration::from_millis(500));
    let mut settings = settings(5);
    settings.scheduler.column_timeout = Some(Duration::from_millis(100));

    let advice = Advisor::new(Arc::new(warehouse.clone()), settings)
        .advise()
        .await?;

    let note = advice
        .columns
        .iter()
        .find(|c| c.column.name == "note")
        .expect("note column");
    assert!(matches!(note.error, Some(ColumnBenchError::TimedOut(_))));
    assert!(note.selection.is_none());
    assert_eq!(advice.plan.manual_review.len(), 1);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(warehouse.stats().live_objects.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_configuration_file_drives_settings() -> Result<()> {
    init_test_logging();
    let config = config_from_toml(
        r#"
        [bench]
        sample_rows = 500
        workers = 2
        tradeoff_threshold = 95
        candidates = ["ZLIB_1", "ZLIB_9", "RLE_TYPE_3"]

        [weights]
        ZLIB_9 = 1

        [plan]
        shadow_suffix = "_rebuilt"
        "#,
    )?;
    let settings = AdvisorSettings::from_config(&config, sales_table())?;
    assert_eq!(settings.candidates.len(), 3);

    let warehouse = sales_warehouse();
    let advice = Advisor::new(Arc::new(warehouse), settings).advise().await?;

    // At 95% RLE_TYPE/3 no longer competes; ZLIB/9 weighs 1 anyway
    assert_eq!(winner(&advice, "amount").as_deref(), Some("ZLIB_9"));
    assert!(advice.plan.to_string().contains("CREATE TABLE sales_rebuilt ("));
    assert!(advice.columns.iter().all(|c| c.measurements.len() == 3));
    Ok(())
}

#[tokio::test]
async fn test_advice_serializes_to_json() -> Result<()> {
    init_test_logging();
    let advice = Advisor::new(Arc::new(sales_warehouse()), settings(2))
        .advise()
        .await?;

    let json = serde_json::to_value(&advice)?;
    assert_eq!(json["table"]["table"], "sales");
    assert_eq!(json["columns"].as_array().map(Vec::len), Some(SALES_COLUMNS.len()));
    assert_eq!(
        json["columns"][3]["selection"]["winner"]["config"]["compression_type"],
        "RLE_TYPE"
    );
    assert_eq!(json["plan"]["steps"][0]["step"], "set_search_path");
    Ok(())
}
