//! Property tests for batch thresholds and month/version homogeneity.

use std::sync::Arc;

use proptest::prelude::*;
use ts_common::MonthKey;
use ts_core::store::MemoryStore;
use ts_core::{BatchEngine, BatchWriter, SqlValue};
use ts_model::ModelRegistry;

const MODELS: &str = r#"{"models":[
    {"name":"a","version":1,"sharding":"month","fields":[{"name":"v","type":"int"}]},
    {"name":"a","version":2,"sharding":"month","fields":[{"name":"v","type":"int"}]},
    {"name":"b","version":1,"sharding":"month","fields":[{"name":"v","type":"int"}]}
]}"#;

/// Columns per row: four audit fields plus `v`.
const ROW_WIDTH: usize = 5;

const MONTH_STARTS: [i64; 3] = [1_698_000_000, 1_700_000_000, 1_702_000_000];

fn line_strategy() -> impl Strategy<Value = String> {
    (
        prop::sample::select(vec!["a", "b"]),
        1i32..=2,
        0usize..MONTH_STARTS.len(),
        0i64..3600,
    )
        .prop_map(|(ty, version, month, offset)| {
            let version = if ty == "b" { 1 } else { version };
            format!("{}|{}|{}|{}", ty, version, MONTH_STARTS[month] + offset, offset)
        })
}

fn int(value: &SqlValue) -> i64 {
    match value {
        SqlValue::Int(v) => *v,
        SqlValue::Text(t) => panic!("expected int, got {t:?}"),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn batches_stay_below_threshold_and_homogeneous(
        threshold in 1usize..6,
        lines in prop::collection::vec(line_strategy(), 0..60),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let registry = Arc::new(ModelRegistry::from_json_str(MODELS).unwrap());
        let store = Arc::new(MemoryStore::new());
        let mut engine = BatchEngine::new(registry, BatchWriter::new(Arc::clone(&store)), threshold);

        rt.block_on(async {
            for line in &lines {
                engine.ingest_line(line).await;
                for ty in ["a", "b"] {
                    if let Some(batch) = engine.batch(ty) {
                        prop_assert!(batch.len() < threshold);
                        for record in &batch.records {
                            prop_assert_eq!(record.month, batch.month);
                            prop_assert_eq!(record.version, batch.version);
                        }
                    }
                }
            }
            engine.flush_all().await;
            Ok::<(), TestCaseError>(())
        })?;

        let inserts = store.inserts();
        let written: usize = inserts.iter().map(|i| i.rows).sum();
        prop_assert_eq!(written, lines.len());
        prop_assert_eq!(engine.stats().accepted as usize, lines.len());

        for insert in &inserts {
            prop_assert!(insert.rows <= threshold);
            let rows: Vec<&[SqlValue]> = insert.args.chunks(ROW_WIDTH).collect();
            let month = MonthKey::from_logtime(int(&rows[0][1])).unwrap();
            let version = int(&rows[0][0]);
            prop_assert!(insert.table.ends_with(&month.to_string()));
            for row in rows {
                prop_assert_eq!(MonthKey::from_logtime(int(&row[1])).unwrap(), month);
                prop_assert_eq!(int(&row[0]), version);
            }
        }
    }
}
