//! End-to-end scenarios over the full analysis pipeline: a bilingual review
//! population drifting in production, schema failures at session open, and
//! session lifecycle behavior.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use driftlens::core::config::{ClusteringConfig, ProjectionConfig};
use driftlens::core::dataset::{CellValue, Dataset, DatasetRole, MemoryTable};
use driftlens::core::schema::{EmbeddingFeature, SchemaModel};
use driftlens::{AnalysisSession, CancelToken, DriftError, DriftScope, DriftlensConfig};

const DIMS: usize = 10;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn review_schema() -> SchemaModel {
    SchemaModel::new()
        .with_timestamp("ts")
        .with_prediction_label("pred")
        .with_actual_label("actual")
        .with_embedding_feature(
            EmbeddingFeature::new("review", "review_vector").with_raw_data("review_text"),
        )
}

/// Synthetic review embeddings: each language is a tight blob around its own
/// center, far from the other language's center.
fn language_blob(center_value: f64, count: usize, language: &str, seed: u64) -> Vec<(Vec<f64>, String)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let vector: Vec<f64> = (0..DIMS)
                .map(|_| center_value + rng.gen_range(-0.5..0.5))
                .collect();
            (vector, format!("{language} review {i}"))
        })
        .collect()
}

fn review_dataset(
    role: DatasetRole,
    rows: Vec<(Vec<f64>, String)>,
    name: &str,
) -> Arc<Dataset> {
    let n = rows.len();
    let (vectors, texts): (Vec<_>, Vec<_>) = rows.into_iter().unzip();
    let table = Arc::new(
        MemoryTable::new()
            .with_column("ts", (0..n).map(|i| CellValue::Timestamp(i as i64)).collect())
            .with_column("pred", vec![CellValue::Text("positive".into()); n])
            .with_column("actual", vec![CellValue::Text("positive".into()); n])
            .with_column(
                "review_vector",
                vectors.into_iter().map(CellValue::Vector).collect(),
            )
            .with_column(
                "review_text",
                texts.into_iter().map(CellValue::Text).collect(),
            ),
    );
    Arc::new(Dataset::from_table(table, review_schema(), role, name).unwrap())
}

fn scenario_config() -> DriftlensConfig {
    DriftlensConfig {
        projection: ProjectionConfig {
            n_neighbors: 10,
            n_epochs: 100,
            ..ProjectionConfig::default()
        },
        clustering: ClusteringConfig {
            min_cluster_size: 20,
            min_samples: 5,
            ..ClusteringConfig::default()
        },
        ..DriftlensConfig::default()
    }
}

/// Reference: English reviews only. Primary: mostly English plus a separate
/// Spanish region. The Spanish points must end up isolated in clusters
/// ranked most drift-responsible, and exporting the top cluster must return
/// (approximately) the Spanish rows.
#[test]
fn bilingual_drift_is_isolated_ranked_and_exportable() {
    init_tracing();
    let reference = review_dataset(
        DatasetRole::Reference,
        language_blob(0.0, 250, "english", 1),
        "train",
    );
    let mut primary_rows = language_blob(0.0, 200, "english", 2);
    primary_rows.extend(language_blob(30.0, 50, "spanish", 3));
    let primary = review_dataset(DatasetRole::Primary, primary_rows, "prod");

    let session = AnalysisSession::open(reference, primary, scenario_config()).unwrap();
    let artifact = session.compute("review").unwrap();

    // Spanish rows are primary indexes 200..250.
    let is_spanish = |row: usize| row >= 200;

    let top = artifact.top_drift().expect("at least one ranked cluster");
    let top_cluster = match top.scope {
        DriftScope::Cluster(id) => id,
        DriftScope::Global => panic!("ranked list must not contain the global scope"),
    };

    // The top-ranked cluster is dominated by primary points: the Spanish
    // region exists only in production.
    assert!(top.count_primary > top.count_reference);

    let exported = session
        .export_rows("review", DriftScope::Cluster(top_cluster), Some(DatasetRole::Primary))
        .unwrap();

    let spanish_in_top = exported.iter().filter(|r| is_spanish(r.key.row.0)).count();
    assert!(
        spanish_in_top * 10 >= exported.len() * 9,
        "top cluster should be >=90% Spanish: {spanish_in_top}/{}",
        exported.len()
    );
    assert!(
        spanish_in_top >= 35,
        "top cluster should capture most of the 50 Spanish rows, got {spanish_in_top}"
    );

    // Raw text joined back for labeling workflows.
    assert!(exported
        .iter()
        .filter(|r| is_spanish(r.key.row.0))
        .all(|r| matches!(&r.raw_data, Some(CellValue::Text(t)) if t.starts_with("spanish"))));

    session.close();
}

/// Opening with a primary dataset missing the declared timestamp column
/// fails with a schema error before any projection work begins.
#[test]
fn open_fails_fast_on_missing_timestamp() {
    init_tracing();
    // Primary table without the "ts" column.
    let rows = language_blob(0.0, 30, "english", 5);
    let n = rows.len();
    let (vectors, texts): (Vec<_>, Vec<_>) = rows.into_iter().unzip();
    let table = Arc::new(
        MemoryTable::new()
            .with_column("pred", vec![CellValue::Text("positive".into()); n])
            .with_column("actual", vec![CellValue::Text("positive".into()); n])
            .with_column(
                "review_vector",
                vectors.into_iter().map(CellValue::Vector).collect(),
            )
            .with_column(
                "review_text",
                texts.into_iter().map(CellValue::Text).collect(),
            ),
    );

    let err = Dataset::from_table(table, review_schema(), DatasetRole::Primary, "prod")
        .unwrap_err();

    match err {
        DriftError::Schema { column, .. } => assert_eq!(column, Some("ts".to_string())),
        other => panic!("expected Schema error, got {other:?}"),
    }
}

/// compute after close fails with SessionClosed, and artifacts cached before
/// close are unreachable.
#[test]
fn close_makes_artifacts_unreachable() {
    init_tracing();
    let reference = review_dataset(
        DatasetRole::Reference,
        language_blob(0.0, 60, "english", 6),
        "train",
    );
    let primary = review_dataset(
        DatasetRole::Primary,
        language_blob(0.0, 60, "english", 7),
        "prod",
    );
    let session = AnalysisSession::open(reference, primary, scenario_config()).unwrap();

    session.compute("review").unwrap();
    assert!(session.artifact("review").unwrap().is_some());

    session.close();

    assert!(matches!(
        session.compute("review").unwrap_err(),
        DriftError::SessionClosed { .. }
    ));
    assert!(matches!(
        session.artifact("review").unwrap_err(),
        DriftError::SessionClosed { .. }
    ));
    assert!(matches!(
        session
            .export_rows("review", DriftScope::Global, None)
            .unwrap_err(),
        DriftError::SessionClosed { .. }
    ));
}

/// Two computes with no intervening state change produce identical results,
/// and the whole pipeline is deterministic across sessions given one seed.
#[test]
fn recompute_and_reopen_are_deterministic() {
    init_tracing();
    let make_session = || {
        let reference = review_dataset(
            DatasetRole::Reference,
            language_blob(0.0, 80, "english", 8),
            "train",
        );
        let primary = review_dataset(
            DatasetRole::Primary,
            language_blob(0.0, 80, "english", 9),
            "prod",
        );
        AnalysisSession::open(reference, primary, scenario_config()).unwrap()
    };

    let session = make_session();
    let first = session.compute("review").unwrap();
    let second = session.compute("review").unwrap();
    assert!(first.same_results(&second));

    let other_session = make_session();
    let across = other_session.compute("review").unwrap();
    assert!(first.same_results(&across));

    session.close();
    other_session.close();
}

/// compute_all with a pre-cancelled token publishes nothing.
#[test]
fn cancelled_compute_all_publishes_nothing() {
    init_tracing();
    let reference = review_dataset(
        DatasetRole::Reference,
        language_blob(0.0, 40, "english", 10),
        "train",
    );
    let primary = review_dataset(
        DatasetRole::Primary,
        language_blob(0.0, 40, "english", 11),
        "prod",
    );
    let session = AnalysisSession::open(reference, primary, scenario_config()).unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    assert!(session.compute_all(&cancel).is_err());
    assert_eq!(session.list_features().unwrap(), Vec::<String>::new());

    session.close();
}
