//! End-to-end runs over the reference adapters.

use rowpipe_core::descriptor::{CreateContext, DescriptorSet};
use rowpipe_core::{
    Orchestrator, OptionsRegistry, PipelineOptions, TransformerPipeline, WriteStrategy,
};
use rowpipe_tx::create_transformers;
use tokio_util::sync::CancellationToken;

fn descriptors() -> DescriptorSet {
    let mut set = DescriptorSet::new();
    set.extend(rowpipe_io::descriptors());
    set
}

async fn transfer(
    source: &str,
    dest: &str,
    transforms: &[&str],
    options: PipelineOptions,
) -> rowpipe_core::Result<rowpipe_core::ExportMetrics> {
    let set = descriptors();
    let registry = OptionsRegistry::new();
    registry.freeze();
    let reader = set.create_reader(&CreateContext {
        connection_string: source,
        query: None,
        strategy: WriteStrategy::Truncate,
        registry: &registry,
    })?;
    let writer = set.create_writer(&CreateContext {
        connection_string: dest,
        query: None,
        strategy: WriteStrategy::Truncate,
        registry: &registry,
    })?;
    let specs: Vec<String> = transforms.iter().map(|s| s.to_string()).collect();
    let pipeline = TransformerPipeline::new(create_transformers(&specs)?);
    Orchestrator::new(options)
        .run(reader, pipeline, writer, CancellationToken::new())
        .await
}

fn small_batches() -> PipelineOptions {
    PipelineOptions {
        batch_size: 2,
        retry_delay_ms: 1,
        ..Default::default()
    }
}

#[tokio::test]
async fn csv_to_jsonl_to_csv_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let csv_in = dir.path().join("in.csv");
    let jsonl = dir.path().join("mid.jsonl");
    let csv_out = dir.path().join("out.csv");
    let original = "id,name\n1,alice\n2,bob\n3,carol\n";
    std::fs::write(&csv_in, original).unwrap();

    let metrics = transfer(
        &csv_in.display().to_string(),
        &jsonl.display().to_string(),
        &[],
        small_batches(),
    )
    .await
    .unwrap();
    assert_eq!(metrics.read_count, 3);
    assert_eq!(metrics.write_count, 3);

    let metrics = transfer(
        &jsonl.display().to_string(),
        &csv_out.display().to_string(),
        &[],
        small_batches(),
    )
    .await
    .unwrap();
    assert_eq!(metrics.write_count, 3);
    assert_eq!(std::fs::read_to_string(&csv_out).unwrap(), original);
}

#[tokio::test]
async fn generate_to_csv_honors_the_limit() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.csv");
    let mut options = small_batches();
    options.limit = 5;
    let metrics = transfer("generate:100", &out.display().to_string(), &[], options)
        .await
        .unwrap();
    assert_eq!(metrics.write_count, 5);
    let text = std::fs::read_to_string(&out).unwrap();
    // Header plus five rows.
    assert_eq!(text.lines().count(), 6);
    assert!(text.starts_with("id,name,score\n"));
}

#[tokio::test]
async fn mask_and_filter_apply_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.csv");
    let out = dir.path().join("out.csv");
    std::fs::write(
        &input,
        "CARD,Age\n4111222233334444,25\n5500111122223333,10\n",
    )
    .unwrap();
    let metrics = transfer(
        &input.display().to_string(),
        &out.display().to_string(),
        &[
            "filter:return tonumber(row.Age) > 18",
            "mask:CARD=####-####-####-####",
        ],
        small_batches(),
    )
    .await
    .unwrap();
    assert_eq!(metrics.read_count, 2);
    assert_eq!(metrics.write_count, 1);
    assert_eq!(metrics.transformer_stats["filter"], 1);
    let text = std::fs::read_to_string(&out).unwrap();
    assert_eq!(text, "CARD,Age\n4111-2223-3344-4,25\n");
}

#[tokio::test]
async fn expand_multiplies_rows_into_the_sink() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.jsonl");
    let metrics = transfer(
        "generate:3",
        &out.display().to_string(),
        &["expand:+tag:return {{id=row.id, tag='a'}, {id=row.id, tag='b'}}"],
        small_batches(),
    )
    .await
    .unwrap();
    assert_eq!(metrics.read_count, 3);
    assert_eq!(metrics.write_count, 6);
    let text = std::fs::read_to_string(&out).unwrap();
    let rows: Vec<(i64, String)> = text
        .lines()
        .map(|l| {
            let v: serde_json::Value = serde_json::from_str(l).unwrap();
            (v["id"].as_i64().unwrap(), v["tag"].as_str().unwrap().to_string())
        })
        .collect();
    let expected: Vec<(i64, String)> = (0..3)
        .flat_map(|i| [(i, "a".to_string()), (i, "b".to_string())])
        .collect();
    assert_eq!(rows, expected);
}

#[tokio::test]
async fn empty_source_produces_an_empty_but_valid_sink() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.csv");
    let out = dir.path().join("out.csv");
    std::fs::write(&input, "id,name\n").unwrap();
    let metrics = transfer(
        &input.display().to_string(),
        &out.display().to_string(),
        &[],
        small_batches(),
    )
    .await
    .unwrap();
    assert_eq!(metrics.read_count, 0);
    assert_eq!(metrics.write_count, 0);
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "id,name\n");
}

#[tokio::test]
async fn metrics_file_reports_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.csv");
    let metrics_path = dir.path().join("metrics.json");
    let mut options = small_batches();
    options.metrics_path = Some(metrics_path.clone());
    transfer(
        "generate:4",
        &out.display().to_string(),
        &["overwrite:name=redacted"],
        options,
    )
    .await
    .unwrap();
    let parsed: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&metrics_path).unwrap()).unwrap();
    assert_eq!(parsed["read_count"], 4);
    assert_eq!(parsed["write_count"], 4);
    assert_eq!(parsed["transformer_stats"]["overwrite"], 4);
    assert!(parsed["start_time"].as_str().unwrap().contains('T'));
}
