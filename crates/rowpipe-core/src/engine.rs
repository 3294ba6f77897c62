//! The orchestrator: drives one run end-to-end.
//!
//! Data flow is strictly linear: reader -> sampler -> transformer chain ->
//! per-value guards -> writer. The reader runs in its own task, decoupled
//! from the transform/write loop by a bounded two-batch channel so the source
//! can fill batch N+1 while the sink drains batch N; the channel provides
//! backpressure. Transformers run inline with the consumer to preserve row
//! order and script-engine thread affinity.

use std::collections::BTreeMap;
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::column::{Column, TargetColumn, TargetSchema};
use crate::error::{PipelineError, Result};
use crate::metrics::{ExportMetrics, MetricsCollector};
use crate::options::PipelineOptions;
use crate::reader::StreamReader;
use crate::retry::RetryPolicy;
use crate::transform::TransformerPipeline;
use crate::validate::{check_value, validate_schema, ValueCheck};
use crate::value::{Batch, BatchTx, Message, Row, Value};
use crate::writer::DataWriter;

/// Per-row Bernoulli sampler, applied before the transformer chain.
struct Sampler {
    rate: f64,
    rng: SmallRng,
}

impl Sampler {
    fn from_options(options: &PipelineOptions) -> Option<Self> {
        if options.sampling_rate >= 1.0 {
            return None;
        }
        let rng = match options.sampling_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Some(Self {
            rate: options.sampling_rate.max(0.0),
            rng,
        })
    }

    fn keep(&mut self) -> bool {
        self.rng.gen::<f64>() < self.rate
    }
}

/// Positional per-value guards, resolved once against the target schema.
struct ValueGuard {
    checks: Vec<Option<(TargetColumn, bool)>>,
}

impl ValueGuard {
    fn new(columns: &[Column], target: &TargetSchema) -> Self {
        let checks = columns
            .iter()
            .map(|c| {
                target
                    .column(&c.name)
                    .map(|t| (t.clone(), target.in_primary_key(&c.name)))
            })
            .collect();
        Self { checks }
    }

    /// Check one outgoing row. In strict mode the first violation raises;
    /// otherwise violations are counted and logged.
    fn check(&self, row: &Row, row_index: u64, strict: bool) -> Result<u64> {
        let mut count = 0;
        for (value, check) in row.iter().zip(&self.checks) {
            let Some((column, in_pk)) = check else { continue };
            let c = check_value(value.as_ref(), column, *in_pk);
            if c.is_ok() {
                continue;
            }
            let message = describe_violation(&c);
            if strict {
                return Err(PipelineError::schema_at(message, column.name.clone(), row_index));
            }
            count += 1;
            debug!(column = %column.name, row = row_index, "{message}");
        }
        Ok(count)
    }
}

fn describe_violation(check: &ValueCheck) -> String {
    if check.null_violation {
        "null value for non-nullable column".to_string()
    } else if check.length_violation {
        format!("value length {} exceeds the column maximum", check.actual_length)
    } else {
        format!(
            "integer digits {} exceed the allowed {}",
            check.actual_integer_digits, check.max_integer_digits
        )
    }
}

/// Reader task: pulls batches and feeds the bounded channel until the source
/// is exhausted, the consumer hangs up, or the run is cancelled.
async fn read_loop(
    mut reader: Box<dyn StreamReader>,
    tx: BatchTx,
    cancel: CancellationToken,
    batch_size: usize,
) -> Result<()> {
    let result = async {
        loop {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            match reader.next_batch(batch_size, &cancel).await? {
                Some(batch) => {
                    debug!(rows = batch.len(), "read batch");
                    if tx.send(Message::Batch(batch)).await.is_err() {
                        // Consumer hung up (limit reached); not an error.
                        return Ok(());
                    }
                }
                None => {
                    let _ = tx.send(Message::Eos).await;
                    return Ok(());
                }
            }
        }
    }
    .await;
    let closed = reader.close().await;
    result.and(closed)
}

fn chunk_len(batch_size: usize, limit: u64, written: u64, available: usize) -> usize {
    let take = batch_size.min(available);
    if limit == 0 {
        return take;
    }
    take.min(limit.saturating_sub(written) as usize)
}

fn row_to_json(columns: &[Column], row: &Row) -> serde_json::Value {
    let mut object = serde_json::Map::with_capacity(columns.len());
    for (column, value) in columns.iter().zip(row) {
        let json = match value {
            None => serde_json::Value::Null,
            Some(Value::Int(v)) => serde_json::Value::from(*v),
            Some(Value::Float(v)) => serde_json::Value::from(*v),
            Some(Value::Bool(v)) => serde_json::Value::from(*v),
            Some(other) => serde_json::Value::from(other.render()),
        };
        object.insert(column.name.clone(), json);
    }
    serde_json::Value::Object(object)
}

/// Top-level driver for one export run.
pub struct Orchestrator {
    options: PipelineOptions,
    retry: RetryPolicy,
}

impl Orchestrator {
    pub fn new(options: PipelineOptions) -> Self {
        let retry = RetryPolicy::new(
            options.max_retries,
            Duration::from_millis(options.retry_delay_ms),
        );
        Self { options, retry }
    }

    /// Replace the default retry policy (backend-specific classifiers).
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Execute the run. The cancellation token is threaded into the reader,
    /// the writer, retry sleeps, and hook execution.
    ///
    /// Metrics are always emitted: logged at completion, and written as JSON
    /// when `metrics_path` is set, on both the success and the error path.
    pub async fn run(
        &self,
        reader: Box<dyn StreamReader>,
        mut pipeline: TransformerPipeline,
        mut writer: Box<dyn DataWriter>,
        cancel: CancellationToken,
    ) -> Result<ExportMetrics> {
        let mut collector = MetricsCollector::new();
        let outcome = self
            .drive(reader, &mut pipeline, &mut writer, &mut collector, &cancel)
            .await;

        match &outcome {
            Ok(()) => {
                self.run_hook(&mut writer, "post_exec", &self.options.post_exec, &cancel, false)
                    .await
                    .ok();
            }
            Err(e) => {
                error!(error = %e, "run failed");
                if !e.is_cancelled() {
                    self.run_hook(
                        &mut writer,
                        "on_error_exec",
                        &self.options.on_error_exec,
                        &cancel,
                        false,
                    )
                    .await
                    .ok();
                }
            }
        }
        self.run_hook(&mut writer, "finally_exec", &self.options.finally_exec, &cancel, false)
            .await
            .ok();

        let stats: BTreeMap<String, u64> = pipeline.stats().into_iter().collect();
        pipeline.teardown();
        let metrics = collector.finish(stats);
        if !self.options.no_stats {
            info!(
                read = metrics.read_count,
                written = metrics.write_count,
                rows_per_sec = metrics.overall_throughput_rows_per_sec as u64,
                "export finished"
            );
        }
        if let Some(path) = &self.options.metrics_path {
            if let Err(e) = metrics.write_json(path) {
                warn!(error = %e, "failed to write the metrics file");
            }
        }
        outcome.map(|()| metrics)
    }

    async fn drive(
        &self,
        mut reader: Box<dyn StreamReader>,
        pipeline: &mut TransformerPipeline,
        writer: &mut Box<dyn DataWriter>,
        collector: &mut MetricsCollector,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.run_hook(writer, "pre_exec", &self.options.pre_exec, cancel, true)
            .await?;

        match self.options.connection_timeout {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), reader.open(cancel))
                .await
                .map_err(|_| PipelineError::io("reader open timed out"))??,
            None => reader.open(cancel).await?,
        }
        let source_columns = reader.columns().to_vec();
        info!(
            reader = reader.name(),
            columns = source_columns.len(),
            "reader opened"
        );

        let out_columns = pipeline.initialize(&source_columns)?.to_vec();
        writer.initialize(&out_columns, cancel).await?;

        let mut guard = None;
        let target = writer.target_schema().cloned();
        if !self.options.no_schema_validation {
            if let Some(target) = target {
                let report = validate_schema(&out_columns, &target, &self.options);
                for w in &report.warnings {
                    warn!("{w}");
                }
                if !report.is_ok() {
                    if self.options.strict_schema {
                        let _ = writer.complete().await;
                        return Err(PipelineError::schema(report.errors.join("; ")));
                    }
                    for e in &report.errors {
                        warn!("{e}");
                    }
                }
                if !report.auto_migrations.is_empty() {
                    info!(columns = report.auto_migrations.len(), "adding missing target columns");
                    writer.apply_migrations(&report.auto_migrations, cancel).await?;
                }
                guard = Some(ValueGuard::new(&out_columns, &target));
            }
        }

        if self.options.dry_run_count > 0 {
            let printed = self.dry_run(&mut reader, pipeline, cancel).await;
            let _ = reader.close().await;
            let completed = writer.complete().await;
            return printed.and(completed);
        }

        let body = self
            .pump(reader, pipeline, writer, guard.as_ref(), collector, cancel)
            .await;
        match body {
            Ok(()) => writer.complete().await,
            Err(e) => {
                // Never leave the sink dangling; the original error wins.
                let _ = writer.complete().await;
                Err(e)
            }
        }
    }

    /// Read up to `dry_run_count` transformed rows and print them, without
    /// touching the writer.
    async fn dry_run(
        &self,
        reader: &mut Box<dyn StreamReader>,
        pipeline: &mut TransformerPipeline,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let columns = pipeline.columns().to_vec();
        let mut sampler = Sampler::from_options(&self.options);
        let mut printed = 0usize;
        'outer: loop {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let Some(batch) = reader.next_batch(self.options.batch_size, cancel).await? else {
                break;
            };
            for row in batch {
                if let Some(s) = sampler.as_mut() {
                    if !s.keep() {
                        continue;
                    }
                }
                for out in pipeline.apply(row)? {
                    println!("{}", row_to_json(&columns, &out));
                    printed += 1;
                    if printed >= self.options.dry_run_count {
                        break 'outer;
                    }
                }
            }
        }
        info!(rows = printed, "dry run complete, nothing written");
        Ok(())
    }

    async fn flush(
        &self,
        writer: &mut Box<dyn DataWriter>,
        rows: &[Row],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let rows_owned = rows.to_vec();
        let cancel_owned = cancel.clone();
        self.retry
            .run(cancel, writer, move |w| {
                let rows = rows_owned.clone();
                let cancel = cancel_owned.clone();
                Box::pin(async move { w.write_batch(&rows, &cancel).await })
            })
            .await
    }

    async fn pump(
        &self,
        reader: Box<dyn StreamReader>,
        pipeline: &mut TransformerPipeline,
        writer: &mut Box<dyn DataWriter>,
        guard: Option<&ValueGuard>,
        collector: &mut MetricsCollector,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let batch_size = self.options.batch_size.max(1);
        let limit = self.options.limit;
        let reader_cancel = cancel.child_token();
        let (tx, mut rx) = mpsc::channel(2);
        let handle = tokio::spawn(read_loop(reader, tx, reader_cancel.clone(), batch_size));

        let mut sampler = Sampler::from_options(&self.options);
        let mut pending: Vec<Row> = Vec::new();
        let mut written: u64 = 0;
        let mut row_index: u64 = 0;
        let mut violations: u64 = 0;

        let consumed: Result<()> = async {
            loop {
                let message = tokio::select! {
                    _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                    message = rx.recv() => message,
                };
                let batch: Batch = match message {
                    Some(Message::Batch(batch)) => batch,
                    // Eos, or the reader task ended early; its own result
                    // is collected below.
                    Some(Message::Eos) | None => break,
                };
                collector.add_read(batch.len() as u64);
                for row in batch {
                    row_index += 1;
                    if let Some(s) = sampler.as_mut() {
                        if !s.keep() {
                            continue;
                        }
                    }
                    for out in pipeline.apply(row)? {
                        if let Some(g) = guard {
                            violations += g.check(&out, row_index, self.options.strict_schema)?;
                        }
                        pending.push(out);
                    }
                }
                while pending.len() >= batch_size {
                    let take = chunk_len(batch_size, limit, written, pending.len());
                    if take == 0 {
                        return Ok(());
                    }
                    let rows: Vec<Row> = pending.drain(..take).collect();
                    self.flush(writer, &rows, cancel).await?;
                    written += rows.len() as u64;
                    collector.add_written(rows.len() as u64);
                    if limit > 0 && written >= limit {
                        info!(limit, "row limit reached, stopping the reader");
                        return Ok(());
                    }
                }
                collector.sample_memory();
            }
            while !pending.is_empty() {
                let take = chunk_len(batch_size, limit, written, pending.len());
                if take == 0 {
                    break;
                }
                let rows: Vec<Row> = pending.drain(..take).collect();
                self.flush(writer, &rows, cancel).await?;
                written += rows.len() as u64;
                collector.add_written(rows.len() as u64);
            }
            Ok(())
        }
        .await;

        reader_cancel.cancel();
        drop(rx);
        let reader_result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(PipelineError::io(format!("reader task failed: {e}"))),
        };
        if violations > 0 {
            warn!(violations, "value-level schema violations were counted");
        }

        consumed.and_then(|()| match reader_result {
            // We cancelled the reader ourselves after hitting the limit.
            Err(e) if e.is_cancelled() && !cancel.is_cancelled() => Ok(()),
            other => other,
        })
    }

    async fn run_hook(
        &self,
        writer: &mut Box<dyn DataWriter>,
        label: &str,
        command: &Option<String>,
        cancel: &CancellationToken,
        raise: bool,
    ) -> Result<()> {
        let Some(command) = command else { return Ok(()) };
        info!(hook = label, "running hook");
        match writer.execute_command(command, cancel).await {
            Ok(()) => Ok(()),
            Err(e) if raise => Err(e),
            Err(e) => {
                warn!(hook = label, error = %e, "hook failed");
                Ok(())
            }
        }
    }
}
