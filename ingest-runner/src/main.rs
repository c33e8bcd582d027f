//! Run the measurement ingestion pipeline over the configured CSV sources.
use envconfig::Envconfig;
use eyre::WrapErr;

use ingest::config::Config;
use ingest::load::Loader;
use ingest::pipeline::Pipeline;
use ingest::reader::{CsvSource, RecordSource};
use ingest::reject::{PgRejectionSink, PrintSink, RejectSink};
use ingest::report::{RunReporter, RunSummary};
use ingest::retry::RetryPolicy;
use ingest::schema::SchemaRegistry;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().wrap_err("failed to load configuration from env")?;

    // Rule problems must abort before any I/O against the target store.
    let registry = SchemaRegistry::load(config.schema_rules_path.as_deref())
        .wrap_err("failed to load validation rules")?;

    let loader = Loader::new(
        &config.database_url,
        config.max_pg_connections,
        config.db_acquire_timeout.0,
    )
    .await
    .wrap_err("failed to connect to database")?;

    let sink: Box<dyn RejectSink + Send + Sync> = if config.print_rejections {
        Box::new(PrintSink {})
    } else {
        Box::new(PgRejectionSink::new(loader.pool().clone()))
    };

    let retry_policy = RetryPolicy::new(
        config.retry_policy.backoff_coefficient,
        config.retry_policy.initial_interval.0,
        Some(config.retry_policy.maximum_interval.0),
    );

    let sources: Vec<Box<dyn RecordSource>> = vec![
        Box::new(CsvSource::new(
            "behavioral",
            "measurements_behavioral",
            &config.behavioral_csv,
        )),
        Box::new(CsvSource::new(
            "cognitive",
            "measurements_cognitive",
            &config.cognitive_csv,
        )),
        Box::new(CsvSource::new(
            "external",
            "measurements_external",
            &config.external_csv,
        )),
    ];

    let pipeline = Pipeline::new(
        &registry,
        &loader,
        sink.as_ref(),
        retry_policy,
        config.retry_policy.max_attempts,
    );

    let mut reporter = RunReporter::new();
    tracing::info!(run_id = %reporter.run_id(), "starting ingestion run");

    pipeline.run(&sources, &mut reporter).await?;

    let table_counts = match loader.table_counts().await {
        Ok(counts) => Some(counts),
        Err(error) => {
            tracing::warn!(%error, "failed to fetch final table counts");
            None
        }
    };

    render_summary(&reporter.summarize(table_counts));

    Ok(())
}

fn render_summary(summary: &RunSummary) {
    tracing::info!(
        run_id = %summary.run_id,
        duration_secs = summary.duration.as_secs_f64(),
        "pipeline complete"
    );
    tracing::info!(
        read = summary.totals.read,
        accepted = summary.totals.accepted,
        loaded = summary.totals.loaded,
        rejected = summary.totals.total_rejected(),
        "totals"
    );
    for (source, stats) in &summary.sources {
        tracing::info!(
            source = %source,
            read = stats.read,
            accepted = stats.accepted,
            loaded = stats.loaded,
            rejected = stats.total_rejected(),
            "source totals"
        );
    }
    if let Some(counts) = &summary.table_counts {
        tracing::info!(
            persons = counts.persons,
            measurements = counts.measurements,
            rejected_records = counts.rejected_records,
            "table counts"
        );
    }
}
