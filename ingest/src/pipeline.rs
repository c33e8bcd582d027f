use crate::clean::{clean, CleanRecord};
use crate::load::{LoadError, LoadOutcome, Loader};
use crate::reader::RecordSource;
use crate::record::RawRecord;
use crate::reject::RejectSink;
use crate::report::{RunReporter, SourceStats};
use crate::retry::RetryPolicy;
use crate::schema::{SchemaError, SchemaRegistry};
use crate::validate::validate;

/// Drives raw records from sources through validation, cleaning, and
/// loading, routing every rejection to the sink and every outcome to the
/// reporter. Sources are processed sequentially so counters and rejection
/// ordering stay deterministic.
pub struct Pipeline<'a> {
    registry: &'a SchemaRegistry,
    loader: &'a Loader,
    sink: &'a (dyn RejectSink + Send + Sync),
    retry_policy: RetryPolicy,
    max_attempts: u32,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        registry: &'a SchemaRegistry,
        loader: &'a Loader,
        sink: &'a (dyn RejectSink + Send + Sync),
        retry_policy: RetryPolicy,
        max_attempts: u32,
    ) -> Self {
        Self {
            registry,
            loader,
            sink,
            retry_policy,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Process every source. A source whose table has no registered rules
    /// is a configuration error and aborts before any record is read.
    pub async fn run(
        &self,
        sources: &[Box<dyn RecordSource>],
        reporter: &mut RunReporter,
    ) -> Result<(), SchemaError> {
        for source in sources {
            self.registry.rules_for(source.table())?;
        }

        for source in sources {
            let stats = self.process_source(source.as_ref()).await;
            reporter.merge(source.name(), stats);
        }

        Ok(())
    }

    async fn process_source(&self, source: &dyn RecordSource) -> SourceStats {
        let mut stats = SourceStats::default();

        // checked up front in run()
        let rules = match self.registry.rules_for(source.table()) {
            Ok(rules) => rules,
            Err(error) => {
                tracing::error!(source = source.name(), %error, "skipping source");
                return stats;
            }
        };

        tracing::info!(source = source.name(), "reading records");
        let records = match source.read() {
            Ok(records) => records,
            Err(error) => {
                tracing::error!(source = source.name(), %error, "failed to read source");
                return stats;
            }
        };
        stats.read = records.len() as u64;
        tracing::info!(source = source.name(), count = records.len(), "read records");

        let labels = [("source", source.name().to_owned())];
        metrics::counter!("ingest_records_read_total", &labels).increment(stats.read);

        for record in &records {
            let result = validate(record, rules);
            if !result.is_valid() {
                let reason = result.reason();
                tracing::warn!(source = source.name(), reason = %reason, "record failed validation");
                self.write_rejection(record, &reason).await;
                stats.rejected += 1;
                metrics::counter!("ingest_records_rejected_total", &labels).increment(1);
                continue;
            }
            stats.accepted += 1;

            let cleaned = match clean(record, source.table()) {
                Ok(cleaned) => cleaned,
                Err(error) => {
                    // only reachable when a record bypasses validation
                    stats.accepted -= 1;
                    stats.rejected += 1;
                    self.write_rejection(record, &format!("cleaning error: {error}"))
                        .await;
                    continue;
                }
            };

            match self.load_with_retry(&cleaned).await {
                Ok(outcome) => {
                    stats.loaded += 1;
                    metrics::counter!("ingest_records_loaded_total", &labels).increment(1);
                    tracing::debug!(
                        source = source.name(),
                        person = %cleaned.person.name,
                        outcome = ?outcome,
                        "loaded record"
                    );
                }
                Err(error) => {
                    stats.load_failed += 1;
                    metrics::counter!("ingest_records_load_failed_total", &labels).increment(1);
                    self.write_rejection(record, &format!("load failure: {error}"))
                        .await;
                }
            }
        }

        tracing::info!(
            source = source.name(),
            read = stats.read,
            accepted = stats.accepted,
            loaded = stats.loaded,
            rejected = stats.total_rejected(),
            "source complete"
        );

        stats
    }

    async fn load_with_retry(&self, record: &CleanRecord) -> Result<LoadOutcome, LoadError> {
        let mut attempt = 0;
        loop {
            match self.loader.load(record).await {
                Ok(outcome) => return Ok(outcome),
                Err(error) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(error);
                    }
                    let interval = self.retry_policy.retry_interval(attempt);
                    tracing::warn!(
                        %error,
                        attempt,
                        interval_ms = interval.as_millis() as u64,
                        "load failed, retrying"
                    );
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }

    async fn write_rejection(&self, record: &RawRecord, reason: &str) {
        if let Err(error) = self.sink.reject(record, reason).await {
            tracing::error!(source = %record.source, %error, "failed to record rejection");
        }
    }
}
