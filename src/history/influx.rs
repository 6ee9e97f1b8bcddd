//! InfluxDB v2 history sink.
//!
//! Points are queued on an unbounded channel and written in batches by a
//! background task, so recording never waits on the network. The task
//! flushes on a short tick, when a batch fills up, and once more when the
//! cancellation token fires.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{HEARTBEAT_MEASUREMENT, HistoryPoint, HistoryRow, HistorySink};
use crate::error::PersistenceError;

/// Lines accumulated before an early flush.
const MAX_BATCH_LINES: usize = 500;

/// Flush period for partially filled batches.
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Timeout for a single write or query request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for an InfluxDB v2 instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfluxConfig {
    /// Base URL, e.g. `http://localhost:8086`.
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
}

impl InfluxConfig {
    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.url.trim_end_matches('/'), path)
    }
}

/// History sink backed by InfluxDB.
pub struct InfluxHistory {
    config: Arc<InfluxConfig>,
    client: reqwest::Client,
    tx: mpsc::UnboundedSender<String>,
}

impl InfluxHistory {
    /// Create the sink and spawn its writer task.
    ///
    /// The returned handle completes after `cancel` fires and the final
    /// batch has been written.
    pub fn spawn(
        config: InfluxConfig,
        cancel: CancellationToken,
    ) -> Result<(Self, JoinHandle<()>), PersistenceError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let config = Arc::new(config);
        let (tx, rx) = mpsc::unbounded_channel();

        let writer = BatchWriter {
            config: Arc::clone(&config),
            client: client.clone(),
        };
        let handle = tokio::spawn(writer.run(rx, cancel));

        tracing::info!(url = %config.url, bucket = %config.bucket, "History store attached");
        Ok((Self { config, client, tx }, handle))
    }

    fn latest_status_query(&self) -> String {
        format!(
            "from(bucket: \"{}\")\n  |> range(start: -24h)\n  |> filter(fn: (r) => r._measurement == \"{}\")\n  |> last()",
            self.config.bucket, HEARTBEAT_MEASUREMENT
        )
    }
}

#[async_trait]
impl HistorySink for InfluxHistory {
    fn record(&self, point: HistoryPoint) {
        if self.tx.send(point.to_line_protocol()).is_err() {
            tracing::warn!(
                measurement = point.measurement,
                "History writer stopped, dropping point"
            );
        }
    }

    async fn latest_status(&self) -> Result<Vec<HistoryRow>, PersistenceError> {
        let response = self
            .client
            .post(self.config.endpoint("/api/v2/query"))
            .query(&[("org", self.config.org.as_str())])
            .header("Authorization", format!("Token {}", self.config.token))
            .header("Content-Type", "application/vnd.flux")
            .header("Accept", "application/csv")
            .body(self.latest_status_query())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(PersistenceError::Status {
                status: status.as_u16(),
                body,
            });
        }
        parse_annotated_csv(&body)
    }
}

struct BatchWriter {
    config: Arc<InfluxConfig>,
    client: reqwest::Client,
}

impl BatchWriter {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<String>, cancel: CancellationToken) {
        let mut batch: Vec<String> = Vec::new();
        let mut tick = tokio::time::interval(FLUSH_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                line = rx.recv() => match line {
                    Some(line) => {
                        batch.push(line);
                        if batch.len() >= MAX_BATCH_LINES {
                            self.flush(&mut batch).await;
                        }
                    }
                    None => break,
                },
                _ = tick.tick() => self.flush(&mut batch).await,
            }
        }

        while let Ok(line) = rx.try_recv() {
            batch.push(line);
        }
        self.flush(&mut batch).await;
        tracing::debug!("History writer stopped");
    }

    async fn flush(&self, batch: &mut Vec<String>) {
        if batch.is_empty() {
            return;
        }
        let lines = std::mem::take(batch);
        if let Err(e) = self.write(&lines).await {
            tracing::warn!(error = %e, points = lines.len(), "Failed to persist history points");
        }
    }

    async fn write(&self, lines: &[String]) -> Result<(), PersistenceError> {
        let response = self
            .client
            .post(self.config.endpoint("/api/v2/write"))
            .query(&[
                ("org", self.config.org.as_str()),
                ("bucket", self.config.bucket.as_str()),
                ("precision", "ms"),
            ])
            .header("Authorization", format!("Token {}", self.config.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(lines.join("\n"))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(PersistenceError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// Parse an InfluxDB CSV query reply into rows.
///
/// Annotation lines (`#group`, `#datatype`, ...) are skipped. A blank line
/// ends a table; the next non-annotation line is the new table's header.
/// Columns with an empty name (the leading annotation column) are dropped.
pub fn parse_annotated_csv(body: &str) -> Result<Vec<HistoryRow>, PersistenceError> {
    let mut rows = Vec::new();
    let mut header: Option<Vec<String>> = None;

    for raw in body.lines() {
        let line = raw.trim_end_matches('\r');
        if line.is_empty() {
            header = None;
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let cells = split_csv_line(line)?;
        match &header {
            None => header = Some(cells),
            Some(columns) => {
                if cells.len() != columns.len() {
                    return Err(PersistenceError::Query(format!(
                        "row has {} cells, header has {}",
                        cells.len(),
                        columns.len()
                    )));
                }
                let row: HistoryRow = columns
                    .iter()
                    .zip(cells)
                    .filter(|(name, _)| !name.is_empty())
                    .map(|(name, value)| (name.clone(), value))
                    .collect();
                rows.push(row);
            }
        }
    }

    Ok(rows)
}

fn split_csv_line(line: &str) -> Result<Vec<String>, PersistenceError> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if current.is_empty() => in_quotes = true,
            ',' if !in_quotes => cells.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }

    if in_quotes {
        return Err(PersistenceError::Query(format!(
            "unterminated quoted value in: {}",
            line
        )));
    }
    cells.push(current);
    Ok(cells)
}
