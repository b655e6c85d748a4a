//! PostgreSQL snapshot reader
//!
//! Uses a single `PgConnection` rather than a pool: once the connection
//! drops, fetches keep failing until the process is restarted.

use super::{Connector, ReaderError, SnapshotReader, TableName};
use crate::config::DatabaseConfig;
use async_trait::async_trait;
use queue_exporter_shared::QueueRow;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::{Connection, Row};
use std::time::Duration;

/// Upper bound for a single connection attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const APPLICATION_NAME: &str = "queue-exporter";

/// Query reading the whole queue table.
///
/// Columns are cast server side so any integer or text `index` and any
/// integer `starttime` decode the same way.
pub fn snapshot_query(table: &TableName) -> String {
    format!(
        "SELECT index::text AS index, requesturi::text AS requesturi, \
         status::text AS status, starttime::bigint AS starttime FROM {table}"
    )
}

fn decode_row(row: &PgRow) -> Result<QueueRow, sqlx::Error> {
    Ok(queue_row(
        row.try_get("index")?,
        row.try_get("requesturi")?,
        row.try_get("status")?,
        row.try_get("starttime")?,
    ))
}

/// Build a row from nullable columns.
///
/// A NULL `index` or `requesturi` becomes the empty string, so the row is
/// still counted under the empty category. Status and start time stay
/// mandatory: without them the row cannot be classified.
fn queue_row(
    index: Option<String>,
    request_uri: Option<String>,
    status: String,
    start_time_ms: i64,
) -> QueueRow {
    QueueRow::new(
        index.unwrap_or_default(),
        request_uri.unwrap_or_default(),
        status,
        start_time_ms,
    )
}

/// Connects to PostgreSQL with the configured credentials.
pub struct PgConnector {
    options: PgConnectOptions,
    query: String,
    target: String,
}

impl PgConnector {
    pub fn new(config: &DatabaseConfig, table: &TableName) -> Self {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.username)
            .password(&config.password)
            .application_name(APPLICATION_NAME);

        Self {
            options,
            query: snapshot_query(table),
            target: config.describe(),
        }
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Reader = PgSnapshotReader;

    async fn connect(&self) -> Result<PgSnapshotReader, ReaderError> {
        let conn = tokio::time::timeout(CONNECT_TIMEOUT, PgConnection::connect_with(&self.options))
            .await
            .map_err(|_| ReaderError::ConnectTimeout(CONNECT_TIMEOUT.as_secs()))??;

        Ok(PgSnapshotReader {
            conn,
            query: self.query.clone(),
        })
    }

    fn describe(&self) -> String {
        self.target.clone()
    }
}

/// An open PostgreSQL connection reading the queue table.
pub struct PgSnapshotReader {
    conn: PgConnection,
    query: String,
}

#[async_trait]
impl SnapshotReader for PgSnapshotReader {
    async fn fetch(&mut self) -> Result<Vec<QueueRow>, ReaderError> {
        let rows = sqlx::query(&self.query).fetch_all(&mut self.conn).await?;
        let rows = rows
            .iter()
            .map(decode_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn close(self) -> Result<(), ReaderError> {
        self.conn.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue_exporter_shared::JobStatus;

    fn config() -> DatabaseConfig {
        DatabaseConfig {
            host: "db.internal".to_string(),
            port: 5433,
            database: "jobs".to_string(),
            username: "exporter".to_string(),
            password: "secret".to_string(),
        }
    }

    #[test]
    fn test_snapshot_query_reads_all_columns() {
        let table: TableName = "hydro.queue".parse().unwrap();
        assert_eq!(
            snapshot_query(&table),
            "SELECT index::text AS index, requesturi::text AS requesturi, \
             status::text AS status, starttime::bigint AS starttime FROM hydro.queue"
        );
    }

    #[test]
    fn test_null_index_and_uri_keep_the_row() {
        let row = queue_row(None, None, "InProgress".to_string(), 1_000);
        assert_eq!(row.index, "");
        assert_eq!(row.request_uri, "");
        assert_eq!(row.status, JobStatus::InProgress);
        assert_eq!(row.start_time_ms, 1_000);

        let row = queue_row(
            Some("7".to_string()),
            Some("/run".to_string()),
            "Failed".to_string(),
            0,
        );
        assert_eq!(row.index, "7");
        assert_eq!(row.request_uri, "/run");
    }

    #[test]
    fn test_connector_describes_target_without_password() {
        let table: TableName = "queue".parse().unwrap();
        let connector = PgConnector::new(&config(), &table);
        let target = connector.describe();
        assert_eq!(target, "db.internal:5433/jobs as user exporter");
        assert!(!target.contains("secret"));
    }
}
