//! SQL Server connection implementation using tiberius

use async_trait::async_trait;
use sprocket_core::{
    CatalogIntrospection, ColumnMeta, Connection, Connector, QueryResult, Result, Row,
    SprocketError, TenantConnectionConfig, Value,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, Row as TiberiusRow};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

/// SQL Server connection errors
#[derive(Debug, thiserror::Error)]
pub enum MssqlConnectionError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Tiberius error: {0}")]
    Tiberius(#[from] tiberius::error::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<MssqlConnectionError> for SprocketError {
    fn from(err: MssqlConnectionError) -> Self {
        SprocketError::Engine(sprocket_core::ParsedEngineError::message_only(
            err.to_string(),
        ))
    }
}

/// A live SQL Server connection.
///
/// The tiberius client is serialized behind a tokio mutex; the registry
/// hands out one `MssqlConnection` per tenant, so concurrent requests for
/// a tenant queue on this lock rather than opening new sockets.
pub struct MssqlConnection {
    client: Mutex<Client<Compat<TcpStream>>>,
    closed: AtomicBool,
    database: String,
}

impl MssqlConnection {
    /// Open a connection from a tenant's stored config.
    ///
    /// The TCP connect and TDS handshake together are bounded by the
    /// config's `connect_timeout_ms`.
    #[tracing::instrument(skip(config), fields(host = %config.host, database = %config.database))]
    pub async fn connect(
        config: &TenantConnectionConfig,
    ) -> std::result::Result<Self, MssqlConnectionError> {
        tracing::debug!("connecting to SQL Server");

        let mut tds = Config::new();
        tds.host(&config.host);
        tds.port(config.effective_port());
        tds.database(&config.database);
        tds.authentication(AuthMethod::sql_server(&config.username, &config.password));

        if config.encrypt {
            tds.encryption(EncryptionLevel::Required);
            // Tenant servers rarely present CA-signed certificates.
            tds.trust_cert();
        } else {
            tds.encryption(EncryptionLevel::NotSupported);
        }

        let timeout = Duration::from_millis(config.connect_timeout_ms.max(1));
        let addr = tds.get_addr();

        let client = tokio::time::timeout(timeout, async {
            let tcp = TcpStream::connect(addr)
                .await
                .map_err(|e| MssqlConnectionError::ConnectionFailed(e.to_string()))?;
            tcp.set_nodelay(true)?;

            Client::connect(tds, tcp.compat_write())
                .await
                .map_err(|e| MssqlConnectionError::ConnectionFailed(e.to_string()))
        })
        .await
        .map_err(|_| MssqlConnectionError::ConnectTimeout(timeout))??;

        tracing::debug!("connected to SQL Server");

        Ok(Self {
            client: Mutex::new(client),
            closed: AtomicBool::new(false),
            database: config.database.clone(),
        })
    }

    /// Database this connection is scoped to
    pub fn database(&self) -> &str {
        &self.database
    }

    fn ensure_not_closed(&self) -> std::result::Result<(), MssqlConnectionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MssqlConnectionError::ConnectionClosed);
        }
        Ok(())
    }

    pub(crate) async fn run_query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.ensure_not_closed()?;
        let start = std::time::Instant::now();

        let mut client = self.client.lock().await;

        let stream = if params.is_empty() {
            client.query(sql, &[]).await
        } else {
            let owned = values_to_params(params);
            let refs: Vec<&dyn tiberius::ToSql> =
                owned.iter().map(|p| p as &dyn tiberius::ToSql).collect();
            client.query(sql, &refs[..]).await
        };

        let tib_rows = stream
            .map_err(|e| engine_error(&e))?
            .into_first_result()
            .await
            .map_err(|e| engine_error(&e))?;

        let mut columns: Vec<ColumnMeta> = Vec::new();
        if let Some(first_row) = tib_rows.first() {
            columns = first_row
                .columns()
                .iter()
                .enumerate()
                .map(|(ordinal, col)| ColumnMeta {
                    name: col.name().to_string(),
                    data_type: format!("{:?}", col.column_type()),
                    ordinal,
                })
                .collect();
        }

        let column_names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let mut rows: Vec<Row> = Vec::with_capacity(tib_rows.len());
        for tib_row in tib_rows {
            rows.push(Row::new(column_names.clone(), row_to_values(tib_row)?));
        }

        let execution_time_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(
            row_count = rows.len(),
            duration_ms = execution_time_ms,
            "query completed"
        );

        Ok(QueryResult {
            columns,
            rows,
            affected_rows: 0,
            execution_time_ms,
        })
    }
}

#[async_trait]
impl Connection for MssqlConnection {
    fn driver_name(&self) -> &str {
        "mssql"
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.run_query(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.ensure_not_closed()?;
        let start = std::time::Instant::now();

        let mut client = self.client.lock().await;

        let result = if params.is_empty() {
            client.execute(sql, &[]).await
        } else {
            let owned = values_to_params(params);
            let refs: Vec<&dyn tiberius::ToSql> =
                owned.iter().map(|p| p as &dyn tiberius::ToSql).collect();
            client.execute(sql, &refs[..]).await
        };

        match result {
            Ok(exec) => {
                let affected = exec.rows_affected().iter().sum::<u64>();
                tracing::debug!(
                    affected_rows = affected,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "execute completed"
                );
                Ok(affected)
            }
            Err(e) => {
                tracing::debug!(error = %e, "execute failed");
                Err(engine_error(&e))
            }
        }
    }

    async fn batch(&self, sql: &str) -> Result<()> {
        self.ensure_not_closed()?;
        let mut client = self.client.lock().await;

        // simple_query sends a raw TDS batch, which is what DDL needs;
        // the stream must be drained before the client is reusable.
        client
            .simple_query(sql)
            .await
            .map_err(|e| engine_error(&e))?
            .into_results()
            .await
            .map_err(|e| engine_error(&e))?;

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        tracing::debug!("SQL Server connection closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn as_catalog(&self) -> Option<&dyn CatalogIntrospection> {
        Some(self)
    }
}

fn engine_error(e: &tiberius::error::Error) -> SprocketError {
    SprocketError::Engine(sprocket_core::ParsedEngineError::message_only(
        e.to_string(),
    ))
}

/// Convert a tiberius row to values by consuming the row
fn row_to_values(row: TiberiusRow) -> Result<Vec<Value>> {
    let mut values = Vec::new();
    for col_data in row.into_iter() {
        values.push(column_data_to_value(col_data)?);
    }
    Ok(values)
}

/// Convert tiberius ColumnData to a core Value
pub(crate) fn column_data_to_value(col_data: ColumnData<'static>) -> Result<Value> {
    let value = match col_data {
        ColumnData::Bit(v) => v.map(Value::Bool).unwrap_or(Value::Null),
        ColumnData::U8(v) => v.map(|n| Value::Int16(n as i16)).unwrap_or(Value::Null),
        ColumnData::I16(v) => v.map(Value::Int16).unwrap_or(Value::Null),
        ColumnData::I32(v) => v.map(Value::Int32).unwrap_or(Value::Null),
        ColumnData::I64(v) => v.map(Value::Int64).unwrap_or(Value::Null),
        ColumnData::F32(v) => v.map(Value::Float32).unwrap_or(Value::Null),
        ColumnData::F64(v) => v.map(Value::Float64).unwrap_or(Value::Null),
        ColumnData::String(v) => v
            .map(|s| Value::String(s.into_owned()))
            .unwrap_or(Value::Null),
        ColumnData::Guid(v) => v.map(Value::Uuid).unwrap_or(Value::Null),
        ColumnData::Binary(v) => v
            .map(|b| Value::Bytes(b.into_owned()))
            .unwrap_or(Value::Null),
        ColumnData::Numeric(v) => v
            .map(|n| Value::Decimal(n.to_string()))
            .unwrap_or(Value::Null),
        ColumnData::Xml(v) => v
            .map(|x| Value::String(x.into_owned().into_string()))
            .unwrap_or(Value::Null),
        ColumnData::DateTime(v) => match v {
            Some(dt) => Value::DateTime(legacy_datetime(dt.days() as i64, {
                // Fragments are 1/300ths of a second.
                (dt.seconds_fragments() as f64 / 300.0) as u32
            })),
            None => Value::Null,
        },
        ColumnData::SmallDateTime(v) => match v {
            Some(dt) => Value::DateTime(legacy_datetime(
                dt.days() as i64,
                dt.seconds_fragments() as u32 * 60,
            )),
            None => Value::Null,
        },
        ColumnData::DateTime2(v) => match v {
            Some(dt) => Value::DateTime(datetime2_to_naive(&dt)),
            None => Value::Null,
        },
        ColumnData::DateTimeOffset(v) => match v {
            Some(dto) => {
                let naive = datetime2_to_naive(&dto.datetime2());
                Value::DateTimeUtc(chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(
                    naive,
                    chrono::Utc,
                ))
            }
            None => Value::Null,
        },
        ColumnData::Date(v) => match v {
            Some(d) => Value::Date(ce_date(d.days() as i64)),
            None => Value::Null,
        },
        ColumnData::Time(v) => match v {
            Some(t) => Value::Time(time_from_increments(t.increments())),
            None => Value::Null,
        },
    };
    Ok(value)
}

// datetime/smalldatetime count days from 1900-01-01.
fn legacy_datetime(days: i64, seconds: u32) -> chrono::NaiveDateTime {
    let date = chrono::NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or_default()
        + chrono::Duration::days(days);
    let time =
        chrono::NaiveTime::from_num_seconds_from_midnight_opt(seconds, 0).unwrap_or_default();
    chrono::NaiveDateTime::new(date, time)
}

// date/datetime2 count days from 0001-01-01.
fn ce_date(days: i64) -> chrono::NaiveDate {
    chrono::NaiveDate::from_ymd_opt(1, 1, 1).unwrap_or_default() + chrono::Duration::days(days)
}

fn time_from_increments(increments: u64) -> chrono::NaiveTime {
    chrono::NaiveTime::from_num_seconds_from_midnight_opt(
        (increments / 10_000_000) as u32,
        ((increments % 10_000_000) * 100) as u32,
    )
    .unwrap_or_default()
}

fn datetime2_to_naive(dt: &tiberius::time::DateTime2) -> chrono::NaiveDateTime {
    chrono::NaiveDateTime::new(
        ce_date(dt.date().days() as i64),
        time_from_increments(dt.time().increments()),
    )
}

/// Owned parameter value implementing tiberius ToSql
#[derive(Debug)]
pub(crate) enum MssqlParam {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
}

impl tiberius::ToSql for MssqlParam {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            MssqlParam::Null => ColumnData::I32(None),
            MssqlParam::Bool(v) => ColumnData::Bit(Some(*v)),
            MssqlParam::I16(v) => ColumnData::I16(Some(*v)),
            MssqlParam::I32(v) => ColumnData::I32(Some(*v)),
            MssqlParam::I64(v) => ColumnData::I64(Some(*v)),
            MssqlParam::F32(v) => ColumnData::F32(Some(*v)),
            MssqlParam::F64(v) => ColumnData::F64(Some(*v)),
            MssqlParam::String(v) => ColumnData::String(Some(std::borrow::Cow::Borrowed(v))),
            MssqlParam::Bytes(v) => ColumnData::Binary(Some(std::borrow::Cow::Borrowed(v))),
            MssqlParam::Uuid(v) => ColumnData::Guid(Some(*v)),
        }
    }
}

/// Convert core Values to owned tiberius parameters
pub(crate) fn values_to_params(values: &[Value]) -> Vec<MssqlParam> {
    values
        .iter()
        .map(|v| match v {
            Value::Null => MssqlParam::Null,
            Value::Bool(b) => MssqlParam::Bool(*b),
            Value::Int16(i) => MssqlParam::I16(*i),
            Value::Int32(i) => MssqlParam::I32(*i),
            Value::Int64(i) => MssqlParam::I64(*i),
            Value::Float32(f) => MssqlParam::F32(*f),
            Value::Float64(f) => MssqlParam::F64(*f),
            Value::Decimal(d) => MssqlParam::String(d.clone()),
            Value::String(s) => MssqlParam::String(s.clone()),
            Value::Bytes(b) => MssqlParam::Bytes(b.clone()),
            Value::Uuid(u) => MssqlParam::Uuid(*u),
            Value::Date(d) => MssqlParam::String(d.to_string()),
            Value::Time(t) => MssqlParam::String(t.to_string()),
            Value::DateTime(dt) => MssqlParam::String(dt.to_string()),
            Value::DateTimeUtc(dt) => MssqlParam::String(dt.to_rfc3339()),
            Value::Json(j) => MssqlParam::String(j.to_string()),
        })
        .collect()
}

impl std::fmt::Debug for MssqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlConnection")
            .field("database", &self.database)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

/// Production connector used by the tenant registry
#[derive(Debug, Default)]
pub struct MssqlConnector;

impl MssqlConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for MssqlConnector {
    async fn connect(
        &self,
        tenant_id: uuid::Uuid,
        config: &TenantConnectionConfig,
    ) -> Result<Arc<dyn Connection>> {
        let conn = MssqlConnection::connect(config)
            .await
            .map_err(|e| SprocketError::connection(tenant_id, e.to_string()))?;
        Ok(Arc::new(conn))
    }
}
