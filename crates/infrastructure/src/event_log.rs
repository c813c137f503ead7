//! PostgreSQL 事件日志

use application::{rank_authors, ApplicationError, AuthorCount, EventLogStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{EventKey, EventKind, EventRecord, NewEventRecord, RecordId, Username};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

fn map_sqlx_err(operation: &'static str) -> impl Fn(sqlx::Error) -> ApplicationError {
    move |err| ApplicationError::store_unavailable(operation, err.to_string())
}

fn invalid_data(operation: &'static str, message: impl Into<String>) -> ApplicationError {
    ApplicationError::store_unavailable(operation, message)
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

#[derive(Debug, FromRow)]
struct EventLogRow {
    id: i64,
    event_key: Uuid,
    text: String,
    author: Option<String>,
    kind: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<EventLogRow> for EventRecord {
    type Error = ApplicationError;

    fn try_from(row: EventLogRow) -> Result<Self, Self::Error> {
        let author = row
            .author
            .map(Username::parse)
            .transpose()
            .map_err(|err| invalid_data("event_log.query_recent", err.to_string()))?;
        let kind = row
            .kind
            .parse::<EventKind>()
            .map_err(|err| invalid_data("event_log.query_recent", err.to_string()))?;
        Ok(EventRecord {
            id: RecordId(row.id),
            key: EventKey(row.event_key),
            text: row.text,
            author,
            kind,
            created_at: row.created_at,
        })
    }
}

#[derive(Clone)]
pub struct PgEventLogStore {
    pool: PgPool,
}

impl PgEventLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventLogStore for PgEventLogStore {
    async fn append(&self, record: NewEventRecord) -> Result<RecordId, ApplicationError> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO event_log (event_key, text, author, kind, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(record.key.0)
        .bind(&record.text)
        .bind(record.author.as_ref().map(Username::as_str))
        .bind(record.kind.as_str())
        .bind(record.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err("event_log.append"))?;
        Ok(RecordId(id))
    }

    async fn query_recent(&self, limit: u32) -> Result<Vec<EventRecord>, ApplicationError> {
        let rows = sqlx::query_as::<_, EventLogRow>(
            r#"
            SELECT id, event_key, text, author, kind, created_at
            FROM event_log
            ORDER BY created_at DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err("event_log.query_recent"))?;

        rows.into_iter().map(EventRecord::try_from).collect()
    }

    async fn count_chat_by_author(&self) -> Result<Vec<AuthorCount>, ApplicationError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT author, COUNT(*) AS count
            FROM event_log
            WHERE kind = 'chat' AND author IS NOT NULL
            GROUP BY author
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err("event_log.count_chat_by_author"))?;

        let mut counts = rows
            .into_iter()
            .map(|(author, count)| {
                let username = Username::parse(author).map_err(|err| {
                    invalid_data("event_log.count_chat_by_author", err.to_string())
                })?;
                Ok(AuthorCount {
                    username,
                    count: count as u64,
                })
            })
            .collect::<Result<Vec<_>, ApplicationError>>()?;
        // 数据库排序规则与名字的字节序不一定相同
        rank_authors(&mut counts);
        Ok(counts)
    }
}
