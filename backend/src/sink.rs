use crate::error::SinkError;
use crate::model::{AccidentEvent, EscalationCommand, EscalationLog, ResolveReason};
use log::{info, warn};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::future::Future;
use uuid::Uuid;

/// Receives the escalation command and performs the real-world action.
/// Retry policy, if any, belongs to the implementation.
pub trait EscalationSink: Send + Sync + 'static {
    fn dispatch(
        &self,
        command: &EscalationCommand,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;

    /// Called once per episode that ended without escalating.
    fn record_resolution(
        &self,
        _detection: Option<AccidentEvent>,
        _reason: ResolveReason,
    ) -> impl Future<Output = Result<(), SinkError>> + Send {
        async { Ok(()) }
    }
}

pub struct LogSink;

impl EscalationSink for LogSink {
    async fn dispatch(&self, command: &EscalationCommand) -> Result<(), SinkError> {
        match command.detection {
            Some(event) => warn!(
                "🚨 ESCALATION: {} detected at t={}, no response within {}s",
                event.kind.as_str(),
                event.at_time,
                command.countdown_seconds
            ),
            None => warn!(
                "🚨 ESCALATION: manual countdown of {}s expired",
                command.countdown_seconds
            ),
        }
        Ok(())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS escalations (
    id UUID PRIMARY KEY,
    detection_kind TEXT,
    detected_at BIGINT,
    resolved_at TIMESTAMPTZ NOT NULL,
    outcome TEXT NOT NULL
)
"#;

/// Persists every episode outcome to Postgres; expired episodes are the
/// escalation record downstream alerting reads from.
#[derive(Clone)]
pub struct PgAlertSink {
    db: PgPool,
}

impl PgAlertSink {
    pub async fn connect(database_url: &str) -> Result<Self, SinkError> {
        let db = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(3))
            .connect(database_url)
            .await?;
        sqlx::query(SCHEMA).execute(&db).await?;
        Ok(Self { db })
    }

    pub async fn history(&self, limit: i64) -> Result<Vec<EscalationLog>, SinkError> {
        let logs = sqlx::query_as::<_, EscalationLog>(
            r#"
            SELECT id, detection_kind, detected_at, resolved_at, outcome
            FROM escalations
            ORDER BY resolved_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        Ok(logs)
    }

    async fn insert(
        &self,
        detection: Option<AccidentEvent>,
        resolved_at: chrono::DateTime<chrono::Utc>,
        outcome: ResolveReason,
    ) -> Result<(), SinkError> {
        let result = sqlx::query(
            "INSERT INTO escalations (id, detection_kind, detected_at, resolved_at, outcome) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(Uuid::new_v4())
        .bind(detection.map(|d| d.kind.as_str()))
        .bind(detection.map(|d| d.at_time))
        .bind(resolved_at)
        .bind(outcome.as_str())
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(SinkError::Rejected(format!(
                "no escalation row written for outcome {}",
                outcome.as_str()
            )));
        }
        Ok(())
    }
}

impl EscalationSink for PgAlertSink {
    async fn dispatch(&self, command: &EscalationCommand) -> Result<(), SinkError> {
        self.insert(command.detection, command.escalated_at, ResolveReason::Expired)
            .await?;
        info!("escalation recorded for dispatch");
        Ok(())
    }

    async fn record_resolution(
        &self,
        detection: Option<AccidentEvent>,
        reason: ResolveReason,
    ) -> Result<(), SinkError> {
        self.insert(detection, chrono::Utc::now(), reason).await
    }
}

/// Sink chosen at startup depending on whether a database is configured.
#[derive(Clone)]
pub enum AlertSink {
    Postgres(PgAlertSink),
    Log,
}

impl AlertSink {
    pub fn database(&self) -> Option<&PgAlertSink> {
        match self {
            AlertSink::Postgres(pg) => Some(pg),
            AlertSink::Log => None,
        }
    }
}

impl EscalationSink for AlertSink {
    async fn dispatch(&self, command: &EscalationCommand) -> Result<(), SinkError> {
        // The log line is emitted even when the database write fails.
        LogSink.dispatch(command).await?;
        match self {
            AlertSink::Postgres(pg) => pg.dispatch(command).await,
            AlertSink::Log => Ok(()),
        }
    }

    async fn record_resolution(
        &self,
        detection: Option<AccidentEvent>,
        reason: ResolveReason,
    ) -> Result<(), SinkError> {
        match self {
            AlertSink::Postgres(pg) => pg.record_resolution(detection, reason).await,
            AlertSink::Log => Ok(()),
        }
    }
}
