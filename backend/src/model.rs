use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// 1. INPUT: Sensor samples (one vector per sensor kind per tick)
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    #[serde(alias = "accel")]
    Accelerometer,
    #[serde(alias = "gyro")]
    Gyroscope,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct SensorSample {
    pub kind: SensorKind,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(rename = "t")]
    pub timestamp: i64, // milliseconds, monotonic per kind
}

impl SensorSample {
    pub fn accel(timestamp: i64, x: f64, y: f64, z: f64) -> Self {
        Self { kind: SensorKind::Accelerometer, x, y, z, timestamp }
    }

    pub fn gyro(timestamp: i64, x: f64, y: f64, z: f64) -> Self {
        Self { kind: SensorKind::Gyroscope, x, y, z, timestamp }
    }

    /// Euclidean norm of the vector.
    pub fn magnitude(&self) -> f64 {
        (self.x.powi(2) + self.y.powi(2) + self.z.powi(2)).sqrt()
    }
}

// 2. DETECTION: the only output of the classifier
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum AccidentKind {
    HighImpact,
    Rollover,
}

impl AccidentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccidentKind::HighImpact => "HighImpact",
            AccidentKind::Rollover => "Rollover",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct AccidentEvent {
    pub kind: AccidentKind,
    pub at_time: i64,
}

// 3. ESCALATION: state snapshot handed to readers
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum ResolveReason {
    UserSafe,
    Expired,
}

impl ResolveReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolveReason::UserSafe => "UserSafe",
            ResolveReason::Expired => "Expired",
        }
    }
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "state")]
pub enum EscalationState {
    Idle,
    Counting {
        deadline: DateTime<Utc>,
        remaining_seconds: u32,
    },
    Resolved {
        reason: ResolveReason,
    },
    Cooldown {
        until: DateTime<Utc>,
    },
}

/// Fired exactly once when a countdown expires unresolved.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct EscalationCommand {
    /// `None` when the host started the countdown without a detection.
    pub detection: Option<AccidentEvent>,
    pub countdown_seconds: u32,
    pub escalated_at: DateTime<Utc>,
}

// 4. OUTPUT: what a session publishes to its observers
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionEvent {
    Detected {
        event: AccidentEvent,
    },
    CountdownStarted {
        detection: Option<AccidentEvent>,
        deadline: DateTime<Utc>,
        remaining_seconds: u32,
    },
    Progress {
        remaining_seconds: u32,
    },
    Resolved {
        reason: ResolveReason,
    },
    Escalated {
        command: EscalationCommand,
    },
    EscalationFailed {
        reason: String,
    },
    CooldownStarted {
        until: DateTime<Utc>,
    },
    Idle,
}

// 5. INPUT: Client Command (host UI buttons)
#[derive(Debug, Deserialize)]
pub struct ClientCommand {
    pub action: String,
    #[serde(default)]
    pub duration: Option<i64>,
}

// 6. DATABASE: Escalation history row
#[derive(Debug, Serialize, FromRow)]
pub struct EscalationLog {
    pub id: uuid::Uuid,
    pub detection_kind: Option<String>,
    pub detected_at: Option<i64>,
    pub resolved_at: DateTime<Utc>,
    pub outcome: String,
}
