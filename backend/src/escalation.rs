//! Escalation Coordinator: the countdown state machine between a detection
//! and the escalation command.
//!
//! The coordinator is synchronous and clock-free; callers pass `now` into
//! every operation and receive the [`SessionEvent`] the transition produced.
//! On each tick, cancellation is checked before the countdown is decremented,
//! so a cancel that lands together with the final tick always wins and at
//! most one [`EscalationCommand`] leaves a counting episode.
//!
//! The expiring tick returns only [`SessionEvent::Escalated`]; the session
//! publishes the final `Progress { remaining_seconds: 0 }` ahead of it.

use crate::error::EngineError;
use crate::model::{
    AccidentEvent, EscalationCommand, EscalationState, ResolveReason, SessionEvent,
};
use crate::safety_flag::SafetyFlag;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use std::sync::Arc;

pub const DEFAULT_COUNTDOWN_SECS: u32 = 30;

/// Countdown length in whole seconds, always at least one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownDuration(u32);

impl CountdownDuration {
    pub fn new(seconds: i64) -> Result<Self, EngineError> {
        if seconds < 1 || seconds > u32::MAX as i64 {
            return Err(EngineError::InvalidDuration(seconds));
        }
        Ok(Self(seconds as u32))
    }

    pub fn seconds(&self) -> u32 {
        self.0
    }
}

impl Default for CountdownDuration {
    fn default() -> Self {
        Self(DEFAULT_COUNTDOWN_SECS)
    }
}

// What the current episode was started by.
struct Episode {
    detection: Option<AccidentEvent>,
    duration: CountdownDuration,
}

pub struct EscalationCoordinator {
    state: EscalationState,
    episode: Option<Episode>,
    flag: Arc<dyn SafetyFlag>,
    cooldown: Duration,
}

impl EscalationCoordinator {
    pub fn new(flag: Arc<dyn SafetyFlag>, cooldown: Duration) -> Self {
        Self {
            state: EscalationState::Idle,
            episode: None,
            flag,
            cooldown,
        }
    }

    pub fn state(&self) -> EscalationState {
        self.state
    }

    pub fn is_counting(&self) -> bool {
        matches!(self.state, EscalationState::Counting { .. })
    }

    /// A classifier detection. Ignored unless idle.
    pub fn on_detection(
        &mut self,
        event: AccidentEvent,
        duration: CountdownDuration,
        now: DateTime<Utc>,
    ) -> Option<SessionEvent> {
        self.begin(Some(event), duration, now)
    }

    /// A host-issued countdown with no detection attached.
    pub fn start(&mut self, duration: CountdownDuration, now: DateTime<Utc>) -> Option<SessionEvent> {
        self.begin(None, duration, now)
    }

    fn begin(
        &mut self,
        detection: Option<AccidentEvent>,
        duration: CountdownDuration,
        now: DateTime<Utc>,
    ) -> Option<SessionEvent> {
        if self.state != EscalationState::Idle {
            debug!("start ignored in state {:?}", self.state);
            return None;
        }

        // A flag left over from a previous episode must not cancel this one.
        self.flag.clear_all();

        let remaining = duration.seconds();
        let deadline = now + Duration::seconds(i64::from(remaining));
        self.state = EscalationState::Counting {
            deadline,
            remaining_seconds: remaining,
        };
        self.episode = Some(Episode { detection, duration });
        info!("countdown started: {}s, deadline {}", remaining, deadline);

        Some(SessionEvent::CountdownStarted {
            detection,
            deadline,
            remaining_seconds: remaining,
        })
    }

    /// An explicit cancellation (UI action). Ignored outside `Counting`.
    pub fn cancel(&mut self, _now: DateTime<Utc>) -> Option<SessionEvent> {
        if !self.is_counting() {
            debug!("cancel ignored in state {:?}", self.state);
            return None;
        }
        self.flag.clear_all();
        Some(self.resolve_safe())
    }

    /// One timer tick.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<SessionEvent> {
        match self.state {
            EscalationState::Counting {
                deadline,
                remaining_seconds,
            } => {
                if self.flag.consume() {
                    info!("safety flag observed with {}s remaining", remaining_seconds);
                    return Some(self.resolve_safe());
                }

                let remaining = remaining_seconds.saturating_sub(1);
                if remaining > 0 {
                    self.state = EscalationState::Counting {
                        deadline,
                        remaining_seconds: remaining,
                    };
                    return Some(SessionEvent::Progress {
                        remaining_seconds: remaining,
                    });
                }

                self.state = EscalationState::Resolved {
                    reason: ResolveReason::Expired,
                };
                let (detection, countdown_seconds) = self
                    .episode
                    .as_ref()
                    .map(|e| (e.detection, e.duration.seconds()))
                    .unwrap_or((None, 0));
                let command = EscalationCommand {
                    detection,
                    countdown_seconds,
                    escalated_at: now,
                };
                warn!("countdown expired unresolved, escalating");
                Some(SessionEvent::Escalated { command })
            }
            EscalationState::Cooldown { until } if now >= until => {
                self.state = EscalationState::Idle;
                debug!("cooldown elapsed");
                Some(SessionEvent::Idle)
            }
            _ => None,
        }
    }

    /// Leaves `Resolved`, either straight to `Idle` or into `Cooldown`.
    pub fn settle(&mut self, now: DateTime<Utc>) -> Option<SessionEvent> {
        if !matches!(self.state, EscalationState::Resolved { .. }) {
            return None;
        }
        self.episode = None;

        if self.cooldown <= Duration::zero() {
            self.state = EscalationState::Idle;
            return Some(SessionEvent::Idle);
        }
        match now.checked_add_signed(self.cooldown) {
            Some(until) => {
                self.state = EscalationState::Cooldown { until };
                Some(SessionEvent::CooldownStarted { until })
            }
            None => {
                warn!("cooldown of {} overflows the clock, skipping it", self.cooldown);
                self.state = EscalationState::Idle;
                Some(SessionEvent::Idle)
            }
        }
    }

    /// Detection that started the current (or just resolved) episode.
    pub fn current_detection(&self) -> Option<AccidentEvent> {
        self.episode.as_ref().and_then(|e| e.detection)
    }

    fn resolve_safe(&mut self) -> SessionEvent {
        self.state = EscalationState::Resolved {
            reason: ResolveReason::UserSafe,
        };
        info!("episode resolved: user safe");
        SessionEvent::Resolved {
            reason: ResolveReason::UserSafe,
        }
    }
}
