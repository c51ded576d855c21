//! One monitoring session: a single-consumer actor that serializes the
//! sample feed, the once-per-tick timer and out-of-band cancellations onto
//! one state-update path.

use crate::config::Config;
use crate::error::EngineError;
use crate::escalation::{CountdownDuration, EscalationCoordinator};
use crate::logic::MotionClassifier;
use crate::model::{EscalationState, ResolveReason, SensorSample, SessionEvent};
use crate::safety_flag::SafetyFlag;
use crate::sink::EscalationSink;
use crate::wake::{WakeGuard, WakeLock};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

const INPUT_CAPACITY: usize = 256;
// Drop oldest if observers fall behind
const EVENT_CAPACITY: usize = 100;

const SESSION_WAKE_TAG: &str = "crashguard::monitoring";
const EPISODE_WAKE_TAG: &str = "crashguard::countdown";

enum SessionInput {
    Sample(SensorSample),
    Start(CountdownDuration),
    Cancel,
    Stop,
}

/// Cloneable front door to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionInput>,
    events: broadcast::Sender<SessionEvent>,
    state: watch::Receiver<EscalationState>,
}

impl SessionHandle {
    pub async fn feed(&self, sample: SensorSample) -> Result<(), EngineError> {
        self.send(SessionInput::Sample(sample)).await
    }

    /// Host-issued countdown. Durations below one second are rejected here,
    /// never inside the tick loop.
    pub async fn start_countdown(&self, seconds: i64) -> Result<(), EngineError> {
        let duration = CountdownDuration::new(seconds)?;
        self.send(SessionInput::Start(duration)).await
    }

    /// Direct "I'm safe" from the UI.
    pub async fn cancel(&self) -> Result<(), EngineError> {
        self.send(SessionInput::Cancel).await
    }

    pub async fn stop(&self) -> Result<(), EngineError> {
        self.send(SessionInput::Stop).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> EscalationState {
        *self.state.borrow()
    }

    async fn send(&self, input: SessionInput) -> Result<(), EngineError> {
        self.tx
            .send(input)
            .await
            .map_err(|_| EngineError::SessionClosed)
    }
}

pub struct MonitorSession<S: EscalationSink> {
    classifier: MotionClassifier,
    coordinator: EscalationCoordinator,
    sink: S,
    wake_lock: Arc<dyn WakeLock>,
    episode_guard: Option<WakeGuard>,
    countdown: CountdownDuration,
    tick: Duration,
    events: broadcast::Sender<SessionEvent>,
    state: watch::Sender<EscalationState>,
    // Wall time is derived from the runtime clock so deadlines follow it.
    epoch: DateTime<Utc>,
    started: Instant,
}

impl<S: EscalationSink> MonitorSession<S> {
    pub fn new(
        config: &Config,
        flag: Arc<dyn SafetyFlag>,
        sink: S,
        wake_lock: Arc<dyn WakeLock>,
    ) -> Self {
        let cooldown = chrono::Duration::from_std(config.cooldown).unwrap_or_else(|_| {
            warn!("cooldown {:?} out of range, disabled", config.cooldown);
            chrono::Duration::zero()
        });
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state, _) = watch::channel(EscalationState::Idle);

        Self {
            classifier: MotionClassifier::new(config.thresholds.clone()),
            coordinator: EscalationCoordinator::new(flag, cooldown),
            sink,
            wake_lock,
            episode_guard: None,
            countdown: config.countdown,
            tick: config.tick,
            events,
            state,
            epoch: Utc::now(),
            started: Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.epoch.checked_add_signed(elapsed).unwrap_or(self.epoch)
    }

    /// Starts the actor on the current tokio runtime.
    pub fn spawn(self) -> (SessionHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(INPUT_CAPACITY);
        let handle = SessionHandle {
            tx,
            events: self.events.clone(),
            state: self.state.subscribe(),
        };
        let task = tokio::spawn(self.run(rx));
        (handle, task)
    }

    async fn run(mut self, mut inputs: mpsc::Receiver<SessionInput>) {
        // Released on every exit path, including a panic unwinding this task.
        let _session_guard = match WakeGuard::acquire(self.wake_lock.clone(), SESSION_WAKE_TAG) {
            Ok(guard) => Some(guard),
            Err(e) => {
                error!("monitoring without a wake resource: {}", e);
                None
            }
        };

        let mut ticker = time::interval_at(Instant::now() + self.tick, self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("monitoring session started");

        loop {
            tokio::select! {
                // Input first: a cancel queued alongside a due tick is applied before it.
                biased;
                input = inputs.recv() => match input {
                    Some(SessionInput::Stop) | None => break,
                    Some(input) => {
                        if self.handle_input(input).await {
                            ticker.reset();
                        }
                    }
                },
                _ = ticker.tick() => self.on_tick().await,
            }
        }

        if self.coordinator.is_counting() {
            warn!("monitoring stopped mid-countdown, episode abandoned without escalation");
        }
        self.episode_guard = None;
        info!("monitoring session stopped");
    }

    /// Returns true when a countdown started.
    async fn handle_input(&mut self, input: SessionInput) -> bool {
        let now = self.now();
        match input {
            SessionInput::Sample(sample) => {
                let Some(event) = self.classifier.observe(&sample) else {
                    return false;
                };
                // Only a detection that opens an episode is reported.
                let Some(started) = self.coordinator.on_detection(event, self.countdown, now) else {
                    debug!(
                        "{} detection ignored in state {:?}",
                        event.kind.as_str(),
                        self.coordinator.state()
                    );
                    return false;
                };
                self.publish(SessionEvent::Detected { event });
                self.begin_episode(Some(started))
            }
            SessionInput::Start(duration) => {
                let started = self.coordinator.start(duration, now);
                self.begin_episode(started)
            }
            SessionInput::Cancel => {
                if let Some(resolved) = self.coordinator.cancel(now) {
                    self.publish(resolved);
                    self.finish_episode(ResolveReason::UserSafe).await;
                }
                false
            }
            SessionInput::Stop => false,
        }
    }

    fn begin_episode(&mut self, started: Option<SessionEvent>) -> bool {
        let Some(started) = started else {
            return false;
        };
        self.episode_guard = WakeGuard::acquire(self.wake_lock.clone(), EPISODE_WAKE_TAG)
            .map_err(|e| warn!("countdown running without a wake resource: {}", e))
            .ok();
        self.publish(started);
        true
    }

    async fn on_tick(&mut self) {
        match self.coordinator.tick(self.now()) {
            None => {}
            Some(SessionEvent::Escalated { command }) => {
                self.publish(SessionEvent::Progress {
                    remaining_seconds: 0,
                });
                self.publish(SessionEvent::Escalated { command });
                if let Err(e) = self.sink.dispatch(&command).await {
                    error!("escalation sink failed: {}", e);
                    self.publish(SessionEvent::EscalationFailed {
                        reason: e.to_string(),
                    });
                }
                self.finish_episode(ResolveReason::Expired).await;
            }
            Some(resolved @ SessionEvent::Resolved { .. }) => {
                self.publish(resolved);
                self.finish_episode(ResolveReason::UserSafe).await;
            }
            Some(SessionEvent::Idle) => {
                // Cooldown elapsed
                self.classifier.reset();
                self.publish(SessionEvent::Idle);
            }
            Some(progress) => self.publish(progress),
        }
    }

    async fn finish_episode(&mut self, reason: ResolveReason) {
        if reason == ResolveReason::UserSafe {
            let detection = self.coordinator.current_detection();
            if let Err(e) = self.sink.record_resolution(detection, reason).await {
                warn!("could not record resolution: {}", e);
            }
        }
        self.episode_guard = None;

        match self.coordinator.settle(self.now()) {
            Some(SessionEvent::Idle) => {
                self.classifier.reset();
                self.publish(SessionEvent::Idle);
            }
            Some(other) => self.publish(other),
            None => {}
        }
    }

    fn publish(&self, event: SessionEvent) {
        self.state.send_replace(self.coordinator.state());
        debug!("session event: {:?}", event);
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
