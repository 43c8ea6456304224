//! The session orchestration state machine.
//!
//! `SessionController` is a pure transition function: the runtime feeds it
//! one [`Event`] at a time together with the current monotonic instant and
//! executes the [`Command`]s it returns. Timers, the control link and the
//! microphone belong to the runtime; the controller only decides when they
//! start, stop and what goes over the wire. Replaying the same event
//! sequence always produces the same commands and transcript.

use crate::{
    channel::{ChannelEvent, ControlMessage},
    clock::Clock,
    course::{Lesson, next_lesson},
    error::SessionError,
    followup::{FollowUpCounter, FollowUpPolicy, nudge_text},
    level::Level,
    persona,
    progress::{ProgressStore, StudentId},
    transcript::{Role, TranscriptLog},
};
use std::{fmt, sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const DEFAULT_SESSION_BUDGET: Duration = Duration::from_secs(600);
pub const DEADLINE_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Idle,
    Connecting,
    Live,
    Stopping,
    Closed,
}

impl SessionState {
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Live | SessionState::Stopping
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Live => "live",
            SessionState::Stopping => "stopping",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `stop()` while Live.
    Stopped,
    /// `stop()` while still negotiating.
    Cancelled,
    LimitReached,
    Disconnected(String),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub state: SessionState,
    pub student: StudentId,
    pub student_name: String,
    pub level: Level,
    pub lesson: Lesson,
    pub started_at: Option<Instant>,
    pub deadline: Option<Instant>,
    pub close_reason: Option<CloseReason>,
}

/// What the caller wants to start.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub student_name: String,
    /// Overrides (and persists) the stored level preference.
    pub level: Option<Level>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Negotiation succeeded and the control channel is open.
    Connected,
    ConnectFailed(String),
    Channel(ChannelEvent),
    /// Deadline timer tick.
    Tick,
    /// A nudge timer armed with this generation expired.
    NudgeDue { generation: u64 },
    StopRequested,
    /// The control channel or peer connection failed.
    TransportLost(String),
    /// The runtime released every resource after a stop.
    CleanupFinished,
}

/// Status updates for whoever is watching the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    State(SessionState),
    TimeLeft(Duration),
    LimitReached,
    Disconnected(String),
    NudgeSent(u32),
    EngineError(String),
    /// Progress could not be saved; the daily limit may not hold.
    StoreFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Send(ControlMessage),
    StartDeadlineTicker,
    /// Replace any pending nudge timer with one firing after `after`.
    ArmNudge { after: Duration, generation: u64 },
    CancelNudge,
    ClearTimers,
    /// Stop microphone tracks, close the control channel and the transport.
    ReleaseResources,
    Notify(Notice),
}

#[derive(Debug, Clone, Copy)]
pub struct ControllerSettings {
    pub session_budget: Duration,
    pub followup: FollowUpPolicy,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            session_budget: DEFAULT_SESSION_BUDGET,
            followup: FollowUpPolicy::default(),
        }
    }
}

pub struct SessionController {
    store: Arc<dyn ProgressStore>,
    clock: Arc<dyn Clock>,
    settings: ControllerSettings,
    session: Option<Session>,
    transcript: TranscriptLog,
    followups: FollowUpCounter,
    student_speaking: bool,
    pending_nudge: Option<u64>,
    nudge_generation: u64,
}

impl SessionController {
    pub fn new(
        store: Arc<dyn ProgressStore>,
        clock: Arc<dyn Clock>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            store,
            clock,
            settings,
            session: None,
            transcript: TranscriptLog::new(),
            followups: FollowUpCounter::default(),
            student_speaking: false,
            pending_nudge: None,
            nudge_generation: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(SessionState::Idle)
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// The current session's transcript, or the last one once closed.
    pub fn transcript(&self) -> &TranscriptLog {
        &self.transcript
    }

    pub fn nudges_sent(&self) -> u32 {
        self.followups.count()
    }

    pub fn student_speaking(&self) -> bool {
        self.student_speaking
    }

    pub fn time_left(&self, now: Instant) -> Option<Duration> {
        self.session
            .as_ref()
            .and_then(|s| s.deadline)
            .map(|d| d.saturating_duration_since(now))
    }

    /// `Idle`/`Closed` → `Connecting`, subject to the single-session rule
    /// and the daily usage lock.
    pub fn start(
        &mut self,
        request: SessionRequest,
        _now: Instant,
    ) -> Result<Vec<Command>, SessionError> {
        if self.state().is_active() {
            warn!(state = %self.state(), "start() rejected: session already active");
            return Err(SessionError::AlreadyActive);
        }

        let student = StudentId::from_name(&request.student_name);
        let today = self.clock.today();
        let (level, lesson) = self.store.update(&student, |progress| {
            if progress.is_locked(today) {
                return Err(SessionError::DailyLimit {
                    student: student.to_string(),
                    date: today,
                });
            }
            if let Some(level) = request.level {
                progress.level = level;
            }
            let (lesson, cursor) = next_lesson(progress.lesson_cursor);
            progress.lesson_cursor = cursor;
            Ok((progress.level, lesson))
        })?;

        let session = Session {
            id: Uuid::new_v4(),
            state: SessionState::Connecting,
            student,
            student_name: display_name(&request.student_name),
            level,
            lesson,
            started_at: None,
            deadline: None,
            close_reason: None,
        };
        info!(session_id = %session.id, student = %session.student, %level, lesson = %session.lesson, "Session connecting");

        self.session = Some(session);
        self.transcript = TranscriptLog::new();
        self.followups = FollowUpCounter::default();
        self.student_speaking = false;
        self.pending_nudge = None;

        Ok(vec![Command::Notify(Notice::State(SessionState::Connecting))])
    }

    /// Applies one event and returns the side effects to execute, in order.
    pub fn handle(&mut self, event: Event, now: Instant) -> Vec<Command> {
        let state = self.state();
        match (state, event) {
            (SessionState::Connecting, Event::Connected) => self.enter_live(now),
            (SessionState::Connecting, Event::ConnectFailed(reason)) => {
                error!(%reason, "Negotiation failed");
                self.close_from_connecting(CloseReason::Failed(reason))
            }
            (SessionState::Connecting, Event::TransportLost(reason)) => {
                self.close_from_connecting(CloseReason::Failed(reason))
            }
            (SessionState::Connecting, Event::StopRequested) => {
                info!("Stop requested during negotiation");
                self.close_from_connecting(CloseReason::Cancelled)
            }
            (SessionState::Live, Event::Channel(ev)) => self.on_channel(ev),
            (SessionState::Live, Event::Tick) => self.on_tick(now),
            (SessionState::Live, Event::NudgeDue { generation }) => self.on_nudge(generation, now),
            (SessionState::Live, Event::StopRequested) => self.begin_stopping(CloseReason::Stopped),
            (SessionState::Live, Event::TransportLost(reason)) => {
                warn!(%reason, "Connection lost while live");
                let mut cmds = self.begin_stopping(CloseReason::Disconnected(reason.clone()));
                cmds.push(Command::Notify(Notice::Disconnected(reason)));
                cmds
            }
            (SessionState::Stopping, Event::CleanupFinished) => {
                self.set_state(SessionState::Closed);
                if let Some(session) = &self.session {
                    info!(session_id = %session.id, reason = ?session.close_reason, "Session closed");
                }
                vec![Command::Notify(Notice::State(SessionState::Closed))]
            }
            (state, event) => {
                debug!(%state, ?event, "Event ignored in current state");
                Vec::new()
            }
        }
    }

    fn enter_live(&mut self, now: Instant) -> Vec<Command> {
        let budget = self.settings.session_budget;
        let today = self.clock.today();
        let stamp = self.clock.now();
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        session.state = SessionState::Live;
        session.started_at = Some(now);
        session.deadline = Some(now + budget);

        let profile = session.level.profile();
        self.transcript.append(
            Role::System,
            &format!(
                "Student={}, Level={}, Lesson={} ({})",
                session.student_name, profile.label, session.lesson.number, session.lesson.topic
            ),
            stamp,
        );

        // Only a confirmed live session consumes the day's allowance.
        let lock = self.store.update(&session.student, |p| {
            p.usage_lock = Some(today);
            Ok::<_, SessionError>(())
        });
        let lock_failure = lock.err().map(|e| {
            error!(error = %e, "Failed to persist usage lock");
            e.to_string()
        });

        info!(session_id = %session.id, budget_secs = budget.as_secs(), "Session live");
        let config = persona::session_config(&session.student_name, session.level, &session.lesson);
        let greeting = persona::greeting(&session.student_name, session.level, &session.lesson);
        let mut cmds = vec![
            Command::Send(ControlMessage::Configure(config)),
            Command::Send(ControlMessage::Inject(greeting)),
            Command::Send(ControlMessage::RequestResponse),
            Command::StartDeadlineTicker,
            Command::Notify(Notice::State(SessionState::Live)),
            Command::Notify(Notice::TimeLeft(budget)),
        ];
        if let Some(message) = lock_failure {
            cmds.push(Command::Notify(Notice::StoreFailed(message)));
        }
        cmds
    }

    fn on_channel(&mut self, event: ChannelEvent) -> Vec<Command> {
        let stamp = self.clock.now();
        match event {
            ChannelEvent::SpeechStarted => {
                self.student_speaking = true;
                if self.pending_nudge.take().is_some() {
                    debug!("Student started speaking, pending nudge cancelled");
                    return vec![Command::CancelNudge];
                }
            }
            ChannelEvent::SpeechStopped => self.student_speaking = false,
            ChannelEvent::ResponseCompleted => {
                if !self.followups.exhausted(&self.settings.followup) {
                    self.nudge_generation += 1;
                    self.pending_nudge = Some(self.nudge_generation);
                    return vec![Command::ArmNudge {
                        after: self.settings.followup.silence_window,
                        generation: self.nudge_generation,
                    }];
                }
            }
            ChannelEvent::AssistantText(text) => {
                self.transcript.append(Role::Tutor, &text, stamp);
            }
            ChannelEvent::StudentTranscript(text) => {
                self.transcript.append(Role::Student, &text, stamp);
            }
            ChannelEvent::Error(message) => {
                warn!(%message, "Engine reported an error");
                return vec![Command::Notify(Notice::EngineError(message))];
            }
        }
        Vec::new()
    }

    fn on_tick(&mut self, now: Instant) -> Vec<Command> {
        let Some(remaining) = self.time_left(now) else {
            return Vec::new();
        };
        if !remaining.is_zero() {
            return vec![Command::Notify(Notice::TimeLeft(remaining))];
        }
        let minutes = self.settings.session_budget.as_secs() / 60;
        self.transcript.append(
            Role::System,
            &format!("Session limit reached ({} minutes).", minutes),
            self.clock.now(),
        );
        info!("Session time limit reached");
        let mut cmds = self.begin_stopping(CloseReason::LimitReached);
        cmds.push(Command::Notify(Notice::LimitReached));
        cmds
    }

    fn on_nudge(&mut self, generation: u64, now: Instant) -> Vec<Command> {
        if self.pending_nudge != Some(generation) {
            debug!(generation, "Stale nudge timer ignored");
            return Vec::new();
        }
        self.pending_nudge = None;
        match self
            .followups
            .try_fire(&self.settings.followup, now, self.student_speaking)
        {
            Ok(n) => {
                let topic = self
                    .session
                    .as_ref()
                    .map(|s| s.lesson.topic.clone())
                    .unwrap_or_default();
                info!(nudge = n, "Sending follow-up nudge");
                vec![
                    Command::Send(ControlMessage::Inject(nudge_text(n, &topic))),
                    Command::Send(ControlMessage::RequestResponse),
                    Command::Notify(Notice::NudgeSent(n)),
                ]
            }
            Err(reason) => {
                debug!(?reason, "Nudge suppressed");
                Vec::new()
            }
        }
    }

    fn begin_stopping(&mut self, reason: CloseReason) -> Vec<Command> {
        self.transcript.freeze();
        self.pending_nudge = None;
        self.student_speaking = false;
        self.set_state(SessionState::Stopping);
        if let Some(session) = self.session.as_mut() {
            session.close_reason = Some(reason);
        }
        vec![
            Command::ClearTimers,
            Command::ReleaseResources,
            Command::Notify(Notice::State(SessionState::Stopping)),
        ]
    }

    fn close_from_connecting(&mut self, reason: CloseReason) -> Vec<Command> {
        self.transcript.freeze();
        self.set_state(SessionState::Closed);
        if let Some(session) = self.session.as_mut() {
            session.close_reason = Some(reason);
        }
        vec![
            Command::ClearTimers,
            Command::ReleaseResources,
            Command::Notify(Notice::State(SessionState::Closed)),
        ]
    }

    fn set_state(&mut self, next: SessionState) {
        if let Some(session) = self.session.as_mut() {
            debug_assert!(next > session.state, "state transitions are monotonic");
            session.state = next;
        }
    }
}

fn display_name(name: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        "Student".to_string()
    } else {
        name.to_string()
    }
}
