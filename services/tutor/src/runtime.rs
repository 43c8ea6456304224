//! Drives one tutoring session: acquires the microphone, negotiates the
//! realtime connection and runs the event loop that feeds the
//! [`SessionController`] and executes the commands it returns.

use openai_realtime::{
    AudioSource, ControlLink, CredentialProvider, LinkEvent, MicrophoneTrack, Negotiator,
    PeerState, parse_frame,
};
use std::{collections::VecDeque, future::pending, pin::Pin, sync::Arc, time::Duration};
use tokio::{
    sync::mpsc,
    time::{Instant, Interval, MissedTickBehavior, Sleep, interval_at, sleep, timeout},
};
use tracing::{debug, info, warn};
use tutor_core::{
    Command, Event, Notice, SessionController, SessionError, SessionRequest, SessionState,
    session::{DEADLINE_TICK, Session},
    transcript::TranscriptLog,
};

/// What a finished session leaves behind for scoring.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session: Session,
    pub transcript: TranscriptLog,
}

enum ConnectOutcome {
    Connected(openai_realtime::Connection),
    Failed(SessionError),
    Cancelled,
}

/// Everything the runtime owns while a session is active.
#[derive(Default)]
struct Resources {
    mic: Option<MicrophoneTrack>,
    link: Option<Box<dyn ControlLink>>,
    events: Option<mpsc::Receiver<LinkEvent>>,
    ticker: Option<Interval>,
    nudge: Option<(Pin<Box<Sleep>>, u64)>,
}

pub struct SessionRuntime {
    controller: SessionController,
    credentials: Arc<dyn CredentialProvider>,
    negotiator: Arc<dyn Negotiator>,
    audio: Arc<dyn AudioSource>,
    connect_timeout: Duration,
    notices: Option<mpsc::UnboundedSender<Notice>>,
}

impl SessionRuntime {
    pub fn new(
        controller: SessionController,
        credentials: Arc<dyn CredentialProvider>,
        negotiator: Arc<dyn Negotiator>,
        audio: Arc<dyn AudioSource>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            controller,
            credentials,
            negotiator,
            audio,
            connect_timeout,
            notices: None,
        }
    }

    /// Forwards every [`Notice`] to `tx` as it is produced.
    pub fn with_notices(mut self, tx: mpsc::UnboundedSender<Notice>) -> Self {
        self.notices = Some(tx);
        self
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    /// Runs a session to `Closed`. A message on `stop` ends it early.
    ///
    /// Returns an error when the session could not start or never went
    /// live; a live session that ends for any reason returns its summary.
    pub async fn run(
        &mut self,
        request: SessionRequest,
        stop: &mut mpsc::Receiver<()>,
    ) -> Result<SessionSummary, SessionError> {
        let mut res = Resources::default();
        let commands = self.controller.start(request, Instant::now())?;
        self.execute(&mut res, commands).await;

        let mic = match self.audio.acquire().await {
            Ok(mic) => mic,
            Err(e) => {
                warn!(error = %e, "Microphone unavailable");
                let commands = self
                    .controller
                    .handle(Event::ConnectFailed(e.to_string()), Instant::now());
                self.execute(&mut res, commands).await;
                return Err(e);
            }
        };

        let connect = async {
            let credential = self.credentials.request_ephemeral_credential().await?;
            self.negotiator
                .connect(&credential, &mic)
                .await
                .map_err(SessionError::from)
        };
        let outcome = tokio::select! {
            result = timeout(self.connect_timeout, connect) => match result {
                Ok(Ok(connection)) => ConnectOutcome::Connected(connection),
                Ok(Err(e)) => ConnectOutcome::Failed(e),
                Err(_) => ConnectOutcome::Failed(SessionError::Upstream {
                    status: 0,
                    message: format!(
                        "connection timed out after {}s",
                        self.connect_timeout.as_secs()
                    ),
                }),
            },
            Some(()) = stop.recv() => ConnectOutcome::Cancelled,
        };
        res.mic = Some(mic);

        match outcome {
            ConnectOutcome::Connected(connection) => {
                res.link = Some(connection.link);
                res.events = Some(connection.events);
                let commands = self.controller.handle(Event::Connected, Instant::now());
                self.execute(&mut res, commands).await;
            }
            ConnectOutcome::Failed(e) => {
                let commands = self
                    .controller
                    .handle(Event::ConnectFailed(e.to_string()), Instant::now());
                self.execute(&mut res, commands).await;
                return Err(e);
            }
            ConnectOutcome::Cancelled => {
                let commands = self.controller.handle(Event::StopRequested, Instant::now());
                self.execute(&mut res, commands).await;
            }
        }

        while self.controller.state() != SessionState::Closed {
            let event = tokio::select! {
                link_event = next_link_event(&mut res.events) => translate(link_event),
                _ = next_tick(&mut res.ticker) => Some(Event::Tick),
                generation = nudge_due(&mut res.nudge) => Some(Event::NudgeDue { generation }),
                Some(()) = stop.recv() => Some(Event::StopRequested),
            };
            let Some(event) = event else { continue };
            if matches!(event, Event::NudgeDue { .. }) {
                res.nudge = None;
            }
            let commands = self.controller.handle(event, Instant::now());
            self.execute(&mut res, commands).await;
        }

        let session = self
            .controller
            .session()
            .cloned()
            .ok_or_else(|| SessionError::Validation("session record missing".to_string()))?;
        info!(session_id = %session.id, reason = ?session.close_reason, "Session finished");
        Ok(SessionSummary {
            session,
            transcript: self.controller.transcript().clone(),
        })
    }

    async fn execute(&mut self, res: &mut Resources, commands: Vec<Command>) {
        let mut queue = VecDeque::from(commands);
        while let Some(command) = queue.pop_front() {
            match command {
                Command::Send(message) => {
                    if self.controller.state() != SessionState::Live {
                        debug!(?message, "Dropping send outside a live session");
                        continue;
                    }
                    let Some(link) = res.link.as_ref() else {
                        continue;
                    };
                    if let Err(e) = link.send(&message).await {
                        warn!(error = %e, "Control channel send failed");
                        queue.extend(
                            self.controller
                                .handle(Event::TransportLost(e.to_string()), Instant::now()),
                        );
                    }
                }
                Command::StartDeadlineTicker => {
                    let mut ticker = interval_at(Instant::now() + DEADLINE_TICK, DEADLINE_TICK);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    res.ticker = Some(ticker);
                }
                Command::ArmNudge { after, generation } => {
                    res.nudge = Some((Box::pin(sleep(after)), generation));
                }
                Command::CancelNudge => res.nudge = None,
                Command::ClearTimers => {
                    res.ticker = None;
                    res.nudge = None;
                }
                Command::ReleaseResources => {
                    if let Some(mut mic) = res.mic.take() {
                        mic.stop();
                    }
                    if let Some(link) = res.link.take() {
                        link.close().await;
                    }
                    res.events = None;
                    queue.extend(
                        self.controller
                            .handle(Event::CleanupFinished, Instant::now()),
                    );
                }
                Command::Notify(notice) => {
                    debug!(?notice, "Session notice");
                    if let Some(tx) = &self.notices {
                        let _ = tx.send(notice);
                    }
                }
            }
        }
    }
}

async fn next_link_event(events: &mut Option<mpsc::Receiver<LinkEvent>>) -> Option<LinkEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}

async fn nudge_due(nudge: &mut Option<(Pin<Box<Sleep>>, u64)>) -> u64 {
    match nudge {
        Some((timer, generation)) => {
            timer.as_mut().await;
            *generation
        }
        None => pending().await,
    }
}

fn translate(link_event: Option<LinkEvent>) -> Option<Event> {
    match link_event {
        Some(LinkEvent::Frame(frame)) => parse_frame(&frame).map(Event::Channel),
        Some(LinkEvent::PeerState(PeerState::Failed)) => {
            Some(Event::TransportLost("peer connection failed".to_string()))
        }
        Some(LinkEvent::PeerState(PeerState::Closed)) => {
            Some(Event::TransportLost("peer connection closed".to_string()))
        }
        Some(LinkEvent::PeerState(state)) => {
            debug!(?state, "Peer connection state changed");
            None
        }
        Some(LinkEvent::Closed(reason)) => Some(Event::TransportLost(reason)),
        None => Some(Event::TransportLost("control channel closed".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use openai_realtime::{Connection, EphemeralCredential, NegotiationError, SilentSource};
    use serde_json::json;
    use std::sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    };
    use tutor_core::{
        channel::ControlMessage,
        clock::ManualClock,
        followup::FollowUpPolicy,
        progress::InMemoryProgressStore,
        session::{CloseReason, ControllerSettings},
    };

    struct StaticCredentials;

    #[async_trait]
    impl CredentialProvider for StaticCredentials {
        async fn request_ephemeral_credential(&self) -> Result<EphemeralCredential, SessionError> {
            Ok(EphemeralCredential::new("ek_test", None))
        }
    }

    #[derive(Default)]
    struct LinkProbe {
        sent: Mutex<Vec<ControlMessage>>,
        closed: AtomicBool,
    }

    struct FakeLink(Arc<LinkProbe>);

    #[async_trait]
    impl ControlLink for FakeLink {
        async fn send(&self, message: &ControlMessage) -> anyhow::Result<()> {
            self.0.sent.lock().unwrap().push(message.clone());
            Ok(())
        }

        async fn close(&self) {
            self.0.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Stands in for a half-built transport; records its release on drop.
    struct PendingTransport(Arc<LinkProbe>);

    impl Drop for PendingTransport {
        fn drop(&mut self) {
            self.0.closed.store(true, Ordering::SeqCst);
        }
    }

    enum Behaviour {
        Connect(Vec<String>),
        Reject,
        Hang,
    }

    struct FakeNegotiator {
        behaviour: Behaviour,
        probe: Arc<LinkProbe>,
        senders: Mutex<Vec<mpsc::Sender<LinkEvent>>>,
    }

    impl FakeNegotiator {
        fn new(behaviour: Behaviour) -> Self {
            Self {
                behaviour,
                probe: Arc::new(LinkProbe::default()),
                senders: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Negotiator for FakeNegotiator {
        async fn connect(
            &self,
            _credential: &EphemeralCredential,
            _microphone: &MicrophoneTrack,
        ) -> Result<Connection, NegotiationError> {
            match &self.behaviour {
                Behaviour::Connect(frames) => {
                    let (tx, rx) = mpsc::channel(16);
                    for frame in frames {
                        tx.try_send(LinkEvent::Frame(frame.clone())).unwrap();
                    }
                    self.senders.lock().unwrap().push(tx);
                    Ok(Connection {
                        link: Box::new(FakeLink(self.probe.clone())),
                        events: rx,
                    })
                }
                Behaviour::Reject => Err(NegotiationError::Rejected {
                    status: 500,
                    body: "upstream exploded".to_string(),
                }),
                Behaviour::Hang => {
                    let _transport = PendingTransport(self.probe.clone());
                    sleep(Duration::from_secs(3600)).await;
                    Err(NegotiationError::WebRtc("unreachable".to_string()))
                }
            }
        }
    }

    struct Rig {
        runtime: SessionRuntime,
        negotiator: Arc<FakeNegotiator>,
        audio: Arc<SilentSource>,
        notices: mpsc::UnboundedReceiver<Notice>,
    }

    fn rig(behaviour: Behaviour, budget: Duration) -> Rig {
        let clock = Arc::new(ManualClock::new(
            "2025-03-01T09:00:00Z".parse().unwrap(),
        ));
        let controller = SessionController::new(
            Arc::new(InMemoryProgressStore::new()),
            clock,
            ControllerSettings {
                session_budget: budget,
                followup: FollowUpPolicy::default(),
            },
        );
        let negotiator = Arc::new(FakeNegotiator::new(behaviour));
        let audio = Arc::new(SilentSource::new());
        let (tx, notices) = mpsc::unbounded_channel();
        let runtime = SessionRuntime::new(
            controller,
            Arc::new(StaticCredentials),
            negotiator.clone(),
            audio.clone(),
            Duration::from_secs(5),
        )
        .with_notices(tx);
        Rig {
            runtime,
            negotiator,
            audio,
            notices,
        }
    }

    fn request() -> SessionRequest {
        SessionRequest {
            student_name: "Ali".to_string(),
            level: None,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Notice>) -> Vec<Notice> {
        let mut out = Vec::new();
        while let Ok(notice) = rx.try_recv() {
            out.push(notice);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_ends_at_deadline_and_releases_everything() {
        let mut rig = rig(Behaviour::Connect(Vec::new()), Duration::from_secs(3));
        let (_stop_tx, mut stop_rx) = mpsc::channel(1);

        let summary = rig.runtime.run(request(), &mut stop_rx).await.unwrap();

        assert_eq!(summary.session.close_reason, Some(CloseReason::LimitReached));
        assert_eq!(rig.runtime.controller().state(), SessionState::Closed);
        assert_eq!(rig.audio.active_tracks(), 0);
        assert!(rig.negotiator.probe.closed.load(Ordering::SeqCst));

        let sent = rig.negotiator.probe.sent.lock().unwrap().clone();
        assert!(matches!(sent[0], ControlMessage::Configure(_)));
        assert!(matches!(sent[1], ControlMessage::Inject(_)));
        assert_eq!(sent[2], ControlMessage::RequestResponse);

        let notices = drain(&mut rig.notices);
        assert!(notices.contains(&Notice::LimitReached));
        assert!(notices.contains(&Notice::TimeLeft(Duration::from_secs(1))));
        assert_eq!(notices.last(), Some(&Notice::State(SessionState::Closed)));
        assert!(summary.transcript.render().contains("Session limit reached"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_become_transcript_and_nudges_fire() {
        let frames = vec![
            json!({"type": "response.output_audio_transcript.done", "transcript": "Hello Ali! How are you?"}).to_string(),
            json!({"type": "conversation.item.input_audio_transcription.completed", "transcript": "I am fine sir"}).to_string(),
            "not json".to_string(),
            json!({"type": "response.done"}).to_string(),
        ];
        let mut rig = rig(Behaviour::Connect(frames), Duration::from_secs(30));
        let (_stop_tx, mut stop_rx) = mpsc::channel(1);

        let summary = rig.runtime.run(request(), &mut stop_rx).await.unwrap();

        let rendered = summary.transcript.render();
        assert!(rendered.contains("AI: Hello Ali! How are you?"));
        assert!(rendered.contains("STUDENT: I am fine sir"));

        let sent = rig.negotiator.probe.sent.lock().unwrap().clone();
        let injects = sent
            .iter()
            .filter(|m| matches!(m, ControlMessage::Inject(_)))
            .count();
        assert_eq!(injects, 2, "greeting plus one nudge");
        assert!(drain(&mut rig.notices).contains(&Notice::NudgeSent(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_live() {
        let mut rig = rig(Behaviour::Connect(Vec::new()), Duration::from_secs(600));
        let (stop_tx, mut stop_rx) = mpsc::channel(1);
        let mut notices = std::mem::replace(&mut rig.notices, mpsc::unbounded_channel().1);

        let watcher = async move {
            while let Some(notice) = notices.recv().await {
                if notice == Notice::State(SessionState::Live) {
                    stop_tx.send(()).await.unwrap();
                    break;
                }
            }
        };
        let (summary, _) = tokio::join!(rig.runtime.run(request(), &mut stop_rx), watcher);

        let summary = summary.unwrap();
        assert_eq!(summary.session.close_reason, Some(CloseReason::Stopped));
        assert_eq!(rig.audio.active_tracks(), 0);
        assert!(rig.negotiator.probe.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_negotiation_cancels() {
        let mut rig = rig(Behaviour::Hang, Duration::from_secs(600));
        let (stop_tx, mut stop_rx) = mpsc::channel(1);
        stop_tx.send(()).await.unwrap();

        let summary = rig.runtime.run(request(), &mut stop_rx).await.unwrap();

        assert_eq!(summary.session.close_reason, Some(CloseReason::Cancelled));
        assert_eq!(rig.audio.active_tracks(), 0);
        assert!(rig.negotiator.probe.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_negotiation_failure_closes_and_reports() {
        let mut rig = rig(Behaviour::Reject, Duration::from_secs(600));
        let (_stop_tx, mut stop_rx) = mpsc::channel(1);

        let err = rig.runtime.run(request(), &mut stop_rx).await.unwrap_err();

        assert!(matches!(err, SessionError::Upstream { status: 500, .. }));
        assert_eq!(rig.runtime.controller().state(), SessionState::Closed);
        assert_eq!(rig.audio.active_tracks(), 0);
        assert!(rig.negotiator.probe.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let mut rig = rig(Behaviour::Hang, Duration::from_secs(600));
        let (_stop_tx, mut stop_rx) = mpsc::channel(1);

        let err = rig.runtime.run(request(), &mut stop_rx).await.unwrap_err();

        match err {
            SessionError::Upstream { status, message } => {
                assert_eq!(status, 0);
                assert!(message.contains("timed out"));
            }
            other => panic!("Expected Upstream, got {:?}", other),
        }
        assert_eq!(rig.audio.active_tracks(), 0);
        assert!(rig.negotiator.probe.closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_session_same_day_is_locked() {
        let mut rig = rig(Behaviour::Connect(Vec::new()), Duration::from_secs(2));
        let (_stop_tx, mut stop_rx) = mpsc::channel(1);
        rig.runtime.run(request(), &mut stop_rx).await.unwrap();

        let err = rig.runtime.run(request(), &mut stop_rx).await.unwrap_err();
        assert!(matches!(err, SessionError::DailyLimit { .. }));
    }
}
