//! Provider-neutral view of the control channel.
//!
//! The session state machine speaks only in these types; the realtime
//! crate translates them to and from the engine's wire protocol.

/// Configuration sent once the control channel is live.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionConfig {
    pub instructions: String,
    pub transcription_model: String,
    pub transcription_language: String,
}

/// Messages the controller asks the runtime to put on the control channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// Establish persona, language policy and transcription.
    Configure(SessionConfig),
    /// Inject a scripted instruction into the conversation.
    Inject(String),
    /// Ask the engine to produce a reply now.
    RequestResponse,
}

/// Events any realtime engine can surface on the control channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Voice activity from the student began.
    SpeechStarted,
    /// Voice activity from the student ended.
    SpeechStopped,
    /// The tutor finished a response.
    ResponseCompleted,
    /// Text the tutor said (or wrote).
    AssistantText(String),
    /// Speech-to-text of the student's utterance.
    StudentTranscript(String),
    /// The engine reported an error on the channel.
    Error(String),
}
