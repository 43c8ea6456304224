//! Wire format of the realtime control channel (`oai-events`).
//!
//! Outbound messages are built from the provider-neutral
//! [`ControlMessage`]; inbound frames are reduced to [`ChannelEvent`]s.
//! Frame types we do not care about decode to `ServerEvent::Other`.

use serde::{Deserialize, Serialize};
use tracing::debug;
use tutor_core::channel::{ChannelEvent, ControlMessage, SessionConfig};

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionUpdate },
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseParams>,
    },
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SessionUpdate {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub instructions: String,
    pub audio: AudioConfig,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AudioConfig {
    pub input: AudioInput,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AudioInput {
    pub transcription: Transcription,
    pub turn_detection: TurnDetection,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Transcription {
    pub model: String,
    pub language: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
    pub create_response: bool,
    pub interrupt_response: bool,
}

impl Default for TurnDetection {
    fn default() -> Self {
        Self {
            kind: "server_vad",
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 700,
            create_response: true,
            interrupt_response: true,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub role: &'static str,
    pub content: Vec<ContentPart>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ResponseParams {
    pub output_modalities: Vec<String>,
}

impl From<&SessionConfig> for SessionUpdate {
    fn from(config: &SessionConfig) -> Self {
        SessionUpdate {
            kind: "realtime",
            instructions: config.instructions.clone(),
            audio: AudioConfig {
                input: AudioInput {
                    transcription: Transcription {
                        model: config.transcription_model.clone(),
                        language: config.transcription_language.clone(),
                    },
                    turn_detection: TurnDetection::default(),
                },
            },
        }
    }
}

impl From<&ControlMessage> for ClientEvent {
    fn from(message: &ControlMessage) -> Self {
        match message {
            ControlMessage::Configure(config) => ClientEvent::SessionUpdate {
                session: config.into(),
            },
            ControlMessage::Inject(text) => ClientEvent::ConversationItemCreate {
                item: ConversationItem {
                    kind: "message",
                    role: "system",
                    content: vec![ContentPart {
                        kind: "input_text",
                        text: text.clone(),
                    }],
                },
            },
            ControlMessage::RequestResponse => ClientEvent::ResponseCreate { response: None },
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {},
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {},
    #[serde(rename = "response.done", alias = "response.completed")]
    ResponseDone {},
    #[serde(
        rename = "response.output_audio_transcript.done",
        alias = "response.audio_transcript.done"
    )]
    AudioTranscriptDone { transcript: String },
    #[serde(rename = "response.output_text.done", alias = "response.text.done")]
    TextDone { text: String },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted { transcript: String },
    #[serde(rename = "error")]
    Error { error: ErrorDetail },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorDetail {
    #[serde(default)]
    pub message: String,
}

impl ServerEvent {
    pub fn into_channel_event(self) -> Option<ChannelEvent> {
        match self {
            ServerEvent::SpeechStarted {} => Some(ChannelEvent::SpeechStarted),
            ServerEvent::SpeechStopped {} => Some(ChannelEvent::SpeechStopped),
            ServerEvent::ResponseDone {} => Some(ChannelEvent::ResponseCompleted),
            ServerEvent::AudioTranscriptDone { transcript } => {
                Some(ChannelEvent::AssistantText(transcript))
            }
            ServerEvent::TextDone { text } => Some(ChannelEvent::AssistantText(text)),
            ServerEvent::InputTranscriptionCompleted { transcript } => {
                Some(ChannelEvent::StudentTranscript(transcript))
            }
            ServerEvent::Error { error } => Some(ChannelEvent::Error(error.message)),
            ServerEvent::Other => None,
        }
    }
}

/// Decodes one inbound frame. Malformed frames are dropped so a single bad
/// message never takes the session down.
pub fn parse_frame(frame: &str) -> Option<ChannelEvent> {
    match serde_json::from_str::<ServerEvent>(frame) {
        Ok(event) => event.into_channel_event(),
        Err(e) => {
            debug!(error = %e, "Dropping malformed control frame");
            None
        }
    }
}
