//! Tutor persona, language policy and the scripted greeting.

use crate::{channel::SessionConfig, course::Lesson, level::Level};

pub const TUTOR_NAME: &str = "Amin Sir";
pub const TRANSCRIPTION_MODEL: &str = "gpt-4o-mini-transcribe";
pub const TRANSCRIPTION_LANGUAGE: &str = "en";

/// Builds the `session.update` configuration for a student and lesson.
pub fn session_config(student: &str, level: Level, lesson: &Lesson) -> SessionConfig {
    let profile = level.profile();
    let instructions = format!(
        "You are {tutor} AI Tutor, a friendly English speaking teacher for school students.

LANGUAGE RULE (STRICT):
- Speak ONLY in English.
- You may use SMALL SIMPLE Hindi words in Roman letters only (Hinglish).
- Never output Arabic/Persian/Urdu script.
- If the student speaks non-English, say: \"Please speak in English.\"

Student: {student}
Today's topic: {topic}
Level: {label}. Speed: {speed}. Vocabulary: {vocabulary}.

Correct grammar gently and never say \"wrong\"; say \"Good try, let's improve it\".
Ask ONE question at a time and wait for the reply.",
        tutor = TUTOR_NAME,
        student = student,
        topic = lesson.topic,
        label = profile.label,
        speed = profile.speed,
        vocabulary = profile.vocabulary,
    );
    SessionConfig {
        instructions,
        transcription_model: TRANSCRIPTION_MODEL.to_string(),
        transcription_language: TRANSCRIPTION_LANGUAGE.to_string(),
    }
}

/// The one scripted instruction that makes the first utterance
/// deterministic: greet by name, state the level and the topic.
pub fn greeting(student: &str, level: Level, lesson: &Lesson) -> String {
    format!(
        "Start the class now. Say exactly: \"Hello {student}! I am {tutor}. \
         You are at the {label} level. Today's topic: {topic}.\" \
         Then ask your first simple question about the topic.",
        student = student,
        tutor = TUTOR_NAME,
        label = level.profile().label,
        topic = lesson.topic,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::course::next_lesson;

    #[test]
    fn test_session_config_carries_level_profile() {
        let (lesson, _) = next_lesson(1);
        let config = session_config("Ali", Level::Medium, &lesson);
        assert!(config.instructions.contains("Student: Ali"));
        assert!(config.instructions.contains("Today's topic: My family"));
        assert!(config.instructions.contains("Speed: slow-medium"));
        assert_eq!(config.transcription_model, "gpt-4o-mini-transcribe");
        assert_eq!(config.transcription_language, "en");
    }

    #[test]
    fn test_greeting_names_student_and_level() {
        let (lesson, _) = next_lesson(0);
        let text = greeting("Fatima", Level::Advanced, &lesson);
        assert!(text.contains("Hello Fatima!"));
        assert!(text.contains("Advanced level"));
        assert!(text.contains("Introducing myself"));
    }
}
