//! The fixed speaking course and the per-student lesson cursor.
//!
//! Each started session consumes one lesson; the cursor wraps back to the
//! first lesson after the last one.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const COURSE: [&str; 20] = [
    "Introducing myself",
    "My family",
    "My school",
    "My best friend",
    "My daily routine",
    "At the grocery shop",
    "At the restaurant",
    "At the bus stop",
    "At the doctor",
    "My favorite food",
    "My hobbies",
    "Weather and seasons",
    "Shopping conversation",
    "Asking for directions",
    "Telephone conversation",
    "Ordering food",
    "Describing a picture",
    "Story telling",
    "Past tense speaking",
    "Future plans",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    /// 1-based position in the course.
    pub number: usize,
    pub topic: String,
}

impl fmt::Display for Lesson {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lesson {}: {}", self.number, self.topic)
    }
}

/// Returns the lesson at `cursor` and the cursor to store for next time.
pub fn next_lesson(cursor: usize) -> (Lesson, usize) {
    let index = if cursor >= COURSE.len() { 0 } else { cursor };
    let lesson = Lesson {
        number: index + 1,
        topic: COURSE[index].to_string(),
    };
    (lesson, index + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_lesson() {
        let (lesson, cursor) = next_lesson(0);
        assert_eq!(lesson.number, 1);
        assert_eq!(lesson.topic, "Introducing myself");
        assert_eq!(cursor, 1);
        assert_eq!(lesson.to_string(), "Lesson 1: Introducing myself");
    }

    #[test]
    fn test_cursor_wraps_after_last_lesson() {
        let (last, cursor) = next_lesson(19);
        assert_eq!(last.topic, "Future plans");
        assert_eq!(cursor, 20);

        let (wrapped, cursor) = next_lesson(cursor);
        assert_eq!(wrapped.number, 1);
        assert_eq!(cursor, 1);
    }
}
