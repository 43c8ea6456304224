//! Progress maintenance commands run outside a session.

use std::fmt::Write;
use tutor_core::{
    SessionError,
    course::{COURSE, next_lesson},
    level::Level,
    progress::{ProgressStore, StudentId, StudentProgress},
};

pub fn load(store: &dyn ProgressStore, student: &StudentId) -> Result<StudentProgress, SessionError> {
    Ok(store.load(student)?)
}

/// Stores the level preference used by the next session.
pub fn set_level(
    store: &dyn ProgressStore,
    student: &StudentId,
    level: Level,
) -> Result<(), SessionError> {
    store.update(student, |p| {
        p.level = level;
        Ok(())
    })
}

/// Restarts the course from the first lesson.
pub fn reset_course(store: &dyn ProgressStore, student: &StudentId) -> Result<(), SessionError> {
    store.update(student, |p| {
        p.lesson_cursor = 0;
        Ok(())
    })
}

/// Forgets every stored report. Streak, best average and the usage lock
/// are kept.
pub fn clear_history(store: &dyn ProgressStore, student: &StudentId) -> Result<(), SessionError> {
    store.update(student, |p| {
        p.history.clear();
        Ok(())
    })
}

/// Human-readable progress summary for the terminal.
pub fn render_progress(student: &StudentId, progress: &StudentProgress) -> String {
    let (lesson, _) = next_lesson(progress.lesson_cursor);
    let mut out = String::new();
    let _ = writeln!(out, "Student:      {}", student);
    let _ = writeln!(out, "Level:        {}", progress.level);
    let _ = writeln!(out, "Next lesson:  {} (of {})", lesson, COURSE.len());
    let _ = writeln!(out, "Streak:       {} day(s)", progress.streak.count);
    match progress.best_average {
        Some(best) => {
            let _ = writeln!(out, "Best average: {:.2}", best);
        }
        None => {
            let _ = writeln!(out, "Best average: -");
        }
    }
    if let Some(day) = progress.usage_lock {
        let _ = writeln!(out, "Last session: {}", day);
    }
    if progress.history.is_empty() {
        let _ = writeln!(out, "History:      none");
    } else {
        let _ = writeln!(out, "History:");
        for record in &progress.history {
            let s = &record.report.scores;
            let _ = writeln!(
                out,
                "  {}  {}  P{} G{} F{} C{}  avg {:.2}",
                record.recorded_at.format("%Y-%m-%d %H:%M"),
                record.report.lesson,
                s.pronunciation,
                s.grammar,
                s.fluency,
                s.confidence,
                s.average()
            );
        }
    }
    out
}
