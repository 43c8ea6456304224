//! Per-student progress: level preference, lesson cursor, score history,
//! streak, best average and the daily usage lock.
//!
//! The session controller and scoring requestor only ever reach this state
//! through an injected [`ProgressStore`].

use crate::{error::StoreError, level::Level, report::ScoreReport};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt, fs,
    path::{Path, PathBuf},
    sync::Mutex,
};
use tracing::debug;
use uuid::Uuid;

/// Most recent reports kept per student.
pub const HISTORY_LIMIT: usize = 10;

/// Storage-safe student key derived from a display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StudentId(String);

impl StudentId {
    pub fn from_name(name: &str) -> Self {
        let key: String = name
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_")
            .chars()
            .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
            .collect();
        if key.is_empty() {
            Self("student".to_string())
        } else {
            Self(key)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakRecord {
    pub count: u32,
    pub last_day: Option<NaiveDate>,
}

impl StreakRecord {
    /// Counts a successful day: consecutive days extend the streak, a gap
    /// resets it to 1, a second success on the same day changes nothing.
    pub fn record_success(&mut self, today: NaiveDate) {
        match self.last_day {
            Some(last) if last == today => {}
            Some(last) if today.pred_opt() == Some(last) => {
                self.count = (self.count + 1).max(1);
                self.last_day = Some(today);
            }
            _ => {
                self.count = 1;
                self.last_day = Some(today);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub report: ScoreReport,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudentProgress {
    #[serde(default)]
    pub level: Level,
    #[serde(default)]
    pub lesson_cursor: usize,
    #[serde(default)]
    pub history: Vec<ScoreRecord>,
    #[serde(default)]
    pub streak: StreakRecord,
    #[serde(default)]
    pub usage_lock: Option<NaiveDate>,
    #[serde(default)]
    pub best_average: Option<f64>,
}

impl StudentProgress {
    pub fn is_locked(&self, today: NaiveDate) -> bool {
        self.usage_lock == Some(today)
    }

    /// Applies a successful evaluation: history, streak and best average.
    pub fn record_report(&mut self, report: ScoreReport, now: DateTime<Utc>) -> &ScoreRecord {
        let average = report.scores.average();
        self.history.insert(
            0,
            ScoreRecord {
                id: Uuid::new_v4(),
                recorded_at: now,
                report,
            },
        );
        self.history.truncate(HISTORY_LIMIT);
        self.streak.record_success(now.date_naive());
        if self.best_average.is_none_or(|best| average > best) {
            self.best_average = Some(average);
        }
        &self.history[0]
    }
}

/// Scoped get/set access to persisted per-student state.
pub trait ProgressStore: Send + Sync {
    fn load(&self, student: &StudentId) -> Result<StudentProgress, StoreError>;
    fn save(&self, student: &StudentId, progress: &StudentProgress) -> Result<(), StoreError>;
}

impl dyn ProgressStore + '_ {
    /// Load, mutate and save in one call. Nothing is saved if `f` fails.
    pub fn update<R, E>(
        &self,
        student: &StudentId,
        f: impl FnOnce(&mut StudentProgress) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<StoreError>,
    {
        let mut progress = self.load(student)?;
        let out = f(&mut progress)?;
        self.save(student, &progress)?;
        Ok(out)
    }
}

#[derive(Default)]
pub struct InMemoryProgressStore {
    inner: Mutex<HashMap<StudentId, StudentProgress>>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressStore for InMemoryProgressStore {
    fn load(&self, student: &StudentId) -> Result<StudentProgress, StoreError> {
        let map = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(map.get(student).cloned().unwrap_or_default())
    }

    fn save(&self, student: &StudentId, progress: &StudentProgress) -> Result<(), StoreError> {
        let mut map = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        map.insert(student.clone(), progress.clone());
        Ok(())
    }
}

/// One pretty-printed JSON document per student under a directory.
pub struct JsonFileProgressStore {
    dir: PathBuf,
}

impl JsonFileProgressStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, student: &StudentId) -> PathBuf {
        self.dir.join(format!("{}.json", student.as_str()))
    }
}

impl ProgressStore for JsonFileProgressStore {
    fn load(&self, student: &StudentId) -> Result<StudentProgress, StoreError> {
        let path = self.path_for(student);
        if !path.exists() {
            debug!(%student, "no progress file yet, starting fresh");
            return Ok(StudentProgress::default());
        }
        let raw = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn save(&self, student: &StudentId, progress: &StudentProgress) -> Result<(), StoreError> {
        let path = self.path_for(student);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(progress)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::tests::sample_report;

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_student_id_normalization() {
        assert_eq!(StudentId::from_name("  Ali Khan ").as_str(), "ali_khan");
        assert_eq!(StudentId::from_name("Fatima-99!").as_str(), "fatima99");
        assert_eq!(StudentId::from_name("  ").as_str(), "student");
    }

    #[test]
    fn test_streak_extends_after_yesterday() {
        let mut streak = StreakRecord {
            count: 3,
            last_day: Some(day("2025-03-01")),
        };
        streak.record_success(day("2025-03-02"));
        assert_eq!(streak.count, 4);
        assert_eq!(streak.last_day, Some(day("2025-03-02")));
    }

    #[test]
    fn test_streak_resets_after_gap() {
        let mut streak = StreakRecord {
            count: 3,
            last_day: Some(day("2025-03-01")),
        };
        streak.record_success(day("2025-03-03"));
        assert_eq!(streak.count, 1);
    }

    #[test]
    fn test_streak_unchanged_same_day() {
        let mut streak = StreakRecord {
            count: 3,
            last_day: Some(day("2025-03-01")),
        };
        streak.record_success(day("2025-03-01"));
        assert_eq!(streak.count, 3);
    }

    #[test]
    fn test_first_success_starts_streak() {
        let mut streak = StreakRecord::default();
        streak.record_success(day("2025-03-01"));
        assert_eq!(streak.count, 1);
    }

    #[test]
    fn test_record_report_bounds_history_and_tracks_best() {
        let mut progress = StudentProgress::default();
        let now: DateTime<Utc> = "2025-03-01T10:00:00Z".parse().unwrap();
        for _ in 0..12 {
            progress.record_report(sample_report(), now);
        }
        assert_eq!(progress.history.len(), HISTORY_LIMIT);
        assert_eq!(progress.best_average, Some(3.5));

        let mut worse = sample_report();
        worse.scores.pronunciation = 1;
        progress.record_report(worse, now);
        assert_eq!(progress.best_average, Some(3.5));

        let mut better = sample_report();
        better.scores.grammar = 5;
        progress.record_report(better, now);
        assert_eq!(progress.best_average, Some(4.0));
        assert_eq!(progress.history[0].report.scores.grammar, 5);
    }

    #[test]
    fn test_update_does_not_save_on_error() {
        let store: Box<dyn ProgressStore> = Box::new(InMemoryProgressStore::new());
        let ali = StudentId::from_name("ali");
        let res: Result<(), crate::error::SessionError> = store.update(&ali, |p| {
            p.lesson_cursor = 7;
            Err(crate::error::SessionError::Validation("nope".into()))
        });
        assert!(res.is_err());
        assert_eq!(store.load(&ali).unwrap().lesson_cursor, 0);
    }

    #[test]
    fn test_json_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileProgressStore::new(dir.path().join("progress")).unwrap();
        let ali = StudentId::from_name("Ali");

        assert_eq!(store.load(&ali).unwrap(), StudentProgress::default());

        let mut progress = StudentProgress {
            level: Level::Advanced,
            lesson_cursor: 4,
            usage_lock: Some(day("2025-03-01")),
            ..Default::default()
        };
        progress.record_report(sample_report(), "2025-03-01T10:00:00Z".parse().unwrap());
        store.save(&ali, &progress).unwrap();

        let loaded = store.load(&ali).unwrap();
        assert_eq!(loaded, progress);
        assert!(loaded.is_locked(day("2025-03-01")));
        assert!(!loaded.is_locked(day("2025-03-02")));
    }
}
