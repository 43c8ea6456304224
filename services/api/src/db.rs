//! Roster Data Access Layer
//!
//! The roster is a small external table of students and their PINs. It is
//! backed by PostgreSQL through `sqlx` when a database is configured and by
//! an in-process map otherwise.

use crate::models::{Credentials, Student};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    #[error("student '{0}' already exists")]
    Duplicate(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[async_trait]
pub trait RosterStore: Send + Sync {
    async fn add(&self, credentials: &Credentials) -> Result<Student, RosterError>;
    /// `None` when the name is unknown, inactive or the PIN does not match.
    async fn verify(&self, credentials: &Credentials) -> Result<Option<Student>, RosterError>;
    async fn list(&self) -> Result<Vec<Student>, RosterError>;
}

/// A wrapper around the `PgPool` implementing [`RosterStore`].
#[derive(Clone)]
pub struct PgRoster {
    pool: PgPool,
}

impl PgRoster {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl RosterStore for PgRoster {
    async fn add(&self, credentials: &Credentials) -> Result<Student, RosterError> {
        let result = sqlx::query_as::<_, Student>(
            r#"
            INSERT INTO students (name, pin, active)
            VALUES ($1, $2, TRUE)
            RETURNING name, active, created_at
            "#,
        )
        .bind(&credentials.name)
        .bind(&credentials.pin)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(student) => Ok(student),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(RosterError::Duplicate(credentials.name.clone()))
            }
            Err(e) => Err(RosterError::Backend(e.into())),
        }
    }

    async fn verify(&self, credentials: &Credentials) -> Result<Option<Student>, RosterError> {
        let student = sqlx::query_as::<_, Student>(
            r#"
            SELECT name, active, created_at
            FROM students
            WHERE name = $1 AND pin = $2 AND active
            "#,
        )
        .bind(&credentials.name)
        .bind(&credentials.pin)
        .fetch_optional(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;
        Ok(student)
    }

    async fn list(&self) -> Result<Vec<Student>, RosterError> {
        let students = sqlx::query_as::<_, Student>(
            "SELECT name, active, created_at FROM students ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;
        Ok(students)
    }
}

struct Entry {
    pin: String,
    student: Student,
}

/// Development roster. Lost on restart.
#[derive(Default)]
pub struct InMemoryRoster {
    students: RwLock<BTreeMap<String, Entry>>,
}

impl InMemoryRoster {
    pub fn new() -> Self {
        info!("Using in-memory roster");
        Self::default()
    }
}

#[async_trait]
impl RosterStore for InMemoryRoster {
    async fn add(&self, credentials: &Credentials) -> Result<Student, RosterError> {
        let mut students = self.students.write().await;
        if students.contains_key(&credentials.name) {
            return Err(RosterError::Duplicate(credentials.name.clone()));
        }
        let student = Student {
            name: credentials.name.clone(),
            active: true,
            created_at: Utc::now(),
        };
        students.insert(
            credentials.name.clone(),
            Entry {
                pin: credentials.pin.clone(),
                student: student.clone(),
            },
        );
        Ok(student)
    }

    async fn verify(&self, credentials: &Credentials) -> Result<Option<Student>, RosterError> {
        let students = self.students.read().await;
        Ok(students
            .get(&credentials.name)
            .filter(|e| e.student.active && e.pin == credentials.pin)
            .map(|e| e.student.clone()))
    }

    async fn list(&self) -> Result<Vec<Student>, RosterError> {
        let students = self.students.read().await;
        Ok(students.values().map(|e| e.student.clone()).collect())
    }
}
