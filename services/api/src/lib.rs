//! Tutor API Library Crate
//!
//! The server half of the speaking tutor: it holds the OpenAI secret, issues
//! ephemeral realtime credentials, scores finished transcripts and keeps the
//! student roster. The `api` binary is a thin wrapper around this library.

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
