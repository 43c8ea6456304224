//! Client side of the voice tutor: configuration, the session runtime that
//! drives a live WebRTC session, post-session scoring and progress
//! maintenance commands.

pub mod client;
pub mod commands;
pub mod config;
pub mod runtime;
pub mod scoring;
