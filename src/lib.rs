//! Companion chat client
//!
//! Starts persona-bound sessions against a companion backend and streams the
//! companion's replies into a local transcript, one reply at a time.

pub mod api;
pub mod config;
pub mod reconciler;
pub mod session;
pub mod transcript;
