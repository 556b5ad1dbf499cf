//! Inkpot - session management for a personal content site
//!
//! This library provides session identity, interchangeable session storage
//! backends, and the HTTP adapter that binds requests to sessions.

pub mod api;
pub mod config;
pub mod render;
pub mod session;
