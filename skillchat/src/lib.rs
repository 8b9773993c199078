//! `SkillChat` — direct-messaging synchronization engine for the learning
//! dashboard.
//!
//! REST is the source of truth for message writes and history; the live
//! channel carries pushes and control signals; a local snapshot cache makes
//! the inbox render before either answers.

pub mod api;
pub mod cache;
pub mod chat;
pub mod config;
pub mod transport;
