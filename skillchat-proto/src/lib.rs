//! Wire and data types for the `SkillChat` direct-messaging engine.

pub mod codec;
pub mod event;
pub mod message;
pub mod roster;
