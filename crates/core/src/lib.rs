//! Screen-automation engine: pattern conditions decide which action fits the
//! current frame, effects turn located regions into taps and swipes, and the
//! executor walks the action graph until an exit action runs.

pub mod clock;
pub mod condition;
pub mod config;
pub mod debug;
pub mod detect;
pub mod effect;
pub mod error;
pub mod executor;
pub mod hook;
pub mod logger;
pub mod platform;
pub mod routines;
pub mod runner;
pub mod settings;
pub mod state;
pub mod stats;
pub mod types;
pub mod vision;

pub use error::{Error, Result};
