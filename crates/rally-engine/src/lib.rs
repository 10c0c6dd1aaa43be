pub mod clock;
pub mod config;
pub mod departure;
pub mod engine;
pub mod error;
pub mod geo;
pub mod invite;
mod lifecycle;
pub mod notifier;
pub mod reminder;
pub mod scoring;
mod sync;
pub mod travel;
pub mod validation;
pub mod voting;

#[cfg(test)]
mod testing;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{Error, Result};
pub use reminder::{ReminderScheduler, TickReport};
