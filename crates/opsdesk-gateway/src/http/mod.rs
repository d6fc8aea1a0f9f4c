pub mod error;
pub mod health;
pub mod recurrences;
pub mod tasks;
pub mod timers;
