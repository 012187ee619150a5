//! Nerd Muffin - quota-gated Discord bot
//!
//! This library relays chat messages to a completion service, optionally lets
//! the model attach generated images, and keeps a daily token budget per user
//! in a key-value store.

pub mod agent;
pub mod adapters;
pub mod clock;
pub mod commands;
pub mod config;
pub mod error;
pub mod images;
pub mod response;
pub mod sentiment;
pub mod store;
pub mod tools;
pub mod ui;

pub use error::{Error, Result};
