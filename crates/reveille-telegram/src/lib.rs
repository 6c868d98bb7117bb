//! Telegram front end for Reveille.
//!
//! A thin request/response surface over the scheduler: a minimal Bot API
//! client, a long-polling command loop, and device-code auth orchestration.
//! The scheduler's notification and re-auth callbacks are built here.

mod bot;
mod client;
mod error;

pub use bot::TelegramBot;
pub use client::{Chat, Message, TelegramClient, Update};
pub use error::TelegramError;
