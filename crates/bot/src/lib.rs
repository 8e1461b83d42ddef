//! Telegram Bot Interface - conversational front door for Karigar
//!
//! This crate turns raw chat updates into engine calls:
//! - **Runner** (`runner`) - long-poll update loop with reconnection and per-chat ordering
//! - **Dispatcher** (`events`) - single ordered-priority router for every inbound event
//! - **Commands** (`commands`) - slash commands, menu labels and greetings
//! - **Linking** (`linking`) - binds a chat to an account by email
//! - **Callbacks** (`callbacks`) - inline button payloads (`sample_`, `deal_`, `mission_`)
//! - **Actions** (`actions`) - balance, missions, certificate and share links
//!
//! # Architecture
//!
//! ```text
//! Telegram → UpdateSource → PollingRunner → Dispatcher → StepEngine → Stores
//!                                              ↓
//!                                   Messenger ← OutgoingMessage
//! ```
//!
//! # Key Types
//!
//! - `PollingRunner` - drives an `UpdateSource` and keeps each chat's events serial
//! - `Dispatcher` - callbacks, then email capture, then the active flow, then commands
//! - `AccountLinker` - email capture and the buyer registration offer

pub mod actions;
pub mod callbacks;
pub mod commands;
pub mod events;
pub mod linking;
pub mod runner;

pub use actions::{ActionOutcome, BotSettings};
pub use events::{
    DispatchError, DispatchOutcome, Dispatcher, EventContext, InboundEvent, UpdateEnvelope,
};
pub use linking::LinkingSessions;
pub use runner::{PollingRunner, ReconnectPolicy, TransportError, UpdateSource};
