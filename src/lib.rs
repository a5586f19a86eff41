//! Real-time subscription gateway: a WebSocket layer in front of a
//! Directus-like content data service. This crate owns connection
//! lifecycle, subscription dispatch, and presence/focus tracking; the data
//! service, permission resolution, and HTTP server shell are all injected
//! via the traits in [`services`] and wired up by the embedding
//! application (see `src/main.rs` for a minimal example).

pub mod accountability;
pub mod auth;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod presence;
pub mod protocol;
pub mod services;
pub mod state;
pub mod subscriptions;
pub mod websocket;
