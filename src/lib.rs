//! Playbox: per-user project sandbox server.
//!
//! Provisions one container per authenticated identity, bridges interactive
//! terminal and project "run" sessions into it over WebSocket, and reclaims
//! sandboxes that go idle.

pub mod activity;
pub mod api;
pub mod auth;
pub mod config;
pub mod container;
pub mod reclaim;
pub mod session;
