//! # Game Server Library
//!
//! This library provides the authoritative backend for the multiplayer
//! resource-management game. It owns every account, building and stockpile;
//! thin clients connect over plaintext TCP, authenticate, and drive all state
//! changes through a small text command protocol.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Economy
//! Stockpiles advance over elapsed real time according to each building's
//! production rate and upgrade stage. The server never runs a background
//! timer: production is settled lazily whenever a player-initiated command
//! needs fresh balances, and settlements are idempotent so client polling
//! cannot double-credit.
//!
//! ### Session Management
//! One lightweight task per accepted connection, with:
//! - A two-state machine (unauthenticated / authenticated) per session
//! - Bounded message sizes and an idle read timeout
//! - A connection-count cap so many clients cannot exhaust the process
//! - Per-player locking so two sessions for the same player cannot interleave
//!   a settlement with an upgrade and lose an update
//!
//! ### Durable State
//! Accounts and buildings live in a relational store; every resource-
//! affecting command is all-or-nothing against it, and balances can never be
//! driven negative.
//!
//! ## Module Organization
//!
//! - [`config`]: server configuration with observed defaults
//! - [`network`]: TCP acceptor, admission control, session spawning
//! - [`session`]: per-connection state machine and command dispatch
//! - [`economy`]: pure accrual math plus the settlement orchestrator
//! - [`store`]: SQLite-backed persistence for players and buildings
//! - [`locks`]: per-player mutual exclusion registry
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use server::store::Store;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let store = Store::connect(&config.database_url).await?;
//!     store.init_schema().await?;
//!
//!     // Bind the listener, then serve sessions until the process exits.
//!     let server = Server::bind(config, store).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod economy;
pub mod locks;
pub mod network;
pub mod session;
pub mod store;
