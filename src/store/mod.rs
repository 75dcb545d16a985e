//! Storage seams
//!
//! The engine owns no durable state.  It talks to two caller-supplied
//! stores:
//!
//! - [`state`] -- the short-TTL Ephemeral State Store that carries
//!   request-token secrets, CSRF `state` and PKCE verifiers across the
//!   redirect round trip
//! - [`token`] -- the Token Store Adapter (`fetch_token` / `update_token`)
//!   bridging to the caller's long-lived storage
//!
//! [`keyring`] provides a ready-made token store backed by the OS keyring.

pub mod keyring;
pub mod state;
pub mod token;

pub use state::{FlowCorrelationId, MemoryStateStore, StateStore, DEFAULT_STATE_TTL};
pub use token::{MemoryTokenStore, NoopTokenStore, TokenLoader, TokenSaver};
