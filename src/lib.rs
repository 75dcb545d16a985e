//! Authloom - client-side OAuth 1.0a and OAuth 2.0 engine
//!
//! This library lets an application act as an OAuth consumer against many
//! third-party providers through one uniform surface: build the
//! authorization redirect, complete the callback into a token, then make
//! authenticated API calls with that token.  Providers that deviate from the
//! RFCs are accommodated through compliance hooks rather than forks of the
//! protocol code.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `registry`: provider registration and lookup
//! - `client`: the per-provider `RemoteClient` facade
//! - `oauth1`: three-legged OAuth 1.0a flow and request signing
//! - `oauth2`: authorization code, client credentials, refresh and revocation,
//!   PKCE, server metadata discovery
//! - `signer`: RFC 5849 signature base strings and signature methods
//! - `compliance`: request/response hooks and built-in provider fixes
//! - `store`: ephemeral state store and token store seams
//! - `config`: YAML configuration, environment overrides, validation
//! - `logging`: `tracing-subscriber` setup
//! - `error`: error types and result aliases
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use authloom::redirect::{AuthorizeOptions, CallbackParams};
//! use authloom::store::MemoryTokenStore;
//! use authloom::{Config, Registry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("authloom.yaml")?;
//!     config.validate()?;
//!
//!     let tokens = Arc::new(MemoryTokenStore::new());
//!     let registry = Registry::builder()
//!         .token_store(tokens.clone())
//!         .register_all(&config)
//!         .build()
//!         .await?;
//!
//!     let github = registry.get("github")?;
//!     let redirect = github
//!         .authorize_redirect("https://app.example.com/callback", &AuthorizeOptions::new())
//!         .await?;
//!     println!("visit {}", redirect.url);
//!
//!     // ...later, in the callback handler
//!     let params = CallbackParams::from_query("code=...&state=...");
//!     let token = github.authorize_access_token(&params).await?;
//!     tokens.insert("github", &"alice".into(), token)?;
//!
//!     let response = github.get("user", "alice").await?;
//!     println!("{}", response.text());
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod compliance;
pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod oauth1;
pub mod oauth2;
pub mod redirect;
pub mod registry;
pub mod signer;
pub mod store;
pub mod token;

// Re-export commonly used types
pub use client::{ApiBody, ApiRequest, RemoteClient};
pub use config::{Config, ProviderConfig};
pub use error::{AuthloomError, Result};
pub use registry::{ProviderRegistration, Registry, RegistryBuilder};
pub use token::{Identity, OAuth1Token, OAuth2Token, Token};
