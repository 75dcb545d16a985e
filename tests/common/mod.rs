use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use authloom::config::ProviderConfig;
use authloom::store::MemoryTokenStore;
use authloom::{OAuth2Token, ProviderRegistration, Registry, RemoteClient};
use tempfile::TempDir;

/// OAuth 2.0 provider whose endpoints live on `base_url`.
#[allow(dead_code)]
pub fn oauth2_provider(name: &str, base_url: &str) -> ProviderConfig {
    ProviderConfig {
        name: name.to_string(),
        client_id: "test-client".to_string(),
        client_secret: "test-secret".to_string(),
        authorize_url: Some(format!("{base_url}/authorize")),
        access_token_url: Some(format!("{base_url}/token")),
        revoke_url: Some(format!("{base_url}/revoke")),
        api_base_url: Some(format!("{base_url}/api/")),
        ..Default::default()
    }
}

/// OAuth 1.0a provider whose endpoints live on `base_url`.
#[allow(dead_code)]
pub fn oauth1_provider(name: &str, base_url: &str) -> ProviderConfig {
    ProviderConfig {
        name: name.to_string(),
        client_id: "dpf43f3p2l4k3l03".to_string(),
        client_secret: "kd94hf93k423kf44".to_string(),
        request_token_url: Some(format!("{base_url}/oauth/request_token")),
        authorize_url: Some(format!("{base_url}/oauth/authorize")),
        access_token_url: Some(format!("{base_url}/oauth/access_token")),
        api_base_url: Some(format!("{base_url}/api/")),
        ..Default::default()
    }
}

/// Builds a single-provider registry backed by `tokens`.
#[allow(dead_code)]
pub async fn client_for(
    registration: impl Into<ProviderRegistration>,
    tokens: Arc<MemoryTokenStore>,
) -> Arc<RemoteClient> {
    let registration = registration.into();
    let registry = Registry::builder()
        .token_store(tokens)
        .register(registration)
        .build()
        .await
        .expect("registry should build");
    let name = registry.names()[0].to_string();
    registry.get(&name).expect("provider is registered")
}

/// Bearer token expiring `expires_in` seconds from now (negative: already
/// expired).
#[allow(dead_code)]
pub fn bearer_token(access: &str, refresh: Option<&str>, expires_in: Option<i64>) -> OAuth2Token {
    OAuth2Token {
        access_token: access.to_string(),
        token_type: "Bearer".to_string(),
        refresh_token: refresh.map(str::to_string),
        expires_at: expires_in.map(|secs| chrono::Utc::now() + chrono::Duration::seconds(secs)),
        scope: None,
    }
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("authloom.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}
