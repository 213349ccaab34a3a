//! Token acquisition against the tenant token endpoint.
//!
//! Three grants are spoken here: client credentials (the directory client's
//! own identity), refresh token (silent acquisition against a cached
//! account), and on-behalf-of (exchanging a caller's assertion for a
//! downstream token). `TokenBroker` layers the username fallback policy on
//! top of the raw grants.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::IdentityProviderConfig;
use crate::models::{ClaimsPrincipal, IdentityRef};

const OBO_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

#[derive(Debug, Error)]
pub enum AuthError {
    /// The provider wants an interactive sign-in or fresh consent.
    #[error("interactive sign-in required: {0}")]
    UiRequired(String),

    /// The provider answered with a claims challenge that only the caller
    /// can satisfy.
    #[error("claims challenge required: {0}")]
    ChallengeRequired(String),

    #[error("no cached account for {0}")]
    UnknownAccount(String),

    #[error("token request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("identity provider error {code}: {description}")]
    Provider { code: String, description: String },
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: String,
    #[serde(default)]
    suberror: Option<String>,
    #[serde(default)]
    claims: Option<String>,
}

fn map_provider_error(status: reqwest::StatusCode, body: &str) -> AuthError {
    match serde_json::from_str::<TokenErrorResponse>(body) {
        Ok(err) => {
            let description = if err.error_description.is_empty() {
                err.error.clone()
            } else {
                err.error_description
            };
            match err.error.as_str() {
                "interaction_required" | "invalid_grant" | "consent_required" => {
                    if err.claims.is_some() || err.suberror.as_deref() == Some("claims_challenge") {
                        AuthError::ChallengeRequired(description)
                    } else {
                        AuthError::UiRequired(description)
                    }
                }
                _ => AuthError::Provider {
                    code: err.error,
                    description,
                },
            }
        }
        Err(_) => AuthError::Provider {
            code: status.to_string(),
            description: body.to_string(),
        },
    }
}

/// Supplies a bearer token for outbound directory calls.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String, AuthError>;
}

/// Fixed-token source for tests and local wiring.
pub struct FixedTokenSource(pub String);

#[async_trait]
impl TokenSource for FixedTokenSource {
    async fn token(&self) -> Result<String, AuthError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_expired(&self, grace_period: Duration) -> bool {
        Utc::now() + grace_period >= self.expires_at
    }
}

/// Client-credentials token source with expiry-grace caching. The cache is
/// owned here; the source is constructed once and shared behind an `Arc`.
pub struct ClientCredentialsTokenSource {
    http: reqwest::Client,
    token_endpoint: String,
    client_id: String,
    client_secret: SecretString,
    scope: String,
    cached: RwLock<Option<CachedToken>>,
    grace_period: Duration,
}

impl ClientCredentialsTokenSource {
    pub fn new(identity: &IdentityProviderConfig, scope: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_endpoint: identity.token_endpoint(),
            client_id: identity.client_id.clone(),
            client_secret: identity.client_secret.clone(),
            scope,
            cached: RwLock::new(None),
            grace_period: Duration::minutes(5),
        }
    }

    async fn acquire(&self) -> Result<CachedToken, AuthError> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", &self.client_id),
            ("client_secret", self.client_secret.expose_secret()),
            ("scope", &self.scope),
        ];

        let response = self
            .http
            .post(&self.token_endpoint)
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_provider_error(status, &body));
        }

        let token: TokenResponse = response.json().await?;
        let expires_at = Utc::now() + Duration::seconds(token.expires_in);
        debug!(scope = %self.scope, %expires_at, "Acquired client-credentials token");

        Ok(CachedToken {
            access_token: token.access_token,
            expires_at,
        })
    }

    /// Drops the cached token so the next call refreshes.
    pub async fn invalidate(&self) {
        let mut cache = self.cached.write().await;
        *cache = None;
    }
}

#[async_trait]
impl TokenSource for ClientCredentialsTokenSource {
    async fn token(&self) -> Result<String, AuthError> {
        {
            let cache = self.cached.read().await;
            if let Some(ref token) = *cache {
                if !token.is_expired(self.grace_period) {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let token = self.acquire().await?;
        {
            let mut cache = self.cached.write().await;
            *cache = Some(token.clone());
        }
        Ok(token.access_token)
    }
}

/// The identity provider's delegated-token operations, behind a trait so
/// workflows can be exercised without a live tenant.
#[async_trait]
pub trait IdentityTokenService: Send + Sync {
    /// Silent acquisition against the cached account matching `username`.
    /// With `force_refresh` the cached access token is bypassed and the
    /// refresh grant redeemed, invalidating the previous token.
    async fn acquire_silent(
        &self,
        scopes: &[String],
        username: &str,
        force_refresh: bool,
    ) -> Result<String, AuthError>;

    /// Delegated acquisition for the user the principal identifies. With a
    /// raw assertion present this is the on-behalf-of exchange; without one
    /// it falls back to the account cache.
    async fn acquire_on_behalf_of(
        &self,
        scopes: &[String],
        principal: &ClaimsPrincipal,
    ) -> Result<String, AuthError>;

    /// Forgets the cached account. `UnknownAccount` when there is none.
    async fn remove_account(&self, username: &str) -> Result<(), AuthError>;
}

#[derive(Debug, Clone)]
struct CachedAccount {
    refresh_token: Option<String>,
    access_token: String,
    scope_key: String,
    expires_at: DateTime<Utc>,
}

/// Production `IdentityTokenService` over the tenant token endpoint. The
/// account cache lives inside this singleton-scoped component; nothing here
/// is process-global.
pub struct OAuthTokenService {
    http: reqwest::Client,
    token_endpoint: String,
    client_id: String,
    client_secret: SecretString,
    accounts: RwLock<HashMap<String, CachedAccount>>,
    grace_period: Duration,
}

impl OAuthTokenService {
    pub fn new(identity: &IdentityProviderConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_endpoint: identity.token_endpoint(),
            client_id: identity.client_id.clone(),
            client_secret: identity.client_secret.clone(),
            accounts: RwLock::new(HashMap::new()),
            grace_period: Duration::minutes(5),
        }
    }

    fn scope_key(scopes: &[String]) -> String {
        scopes.join(" ")
    }

    fn account_key(username: &str) -> String {
        username.to_ascii_lowercase()
    }

    async fn post_grant(&self, params: &[(&str, &str)]) -> Result<TokenResponse, AuthError> {
        let response = self
            .http
            .post(&self.token_endpoint)
            .form(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_provider_error(status, &body));
        }

        Ok(response.json().await?)
    }

    async fn store_account(&self, username: &str, scope_key: String, token: &TokenResponse) {
        let mut accounts = self.accounts.write().await;
        let key = Self::account_key(username);
        let refresh_token = token
            .refresh_token
            .clone()
            .or_else(|| accounts.get(&key).and_then(|a| a.refresh_token.clone()));
        accounts.insert(
            key,
            CachedAccount {
                refresh_token,
                access_token: token.access_token.clone(),
                scope_key,
                expires_at: Utc::now() + Duration::seconds(token.expires_in),
            },
        );
    }

    async fn redeem_refresh_token(
        &self,
        scopes: &[String],
        username: &str,
        refresh_token: &str,
    ) -> Result<String, AuthError> {
        let scope = Self::scope_key(scopes);
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", &self.client_id),
            ("client_secret", self.client_secret.expose_secret()),
            ("refresh_token", refresh_token),
            ("scope", &scope),
        ];

        let token = self.post_grant(&params).await?;
        self.store_account(username, scope, &token).await;
        debug!(username, "Redeemed refresh token");
        Ok(token.access_token)
    }
}

#[async_trait]
impl IdentityTokenService for OAuthTokenService {
    async fn acquire_silent(
        &self,
        scopes: &[String],
        username: &str,
        force_refresh: bool,
    ) -> Result<String, AuthError> {
        let scope_key = Self::scope_key(scopes);
        let account = {
            let accounts = self.accounts.read().await;
            accounts.get(&Self::account_key(username)).cloned()
        };

        let account = account.ok_or_else(|| AuthError::UnknownAccount(username.to_string()))?;

        if !force_refresh
            && account.scope_key == scope_key
            && Utc::now() + self.grace_period < account.expires_at
        {
            debug!(username, "Using cached access token");
            return Ok(account.access_token);
        }

        let refresh_token = account
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::UiRequired(format!("no refresh grant for {}", username)))?;

        self.redeem_refresh_token(scopes, username, refresh_token)
            .await
    }

    async fn acquire_on_behalf_of(
        &self,
        scopes: &[String],
        principal: &ClaimsPrincipal,
    ) -> Result<String, AuthError> {
        let username = principal.upn().unwrap_or_default().to_string();

        if let Some(assertion) = principal.assertion() {
            let scope = Self::scope_key(scopes);
            let params = [
                ("grant_type", OBO_GRANT_TYPE),
                ("client_id", &self.client_id),
                ("client_secret", self.client_secret.expose_secret()),
                ("assertion", assertion),
                ("scope", &scope),
                ("requested_token_use", "on_behalf_of"),
            ];

            let token = self.post_grant(&params).await?;
            if !username.is_empty() {
                self.store_account(&username, scope, &token).await;
            }
            debug!(username, "Exchanged assertion on behalf of caller");
            return Ok(token.access_token);
        }

        // No assertion: serve from the delegated grant cached for this user.
        if username.is_empty() {
            return Err(AuthError::UiRequired(
                "principal carries no username claim".to_string(),
            ));
        }

        let account = {
            let accounts = self.accounts.read().await;
            accounts.get(&Self::account_key(&username)).cloned()
        };
        let account = match account {
            Some(account) => account,
            None => {
                return Err(AuthError::UiRequired(format!(
                    "no delegated grant cached for {}",
                    username
                )));
            }
        };

        let scope_key = Self::scope_key(scopes);
        if account.scope_key == scope_key && Utc::now() + self.grace_period < account.expires_at {
            return Ok(account.access_token);
        }

        let refresh_token = account
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::UiRequired(format!("no refresh grant for {}", username)))?;

        self.redeem_refresh_token(scopes, &username, refresh_token)
            .await
    }

    async fn remove_account(&self, username: &str) -> Result<(), AuthError> {
        let mut accounts = self.accounts.write().await;
        accounts
            .remove(&Self::account_key(username))
            .map(|_| ())
            .ok_or_else(|| AuthError::UnknownAccount(username.to_string()))
    }
}

/// Acquisition policy over an injected `IdentityTokenService`.
///
/// The username path tries silent-with-forced-refresh first and falls back
/// to the delegated path with a synthesized single-UPN principal; the first
/// failure is logged, the second surfaces. Principal and claims identities
/// go straight to the delegated path.
#[derive(Clone)]
pub struct TokenBroker {
    identity: Arc<dyn IdentityTokenService>,
}

impl TokenBroker {
    pub fn new(identity: Arc<dyn IdentityTokenService>) -> Self {
        Self { identity }
    }

    pub async fn get_token(
        &self,
        scopes: &[String],
        identity: &IdentityRef,
    ) -> Result<String, AuthError> {
        match identity {
            IdentityRef::Username(username) => {
                match self.identity.acquire_silent(scopes, username, true).await {
                    Ok(token) => Ok(token),
                    Err(first) => {
                        warn!(
                            username,
                            error = %first,
                            "Silent acquisition failed, retrying on behalf of the user"
                        );
                        let principal = ClaimsPrincipal::from_upn(username);
                        self.identity.acquire_on_behalf_of(scopes, &principal).await
                    }
                }
            }
            IdentityRef::Principal(principal) => {
                self.identity.acquire_on_behalf_of(scopes, principal).await
            }
            IdentityRef::Claims(claims) => {
                let principal = ClaimsPrincipal::new(claims.clone());
                self.identity.acquire_on_behalf_of(scopes, &principal).await
            }
        }
    }

    pub async fn sign_out(&self, username: &str) -> Result<(), AuthError> {
        self.identity.remove_account(username).await
    }
}

/// Scripted `IdentityTokenService` for tests: tokens keyed by username, with
/// call counters and switchable silent failures.
pub struct MockIdentityTokens {
    tokens: std::sync::Mutex<HashMap<String, String>>,
    fail_silent: std::sync::atomic::AtomicBool,
    obo_error: std::sync::Mutex<Option<fn(String) -> AuthError>>,
    silent_calls: std::sync::atomic::AtomicU64,
    obo_calls: std::sync::atomic::AtomicU64,
}

impl MockIdentityTokens {
    pub fn new() -> Self {
        Self {
            tokens: std::sync::Mutex::new(HashMap::new()),
            fail_silent: std::sync::atomic::AtomicBool::new(false),
            obo_error: std::sync::Mutex::new(None),
            silent_calls: std::sync::atomic::AtomicU64::new(0),
            obo_calls: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn with_token(self, username: &str, token: &str) -> Self {
        self.tokens
            .lock()
            .unwrap()
            .insert(username.to_ascii_lowercase(), token.to_string());
        self
    }

    pub fn fail_silent(self) -> Self {
        self.fail_silent
            .store(true, std::sync::atomic::Ordering::SeqCst);
        self
    }

    /// Makes the delegated path fail with the given error constructor.
    pub fn fail_on_behalf_of(self, make: fn(String) -> AuthError) -> Self {
        *self.obo_error.lock().unwrap() = Some(make);
        self
    }

    pub fn silent_calls(&self) -> u64 {
        self.silent_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn obo_calls(&self) -> u64 {
        self.obo_calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl Default for MockIdentityTokens {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityTokenService for MockIdentityTokens {
    async fn acquire_silent(
        &self,
        _scopes: &[String],
        username: &str,
        _force_refresh: bool,
    ) -> Result<String, AuthError> {
        self.silent_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.fail_silent.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(AuthError::UiRequired(format!(
                "silent acquisition rejected for {}",
                username
            )));
        }
        self.tokens
            .lock()
            .unwrap()
            .get(&username.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| AuthError::UnknownAccount(username.to_string()))
    }

    async fn acquire_on_behalf_of(
        &self,
        _scopes: &[String],
        principal: &ClaimsPrincipal,
    ) -> Result<String, AuthError> {
        self.obo_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let username = principal.upn().unwrap_or_default().to_string();
        if let Some(make) = *self.obo_error.lock().unwrap() {
            return Err(make(username));
        }
        self.tokens
            .lock()
            .unwrap()
            .get(&username.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| AuthError::UiRequired(format!("no delegated grant for {}", username)))
    }

    async fn remove_account(&self, username: &str) -> Result<(), AuthError> {
        self.tokens
            .lock()
            .unwrap()
            .remove(&username.to_ascii_lowercase())
            .map(|_| ())
            .ok_or_else(|| AuthError::UnknownAccount(username.to_string()))
    }
}
