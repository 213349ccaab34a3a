//! Async client for the users-api HTTP surface.
//!
//! Every call acquires a bearer token from the injected [`TokenSource`],
//! attaches it together with the current trace context and decodes the
//! JSON answer. A 401 whose challenge proposes tenant-admin consent is
//! turned into [`ClientError::ConsentRequired`] carrying a consent URI
//! rewritten for this client's own redirect registration.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, WWW_AUTHENTICATE};
use reqwest::{Method, StatusCode, Url};

use identity_core::observability::inject_trace_context;
use identity_core::www_authenticate::bearer_parameter;

use crate::error::ClientError;
use crate::models::{
    AddToGroupStatus, InviteUserResult, RemoveFromGroupStatus, UserProfile, UserStatus,
};

/// Hands out bearer tokens accepted by the users-api deployment.
///
/// Implementations typically sit on a confidential-client token cache;
/// the requested scope is the service scope from the client config.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self, scopes: &[String]) -> anyhow::Result<String>;
}

/// Token source answering every request with one pre-acquired token.
pub struct StaticTokenSource(pub String);

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn access_token(&self, _scopes: &[String]) -> anyhow::Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone)]
pub struct UsersClientConfig {
    /// Base address of the users-api deployment, with or without a
    /// trailing slash.
    pub base_url: String,
    /// Scope requested from the token source for every call.
    pub service_scope: String,
    /// Where invited guests land after redeeming. Also carried as the
    /// `state` of a rewritten consent URI so the admin returns here.
    pub redirect_url: String,
    /// Redirect registered for the tenant-admin consent round trip.
    pub admin_consent_redirect_url: String,
}

/// Typed client for the user lookup, membership and invitation endpoints.
pub struct UsersClient {
    http: reqwest::Client,
    config: UsersClientConfig,
    tokens: Arc<dyn TokenSource>,
}

impl UsersClient {
    pub fn new(mut config: UsersClientConfig, tokens: Arc<dyn TokenSource>) -> Self {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Self {
            http: reqwest::Client::new(),
            config,
            tokens,
        }
    }

    /// Whether a downstream token can be acquired for the given user.
    pub async fn can_authenticate_user(&self, user_mail: &str) -> Result<bool, ClientError> {
        let response = self
            .send(
                Method::POST,
                "/api/users/CanAuthenticateUser",
                &[("userMail", user_mail)],
            )
            .await?;
        Ok(response.json().await?)
    }

    /// Whether the mail address resolves to a directory user.
    pub async fn get_user_status(&self, user_mail: &str) -> Result<UserStatus, ClientError> {
        let response = self
            .send(
                Method::GET,
                "/api/users/getuserstatus",
                &[("userMail", user_mail)],
            )
            .await?;
        Ok(response.json().await?)
    }

    /// The signed-in caller's directory profile, `None` when the
    /// directory does not know the account.
    pub async fn get_logged_in_user(&self) -> Result<Option<UserProfile>, ClientError> {
        let response = self
            .send(Method::GET, "/api/users/getloggedingraphuser", &[])
            .await?;
        Ok(response.json().await?)
    }

    /// Principal names of every enabled user in the tenant.
    pub async fn get_all_users(&self) -> Result<Vec<String>, ClientError> {
        let response = self
            .send(Method::GET, "/api/users/getallgraphusers", &[])
            .await?;
        Ok(response.json().await?)
    }

    /// Invites an external user and reports the combined invitation and
    /// group-grant outcome. Redeemed guests land on the configured
    /// redirect page.
    pub async fn invite_user(&self, user_mail: &str) -> Result<InviteUserResult, ClientError> {
        let response = self
            .send(
                Method::POST,
                "/api/users/InviteUser",
                &[
                    ("userMail", user_mail),
                    ("redirectUrl", &self.config.redirect_url),
                ],
            )
            .await?;
        Ok(response.json().await?)
    }

    pub async fn add_to_group(
        &self,
        user_mail: &str,
        group_id: &str,
    ) -> Result<AddToGroupStatus, ClientError> {
        let response = self
            .send(
                Method::POST,
                "/api/users/AddToGroup",
                &[("userMail", user_mail), ("groupId", group_id)],
            )
            .await?;
        Ok(response.json().await?)
    }

    pub async fn remove_from_group(
        &self,
        user_mail: &str,
        group_id: &str,
    ) -> Result<RemoveFromGroupStatus, ClientError> {
        let response = self
            .send(
                Method::POST,
                "/api/users/RemoveUserFromGroup",
                &[("userMail", user_mail), ("groupId", group_id)],
            )
            .await?;
        Ok(response.json().await?)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<reqwest::Response, ClientError> {
        let token = self
            .tokens
            .access_token(std::slice::from_ref(&self.config.service_scope))
            .await
            .map_err(|error| {
                tracing::error!(%error, "Token acquisition for users-api failed");
                ClientError::Auth(error.to_string())
            })?;

        let mut trace_headers = HeaderMap::new();
        inject_trace_context(&mut trace_headers);

        let url = format!("{}{}", self.config.base_url, path);
        let response = self
            .http
            .request(method, &url)
            .query(query)
            .bearer_auth(token)
            .header(ACCEPT, "application/json")
            .headers(trace_headers)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(response);
        }

        if status == StatusCode::UNAUTHORIZED {
            if let Some(consent_uri) = self.consent_uri(response.headers()) {
                tracing::warn!(%consent_uri, "users-api asks for tenant-admin consent");
                return Err(ClientError::ConsentRequired { consent_uri });
            }
        }

        let body = response.text().await.unwrap_or_default();
        tracing::error!(status = status.as_u16(), %url, "users-api call failed");
        Err(ClientError::UnexpectedStatus {
            status: status.as_u16(),
            body,
        })
    }

    /// Extracts a consent URI from a bearer challenge, rewritten for
    /// this client. `None` when the challenge proposes anything other
    /// than consent.
    fn consent_uri(&self, headers: &HeaderMap) -> Option<String> {
        let challenge = headers
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find(|value| value.trim_start().starts_with("Bearer"))?;

        if bearer_parameter(challenge, "proposedAction").as_deref() != Some("consent") {
            return None;
        }

        let raw = bearer_parameter(challenge, "consentUri")?;
        self.rewrite_consent_uri(&raw)
    }

    /// The proposed consent URI points back at the service's own
    /// redirect registration. Swap in the redirect this client has
    /// registered, force the consent prompt and carry the return
    /// address in `state`.
    fn rewrite_consent_uri(&self, raw: &str) -> Option<String> {
        let mut uri = Url::parse(raw).ok()?;
        let kept: Vec<(String, String)> = uri
            .query_pairs()
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .filter(|(name, _)| name != "redirect_uri")
            .collect();
        {
            let mut pairs = uri.query_pairs_mut();
            pairs.clear();
            for (name, value) in &kept {
                pairs.append_pair(name, value);
            }
            pairs.append_pair("redirect_uri", &self.config.admin_consent_redirect_url);
            pairs.append_pair("prompt", "consent");
            pairs.append_pair("state", &self.config.redirect_url);
        }
        Some(uri.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> UsersClient {
        UsersClient::new(
            UsersClientConfig {
                base_url: "https://users-api.example/".to_string(),
                service_scope: "api://users-api/.default".to_string(),
                redirect_url: "https://portal.example/welcome".to_string(),
                admin_consent_redirect_url: "https://portal.example/consent-reply".to_string(),
            },
            Arc::new(StaticTokenSource("unused".to_string())),
        )
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        assert_eq!(client().config.base_url, "https://users-api.example");
    }

    #[test]
    fn consent_uri_swaps_the_redirect_and_tags_prompt_and_state() {
        let rewritten = client()
            .rewrite_consent_uri(
                "https://login.example/organizations/v2.0/adminconsent\
                 ?client_id=abc\
                 &redirect_uri=https%3A%2F%2Fusers-api.example%2Freply\
                 &scope=api%3A%2F%2Fdownstream%2F.default",
            )
            .unwrap();

        let uri = Url::parse(&rewritten).unwrap();
        let pairs: Vec<(String, String)> = uri
            .query_pairs()
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();

        assert!(pairs.contains(&("client_id".to_string(), "abc".to_string())));
        assert!(pairs.contains(&(
            "redirect_uri".to_string(),
            "https://portal.example/consent-reply".to_string()
        )));
        assert!(pairs.contains(&("prompt".to_string(), "consent".to_string())));
        assert!(pairs.contains(&(
            "state".to_string(),
            "https://portal.example/welcome".to_string()
        )));
        assert!(pairs
            .iter()
            .all(|(_, value)| value != "https://users-api.example/reply"));
    }

    #[test]
    fn consent_challenges_yield_a_rewritten_uri() {
        let mut headers = HeaderMap::new();
        headers.insert(
            WWW_AUTHENTICATE,
            "Bearer consentUri=\"https://login.example/adminconsent?client_id=abc\", \
             proposedAction=\"consent\""
                .parse()
                .unwrap(),
        );

        let uri = client().consent_uri(&headers).unwrap();
        assert!(uri.starts_with("https://login.example/adminconsent?"));
        assert!(uri.contains("prompt=consent"));
    }

    #[test]
    fn challenges_without_a_consent_action_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(
            WWW_AUTHENTICATE,
            "Bearer error=\"insufficient_claims\", claims=\"e30=\""
                .parse()
                .unwrap(),
        );

        assert!(client().consent_uri(&headers).is_none());
    }
}
