//! Directory provider client.
//!
//! Speaks the provider's OData dialect over HTTPS: `$filter`/`$select`
//! queries for users, `$ref` membership writes, paginated member listings
//! and external invitations. Everything goes through `DirectoryService` so
//! workflows and handlers never see the wire.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::models::{DirectoryInvitation, DirectoryObject, DirectoryUser};
use crate::services::token::{AuthError, TokenSource};

/// Fields requested on every user read. The projection matches what the
/// frontends render, nothing more.
pub const USER_PROJECTION: &str =
    "id,userPrincipalName,displayName,givenName,accountEnabled,mail,mobilePhone,country,streetAddress,photo";

const MAX_RETRIES: u32 = 3;
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(500);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("directory authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("no directory user with mail {0}")]
    MissingUser(String),

    /// The provider rejected the request. Response headers ride along so
    /// callers can inspect authentication challenges.
    #[error("directory error {code} ({status}): {message}")]
    Provider {
        code: String,
        message: String,
        status: u16,
        headers: HeaderMap,
    },
}

impl DirectoryError {
    pub fn provider(code: impl Into<String>, message: impl Into<String>, status: u16) -> Self {
        Self::Provider {
            code: code.into(),
            message: message.into(),
            status,
            headers: HeaderMap::new(),
        }
    }
}

/// Outcome of an add-member write. `Unchanged` is the identity value used
/// when a fallback path swallows the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddMemberResult {
    Added,
    AlreadyExists,
    #[default]
    Unchanged,
}

/// Outcome of a remove-member write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemoveMemberResult {
    Removed,
    NotMember,
    #[default]
    Unchanged,
}

#[derive(Debug, Deserialize)]
struct ODataErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ODataError {
    error: ODataErrorBody,
}

#[derive(Debug, Deserialize)]
struct ODataPage<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

/// Builds a `$filter` matching a user by mail. Single quotes in the value
/// are doubled per the OData literal rules.
pub fn mail_filter(mail: &str) -> String {
    format!("mail eq '{}'", escape_odata_literal(mail))
}

/// Builds a `$filter` matching an enabled user by object id.
pub fn enabled_user_by_id_filter(object_id: &str) -> String {
    format!(
        "accountEnabled eq true and id eq '{}'",
        escape_odata_literal(object_id)
    )
}

fn escape_odata_literal(value: &str) -> String {
    value.replace('\'', "''")
}

fn parse_odata_error(status: reqwest::StatusCode, body: &str) -> (String, String) {
    match serde_json::from_str::<ODataError>(body) {
        Ok(parsed) => (parsed.error.code, parsed.error.message),
        Err(_) => (status.to_string(), body.chars().take(512).collect()),
    }
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Read and write operations against the user directory.
#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// First user matching the filter, `None` on no match. When the filter
    /// is ambiguous the provider's first page order decides which user wins.
    async fn find_user_by_filter(&self, filter: &str)
        -> Result<Option<DirectoryUser>, DirectoryError>;

    /// All direct members of the group, followed across pages.
    async fn list_group_members(&self, group_id: &str)
        -> Result<Vec<DirectoryObject>, DirectoryError>;

    /// Adds the user with the given mail to the group. The duplicate-member
    /// rejection is folded into `AlreadyExists` rather than surfacing as an
    /// error.
    async fn add_member(&self, user_mail: &str, group_id: &str)
        -> Result<AddMemberResult, DirectoryError>;

    /// Removes the user with the given mail from the group. A missing
    /// membership reports `NotMember`.
    async fn remove_member(
        &self,
        user_mail: &str,
        group_id: &str,
    ) -> Result<RemoveMemberResult, DirectoryError>;

    /// Every enabled user in the tenant, full projection.
    async fn list_all_users(&self) -> Result<Vec<DirectoryUser>, DirectoryError>;

    /// Principal names of every enabled user, projected from
    /// `list_all_users`. Users without a principal name are skipped.
    async fn list_enabled_principal_names(&self) -> Result<Vec<String>, DirectoryError> {
        Ok(self
            .list_all_users()
            .await?
            .into_iter()
            .filter_map(|user| user.user_principal_name)
            .collect())
    }

    /// Invites an external address into the tenant as a guest.
    async fn invite_external_user(
        &self,
        email: &str,
        redirect_url: &str,
    ) -> Result<Option<DirectoryInvitation>, DirectoryError>;
}

/// `DirectoryService` over HTTPS with bearer auth from a `TokenSource`.
///
/// Throttling and transient upstream failures are retried with doubling
/// backoff, honoring `Retry-After` when the provider sends one.
pub struct HttpDirectoryClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl HttpDirectoryClient {
    pub fn new(
        base_url: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<Self, DirectoryError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        })
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
        eventual: bool,
    ) -> Result<reqwest::Response, DirectoryError> {
        let mut attempt = 0u32;
        let mut delay = INITIAL_RETRY_DELAY;

        loop {
            let token = self.tokens.token().await?;
            let mut trace_headers = HeaderMap::new();
            identity_core::observability::inject_trace_context(&mut trace_headers);

            let mut request = self
                .http
                .request(method.clone(), url)
                .bearer_auth(&token)
                .headers(trace_headers);
            if eventual {
                request = request.header("ConsistencyLevel", "eventual");
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;
            let status = response.status();

            let transient = status == reqwest::StatusCode::TOO_MANY_REQUESTS
                || status == reqwest::StatusCode::BAD_GATEWAY
                || status == reqwest::StatusCode::SERVICE_UNAVAILABLE
                || status == reqwest::StatusCode::GATEWAY_TIMEOUT;
            if transient && attempt < MAX_RETRIES {
                let wait = retry_after(&response).unwrap_or(delay);
                warn!(%status, attempt, wait_ms = wait.as_millis() as u64, "Directory pushed back, retrying");
                tokio::time::sleep(wait).await;
                attempt += 1;
                delay *= 2;
                continue;
            }

            if status.is_success() {
                return Ok(response);
            }

            let headers = response.headers().clone();
            let body_text = response.text().await.unwrap_or_default();
            let (code, message) = parse_odata_error(status, &body_text);
            return Err(DirectoryError::Provider {
                code,
                message,
                status: status.as_u16(),
                headers,
            });
        }
    }

    async fn get_all_pages<T: DeserializeOwned>(
        &self,
        first_url: String,
        eventual: bool,
    ) -> Result<Vec<T>, DirectoryError> {
        let mut url = first_url;
        let mut items = Vec::new();

        loop {
            let response = self.send(Method::GET, &url, None, eventual).await?;
            let page: ODataPage<T> = response.json().await?;
            items.extend(page.value);
            match page.next_link {
                Some(next) => url = next,
                None => break,
            }
        }

        Ok(items)
    }

    async fn resolve_user_id(&self, user_mail: &str) -> Result<String, DirectoryError> {
        let user = self
            .find_user_by_filter(&mail_filter(user_mail))
            .await?
            .ok_or_else(|| DirectoryError::MissingUser(user_mail.to_string()))?;
        Ok(user.id)
    }
}

#[async_trait]
impl DirectoryService for HttpDirectoryClient {
    async fn find_user_by_filter(
        &self,
        filter: &str,
    ) -> Result<Option<DirectoryUser>, DirectoryError> {
        let url = format!(
            "{}/users?$filter={}&$select={}",
            self.base_url,
            urlencoding::encode(filter),
            USER_PROJECTION
        );
        let response = self.send(Method::GET, &url, None, false).await?;
        let page: ODataPage<DirectoryUser> = response.json().await?;
        Ok(page.value.into_iter().next())
    }

    async fn list_group_members(
        &self,
        group_id: &str,
    ) -> Result<Vec<DirectoryObject>, DirectoryError> {
        // $count with a filter-less member listing needs the eventual
        // consistency header on every page.
        let url = format!(
            "{}/groups/{}/members?$count=true&$select=id",
            self.base_url, group_id
        );
        self.get_all_pages(url, true).await
    }

    async fn add_member(
        &self,
        user_mail: &str,
        group_id: &str,
    ) -> Result<AddMemberResult, DirectoryError> {
        let user_id = self.resolve_user_id(user_mail).await?;
        let url = format!("{}/groups/{}/members/$ref", self.base_url, group_id);
        let body = serde_json::json!({
            "@odata.id": format!("{}/directoryObjects/{}", self.base_url, user_id),
        });

        match self.send(Method::POST, &url, Some(&body), false).await {
            Ok(_) => Ok(AddMemberResult::Added),
            Err(DirectoryError::Provider {
                status: 400,
                ref message,
                ..
            }) if message.to_ascii_lowercase().contains("already exist") => {
                Ok(AddMemberResult::AlreadyExists)
            }
            Err(err) => Err(err),
        }
    }

    async fn remove_member(
        &self,
        user_mail: &str,
        group_id: &str,
    ) -> Result<RemoveMemberResult, DirectoryError> {
        let user_id = self.resolve_user_id(user_mail).await?;
        let url = format!(
            "{}/groups/{}/members/{}/$ref",
            self.base_url, group_id, user_id
        );

        match self.send(Method::DELETE, &url, None, false).await {
            Ok(_) => Ok(RemoveMemberResult::Removed),
            Err(DirectoryError::Provider { status: 404, .. }) => Ok(RemoveMemberResult::NotMember),
            Err(err) => Err(err),
        }
    }

    async fn list_all_users(&self) -> Result<Vec<DirectoryUser>, DirectoryError> {
        let url = format!(
            "{}/users?$filter={}&$select={}",
            self.base_url,
            urlencoding::encode("accountEnabled eq true"),
            USER_PROJECTION
        );
        self.get_all_pages(url, false).await
    }

    async fn invite_external_user(
        &self,
        email: &str,
        redirect_url: &str,
    ) -> Result<Option<DirectoryInvitation>, DirectoryError> {
        let url = format!("{}/invitations", self.base_url);
        let body = serde_json::json!({
            "invitedUserEmailAddress": email,
            "inviteRedirectUrl": redirect_url,
            "sendInvitationMessage": true,
        });
        let response = self.send(Method::POST, &url, Some(&body), false).await?;
        let invitation: DirectoryInvitation = response.json().await?;
        Ok(Some(invitation))
    }
}

/// Scripted `DirectoryService` for tests. Users are matched the way the
/// real filters would match them; knobs script failures, invitation
/// outcomes and delayed visibility of newly invited users.
pub struct MockDirectory {
    users: Mutex<Vec<DirectoryUser>>,
    members: Mutex<Vec<String>>,
    invite_status: Mutex<Option<String>>,
    hidden_finds: AtomicU64,
    fail_reads: AtomicBool,
    fail_member_list: AtomicBool,
    fail_mutations: AtomicBool,
    conflict_on_add: AtomicBool,
    find_calls: AtomicU64,
    member_list_calls: AtomicU64,
    add_calls: AtomicU64,
    remove_calls: AtomicU64,
    invite_calls: AtomicU64,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(Vec::new()),
            members: Mutex::new(Vec::new()),
            invite_status: Mutex::new(Some("PendingAcceptance".to_string())),
            hidden_finds: AtomicU64::new(0),
            fail_reads: AtomicBool::new(false),
            fail_member_list: AtomicBool::new(false),
            fail_mutations: AtomicBool::new(false),
            conflict_on_add: AtomicBool::new(false),
            find_calls: AtomicU64::new(0),
            member_list_calls: AtomicU64::new(0),
            add_calls: AtomicU64::new(0),
            remove_calls: AtomicU64::new(0),
            invite_calls: AtomicU64::new(0),
        }
    }

    pub fn with_user(self, user: DirectoryUser) -> Self {
        self.users.lock().unwrap().push(user);
        self
    }

    pub fn with_member(self, user_id: &str) -> Self {
        self.members.lock().unwrap().push(user_id.to_string());
        self
    }

    /// Makes the next `count` user lookups miss, as a fresh invitation does
    /// before the directory catches up.
    pub fn hidden_for(self, count: u64) -> Self {
        self.hidden_finds.store(count, Ordering::SeqCst);
        self
    }

    pub fn invite_status(self, status: Option<&str>) -> Self {
        *self.invite_status.lock().unwrap() = status.map(str::to_string);
        self
    }

    pub fn fail_reads(self) -> Self {
        self.fail_reads.store(true, Ordering::SeqCst);
        self
    }

    /// Fails only the member listing, leaving user lookups working.
    pub fn fail_member_list(self) -> Self {
        self.fail_member_list.store(true, Ordering::SeqCst);
        self
    }

    pub fn fail_mutations(self) -> Self {
        self.fail_mutations.store(true, Ordering::SeqCst);
        self
    }

    /// Makes every add report the duplicate-member rejection, as happens
    /// when another writer wins the race after the membership pre-check.
    pub fn conflict_on_add(self) -> Self {
        self.conflict_on_add.store(true, Ordering::SeqCst);
        self
    }

    pub fn find_calls(&self) -> u64 {
        self.find_calls.load(Ordering::SeqCst)
    }

    pub fn add_calls(&self) -> u64 {
        self.add_calls.load(Ordering::SeqCst)
    }

    pub fn remove_calls(&self) -> u64 {
        self.remove_calls.load(Ordering::SeqCst)
    }

    pub fn invite_calls(&self) -> u64 {
        self.invite_calls.load(Ordering::SeqCst)
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.members.lock().unwrap().iter().any(|id| id == user_id)
    }

    fn quoted_value(filter: &str) -> Option<String> {
        let start = filter.find('\'')? + 1;
        let end = filter.rfind('\'')?;
        (end > start).then(|| filter[start..end].replace("''", "'"))
    }
}

impl Default for MockDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DirectoryService for MockDirectory {
    async fn find_user_by_filter(
        &self,
        filter: &str,
    ) -> Result<Option<DirectoryUser>, DirectoryError> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(DirectoryError::provider("serviceNotAvailable", "scripted read failure", 503));
        }
        if self.hidden_finds.load(Ordering::SeqCst) > 0 {
            self.hidden_finds.fetch_sub(1, Ordering::SeqCst);
            return Ok(None);
        }

        let needle = match Self::quoted_value(filter) {
            Some(value) => value,
            None => return Ok(None),
        };
        let by_id = filter.contains("id eq");
        let users = self.users.lock().unwrap();
        Ok(users
            .iter()
            .find(|user| {
                if by_id {
                    user.id == needle
                } else {
                    user.mail.as_deref() == Some(needle.as_str())
                }
            })
            .cloned())
    }

    async fn list_group_members(
        &self,
        _group_id: &str,
    ) -> Result<Vec<DirectoryObject>, DirectoryError> {
        self.member_list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) || self.fail_member_list.load(Ordering::SeqCst) {
            return Err(DirectoryError::provider("serviceNotAvailable", "scripted read failure", 503));
        }
        let members = self.members.lock().unwrap();
        Ok(members
            .iter()
            .map(|id| DirectoryObject { id: id.clone() })
            .collect())
    }

    async fn add_member(
        &self,
        user_mail: &str,
        _group_id: &str,
    ) -> Result<AddMemberResult, DirectoryError> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_mutations.load(Ordering::SeqCst) {
            return Err(DirectoryError::provider("request_failed", "scripted write failure", 500));
        }

        let user_id = {
            let users = self.users.lock().unwrap();
            users
                .iter()
                .find(|user| user.mail.as_deref() == Some(user_mail))
                .map(|user| user.id.clone())
        };
        let user_id = user_id.ok_or_else(|| DirectoryError::MissingUser(user_mail.to_string()))?;
        if self.conflict_on_add.load(Ordering::SeqCst) {
            return Ok(AddMemberResult::AlreadyExists);
        }

        let mut members = self.members.lock().unwrap();
        if members.iter().any(|id| *id == user_id) {
            return Ok(AddMemberResult::AlreadyExists);
        }
        members.push(user_id);
        Ok(AddMemberResult::Added)
    }

    async fn remove_member(
        &self,
        user_mail: &str,
        _group_id: &str,
    ) -> Result<RemoveMemberResult, DirectoryError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_mutations.load(Ordering::SeqCst) {
            return Err(DirectoryError::provider("request_failed", "scripted write failure", 500));
        }

        let user_id = {
            let users = self.users.lock().unwrap();
            users
                .iter()
                .find(|user| user.mail.as_deref() == Some(user_mail))
                .map(|user| user.id.clone())
        };
        let user_id = user_id.ok_or_else(|| DirectoryError::MissingUser(user_mail.to_string()))?;

        let mut members = self.members.lock().unwrap();
        match members.iter().position(|id| *id == user_id) {
            Some(index) => {
                members.remove(index);
                Ok(RemoveMemberResult::Removed)
            }
            None => Ok(RemoveMemberResult::NotMember),
        }
    }

    async fn list_all_users(&self) -> Result<Vec<DirectoryUser>, DirectoryError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(DirectoryError::provider("serviceNotAvailable", "scripted read failure", 503));
        }
        let users = self.users.lock().unwrap();
        Ok(users
            .iter()
            .filter(|user| user.account_enabled == Some(true))
            .cloned()
            .collect())
    }

    async fn invite_external_user(
        &self,
        email: &str,
        _redirect_url: &str,
    ) -> Result<Option<DirectoryInvitation>, DirectoryError> {
        self.invite_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_mutations.load(Ordering::SeqCst) {
            return Err(DirectoryError::provider("request_failed", "scripted invite failure", 500));
        }
        let status = self.invite_status.lock().unwrap().clone();
        Ok(status.map(|status| DirectoryInvitation {
            id: Some("invitation-1".to_string()),
            status,
            invite_redeem_url: Some("https://invitations.example/redeem".to_string()),
            invited_user_email_address: Some(email.to_string()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mail_filter_doubles_single_quotes() {
        assert_eq!(
            mail_filter("o'brien@corporation.org"),
            "mail eq 'o''brien@corporation.org'"
        );
    }

    #[test]
    fn id_filter_keeps_the_enabled_clause() {
        assert_eq!(
            enabled_user_by_id_filter("11-22"),
            "accountEnabled eq true and id eq '11-22'"
        );
    }

    #[test]
    fn odata_errors_parse_code_and_message() {
        let body = r#"{"error":{"code":"Request_BadRequest","message":"One or more added object references already exist for the following modified properties: 'members'."}}"#;
        let (code, message) = parse_odata_error(reqwest::StatusCode::BAD_REQUEST, body);
        assert_eq!(code, "Request_BadRequest");
        assert!(message.contains("already exist"));
    }

    #[test]
    fn unparseable_error_bodies_fall_back_to_status() {
        let (code, message) = parse_odata_error(reqwest::StatusCode::BAD_GATEWAY, "<html>oops</html>");
        assert_eq!(code, "502 Bad Gateway");
        assert_eq!(message, "<html>oops</html>");
    }

    #[test]
    fn mock_filter_matching_follows_the_real_filters() {
        let value = MockDirectory::quoted_value("mail eq 'o''brien@corporation.org'");
        assert_eq!(value.as_deref(), Some("o'brien@corporation.org"));
        assert_eq!(MockDirectory::quoted_value("accountEnabled eq true"), None);
    }
}
