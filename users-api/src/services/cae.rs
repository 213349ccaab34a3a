//! Continuous-access-evaluation fallback.
//!
//! A directory call blocked by continuous access evaluation fails with the
//! marker text in its error message and a claims challenge in the response
//! headers. The wrapper hands the challenge to a sink exactly once and
//! degrades the call to the result type's zero value so read paths keep
//! working while the caller re-authenticates.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

use identity_core::www_authenticate::claims_challenge;

use crate::models::{DirectoryInvitation, DirectoryObject, DirectoryUser};
use crate::services::directory::{
    AddMemberResult, DirectoryError, DirectoryService, RemoveMemberResult,
};

/// Marker the provider puts in the error message when a request is blocked
/// pending a claims challenge.
pub const CAE_CHALLENGE_MARKER: &str =
    "Continuous access evaluation resulted in claims challenge";

/// Receives the claims challenge extracted from a blocked response so an
/// interactive layer can replay it to the user agent.
pub trait ChallengeSink: Send + Sync {
    fn challenge(&self, scopes: &[String], claims_challenge: &str);

    /// A blocked call whose response carried no usable challenge.
    fn report_failure(&self, error: &DirectoryError);
}

/// Sink that only records challenges in the log, for deployments without an
/// interactive channel back to the caller.
pub struct LogChallengeSink;

impl ChallengeSink for LogChallengeSink {
    fn challenge(&self, scopes: &[String], claims_challenge: &str) {
        warn!(
            ?scopes,
            claims_challenge, "Continuous access evaluation challenged a directory call"
        );
    }

    fn report_failure(&self, error: &DirectoryError) {
        warn!(%error, "Directory call blocked without a usable claims challenge");
    }
}

fn is_challenge_blocked(error: &DirectoryError) -> bool {
    matches!(
        error,
        DirectoryError::Provider { message, .. } if message.contains(CAE_CHALLENGE_MARKER)
    )
}

fn challenge_from(error: &DirectoryError) -> Option<String> {
    match error {
        DirectoryError::Provider { headers, .. } => claims_challenge(headers),
        _ => None,
    }
}

/// Runs directory operations with the challenge-degrade policy applied.
pub struct CaeFallback {
    sink: Arc<dyn ChallengeSink>,
    scopes: Vec<String>,
}

impl CaeFallback {
    pub fn new(sink: Arc<dyn ChallengeSink>, scopes: Vec<String>) -> Self {
        Self { sink, scopes }
    }

    /// Awaits the operation; a challenge-blocked failure is reported to the
    /// sink and replaced with `T::default()`. The zero value is then
    /// indistinguishable from a genuine empty directory answer, and callers
    /// treat both as absence.
    pub async fn call<T, F>(&self, operation: F) -> Result<T, DirectoryError>
    where
        T: Default,
        F: Future<Output = Result<T, DirectoryError>> + Send,
    {
        match operation.await {
            Ok(value) => Ok(value),
            Err(error) if is_challenge_blocked(&error) => {
                match challenge_from(&error) {
                    Some(challenge) => self.sink.challenge(&self.scopes, &challenge),
                    None => self.sink.report_failure(&error),
                }
                Ok(T::default())
            }
            Err(error) => Err(error),
        }
    }
}

/// `DirectoryService` decorator applying the fallback to every operation.
pub struct CaeDirectory {
    inner: Arc<dyn DirectoryService>,
    fallback: CaeFallback,
}

impl CaeDirectory {
    pub fn new(
        inner: Arc<dyn DirectoryService>,
        sink: Arc<dyn ChallengeSink>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            inner,
            fallback: CaeFallback::new(sink, scopes),
        }
    }
}

#[async_trait]
impl DirectoryService for CaeDirectory {
    async fn find_user_by_filter(
        &self,
        filter: &str,
    ) -> Result<Option<DirectoryUser>, DirectoryError> {
        self.fallback
            .call(self.inner.find_user_by_filter(filter))
            .await
    }

    async fn list_group_members(
        &self,
        group_id: &str,
    ) -> Result<Vec<DirectoryObject>, DirectoryError> {
        self.fallback
            .call(self.inner.list_group_members(group_id))
            .await
    }

    async fn add_member(
        &self,
        user_mail: &str,
        group_id: &str,
    ) -> Result<AddMemberResult, DirectoryError> {
        self.fallback
            .call(self.inner.add_member(user_mail, group_id))
            .await
    }

    async fn remove_member(
        &self,
        user_mail: &str,
        group_id: &str,
    ) -> Result<RemoveMemberResult, DirectoryError> {
        self.fallback
            .call(self.inner.remove_member(user_mail, group_id))
            .await
    }

    async fn list_all_users(&self) -> Result<Vec<DirectoryUser>, DirectoryError> {
        self.fallback.call(self.inner.list_all_users()).await
    }

    async fn invite_external_user(
        &self,
        email: &str,
        redirect_url: &str,
    ) -> Result<Option<DirectoryInvitation>, DirectoryError> {
        self.fallback
            .call(self.inner.invite_external_user(email, redirect_url))
            .await
    }
}

/// Sink that records what it was handed, for tests.
pub struct RecordingChallengeSink {
    pub challenges: std::sync::Mutex<Vec<(Vec<String>, String)>>,
    pub failures: std::sync::atomic::AtomicU64,
}

impl RecordingChallengeSink {
    pub fn new() -> Self {
        Self {
            challenges: std::sync::Mutex::new(Vec::new()),
            failures: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn challenge_count(&self) -> usize {
        self.challenges.lock().unwrap().len()
    }

    pub fn failure_count(&self) -> u64 {
        self.failures.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl Default for RecordingChallengeSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ChallengeSink for RecordingChallengeSink {
    fn challenge(&self, scopes: &[String], claims_challenge: &str) {
        self.challenges
            .lock()
            .unwrap()
            .push((scopes.to_vec(), claims_challenge.to_string()));
    }

    fn report_failure(&self, _error: &DirectoryError) {
        self.failures
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, WWW_AUTHENTICATE};

    fn blocked_error(with_claims: bool) -> DirectoryError {
        let mut headers = HeaderMap::new();
        if with_claims {
            headers.insert(
                WWW_AUTHENTICATE,
                HeaderValue::from_static(
                    r#"Bearer realm="", authorization_uri="https://login.example/oauth2/authorize", claims="eyJhY2Nlc3MifX0=""#,
                ),
            );
        }
        DirectoryError::Provider {
            code: "InvalidAuthenticationToken".to_string(),
            message: format!("{}.", CAE_CHALLENGE_MARKER),
            status: 401,
            headers,
        }
    }

    #[tokio::test]
    async fn blocked_call_degrades_to_the_zero_value() {
        let sink = Arc::new(RecordingChallengeSink::new());
        let fallback = CaeFallback::new(sink.clone(), vec!["Directory.Read".to_string()]);

        let result: Result<Option<DirectoryUser>, _> =
            fallback.call(async { Err(blocked_error(true)) }).await;

        assert!(result.unwrap().is_none());
        let challenges = sink.challenges.lock().unwrap();
        assert_eq!(challenges.len(), 1);
        assert_eq!(challenges[0].0, vec!["Directory.Read".to_string()]);
        assert_eq!(challenges[0].1, "eyJhY2Nlc3MifX0=");
    }

    #[tokio::test]
    async fn blocked_call_without_claims_reports_a_failure() {
        let sink = Arc::new(RecordingChallengeSink::new());
        let fallback = CaeFallback::new(sink.clone(), Vec::new());

        let result: Result<Vec<String>, _> =
            fallback.call(async { Err(blocked_error(false)) }).await;

        assert!(result.unwrap().is_empty());
        assert_eq!(sink.challenge_count(), 0);
        assert_eq!(sink.failure_count(), 1);
    }

    #[tokio::test]
    async fn unrelated_errors_propagate() {
        let sink = Arc::new(RecordingChallengeSink::new());
        let fallback = CaeFallback::new(sink.clone(), Vec::new());

        let result: Result<Option<DirectoryUser>, _> = fallback
            .call(async {
                Err(DirectoryError::provider(
                    "Request_ResourceNotFound",
                    "group does not exist",
                    404,
                ))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(sink.challenge_count(), 0);
        assert_eq!(sink.failure_count(), 0);
    }

    #[tokio::test]
    async fn successful_calls_pass_through_untouched() {
        let sink = Arc::new(RecordingChallengeSink::new());
        let fallback = CaeFallback::new(sink, Vec::new());

        let result = fallback
            .call(async { Ok(vec!["tom@corporation.org".to_string()]) })
            .await
            .unwrap();

        assert_eq!(result, vec!["tom@corporation.org".to_string()]);
    }
}
