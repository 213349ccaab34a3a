//! Guest invitation and group membership workflows.
//!
//! Inviting an external user is eventually consistent: the invitation call
//! succeeds before the guest account is queryable. The workflow waits with
//! a bounded backoff poll before reconciling group membership, and every
//! step degrades to a status value instead of failing the request.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::{AddToGroupStatus, DirectoryUser, InviteUserResult, RemoveFromGroupStatus};
use crate::services::directory::{
    mail_filter, AddMemberResult, DirectoryService, RemoveMemberResult,
};

/// Visibility polling knobs. The defaults wait two seconds before the first
/// check and give the directory five attempts with doubling intervals.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
    pub backoff_multiplier: f64,
    pub max_interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 5,
            backoff_multiplier: 2.0,
            max_interval: Duration::from_secs(30),
        }
    }
}

fn next_delay(current: Duration, poll: &PollConfig) -> Duration {
    current.mul_f64(poll.backoff_multiplier).min(poll.max_interval)
}

pub struct InvitationService {
    directory: Arc<dyn DirectoryService>,
    poll: PollConfig,
    access_group_id: String,
}

impl InvitationService {
    pub fn new(directory: Arc<dyn DirectoryService>, poll: PollConfig, access_group_id: String) -> Self {
        Self {
            directory,
            poll,
            access_group_id,
        }
    }

    /// Invites `email` as a guest and grants the access group once the
    /// account becomes visible. Never fails the request: every outcome is
    /// encoded in the returned result.
    pub async fn invite_user(
        &self,
        email: &str,
        redirect_url: &str,
        cancel: &CancellationToken,
    ) -> InviteUserResult {
        if email.trim().is_empty() || redirect_url.trim().is_empty() {
            return InviteUserResult::new(false, false, AddToGroupStatus::MissingParameters);
        }

        let invitation = match self.directory.invite_external_user(email, redirect_url).await {
            Ok(invitation) => invitation,
            Err(error) => {
                warn!(email, %error, "Invitation request failed");
                return InviteUserResult::new(false, false, AddToGroupStatus::Failed);
            }
        };

        let invitation = match invitation {
            Some(invitation) if !invitation.status.eq_ignore_ascii_case("error") => invitation,
            _ => {
                warn!(email, "Invitation was not issued");
                return InviteUserResult::new(false, false, AddToGroupStatus::PrerequisitesFailed);
            }
        };
        info!(email, status = %invitation.status, "Invitation issued");

        let user = match self.wait_for_directory_user(email, cancel).await {
            Some(user) => user,
            None => return InviteUserResult::new(true, false, AddToGroupStatus::TimedOut),
        };

        let members = match self.directory.list_group_members(&self.access_group_id).await {
            Ok(members) => members,
            Err(error) => {
                warn!(email, %error, "Membership check failed after invitation");
                return InviteUserResult::new(true, false, AddToGroupStatus::Failed);
            }
        };
        if members.iter().any(|member| member.id == user.id) {
            return InviteUserResult::new(true, true, AddToGroupStatus::AlreadyMember);
        }

        match self.directory.add_member(email, &self.access_group_id).await {
            Ok(AddMemberResult::Added) => {
                info!(email, group_id = %self.access_group_id, "Invited user granted group access");
                InviteUserResult::new(true, true, AddToGroupStatus::Success)
            }
            Ok(AddMemberResult::AlreadyExists) => {
                InviteUserResult::new(true, true, AddToGroupStatus::AlreadyMember)
            }
            Ok(AddMemberResult::Unchanged) => {
                InviteUserResult::new(true, false, AddToGroupStatus::Failed)
            }
            Err(error) => {
                warn!(email, %error, "Group grant failed after invitation");
                InviteUserResult::new(true, false, AddToGroupStatus::Failed)
            }
        }
    }

    /// Adds an existing user to a group, with a membership pre-check so a
    /// repeat call reports `AlreadyMember` without a write.
    pub async fn add_to_group(&self, user_mail: &str, group_id: &str) -> AddToGroupStatus {
        if user_mail.trim().is_empty() || group_id.trim().is_empty() {
            return AddToGroupStatus::MissingParameters;
        }

        let user = match self
            .directory
            .find_user_by_filter(&mail_filter(user_mail))
            .await
        {
            Ok(Some(user)) => user,
            Ok(None) => return AddToGroupStatus::PrerequisitesFailed,
            Err(error) => {
                warn!(user_mail, %error, "User lookup failed before group add");
                return AddToGroupStatus::Failed;
            }
        };

        let members = match self.directory.list_group_members(group_id).await {
            Ok(members) => members,
            Err(error) => {
                warn!(user_mail, group_id, %error, "Membership check failed before group add");
                return AddToGroupStatus::Failed;
            }
        };
        if members.iter().any(|member| member.id == user.id) {
            return AddToGroupStatus::AlreadyMember;
        }

        match self.directory.add_member(user_mail, group_id).await {
            Ok(AddMemberResult::Added) => AddToGroupStatus::Success,
            Ok(AddMemberResult::AlreadyExists) => AddToGroupStatus::AlreadyMember,
            Ok(AddMemberResult::Unchanged) => AddToGroupStatus::Failed,
            Err(error) => {
                warn!(user_mail, group_id, %error, "Group add failed");
                AddToGroupStatus::Failed
            }
        }
    }

    /// Removes a user from a group. A user outside the group reports
    /// `NotMember` without a write.
    pub async fn remove_from_group(
        &self,
        user_mail: &str,
        group_id: &str,
    ) -> RemoveFromGroupStatus {
        if user_mail.trim().is_empty() || group_id.trim().is_empty() {
            return RemoveFromGroupStatus::MissingParameters;
        }

        let user = match self
            .directory
            .find_user_by_filter(&mail_filter(user_mail))
            .await
        {
            Ok(Some(user)) => user,
            Ok(None) => return RemoveFromGroupStatus::PrerequisitesFailed,
            Err(error) => {
                warn!(user_mail, %error, "User lookup failed before group removal");
                return RemoveFromGroupStatus::Failed;
            }
        };

        let members = match self.directory.list_group_members(group_id).await {
            Ok(members) => members,
            Err(error) => {
                warn!(user_mail, group_id, %error, "Membership check failed before group removal");
                return RemoveFromGroupStatus::Failed;
            }
        };
        if !members.iter().any(|member| member.id == user.id) {
            return RemoveFromGroupStatus::NotMember;
        }

        match self.directory.remove_member(user_mail, group_id).await {
            Ok(RemoveMemberResult::Removed) => RemoveFromGroupStatus::Success,
            Ok(RemoveMemberResult::NotMember) => RemoveFromGroupStatus::NotMember,
            Ok(RemoveMemberResult::Unchanged) => RemoveFromGroupStatus::Failed,
            Err(error) => {
                warn!(user_mail, group_id, %error, "Group removal failed");
                RemoveFromGroupStatus::Failed
            }
        }
    }

    /// Sleep-first poll for the invited account. Lookup errors count as
    /// misses so a flaky read does not abort the wait. `None` means the
    /// attempts ran out or shutdown was requested.
    async fn wait_for_directory_user(
        &self,
        email: &str,
        cancel: &CancellationToken,
    ) -> Option<DirectoryUser> {
        let filter = mail_filter(email);
        let mut delay = self.poll.interval;

        for attempt in 0..self.poll.max_attempts {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(email, attempt, "Shutdown requested while waiting for directory visibility");
                    return None;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            match self.directory.find_user_by_filter(&filter).await {
                Ok(Some(user)) => return Some(user),
                Ok(None) => debug!(email, attempt, "Invited user not visible yet"),
                Err(error) => {
                    warn!(email, attempt, %error, "Visibility check failed, counting it as a miss");
                }
            }

            delay = next_delay(delay, &self.poll);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_up_to_the_cap() {
        let poll = PollConfig {
            interval: Duration::from_secs(2),
            max_attempts: 5,
            backoff_multiplier: 2.0,
            max_interval: Duration::from_secs(5),
        };

        let second = next_delay(poll.interval, &poll);
        let third = next_delay(second, &poll);

        assert_eq!(second, Duration::from_secs(4));
        assert_eq!(third, Duration::from_secs(5));
    }

    #[test]
    fn default_poll_waits_two_seconds_five_times() {
        let poll = PollConfig::default();
        assert_eq!(poll.interval, Duration::from_secs(2));
        assert_eq!(poll.max_attempts, 5);
    }
}
