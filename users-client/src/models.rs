//! Wire types of the users-api endpoints, mirrored for deserialization.

use serde::{Deserialize, Serialize};

/// Outcome of `AddToGroup` and the membership half of `InviteUser`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddToGroupStatus {
    Success,
    Failed,
    AlreadyMember,
    MissingParameters,
    PrerequisitesFailed,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoveFromGroupStatus {
    Success,
    Failed,
    NotMember,
    MissingParameters,
    PrerequisitesFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserStatus {
    Existing,
    Missing,
}

/// Composite answer of the `InviteUser` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteUserResult {
    pub invite_success: bool,
    pub add_group_success: bool,
    pub add_to_group_status: AddToGroupStatus,
}

/// The directory projection returned by `getloggedingraphuser`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub user_principal_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub account_enabled: Option<bool>,
    #[serde(default)]
    pub mail: Option<String>,
    #[serde(default)]
    pub mobile_phone: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub street_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<ProfilePhoto>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePhoto {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub height: Option<i32>,
    #[serde(default)]
    pub width: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_parse_from_variant_names() {
        let status: AddToGroupStatus = serde_json::from_str("\"AlreadyMember\"").unwrap();
        assert_eq!(status, AddToGroupStatus::AlreadyMember);

        let status: UserStatus = serde_json::from_str("\"Existing\"").unwrap();
        assert_eq!(status, UserStatus::Existing);
    }

    #[test]
    fn invite_result_parses_camel_case() {
        let result: InviteUserResult = serde_json::from_str(
            r#"{"inviteSuccess":true,"addGroupSuccess":false,"addToGroupStatus":"TimedOut"}"#,
        )
        .unwrap();
        assert!(result.invite_success);
        assert!(!result.add_group_success);
        assert_eq!(result.add_to_group_status, AddToGroupStatus::TimedOut);
    }

    #[test]
    fn profile_tolerates_missing_fields() {
        let profile: UserProfile =
            serde_json::from_str(r#"{"id":"u-1","mail":"tom@corporation.org"}"#).unwrap();
        assert_eq!(profile.id, "u-1");
        assert_eq!(profile.mail.as_deref(), Some("tom@corporation.org"));
        assert!(profile.photo.is_none());
    }
}
