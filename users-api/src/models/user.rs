use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// The fixed projection read from the directory. Never cached or mutated
/// locally; `id` is treated as opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryUser {
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

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePhoto {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub height: Option<i32>,
    #[serde(default)]
    pub width: Option<i32>,
}

/// Bare directory object reference, as returned by group membership listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DirectoryObject {
    pub id: String,
}

/// Provider invitation projection. `status` keeps the provider's vocabulary;
/// `"Error"` is the failure sentinel the workflow checks for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryInvitation {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub invite_redeem_url: Option<String>,
    #[serde(default)]
    pub invited_user_email_address: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_user_from_wire() {
        let json = r#"{
            "id": "c4ea4b3a-0000-0000-0000-1f91f6a8e86c",
            "userPrincipalName": "tom@corporation.org",
            "displayName": "Tom Tester",
            "givenName": "Tom",
            "accountEnabled": true,
            "mail": "existing_tom@corporation.org",
            "mobilePhone": "+47 00000000",
            "country": "Norway",
            "streetAddress": "Fjordgata 1"
        }"#;

        let user: DirectoryUser = serde_json::from_str(json).unwrap();
        assert_eq!(user.mail.as_deref(), Some("existing_tom@corporation.org"));
        assert_eq!(user.account_enabled, Some(true));
        assert!(user.photo.is_none());
    }

    #[test]
    fn invitation_status_defaults_empty() {
        let invitation: DirectoryInvitation = serde_json::from_str(r#"{"id":"inv-1"}"#).unwrap();
        assert_eq!(invitation.status, "");
    }
}
