use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Outcome vocabulary of the group-add workflows. Serialized by variant name;
/// this is the wire contract of `AddToGroup` and part of `InviteUser`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum AddToGroupStatus {
    Success,
    Failed,
    AlreadyMember,
    MissingParameters,
    PrerequisitesFailed,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum RemoveFromGroupStatus {
    Success,
    Failed,
    NotMember,
    MissingParameters,
    PrerequisitesFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum UserStatus {
    Existing,
    Missing,
}

/// Composite result of the invitation reconciliation workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InviteUserResult {
    pub invite_success: bool,
    pub add_group_success: bool,
    pub add_to_group_status: AddToGroupStatus,
}

impl InviteUserResult {
    pub fn new(
        invite_success: bool,
        add_group_success: bool,
        add_to_group_status: AddToGroupStatus,
    ) -> Self {
        Self {
            invite_success,
            add_group_success,
            add_to_group_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_serialize_by_variant_name() {
        assert_eq!(
            serde_json::to_string(&AddToGroupStatus::AlreadyMember).unwrap(),
            "\"AlreadyMember\""
        );
        assert_eq!(
            serde_json::to_string(&RemoveFromGroupStatus::NotMember).unwrap(),
            "\"NotMember\""
        );
        assert_eq!(
            serde_json::to_string(&UserStatus::Missing).unwrap(),
            "\"Missing\""
        );
    }

    #[test]
    fn invite_result_uses_camel_case_fields() {
        let result = InviteUserResult::new(true, false, AddToGroupStatus::TimedOut);
        let json = serde_json::to_value(result).unwrap();
        assert_eq!(json["inviteSuccess"], true);
        assert_eq!(json["addGroupSuccess"], false);
        assert_eq!(json["addToGroupStatus"], "TimedOut");
    }
}
