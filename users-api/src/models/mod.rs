pub mod principal;
pub mod status;
pub mod user;

pub use principal::{Claim, ClaimsPrincipal, IdentityRef, claims};
pub use status::{AddToGroupStatus, InviteUserResult, RemoveFromGroupStatus, UserStatus};
pub use user::{DirectoryInvitation, DirectoryObject, DirectoryUser, ProfilePhoto};
