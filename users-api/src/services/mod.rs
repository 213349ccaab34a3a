pub mod cae;
pub mod directory;
pub mod error;
pub mod invitation;
pub mod token;

pub use cae::{
    CaeDirectory, CaeFallback, ChallengeSink, LogChallengeSink, RecordingChallengeSink,
    CAE_CHALLENGE_MARKER,
};
pub use directory::{
    enabled_user_by_id_filter, mail_filter, AddMemberResult, DirectoryError, DirectoryService,
    HttpDirectoryClient, MockDirectory, RemoveMemberResult, USER_PROJECTION,
};
pub use error::ServiceError;
pub use invitation::{InvitationService, PollConfig};
pub use token::{
    AuthError, ClientCredentialsTokenSource, FixedTokenSource, IdentityTokenService,
    MockIdentityTokens, OAuthTokenService, TokenBroker, TokenSource,
};
