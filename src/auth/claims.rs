use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::roles::Role;

/// What a token may be used for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    Access,
    Refresh,
    VerifyEmail,
    ResetPassword,
}

/// JWT payload used for every token the service issues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,              // user ID
    pub role: Role,
    pub purpose: TokenPurpose,
    pub iat: i64,               // issued at (unix timestamp)
    pub exp: i64,               // expires at (unix timestamp)
    pub iss: String,
    pub aud: String,
    pub jti: Uuid,              // token ID, used for revocation
    #[serde(default)]
    pub ver: i32,               // user's token_version at issue time
}
