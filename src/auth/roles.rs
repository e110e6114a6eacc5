use serde::{Deserialize, Serialize};

use crate::{
    auth::extractors::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

impl Role {
    fn rank(self) -> u8 {
        match self {
            Role::User => 0,
            Role::Admin => 1,
        }
    }

    /// Admin implies user.
    pub fn satisfies(self, required: Role) -> bool {
        self.rank() >= required.rank()
    }
}

/// Call at the top of any handler that needs more than a valid access token.
pub fn authorize(user: &AuthUser, required: Role) -> Result<(), ApiError> {
    if user.role.satisfies(required) {
        Ok(())
    } else {
        tracing::warn!(user_id = %user.id, role = ?user.role, required = ?required, "access denied");
        Err(ApiError::Forbidden)
    }
}

/// Checks the role stored now, not the one baked into the access token, so a
/// demotion takes effect before the token expires.
pub async fn authorize_current(st: &AppState, user: &AuthUser, required: Role) -> ApiResult<()> {
    authorize(user, required)?;
    match st.users.find_by_id(user.id).await? {
        Some(stored) if stored.role.satisfies(required) => Ok(()),
        stored => {
            tracing::warn!(
                user_id = %user.id,
                stored_role = ?stored.map(|u| u.role),
                required = ?required,
                "access denied by stored role"
            );
            Err(ApiError::Forbidden)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn admin_satisfies_every_role() {
        assert!(Role::Admin.satisfies(Role::Admin));
        assert!(Role::Admin.satisfies(Role::User));
    }

    #[test]
    fn user_does_not_satisfy_admin() {
        assert!(Role::User.satisfies(Role::User));
        assert!(!Role::User.satisfies(Role::Admin));
    }

    #[test]
    fn authorize_maps_deny_to_forbidden() {
        let user = AuthUser { id: Uuid::new_v4(), role: Role::User };
        assert!(matches!(authorize(&user, Role::Admin), Err(ApiError::Forbidden)));
        assert!(authorize(&user, Role::User).is_ok());
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
        let r: Role = serde_json::from_str("\"user\"").unwrap();
        assert_eq!(r, Role::User);
    }

    #[tokio::test]
    async fn demoted_admin_loses_access_before_token_expiry() {
        let st = AppState::fake();
        let id = st.users.create("boss@x.io", "hash").await.unwrap().id;
        st.users.set_role(id, Role::Admin).await.unwrap();
        let token_identity = AuthUser { id, role: Role::Admin };

        authorize_current(&st, &token_identity, Role::Admin).await.unwrap();

        st.users.set_role(id, Role::User).await.unwrap();
        let res = authorize_current(&st, &token_identity, Role::Admin).await;
        assert!(matches!(res, Err(ApiError::Forbidden)));
    }

    #[tokio::test]
    async fn deleted_account_is_forbidden() {
        let st = AppState::fake();
        let ghost = AuthUser { id: Uuid::new_v4(), role: Role::Admin };
        let res = authorize_current(&st, &ghost, Role::Admin).await;
        assert!(matches!(res, Err(ApiError::Forbidden)));
    }
}
