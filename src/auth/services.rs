use tracing::{error, info, warn};

use super::{
    claims::TokenPurpose,
    dto::{PublicUser, TokenResponse},
    password::{hash_password, verify_against_dummy, verify_password, MIN_PASSWORD_LEN},
    repo_types::User,
};
use crate::{
    db::RepoError,
    error::{ApiError, ApiResult},
    mail,
    state::AppState,
    validation::normalize_email,
};

fn check_password(password: &str) -> ApiResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        warn!("password too short");
        return Err(ApiError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

fn token_pair(st: &AppState, user: User) -> ApiResult<TokenResponse> {
    let access_token = st.keys.sign_access(&user)?;
    let refresh_token = st.keys.sign_refresh(&user)?;
    Ok(TokenResponse {
        access_token,
        refresh_token,
        token_type: "bearer",
        user: user.into(),
    })
}

/// Sends on a spawned task. Failures are logged, never returned.
fn deliver(st: &AppState, to: &str, (subject, body): (String, String)) {
    let mailer = st.mailer.clone();
    let to = to.to_string();
    tokio::spawn(async move {
        if let Err(e) = mailer.send(&to, &subject, &body).await {
            error!(error = ?e, to = %to, subject = %subject, "email delivery failed");
        }
    });
}

fn send_verification(st: &AppState, user: &User) -> ApiResult<()> {
    let token = st.keys.sign_email_verification(user)?;
    deliver(st, &user.email, mail::verification_email(&st.config.public_base_url, &token));
    Ok(())
}

pub async fn signup(st: &AppState, email: &str, password: &str) -> ApiResult<PublicUser> {
    let email = normalize_email(email)?;
    check_password(password)?;

    if st.users.find_by_email(&email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(ApiError::DuplicateEmail("Email already registered"));
    }

    let hash = hash_password(password)?;
    let user = st.users.create(&email, &hash).await.map_err(|e| match e {
        RepoError::Conflict => ApiError::DuplicateEmail("Email already registered"),
        other => other.into(),
    })?;

    send_verification(st, &user)?;
    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok(user.into())
}

pub async fn login(st: &AppState, email: &str, password: &str) -> ApiResult<TokenResponse> {
    let email = email.trim().to_lowercase();

    let Some(user) = st.users.find_by_email(&email).await? else {
        // same argon2 cost as a real mismatch
        verify_against_dummy(password);
        warn!(email = %email, "login unknown email");
        return Err(ApiError::InvalidCredentials);
    };

    if !verify_password(password, &user.password_hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(ApiError::InvalidCredentials);
    }

    if !user.is_verified {
        warn!(user_id = %user.id, "login before email verification");
        return Err(ApiError::NotVerified);
    }

    info!(user_id = %user.id, "user logged in");
    token_pair(st, user)
}

pub async fn verify_email(st: &AppState, token: &str) -> ApiResult<()> {
    let claims = st.keys.verify(token, TokenPurpose::VerifyEmail)?;
    let user = st
        .users
        .find_by_id(claims.sub)
        .await?
        .ok_or(ApiError::InvalidToken("Invalid token"))?;

    if !st.users.mark_verified(user.id).await? {
        warn!(user_id = %user.id, "verification link reused");
        return Err(ApiError::InvalidToken("Verification link has already been used"));
    }
    info!(user_id = %user.id, "email verified");
    Ok(())
}

/// Same outcome for unknown, verified and unverified addresses.
pub async fn request_verification_email(st: &AppState, email: &str) -> ApiResult<()> {
    let email = email.trim().to_lowercase();
    match st.users.find_by_email(&email).await? {
        Some(user) if !user.is_verified => send_verification(st, &user)?,
        Some(_) => info!(email = %email, "verification requested for verified account"),
        None => info!(email = %email, "verification requested for unknown email"),
    }
    Ok(())
}

pub async fn refresh(st: &AppState, refresh_token: &str) -> ApiResult<TokenResponse> {
    let claims = st.keys.verify(refresh_token, TokenPurpose::Refresh)?;

    if st.revocations.is_revoked(claims.jti) {
        warn!(user_id = %claims.sub, "revoked refresh token presented");
        return Err(ApiError::InvalidToken("Refresh token has been revoked"));
    }

    let user = st
        .users
        .find_by_id(claims.sub)
        .await?
        .ok_or(ApiError::InvalidToken("Invalid token"))?;

    if claims.ver != user.token_version {
        warn!(user_id = %user.id, "stale refresh token after password change");
        return Err(ApiError::InvalidToken("Refresh token has been revoked"));
    }

    // consume: a concurrent refresh with the same token loses here
    if !st.revocations.revoke(claims.jti, claims.exp) {
        warn!(user_id = %user.id, "refresh token reused concurrently");
        return Err(ApiError::InvalidToken("Refresh token has been revoked"));
    }

    info!(user_id = %user.id, "tokens refreshed");
    token_pair(st, user)
}

pub async fn logout(st: &AppState, refresh_token: &str) -> ApiResult<()> {
    let claims = st.keys.verify(refresh_token, TokenPurpose::Refresh)?;
    st.revocations.revoke(claims.jti, claims.exp);
    info!(user_id = %claims.sub, "logged out");
    Ok(())
}

/// Same outcome whether or not the address belongs to an account.
pub async fn request_password_reset(st: &AppState, email: &str) -> ApiResult<()> {
    let email = email.trim().to_lowercase();
    if let Some(user) = st.users.find_by_email(&email).await? {
        let token = st.keys.sign_password_reset(&user)?;
        deliver(st, &user.email, mail::password_reset_email(&st.config.public_base_url, &token));
        info!(user_id = %user.id, "password reset requested");
    } else {
        info!(email = %email, "password reset requested for unknown email");
    }
    Ok(())
}

pub async fn reset_password(st: &AppState, token: &str, new_password: &str) -> ApiResult<()> {
    let claims = st.keys.verify(token, TokenPurpose::ResetPassword)?;
    check_password(new_password)?;

    let hash = hash_password(new_password)?;
    if !st.users.reset_password(claims.sub, claims.ver, &hash).await? {
        warn!(user_id = %claims.sub, "reset link reused or account gone");
        return Err(ApiError::InvalidToken("Reset link has already been used"));
    }
    info!(user_id = %claims.sub, "password reset");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::TokenSubject;
    use crate::auth::roles::Role;
    use crate::config::AppConfig;
    use crate::memory::{RecordingMailer, SlowMailer};
    use std::sync::Arc;
    use time::Duration;

    const PASSWORD: &str = "hunter2-but-longer";

    fn token_from(body: &str) -> String {
        crate::memory::token_from_body(body).expect("token link in body")
    }

    /// Waits for the `n`th message overall and returns the newest one to `to`.
    async fn mail_token(outbox: &RecordingMailer, to: &str, n: usize) -> String {
        outbox.wait_for(n).await;
        token_from(&outbox.last_to(to).expect("mail to recipient").body)
    }

    async fn verified_user(st: &AppState, outbox: &RecordingMailer, email: &str) -> User {
        let sent = outbox.count();
        signup(st, email, PASSWORD).await.unwrap();
        let token = mail_token(outbox, email, sent + 1).await;
        verify_email(st, &token).await.unwrap();
        st.users.find_by_email(email).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn signup_stores_hash_not_plaintext() {
        let st = AppState::fake();
        let user = signup(&st, " Ann@Example.com ", PASSWORD).await.unwrap();
        assert_eq!(user.email, "ann@example.com");
        assert!(!user.is_verified);
        let stored = st.users.find_by_email("ann@example.com").await.unwrap().unwrap();
        assert_ne!(stored.password_hash, PASSWORD);
        assert!(verify_password(PASSWORD, &stored.password_hash).unwrap());
    }

    #[tokio::test]
    async fn signup_rejects_duplicates_and_weak_input() {
        let st = AppState::fake();
        signup(&st, "bob@x.io", PASSWORD).await.unwrap();
        assert!(matches!(signup(&st, "BOB@x.io", PASSWORD).await, Err(ApiError::DuplicateEmail(_))));
        assert!(matches!(signup(&st, "nope", PASSWORD).await, Err(ApiError::Validation(_))));
        assert!(matches!(signup(&st, "c@x.io", "short").await, Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn signup_sends_verification_link() {
        let (st, outbox) = AppState::fake_with(AppConfig::for_tests());
        signup(&st, "dee@x.io", PASSWORD).await.unwrap();
        outbox.wait_for(1).await;
        let mail = outbox.last_to("dee@x.io").unwrap();
        assert!(mail.body.contains("http://test.local/api/v1/auth/verify-email/"));
        let claims = st.keys.verify(&token_from(&mail.body), TokenPurpose::VerifyEmail).unwrap();
        assert_eq!(claims.role, Role::User);
    }

    #[tokio::test]
    async fn login_requires_verification_and_correct_password() {
        let (st, outbox) = AppState::fake_with(AppConfig::for_tests());
        signup(&st, "eve@x.io", PASSWORD).await.unwrap();

        assert!(matches!(login(&st, "eve@x.io", PASSWORD).await, Err(ApiError::NotVerified)));

        let token = mail_token(&outbox, "eve@x.io", 1).await;
        verify_email(&st, &token).await.unwrap();

        assert!(matches!(login(&st, "eve@x.io", "wrong-password").await, Err(ApiError::InvalidCredentials)));
        assert!(matches!(login(&st, "ghost@x.io", PASSWORD).await, Err(ApiError::InvalidCredentials)));

        let pair = login(&st, "EVE@x.io", PASSWORD).await.unwrap();
        assert_eq!(pair.token_type, "bearer");
        st.keys.verify(&pair.access_token, TokenPurpose::Access).unwrap();
        st.keys.verify(&pair.refresh_token, TokenPurpose::Refresh).unwrap();
    }

    #[tokio::test]
    async fn verification_token_is_single_use() {
        let (st, outbox) = AppState::fake_with(AppConfig::for_tests());
        signup(&st, "fay@x.io", PASSWORD).await.unwrap();
        let token = mail_token(&outbox, "fay@x.io", 1).await;
        verify_email(&st, &token).await.unwrap();
        assert!(matches!(verify_email(&st, &token).await, Err(ApiError::InvalidToken(_))));
    }

    #[tokio::test]
    async fn verify_email_rejects_other_purposes() {
        let (st, outbox) = AppState::fake_with(AppConfig::for_tests());
        let user = verified_user(&st, &outbox, "gus@x.io").await;
        let access = st.keys.sign_access(&user).unwrap();
        assert!(matches!(verify_email(&st, &access).await, Err(ApiError::PurposeMismatch)));
    }

    #[tokio::test]
    async fn refresh_rotates_and_rejects_reuse() {
        let (st, outbox) = AppState::fake_with(AppConfig::for_tests());
        verified_user(&st, &outbox, "hal@x.io").await;
        let pair = login(&st, "hal@x.io", PASSWORD).await.unwrap();

        let next = refresh(&st, &pair.refresh_token).await.unwrap();
        assert_ne!(next.refresh_token, pair.refresh_token);
        assert!(matches!(refresh(&st, &pair.refresh_token).await, Err(ApiError::InvalidToken(_))));
        refresh(&st, &next.refresh_token).await.unwrap();
    }

    #[tokio::test]
    async fn refresh_rejects_access_tokens() {
        let (st, outbox) = AppState::fake_with(AppConfig::for_tests());
        verified_user(&st, &outbox, "ida@x.io").await;
        let pair = login(&st, "ida@x.io", PASSWORD).await.unwrap();
        assert!(matches!(refresh(&st, &pair.access_token).await, Err(ApiError::PurposeMismatch)));
    }

    #[tokio::test]
    async fn logout_revokes_refresh_token() {
        let (st, outbox) = AppState::fake_with(AppConfig::for_tests());
        verified_user(&st, &outbox, "jon@x.io").await;
        let pair = login(&st, "jon@x.io", PASSWORD).await.unwrap();
        logout(&st, &pair.refresh_token).await.unwrap();
        assert!(matches!(refresh(&st, &pair.refresh_token).await, Err(ApiError::InvalidToken(_))));
    }

    #[tokio::test]
    async fn expired_refresh_token_reports_expiry() {
        let (st, outbox) = AppState::fake_with(AppConfig::for_tests());
        let user = verified_user(&st, &outbox, "kim@x.io").await;
        let expired = st
            .keys
            .issue(TokenSubject::from(&user), TokenPurpose::Refresh, Duration::seconds(-120))
            .unwrap();
        assert!(matches!(refresh(&st, &expired).await, Err(ApiError::ExpiredToken)));
    }

    #[tokio::test]
    async fn password_reset_request_is_uniform_and_mails_only_real_accounts() {
        let (st, outbox) = AppState::fake_with(AppConfig::for_tests());
        verified_user(&st, &outbox, "lee@x.io").await;
        let before = outbox.count();

        request_password_reset(&st, "nobody@x.io").await.unwrap();
        outbox.settle().await;
        assert_eq!(outbox.count(), before);

        request_password_reset(&st, "lee@x.io").await.unwrap();
        outbox.wait_for(before + 1).await;
        assert!(outbox.last_to("lee@x.io").unwrap().body.contains("/api/v1/auth/reset-password/"));
    }

    #[tokio::test]
    async fn mail_delivery_does_not_delay_responses() {
        let (mut st, _) = AppState::fake_with(AppConfig::for_tests());
        st.users.create("slow@x.io", &hash_password(PASSWORD).unwrap()).await.unwrap();
        st.mailer = Arc::new(SlowMailer(std::time::Duration::from_millis(300)));

        let started = std::time::Instant::now();
        request_password_reset(&st, "slow@x.io").await.unwrap();
        request_verification_email(&st, "slow@x.io").await.unwrap();
        assert!(
            started.elapsed() < std::time::Duration::from_millis(250),
            "took {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn unknown_email_login_still_pays_for_a_hash_check() {
        let st = AppState::fake();
        signup(&st, "real@x.io", PASSWORD).await.unwrap();

        let started = std::time::Instant::now();
        let res = login(&st, "ghost@x.io", PASSWORD).await;
        let unknown = started.elapsed();
        assert!(matches!(res, Err(ApiError::InvalidCredentials)));

        let started = std::time::Instant::now();
        let _ = login(&st, "real@x.io", "wrong-password").await;
        let known = started.elapsed();

        // both branches run argon2
        assert!(unknown * 10 > known, "unknown {unknown:?} vs known {known:?}");
    }

    #[tokio::test]
    async fn reset_password_invalidates_refresh_tokens_and_is_single_use() {
        let (st, outbox) = AppState::fake_with(AppConfig::for_tests());
        verified_user(&st, &outbox, "max@x.io").await;
        let old_a = login(&st, "max@x.io", PASSWORD).await.unwrap();
        let old_b = login(&st, "max@x.io", PASSWORD).await.unwrap();

        let sent = outbox.count();
        request_password_reset(&st, "max@x.io").await.unwrap();
        let token = mail_token(&outbox, "max@x.io", sent + 1).await;
        reset_password(&st, &token, "brand-new-password").await.unwrap();

        for old in [old_a, old_b] {
            assert!(matches!(refresh(&st, &old.refresh_token).await, Err(ApiError::InvalidToken(_))));
        }
        assert!(matches!(
            reset_password(&st, &token, "another-password").await,
            Err(ApiError::InvalidToken(_))
        ));

        assert!(matches!(login(&st, "max@x.io", PASSWORD).await, Err(ApiError::InvalidCredentials)));
        let fresh = login(&st, "max@x.io", "brand-new-password").await.unwrap();
        refresh(&st, &fresh.refresh_token).await.unwrap();
    }

    #[tokio::test]
    async fn resend_verification_only_for_unverified_accounts() {
        let (st, outbox) = AppState::fake_with(AppConfig::for_tests());
        signup(&st, "ned@x.io", PASSWORD).await.unwrap();
        outbox.wait_for(1).await;

        request_verification_email(&st, "ned@x.io").await.unwrap();
        outbox.wait_for(2).await;

        request_verification_email(&st, "ghost@x.io").await.unwrap();
        outbox.settle().await;
        assert_eq!(outbox.count(), 2);

        let token = token_from(&outbox.last_to("ned@x.io").unwrap().body);
        verify_email(&st, &token).await.unwrap();
        request_verification_email(&st, "ned@x.io").await.unwrap();
        outbox.settle().await;
        assert_eq!(outbox.count(), 2);
    }
}
