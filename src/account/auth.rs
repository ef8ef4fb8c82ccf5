//! Login, registration and token validation.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiFuture, AuthSession, HttpApiClient};
use crate::core::errors::{SyncError, SyncResult};
use crate::model::{AuthGrant, LoginRequest, RegisterRequest, User};
use crate::refresh::RefreshJob;

fn require(field: &str, value: &str) -> SyncResult<()> {
    if value.trim().is_empty() {
        return Err(SyncError::Validation(format!("{field} is required")));
    }
    Ok(())
}

fn require_email(email: &str) -> SyncResult<()> {
    require("email", email)?;
    match email.trim().split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(SyncError::Validation(format!("invalid email: {email}"))),
    }
}

impl HttpApiClient {
    /// `POST /login`; the returned token becomes the session token.
    ///
    /// # Errors
    /// Returns a validation error for blank credentials, `Unauthorized` for
    /// rejected ones, or an API error when no token comes back.
    pub async fn login(&self, email: &str, password: &str) -> SyncResult<AuthGrant> {
        require_email(email)?;
        require("password", password)?;
        let request = LoginRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        let grant: AuthGrant = self.post_json("login", Some(&request)).await?;
        self.adopt(grant)
    }

    /// `POST /register`; logs the new account in.
    ///
    /// # Errors
    /// Returns a validation error for missing fields or an API error.
    pub async fn register(&self, request: &RegisterRequest) -> SyncResult<AuthGrant> {
        require("name", &request.name)?;
        require_email(&request.email)?;
        require("password", &request.password)?;
        let grant: AuthGrant = self.post_json("register", Some(request)).await?;
        self.adopt(grant)
    }

    /// `GET /validate-token`; exposed as [`ApiClient::validate_token`].
    pub(crate) async fn current_user(&self) -> SyncResult<User> {
        if !self.session().is_authenticated() {
            return Err(SyncError::Unauthorized);
        }
        let body = self.get_value("validate-token", &[]).await?;
        let user = body.get("user").cloned().unwrap_or(Value::Null);
        Ok(serde_json::from_value(user)?)
    }

    /// Drop the session token locally.
    pub fn logout(&self) -> bool {
        self.session().logout()
    }

    fn adopt(&self, grant: AuthGrant) -> SyncResult<AuthGrant> {
        let token = grant
            .token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| SyncError::api(200, "response carried no token"))?;
        self.session().set_token(token);
        self.session().set_onboarding_completed(grant.onboarding_completed);
        info!(user = %grant.user.email, onboarding_completed = grant.onboarding_completed, "Logged in");
        Ok(grant)
    }
}

/// Re-checks the session token on a schedule and logs out once it is rejected.
///
/// Transport failures and 5xx replies keep the session; the next cycle retries.
pub struct TokenValidator {
    api: Arc<dyn ApiClient>,
    session: Arc<AuthSession>,
}

impl TokenValidator {
    /// Validator for `session`, asking `api`.
    #[must_use]
    pub fn new(api: Arc<dyn ApiClient>, session: Arc<AuthSession>) -> Self {
        Self { api, session }
    }

    /// Ask the backend once.
    ///
    /// # Errors
    /// Returns the validation error; non-retryable ones have logged the session out.
    pub async fn check(&self) -> SyncResult<User> {
        match self.api.validate_token().await {
            Ok(user) => {
                debug!(user = %user.email, "Session token still valid");
                Ok(user)
            }
            Err(err) if err.is_retryable() => {
                warn!("Token validation unavailable: {err}");
                Err(err)
            }
            Err(err) => {
                warn!("Token validation failed, logging out: {err}");
                self.session.logout();
                Err(err)
            }
        }
    }
}

impl RefreshJob for TokenValidator {
    fn name(&self) -> &'static str {
        "token"
    }

    fn is_paused(&self) -> bool {
        !self.session.is_authenticated()
    }

    fn refresh(&self) -> ApiFuture<'_, SyncResult<bool>> {
        Box::pin(async move { self.check().await.map(|_| true) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refresh::{RefreshConfigBuilder, RefreshWorker};
    use crate::testing::{ApiCall, ScriptedApi};
    use std::time::Duration;

    fn validator(api: &Arc<ScriptedApi>) -> (Arc<AuthSession>, Arc<TokenValidator>) {
        let session = Arc::new(AuthSession::new(Some("t0ken".into())));
        let validator = Arc::new(TokenValidator::new(
            Arc::clone(api) as Arc<dyn ApiClient>,
            Arc::clone(&session),
        ));
        (session, validator)
    }

    fn validations(api: &ScriptedApi) -> usize {
        api.calls()
            .iter()
            .filter(|c| matches!(c, ApiCall::ValidateToken))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_token_logs_out_on_next_cycle() {
        let api = Arc::new(ScriptedApi::default());
        let (session, validator) = validator(&api);
        let handle = RefreshWorker::new(
            Arc::clone(&validator),
            RefreshConfigBuilder::new().interval(Duration::from_secs(60)).build(),
        )
        .spawn();

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(validations(&api), 1);
        assert!(session.is_authenticated());

        api.reject_token(true);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(validations(&api), 2);
        assert!(!session.is_authenticated());

        // Logged out: later cycles skip the request.
        tokio::time::sleep(Duration::from_secs(120)).await;
        let stats = handle.stop().await;
        assert_eq!(validations(&api), 2);
        assert_eq!(stats.refreshed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.skipped, 2);
    }

    #[tokio::test]
    async fn test_unavailable_backend_keeps_session() {
        let api = Arc::new(ScriptedApi::default());
        let (session, validator) = validator(&api);
        api.fail_token_checks(503);
        assert!(validator.check().await.is_err());
        assert!(session.is_authenticated());
    }

    #[test]
    fn test_email_validation() {
        assert!(require_email("agent@example.com").is_ok());
        assert!(require_email("  ").is_err());
        assert!(require_email("agent").is_err());
        assert!(require_email("@example.com").is_err());
        assert!(require_email("agent@localhost").is_err());
    }
}
