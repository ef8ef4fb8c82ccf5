//! Onboarding wizard endpoints.

use serde_json::Value;
use url::Url;

use crate::api::HttpApiClient;
use crate::core::errors::{SyncError, SyncResult};
use crate::model::{OnboardingState, OnboardingUpdate};

/// Normalize a website field: scheme defaults to `https`, host required.
///
/// # Errors
/// Returns a validation error if the value is not an http(s) URL with a host.
pub fn normalize_website(raw: &str) -> SyncResult<String> {
    let raw = raw.trim();
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    let url = Url::parse(&candidate)
        .map_err(|err| SyncError::Validation(format!("invalid website URL {raw}: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none_or(|h| !h.contains('.')) {
        return Err(SyncError::Validation(format!("invalid website URL: {raw}")));
    }
    Ok(url.to_string())
}

/// Check an onboarding step before it is sent and normalize its fields.
///
/// # Errors
/// Returns a validation error for a blank company name or a bad website URL.
pub fn validate_update(mut update: OnboardingUpdate) -> SyncResult<OnboardingUpdate> {
    if update.step == 0 {
        return Err(SyncError::Validation("step must be >= 1".to_string()));
    }
    if let Some(company) = update.company_name.as_mut() {
        let trimmed = company.trim();
        if trimmed.is_empty() {
            return Err(SyncError::Validation("company name is required".to_string()));
        }
        *company = trimmed.to_string();
    }
    if let Some(website) = update.website_url.as_mut() {
        *website = normalize_website(website)?;
    }
    Ok(update)
}

fn onboarding_body(body: Value) -> SyncResult<OnboardingState> {
    let raw = match body {
        Value::Object(mut map) if map.get("onboarding").is_some_and(Value::is_object) => {
            map.remove("onboarding").unwrap_or(Value::Null)
        }
        other => other,
    };
    Ok(serde_json::from_value(raw)?)
}

impl HttpApiClient {
    /// `GET /onboarding`.
    ///
    /// # Errors
    /// Returns an error if the request fails or the body does not decode.
    pub async fn onboarding(&self) -> SyncResult<OnboardingState> {
        onboarding_body(self.get_value("onboarding", &[]).await?)
    }

    /// `POST /onboarding/update` after client-side validation.
    ///
    /// A reply that reports the wizard completed marks the session as onboarded.
    ///
    /// # Errors
    /// Returns a validation error before sending, or the request error.
    pub async fn update_onboarding(&self, update: OnboardingUpdate) -> SyncResult<OnboardingState> {
        let update = validate_update(update)?;
        let progress = onboarding_body(self.post_value("onboarding/update", Some(&update)).await?)?;
        if progress.completed {
            self.session().set_onboarding_completed(true);
        }
        Ok(progress)
    }

    /// `POST /onboarding/skip`; the session counts as onboarded afterwards.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    pub async fn skip_onboarding(&self) -> SyncResult<OnboardingState> {
        let progress = onboarding_body(self.post_value::<()>("onboarding/skip", None).await?)?;
        self.session().set_onboarding_completed(true);
        Ok(progress)
    }
}
