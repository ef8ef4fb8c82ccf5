//! Auth, onboarding and widget payloads.

use serde::{Deserialize, Serialize};

/// Authenticated dashboard user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Identifier.
    #[serde(deserialize_with = "crate::model::account::flexible_string")]
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Login email.
    pub email: String,
}

/// Credentials for `POST /login`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Login email.
    pub email: String,
    /// Plain password, sent over TLS only.
    pub password: String,
}

/// Payload for `POST /register`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Display name.
    pub name: String,
    /// Login email.
    pub email: String,
    /// Plain password, sent over TLS only.
    pub password: String,
}

/// Token and user returned by login/register/validate-token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthGrant {
    /// Bearer token.
    #[serde(default)]
    pub token: Option<String>,
    /// Authenticated user.
    pub user: User,
    /// Whether the account finished (or skipped) the onboarding wizard.
    #[serde(default)]
    pub onboarding_completed: bool,
}

/// Onboarding progress for the current account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardingState {
    /// Current wizard step (1-based).
    #[serde(default = "first_step")]
    pub current_step: u32,
    /// Wizard finished.
    #[serde(default)]
    pub completed: bool,
    /// Wizard skipped.
    #[serde(default)]
    pub skipped: bool,
    /// Company name collected so far.
    #[serde(default)]
    pub company_name: Option<String>,
    /// Website URL collected so far.
    #[serde(default)]
    pub website_url: Option<String>,
    /// Free-form answers keyed by field name.
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

const fn first_step() -> u32 {
    1
}

/// Payload for `POST /onboarding/update`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardingUpdate {
    /// Step being submitted.
    pub step: u32,
    /// Company name field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    /// Website URL field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,
    /// Extra answers.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub data: serde_json::Map<String, serde_json::Value>,
}

/// Corner the chat launcher is pinned to.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WidgetPosition {
    /// Bottom right (default).
    #[default]
    BottomRight,
    /// Bottom left.
    BottomLeft,
}

/// Widget settings from `GET /widget`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetSettings {
    /// Public widget key embedded in the install snippet.
    #[serde(alias = "widget_key", deserialize_with = "crate::model::account::flexible_string")]
    pub widget_id: String,
    /// Launcher colour.
    #[serde(default = "default_color")]
    pub color: String,
    /// Greeting shown when the widget opens.
    #[serde(default)]
    pub greeting: Option<String>,
    /// Launcher position.
    #[serde(default)]
    pub position: WidgetPosition,
    /// Script URL, when the backend overrides the default CDN.
    #[serde(default)]
    pub script_url: Option<String>,
}

fn default_color() -> String {
    "#4f46e5".to_string()
}

/// Accept a JSON string or number as a string field.
pub(crate) fn flexible_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(n) => n.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_onboarding_defaults() {
        let state: OnboardingState =
            serde_json::from_value(json!({})).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(state.current_step, 1);
        assert!(!state.completed);
    }

    #[test]
    fn test_grant_reads_onboarding_flag() {
        let grant: AuthGrant = serde_json::from_value(json!({
            "token": "t",
            "user": {"id": 4, "email": "a@example.com"},
            "onboarding_completed": true
        }))
        .unwrap_or_else(|e| panic!("{e}"));
        assert!(grant.onboarding_completed);

        let legacy: AuthGrant = serde_json::from_value(json!({
            "user": {"id": "4", "email": "a@example.com"}
        }))
        .unwrap_or_else(|e| panic!("{e}"));
        assert!(!legacy.onboarding_completed);
    }

    #[test]
    fn test_widget_decodes_numeric_key() {
        let widget: WidgetSettings = serde_json::from_value(json!({
            "widget_key": 991,
            "position": "bottom-left"
        }))
        .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(widget.widget_id, "991");
        assert_eq!(widget.position, WidgetPosition::BottomLeft);
        assert_eq!(widget.color, "#4f46e5");
    }
}
