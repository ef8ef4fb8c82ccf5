//! Chat widget settings and the install snippet.

use serde_json::Value;

use crate::api::HttpApiClient;
use crate::core::errors::SyncResult;
use crate::model::{WidgetPosition, WidgetSettings};

/// Render the `<script>` tag a customer pastes into their site.
#[must_use]
pub fn install_snippet(settings: &WidgetSettings, default_script_url: &str) -> String {
    let src = settings.script_url.as_deref().unwrap_or(default_script_url);
    let position = match settings.position {
        WidgetPosition::BottomRight => "bottom-right",
        WidgetPosition::BottomLeft => "bottom-left",
    };
    let mut tag = format!(
        r#"<script src="{}" data-widget-id="{}" data-color="{}" data-position="{}""#,
        escape_attr(src),
        escape_attr(&settings.widget_id),
        escape_attr(&settings.color),
        position,
    );
    if let Some(greeting) = settings.greeting.as_deref().filter(|g| !g.is_empty()) {
        tag.push_str(&format!(r#" data-greeting="{}""#, escape_attr(greeting)));
    }
    tag.push_str(" async></script>");
    tag
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

impl HttpApiClient {
    /// `GET /widget`.
    ///
    /// # Errors
    /// Returns an error if the request fails or the body does not decode.
    pub async fn widget(&self) -> SyncResult<WidgetSettings> {
        let body = self.get_value("widget", &[]).await?;
        let raw = match body {
            Value::Object(mut map) if map.get("widget").is_some_and(Value::is_object) => {
                map.remove("widget").unwrap_or(Value::Null)
            }
            other => other,
        };
        Ok(serde_json::from_value(raw)?)
    }

    /// Widget script served next to the API: `{origin}/widget.js`.
    ///
    /// # Errors
    /// Returns an error if the URL cannot be built.
    pub fn widget_script_url(&self) -> SyncResult<String> {
        Ok(self.endpoint("/")?.join("/widget.js")?.to_string())
    }

    /// Fetch the settings and render the install snippet.
    ///
    /// # Errors
    /// Returns an error if the settings cannot be fetched.
    pub async fn widget_snippet(&self) -> SyncResult<String> {
        let settings = self.widget().await?;
        Ok(install_snippet(&settings, &self.widget_script_url()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> WidgetSettings {
        WidgetSettings {
            widget_id: "wk_42".into(),
            color: "#ff0000".into(),
            greeting: Some(r#"Hi "there" <3"#.into()),
            position: WidgetPosition::BottomLeft,
            script_url: None,
        }
    }

    #[test]
    fn test_snippet_escapes_attributes() {
        let snippet = install_snippet(&settings(), "https://support.example.com/widget.js");
        assert_eq!(
            snippet,
            r##"<script src="https://support.example.com/widget.js" data-widget-id="wk_42" data-color="#ff0000" data-position="bottom-left" data-greeting="Hi &quot;there&quot; &lt;3" async></script>"##
        );
    }

    #[test]
    fn test_backend_script_url_wins() {
        let mut settings = settings();
        settings.script_url = Some("https://cdn.example.net/w.js".into());
        settings.greeting = None;
        let snippet = install_snippet(&settings, "https://ignored/widget.js");
        assert!(snippet.starts_with(r#"<script src="https://cdn.example.net/w.js""#));
        assert!(!snippet.contains("data-greeting"));
    }
}
