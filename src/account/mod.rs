//! Account surfaces of the REST backend: auth, onboarding and the widget.
//!
//! These extend [`HttpApiClient`](crate::api::HttpApiClient) with typed calls.

pub mod auth;
pub mod onboarding;
pub mod widget;

pub use auth::TokenValidator;
pub use onboarding::{normalize_website, validate_update};
pub use widget::install_snippet;
