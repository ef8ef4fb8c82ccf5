//! Drives the HTTP client and the app against the mock backend.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use helpdesk_sync::api::{ApiClient, AuthSession, ConversationFilter, HttpApiClient};
use helpdesk_sync::chat::SendOutcome;
use helpdesk_sync::model::{ConversationState, OnboardingUpdate, SenderType};
use helpdesk_sync::realtime::{LocalPushHub, PushProvider};
use helpdesk_sync::server::{self, MockState};
use helpdesk_sync::{HelpdeskApp, SyncConfig, SyncError};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

struct Backend {
    addr: SocketAddr,
    state: Arc<MockState>,
    hub: Arc<LocalPushHub>,
    stop: Option<oneshot::Sender<()>>,
}

impl Backend {
    async fn start() -> Self {
        let hub = Arc::new(LocalPushHub::new());
        let state = MockState::new(Some(Arc::clone(&hub)));
        state.add_account("Agent", "agent@example.com", "secret");

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap_or_else(|e| panic!("bind: {e}"));
        let addr = listener.local_addr().unwrap_or_else(|e| panic!("addr: {e}"));
        let (stop, stopped) = oneshot::channel::<()>();
        let serve_state = Arc::clone(&state);
        tokio::spawn(async move {
            let _ = server::serve(listener, serve_state, async {
                let _ = stopped.await;
            })
            .await;
        });

        Self {
            addr,
            state,
            hub,
            stop: Some(stop),
        }
    }

    fn config(&self) -> SyncConfig {
        SyncConfig::new()
            .with_base_url(format!("http://{}/api/", self.addr))
            .with_list_interval(Duration::from_secs(3_600))
            .with_thread_interval(Duration::from_secs(3_600))
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_requests_without_token_are_rejected() {
    let backend = Backend::start().await;
    let session = Arc::new(AuthSession::default());
    let client = HttpApiClient::new(backend.config().api, Arc::clone(&session))
        .unwrap_or_else(|e| panic!("{e}"));

    let listed = client.list_conversations(ConversationFilter::default()).await;
    assert!(matches!(listed, Err(SyncError::Unauthorized)));
    assert!(matches!(client.validate_token().await, Err(SyncError::Unauthorized)));

    assert!(client.login("agent@example.com", "wrong").await.is_err());
    assert!(!session.is_authenticated());

    let grant = client
        .login("agent@example.com", "secret")
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(session.token(), grant.token);
    let user = client.validate_token().await.unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(user.email, "agent@example.com");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_account_surfaces() {
    let backend = Backend::start().await;
    let session = Arc::new(AuthSession::default());
    let client = HttpApiClient::new(backend.config().api, Arc::clone(&session))
        .unwrap_or_else(|e| panic!("{e}"));
    let grant = client
        .login("agent@example.com", "secret")
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert!(!grant.onboarding_completed);
    assert!(!session.onboarding_completed());

    let progress = client.onboarding().await.unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(progress.current_step, 1);

    let update = OnboardingUpdate {
        step: 1,
        company_name: Some(" Acme ".into()),
        website_url: Some("acme.io".into()),
        ..OnboardingUpdate::default()
    };
    let progress = client
        .update_onboarding(update)
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(progress.current_step, 2);
    assert_eq!(progress.company_name.as_deref(), Some("Acme"));
    assert_eq!(progress.website_url.as_deref(), Some("https://acme.io/"));

    let skipped = client.skip_onboarding().await.unwrap_or_else(|e| panic!("{e}"));
    assert!(skipped.skipped);
    assert!(session.onboarding_completed());

    // A fresh login now reports the wizard as done.
    let _ = client.logout();
    assert!(!session.onboarding_completed());
    let grant = client
        .login("agent@example.com", "secret")
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert!(grant.onboarding_completed);
    assert!(session.onboarding_completed());

    let snippet = client.widget_snippet().await.unwrap_or_else(|e| panic!("{e}"));
    assert!(snippet.contains(&backend.state.widget().widget_id));
    assert!(snippet.contains(&format!("http://{}/widget.js", backend.addr)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dashboard_flow() {
    let backend = Backend::start().await;
    let app = HelpdeskApp::new(
        backend.config(),
        Arc::clone(&backend.hub) as Arc<dyn PushProvider>,
    )
    .unwrap_or_else(|e| panic!("{e}"));
    let http = app.http().unwrap_or_else(|| panic!("http client"));
    let grant = http
        .login("agent@example.com", "secret")
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    let token = grant.token.unwrap_or_default();

    let waiting = backend.state.open_conversation("Early Visitor");
    app.start().await.unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(app.inbox().items().len(), 1);

    // A visitor arriving after start is pushed into the list.
    let pushed = backend.state.open_conversation("Zed");
    assert_eq!(app.inbox().items().first().map(|c| c.id.clone()), Some(pushed.id.clone()));

    backend.state.visitor_message(&waiting.id, "anyone?");
    let _ = app
        .open_conversation(&waiting.id)
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(app.chat().messages().len(), 1);

    backend.state.visitor_message(&waiting.id, "hello??");
    assert!(eventually(|| app.chat().messages().len() == 2).await);
    let row = app.inbox().get(&waiting.id).unwrap_or_else(|| panic!("listed"));
    assert_eq!(row.last_message.as_deref(), Some("hello??"));

    let outcome = app
        .chat()
        .send_text("On it!")
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert!(matches!(outcome, SendOutcome::Confirmed { .. }));
    let agent: Vec<_> = app
        .chat()
        .messages()
        .into_iter()
        .filter(|m| m.sender_type == SenderType::Agent)
        .collect();
    assert_eq!(agent.len(), 1);
    assert!(!agent[0].is_placeholder());
    assert_eq!(agent[0].content, "On it!");

    app.update_state(&waiting.id, ConversationState::Closed)
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(
        app.inbox().get(&waiting.id).map(|c| c.state),
        Some(ConversationState::Closed)
    );

    // The backend forgets the token: the next request logs the session out.
    assert!(backend.state.revoke(&token));
    assert!(matches!(app.inbox().refresh().await, Err(SyncError::Unauthorized)));
    assert!(!app.session().is_authenticated());
    assert!(eventually(|| app.cache().is_empty() && backend.hub.channel_count() == 0).await);
    assert!(app.inbox().items().is_empty());
    assert!(app.chat().snapshot().is_none());

    app.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_file_caption_and_close_reason() {
    let backend = Backend::start().await;
    let app = HelpdeskApp::new(
        backend.config(),
        Arc::clone(&backend.hub) as Arc<dyn PushProvider>,
    )
    .unwrap_or_else(|e| panic!("{e}"));
    let http = app.http().unwrap_or_else(|| panic!("http client"));
    let _ = http
        .login("agent@example.com", "secret")
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    let conversation = backend.state.open_conversation("Visitor");
    app.start().await.unwrap_or_else(|e| panic!("{e}"));
    let _ = app
        .open_conversation(&conversation.id)
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    let outcome = app
        .chat()
        .send_file(
            "invoice.pdf",
            "application/pdf",
            b"%PDF-1.4".to_vec(),
            Some(" Here is your invoice ".into()),
        )
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert!(matches!(outcome, SendOutcome::Confirmed { .. }));
    let stored = backend
        .state
        .messages(&conversation.id)
        .unwrap_or_default();
    assert_eq!(
        stored.last().map(|m| m.content.as_str()),
        Some("Here is your invoice")
    );
    assert!(
        app.chat()
            .messages()
            .iter()
            .any(|m| !m.is_placeholder() && m.content == "Here is your invoice")
    );

    app.inbox()
        .close_with_reason(&conversation.id, "Resolved by phone")
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(
        app.inbox().get(&conversation.id).map(|c| c.state),
        Some(ConversationState::Closed)
    );
    assert_eq!(
        backend.state.close_reason(&conversation.id).as_deref(),
        Some("Resolved by phone")
    );

    app.shutdown().await;
}
