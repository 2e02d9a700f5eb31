//! Integration test: serve the gateway router on a free port and post workflow callbacks to it.

use async_trait::async_trait;
use flowlink::config::{ChatConfig, Config};
use flowlink::conversation::{ConversationError, ConversationLayer};
use flowlink::gateway::{router, GatewayState, CALLBACK_SECRET_HEADER};
use flowlink::service::DispatchService;
use flowlink::session::{SessionContext, SessionStore};
use serde_json::json;
use std::sync::{Arc, Mutex};

/// Records edits and sends as `(message id or "new", text)`.
#[derive(Default)]
struct Chat {
    updates: Mutex<Vec<(String, String)>>,
}

impl Chat {
    fn updates(&self) -> Vec<(String, String)> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversationLayer for Chat {
    async fn show_typing(&self, _channel_id: &str) -> Result<(), ConversationError> {
        Ok(())
    }

    async fn reply(&self, _c: &str, _m: &str, text: &str) -> Result<String, ConversationError> {
        self.updates.lock().unwrap().push(("reply".into(), text.into()));
        Ok("placeholder".into())
    }

    async fn edit_message(&self, _c: &str, message_id: &str, text: &str) -> Result<(), ConversationError> {
        self.updates.lock().unwrap().push((message_id.into(), text.into()));
        Ok(())
    }

    async fn send_message(&self, _c: &str, text: &str) -> Result<String, ConversationError> {
        self.updates.lock().unwrap().push(("new".into(), text.into()));
        Ok("sent".into())
    }
}

struct Harness {
    base: String,
    sessions: Arc<SessionStore>,
    chat: Arc<Chat>,
    client: reqwest::Client,
}

async fn start(secret: Option<&str>) -> Harness {
    let chat = Arc::new(Chat::default());
    let sessions = Arc::new(SessionStore::default());
    let service = Arc::new(DispatchService::new(
        ChatConfig::default(),
        sessions.clone(),
        chat.clone(),
    ));
    let state = GatewayState {
        config: Arc::new(Config::default()),
        service,
        callback_secret: secret.map(String::from),
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free port");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router(state)).await;
    });
    Harness {
        base: format!("http://{}", addr),
        sessions,
        chat,
        client: reqwest::Client::new(),
    }
}

async fn register(sessions: &SessionStore, id: &str) {
    sessions
        .register(
            id,
            SessionContext {
                channel_id: "chan".into(),
                status_message_id: Some("thinking-1".into()),
                user_id: "u1".into(),
                user_tag: "@ada".into(),
                prompt: "bob, hi".into(),
            },
        )
        .await;
}

#[tokio::test]
async fn duplicate_callbacks_update_the_conversation_once() {
    let h = start(None).await;
    register(&h.sessions, "s1").await;

    for _ in 0..2 {
        let res = h
            .client
            .post(format!("{}/callback", h.base))
            .json(&json!({ "sessionId": "s1", "response": "Hello from the workflow" }))
            .send()
            .await
            .expect("post callback");
        assert_eq!(res.status(), 200);
        let body: serde_json::Value = res.json().await.expect("json body");
        assert_eq!(body, json!({ "status": "received" }));
    }

    assert_eq!(
        h.chat.updates(),
        vec![("thinking-1".to_string(), "Hello from the workflow".to_string())]
    );
    assert!(h.sessions.is_empty().await);
}

#[tokio::test]
async fn unknown_session_is_acknowledged_without_updates() {
    let h = start(None).await;
    let res = h
        .client
        .post(format!("{}/callback", h.base))
        .json(&json!({ "sessionId": "missing", "error": "boom" }))
        .send()
        .await
        .expect("post callback");
    assert_eq!(res.status(), 200);
    assert!(h.chat.updates().is_empty());
}

#[tokio::test]
async fn wrong_secret_is_forbidden_and_session_kept() {
    let h = start(Some("s3cret")).await;
    register(&h.sessions, "s1").await;

    let res = h
        .client
        .post(format!("{}/callback", h.base))
        .header(CALLBACK_SECRET_HEADER, "nope")
        .json(&json!({ "sessionId": "s1", "response": "hi" }))
        .send()
        .await
        .expect("post callback");
    assert_eq!(res.status(), 403);
    assert_eq!(h.sessions.len().await, 1);

    let res = h
        .client
        .post(format!("{}/callback", h.base))
        .header(CALLBACK_SECRET_HEADER, "s3cret")
        .json(&json!({ "sessionId": "s1", "error": "model overloaded" }))
        .send()
        .await
        .expect("post callback");
    assert_eq!(res.status(), 200);
    assert_eq!(
        h.chat.updates(),
        vec![(
            "thinking-1".to_string(),
            "❌ **Error from AI:** model overloaded".to_string()
        )]
    );
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let h = start(None).await;
    let res = h
        .client
        .post(format!("{}/callback", h.base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .expect("post callback");
    assert_eq!(res.status(), 400);
}
