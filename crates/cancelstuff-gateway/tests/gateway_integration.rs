#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use cancelstuff_core::{AssistantError, AssistantReply};
use cancelstuff_gateway::{AuditService, GatewayServer};
use cancelstuff_session::{RequestSerializer, SessionStore, Workspace};
use cancelstuff_assistant::Assistant;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceExt;

const FOUND_THREE: &str = "I found these:\n- Netflix ($15.99/mo)\n- Spotify ($10.99/mo)\n- Gym ($40.00/mo)\nFirst batch?";

#[derive(Debug, Clone)]
struct Call {
    prompt: String,
    working_dir: PathBuf,
    continue_session: bool,
}

/// Scripted assistant that records every call.
#[derive(Default)]
struct FakeAssistant {
    calls: Mutex<Vec<Call>>,
    failure: Mutex<Option<AssistantError>>,
    delay: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FakeAssistant {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn fail_with(&self, err: AssistantError) {
        *self.failure.lock() = Some(err);
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Assistant for FakeAssistant {
    async fn invoke(
        &self,
        prompt: &str,
        working_dir: &Path,
        continue_session: bool,
    ) -> Result<AssistantReply, AssistantError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().push(Call {
            prompt: prompt.to_string(),
            working_dir: working_dir.to_path_buf(),
            continue_session,
        });
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if let Some(err) = self.failure.lock().clone() {
            return Err(err);
        }
        let text = if prompt.contains("transactions CSV") {
            FOUND_THREE.to_string()
        } else if prompt.contains("HTML audit report") {
            "Sure!\n<!DOCTYPE html><html><body>saved $800</body></html>\nDone.".to_string()
        } else {
            format!("noted: {}", prompt.trim())
        };
        Ok(AssistantReply {
            text,
            cost_usd: Some(0.01),
            external_session_id: None,
        })
    }
}

struct Harness {
    service: Arc<AuditService>,
    assistant: Arc<FakeAssistant>,
    tmp: tempfile::TempDir,
}

fn harness(assistant: FakeAssistant) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let workspace = Workspace::new(tmp.path(), "jfc");
    let store = Arc::new(SessionStore::new(
        workspace,
        RequestSerializer::new(Duration::from_secs(5)),
    ));
    let assistant = Arc::new(assistant);
    let service = Arc::new(AuditService::new(store, assistant.clone()));
    Harness {
        service,
        assistant,
        tmp,
    }
}

fn multipart_body(field: &str, filename: &str, content: &str) -> (String, String) {
    let boundary = "cancelstuff-test-boundary";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
         Content-Type: text/csv\r\n\
         \r\n\
         {content}\r\n\
         --{boundary}--\r\n"
    );
    (format!("multipart/form-data; boundary={boundary}"), body)
}

async fn send(app: axum::Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn start(h: &Harness) -> String {
    let (ctype, body) = multipart_body("csv", "march.csv", "date,desc,amount\n2024-03-01,NETFLIX,15.99");
    let req = Request::post("/api/start")
        .header("content-type", ctype)
        .body(Body::from(body))
        .unwrap();
    let (status, json) = send(GatewayServer::build(h.service.clone()), req).await;
    assert_eq!(status, StatusCode::OK, "{json}");
    json["sessionId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_lists_sessions() {
    let h = harness(FakeAssistant::default());
    let app = GatewayServer::build(h.service.clone());
    let req = Request::get("/api/health").body(Body::empty()).unwrap();
    let (status, json) = send(app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "cancelstuff");
    assert_eq!(json["sessions"].as_array().unwrap().len(), 0);

    let id = start(&h).await;
    let req = Request::get("/api/health").body(Body::empty()).unwrap();
    let (_, json) = send(GatewayServer::build(h.service.clone()), req).await;
    let sessions = json["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["id"], id.as_str());
    assert_eq!(sessions[0]["state"], "reviewing");
}

#[tokio::test]
async fn test_start_returns_analysis_and_subscriptions() {
    let h = harness(FakeAssistant::default());
    let (ctype, body) = multipart_body("csv", "../../evil.csv", "date,desc,amount\n2024-03-01,NETFLIX,15.99");
    let req = Request::post("/api/start")
        .header("content-type", ctype)
        .body(Body::from(body))
        .unwrap();
    let (status, json) = send(GatewayServer::build(h.service.clone()), req).await;

    assert_eq!(status, StatusCode::OK, "{json}");
    assert!(json["message"].as_str().unwrap().contains("Netflix"));
    assert_eq!(json["cost"], 0.01);
    let subs = json["subscriptions"].as_array().unwrap();
    assert_eq!(subs.len(), 3);
    assert_eq!(subs[0]["name"], "Netflix");
    assert_eq!(subs[0]["amount"], 15.99);

    let calls = h.assistant.calls();
    assert_eq!(calls.len(), 1);
    assert!(!calls[0].continue_session);
    assert!(calls[0].prompt.contains("2024-03-01,NETFLIX,15.99"));

    // The upload lands inside the session directory, never outside it.
    let dir = &calls[0].working_dir;
    assert!(dir.join("_.._evil.csv").is_file());
    assert!(!h.tmp.path().join("evil.csv").exists());
}

#[tokio::test]
async fn test_start_without_csv_field_is_400() {
    let h = harness(FakeAssistant::default());
    let (ctype, body) = multipart_body("statement", "a.csv", "x");
    let req = Request::post("/api/start")
        .header("content-type", ctype)
        .body(Body::from(body))
        .unwrap();
    let (status, json) = send(GatewayServer::build(h.service.clone()), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "No CSV file uploaded");
    assert!(h.service.sessions().is_empty());
}

#[tokio::test]
async fn test_start_over_upload_limit_is_rejected() {
    let h = harness(FakeAssistant::default());
    let app = GatewayServer::build_with_upload_limit(h.service.clone(), 64);
    let (ctype, body) = multipart_body("csv", "big.csv", &"x".repeat(1024));
    let req = Request::post("/api/start")
        .header("content-type", ctype)
        .body(Body::from(body))
        .unwrap();
    let (status, _) = send(app, req).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(h.assistant.calls().is_empty());
}

#[tokio::test]
async fn test_failed_start_maps_auth_error_and_discards_session() {
    let h = harness(FakeAssistant::default());
    h.assistant.fail_with(AssistantError::AuthRequired);
    let (ctype, body) = multipart_body("csv", "march.csv", "a,b\n1,2");
    let req = Request::post("/api/start")
        .header("content-type", ctype)
        .body(Body::from(body))
        .unwrap();
    let (status, json) = send(GatewayServer::build(h.service.clone()), req).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["kind"], "auth_required");
    assert!(json["action"].as_str().unwrap().contains("claude"));
    assert!(h.service.sessions().is_empty());
    let leftover: Vec<_> = std::fs::read_dir(h.tmp.path()).unwrap().collect();
    assert!(leftover.is_empty());
}

#[tokio::test]
async fn test_chat_continues_the_conversation() {
    let h = harness(FakeAssistant::default());
    let id = start(&h).await;

    let req = post_json(
        "/api/chat",
        serde_json::json!({ "sessionId": id, "message": "Cancel Netflix" }),
    );
    let (status, json) = send(GatewayServer::build(h.service.clone()), req).await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["message"], "noted: Cancel Netflix");
    assert_eq!(json["cost"], 0.01);

    let calls = h.assistant.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].continue_session);
    assert_eq!(calls[0].working_dir, calls[1].working_dir);
}

#[tokio::test]
async fn test_chat_validation_errors() {
    let h = harness(FakeAssistant::default());
    let app = GatewayServer::build(h.service.clone());

    let (status, json) = send(
        app.clone(),
        post_json("/api/chat", serde_json::json!({ "message": "hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Missing sessionId or message");

    let (status, _) = send(
        app.clone(),
        post_json("/api/chat", serde_json::json!({ "sessionId": "nope", "message": "hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = send(
        app,
        post_json(
            "/api/chat",
            serde_json::json!({ "sessionId": uuid::Uuid::new_v4().to_string(), "message": "hi" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["kind"], "session_not_found");
    assert!(h.assistant.calls().is_empty());
}

#[tokio::test]
async fn test_report_extracts_html_and_finishes_session() {
    let h = harness(FakeAssistant::default());
    let id = start(&h).await;

    let (status, json) = send(
        GatewayServer::build(h.service.clone()),
        post_json("/api/report", serde_json::json!({ "sessionId": id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["html"], "<!DOCTYPE html><html><body>saved $800</body></html>");

    let sessions = h.service.list_sessions();
    assert_eq!(sessions[0].state.to_string(), "done");
}

#[tokio::test]
async fn test_end_is_idempotent_and_removes_directory() {
    let h = harness(FakeAssistant::default());
    let id = start(&h).await;
    let dir = h.assistant.calls()[0].working_dir.clone();
    assert!(dir.is_dir());

    for _ in 0..2 {
        let (status, json) = send(
            GatewayServer::build(h.service.clone()),
            post_json("/api/end", serde_json::json!({ "sessionId": id })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ok"], true);
    }
    assert!(!dir.exists());
    assert!(h.service.sessions().is_empty());

    // Garbage ids are accepted too.
    let (status, _) = send(
        GatewayServer::build(h.service.clone()),
        post_json("/api/end", serde_json::json!({ "sessionId": "garbage" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_end_accepts_any_body() {
    let h = harness(FakeAssistant::default());
    let id = start(&h).await;
    let dir = h.assistant.calls()[0].working_dir.clone();

    let bodies = [
        Request::post("/api/end").body(Body::empty()).unwrap(),
        Request::post("/api/end")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap(),
        Request::post("/api/end")
            .header("content-type", "text/plain")
            .body(Body::from("bye"))
            .unwrap(),
    ];
    for req in bodies {
        let (status, json) = send(GatewayServer::build(h.service.clone()), req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ok"], true);
    }
    assert_eq!(h.service.sessions().len(), 1);

    // A JSON body sent as text/plain (as `navigator.sendBeacon` does) still ends the session.
    let req = Request::post("/api/end")
        .header("content-type", "text/plain;charset=UTF-8")
        .body(Body::from(serde_json::json!({ "sessionId": id }).to_string()))
        .unwrap();
    let (status, json) = send(GatewayServer::build(h.service.clone()), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
    assert!(h.service.sessions().is_empty());
    assert!(!dir.exists());
}

#[tokio::test]
async fn test_assistant_failures_map_to_statuses() {
    let cases = [
        (AssistantError::RateLimited, StatusCode::TOO_MANY_REQUESTS),
        (AssistantError::NotFound("claude".into()), StatusCode::INTERNAL_SERVER_ERROR),
        (AssistantError::Timeout(Duration::from_secs(1)), StatusCode::GATEWAY_TIMEOUT),
        (
            AssistantError::NonZeroExit {
                code: 1,
                stderr: "boom".into(),
            },
            StatusCode::BAD_GATEWAY,
        ),
    ];
    for (err, expected) in cases {
        let h = harness(FakeAssistant::default());
        let id = start(&h).await;
        let kind = err.kind();
        h.assistant.fail_with(err);
        let (status, json) = send(
            GatewayServer::build(h.service.clone()),
            post_json("/api/chat", serde_json::json!({ "sessionId": id, "message": "hi" })),
        )
        .await;
        assert_eq!(status, expected, "{kind}");
        assert_eq!(json["kind"], kind);
        // The session survives a failed chat turn.
        assert_eq!(h.service.sessions().len(), 1);
    }
}

/// Live server over a real socket, the way a browser would use it.
async fn spawn_server(service: Arc<AuditService>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = GatewayServer::build(service);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_live_server_full_flow() {
    let h = harness(FakeAssistant::default());
    let base = spawn_server(h.service.clone()).await;
    let client = reqwest::Client::new();

    let part = reqwest::multipart::Part::bytes(b"date,desc,amount\n2024-03-01,NETFLIX,15.99".to_vec())
        .file_name("march.csv");
    let form = reqwest::multipart::Form::new().part("csv", part);
    let started: serde_json::Value = client
        .post(format!("{base}/api/start"))
        .multipart(form)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = started["sessionId"].as_str().unwrap().to_string();
    assert_eq!(started["subscriptions"].as_array().unwrap().len(), 3);

    let resp = client
        .post(format!("{base}/api/chat"))
        .json(&serde_json::json!({ "sessionId": id, "message": "Keep Spotify" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .post(format!("{base}/api/report"))
        .json(&serde_json::json!({ "sessionId": id }))
        .send()
        .await
        .unwrap();
    let report: serde_json::Value = resp.json().await.unwrap();
    assert!(report["html"].as_str().unwrap().starts_with("<!DOCTYPE html>"));

    let resp = client
        .post(format!("{base}/api/end"))
        .json(&serde_json::json!({ "sessionId": id }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .post(format!("{base}/api/chat"))
        .json(&serde_json::json!({ "sessionId": id, "message": "hello?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_concurrent_chats_on_one_session_never_overlap() {
    let h = harness(FakeAssistant::with_delay(Duration::from_millis(20)));
    let id = start(&h).await;
    let base = spawn_server(h.service.clone()).await;
    let client = reqwest::Client::new();

    let mut handles = Vec::new();
    for i in 0..5 {
        let client = client.clone();
        let url = format!("{base}/api/chat");
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            client
                .post(url)
                .json(&serde_json::json!({ "sessionId": id, "message": format!("msg {i}") }))
                .send()
                .await
                .unwrap()
                .status()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), 200);
    }

    assert_eq!(h.assistant.calls().len(), 6);
    assert_eq!(h.assistant.max_active.load(Ordering::SeqCst), 1);
}
