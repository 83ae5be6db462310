use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use fileqa::llm_interaction::{ChatBackend, ChatRequest, GroqClient, GroqError, GroqSettings};
use fileqa::web_server::{app, ServerConfig};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Answers every question with a fixed reply and remembers what it was asked.
#[derive(Default)]
struct EchoBackend {
    requests: Mutex<Vec<ChatRequest>>,
}

impl EchoBackend {
    fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatBackend for EchoBackend {
    async fn complete(&self, request: &ChatRequest) -> Result<String, GroqError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(format!("answer #{}", self.count()))
    }
}

fn config() -> ServerConfig {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    ServerConfig {
        templates_dir: root.join("templates"),
        static_dir: root.join("static"),
        ..ServerConfig::default()
    }
}

fn server_with(backend: Option<Arc<dyn ChatBackend>>) -> TestServer {
    TestServer::new(app(&config(), backend)).unwrap()
}

fn csv_part() -> Part {
    Part::bytes(b"name,score\nAda,91\nGrace,87\n".to_vec())
        .file_name("scores.csv")
        .mime_type("text/csv")
}

async fn new_page_session(server: &TestServer) -> String {
    let response = server.get("/").await;
    response.assert_status(StatusCode::SEE_OTHER);
    let location = response.header("location");
    location.to_str().unwrap().to_string()
}

async fn new_api_session(server: &TestServer) -> String {
    let response = server.post("/api/sessions").await;
    response.assert_status(StatusCode::CREATED);
    response.json::<Value>()["id"].as_str().unwrap().to_string()
}

#[test_log::test(tokio::test)]
async fn test_root_redirects_to_new_session_page() {
    let server = server_with(None);
    let page = new_page_session(&server).await;
    assert!(page.starts_with("/s/"));

    let response = server.get(&page).await;
    response.assert_status_ok();
    let html = response.text();
    assert!(html.contains("File-Based Q&amp;A Assistant") || html.contains("File-Based Q&A Assistant"));
    assert!(html.contains("Upload your file"));
    assert!(html.contains("No API key found"));
    assert!(html.contains("mixtral-8x7b-32768"));
}

#[tokio::test]
async fn test_unknown_page_session_starts_over() {
    let server = server_with(None);
    let response = server
        .get("/s/00000000-0000-0000-0000-000000000000")
        .await;
    response.assert_status(StatusCode::SEE_OTHER);
    assert_eq!(response.header("location").to_str().unwrap(), "/");
}

#[tokio::test]
async fn test_upload_and_ask_through_forms() {
    let backend = Arc::new(EchoBackend::default());
    let server = server_with(Some(backend.clone()));
    let page = new_page_session(&server).await;

    let response = server
        .post(&format!("{page}/upload"))
        .multipart(MultipartForm::new().add_part("file", csv_part()))
        .await;
    response.assert_status(StatusCode::SEE_OTHER);

    let html = server.get(&page).await.text();
    assert!(html.contains("API key loaded from the server environment"));
    assert!(html.contains("scores.csv"));
    assert!(html.contains("<td>Grace</td>"));
    assert!(html.contains("Total rows: 2"));

    let response = server
        .post(&format!("{page}/ask"))
        .form(&[("question", "Who scored highest?"), ("model", "gemma2-9b-it")])
        .await;
    response.assert_status(StatusCode::SEE_OTHER);

    let html = server.get(&page).await.text();
    assert!(html.contains("Who scored highest?"));
    assert!(html.contains("answer #1"));

    let requests = backend.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].model.as_str(), "gemma2-9b-it");
    assert!(requests[0].messages[1].content.contains("Grace"));
}

#[tokio::test]
async fn test_unsupported_upload_never_calls_api() {
    let backend = Arc::new(EchoBackend::default());
    let server = server_with(Some(backend.clone()));
    let page = new_page_session(&server).await;

    server
        .post(&format!("{page}/upload"))
        .multipart(MultipartForm::new().add_part(
            "file",
            Part::bytes(b"%PDF-1.7".to_vec())
                .file_name("report.pdf")
                .mime_type("application/pdf"),
        ))
        .await
        .assert_status(StatusCode::SEE_OTHER);

    server
        .post(&format!("{page}/ask"))
        .form(&[("question", "What does the report say?")])
        .await
        .assert_status(StatusCode::SEE_OTHER);

    let html = server.get(&page).await.text();
    assert!(html.contains("upload a TXT or CSV file before asking questions"));
    assert_eq!(backend.count(), 0);
}

#[tokio::test]
async fn test_error_is_shown_once() {
    let server = server_with(Some(Arc::new(EchoBackend::default())));
    let page = new_page_session(&server).await;

    server
        .post(&format!("{page}/upload"))
        .multipart(MultipartForm::new().add_part(
            "file",
            Part::bytes(b"\x89PNG".to_vec()).file_name("image.png"),
        ))
        .await
        .assert_status(StatusCode::SEE_OTHER);

    let first = server.get(&page).await.text();
    assert!(first.contains("unsupported file type"));
    let second = server.get(&page).await.text();
    assert!(!second.contains("unsupported file type"));
}

#[tokio::test]
async fn test_model_key_and_clear_forms() {
    let server = server_with(None);
    let page = new_page_session(&server).await;
    let id = page.trim_start_matches("/s/").to_string();

    server
        .post(&format!("{page}/model"))
        .form(&[("model", "llama3-70b-8192")])
        .await
        .assert_status(StatusCode::SEE_OTHER);
    server
        .post(&format!("{page}/api-key"))
        .form(&[("api_key", "gsk_from_the_sidebar")])
        .await
        .assert_status(StatusCode::SEE_OTHER);

    let view = server.get(&format!("/api/sessions/{id}")).await.json::<Value>();
    assert_eq!(view["model"], "llama3-70b-8192");
    assert_eq!(view["key_source"], "session");

    server
        .post(&format!("{page}/model"))
        .form(&[("model", "not-a-model")])
        .await
        .assert_status(StatusCode::SEE_OTHER);
    let view = server.get(&format!("/api/sessions/{id}")).await.json::<Value>();
    assert_eq!(view["model"], "llama3-70b-8192");
    assert!(view["error"].as_str().unwrap().contains("unknown model"));

    server
        .post(&format!("{page}/clear"))
        .await
        .assert_status(StatusCode::SEE_OTHER);
    let view = server.get(&format!("/api/sessions/{id}")).await.json::<Value>();
    assert_eq!(view["history"], json!([]));
    assert!(view["error"].is_null());
}

#[tokio::test]
async fn test_json_api_flow() {
    let backend = Arc::new(EchoBackend::default());
    let server = server_with(Some(backend.clone()));
    let id = new_api_session(&server).await;

    let response = server
        .post(&format!("/api/sessions/{id}/questions"))
        .json(&json!({ "question": "Anything?" }))
        .await;
    response.assert_status(StatusCode::CONFLICT);

    let response = server
        .post(&format!("/api/sessions/{id}/document"))
        .multipart(MultipartForm::new().add_part("file", csv_part()))
        .await;
    response.assert_status_ok();
    let info = response.json::<Value>();
    assert_eq!(info["name"], "scores.csv");
    assert_eq!(info["kind"], "csv");
    assert_eq!(info["preview"]["kind"], "table");
    assert_eq!(info["preview"]["total_rows"], 2);

    for (i, question) in ["Who is first?", "Who is second?"].iter().enumerate() {
        let response = server
            .post(&format!("/api/sessions/{id}/questions"))
            .json(&json!({ "question": question }))
            .await;
        response.assert_status_ok();
        let turn = response.json::<Value>();
        assert_eq!(turn["question"], *question);
        assert_eq!(turn["answer"], format!("answer #{}", i + 1));
        assert_eq!(turn["model"], "llama3-8b-8192");
    }

    let view = server.get(&format!("/api/sessions/{id}")).await.json::<Value>();
    let history = view["history"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["question"], "Who is first?");
    assert_eq!(history[1]["question"], "Who is second?");
}

#[tokio::test]
async fn test_json_api_errors() {
    let server = server_with(Some(Arc::new(EchoBackend::default())));
    let id = new_api_session(&server).await;

    server
        .post(&format!("/api/sessions/{id}/document"))
        .multipart(MultipartForm::new().add_part(
            "file",
            Part::bytes(b"<xml/>".to_vec()).file_name("data.xml"),
        ))
        .await
        .assert_status(StatusCode::UNSUPPORTED_MEDIA_TYPE);

    server
        .post(&format!("/api/sessions/{id}/document"))
        .multipart(MultipartForm::new().add_part("file", Part::bytes(Vec::new()).file_name("empty.txt")))
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    server
        .post(&format!("/api/sessions/{id}/document"))
        .multipart(MultipartForm::new().add_text("note", "no file here"))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    server
        .post(&format!("/api/sessions/{id}/document"))
        .multipart(MultipartForm::new().add_part(
            "file",
            Part::bytes(b"hello".to_vec()).file_name("hello.txt"),
        ))
        .await
        .assert_status_ok();

    server
        .post(&format!("/api/sessions/{id}/questions"))
        .json(&json!({ "question": "   " }))
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    let response = server
        .post(&format!("/api/sessions/{id}/questions"))
        .json(&json!({ "question": "hi", "model": "gpt-4o" }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(response.json::<Value>()["error"]
        .as_str()
        .unwrap()
        .contains("unknown model 'gpt-4o'"));

    server
        .get("/api/sessions/00000000-0000-0000-0000-000000000000")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_oversized_upload_is_payload_too_large() {
    let server = TestServer::new(app(
        &ServerConfig {
            max_upload_bytes: 1024,
            ..config()
        },
        Some(Arc::new(EchoBackend::default())),
    ))
    .unwrap();
    let id = new_api_session(&server).await;

    server
        .post(&format!("/api/sessions/{id}/document"))
        .multipart(MultipartForm::new().add_part(
            "file",
            Part::bytes(vec![b'a'; 4096]).file_name("big.txt"),
        ))
        .await
        .assert_status(StatusCode::PAYLOAD_TOO_LARGE);

    let view = server.get(&format!("/api/sessions/{id}")).await.json::<Value>();
    assert!(view["document"].is_null());
}

#[tokio::test]
async fn test_missing_key_is_unauthorized() {
    let server = server_with(None);
    let id = new_api_session(&server).await;

    server
        .post(&format!("/api/sessions/{id}/document"))
        .multipart(MultipartForm::new().add_part(
            "file",
            Part::bytes(b"hello".to_vec()).file_name("hello.txt"),
        ))
        .await
        .assert_status_ok();

    let response = server
        .post(&format!("/api/sessions/{id}/questions"))
        .json(&json!({ "question": "What does it say?" }))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    assert!(response.json::<Value>()["error"]
        .as_str()
        .unwrap()
        .contains("GROQ_API_KEY"));
}

#[tokio::test]
async fn test_models_and_static_assets() {
    let server = server_with(None);

    let models = server.get("/api/models").await.json::<Value>();
    let ids: Vec<_> = models
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids.len(), 6);
    assert_eq!(ids[0], "llama3-8b-8192");
    assert!(ids.contains(&"gemma2-9b-it".to_string()));

    server.get("/static/style.css").await.assert_status_ok();
    server
        .get("/static/missing.js")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[test_log::test(tokio::test)]
async fn test_end_to_end_against_mock_groq() {
    let groq = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "Ada scored 91." } }]
        })))
        .up_to_n_times(1)
        .mount(&groq)
        .await;
    Mock::given(method("POST"))
        .and(path("/openai/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("over capacity"))
        .mount(&groq)
        .await;

    let settings = GroqSettings {
        base_url: groq.uri(),
        timeout: Duration::from_secs(5),
    };
    let client = GroqClient::new("gsk_test", &settings).unwrap();
    let server = TestServer::new(app(
        &ServerConfig {
            groq: settings,
            ..config()
        },
        Some(Arc::new(client)),
    ))
    .unwrap();
    let id = new_api_session(&server).await;

    server
        .post(&format!("/api/sessions/{id}/document"))
        .multipart(MultipartForm::new().add_part("file", csv_part()))
        .await
        .assert_status_ok();

    let turn = server
        .post(&format!("/api/sessions/{id}/questions"))
        .json(&json!({ "question": "What did Ada score?" }))
        .await
        .json::<Value>();
    assert_eq!(turn["answer"], "Ada scored 91.");

    let response = server
        .post(&format!("/api/sessions/{id}/questions"))
        .json(&json!({ "question": "And Grace?" }))
        .await;
    response.assert_status(StatusCode::BAD_GATEWAY);
    assert!(response.json::<Value>()["error"]
        .as_str()
        .unwrap()
        .contains("over capacity"));

    let view = server.get(&format!("/api/sessions/{id}")).await.json::<Value>();
    assert_eq!(view["history"].as_array().unwrap().len(), 1);
    assert_eq!(view["draft"], "And Grace?");

    let received = groq.received_requests().await.unwrap();
    assert_eq!(received.len(), 2);
    let body: Value = received[0].body_json().unwrap();
    let prompt = body["messages"][1]["content"].as_str().unwrap();
    assert!(prompt.contains("Grace"));
    assert!(prompt.contains("QUESTION: What did Ada score?"));
}
