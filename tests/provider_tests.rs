use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use petagent::clients::claude::ClaudeProvider;
use petagent::clients::openai::OpenAiProvider;
use petagent::clients::openai_tts::OpenAiTtsProvider;
use petagent::clients::{register_builtin_llm_providers, register_builtin_tts_providers};
use petagent::provider::{
    ChatMessage, ChatRequest, ChatStreamEvent, LlmProvider, Provider, ProviderCapability,
    ProviderConfig, ProviderError, ProviderInstanceConfig, SynthesisRequest, TtsProvider,
};
use petagent::provider_instances::ProviderInstanceManager;
use petagent::provider_registry::{LlmProviderRegistry, TtsProviderRegistry};
use petagent::tool_protocol::ToolDefinition;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

const KEY: &str = "sk-test";

/// Fake vendor speaking just enough of the OpenAI and Anthropic wire formats.
#[derive(Default)]
struct Vendor {
    bodies: Mutex<Vec<Value>>,
}

fn authorized(headers: &HeaderMap) -> bool {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some("Bearer sk-test");
    let api_key = headers.get("x-api-key").and_then(|v| v.to_str().ok()) == Some(KEY);
    bearer || api_key
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, r#"{"error":"invalid api key"}"#).into_response()
}

const STREAM: &str = concat!(
    "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"feed\",\"arguments\":\"{\\\"food\\\":\"}}]}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"fish\\\"}\"}}]},\"finish_reason\":\"tool_calls\"}]}\n\n",
    "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":4,\"total_tokens\":7}}\n\n",
    "data: [DONE]\n\n",
);

async fn chat_completions(
    State(vendor): State<Arc<Vendor>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    vendor.bodies.lock().unwrap().push(body.clone());
    if body["stream"] == json!(true) {
        return ([(header::CONTENT_TYPE, "text/event-stream")], STREAM).into_response();
    }
    let wants_tool = body["tools"].is_array()
        && body["messages"].as_array().and_then(|m| m.last()).map(|m| m["role"].clone())
            == Some(json!("user"));
    let message = if wants_tool {
        json!({
            "content": null,
            "tool_calls": [{
                "id": "call_7",
                "type": "function",
                "function": {"name": "feed", "arguments": "{\"food\":\"tuna\"}"}
            }]
        })
    } else {
        json!({"content": "Meow."})
    };
    let finish_reason = if wants_tool { "tool_calls" } else { "stop" };
    Json(json!({
        "choices": [{"message": message, "finish_reason": finish_reason}],
        "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
    }))
    .into_response()
}

async fn models(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(json!({"data": [{"id": "gpt-4o-mini"}, {"id": "tts-1"}]})).into_response()
}

async fn messages(
    State(vendor): State<Arc<Vendor>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) || headers.get("anthropic-version").is_none() {
        return unauthorized();
    }
    vendor.bodies.lock().unwrap().push(body);
    Json(json!({
        "content": [
            {"type": "text", "text": "Let me check."},
            {"type": "tool_use", "id": "toolu_1", "name": "feed", "input": {"food": "salmon"}}
        ],
        "stop_reason": "tool_use",
        "usage": {"input_tokens": 20, "output_tokens": 6}
    }))
    .into_response()
}

async fn speech(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let audio = format!("AUDIO:{}:{}", body["voice"].as_str().unwrap_or(""), body["input"]);
    audio.into_bytes().into_response()
}

async fn start_vendor() -> (SocketAddr, Arc<Vendor>) {
    let vendor = Arc::new(Vendor::default());
    let app = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(models))
        .route("/v1/messages", post(messages))
        .route("/v1/audio/speech", post(speech))
        .with_state(Arc::clone(&vendor));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, vendor)
}

fn openai_config(addr: SocketAddr, key: &str) -> ProviderConfig {
    ProviderConfig::new("openai")
        .with_api_key(key)
        .with_base_url(format!("http://{}/v1", addr))
}

fn feed_tool() -> ToolDefinition {
    ToolDefinition::new("feed", "Feed the pet").with_schema(json!({
        "type": "object",
        "properties": {"food": {"type": "string"}},
        "required": ["food"]
    }))
}

#[tokio::test]
async fn test_openai_chat_returns_tool_calls() {
    let (addr, vendor) = start_vendor().await;
    let provider = OpenAiProvider::new(openai_config(addr, KEY));
    provider.initialize().await.unwrap();

    let response = provider
        .chat(ChatRequest::new(vec![ChatMessage::user("I'm hungry")]).with_tools(vec![feed_tool()]))
        .await
        .unwrap();
    assert_eq!(response.content, "");
    assert_eq!(response.tool_calls[0].id, "call_7");
    assert_eq!(response.tool_calls[0].arguments, json!({"food": "tuna"}));
    assert_eq!(response.usage.unwrap().input_tokens, 12);

    let body = vendor.bodies.lock().unwrap()[0].clone();
    assert_eq!(body["model"], "gpt-4o-mini");
    assert_eq!(body["temperature"], json!(0.7));
    assert_eq!(body["tools"][0]["function"]["name"], "feed");
    assert_eq!(body["tools"][0]["function"]["parameters"]["required"], json!(["food"]));
}

#[tokio::test]
async fn test_openai_stream_yields_text_then_done() {
    let (addr, _vendor) = start_vendor().await;
    let provider = OpenAiProvider::new(openai_config(addr, KEY));

    let stream = provider
        .chat_stream(ChatRequest::new(vec![ChatMessage::user("hi")]))
        .await
        .unwrap();
    let events: Vec<_> = stream.collect().await;

    let mut texts = Vec::new();
    let mut done = None;
    for event in events {
        match event.unwrap() {
            ChatStreamEvent::Text(text) => texts.push(text),
            ChatStreamEvent::Done(response) => done = Some(response),
        }
    }
    assert_eq!(texts, vec!["Hel", "lo"]);
    let done = done.unwrap();
    assert_eq!(done.content, "Hello");
    assert_eq!(done.tool_calls[0].name, "feed");
    assert_eq!(done.tool_calls[0].arguments, json!({"food": "fish"}));
    assert_eq!(done.usage.unwrap().total_tokens, 7);
    assert_eq!(done.finish_reason.as_deref(), Some("tool_calls"));
}

#[tokio::test]
async fn test_vendor_errors_surface_status_and_body() {
    let (addr, _vendor) = start_vendor().await;
    let provider = OpenAiProvider::new(openai_config(addr, "wrong"));

    let err = provider
        .chat(ChatRequest::new(vec![ChatMessage::user("hi")]))
        .await
        .unwrap_err();
    match err {
        ProviderError::Http { status, body } => {
            assert_eq!(status, 401);
            assert!(body.contains("invalid api key"));
        }
        other => panic!("unexpected error: {}", other),
    }

    let result = provider.test().await;
    assert!(!result.success);
    assert!(result.error.unwrap().starts_with("HTTP 401"));
}

#[tokio::test]
async fn test_openai_check_reports_a_model() {
    let (addr, _vendor) = start_vendor().await;
    let result = OpenAiProvider::new(openai_config(addr, KEY)).test().await;
    assert!(result.success);
    assert_eq!(result.sample_model.as_deref(), Some("gpt-4o-mini"));
}

#[tokio::test]
async fn test_claude_chat_maps_content_blocks() {
    let (addr, vendor) = start_vendor().await;
    let provider = ClaudeProvider::new(
        ProviderConfig::new("claude")
            .with_api_key(KEY)
            .with_base_url(format!("http://{}", addr)),
    );

    let response = provider
        .chat(
            ChatRequest::new(vec![
                ChatMessage::system("You are a cat."),
                ChatMessage::user("Feed me"),
            ])
            .with_tools(vec![feed_tool()]),
        )
        .await
        .unwrap();
    assert_eq!(response.content, "Let me check.");
    assert_eq!(response.tool_calls[0].arguments, json!({"food": "salmon"}));
    assert_eq!(response.usage.unwrap().total_tokens, 26);

    let body = vendor.bodies.lock().unwrap()[0].clone();
    assert_eq!(body["system"], "You are a cat.");
    assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
    assert_eq!(body["max_tokens"], 1024);
}

#[tokio::test]
async fn test_openai_tts_returns_audio() {
    let (addr, _vendor) = start_vendor().await;
    let provider = OpenAiTtsProvider::new(
        ProviderConfig::new("openai_tts")
            .with_api_key(KEY)
            .with_base_url(format!("http://{}/v1", addr)),
    );

    let speech = provider
        .synthesize(SynthesisRequest::new("purr"))
        .await
        .unwrap();
    assert_eq!(speech.mime_type, "audio/mpeg");
    assert_eq!(speech.audio, b"AUDIO:alloy:\"purr\"".to_vec());
}

fn instance_manager() -> ProviderInstanceManager {
    let mut llm = LlmProviderRegistry::new();
    register_builtin_llm_providers(&mut llm);
    let mut tts = TtsProviderRegistry::new();
    register_builtin_tts_providers(&mut tts);
    ProviderInstanceManager::new(Arc::new(llm), Arc::new(tts))
}

#[tokio::test]
async fn test_primary_instance_talks_to_its_endpoint() {
    let (addr, _vendor) = start_vendor().await;
    let manager = instance_manager();

    let added = manager
        .add_instance(ProviderInstanceConfig::new(
            "Local gateway",
            ProviderCapability::Llm,
            openai_config(addr, KEY),
        ))
        .unwrap();
    assert!(added.primary);

    let llm = manager.primary_llm().await.unwrap();
    let reply = llm
        .chat(ChatRequest::new(vec![ChatMessage::user("hello")]))
        .await
        .unwrap();
    assert_eq!(reply.content, "Meow.");
    assert_eq!(manager.live_instances().await, vec![added.id.clone()]);

    let bad = ProviderInstanceConfig::new(
        "Bad key",
        ProviderCapability::Llm,
        openai_config(addr, "nope"),
    );
    assert!(!manager.test_instance(&bad).await.success);
    assert!(manager.test_instance(&added).await.success);

    manager.shutdown().await;
    assert!(manager.live_instances().await.is_empty());
}
