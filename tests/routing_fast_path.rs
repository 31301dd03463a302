use scamwatch_agent::llm::{LlmClient, ModelRouter, Provider};
use scamwatch_agent::orchestrator::routing::{decide, fast_path_classify, RouteDecision, WorkerPool};

// "Fast path": a benign message with no entities takes the fast path and,
// with the classifier unreachable, still returns a conservative verdict
// rather than hanging the ingress response.
#[tokio::test]
async fn benign_message_fast_paths_to_conservative_verdict() {
    let workers = WorkerPool::new(4);
    let (decision, elapsed) = decide("Hi Mom, dinner at 7?", true, "US", &workers).await;
    assert!(matches!(decision, RouteDecision::FastPath));
    assert!(elapsed.as_millis() < 100, "gate should decide in well under 100ms");

    let client = LlmClient::new(
        Provider::OpenRouter,
        "key".into(),
        "default-model".into(),
        100,
        Some("http://localhost:1".into()),
    )
    .unwrap();
    let router = ModelRouter::new(client);

    let response = fast_path_classify(&router, "Hi Mom, dinner at 7?").await;
    assert_eq!(response["type"], "simple");
    assert_eq!(response["result"]["risk_level"], "low");
    assert_eq!(response["result"]["category"], "unknown");
    assert!(response["result"]["ts"].is_string());
}
