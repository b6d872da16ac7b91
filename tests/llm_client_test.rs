//! Integration tests for the LLM pipe client and the scoring providers
//!
//! These tests use wiremock to stand in for the pipe API.

use serde_json::json;
use std::sync::Arc;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use trendwatch::config::LlmConfig;
use trendwatch::error::LlmError;
use trendwatch::llm::{CreatePipeRequest, LlmClient, Message, PipeRequest};
use trendwatch::scoring::{
    ChecklistScoringProvider, RubricScoringProvider, ScoringProvider, CHECKLIST_PROVIDER,
    RUBRIC_PROVIDER,
};
use trendwatch::storage::Subject;

fn create_test_config(base_url: &str) -> LlmConfig {
    LlmConfig {
        api_key: "test_api_key".to_string(),
        base_url: base_url.to_string(),
        timeout_ms: 5000,
        max_retries: 2,
        retry_delay_ms: 10,
        model: "openai:gpt-4o-mini".to_string(),
        rubric_pipe: "rubric-pipe".to_string(),
        checklist_pipe: "checklist-pipe".to_string(),
    }
}

fn completion(text: &str) -> serde_json::Value {
    json!({
        "success": true,
        "completion": text,
        "raw": {
            "model": "gpt-4o-mini",
            "usage": {"prompt_tokens": 120, "completion_tokens": 80, "total_tokens": 200}
        }
    })
}

fn subject() -> Subject {
    Subject::new("s1", "Daily Bulletin")
}

#[cfg(test)]
mod pipe_call_tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_pipe_call() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .and(header("Authorization", "Bearer test_api_key"))
            .and(body_partial_json(json!({"name": "rubric-pipe", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("{\"ok\": true}")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = LlmClient::new(&create_test_config(&mock_server.uri())).unwrap();
        let request = PipeRequest::new("rubric-pipe", vec![Message::user("score this")]);

        let response = client.call_pipe(request).await.unwrap();

        assert!(response.success);
        assert_eq!(response.completion, "{\"ok\": true}");
        assert_eq!(response.model(), Some("gpt-4o-mini"));
        assert_eq!(response.usage().unwrap().total_tokens, 200);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("done")))
            .mount(&mock_server)
            .await;

        let client = LlmClient::new(&create_test_config(&mock_server.uri())).unwrap();
        let response = client
            .call_pipe(PipeRequest::new("rubric-pipe", vec![]))
            .await
            .unwrap();

        assert_eq!(response.completion, "done");
        assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_after_all_retries() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .expect(3)
            .mount(&mock_server)
            .await;

        let client = LlmClient::new(&create_test_config(&mock_server.uri())).unwrap();
        let result = client.call_pipe(PipeRequest::new("rubric-pipe", vec![])).await;

        match result {
            Err(LlmError::Unavailable { message, retries }) => {
                assert_eq!(retries, 3);
                assert!(message.contains("overloaded"));
            }
            other => panic!("expected unavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_success_false_is_retried_as_invalid() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"success": false, "completion": ""})),
            )
            .expect(3)
            .mount(&mock_server)
            .await;

        let client = LlmClient::new(&create_test_config(&mock_server.uri())).unwrap();
        let result = client.call_pipe(PipeRequest::new("rubric-pipe", vec![])).await;

        assert!(matches!(result, Err(LlmError::Unavailable { .. })));
    }
}

#[cfg(test)]
mod ensure_pipe_tests {
    use super::*;

    #[tokio::test]
    async fn test_creates_pipe() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes"))
            .and(body_partial_json(json!({"name": "rubric-pipe", "upsert": true, "json": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"name": "rubric-pipe", "url": "https://pipes/rubric-pipe"})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = LlmClient::new(&create_test_config(&mock_server.uri())).unwrap();
        let request = CreatePipeRequest::scoring("rubric-pipe", "Rubric scoring", "openai:gpt-4o-mini", "prompt");

        assert!(client.ensure_pipe(request).await.is_ok());
    }

    #[tokio::test]
    async fn test_conflict_means_pipe_exists() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes"))
            .respond_with(ResponseTemplate::new(409).set_body_string("exists"))
            .mount(&mock_server)
            .await;

        let client = LlmClient::new(&create_test_config(&mock_server.uri())).unwrap();
        let request = CreatePipeRequest::scoring("rubric-pipe", "Rubric scoring", "m", "prompt");

        assert!(client.ensure_pipe(request).await.is_ok());
    }

    #[tokio::test]
    async fn test_other_errors_surface() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&mock_server)
            .await;

        let client = LlmClient::new(&create_test_config(&mock_server.uri())).unwrap();
        let request = CreatePipeRequest::scoring("rubric-pipe", "Rubric scoring", "m", "prompt");

        match client.ensure_pipe(request).await {
            Err(LlmError::Api { status, .. }) => assert_eq!(status, 401),
            other => panic!("expected API error, got {:?}", other),
        }
    }
}

#[cfg(test)]
mod provider_tests {
    use super::*;

    async fn client_for(server: &MockServer) -> Arc<LlmClient> {
        Arc::new(LlmClient::new(&create_test_config(&server.uri())).unwrap())
    }

    #[tokio::test]
    async fn test_rubric_provider_parses_fenced_completion() {
        let mock_server = MockServer::start().await;
        let text = r#"Here you go:
```json
{"overall_score": 77, "summary": "Solid",
 "dimensions": {
   "accuracy": {"score": 80, "reason": "sources cited"},
   "objectivity": {"score": 70, "reason": "some framing"},
   "reliability": {"score": 75},
   "expertise": {"score": "85"}
 }}
```"#;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .and(body_partial_json(json!({"name": "rubric-pipe", "variables": {"period": "monthly"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(text)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = RubricScoringProvider::new(client_for(&mock_server).await, "rubric-pipe");
        let result = provider.analyze(&subject(), "monthly").await;

        assert!(result.success);
        assert_eq!(result.provider, RUBRIC_PROVIDER);
        assert_eq!(result.subject_id, "s1");
        assert_eq!(result.overall_score, Some(77));
        assert_eq!(result.dimension_scores.complete(), Some([80, 70, 75, 85]));
        assert_eq!(result.summary.as_deref(), Some("Solid"));
    }

    #[tokio::test]
    async fn test_checklist_provider_derives_overall() {
        let mock_server = MockServer::start().await;
        let text = json!({
            "accuracy_score": 90, "accuracy_reason": "checked",
            "objectivity_score": 60,
            "reliability_score": 70,
            "expertise_score": 81
        })
        .to_string();

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .and(body_partial_json(json!({"name": "checklist-pipe"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(&text)))
            .mount(&mock_server)
            .await;

        let provider = ChecklistScoringProvider::new(client_for(&mock_server).await, "checklist-pipe");
        let result = provider.analyze(&subject(), "monthly").await;

        assert!(result.success);
        assert_eq!(result.provider, CHECKLIST_PROVIDER);
        // (90 + 60 + 70 + 81) / 4 = 75.25
        assert_eq!(result.overall_score, Some(75));
    }

    #[tokio::test]
    async fn test_incomplete_scores_are_a_failure() {
        let mock_server = MockServer::start().await;
        let text = json!({"accuracy_score": 90, "objectivity_score": 60}).to_string();

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(&text)))
            .mount(&mock_server)
            .await;

        let provider = ChecklistScoringProvider::new(client_for(&mock_server).await, "checklist-pipe");
        let result = provider.analyze(&subject(), "monthly").await;

        assert!(!result.success);
        assert!(result.overall_score.is_none());
        let message = result.error_message.unwrap();
        assert!(message.contains("reliability"));
        assert!(message.contains("expertise"));
    }

    #[tokio::test]
    async fn test_unreachable_pipe_is_a_failure() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/pipes/run"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let provider = RubricScoringProvider::new(client_for(&mock_server).await, "rubric-pipe");
        let result = provider.analyze(&subject(), "monthly").await;

        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("503"));
    }
}
