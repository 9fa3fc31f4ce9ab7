//! Dispatcher Lifecycle Tests
//!
//! Startup probe, catalog, streaming accumulation, the blocking path,
//! batches, queued cancellation, and shutdown.

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use common::{build, ok_reply, server_error, started, until_terminal, MockTransport, Reply};
use relay_core::{
    ChannelObserver, DispatchError, DispatchEvent, RequestConfig, RequestId, Scenario,
};

fn stream_reply(parts: &[&str]) -> Reply {
    Reply::Chunks(parts.iter().map(|p| (*p).to_string()).collect())
}

// =============================================================================
// Startup and Catalog
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_initialize_loads_catalog() {
    let mock = MockTransport::new(&["llama3:latest", "phi3:latest"]);
    let (dispatcher, _mock, _events) = started(mock, 3).await;

    assert!(dispatcher.is_service_available());
    let names: Vec<String> = dispatcher.list_models().into_iter().map(|m| m.name).collect();
    assert_eq!(names, vec!["llama3:latest", "phi3:latest"]);

    let info = dispatcher.model_info("phi3:latest").unwrap();
    assert_eq!(info.family, "test");
    assert_eq!(info.parameter_size, "7B");
    assert_eq!(info.size_bytes, 1_048_576);
    assert!(info.is_available);
    assert!(info.last_modified.is_some());
    assert!(dispatcher.model_info("gemma:latest").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_failed_probe_disables_service() {
    let (dispatcher, mock, _events) = build(MockTransport::new(&["llamaX"]).unreachable(), 3);

    assert_eq!(
        dispatcher.initialize().await,
        Err(DispatchError::ServiceUnavailable)
    );
    assert!(!dispatcher.is_service_available());
    assert_eq!(
        dispatcher.refresh_models().await,
        Err(DispatchError::ServiceUnavailable)
    );

    let response = dispatcher.generate_blocking(RequestConfig::new("Hi")).await;
    assert!(!response.success);
    assert_eq!(response.error_message, "LLM service not available");
    assert!(mock.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_refresh_forgets_statistics() {
    let (dispatcher, _mock, mut events) = started(MockTransport::new(&["llamaX"]), 1).await;
    dispatcher.submit(RequestConfig::new("count me").with_stream(false), None).unwrap();
    until_terminal(&mut events, 1).await;
    assert_eq!(dispatcher.model_info("llamaX").unwrap().success_count, 1);

    assert_eq!(dispatcher.refresh_models().await, Ok(1));
    assert_eq!(dispatcher.model_info("llamaX").unwrap().success_count, 0);
}

// =============================================================================
// Streaming
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_stream_chunks_accumulate() {
    let mock = MockTransport::new(&["llamaX"]).with_handler(|_, _| {
        stream_reply(&[
            "{\"response\":\"Hel\",\"done\":false}\n{\"resp",
            "onse\":\"lo\",\"done\":false}\nnot json at all\n",
            "{\"response\":\"\",\"done\":true,\"prompt_eval_count\":3,\"eval_count\":2}\n",
        ])
    });
    let (dispatcher, _mock, mut events) = started(mock, 1).await;

    let id = dispatcher.submit(RequestConfig::new("greet"), None).unwrap();
    let seen = until_terminal(&mut events, 1).await;

    let chunks: Vec<(&str, bool)> = seen
        .iter()
        .filter_map(|e| match e {
            DispatchEvent::StreamChunk { text, is_final, .. } => Some((text.as_str(), *is_final)),
            _ => None,
        })
        .collect();
    assert_eq!(chunks, vec![("Hel", false), ("lo", false)]);

    match seen.last() {
        Some(DispatchEvent::Completed { request_id, response }) => {
            assert_eq!(request_id, &id);
            assert_eq!(response.content, "Hello");
            assert_eq!(response.total_tokens, 5);
            assert_eq!(response.raw["done"], json!(true));
        }
        other => panic!("expected completion, got {other:?}"),
    }

    // Exactly one completion
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(events.try_recv().is_err());
    assert_eq!(dispatcher.queue_status().successful_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stream_without_done_fails() {
    let mock = MockTransport::new(&["llamaX"])
        .with_handler(|_, _| stream_reply(&["{\"response\":\"partial\",\"done\":false}\n"]));
    let (dispatcher, _mock, mut events) = started(mock, 1).await;

    dispatcher.submit(RequestConfig::new("cut off").with_max_retries(0), None).unwrap();
    let seen = until_terminal(&mut events, 1).await;

    assert!(matches!(
        seen.last(),
        Some(DispatchEvent::Failed { message, .. })
            if message == "stream ended before completion marker"
    ));
}

#[tokio::test(start_paused = true)]
async fn test_stream_error_object_fails() {
    let mock = MockTransport::new(&["llamaX"])
        .with_handler(|_, _| stream_reply(&["{\"error\":\"model requires more memory\"}\n"]));
    let (dispatcher, _mock, mut events) = started(mock, 1).await;

    dispatcher.submit(RequestConfig::new("big").with_max_retries(0), None).unwrap();
    let seen = until_terminal(&mut events, 1).await;

    assert!(matches!(
        &seen[0],
        DispatchEvent::Failed { message, .. } if message == "model requires more memory"
    ));
}

#[tokio::test(start_paused = true)]
async fn test_stream_with_no_text_is_empty() {
    let mock = MockTransport::new(&["llamaX"])
        .with_handler(|_, _| stream_reply(&["{\"response\":\"\",\"done\":true}\n"]));
    let (dispatcher, _mock, mut events) = started(mock, 1).await;

    dispatcher
        .submit(RequestConfig::new("silence").with_max_retries(0), None)
        .unwrap();
    let seen = until_terminal(&mut events, 1).await;

    assert!(matches!(
        &seen[0],
        DispatchEvent::Failed { message, .. } if message == "empty response"
    ));
    assert_eq!(dispatcher.queue_status().successful_requests, 0);
}

// =============================================================================
// Blocking Path and Helpers
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_generate_blocking_returns_first_outcome() {
    let mock = MockTransport::new(&["llamaX"]).with_handler(|_, body| {
        if body["prompt"] == "fail" {
            server_error()
        } else {
            ok_reply("42")
        }
    });
    let (dispatcher, mock, mut events) = started(mock, 1).await;

    let response = dispatcher
        .generate_blocking(
            RequestConfig::new("answer")
                .with_stream(false)
                .with_metadata("trace", json!("t-1")),
        )
        .await;
    assert!(response.success);
    assert_eq!(response.content, "42");
    assert_eq!(response.model, "llamaX");
    assert_eq!(response.total_tokens, 12);
    assert_eq!(response.metadata["trace"], json!("t-1"));

    let failed = dispatcher
        .generate_blocking(RequestConfig::new("fail").with_stream(false))
        .await;
    assert!(!failed.success);
    assert_eq!(failed.error_message, "HTTP 500: boom");
    assert!(failed.content.is_empty());

    // No requeue, no completion or error events
    assert_eq!(mock.calls().len(), 2);
    assert!(events.try_recv().is_err());

    let status = dispatcher.queue_status();
    assert_eq!(status.total_requests, 2);
    assert_eq!(status.successful_requests, 1);
    assert_eq!(status.failed_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn test_helpers_shape_requests() {
    let (dispatcher, mock, _events) = started(MockTransport::new(&["llamaX"]), 1).await;

    assert_eq!(dispatcher.quick_chat("Hi", None, "").await, Ok("ok".to_string()));
    dispatcher
        .answer_technical_question("Why?", "tokio 1.41")
        .await
        .unwrap();
    dispatcher.generate_code("sort a list", "rust").await.unwrap();

    let calls = mock.calls();
    assert!(calls[0].prompt.starts_with("System: You are a helpful AI assistant."));
    assert!(calls[0].prompt.ends_with("User: Hi"));
    assert!(calls[1]
        .prompt
        .ends_with("User: Context: tokio 1.41\n\nQuestion: Why?"));
    assert!(calls[2].prompt.contains("Generate rust code"));
    assert!(calls.iter().all(|c| c.body["stream"] == json!(false)));
}

#[tokio::test(start_paused = true)]
async fn test_helpers_surface_typed_errors() {
    let mock = MockTransport::new(&["llamaX"]).with_handler(|_, _| server_error());
    let (dispatcher, _mock, _events) = started(mock, 1).await;

    assert_eq!(
        dispatcher.generate_code("anything", "cpp").await,
        Err(DispatchError::Status {
            status: 500,
            body: "boom".to_string()
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_blocking_after_shutdown_is_refused() {
    let (dispatcher, mock, _events) = started(MockTransport::new(&["llamaX"]), 1).await;
    dispatcher.shutdown().await;

    let response = dispatcher
        .generate_blocking(RequestConfig::new("late").with_stream(false))
        .await;
    assert!(!response.success);
    assert_eq!(response.error_message, "dispatcher has shut down");
    assert_eq!(
        dispatcher.quick_chat("still there?", None, "").await,
        Err(DispatchError::Shutdown)
    );
    assert!(mock.calls().is_empty());
}

// =============================================================================
// Batches and Cancellation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_cancel_queued_request() {
    let (dispatcher, mock, _events) = build(MockTransport::new(&["llamaX"]), 1);

    let keep = dispatcher.submit(RequestConfig::new("keep"), None).unwrap();
    let drop_me = dispatcher.submit(RequestConfig::new("drop"), None).unwrap();
    assert!(dispatcher.is_queued(&drop_me));

    assert!(dispatcher.cancel_queued(&drop_me));
    assert!(!dispatcher.cancel_queued(&drop_me));
    assert!(!dispatcher.cancel_queued(&RequestId::new("never-submitted")));

    assert!(dispatcher.is_queued(&keep));
    assert_eq!(dispatcher.queue_status().queue_depth, 1);
    assert!(mock.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_ignores_running_and_retrying_requests() {
    let mock = MockTransport::new(&["m1", "m2"])
        .with_latency(Duration::from_millis(500))
        .with_handler(|_, _| server_error());
    let (dispatcher, mock, _events) = started(mock, 1).await;

    let id = dispatcher
        .submit(RequestConfig::new("busy").with_stream(false), None)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(dispatcher.is_in_flight(&id));
    assert!(!dispatcher.cancel_queued(&id));

    // The first attempt fails at 500 ms, then waits 1 s before requeueing
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(!dispatcher.is_in_flight(&id));
    assert!(!dispatcher.is_queued(&id));
    assert!(!dispatcher.cancel_queued(&id));
    assert!(matches!(
        dispatcher.submit(RequestConfig::new("again"), Some(id.clone())),
        Err(DispatchError::DuplicateRequest(_))
    ));

    tokio::time::sleep(Duration::from_secs(1)).await;
    let models: Vec<String> = mock.calls().into_iter().map(|c| c.model).collect();
    assert_eq!(models, vec!["m1", "m2"]);
}

#[tokio::test(start_paused = true)]
async fn test_batch_progress() {
    let (dispatcher, mock, mut events) = build(MockTransport::new(&["llamaX"]), 1);

    let configs = ["one", "two", "three"]
        .into_iter()
        .map(|p| RequestConfig::new(p).with_stream(false))
        .collect();
    let (batch_id, ids) = dispatcher.submit_batch(configs);
    assert_eq!(ids.len(), 3);

    assert!(dispatcher.cancel_queued(&ids[1]));
    assert_eq!(
        common::next_event(&mut events).await,
        DispatchEvent::BatchProgress {
            batch_id: batch_id.clone(),
            completed: 1,
            total: 3,
        }
    );

    dispatcher.initialize().await.unwrap();
    let mut progress = Vec::new();
    while progress.len() < 2 {
        if let DispatchEvent::BatchProgress { completed, total, .. } =
            common::next_event(&mut events).await
        {
            progress.push((completed, total));
        }
    }
    assert_eq!(progress, vec![(2, 3), (3, 3)]);

    let prompts: Vec<String> = mock.calls().into_iter().map(|c| c.prompt).collect();
    assert_eq!(prompts, vec!["one", "three"]);
}

// =============================================================================
// Observers and Shutdown
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_every_observer_is_notified() {
    let (dispatcher, _mock, mut first) = started(MockTransport::new(&["llamaX"]), 1).await;
    let (second_observer, mut second) = ChannelObserver::channel();
    dispatcher.add_observer(Arc::new(second_observer));

    let (detached, detached_rx) = ChannelObserver::channel();
    dispatcher.add_observer(Arc::new(detached));
    drop(detached_rx);

    dispatcher.submit(
        RequestConfig::new("fan out")
            .with_stream(false)
            .with_scenario(Scenario::Summarization),
        None,
    ).unwrap();

    let a = until_terminal(&mut first, 1).await;
    let b = until_terminal(&mut second, 1).await;
    assert_eq!(a, b);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_leaves_queue_intact() {
    let (dispatcher, mock, _events) = started(MockTransport::new(&["llamaX"]), 1).await;
    dispatcher.shutdown().await;

    let id = dispatcher.submit(RequestConfig::new("after shutdown"), None).unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(dispatcher.is_queued(&id));
    assert!(mock.calls().is_empty());

    // The scheduler stays stopped
    dispatcher.start();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(dispatcher.queue_status().queue_depth, 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_in_flight_attempt() {
    let mock = MockTransport::new(&["llamaX"]).with_latency(Duration::from_secs(2));
    let (dispatcher, mock, mut events) = started(mock, 1).await;

    let running = dispatcher
        .submit(RequestConfig::new("finish me").with_stream(false), None)
        .unwrap();
    let waiting = dispatcher
        .submit(RequestConfig::new("stay queued").with_stream(false), None)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(dispatcher.is_in_flight(&running));

    dispatcher.shutdown().await;

    // shutdown() returns once the running attempt has finished
    assert!(!dispatcher.is_in_flight(&running));
    match events.try_recv() {
        Ok(DispatchEvent::Completed {
            request_id,
            response,
        }) => {
            assert_eq!(request_id, running);
            assert_eq!(response.content, "ok");
        }
        other => panic!("expected completion, got {other:?}"),
    }
    assert!(dispatcher.is_queued(&waiting));
    assert_eq!(mock.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_abandons_pending_retry() {
    let mock = MockTransport::new(&["m1", "m2"]).with_handler(|_, _| server_error());
    let (dispatcher, mock, _events) = started(mock, 1).await;

    let id = dispatcher.submit(RequestConfig::new("doomed").with_stream(false), None).unwrap();
    // First attempt fails at once; the retry is waiting out its backoff
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(mock.calls().len(), 1);

    dispatcher.shutdown().await;
    tokio::time::sleep(Duration::from_secs(20)).await;

    assert_eq!(mock.calls().len(), 1);
    assert!(!dispatcher.is_queued(&id));
    assert!(!dispatcher.is_in_flight(&id));
}
