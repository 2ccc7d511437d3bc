//! Graph runner integration tests: durability, interrupt/resume, time
//! travel, and the observer stream.

use drover_core::{GraphBuilder, GraphRunner, RunEventKind, RunStatus, EVENT_NODE_EXECUTED};
use drover_store::{MemoryStore, Store};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_stream::StreamExt;
use tooling::CancelToken;

fn greet_classify_respond(interrupt_classify: bool) -> GraphBuilder {
    let builder = GraphBuilder::new().with_id("support").add_node("greet", |_ctx, mut state| async move {
        let user = state["user"].as_str().unwrap_or("there").to_string();
        state["greeting"] = json!(format!("Hello, {}!", user));
        Ok(state)
    });

    let classify = |_ctx, mut state: Value| async move {
        state["intent"] = json!("general_question");
        Ok(state)
    };
    let builder = if interrupt_classify {
        builder.add_interrupt_node("classify", classify)
    } else {
        builder.add_node("classify", classify)
    };

    builder
        .add_node("respond", |_ctx, mut state| async move {
            let intent = state["intent"].as_str().unwrap_or("unknown").to_string();
            state["response"] = json!(format!(
                "I classified your intent as \"{}\". How can I help?",
                intent
            ));
            Ok(state)
        })
        .set_entry_point("greet")
        .add_edge("greet", "classify")
        .add_edge("classify", "respond")
        .set_finish_point("respond")
}

#[tokio::test]
async fn test_sequential_graph_with_checkpoints() {
    let store = Arc::new(MemoryStore::new());
    let graph = Arc::new(greet_classify_respond(false).compile().unwrap());
    let runner = GraphRunner::new(graph, store.clone());
    let cancel = CancelToken::new();

    let run = runner
        .run(&cancel, "s1", json!({"user": "World"}))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.seq_num, 3);
    assert_eq!(run.state["user"], json!("World"));
    assert_eq!(run.state["greeting"], json!("Hello, World!"));
    assert_eq!(run.state["intent"], json!("general_question"));
    assert_eq!(
        run.state["response"],
        json!("I classified your intent as \"general_question\". How can I help?")
    );

    let checkpoints = store.list_checkpoints("s1").await.unwrap();
    assert_eq!(checkpoints.len(), 3);
    let seqs: Vec<i64> = checkpoints.iter().map(|c| c.seq_num).collect();
    assert_eq!(seqs, vec![1, 2, 3]);

    let events = store.list_events("s1", 0).await.unwrap();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.event_type == EVENT_NODE_EXECUTED));
    let event_seqs: Vec<i64> = events.iter().map(|e| e.seq_num).collect();
    assert_eq!(event_seqs, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_interrupt_pauses_and_resume_completes() {
    let store = Arc::new(MemoryStore::new());
    let graph = Arc::new(greet_classify_respond(true).compile().unwrap());
    let runner = GraphRunner::new(graph, store.clone());
    let cancel = CancelToken::new();

    let paused = runner
        .run(&cancel, "s1", json!({"user": "World"}))
        .await
        .unwrap();

    assert_eq!(paused.status, RunStatus::Paused);
    assert_eq!(paused.current_node, "classify");

    // Exactly one checkpoint at seq 1, re-keyed to the paused node.
    let checkpoints = store.list_checkpoints("s1").await.unwrap();
    assert_eq!(checkpoints.len(), 1);
    assert_eq!(checkpoints[0].seq_num, 1);
    assert_eq!(checkpoints[0].node_id, "classify");

    let resumed = runner.resume(&cancel, "s1").await.unwrap();
    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(resumed.run_id, paused.run_id);

    let latest = store.latest_checkpoint("s1").await.unwrap().unwrap();
    assert_eq!(latest.seq_num, 3);
}

#[tokio::test]
async fn test_resume_matches_uninterrupted_run() {
    // Property: run-pause-resume yields the same final state as a straight
    // run with deterministic handlers.
    let cancel = CancelToken::new();

    let plain_store = Arc::new(MemoryStore::new());
    let plain = GraphRunner::new(
        Arc::new(greet_classify_respond(false).compile().unwrap()),
        plain_store,
    );
    let straight = plain
        .run(&cancel, "s1", json!({"user": "World"}))
        .await
        .unwrap();

    let store = Arc::new(MemoryStore::new());
    let runner = GraphRunner::new(
        Arc::new(greet_classify_respond(true).compile().unwrap()),
        store,
    );
    runner
        .run(&cancel, "s1", json!({"user": "World"}))
        .await
        .unwrap();
    let resumed = runner.resume(&cancel, "s1").await.unwrap();

    assert_eq!(resumed.state, straight.state);
    assert_eq!(resumed.seq_num, straight.seq_num);
}

#[tokio::test]
async fn test_time_travel_branches_to_new_run() {
    let store = Arc::new(MemoryStore::new());
    let graph = Arc::new(greet_classify_respond(false).compile().unwrap());
    let runner = GraphRunner::new(graph, store.clone());
    let cancel = CancelToken::new();

    let original = runner
        .run(&cancel, "s1", json!({"user": "World"}))
        .await
        .unwrap();

    let first_checkpoint = store.list_checkpoints("s1").await.unwrap()[0].clone();
    assert_eq!(first_checkpoint.seq_num, 1);

    let branched = runner
        .resume_from_checkpoint(&cancel, &first_checkpoint.id)
        .await
        .unwrap();

    assert_eq!(branched.status, RunStatus::Completed);
    assert_ne!(branched.run_id, original.run_id);
    assert_eq!(branched.state["response"], original.state["response"]);

    // The branch re-executed all three nodes, continuing the session ledger
    // with strictly greater seqs.
    let events = store.list_events("s1", 0).await.unwrap();
    let seqs: Vec<i64> = events.iter().map(|e| e.seq_num).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(branched.seq_num, 6);
}

#[tokio::test]
async fn test_resume_without_checkpoint_fails() {
    let store = Arc::new(MemoryStore::new());
    let runner = GraphRunner::new(
        Arc::new(greet_classify_respond(false).compile().unwrap()),
        store,
    );

    let err = runner.resume(&CancelToken::new(), "ghost").await.unwrap_err();
    assert!(matches!(err, drover_core::CoreError::CheckpointNotFound(_)));
}

#[tokio::test]
async fn test_failing_node_checkpoints_and_surfaces() {
    let store = Arc::new(MemoryStore::new());
    let graph = GraphBuilder::new()
        .add_node("ok", |_ctx, mut state: Value| async move {
            state["ok"] = json!(true);
            Ok(state)
        })
        .add_node("boom", |_ctx, _state: Value| async move {
            Err("the widget jammed".into())
        })
        .set_entry_point("ok")
        .add_edge("ok", "boom")
        .set_finish_point("boom")
        .compile()
        .unwrap();
    let runner = GraphRunner::new(Arc::new(graph), store.clone());

    let err = runner
        .run(&CancelToken::new(), "s1", json!({}))
        .await
        .unwrap_err();
    match err {
        drover_core::CoreError::NodeExecution { node, error } => {
            assert_eq!(node, "boom");
            assert!(error.contains("widget"));
        }
        other => panic!("unexpected error: {other}"),
    }

    // Final checkpoint sits at the failing node.
    let latest = store.latest_checkpoint("s1").await.unwrap().unwrap();
    assert_eq!(latest.node_id, "boom");
    assert_eq!(latest.seq_num, 1);

    // Only the successful node reached the ledger.
    let events = store.list_events("s1", 0).await.unwrap();
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn test_unknown_node_fails_run() {
    let store = Arc::new(MemoryStore::new());
    // A conditional router pointing at a node that does not exist.
    let graph = GraphBuilder::new()
        .add_node("a", |_ctx, state: Value| async move { Ok(state) })
        .set_entry_point("a")
        .add_conditional_edge("a", |_state: &Value| "ghost".to_string())
        .compile()
        .unwrap();
    let runner = GraphRunner::new(Arc::new(graph), store);

    let err = runner
        .run(&CancelToken::new(), "s1", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, drover_core::CoreError::NodeNotFound(node) if node == "ghost"));
}

#[tokio::test]
async fn test_cancellation_between_nodes() {
    let store = Arc::new(MemoryStore::new());
    let runner = GraphRunner::new(
        Arc::new(greet_classify_respond(false).compile().unwrap()),
        store,
    );

    let cancel = CancelToken::new();
    cancel.cancel();

    let err = runner.run(&cancel, "s1", json!({})).await.unwrap_err();
    assert!(matches!(err, drover_core::CoreError::Cancelled));
}

#[tokio::test]
async fn test_observer_stream_sees_run_events() {
    let store = Arc::new(MemoryStore::new());
    let runner = GraphRunner::new(
        Arc::new(greet_classify_respond(false).compile().unwrap()),
        store,
    );
    let mut stream = runner.subscribe(64);

    runner
        .run(&CancelToken::new(), "s1", json!({"user": "World"}))
        .await
        .unwrap();
    drop(runner);

    let mut kinds = Vec::new();
    while let Some(event) = stream.next().await {
        kinds.push(event.kind);
    }

    assert_eq!(
        kinds.iter().filter(|k| **k == RunEventKind::NodeStart).count(),
        3
    );
    assert_eq!(
        kinds.iter().filter(|k| **k == RunEventKind::NodeEnd).count(),
        3
    );
    assert_eq!(
        kinds.iter().filter(|k| **k == RunEventKind::Checkpoint).count(),
        3
    );
    assert_eq!(
        kinds.iter().filter(|k| **k == RunEventKind::EdgeTransition).count(),
        2
    );
    assert_eq!(*kinds.last().unwrap(), RunEventKind::Completed);
}

#[tokio::test]
async fn test_conditional_routing_in_run() {
    let store = Arc::new(MemoryStore::new());
    let graph = GraphBuilder::new()
        .add_node("triage", |_ctx, state: Value| async move { Ok(state) })
        .add_node("billing", |_ctx, mut state: Value| async move {
            state["handled_by"] = json!("billing");
            Ok(state)
        })
        .add_node("general", |_ctx, mut state: Value| async move {
            state["handled_by"] = json!("general");
            Ok(state)
        })
        .set_entry_point("triage")
        .add_conditional_edge("triage", |state: &Value| {
            if state["topic"] == json!("invoice") {
                "billing".to_string()
            } else {
                "general".to_string()
            }
        })
        .set_finish_point("billing")
        .set_finish_point("general")
        .compile()
        .unwrap();
    let runner = GraphRunner::new(Arc::new(graph), store);

    let run = runner
        .run(&CancelToken::new(), "s1", json!({"topic": "invoice"}))
        .await
        .unwrap();
    assert_eq!(run.state["handled_by"], json!("billing"));

    let run = runner
        .run(&CancelToken::new(), "s2", json!({"topic": "weather"}))
        .await
        .unwrap();
    assert_eq!(run.state["handled_by"], json!("general"));
}
