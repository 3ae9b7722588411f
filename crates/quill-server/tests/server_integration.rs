//! Server integration tests.
//!
//! These run the real agent pipeline over mock chat and model backends.

mod common;

use anyhow::Result;
use quill_chat::TransportCall;
use serde_json::json;

#[tokio::test]
async fn test_server_starts_and_responds_to_health() -> Result<()> {
    let server = common::TestServer::start().await?;

    assert!(server.health().await?, "Server should be healthy");

    let body: serde_json::Value = server.get("/").send().await?.json().await?;
    assert_eq!(body["apikey"], common::API_KEY);
    assert_eq!(body["activeAgents"], 0);

    Ok(())
}

#[tokio::test]
async fn test_agent_lifecycle() -> Result<()> {
    let server = common::TestServer::start().await?;

    let resp = server
        .post("/start-ai-agent")
        .json(&json!({"channel_id": "!general", "channel_type": "messaging"}))
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(server.backend.live_assistants(), 1);
    assert_eq!(server.backend.live_threads(), 1);

    let status: serde_json::Value = server
        .get("/agent-status?channel_id=!general")
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(status["status"], "connected");

    // Starting again reuses the agent.
    server
        .post("/start-ai-agent")
        .json(&json!({"channel_id": "!general"}))
        .send()
        .await?;
    assert_eq!(server.backend.assistants().len(), 1);

    let resp = server
        .post("/stop-ai-agent")
        .json(&json!({"channel_id": "!general"}))
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(server.backend.live_assistants(), 0);
    assert_eq!(server.backend.live_threads(), 0);

    let status: serde_json::Value = server
        .get("/agent-status?channel_id=!general")
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(status["status"], "disconnected");

    Ok(())
}

#[tokio::test]
async fn test_new_message_streams_reply() -> Result<()> {
    let server = common::TestServer::start().await?;

    server
        .post("/start-ai-agent")
        .json(&json!({"channel_id": "general"}))
        .send()
        .await?;

    let resp = server
        .webhook(&json!({
            "type": "message.new",
            "cid": "messaging:general",
            "message": {"id": "m1", "text": "Write me a haiku", "user": {"id": "alice"}}
        }))
        .await?;
    assert_eq!(resp.status().as_u16(), 200);

    let transport = server.transport.clone();
    let finished = common::eventually(|| {
        transport.sent_message_ids().first().is_some_and(|id| {
            transport
                .patches_for(id)
                .iter()
                .any(|p| p.generating == Some(false) && p.text.as_deref() == Some("Test response"))
        })
    })
    .await;
    assert!(finished, "reply was not finalized");

    assert_eq!(
        server.backend.user_messages().first().map(|(_, text)| text.as_str()),
        Some("Write me a haiku")
    );
    assert!(transport.calls().iter().any(|call| matches!(
        call,
        TransportCall::SendMessage { message, .. } if message.ai_generated
    )));

    Ok(())
}

#[tokio::test]
async fn test_webhook_requires_signature() -> Result<()> {
    let server = common::TestServer::start().await?;

    let resp = server
        .post("/webhook")
        .header("content-type", "application/json")
        .body(r#"{"type":"message.new"}"#)
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 401);

    Ok(())
}

#[tokio::test]
async fn test_shutdown_disposes_agents() -> Result<()> {
    let server = common::TestServer::start().await?;

    server
        .post("/start-ai-agent")
        .json(&json!({"channel_id": "general"}))
        .send()
        .await?;
    assert_eq!(server.backend.live_assistants(), 1);

    let backend = server.backend.clone();
    let registry = server.registry.clone();
    server.shutdown().await?;

    assert!(registry.is_empty());
    assert_eq!(backend.live_assistants(), 0);
    assert_eq!(backend.live_threads(), 0);

    Ok(())
}
