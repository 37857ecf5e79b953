//! A WebSocket client sends a chat message and gets the agent's reply back.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use switchboard_channels::{Agent, ChannelHub, Message, handler_fn, kinds};
use switchboard_gateway::GatewayServer;
use tokio_tungstenite::tungstenite::Message as WsMessage;

#[tokio::test]
async fn chat_over_websocket() {
    let hub = ChannelHub::new();
    let human = hub.channel("human").unwrap();
    let agents = hub.channel("agents").unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let server = GatewayServer::new(addr, String::new(), human.clone());
    let sessions = server.state().sessions.clone();

    let mut relay = server.relay_agent(&agents).unwrap();
    relay.run().await.unwrap();

    // Stand-in for the routing agents: answer every user message directly
    let mut echo = Agent::new("EchoAgent");
    let replies = human.clone();
    echo.on(
        &human,
        kinds::USER_MESSAGE,
        handler_fn(move |msg, _ctx| {
            let replies = replies.clone();
            async move {
                let heard = msg.payload_str("chat_messages").unwrap_or("").len();
                let reply = Message::new(kinds::AGENT_MESSAGE, Default::default())
                    .with_field("agent", "EchoAgent")
                    .with_field("content", format!("heard {} chars", heard))
                    .with_field("session_id", msg.payload_str("session_id").unwrap_or("main"));
                replies.publish(reply)?;
                Ok::<(), anyhow::Error>(())
            }
        }),
    )
    .unwrap();
    echo.run().await.unwrap();

    let server_task = tokio::spawn(server.serve(listener));

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .unwrap();
    let request = serde_json::json!({
        "id": "req-1",
        "method": "message.send",
        "params": { "content": "I need help with my policy" },
    });
    ws.send(WsMessage::Text(request.to_string().into())).await.unwrap();

    let mut response: Option<Value> = None;
    let mut reply_event: Option<Value> = None;
    let read = async {
        while response.is_none() || reply_event.is_none() {
            let frame = ws.next().await.unwrap().unwrap();
            let WsMessage::Text(text) = frame else { continue };
            let value: Value = serde_json::from_str(text.as_str()).unwrap();
            if value["id"] == "req-1" {
                response = Some(value);
            } else if value["event"] == "message.received" {
                reply_event = Some(value);
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), read)
        .await
        .expect("timed out waiting for the reply");

    let response = response.unwrap();
    assert_eq!(response["result"]["session_id"], "main");
    let reply_event = reply_event.unwrap();
    assert_eq!(reply_event["data"]["agent"], "EchoAgent");
    assert_eq!(reply_event["data"]["content"], "heard 32 chars");

    let history = sessions.get("main").await.unwrap().chat_history();
    assert_eq!(history, "User: I need help with my policy\nEchoAgent: heard 32 chars");

    echo.stop().await.unwrap();
    relay.stop().await.unwrap();
    hub.stop();
    server_task.abort();
}
