//! End to end: a human message goes through triage to the right agent and
//! the reply comes back on the human channel.

use std::sync::Arc;
use std::time::Duration;

use switchboard_channels::{ChannelHub, Filter, Message, Subscription, Supervisor, kinds};
use switchboard_core::{KeywordClassifier, SwitchboardContext};

async fn next_reply(replies: &mut Subscription) -> Message {
    tokio::time::timeout(Duration::from_secs(2), replies.recv())
        .await
        .expect("no reply within 2s")
        .expect("human channel closed")
}

#[tokio::test]
async fn conversations_reach_the_right_agent() {
    let hub = ChannelHub::new();
    let ctx = SwitchboardContext::new(hub.clone(), Arc::new(KeywordClassifier::new()));
    let human = ctx.human().unwrap();
    let mut replies = human
        .subscribe("test", Filter::of_type(kinds::AGENT_MESSAGE))
        .unwrap();

    let mut supervisor = Supervisor::new(hub.clone());
    for agent in ctx.build_agents().unwrap() {
        supervisor.add_agent(agent);
    }

    let tickets = ctx.tickets.clone();
    let conversation = async move {
        // Let the agents subscribe
        tokio::time::sleep(Duration::from_millis(20)).await;

        human
            .publish(Message::user("User: I need help with my policy").with_field("session_id", "a"))
            .unwrap();
        let reply = next_reply(&mut replies).await;
        assert_eq!(reply.payload_str("agent"), Some("PolicyAgent"));
        assert_eq!(reply.payload_str("session_id"), Some("a"));

        human
            .publish(Message::user("User: My claim is still unresolved").with_field("session_id", "b"))
            .unwrap();
        let reply = next_reply(&mut replies).await;
        assert_eq!(reply.payload_str("agent"), Some("TicketingAgent"));
        assert!(reply.payload_str("content").unwrap().contains("TICKET-"));
        assert_eq!(tickets.len(), 1);

        human
            .publish(Message::user("User: Recommend me a movie").with_field("session_id", "c"))
            .unwrap();
        let reply = next_reply(&mut replies).await;
        assert_eq!(reply.payload_str("agent"), Some("TriageAgent"));
        assert_eq!(reply.payload_str("session_id"), Some("c"));
    };

    let report = supervisor.run_until(conversation).await;
    assert!(report.is_clean(), "{:?}", report.errors);
    assert_eq!(report.stopped.len(), 3);
    assert!(hub.is_stopped());
}
