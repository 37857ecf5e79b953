//! Agent lifecycle: subscriptions, forwarder tasks, and handler dispatch

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::bus::{Channel, Filter, Subscription};
use crate::error::{BusError, Result};
use crate::message::Message;

/// Lifecycle state of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Created,
    Running,
    Stopped,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Passed to every handler invocation
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// Name of the agent that owns the subscription
    pub agent: String,
    /// Channel the message arrived on
    pub channel: String,
    /// Cancelled when the agent is stopped
    pub cancel: CancellationToken,
}

impl HandlerContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Async message handler attached to a subscription.
///
/// An `Err` is logged by the runtime and otherwise ignored; it never reaches
/// the publisher or other subscribers.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, msg: Message, ctx: HandlerContext) -> anyhow::Result<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Message, HandlerContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, msg: Message, ctx: HandlerContext) -> anyhow::Result<()> {
        (self.0)(msg, ctx).await
    }
}

/// Wrap an async closure as a [`MessageHandler`]
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Message, HandlerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

struct Registration {
    channel: Channel,
    filter: Filter,
    handler: Arc<dyn MessageHandler>,
}

struct ActiveSubscriptions {
    cancel: CancellationToken,
    forwarders: Vec<JoinHandle<()>>,
    subscriptions: Vec<(Channel, String)>,
}

/// A named unit that receives filtered messages from channels.
///
/// Subscriptions are declared up front and only become live on [`Agent::run`].
/// [`Agent::stop`] removes them; nothing is delivered after it returns.
pub struct Agent {
    name: String,
    state: AgentState,
    registrations: Vec<Registration>,
    active: Option<ActiveSubscriptions>,
    tracker: TaskTracker,
}

impl Agent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: AgentState::Created,
            registrations: Vec::new(),
            active: None,
            tracker: TaskTracker::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn subscription_count(&self) -> usize {
        self.registrations.len()
    }

    /// Declare a subscription. Only allowed before `run()`.
    pub fn subscribe(
        &mut self,
        channel: &Channel,
        filter: Filter,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<&mut Self> {
        self.expect_state(AgentState::Created, "subscribe")?;
        debug!(
            "Agent {} registered handler on '{}' for {:?}",
            self.name,
            channel.name(),
            filter
        );
        self.registrations.push(Registration {
            channel: channel.clone(),
            filter,
            handler,
        });
        Ok(self)
    }

    /// Dispatch-table shorthand: handle every message of `kind` on `channel`
    pub fn on(
        &mut self,
        channel: &Channel,
        kind: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<&mut Self> {
        self.subscribe(channel, Filter::of_type(kind), handler)
    }

    /// Activate every declared subscription
    pub async fn run(&mut self) -> Result<()> {
        self.expect_state(AgentState::Created, "run")?;

        let cancel = CancellationToken::new();
        let mut forwarders = Vec::with_capacity(self.registrations.len());
        let mut subscriptions: Vec<(Channel, String)> =
            Vec::with_capacity(self.registrations.len());

        for reg in &self.registrations {
            let sub = match reg.channel.subscribe(&self.name, reg.filter.clone()) {
                Ok(sub) => sub,
                Err(e) => {
                    // Undo the subscriptions made so far
                    cancel.cancel();
                    for (channel, id) in &subscriptions {
                        channel.unsubscribe(id);
                    }
                    return Err(e);
                }
            };
            subscriptions.push((reg.channel.clone(), sub.id().to_string()));
            forwarders.push(tokio::spawn(forward(
                self.name.clone(),
                sub,
                reg.handler.clone(),
                cancel.clone(),
                self.tracker.clone(),
            )));
        }

        self.active = Some(ActiveSubscriptions {
            cancel,
            forwarders,
            subscriptions,
        });
        self.state = AgentState::Running;
        info!(
            "Agent {} running with {} subscription(s)",
            self.name,
            self.registrations.len()
        );
        Ok(())
    }

    /// Deactivate every subscription.
    ///
    /// In-flight handlers are not aborted; their context token is cancelled
    /// so they can wind down on their own.
    pub async fn stop(&mut self) -> Result<()> {
        self.expect_state(AgentState::Running, "stop")?;

        if let Some(active) = self.active.take() {
            for (channel, id) in &active.subscriptions {
                channel.unsubscribe(id);
            }
            active.cancel.cancel();
            for forwarder in active.forwarders {
                if let Err(e) = forwarder.await {
                    warn!("Agent {} forwarder ended abnormally: {}", self.name, e);
                }
            }
        }

        self.tracker.close();
        self.state = AgentState::Stopped;
        info!(
            "Agent {} stopped ({} handler(s) still in flight)",
            self.name,
            self.tracker.len()
        );
        Ok(())
    }

    /// Wait for in-flight handlers to finish. Only returns once the agent
    /// has been stopped.
    pub async fn drain(&self) {
        self.tracker.wait().await;
    }

    fn expect_state(&self, expected: AgentState, action: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(BusError::InvalidTransition {
                agent: self.name.clone(),
                action,
                state: self.state,
            })
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            for (channel, id) in &active.subscriptions {
                channel.unsubscribe(id);
            }
            active.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("subscriptions", &self.registrations.len())
            .finish()
    }
}

/// Pull messages off one subscription and hand each to the handler on its
/// own task.
async fn forward(
    agent: String,
    mut sub: Subscription,
    handler: Arc<dyn MessageHandler>,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            msg = sub.recv() => {
                let Some(msg) = msg else {
                    debug!("Agent {}: channel '{}' closed", agent, sub.channel());
                    break;
                };
                debug!(
                    "Agent {} received {} message {} on '{}'",
                    agent, msg.kind, msg.id, sub.channel()
                );
                let ctx = HandlerContext {
                    agent: agent.clone(),
                    channel: sub.channel().to_string(),
                    cancel: cancel.child_token(),
                };
                let handler = handler.clone();
                let agent = agent.clone();
                tracker.spawn(async move {
                    let id = msg.id.clone();
                    let kind = msg.kind.clone();
                    if let Err(e) = handler.handle(msg, ctx).await {
                        error!("Agent {} failed handling {} message {}: {:#}", agent, kind, id, e);
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::kinds;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_handler(counter: Arc<AtomicUsize>) -> Arc<dyn MessageHandler> {
        handler_fn(move |_msg, _ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    async fn wait_for(counter: &AtomicUsize, expected: usize) {
        for _ in 0..100 {
            if counter.load(Ordering::SeqCst) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_stop_before_run_is_usage_error() {
        let mut agent = Agent::new("OrderAgent");
        let err = agent.stop().await.unwrap_err();
        assert!(matches!(
            err,
            BusError::InvalidTransition { action: "stop", state: AgentState::Created, .. }
        ));
        assert_eq!(agent.state(), AgentState::Created);
    }

    #[tokio::test]
    async fn test_run_twice_is_usage_error() {
        let mut agent = Agent::new("OrderAgent");
        agent.run().await.unwrap();
        assert!(agent.run().await.is_err());
        agent.stop().await.unwrap();
        assert!(agent.run().await.is_err());
        assert!(agent.stop().await.is_err());
        assert_eq!(agent.state(), AgentState::Stopped);
    }

    #[tokio::test]
    async fn test_subscribe_after_run_is_usage_error() {
        let channel = Channel::new("human");
        let mut agent = Agent::new("OrderAgent");
        agent.run().await.unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        assert!(agent.subscribe(&channel, Filter::Any, counting_handler(counter)).is_err());
    }

    #[tokio::test]
    async fn test_no_delivery_before_run() {
        let channel = Channel::new("human");
        let counter = Arc::new(AtomicUsize::new(0));
        let mut agent = Agent::new("OrderAgent");
        agent
            .on(&channel, kinds::USER_MESSAGE, counting_handler(counter.clone()))
            .unwrap();

        assert_eq!(channel.publish(Message::user("too early")).unwrap(), 0);
        assert_eq!(channel.subscriber_count(), 0);

        agent.run().await.unwrap();
        assert_eq!(channel.subscriber_count(), 1);
        channel.publish(Message::user("on time")).unwrap();
        wait_for(&counter, 1).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_delivery_after_stop() {
        let channel = Channel::new("human");
        let counter = Arc::new(AtomicUsize::new(0));
        let mut agent = Agent::new("OrderAgent");
        agent
            .subscribe(&channel, Filter::Any, counting_handler(counter.clone()))
            .unwrap();
        agent.run().await.unwrap();
        agent.stop().await.unwrap();

        assert_eq!(channel.subscriber_count(), 0);
        assert_eq!(channel.publish(Message::user("late")).unwrap(), 0);
        agent.drain().await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handler_error_does_not_break_delivery() {
        let channel = Channel::new("human");
        let counter = Arc::new(AtomicUsize::new(0));

        let mut failing = Agent::new("Failing");
        failing
            .subscribe(
                &channel,
                Filter::Any,
                handler_fn(|_msg, _ctx| async { Err(anyhow::anyhow!("boom")) }),
            )
            .unwrap();
        let mut counting = Agent::new("Counting");
        counting
            .subscribe(&channel, Filter::Any, counting_handler(counter.clone()))
            .unwrap();

        failing.run().await.unwrap();
        counting.run().await.unwrap();

        assert_eq!(channel.publish(Message::user("one")).unwrap(), 2);
        assert_eq!(channel.publish(Message::user("two")).unwrap(), 2);
        wait_for(&counter, 2).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_in_flight_handler_sees_cancellation() {
        let channel = Channel::new("human");
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let started_tx = Arc::new(std::sync::Mutex::new(Some(started_tx)));
        let observed = Arc::new(AtomicUsize::new(0));
        let observed_clone = observed.clone();

        let mut agent = Agent::new("Slow");
        agent
            .subscribe(
                &channel,
                Filter::Any,
                handler_fn(move |_msg, ctx| {
                    let started_tx = started_tx.clone();
                    let observed = observed_clone.clone();
                    async move {
                        let tx = started_tx.lock().unwrap().take();
                        if let Some(tx) = tx {
                            let _ = tx.send(());
                        }
                        ctx.cancel.cancelled().await;
                        observed.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            )
            .unwrap();
        agent.run().await.unwrap();
        channel.publish(Message::user("work")).unwrap();
        started_rx.await.unwrap();

        agent.stop().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), agent.drain())
            .await
            .unwrap();
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_context_names_agent_and_channel() {
        let channel = Channel::new("agents");
        let (tx, rx) = tokio::sync::oneshot::channel::<(String, String)>();
        let tx = Arc::new(std::sync::Mutex::new(Some(tx)));

        let mut agent = Agent::new("PolicyAgent");
        agent
            .subscribe(
                &channel,
                Filter::targeting("PolicyAgent"),
                handler_fn(move |_msg, ctx| {
                    let tx = tx.clone();
                    async move {
                        let tx = tx.lock().unwrap().take();
                        if let Some(tx) = tx {
                            let _ = tx.send((ctx.agent, ctx.channel));
                        }
                        Ok(())
                    }
                }),
            )
            .unwrap();
        agent.run().await.unwrap();
        channel
            .publish(Message::routed("PolicyAgent", Default::default()))
            .unwrap();

        let (agent_name, channel_name) = rx.await.unwrap();
        assert_eq!(agent_name, "PolicyAgent");
        assert_eq!(channel_name, "agents");
    }

    #[tokio::test]
    async fn test_run_on_closed_channel_fails_cleanly() {
        let hub = crate::bus::ChannelHub::new();
        let open = hub.channel("open").unwrap();
        let closed = crate::bus::Channel::new("closed");
        closed.close();

        let counter = Arc::new(AtomicUsize::new(0));
        let mut agent = Agent::new("Broken");
        agent
            .subscribe(&open, Filter::Any, counting_handler(counter.clone()))
            .unwrap()
            .subscribe(&closed, Filter::Any, counting_handler(counter))
            .unwrap();

        assert!(matches!(agent.run().await, Err(BusError::ChannelClosed(_))));
        assert_eq!(open.subscriber_count(), 0);
        assert_eq!(agent.state(), AgentState::Created);
    }
}
