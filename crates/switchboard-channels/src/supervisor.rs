//! Supervisor: starts agents and a companion server, then shuts them down
//! in order once a shutdown signal arrives

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::agent::{Agent, AgentState};
use crate::bus::ChannelHub;

type ServerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Default time given to in-flight handlers after agents are stopped
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// What happened during a supervised run
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Agents that were started, in start order
    pub started: Vec<String>,
    /// Agents that were stopped cleanly
    pub stopped: Vec<String>,
    /// Every error hit while starting, serving, or cleaning up
    pub errors: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Collapse the report into a single result for callers that only care
    /// whether everything went well
    pub fn into_result(self) -> anyhow::Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "shutdown finished with {} error(s): {}",
                self.errors.len(),
                self.errors.join("; ")
            ))
        }
    }
}

/// Owns every agent and the companion server for the lifetime of the process
pub struct Supervisor {
    hub: ChannelHub,
    agents: Vec<Agent>,
    server: Option<ServerFuture>,
    shutdown_grace: Duration,
}

impl Supervisor {
    pub fn new(hub: ChannelHub) -> Self {
        Self {
            hub,
            agents: Vec::new(),
            server: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Add an agent. Agents are started in the order they are added.
    pub fn add_agent(&mut self, agent: Agent) {
        self.agents.push(agent);
    }

    pub fn with_agent(mut self, agent: Agent) -> Self {
        self.add_agent(agent);
        self
    }

    /// Run `server` as a background task alongside the agents
    pub fn with_server<F>(mut self, server: F) -> Self
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.server = Some(Box::pin(server));
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn agent_names(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.name()).collect()
    }

    /// Start everything, wait for `shutdown` (or for the server to exit on
    /// its own), then stop agents, then channels, then the server.
    ///
    /// Every cleanup step is attempted even if an earlier one fails.
    pub async fn run_until<S>(mut self, shutdown: S) -> ShutdownReport
    where
        S: Future<Output = ()>,
    {
        let mut report = ShutdownReport::default();

        let mut start_failed = false;
        for agent in &mut self.agents {
            match agent.run().await {
                Ok(()) => report.started.push(agent.name().to_string()),
                Err(e) => {
                    error!("Failed to start agent {}: {}", agent.name(), e);
                    report.errors.push(format!("start {}: {}", agent.name(), e));
                    start_failed = true;
                    break;
                }
            }
        }

        // A server never starts next to a half-started set of agents
        let mut server_task = match self.server.take() {
            Some(server) if !start_failed => Some(tokio::spawn(server)),
            _ => None,
        };

        if !start_failed {
            info!(
                "Supervisor running {} agent(s){}",
                report.started.len(),
                if server_task.is_some() { " and server" } else { "" }
            );
            let mut server_finished = false;
            match server_task.as_mut() {
                Some(task) => {
                    tokio::select! {
                        _ = shutdown => info!("Shutdown signal received"),
                        result = task => {
                            let msg = match result {
                                Ok(Ok(())) => "server exited".to_string(),
                                Ok(Err(e)) => format!("server failed: {:#}", e),
                                Err(e) => format!("server task failed: {}", e),
                            };
                            warn!("{}, shutting down", msg);
                            report.errors.push(msg);
                            server_finished = true;
                        }
                    }
                }
                None => {
                    shutdown.await;
                    info!("Shutdown signal received");
                }
            }
            if server_finished {
                server_task = None;
            }
        }

        for agent in &mut self.agents {
            if agent.state() != AgentState::Running {
                continue;
            }
            match agent.stop().await {
                Ok(()) => report.stopped.push(agent.name().to_string()),
                Err(e) => {
                    error!("Failed to stop agent {}: {}", agent.name(), e);
                    report.errors.push(format!("stop {}: {}", agent.name(), e));
                }
            }
        }

        for agent in &self.agents {
            if agent.state() != AgentState::Stopped {
                continue;
            }
            if tokio::time::timeout(self.shutdown_grace, agent.drain())
                .await
                .is_err()
            {
                warn!(
                    "Agent {} still had handlers running after {:?}",
                    agent.name(),
                    self.shutdown_grace
                );
            }
        }

        self.hub.stop();

        if let Some(task) = server_task {
            task.abort();
            match task.await {
                Ok(Err(e)) => report.errors.push(format!("server failed: {:#}", e)),
                Err(e) if e.is_panic() => report.errors.push(format!("server panicked: {}", e)),
                _ => {}
            }
        }

        info!(
            "Supervisor stopped {} agent(s) with {} error(s)",
            report.stopped.len(),
            report.errors.len()
        );
        report
    }
}
