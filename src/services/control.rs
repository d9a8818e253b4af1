//! Remote control poller.
//!
//! Reads unprocessed commands from the control channel on a fixed interval
//! and dispatches them to the orchestrator. Each fetched command is marked
//! processed once, with the dispatch error if there was one.

use crate::config::ControlConfig;
use crate::error::{AppError, Result};
use crate::services::orchestrator::SyncOrchestrator;
use crate::services::store::CommandChannel;
use crate::types::{CommandAction, RemoteCommand};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct ControlPoller {
    channel: Arc<dyn CommandChannel>,
    orchestrator: Arc<SyncOrchestrator>,
    config: ControlConfig,
}

impl ControlPoller {
    pub fn new(
        channel: Arc<dyn CommandChannel>,
        orchestrator: Arc<SyncOrchestrator>,
        config: ControlConfig,
    ) -> Self {
        Self {
            channel,
            orchestrator,
            config,
        }
    }

    /// Run the poll loop on a background task until `token` is cancelled.
    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(token).await })
    }

    pub async fn run(&self, token: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Control poller running every {:?}",
            self.config.poll_interval
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }
            if let Err(e) = self.poll_once().await {
                error!("Control poll failed: {}", e);
            }
        }
        debug!("Control poller stopped");
    }

    /// Fetch and handle one batch. Returns the number of commands handled.
    pub async fn poll_once(&self) -> Result<usize> {
        let commands = self
            .channel
            .fetch_unprocessed_commands(self.config.batch_limit)
            .await?;

        for command in &commands {
            info!("Remote command {}: {}", command.id, command.action);
            let outcome = self.dispatch(command).await;
            if let Err(e) = &outcome {
                warn!("Remote command {} failed: {}", command.id, e);
            }
            if let Err(e) = self
                .channel
                .mark_processed(command.id, outcome.err().map(|e| e.to_string()))
                .await
            {
                error!("Could not mark command {} processed: {}", command.id, e);
            }
        }

        Ok(commands.len())
    }

    async fn dispatch(&self, command: &RemoteCommand) -> Result<()> {
        match &command.action {
            CommandAction::Start => self.orchestrator.start().await.map(|_| ()),
            CommandAction::Stop => self.orchestrator.stop().await,
            CommandAction::Restart => self.orchestrator.restart().await.map(|_| ()),
            CommandAction::UpdateSymbols => {
                let symbols = command.symbols().ok_or_else(|| {
                    AppError::BadRequest("UPDATE_SYMBOLS requires a symbol list".to_string())
                })?;
                self.orchestrator.update_symbols(&symbols).await.map(|_| ())
            }
            CommandAction::Status => {
                let status = self.orchestrator.status().await;
                info!(
                    "Sync status: {} ({} processed, {} succeeded, {} records)",
                    status.state, status.processed, status.succeeded, status.records_added
                );
                Ok(())
            }
            CommandAction::Unknown(action) => Err(AppError::BadRequest(format!(
                "unknown action '{}'",
                action
            ))),
        }
    }
}
