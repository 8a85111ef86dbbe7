//! Broker session with watchdog-driven reconnect.
//!
//! One session per configured feed: connect, bind the durable queue, hand
//! every delivery to the message handler. A watchdog measures wall-clock
//! silence every 10 s and tears the session down after 90 s without a
//! delivery; connect failures back off 10 s and retry forever. Deliveries
//! are auto-acknowledged by the subscription.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::BrokerConfig;
use crate::stats::BrokerHealth;

/// Watchdog check interval.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(10);

/// Silence past this tears the session down.
const SILENCE_LIMIT: Duration = Duration::from_secs(90);

/// Backoff between connect attempts and after a teardown.
const RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// Per-message callback. Implementations route by topic and must never
/// panic; decode failures are theirs to count.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, topic: &str, payload: &str);
}

pub struct BrokerSession {
    config: BrokerConfig,
    handler: Arc<dyn MessageHandler>,
    health: Arc<BrokerHealth>,
}

impl BrokerSession {
    pub fn new(
        config: BrokerConfig,
        handler: Arc<dyn MessageHandler>,
        health: Arc<BrokerHealth>,
    ) -> Self {
        Self {
            config,
            handler,
            health,
        }
    }

    /// Run until shutdown: connect, consume, reconnect on failure or
    /// watchdog teardown.
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                return;
            }
            match self.connect_and_consume(&shutdown).await {
                Ok(()) => {
                    info!(session = %self.config.name, "broker session ended");
                    if shutdown.is_cancelled() {
                        return;
                    }
                }
                Err(e) => {
                    error!(session = %self.config.name, error = %e, "broker session failed");
                }
            }
            self.health.set_connected(false);
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            }
        }
    }

    async fn connect_and_consume(&self, shutdown: &CancellationToken) -> Result<()> {
        info!(
            session = %self.config.name,
            url = %self.config.url,
            queue = %self.config.queue,
            "connecting to broker"
        );
        let mut options = async_nats::ConnectOptions::new().name(self.client_name());
        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }
        let client = options.connect(self.config.url.as_str()).await?;
        let mut subscriber = client
            .queue_subscribe(self.config.queue.clone(), format!("swimview-{}", self.config.name))
            .await?;
        self.health.set_connected(true);
        info!(session = %self.config.name, "broker session established");

        let mut watchdog = tokio::time::interval(WATCHDOG_INTERVAL);
        watchdog.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_delivery = Instant::now();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(session = %self.config.name, "broker session shutting down");
                    return Ok(());
                }
                _ = watchdog.tick() => {
                    let silence = last_delivery.elapsed();
                    if silence > SILENCE_LIMIT {
                        warn!(
                            session = %self.config.name,
                            silence_secs = silence.as_secs(),
                            "watchdog: feed silent, tearing session down"
                        );
                        metrics::counter!("broker.watchdog_teardown").increment(1);
                        return Ok(());
                    }
                }
                message = subscriber.next() => {
                    match message {
                        Some(message) => {
                            last_delivery = Instant::now();
                            self.health.touch();
                            metrics::counter!("broker.messages_received").increment(1);
                            let payload = String::from_utf8_lossy(&message.payload);
                            self.handler.handle(message.subject.as_str(), &payload);
                        }
                        None => {
                            debug!(session = %self.config.name, "subscription closed");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Client name as presented to the broker; carries the message-VPN tag
    /// the deployment uses to tell environments apart.
    fn client_name(&self) -> String {
        match &self.config.vpn {
            Some(vpn) => format!("swimview-{}-{}", self.config.name, vpn),
            None => format!("swimview-{}", self.config.name),
        }
    }
}
