//! HTTP reachability probe used as a connectivity source.
//!
//! Polls the remote base URL on an interval. Any HTTP response counts as
//! online (the server answered); a transport error or timeout counts as
//! offline.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::core::ConnectivitySource;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpProbe {
    url: String,
    interval: Duration,
    client: reqwest::Client,
    tx: watch::Sender<bool>,
}

impl HttpProbe {
    /// Probe `url` every `interval`, starting in the given state
    pub fn new(url: impl Into<String>, interval: Duration, initially_online: bool) -> Self {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .unwrap_or_default();
        let (tx, _) = watch::channel(initially_online);

        Self {
            url: url.into(),
            interval,
            client,
            tx,
        }
    }

    /// Check reachability once and publish the result
    pub async fn check(&self) -> bool {
        let online = match self.client.head(&self.url).send().await {
            Ok(response) => {
                debug!(status = %response.status(), "Probe answered");
                true
            }
            Err(e) => {
                debug!(error = %e, "Probe failed");
                false
            }
        };

        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
        if changed {
            info!(online, url = %self.url, "Connectivity changed");
        }

        online
    }

    /// Poll in the background until the task is aborted
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.check().await;
            }
        })
    }
}

impl ConnectivitySource for HttpProbe {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
