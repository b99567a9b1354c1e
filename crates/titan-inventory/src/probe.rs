//! # Connection Probe
//!
//! Read-only reachability check against the inventory system. The
//! coordinator runs it before every cycle and refuses to create records when
//! it fails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::client::InventoryClient;

/// Result of one probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    pub message: String,
    /// Round trip of the health call. `None` when it timed out.
    pub latency_ms: Option<u64>,
    pub checked_at: DateTime<Utc>,
}

/// Health check with a hard time bound.
#[derive(Clone)]
pub struct ConnectionProbe {
    client: Arc<dyn InventoryClient>,
    timeout: Duration,
}

impl ConnectionProbe {
    pub fn new(client: Arc<dyn InventoryClient>, timeout: Duration) -> Self {
        ConnectionProbe { client, timeout }
    }

    /// Probes the inventory system. Never fails: every problem becomes
    /// `connected = false` with a message.
    pub async fn test(&self) -> ConnectionStatus {
        let started = Instant::now();
        let result = tokio::time::timeout(self.timeout, self.client.health()).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let status = match result {
            Ok(Ok(())) => ConnectionStatus {
                connected: true,
                message: "Connected to inventory system".to_string(),
                latency_ms: Some(latency_ms),
                checked_at: Utc::now(),
            },
            Ok(Err(e)) => ConnectionStatus {
                connected: false,
                message: e.to_string(),
                latency_ms: Some(latency_ms),
                checked_at: Utc::now(),
            },
            Err(_) => ConnectionStatus {
                connected: false,
                message: format!(
                    "Inventory system did not answer within {}s",
                    self.timeout.as_secs()
                ),
                latency_ms: None,
                checked_at: Utc::now(),
            },
        };

        if status.connected {
            debug!(latency_ms, "Inventory probe succeeded");
        } else {
            warn!(message = %status.message, "Inventory probe failed");
        }
        status
    }
}
