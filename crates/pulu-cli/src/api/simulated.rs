//! In-process gateway for dry runs
//!
//! Sleeps for a latency in the configured range and fails a fixed share of
//! records. Both are derived from a SHA-256 of the record key, so a given
//! input produces the same outcomes on every run.

use crate::api::client::ApiGateway;
use crate::config::SimulationConfig;
use crate::records::{ProcessingResult, Record};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;

const FAILURE_MESSAGES: &[&str] = &[
    "Hold not found",
    "Donation already processed",
    "Invalid product code",
    "API timeout",
    "Service temporarily unavailable",
];

/// Deterministic stand-in for the Pulse API
#[derive(Debug, Clone)]
pub struct SimulatedGateway {
    config: SimulationConfig,
}

impl SimulatedGateway {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    /// Latency and failure message (if any) for a key
    pub fn outcome(&self, key: &str) -> (Duration, Option<&'static str>) {
        let digest = Sha256::digest(key.as_bytes());
        let word = |i: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[i * 8..i * 8 + 8]);
            u64::from_le_bytes(bytes)
        };

        let span = self
            .config
            .max_latency_ms
            .saturating_sub(self.config.min_latency_ms)
            .saturating_add(1);
        let latency = Duration::from_millis(self.config.min_latency_ms + word(0) % span);

        let fails = word(1) % 100 < u64::from(self.config.failure_percent);
        let message = fails.then(|| FAILURE_MESSAGES[(word(2) % FAILURE_MESSAGES.len() as u64) as usize]);

        (latency, message)
    }
}

#[async_trait]
impl ApiGateway for SimulatedGateway {
    async fn submit(&self, record: &Record, _clear_code: &str) -> ProcessingResult {
        let key = record.key();
        let (latency, failure) = self.outcome(&key);
        tokio::time::sleep(latency).await;

        match failure {
            None => ProcessingResult::success(record.clone()),
            Some(message) => {
                debug!(key = %key, error = message, "Simulated failure");
                ProcessingResult::failure(record.clone(), message)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::records::HoldRecord;

    fn gateway(failure_percent: u8) -> SimulatedGateway {
        SimulatedGateway::new(SimulationConfig {
            min_latency_ms: 10,
            max_latency_ms: 20,
            failure_percent,
        })
    }

    #[test]
    fn test_outcome_is_deterministic() {
        let gw = gateway(50);
        assert_eq!(gw.outcome("G1|PROD|H01"), gw.outcome("G1|PROD|H01"));
    }

    #[test]
    fn test_latency_within_bounds() {
        let gw = gateway(0);
        for i in 0..200 {
            let (latency, failure) = gw.outcome(&format!("G{}|PROD|H01", i));
            assert!(latency >= Duration::from_millis(10));
            assert!(latency <= Duration::from_millis(20));
            assert!(failure.is_none());
        }
    }

    #[test]
    fn test_failure_rate_extremes() {
        let always = gateway(100);
        let failures = (0..200)
            .filter(|i| always.outcome(&format!("G{}|PROD|H01", i)).1.is_some())
            .count();
        assert_eq!(failures, 200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_reports_outcome() {
        let gw = gateway(0);
        let record: Record = HoldRecord::new("G1", "PROD", "H01", None).into();
        let result = gw.submit(&record, "RD").await;
        assert!(result.is_success());
    }
}
