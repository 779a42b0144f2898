//! Round-trip latency probing

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Upper bound on a single probe including process start-up
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Measures round-trip latency to a remote host
#[async_trait]
pub trait LatencyProbe: Send + Sync {
    /// Round-trip time in milliseconds, `None` when the probe fails
    async fn round_trip(&self, host: &str) -> Option<f64>;
}

/// Latency probe that shells out to a single `ping`
#[derive(Debug, Default, Clone)]
pub struct PingProbe;

#[async_trait]
impl LatencyProbe for PingProbe {
    async fn round_trip(&self, host: &str) -> Option<f64> {
        let output = tokio::time::timeout(
            PROBE_TIMEOUT,
            Command::new("ping")
                .args(["-c", "1", "-W", "2", host])
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match output {
            Ok(Ok(output)) if output.status.success() => {
                parse_ping_time(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(Ok(output)) => {
                debug!(host = %host, status = ?output.status, "Latency probe failed");
                None
            }
            Ok(Err(e)) => {
                debug!(host = %host, error = %e, "Could not run latency probe");
                None
            }
            Err(_) => {
                debug!(host = %host, "Latency probe timed out");
                None
            }
        }
    }
}

/// Probe that always returns the same answer
#[derive(Debug, Clone)]
pub struct FixedLatency(pub Option<f64>);

#[async_trait]
impl LatencyProbe for FixedLatency {
    async fn round_trip(&self, _host: &str) -> Option<f64> {
        self.0
    }
}

/// Extract `time=12.3 ms` from ping output
pub fn parse_ping_time(output: &str) -> Option<f64> {
    let start = output.find("time=")? + "time=".len();
    let rest = &output[start..];
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ping_time() {
        let output = "PING 8.8.8.8 (8.8.8.8) 56(84) bytes of data.\n64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=14.2 ms\n";
        assert_eq!(parse_ping_time(output), Some(14.2));
    }

    #[test]
    fn test_parse_ping_time_integer() {
        assert_eq!(parse_ping_time("time=3ms"), Some(3.0));
    }

    #[test]
    fn test_parse_ping_time_missing() {
        assert_eq!(parse_ping_time("100% packet loss"), None);
    }

    #[tokio::test]
    async fn test_fixed_latency() {
        let probe = FixedLatency(Some(42.0));
        assert_eq!(probe.round_trip("example.org").await, Some(42.0));
    }
}
