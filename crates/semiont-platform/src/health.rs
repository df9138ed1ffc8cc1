use std::time::{Duration, Instant};

use semiont_core::results::HealthReport;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Best-effort HTTP GET against `url`. Never fails: transport errors and
/// timeouts come back as an unhealthy report.
pub async fn probe(url: &str, timeout: Duration) -> HealthReport {
    let started = Instant::now();
    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(c) => c,
        Err(e) => return unhealthy(url, started, None, e.to_string()),
    };

    match client.get(url).send().await {
        Ok(resp) => {
            let status = resp.status();
            let latency_ms = elapsed_ms(started);
            tracing::debug!(url, status = status.as_u16(), latency_ms, "health probe");
            HealthReport {
                healthy: status.is_success(),
                endpoint: url.to_string(),
                status_code: Some(status.as_u16()),
                latency_ms,
                message: if status.is_success() {
                    None
                } else {
                    Some(format!("HTTP {}", status.as_u16()))
                },
            }
        }
        Err(e) => {
            let message = if e.is_timeout() {
                format!("timed out after {}s", timeout.as_secs())
            } else {
                e.to_string()
            };
            tracing::debug!(url, error = %message, "health probe failed");
            unhealthy(url, started, None, message)
        }
    }
}

fn unhealthy(url: &str, started: Instant, status: Option<u16>, message: String) -> HealthReport {
    HealthReport {
        healthy: false,
        endpoint: url.to_string(),
        status_code: status,
        latency_ms: elapsed_ms(started),
        message: Some(message),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn healthy_on_2xx() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/health")
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let url = format!("{}/api/health", server.url());
        let report = probe(&url, DEFAULT_TIMEOUT).await;
        mock.assert_async().await;
        assert!(report.healthy);
        assert_eq!(report.status_code, Some(200));
        assert!(report.message.is_none());
    }

    #[tokio::test]
    async fn unhealthy_on_5xx() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/health")
            .with_status(503)
            .create_async()
            .await;

        let report = probe(&format!("{}/health", server.url()), DEFAULT_TIMEOUT).await;
        assert!(!report.healthy);
        assert_eq!(report.status_code, Some(503));
        assert_eq!(report.message.as_deref(), Some("HTTP 503"));
    }

    #[tokio::test]
    async fn unhealthy_when_unreachable() {
        // Port 9 (discard) is essentially never listening on localhost.
        let report = probe("http://127.0.0.1:9/health", Duration::from_secs(2)).await;
        assert!(!report.healthy);
        assert!(report.status_code.is_none());
        assert!(report.message.is_some());
    }
}
