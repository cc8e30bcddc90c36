use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use confluence_core::AlertSink;

/// Alert sink that writes critical alerts to the log.
///
/// Stands in for a real transport when none is wired.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn send_critical_alert(
        &self,
        title: &str,
        message: &str,
        details: &HashMap<String, String>,
    ) -> Result<()> {
        let mut keys: Vec<_> = details.iter().collect();
        keys.sort();
        let rendered = keys
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        tracing::error!(title, message, details = %rendered, "CRITICAL ALERT");
        Ok(())
    }
}
