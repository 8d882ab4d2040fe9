//! Scripts and probes for the dev server running inside a sandbox.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::types::DevServerConfig;
use crate::sandbox::readiness::ReadinessProbe;
use crate::sandbox::traits::{CommandRequest, SandboxHandle};
use crate::sandbox::SandboxInfo;

/// Number of log lines returned by status queries.
pub const STATUS_LOG_LINES: usize = 20;

/// Shell snippets driving the detached dev server process.
#[derive(Debug, Clone)]
pub struct DevServerScripts {
    config: DevServerConfig,
}

impl DevServerScripts {
    pub fn new(config: DevServerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DevServerConfig {
        &self.config
    }

    /// Kill every process matching the dev server pattern.
    pub fn kill(&self) -> String {
        format!("pkill -f {} || true", self.config.process_pattern)
    }

    pub fn clear_log(&self) -> String {
        format!("rm -f {}", self.config.log_path)
    }

    /// Start detached, capturing combined output and the pid.
    pub fn launch(&self) -> String {
        format!(
            "nohup {} > {} 2>&1 & echo $! > {}",
            self.config.command, self.config.log_path, self.config.pid_path
        )
    }

    /// Prints a line per listening socket on the dev server port.
    pub fn port_check(&self) -> String {
        let port = self.config.port;
        format!(
            "netstat -tln 2>/dev/null | grep :{port} || ss -tln 2>/dev/null | grep :{port} || lsof -i:{port} 2>/dev/null",
            port = port
        )
    }

    pub fn tail_log(&self, lines: usize) -> String {
        format!("tail -{} {} 2>/dev/null", lines, self.config.log_path)
    }

    pub fn process_list(&self) -> String {
        format!(
            "ps aux | grep -E \"({}|npm.*dev)\" | grep -v grep",
            self.config.process_pattern
        )
    }

    pub fn port_status(&self) -> String {
        let port = self.config.port;
        format!(
            "netstat -tln 2>/dev/null | grep :{port} || ss -tln 2>/dev/null | grep :{port} || echo \"Port {port} not listening\"",
            port = port
        )
    }
}

/// Readiness probe running the dev server checks through a sandbox handle.
pub struct DevServerProbe {
    handle: Arc<dyn SandboxHandle>,
    scripts: DevServerScripts,
}

impl DevServerProbe {
    pub fn new(handle: Arc<dyn SandboxHandle>, scripts: DevServerScripts) -> Self {
        Self { handle, scripts }
    }

    async fn stdout_of(&self, script: String) -> String {
        let request = CommandRequest::shell(script).cwd(self.handle.workdir());
        match self.handle.run_command(request).await {
            Ok(output) => output.stdout.resolve().await,
            Err(e) => {
                tracing::debug!(error = %e, "Dev server probe command failed");
                String::new()
            }
        }
    }
}

#[async_trait]
impl ReadinessProbe for DevServerProbe {
    async fn port_listening(&self) -> bool {
        !self.stdout_of(self.scripts.port_check()).await.trim().is_empty()
    }

    async fn recent_log(&self) -> String {
        self.stdout_of(self.scripts.tail_log(self.scripts.config().log_tail_lines))
            .await
    }
}

/// Snapshot reported by the dev server status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevServerStatus {
    /// Port currently listening
    pub vite_ready: bool,
    /// Last lines of the dev server log
    pub logs: String,
    pub process_status: String,
    pub port_status: String,
    pub sandbox_info: Option<SandboxInfo>,
}

/// Keep the last `n` lines of `text`.
pub fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_is_detached() {
        let scripts = DevServerScripts::new(DevServerConfig::default());
        assert_eq!(
            scripts.launch(),
            "nohup npm run dev > /tmp/vite.log 2>&1 & echo $! > /tmp/vite.pid"
        );
        assert_eq!(scripts.kill(), "pkill -f vite || true");
    }

    #[test]
    fn test_port_check_uses_configured_port() {
        let config = DevServerConfig {
            port: 3000,
            ..Default::default()
        };
        let scripts = DevServerScripts::new(config);
        assert!(scripts.port_check().contains("grep :3000"));
        assert!(scripts.port_check().contains("lsof -i:3000"));
        assert!(!scripts.port_check().contains("5173"));
    }

    #[test]
    fn test_last_lines() {
        let text = (1..=30).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
        let tail = last_lines(&text, STATUS_LOG_LINES);
        assert_eq!(tail.lines().count(), 20);
        assert!(tail.starts_with("line 11"));
        assert_eq!(last_lines("a\nb", 5), "a\nb");
    }
}
