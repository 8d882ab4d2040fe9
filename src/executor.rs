//! Client-side command execution with one-shot sandbox recreation.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Error reported when the sandbox could not be brought back.
pub const RECREATION_FAILED: &str = "Failed to recreate sandbox after it stopped";

/// Outcome of one command as seen by a client of the command boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// The sandbox is gone and must be recreated before retrying
    #[serde(default)]
    pub needs_recreation: bool,
}

impl ExecutionOutcome {
    /// Failure unrelated to sandbox expiry (transport error, bad response).
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn recreation_needed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            needs_recreation: true,
            ..Default::default()
        }
    }
}

/// The boundary a [`CommandExecutor`] drives.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    /// Execute a command once. Never fails; problems are encoded in the outcome.
    async fn execute(&self, command: &str) -> ExecutionOutcome;

    /// Provision a replacement sandbox through the standard creation entry point
    async fn recreate(&self) -> bool;
}

/// Wraps a transport with the recreate-then-retry-once policy.
///
/// At most one recreation and one retry happen per call, whatever the
/// retry returns.
pub struct CommandExecutor<T> {
    transport: T,
}

impl<T: CommandTransport> CommandExecutor<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Execute `command`, recreating the sandbox through the transport if it
    /// has stopped.
    pub async fn execute_with_recreation(&self, command: &str) -> ExecutionOutcome {
        self.execute_with_hook(command, None).await
    }

    /// Like [`execute_with_recreation`](Self::execute_with_recreation), but a
    /// caller-supplied future replaces the default recreation path. It only
    /// runs if recreation is needed.
    pub async fn execute_with_hook(
        &self,
        command: &str,
        on_recreation_needed: Option<BoxFuture<'_, bool>>,
    ) -> ExecutionOutcome {
        let result = self.transport.execute(command).await;
        if !result.needs_recreation {
            return result;
        }

        warn!(command = %command, phase = "detect", "Sandbox needs recreation");

        let (recreated, path) = match on_recreation_needed {
            Some(hook) => {
                info!(command = %command, phase = "recreate", path = "custom", "Attempting custom recreation");
                (hook.await, "custom")
            }
            None => {
                info!(command = %command, phase = "recreate", path = "default", "Attempting automatic recreation");
                (self.transport.recreate().await, "default")
            }
        };

        if !recreated {
            error!(command = %command, phase = "recreate", path, "Sandbox recreation failed");
            return ExecutionOutcome::recreation_needed(RECREATION_FAILED);
        }

        info!(command = %command, phase = "retry", path, "Sandbox recreated, retrying command");
        let retried = self.transport.execute(command).await;
        if retried.needs_recreation {
            error!(command = %command, phase = "retry", "Sandbox stopped again after recreation");
        }
        retried
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Transport replaying scripted outcomes.
    struct ScriptedTransport {
        outcomes: Mutex<Vec<ExecutionOutcome>>,
        fallback: ExecutionOutcome,
        recreate_result: bool,
        executions: AtomicUsize,
        recreations: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(outcomes: Vec<ExecutionOutcome>, fallback: ExecutionOutcome) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
                fallback,
                recreate_result: true,
                executions: AtomicUsize::new(0),
                recreations: AtomicUsize::new(0),
            }
        }

        fn always_gone() -> Self {
            Self::new(Vec::new(), ExecutionOutcome::recreation_needed("Sandbox has stopped"))
        }
    }

    #[async_trait]
    impl CommandTransport for ScriptedTransport {
        async fn execute(&self, _command: &str) -> ExecutionOutcome {
            self.executions.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                self.fallback.clone()
            } else {
                outcomes.remove(0)
            }
        }

        async fn recreate(&self) -> bool {
            self.recreations.fetch_add(1, Ordering::SeqCst);
            self.recreate_result
        }
    }

    fn ok(output: &str) -> ExecutionOutcome {
        ExecutionOutcome {
            success: true,
            output: Some(output.to_string()),
            exit_code: Some(0),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_first_result_returned_unchanged() {
        let failed = ExecutionOutcome {
            success: false,
            error: Some("lint errors".to_string()),
            exit_code: Some(1),
            ..Default::default()
        };
        let executor = CommandExecutor::new(ScriptedTransport::new(vec![failed.clone()], ok("")));

        assert_eq!(executor.execute_with_recreation("npm run lint").await, failed);
        assert_eq!(executor.transport().executions.load(Ordering::SeqCst), 1);
        assert_eq!(executor.transport().recreations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_recreates_and_retries_once() {
        let transport = ScriptedTransport::new(
            vec![ExecutionOutcome::recreation_needed("gone")],
            ok("hello"),
        );
        let executor = CommandExecutor::new(transport);

        let outcome = executor.execute_with_recreation("echo hello").await;
        assert_eq!(outcome, ok("hello"));
        assert_eq!(executor.transport().executions.load(Ordering::SeqCst), 2);
        assert_eq!(executor.transport().recreations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_always_gone_stops_after_one_retry() {
        let executor = CommandExecutor::new(ScriptedTransport::always_gone());

        let outcome = executor.execute_with_recreation("ls").await;
        assert!(!outcome.success);
        assert!(outcome.needs_recreation);
        assert_eq!(executor.transport().executions.load(Ordering::SeqCst), 2);
        assert_eq!(executor.transport().recreations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_recreation_is_terminal() {
        let mut transport = ScriptedTransport::always_gone();
        transport.recreate_result = false;
        let executor = CommandExecutor::new(transport);

        let outcome = executor.execute_with_recreation("ls").await;
        assert_eq!(outcome, ExecutionOutcome::recreation_needed(RECREATION_FAILED));
        assert_eq!(executor.transport().executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hook_replaces_default_recreation() {
        let transport = ScriptedTransport::new(
            vec![ExecutionOutcome::recreation_needed("gone")],
            ok("done"),
        );
        let executor = CommandExecutor::new(transport);
        let hook_calls = AtomicUsize::new(0);

        let hook = async {
            hook_calls.fetch_add(1, Ordering::SeqCst);
            true
        }
        .boxed();
        let outcome = executor.execute_with_hook("ls", Some(hook)).await;

        assert_eq!(outcome, ok("done"));
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
        assert_eq!(executor.transport().recreations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hook_failure_is_terminal() {
        let executor = CommandExecutor::new(ScriptedTransport::always_gone());

        let outcome = executor
            .execute_with_hook("ls", Some(async { false }.boxed()))
            .await;
        assert!(outcome.needs_recreation);
        assert_eq!(outcome.error.as_deref(), Some(RECREATION_FAILED));
        assert_eq!(executor.transport().executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hook_not_run_when_not_needed() {
        let executor = CommandExecutor::new(ScriptedTransport::new(Vec::new(), ok("")));
        let hook_calls = AtomicUsize::new(0);

        let hook = async {
            hook_calls.fetch_add(1, Ordering::SeqCst);
            true
        }
        .boxed();
        executor.execute_with_hook("ls", Some(hook)).await;
        assert_eq!(hook_calls.load(Ordering::SeqCst), 0);
    }
}
