//! In-memory backend for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Result, SandpitError};
use crate::sandbox::traits::{
    BackendCapabilities, CommandOutput, CommandRequest, CreateSandboxRequest, FileEntry,
    SandboxBackend, SandboxHandle,
};

/// Everything the fake saw, plus knobs to script failures.
#[derive(Default)]
pub(crate) struct FakeState {
    pub creates: usize,
    pub last_create: Option<CreateSandboxRequest>,
    pub commands: Vec<CommandRequest>,
    pub bulk_writes: usize,
    pub stops: usize,
    pub files: HashMap<String, String>,
    /// Respond to everything with a 410
    pub expired: bool,
    pub fail_create: bool,
    /// Time `create` spends before provisioning
    pub create_delay: Option<Duration>,
    pub fail_bulk_writes: bool,
    pub fail_stop: bool,
    /// Port checks report a listening socket
    pub listening: bool,
    /// Consumed before the built-in responses
    pub responses: VecDeque<Result<CommandOutput>>,
}

fn gone() -> SandpitError {
    SandpitError::Backend {
        message: "Status code 410 is not ok: sandbox_stopped".to_string(),
        status: Some(410),
    }
}

#[derive(Clone, Default)]
pub(crate) struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn push_response(&self, response: Result<CommandOutput>) {
        self.state().responses.push_back(response);
    }

    /// Count of calls that would reach the remote service.
    pub fn remote_calls(&self) -> usize {
        let state = self.state();
        state.creates + state.commands.len() + state.bulk_writes + state.stops
    }
}

#[async_trait]
impl SandboxBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            bulk_writes: true,
            deferred_output: false,
        }
    }

    async fn create(&self, request: &CreateSandboxRequest) -> Result<Box<dyn SandboxHandle>> {
        let delay = self.state().create_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        state.creates += 1;
        state.last_create = Some(request.clone());
        if state.fail_create {
            return Err(SandpitError::Backend {
                message: "Status code 403 is not ok: missing credentials".to_string(),
                status: Some(403),
            });
        }
        Ok(Box::new(FakeHandle {
            id: format!("fake-{}", state.creates),
            state: self.state.clone(),
        }))
    }
}

struct FakeHandle {
    id: String,
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl SandboxHandle for FakeHandle {
    fn sandbox_id(&self) -> &str {
        &self.id
    }

    fn workdir(&self) -> &str {
        "/vercel/sandbox"
    }

    fn domain(&self, port: u16) -> Result<String> {
        Ok(format!("https://{}-{}.sandbox.test", self.id, port))
    }

    async fn run_command(&self, request: CommandRequest) -> Result<CommandOutput> {
        let mut state = self.state.lock().unwrap();
        state.commands.push(request.clone());
        if state.expired {
            return Err(gone());
        }
        if let Some(response) = state.responses.pop_front() {
            return response;
        }

        let output = match request.cmd.as_str() {
            "echo" => CommandOutput::text(format!("{}\n", request.args.join(" ")), "", 0),
            "false" => CommandOutput::text("", "", 1),
            "cat" => match request.args.first().and_then(|p| state.files.get(p)) {
                Some(content) => CommandOutput::text(content.clone(), "", 0),
                None => CommandOutput::text("", "cat: No such file or directory", 1),
            },
            "sh" if state.listening && request.args.iter().any(|a| a.contains("grep :")) => {
                CommandOutput::text("tcp        0      0 0.0.0.0:5173      0.0.0.0:*      LISTEN\n", "", 0)
            }
            _ => CommandOutput::text("", "", 0),
        };
        Ok(output)
    }

    async fn write_files(&self, files: Vec<FileEntry>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.bulk_writes += 1;
        if state.expired {
            return Err(gone());
        }
        if state.fail_bulk_writes {
            return Err(SandpitError::Backend {
                message: "Status code 500 is not ok".to_string(),
                status: Some(500),
            });
        }
        for file in files {
            let content = String::from_utf8_lossy(&file.content).into_owned();
            state.files.insert(file.path, content);
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.stops += 1;
        if state.fail_stop {
            return Err(SandpitError::Backend {
                message: "Status code 500 is not ok".to_string(),
                status: Some(500),
            });
        }
        Ok(())
    }
}
