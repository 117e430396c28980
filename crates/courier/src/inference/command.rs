use std::io::{ErrorKind, Write};
use std::process::{Command, Stdio};
use serde_json::{Map, Value};
use super::{InferenceAdapter, InferenceError};

/// Runs an external program once per request.
///
/// The request's `data` object is written to the program's stdin as JSON and
/// its stdout is parsed as the reply's `result`. A non-zero exit status is an
/// inference failure carrying whatever the program wrote to stderr.
#[derive(Debug, Clone)]
pub struct CommandAdapter {
    program: String,
    args: Vec<String>,
}

impl CommandAdapter {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl InferenceAdapter for CommandAdapter {
    fn infer(&self, data: &Map<String, Value>) -> Result<Value, InferenceError> {
        let input = serde_json::to_vec(data)?;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("failed to start {}: {e}", self.program))?;

        // Feed stdin from its own thread so a chatty program cannot deadlock
        // against a full stdout pipe.
        let stdin = child.stdin.take();
        let writer = std::thread::spawn(move || -> std::io::Result<()> {
            if let Some(mut stdin) = stdin {
                match stdin.write_all(&input) {
                    Err(e) if e.kind() == ErrorKind::BrokenPipe => {}
                    other => other?,
                }
            }
            Ok(())
        });

        let output = child.wait_with_output()?;
        writer.join().map_err(|_| "stdin writer panicked")??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("{} exited with {}: {}", self.program, output.status, stderr.trim()).into());
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|e| format!("{} wrote invalid JSON: {e}", self.program).into())
    }
}
