//! External-command detector
//!
//! Runs a user-supplied program once per frame with the encoded image on
//! stdin. Exit status 0 means the subject is present, 1 means absent.

use crate::recorder::collaborators::Detector;
use crate::utils::error::{AppError, AppResult};
use std::io::{ErrorKind, Write};
use std::process::{Command, Stdio};

/// Detector backed by an external program
#[derive(Debug, Clone)]
pub struct CommandDetector {
    program: String,
    args: Vec<String>,
}

impl CommandDetector {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a whitespace-separated command line
    pub fn parse(command_line: &str) -> AppResult<Self> {
        let mut parts = command_line.split_whitespace().map(String::from);
        let program = parts
            .next()
            .ok_or_else(|| AppError::Config("detector command is empty".to_string()))?;
        Ok(Self::new(program, parts.collect()))
    }
}

impl Detector for CommandDetector {
    fn classify(&self, image: &[u8]) -> AppResult<bool> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AppError::Detector(format!("Failed to start {}: {}", self.program, e)))?;

        // Feed stdin from its own thread while stderr is collected
        let stdin = child.stdin.take();
        let (written, output) = std::thread::scope(|scope| {
            let writer = scope.spawn(move || match stdin {
                Some(mut stdin) => stdin.write_all(image),
                None => Ok(()),
            });
            let output = child.wait_with_output();
            (writer.join(), output)
        });

        let output = output
            .map_err(|e| AppError::Detector(format!("Failed to wait for {}: {}", self.program, e)))?;
        match written {
            Ok(Ok(())) => {}
            // The program may decide without reading everything
            Ok(Err(e)) if e.kind() == ErrorKind::BrokenPipe => {}
            Ok(Err(e)) => return Err(AppError::Detector(format!("Failed to send image: {}", e))),
            Err(_) => {
                return Err(AppError::Detector(
                    "stdin writer thread panicked".to_string(),
                ))
            }
        }

        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(AppError::Detector(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }
}
