// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! External tool invocation.

use std::io;
use std::process::{Command, Stdio};

/// Captured result of running a tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// The most useful text to show when the tool failed.
    pub fn failure_message(&self) -> String {
        [self.stderr.trim(), self.stdout.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
            .unwrap_or("unknown error")
            .to_string()
    }
}

/// Runs external programs. Swapped for a scripted fake in tests.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput>;
}

/// Spawns real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
        log::debug!("exec: {program} {}", args.join(" "));
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::Mutex;

    /// Replies to commands from a script and records every invocation.
    ///
    /// A rule matches when the joined command line starts with its prefix;
    /// the last matching rule wins so tests can override earlier replies.
    #[derive(Default)]
    pub struct ScriptedRunner {
        rules: Mutex<Vec<(String, Option<CommandOutput>)>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn ok(&self, prefix: &str, stdout: &str) {
            self.push(
                prefix,
                Some(CommandOutput {
                    success: true,
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                }),
            );
        }

        pub fn fail(&self, prefix: &str, stderr: &str) {
            self.push(
                prefix,
                Some(CommandOutput {
                    success: false,
                    stdout: String::new(),
                    stderr: stderr.to_string(),
                }),
            );
        }

        /// Make the program look uninstalled.
        pub fn missing(&self, prefix: &str) {
            self.push(prefix, None);
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn push(&self, prefix: &str, reply: Option<CommandOutput>) {
            self.rules.lock().unwrap().push((prefix.to_string(), reply));
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
            let line = std::iter::once(program)
                .chain(args.iter().copied())
                .collect::<Vec<_>>()
                .join(" ");
            self.calls.lock().unwrap().push(line.clone());

            let rules = self.rules.lock().unwrap();
            match rules.iter().rev().find(|(prefix, _)| line.starts_with(prefix)) {
                Some((_, Some(reply))) => Ok(reply.clone()),
                Some((_, None)) | None => Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{program}: not found"),
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_message_prefers_stderr() {
        let out = CommandOutput {
            success: false,
            stdout: "usage".into(),
            stderr: "permission denied\n".into(),
        };
        assert_eq!(out.failure_message(), "permission denied");
        assert_eq!(CommandOutput::default().failure_message(), "unknown error");
    }
}
