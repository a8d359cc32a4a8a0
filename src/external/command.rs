//! External command callable
//!
//! Runs one program per task. Keyword arguments are exported as environment variables and
//! positional arguments are appended to the command line. The captured stdout is the task's value.

use anyhow::{Context, Result, bail};
use serde_json::Value;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::parallel::{Arguments, Callable, TaskContext};

/// Qualified name of the built-in command callable
pub const SHELL_EXEC: &str = "shell.exec";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct ShellCommand {
    name: String,
    program: String,
    args: Vec<String>,
}

impl ShellCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: SHELL_EXEC.to_string(),
            program: program.into(),
            args,
        }
    }

    /// Build from a full command line, program first
    pub fn from_argv(argv: &[String]) -> Result<Self> {
        match argv.split_first() {
            Some((program, args)) => Ok(Self::new(program.clone(), args.to_vec())),
            None => bail!("No command given"),
        }
    }

    /// Register under a different qualified name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Full command line for one task
    pub fn command_line(&self, args: &Arguments) -> Vec<String> {
        let mut line = vec![self.program.clone()];
        line.extend(self.args.iter().cloned());
        if let Arguments::Positional(values) = args {
            line.extend(values.iter().map(render_value));
        }
        line
    }

    fn build(&self, args: &Arguments) -> Command {
        let line = self.command_line(args);
        let mut cmd = Command::new(&line[0]);
        cmd.args(&line[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Arguments::Keyword(values) = args {
            for (key, value) in values {
                cmd.env(key, render_value(value));
            }
        }
        cmd
    }
}

impl Callable for ShellCommand {
    fn qualified_name(&self) -> &str {
        &self.name
    }

    fn call(&self, ctx: &TaskContext, args: &Arguments) -> Result<Value> {
        tracing::debug!(
            "Task {} on {}: {}",
            ctx.index(),
            ctx.worker_name(),
            self.command_line(args).join(" ")
        );

        let mut child = self
            .build(args)
            .spawn()
            .with_context(|| format!("Failed to start `{}`", self.program))?;

        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let status = wait_or_cancel(&mut child, ctx)?;
        let stdout = collect(stdout)?;
        let stderr = collect(stderr)?;

        if !status.success() {
            bail!(
                "`{}` exited with {}: {}",
                self.program,
                status,
                stderr.trim()
            );
        }

        Ok(Value::String(stdout))
    }
}

/// Strings are passed through unquoted, everything else as JSON
fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn wait_or_cancel(child: &mut Child, ctx: &TaskContext) -> Result<ExitStatus> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }

        if ctx.is_cancelled() {
            tracing::debug!("Killing task {} after the batch deadline", ctx.index());
            child.kill().ok();
            child.wait().ok();
            bail!("Cancelled after the batch deadline");
        }

        thread::sleep(POLL_INTERVAL);
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<std::io::Result<String>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    })
}

fn collect(reader: Option<JoinHandle<std::io::Result<String>>>) -> Result<String> {
    match reader {
        Some(handle) => match handle.join() {
            Ok(output) => Ok(output.context("Failed to read command output")?),
            Err(_) => bail!("Output reader thread panicked"),
        },
        None => Ok(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    fn ctx() -> TaskContext {
        TaskContext::new(0, "test-worker-0", Arc::new(AtomicBool::new(false)))
    }

    fn sh(script: &str) -> ShellCommand {
        ShellCommand::new("sh", vec!["-c".to_string(), script.to_string(), "sh".to_string()])
    }

    #[test]
    fn test_command_line_appends_positional() {
        let cmd = ShellCommand::new("echo", vec!["-n".to_string()]);
        let args = Arguments::Positional(vec![json!("a b"), json!(2)]);
        assert_eq!(cmd.command_line(&args), vec!["echo", "-n", "a b", "2"]);
    }

    #[test]
    fn test_from_argv_requires_program() {
        assert!(ShellCommand::from_argv(&[]).is_err());
        let cmd = ShellCommand::from_argv(&["ls".to_string(), "-l".to_string()]).unwrap();
        assert_eq!(cmd.program(), "ls");
        assert_eq!(cmd.qualified_name(), SHELL_EXEC);
    }

    #[cfg(unix)]
    #[test]
    fn test_positional_arguments_reach_the_program() {
        let value = sh("echo \"$1-$2\"")
            .call(&ctx(), &Arguments::Positional(vec![json!("x"), json!(3)]))
            .unwrap();
        assert_eq!(value, json!("x-3\n"));
    }

    #[cfg(unix)]
    #[test]
    fn test_keyword_arguments_become_environment() {
        let mut map = Map::new();
        map.insert("FANOUT_TEST_NAME".to_string(), json!("world"));
        let value = sh("printf 'hello %s' \"$FANOUT_TEST_NAME\"")
            .call(&ctx(), &Arguments::Keyword(map))
            .unwrap();
        assert_eq!(value, json!("hello world"));
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_includes_stderr() {
        let err = sh("echo broken >&2; exit 3")
            .call(&ctx(), &Arguments::None)
            .unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("broken"), "{message}");
    }

    #[cfg(unix)]
    #[test]
    fn test_cancelled_task_is_killed() {
        let cancelled = Arc::new(AtomicBool::new(true));
        let ctx = TaskContext::new(0, "test-worker-0", cancelled);
        let err = sh("sleep 5").call(&ctx, &Arguments::None).unwrap_err();
        assert!(err.to_string().contains("Cancelled"));
    }
}
