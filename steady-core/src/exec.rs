//! Command-execution boundary.
//!
//! Every external tool (process listing, version control, build, signal
//! delivery) is a shell script run through [`CommandRunner::run`], which blocks
//! until the tool exits. [`CommandRunner::spawn_detached`] is the one
//! non-blocking entry point: it starts a process in its own process group and
//! returns as soon as the child exists.

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

use crate::error::{ExecError, IdentityError};
use crate::identity::InstanceIdentity;
use crate::types::ProcessId;

/// A script for `sh -c`, optionally run inside a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub script: String,
    pub cwd: Option<PathBuf>,
}

impl ShellCommand {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            cwd: None,
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

/// Captured result of a finished external tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the tool was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn status(&self) -> String {
        match self.code {
            Some(code) => format!("exit status {code}"),
            None => "signal".to_string(),
        }
    }

    /// Turn a failed run into [`ExecError::Failed`] carrying the raw output.
    pub fn into_failure(self, command: &ShellCommand) -> ExecError {
        let output = format!("{} {}", self.stdout.trim(), self.stderr.trim())
            .trim()
            .to_string();
        ExecError::Failed {
            command: command.script.clone(),
            status: self.status(),
            output,
        }
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Where a detached process writes stdout and stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnOutput {
    /// Share the caller's descriptors.
    Inherit,
    /// Append both streams to a file, creating it if needed.
    AppendTo(PathBuf),
}

/// Everything needed to start a detached process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub program: PathBuf,
    /// `argv[0]` as the child sees it; defaults to `program`.
    pub arg0: Option<OsString>,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    pub output: SpawnOutput,
    pub env: Vec<(String, String)>,
}

/// The boundary every external tool is reached through.
pub trait CommandRunner: Send + Sync {
    /// Run a script to completion and capture its output.
    fn run(&self, command: &ShellCommand) -> Result<CommandOutput, ExecError>;

    /// Start a process detached from the caller and return its pid without
    /// waiting for it.
    fn spawn_detached(&self, request: &SpawnRequest) -> Result<ProcessId, ExecError>;
}

/// [`CommandRunner`] backed by `std::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, command: &ShellCommand) -> Result<CommandOutput, ExecError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&command.script).stdin(Stdio::null());
        if let Some(dir) = &command.cwd {
            cmd.current_dir(dir);
        }

        tracing::debug!(script = %command.script, cwd = ?command.cwd, "running external command");
        let output = cmd.output().map_err(|source| ExecError::Spawn {
            command: command.script.clone(),
            source,
        })?;
        Ok(CommandOutput::from(output))
    }

    fn spawn_detached(&self, request: &SpawnRequest) -> Result<ProcessId, ExecError> {
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args).stdin(Stdio::null());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            if let Some(arg0) = &request.arg0 {
                cmd.arg0(arg0);
            }
            cmd.process_group(0);
        }

        if let Some(dir) = &request.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        if let SpawnOutput::AppendTo(path) = &request.output {
            let open_err = |source| ExecError::Output {
                path: path.clone(),
                source,
            };
            let stdout = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(open_err)?;
            let stderr = stdout.try_clone().map_err(open_err)?;
            cmd.stdout(stdout).stderr(stderr);
        }

        tracing::debug!(program = %request.program.display(), args = ?request.args, "spawning detached process");
        let child = cmd.spawn().map_err(|source| ExecError::Spawn {
            command: request.program.display().to_string(),
            source,
        })?;
        Ok(ProcessId(child.id()))
    }
}

/// Fill a command template.
///
/// `{program}` and `{exec_dir}` are shell-quoted; `vars` are substituted as
/// given and must already be shell-safe (pid lists, signal names).
pub fn render_command(
    template: &str,
    identity: &InstanceIdentity,
    vars: &[(&str, &str)],
) -> Result<String, IdentityError> {
    let mut rendered = template.replace("{program}", &shell_quote(identity.program()));
    if rendered.contains("{exec_dir}") {
        let dir = identity.exec_dir()?.to_string_lossy().into_owned();
        rendered = rendered.replace("{exec_dir}", &shell_quote(&dir));
    }
    for (key, value) in vars {
        rendered = rendered.replace(&format!("{{{key}}}"), value);
    }
    Ok(rendered)
}

/// Quote `value` for `sh` unless it only holds characters the shell leaves alone.
pub fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '+' | ','));
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    //! Scripted [`CommandRunner`] for tests: canned outputs keyed by a
    //! substring of the script, and a record of everything run or spawned.

    use std::sync::Mutex;

    use super::*;

    enum Reply {
        Output(CommandOutput),
        SpawnFailure(String),
    }

    #[derive(Default)]
    pub struct ScriptedRunner {
        rules: Vec<(String, Reply)>,
        fail_spawns: bool,
        ran: Mutex<Vec<ShellCommand>>,
        spawned: Mutex<Vec<SpawnRequest>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Scripts containing `needle` produce `output`. First match wins;
        /// unmatched scripts succeed with empty output.
        pub fn on(mut self, needle: &str, output: CommandOutput) -> Self {
            self.rules.push((needle.to_string(), Reply::Output(output)));
            self
        }

        /// Scripts containing `needle` cannot be started.
        pub fn on_spawn_error(mut self, needle: &str, message: &str) -> Self {
            self.rules
                .push((needle.to_string(), Reply::SpawnFailure(message.to_string())));
            self
        }

        /// Every `spawn_detached` call fails.
        pub fn failing_spawns(mut self) -> Self {
            self.fail_spawns = true;
            self
        }

        pub fn commands(&self) -> Vec<ShellCommand> {
            self.ran.lock().map(|ran| ran.clone()).unwrap_or_default()
        }

        pub fn scripts(&self) -> Vec<String> {
            self.commands().into_iter().map(|c| c.script).collect()
        }

        /// Scripts run so far that contain `needle`.
        pub fn ran_matching(&self, needle: &str) -> Vec<String> {
            self.scripts()
                .into_iter()
                .filter(|script| script.contains(needle))
                .collect()
        }

        pub fn spawned(&self) -> Vec<SpawnRequest> {
            self.spawned.lock().map(|s| s.clone()).unwrap_or_default()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, command: &ShellCommand) -> Result<CommandOutput, ExecError> {
            if let Ok(mut ran) = self.ran.lock() {
                ran.push(command.clone());
            }
            let reply = self
                .rules
                .iter()
                .find(|(needle, _)| command.script.contains(needle.as_str()));
            match reply {
                Some((_, Reply::Output(output))) => Ok(output.clone()),
                Some((_, Reply::SpawnFailure(message))) => Err(ExecError::Spawn {
                    command: command.script.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, message.clone()),
                }),
                None => Ok(CommandOutput::ok("")),
            }
        }

        fn spawn_detached(&self, request: &SpawnRequest) -> Result<ProcessId, ExecError> {
            if self.fail_spawns {
                return Err(ExecError::Spawn {
                    command: request.program.display().to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
                });
            }
            let mut spawned = self.spawned.lock().map_err(|_| ExecError::Spawn {
                command: request.program.display().to_string(),
                source: std::io::Error::other("spawn log poisoned"),
            })?;
            spawned.push(request.clone());
            Ok(ProcessId(50_000 + spawned.len() as u32))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn identity(dir: &str) -> InstanceIdentity {
        InstanceIdentity::new(
            Some(PathBuf::from(dir)),
            "worker",
            ProcessId(10),
            vec!["./worker".into()],
        )
    }

    #[test]
    fn render_substitutes_program_dir_and_vars() {
        let rendered = render_command(
            "kill -{signal} {pids} # {program} in {exec_dir}",
            &identity("/srv/app"),
            &[("signal", "HUP"), ("pids", "11 12")],
        )
        .unwrap();
        assert_eq!(rendered, "kill -HUP 11 12 # worker in /srv/app");
    }

    #[test]
    fn render_quotes_directories_with_spaces() {
        let rendered = render_command("cd {exec_dir}", &identity("/srv/my app"), &[]).unwrap();
        assert_eq!(rendered, "cd '/srv/my app'");
    }

    #[test]
    fn render_needs_exec_dir_only_when_referenced() {
        let unresolved = InstanceIdentity::new(None, "worker", ProcessId(10), vec![]);
        assert_eq!(
            render_command("pidof {program}", &unresolved, &[]).unwrap(),
            "pidof worker"
        );
        assert!(render_command("ls {exec_dir}", &unresolved, &[]).is_err());
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("plain-name_1.2"), "plain-name_1.2");
    }

    #[test]
    fn system_runner_captures_output_and_status() {
        let output = SystemRunner
            .run(&ShellCommand::new("echo out; echo err >&2; exit 3"))
            .unwrap();
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert!(!output.success());
    }

    #[test]
    fn system_runner_honours_working_directory() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let output = SystemRunner
            .run(&ShellCommand::new("pwd").in_dir(dir.path()))
            .unwrap();
        let reported = std::fs::canonicalize(output.stdout.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn spawn_of_missing_program_is_an_error() {
        let request = SpawnRequest {
            program: Path::new("/nonexistent/steady-test-binary").to_path_buf(),
            arg0: None,
            args: vec![],
            cwd: None,
            output: SpawnOutput::Inherit,
            env: vec![],
        };
        let err = SystemRunner.spawn_detached(&request).unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }), "got: {err}");
    }

    #[test]
    fn failure_carries_raw_output() {
        let command = ShellCommand::new("git pull");
        let err = CommandOutput::failed(1, "", "fatal: not a git repository\n").into_failure(&command);
        let msg = err.to_string();
        assert!(msg.contains("git pull"), "got: {msg}");
        assert!(msg.contains("exit status 1"), "got: {msg}");
        assert!(msg.contains("fatal: not a git repository"), "got: {msg}");
    }
}
