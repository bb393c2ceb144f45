use crate::error::GitError;
use std::io::Read;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Knobs shared by every git invocation.
#[derive(Debug, Clone)]
pub struct GitOptions {
    pub clone_timeout: Duration,
    pub network_timeout: Duration,
    pub local_timeout: Duration,
    pub author_name: String,
    pub author_email: String,
    /// Exported as `GIT_SSH_COMMAND` for ssh remotes.
    pub ssh_command: Option<String>,
}

impl Default for GitOptions {
    fn default() -> Self {
        Self {
            clone_timeout: Duration::from_secs(300),
            network_timeout: Duration::from_secs(120),
            local_timeout: Duration::from_secs(30),
            author_name: "Night Agent".to_string(),
            author_email: "agent@nightagent.local".to_string(),
            ssh_command: None,
        }
    }
}

#[derive(Debug)]
pub struct GitOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Runs `git` with the configured identity, killing it once `timeout`
/// elapses. Only the subcommand name is ever logged or put in errors, since
/// arguments may carry credentialed URLs.
pub fn run(
    options: &GitOptions,
    dir: Option<&Path>,
    args: &[&str],
    timeout: Duration,
) -> Result<GitOutput, GitError> {
    let label = args.first().copied().unwrap_or("git").to_string();
    let mut command = Command::new("git");
    command
        .arg("-c")
        .arg(format!("user.name={}", options.author_name))
        .arg("-c")
        .arg(format!("user.email={}", options.author_email))
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = dir {
        command.current_dir(dir);
    }
    if let Some(ssh) = &options.ssh_command {
        command.env("GIT_SSH_COMMAND", ssh);
    }

    tracing::debug!(command = %label, dir = ?dir, "running git");
    let mut child = command.spawn().map_err(|err| GitError::Spawn {
        reason: err.to_string(),
    })?;

    // Drain pipes on their own threads so a chatty child never blocks on a
    // full pipe while we poll for exit.
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_reader = thread::spawn(move || drain(stdout));
    let stderr_reader = thread::spawn(move || drain(stderr));

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            tracing::warn!(command = %label, secs = timeout.as_secs(), "git timed out");
            return Err(GitError::Timeout {
                command: label,
                secs: timeout.as_secs(),
            });
        }
        thread::sleep(POLL_INTERVAL);
    };

    Ok(GitOutput {
        status,
        stdout: stdout_reader.join().unwrap_or_default(),
        stderr: stderr_reader.join().unwrap_or_default(),
    })
}

/// Like [`run`] but turns a non-zero exit into [`GitError::CommandFailed`].
pub fn run_ok(
    options: &GitOptions,
    dir: Option<&Path>,
    args: &[&str],
    timeout: Duration,
) -> Result<String, GitError> {
    let output = run(options, dir, args, timeout)?;
    if output.success() {
        return Ok(output.stdout);
    }
    Err(GitError::CommandFailed {
        command: args.first().copied().unwrap_or("git").to_string(),
        stderr: output.stderr.trim().to_string(),
    })
}

fn drain<R: Read>(pipe: Option<R>) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}
