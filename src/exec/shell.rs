// src/exec/shell.rs

//! Shell command action.

use std::collections::BTreeMap;
use std::process::Stdio;

use anyhow::{anyhow, bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use super::action::{ActionContext, TaskAction};

/// Runs a command through the platform shell in the build root.
///
/// When the context is cancelled the child process is killed and the action
/// fails.
#[derive(Debug, Clone)]
pub struct ShellAction {
    cmd: String,
    env: BTreeMap<String, String>,
}

impl ShellAction {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    fn command(&self, ctx: &ActionContext) -> Command {
        // Build a shell command appropriate for the platform.
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&self.cmd);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&self.cmd);
            c
        };
        cmd.current_dir(ctx.root_dir())
            .envs(&self.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run_async(&self, ctx: &ActionContext) -> Result<()> {
        info!(task = %ctx.task, cmd = %self.cmd, "starting task process");

        let mut child = self
            .command(ctx)
            .spawn()
            .with_context(|| format!("spawning process for task '{}'", ctx.task))?;

        // Always consume output so pipe buffers don't fill.
        if let Some(stdout) = child.stdout.take() {
            let task = ctx.task.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(task = %task, "{}", line);
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let task = ctx.task.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(task = %task, "stderr: {}", line);
                }
            });
        }

        tokio::select! {
            status_res = child.wait() => {
                let status = status_res
                    .with_context(|| format!("waiting for process of task '{}'", ctx.task))?;
                let code = status.code().unwrap_or(-1);
                info!(task = %ctx.task, exit_code = code, success = status.success(), "task process exited");
                if !status.success() {
                    bail!("command `{}` exited with code {}", self.cmd, code);
                }
                Ok(())
            }
            _ = ctx.cancellation_token.cancelled() => {
                info!(task = %ctx.task, "cancellation requested; killing process");
                if let Err(e) = child.kill().await {
                    warn!(task = %ctx.task, error = %e, "failed to kill child process on cancellation");
                }
                Err(anyhow!("command `{}` was cancelled", self.cmd))
            }
        }
    }
}

impl TaskAction for ShellAction {
    fn run(&self, ctx: &ActionContext) -> Result<()> {
        let handle = Handle::try_current().context("shell actions need a Tokio runtime")?;
        handle.block_on(self.run_async(ctx))
    }

    fn identity(&self) -> String {
        let mut identity = format!("shell:{}", self.cmd);
        for (key, value) in &self.env {
            identity.push_str(&format!("\n{key}={value}"));
        }
        identity
    }
}
