use crate::prelude::*;
use crate::{err, Result};
use std::process::{ExitStatus, Stdio};
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum ProcessError {
    #[error("Couldn't run program that contains a nul byte: {program:?} {args:?}")]
    NulByte { program: String, args: Vec<String> },

    #[error("Failed to run `{cmd}`")]
    Spawn {
        cmd: String,
        source: std::io::Error,
    },

    #[error("`{cmd}` failed with {status}{}", display_stderr(.stderr))]
    Failed {
        cmd: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("Bad output of `{cmd}` (invalid JSON):\n{output}")]
    Json {
        cmd: String,
        output: String,
        source: serde_json::Error,
    },
}

fn display_stderr(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        return String::new();
    }
    format!(":\n{stderr}")
}

/// Runs the program to completion and returns its stdout. The child process
/// is killed if the returned future is dropped before completion.
pub(crate) async fn run(program: &str, args: &[&str]) -> Result<Vec<u8>> {
    let display_args = shlex::try_join(args.iter().copied()).map_err(|_| {
        err!(ProcessError::NulByte {
            program: program.to_owned(),
            args: args.iter().map(|&arg| arg.to_owned()).collect::<Vec<_>>(),
        })
    })?;

    let cmd = format!("{program} {display_args}");
    debug!(%cmd, "Running program");

    let output = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| {
            err!(ProcessError::Spawn {
                cmd: cmd.clone(),
                source,
            })
        })?;

    let status = output.status;

    if !status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        return Err(err!(ProcessError::Failed {
            cmd,
            status,
            stderr,
        }));
    }

    Ok(output.stdout)
}

pub(crate) async fn run_json<T: serde::de::DeserializeOwned>(
    program: &str,
    args: &[&str],
) -> Result<T> {
    let output = run(program, args).await?;
    let output = String::from_utf8_lossy(&output);

    serde_json::from_str(&output).map_err(|source| {
        err!(ProcessError::Json {
            cmd: format!("{program} {}", args.join(" ")),
            output: output.into_owned(),
            source,
        })
    })
}
