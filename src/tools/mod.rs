// nachweisbackup/src/tools/mod.rs
//! Thin driver around the external utilities the engine shells out to.
//!
//! Programs are located with `which` before spawning so a missing binary is
//! reported as [`BackupError::ToolMissing`] instead of a generic spawn error.

pub(crate) mod pipeline;

use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use which::which;

use crate::config::{DatasourceConfig, ToolSettings};
use crate::errors::{BackupError, Phase, Result};

pub use pipeline::{pipe, run, Sink};

/// Environment variable libpq reads the password from.
const PASSWORD_ENV: &str = "PGPASSWORD";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Dumper,
    Compressor,
    Decompressor,
    Restorer,
    Packer,
    Unpacker,
}

#[derive(Debug, Clone)]
pub struct ToolSet {
    settings: ToolSettings,
}

impl ToolSet {
    pub fn new(settings: ToolSettings) -> Self {
        Self { settings }
    }

    fn program(&self, tool: Tool) -> &str {
        match tool {
            Tool::Dumper => &self.settings.pg_dump,
            Tool::Compressor | Tool::Decompressor => &self.settings.gzip,
            Tool::Restorer => &self.settings.psql,
            Tool::Packer | Tool::Unpacker => &self.settings.tar,
        }
    }

    /// Finds the executable for `tool` in PATH (or at its configured absolute path).
    pub fn locate(&self, tool: Tool, phase: Phase) -> Result<PathBuf> {
        let program = self.program(tool);
        which(program).map_err(|_| BackupError::ToolMissing {
            phase,
            tool: program.to_string(),
        })
    }

    /// Starts building an invocation of `tool` attributed to `phase`.
    pub fn invocation(&self, tool: Tool, phase: Phase) -> Result<Invocation> {
        let program = self.locate(tool, phase)?;
        Ok(Invocation {
            label: self.program(tool).to_string(),
            program,
            args: Vec::new(),
            envs: Vec::new(),
            phase,
        })
    }
}

/// One external command: program, arguments, extra environment and the phase
/// its failures are reported under.
#[derive(Debug, Clone)]
pub struct Invocation {
    label: String,
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    phase: Phase,
}

impl Invocation {
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    /// Adds `-h/-p/-U` connection arguments and hands the password over via
    /// `PGPASSWORD`, never on the command line.
    pub fn connect_to(self, datasource: &DatasourceConfig, database: &str) -> Self {
        let mut invocation = self.arg("-h").arg(&datasource.host);
        if let Some(port) = datasource.port {
            invocation = invocation.arg("-p").arg(port.to_string());
        }
        invocation
            .arg("-U")
            .arg(&datasource.username)
            .arg("-d")
            .arg(database)
            .env(PASSWORD_ENV, &datasource.password)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Program and arguments for log lines. Environment values are left out.
    pub fn describe(&self) -> String {
        let mut rendered = self.label.clone();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(&arg.to_string_lossy());
        }
        rendered
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }

    fn spawn_error(&self, err: std::io::Error) -> BackupError {
        if err.kind() == std::io::ErrorKind::NotFound {
            BackupError::ToolMissing {
                phase: self.phase,
                tool: self.label.clone(),
            }
        } else {
            BackupError::io(Some(self.phase), format!("failed to spawn {}", self.label), err)
        }
    }
}
