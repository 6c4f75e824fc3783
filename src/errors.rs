// nachweisbackup/src/errors.rs
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Step of a backup or restore run. Every failure report names the phase it happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Dump,
    Compress,
    Pack,
    Unpack,
    Restore,
    Drop,
    Swap,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Dump => "dump",
            Phase::Compress => "compress",
            Phase::Pack => "pack",
            Phase::Unpack => "unpack",
            Phase::Restore => "restore",
            Phase::Drop => "drop",
            Phase::Swap => "swap",
        };
        f.write_str(name)
    }
}

/// Terminal failure kinds as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    ConfigInvalid,
    ToolMissing,
    DumpFailed,
    CompressFailed,
    PackFailed,
    UnpackFailed,
    RestoreFailed,
    NotFound,
    CorruptArchive,
    Collision,
    Busy,
    IoError,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::ConfigInvalid => "CONFIG_INVALID",
            FailureKind::ToolMissing => "TOOL_MISSING",
            FailureKind::DumpFailed => "DUMP_FAILED",
            FailureKind::CompressFailed => "COMPRESS_FAILED",
            FailureKind::PackFailed => "PACK_FAILED",
            FailureKind::UnpackFailed => "UNPACK_FAILED",
            FailureKind::RestoreFailed => "RESTORE_FAILED",
            FailureKind::NotFound => "NOT_FOUND",
            FailureKind::CorruptArchive => "CORRUPT_ARCHIVE",
            FailureKind::Collision => "COLLISION",
            FailureKind::Busy => "BUSY",
            FailureKind::IoError => "IO_ERROR",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    ConfigInvalid(String),

    #[error("{phase}: required tool `{tool}` not found in PATH")]
    ToolMissing { phase: Phase, tool: String },

    /// A spawned utility exited non-zero or its pipe broke.
    #[error("{phase} failed: {detail}")]
    StepFailed { phase: Phase, detail: String },

    #[error("Backup not found: {0}")]
    NotFound(String),

    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("Archive name collision: {0}")]
    Collision(String),

    #[error("Another backup or restore is already running in {}", .0.display())]
    Busy(PathBuf),

    #[error("I/O error{}: {context}: {source}", in_phase(.phase))]
    Io {
        phase: Option<Phase>,
        context: String,
        #[source]
        source: std::io::Error,
    },
}

fn in_phase(phase: &Option<Phase>) -> String {
    phase.map(|p| format!(" during {}", p)).unwrap_or_default()
}

impl BackupError {
    pub fn step(phase: Phase, detail: impl Into<String>) -> Self {
        BackupError::StepFailed {
            phase,
            detail: detail.into(),
        }
    }

    pub fn io(phase: Option<Phase>, context: impl Into<String>, source: std::io::Error) -> Self {
        BackupError::Io {
            phase,
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            BackupError::ConfigInvalid(_) => FailureKind::ConfigInvalid,
            BackupError::ToolMissing { .. } => FailureKind::ToolMissing,
            BackupError::StepFailed { phase, .. } => match phase {
                Phase::Dump => FailureKind::DumpFailed,
                Phase::Compress => FailureKind::CompressFailed,
                Phase::Pack => FailureKind::PackFailed,
                Phase::Unpack => FailureKind::UnpackFailed,
                Phase::Restore | Phase::Drop => FailureKind::RestoreFailed,
                Phase::Swap => FailureKind::IoError,
            },
            BackupError::NotFound(_) => FailureKind::NotFound,
            BackupError::CorruptArchive(_) => FailureKind::CorruptArchive,
            BackupError::Collision(_) => FailureKind::Collision,
            BackupError::Busy(_) => FailureKind::Busy,
            BackupError::Io { .. } => FailureKind::IoError,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            BackupError::ToolMissing { phase, .. } | BackupError::StepFailed { phase, .. } => {
                Some(*phase)
            }
            BackupError::CorruptArchive(_) => Some(Phase::Unpack),
            BackupError::Collision(_) => Some(Phase::Pack),
            BackupError::Io { phase, .. } => *phase,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_failures_map_to_phase_kinds() {
        assert_eq!(BackupError::step(Phase::Dump, "x").kind(), FailureKind::DumpFailed);
        assert_eq!(BackupError::step(Phase::Compress, "x").kind(), FailureKind::CompressFailed);
        assert_eq!(BackupError::step(Phase::Pack, "x").kind(), FailureKind::PackFailed);
        assert_eq!(BackupError::step(Phase::Unpack, "x").kind(), FailureKind::UnpackFailed);
        assert_eq!(BackupError::step(Phase::Restore, "x").kind(), FailureKind::RestoreFailed);
        assert_eq!(BackupError::step(Phase::Swap, "x").kind(), FailureKind::IoError);
    }

    #[test]
    fn test_display_includes_phase() {
        let err = BackupError::io(
            Some(Phase::Swap),
            "copy uploads",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.to_string(), "I/O error during swap: copy uploads: denied");
        assert_eq!(err.phase(), Some(Phase::Swap));

        let err = BackupError::ToolMissing {
            phase: Phase::Dump,
            tool: "pg_dump".to_string(),
        };
        assert_eq!(err.to_string(), "dump: required tool `pg_dump` not found in PATH");
    }

    #[test]
    fn test_kind_serializes_screaming_snake_case() -> anyhow::Result<()> {
        assert_eq!(serde_json::to_string(&FailureKind::ToolMissing)?, "\"TOOL_MISSING\"");
        assert_eq!(serde_json::to_string(&Phase::Swap)?, "\"swap\"");
        assert_eq!(FailureKind::CorruptArchive.to_string(), "CORRUPT_ARCHIVE");
        Ok(())
    }
}
