// nachweisbackup/src/tools/pipeline.rs
use std::fs::File;
use std::process::{ExitStatus, Stdio};

use tokio::io::AsyncReadExt;
use tokio::process::ChildStderr;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::Invocation;
use crate::errors::{BackupError, Result};

/// Where the consumer of a pipe writes its stdout.
#[derive(Debug)]
pub enum Sink {
    File(File),
    Discard,
}

/// Runs a single utility to completion. Non-zero exit is a failure of its phase.
pub async fn run(invocation: &Invocation) -> Result<()> {
    debug!(command = %invocation.describe(), "running");

    let output = invocation
        .command()
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| invocation.spawn_error(e))?;

    if !output.status.success() {
        return Err(exit_failure(
            invocation,
            output.status,
            &String::from_utf8_lossy(&output.stderr),
        ));
    }
    Ok(())
}

/// Runs `producer | consumer`.
///
/// The producer's stdout is copied into the consumer's stdin on a separate task;
/// the consumer's stdin is closed once the producer reaches EOF. Both children
/// are awaited before returning and are killed if this future is dropped early.
/// Returns the number of bytes moved through the pipe.
pub async fn pipe(producer: &Invocation, consumer: &Invocation, sink: Sink) -> Result<u64> {
    debug!(
        producer = %producer.describe(),
        consumer = %consumer.describe(),
        "starting pipeline"
    );

    let mut producer_child = producer
        .command()
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| producer.spawn_error(e))?;

    let consumer_stdout = match sink {
        Sink::File(file) => Stdio::from(file),
        Sink::Discard => Stdio::null(),
    };
    let mut consumer_child = match consumer
        .command()
        .stdin(Stdio::piped())
        .stdout(consumer_stdout)
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            if let Err(kill_err) = producer_child.kill().await {
                warn!(error = %kill_err, "failed to stop producer after consumer spawn failure");
            }
            return Err(consumer.spawn_error(e));
        }
    };

    let (Some(mut producer_out), Some(mut consumer_in)) =
        (producer_child.stdout.take(), consumer_child.stdin.take())
    else {
        return Err(BackupError::step(
            consumer.phase(),
            "pipe handles were not available after spawn",
        ));
    };

    let bridge = tokio::spawn(async move {
        // consumer_in is dropped when this task ends, which closes the consumer's stdin
        tokio::io::copy(&mut producer_out, &mut consumer_in).await
    });
    let producer_stderr = drain(producer_child.stderr.take());
    let consumer_stderr = drain(consumer_child.stderr.take());

    let consumer_status = consumer_child
        .wait()
        .await
        .map_err(|e| BackupError::io(Some(consumer.phase()), "waiting for consumer", e))?;
    let producer_status = producer_child
        .wait()
        .await
        .map_err(|e| BackupError::io(Some(producer.phase()), "waiting for producer", e))?;

    let bridged = bridge.await;
    let producer_stderr = producer_stderr.await.unwrap_or_default();
    let consumer_stderr = consumer_stderr.await.unwrap_or_default();

    if !consumer_status.success() {
        return Err(exit_failure(consumer, consumer_status, &consumer_stderr));
    }
    if !producer_status.success() {
        return Err(exit_failure(producer, producer_status, &producer_stderr));
    }

    match bridged {
        Ok(Ok(bytes)) => {
            debug!(bytes, "pipeline finished");
            Ok(bytes)
        }
        Ok(Err(e)) => Err(BackupError::io(
            Some(consumer.phase()),
            format!("piping {} into {}", producer.label, consumer.label),
            e,
        )),
        Err(join_err) => Err(BackupError::step(
            consumer.phase(),
            format!("pipe worker failed: {}", join_err),
        )),
    }
}

fn drain(stderr: Option<ChildStderr>) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut stderr) = stderr {
            if let Err(e) = stderr.read_to_end(&mut buf).await {
                debug!(error = %e, "stderr of child could not be read completely");
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn exit_failure(invocation: &Invocation, status: ExitStatus, stderr: &str) -> BackupError {
    let stderr = stderr.trim();
    let detail = if stderr.is_empty() {
        format!("`{}` exited with {}", invocation.label, status)
    } else {
        format!("`{}` exited with {}: {}", invocation.label, status, stderr)
    };
    BackupError::step(invocation.phase(), detail)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::ToolSettings;
    use crate::errors::{FailureKind, Phase};
    use crate::tools::{Tool, ToolSet};
    use crate::utils::testing::write_script;

    fn tools_with(pg_dump: &str, psql: &str) -> ToolSet {
        ToolSet::new(ToolSettings {
            pg_dump: pg_dump.to_string(),
            psql: psql.to_string(),
            ..ToolSettings::default()
        })
    }

    #[tokio::test]
    async fn test_pipe_streams_producer_into_consumer_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let dumper = write_script(dir.path(), "fake_dump", "printf 'SELECT 1;\\n'")?;
        let tools = tools_with(dumper.to_str().unwrap_or_default(), "psql");

        let out_path = dir.path().join("out.sql.gz");
        let producer = tools.invocation(Tool::Dumper, Phase::Dump)?;
        let consumer = tools.invocation(Tool::Compressor, Phase::Compress)?.arg("-c");
        let bytes = pipe(&producer, &consumer, Sink::File(File::create(&out_path)?)).await?;
        assert_eq!(bytes, 10);

        let mut decoded = String::new();
        std::io::Read::read_to_string(
            &mut flate2::read::GzDecoder::new(File::open(&out_path)?),
            &mut decoded,
        )?;
        assert_eq!(decoded, "SELECT 1;\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_producer_failure_is_reported_under_its_phase() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let dumper = write_script(dir.path(), "fake_dump", "echo 'connection refused' >&2\nexit 2")?;
        let tools = tools_with(dumper.to_str().unwrap_or_default(), "psql");

        let producer = tools.invocation(Tool::Dumper, Phase::Dump)?;
        let consumer = tools.invocation(Tool::Compressor, Phase::Compress)?.arg("-c");
        let err = pipe(&producer, &consumer, Sink::Discard).await.unwrap_err();

        assert_eq!(err.kind(), FailureKind::DumpFailed);
        assert!(err.to_string().contains("connection refused"));
        Ok(())
    }

    #[tokio::test]
    async fn test_consumer_failure_wins_over_producer() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let dumper = write_script(dir.path(), "fake_dump", "printf 'data'")?;
        let restorer = write_script(dir.path(), "fake_psql", "cat >/dev/null\nexit 3")?;
        let tools = tools_with(
            dumper.to_str().unwrap_or_default(),
            restorer.to_str().unwrap_or_default(),
        );

        let producer = tools.invocation(Tool::Dumper, Phase::Dump)?;
        let consumer = tools.invocation(Tool::Restorer, Phase::Restore)?;
        let err = pipe(&producer, &consumer, Sink::Discard).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::RestoreFailed);
        assert_eq!(err.phase(), Some(Phase::Restore));
        Ok(())
    }

    #[tokio::test]
    async fn test_run_reports_non_zero_exit() -> anyhow::Result<()> {
        let tools = ToolSet::new(ToolSettings::default());
        let packer = tools
            .invocation(Tool::Packer, Phase::Pack)?
            .arg("-czf")
            .arg("/nonexistent-dir/nachweis/out.tar.gz")
            .arg("missing-entry");
        let err = run(&packer).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::PackFailed);
        Ok(())
    }
}
