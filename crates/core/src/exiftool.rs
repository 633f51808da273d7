//! `exiftool -stay_open` worker.
//!
//! One exiftool process serves every call. Each command is written to its
//! stdin as one argument per line and terminated with `-executeN`; exiftool
//! answers with `{readyN}` on stdout, and `-echo4` places the same marker on
//! stderr so both streams can be drained per command.

use crate::error::MetadataError;
use crate::metadata::{MetadataStore, WriteOptions, WriteReport};
use crate::reconcile::{TagSnapshot, WriteSet};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const DEFAULT_PROGRAM: &str = "exiftool";
const COMMAND_TIMEOUT: Duration = Duration::from_secs(120);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

struct Worker {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    stderr: BufReader<ChildStderr>,
}

struct CommandOutput {
    stdout: Vec<u8>,
    stderr: String,
}

pub struct ExifTool {
    program: String,
    worker: Mutex<Option<Worker>>,
    closed: AtomicBool,
    seq: AtomicU64,
}

impl ExifTool {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            worker: Mutex::new(None),
            closed: AtomicBool::new(false),
            seq: AtomicU64::new(0),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    async fn execute(&self, args: &[String]) -> Result<CommandOutput, MetadataError> {
        let mut guard = self.worker.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(MetadataError::ShutDown);
        }
        if guard.is_none() {
            *guard = Some(spawn_worker(&self.program)?);
        }
        let worker = guard.as_mut().ok_or(MetadataError::ShutDown)?;
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;

        let result = match tokio::time::timeout(COMMAND_TIMEOUT, worker.run(args, seq)).await {
            Ok(r) => r,
            Err(_) => Err(MetadataError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("exiftool did not answer within {}s", COMMAND_TIMEOUT.as_secs()),
            ))),
        };
        if let Err(e) = &result {
            // The stream position is unknown after a failure; start fresh next time.
            warn!(error = %e, "dropping exiftool worker");
            *guard = None;
        }
        result
    }
}

fn spawn_worker(program: &str) -> Result<Worker, MetadataError> {
    let mut child = Command::new(program)
        .args(["-stay_open", "True", "-@", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| MetadataError::Spawn {
            program: program.to_string(),
            source,
        })?;
    let missing = || std::io::Error::new(std::io::ErrorKind::BrokenPipe, "exiftool pipe missing");
    let stdin = child.stdin.take().ok_or_else(missing)?;
    let stdout = child.stdout.take().ok_or_else(missing)?;
    let stderr = child.stderr.take().ok_or_else(missing)?;
    debug!(program, pid = ?child.id(), "exiftool worker started");
    Ok(Worker {
        child,
        stdin,
        stdout: BufReader::new(stdout),
        stderr: BufReader::new(stderr),
    })
}

impl Worker {
    async fn run(&mut self, args: &[String], seq: u64) -> Result<CommandOutput, MetadataError> {
        let marker = format!("{{ready{}}}", seq);
        let mut payload = String::new();
        for arg in args {
            payload.push_str(arg);
            payload.push('\n');
        }
        payload.push_str(&format!("-echo4\n{}\n-execute{}\n", marker, seq));
        self.stdin.write_all(payload.as_bytes()).await?;
        self.stdin.flush().await?;

        let stdout = read_until_marker(&mut self.stdout, marker.as_bytes()).await?;
        let stderr = read_until_marker(&mut self.stderr, marker.as_bytes()).await?;
        Ok(CommandOutput {
            stdout,
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

/// Reads up to and including the line carrying `marker`; returns what came
/// before it. Binary output may share its last line with the marker.
async fn read_until_marker<R>(reader: &mut R, marker: &[u8]) -> Result<Vec<u8>, MetadataError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        let n = reader.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Err(MetadataError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "exiftool closed its output",
            )));
        }
        let line = trim_line_end(&buf);
        if line.ends_with(marker) {
            let end = line.len() - marker.len();
            buf.truncate(end);
            return Ok(buf);
        }
    }
}

fn trim_line_end(buf: &[u8]) -> &[u8] {
    let buf = buf.strip_suffix(b"\n").unwrap_or(buf);
    buf.strip_suffix(b"\r").unwrap_or(buf)
}

/// Values go on a single argument line, so line breaks become spaces.
pub fn sanitize_value(value: &str) -> String {
    value.replace("\r\n", " ").replace(['\r', '\n'], " ")
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn error_lines(stderr: &str) -> Vec<String> {
    stderr
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("Error"))
        .map(str::to_string)
        .collect()
}

pub(crate) fn parse_read_output(stdout: &[u8], stderr: &str) -> Result<TagSnapshot, MetadataError> {
    let text = String::from_utf8_lossy(stdout);
    if text.trim().is_empty() {
        let errors = error_lines(stderr);
        if errors.is_empty() {
            return Ok(TagSnapshot::new());
        }
        return Err(MetadataError::Read(errors.join("; ")));
    }
    let mut rows: Vec<serde_json::Map<String, serde_json::Value>> =
        serde_json::from_str(&text).map_err(|e| MetadataError::Read(e.to_string()))?;
    if rows.is_empty() {
        return Ok(TagSnapshot::new());
    }
    let mut row = rows.swap_remove(0);
    row.retain(|key, _| key.rsplit(':').next() != Some("SourceFile"));
    Ok(row.into_iter().collect())
}

pub(crate) fn parse_write_output(stdout: &str, stderr: &str) -> Result<WriteReport, MetadataError> {
    let mut report = WriteReport::default();
    let mut not_updated = 0u32;
    for line in stdout.lines() {
        let mut parts = line.split_whitespace();
        let Some(count) = parts.next().and_then(|n| n.parse::<u32>().ok()) else {
            continue;
        };
        let rest: Vec<&str> = parts.collect();
        let rest = rest.join(" ");
        if rest.starts_with("image file") {
            if rest.ends_with("updated") {
                report.updated += count;
            } else if rest.ends_with("unchanged") {
                report.unchanged += count;
            } else if rest.ends_with("created") {
                report.created += count;
            }
        } else if rest.contains("weren't updated") || rest.contains("not updated") {
            not_updated += count;
        }
    }

    let mut errors = Vec::new();
    for line in stderr.lines().map(str::trim) {
        if line.starts_with("Warning") {
            report.warnings.push(line.to_string());
        } else if line.starts_with("Error") {
            errors.push(line.to_string());
        }
    }

    if not_updated > 0 || (!errors.is_empty() && report.updated + report.created == 0) {
        let detail = if errors.is_empty() {
            format!("{} file(s) not updated", not_updated.max(1))
        } else {
            errors.join("; ")
        };
        return Err(MetadataError::Write(detail));
    }
    Ok(report)
}

#[async_trait]
impl MetadataStore for ExifTool {
    async fn init(&self) -> Result<(), MetadataError> {
        let mut guard = self.worker.lock().await;
        self.closed.store(false, Ordering::SeqCst);
        if guard.is_none() {
            *guard = Some(spawn_worker(&self.program)?);
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), MetadataError> {
        let mut guard = self.worker.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        let Some(mut worker) = guard.take() else {
            return Ok(());
        };
        if let Err(e) = worker.stdin.write_all(b"-stay_open\nFalse\n").await {
            debug!(error = %e, "exiftool stdin already closed");
        }
        let _ = worker.stdin.flush().await;
        match tokio::time::timeout(SHUTDOWN_GRACE, worker.child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "exiftool worker exited"),
            Ok(Err(e)) => warn!(error = %e, "waiting for exiftool failed"),
            Err(_) => {
                warn!("exiftool did not exit in time, killing it");
                worker.child.kill().await?;
            }
        }
        Ok(())
    }

    async fn read_tags(&self, path: &Path, tags: &[String]) -> Result<TagSnapshot, MetadataError> {
        if tags.is_empty() {
            return Ok(TagSnapshot::new());
        }
        let mut args = vec!["-json".to_string(), "-G0:1".to_string()];
        args.extend(tags.iter().map(|t| format!("-{}", t)));
        args.push(path_arg(path));
        let out = self.execute(&args).await?;
        parse_read_output(&out.stdout, &out.stderr)
    }

    async fn write_tags(
        &self,
        path: &Path,
        values: &WriteSet,
        opts: WriteOptions,
    ) -> Result<WriteReport, MetadataError> {
        if values.is_empty() {
            return Ok(WriteReport::default());
        }
        let mut args = Vec::with_capacity(values.len() + 2);
        if opts.in_place {
            args.push("-overwrite_original_in_place".to_string());
        }
        for (tag, value) in values {
            args.push(format!("-{}={}", tag, sanitize_value(value)));
        }
        args.push(path_arg(path));
        let out = self.execute(&args).await?;
        parse_write_output(&String::from_utf8_lossy(&out.stdout), &out.stderr)
    }

    async fn extract_binary_tag(
        &self,
        path: &Path,
        tag: &str,
    ) -> Result<Option<Vec<u8>>, MetadataError> {
        let args = vec!["-b".to_string(), format!("-{}", tag), path_arg(path)];
        let out = self.execute(&args).await?;
        if out.stdout.is_empty() {
            let errors = error_lines(&out.stderr);
            if !errors.is_empty() {
                return Err(MetadataError::Read(errors.join("; ")));
            }
            return Ok(None);
        }
        Ok(Some(out.stdout))
    }
}
