use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use deck_core::PipelineError;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Default conversion timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Cap on captured converter output.
const MAX_OUTPUT_BYTES: u64 = 64 * 1024;

/// Subdirectory of the input's folder that receives converted files, so a
/// same-format conversion never overwrites its own input.
const OUT_DIR: &str = "converted";

/// Runs an office suite in headless mode to convert presentations.
#[derive(Debug, Clone)]
pub struct DocumentConverter {
    bin: String,
    format: String,
    timeout: Duration,
}

impl DocumentConverter {
    pub fn new(bin: impl Into<String>, format: impl Into<String>, timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            format: format.into(),
            timeout,
        }
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    /// Resolve the converter binary: an explicit path must exist, a bare
    /// name is searched on `PATH`.
    pub fn locate(&self) -> Result<PathBuf, PipelineError> {
        let candidate = Path::new(&self.bin);
        if candidate.components().count() > 1 {
            return if candidate.is_file() {
                Ok(candidate.to_path_buf())
            } else {
                Err(PipelineError::Conversion(format!(
                    "converter binary not found at {}",
                    candidate.display()
                )))
            };
        }
        std::env::var_os("PATH")
            .and_then(|paths| {
                std::env::split_paths(&paths)
                    .flat_map(|dir| executable_names(&self.bin).map(move |n| dir.join(n)))
                    .find(|p| p.is_file())
            })
            .ok_or_else(|| {
                PipelineError::Conversion(format!(
                    "converter binary '{}' not found on PATH; install LibreOffice or set converter_bin",
                    self.bin
                ))
            })
    }

    /// Convert `input` and return the path of the produced file. The output
    /// lands in a `converted/` folder next to the input.
    pub async fn convert(&self, input: &Path) -> Result<PathBuf, PipelineError> {
        let bin = self.locate()?;
        let dir = input.parent().unwrap_or(Path::new(".")).join(OUT_DIR);
        std::fs::create_dir_all(&dir).map_err(|e| {
            PipelineError::Conversion(format!("cannot create {}: {e}", dir.display()))
        })?;

        let stem = input.file_stem().ok_or_else(|| {
            PipelineError::Conversion(format!("input has no file name: {}", input.display()))
        })?;
        let expected = dir.join(format!("{}.{}", stem.to_string_lossy(), self.format));

        debug!(
            bin = %bin.display(),
            input = %input.display(),
            format = %self.format,
            timeout_secs = self.timeout.as_secs(),
            "starting conversion"
        );

        let mut child = Command::new(&bin)
            .arg("--headless")
            .arg("--convert-to")
            .arg(&self.format)
            .arg("--outdir")
            .arg(&dir)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PipelineError::Conversion(format!("failed to start {}: {e}", bin.display()))
            })?;

        let start = Instant::now();
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        let result = tokio::time::timeout(self.timeout, async {
            let mut out = Vec::new();
            let mut err = Vec::new();
            let read_out = async {
                if let Some(s) = stdout.as_mut() {
                    drain_capped(s, &mut out).await;
                }
            };
            let read_err = async {
                if let Some(s) = stderr.as_mut() {
                    drain_capped(s, &mut err).await;
                }
            };
            tokio::join!(read_out, read_err);
            let status = child.wait().await;
            (status, out, err)
        })
        .await;

        let (status, stdout_buf, stderr_buf) = match result {
            Ok(r) => r,
            Err(_) => {
                warn!(bin = %bin.display(), "conversion timed out, killing process");
                let _ = child.kill().await;
                return Err(PipelineError::Conversion(format!(
                    "converter did not finish within {:.0}s",
                    self.timeout.as_secs_f64()
                )));
            }
        };

        let status = status.map_err(|e| {
            PipelineError::Conversion(format!("failed to wait for converter: {e}"))
        })?;
        debug!(
            exit_code = status.code().unwrap_or(-1),
            elapsed_ms = start.elapsed().as_millis() as u64,
            stdout = %String::from_utf8_lossy(&stdout_buf).trim(),
            "converter exited"
        );

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr_buf);
            return Err(PipelineError::Conversion(format!(
                "converter exited with code {}: {}",
                status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        let size = std::fs::metadata(&expected).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(PipelineError::Conversion(format!(
                "converter reported success but produced no output at {}",
                expected.display()
            )));
        }

        info!(
            output = %expected.display(),
            bytes = size,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "conversion finished"
        );
        Ok(expected)
    }
}

/// Keep the first `MAX_OUTPUT_BYTES` of a pipe and discard the rest, reading
/// to EOF so the child never blocks on a full pipe.
async fn drain_capped<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut Vec<u8>) {
    if let Err(e) = (&mut *reader).take(MAX_OUTPUT_BYTES).read_to_end(buf).await {
        debug!(error = %e, "failed to read converter output");
        return;
    }
    match tokio::io::copy(reader, &mut tokio::io::sink()).await {
        Ok(0) => {}
        Ok(skipped) => debug!(skipped, "converter output truncated"),
        Err(e) => debug!(error = %e, "failed to drain converter output"),
    }
}

fn executable_names(bin: &str) -> impl Iterator<Item = String> + '_ {
    let exe = if cfg!(target_os = "windows") && Path::new(bin).extension().is_none() {
        Some(format!("{bin}.exe"))
    } else {
        None
    };
    std::iter::once(bin.to_string()).chain(exe)
}
