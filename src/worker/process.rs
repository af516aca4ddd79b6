use crate::config::schema::EngineConfig;
use crate::error::{OpusMtError, Result};
use crate::lang::LanguagePair;
use crate::worker::WorkerState;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Request/response channel of the engine process
struct Channel {
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

/// Worker state shared with in-flight request tasks
struct Shared {
    pair: LanguagePair,
    state: AtomicU8,
    process: StdMutex<Child>,
    cache: Option<StdMutex<LruCache<String, String>>>,
}

/// Client for one external translation engine process
///
/// The engine reads one line of source text on stdin and answers with one
/// line of translated text on stdout. It has no request tagging, so requests
/// are dispatched strictly one at a time; concurrent callers queue on a fair
/// mutex and are served in arrival order.
///
/// Each exchange runs in its own task that owns the channel lock until the
/// response line has been read. A caller that stops waiting therefore never
/// leaves an unread response in the pipe for the next request.
pub struct TranslationWorker {
    model_dir: PathBuf,
    timeout: Duration,
    shared: Arc<Shared>,
    channel: Arc<Mutex<Channel>>,
}

impl TranslationWorker {
    /// Start an engine process for `model_dir` and `pair`
    ///
    /// # Errors
    /// - Returns `WorkerUnavailable` if the engine binary is not found
    /// - Returns `WorkerUnavailable` if the process fails to start
    pub fn spawn(model_dir: &Path, pair: LanguagePair, engine: &EngineConfig) -> Result<Self> {
        let program = which::which(&engine.program).map_err(|_| {
            OpusMtError::WorkerUnavailable(format!(
                "engine binary '{}' not found in PATH",
                engine.program
            ))
        })?;

        let args = expand_args(&engine.args, model_dir, &pair);
        tracing::debug!("Spawning {} {:?}", program.display(), args);

        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                OpusMtError::WorkerUnavailable(format!(
                    "failed to spawn {}: {e}",
                    program.display()
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| OpusMtError::WorkerUnavailable("engine stdin not available".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| OpusMtError::WorkerUnavailable("engine stdout not available".into()))?;

        if let Some(stderr) = child.stderr.take() {
            let label = pair.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(pair = %label, "engine: {line}");
                }
            });
        }

        tracing::info!(
            "Started translation worker for {pair} (pid {:?}) with model {}",
            child.id(),
            model_dir.display()
        );

        let cache = NonZeroUsize::new(engine.cache_size).map(|cap| StdMutex::new(LruCache::new(cap)));

        Ok(Self {
            model_dir: model_dir.to_path_buf(),
            timeout: Duration::from_secs(engine.timeout_secs.max(1)),
            shared: Arc::new(Shared {
                pair,
                state: AtomicU8::new(WorkerState::Starting as u8),
                process: StdMutex::new(child),
                cache,
            }),
            channel: Arc::new(Mutex::new(Channel {
                stdin,
                stdout: BufReader::new(stdout).lines(),
            })),
        })
    }

    /// Override the response timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn pair(&self) -> &LanguagePair {
        &self.shared.pair
    }

    #[must_use]
    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    /// OS process id, `None` once the process has been reaped
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.shared
            .process
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .id()
    }

    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    /// Check liveness
    ///
    /// A `Starting` worker whose process is alive becomes `Running`; a
    /// terminated process moves the worker to `Exited`.
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Translate one line of plain text
    ///
    /// Returns an empty string for empty input, when the process has already
    /// exited, or when it closes its output. Dropping the returned future
    /// abandons the wait but not the exchange: the response is still read
    /// and cached.
    ///
    /// # Errors
    /// Returns `WorkerUnavailable` if the engine does not answer within the
    /// timeout or the channel fails; the process is killed and will be
    /// replaced on the next registry lookup.
    pub async fn translate(&self, source: &str) -> Result<String> {
        let line = to_single_line(source);
        if line.is_empty() {
            return Ok(String::new());
        }
        if let Some(hit) = self.shared.cached(&line) {
            return Ok(hit);
        }

        let channel = Arc::clone(&self.channel).lock_owned().await;

        // Filled by a caller queued ahead of us
        if let Some(hit) = self.shared.cached(&line) {
            return Ok(hit);
        }
        if !self.shared.is_running() {
            return Ok(String::new());
        }

        let request = tokio::spawn(exchange(
            Arc::clone(&self.shared),
            channel,
            line,
            self.timeout,
        ));
        request.await.map_err(|e| {
            OpusMtError::WorkerUnavailable(format!(
                "request to worker for {} was aborted: {e}",
                self.shared.pair
            ))
        })?
    }

    /// Kill the engine process
    pub fn terminate(&self) {
        tracing::info!("Stopping translation worker for {}", self.shared.pair);
        self.shared.kill();
    }
}

/// One request/response round trip, run while holding the channel lock
async fn exchange(
    shared: Arc<Shared>,
    mut channel: OwnedMutexGuard<Channel>,
    line: String,
    timeout: Duration,
) -> Result<String> {
    if let Err(e) = write_request(&mut channel.stdin, &line).await {
        tracing::warn!("Failed to send request to worker for {}: {e}", shared.pair);
        shared.mark_exited();
        return Ok(String::new());
    }

    match tokio::time::timeout(timeout, channel.stdout.next_line()).await {
        Ok(Ok(Some(response))) => {
            let translation = response.trim_end_matches('\r').trim().to_string();
            if !translation.is_empty() {
                shared.store(line, translation.clone());
            }
            Ok(translation)
        }
        Ok(Ok(None)) => {
            tracing::warn!("Worker for {} closed its output", shared.pair);
            shared.mark_exited();
            Ok(String::new())
        }
        Ok(Err(e)) => {
            shared.kill();
            Err(OpusMtError::WorkerUnavailable(format!(
                "reading from worker for {} failed: {e}",
                shared.pair
            )))
        }
        Err(_) => {
            tracing::warn!(
                "Worker for {} did not answer within {timeout:?}, killing it",
                shared.pair
            );
            shared.kill();
            Err(OpusMtError::WorkerUnavailable(format!(
                "worker for {} timed out after {timeout:?}",
                shared.pair
            )))
        }
    }
}

impl Shared {
    fn state(&self) -> WorkerState {
        WorkerState::from(self.state.load(Ordering::Acquire))
    }

    fn is_running(&self) -> bool {
        if self.state() == WorkerState::Exited {
            return false;
        }

        let mut child = self.process.lock().unwrap_or_else(PoisonError::into_inner);
        match child.try_wait() {
            Ok(None) => {
                self.state
                    .compare_exchange(
                        WorkerState::Starting as u8,
                        WorkerState::Running as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .ok();
                true
            }
            Ok(Some(status)) => {
                tracing::warn!("Translation worker for {} exited: {status}", self.pair);
                self.mark_exited();
                false
            }
            Err(e) => {
                tracing::warn!("Failed to poll worker for {}: {e}", self.pair);
                self.mark_exited();
                false
            }
        }
    }

    fn kill(&self) {
        self.mark_exited();
        let mut child = self.process.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = child.start_kill() {
            tracing::debug!("Kill of worker for {} failed: {e}", self.pair);
        }
    }

    fn mark_exited(&self) {
        self.state.store(WorkerState::Exited as u8, Ordering::Release);
    }

    fn cached(&self, line: &str) -> Option<String> {
        let cache = self.cache.as_ref()?;
        cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(line)
            .cloned()
    }

    fn store(&self, line: String, translation: String) {
        if let Some(cache) = &self.cache {
            cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .put(line, translation);
        }
    }
}

impl std::fmt::Debug for TranslationWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationWorker")
            .field("pair", &self.shared.pair)
            .field("model_dir", &self.model_dir)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

async fn write_request(stdin: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

/// The protocol is line based, so embedded line breaks become spaces
fn to_single_line(text: &str) -> String {
    text.split(['\r', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn expand_args(template: &[String], model_dir: &Path, pair: &LanguagePair) -> Vec<String> {
    let model_dir = model_dir.to_string_lossy();
    let pair_str = pair.to_string();
    template
        .iter()
        .map(|arg| {
            arg.replace("{model_dir}", &model_dir)
                .replace("{source}", pair.source())
                .replace("{target}", pair.target())
                .replace("{pair}", &pair_str)
        })
        .collect()
}
