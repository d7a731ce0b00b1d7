use std::{
    fmt, io,
    path::{Path, PathBuf},
    process::Stdio,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak},
    time::{Duration, Instant},
};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::{mpsc, oneshot, Mutex},
    time,
};
use tracing::{debug, warn};

use warden_child::{Request, Response, ResponseKind, ServiceError, ServiceTable};

use crate::{
    process::{pump_to_channel, spawn_with_retry},
    WardenError,
};

/// Idle children are reaped after this long without a handled message.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Destination of a child's stderr stream.
#[derive(Clone, Debug, Default)]
pub enum StderrSink {
    /// The child writes straight to the host's stderr.
    #[default]
    Inherit,
    /// Chunks are forwarded to the channel as they arrive.
    Capture(mpsc::UnboundedSender<Vec<u8>>),
}

/// A supervised child process bound to one compiled artifact.
///
/// The child is spawned lazily: [`handle`](Self::handle) starts it on first
/// use, restarts it once per call if the pipe turns out to be severed, and
/// schedules an idle-timeout reaper after every successful exchange. Messages
/// travel as newline-framed JSON over the child's stdin/stdout.
///
/// All message operations serialize on an internal lock, so a `Cmd` shared
/// between tasks stays coherent; replies cannot interleave.
pub struct Cmd {
    binary: PathBuf,
    idle_timeout: Duration,
    stderr: StderrSink,
    services: RwLock<ServiceTable>,
    inner: Arc<Mutex<CmdState>>,
}

struct CmdState {
    generation: u64,
    process: Option<ChildProcess>,
    last_event: Instant,
}

struct ChildProcess {
    generation: u64,
    pid: Option<u32>,
    stdin: ChildStdin,
    stdout: Option<ChildStdout>,
    decoder: Option<Lines<BufReader<ChildStdout>>>,
    kill: oneshot::Sender<()>,
}

impl Cmd {
    /// Wraps the executable at `binary` without starting it.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            stderr: StderrSink::Inherit,
            services: RwLock::new(ServiceTable::new()),
            inner: Arc::new(Mutex::new(CmdState {
                generation: 0,
                process: None,
                last_event: Instant::now(),
            })),
        }
    }

    /// Sets how long an idle child may live between handled messages.
    ///
    /// Zero selects [`DEFAULT_IDLE_TIMEOUT`].
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = if timeout.is_zero() {
            DEFAULT_IDLE_TIMEOUT
        } else {
            timeout
        };
        self
    }

    /// Redirects the child's stderr.
    pub fn stderr_sink(mut self, sink: StderrSink) -> Self {
        self.stderr = sink;
        self
    }

    /// Path of the wrapped executable.
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Registers a host-side service that the child may invoke through a
    /// callback response.
    pub fn register<F>(&self, name: impl Into<String>, service: F)
    where
        F: Fn(&[Value]) -> Result<Value, ServiceError> + Send + Sync + 'static,
    {
        self.services_mut().register(name, service);
    }

    /// The child's pid while the process slot is populated.
    pub async fn pid(&self) -> Option<u32> {
        self.inner.lock().await.process.as_ref().and_then(|p| p.pid)
    }

    /// Spawns a fresh child, replacing any previous one.
    ///
    /// Pipes are rewired, the JSON framers are discarded and a new exit
    /// observer is installed; the previous observer dies with its process.
    pub async fn start(&self) -> Result<(), WardenError> {
        let mut state = self.inner.lock().await;
        self.start_locked(&mut state)
    }

    /// Terminates the child if one is running. Reaps nothing by itself; the
    /// exit observer collects the corpse.
    pub async fn kill(&self) {
        let mut state = self.inner.lock().await;
        kill_process(&mut state);
    }

    /// Sends one newline-framed JSON value to the child's stdin.
    pub async fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), WardenError> {
        let mut state = self.inner.lock().await;
        encode_frame(&mut state, value).await
    }

    /// Reads exactly one JSON value from the child's stdout.
    pub async fn decode<T: DeserializeOwned>(&self) -> Result<T, WardenError> {
        let mut state = self.inner.lock().await;
        let value = decode_frame(&mut state).await?;
        serde_json::from_value(value).map_err(|source| WardenError::Malformed { source })
    }

    /// Sends `input` and returns the child's reply, starting or respawning
    /// the child as needed.
    ///
    /// A severed pipe (the child exited since the last call) is repaired by
    /// exactly one transparent respawn; a second severance within the same
    /// call surfaces as the underlying error. Callback responses are resolved
    /// against the host's registered services until a non-callback frame
    /// arrives. After a successful exchange the idle reaper is rearmed.
    pub async fn handle<I, O>(&self, input: &I) -> Result<O, WardenError>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let mut state = self.inner.lock().await;
        let frame = self.exchange(&mut state, input).await?;
        let reply = self.resolve_callbacks(&mut state, frame).await?;
        state.last_event = Instant::now();
        drop(state);
        self.schedule_reaper();
        serde_json::from_value(reply).map_err(|source| WardenError::Malformed { source })
    }

    /// Invokes a named service registered inside the child.
    pub async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, WardenError> {
        let response: Response = self.handle(&Request::new(name, args)).await?;
        match response.kind {
            ResponseKind::Return => Ok(response.payload),
            ResponseKind::Error => Err(WardenError::from_remote(response.error_message())),
            ResponseKind::Callback => Err(WardenError::BadResponseType(response.kind)),
        }
    }

    fn start_locked(&self, state: &mut CmdState) -> Result<(), WardenError> {
        kill_process(state);

        let mut command = Command::new(&self.binary);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true);
        match &self.stderr {
            StderrSink::Inherit => command.stderr(Stdio::inherit()),
            StderrSink::Capture(_) => command.stderr(Stdio::piped()),
        };

        let mut child = spawn_with_retry(&mut command, &self.binary)?;
        let stdin = child.stdin.take().ok_or(WardenError::StdinUnavailable)?;
        let stdout = child.stdout.take().ok_or(WardenError::StdoutUnavailable)?;
        if let StderrSink::Capture(sink) = &self.stderr {
            let stderr = child.stderr.take().ok_or(WardenError::StderrUnavailable)?;
            tokio::spawn(pump_to_channel(stderr, sink.clone()));
        }

        let pid = child.id();
        state.generation += 1;
        let generation = state.generation;
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(observe_exit(
            child,
            kill_rx,
            Arc::downgrade(&self.inner),
            generation,
        ));

        state.process = Some(ChildProcess {
            generation,
            pid,
            stdin,
            stdout: Some(stdout),
            decoder: None,
            kill: kill_tx,
        });
        state.last_event = Instant::now();
        debug!(binary = %self.binary.display(), pid, "started child process");
        Ok(())
    }

    /// One encode/decode cycle with the single-respawn policy applied.
    async fn exchange<I>(&self, state: &mut CmdState, input: &I) -> Result<Value, WardenError>
    where
        I: Serialize + ?Sized,
    {
        let mut respawned = false;
        loop {
            if state.process.is_none() {
                self.start_locked(state)?;
            }
            state.last_event = Instant::now();

            match encode_frame(state, input).await {
                Ok(()) => {}
                Err(err) if !respawned && is_severed(&err) => {
                    respawned = true;
                    self.start_locked(state)?;
                    continue;
                }
                Err(err) => return Err(err),
            }
            match decode_frame(state).await {
                Ok(frame) => return Ok(frame),
                Err(err) if !respawned && is_severed(&err) => {
                    respawned = true;
                    self.start_locked(state)?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Answers callback frames out of the host's service table until the
    /// child sends something that is not a callback.
    async fn resolve_callbacks(
        &self,
        state: &mut CmdState,
        mut frame: Value,
    ) -> Result<Value, WardenError> {
        loop {
            let Some(request) = callback_request(&frame) else {
                return Ok(frame);
            };
            let response = match request {
                Ok(request) => self.services().dispatch(&request),
                Err(err) => Response::error(format!("malformed callback request: {err}")),
            };
            encode_frame(state, &response).await?;
            frame = decode_frame(state).await?;
        }
    }

    fn schedule_reaper(&self) {
        let inner = Arc::clone(&self.inner);
        let idle_timeout = self.idle_timeout;
        tokio::spawn(async move {
            time::sleep(idle_timeout).await;
            let mut state = inner.lock().await;
            if state.process.is_some() && state.last_event.elapsed() >= idle_timeout {
                debug!("reaping idle child process");
                state.last_event = Instant::now();
                kill_process(&mut state);
            }
        });
    }

    fn services(&self) -> RwLockReadGuard<'_, ServiceTable> {
        self.services
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn services_mut(&self) -> RwLockWriteGuard<'_, ServiceTable> {
        self.services
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_lock() {
            Ok(state) => match state.process.as_ref().and_then(|p| p.pid) {
                Some(pid) => write!(f, "<Cmd {} {pid}>", self.binary.display()),
                None => write!(f, "<Cmd {} dead>", self.binary.display()),
            },
            Err(_) => write!(f, "<Cmd {} busy>", self.binary.display()),
        }
    }
}

fn kill_process(state: &mut CmdState) {
    if let Some(process) = state.process.take() {
        // The observer swallows "already exited".
        let _ = process.kill.send(());
    }
}

/// Collects the child's exit status. On a self-exit the process slot is
/// cleared so the next handle respawns; a kill signal (or the `Cmd` being
/// dropped) terminates the child instead.
async fn observe_exit(
    mut child: Child,
    kill: oneshot::Receiver<()>,
    state: Weak<Mutex<CmdState>>,
    generation: u64,
) {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = kill => None,
    };
    match exited {
        Some(status) => {
            match status {
                Ok(status) => debug!(%status, "child process exited"),
                Err(err) => warn!(error = %err, "failed to collect child exit status"),
            }
            if let Some(state) = state.upgrade() {
                let mut state = state.lock().await;
                if state
                    .process
                    .as_ref()
                    .is_some_and(|process| process.generation == generation)
                {
                    state.process = None;
                }
            }
        }
        None => {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

async fn encode_frame<T>(state: &mut CmdState, value: &T) -> Result<(), WardenError>
where
    T: Serialize + ?Sized,
{
    let process = state.process.as_mut().ok_or(WardenError::StdinUnavailable)?;
    let mut frame = serde_json::to_vec(value).map_err(WardenError::Encode)?;
    frame.push(b'\n');
    process
        .stdin
        .write_all(&frame)
        .await
        .map_err(WardenError::Stream)?;
    process.stdin.flush().await.map_err(WardenError::Stream)
}

async fn decode_frame(state: &mut CmdState) -> Result<Value, WardenError> {
    let process = state
        .process
        .as_mut()
        .ok_or(WardenError::StdoutUnavailable)?;
    if process.decoder.is_none() {
        let stdout = process.stdout.take().ok_or(WardenError::StdoutUnavailable)?;
        process.decoder = Some(BufReader::new(stdout).lines());
    }
    let decoder = match process.decoder.as_mut() {
        Some(decoder) => decoder,
        None => return Err(WardenError::StdoutUnavailable),
    };
    match decoder.next_line().await {
        Ok(Some(line)) => {
            serde_json::from_str(&line).map_err(|source| WardenError::Malformed { source })
        }
        Ok(None) => Err(WardenError::EndOfStream),
        Err(err) => Err(WardenError::Stream(err)),
    }
}

/// A frame counts as a callback only if it is a well-formed response with the
/// callback tag; anything else flows through to the caller untouched.
fn callback_request(frame: &Value) -> Option<Result<Request, serde_json::Error>> {
    let response: Response = serde_json::from_value(frame.clone()).ok()?;
    if response.kind != ResponseKind::Callback {
        return None;
    }
    Some(serde_json::from_value(response.payload))
}

fn is_severed(err: &WardenError) -> bool {
    match err {
        WardenError::EndOfStream => true,
        WardenError::Stream(source) => source.kind() == io::ErrorKind::BrokenPipe,
        _ => false,
    }
}
