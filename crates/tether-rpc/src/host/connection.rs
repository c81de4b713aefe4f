use std::fmt;
use std::io::{BufRead, BufReader, ErrorKind};
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tether_terminal::Ui;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

use crate::callback::CallbackService;
use crate::error::{PluginError, PluginResult};
use crate::host::PluginHostConfig;
use crate::metadata::PluginMetadata;
use crate::protocol::{
    MetadataResponsePayload, OutputPayload, RequestIdGenerator, RpcErrorPayload, RpcFrame,
    RpcFrameKind, RunRequestPayload, RunResponsePayload, PLUGIN_BOOTSTRAP_ARG,
    PLUGIN_UNINSTALL_COMMAND,
};
use crate::transport::FrameTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Installing,
    Handshaking,
    Ready,
    Invoking,
    Stopped,
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Installing => "installing",
            Self::Handshaking => "handshaking",
            Self::Ready => "ready",
            Self::Invoking => "invoking",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One running plugin process and the RPC stream to it.
pub struct PluginConnection {
    plugin: String,
    executable: PathBuf,
    state: ConnectionState,
    child: Option<Child>,
    transport: Option<FrameTransport>,
    metadata: Option<PluginMetadata>,
    request_ids: RequestIdGenerator,
    stdout_drain: Option<JoinHandle<()>>,
}

impl fmt::Debug for PluginConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginConnection")
            .field("plugin", &self.plugin)
            .field("executable", &self.executable)
            .field("state", &self.state)
            .field("pid", &self.child.as_ref().map(Child::id))
            .finish()
    }
}

impl PluginConnection {
    /// Spawns `executable`, waits for its announced address, and dials it.
    ///
    /// Everything the child prints after the address line is forwarded to
    /// `ui` from a drain thread.
    pub fn launch(
        executable: &Path,
        config: &PluginHostConfig,
        ui: Arc<dyn Ui>,
    ) -> PluginResult<Self> {
        let launch_error = |message: String| PluginError::Launch {
            executable: executable.to_path_buf(),
            message,
        };

        let mut child = Command::new(executable)
            .arg(PLUGIN_BOOTSTRAP_ARG)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|error| launch_error(error.to_string()))?;
        debug!(
            executable = %executable.display(),
            pid = child.id(),
            "spawned plugin process"
        );

        let Some(stdout) = child.stdout.take() else {
            terminate(&mut child);
            return Err(launch_error("plugin stdout was not captured".to_string()));
        };
        let (announce, announced) = mpsc::channel();
        let drain = match thread::Builder::new()
            .name("tether-plugin-stdout".to_string())
            .spawn(move || drain_plugin_stdout(stdout, announce, ui))
        {
            Ok(drain) => drain,
            Err(error) => {
                terminate(&mut child);
                return Err(launch_error(format!("failed to start stdout reader: {error}")));
            }
        };

        let line = match announced.recv_timeout(config.bootstrap_timeout) {
            Ok(Some(line)) => line,
            Ok(None) | Err(RecvTimeoutError::Disconnected) => {
                terminate(&mut child);
                return Err(launch_error(
                    "plugin exited before announcing its address".to_string(),
                ));
            }
            Err(RecvTimeoutError::Timeout) => {
                terminate(&mut child);
                return Err(PluginError::BootstrapTimeout {
                    executable: executable.to_path_buf(),
                    timeout_ms: config.bootstrap_timeout.as_millis() as u64,
                });
            }
        };

        let address = match line.parse::<SocketAddr>() {
            Ok(address) => address,
            Err(error) => {
                terminate(&mut child);
                return Err(launch_error(format!(
                    "invalid bootstrap address '{line}': {error}"
                )));
            }
        };
        let transport = TcpStream::connect_timeout(&address, config.dial_timeout)
            .map_err(anyhow::Error::from)
            .and_then(FrameTransport::new);
        let transport = match transport {
            Ok(transport) => transport,
            Err(error) => {
                terminate(&mut child);
                return Err(PluginError::Dial {
                    executable: executable.to_path_buf(),
                    address: address.to_string(),
                    message: format!("{error:#}"),
                });
            }
        };
        debug!(address = %address, "connected to plugin");

        Ok(Self {
            plugin: executable_label(executable),
            executable: executable.to_path_buf(),
            state: ConnectionState::Installing,
            child: Some(child),
            transport: Some(transport),
            metadata: None,
            request_ids: RequestIdGenerator::new("host"),
            stdout_drain: Some(drain),
        })
    }

    /// Placeholder for a plugin whose process could not be brought up.
    pub fn failed(plugin: &str, executable: &Path) -> Self {
        Self {
            plugin: plugin.to_string(),
            executable: executable.to_path_buf(),
            state: ConnectionState::Failed,
            child: None,
            transport: None,
            metadata: None,
            request_ids: RequestIdGenerator::new("host"),
            stdout_drain: None,
        }
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn metadata(&self) -> Option<&PluginMetadata> {
        self.metadata.as_ref()
    }

    /// Requests metadata. Runs once per connection.
    pub fn handshake(&mut self) -> PluginResult<PluginMetadata> {
        self.state = ConnectionState::Handshaking;
        let Some(transport) = self.transport.as_mut() else {
            return Err(self.handshake_failure("connection is closed"));
        };
        let request_id = self.request_ids.next_id();
        let outcome = transport
            .send(&RpcFrame::new(
                request_id.clone(),
                RpcFrameKind::MetadataRequest,
            ))
            .and_then(|()| transport.recv());
        let frame = match outcome {
            Ok(Some(frame)) => frame,
            Ok(None) => return Err(self.handshake_failure("plugin closed the connection")),
            Err(error) => return Err(self.handshake_failure(format!("{error:#}"))),
        };

        let metadata = match frame.kind {
            RpcFrameKind::MetadataResponse if frame.request_id == request_id => {
                match frame.payload_as::<MetadataResponsePayload>() {
                    Ok(payload) => payload.metadata,
                    Err(error) => return Err(self.handshake_failure(format!("{error:#}"))),
                }
            }
            RpcFrameKind::Error => {
                let message = frame
                    .payload_as::<RpcErrorPayload>()
                    .map(|payload| payload.message)
                    .unwrap_or_else(|error| format!("{error:#}"));
                return Err(self.handshake_failure(message));
            }
            other => {
                return Err(self.handshake_failure(format!(
                    "expected metadata.response, got '{}'",
                    other.as_str()
                )))
            }
        };
        if let Err(message) = metadata.validate() {
            return Err(self.handshake_failure(message));
        }

        self.plugin = metadata.name.clone();
        self.metadata = Some(metadata.clone());
        self.state = ConnectionState::Ready;
        info!(
            plugin = %metadata.name,
            version = %metadata.version,
            commands = metadata.commands.len(),
            "plugin handshake complete"
        );
        Ok(metadata)
    }

    fn handshake_failure(&mut self, message: impl Into<String>) -> PluginError {
        self.state = ConnectionState::Failed;
        PluginError::Handshake {
            executable: self.executable.clone(),
            message: message.into(),
        }
    }

    /// Runs one command. `args[0]` is the command name. Callback requests
    /// are answered and output frames forwarded to `ui` until the plugin
    /// sends its `run.response`.
    pub fn invoke(
        &mut self,
        args: &[String],
        callbacks: &CallbackService,
        ui: &dyn Ui,
    ) -> PluginResult<()> {
        self.invoke_until(args, callbacks, ui, None)
    }

    /// Delivers the uninstall notice as a regular run. A plugin that has not
    /// answered within `grace` fails the connection so `close` can kill it.
    pub fn notify_uninstall(
        &mut self,
        callbacks: &CallbackService,
        ui: &dyn Ui,
        grace: Duration,
    ) -> PluginResult<()> {
        self.invoke_until(
            &[PLUGIN_UNINSTALL_COMMAND.to_string()],
            callbacks,
            ui,
            Instant::now().checked_add(grace),
        )
    }

    fn invoke_until(
        &mut self,
        args: &[String],
        callbacks: &CallbackService,
        ui: &dyn Ui,
        deadline: Option<Instant>,
    ) -> PluginResult<()> {
        if self.state != ConnectionState::Ready {
            return Err(PluginError::ConnectionFailed {
                plugin: self.plugin.clone(),
            });
        }
        let Some(transport) = self.transport.as_mut() else {
            self.state = ConnectionState::Failed;
            return Err(PluginError::ConnectionFailed {
                plugin: self.plugin.clone(),
            });
        };

        self.state = ConnectionState::Invoking;
        let request_id = self.request_ids.next_id();
        debug!(
            plugin = %self.plugin,
            command = args.first().map(String::as_str).unwrap_or_default(),
            "invoking plugin command"
        );
        let exchange = RunExchange {
            plugin: &self.plugin,
            request_id: &request_id,
            deadline,
        };
        let outcome = exchange.run(transport, args, callbacks, ui);
        self.state = match &outcome {
            Err(PluginError::Invocation { .. }) => ConnectionState::Failed,
            _ => ConnectionState::Ready,
        };
        if let Err(error) = &outcome {
            debug!(
                plugin = %self.plugin,
                state = %self.state,
                error = %error,
                "plugin command failed"
            );
        }
        outcome
    }

    /// Sends `shutdown.request`, closes the stream, and waits up to `grace`
    /// for the process to exit before killing it.
    pub fn close(&mut self, grace: Duration) {
        if let Some(mut transport) = self.transport.take() {
            let request = RpcFrame::new(self.request_ids.next_id(), RpcFrameKind::ShutdownRequest);
            if let Err(error) = transport.send(&request) {
                debug!(plugin = %self.plugin, error = %error, "shutdown request not delivered");
            }
        }
        if let Some(mut child) = self.child.take() {
            match child.wait_timeout(grace) {
                Ok(Some(status)) => {
                    debug!(plugin = %self.plugin, status = %status, "plugin process exited");
                }
                Ok(None) => {
                    warn!(
                        plugin = %self.plugin,
                        grace_ms = grace.as_millis() as u64,
                        "plugin did not exit within grace period; killing"
                    );
                    terminate(&mut child);
                }
                Err(error) => {
                    warn!(plugin = %self.plugin, error = %error, "failed waiting for plugin exit");
                    terminate(&mut child);
                }
            }
        }
        if let Some(drain) = self.stdout_drain.take() {
            let _ = drain.join();
        }
        if self.state != ConnectionState::Failed {
            self.state = ConnectionState::Stopped;
        }
    }
}

impl Drop for PluginConnection {
    fn drop(&mut self) {
        self.transport.take();
        if let Some(mut child) = self.child.take() {
            terminate(&mut child);
        }
    }
}

/// One `run.request` and everything the plugin sends until its response.
struct RunExchange<'a> {
    plugin: &'a str,
    request_id: &'a str,
    /// No deadline for ordinary runs.
    deadline: Option<Instant>,
}

impl RunExchange<'_> {
    fn invocation(&self, message: impl Into<String>) -> PluginError {
        PluginError::Invocation {
            plugin: self.plugin.to_string(),
            message: message.into(),
        }
    }

    fn reported(&self, message: String) -> PluginError {
        PluginError::PluginReported {
            plugin: self.plugin.to_string(),
            message,
        }
    }

    fn timed_out(&self) -> PluginError {
        self.invocation("plugin did not answer before the deadline")
    }

    fn next_frame(&self, transport: &mut FrameTransport) -> PluginResult<RpcFrame> {
        if let Some(deadline) = self.deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.timed_out());
            }
            transport
                .set_read_timeout(Some(remaining))
                .map_err(|error| self.invocation(format!("{error:#}")))?;
        }
        match transport.recv() {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(self.invocation("plugin closed the connection")),
            Err(error) if self.deadline.is_some() && is_read_timeout(&error) => {
                Err(self.timed_out())
            }
            Err(error) => Err(self.invocation(format!("{error:#}"))),
        }
    }

    fn run(
        &self,
        transport: &mut FrameTransport,
        args: &[String],
        callbacks: &CallbackService,
        ui: &dyn Ui,
    ) -> PluginResult<()> {
        let invocation = |error: anyhow::Error| self.invocation(format!("{error:#}"));

        let request = RpcFrame::with_payload(
            self.request_id,
            RpcFrameKind::RunRequest,
            &RunRequestPayload {
                args: args.to_vec(),
            },
        )
        .map_err(invocation)?;
        transport.send(&request).map_err(invocation)?;

        loop {
            let frame = self.next_frame(transport)?;
            match frame.kind {
                RpcFrameKind::Output => {
                    let payload: OutputPayload = frame.payload_as().map_err(invocation)?;
                    ui.say(&payload.text);
                }
                RpcFrameKind::CallbackRequest => {
                    transport
                        .send(&callbacks.respond(&frame))
                        .map_err(invocation)?;
                }
                RpcFrameKind::RunResponse if frame.request_id == self.request_id => {
                    let payload: RunResponsePayload = frame.payload_as().map_err(invocation)?;
                    return match payload.error {
                        Some(message) => Err(self.reported(message)),
                        None => Ok(()),
                    };
                }
                RpcFrameKind::Error => {
                    let payload: RpcErrorPayload = frame.payload_as().map_err(invocation)?;
                    return Err(self.reported(format!("{}: {}", payload.code, payload.message)));
                }
                other => {
                    return Err(self.invocation(format!(
                        "unexpected frame '{}' during run",
                        other.as_str()
                    )))
                }
            }
        }
    }
}

fn is_read_timeout(error: &anyhow::Error) -> bool {
    error.downcast_ref::<std::io::Error>().is_some_and(|error| {
        matches!(error.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
    })
}

/// Hands the first stdout line to `announce`, then forwards the rest to `ui`.
fn drain_plugin_stdout(stdout: ChildStdout, announce: Sender<Option<String>>, ui: Arc<dyn Ui>) {
    let mut reader = BufReader::new(stdout);
    let mut first = String::new();
    match reader.read_line(&mut first) {
        Ok(0) | Err(_) => {
            let _ = announce.send(None);
            return;
        }
        Ok(_) => {
            let _ = announce.send(Some(first.trim().to_string()));
        }
    }
    drop(announce);
    for line in reader.lines() {
        match line {
            Ok(line) => ui.say(&line),
            Err(_) => break,
        }
    }
}

fn terminate(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn executable_label(executable: &Path) -> String {
    executable
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| executable.display().to_string())
}
