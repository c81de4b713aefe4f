//! Plugin-side runtime. A plugin binary implements [`Plugin`] and calls
//! [`start`] from `main`; the host then drives it over the RPC protocol.

use std::io::Write;
use std::net::TcpListener;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;

use crate::callback::{CallbackError, CallbackMethod};
use crate::metadata::PluginMetadata;
use crate::protocol::{
    CallbackRequestPayload, CallbackResponsePayload, MetadataResponsePayload, OutputPayload,
    RequestIdGenerator, RpcErrorPayload, RpcFrame, RpcFrameKind, RunRequestPayload,
    RunResponsePayload, PLUGIN_BOOTSTRAP_ARG, RPC_ERROR_CODE_INVALID_PAYLOAD,
    RPC_ERROR_CODE_UNSUPPORTED_KIND,
};
use crate::transport::FrameTransport;

const NOT_BOOTSTRAPPED_NOTICE: &str =
    "This is a tether plugin. Install it with `tether install-plugin <path>` and run its commands through tether.";

pub trait Plugin {
    fn metadata(&self) -> PluginMetadata;

    /// `args[0]` is the invoked command name. Returned errors are reported to
    /// the host as the run's failure message.
    fn run(&mut self, cli: &mut CliConnection<'_>, args: &[String]) -> Result<()>;
}

/// Handle a plugin uses during a run to print through the host and query
/// host state.
pub struct CliConnection<'a> {
    transport: &'a mut FrameTransport,
    request_ids: &'a RequestIdGenerator,
}

impl<'a> CliConnection<'a> {
    pub fn println(&mut self, text: impl Into<String>) -> Result<()> {
        let frame = RpcFrame::with_payload(
            self.request_ids.next_id(),
            RpcFrameKind::Output,
            &OutputPayload { text: text.into() },
        )?;
        self.transport.send(&frame)
    }

    pub fn current_org(&mut self) -> Result<String> {
        self.call_string(CallbackMethod::CurrentOrg)
    }

    pub fn current_space(&mut self) -> Result<String> {
        self.call_string(CallbackMethod::CurrentSpace)
    }

    pub fn username(&mut self) -> Result<String> {
        self.call_string(CallbackMethod::Username)
    }

    pub fn is_logged_in(&mut self) -> Result<bool> {
        match self.call(CallbackMethod::IsLoggedIn)? {
            Value::Bool(logged_in) => Ok(logged_in),
            other => bail!("callback cli.is_logged_in returned {}", other),
        }
    }

    fn call_string(&mut self, method: CallbackMethod) -> Result<String> {
        match self.call(method)? {
            Value::String(value) => Ok(value),
            other => bail!("callback {} returned {}", method.as_str(), other),
        }
    }

    /// Typed callback failures are returned as [`CallbackError`] inside the
    /// `anyhow::Error`, so callers can downcast them.
    fn call(&mut self, method: CallbackMethod) -> Result<Value> {
        let request_id = self.request_ids.next_id();
        let frame = RpcFrame::with_payload(
            request_id.clone(),
            RpcFrameKind::CallbackRequest,
            &CallbackRequestPayload {
                method: method.as_str().to_string(),
            },
        )?;
        self.transport.send(&frame)?;
        let Some(response) = self.transport.recv()? else {
            bail!("host closed the connection during {}", method.as_str());
        };
        match response.kind {
            RpcFrameKind::CallbackResponse if response.request_id == request_id => {
                let payload: CallbackResponsePayload = response.payload_as()?;
                if let Some(error) = payload.error {
                    return Err(match CallbackError::from_code(&error.code) {
                        Some(typed) => anyhow::Error::new(typed),
                        None => anyhow!("{}: {}", error.code, error.message),
                    });
                }
                payload
                    .result
                    .ok_or_else(|| anyhow!("callback {} returned no result", method.as_str()))
            }
            RpcFrameKind::Error => {
                let payload: RpcErrorPayload = response.payload_as()?;
                bail!("host rejected {}: {}", method.as_str(), payload.message)
            }
            other => bail!(
                "unexpected frame '{}' while waiting for {}",
                other.as_str(),
                method.as_str()
            ),
        }
    }
}

/// Entry point for plugin binaries; reads the process arguments.
pub fn start<P: Plugin>(plugin: P) -> Result<()> {
    start_with_args(plugin, std::env::args().skip(1))
}

pub fn start_with_args<P, I>(mut plugin: P, args: I) -> Result<()>
where
    P: Plugin,
    I: IntoIterator<Item = String>,
{
    let args = args.into_iter().collect::<Vec<_>>();
    if args.first().map(String::as_str) != Some(PLUGIN_BOOTSTRAP_ARG) {
        println!("{NOT_BOOTSTRAPPED_NOTICE}");
        bail!("plugin was started without {}", PLUGIN_BOOTSTRAP_ARG);
    }

    let listener =
        TcpListener::bind(("127.0.0.1", 0)).context("failed to bind plugin rpc listener")?;
    let address = listener
        .local_addr()
        .context("failed to read plugin rpc listener address")?;
    {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{address}").context("failed to announce plugin address")?;
        stdout.flush().context("failed to announce plugin address")?;
    }

    let (stream, _) = listener
        .accept()
        .context("failed to accept host connection")?;
    drop(listener);
    serve(&mut plugin, FrameTransport::new(stream)?)
}

/// Serves host frames until `shutdown.request` or the host disconnects.
pub fn serve<P: Plugin>(plugin: &mut P, mut transport: FrameTransport) -> Result<()> {
    let request_ids = RequestIdGenerator::new("plugin");
    while let Some(frame) = transport.recv()? {
        match frame.kind {
            RpcFrameKind::MetadataRequest => {
                let response = RpcFrame::with_payload(
                    frame.request_id,
                    RpcFrameKind::MetadataResponse,
                    &MetadataResponsePayload {
                        metadata: plugin.metadata(),
                    },
                )?;
                transport.send(&response)?;
            }
            RpcFrameKind::RunRequest => {
                let payload = match frame.payload_as::<RunRequestPayload>() {
                    Ok(payload) => payload,
                    Err(error) => {
                        transport.send(&RpcFrame::error(
                            frame.request_id,
                            RPC_ERROR_CODE_INVALID_PAYLOAD,
                            format!("{error:#}"),
                        ))?;
                        continue;
                    }
                };
                let outcome = {
                    let mut cli = CliConnection {
                        transport: &mut transport,
                        request_ids: &request_ids,
                    };
                    plugin.run(&mut cli, &payload.args)
                };
                let response = RpcFrame::with_payload(
                    frame.request_id,
                    RpcFrameKind::RunResponse,
                    &RunResponsePayload {
                        error: outcome.err().map(|error| format!("{error:#}")),
                    },
                )?;
                transport.send(&response)?;
            }
            RpcFrameKind::ShutdownRequest => return Ok(()),
            other => {
                transport.send(&RpcFrame::error(
                    frame.request_id,
                    RPC_ERROR_CODE_UNSUPPORTED_KIND,
                    format!("plugin does not accept '{}' frames", other.as_str()),
                ))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::net::TcpStream;
    use std::thread;

    use super::*;
    use crate::metadata::{PluginCommand, PluginVersion};

    struct Greeter;

    impl Plugin for Greeter {
        fn metadata(&self) -> PluginMetadata {
            PluginMetadata {
                name: "Greeter".to_string(),
                version: PluginVersion::new(0, 1, 0),
                commands: vec![PluginCommand {
                    name: "greet".to_string(),
                    ..PluginCommand::default()
                }],
            }
        }

        fn run(&mut self, cli: &mut CliConnection<'_>, args: &[String]) -> Result<()> {
            match args.first().map(String::as_str) {
                Some("greet") => {
                    let org = cli.current_org()?;
                    cli.println(format!("hello {org}"))
                }
                _ => bail!("unknown command"),
            }
        }
    }

    fn serve_in_background() -> (FrameTransport, thread::JoinHandle<Result<()>>) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let address = listener.local_addr().expect("address");
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            serve(&mut Greeter, FrameTransport::new(stream)?)
        });
        let host = FrameTransport::new(TcpStream::connect(address).expect("connect"))
            .expect("host transport");
        (host, server)
    }

    #[test]
    fn functional_serve_answers_metadata_and_shutdown() {
        let (mut host, server) = serve_in_background();
        host.send(&RpcFrame::new("host-1", RpcFrameKind::MetadataRequest))
            .expect("send");
        let response = host.recv().expect("recv").expect("frame");
        assert_eq!(response.kind, RpcFrameKind::MetadataResponse);
        let payload: MetadataResponsePayload = response.payload_as().expect("payload");
        assert_eq!(payload.metadata.name, "Greeter");

        host.send(&RpcFrame::new("host-2", RpcFrameKind::ShutdownRequest))
            .expect("send");
        server.join().expect("server thread").expect("serve");
    }

    #[test]
    fn functional_run_round_trips_callback_and_output() {
        let (mut host, server) = serve_in_background();
        host.send(
            &RpcFrame::with_payload(
                "host-1",
                RpcFrameKind::RunRequest,
                &RunRequestPayload {
                    args: vec!["greet".to_string()],
                },
            )
            .expect("frame"),
        )
        .expect("send");

        let callback = host.recv().expect("recv").expect("callback");
        assert_eq!(callback.kind, RpcFrameKind::CallbackRequest);
        let request: CallbackRequestPayload = callback.payload_as().expect("payload");
        assert_eq!(request.method, "cli.current_org");
        host.send(
            &RpcFrame::with_payload(
                callback.request_id,
                RpcFrameKind::CallbackResponse,
                &CallbackResponsePayload {
                    result: Some(Value::String("acme".to_string())),
                    error: None,
                },
            )
            .expect("frame"),
        )
        .expect("send");

        let output = host.recv().expect("recv").expect("output");
        let text: OutputPayload = output.payload_as().expect("payload");
        assert_eq!(text.text, "hello acme");

        let done = host.recv().expect("recv").expect("run response");
        assert_eq!(done.kind, RpcFrameKind::RunResponse);
        assert_eq!(done.request_id, "host-1");
        let payload: RunResponsePayload = done.payload_as().expect("payload");
        assert_eq!(payload.error, None);

        drop(host);
        server.join().expect("server thread").expect("serve");
    }

    #[test]
    fn regression_callback_error_surfaces_as_run_failure() {
        let (mut host, server) = serve_in_background();
        host.send(
            &RpcFrame::with_payload(
                "host-1",
                RpcFrameKind::RunRequest,
                &RunRequestPayload {
                    args: vec!["greet".to_string()],
                },
            )
            .expect("frame"),
        )
        .expect("send");
        let callback = host.recv().expect("recv").expect("callback");
        host.send(
            &RpcFrame::with_payload(
                callback.request_id,
                RpcFrameKind::CallbackResponse,
                &CallbackResponsePayload {
                    result: None,
                    error: Some(RpcErrorPayload {
                        code: CallbackError::NotTargeted.code().to_string(),
                        message: CallbackError::NotTargeted.to_string(),
                    }),
                },
            )
            .expect("frame"),
        )
        .expect("send");

        let done = host.recv().expect("recv").expect("run response");
        let payload: RunResponsePayload = done.payload_as().expect("payload");
        assert_eq!(payload.error.as_deref(), Some("no org or space targeted"));

        drop(host);
        server.join().expect("server thread").expect("serve");
    }

    #[test]
    fn regression_unexpected_frame_kind_gets_error_reply() {
        let (mut host, server) = serve_in_background();
        host.send(&RpcFrame::new("host-9", RpcFrameKind::Output))
            .expect("send");
        let reply = host.recv().expect("recv").expect("reply");
        assert_eq!(reply.kind, RpcFrameKind::Error);
        assert_eq!(reply.request_id, "host-9");
        drop(host);
        server.join().expect("server thread").expect("serve");
    }

    #[test]
    fn regression_start_without_bootstrap_argument_fails() {
        let error = start_with_args(Greeter, Vec::<String>::new()).expect_err("not bootstrapped");
        assert!(error.to_string().contains(PLUGIN_BOOTSTRAP_ARG));
    }
}
