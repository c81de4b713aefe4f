use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::protocol::{parse_rpc_frame, RpcFrame};

/// Line-delimited frame stream over one TCP connection.
#[derive(Debug)]
pub struct FrameTransport {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl FrameTransport {
    pub fn new(stream: TcpStream) -> Result<Self> {
        stream
            .set_nodelay(true)
            .context("failed to configure rpc stream")?;
        let writer = stream
            .try_clone()
            .context("failed to clone rpc stream for writing")?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }

    pub fn send(&mut self, frame: &RpcFrame) -> Result<()> {
        let mut line = frame.to_line()?;
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .and_then(|()| self.writer.flush())
            .with_context(|| format!("failed to send rpc frame '{}'", frame.kind.as_str()))
    }

    /// Bounds each blocking read; `None` waits indefinitely.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.reader
            .get_ref()
            .set_read_timeout(timeout)
            .context("failed to set rpc read timeout")
    }

    /// Reads the next frame; `None` once the peer has closed the stream.
    pub fn recv(&mut self) -> Result<Option<RpcFrame>> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = self
                .reader
                .read_line(&mut line)
                .context("failed to read rpc frame")?;
            if read == 0 {
                return Ok(None);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return parse_rpc_frame(trimmed).map(Some);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread;

    use super::*;
    use crate::protocol::{OutputPayload, RpcFrameKind};

    fn connected_pair() -> (FrameTransport, FrameTransport) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let address = listener.local_addr().expect("address");
        let client = thread::spawn(move || TcpStream::connect(address).expect("connect"));
        let (server, _) = listener.accept().expect("accept");
        let client = client.join().expect("client thread");
        (
            FrameTransport::new(server).expect("server transport"),
            FrameTransport::new(client).expect("client transport"),
        )
    }

    #[test]
    fn functional_frames_arrive_in_send_order() {
        let (mut host, mut plugin) = connected_pair();
        for index in 0..3 {
            let frame = RpcFrame::with_payload(
                format!("plugin-{index}"),
                RpcFrameKind::Output,
                &OutputPayload {
                    text: format!("line {index}"),
                },
            )
            .expect("frame");
            plugin.send(&frame).expect("send");
        }

        for index in 0..3 {
            let frame = host.recv().expect("recv").expect("frame");
            assert_eq!(frame.request_id, format!("plugin-{index}"));
            let payload: OutputPayload = frame.payload_as().expect("payload");
            assert_eq!(payload.text, format!("line {index}"));
        }
    }

    #[test]
    fn regression_recv_reports_closed_peer_as_none() {
        let (mut host, plugin) = connected_pair();
        drop(plugin);
        assert!(host.recv().expect("recv").is_none());
    }

    #[test]
    fn regression_recv_times_out_when_peer_is_silent() {
        let (mut host, _plugin) = connected_pair();
        host.set_read_timeout(Some(Duration::from_millis(50)))
            .expect("timeout");
        let error = host.recv().expect_err("silent peer must time out");
        assert!(error.to_string().contains("failed to read rpc frame"));
    }

    #[test]
    fn regression_recv_surfaces_malformed_lines() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let address = listener.local_addr().expect("address");
        let writer = thread::spawn(move || {
            let mut stream = TcpStream::connect(address).expect("connect");
            stream.write_all(b"\nnot json\n").expect("write");
        });
        let (server, _) = listener.accept().expect("accept");
        writer.join().expect("writer thread");

        let mut host = FrameTransport::new(server).expect("transport");
        let error = host.recv().expect_err("malformed");
        assert!(error.to_string().contains("failed to parse rpc frame JSON"));
    }
}
