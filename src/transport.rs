//! Transport client (C2, spec §4.2).
//!
//! Owns a single connection to the controller and exposes one call,
//! `request`, whose behavior (whether a payload accompanies the request or
//! the response) is determined entirely by the frame's opcode. Grounded on
//! `original_source/lcloud_client.c`'s single `client_lcloud_bus_request`
//! entry point — one frame in, one optional 256-byte buffer in or out.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use crate::codec::{BlockOp, Opcode, RegisterFrame};
use crate::config::BLOCK_SIZE;
use crate::error::{VfsError, VfsResult};

#[derive(Debug, PartialEq, Eq)]
enum ConnectionState {
    Disconnected,
    Connected,
}

/// A single TCP connection to the controller, plus the lazy-connect /
/// close-on-power-off lifecycle described in §4.2.
#[derive(Debug)]
pub struct TransportClient {
    addr: SocketAddr,
    connect_timeout: Duration,
    state: ConnectionState,
    stream: Option<TcpStream>,
}

impl TransportClient {
    pub fn new(addr: SocketAddr, connect_timeout: Duration) -> Self {
        Self {
            addr,
            connect_timeout,
            state: ConnectionState::Disconnected,
            stream: None,
        }
    }

    fn ensure_connected(&mut self) -> VfsResult<()> {
        if self.state == ConnectionState::Connected {
            return Ok(());
        }
        tracing::debug!(addr = %self.addr, "connecting to controller");
        let stream = TcpStream::connect_timeout(&self.addr, self.connect_timeout)?;
        self.stream = Some(stream);
        self.state = ConnectionState::Connected;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.stream = None;
        self.state = ConnectionState::Disconnected;
    }

    /// Send `frame` (and `payload` when the opcode calls for a
    /// request-side payload), then receive the response frame (and its
    /// payload, when the opcode calls for one).
    ///
    /// A short read/write on the stream is reported as a [`VfsError::Io`]
    /// and drops the connection back to disconnected — there is no retry.
    pub fn request(
        &mut self,
        frame: RegisterFrame,
        payload: Option<&[u8; BLOCK_SIZE]>,
    ) -> VfsResult<(RegisterFrame, Option<[u8; BLOCK_SIZE]>)> {
        let opcode = frame
            .opcode()
            .ok_or_else(|| VfsError::Protocol(format!("unknown opcode {:#x}", frame.c0)))?;

        if opcode == Opcode::PowerOn {
            self.ensure_connected()?;
        }

        if self.state != ConnectionState::Connected {
            return Err(VfsError::Protocol(
                "request issued before power-on".to_string(),
            ));
        }

        let result = self.exchange(opcode, frame, payload);

        if result.is_err() {
            self.disconnect();
        } else if opcode == Opcode::PowerOff {
            self.disconnect();
        }

        result
    }

    fn exchange(
        &mut self,
        opcode: Opcode,
        frame: RegisterFrame,
        payload: Option<&[u8; BLOCK_SIZE]>,
    ) -> VfsResult<(RegisterFrame, Option<[u8; BLOCK_SIZE]>)> {
        let stream = self
            .stream
            .as_mut()
            .expect("exchange only called while connected");

        let request_has_payload =
            opcode == Opcode::BlockXfer && frame.block_op() == Some(BlockOp::Write);
        let response_has_payload =
            opcode == Opcode::BlockXfer && frame.block_op() == Some(BlockOp::Read);

        stream.write_all(&frame.to_bytes())?;
        if request_has_payload {
            let buf = payload.ok_or_else(|| {
                VfsError::Protocol("block-xfer write requires a payload".to_string())
            })?;
            stream.write_all(buf)?;
        }
        stream.flush()?;

        let mut response_bytes = [0u8; 8];
        stream.read_exact(&mut response_bytes)?;
        let response = RegisterFrame::from_bytes(response_bytes);

        if response.opcode() != Some(opcode) {
            return Err(VfsError::Protocol(format!(
                "expected opcode {:#x} in response, got {:#x}",
                frame.c0, response.c0
            )));
        }
        if !response.is_success_response() {
            return Err(VfsError::Controller { opcode: frame.c0 });
        }

        let response_payload = if response_has_payload {
            let mut buf = [0u8; BLOCK_SIZE];
            stream.read_exact(&mut buf)?;
            Some(buf)
        } else {
            None
        };

        Ok((response, response_payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::pack;
    use std::net::TcpListener;
    use std::thread;

    /// A one-shot stub controller: accepts one connection, echoes back a
    /// success frame for whatever opcode it was asked, with no payload.
    fn spawn_stub_controller() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 8];
                if stream.read_exact(&mut buf).is_ok() {
                    let request = RegisterFrame::from_bytes(buf);
                    let response = pack(1, 1, request.c0, request.c1, request.c2, 0, 0);
                    let _ = stream.write_all(&response.to_be_bytes());
                }
            }
        });
        addr
    }

    #[test]
    fn power_on_connects_lazily_and_returns_success() {
        let addr = spawn_stub_controller();
        let mut client = TransportClient::new(addr, Duration::from_millis(500));
        let frame = RegisterFrame {
            b0: 0,
            b1: 0,
            c0: Opcode::PowerOn as u8,
            c1: 0,
            c2: 0,
            d0: 0,
            d1: 0,
        };
        let (response, payload) = client.request(frame, None).unwrap();
        assert!(response.is_success_response());
        assert!(payload.is_none());
    }

    #[test]
    fn request_before_power_on_is_rejected() {
        let addr = "127.0.0.1:1".parse().unwrap(); // never connects
        let mut client = TransportClient::new(addr, Duration::from_millis(50));
        let frame = RegisterFrame {
            b0: 0,
            b1: 0,
            c0: Opcode::DevProbe as u8,
            c1: 0,
            c2: 0,
            d0: 0,
            d1: 0,
        };
        let err = client.request(frame, None).unwrap_err();
        assert!(matches!(err, VfsError::Protocol(_)));
    }
}
