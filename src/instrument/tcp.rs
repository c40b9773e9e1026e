//! SCPI over a raw TCP socket.
//!
//! LXI instruments accept newline-terminated SCPI on TCP port 5025. Every query is
//! answered with one line, read here under a per-query timeout.
//!
//! Replies carry no tag tying them to their query. Once a reply has been missed (timeout or
//! read error) a late answer may still be in flight, so the port refuses further traffic
//! until it is reconnected rather than hand that answer to the next query.

use super::{scpi, InstrumentPort};
use crate::error::{AppResult, ScanError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Default raw-socket SCPI port.
pub const DEFAULT_PORT: u16 = 5025;

/// Default query timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Host and port named by a VISA-style socket resource string.
///
/// Accepts `TCPIP0::<host>::<port>::SOCKET`. VXI-11 resources (`::inst0::INSTR`) need an
/// RPC transport this port does not speak and are rejected.
pub fn parse_socket_resource(resource: &str) -> AppResult<(String, u16)> {
    let parts: Vec<&str> = resource.trim().split("::").collect();
    match parts.as_slice() {
        [iface, host, port, suffix]
            if iface.to_uppercase().starts_with("TCPIP")
                && suffix.eq_ignore_ascii_case("SOCKET") =>
        {
            let port = port.parse::<u16>().map_err(|_| {
                ScanError::Configuration(format!(
                    "Invalid port '{}' in resource '{}'",
                    port, resource
                ))
            })?;
            Ok((host.to_string(), port))
        }
        _ => Err(ScanError::Configuration(format!(
            "Unsupported resource '{}'. Expected TCPIP0::<host>::<port>::SOCKET",
            resource
        ))),
    }
}

/// Instrument port speaking SCPI over TCP.
pub struct TcpScpiPort {
    stream: BufReader<TcpStream>,
    address: String,
    timeout: Duration,
    desynchronised: bool,
}

impl TcpScpiPort {
    /// Connect to `host:port`, giving up after `connect_timeout`.
    pub async fn connect(host: &str, port: u16, connect_timeout: Duration) -> AppResult<Self> {
        let address = format!("{}:{}", host, port);
        let stream = timeout(connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| ScanError::Transport(format!("Connection timeout to {}", address)))?
            .map_err(|e| ScanError::Transport(format!("Failed to connect to {}: {}", address, e)))?;

        stream
            .set_nodelay(true)
            .map_err(|e| ScanError::Transport(format!("Failed to configure socket: {}", e)))?;

        tracing::info!(%address, "Connected to instrument");

        Ok(Self {
            stream: BufReader::new(stream),
            address,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            desynchronised: false,
        })
    }

    /// Replace the connection after the link lost track of which reply is which.
    pub async fn reconnect(&mut self, connect_timeout: Duration) -> AppResult<()> {
        let (host, port) = self.address.rsplit_once(':').ok_or_else(|| {
            ScanError::Configuration(format!("Malformed address '{}'", self.address))
        })?;
        let port = port.parse::<u16>().map_err(|_| {
            ScanError::Configuration(format!("Malformed address '{}'", self.address))
        })?;
        let fresh = Self::connect(host, port, connect_timeout).await?;
        self.stream = fresh.stream;
        self.desynchronised = false;
        Ok(())
    }

    /// True after a missed reply; every call fails until [`TcpScpiPort::reconnect`].
    pub fn is_desynchronised(&self) -> bool {
        self.desynchronised
    }

    fn ensure_synchronised(&self) -> AppResult<()> {
        if self.desynchronised {
            return Err(ScanError::Transport(format!(
                "Link to {} lost reply sync; reconnect required",
                self.address
            )));
        }
        Ok(())
    }

    fn lose_sync(&mut self, error: ScanError) -> ScanError {
        tracing::warn!(address = %self.address, "Reply stream out of sync: {}", error);
        self.desynchronised = true;
        error
    }

    /// Set the per-query reply timeout.
    pub fn with_timeout(mut self, duration: Duration) -> Self {
        self.timeout = duration;
        self
    }

    async fn write_line(&mut self, command: &str) -> AppResult<()> {
        let line = format!("{}\n", command);
        let writer = self.stream.get_mut();
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ScanError::Transport(format!("Failed to write '{}': {}", command, e)))?;
        writer
            .flush()
            .await
            .map_err(|e| ScanError::Transport(format!("Failed to flush stream: {}", e)))?;
        Ok(())
    }

    /// Shut down the write half of the socket.
    pub async fn close(mut self) -> AppResult<()> {
        self.stream
            .get_mut()
            .shutdown()
            .await
            .map_err(|e| ScanError::Transport(format!("Failed to close {}: {}", self.address, e)))?;
        tracing::info!(address = %self.address, "Instrument connection closed");
        Ok(())
    }
}

#[async_trait]
impl InstrumentPort for TcpScpiPort {
    async fn send(&mut self, command: &str) -> AppResult<()> {
        self.ensure_synchronised()?;
        tracing::debug!(command, "SCPI write");
        self.write_line(command).await
    }

    async fn query(&mut self, command: &str) -> AppResult<Vec<f64>> {
        self.ensure_synchronised()?;
        tracing::debug!(command, "SCPI query");
        self.write_line(command).await?;

        let mut reply = String::new();
        match timeout(self.timeout, self.stream.read_line(&mut reply)).await {
            Ok(Ok(0)) => {
                let error =
                    ScanError::Transport(format!("Connection closed by {}", self.address));
                Err(self.lose_sync(error))
            }
            Ok(Ok(_)) => {
                tracing::debug!(reply = reply.trim(), "SCPI reply");
                scpi::parse_ascii_values(&reply)
            }
            Ok(Err(e)) => {
                let error = ScanError::Transport(format!("Failed to read reply: {}", e));
                Err(self.lose_sync(error))
            }
            Err(_) => {
                let error = ScanError::Transport(format!(
                    "Timeout after {}ms waiting for reply to '{}'",
                    self.timeout.as_millis(),
                    command
                ));
                Err(self.lose_sync(error))
            }
        }
    }

    fn describe(&self) -> String {
        format!("TcpScpiPort({})", self.address)
    }
}
