//! Instrument Port: the request/response link to the switch/DMM unit.
//!
//! The scan core only needs two operations from the link. `send` issues a configuration
//! or action command, `query` issues a query and returns the numeric values of the reply.
//! Concrete ports:
//!
//! - [`tcp::TcpScpiPort`]: newline-terminated SCPI over a raw TCP socket.
//! - [`mock::MockInstrument`]: deterministic fake with a command log and failure injection.
//!
//! Both methods take `&mut self`: a port has a single owner for the session, and a new
//! command is never issued before the previous one has completed.

use crate::error::AppResult;
use async_trait::async_trait;

pub mod mock;
pub mod scpi;
pub mod tcp;

pub use mock::{FailureMode, MockInstrument};
pub use tcp::TcpScpiPort;

/// Request/response access to a measurement instrument.
///
/// # Contract
/// - Each call completes (reply or error) before it returns; calls never overlap.
/// - Link failures and timeouts surface as `ScanError::Transport`.
/// - Replies that are empty or not numeric surface as `ScanError::Protocol`.
#[async_trait]
pub trait InstrumentPort: Send {
    /// Send a command that produces no reply.
    async fn send(&mut self, command: &str) -> AppResult<()>;

    /// Send a query and return every numeric value in the reply, in order.
    async fn query(&mut self, command: &str) -> AppResult<Vec<f64>>;

    /// Short description for log messages.
    fn describe(&self) -> String {
        "instrument".to_string()
    }
}

#[async_trait]
impl<P: InstrumentPort + ?Sized> InstrumentPort for Box<P> {
    async fn send(&mut self, command: &str) -> AppResult<()> {
        (**self).send(command).await
    }

    async fn query(&mut self, command: &str) -> AppResult<Vec<f64>> {
        (**self).query(command).await
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
