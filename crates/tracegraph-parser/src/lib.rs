//! # Tracegraph Parser
//!
//! Line splitters and classifiers that turn syscall traces and packet
//! records into `ParsedLog`s ready for ingestion.

pub mod classifier;
pub mod error;
pub mod net;
pub mod session;
pub mod syscall;

pub use classifier::SyscallParser;
pub use error::ParseError;
pub use net::{NetParser, Packet, PacketRecord};
pub use session::{Marker, SessionContext};
pub use syscall::{Syscall, SyscallGroup, SyscallLine};

use tracegraph_core::model::ParsedLog;

/// A stateful line parser; one instance per trace source
pub trait Parser: Send {
    /// Short name used in logs
    fn source(&self) -> &'static str;

    /// Parse one raw line; `Ok(None)` when the line yields no edge
    fn parse_line(&mut self, raw: &str) -> Result<Option<ParsedLog>, ParseError>;
}
