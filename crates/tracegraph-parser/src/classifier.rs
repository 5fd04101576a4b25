//! # Syscall Classifier
//!
//! Turns split trace lines into `ParsedLog`s. Entry events only feed the
//! session state; edges are emitted on exit.

use crate::error::ParseError;
use crate::session::{Marker, SessionContext};
use crate::syscall::{resolve_four_tuple, OpenMode, Syscall, SyscallGroup, SyscallLine, NA};
use crate::Parser;
use tracegraph_core::config::{TopologyConfig, TraceConfig, TraceGraphConfig};
use tracegraph_core::model::{
    EdgeClass, EventEdge, FileVertex, ParsedLog, Placement, ProcessVertex, SocketVertex, Vertex, LOCALHOST,
};
use tracing::{debug, warn};

/// Stateful parser for syscall trace lines
pub struct SyscallParser {
    topology: TopologyConfig,
    trace: TraceConfig,
    session: SessionContext,
}

impl SyscallParser {
    pub fn new(config: &TraceGraphConfig) -> Self {
        Self {
            topology: config.topology.clone(),
            trace: config.trace.clone(),
            session: SessionContext::new(),
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn split(&self, raw: &str) -> Result<SyscallLine, ParseError> {
        SyscallLine::split(raw, &self.trace, &self.topology.local_host)
    }

    /// Classify one split line, updating session state
    pub fn classify(&mut self, line: &SyscallLine) -> Option<ParsedLog> {
        match line.group() {
            SyscallGroup::Process => self.classify_process(line),
            SyscallGroup::Network => self.classify_network(line),
            SyscallGroup::File => self.classify_file(line),
        }
    }

    fn classify_process(&mut self, line: &SyscallLine) -> Option<ParsedLog> {
        if line.syscall == Syscall::Execve {
            if line.is_entry() {
                self.session
                    .begin_exec(line.process_key(), line.process_name.as_str(), line.cmd.as_str());
                return None;
            }
            let pending = self.session.take_exec(&line.process_key())?;
            let start = Vertex::Process(ProcessVertex {
                placement: line.placement(),
                vpid: line.vpid.clone(),
                name: pending.name,
                exe_path: pending.exe_path,
            });
            let edge = self.event(line, EdgeClass::Process, Syscall::Execve.as_str());
            return Some(ParsedLog::event(edge, start, process_vertex(line)));
        }

        // fork, vfork, clone: the parent sees the child's vpid as return value
        if line.is_entry() || line.ret == "0" || line.ret == "-1" {
            return None;
        }
        if line.ret == NA {
            warn!("Process created without return value: {} vpid {}", line.syscall, line.vpid);
            return None;
        }
        let child = Vertex::Process(ProcessVertex {
            placement: line.placement(),
            vpid: line.ret.clone(),
            name: line.process_name.clone(),
            exe_path: line.cmd.clone(),
        });
        let edge = self.event(line, EdgeClass::Process, line.syscall.as_str());
        Some(ParsedLog::event(edge, process_vertex(line), child))
    }

    fn classify_network(&mut self, line: &SyscallLine) -> Option<ParsedLog> {
        if line.is_entry() {
            return None;
        }
        match line.syscall {
            Syscall::Sendto | Syscall::Connect | Syscall::Write => {
                let socket = self.remote_socket(line)?;
                let edge = self.event(line, EdgeClass::NetworkV1, line.syscall.as_str());
                Some(ParsedLog::event(edge, process_vertex(line), socket))
            }
            Syscall::Recvfrom | Syscall::Read => {
                let socket = self.remote_socket(line)?;
                let edge = self.event(line, EdgeClass::NetworkV2, line.syscall.as_str());
                Some(ParsedLog::event(edge, socket, process_vertex(line)))
            }
            Syscall::Bind | Syscall::Listen => {
                let port = line.listen_port()?;
                let socket = Vertex::Socket(SocketVertex {
                    placement: line.placement(),
                    dst_ip: LOCALHOST.to_string(),
                    dst_port: port.to_string(),
                });
                let edge = self.event(line, EdgeClass::NetworkV1, line.syscall.as_str());
                Some(ParsedLog::event(edge, process_vertex(line), socket))
            }
            Syscall::Accept | Syscall::Accept4 => None,
            other => {
                warn!("Unexpected syscall in network group: {}", other);
                None
            }
        }
    }

    fn classify_file(&mut self, line: &SyscallLine) -> Option<ParsedLog> {
        if line.is_entry() {
            return None;
        }
        if let Some((marker, id)) = Marker::detect(line) {
            self.session.apply_marker(&line.scope_key(), marker, id);
            debug!("Request marker {:?} {} in {}", marker, id, line.scope_key());
            return None;
        }
        if !line.has_fd() {
            return None;
        }

        let mode = match line.syscall {
            Syscall::Write | Syscall::Writev => OpenMode::Write,
            Syscall::Read | Syscall::Readv => OpenMode::Read,
            Syscall::Open | Syscall::Openat => match line.open_mode() {
                Some(mode) => mode,
                None => {
                    debug!("Open flags not convertible, dropping: {}", line.params.join(" "));
                    return None;
                }
            },
            other => {
                warn!("Unexpected syscall in file group: {}", other);
                return None;
            }
        };
        // open is reported as the read or write it stands for
        let operation = match line.syscall {
            Syscall::Open | Syscall::Openat => mode.as_str(),
            other => other.as_str(),
        };

        let file = Vertex::File(FileVertex {
            placement: line.placement(),
            path: self.topology.collapse_path(&line.fd).to_string(),
        });
        match mode {
            OpenMode::Write => {
                let edge = self.event(line, EdgeClass::FileV1, operation);
                Some(ParsedLog::event(edge, process_vertex(line), file))
            }
            OpenMode::Read => {
                let edge = self.event(line, EdgeClass::FileV2, operation);
                Some(ParsedLog::event(edge, file, process_vertex(line)))
            }
        }
    }

    /// Destination socket of a four-tuple fd
    fn remote_socket(&self, line: &SyscallLine) -> Option<Vertex> {
        if !line.has_fd() {
            return None;
        }
        let tuple = resolve_four_tuple(&line.fd, &self.topology)?;
        let placement = if tuple.dst_ip == LOCALHOST {
            line.placement()
        } else {
            let host = &self.topology.local_host;
            let outer = &self.topology.outer_container;
            Placement::new(host.id.as_str(), host.name.as_str(), outer.id.as_str(), outer.name.as_str())
        };
        Some(Vertex::Socket(SocketVertex {
            placement,
            dst_ip: tuple.dst_ip,
            dst_port: tuple.dst_port,
        }))
    }

    fn event(&self, line: &SyscallLine, class: EdgeClass, operation: &str) -> EventEdge {
        EventEdge {
            class,
            relation: operation.to_string(),
            operation: operation.to_string(),
            time: line.time,
            uuid: self.session.correlation_id(&line.scope_key(), &line.process_name),
        }
    }
}

fn process_vertex(line: &SyscallLine) -> Vertex {
    Vertex::Process(ProcessVertex {
        placement: line.placement(),
        vpid: line.vpid.clone(),
        name: line.process_name.clone(),
        exe_path: line.cmd.clone(),
    })
}

impl Parser for SyscallParser {
    fn source(&self) -> &'static str {
        "syscall"
    }

    fn parse_line(&mut self, raw: &str) -> Result<Option<ParsedLog>, ParseError> {
        let line = match self.split(raw) {
            Ok(line) => line,
            Err(ParseError::UnknownSyscall(name)) => {
                warn!("Dropping unsupported syscall {}", name);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        Ok(self.classify(&line))
    }
}
