//! # Syscall Line Splitter
//!
//! Splits one space-separated trace line into typed fields:
//! `date time process_name tid pid vpid dir syscall fd ppid cmd ret container_id container_name <params...>`

use crate::error::ParseError;
use chrono::{FixedOffset, NaiveDateTime, TimeZone};
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use tracegraph_core::config::{HostIdentity, TopologyConfig, TraceConfig};
use tracegraph_core::model::{Placement, LOCALHOST};
use tracing::warn;

/// Minimum number of fields in a trace line
pub const MIN_FIELDS: usize = 15;

/// Placeholder the tracer prints for missing values
pub const NA: &str = "<NA>";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

lazy_static! {
    static ref SOCKET_FD: Regex = Regex::new(r"^\d+\.\d+\.\d+\.\d+:\d+->\d+\.\d+\.\d+\.\d+:\d+$").unwrap();
    static ref FOUR_TUPLE: Regex = Regex::new(r"(\d+\.\d+\.\d+\.\d+):(\d+)->(\d+\.\d+\.\d+\.\d+):(\d+)").unwrap();
    static ref LISTEN_PORT: Regex = Regex::new(r":::(\d+)").unwrap();
    static ref OPEN_FLAGS: Regex = Regex::new(r"flags=\d+\(([^)]+)\)").unwrap();
}

/// Syscalls the classifier understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Syscall {
    Fork,
    Vfork,
    Clone,
    Execve,
    Bind,
    Listen,
    Accept,
    Accept4,
    Connect,
    Sendto,
    Recvfrom,
    Open,
    Openat,
    Read,
    Readv,
    Write,
    Writev,
}

impl Syscall {
    pub fn as_str(&self) -> &'static str {
        match self {
            Syscall::Fork => "fork",
            Syscall::Vfork => "vfork",
            Syscall::Clone => "clone",
            Syscall::Execve => "execve",
            Syscall::Bind => "bind",
            Syscall::Listen => "listen",
            Syscall::Accept => "accept",
            Syscall::Accept4 => "accept4",
            Syscall::Connect => "connect",
            Syscall::Sendto => "sendto",
            Syscall::Recvfrom => "recvfrom",
            Syscall::Open => "open",
            Syscall::Openat => "openat",
            Syscall::Read => "read",
            Syscall::Readv => "readv",
            Syscall::Write => "write",
            Syscall::Writev => "writev",
        }
    }
}

impl fmt::Display for Syscall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Syscall {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let syscall = match s {
            "fork" => Syscall::Fork,
            "vfork" => Syscall::Vfork,
            "clone" => Syscall::Clone,
            "execve" => Syscall::Execve,
            "bind" => Syscall::Bind,
            "listen" => Syscall::Listen,
            "accept" => Syscall::Accept,
            "accept4" => Syscall::Accept4,
            "connect" => Syscall::Connect,
            "sendto" => Syscall::Sendto,
            "recvfrom" => Syscall::Recvfrom,
            "open" => Syscall::Open,
            "openat" => Syscall::Openat,
            "read" => Syscall::Read,
            "readv" => Syscall::Readv,
            "write" => Syscall::Write,
            "writev" => Syscall::Writev,
            other => return Err(ParseError::UnknownSyscall(other.to_string())),
        };
        Ok(syscall)
    }
}

/// Event direction: `>` entry, `<` exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Enter,
    Exit,
}

impl FromStr for Direction {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ">" => Ok(Direction::Enter),
            "<" => Ok(Direction::Exit),
            other => Err(ParseError::Direction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallGroup {
    Process,
    Network,
    File,
}

/// How an `open`/`openat` is reclassified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

impl OpenMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpenMode::Read => "read",
            OpenMode::Write => "write",
        }
    }
}

/// Connection endpoints ordered as (source, destination)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FourTuple {
    pub src_ip: String,
    pub src_port: String,
    pub dst_ip: String,
    pub dst_port: String,
}

/// A split trace line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyscallLine {
    /// microseconds since epoch
    pub time: i64,
    pub process_name: String,
    pub tid: String,
    pub pid: String,
    pub vpid: String,
    pub dir: Direction,
    pub syscall: Syscall,
    pub fd: String,
    pub ppid: String,
    pub cmd: String,
    pub ret: String,
    pub container_id: String,
    pub container_name: String,
    pub params: Vec<String>,
    pub host_id: String,
    pub host_name: String,
}

impl SyscallLine {
    pub fn split(raw: &str, trace: &TraceConfig, host: &HostIdentity) -> Result<Self, ParseError> {
        let fields: Vec<&str> = raw.split(' ').collect();
        if fields.len() < MIN_FIELDS {
            return Err(ParseError::NotEnoughFields {
                expected: MIN_FIELDS,
                found: fields.len(),
            });
        }

        let time = parse_timestamp(fields[0], fields[1], trace.utc_offset_seconds)?;
        let dir = fields[6].parse()?;
        let syscall = fields[7].parse()?;

        Ok(Self {
            time,
            process_name: fields[2].to_string(),
            tid: fields[3].to_string(),
            pid: fields[4].to_string(),
            vpid: fields[5].to_string(),
            dir,
            syscall,
            fd: fields[8].to_string(),
            ppid: fields[9].to_string(),
            cmd: fields[10].to_string(),
            ret: fields[11].to_string(),
            container_id: fields[12].to_string(),
            container_name: fields[13].to_string(),
            params: fields[14..].iter().map(|s| s.to_string()).collect(),
            host_id: host.id.clone(),
            host_name: host.name.clone(),
        })
    }

    pub fn group(&self) -> SyscallGroup {
        match self.syscall {
            Syscall::Fork | Syscall::Vfork | Syscall::Clone | Syscall::Execve => SyscallGroup::Process,
            Syscall::Bind
            | Syscall::Listen
            | Syscall::Accept
            | Syscall::Accept4
            | Syscall::Connect
            | Syscall::Sendto
            | Syscall::Recvfrom => SyscallGroup::Network,
            Syscall::Read | Syscall::Write if is_socket_fd(&self.fd) => SyscallGroup::Network,
            Syscall::Read | Syscall::Readv | Syscall::Write | Syscall::Writev | Syscall::Open | Syscall::Openat => {
                SyscallGroup::File
            }
        }
    }

    pub fn is_entry(&self) -> bool {
        self.dir == Direction::Enter
    }

    pub fn placement(&self) -> Placement {
        Placement::new(
            self.host_id.as_str(),
            self.host_name.as_str(),
            self.container_id.as_str(),
            self.container_name.as_str(),
        )
    }

    /// `host#container`
    pub fn scope_key(&self) -> String {
        format!("{}#{}", self.host_id, self.container_id)
    }

    /// `host#container#vpid`
    pub fn process_key(&self) -> String {
        format!("{}#{}#{}", self.host_id, self.container_id, self.vpid)
    }

    pub fn has_fd(&self) -> bool {
        !self.fd.is_empty() && self.fd != NA
    }

    /// Port from a `:::<port>` listening fd
    pub fn listen_port(&self) -> Option<&str> {
        LISTEN_PORT
            .captures(&self.fd)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }

    /// Read or write intent of an `open`/`openat` from its `flags=` parameter
    pub fn open_mode(&self) -> Option<OpenMode> {
        let joined = self.params.join(" ");
        let caps = OPEN_FLAGS.captures(&joined)?;
        let flags: Vec<&str> = caps.get(1)?.as_str().split('|').map(str::trim).collect();

        const WRITE_FLAGS: [&str; 5] = ["O_WRONLY", "O_RDWR", "O_APPEND", "O_CREAT", "O_TRUNC"];
        if flags.iter().any(|flag| WRITE_FLAGS.contains(flag)) {
            Some(OpenMode::Write)
        } else if flags.contains(&"O_RDONLY") {
            Some(OpenMode::Read)
        } else {
            None
        }
    }
}

/// Parse `date time` in the tracer's fixed utc offset into microseconds
pub fn parse_timestamp(date: &str, time: &str, utc_offset_seconds: i32) -> Result<i64, ParseError> {
    let raw = format!("{} {}", date, time);
    let naive = NaiveDateTime::parse_from_str(&raw, TIME_FORMAT)
        .map_err(|e| ParseError::Timestamp(format!("{}: {}", raw, e)))?;
    let offset = FixedOffset::east_opt(utc_offset_seconds)
        .ok_or_else(|| ParseError::Timestamp(format!("utc offset {} out of range", utc_offset_seconds)))?;
    let local = offset
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| ParseError::Timestamp(raw.clone()))?;
    Ok(local.timestamp_micros())
}

/// `a.b.c.d:p->e.f.g.h:q`
pub fn is_socket_fd(fd: &str) -> bool {
    SOCKET_FD.is_match(fd)
}

fn is_loopback(ip: &str) -> bool {
    ip == LOCALHOST || ip == "127.0.0.1"
}

/// Order the two sides of a socket fd so the remote end comes last
pub fn resolve_four_tuple(fd: &str, topology: &TopologyConfig) -> Option<FourTuple> {
    let caps = FOUR_TUPLE.captures(fd)?;
    let (left_ip, left_port) = (caps.get(1)?.as_str(), caps.get(2)?.as_str());
    let (right_ip, right_port) = (caps.get(3)?.as_str(), caps.get(4)?.as_str());

    let ordered = |src_ip: &str, src_port: &str, dst_ip: &str, dst_port: &str| FourTuple {
        src_ip: src_ip.to_string(),
        src_port: src_port.to_string(),
        dst_ip: dst_ip.to_string(),
        dst_port: dst_port.to_string(),
    };

    // DNS traffic shows the host ip instead of the container ip
    if left_port == "53" {
        return Some(ordered(right_ip, right_port, left_ip, left_port));
    }
    if right_port == "53" {
        return Some(ordered(left_ip, left_port, right_ip, right_port));
    }
    if topology.is_container_ip(left_ip) {
        return Some(ordered(left_ip, left_port, right_ip, right_port));
    }
    if topology.is_container_ip(right_ip) {
        return Some(ordered(right_ip, right_port, left_ip, left_port));
    }
    if is_loopback(left_ip) && is_loopback(right_ip) {
        return Some(ordered(LOCALHOST, left_port, LOCALHOST, right_port));
    }

    warn!("Unresolved socket orientation, keeping as written: {}", fd);
    Some(ordered(left_ip, left_port, right_ip, right_port))
}
