//! # Packet Record Parser
//!
//! Packet captures arrive as one JSON object per line. Endpoints inside a
//! traced container become that container's gateway process; everything
//! else becomes a socket of the outer pseudo container.

use crate::error::ParseError;
use crate::Parser;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracegraph_core::config::{TopologyConfig, TraceGraphConfig};
use tracegraph_core::model::{
    EdgeClass, EventEdge, NetEdge, ParsedLog, Placement, ProcessVertex, SocketVertex, Vertex, VertexKind, UNKNOWN,
};
use tracing::{error, warn};

lazy_static! {
    static ref REQUEST_UUID: Regex = Regex::new(r"uuid: (\d+)").unwrap();
}

/// Process standing in for a container on the packet side
pub const GATEWAY_PROCESS: &str = "fwatchdog";
const GATEWAY_VPID: &str = "1";

const GATEWAY_LABEL: &str = "gateway";
const GATEWAY_PORT: &str = "8080";
const HOST_SERVICE_PORT: &str = "8085";

/// Raw packet record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacketRecord {
    pub ip_src: String,
    pub port_src: i64,
    pub ip_dst: String,
    pub port_dst: i64,
    pub sequence_num: i64,
    pub acknowledge_num: i64,
    pub payload_len: i64,
    pub payload: String,
    /// seconds since epoch
    pub time_stamp: f64,
}

/// A split packet record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub src_ip: String,
    pub src_port: String,
    pub dst_ip: String,
    pub dst_port: String,
    pub seq_num: i64,
    pub ack_num: i64,
    pub payload_len: i64,
    pub payload: String,
    pub method: String,
    /// microseconds since epoch
    pub time: i64,
    /// empty when the payload carries none
    pub uuid: String,
}

impl Packet {
    pub fn split(raw: &str) -> Result<Self, ParseError> {
        let record: PacketRecord = serde_json::from_str(raw)?;
        Ok(Self::from(record))
    }
}

impl From<PacketRecord> for Packet {
    fn from(record: PacketRecord) -> Self {
        Self {
            method: http_method(&record.payload).to_string(),
            uuid: request_uuid(&record.payload),
            src_ip: record.ip_src,
            src_port: record.port_src.to_string(),
            dst_ip: record.ip_dst,
            dst_port: record.port_dst.to_string(),
            seq_num: record.sequence_num,
            ack_num: record.acknowledge_num,
            payload_len: record.payload_len,
            payload: record.payload,
            time: (record.time_stamp * 1_000_000.0) as i64,
        }
    }
}

/// First payload token mapped to a method; responses become `RESPONSE`
pub fn http_method(payload: &str) -> &'static str {
    let Some((first, _)) = payload.split_once(' ') else {
        return "UNKNOWN";
    };
    match first {
        _ if first.starts_with("HTTP") => "RESPONSE",
        "GET" => "GET",
        "POST" => "POST",
        "PUT" => "PUT",
        "DELETE" => "DELETE",
        _ => "UNKNOWN",
    }
}

pub fn request_uuid(payload: &str) -> String {
    REQUEST_UUID
        .captures(payload)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// Parser for packet records
pub struct NetParser {
    topology: TopologyConfig,
}

impl NetParser {
    pub fn new(config: &TraceGraphConfig) -> Self {
        Self {
            topology: config.topology.clone(),
        }
    }

    pub fn classify(&self, packet: Packet) -> Option<ParsedLog> {
        let start = self.endpoint(&packet.src_ip, &packet.src_port);
        let end = self.endpoint(&packet.dst_ip, &packet.dst_port);

        let class = match (start.kind(), end.kind()) {
            (VertexKind::Socket, VertexKind::Socket) => {
                let edge = NetEdge {
                    method: packet.method,
                    payload: packet.payload,
                    payload_len: packet.payload_len,
                    seq_num: packet.seq_num,
                    ack_num: packet.ack_num,
                    time: packet.time,
                    uuid: packet.uuid,
                };
                return Some(ParsedLog::net(edge, start, end));
            }
            (VertexKind::Process, VertexKind::Socket) => EdgeClass::NetworkV1,
            (VertexKind::Socket, VertexKind::Process) => EdgeClass::NetworkV2,
            _ => {
                error!(
                    "Packet between two container processes dropped: {}:{} -> {}:{}",
                    packet.src_ip, packet.src_port, packet.dst_ip, packet.dst_port
                );
                return None;
            }
        };

        let edge = EventEdge {
            class,
            relation: packet.method.clone(),
            operation: packet.method,
            time: packet.time,
            uuid: if packet.uuid.is_empty() { UNKNOWN.to_string() } else { packet.uuid },
        };
        Some(ParsedLog::event(edge, start, end))
    }

    fn endpoint(&self, ip: &str, port: &str) -> Vertex {
        let host = &self.topology.local_host;
        if let Some(container) = self.topology.container_for(ip) {
            return Vertex::Process(ProcessVertex {
                placement: Placement::new(host.id.as_str(), host.name.as_str(), container.id.as_str(), container.name.as_str()),
                vpid: GATEWAY_VPID.to_string(),
                name: GATEWAY_PROCESS.to_string(),
                exe_path: UNKNOWN.to_string(),
            });
        }

        let (dst_ip, dst_port) = self.normalise_socket(ip, port);
        let outer = &self.topology.outer_container;
        Vertex::Socket(SocketVertex {
            placement: Placement::new(host.id.as_str(), host.name.as_str(), outer.id.as_str(), outer.name.as_str()),
            dst_ip,
            dst_port,
        })
    }

    /// Fold gateway and host-side addresses onto stable socket identities
    pub fn normalise_socket(&self, ip: &str, port: &str) -> (String, String) {
        if self.topology.is_gateway(ip) {
            return (GATEWAY_LABEL.to_string(), GATEWAY_PORT.to_string());
        }
        if let Some(host_ip) = self.topology.host_ip.as_deref() {
            let is_cin0 = self.topology.cin0_ip.as_deref() == Some(ip);
            if is_cin0 || ip == host_ip || ip == "127.0.0.1" {
                return (host_ip.to_string(), HOST_SERVICE_PORT.to_string());
            }
        }
        (ip.to_string(), port.to_string())
    }
}

impl Parser for NetParser {
    fn source(&self) -> &'static str {
        "net"
    }

    fn parse_line(&mut self, raw: &str) -> Result<Option<ParsedLog>, ParseError> {
        if raw.trim().is_empty() {
            warn!("Skipping empty packet record");
            return Ok(None);
        }
        let packet = Packet::split(raw)?;
        Ok(self.classify(packet))
    }
}
