//! Provenance data model: vertices, edges and the staging unit between parser and store

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Correlation id recorded when no request is in flight
pub const UNKNOWN: &str = "unknown";

/// Normalised label for loopback endpoints
pub const LOCALHOST: &str = "localhost";

/// Vertex table a record lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VertexKind {
    Process,
    File,
    Socket,
}

impl VertexKind {
    /// Name of the backing table
    pub fn table(&self) -> &'static str {
        match self {
            VertexKind::Process => "process",
            VertexKind::File => "file",
            VertexKind::Socket => "socket",
        }
    }

    /// Symbol hint used by graph consumers
    pub fn symbol(&self) -> &'static str {
        match self {
            VertexKind::Process => "rect",
            VertexKind::File => "circle",
            VertexKind::Socket => "diamond",
        }
    }

    /// Graphviz shape
    pub fn shape(&self) -> &'static str {
        match self {
            VertexKind::Process => "box",
            VertexKind::File => "ellipse",
            VertexKind::Socket => "diamond",
        }
    }
}

impl fmt::Display for VertexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VertexKind::Process => write!(f, "Process"),
            VertexKind::File => write!(f, "File"),
            VertexKind::Socket => write!(f, "Socket"),
        }
    }
}

/// Locator of a persisted vertex: table plus surrogate primary key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordLoc {
    pub kind: VertexKind,
    pub key: i64,
}

impl RecordLoc {
    pub fn new(kind: VertexKind, key: i64) -> Self {
        Self { kind, key }
    }
}

impl fmt::Display for RecordLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind.table(), self.key)
    }
}

/// Host and container a vertex was observed in
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Placement {
    pub host_id: String,
    pub host_name: String,
    pub container_id: String,
    pub container_name: String,
}

impl Placement {
    pub fn new(
        host_id: impl Into<String>,
        host_name: impl Into<String>,
        container_id: impl Into<String>,
        container_name: impl Into<String>,
    ) -> Self {
        Self {
            host_id: host_id.into(),
            host_name: host_name.into(),
            container_id: container_id.into(),
            container_name: container_name.into(),
        }
    }

    /// `host_container`, the grouping used by graph consumers
    pub fn category(&self) -> String {
        format!("{}_{}", self.host_id, self.container_id)
    }

    /// `host#container`, the key session state is scoped by
    pub fn scope_key(&self) -> String {
        format!("{}#{}", self.host_id, self.container_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessVertex {
    pub placement: Placement,
    /// pid inside the container
    pub vpid: String,
    pub name: String,
    pub exe_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileVertex {
    pub placement: Placement,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SocketVertex {
    pub placement: Placement,
    pub dst_ip: String,
    pub dst_port: String,
}

/// A provenance graph vertex with its descriptive attributes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum Vertex {
    Process(ProcessVertex),
    File(FileVertex),
    Socket(SocketVertex),
}

impl Vertex {
    pub fn kind(&self) -> VertexKind {
        match self {
            Vertex::Process(_) => VertexKind::Process,
            Vertex::File(_) => VertexKind::File,
            Vertex::Socket(_) => VertexKind::Socket,
        }
    }

    pub fn placement(&self) -> &Placement {
        match self {
            Vertex::Process(p) => &p.placement,
            Vertex::File(f) => &f.placement,
            Vertex::Socket(s) => &s.placement,
        }
    }

    /// Natural key identifying the real-world entity
    pub fn key(&self) -> VertexKey {
        match self {
            Vertex::Process(p) => VertexKey::Process {
                host_id: p.placement.host_id.clone(),
                container_id: p.placement.container_id.clone(),
                vpid: p.vpid.clone(),
                name: p.name.clone(),
            },
            Vertex::File(f) => VertexKey::File {
                host_id: f.placement.host_id.clone(),
                container_id: f.placement.container_id.clone(),
                path: f.path.clone(),
            },
            Vertex::Socket(s) => VertexKey::Socket {
                host_id: s.placement.host_id.clone(),
                container_id: s.placement.container_id.clone(),
                dst_ip: s.dst_ip.clone(),
                dst_port: s.dst_port.clone(),
            },
        }
    }

    /// Short human readable label
    pub fn label(&self) -> String {
        match self {
            Vertex::Process(p) => format!("{}_{}", p.vpid, p.name),
            Vertex::File(f) => f.path.clone(),
            Vertex::Socket(s) => format!("{}:{}", s.dst_ip, s.dst_port),
        }
    }

    /// Identifier that is unique across hosts and containers
    pub fn link_id(&self) -> String {
        let placement = self.placement();
        format!("{}#{}_{}", self.label(), placement.host_id, placement.container_id)
    }

    /// Multi-line attribute dump
    pub fn info(&self) -> String {
        match self {
            Vertex::Process(p) => format!(
                "host_id:{}\ncontainer_id:{}\nprocess_vpid:{}\nprocess_name:{}\nprocess_exe_path:{}",
                p.placement.host_id, p.placement.container_id, p.vpid, p.name, p.exe_path
            ),
            Vertex::File(f) => format!(
                "host_id:{}\ncontainer_id:{}\nfile_path:{}",
                f.placement.host_id, f.placement.container_id, f.path
            ),
            Vertex::Socket(s) => format!(
                "host_id:{}\ncontainer_id:{}\nip:{}\nport:{}",
                s.placement.host_id, s.placement.container_id, s.dst_ip, s.dst_port
            ),
        }
    }
}

/// Natural key of a vertex, unique per kind within (host, container)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum VertexKey {
    Process {
        host_id: String,
        container_id: String,
        vpid: String,
        name: String,
    },
    File {
        host_id: String,
        container_id: String,
        path: String,
    },
    Socket {
        host_id: String,
        container_id: String,
        dst_ip: String,
        dst_port: String,
    },
}

impl VertexKey {
    pub fn kind(&self) -> VertexKind {
        match self {
            VertexKey::Process { .. } => VertexKind::Process,
            VertexKey::File { .. } => VertexKind::File,
            VertexKey::Socket { .. } => VertexKind::Socket,
        }
    }
}

impl fmt::Display for VertexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VertexKey::Process { host_id, container_id, vpid, name } => {
                write!(f, "process[host: {}, container: {}, vpid: {}, name: {}]", host_id, container_id, vpid, name)
            }
            VertexKey::File { host_id, container_id, path } => {
                write!(f, "file[host: {}, container: {}, path: {}]", host_id, container_id, path)
            }
            VertexKey::Socket { host_id, container_id, dst_ip, dst_port } => {
                write!(f, "socket[host: {}, container: {}, addr: {}:{}]", host_id, container_id, dst_ip, dst_port)
            }
        }
    }
}

/// Causal direction and endpoint tables of an event edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeClass {
    /// process -> process
    #[serde(rename = "Process")]
    Process,
    /// process -> file
    #[serde(rename = "File_V1")]
    FileV1,
    /// file -> process
    #[serde(rename = "File_V2")]
    FileV2,
    /// process -> socket
    #[serde(rename = "Network_V1")]
    NetworkV1,
    /// socket -> process
    #[serde(rename = "Network_V2")]
    NetworkV2,
}

impl EdgeClass {
    pub const ALL: [EdgeClass; 5] = [
        EdgeClass::Process,
        EdgeClass::FileV1,
        EdgeClass::FileV2,
        EdgeClass::NetworkV1,
        EdgeClass::NetworkV2,
    ];

    /// Persisted name
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeClass::Process => "Process",
            EdgeClass::FileV1 => "File_V1",
            EdgeClass::FileV2 => "File_V2",
            EdgeClass::NetworkV1 => "Network_V1",
            EdgeClass::NetworkV2 => "Network_V2",
        }
    }

    /// (source kind, destination kind)
    pub fn endpoints(&self) -> (VertexKind, VertexKind) {
        match self {
            EdgeClass::Process => (VertexKind::Process, VertexKind::Process),
            EdgeClass::FileV1 => (VertexKind::Process, VertexKind::File),
            EdgeClass::FileV2 => (VertexKind::File, VertexKind::Process),
            EdgeClass::NetworkV1 => (VertexKind::Process, VertexKind::Socket),
            EdgeClass::NetworkV2 => (VertexKind::Socket, VertexKind::Process),
        }
    }
}

impl fmt::Display for EdgeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeClass {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EdgeClass::ALL
            .iter()
            .copied()
            .find(|class| class.as_str() == s)
            .ok_or_else(|| ModelError::UnknownEdgeClass(s.to_string()))
    }
}

/// Edge table a row lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeTable {
    Event,
    Net,
}

impl EdgeTable {
    pub fn table(&self) -> &'static str {
        match self {
            EdgeTable::Event => "event",
            EdgeTable::Net => "net",
        }
    }
}

/// Syscall-derived edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventEdge {
    pub class: EdgeClass,
    pub relation: String,
    pub operation: String,
    /// microseconds since epoch
    pub time: i64,
    pub uuid: String,
}

/// One observed packet between two sockets
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetEdge {
    pub method: String,
    pub payload: String,
    pub payload_len: i64,
    pub seq_num: i64,
    pub ack_num: i64,
    /// microseconds since epoch
    pub time: i64,
    pub uuid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EdgeRecord {
    Event(EventEdge),
    Net(NetEdge),
}

impl EdgeRecord {
    pub fn table(&self) -> EdgeTable {
        match self {
            EdgeRecord::Event(_) => EdgeTable::Event,
            EdgeRecord::Net(_) => EdgeTable::Net,
        }
    }

    pub fn time(&self) -> i64 {
        match self {
            EdgeRecord::Event(e) => e.time,
            EdgeRecord::Net(n) => n.time,
        }
    }

    pub fn uuid(&self) -> &str {
        match self {
            EdgeRecord::Event(e) => &e.uuid,
            EdgeRecord::Net(n) => &n.uuid,
        }
    }

    /// Relation label shown on the graph
    pub fn relation(&self) -> &str {
        match self {
            EdgeRecord::Event(e) => &e.relation,
            EdgeRecord::Net(n) => &n.method,
        }
    }
}

/// Edge plus its two endpoint descriptors, as produced by a parser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedLog {
    pub edge: EdgeRecord,
    pub start: Vertex,
    pub end: Vertex,
}

impl ParsedLog {
    pub fn event(edge: EventEdge, start: Vertex, end: Vertex) -> Self {
        Self { edge: EdgeRecord::Event(edge), start, end }
    }

    pub fn net(edge: NetEdge, start: Vertex, end: Vertex) -> Self {
        Self { edge: EdgeRecord::Net(edge), start, end }
    }

    /// Endpoint kinds agree with the edge class (Net edges join two sockets)
    pub fn is_well_formed(&self) -> bool {
        let (src, dst) = match &self.edge {
            EdgeRecord::Event(e) => e.class.endpoints(),
            EdgeRecord::Net(_) => (VertexKind::Socket, VertexKind::Socket),
        };
        self.start.kind() == src && self.end.kind() == dst
    }
}

/// Persisted vertex
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexRecord {
    pub id: i64,
    pub vertex: Vertex,
}

impl VertexRecord {
    pub fn loc(&self) -> RecordLoc {
        RecordLoc::new(self.vertex.kind(), self.id)
    }
}

/// Persisted event edge row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: i64,
    pub src_id: i64,
    pub dst_id: i64,
    pub edge: EventEdge,
}

/// Persisted net edge row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredNet {
    pub id: i64,
    pub src_id: i64,
    pub dst_id: i64,
    pub edge: NetEdge,
}

/// Iterate the individual ids of a possibly comma-joined correlation id
pub fn correlation_ids(uuid: &str) -> impl Iterator<Item = &str> {
    uuid.split(',').map(str::trim).filter(|id| !id.is_empty() && *id != UNKNOWN)
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown edge class: {0}")]
    UnknownEdgeClass(String),

    #[error("unknown vertex table: {0}")]
    UnknownVertexKind(String),
}

impl FromStr for VertexKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "process" => Ok(VertexKind::Process),
            "file" => Ok(VertexKind::File),
            "socket" => Ok(VertexKind::Socket),
            other => Err(ModelError::UnknownVertexKind(other.to_string())),
        }
    }
}
