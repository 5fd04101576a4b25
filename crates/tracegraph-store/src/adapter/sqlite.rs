use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracegraph_core::model::{
    EdgeClass, EventEdge, FileVertex, NetEdge, Placement, ProcessVertex, RecordLoc, SocketVertex, StoredEvent,
    StoredNet, Vertex, VertexKey, VertexKind,
};
use tracing::debug;

use crate::store::{EdgeEnd, ProvenanceStore, StoreError, StoreStatistics};

const SCHEMA: [&str; 11] = [
    r#"
    CREATE TABLE IF NOT EXISTS process (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      host_id TEXT NOT NULL,
      host_name TEXT NOT NULL,
      container_id TEXT NOT NULL,
      container_name TEXT NOT NULL,
      process_vpid TEXT NOT NULL,
      process_name TEXT NOT NULL,
      process_exepath TEXT NOT NULL,
      UNIQUE (host_id, container_id, process_vpid, process_name)
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS file (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      host_id TEXT NOT NULL,
      host_name TEXT NOT NULL,
      container_id TEXT NOT NULL,
      container_name TEXT NOT NULL,
      file_path TEXT NOT NULL,
      UNIQUE (host_id, container_id, file_path)
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS socket (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      host_id TEXT NOT NULL,
      host_name TEXT NOT NULL,
      container_id TEXT NOT NULL,
      container_name TEXT NOT NULL,
      dst_ip TEXT NOT NULL,
      dst_port TEXT NOT NULL,
      UNIQUE (host_id, container_id, dst_ip, dst_port)
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS event (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      src_id INTEGER NOT NULL,
      dst_id INTEGER NOT NULL,
      event_class TEXT NOT NULL,
      relation TEXT NOT NULL,
      operation TEXT NOT NULL,
      time INTEGER NOT NULL,
      uuid TEXT NOT NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS net (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      src_id INTEGER NOT NULL,
      dst_id INTEGER NOT NULL,
      method TEXT NOT NULL,
      payload TEXT NOT NULL,
      payload_len INTEGER NOT NULL,
      seq_num INTEGER NOT NULL,
      ack_num INTEGER NOT NULL,
      time INTEGER NOT NULL,
      uuid TEXT NOT NULL
    );
    "#,
    r#"CREATE INDEX IF NOT EXISTS idx_event_src ON event(src_id, event_class);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_event_dst ON event(dst_id, event_class);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_event_dedup ON event(src_id, dst_id, event_class, operation, uuid);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_net_src ON net(src_id);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_net_dst ON net(dst_id);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_event_time ON event(time);"#,
];

/// SQLite-backed provenance store
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// Wrap an existing pool, creating the schema if needed
    pub async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        debug!("SQLite schema ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn count(&self, table: &str) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl ProvenanceStore for SqliteStore {
    async fn insert_vertex(&self, vertex: &Vertex) -> Result<i64, StoreError> {
        let result = match vertex {
            Vertex::Process(p) => {
                sqlx::query(
                    r#"
                    INSERT INTO process(host_id, host_name, container_id, container_name, process_vpid, process_name, process_exepath)
                    VALUES(?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&p.placement.host_id)
                .bind(&p.placement.host_name)
                .bind(&p.placement.container_id)
                .bind(&p.placement.container_name)
                .bind(&p.vpid)
                .bind(&p.name)
                .bind(&p.exe_path)
                .execute(&self.pool)
                .await?
            }
            Vertex::File(f) => {
                sqlx::query(
                    r#"
                    INSERT INTO file(host_id, host_name, container_id, container_name, file_path)
                    VALUES(?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&f.placement.host_id)
                .bind(&f.placement.host_name)
                .bind(&f.placement.container_id)
                .bind(&f.placement.container_name)
                .bind(&f.path)
                .execute(&self.pool)
                .await?
            }
            Vertex::Socket(s) => {
                sqlx::query(
                    r#"
                    INSERT INTO socket(host_id, host_name, container_id, container_name, dst_ip, dst_port)
                    VALUES(?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&s.placement.host_id)
                .bind(&s.placement.host_name)
                .bind(&s.placement.container_id)
                .bind(&s.placement.container_name)
                .bind(&s.dst_ip)
                .bind(&s.dst_port)
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.last_insert_rowid())
    }

    async fn find_vertex_id(&self, key: &VertexKey) -> Result<Option<i64>, StoreError> {
        let id = match key {
            VertexKey::Process { host_id, container_id, vpid, name } => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT id FROM process WHERE host_id = ? AND container_id = ? AND process_vpid = ? AND process_name = ?",
                )
                .bind(host_id)
                .bind(container_id)
                .bind(vpid)
                .bind(name)
                .fetch_optional(&self.pool)
                .await?
            }
            VertexKey::File { host_id, container_id, path } => {
                sqlx::query_scalar::<_, i64>("SELECT id FROM file WHERE host_id = ? AND container_id = ? AND file_path = ?")
                    .bind(host_id)
                    .bind(container_id)
                    .bind(path)
                    .fetch_optional(&self.pool)
                    .await?
            }
            VertexKey::Socket { host_id, container_id, dst_ip, dst_port } => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT id FROM socket WHERE host_id = ? AND container_id = ? AND dst_ip = ? AND dst_port = ?",
                )
                .bind(host_id)
                .bind(container_id)
                .bind(dst_ip)
                .bind(dst_port)
                .fetch_optional(&self.pool)
                .await?
            }
        };
        Ok(id)
    }

    async fn get_vertex(&self, loc: RecordLoc) -> Result<Option<Vertex>, StoreError> {
        let vertex = match loc.kind {
            VertexKind::Process => sqlx::query_as::<_, ProcessRow>("SELECT * FROM process WHERE id = ?")
                .bind(loc.key)
                .fetch_optional(&self.pool)
                .await?
                .map(Vertex::from),
            VertexKind::File => sqlx::query_as::<_, FileRow>("SELECT * FROM file WHERE id = ?")
                .bind(loc.key)
                .fetch_optional(&self.pool)
                .await?
                .map(Vertex::from),
            VertexKind::Socket => sqlx::query_as::<_, SocketRow>("SELECT * FROM socket WHERE id = ?")
                .bind(loc.key)
                .fetch_optional(&self.pool)
                .await?
                .map(Vertex::from),
        };
        Ok(vertex)
    }

    async fn event_exists(&self, src_id: i64, dst_id: i64, edge: &EventEdge) -> Result<bool, StoreError> {
        let found = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT id FROM event
            WHERE src_id = ? AND dst_id = ? AND event_class = ? AND operation = ? AND uuid = ?
            LIMIT 1
            "#,
        )
        .bind(src_id)
        .bind(dst_id)
        .bind(edge.class.as_str())
        .bind(&edge.operation)
        .bind(&edge.uuid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    async fn insert_event(&self, src_id: i64, dst_id: i64, edge: &EventEdge) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO event(src_id, dst_id, event_class, relation, operation, time, uuid)
            VALUES(?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(src_id)
        .bind(dst_id)
        .bind(edge.class.as_str())
        .bind(&edge.relation)
        .bind(&edge.operation)
        .bind(edge.time)
        .bind(&edge.uuid)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn insert_net(&self, src_id: i64, dst_id: i64, edge: &NetEdge) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO net(src_id, dst_id, method, payload, payload_len, seq_num, ack_num, time, uuid)
            VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(src_id)
        .bind(dst_id)
        .bind(&edge.method)
        .bind(&edge.payload)
        .bind(edge.payload_len)
        .bind(edge.seq_num)
        .bind(edge.ack_num)
        .bind(edge.time)
        .bind(&edge.uuid)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn fetch_events(
        &self,
        vertex_id: i64,
        end: EdgeEnd,
        classes: &[EdgeClass],
    ) -> Result<Vec<StoredEvent>, StoreError> {
        if classes.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; classes.len()].join(", ");
        let sql = format!(
            "SELECT * FROM event WHERE {} = ? AND event_class IN ({}) ORDER BY id",
            end.column(),
            placeholders
        );
        let mut query = sqlx::query_as::<_, EventRow>(&sql).bind(vertex_id);
        for class in classes {
            query = query.bind(class.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(StoredEvent::try_from).collect()
    }

    async fn fetch_nets(&self, socket_id: i64, end: EdgeEnd) -> Result<Vec<StoredNet>, StoreError> {
        let sql = format!("SELECT * FROM net WHERE {} = ? ORDER BY id", end.column());
        let rows = sqlx::query_as::<_, NetRow>(&sql)
            .bind(socket_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(StoredNet::from).collect())
    }

    async fn statistics(&self) -> Result<StoreStatistics, StoreError> {
        Ok(StoreStatistics {
            processes: self.count("process").await?,
            files: self.count("file").await?,
            sockets: self.count("socket").await?,
            events: self.count("event").await?,
            nets: self.count("net").await?,
        })
    }
}

#[derive(FromRow)]
struct ProcessRow {
    #[allow(dead_code)]
    id: i64,
    host_id: String,
    host_name: String,
    container_id: String,
    container_name: String,
    process_vpid: String,
    process_name: String,
    process_exepath: String,
}

impl From<ProcessRow> for Vertex {
    fn from(r: ProcessRow) -> Self {
        Vertex::Process(ProcessVertex {
            placement: Placement::new(r.host_id, r.host_name, r.container_id, r.container_name),
            vpid: r.process_vpid,
            name: r.process_name,
            exe_path: r.process_exepath,
        })
    }
}

#[derive(FromRow)]
struct FileRow {
    #[allow(dead_code)]
    id: i64,
    host_id: String,
    host_name: String,
    container_id: String,
    container_name: String,
    file_path: String,
}

impl From<FileRow> for Vertex {
    fn from(r: FileRow) -> Self {
        Vertex::File(FileVertex {
            placement: Placement::new(r.host_id, r.host_name, r.container_id, r.container_name),
            path: r.file_path,
        })
    }
}

#[derive(FromRow)]
struct SocketRow {
    #[allow(dead_code)]
    id: i64,
    host_id: String,
    host_name: String,
    container_id: String,
    container_name: String,
    dst_ip: String,
    dst_port: String,
}

impl From<SocketRow> for Vertex {
    fn from(r: SocketRow) -> Self {
        Vertex::Socket(SocketVertex {
            placement: Placement::new(r.host_id, r.host_name, r.container_id, r.container_name),
            dst_ip: r.dst_ip,
            dst_port: r.dst_port,
        })
    }
}

#[derive(FromRow)]
struct EventRow {
    id: i64,
    src_id: i64,
    dst_id: i64,
    event_class: String,
    relation: String,
    operation: String,
    time: i64,
    uuid: String,
}

impl TryFrom<EventRow> for StoredEvent {
    type Error = StoreError;

    fn try_from(r: EventRow) -> Result<Self, Self::Error> {
        let class = r.event_class.parse::<EdgeClass>().map_err(|e| StoreError::Corrupt {
            table: "event",
            reason: e.to_string(),
        })?;
        Ok(StoredEvent {
            id: r.id,
            src_id: r.src_id,
            dst_id: r.dst_id,
            edge: EventEdge {
                class,
                relation: r.relation,
                operation: r.operation,
                time: r.time,
                uuid: r.uuid,
            },
        })
    }
}

#[derive(FromRow)]
struct NetRow {
    id: i64,
    src_id: i64,
    dst_id: i64,
    method: String,
    payload: String,
    payload_len: i64,
    seq_num: i64,
    ack_num: i64,
    time: i64,
    uuid: String,
}

impl From<NetRow> for StoredNet {
    fn from(r: NetRow) -> Self {
        StoredNet {
            id: r.id,
            src_id: r.src_id,
            dst_id: r.dst_id,
            edge: NetEdge {
                method: r.method,
                payload: r.payload,
                payload_len: r.payload_len,
                seq_num: r.seq_num,
                ack_num: r.ack_num,
                time: r.time,
                uuid: r.uuid,
            },
        }
    }
}
