use proptest::prelude::*;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracegraph_core::model::{
    EdgeClass, EventEdge, FileVertex, Placement, ProcessVertex, RecordLoc, Vertex, VertexKind, UNKNOWN,
};
use tracegraph_store::{open_store, EdgeEnd, ProvenanceStore, StoreBackend};

fn process(vpid: &str, name: &str) -> Vertex {
    Vertex::Process(ProcessVertex {
        placement: Placement::new("ServerID", "ServerName", "c1", "hello"),
        vpid: vpid.into(),
        name: name.into(),
        exe_path: format!("/usr/bin/{}", name),
    })
}

fn file(path: &str) -> Vertex {
    Vertex::File(FileVertex {
        placement: Placement::new("ServerID", "ServerName", "c1", "hello"),
        path: path.into(),
    })
}

async fn backends() -> Vec<(Arc<dyn ProvenanceStore>, Option<NamedTempFile>)> {
    let temp = NamedTempFile::new().unwrap();
    let url = format!("sqlite://{}", temp.path().to_str().unwrap());
    let sqlite = open_store(&StoreBackend::Sqlite { url, max_connections: 4 }).await.unwrap();
    let memory = open_store(&StoreBackend::Memory).await.unwrap();
    vec![(memory, None), (sqlite, Some(temp))]
}

#[tokio::test]
async fn test_both_backends_agree_on_traversal_queries() {
    for (store, _guard) in backends().await {
        let p1 = store.upsert_vertex(&process("1", "sh")).await.unwrap();
        let p2 = store.upsert_vertex(&process("2", "node")).await.unwrap();
        let f1 = store.upsert_vertex(&file("/tmp/out")).await.unwrap();

        let exec = EventEdge {
            class: EdgeClass::Process,
            relation: "execve".into(),
            operation: "execve".into(),
            time: 100,
            uuid: UNKNOWN.into(),
        };
        let write = EventEdge {
            class: EdgeClass::FileV1,
            relation: "write".into(),
            operation: "write".into(),
            time: 150,
            uuid: "7".into(),
        };
        store.insert_event(p1, p2, &exec).await.unwrap();
        store.insert_event(p2, f1, &write).await.unwrap();

        let forward = store
            .fetch_events(p2, EdgeEnd::Src, &[EdgeClass::Process, EdgeClass::FileV1, EdgeClass::NetworkV1])
            .await
            .unwrap();
        assert_eq!(forward.len(), 1);
        assert_eq!(forward[0].edge, write);

        let backward = store
            .fetch_events(p2, EdgeEnd::Dst, &[EdgeClass::Process, EdgeClass::FileV2, EdgeClass::NetworkV2])
            .await
            .unwrap();
        assert_eq!(backward.len(), 1);
        assert_eq!(backward[0].src_id, p1);

        let into_file = store.fetch_events(f1, EdgeEnd::Dst, &[EdgeClass::FileV1]).await.unwrap();
        assert_eq!(into_file.len(), 1);

        assert_eq!(
            store.get_vertex(RecordLoc::new(VertexKind::Process, p2)).await.unwrap(),
            Some(process("2", "node"))
        );
    }
}

#[tokio::test]
async fn test_concurrent_upserts_resolve_to_one_row() {
    for (store, _guard) in backends().await {
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.upsert_vertex(&process("9", "fwatchdog")).await.unwrap() }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.statistics().await.unwrap().processes, 1);
    }
}

proptest! {
    #[test]
    fn prop_memory_upsert_idempotent(paths in proptest::collection::vec("/[a-c]{1,2}", 1..20)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = open_store(&StoreBackend::Memory).await.unwrap();
            let mut seen = std::collections::HashMap::new();
            for path in &paths {
                let id = store.upsert_vertex(&file(path)).await.unwrap();
                let expected = *seen.entry(path.clone()).or_insert(id);
                assert_eq!(id, expected);
            }
            assert_eq!(store.statistics().await.unwrap().files as usize, seen.len());
        });
    }
}
