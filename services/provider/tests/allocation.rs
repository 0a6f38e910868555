//! Integration tests for VM id allocation through a session.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use pxp_provider::{MockHypervisor, ProviderError, Session, VmId};

fn session(mock: &Arc<MockHypervisor>) -> Session {
    Session::new(mock.clone(), NonZeroUsize::new(4).unwrap())
}

#[tokio::test]
async fn test_floor_follows_watermark() {
    let mock = Arc::new(MockHypervisor::new());
    let session = session(&mock);

    mock.script_next_id(100);
    assert_eq!(session.next_id().await.unwrap(), VmId::new(100));
    assert_eq!(session.allocator().last_allocated().await, Some(VmId::new(100)));

    session.next_id().await.unwrap();
    assert_eq!(mock.floors(), vec![0, 101]);
}

#[tokio::test]
async fn test_sequential_ids_strictly_increase() {
    let mock = Arc::new(MockHypervisor::new());
    let session = session(&mock);

    let mut previous = None;
    for _ in 0..20 {
        let id = session.next_id().await.unwrap();
        if let Some(prev) = previous {
            assert!(id > prev, "{id} should be above {prev}");
        }
        previous = Some(id);
    }
}

#[tokio::test]
async fn test_ids_taken_elsewhere_are_skipped() {
    let mock = Arc::new(MockHypervisor::new());
    mock.reserve([100, 101, 103]);
    let session = session(&mock);

    assert_eq!(session.next_id().await.unwrap(), VmId::new(102));
    assert_eq!(session.next_id().await.unwrap(), VmId::new(104));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_get_unique_ids() {
    let mock = Arc::new(MockHypervisor::new());
    let session = session(&mock);

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let session = session.clone();
            tokio::spawn(async move { session.next_id().await })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().unwrap());
    }

    let unique: HashSet<_> = ids.iter().copied().collect();
    assert_eq!(unique.len(), ids.len(), "duplicate VM ids handed out");

    // Every query floor sits above everything allocated before it.
    let floors = mock.floors();
    assert_eq!(floors.len(), 32);
    assert!(floors.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(
        session.allocator().last_allocated().await,
        ids.iter().copied().max()
    );
}

#[tokio::test]
async fn test_failed_query_keeps_floor() {
    let mock = Arc::new(MockHypervisor::new());
    let session = session(&mock);

    mock.script_next_id(100);
    session.next_id().await.unwrap();

    mock.script_next_id_failure("Connection refused");
    let err = session.next_id().await.unwrap_err();
    match err {
        ProviderError::Allocation { floor, source } => {
            assert_eq!(floor, 101);
            assert!(source.to_string().contains("Connection refused"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(session.allocator().last_allocated().await, Some(VmId::new(100)));

    assert_eq!(session.next_id().await.unwrap(), VmId::new(101));
    assert_eq!(mock.floors(), vec![0, 101, 101]);
}

#[tokio::test]
async fn test_allocation_does_not_use_gate() {
    let mock = Arc::new(MockHypervisor::new());
    let session = Session::new(mock.clone(), NonZeroUsize::new(1).unwrap());

    let _held = session.acquire().await;
    let id = tokio::time::timeout(std::time::Duration::from_secs(1), session.next_id())
        .await
        .expect("allocation must not wait for the gate")
        .unwrap();
    assert_eq!(id, VmId::new(100));
}
