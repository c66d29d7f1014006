//! PostgreSQL backend tests. Require a reachable database; run with
//! `--features db-tests`.

#![cfg(feature = "db-tests")]

use canvas_core::{Admission, Bounds, Cell, Coord, Credential, DirectoryError};
use canvas_storage::{AgentDirectory, GridStore};
use canvas_test_utils::fixtures;

#[path = "support/db.rs"]
mod test_db_support;
use test_db_support::test_pg_store;

#[tokio::test]
async fn agent_round_trip_and_duplicate_credential() {
    let store = test_pg_store().await;
    let agent = fixtures::agent("pg-agent", fixtures::color("#008000"), 1_000);
    store.create(&agent).await.expect("create");

    let found = store.find_by_credential(&agent.credential).await.expect("find");
    assert_eq!(found.id, agent.id);
    assert_eq!(found.color, agent.color);
    assert!(found.last_write_at.is_none());

    let mut clash = fixtures::agent("clash", fixtures::color("#000000"), 1_000);
    clash.credential = agent.credential.clone();
    assert!(matches!(
        store.create(&clash).await,
        Err(DirectoryError::DuplicateCredential)
    ));

    let unknown = Credential::generate();
    assert!(matches!(
        store.find_by_credential(&unknown).await,
        Err(DirectoryError::NotFound)
    ));
}

#[tokio::test]
async fn conditional_update_admits_once_per_cooldown() {
    let store = test_pg_store().await;
    let agent = fixtures::agent("pg-cooldown", fixtures::color("#FF0000"), 0);
    store.create(&agent).await.expect("create");

    assert_eq!(
        store.try_admit(agent.id, 0, 10_000).await.expect("admit"),
        Admission::Admitted
    );
    assert_eq!(
        store.try_admit(agent.id, 4_000, 10_000).await.expect("admit"),
        Admission::CoolingDown { last_write_at: 0 }
    );
    assert_eq!(
        store.try_admit(agent.id, 10_000, 10_000).await.expect("admit"),
        Admission::Admitted
    );
    assert_eq!(
        store
            .try_admit(canvas_core::new_agent_id(), 0, 10_000)
            .await
            .expect("admit"),
        Admission::UnknownAgent
    );
}

#[tokio::test]
async fn cells_upsert_and_range() {
    let store = test_pg_store().await;
    let writer = fixtures::agent("pg-cells", fixtures::color("#0000FF"), 0);
    store.create(&writer).await.expect("create");

    // Far corner of the coordinate space so reruns do not collide with
    // other tests sharing the database.
    let x = 4_000_000_000u32;
    let cell = |color: &str, written_at| Cell {
        x,
        y: x,
        color: fixtures::color(color),
        writer_id: writer.id,
        written_at,
    };

    store.put(&cell("#0000FF", 1)).await.expect("put");
    store.put(&cell("#FF0000", 2)).await.expect("put");

    let stored = store
        .get(Coord::new(x, x))
        .await
        .expect("get")
        .expect("written");
    assert_eq!(stored.color, fixtures::color("#FF0000"));
    assert_eq!(stored.written_at, 2);

    // An older write landing late leaves the newer cell in place.
    store.put(&cell("#00FF00", 1)).await.expect("stale put");
    let stored = store
        .get(Coord::new(x, x))
        .await
        .expect("get")
        .expect("written");
    assert_eq!(stored.color, fixtures::color("#FF0000"));

    let region = store
        .range(Bounds {
            min_x: x,
            max_x: x,
            min_y: x,
            max_y: x,
        })
        .await
        .expect("range");
    assert_eq!(region.len(), 1);
    assert!(GridStore::health(&store).await.is_ok());
}
