//! VFS stress testing
//!
//! High-load tests through the SQLite engine: many connections, many threads,
//! large transactions. Validates locking and WAL shared memory under
//! contention.

use hostvfs::{register_vfs, unregister_vfs, MemoryBackend, MemoryStore, Vfs};
use rusqlite::{params, Connection, OpenFlags};
use std::time::Duration;

fn rw() -> OpenFlags {
    OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_URI
}

fn setup(name: &str) -> MemoryStore {
    let store = MemoryStore::new();
    let vfs = Vfs::builder()
        .name(name)
        .backend(MemoryBackend::with_store(store.clone()))
        .build()
        .unwrap();
    register_vfs(vfs).unwrap();
    store
}

fn connect(vfs: &str, db: &str) -> Connection {
    let conn = Connection::open_with_flags_and_vfs(db, rw(), vfs).unwrap();
    conn.busy_timeout(Duration::from_secs(30)).unwrap();
    conn
}

#[test]
fn test_vfs_concurrent_wal_writers() {
    let vfs = "stress-wal-writers";
    setup(vfs);

    {
        let conn = connect(vfs, "writers.db");
        conn.query_row("PRAGMA journal_mode=WAL", [], |r| r.get::<_, String>(0))
            .unwrap();
        conn.execute("CREATE TABLE test (id INTEGER PRIMARY KEY, data TEXT)", [])
            .unwrap();
    }

    let handles: Vec<_> = (0..8)
        .map(|thread_id| {
            std::thread::spawn(move || {
                let conn = connect(vfs, "writers.db");
                for i in 0..25 {
                    let id = thread_id * 100 + i;
                    conn.execute(
                        "INSERT INTO test VALUES (?1, ?2)",
                        params![id, format!("thread{}_item{}", thread_id, i)],
                    )
                    .unwrap();

                    let data: String = conn
                        .query_row("SELECT data FROM test WHERE id = ?1", params![id], |row| {
                            row.get(0)
                        })
                        .unwrap();
                    assert_eq!(data, format!("thread{}_item{}", thread_id, i));
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    {
        let conn = connect(vfs, "writers.db");
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM test", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 200);
    }

    unregister_vfs(vfs).unwrap();
}

#[test]
fn test_vfs_concurrent_rollback_writers() {
    let vfs = "stress-rollback-writers";
    setup(vfs);

    {
        let conn = connect(vfs, "rollback.db");
        conn.execute("CREATE TABLE counter (n INTEGER)", []).unwrap();
        conn.execute("INSERT INTO counter VALUES (0)", []).unwrap();
    }

    let handles: Vec<_> = (0..6)
        .map(|_| {
            std::thread::spawn(move || {
                let conn = connect(vfs, "rollback.db");
                for _ in 0..20 {
                    conn.execute_batch("BEGIN IMMEDIATE; UPDATE counter SET n = n + 1; COMMIT;")
                        .unwrap();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let conn = connect(vfs, "rollback.db");
    let n: i64 = conn.query_row("SELECT n FROM counter", [], |r| r.get(0)).unwrap();
    assert_eq!(n, 120);

    drop(conn);
    unregister_vfs(vfs).unwrap();
}

#[test]
fn test_vfs_rapid_connect_disconnect() {
    let vfs = "stress-rapid";
    let store = setup(vfs);

    for i in 0..200 {
        let conn = connect(vfs, "rapid.db");
        if i == 0 {
            conn.execute("CREATE TABLE IF NOT EXISTS test (x INTEGER)", [])
                .unwrap();
        }
        conn.execute("INSERT INTO test VALUES (?1)", params![i]).unwrap();
        drop(conn);
    }

    let conn = connect(vfs, "rapid.db");
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM test", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 200);
    drop(conn);

    // Only the database itself remains
    assert_eq!(store.paths(), vec!["/rapid.db".to_string()]);
    unregister_vfs(vfs).unwrap();
}

#[test]
fn test_vfs_large_transaction() {
    let vfs = "stress-large-txn";
    setup(vfs);

    let mut conn = connect(vfs, "largetxn.db");
    conn.execute("CREATE TABLE test (id INTEGER, data TEXT)", [])
        .unwrap();

    let tx = conn.transaction().unwrap();
    for i in 0..10_000 {
        tx.execute("INSERT INTO test VALUES (?1, ?2)", params![i, format!("data_{}", i)])
            .unwrap();
    }
    tx.commit().unwrap();

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM test", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 10_000);

    conn.execute_batch("CREATE INDEX idx_data ON test(data); VACUUM;")
        .unwrap();
    let ok: String = conn
        .query_row("PRAGMA integrity_check", [], |r| r.get(0))
        .unwrap();
    assert_eq!(ok, "ok");

    drop(conn);
    unregister_vfs(vfs).unwrap();
}

#[test]
fn test_vfs_attach_database() {
    let vfs = "stress-attach";
    let store = setup(vfs);

    let conn = connect(vfs, "main.db");
    conn.execute_batch(
        "ATTACH DATABASE 'file:other.db?vfs=stress-attach' AS other;
         CREATE TABLE other.t (x);
         INSERT INTO other.t VALUES (42);",
    )
    .unwrap();
    let x: i64 = conn.query_row("SELECT x FROM other.t", [], |r| r.get(0)).unwrap();
    assert_eq!(x, 42);
    drop(conn);

    assert!(store.exists("/other.db"));
    unregister_vfs(vfs).unwrap();
}
