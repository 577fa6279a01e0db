//! hostvfs shell
//!
//! Runs SQL against a database stored through a host backend, for poking at
//! databases the way an application using the VFS would see them.

use anyhow::{Context, Result};
use clap::Parser;
use hostvfs::{register_vfs, unregister_vfs, DiskBackend, MemoryBackend, Vfs, VfsConfig};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::io::Read;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hostvfs-shell")]
#[command(about = "Run SQL through the hostvfs SQLite VFS")]
struct Args {
    /// Directory holding the database files (in-memory when omitted)
    #[arg(short = 'r', long)]
    root: Option<PathBuf>,

    /// VFS configuration file (TOML)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Database name inside the backend
    #[arg(short = 'd', long, default_value = "main.db")]
    db: String,

    /// Switch the database to WAL journal mode first
    #[arg(long)]
    wal: bool,

    /// Copy the database to a regular file when done
    #[arg(long)]
    export: Option<PathBuf>,

    /// SQL statements; read from stdin when none are given
    sql: Vec<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => VfsConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => VfsConfig::default(),
    };
    let name = config.name.clone();

    let builder = Vfs::builder().config(config);
    let vfs = match &args.root {
        Some(root) => builder.backend(
            DiskBackend::new(root).with_context(|| format!("opening {}", root.display()))?,
        ),
        None => builder.backend(MemoryBackend::new()),
    }
    .build()?;

    register_vfs(vfs)?;
    info!(vfs = %name, db = %args.db, "VFS ready");

    let result = run(&args, &name);
    unregister_vfs(&name)?;
    result
}

fn run(args: &Args, vfs: &str) -> Result<()> {
    let conn = Connection::open_with_flags_and_vfs(
        &args.db,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI,
        vfs,
    )
    .with_context(|| format!("opening {}", args.db))?;

    if args.wal {
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |r| r.get(0))?;
        info!(mode = %mode, "journal mode set");
    }

    let statements = if args.sql.is_empty() {
        let mut input = String::new();
        std::io::stdin().read_to_string(&mut input)?;
        vec![input]
    } else {
        args.sql.clone()
    };

    for sql in &statements {
        execute(&conn, sql).with_context(|| format!("executing {:?}", sql))?;
    }

    if let Some(path) = &args.export {
        conn.backup(rusqlite::DatabaseName::Main, path, None)
            .with_context(|| format!("exporting to {}", path.display()))?;
        info!(path = %path.display(), "database exported");
    }

    Ok(())
}

/// Run `sql`, printing rows tab-separated when it returns any
fn execute(conn: &Connection, sql: &str) -> Result<()> {
    let mut stmt = match conn.prepare(sql) {
        Ok(stmt) => stmt,
        // Multiple statements; execute_batch also reports genuine errors
        Err(_) => {
            conn.execute_batch(sql)?;
            return Ok(());
        }
    };

    let columns = stmt.column_count();
    if columns == 0 {
        stmt.execute([])?;
        return Ok(());
    }

    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let fields = (0..columns)
            .map(|i| row.get_ref(i).map(render))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        println!("{}", fields.join("\t"));
    }
    Ok(())
}

fn render(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => format!("x'{}'", b.iter().map(|x| format!("{:02x}", x)).collect::<String>()),
    }
}
