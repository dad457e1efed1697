use anyhow::{Context as _, anyhow};
use rusqlite::{Connection, params};
use skein_domain::{ActivityLedger, ActivityLedgerStore, ThreadId, WorkspaceId};
use std::path::Path;
use std::sync::Mutex;

const LATEST_SCHEMA_VERSION: u32 = 1;

const MIGRATIONS: &[(u32, &str)] = &[(
    1,
    include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/migrations/0001_init.sql"
    )),
)];

/// SQLite-backed storage for the activity ledger. The whole mapping is
/// written on save and read back on load, so the ledger survives restarts
/// byte-for-byte.
pub struct SqliteLedgerStore {
    conn: Mutex<Connection>,
}

impl SqliteLedgerStore {
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut conn = Connection::open(db_path)
            .with_context(|| format!("failed to open sqlite db at {}", db_path.display()))?;
        configure_connection(&mut conn)?;
        apply_migrations(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn load_ledger(&self) -> anyhow::Result<ActivityLedger> {
        let conn = self.conn.lock().map_err(|_| anyhow!("ledger store poisoned"))?;
        let mut statement = conn
            .prepare("SELECT workspace_id, thread_id, last_activity_ms FROM thread_activity")
            .context("failed to prepare ledger select")?;
        let rows = statement
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .context("failed to query ledger rows")?;

        let mut ledger = ActivityLedger::new();
        for row in rows {
            let (workspace_id, thread_id, at_ms) = row.context("failed to read ledger row")?;
            ledger.note(
                &WorkspaceId::new(workspace_id),
                &ThreadId::new(thread_id),
                u64::try_from(at_ms).unwrap_or(0),
            );
        }
        Ok(ledger)
    }

    fn save_ledger(&self, ledger: &ActivityLedger) -> anyhow::Result<()> {
        let mut conn = self.conn.lock().map_err(|_| anyhow!("ledger store poisoned"))?;
        let tx = conn.transaction().context("failed to begin ledger save")?;
        tx.execute("DELETE FROM thread_activity", [])
            .context("failed to clear ledger table")?;
        {
            let mut statement = tx
                .prepare(
                    "INSERT INTO thread_activity (workspace_id, thread_id, last_activity_ms)
                     VALUES (?1, ?2, ?3)",
                )
                .context("failed to prepare ledger insert")?;
            for (workspace_id, threads) in ledger.workspaces() {
                for (thread_id, at_ms) in threads {
                    statement
                        .execute(params![
                            workspace_id.as_str(),
                            thread_id.as_str(),
                            i64::try_from(*at_ms).unwrap_or(i64::MAX),
                        ])
                        .context("failed to insert ledger row")?;
                }
            }
        }
        tx.commit().context("failed to commit ledger save")?;
        Ok(())
    }
}

impl ActivityLedgerStore for SqliteLedgerStore {
    fn load(&self) -> Result<ActivityLedger, String> {
        self.load_ledger().map_err(|err| err.to_string())
    }

    fn save(&self, ledger: &ActivityLedger) -> Result<(), String> {
        self.save_ledger(ledger).map_err(|err| err.to_string())
    }
}

fn configure_connection(conn: &mut Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )
    .context("failed to apply sqlite PRAGMAs")?;
    Ok(())
}

fn apply_migrations(conn: &mut Connection) -> anyhow::Result<()> {
    let mut current: u32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get::<_, i64>(0))
        .context("failed to read user_version")? as u32;

    if current > LATEST_SCHEMA_VERSION {
        return Err(anyhow!(
            "sqlite schema version is newer than this build: db={}, app={}",
            current,
            LATEST_SCHEMA_VERSION
        ));
    }

    if current == LATEST_SCHEMA_VERSION {
        return Ok(());
    }

    conn.execute_batch("BEGIN IMMEDIATE;")
        .context("failed to begin migration transaction")?;

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        conn.execute_batch(sql)
            .with_context(|| format!("failed to apply migration v{version:04}"))?;
        conn.pragma_update(None, "user_version", *version as i64)
            .context("failed to update user_version")?;
        current = *version;
    }

    conn.execute_batch("COMMIT;")
        .context("failed to commit migration transaction")?;
    Ok(())
}
