//! Database schema migrations.

use rusqlite::Connection;
use tracing::info;

use folio_core::error::FolioError;

use crate::db::sql_err;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), FolioError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(sql_err("Failed to create migrations table"))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(sql_err("Failed to query migration version"))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: workspaces, content, agent state, pattern detections, outbox.
fn apply_v1(conn: &Connection) -> Result<(), FolioError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS workspaces (
            id              TEXT PRIMARY KEY NOT NULL,
            name            TEXT NOT NULL,
            owner_id        TEXT,
            created_at      INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS spaces (
            id              TEXT PRIMARY KEY NOT NULL,
            workspace_id    TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
            name            TEXT NOT NULL,
            created_at      INTEGER NOT NULL,
            archived_at     INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_spaces_workspace ON spaces(workspace_id, created_at);

        -- space_id = '' holds the workspace-level settings.
        CREATE TABLE IF NOT EXISTS agent_settings (
            workspace_id    TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
            space_id        TEXT NOT NULL DEFAULT '',
            settings        TEXT NOT NULL DEFAULT '{}',
            updated_at      INTEGER NOT NULL,
            PRIMARY KEY (workspace_id, space_id)
        );

        CREATE TABLE IF NOT EXISTS pages (
            id              TEXT PRIMARY KEY NOT NULL,
            workspace_id    TEXT NOT NULL,
            space_id        TEXT NOT NULL,
            title           TEXT NOT NULL,
            content         TEXT NOT NULL DEFAULT '',
            parent_page_id  TEXT,
            generated_key   TEXT,
            created_by      TEXT,
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL,
            deleted_at      INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_pages_space_title ON pages(space_id, title);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_pages_generated_key
            ON pages(space_id, generated_key)
            WHERE generated_key IS NOT NULL AND deleted_at IS NULL;

        CREATE TABLE IF NOT EXISTS projects (
            id              TEXT PRIMARY KEY NOT NULL,
            workspace_id    TEXT NOT NULL,
            space_id        TEXT NOT NULL,
            name            TEXT NOT NULL,
            description     TEXT NOT NULL DEFAULT '',
            status          TEXT NOT NULL DEFAULT 'active'
                            CHECK (status IN ('active', 'paused', 'completed', 'archived')),
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tasks (
            id              TEXT PRIMARY KEY NOT NULL,
            workspace_id    TEXT NOT NULL,
            space_id        TEXT NOT NULL,
            project_id      TEXT,
            title           TEXT NOT NULL,
            description     TEXT NOT NULL DEFAULT '',
            status          TEXT NOT NULL DEFAULT 'todo'
                            CHECK (status IN ('todo', 'in_progress', 'blocked', 'done', 'cancelled')),
            priority        TEXT NOT NULL DEFAULT 'medium'
                            CHECK (priority IN ('low', 'medium', 'high', 'urgent')),
            bucket          TEXT
                            CHECK (bucket IS NULL OR bucket IN ('inbox', 'next', 'waiting', 'someday')),
            due_date        TEXT,
            tags            TEXT NOT NULL DEFAULT '[]',
            created_by      TEXT,
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL,
            completed_at    INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_space ON tasks(space_id, status);

        CREATE TABLE IF NOT EXISTS goals (
            id              TEXT PRIMARY KEY NOT NULL,
            workspace_id    TEXT NOT NULL,
            space_id        TEXT,
            title           TEXT NOT NULL,
            horizon         TEXT NOT NULL DEFAULT 'mid',
            keywords        TEXT NOT NULL DEFAULT '[]',
            status          TEXT NOT NULL DEFAULT 'active',
            created_at      INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS memories (
            id              TEXT PRIMARY KEY NOT NULL,
            workspace_id    TEXT NOT NULL,
            space_id        TEXT,
            source          TEXT NOT NULL,
            tags            TEXT NOT NULL DEFAULT '[]',
            content         TEXT NOT NULL,
            metadata        TEXT NOT NULL DEFAULT '{}',
            created_at      INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_memories_workspace ON memories(workspace_id, created_at DESC);

        CREATE TABLE IF NOT EXISTS agent_approvals (
            token           TEXT PRIMARY KEY NOT NULL,
            workspace_id    TEXT NOT NULL,
            space_id        TEXT,
            user_id         TEXT NOT NULL,
            method          TEXT NOT NULL,
            params          TEXT NOT NULL DEFAULT '{}',
            reason          TEXT NOT NULL DEFAULT '',
            created_at      INTEGER NOT NULL,
            expires_at      INTEGER NOT NULL,
            consumed_at     INTEGER
        );

        CREATE TABLE IF NOT EXISTS agent_review_prompts (
            id              TEXT PRIMARY KEY NOT NULL,
            workspace_id    TEXT NOT NULL,
            space_id        TEXT NOT NULL,
            week_key        TEXT NOT NULL,
            question        TEXT NOT NULL,
            created_at      INTEGER NOT NULL,
            consumed_at     INTEGER,
            UNIQUE (space_id, week_key, question)
        );

        CREATE TABLE IF NOT EXISTS pattern_detections (
            id              TEXT PRIMARY KEY NOT NULL,
            workspace_id    TEXT NOT NULL,
            pattern_type    TEXT NOT NULL
                            CHECK (pattern_type IN ('convergence', 'contradiction', 'staleness',
                                   'cross_domain', 'untested_implication', 'intake_gate',
                                   'evidence_gap', 'reproduction_failure')),
            severity        TEXT NOT NULL CHECK (severity IN ('low', 'medium', 'high')),
            status          TEXT NOT NULL DEFAULT 'detected'
                            CHECK (status IN ('detected', 'acknowledged', 'dismissed')),
            title           TEXT NOT NULL,
            description     TEXT NOT NULL DEFAULT '',
            dedup_key       TEXT NOT NULL,
            details         TEXT NOT NULL DEFAULT '{}',
            action_taken    TEXT,
            detected_at     INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_detections_dedup
            ON pattern_detections(workspace_id, pattern_type, dedup_key);

        CREATE TABLE IF NOT EXISTS research_nodes (
            id              TEXT PRIMARY KEY NOT NULL,
            workspace_id    TEXT NOT NULL,
            kind            TEXT NOT NULL,
            title           TEXT NOT NULL,
            domain          TEXT,
            status          TEXT NOT NULL DEFAULT 'open',
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS research_edges (
            id              TEXT PRIMARY KEY NOT NULL,
            workspace_id    TEXT NOT NULL,
            from_id         TEXT NOT NULL REFERENCES research_nodes(id) ON DELETE CASCADE,
            to_id           TEXT NOT NULL REFERENCES research_nodes(id) ON DELETE CASCADE,
            relation        TEXT NOT NULL,
            created_at      INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_edges_relation ON research_edges(workspace_id, relation);

        CREATE TABLE IF NOT EXISTS event_outbox (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            event_name      TEXT NOT NULL,
            workspace_id    TEXT,
            payload         TEXT NOT NULL,
            created_at      INTEGER NOT NULL,
            delivered_at    INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_outbox_pending ON event_outbox(delivered_at, id);

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(sql_err("Failed to apply migration v1"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n == 1)
        .unwrap_or(false)
    }

    #[test]
    fn test_migrations_create_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        for table in [
            "workspaces",
            "spaces",
            "agent_settings",
            "pages",
            "projects",
            "tasks",
            "goals",
            "memories",
            "agent_approvals",
            "agent_review_prompts",
            "pattern_detections",
            "research_nodes",
            "research_edges",
            "event_outbox",
        ] {
            assert!(table_exists(&conn, table), "missing table {}", table);
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_task_status_check_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO tasks (id, workspace_id, space_id, title, status, created_at, updated_at)
             VALUES ('t1', 'w', 's', 'x', 'Doing', 0, 0)",
            [],
        );
        assert!(result.is_err());
    }
}
