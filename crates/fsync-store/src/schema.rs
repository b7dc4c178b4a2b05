// schema.rs — Table definitions and migration steps.
//
// Versioning uses PRAGMA user_version. Each migration step is the full SQL
// to move one version forward; steps are applied in order inside one
// transaction per step.

/// The schema version this binary writes.
pub const SCHEMA_VERSION: i64 = 1;

/// Migration steps, index 0 moving user_version 0 → 1, and so on.
pub const MIGRATIONS: &[&str] = &[
    // v1: initial layout.
    r#"
    CREATE TABLE nodes (
        id                     TEXT PRIMARY KEY,
        name                   TEXT NOT NULL UNIQUE,
        address                TEXT NOT NULL DEFAULT '',
        kind                   TEXT NOT NULL,
        agent_token            TEXT,
        agent_cert_fingerprint TEXT,
        agent_version          TEXT,
        connection_status      TEXT NOT NULL,
        health                 TEXT NOT NULL,
        last_seen              TEXT,
        created_at             TEXT NOT NULL,
        updated_at             TEXT NOT NULL
    );

    CREATE TABLE change_queue (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        project     TEXT NOT NULL,
        path        TEXT,
        kind        TEXT NOT NULL,
        enqueued_at TEXT NOT NULL
    );
    CREATE INDEX idx_change_queue_project ON change_queue(project, id);

    CREATE TABLE sync_tasks (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        project     TEXT NOT NULL,
        node_id     TEXT NOT NULL,
        status      TEXT NOT NULL,
        bytes       INTEGER NOT NULL DEFAULT 0,
        blocks      INTEGER NOT NULL DEFAULT 0,
        duration_ms INTEGER NOT NULL DEFAULT 0,
        attempts    INTEGER NOT NULL DEFAULT 0,
        created_at  TEXT NOT NULL,
        started_at  TEXT,
        updated_at  TEXT NOT NULL,
        last_error  TEXT,
        error_code  TEXT
    );
    CREATE INDEX idx_sync_tasks_pair ON sync_tasks(project, node_id, id);
    CREATE INDEX idx_sync_tasks_status ON sync_tasks(status);

    CREATE TABLE sync_task_logs (
        id      INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id INTEGER NOT NULL REFERENCES sync_tasks(id) ON DELETE CASCADE,
        at      TEXT NOT NULL,
        line    TEXT NOT NULL
    );
    CREATE INDEX idx_sync_task_logs_task ON sync_task_logs(task_id);
    "#,
];
