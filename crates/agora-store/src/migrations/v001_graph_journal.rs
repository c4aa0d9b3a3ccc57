//! v001 -- Graph journal.
//!
//! One row per (node path, field): the latest accepted value and its merge
//! state.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS graph_fields (
    path   TEXT    NOT NULL,   -- JSON array of path segments
    field  TEXT    NOT NULL,
    value  TEXT    NOT NULL,   -- encoded field value
    state  INTEGER NOT NULL,   -- merge state (ms clock)
    PRIMARY KEY (path, field)
);

CREATE INDEX IF NOT EXISTS idx_graph_fields_state ON graph_fields(state);
"#;

pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
