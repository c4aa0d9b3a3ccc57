use rusqlite::{params, Row};

use crate::database::Database;
use crate::error::{Result, StoreError};

/// One journalled field. `value` is opaque to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRow {
    pub path: Vec<String>,
    pub field: String,
    pub value: String,
    pub state: i64,
}

impl Database {
    /// Record a field write. An older state never overwrites a newer one.
    pub fn record_field(&self, row: &JournalRow) -> Result<()> {
        let path = serde_json::to_string(&row.path)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        self.conn().execute(
            "INSERT INTO graph_fields (path, field, value, state)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(path, field) DO UPDATE SET
                value = excluded.value,
                state = excluded.state
             WHERE excluded.state >= graph_fields.state",
            params![path, row.field, row.value, row.state],
        )?;
        Ok(())
    }

    /// Record a batch of writes in one transaction.
    pub fn record_fields(&self, rows: &[JournalRow]) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;
        for row in rows {
            self.record_field(row)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Every journalled field, oldest state first.
    pub fn load_fields(&self) -> Result<Vec<JournalRow>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT path, field, value, state FROM graph_fields ORDER BY state ASC")?;
        let rows = stmt.query_map([], row_to_journal)?;

        let mut fields = Vec::new();
        for row in rows {
            fields.push(row?);
        }
        Ok(fields)
    }

    pub fn field_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM graph_fields", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn row_to_journal(row: &Row<'_>) -> rusqlite::Result<JournalRow> {
    let path_json: String = row.get(0)?;
    let path: Vec<String> = serde_json::from_str(&path_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(JournalRow {
        path,
        field: row.get(1)?,
        value: row.get(2)?,
        state: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(field: &str, value: &str, state: i64) -> JournalRow {
        JournalRow {
            path: vec!["dms".into(), "a::b".into()],
            field: field.into(),
            value: value.into(),
            state,
        }
    }

    #[test]
    fn newer_state_wins() {
        let db = Database::open_in_memory().unwrap();

        db.record_field(&row("text", "\"first\"", 10)).unwrap();
        db.record_field(&row("text", "\"second\"", 20)).unwrap();
        db.record_field(&row("text", "\"stale\"", 15)).unwrap();

        let fields = db.load_fields().unwrap();
        assert_eq!(fields, vec![row("text", "\"second\"", 20)]);
    }

    #[test]
    fn batch_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.db");

        {
            let db = Database::open_at(&path).unwrap();
            db.record_fields(&[row("a", "1", 1), row("b", "2", 2)]).unwrap();
        }

        let db = Database::open_at(&path).unwrap();
        assert_eq!(db.field_count().unwrap(), 2);
        let fields = db.load_fields().unwrap();
        assert_eq!(fields[0].field, "a");
        assert_eq!(fields[1].path, vec!["dms".to_string(), "a::b".to_string()]);
    }
}
