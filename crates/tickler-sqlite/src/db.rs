use rusqlite::Connection;

/// Initialise the job schema in `conn`.
///
/// Creates the `jobs` table and the recurring-name uniqueness index. The date
/// index is left to [`ensure_date_index`], which the scheduler calls on start.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id          TEXT    NOT NULL PRIMARY KEY,
            name        TEXT    NOT NULL,
            date        INTEGER NOT NULL,   -- Unix epoch milliseconds
            data        TEXT    NOT NULL,   -- opaque JSON payload
            recurrent   INTEGER NOT NULL DEFAULT 0
        ) STRICT;

        -- One pending occurrence per recurring job name.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_recurring
            ON jobs (name) WHERE recurrent = 1;
        ",
    )
}

/// Index backing `SELECT MIN(date)` and `WHERE date = ?`. Idempotent.
pub fn ensure_date_index(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("CREATE INDEX IF NOT EXISTS idx_jobs_date ON jobs (date);")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'jobs' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap()
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
        ensure_date_index(&conn).unwrap();
        ensure_date_index(&conn).unwrap();

        let names = index_names(&conn);
        assert!(names.contains(&"idx_jobs_date".to_string()));
        assert!(names.contains(&"idx_jobs_recurring".to_string()));
    }

    #[test]
    fn second_recurring_row_for_a_name_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let insert = "INSERT INTO jobs (id, name, date, data, recurrent) VALUES (?1, 'beat', 0, 'null', ?2)";
        conn.execute(insert, rusqlite::params!["a", 1]).unwrap();
        conn.execute(insert, rusqlite::params!["b", 0]).unwrap();
        assert!(conn.execute(insert, rusqlite::params!["c", 1]).is_err());
    }
}
