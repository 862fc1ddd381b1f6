//! Statement executors.
//!
//! Every executor checks a connection out for the duration of one call and
//! hands it back on every exit path. Callers never see a raw connection.

use rusqlite::types::Value;
use rusqlite::{Params, Transaction, TransactionBehavior};
use tracing::warn;

use crate::errors::{PoolError, Result};
use crate::sqlite::SqlitePool;

/// Rows returned by [`query`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResult {
    /// Column names in result order. Empty for statements without a result set.
    pub columns: Vec<String>,
    /// Row values, each in column order.
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    /// Number of rows returned.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no rows were returned.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Run a read statement and collect every row.
///
/// No transaction is opened, committed, or rolled back.
pub fn query<P: Params>(pool: &SqlitePool, sql: &str, params: P) -> Result<QueryResult> {
    pool.with_connection(|conn| {
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_owned)
            .collect();
        let width = columns.len();

        let mut rows = stmt.query(params)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let values = (0..width)
                .map(|i| row.get::<_, Value>(i))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            out.push(values);
        }
        Ok(QueryResult { columns, rows: out })
    })
}

/// Run one mutating statement in its own transaction and return the number
/// of affected rows.
///
/// The transaction is opened `IMMEDIATE`, so the write lock is taken up
/// front and lock waits go through the connection's busy timeout.
///
/// Commits on success. On failure the transaction is rolled back and the
/// statement error is returned; if the rollback fails too, both are reported
/// as [`PoolError::StatementRollback`].
pub fn execute<P: Params>(pool: &SqlitePool, sql: &str, params: P) -> Result<usize> {
    pool.with_connection(|conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        match tx.execute(sql, params) {
            Ok(affected) => {
                tx.commit()?;
                Ok(affected)
            }
            Err(err) => Err(roll_back(tx, PoolError::Statement(err))),
        }
    })
}

/// Run `f` inside one transaction on one connection.
///
/// Commits when `f` returns `Ok`, rolls back when it returns `Err`. A panic
/// inside `f` rolls back as the transaction is dropped.
pub fn transaction<T, F>(pool: &SqlitePool, f: F) -> Result<T>
where
    F: FnOnce(&Transaction<'_>) -> Result<T>,
{
    pool.with_connection(|conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => Err(roll_back(tx, err)),
        }
    })
}

fn roll_back(tx: Transaction<'_>, err: PoolError) -> PoolError {
    match tx.rollback() {
        Ok(()) => err,
        Err(rollback) => {
            warn!(error = %err, rollback_error = %rollback, "rollback failed");
            match err {
                PoolError::Statement(source) => PoolError::StatementRollback { source, rollback },
                other => other,
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use rusqlite::params;
    use warden_settings::TuningDirectives;

    use super::*;
    use crate::pool::{Pool, PoolOptions};
    use crate::sqlite::SqliteManager;
    use crate::target::Target;

    fn memory_pool() -> SqlitePool {
        let manager = SqliteManager::new(Target::anonymous_memory(), TuningDirectives::default());
        Pool::new(manager, PoolOptions::new(1, 2)).unwrap()
    }

    fn with_users(pool: &SqlitePool) {
        let _ = execute(
            pool,
            "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL UNIQUE, age INTEGER CHECK (age < 150))",
            [],
        )
        .unwrap();
    }

    #[test]
    fn query_returns_columns_and_rows() {
        let pool = memory_pool();
        with_users(&pool);
        let n = execute(
            &pool,
            "INSERT INTO users (email, age) VALUES (?1, ?2), (?3, ?4)",
            params!["a@example.com", 31, "b@example.com", 42],
        )
        .unwrap();
        assert_eq!(n, 2);

        let result = query(&pool, "SELECT email, age FROM users ORDER BY id", []).unwrap();
        assert_eq!(result.columns, ["email", "age"]);
        assert_eq!(
            result.rows,
            vec![
                vec![Value::Text("a@example.com".into()), Value::Integer(31)],
                vec![Value::Text("b@example.com".into()), Value::Integer(42)],
            ]
        );
    }

    #[test]
    fn query_with_params_and_nulls() {
        let pool = memory_pool();
        let result = query(&pool, "SELECT ?1 AS a, NULL AS b, 1.5 AS c", ["x"]).unwrap();
        assert_eq!(result.columns, ["a", "b", "c"]);
        assert_eq!(
            result.rows[0],
            [Value::Text("x".into()), Value::Null, Value::Real(1.5)]
        );
    }

    #[test]
    fn statement_without_result_set_has_no_columns() {
        let pool = memory_pool();
        let result = query(&pool, "CREATE TABLE t (v INTEGER)", []).unwrap();
        assert!(result.columns.is_empty());
        assert!(result.is_empty());
    }

    #[test]
    fn failed_execute_leaves_no_rows() {
        let pool = memory_pool();
        with_users(&pool);
        let err = execute(
            &pool,
            "INSERT INTO users (email, age) VALUES ('a@example.com', 20), ('b@example.com', 200)",
            [],
        )
        .unwrap_err();
        assert_matches!(err, PoolError::Statement(_));

        let result = query(&pool, "SELECT * FROM users", []).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn execute_returns_connection_after_failure() {
        let pool = memory_pool();
        assert!(execute(&pool, "NOT SQL", []).is_err());
        let stats = pool.stats();
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.available_connections, stats.total_connections);
    }

    #[test]
    fn transaction_commits_on_ok() {
        let pool = memory_pool();
        with_users(&pool);
        let id = transaction(&pool, |tx| {
            let _ = tx.execute("INSERT INTO users (email) VALUES ('c@example.com')", [])?;
            Ok(tx.last_insert_rowid())
        })
        .unwrap();
        assert_eq!(id, 1);
        assert_eq!(query(&pool, "SELECT id FROM users", []).unwrap().len(), 1);
    }

    #[test]
    fn failed_rollback_reports_both_errors() {
        let pool = memory_pool();
        // Ending the transaction early leaves nothing for the rollback to undo.
        let result: Result<()> = transaction(&pool, |tx| {
            tx.execute_batch("COMMIT")?;
            Err(PoolError::Statement(rusqlite::Error::QueryReturnedNoRows))
        });
        assert_matches!(
            result,
            Err(PoolError::StatementRollback {
                source: rusqlite::Error::QueryReturnedNoRows,
                ..
            })
        );
        assert_eq!(pool.stats().available_connections, pool.stats().total_connections);
    }

    #[test]
    fn failed_rollback_keeps_non_statement_error() {
        let pool = memory_pool();
        let result: Result<()> = transaction(&pool, |tx| {
            tx.execute_batch("COMMIT")?;
            Err(PoolError::InvalidConfig("rejected".into()))
        });
        assert_matches!(result, Err(PoolError::InvalidConfig(msg)) if msg == "rejected");
    }

    #[test]
    fn transaction_rolls_back_on_err() {
        let pool = memory_pool();
        with_users(&pool);
        let result: Result<()> = transaction(&pool, |tx| {
            let _ = tx.execute("INSERT INTO users (email) VALUES ('d@example.com')", [])?;
            let _ = tx.execute("INSERT INTO users (email) VALUES ('d@example.com')", [])?;
            Ok(())
        });
        assert_matches!(result, Err(PoolError::Statement(_)));
        assert!(query(&pool, "SELECT id FROM users", []).unwrap().is_empty());
    }
}
