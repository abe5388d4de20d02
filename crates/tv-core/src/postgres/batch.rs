use sqlx::AnyPool;
use tracing::{debug, error, trace};

use crate::error::{MigrateError, Result};

/// A positional bind value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Bind {
    Text(String),
    Bytes(Vec<u8>),
}

/// Target of a multi-row upsert. `data` is always the payload column.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UpsertTable {
    pub table: &'static str,
    pub columns: &'static [&'static str],
    pub conflict: &'static str,
}

pub(crate) const SSL_KEY: UpsertTable = UpsertTable {
    table: "sslkey",
    columns: &["deliveryservice", "data", "cdn", "version", "provider"],
    conflict: "deliveryservice,cdn,version",
};

pub(crate) const DNSSEC: UpsertTable = UpsertTable {
    table: "dnssec",
    columns: &["cdn", "data"],
    conflict: "cdn",
};

pub(crate) const URL_SIG_KEY: UpsertTable = UpsertTable {
    table: "url_sig_key",
    columns: &["deliveryservice", "data"],
    conflict: "deliveryservice",
};

pub(crate) const URI_SIGNING_KEY: UpsertTable = UpsertTable {
    table: "uri_signing_key",
    columns: &["deliveryservice", "data"],
    conflict: "deliveryservice",
};

impl UpsertTable {
    pub fn stride(&self) -> usize {
        self.columns.len()
    }

    pub fn statement(&self, rows: usize) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES {} ON CONFLICT ({}) DO UPDATE SET data = EXCLUDED.data",
            self.table,
            self.columns.join(", "),
            values_clause(rows, self.stride()),
            self.conflict
        )
    }
}

/// `($1,$2),($3,$4),…` for `rows` tuples of `stride` placeholders.
pub(crate) fn values_clause(rows: usize, stride: usize) -> String {
    (0..rows)
        .map(|row| {
            let cols: Vec<String> = (1..=stride)
                .map(|col| format!("${}", row * stride + col))
                .collect();
            format!("({})", cols.join(","))
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Upsert `args` into `target` as one statement in one transaction.
///
/// The statement must report exactly one affected row per tuple; otherwise
/// the transaction is rolled back and nothing from the batch is kept.
pub(crate) async fn upsert(pool: &AnyPool, target: &UpsertTable, args: Vec<Bind>) -> Result<()> {
    if args.is_empty() {
        return Ok(());
    }
    let stride = target.stride();
    if args.len() % stride != 0 {
        return Err(MigrateError::Integrity(format!(
            "{}: {} bind values do not divide into rows of {stride}",
            target.table,
            args.len()
        )));
    }
    let rows = args.len() / stride;
    let sql = target.statement(rows);

    let mut query = sqlx::query(&sql);
    for arg in args {
        query = match arg {
            Bind::Text(s) => query.bind(s),
            Bind::Bytes(b) => query.bind(b),
        };
    }

    let mut tx = pool
        .begin()
        .await
        .map_err(|e| MigrateError::Query(format!("{}: unable to begin transaction: {e}", target.table)))?;

    let failure = match query.execute(&mut *tx).await {
        Ok(done) if done.rows_affected() == rows as u64 => {
            tx.commit().await.map_err(|e| {
                MigrateError::Query(format!("{}: unable to commit: {e}", target.table))
            })?;
            debug!(table = target.table, rows, "upserted batch");
            trace!(table = target.table, "committed");
            return Ok(());
        }
        Ok(done) => MigrateError::Integrity(format!(
            "{}: expected {rows} rows affected, got {}",
            target.table,
            done.rows_affected()
        )),
        Err(e) => MigrateError::Query(format!("{}: unable to insert keys: {e}", target.table)),
    };

    if let Err(e) = tx.rollback().await {
        error!(table = target.table, "rollback failed: {e}");
    }
    Err(failure)
}
