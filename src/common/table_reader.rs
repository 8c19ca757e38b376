use duckdb::{params, Connection, Row};
use std::collections::HashMap;

use super::error::{ReconError, Result};
use super::types::{GroupKey, Observation};

/// Columns every input table must provide, after trimming and lowercasing.
pub const REQUIRED_COLUMNS: [&str; 8] = [
    "company",
    "account",
    "au",
    "currency",
    "primary account",
    "as of date",
    "gl balance",
    "ihub balance",
];

/// Read balance observations from a DuckDB table or view.
///
/// Column names are matched after trimming and lowercasing, so a table with
/// `" Company "` satisfies `company`. Key columns are read as text, the
/// date is cast to DATE and the balance difference is `gl balance - ihub
/// balance`. Any NULL or non-numeric required value fails the whole read.
///
/// Views work too, so any source DuckDB can scan (e.g. `read_csv_auto`) can
/// be exposed with `CREATE VIEW ... AS SELECT * FROM read_csv_auto(...)`.
pub fn read_observations(conn: &Connection, table_name: &str) -> Result<Vec<Observation>> {
    let (table, columns) = resolve_columns(conn, table_name)?;
    let col = |name: &str| -> String {
        // resolve_columns guarantees every required column is present
        format!("\"{}\"", escape_identifier(&columns[name]))
    };

    // Raw text copies of date and balances are read alongside the casts so a
    // failed cast can be told apart from a NULL.
    let sql = format!(
        "SELECT CAST({} AS VARCHAR), CAST({} AS VARCHAR), CAST({} AS VARCHAR), \
         CAST({} AS VARCHAR), CAST({} AS VARCHAR), \
         date_diff('day', DATE '1970-01-01', TRY_CAST({} AS DATE)), CAST({} AS VARCHAR), \
         TRY_CAST({} AS DOUBLE), CAST({} AS VARCHAR), \
         TRY_CAST({} AS DOUBLE), CAST({} AS VARCHAR) \
         FROM \"{}\"",
        col("company"),
        col("account"),
        col("au"),
        col("currency"),
        col("primary account"),
        col("as of date"),
        col("as of date"),
        col("gl balance"),
        col("gl balance"),
        col("ihub balance"),
        col("ihub balance"),
        escape_identifier(&table),
    );

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    let mut observations = Vec::new();
    let mut row_number = 0usize;

    while let Some(row) = rows.next()? {
        row_number += 1;
        let observation = parse_row(row).map_err(|reason| ReconError::InvalidRow {
            table: table_name.to_string(),
            row: row_number,
            reason,
        })?;
        observations.push(observation);
    }

    tracing::debug!(table = table_name, rows = observations.len(), "read observations");
    Ok(observations)
}

/// Find the table in the current schema, matching its name case-insensitively
/// the way DuckDB resolves identifiers, and map each required column to the
/// table's actual column name.
fn resolve_columns(conn: &Connection, table_name: &str) -> Result<(String, HashMap<&'static str, String>)> {
    let mut stmt = conn.prepare(
        "SELECT table_name, column_name FROM information_schema.columns \
         WHERE lower(table_name) = lower(?) AND table_schema = current_schema() \
         ORDER BY table_name, ordinal_position",
    )?;
    let found: Vec<(String, String)> = stmt
        .query_map(params![table_name], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<std::result::Result<_, _>>()?;

    let Some(table) = found.first().map(|(table, _)| table.clone()) else {
        return Err(ReconError::TableNotFound(table_name.to_string()));
    };
    let actual = found.into_iter().filter(|(t, _)| *t == table).map(|(_, column)| column);

    let mut normalized: HashMap<String, String> = HashMap::new();
    for name in actual {
        normalized.entry(name.trim().to_lowercase()).or_insert(name);
    }

    let mut resolved = HashMap::with_capacity(REQUIRED_COLUMNS.len());
    let mut missing = Vec::new();
    for required in REQUIRED_COLUMNS {
        match normalized.get(required) {
            Some(name) => {
                resolved.insert(required, name.clone());
            }
            None => missing.push(required.to_string()),
        }
    }

    if !missing.is_empty() {
        return Err(ReconError::MissingColumns {
            table: table_name.to_string(),
            columns: missing,
        });
    }
    Ok((table, resolved))
}

fn parse_row(row: &Row<'_>) -> std::result::Result<Observation, String> {
    let key = GroupKey {
        company: text(row, 0, "company")?,
        account: text(row, 1, "account")?,
        au: text(row, 2, "au")?,
        currency: text(row, 3, "currency")?,
        primary_account: text(row, 4, "primary account")?,
    };

    let days: Option<i64> = row.get(5).map_err(|e| e.to_string())?;
    let as_of_date = match days {
        Some(d) => i32::try_from(d).map_err(|_| format!("as of date is out of range ({} days)", d))?,
        None => return Err(cast_failure(row, 6, "as of date", "a date")),
    };

    let gl_balance = number(row, 7, "gl balance")?;
    let ihub_balance = number(row, 9, "ihub balance")?;

    Ok(Observation::from_balances(key, as_of_date, gl_balance, ihub_balance))
}

fn text(row: &Row<'_>, idx: usize, name: &str) -> std::result::Result<String, String> {
    let value: Option<String> = row.get(idx).map_err(|e| e.to_string())?;
    value.ok_or_else(|| format!("{} is NULL", name))
}

/// Read a TRY_CAST numeric at `idx`; its raw text sits at `idx + 1`.
fn number(row: &Row<'_>, idx: usize, name: &str) -> std::result::Result<f64, String> {
    let value: Option<f64> = row.get(idx).map_err(|e| e.to_string())?;
    match value {
        Some(v) if v.is_finite() => Ok(v),
        Some(v) => Err(format!("{} is not finite ({})", name, v)),
        None => Err(cast_failure(row, idx + 1, name, "numeric")),
    }
}

fn cast_failure(row: &Row<'_>, raw_idx: usize, name: &str, expected: &str) -> String {
    match row.get::<_, Option<String>>(raw_idx) {
        Ok(Some(raw)) => format!("{} '{}' is not {}", name, raw, expected),
        _ => format!("{} is NULL", name),
    }
}

/// Escape a SQL identifier by doubling any internal double quotes.
fn escape_identifier(name: &str) -> String {
    name.replace('"', "\"\"")
}
