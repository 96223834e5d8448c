// 🗄️ Warehouse storage - star schema DDL, bulk writes and key read-back on SQLite
//
// Every function takes a plain `&Connection`, so callers can pass either a
// connection or an open `Transaction`. The loader always passes the run's
// transaction.

use crate::dimensions::{CategoryDimRow, DateDimRow, TrendDimRow, TrendSignals};
use crate::facts::FactRow;
use crate::surrogate_keys::{PersistedCategory, PersistedTrend};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const DIM_DATE: &str = "dim_date";
pub const DIM_CATEGORY: &str = "dim_product_category";
pub const DIM_TREND: &str = "dim_trend";
pub const FACT_SALES: &str = "fact_sales";
pub const MART_DAILY_CATEGORY: &str = "mart_daily_category_sales";

/// Every table the loader owns, parents first
pub const WAREHOUSE_TABLES: [&str; 5] = [
    DIM_DATE,
    DIM_CATEGORY,
    DIM_TREND,
    FACT_SALES,
    MART_DAILY_CATEGORY,
];

/// Open (or create) the warehouse file with foreign keys enforced for the session
pub fn open_warehouse(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    enable_foreign_keys(&conn)?;
    Ok(conn)
}

/// Must run outside a transaction; SQLite ignores the pragma inside one
pub fn enable_foreign_keys(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")
}

pub fn foreign_keys_enabled(conn: &Connection) -> rusqlite::Result<bool> {
    conn.query_row("PRAGMA foreign_keys", [], |row| row.get::<_, i64>(0))
        .map(|v| v == 1)
}

/// Drop and recreate every warehouse table. AUTOINCREMENT counters reset
/// with the drop, so surrogate keys restart at 1 on every run.
pub fn create_star_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "DROP TABLE IF EXISTS mart_daily_category_sales;
         DROP TABLE IF EXISTS fact_sales;
         DROP TABLE IF EXISTS dim_trend;
         DROP TABLE IF EXISTS dim_product_category;
         DROP TABLE IF EXISTS dim_date;",
    )?;

    conn.execute_batch(
        "CREATE TABLE dim_date (
            date_key INTEGER PRIMARY KEY,
            sale_date TEXT,
            year INTEGER,
            month INTEGER,
            day_of_week INTEGER,
            is_weekend INTEGER
        );

        CREATE TABLE dim_product_category (
            category_id INTEGER PRIMARY KEY AUTOINCREMENT,
            label TEXT NOT NULL UNIQUE
        );

        CREATE TABLE dim_trend (
            trend_id INTEGER PRIMARY KEY AUTOINCREMENT,
            signal_1 REAL,
            signal_2 REAL,
            signal_3 REAL,
            signal_4 REAL,
            trend_avg REAL,
            trend_max REAL,
            UNIQUE (signal_1, signal_2, signal_3, signal_4, trend_avg, trend_max)
        );

        CREATE TABLE fact_sales (
            transaction_key TEXT NOT NULL PRIMARY KEY,
            date_key INTEGER NOT NULL,
            category_id INTEGER NOT NULL,
            trend_id INTEGER NOT NULL,
            gross_revenue REAL,
            rev_per_unit REAL,
            trend_for_product REAL,
            FOREIGN KEY (date_key) REFERENCES dim_date(date_key),
            FOREIGN KEY (category_id) REFERENCES dim_product_category(category_id),
            FOREIGN KEY (trend_id) REFERENCES dim_trend(trend_id)
        );

        -- rollup, no declared key
        CREATE TABLE mart_daily_category_sales (
            sale_date TEXT,
            product_category TEXT,
            year INTEGER,
            month INTEGER,
            day_of_week INTEGER,
            is_weekend INTEGER,
            n_transactions INTEGER,
            total_qty REAL,
            daily_revenue REAL,
            avg_revenue_per_tx REAL,
            avg_trend_for_product REAL,
            trend_avg_overall REAL,
            trend_max_overall REAL
        );",
    )?;

    Ok(())
}

// ============================================================================
// DIMENSION WRITES
// ============================================================================

pub fn insert_date_dim(conn: &Connection, rows: &[DateDimRow]) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare(
        "INSERT INTO dim_date (date_key, sale_date, year, month, day_of_week, is_weekend)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;

    for row in rows {
        stmt.execute(params![
            row.date_key,
            row.sale_date,
            row.year,
            row.month,
            row.day_of_week,
            row.is_weekend,
        ])?;
    }

    Ok(rows.len())
}

pub fn insert_category_dim(conn: &Connection, rows: &[CategoryDimRow]) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare("INSERT INTO dim_product_category (label) VALUES (?1)")?;

    for row in rows {
        stmt.execute(params![row.label])?;
    }

    Ok(rows.len())
}

pub fn insert_trend_dim(conn: &Connection, rows: &[TrendDimRow]) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare(
        "INSERT INTO dim_trend (signal_1, signal_2, signal_3, signal_4, trend_avg, trend_max)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;

    for row in rows {
        let [s1, s2, s3, s4, avg, max] = row.signals.0;
        stmt.execute(params![s1, s2, s3, s4, avg, max])?;
    }

    Ok(rows.len())
}

// ============================================================================
// KEY READ-BACK
// ============================================================================

pub fn read_categories(conn: &Connection) -> rusqlite::Result<Vec<PersistedCategory>> {
    let mut stmt = conn.prepare(
        "SELECT category_id, label FROM dim_product_category ORDER BY category_id",
    )?;

    let categories = stmt
        .query_map([], |row| {
            Ok(PersistedCategory {
                category_id: row.get(0)?,
                label: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(categories)
}

pub fn read_trends(conn: &Connection) -> rusqlite::Result<Vec<PersistedTrend>> {
    let mut stmt = conn.prepare(
        "SELECT trend_id, signal_1, signal_2, signal_3, signal_4, trend_avg, trend_max
         FROM dim_trend
         ORDER BY trend_id",
    )?;

    let trends = stmt
        .query_map([], |row| {
            Ok(PersistedTrend {
                trend_id: row.get(0)?,
                signals: TrendSignals([
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ]),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(trends)
}

// ============================================================================
// FACT + MART WRITES
// ============================================================================

pub fn insert_facts(conn: &Connection, facts: &[FactRow]) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare(
        "INSERT INTO fact_sales (
            transaction_key, date_key, category_id, trend_id,
            gross_revenue, rev_per_unit, trend_for_product
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;

    for fact in facts {
        stmt.execute(params![
            fact.transaction_key,
            fact.date_key,
            fact.category_id,
            fact.trend_id,
            fact.gross_revenue,
            fact.rev_per_unit,
            fact.trend_for_product,
        ])?;
    }

    Ok(facts.len())
}

/// Fill the freshly created daily × category rollup from fact_sales.
/// Quantity is recovered as revenue / per-unit revenue where that is defined.
pub fn populate_mart(conn: &Connection) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO mart_daily_category_sales (
            sale_date, product_category, year, month, day_of_week, is_weekend,
            n_transactions, total_qty, daily_revenue, avg_revenue_per_tx,
            avg_trend_for_product, trend_avg_overall, trend_max_overall
         )
         SELECT
            d.sale_date,
            c.label,
            d.year,
            d.month,
            d.day_of_week,
            d.is_weekend,
            COUNT(f.transaction_key),
            SUM(CASE WHEN f.rev_per_unit > 0 THEN f.gross_revenue / f.rev_per_unit ELSE 0 END),
            SUM(f.gross_revenue),
            AVG(f.gross_revenue),
            AVG(f.trend_for_product),
            AVG(t.trend_avg),
            MAX(t.trend_max)
         FROM fact_sales f
         JOIN dim_date d ON d.date_key = f.date_key
         JOIN dim_product_category c ON c.category_id = f.category_id
         JOIN dim_trend t ON t.trend_id = f.trend_id
         GROUP BY f.date_key, c.label
         ORDER BY f.date_key, c.label",
        [],
    )
}

// ============================================================================
// INSPECTION
// ============================================================================

pub fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Row counts of the warehouse tables that currently exist
pub fn table_counts(conn: &Connection) -> rusqlite::Result<BTreeMap<String, u64>> {
    let mut counts = BTreeMap::new();

    for table in WAREHOUSE_TABLES {
        if table_exists(conn, table)? {
            let count: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
            counts.insert(table.to_string(), count as u64);
        }
    }

    Ok(counts)
}

/// Warehouse tables not present in the file, parents first
pub fn missing_tables(conn: &Connection) -> rusqlite::Result<Vec<&'static str>> {
    let mut missing = Vec::new();
    for table in WAREHOUSE_TABLES {
        if !table_exists(conn, table)? {
            missing.push(table);
        }
    }
    Ok(missing)
}

/// page_count × page_size; works for in-memory databases too
pub fn storage_size_bytes(conn: &Connection) -> rusqlite::Result<u64> {
    let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
    let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
    Ok((page_count * page_size) as u64)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub fact_rows: u64,
    pub missing_date_fk: u64,
    pub missing_category_fk: u64,
    pub missing_trend_fk: u64,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.missing_date_fk == 0 && self.missing_category_fk == 0 && self.missing_trend_fk == 0
    }
}

/// Count fact rows whose foreign keys point at nothing
pub fn integrity_check(conn: &Connection) -> rusqlite::Result<IntegrityReport> {
    conn.query_row(
        "SELECT
            COUNT(*),
            COALESCE(SUM(CASE WHEN d.date_key IS NULL THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN c.category_id IS NULL THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN t.trend_id IS NULL THEN 1 ELSE 0 END), 0)
         FROM fact_sales f
         LEFT JOIN dim_date d ON f.date_key = d.date_key
         LEFT JOIN dim_product_category c ON f.category_id = c.category_id
         LEFT JOIN dim_trend t ON f.trend_id = t.trend_id",
        [],
        |row| {
            Ok(IntegrityReport {
                fact_rows: row.get::<_, i64>(0)? as u64,
                missing_date_fk: row.get::<_, i64>(1)? as u64,
                missing_category_fk: row.get::<_, i64>(2)? as u64,
                missing_trend_fk: row.get::<_, i64>(3)? as u64,
            })
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warehouse() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        enable_foreign_keys(&conn).unwrap();
        create_star_schema(&conn).unwrap();
        conn
    }

    fn fact(key: &str, date_key: i64, category_id: i64, trend_id: i64) -> FactRow {
        FactRow {
            transaction_key: key.to_string(),
            date_key,
            category_id,
            trend_id,
            gross_revenue: 6.0,
            rev_per_unit: 3.0,
            trend_for_product: 50.0,
        }
    }

    #[test]
    fn test_schema_is_recreated_empty() {
        let conn = warehouse();
        insert_date_dim(&conn, &[DateDimRow::from_date_key(20230114)]).unwrap();

        create_star_schema(&conn).unwrap();

        let counts = table_counts(&conn).unwrap();
        assert_eq!(counts.len(), WAREHOUSE_TABLES.len());
        assert!(counts.values().all(|&n| n == 0));
        assert!(foreign_keys_enabled(&conn).unwrap());
    }

    #[test]
    fn test_surrogate_keys_restart_after_rebuild() {
        let conn = warehouse();
        let labels = vec![
            CategoryDimRow { label: "coffee".to_string() },
            CategoryDimRow { label: "tea".to_string() },
        ];
        insert_category_dim(&conn, &labels).unwrap();
        create_star_schema(&conn).unwrap();
        insert_category_dim(&conn, &labels).unwrap();

        let ids: Vec<i64> = read_categories(&conn).unwrap().iter().map(|c| c.category_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_duplicate_category_rejected() {
        let conn = warehouse();
        let dup = vec![
            CategoryDimRow { label: "tea".to_string() },
            CategoryDimRow { label: "tea".to_string() },
        ];

        let err = insert_category_dim(&conn, &dup).unwrap_err();

        assert!(matches!(
            err,
            rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
        ));
    }

    #[test]
    fn test_trend_round_trip_keeps_nulls() {
        let conn = warehouse();
        let signals = TrendSignals([Some(10.0), None, Some(2.5), None, Some(6.25), Some(10.0)]);
        insert_trend_dim(&conn, &[TrendDimRow { signals }]).unwrap();

        let trends = read_trends(&conn).unwrap();

        assert_eq!(trends.len(), 1);
        assert_eq!(trends[0].trend_id, 1);
        assert_eq!(trends[0].signals, signals);
    }

    #[test]
    fn test_orphan_fact_rejected_by_foreign_key() {
        let conn = warehouse();
        insert_date_dim(&conn, &[DateDimRow::from_date_key(20230114)]).unwrap();
        insert_category_dim(&conn, &[CategoryDimRow { label: "tea".to_string() }]).unwrap();

        // no trend row 1 exists
        let err = insert_facts(&conn, &[fact("T1", 20230114, 1, 1)]).unwrap_err();

        assert!(matches!(
            err,
            rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
        ));
    }

    #[test]
    fn test_missing_tables_on_foreign_database() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE dim_date (date_key INTEGER PRIMARY KEY);").unwrap();

        let missing = missing_tables(&conn).unwrap();

        assert_eq!(missing, vec![DIM_CATEGORY, DIM_TREND, FACT_SALES, MART_DAILY_CATEGORY]);
        assert!(missing_tables(&warehouse()).unwrap().is_empty());
    }

    #[test]
    fn test_mart_rollup_and_integrity() {
        let conn = warehouse();
        insert_date_dim(&conn, &[DateDimRow::from_date_key(20230114)]).unwrap();
        insert_category_dim(&conn, &[CategoryDimRow { label: "tea".to_string() }]).unwrap();
        insert_trend_dim(
            &conn,
            &[TrendDimRow {
                signals: TrendSignals([Some(1.0), Some(2.0), Some(3.0), Some(4.0), Some(2.5), Some(4.0)]),
            }],
        )
        .unwrap();
        insert_facts(&conn, &[fact("T1", 20230114, 1, 1), fact("T2", 20230114, 1, 1)]).unwrap();

        let mart_rows = populate_mart(&conn).unwrap();

        assert_eq!(mart_rows, 1);
        let (n, qty, revenue): (i64, f64, f64) = conn
            .query_row(
                "SELECT n_transactions, total_qty, daily_revenue FROM mart_daily_category_sales",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(qty, 4.0);
        assert_eq!(revenue, 12.0);

        let integrity = integrity_check(&conn).unwrap();
        assert_eq!(integrity.fact_rows, 2);
        assert!(integrity.is_clean());
        assert!(storage_size_bytes(&conn).unwrap() > 0);
    }
}
