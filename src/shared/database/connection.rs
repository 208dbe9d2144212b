use crate::shared::config::EnvironmentConfig;
use crate::shared::errors::{AppError, AppResult};
use rusqlite::Connection;
use std::path::Path;

/// エンリッチ済みスナップショットのテーブル名
pub const ENRICHED_SNAPSHOT_TABLE: &str = "subscriptions_enriched";

/// データベース接続を初期化し、テーブルを作成する
///
/// # 引数
/// * `config` - 環境設定
///
/// # 戻り値
/// データベース接続、または失敗時はエラー
///
/// # 処理内容
/// 1. データベースファイルの親ディレクトリを確保
/// 2. データベース接続の開設
/// 3. テーブル作成
pub fn initialize_database(config: &EnvironmentConfig) -> AppResult<Connection> {
    let database_path = config.database_path.as_path();
    ensure_parent_directory(database_path)?;

    let conn = Connection::open(database_path)?;
    create_tables(&conn)?;

    log::info!("データベースを初期化しました: {:?}", database_path);

    Ok(conn)
}

/// データベースファイルの親ディレクトリが無ければ作成する
fn ensure_parent_directory(path: &Path) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::configuration(format!("データディレクトリの作成に失敗: {e}"))
            })?;
            log::info!("データディレクトリを作成: {:?}", parent);
        }
    }
    Ok(())
}

/// 基本テーブルを作成する
///
/// スナップショットテーブルは [`create_enriched_snapshot_table`] で別途作成する。
/// 作成されていない環境ではフォールバック経路が使われる。
pub fn create_tables(conn: &Connection) -> AppResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS school_groups (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            logo TEXT,
            region TEXT
        );

        CREATE TABLE IF NOT EXISTS plans (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            price REAL NOT NULL CHECK (price >= 0),
            currency TEXT NOT NULL,
            billing_period TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS subscriptions (
            id TEXT PRIMARY KEY,
            school_group_id TEXT NOT NULL REFERENCES school_groups(id),
            plan_id TEXT NOT NULL REFERENCES plans(id),
            status TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT,
            auto_renew INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS schools (
            id TEXT PRIMARY KEY,
            school_group_id TEXT NOT NULL REFERENCES school_groups(id),
            name TEXT NOT NULL,
            students_count INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            school_group_id TEXT NOT NULL REFERENCES school_groups(id),
            email TEXT NOT NULL
        );",
    )?;

    create_indexes(conn)?;

    log::debug!("基本テーブルを確認しました");
    Ok(())
}

/// インデックスを作成する
fn create_indexes(conn: &Connection) -> AppResult<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_subscriptions_plan_id ON subscriptions(plan_id);
         CREATE INDEX IF NOT EXISTS idx_schools_group_id ON schools(school_group_id);
         CREATE INDEX IF NOT EXISTS idx_users_group_id ON users(school_group_id);",
    )?;
    Ok(())
}

/// エンリッチ済みスナップショットテーブルを作成する
pub fn create_enriched_snapshot_table(conn: &Connection) -> AppResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS subscriptions_enriched (
            id TEXT PRIMARY KEY,
            school_group_id TEXT,
            school_group_name TEXT,
            school_group_logo TEXT,
            school_group_region TEXT,
            plan_id TEXT,
            plan_name TEXT,
            plan_price REAL,
            plan_currency TEXT,
            plan_billing_period TEXT,
            status TEXT,
            start_date TEXT,
            end_date TEXT,
            auto_renew INTEGER,
            created_at TEXT,
            schools_count INTEGER,
            users_count INTEGER,
            students_count INTEGER,
            days_until_expiry INTEGER,
            expiry_status TEXT,
            mrr_contribution REAL
        );
        CREATE INDEX IF NOT EXISTS idx_subscriptions_enriched_plan_id
            ON subscriptions_enriched(plan_id);",
    )?;

    log::info!("スナップショットテーブルを作成しました: {ENRICHED_SNAPSHOT_TABLE}");
    Ok(())
}

/// 指定したテーブルが存在するかを確認する
pub fn table_exists(conn: &Connection, table: &str) -> AppResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_tables_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();

        assert!(table_exists(&conn, "subscriptions").unwrap());
        assert!(table_exists(&conn, "school_groups").unwrap());
        // スナップショットは明示的に作成するまで存在しない
        assert!(!table_exists(&conn, ENRICHED_SNAPSHOT_TABLE).unwrap());
    }

    #[test]
    fn test_create_enriched_snapshot_table() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_enriched_snapshot_table(&conn).unwrap();

        assert!(table_exists(&conn, ENRICHED_SNAPSHOT_TABLE).unwrap());
    }

    #[test]
    fn test_initialize_database_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let config = EnvironmentConfig {
            database_path: temp_dir.path().join("nested").join("test.db"),
            ..EnvironmentConfig::default()
        };

        let conn = initialize_database(&config).unwrap();

        assert!(config.database_path.exists());
        assert!(table_exists(&conn, "plans").unwrap());
    }
}
