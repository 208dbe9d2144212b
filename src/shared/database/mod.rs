/// データベース接続とスキーマ管理
pub mod connection;

pub use connection::{
    create_enriched_snapshot_table, create_tables, initialize_database, table_exists,
    ENRICHED_SNAPSHOT_TABLE,
};
