pub mod features;
pub mod shared;

use features::subscriptions::{PlanSubscriptionsService, SqliteSubscriptionStore};
use log::{error, info};
use rusqlite::Connection;
use shared::config::{initialize_logging_system, load_environment_variables, EnvironmentConfig};
use shared::database::initialize_database;
use std::sync::{Arc, Mutex};

pub use shared::errors::{AppError, AppResult};

/// アプリケーション状態（データベース接続とサービスを保持）
pub struct AppState {
    pub config: EnvironmentConfig,
    pub db: Arc<Mutex<Connection>>,
    pub subscriptions: PlanSubscriptionsService,
}

/// 環境変数から設定を読み込んでアプリケーションを初期化する
///
/// # 処理内容
/// 1. .envファイルを読み込み
/// 2. ログシステムを初期化
/// 3. データベースとスナップショットを初期化
pub fn bootstrap() -> AppResult<AppState> {
    load_environment_variables();
    let config = EnvironmentConfig::from_env();
    initialize_logging_system(&config);
    bootstrap_with(config)
}

/// 指定した設定でアプリケーションを初期化する
///
/// # 引数
/// * `config` - 環境設定
///
/// # 戻り値
/// 初期化済みのアプリケーション状態
pub fn bootstrap_with(config: EnvironmentConfig) -> AppResult<AppState> {
    info!("アプリケーション初期化を開始します...");

    let conn = initialize_database(&config).map_err(|e| {
        error!("データベースの初期化に失敗しました: {e}");
        e
    })?;
    let store = SqliteSubscriptionStore::new(Arc::new(Mutex::new(conn)));

    // 事前計算ソースが作れなくてもフォールバックで動作する
    match store.refresh_enriched_snapshot(chrono::Utc::now()) {
        Ok(written) => info!("スナップショットを初期化しました: {written} 件"),
        Err(e) => error!("スナップショットの初期化に失敗しました: {e}"),
    }

    let db = store.connection();
    let subscriptions = PlanSubscriptionsService::from_config(Arc::new(store), &config);

    info!("アプリケーション初期化が完了しました");
    Ok(AppState {
        config,
        db,
        subscriptions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::subscriptions::FetchStatus;
    use crate::shared::database::{table_exists, ENRICHED_SNAPSHOT_TABLE};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_bootstrap_with_empty_database() {
        let dir = TempDir::new().unwrap();
        let config = EnvironmentConfig {
            database_path: dir.path().join("subscriptions.db"),
            ..EnvironmentConfig::default()
        };

        let state = bootstrap_with(config).unwrap();

        assert!(table_exists(&state.db.lock().unwrap(), ENRICHED_SNAPSHOT_TABLE).unwrap());
        state.subscriptions.ensure_fresh("plan-1").await.unwrap();
        assert_eq!(
            state.subscriptions.subscriptions_status("plan-1").unwrap(),
            FetchStatus::Success
        );
        assert_eq!(state.subscriptions.stats("plan-1").unwrap().unwrap().total, 0);
    }
}
