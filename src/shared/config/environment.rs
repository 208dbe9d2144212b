use chrono_tz::Tz;
use std::path::PathBuf;

/// 1ページあたりのデフォルト表示件数
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// デフォルトの表示タイムゾーン
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Asia::Tokyo;

/// アプリケーションの実行環境を表す列挙型
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Environment {
    /// 開発環境
    Development,
    /// プロダクション環境
    Production,
}

/// 環境設定を管理する構造体
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    /// 実行環境
    pub environment: String,
    /// デバッグモードの有効/無効
    pub debug_mode: bool,
    /// ログレベル
    pub log_level: String,
    /// 一覧の1ページあたりの件数
    pub page_size: usize,
    /// アラート表示に使うタイムゾーン
    pub display_timezone: Tz,
    /// SQLiteデータベースファイルのパス
    pub database_path: PathBuf,
}

impl EnvironmentConfig {
    /// 環境変数から設定を読み込む
    ///
    /// # 戻り値
    /// 環境設定
    pub fn from_env() -> Self {
        let environment = get_environment();
        let debug_mode = environment == Environment::Development;
        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| {
            if debug_mode {
                "debug".to_string()
            } else {
                "info".to_string()
            }
        });

        let page_size = parse_page_size(std::env::var("SUBSCRIPTIONS_PAGE_SIZE").ok().as_deref());
        let display_timezone = parse_timezone(std::env::var("APP_TIMEZONE").ok().as_deref());
        let database_path = std::env::var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_database_path(environment));

        Self {
            environment: format!("{environment:?}").to_lowercase(),
            debug_mode,
            log_level,
            page_size,
            display_timezone,
            database_path,
        }
    }

    /// プロダクション環境かどうかを判定
    ///
    /// # 戻り値
    /// プロダクション環境の場合はtrue
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// 開発環境かどうかを判定
    ///
    /// # 戻り値
    /// 開発環境の場合はtrue
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            debug_mode: true,
            log_level: "debug".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            display_timezone: DEFAULT_TIMEZONE,
            database_path: PathBuf::from(get_database_filename(Environment::Development)),
        }
    }
}

/// 現在の実行環境を判定する
///
/// # 戻り値
/// 現在の実行環境（Development または Production）
///
/// # 判定ロジック
/// 1. 実行時環境変数 ENVIRONMENT を確認
/// 2. デバッグビルドの場合は Development
/// 3. リリースビルドの場合は Production
pub fn get_environment() -> Environment {
    if let Ok(env_var) = std::env::var("ENVIRONMENT") {
        let env = match env_var.as_str() {
            "production" => Environment::Production,
            _ => Environment::Development,
        };
        log::debug!("環境判定: 実行時環境変数を使用 -> {env_var} -> {env:?}");
        return env;
    }

    // フォールバック: ビルド設定に基づく判定
    let env = if cfg!(debug_assertions) {
        Environment::Development
    } else {
        Environment::Production
    };
    log::debug!(
        "環境判定: ビルド設定を使用 -> debug_assertions={} -> {env:?}",
        cfg!(debug_assertions)
    );
    env
}

/// 環境に応じたデータベースファイル名を取得する
///
/// # ファイル名の規則
/// - 開発環境: "dev_subscriptions.db"
/// - プロダクション環境: "subscriptions.db"
pub fn get_database_filename(env: Environment) -> &'static str {
    match env {
        Environment::Development => "dev_subscriptions.db",
        Environment::Production => "subscriptions.db",
    }
}

/// データディレクトリ配下のデフォルトのデータベースパス
fn default_database_path(env: Environment) -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("school-subscriptions")
        .join(get_database_filename(env))
}

/// ページサイズの設定値を解釈する
///
/// 未設定・数値でない・0 の場合はデフォルト値を使う
pub fn parse_page_size(value: Option<&str>) -> usize {
    match value {
        None => DEFAULT_PAGE_SIZE,
        Some(raw) => match raw.trim().parse::<usize>() {
            Ok(size) if size > 0 => size,
            _ => {
                log::warn!(
                    "SUBSCRIPTIONS_PAGE_SIZE の値が不正です: {raw}。デフォルト値 {DEFAULT_PAGE_SIZE} を使用します"
                );
                DEFAULT_PAGE_SIZE
            }
        },
    }
}

/// タイムゾーンの設定値を解釈する
pub fn parse_timezone(value: Option<&str>) -> Tz {
    match value {
        None => DEFAULT_TIMEZONE,
        Some(raw) => raw.trim().parse::<Tz>().unwrap_or_else(|_| {
            log::warn!("APP_TIMEZONE の値が不正です: {raw}。{DEFAULT_TIMEZONE} を使用します");
            DEFAULT_TIMEZONE
        }),
    }
}

/// 環境に応じた.envファイルを読み込む
///
/// # 処理内容
/// 1. ENVIRONMENT に応じた.envファイルを読み込み
/// 2. 見つからない場合はデフォルトの.envを試行
pub fn load_environment_variables() {
    let environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

    let env_file = match environment.as_str() {
        "production" => ".env.production",
        _ => ".env",
    };

    log::info!("環境: {environment}, 読み込み対象: {env_file}");

    match dotenv::from_filename(env_file) {
        Ok(_) => {
            log::info!("{env_file}ファイルを読み込みました");
        }
        Err(_) => {
            if env_file != ".env" && dotenv::dotenv().is_ok() {
                log::warn!("{env_file}が見つからないため、デフォルトの.envファイルを読み込みました");
            } else {
                log::warn!(".envファイルが見つかりません。直接設定された環境変数を使用します。");
            }
        }
    }
}

/// ログシステムを初期化する
///
/// # 処理内容
/// 1. 環境設定を取得
/// 2. ログレベルを設定
/// 3. env_loggerを初期化（初期化済みの場合は何もしない）
pub fn initialize_logging_system(env_config: &EnvironmentConfig) {
    let log_level = match env_config.log_level.to_lowercase().as_str() {
        "error" => log::LevelFilter::Error,
        "warn" => log::LevelFilter::Warn,
        "info" => log::LevelFilter::Info,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    };

    let initialized = env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp_secs()
        .format_module_path(false)
        .format_target(false)
        .try_init();

    if initialized.is_err() {
        log::debug!("ログシステムは既に初期化されています");
        return;
    }

    log::info!(
        "ログシステムを初期化しました: level={}, environment={}",
        env_config.log_level,
        env_config.environment
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_page_size() {
        assert_eq!(parse_page_size(None), DEFAULT_PAGE_SIZE);
        assert_eq!(parse_page_size(Some("25")), 25);
        assert_eq!(parse_page_size(Some(" 5 ")), 5);
        // 0 や数値以外はデフォルトに戻す
        assert_eq!(parse_page_size(Some("0")), DEFAULT_PAGE_SIZE);
        assert_eq!(parse_page_size(Some("abc")), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_parse_timezone() {
        assert_eq!(parse_timezone(None), DEFAULT_TIMEZONE);
        assert_eq!(
            parse_timezone(Some("Africa/Brazzaville")),
            chrono_tz::Africa::Brazzaville
        );
        assert_eq!(parse_timezone(Some("Mars/Olympus")), DEFAULT_TIMEZONE);
    }

    #[test]
    fn test_database_filename() {
        assert_eq!(
            get_database_filename(Environment::Development),
            "dev_subscriptions.db"
        );
        assert_eq!(
            get_database_filename(Environment::Production),
            "subscriptions.db"
        );
    }

    #[test]
    fn test_default_config() {
        let config = EnvironmentConfig::default();
        assert!(config.is_development());
        assert!(!config.is_production());
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
    }
}
