/// 環境設定とログ初期化
pub mod environment;

pub use environment::{
    get_database_filename, get_environment, initialize_logging_system,
    load_environment_variables, parse_page_size, parse_timezone, Environment, EnvironmentConfig,
    DEFAULT_PAGE_SIZE, DEFAULT_TIMEZONE,
};
