use thiserror::Error;

/// アプリケーション全体で使用される統一エラー型
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AppError {
    /// 事前計算済みソース（エンリッチ済みスナップショット）が存在しない
    ///
    /// フォールバック経路への切り替えにのみ使用し、ユーザーには表示しない。
    #[error("事前計算ソースが利用できません: {0}")]
    SourceUnavailable(String),

    /// ストアへの読み取りが一時的に失敗した場合のエラー
    #[error("読み取りエラー: {0}")]
    TransientRead(String),

    /// リモートでの更新（自動更新の切り替えなど）が拒否された場合のエラー
    #[error("更新エラー: {0}")]
    MutationFailed(String),

    /// フォールバック経路で行単位の件数取得に失敗した場合のエラー
    #[error("部分的なエンリッチメント失敗: {0}")]
    PartialEnrichment(String),

    /// データベース関連のエラー
    #[error("データベースエラー: {0}")]
    Database(String),

    /// ストアから受け取ったレコードの形式が不正
    #[error("不正なレコード: {0}")]
    InvalidRecord(String),

    /// バリデーション関連のエラー
    #[error("バリデーションエラー: {0}")]
    Validation(String),

    /// リソースが見つからない場合のエラー
    #[error("リソースが見つかりません: {0}")]
    NotFound(String),

    /// 設定関連のエラー
    #[error("設定エラー: {0}")]
    Configuration(String),

    /// 並行処理関連のエラー
    #[error("並行処理エラー: {0}")]
    Concurrency(String),
}

/// エラーの重要度を表す列挙型
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorSeverity {
    /// 低重要度（ユーザー入力エラーなど）
    Low,
    /// 中重要度（一時的な通信エラーなど）
    Medium,
    /// 高重要度（データベースエラーなど）
    High,
    /// 最重要
    Critical,
}

impl AppError {
    /// ユーザーに表示するためのフレンドリーなメッセージを取得
    ///
    /// # 戻り値
    /// ユーザーに表示可能なエラーメッセージ
    pub fn user_message(&self) -> &str {
        match self {
            AppError::SourceUnavailable(_) => "集計データを準備しています",
            AppError::TransientRead(_) => {
                "データの取得に失敗しました。再読み込みしてください"
            }
            AppError::MutationFailed(_) => "変更を保存できませんでした。元の状態に戻しました",
            AppError::PartialEnrichment(_) => "一部の件数を取得できませんでした",
            AppError::Database(_) => "データベース操作でエラーが発生しました",
            AppError::InvalidRecord(_) => "データ形式の解析でエラーが発生しました",
            AppError::Validation(msg) => msg,
            AppError::NotFound(msg) => msg,
            AppError::Configuration(_) => "設定エラーが発生しました",
            AppError::Concurrency(_) => "並行処理でエラーが発生しました",
        }
    }

    /// エラーの詳細情報を取得
    ///
    /// # 戻り値
    /// エラーの詳細情報（ログ出力用）
    pub fn details(&self) -> String {
        format!("{self}")
    }

    /// エラーの重要度を取得
    ///
    /// # 戻り値
    /// エラーの重要度レベル
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            AppError::SourceUnavailable(_) => ErrorSeverity::Low,
            AppError::TransientRead(_) => ErrorSeverity::Medium,
            AppError::MutationFailed(_) => ErrorSeverity::Medium,
            AppError::PartialEnrichment(_) => ErrorSeverity::Low,
            AppError::Database(_) => ErrorSeverity::High,
            AppError::InvalidRecord(_) => ErrorSeverity::High,
            AppError::Validation(_) => ErrorSeverity::Low,
            AppError::NotFound(_) => ErrorSeverity::Low,
            AppError::Configuration(_) => ErrorSeverity::High,
            AppError::Concurrency(_) => ErrorSeverity::Critical,
        }
    }

    /// フォールバックを引き起こすエラーかどうか
    pub fn is_source_unavailable(&self) -> bool {
        matches!(self, AppError::SourceUnavailable(_))
    }

    /// 事前計算ソース未提供エラーを作成するヘルパー関数
    pub fn source_unavailable<S: Into<String>>(source: S) -> Self {
        AppError::SourceUnavailable(source.into())
    }

    /// 読み取りエラーを作成するヘルパー関数
    pub fn transient_read<S: Into<String>>(message: S) -> Self {
        AppError::TransientRead(message.into())
    }

    /// 更新失敗エラーを作成するヘルパー関数
    pub fn mutation_failed<S: Into<String>>(message: S) -> Self {
        AppError::MutationFailed(message.into())
    }

    /// 不正レコードエラーを作成するヘルパー関数
    pub fn invalid_record<S: Into<String>>(message: S) -> Self {
        AppError::InvalidRecord(message.into())
    }

    /// バリデーションエラーを作成するヘルパー関数
    ///
    /// # 引数
    /// * `message` - バリデーションエラーメッセージ
    ///
    /// # 戻り値
    /// バリデーションエラー
    pub fn validation<S: Into<String>>(message: S) -> Self {
        AppError::Validation(message.into())
    }

    /// リソース未発見エラーを作成するヘルパー関数
    ///
    /// # 引数
    /// * `resource` - 見つからなかったリソース名
    ///
    /// # 戻り値
    /// リソース未発見エラー
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        AppError::NotFound(format!("{}が見つかりません", resource.into()))
    }

    /// 設定エラーを作成するヘルパー関数
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        AppError::Configuration(message.into())
    }

    /// 並行処理エラーを作成するヘルパー関数
    pub fn concurrency<S: Into<String>>(message: S) -> Self {
        AppError::Concurrency(message.into())
    }
}

/// AppErrorからStringへの変換（UI層への受け渡し用）
impl From<AppError> for String {
    fn from(error: AppError) -> Self {
        error.user_message().to_string()
    }
}

/// rusqlite::ErrorからAppErrorへの変換
impl From<rusqlite::Error> for AppError {
    fn from(error: rusqlite::Error) -> Self {
        AppError::Database(error.to_string())
    }
}

/// Result型のエイリアス（アプリケーション全体で使用）
pub type AppResult<T> = Result<T, AppError>;
