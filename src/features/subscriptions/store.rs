//! 永続ストアの抽象化
//!
//! リモートのデータベースクライアントが提供する読み取り・更新操作を
//! トレイトとして定義する。SQLite 実装は [`super::repository`]、
//! テスト用のインメモリ実装は [`super::memory`] にある。

use super::models::{EnrichedRow, StatsRow, Subscription};
use crate::shared::errors::AppResult;
use async_trait::async_trait;

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// 事前計算済みのエンリッチ済み行をプラン単位で読む
    ///
    /// ソースが存在しない場合は `AppError::SourceUnavailable` を返す。
    async fn read_enriched_subscriptions(&self, plan_id: &str) -> AppResult<Vec<EnrichedRow>>;

    /// 統計計算に必要な最小限の列だけを事前計算ソースから読む
    async fn read_enriched_stats(&self, plan_id: &str) -> AppResult<Vec<StatsRow>>;

    /// 学校グループ・プランの要約を結合した生のサブスクリプションを読む
    async fn read_raw_subscriptions(&self, plan_id: &str) -> AppResult<Vec<Subscription>>;

    /// 学校グループに属する学校数
    async fn count_schools(&self, group_id: &str) -> AppResult<u32>;

    /// 学校グループに属するユーザー数
    async fn count_users(&self, group_id: &str) -> AppResult<u32>;

    /// 学校グループに属する生徒数
    async fn count_students(&self, group_id: &str) -> AppResult<u32>;

    /// 自動更新フラグを切り替える（リモートプロシージャ）
    async fn toggle_auto_renew(&self, subscription_id: &str, enabled: bool) -> AppResult<()>;
}
