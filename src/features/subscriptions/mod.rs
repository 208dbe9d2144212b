/// サブスクリプション集計・エンリッチメント機能モジュール
///
/// このモジュールは、学校グループのサブスクリプションに関する次の機能を提供します：
/// - 料金の月額換算と期限ステータスの判定
/// - 事前計算ソースとフォールバックによるエンリッチメント
/// - 統計サマリー（件数・MRR・ARR）の集計
/// - 一覧の絞り込み・並び替え・ページングと選択状態の管理
/// - 自動更新フラグの楽観的更新
/// - 期限アラートの算出と重複のない通知
pub mod alerts;
pub mod billing;
pub mod cache;
pub mod clock;
pub mod enrichment;
pub mod expiry;
pub mod memory;
pub mod models;
pub mod mutation;
pub mod query;
pub mod repository;
pub mod selection;
pub mod service;
pub mod stats;
pub mod store;
pub mod view;

#[cfg(test)]
mod fixtures;

// 公開インターフェース
pub use alerts::{compute_alerts, AlertCategory, AlertDispatcher, AlertEvent, AlertSink, LogAlertSink};
pub use billing::{monthly_amount, monthly_amount_for, BillingPeriod};
pub use cache::{CachedData, FetchStatus, QueryCache, QueryKey, QueryNamespace};
pub use clock::{Clock, FixedClock, SystemClock};
pub use enrichment::{
    EnrichmentResolver, EnrichmentSource, EnrichmentStrategy, FallbackStrategy,
    PrecomputedStrategy, ResolvedSubscriptions,
};
pub use expiry::{classify_expiry, days_until_expiry, is_trial_ending};
pub use memory::InMemorySubscriptionStore;
pub use models::{
    EnrichedSubscription, ExpiryStatus, PlanSummary, SchoolGroupSummary, StatsSummary,
    Subscription, SubscriptionStatus,
};
pub use mutation::{MutationCoordinator, MutationState};
pub use query::{QueryState, SortField, SortOrder, StatusFilter};
pub use repository::SqliteSubscriptionStore;
pub use selection::SelectionSet;
pub use service::{FetchOutcome, PlanSubscriptionsService};
pub use stats::StatsAggregator;
pub use store::SubscriptionStore;
pub use view::SubscriptionListView;
