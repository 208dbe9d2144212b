//! エンリッチメント解決
//!
//! 事前計算ソースを優先し、ソースが存在しない場合にのみ
//! 生データと行単位の件数クエリから組み立てるフォールバックへ切り替える。

use super::billing::monthly_amount;
use super::clock::Clock;
use super::expiry::{classify_expiry, days_until_expiry};
use super::models::{
    EnrichedSubscription, GroupCounts, Subscription, SubscriptionStatus,
};
use super::store::SubscriptionStore;
use crate::shared::errors::{AppError, AppResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// エンリッチ済みデータの取得元
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentSource {
    Precomputed,
    Fallback,
}

/// エンリッチメント戦略
#[async_trait]
pub trait EnrichmentStrategy: Send + Sync {
    fn source(&self) -> EnrichmentSource;

    async fn enrich(&self, plan_id: &str) -> AppResult<Vec<EnrichedSubscription>>;
}

/// 事前計算ソースの行をそのまま検証して使う戦略
pub struct PrecomputedStrategy {
    store: Arc<dyn SubscriptionStore>,
}

impl PrecomputedStrategy {
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EnrichmentStrategy for PrecomputedStrategy {
    fn source(&self) -> EnrichmentSource {
        EnrichmentSource::Precomputed
    }

    async fn enrich(&self, plan_id: &str) -> AppResult<Vec<EnrichedSubscription>> {
        self.store
            .read_enriched_subscriptions(plan_id)
            .await?
            .into_iter()
            .map(EnrichedSubscription::try_from)
            .collect()
    }
}

/// 生データと行単位の件数クエリから組み立てる戦略
///
/// 1行ごとに件数クエリを発行するため、縮退運転としてのみ使う。
pub struct FallbackStrategy {
    store: Arc<dyn SubscriptionStore>,
    clock: Arc<dyn Clock>,
}

impl FallbackStrategy {
    pub fn new(store: Arc<dyn SubscriptionStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// 学校グループの件数を取得する
    ///
    /// 個々のクエリが失敗した場合はその件数を 0 とし、一覧全体は失敗させない
    async fn group_counts(&self, subscription_id: &str, group_id: &str) -> GroupCounts {
        let (schools, users, students) = futures::join!(
            self.store.count_schools(group_id),
            self.store.count_users(group_id),
            self.store.count_students(group_id),
        );

        GroupCounts {
            schools: count_or_zero(schools, subscription_id, "schools_count"),
            users: count_or_zero(users, subscription_id, "users_count"),
            students: count_or_zero(students, subscription_id, "students_count"),
        }
    }
}

fn count_or_zero(result: AppResult<u32>, subscription_id: &str, field: &str) -> u32 {
    result.unwrap_or_else(|e| {
        let partial = AppError::PartialEnrichment(format!("{subscription_id}.{field}: {e}"));
        log::warn!("{}", partial.details());
        0
    })
}

#[async_trait]
impl EnrichmentStrategy for FallbackStrategy {
    fn source(&self) -> EnrichmentSource {
        EnrichmentSource::Fallback
    }

    async fn enrich(&self, plan_id: &str) -> AppResult<Vec<EnrichedSubscription>> {
        let subscriptions = self.store.read_raw_subscriptions(plan_id).await?;
        let now = self.clock.now();

        let counts = join_all(
            subscriptions
                .iter()
                .map(|sub| self.group_counts(&sub.id, &sub.school_group.id)),
        )
        .await;

        Ok(subscriptions
            .into_iter()
            .zip(counts)
            .map(|(sub, counts)| enrich_subscription(sub, counts, now))
            .collect())
    }
}

/// 生のサブスクリプションに派生フィールドを付与する
pub fn enrich_subscription(
    subscription: Subscription,
    counts: GroupCounts,
    now: DateTime<Utc>,
) -> EnrichedSubscription {
    let days = days_until_expiry(subscription.end_date, now);
    let expiry_status = classify_expiry(subscription.status, days);
    let mrr_contribution = if subscription.status == SubscriptionStatus::Active {
        monthly_amount(subscription.plan.price, subscription.plan.billing_period)
    } else {
        0.0
    };

    EnrichedSubscription {
        subscription,
        schools_count: counts.schools,
        users_count: counts.users,
        students_count: counts.students,
        days_until_expiry: days,
        expiry_status,
        mrr_contribution,
    }
}

/// 解決結果
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSubscriptions {
    pub items: Vec<EnrichedSubscription>,
    pub source: EnrichmentSource,
}

/// 2つの戦略を順に試すリゾルバー
pub struct EnrichmentResolver {
    primary: Box<dyn EnrichmentStrategy>,
    fallback: Box<dyn EnrichmentStrategy>,
}

impl EnrichmentResolver {
    pub fn new(primary: Box<dyn EnrichmentStrategy>, fallback: Box<dyn EnrichmentStrategy>) -> Self {
        Self { primary, fallback }
    }

    /// ストアに対する標準構成（事前計算 → フォールバック）
    pub fn for_store(store: Arc<dyn SubscriptionStore>, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            Box::new(PrecomputedStrategy::new(store.clone())),
            Box::new(FallbackStrategy::new(store, clock)),
        )
    }

    /// プランのエンリッチ済みサブスクリプションを作成日時の新しい順で返す
    ///
    /// フォールバックに切り替えるのは `SourceUnavailable` の場合のみ。
    /// それ以外のエラーはそのまま返す。
    pub async fn resolve(&self, plan_id: &str) -> AppResult<ResolvedSubscriptions> {
        let (mut items, source) = match self.primary.enrich(plan_id).await {
            Ok(items) => (items, self.primary.source()),
            Err(AppError::SourceUnavailable(source)) => {
                log::warn!(
                    "事前計算ソース {source} が利用できないため、フォールバックでエンリッチします: plan_id={plan_id}"
                );
                let items = self.fallback.enrich(plan_id).await?;
                (items, self.fallback.source())
            }
            Err(e) => {
                log::error!("エンリッチ済みサブスクリプションの取得に失敗しました: plan_id={plan_id}, {e}");
                return Err(e);
            }
        };

        items.sort_by(|a, b| b.subscription.created_at.cmp(&a.subscription.created_at));
        log::debug!(
            "エンリッチ済みサブスクリプションを取得しました: plan_id={plan_id}, 件数={}, source={source:?}",
            items.len()
        );

        Ok(ResolvedSubscriptions { items, source })
    }
}
