//! テスト用のデータ生成ヘルパー

use super::billing::BillingPeriod;
use super::enrichment::enrich_subscription;
use super::memory::InMemorySubscriptionStore;
use super::models::{
    EnrichedRow, EnrichedSubscription, GroupCounts, PlanSummary, SchoolGroupSummary, StatsRow,
    Subscription, SubscriptionStatus,
};
use super::store::SubscriptionStore;
use crate::shared::errors::AppResult;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Notify;

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap()
}

pub fn subscription(
    id: &str,
    group_name: &str,
    status: SubscriptionStatus,
    price: f64,
    period: BillingPeriod,
    end_in_days: Option<i64>,
) -> Subscription {
    Subscription {
        id: id.to_string(),
        school_group: SchoolGroupSummary {
            id: format!("grp-{id}"),
            name: group_name.to_string(),
            logo: None,
            region: Some("Pointe-Noire".to_string()),
        },
        plan: PlanSummary {
            id: "plan-p".to_string(),
            name: "Premium".to_string(),
            price,
            currency: "XAF".to_string(),
            billing_period: period,
        },
        status,
        start_date: now() - Duration::days(60),
        end_date: end_in_days.map(|days| now() + Duration::days(days)),
        auto_renew: true,
        created_at: now() - Duration::days(60),
    }
}

pub fn enriched(
    id: &str,
    group_name: &str,
    status: SubscriptionStatus,
    end_in_days: Option<i64>,
) -> EnrichedSubscription {
    enrich_subscription(
        subscription(id, group_name, status, 30000.0, BillingPeriod::Monthly, end_in_days),
        GroupCounts {
            schools: 2,
            users: 40,
            students: 800,
        },
        now(),
    )
}

/// 指定した操作を外部から解放するまで止めておくストア
#[derive(Clone)]
pub struct GatedStore {
    pub inner: InMemorySubscriptionStore,
    /// 止めた操作に入ったときに通知される
    pub entered: Arc<Notify>,
    /// 通知すると止めた操作が再開する
    pub gate: Arc<Notify>,
    gate_reads: bool,
    gate_toggles: bool,
    /// サブスクリプションIDごとの (entered, gate)
    per_id: Arc<HashMap<String, (Arc<Notify>, Arc<Notify>)>>,
}

impl GatedStore {
    /// 事前計算ソースの読み取りを止める
    pub fn reads(inner: InMemorySubscriptionStore) -> Self {
        Self::build(inner, true, false)
    }

    /// 自動更新の切り替えを止める
    pub fn toggles(inner: InMemorySubscriptionStore) -> Self {
        Self::build(inner, false, true)
    }

    /// 指定したIDの切り替えだけを、IDごとに別々に止める
    pub fn toggles_by_id(inner: InMemorySubscriptionStore, ids: &[&str]) -> Self {
        let per_id = ids
            .iter()
            .map(|id| {
                (
                    id.to_string(),
                    (Arc::new(Notify::new()), Arc::new(Notify::new())),
                )
            })
            .collect();
        Self {
            per_id: Arc::new(per_id),
            ..Self::build(inner, false, false)
        }
    }

    fn build(inner: InMemorySubscriptionStore, gate_reads: bool, gate_toggles: bool) -> Self {
        Self {
            inner,
            entered: Arc::new(Notify::new()),
            gate: Arc::new(Notify::new()),
            gate_reads,
            gate_toggles,
            per_id: Arc::new(HashMap::new()),
        }
    }

    /// 指定IDの切り替えに入るまで待つ
    pub async fn entered_for(&self, id: &str) {
        self.per_id[id].0.notified().await;
    }

    /// 指定IDの切り替えを再開させる
    pub fn release(&self, id: &str) {
        self.per_id[id].1.notify_one();
    }

    async fn pass(&self, gated: bool) {
        if gated {
            self.entered.notify_one();
            self.gate.notified().await;
        }
    }
}

#[async_trait]
impl SubscriptionStore for GatedStore {
    async fn read_enriched_subscriptions(&self, plan_id: &str) -> AppResult<Vec<EnrichedRow>> {
        self.pass(self.gate_reads).await;
        self.inner.read_enriched_subscriptions(plan_id).await
    }

    async fn read_enriched_stats(&self, plan_id: &str) -> AppResult<Vec<StatsRow>> {
        self.inner.read_enriched_stats(plan_id).await
    }

    async fn read_raw_subscriptions(&self, plan_id: &str) -> AppResult<Vec<Subscription>> {
        self.inner.read_raw_subscriptions(plan_id).await
    }

    async fn count_schools(&self, group_id: &str) -> AppResult<u32> {
        self.inner.count_schools(group_id).await
    }

    async fn count_users(&self, group_id: &str) -> AppResult<u32> {
        self.inner.count_users(group_id).await
    }

    async fn count_students(&self, group_id: &str) -> AppResult<u32> {
        self.inner.count_students(group_id).await
    }

    async fn toggle_auto_renew(&self, subscription_id: &str, enabled: bool) -> AppResult<()> {
        if let Some((entered, gate)) = self.per_id.get(subscription_id) {
            entered.notify_one();
            gate.notified().await;
        }
        self.pass(self.gate_toggles).await;
        self.inner.toggle_auto_renew(subscription_id, enabled).await
    }
}
