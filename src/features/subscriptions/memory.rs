//! インメモリのサブスクリプションストア
//!
//! テストやデモで使う。事前計算ソースの有無や各操作の失敗を
//! 外から切り替えられる。

use super::billing::monthly_amount;
use super::expiry::{classify_expiry, days_until_expiry};
use super::models::{EnrichedRow, GroupCounts, StatsRow, Subscription, SubscriptionStatus};
use super::store::SubscriptionStore;
use crate::shared::errors::{AppError, AppResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Default)]
struct Inner {
    subscriptions: Vec<Subscription>,
    group_counts: HashMap<String, GroupCounts>,
    /// `None` の場合は事前計算ソースが存在しない
    snapshot: Option<Vec<EnrichedRow>>,
    primary_failure: Option<String>,
    raw_failure: Option<String>,
    failing_count_groups: HashSet<String>,
    toggle_failure: Option<String>,
}

/// 呼び出し回数の記録
#[derive(Debug, Default)]
pub struct StoreCallCounts {
    pub enriched_reads: AtomicUsize,
    pub stats_reads: AtomicUsize,
    pub raw_reads: AtomicUsize,
    pub count_queries: AtomicUsize,
    pub toggles: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct InMemorySubscriptionStore {
    inner: Arc<RwLock<Inner>>,
    calls: Arc<StoreCallCounts>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> AppResult<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|e| AppError::concurrency(format!("ストアのロックに失敗: {e}")))
    }

    fn read(&self) -> AppResult<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|e| AppError::concurrency(format!("ストアのロックに失敗: {e}")))
    }

    /// サブスクリプションを追加する
    pub fn insert_subscription(&self, subscription: Subscription) -> AppResult<()> {
        self.write()?.subscriptions.push(subscription);
        Ok(())
    }

    /// 学校グループの規模を設定する
    pub fn set_group_counts(&self, group_id: &str, counts: GroupCounts) -> AppResult<()> {
        self.write()?
            .group_counts
            .insert(group_id.to_string(), counts);
        Ok(())
    }

    /// 現在のデータから事前計算ソースを作り直す
    pub fn refresh_snapshot(&self, now: DateTime<Utc>) -> AppResult<()> {
        let mut inner = self.write()?;
        let rows = inner
            .subscriptions
            .iter()
            .map(|sub| {
                let counts = inner
                    .group_counts
                    .get(&sub.school_group.id)
                    .copied()
                    .unwrap_or_default();
                snapshot_row(sub, counts, now)
            })
            .collect();
        inner.snapshot = Some(rows);
        Ok(())
    }

    /// 事前計算ソースの行を直接設定する
    pub fn set_snapshot_rows(&self, rows: Vec<EnrichedRow>) -> AppResult<()> {
        self.write()?.snapshot = Some(rows);
        Ok(())
    }

    /// 事前計算ソースを削除する（未作成の状態にする）
    pub fn drop_snapshot(&self) -> AppResult<()> {
        self.write()?.snapshot = None;
        Ok(())
    }

    /// 事前計算ソースの読み取りを一時的に失敗させる
    pub fn fail_primary_reads(&self, message: Option<&str>) -> AppResult<()> {
        self.write()?.primary_failure = message.map(str::to_string);
        Ok(())
    }

    /// 生データの読み取りを一時的に失敗させる
    pub fn fail_raw_reads(&self, message: Option<&str>) -> AppResult<()> {
        self.write()?.raw_failure = message.map(str::to_string);
        Ok(())
    }

    /// 指定グループの件数取得を失敗させる
    pub fn fail_counts_for(&self, group_id: &str) -> AppResult<()> {
        self.write()?
            .failing_count_groups
            .insert(group_id.to_string());
        Ok(())
    }

    /// 自動更新の切り替えを失敗させる
    pub fn fail_toggles(&self, message: Option<&str>) -> AppResult<()> {
        self.write()?.toggle_failure = message.map(str::to_string);
        Ok(())
    }

    /// 保存されているサブスクリプションを取得する
    pub fn subscription(&self, id: &str) -> AppResult<Option<Subscription>> {
        Ok(self.read()?.subscriptions.iter().find(|s| s.id == id).cloned())
    }

    pub fn calls(&self) -> &StoreCallCounts {
        &self.calls
    }

    fn group_count(&self, group_id: &str, pick: fn(&GroupCounts) -> u32) -> AppResult<u32> {
        self.calls.count_queries.fetch_add(1, Ordering::SeqCst);
        let inner = self.read()?;
        if inner.failing_count_groups.contains(group_id) {
            return Err(AppError::transient_read(format!(
                "グループ {group_id} の件数取得に失敗しました"
            )));
        }
        Ok(inner.group_counts.get(group_id).map(pick).unwrap_or(0))
    }

    fn snapshot_for(&self, plan_id: &str) -> AppResult<Vec<EnrichedRow>> {
        let inner = self.read()?;
        if let Some(message) = &inner.primary_failure {
            return Err(AppError::transient_read(message.clone()));
        }
        let rows = inner
            .snapshot
            .as_ref()
            .ok_or_else(|| AppError::source_unavailable("subscriptions_enriched"))?;
        Ok(rows
            .iter()
            .filter(|row| row.plan_id.as_deref() == Some(plan_id))
            .cloned()
            .collect())
    }
}

/// 1件のサブスクリプションから事前計算行を作る
fn snapshot_row(sub: &Subscription, counts: GroupCounts, now: DateTime<Utc>) -> EnrichedRow {
    let days = days_until_expiry(sub.end_date, now);
    let mrr = if sub.status == SubscriptionStatus::Active {
        monthly_amount(sub.plan.price, sub.plan.billing_period)
    } else {
        0.0
    };

    EnrichedRow {
        id: Some(sub.id.clone()),
        school_group_id: Some(sub.school_group.id.clone()),
        school_group_name: Some(sub.school_group.name.clone()),
        school_group_logo: sub.school_group.logo.clone(),
        school_group_region: sub.school_group.region.clone(),
        plan_id: Some(sub.plan.id.clone()),
        plan_name: Some(sub.plan.name.clone()),
        plan_price: Some(sub.plan.price),
        plan_currency: Some(sub.plan.currency.clone()),
        plan_billing_period: Some(sub.plan.billing_period.as_str().to_string()),
        status: Some(sub.status.as_str().to_string()),
        start_date: Some(sub.start_date.to_rfc3339()),
        end_date: sub.end_date.map(|d| d.to_rfc3339()),
        auto_renew: Some(sub.auto_renew),
        created_at: Some(sub.created_at.to_rfc3339()),
        schools_count: Some(i64::from(counts.schools)),
        users_count: Some(i64::from(counts.users)),
        students_count: Some(i64::from(counts.students)),
        days_until_expiry: days,
        expiry_status: Some(classify_expiry(sub.status, days).as_str().to_string()),
        mrr_contribution: Some(mrr),
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn read_enriched_subscriptions(&self, plan_id: &str) -> AppResult<Vec<EnrichedRow>> {
        self.calls.enriched_reads.fetch_add(1, Ordering::SeqCst);
        self.snapshot_for(plan_id)
    }

    async fn read_enriched_stats(&self, plan_id: &str) -> AppResult<Vec<StatsRow>> {
        self.calls.stats_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .snapshot_for(plan_id)?
            .into_iter()
            .map(|row| StatsRow {
                status: row.status,
                expiry_status: row.expiry_status,
                mrr_contribution: row.mrr_contribution,
            })
            .collect())
    }

    async fn read_raw_subscriptions(&self, plan_id: &str) -> AppResult<Vec<Subscription>> {
        self.calls.raw_reads.fetch_add(1, Ordering::SeqCst);
        let inner = self.read()?;
        if let Some(message) = &inner.raw_failure {
            return Err(AppError::transient_read(message.clone()));
        }
        Ok(inner
            .subscriptions
            .iter()
            .filter(|sub| sub.plan.id == plan_id)
            .cloned()
            .collect())
    }

    async fn count_schools(&self, group_id: &str) -> AppResult<u32> {
        self.group_count(group_id, |c| c.schools)
    }

    async fn count_users(&self, group_id: &str) -> AppResult<u32> {
        self.group_count(group_id, |c| c.users)
    }

    async fn count_students(&self, group_id: &str) -> AppResult<u32> {
        self.group_count(group_id, |c| c.students)
    }

    async fn toggle_auto_renew(&self, subscription_id: &str, enabled: bool) -> AppResult<()> {
        self.calls.toggles.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.write()?;
        if let Some(message) = &inner.toggle_failure {
            return Err(AppError::mutation_failed(message.clone()));
        }

        let subscription = inner
            .subscriptions
            .iter_mut()
            .find(|sub| sub.id == subscription_id)
            .ok_or_else(|| AppError::not_found(format!("サブスクリプション {subscription_id}")))?;
        subscription.auto_renew = enabled;

        if let Some(rows) = inner.snapshot.as_mut() {
            for row in rows.iter_mut() {
                if row.id.as_deref() == Some(subscription_id) {
                    row.auto_renew = Some(enabled);
                }
            }
        }
        Ok(())
    }
}
