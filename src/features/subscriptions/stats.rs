//! 統計サマリーの集計
//!
//! 事前計算ソースを使う経路と、生データから計算し直すフォールバック経路がある。
//! 両経路とも期限のしきい値と月額換算は `expiry` / `billing` を共有する。

use super::billing::monthly_amount;
use super::clock::Clock;
use super::expiry::{classify_expiry, days_until_expiry};
use super::models::{
    EnrichedSubscription, ExpiryStatus, StatsRow, StatsSummary, Subscription, SubscriptionStatus,
};
use super::store::SubscriptionStore;
use crate::shared::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// 集計中のカウンタ
#[derive(Default)]
struct Tally {
    summary: StatsSummary,
}

impl Tally {
    fn add(&mut self, status: SubscriptionStatus, expiry: ExpiryStatus, mrr: f64) {
        let summary = &mut self.summary;
        summary.total += 1;
        match status {
            SubscriptionStatus::Active => {
                summary.active += 1;
                summary.mrr += mrr;
            }
            SubscriptionStatus::Trial => summary.trial += 1,
            SubscriptionStatus::Cancelled => summary.cancelled += 1,
            SubscriptionStatus::Expired => summary.expired += 1,
        }
        match expiry {
            ExpiryStatus::ExpiringSoon => summary.expiring_soon += 1,
            ExpiryStatus::ExpiringThisMonth => summary.expiring_this_month += 1,
            ExpiryStatus::Normal | ExpiryStatus::None => {}
        }
    }

    fn finish(mut self) -> StatsSummary {
        self.summary.arr = annual_from_monthly(self.summary.mrr);
        self.summary
    }
}

/// 月間売上から年間売上を求める
pub fn annual_from_monthly(mrr: f64) -> f64 {
    (mrr * 12.0).round()
}

/// 事前計算ソースの最小列から集計する
///
/// ステータス・期限ステータスは値の一致で数える。ステータスが無い行や
/// 未知のステータスの行は、一覧の読み取りと同じく `InvalidRecord` になる。
pub fn summarize_precomputed(rows: &[StatsRow]) -> AppResult<StatsSummary> {
    let mut tally = Tally::default();
    for row in rows {
        let status: SubscriptionStatus = row
            .status
            .as_deref()
            .ok_or_else(|| AppError::invalid_record("status がありません"))?
            .parse()?;
        let expiry = ExpiryStatus::parse(row.expiry_status.as_deref())?;
        let mrr = row.mrr_contribution.unwrap_or(0.0);
        if mrr < 0.0 {
            return Err(AppError::invalid_record("mrr_contribution が負の値です"));
        }
        tally.add(status, expiry, mrr);
    }
    Ok(tally.finish())
}

/// 生データから集計する（フォールバック）
pub fn summarize_raw(subscriptions: &[Subscription], now: DateTime<Utc>) -> StatsSummary {
    let mut tally = Tally::default();
    for sub in subscriptions {
        let days = days_until_expiry(sub.end_date, now);
        let expiry = classify_expiry(sub.status, days);
        let mrr = if sub.status == SubscriptionStatus::Active {
            monthly_amount(sub.plan.price, sub.plan.billing_period)
        } else {
            0.0
        };
        tally.add(sub.status, expiry, mrr);
    }
    tally.finish()
}

/// 解決済みのエンリッチ済み一覧から集計する
pub fn summarize_enriched(items: &[EnrichedSubscription]) -> StatsSummary {
    let mut tally = Tally::default();
    for item in items {
        tally.add(item.status(), item.expiry_status, item.mrr_contribution);
    }
    tally.finish()
}

/// 統計集計器
pub struct StatsAggregator {
    store: Arc<dyn SubscriptionStore>,
    clock: Arc<dyn Clock>,
}

impl StatsAggregator {
    pub fn new(store: Arc<dyn SubscriptionStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// プランの統計サマリーを計算する
    ///
    /// 事前計算ソースが存在しない場合のみフォールバックする
    pub async fn compute(&self, plan_id: &str) -> AppResult<StatsSummary> {
        match self.store.read_enriched_stats(plan_id).await {
            Ok(rows) => summarize_precomputed(&rows),
            Err(AppError::SourceUnavailable(source)) => {
                log::warn!(
                    "事前計算ソース {source} が利用できないため、生データから統計を計算します: plan_id={plan_id}"
                );
                let subscriptions = self.store.read_raw_subscriptions(plan_id).await?;
                Ok(summarize_raw(&subscriptions, self.clock.now()))
            }
            Err(e) => {
                log::error!("統計の取得に失敗しました: plan_id={plan_id}, {e}");
                Err(e)
            }
        }
    }
}
