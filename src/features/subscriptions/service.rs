//! プラン単位のサブスクリプションサービス
//!
//! 画面側から使う入口。ストア・キャッシュ・リゾルバー・集計器・
//! ミューテーション調停・アラート配信をまとめて扱う。

use super::alerts::{compute_alerts, AlertDispatcher, AlertSink};
use super::cache::{CachedData, FetchStatus, FetchTicket, QueryCache, QueryKey};
use super::clock::{Clock, SystemClock};
use super::enrichment::EnrichmentResolver;
use super::models::{EnrichedSubscription, StatsSummary};
use super::mutation::{MutationCoordinator, MutationState};
use super::stats::StatsAggregator;
use super::store::SubscriptionStore;
use crate::shared::config::EnvironmentConfig;
use crate::shared::errors::AppResult;
use chrono_tz::Tz;
use log::info;
use std::sync::Arc;

/// 取得結果の扱い
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// キャッシュに反映した
    Applied,
    /// キャンセル済み、または新しい取得に追い越されたため破棄した
    Discarded,
}

pub struct PlanSubscriptionsService {
    cache: QueryCache,
    resolver: EnrichmentResolver,
    aggregator: StatsAggregator,
    coordinator: MutationCoordinator,
    dispatcher: AlertDispatcher,
    timezone: Tz,
}

impl PlanSubscriptionsService {
    /// # 引数
    /// * `store` - 永続ストア
    /// * `cache` - 共有するクエリキャッシュ
    /// * `clock` - 現在時刻の取得元
    /// * `timezone` - アラートの日付表示に使うタイムゾーン
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        cache: QueryCache,
        clock: Arc<dyn Clock>,
        timezone: Tz,
    ) -> Self {
        Self {
            resolver: EnrichmentResolver::for_store(store.clone(), clock.clone()),
            aggregator: StatsAggregator::new(store.clone(), clock),
            coordinator: MutationCoordinator::new(store, cache.clone()),
            dispatcher: AlertDispatcher::new(),
            cache,
            timezone,
        }
    }

    /// 環境設定からサービスを作成する（システム時計を使用）
    pub fn from_config(store: Arc<dyn SubscriptionStore>, config: &EnvironmentConfig) -> Self {
        Self::new(
            store,
            QueryCache::new(),
            Arc::new(SystemClock),
            config.display_timezone,
        )
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// エンリッチ済みサブスクリプションを取得してキャッシュに反映する
    pub async fn load_subscriptions(&self, plan_id: &str) -> AppResult<FetchOutcome> {
        let ticket = self.cache.begin_fetch(QueryKey::subscriptions(plan_id))?;
        let result = self
            .resolver
            .resolve(plan_id)
            .await
            .map(|resolved| CachedData::Subscriptions(Arc::new(resolved.items)));
        self.settle(&ticket, result)
    }

    /// 統計サマリーを取得してキャッシュに反映する
    pub async fn load_stats(&self, plan_id: &str) -> AppResult<FetchOutcome> {
        let ticket = self.cache.begin_fetch(QueryKey::stats(plan_id))?;
        let result = self.aggregator.compute(plan_id).await.map(CachedData::Stats);
        self.settle(&ticket, result)
    }

    fn settle(
        &self,
        ticket: &FetchTicket,
        result: AppResult<CachedData>,
    ) -> AppResult<FetchOutcome> {
        if !self.cache.complete_fetch(ticket, &result)? {
            return Ok(FetchOutcome::Discarded);
        }
        result.map(|_| FetchOutcome::Applied)
    }

    /// データが無い、または古いクエリだけを並行して再取得する
    pub async fn ensure_fresh(&self, plan_id: &str) -> AppResult<()> {
        let subscriptions_needed = self.cache.needs_fetch(&QueryKey::subscriptions(plan_id))?;
        let stats_needed = self.cache.needs_fetch(&QueryKey::stats(plan_id))?;

        let (subscriptions, stats) = futures::join!(
            async {
                if subscriptions_needed {
                    self.load_subscriptions(plan_id).await.map(Some)
                } else {
                    Ok(None)
                }
            },
            async {
                if stats_needed {
                    self.load_stats(plan_id).await.map(Some)
                } else {
                    Ok(None)
                }
            }
        );
        subscriptions?;
        stats?;
        Ok(())
    }

    pub fn subscriptions(&self, plan_id: &str) -> AppResult<Option<Arc<Vec<EnrichedSubscription>>>> {
        self.cache.subscriptions(plan_id)
    }

    pub fn stats(&self, plan_id: &str) -> AppResult<Option<StatsSummary>> {
        self.cache.stats(plan_id)
    }

    pub fn subscriptions_status(&self, plan_id: &str) -> AppResult<FetchStatus> {
        self.cache.status(&QueryKey::subscriptions(plan_id))
    }

    pub fn stats_status(&self, plan_id: &str) -> AppResult<FetchStatus> {
        self.cache.status(&QueryKey::stats(plan_id))
    }

    /// 自動更新フラグを楽観的に切り替える
    pub async fn set_auto_renew(&self, subscription_id: &str, enabled: bool) -> AppResult<()> {
        self.coordinator.set_auto_renew(subscription_id, enabled).await
    }

    pub fn mutation_state(&self) -> MutationState {
        self.coordinator.state()
    }

    /// キャッシュ中の一覧からアラートを求め、未通知のものだけを通知する
    ///
    /// # 戻り値
    /// 通知した件数
    pub fn emit_alerts(&self, plan_id: &str, sink: &dyn AlertSink) -> AppResult<usize> {
        let Some(items) = self.cache.subscriptions(plan_id)? else {
            return Ok(0);
        };
        let revision = self.cache.revision(&QueryKey::subscriptions(plan_id))?;
        let events = compute_alerts(&items, self.timezone);
        self.dispatcher.dispatch(plan_id, revision, &events, sink)
    }

    /// プランの表示を終了する
    ///
    /// 進行中の取得結果は以後反映されない
    pub fn release(&self, plan_id: &str) -> AppResult<()> {
        self.cache.cancel(&QueryKey::subscriptions(plan_id))?;
        self.cache.cancel(&QueryKey::stats(plan_id))?;
        self.cache.remove_plan(plan_id)?;
        self.dispatcher.forget_plan(plan_id)?;
        info!("プランのキャッシュを解放しました: plan_id={plan_id}");
        Ok(())
    }
}
