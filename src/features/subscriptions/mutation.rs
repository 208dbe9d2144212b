//! 楽観的更新によるミューテーション
//!
//! ローカルのキャッシュを先に書き換えてからリモートの更新を送る。
//! 失敗した場合は未確定の変更を含まない一覧を書き戻し、成功した場合は
//! 楽観的な値を確定とせず、名前空間を古い状態にして再取得させる。
//!
//! 複数の切り替えが同時に進行している間は、最初の変更の前に退避した一覧を
//! 確定済みの状態として保持する。成功した変更はその一覧に取り込み、失敗時は
//! 確定済みの一覧に進行中の変更を重ね直す。

use super::cache::{CacheSnapshot, QueryCache, QueryNamespace};
use super::store::SubscriptionStore;
use crate::shared::errors::{AppError, AppResult};
use log::{error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// ミューテーションの状態
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MutationState {
    #[default]
    Idle,
    /// ローカルは更新済みで、リモートへの要求が進行中
    Applying,
    Succeeded,
    Failed(String),
}

impl MutationState {
    pub fn is_pending(&self) -> bool {
        matches!(self, MutationState::Applying)
    }

    pub fn last_error(&self) -> Option<&str> {
        match self {
            MutationState::Failed(message) => Some(message),
            _ => None,
        }
    }
}

/// リモートの応答を待っている変更
#[derive(Debug, Clone)]
struct PendingPatch {
    mutation_id: Uuid,
    subscription_id: String,
    enabled: bool,
}

#[derive(Debug, Default)]
struct Tracker {
    /// 開始順
    pending: Vec<PendingPatch>,
    /// 未確定の変更を含まない一覧
    confirmed: Option<CacheSnapshot>,
    last: MutationState,
}

impl Tracker {
    fn settle(&mut self, state: MutationState) {
        if self.pending.is_empty() {
            self.confirmed = None;
        }
        self.last = state;
    }
}

/// 自動更新フラグの切り替えを調停する
#[derive(Clone)]
pub struct MutationCoordinator {
    store: Arc<dyn SubscriptionStore>,
    cache: QueryCache,
    tracker: Arc<Mutex<Tracker>>,
}

/// 自動更新の切り替えで影響を受ける名前空間
const AFFECTED: QueryNamespace = QueryNamespace::EnrichedSubscriptions;

impl MutationCoordinator {
    pub fn new(store: Arc<dyn SubscriptionStore>, cache: QueryCache) -> Self {
        Self {
            store,
            cache,
            tracker: Arc::new(Mutex::new(Tracker::default())),
        }
    }

    /// 現在の状態（進行中の要求があれば `Applying`）
    pub fn state(&self) -> MutationState {
        match self.tracker.lock() {
            Ok(tracker) if !tracker.pending.is_empty() => MutationState::Applying,
            Ok(tracker) => tracker.last.clone(),
            Err(_) => MutationState::Failed("状態を取得できません".to_string()),
        }
    }

    fn lock_tracker(&self) -> AppResult<MutexGuard<'_, Tracker>> {
        self.tracker
            .lock()
            .map_err(|e| AppError::concurrency(format!("状態のロックに失敗: {e}")))
    }

    /// 自動更新フラグを設定する
    ///
    /// # 引数
    /// * `subscription_id` - 対象のサブスクリプションID
    /// * `enabled` - 設定する値
    ///
    /// # 戻り値
    /// 成功時は `Ok(())`、リモートが拒否した場合は `AppError::MutationFailed`
    pub async fn set_auto_renew(&self, subscription_id: &str, enabled: bool) -> AppResult<()> {
        let patch = PendingPatch {
            mutation_id: Uuid::new_v4(),
            subscription_id: subscription_id.to_string(),
            enabled,
        };
        info!(
            "自動更新の切り替えを開始します: mutation_id={}, subscription_id={subscription_id}, enabled={enabled}",
            patch.mutation_id
        );

        self.begin(&patch)?;
        let result = self.store.toggle_auto_renew(subscription_id, enabled).await;
        self.finish(&patch, result)
    }

    /// 楽観的な値を反映し、進行中の変更として登録する
    fn begin(&self, patch: &PendingPatch) -> AppResult<()> {
        let mut tracker = self.lock_tracker()?;
        if let Err(e) = self.prepare(&mut tracker, patch) {
            tracker.settle(MutationState::Failed(e.user_message().to_string()));
            return Err(e);
        }
        tracker.pending.push(patch.clone());
        Ok(())
    }

    fn prepare(&self, tracker: &mut Tracker, patch: &PendingPatch) -> AppResult<()> {
        // 取得中の結果で楽観的な値が上書きされないよう、先に保留・キャンセルする
        self.cache.hold_namespace(AFFECTED)?;
        let applied = self.apply_optimistic(tracker, patch);
        if applied.is_err() {
            if let Err(e) = self.cache.release_namespace(AFFECTED) {
                error!("名前空間の保留を解除できません: {e}");
            }
        }
        applied
    }

    fn apply_optimistic(&self, tracker: &mut Tracker, patch: &PendingPatch) -> AppResult<()> {
        self.cache.cancel_namespace(AFFECTED)?;
        if tracker.confirmed.is_none() {
            tracker.confirmed = Some(self.cache.snapshot_namespace(AFFECTED)?);
        }
        self.cache
            .patch_subscriptions(&patch.subscription_id, |item| {
                item.subscription.auto_renew = patch.enabled;
            })?;
        Ok(())
    }

    /// リモートの応答を反映し、進行中の変更から外す
    fn finish(&self, patch: &PendingPatch, result: AppResult<()>) -> AppResult<()> {
        let mutation_id = patch.mutation_id;
        let mut tracker = self.lock_tracker()?;
        tracker.pending.retain(|other| other.mutation_id != mutation_id);

        let synced = match &result {
            Ok(()) => self.confirm(&mut tracker, patch),
            Err(_) => self.roll_back(&tracker),
        };
        let released = self.cache.release_namespace(AFFECTED);
        let synced = synced.and(released);

        match result {
            Ok(()) => match synced {
                Ok(()) => {
                    tracker.settle(MutationState::Succeeded);
                    info!("自動更新の切り替えが完了しました: mutation_id={mutation_id}");
                    Ok(())
                }
                Err(e) => {
                    tracker.settle(MutationState::Failed(e.user_message().to_string()));
                    Err(e)
                }
            },
            Err(e) => {
                error!(
                    "自動更新の切り替えに失敗したため元に戻します: mutation_id={mutation_id}, {e}"
                );
                if let Err(sync_error) = synced {
                    error!("キャッシュを元に戻せませんでした: mutation_id={mutation_id}, {sync_error}");
                }
                let failure = match e {
                    AppError::MutationFailed(_) => e,
                    other => AppError::mutation_failed(other.to_string()),
                };
                tracker.settle(MutationState::Failed(failure.user_message().to_string()));
                Err(failure)
            }
        }
    }

    fn confirm(&self, tracker: &mut Tracker, patch: &PendingPatch) -> AppResult<()> {
        if let Some(confirmed) = tracker.confirmed.as_mut() {
            confirmed.patch_subscriptions(&patch.subscription_id, |item| {
                item.subscription.auto_renew = patch.enabled;
            });
        }
        self.cache.invalidate_namespace(AFFECTED)
    }

    fn roll_back(&self, tracker: &Tracker) -> AppResult<()> {
        if let Some(confirmed) = &tracker.confirmed {
            self.cache.restore(confirmed.clone())?;
        }
        for other in &tracker.pending {
            self.cache.patch_subscriptions(&other.subscription_id, |item| {
                item.subscription.auto_renew = other.enabled;
            })?;
        }
        if !tracker.pending.is_empty() {
            warn!(
                "進行中の切り替えが残っているため一覧を古い状態にします: pending={}",
                tracker.pending.len()
            );
            self.cache.invalidate_namespace(AFFECTED)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::subscriptions::billing::BillingPeriod;
    use crate::features::subscriptions::cache::{CachedData, QueryKey};
    use crate::features::subscriptions::fixtures::{enriched, subscription, GatedStore};
    use crate::features::subscriptions::memory::InMemorySubscriptionStore;
    use crate::features::subscriptions::models::{EnrichedSubscription, SubscriptionStatus};

    fn items() -> Vec<EnrichedSubscription> {
        vec![
            enriched("sub-1", "Lycée Savorgnan", SubscriptionStatus::Active, Some(40)),
            enriched("sub-2", "Collège Chaminade", SubscriptionStatus::Trial, Some(2)),
            enriched("sub-3", "École Saint-Michel", SubscriptionStatus::Active, None),
        ]
    }

    fn store() -> InMemorySubscriptionStore {
        let store = InMemorySubscriptionStore::new();
        for (id, status) in [
            ("sub-1", SubscriptionStatus::Active),
            ("sub-2", SubscriptionStatus::Trial),
            ("sub-3", SubscriptionStatus::Active),
        ] {
            store
                .insert_subscription(subscription(
                    id,
                    "Groupe",
                    status,
                    30000.0,
                    BillingPeriod::Monthly,
                    None,
                ))
                .unwrap();
        }
        store
    }

    fn seeded_cache(plans: &[&str]) -> QueryCache {
        let cache = QueryCache::new();
        for plan in plans {
            let ticket = cache.begin_fetch(QueryKey::subscriptions(plan)).unwrap();
            let data = Ok(CachedData::Subscriptions(Arc::new(items())));
            assert!(cache.complete_fetch(&ticket, &data).unwrap());
        }
        cache
    }

    fn auto_renew_of(cache: &QueryCache, plan: &str, id: &str) -> bool {
        cache
            .subscriptions(plan)
            .unwrap()
            .unwrap()
            .iter()
            .find(|item| item.id() == id)
            .unwrap()
            .auto_renew()
    }

    #[tokio::test]
    async fn test_success_invalidates_namespace() {
        let store = store();
        let cache = seeded_cache(&["plan-p"]);
        let coordinator = MutationCoordinator::new(Arc::new(store.clone()), cache.clone());

        coordinator.set_auto_renew("sub-1", false).await.unwrap();

        assert!(!auto_renew_of(&cache, "plan-p", "sub-1"));
        assert!(cache.is_stale(&QueryKey::subscriptions("plan-p")).unwrap());
        assert!(!store.subscription("sub-1").unwrap().unwrap().auto_renew);
        assert_eq!(coordinator.state(), MutationState::Succeeded);
    }

    #[tokio::test]
    async fn test_failure_restores_every_snapshot() {
        let store = store();
        store.fail_toggles(Some("permission denied")).unwrap();
        let cache = seeded_cache(&["plan-p", "plan-q"]);
        let coordinator = MutationCoordinator::new(Arc::new(store.clone()), cache.clone());

        let error = coordinator.set_auto_renew("sub-1", false).await.unwrap_err();

        assert!(matches!(error, AppError::MutationFailed(_)));
        for plan in ["plan-p", "plan-q"] {
            let restored = cache.subscriptions(plan).unwrap().unwrap();
            assert_eq!(*restored, items());
        }
        assert!(!cache.is_stale(&QueryKey::subscriptions("plan-p")).unwrap());
        assert!(coordinator.state().last_error().is_some());
    }

    #[tokio::test]
    async fn test_unknown_subscription_is_reported_as_mutation_failure() {
        let store = store();
        let cache = seeded_cache(&["plan-p"]);
        let coordinator = MutationCoordinator::new(Arc::new(store), cache.clone());

        let error = coordinator.set_auto_renew("missing", true).await.unwrap_err();

        assert!(matches!(error, AppError::MutationFailed(_)));
        assert_eq!(*cache.subscriptions("plan-p").unwrap().unwrap(), items());
    }

    #[tokio::test]
    async fn test_reads_during_mutation_see_optimistic_value() {
        let gated = GatedStore::toggles(store());
        let cache = seeded_cache(&["plan-p"]);
        let coordinator = MutationCoordinator::new(Arc::new(gated.clone()), cache.clone());

        let task = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.set_auto_renew("sub-1", false).await }
        });
        gated.entered.notified().await;

        assert!(coordinator.state().is_pending());
        assert!(!auto_renew_of(&cache, "plan-p", "sub-1"));

        // 進行中に届いた古い取得結果は楽観的な値を上書きしない
        let ticket = cache.begin_fetch(QueryKey::subscriptions("plan-p")).unwrap();
        let late = Ok(CachedData::Subscriptions(Arc::new(items())));
        assert!(!cache.complete_fetch(&ticket, &late).unwrap());
        assert!(!auto_renew_of(&cache, "plan-p", "sub-1"));

        gated.gate.notify_one();
        task.await.unwrap().unwrap();

        assert!(!coordinator.state().is_pending());
        assert!(cache.is_stale(&QueryKey::subscriptions("plan-p")).unwrap());
    }

    #[tokio::test]
    async fn test_overlapping_failures_restore_pre_toggle_items() {
        let inner = store();
        inner.fail_toggles(Some("permission denied")).unwrap();
        let gated = GatedStore::toggles_by_id(inner, &["sub-1", "sub-2"]);
        let cache = seeded_cache(&["plan-p"]);
        let coordinator = MutationCoordinator::new(Arc::new(gated.clone()), cache.clone());

        let first = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.set_auto_renew("sub-1", false).await }
        });
        gated.entered_for("sub-1").await;
        let second = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.set_auto_renew("sub-2", false).await }
        });
        gated.entered_for("sub-2").await;
        assert!(!auto_renew_of(&cache, "plan-p", "sub-1"));
        assert!(!auto_renew_of(&cache, "plan-p", "sub-2"));

        gated.release("sub-1");
        let error = first.await.unwrap().unwrap_err();
        assert!(matches!(error, AppError::MutationFailed(_)));

        // 進行中の切り替えは楽観的な値のまま残る
        assert!(auto_renew_of(&cache, "plan-p", "sub-1"));
        assert!(!auto_renew_of(&cache, "plan-p", "sub-2"));
        assert!(coordinator.state().is_pending());

        gated.release("sub-2");
        let error = second.await.unwrap().unwrap_err();
        assert!(matches!(error, AppError::MutationFailed(_)));

        assert_eq!(*cache.subscriptions("plan-p").unwrap().unwrap(), items());
        assert!(cache.is_stale(&QueryKey::subscriptions("plan-p")).unwrap());
        assert!(coordinator.state().last_error().is_some());
    }

    #[tokio::test]
    async fn test_confirmed_toggle_survives_later_rollback() {
        let gated = GatedStore::toggles_by_id(store(), &["sub-1", "sub-2"]);
        let cache = seeded_cache(&["plan-p"]);
        let coordinator = MutationCoordinator::new(Arc::new(gated.clone()), cache.clone());

        let first = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.set_auto_renew("sub-1", false).await }
        });
        gated.entered_for("sub-1").await;
        let second = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.set_auto_renew("sub-2", false).await }
        });
        gated.entered_for("sub-2").await;

        gated.release("sub-1");
        first.await.unwrap().unwrap();
        assert!(coordinator.state().is_pending());

        gated.inner.fail_toggles(Some("quota exceeded")).unwrap();
        gated.release("sub-2");
        assert!(second.await.unwrap().is_err());

        assert!(!auto_renew_of(&cache, "plan-p", "sub-1"));
        assert!(auto_renew_of(&cache, "plan-p", "sub-2"));
        assert!(!gated.inner.subscription("sub-1").unwrap().unwrap().auto_renew);
        assert!(gated.inner.subscription("sub-2").unwrap().unwrap().auto_renew);
    }

    #[tokio::test]
    async fn test_lock_failure_does_not_leave_mutation_pending() {
        let store = store();
        let cache = seeded_cache(&["plan-p"]);
        let coordinator = MutationCoordinator::new(Arc::new(store.clone()), cache.clone());

        // キャッシュのロックを poison させる
        let poisoned = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = cache.patch_subscriptions("sub-1", |_| panic!("patch panicked"));
        }));
        assert!(poisoned.is_err());

        let error = coordinator.set_auto_renew("sub-1", false).await.unwrap_err();

        assert!(matches!(error, AppError::Concurrency(_)));
        assert!(!coordinator.state().is_pending());
        assert!(coordinator.state().last_error().is_some());
        assert_eq!(store.calls().toggles.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
