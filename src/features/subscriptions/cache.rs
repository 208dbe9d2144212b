//! クライアント側のクエリキャッシュ
//!
//! プランIDとクエリの種類をキーに、取得結果・取得状態・リビジョンを保持する。
//! 各コンポーネントはこのキャッシュだけを参照し、独自のコピーは持たない。
//!
//! 取得は [`QueryCache::begin_fetch`] で発行したチケットを
//! [`QueryCache::complete_fetch`] に渡して反映する。キャンセル済み、または
//! 後から開始された取得に追い越されたチケットの結果は破棄される。

use super::models::{EnrichedSubscription, StatsSummary};
use crate::shared::errors::{AppError, AppResult};
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// クエリの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryNamespace {
    EnrichedSubscriptions,
    SubscriptionStats,
}

impl QueryNamespace {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryNamespace::EnrichedSubscriptions => "enriched-subscriptions",
            QueryNamespace::SubscriptionStats => "subscription-stats",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub namespace: QueryNamespace,
    pub plan_id: String,
}

impl QueryKey {
    pub fn subscriptions(plan_id: &str) -> Self {
        Self {
            namespace: QueryNamespace::EnrichedSubscriptions,
            plan_id: plan_id.to_string(),
        }
    }

    pub fn stats(plan_id: &str) -> Self {
        Self {
            namespace: QueryNamespace::SubscriptionStats,
            plan_id: plan_id.to_string(),
        }
    }
}

/// キャッシュされるデータ
#[derive(Debug, Clone, PartialEq)]
pub enum CachedData {
    Subscriptions(Arc<Vec<EnrichedSubscription>>),
    Stats(StatsSummary),
}

/// 取得状態
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FetchStatus {
    #[default]
    Idle,
    Loading,
    Success,
    Error(String),
}

/// 取得の発行記録
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    key: QueryKey,
    generation: u64,
}

impl FetchTicket {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }
}

/// 名前空間単位で退避したデータ
#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    entries: Vec<(QueryKey, Option<CachedData>)>,
}

impl CacheSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 退避した一覧の中で、指定IDのサブスクリプションを書き換える
    ///
    /// # 戻り値
    /// 書き換えた件数
    pub fn patch_subscriptions<F>(&mut self, subscription_id: &str, patch: F) -> usize
    where
        F: Fn(&mut EnrichedSubscription),
    {
        let mut patched = 0;
        for (_, data) in self.entries.iter_mut() {
            if let Some((updated, count)) = patched_data(data.as_ref(), subscription_id, &patch) {
                *data = Some(updated);
                patched += count;
            }
        }
        patched
    }
}

#[derive(Debug, Default)]
struct Entry {
    data: Option<CachedData>,
    status: FetchStatus,
    /// データが変わるたびに増える
    revision: u64,
    stale: bool,
    generation: u64,
    in_flight: Option<u64>,
}

impl Entry {
    fn set_data(&mut self, data: Option<CachedData>) {
        self.data = data;
        self.revision += 1;
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<QueryKey, Entry>,
    /// 進行中のミューテーション数（名前空間ごと）
    held: HashMap<QueryNamespace, usize>,
}

impl Inner {
    fn is_held(&self, namespace: QueryNamespace) -> bool {
        self.held.get(&namespace).copied().unwrap_or(0) > 0
    }

    fn keys_in(&self, namespace: QueryNamespace) -> Vec<QueryKey> {
        self.entries
            .keys()
            .filter(|key| key.namespace == namespace)
            .cloned()
            .collect()
    }
}

/// 注入可能なクエリキャッシュ
///
/// `Clone` は同じキャッシュを共有するハンドルを返す
#[derive(Debug, Clone, Default)]
pub struct QueryCache {
    inner: Arc<Mutex<Inner>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| AppError::concurrency(format!("キャッシュのロックに失敗: {e}")))
    }

    /// 取得を開始する
    ///
    /// 同じキーの進行中の取得はこの時点で追い越される
    pub fn begin_fetch(&self, key: QueryKey) -> AppResult<FetchTicket> {
        let mut inner = self.lock()?;
        let entry = inner.entries.entry(key.clone()).or_default();
        entry.generation += 1;
        entry.in_flight = Some(entry.generation);
        entry.status = FetchStatus::Loading;

        Ok(FetchTicket {
            generation: entry.generation,
            key,
        })
    }

    /// 取得結果を反映する
    ///
    /// # 引数
    /// * `ticket` - `begin_fetch` で発行したチケット
    /// * `result` - 取得結果
    ///
    /// # 戻り値
    /// 反映した場合は `true`、遅れて届いた結果として破棄した場合は `false`
    pub fn complete_fetch(
        &self,
        ticket: &FetchTicket,
        result: &AppResult<CachedData>,
    ) -> AppResult<bool> {
        let mut inner = self.lock()?;
        let held = inner.is_held(ticket.key.namespace);
        let Some(entry) = inner.entries.get_mut(&ticket.key) else {
            debug!(
                "破棄済みのキーへの取得結果を無視します: {} / {}",
                ticket.key.namespace.as_str(),
                ticket.key.plan_id
            );
            return Ok(false);
        };

        if entry.in_flight != Some(ticket.generation) {
            debug!(
                "古い取得結果を破棄します: {} / {} (generation={})",
                ticket.key.namespace.as_str(),
                ticket.key.plan_id,
                ticket.generation
            );
            return Ok(false);
        }
        entry.in_flight = None;

        // ミューテーション中は楽観的な値を上書きしない
        if held {
            debug!(
                "ミューテーション中のため取得結果を破棄します: {} / {}",
                ticket.key.namespace.as_str(),
                ticket.key.plan_id
            );
            entry.stale = true;
            entry.status = settled_status(entry);
            return Ok(false);
        }

        match result {
            Ok(data) => {
                entry.set_data(Some(data.clone()));
                entry.stale = false;
                entry.status = FetchStatus::Success;
            }
            Err(e) => {
                entry.status = FetchStatus::Error(e.user_message().to_string());
            }
        }
        Ok(true)
    }

    /// 進行中の取得をキャンセルする
    pub fn cancel(&self, key: &QueryKey) -> AppResult<()> {
        let mut inner = self.lock()?;
        if let Some(entry) = inner.entries.get_mut(key) {
            cancel_entry(entry);
        }
        Ok(())
    }

    /// 名前空間内の進行中の取得をすべてキャンセルする
    pub fn cancel_namespace(&self, namespace: QueryNamespace) -> AppResult<()> {
        let mut inner = self.lock()?;
        for entry in inner
            .entries
            .iter_mut()
            .filter(|(key, _)| key.namespace == namespace)
            .map(|(_, entry)| entry)
        {
            cancel_entry(entry);
        }
        Ok(())
    }

    /// エントリを破棄する（進行中の取得結果も反映されなくなる）
    pub fn remove(&self, key: &QueryKey) -> AppResult<()> {
        self.lock()?.entries.remove(key);
        Ok(())
    }

    /// プランに関するエントリをすべて破棄する
    pub fn remove_plan(&self, plan_id: &str) -> AppResult<()> {
        self.lock()?.entries.retain(|key, _| key.plan_id != plan_id);
        Ok(())
    }

    /// 名前空間内のデータを退避する
    pub fn snapshot_namespace(&self, namespace: QueryNamespace) -> AppResult<CacheSnapshot> {
        let inner = self.lock()?;
        let entries = inner
            .entries
            .iter()
            .filter(|(key, _)| key.namespace == namespace)
            .map(|(key, entry)| (key.clone(), entry.data.clone()))
            .collect();
        Ok(CacheSnapshot { entries })
    }

    /// 退避したデータをそのまま書き戻す
    ///
    /// 退避後に破棄されたエントリは復活させない
    pub fn restore(&self, snapshot: CacheSnapshot) -> AppResult<()> {
        let mut inner = self.lock()?;
        for (key, data) in snapshot.entries {
            if let Some(entry) = inner.entries.get_mut(&key) {
                entry.set_data(data);
            }
        }
        Ok(())
    }

    /// キャッシュ中のすべての一覧で、指定IDのサブスクリプションを書き換える
    ///
    /// # 戻り値
    /// 書き換えた件数
    pub fn patch_subscriptions<F>(&self, subscription_id: &str, patch: F) -> AppResult<usize>
    where
        F: Fn(&mut EnrichedSubscription),
    {
        let mut inner = self.lock()?;
        let mut patched = 0;

        for entry in inner.entries.values_mut() {
            if let Some((updated, count)) = patched_data(entry.data.as_ref(), subscription_id, &patch)
            {
                entry.set_data(Some(updated));
                patched += count;
            }
        }
        Ok(patched)
    }

    /// 名前空間内のエントリを古い状態にする（次回参照時に再取得）
    pub fn invalidate_namespace(&self, namespace: QueryNamespace) -> AppResult<()> {
        let mut inner = self.lock()?;
        for key in inner.keys_in(namespace) {
            if let Some(entry) = inner.entries.get_mut(&key) {
                entry.stale = true;
            }
        }
        Ok(())
    }

    /// プランに関するエントリを古い状態にする
    pub fn invalidate_plan(&self, plan_id: &str) -> AppResult<()> {
        let mut inner = self.lock()?;
        for (_, entry) in inner
            .entries
            .iter_mut()
            .filter(|(key, _)| key.plan_id == plan_id)
        {
            entry.stale = true;
        }
        Ok(())
    }

    /// ミューテーションの開始を記録する
    pub fn hold_namespace(&self, namespace: QueryNamespace) -> AppResult<()> {
        *self.lock()?.held.entry(namespace).or_insert(0) += 1;
        Ok(())
    }

    /// ミューテーションの終了を記録する
    pub fn release_namespace(&self, namespace: QueryNamespace) -> AppResult<()> {
        let mut inner = self.lock()?;
        if let Some(count) = inner.held.get_mut(&namespace) {
            *count = count.saturating_sub(1);
        }
        Ok(())
    }

    pub fn subscriptions(&self, plan_id: &str) -> AppResult<Option<Arc<Vec<EnrichedSubscription>>>> {
        let inner = self.lock()?;
        Ok(
            match inner
                .entries
                .get(&QueryKey::subscriptions(plan_id))
                .and_then(|entry| entry.data.as_ref())
            {
                Some(CachedData::Subscriptions(items)) => Some(Arc::clone(items)),
                _ => None,
            },
        )
    }

    pub fn stats(&self, plan_id: &str) -> AppResult<Option<StatsSummary>> {
        let inner = self.lock()?;
        Ok(
            match inner
                .entries
                .get(&QueryKey::stats(plan_id))
                .and_then(|entry| entry.data.as_ref())
            {
                Some(CachedData::Stats(stats)) => Some(stats.clone()),
                _ => None,
            },
        )
    }

    pub fn status(&self, key: &QueryKey) -> AppResult<FetchStatus> {
        Ok(self
            .lock()?
            .entries
            .get(key)
            .map(|entry| entry.status.clone())
            .unwrap_or_default())
    }

    pub fn revision(&self, key: &QueryKey) -> AppResult<u64> {
        Ok(self
            .lock()?
            .entries
            .get(key)
            .map(|entry| entry.revision)
            .unwrap_or(0))
    }

    pub fn is_stale(&self, key: &QueryKey) -> AppResult<bool> {
        Ok(self
            .lock()?
            .entries
            .get(key)
            .map(|entry| entry.stale)
            .unwrap_or(false))
    }

    /// 再取得が必要か（データが無い、または古い。取得中は除く）
    pub fn needs_fetch(&self, key: &QueryKey) -> AppResult<bool> {
        Ok(match self.lock()?.entries.get(key) {
            None => true,
            Some(entry) => entry.in_flight.is_none() && (entry.data.is_none() || entry.stale),
        })
    }
}

/// 指定IDを含む一覧なら書き換えた複製と件数を返す
fn patched_data<F>(
    data: Option<&CachedData>,
    subscription_id: &str,
    patch: &F,
) -> Option<(CachedData, usize)>
where
    F: Fn(&mut EnrichedSubscription),
{
    let Some(CachedData::Subscriptions(items)) = data else {
        return None;
    };
    if !items.iter().any(|item| item.id() == subscription_id) {
        return None;
    }

    let mut updated = items.to_vec();
    let mut patched = 0;
    for item in updated.iter_mut().filter(|item| item.id() == subscription_id) {
        patch(item);
        patched += 1;
    }
    Some((CachedData::Subscriptions(Arc::new(updated)), patched))
}

fn settled_status(entry: &Entry) -> FetchStatus {
    if entry.data.is_some() {
        FetchStatus::Success
    } else {
        FetchStatus::Idle
    }
}

fn cancel_entry(entry: &mut Entry) {
    if entry.in_flight.take().is_some() {
        entry.status = settled_status(entry);
    }
}
