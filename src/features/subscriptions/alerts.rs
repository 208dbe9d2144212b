//! 期限アラート
//!
//! 「何を通知するか」は純粋関数 [`compute_alerts`] が決め、
//! 「いつ通知するか」は [`AlertDispatcher`] が一覧のリビジョン単位で重複を除いて決める。

use super::expiry::{is_trial_ending, EXPIRING_SOON_DAYS, TRIAL_ALERT_DAYS};
use super::models::{EnrichedSubscription, SubscriptionStatus};
use crate::shared::errors::{AppError, AppResult};
use chrono_tz::Tz;
use log::info;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

/// アラートの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    /// アクティブで残り1〜7日
    ExpiringSoon,
    /// トライアルで残り0〜3日
    TrialEnding,
}

/// 通知すべきアラート
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub category: AlertCategory,
    pub subscription_ids: Vec<String>,
    pub count: usize,
    /// 最も早い終了日（表示用タイムゾーンで `YYYY-MM-DD`）
    pub earliest_end: Option<String>,
    pub message: String,
}

fn is_expiring_soon(item: &EnrichedSubscription) -> bool {
    item.status() == SubscriptionStatus::Active
        && matches!(item.days_until_expiry, Some(days) if days > 0 && days <= EXPIRING_SOON_DAYS)
}

fn build_event(
    category: AlertCategory,
    matched: &[&EnrichedSubscription],
    tz: Tz,
) -> Option<AlertEvent> {
    if matched.is_empty() {
        return None;
    }

    let count = matched.len();
    let earliest_end = matched
        .iter()
        .filter_map(|item| item.subscription.end_date)
        .min()
        .map(|end| end.with_timezone(&tz).format("%Y-%m-%d").to_string());
    let message = match category {
        AlertCategory::ExpiringSoon => {
            format!("{count}件のサブスクリプションが{EXPIRING_SOON_DAYS}日以内に期限切れになります")
        }
        AlertCategory::TrialEnding => {
            format!("{count}件のトライアルが{TRIAL_ALERT_DAYS}日以内に終了します")
        }
    };

    Some(AlertEvent {
        category,
        subscription_ids: matched.iter().map(|item| item.id().to_string()).collect(),
        count,
        earliest_end,
        message,
    })
}

/// 一覧から通知すべきアラートを求める
///
/// # 引数
/// * `items` - エンリッチ済みの一覧
/// * `tz` - 日付表示に使うタイムゾーン
///
/// # 戻り値
/// 該当があるカテゴリのアラート（最大2件）
pub fn compute_alerts(items: &[EnrichedSubscription], tz: Tz) -> Vec<AlertEvent> {
    let expiring: Vec<&EnrichedSubscription> =
        items.iter().filter(|item| is_expiring_soon(item)).collect();
    let trials: Vec<&EnrichedSubscription> = items
        .iter()
        .filter(|item| is_trial_ending(item.status(), item.days_until_expiry))
        .collect();

    [
        build_event(AlertCategory::ExpiringSoon, &expiring, tz),
        build_event(AlertCategory::TrialEnding, &trials, tz),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// 通知の表示先
pub trait AlertSink: Send + Sync {
    fn notify(&self, event: &AlertEvent);
}

/// ログに書き出すだけの表示先
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn notify(&self, event: &AlertEvent) {
        info!("アラート: {} ({:?})", event.message, event.subscription_ids);
    }
}

/// 同じリビジョンで同じカテゴリを二度通知しないディスパッチャー
#[derive(Debug, Default)]
pub struct AlertDispatcher {
    notified: Mutex<HashMap<(String, AlertCategory), u64>>,
}

impl AlertDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// アラートを通知する
    ///
    /// # 戻り値
    /// 実際に通知した件数
    pub fn dispatch(
        &self,
        plan_id: &str,
        revision: u64,
        events: &[AlertEvent],
        sink: &dyn AlertSink,
    ) -> AppResult<usize> {
        let mut notified = self
            .notified
            .lock()
            .map_err(|e| AppError::concurrency(format!("通知履歴のロックに失敗: {e}")))?;

        let mut sent = 0;
        for event in events {
            let key = (plan_id.to_string(), event.category);
            if notified.get(&key) == Some(&revision) {
                continue;
            }
            sink.notify(event);
            notified.insert(key, revision);
            sent += 1;
        }
        Ok(sent)
    }

    /// プランの通知履歴を消す
    pub fn forget_plan(&self, plan_id: &str) -> AppResult<()> {
        self.notified
            .lock()
            .map_err(|e| AppError::concurrency(format!("通知履歴のロックに失敗: {e}")))?
            .retain(|(plan, _), _| plan != plan_id);
        Ok(())
    }
}
