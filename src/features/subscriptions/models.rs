use super::billing::BillingPeriod;
use crate::shared::errors::{AppError, AppResult};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// サブスクリプションのライフサイクルステータス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Trial,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub const ALL: [SubscriptionStatus; 4] = [
        SubscriptionStatus::Active,
        SubscriptionStatus::Trial,
        SubscriptionStatus::Cancelled,
        SubscriptionStatus::Expired,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trial => "trial",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(SubscriptionStatus::Active),
            "trial" => Ok(SubscriptionStatus::Trial),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            "expired" => Ok(SubscriptionStatus::Expired),
            other => Err(AppError::invalid_record(format!(
                "未知のステータスです: {other}"
            ))),
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 期限ステータス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryStatus {
    /// 判定対象外（アクティブ以外）
    None,
    ExpiringSoon,
    ExpiringThisMonth,
    Normal,
}

impl ExpiryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExpiryStatus::None => "none",
            ExpiryStatus::ExpiringSoon => "expiring_soon",
            ExpiryStatus::ExpiringThisMonth => "expiring_this_month",
            ExpiryStatus::Normal => "normal",
        }
    }

    /// ストアの値を解釈する（NULL は判定対象外）
    pub fn parse(value: Option<&str>) -> AppResult<Self> {
        match value {
            None | Some("none") => Ok(ExpiryStatus::None),
            Some("expiring_soon") => Ok(ExpiryStatus::ExpiringSoon),
            Some("expiring_this_month") => Ok(ExpiryStatus::ExpiringThisMonth),
            Some("normal") => Ok(ExpiryStatus::Normal),
            Some(other) => Err(AppError::invalid_record(format!(
                "未知の期限ステータスです: {other}"
            ))),
        }
    }
}

/// 学校グループの要約（サブスクリプションに非正規化された属性）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchoolGroupSummary {
    pub id: String,
    pub name: String,
    pub logo: Option<String>,
    pub region: Option<String>,
}

/// プランの要約
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub currency: String,
    pub billing_period: BillingPeriod,
}

/// 学校グループ単位の規模
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCounts {
    pub schools: u32,
    pub users: u32,
    pub students: u32,
}

/// サブスクリプション（ストアから読み取った生データ）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub school_group: SchoolGroupSummary,
    pub plan: PlanSummary,
    pub status: SubscriptionStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub auto_renew: bool,
    pub created_at: DateTime<Utc>,
}

/// 派生フィールドを付与したサブスクリプション
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedSubscription {
    #[serde(flatten)]
    pub subscription: Subscription,
    pub schools_count: u32,
    pub users_count: u32,
    pub students_count: u32,
    pub days_until_expiry: Option<i64>,
    pub expiry_status: ExpiryStatus,
    /// 月額換算した売上寄与（アクティブ以外は 0）
    pub mrr_contribution: f64,
}

impl EnrichedSubscription {
    pub fn id(&self) -> &str {
        &self.subscription.id
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.subscription.status
    }

    pub fn group_name(&self) -> &str {
        &self.subscription.school_group.name
    }

    pub fn auto_renew(&self) -> bool {
        self.subscription.auto_renew
    }
}

/// 統計サマリー
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub total: usize,
    pub active: usize,
    pub trial: usize,
    pub cancelled: usize,
    pub expired: usize,
    pub expiring_soon: usize,
    pub expiring_this_month: usize,
    pub mrr: f64,
    pub arr: f64,
}

/// 事前計算済みスナップショットの1行
///
/// ストアの行は列ごとに NULL を取り得るため、すべて `Option` で受け取り
/// [`EnrichedSubscription::try_from`] で検証する。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRow {
    pub id: Option<String>,
    pub school_group_id: Option<String>,
    pub school_group_name: Option<String>,
    pub school_group_logo: Option<String>,
    pub school_group_region: Option<String>,
    pub plan_id: Option<String>,
    pub plan_name: Option<String>,
    pub plan_price: Option<f64>,
    pub plan_currency: Option<String>,
    pub plan_billing_period: Option<String>,
    pub status: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub auto_renew: Option<bool>,
    pub created_at: Option<String>,
    pub schools_count: Option<i64>,
    pub users_count: Option<i64>,
    pub students_count: Option<i64>,
    pub days_until_expiry: Option<i64>,
    pub expiry_status: Option<String>,
    pub mrr_contribution: Option<f64>,
}

/// 統計計算用に最小限の列だけを読んだスナップショット行
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsRow {
    pub status: Option<String>,
    pub expiry_status: Option<String>,
    pub mrr_contribution: Option<f64>,
}

fn required<T>(value: Option<T>, field: &str, id: &str) -> AppResult<T> {
    value.ok_or_else(|| AppError::invalid_record(format!("{id}: {field} がありません")))
}

fn count(value: Option<i64>, field: &str, id: &str) -> AppResult<u32> {
    let raw = required(value, field, id)?;
    u32::try_from(raw)
        .map_err(|_| AppError::invalid_record(format!("{id}: {field} が不正です ({raw})")))
}

impl TryFrom<EnrichedRow> for EnrichedSubscription {
    type Error = AppError;

    fn try_from(row: EnrichedRow) -> Result<Self, Self::Error> {
        let id = required(row.id, "id", "<unknown>")?;

        let status: SubscriptionStatus = required(row.status, "status", &id)?.parse()?;
        let price = required(row.plan_price, "plan_price", &id)?;
        if price < 0.0 {
            return Err(AppError::invalid_record(format!(
                "{id}: plan_price が負の値です"
            )));
        }
        let mrr_contribution = required(row.mrr_contribution, "mrr_contribution", &id)?;
        if mrr_contribution < 0.0 {
            return Err(AppError::invalid_record(format!(
                "{id}: mrr_contribution が負の値です"
            )));
        }

        let subscription = Subscription {
            school_group: SchoolGroupSummary {
                id: required(row.school_group_id, "school_group_id", &id)?,
                name: required(row.school_group_name, "school_group_name", &id)?,
                logo: row.school_group_logo,
                region: row.school_group_region,
            },
            plan: PlanSummary {
                id: required(row.plan_id, "plan_id", &id)?,
                name: required(row.plan_name, "plan_name", &id)?,
                price,
                currency: required(row.plan_currency, "plan_currency", &id)?,
                billing_period: BillingPeriod::parse_lenient(&required(
                    row.plan_billing_period,
                    "plan_billing_period",
                    &id,
                )?),
            },
            status,
            start_date: parse_timestamp(&required(row.start_date, "start_date", &id)?)?,
            end_date: row.end_date.as_deref().map(parse_timestamp).transpose()?,
            auto_renew: required(row.auto_renew, "auto_renew", &id)?,
            created_at: parse_timestamp(&required(row.created_at, "created_at", &id)?)?,
            id: id.clone(),
        };

        Ok(EnrichedSubscription {
            schools_count: count(row.schools_count, "schools_count", &id)?,
            users_count: count(row.users_count, "users_count", &id)?,
            students_count: count(row.students_count, "students_count", &id)?,
            days_until_expiry: row.days_until_expiry,
            expiry_status: ExpiryStatus::parse(row.expiry_status.as_deref())?,
            mrr_contribution,
            subscription,
        })
    }
}

/// タイムスタンプ文字列を解釈する
///
/// RFC3339 形式と YYYY-MM-DD 形式（UTC の 0時）を受け付ける
pub fn parse_timestamp(value: &str) -> AppResult<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| AppError::invalid_record(format!("日時の形式が不正です: {value}")))
}
