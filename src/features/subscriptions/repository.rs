use super::billing::{monthly_amount, BillingPeriod};
use super::expiry::{classify_expiry, days_until_expiry};
use super::models::{
    parse_timestamp, EnrichedRow, PlanSummary, SchoolGroupSummary, StatsRow, Subscription,
    SubscriptionStatus,
};
use super::store::SubscriptionStore;
use crate::shared::database::{create_enriched_snapshot_table, table_exists, ENRICHED_SNAPSHOT_TABLE};
use crate::shared::errors::{AppError, AppResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

const ENRICHED_COLUMNS: &str = "id, school_group_id, school_group_name, school_group_logo, school_group_region,
     plan_id, plan_name, plan_price, plan_currency, plan_billing_period,
     status, start_date, end_date, auto_renew, created_at,
     schools_count, users_count, students_count, days_until_expiry, expiry_status, mrr_contribution";

/// 生データ結合クエリの1行（検証前）
struct RawJoinRow {
    id: String,
    school_group_id: String,
    school_group_name: String,
    school_group_logo: Option<String>,
    school_group_region: Option<String>,
    plan_id: String,
    plan_name: String,
    plan_price: f64,
    plan_currency: String,
    plan_billing_period: String,
    status: String,
    start_date: String,
    end_date: Option<String>,
    auto_renew: bool,
    created_at: String,
}

impl TryFrom<RawJoinRow> for Subscription {
    type Error = AppError;

    fn try_from(row: RawJoinRow) -> Result<Self, Self::Error> {
        Ok(Subscription {
            status: row.status.parse()?,
            start_date: parse_timestamp(&row.start_date)?,
            end_date: row.end_date.as_deref().map(parse_timestamp).transpose()?,
            created_at: parse_timestamp(&row.created_at)?,
            auto_renew: row.auto_renew,
            school_group: SchoolGroupSummary {
                id: row.school_group_id,
                name: row.school_group_name,
                logo: row.school_group_logo,
                region: row.school_group_region,
            },
            plan: PlanSummary {
                id: row.plan_id,
                name: row.plan_name,
                price: row.plan_price,
                currency: row.plan_currency,
                billing_period: BillingPeriod::parse_lenient(&row.plan_billing_period),
            },
            id: row.id,
        })
    }
}

/// 事前計算ソースが存在することを確認する
fn ensure_snapshot_available(conn: &Connection) -> AppResult<()> {
    if table_exists(conn, ENRICHED_SNAPSHOT_TABLE)? {
        Ok(())
    } else {
        Err(AppError::source_unavailable(ENRICHED_SNAPSHOT_TABLE))
    }
}

/// プランのエンリッチ済み行を取得する
///
/// # 引数
/// * `conn` - データベース接続
/// * `plan_id` - プランID
///
/// # 戻り値
/// 作成日時の新しい順の行、スナップショットが無い場合は SourceUnavailable
pub fn find_enriched_by_plan(conn: &Connection, plan_id: &str) -> AppResult<Vec<EnrichedRow>> {
    ensure_snapshot_available(conn)?;

    let query = format!(
        "SELECT {ENRICHED_COLUMNS} FROM subscriptions_enriched WHERE plan_id = ?1 ORDER BY created_at DESC"
    );
    let mut stmt = conn.prepare(&query)?;
    let rows = stmt.query_map(params![plan_id], |row| {
        Ok(EnrichedRow {
            id: row.get(0)?,
            school_group_id: row.get(1)?,
            school_group_name: row.get(2)?,
            school_group_logo: row.get(3)?,
            school_group_region: row.get(4)?,
            plan_id: row.get(5)?,
            plan_name: row.get(6)?,
            plan_price: row.get(7)?,
            plan_currency: row.get(8)?,
            plan_billing_period: row.get(9)?,
            status: row.get(10)?,
            start_date: row.get(11)?,
            end_date: row.get(12)?,
            auto_renew: row.get::<_, Option<i64>>(13)?.map(|v| v != 0),
            created_at: row.get(14)?,
            schools_count: row.get(15)?,
            users_count: row.get(16)?,
            students_count: row.get(17)?,
            days_until_expiry: row.get(18)?,
            expiry_status: row.get(19)?,
            mrr_contribution: row.get(20)?,
        })
    })?;

    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::Database(e.to_string()))
}

/// 統計用の最小限の列を取得する
pub fn find_enriched_stats_by_plan(conn: &Connection, plan_id: &str) -> AppResult<Vec<StatsRow>> {
    ensure_snapshot_available(conn)?;

    let mut stmt = conn.prepare(
        "SELECT status, expiry_status, mrr_contribution FROM subscriptions_enriched WHERE plan_id = ?1",
    )?;
    let rows = stmt.query_map(params![plan_id], |row| {
        Ok(StatsRow {
            status: row.get(0)?,
            expiry_status: row.get(1)?,
            mrr_contribution: row.get(2)?,
        })
    })?;

    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::Database(e.to_string()))
}

/// 学校グループ・プランを結合した生のサブスクリプションを取得する
pub fn find_raw_by_plan(conn: &Connection, plan_id: &str) -> AppResult<Vec<Subscription>> {
    let mut stmt = conn.prepare(
        "SELECT s.id, g.id, g.name, g.logo, g.region,
                p.id, p.name, p.price, p.currency, p.billing_period,
                s.status, s.start_date, s.end_date, s.auto_renew, s.created_at
         FROM subscriptions s
         JOIN school_groups g ON g.id = s.school_group_id
         JOIN plans p ON p.id = s.plan_id
         WHERE s.plan_id = ?1
         ORDER BY s.created_at DESC",
    )?;
    let rows = stmt.query_map(params![plan_id], |row| {
        Ok(RawJoinRow {
            id: row.get(0)?,
            school_group_id: row.get(1)?,
            school_group_name: row.get(2)?,
            school_group_logo: row.get(3)?,
            school_group_region: row.get(4)?,
            plan_id: row.get(5)?,
            plan_name: row.get(6)?,
            plan_price: row.get(7)?,
            plan_currency: row.get(8)?,
            plan_billing_period: row.get(9)?,
            status: row.get(10)?,
            start_date: row.get(11)?,
            end_date: row.get(12)?,
            auto_renew: row.get::<_, i64>(13)? != 0,
            created_at: row.get(14)?,
        })
    })?;

    let raw_rows = rows
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::Database(e.to_string()))?;

    raw_rows.into_iter().map(Subscription::try_from).collect()
}

fn to_count(count: i64, group_id: &str) -> AppResult<u32> {
    u32::try_from(count).map_err(|_| {
        AppError::invalid_record(format!("件数が範囲外です: {group_id} = {count}"))
    })
}

/// 学校グループに属する学校数を取得する
pub fn count_schools(conn: &Connection, group_id: &str) -> AppResult<u32> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM schools WHERE school_group_id = ?1",
        params![group_id],
        |row| row.get(0),
    )?;
    to_count(count, group_id)
}

/// 学校グループに属するユーザー数を取得する
pub fn count_users(conn: &Connection, group_id: &str) -> AppResult<u32> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE school_group_id = ?1",
        params![group_id],
        |row| row.get(0),
    )?;
    to_count(count, group_id)
}

/// 学校グループに属する生徒数を取得する
pub fn count_students(conn: &Connection, group_id: &str) -> AppResult<u32> {
    let count: i64 = conn.query_row(
        "SELECT COALESCE(SUM(students_count), 0) FROM schools WHERE school_group_id = ?1",
        params![group_id],
        |row| row.get(0),
    )?;
    to_count(count, group_id)
}

/// サブスクリプションの自動更新フラグを設定する
///
/// スナップショットが存在する場合はスナップショット側も更新する
pub fn set_auto_renew(conn: &Connection, id: &str, enabled: bool) -> AppResult<()> {
    let rows_affected = conn.execute(
        "UPDATE subscriptions SET auto_renew = ?1 WHERE id = ?2",
        params![enabled as i64, id],
    )?;

    if rows_affected == 0 {
        return Err(AppError::NotFound(format!(
            "ID {id} のサブスクリプションが見つかりません"
        )));
    }

    if table_exists(conn, ENRICHED_SNAPSHOT_TABLE)? {
        conn.execute(
            "UPDATE subscriptions_enriched SET auto_renew = ?1 WHERE id = ?2",
            params![enabled as i64, id],
        )?;
    }

    Ok(())
}

/// エンリッチ済みスナップショットを作り直す
///
/// # 引数
/// * `conn` - データベース接続
/// * `now` - 残り日数の基準時刻
///
/// # 戻り値
/// 書き込んだ行数
///
/// 全体を1つのトランザクションで行う。途中で失敗した場合は更新前の
/// スナップショット（初回ならテーブルが無い状態）がそのまま残る。
pub fn refresh_enriched_snapshot(conn: &Connection, now: DateTime<Utc>) -> AppResult<usize> {
    let tx = conn.unchecked_transaction()?;
    let written = write_enriched_snapshot(&tx, now)?;
    tx.commit()?;

    log::info!("スナップショットを更新しました: {written} 件");
    Ok(written)
}

fn write_enriched_snapshot(conn: &Connection, now: DateTime<Utc>) -> AppResult<usize> {
    create_enriched_snapshot_table(conn)?;

    let mut stmt = conn.prepare("SELECT DISTINCT plan_id FROM subscriptions")?;
    let plan_ids = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut written = 0;
    conn.execute("DELETE FROM subscriptions_enriched", [])?;
    for plan_id in plan_ids {
        for sub in find_raw_by_plan(conn, &plan_id)? {
            let days = days_until_expiry(sub.end_date, now);
            let expiry_status = classify_expiry(sub.status, days);
            let mrr = if sub.status == SubscriptionStatus::Active {
                monthly_amount(sub.plan.price, sub.plan.billing_period)
            } else {
                0.0
            };

            conn.execute(
                "INSERT INTO subscriptions_enriched (
                    id, school_group_id, school_group_name, school_group_logo, school_group_region,
                    plan_id, plan_name, plan_price, plan_currency, plan_billing_period,
                    status, start_date, end_date, auto_renew, created_at,
                    schools_count, users_count, students_count, days_until_expiry, expiry_status, mrr_contribution)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
                params![
                    sub.id,
                    sub.school_group.id,
                    sub.school_group.name,
                    sub.school_group.logo,
                    sub.school_group.region,
                    sub.plan.id,
                    sub.plan.name,
                    sub.plan.price,
                    sub.plan.currency,
                    sub.plan.billing_period.as_str(),
                    sub.status.as_str(),
                    sub.start_date.to_rfc3339(),
                    sub.end_date.map(|d| d.to_rfc3339()),
                    sub.auto_renew as i64,
                    sub.created_at.to_rfc3339(),
                    count_schools(conn, &sub.school_group.id)?,
                    count_users(conn, &sub.school_group.id)?,
                    count_students(conn, &sub.school_group.id)?,
                    days,
                    expiry_status.as_str(),
                    mrr,
                ],
            )?;
            written += 1;
        }
    }
    Ok(written)
}

/// 学校グループを作成する
pub fn create_school_group(conn: &Connection, group: &SchoolGroupSummary) -> AppResult<()> {
    conn.execute(
        "INSERT INTO school_groups (id, name, logo, region) VALUES (?1, ?2, ?3, ?4)",
        params![group.id, group.name, group.logo, group.region],
    )?;
    Ok(())
}

/// プランを作成する
pub fn create_plan(conn: &Connection, plan: &PlanSummary) -> AppResult<()> {
    if plan.price < 0.0 {
        return Err(AppError::validation("価格は0以上である必要があります"));
    }
    conn.execute(
        "INSERT INTO plans (id, name, price, currency, billing_period) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            plan.id,
            plan.name,
            plan.price,
            plan.currency,
            plan.billing_period.as_str()
        ],
    )?;
    Ok(())
}

/// サブスクリプションを作成する
///
/// 学校グループとプランは事前に作成されている必要がある
pub fn create_subscription(conn: &Connection, sub: &Subscription) -> AppResult<()> {
    conn.execute(
        "INSERT INTO subscriptions (id, school_group_id, plan_id, status, start_date, end_date, auto_renew, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            sub.id,
            sub.school_group.id,
            sub.plan.id,
            sub.status.as_str(),
            sub.start_date.to_rfc3339(),
            sub.end_date.map(|d| d.to_rfc3339()),
            sub.auto_renew as i64,
            sub.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// 学校を作成する
pub fn create_school(
    conn: &Connection,
    id: &str,
    group_id: &str,
    name: &str,
    students_count: u32,
) -> AppResult<()> {
    conn.execute(
        "INSERT INTO schools (id, school_group_id, name, students_count) VALUES (?1, ?2, ?3, ?4)",
        params![id, group_id, name, students_count],
    )?;
    Ok(())
}

/// ユーザーを作成する
pub fn create_user(conn: &Connection, id: &str, group_id: &str, email: &str) -> AppResult<()> {
    conn.execute(
        "INSERT INTO users (id, school_group_id, email) VALUES (?1, ?2, ?3)",
        params![id, group_id, email],
    )?;
    Ok(())
}

/// 自動更新フラグを取得する
pub fn find_auto_renew(conn: &Connection, id: &str) -> AppResult<Option<bool>> {
    let value: Option<i64> = conn
        .query_row(
            "SELECT auto_renew FROM subscriptions WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.map(|v| v != 0))
}

/// SQLite をバックエンドとするサブスクリプションストア
#[derive(Clone)]
pub struct SqliteSubscriptionStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteSubscriptionStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// 共有している接続
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.db)
    }

    /// 接続を取得して処理を実行する
    fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> AppResult<T>) -> AppResult<T> {
        let conn = self
            .db
            .lock()
            .map_err(|e| AppError::concurrency(format!("データベースロックエラー: {e}")))?;
        f(&conn)
    }

    /// 読み取り系の失敗を一時的な読み取りエラーとして扱う
    fn read<T>(&self, f: impl FnOnce(&Connection) -> AppResult<T>) -> AppResult<T> {
        self.with_connection(f).map_err(|e| match e {
            AppError::Database(message) => AppError::transient_read(message),
            other => other,
        })
    }

    /// スナップショットを現在時刻で作り直す
    pub fn refresh_enriched_snapshot(&self, now: DateTime<Utc>) -> AppResult<usize> {
        self.with_connection(|conn| refresh_enriched_snapshot(conn, now))
    }
}

#[async_trait]
impl SubscriptionStore for SqliteSubscriptionStore {
    async fn read_enriched_subscriptions(&self, plan_id: &str) -> AppResult<Vec<EnrichedRow>> {
        self.read(|conn| find_enriched_by_plan(conn, plan_id))
    }

    async fn read_enriched_stats(&self, plan_id: &str) -> AppResult<Vec<StatsRow>> {
        self.read(|conn| find_enriched_stats_by_plan(conn, plan_id))
    }

    async fn read_raw_subscriptions(&self, plan_id: &str) -> AppResult<Vec<Subscription>> {
        self.read(|conn| find_raw_by_plan(conn, plan_id))
    }

    async fn count_schools(&self, group_id: &str) -> AppResult<u32> {
        self.read(|conn| count_schools(conn, group_id))
    }

    async fn count_users(&self, group_id: &str) -> AppResult<u32> {
        self.read(|conn| count_users(conn, group_id))
    }

    async fn count_students(&self, group_id: &str) -> AppResult<u32> {
        self.read(|conn| count_students(conn, group_id))
    }

    async fn toggle_auto_renew(&self, subscription_id: &str, enabled: bool) -> AppResult<()> {
        self.with_connection(|conn| set_auto_renew(conn, subscription_id, enabled))
    }
}
