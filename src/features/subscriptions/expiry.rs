use super::models::{ExpiryStatus, SubscriptionStatus};
use chrono::{DateTime, Utc};

/// 1日のミリ秒数
pub const MILLIS_PER_DAY: i64 = 86_400_000;

/// 「まもなく期限切れ」とみなす残り日数の上限
pub const EXPIRING_SOON_DAYS: i64 = 7;

/// 「今月中に期限切れ」とみなす残り日数の上限
pub const EXPIRING_THIS_MONTH_DAYS: i64 = 30;

/// トライアル終了アラートの対象となる残り日数の上限
pub const TRIAL_ALERT_DAYS: i64 = 3;

/// 終了日までの残り日数を計算する
///
/// ミリ秒差を日数に換算して切り上げる。終了日が無い場合は `None`。
pub fn days_until_expiry(end_date: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<i64> {
    end_date.map(|end| {
        let millis = (end - now).num_milliseconds();
        (millis as f64 / MILLIS_PER_DAY as f64).ceil() as i64
    })
}

/// 残り日数から期限ステータスを判定する
///
/// 判定はアクティブなサブスクリプションに対してのみ行う。
/// 残り0日以下はストア側でまだ expired になっていないだけなので `Normal`。
pub fn classify_expiry(status: SubscriptionStatus, days_until_expiry: Option<i64>) -> ExpiryStatus {
    if status != SubscriptionStatus::Active {
        return ExpiryStatus::None;
    }

    match days_until_expiry {
        Some(days) if days > 0 && days <= EXPIRING_SOON_DAYS => ExpiryStatus::ExpiringSoon,
        Some(days) if days > EXPIRING_SOON_DAYS && days <= EXPIRING_THIS_MONTH_DAYS => {
            ExpiryStatus::ExpiringThisMonth
        }
        _ => ExpiryStatus::Normal,
    }
}

/// トライアル終了が近いかどうか（残り0〜3日）
pub fn is_trial_ending(status: SubscriptionStatus, days_until_expiry: Option<i64>) -> bool {
    status == SubscriptionStatus::Trial
        && matches!(days_until_expiry, Some(days) if (0..=TRIAL_ALERT_DAYS).contains(&days))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_days_until_expiry_rounds_up() {
        let now = now();
        assert_eq!(days_until_expiry(None, now), None);
        assert_eq!(days_until_expiry(Some(now + Duration::days(5)), now), Some(5));
        // 1ミリ秒でも残っていれば1日
        assert_eq!(
            days_until_expiry(Some(now + Duration::milliseconds(1)), now),
            Some(1)
        );
        assert_eq!(
            days_until_expiry(Some(now + Duration::hours(36)), now),
            Some(2)
        );
        assert_eq!(days_until_expiry(Some(now), now), Some(0));
        // 過去の日付は負数（切り上げなので -1.5日 は -1）
        assert_eq!(
            days_until_expiry(Some(now - Duration::hours(36)), now),
            Some(-1)
        );
    }

    #[test]
    fn test_classification_boundaries() {
        let active = SubscriptionStatus::Active;
        assert_eq!(classify_expiry(active, Some(1)), ExpiryStatus::ExpiringSoon);
        assert_eq!(classify_expiry(active, Some(7)), ExpiryStatus::ExpiringSoon);
        assert_eq!(classify_expiry(active, Some(8)), ExpiryStatus::ExpiringThisMonth);
        assert_eq!(classify_expiry(active, Some(30)), ExpiryStatus::ExpiringThisMonth);
        assert_eq!(classify_expiry(active, Some(31)), ExpiryStatus::Normal);
        assert_eq!(classify_expiry(active, Some(0)), ExpiryStatus::Normal);
        assert_eq!(classify_expiry(active, Some(-4)), ExpiryStatus::Normal);
        assert_eq!(classify_expiry(active, None), ExpiryStatus::Normal);
    }

    #[test]
    fn test_non_active_is_not_classified() {
        for status in [
            SubscriptionStatus::Trial,
            SubscriptionStatus::Cancelled,
            SubscriptionStatus::Expired,
        ] {
            assert_eq!(classify_expiry(status, Some(3)), ExpiryStatus::None);
        }
    }

    #[test]
    fn test_trial_ending_window() {
        let trial = SubscriptionStatus::Trial;
        assert!(is_trial_ending(trial, Some(0)));
        assert!(is_trial_ending(trial, Some(3)));
        assert!(!is_trial_ending(trial, Some(4)));
        assert!(!is_trial_ending(trial, Some(-1)));
        assert!(!is_trial_ending(trial, None));
        assert!(!is_trial_ending(SubscriptionStatus::Active, Some(2)));
    }
}
