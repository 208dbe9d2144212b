//! 請求周期の月額換算
//!
//! 月額換算はスナップショット更新・フォールバックのエンリッチメント・
//! フォールバックの統計計算のすべてでこのモジュールを通す。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 請求周期
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingPeriod {
    Monthly,
    Quarterly,
    Biannual,
    Yearly,
}

impl BillingPeriod {
    pub const ALL: [BillingPeriod; 4] = [
        BillingPeriod::Monthly,
        BillingPeriod::Quarterly,
        BillingPeriod::Biannual,
        BillingPeriod::Yearly,
    ];

    /// 1請求あたりの月数
    pub fn divisor(self) -> u32 {
        match self {
            BillingPeriod::Monthly => 1,
            BillingPeriod::Quarterly => 3,
            BillingPeriod::Biannual => 6,
            BillingPeriod::Yearly => 12,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BillingPeriod::Monthly => "monthly",
            BillingPeriod::Quarterly => "quarterly",
            BillingPeriod::Biannual => "biannual",
            BillingPeriod::Yearly => "yearly",
        }
    }

    /// 文字列から請求周期を解釈する
    ///
    /// 未知の値は月額として扱う
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "monthly" => BillingPeriod::Monthly,
            "quarterly" => BillingPeriod::Quarterly,
            "biannual" => BillingPeriod::Biannual,
            "yearly" => BillingPeriod::Yearly,
            other => {
                log::debug!("未知の請求周期のため月額として扱います: {other}");
                BillingPeriod::Monthly
            }
        }
    }
}

impl fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 価格を月額に換算する
///
/// # 引数
/// * `price` - 1請求あたりの価格（通貨の最小単位ではなく整数の通貨単位）
/// * `period` - 請求周期
///
/// # 戻り値
/// 月額換算した価格
pub fn monthly_amount(price: f64, period: BillingPeriod) -> f64 {
    price / f64::from(period.divisor())
}

/// 文字列の請求周期から月額に換算する
pub fn monthly_amount_for(price: f64, period: &str) -> f64 {
    monthly_amount(price, BillingPeriod::parse_lenient(period))
}
