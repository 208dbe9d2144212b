//! 一覧の絞り込み・並び替え・ページング
//!
//! 処理は常に「テキスト検索 → ステータス絞り込み → 並び替え → ページング」の順で行う。
//! いずれも純粋関数で、同じ入力と [`QueryState`] からは同じ結果が得られる。

use super::models::{EnrichedSubscription, SubscriptionStatus};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// ステータス絞り込み
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "status")]
pub enum StatusFilter {
    #[default]
    All,
    Only(SubscriptionStatus),
}

impl StatusFilter {
    pub fn matches(self, status: SubscriptionStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Only(expected) => expected == status,
        }
    }
}

/// 並び替えのキー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    /// 学校グループ名
    #[default]
    Name,
    /// 開始日
    Date,
    /// 学校数
    Schools,
    /// ユーザー数
    Users,
}

/// 並び順
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn toggle(self) -> Self {
        match self {
            SortOrder::Asc => SortOrder::Desc,
            SortOrder::Desc => SortOrder::Asc,
        }
    }
}

/// ユーザーが操作する一覧の表示条件
///
/// 値の変更は必ずセッター経由で行う。検索語とステータスの変更は
/// ページを1に戻す。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryState {
    search_query: String,
    status_filter: StatusFilter,
    sort_field: SortField,
    sort_order: SortOrder,
    page: usize,
}

impl Default for QueryState {
    fn default() -> Self {
        Self {
            search_query: String::new(),
            status_filter: StatusFilter::All,
            sort_field: SortField::Name,
            sort_order: SortOrder::Asc,
            page: 1,
        }
    }
}

impl QueryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn search_query(&self) -> &str {
        &self.search_query
    }

    pub fn status_filter(&self) -> StatusFilter {
        self.status_filter
    }

    pub fn sort_field(&self) -> SortField {
        self.sort_field
    }

    pub fn sort_order(&self) -> SortOrder {
        self.sort_order
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn set_search_query(&mut self, query: impl Into<String>) {
        self.search_query = query.into();
        self.page = 1;
    }

    pub fn set_status_filter(&mut self, filter: StatusFilter) {
        self.status_filter = filter;
        self.page = 1;
    }

    pub fn set_sort_field(&mut self, field: SortField) {
        self.sort_field = field;
    }

    pub fn set_sort_order(&mut self, order: SortOrder) {
        self.sort_order = order;
    }

    /// 同じキーなら並び順を反転し、別のキーなら昇順で並び替える
    pub fn sort_by(&mut self, field: SortField) {
        if self.sort_field == field {
            self.sort_order = self.sort_order.toggle();
        } else {
            self.sort_field = field;
            self.sort_order = SortOrder::Asc;
        }
    }

    /// 指定ページへ移動する
    ///
    /// # 引数
    /// * `page` - 移動先のページ（1始まり）
    /// * `total_pages` - 現在の総ページ数
    ///
    /// # 戻り値
    /// `[1, total_pages]` に収めた移動後のページ
    pub fn go_to_page(&mut self, page: usize, total_pages: usize) -> usize {
        self.page = page.clamp(1, total_pages.max(1));
        self.page
    }

    pub fn next_page(&mut self, total_pages: usize) -> usize {
        self.go_to_page(self.page.saturating_add(1), total_pages)
    }

    pub fn previous_page(&mut self, total_pages: usize) -> usize {
        self.go_to_page(self.page.saturating_sub(1), total_pages)
    }
}

/// 検索語がグループ名に含まれるか（大文字小文字を区別しない）
fn matches_search(item: &EnrichedSubscription, needle: &str) -> bool {
    needle.is_empty() || item.group_name().to_lowercase().contains(needle)
}

fn compare(a: &EnrichedSubscription, b: &EnrichedSubscription, field: SortField) -> Ordering {
    match field {
        SortField::Name => a
            .group_name()
            .to_lowercase()
            .cmp(&b.group_name().to_lowercase())
            .then_with(|| a.group_name().cmp(b.group_name())),
        SortField::Date => a.subscription.start_date.cmp(&b.subscription.start_date),
        SortField::Schools => a.schools_count.cmp(&b.schools_count),
        SortField::Users => a.users_count.cmp(&b.users_count),
    }
}

/// 絞り込みと並び替えを行う
///
/// 並び替えは安定ソートで、キーが等しい要素は入力順を保つ。
pub fn process<'a>(
    items: &'a [EnrichedSubscription],
    state: &QueryState,
) -> Vec<&'a EnrichedSubscription> {
    let needle = state.search_query.to_lowercase();

    let mut processed: Vec<&EnrichedSubscription> = items
        .iter()
        .filter(|item| matches_search(item, &needle))
        .filter(|item| state.status_filter.matches(item.status()))
        .collect();

    processed.sort_by(|a, b| {
        let ordering = compare(a, b, state.sort_field);
        match state.sort_order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
    processed
}

/// 総ページ数（件数が0なら0）
pub fn total_pages(count: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 0;
    }
    count.div_ceil(page_size)
}

/// 指定ページの要素を切り出す
///
/// 範囲外のページは空になる
pub fn paginate<T: Clone>(items: &[T], page: usize, page_size: usize) -> Vec<T> {
    if page == 0 || page_size == 0 {
        return Vec::new();
    }
    let start = (page - 1).saturating_mul(page_size);
    items.iter().skip(start).take(page_size).cloned().collect()
}
