use super::models::EnrichedSubscription;
use super::query::{paginate, process, total_pages, QueryState};
use super::selection::SelectionSet;
use crate::shared::config::{EnvironmentConfig, DEFAULT_PAGE_SIZE};

/// 一覧画面の状態
///
/// 表示条件と選択状態を保持し、一覧を受け取って表示用の派生値を返す。
/// 一覧そのものはキャッシュが持ち、ここでは保持しない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionListView {
    pub query: QueryState,
    pub selection: SelectionSet,
    page_size: usize,
}

impl Default for SubscriptionListView {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl SubscriptionListView {
    pub fn new(page_size: usize) -> Self {
        Self {
            query: QueryState::new(),
            selection: SelectionSet::new(),
            page_size: page_size.max(1),
        }
    }

    pub fn from_config(config: &EnvironmentConfig) -> Self {
        Self::new(config.page_size)
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// 絞り込み・並び替え後の一覧（ページング前）
    pub fn processed_subscriptions<'a>(
        &self,
        items: &'a [EnrichedSubscription],
    ) -> Vec<&'a EnrichedSubscription> {
        process(items, &self.query)
    }

    /// 現在のページに表示する一覧
    pub fn paginated_subscriptions<'a>(
        &self,
        items: &'a [EnrichedSubscription],
    ) -> Vec<&'a EnrichedSubscription> {
        paginate(&self.processed_subscriptions(items), self.query.page(), self.page_size)
    }

    pub fn total_pages(&self, items: &[EnrichedSubscription]) -> usize {
        total_pages(self.processed_subscriptions(items).len(), self.page_size)
    }

    pub fn go_to_page(&mut self, page: usize, items: &[EnrichedSubscription]) -> usize {
        let pages = self.total_pages(items);
        self.query.go_to_page(page, pages)
    }

    /// 絞り込み後の一覧をすべて選択する
    pub fn select_all(&mut self, items: &[EnrichedSubscription]) {
        let visible = process(items, &self.query);
        self.selection.select_all(visible);
    }

    pub fn is_all_selected(&self, items: &[EnrichedSubscription]) -> bool {
        self.selection
            .is_all_selected(self.processed_subscriptions(items))
    }
}
