use super::models::EnrichedSubscription;
use std::collections::HashSet;

/// 選択中のサブスクリプションID
///
/// 絞り込みやページングとは独立して保持する。「すべて選択」系の操作は
/// 呼び出し側が渡す絞り込み済みの一覧に対して行う。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    ids: HashSet<String>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 選択状態を反転する
    ///
    /// # 戻り値
    /// 反転後に選択されていれば `true`
    pub fn toggle(&mut self, id: &str) -> bool {
        if self.ids.remove(id) {
            false
        } else {
            self.ids.insert(id.to_string());
            true
        }
    }

    pub fn add(&mut self, id: &str) {
        self.ids.insert(id.to_string());
    }

    pub fn remove(&mut self, id: &str) {
        self.ids.remove(id);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// 表示中の一覧のIDだけを選択した状態にする
    pub fn select_all<'a, I>(&mut self, visible: I)
    where
        I: IntoIterator<Item = &'a EnrichedSubscription>,
    {
        self.ids = visible.into_iter().map(|s| s.id().to_string()).collect();
    }

    pub fn deselect_all(&mut self) {
        self.ids.clear();
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// 表示中の一覧がすべて選択されているか
    ///
    /// 一覧が空なら `false`。件数ではなく各IDの所属で判定する。
    pub fn is_all_selected<'a, I>(&self, visible: I) -> bool
    where
        I: IntoIterator<Item = &'a EnrichedSubscription>,
    {
        let mut any = false;
        for item in visible {
            if !self.ids.contains(item.id()) {
                return false;
            }
            any = true;
        }
        any
    }

    /// 一覧のうち選択されているものを返す（一括操作用）
    pub fn selected_in<'a, I>(&self, items: I) -> Vec<&'a EnrichedSubscription>
    where
        I: IntoIterator<Item = &'a EnrichedSubscription>,
    {
        items
            .into_iter()
            .filter(|item| self.ids.contains(item.id()))
            .collect()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::subscriptions::billing::BillingPeriod;
    use crate::features::subscriptions::models::{
        ExpiryStatus, PlanSummary, SchoolGroupSummary, Subscription, SubscriptionStatus,
    };
    use crate::features::subscriptions::query::{process, QueryState, StatusFilter};
    use chrono::{TimeZone, Utc};

    fn item(id: &str, name: &str, status: SubscriptionStatus) -> EnrichedSubscription {
        let date = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();
        EnrichedSubscription {
            subscription: Subscription {
                id: id.to_string(),
                school_group: SchoolGroupSummary {
                    id: format!("grp-{id}"),
                    name: name.to_string(),
                    logo: None,
                    region: None,
                },
                plan: PlanSummary {
                    id: "plan-1".to_string(),
                    name: "Standard".to_string(),
                    price: 0.0,
                    currency: "XAF".to_string(),
                    billing_period: BillingPeriod::Monthly,
                },
                status,
                start_date: date,
                end_date: None,
                auto_renew: true,
                created_at: date,
            },
            schools_count: 1,
            users_count: 1,
            students_count: 1,
            days_until_expiry: None,
            expiry_status: ExpiryStatus::None,
            mrr_contribution: 0.0,
        }
    }

    fn items() -> Vec<EnrichedSubscription> {
        vec![
            item("a", "Lycée Nord", SubscriptionStatus::Active),
            item("b", "Lycée Sud", SubscriptionStatus::Trial),
            item("c", "Collège Est", SubscriptionStatus::Active),
        ]
    }

    #[test]
    fn test_toggle() {
        let mut selection = SelectionSet::new();
        assert!(selection.toggle("a"));
        assert!(selection.contains("a"));
        assert!(!selection.toggle("a"));
        assert!(selection.is_empty());
    }

    #[test]
    fn test_selection_survives_filter_change() {
        let items = items();
        let mut state = QueryState::new();
        let mut selection = SelectionSet::new();
        selection.add("b");

        state.set_status_filter(StatusFilter::Only(SubscriptionStatus::Active));
        let narrowed = process(&items, &state);
        assert!(narrowed.iter().all(|s| s.id() != "b"));
        assert!(selection.contains("b"));

        state.set_status_filter(StatusFilter::All);
        let widened = process(&items, &state);
        let selected = selection.selected_in(widened.iter().copied());
        let shown: Vec<&str> = selected.iter().map(|s| s.id()).collect();
        assert_eq!(shown, vec!["b"]);
    }

    #[test]
    fn test_select_all_replaces_with_visible() {
        let items = items();
        let mut state = QueryState::new();
        let mut selection = SelectionSet::new();
        selection.add("c");

        state.set_search_query("lycée");
        let visible = process(&items, &state);
        selection.select_all(visible.iter().copied());

        assert_eq!(selection.len(), 2);
        assert!(!selection.contains("c"));
        assert!(selection.is_all_selected(visible.iter().copied()));
    }

    #[test]
    fn test_all_selected_checks_membership() {
        let items = items();
        let mut selection = SelectionSet::new();
        selection.add("a");
        selection.add("x");

        // 件数は一致するが中身が異なる
        assert!(!selection.is_all_selected(&items[..2]));
        assert!(!selection.is_all_selected(&items[..0]));

        selection.deselect_all();
        selection.add("a");
        selection.add("b");
        assert!(selection.is_all_selected(&items[..2]));
    }
}
