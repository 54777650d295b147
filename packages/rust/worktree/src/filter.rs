//! Item inclusion filters.
//!
//! All criteria are case-insensitive and combined with AND: an item must
//! satisfy every configured criterion to be kept. An unconfigured criterion
//! matches everything.

use wikiharvest_shared::{FiltersConfig, Item};

/// Compiled inclusion filter for work-tree construction.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    /// Keep items carrying at least one of these labels.
    labels: Vec<String>,
    /// Keep items whose title contains this substring.
    title_contains: Option<String>,
    /// Keep items of exactly this type.
    item_type: Option<String>,
}

impl ItemFilter {
    /// Compile a filter from config, lowercasing every criterion once.
    pub fn from_config(config: &FiltersConfig) -> Self {
        Self {
            labels: config.labels.iter().map(|l| l.to_lowercase()).collect(),
            title_contains: config.title_contains.as_ref().map(|t| t.to_lowercase()),
            item_type: config.item_type.as_ref().map(|t| t.to_lowercase()),
        }
    }

    /// Whether no criteria are configured (every item matches).
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.title_contains.is_none() && self.item_type.is_none()
    }

    /// Whether `item` satisfies every configured criterion.
    pub fn matches(&self, item: &Item) -> bool {
        if !self.labels.is_empty() {
            let has_label = item
                .labels
                .iter()
                .any(|l| self.labels.contains(&l.to_lowercase()));
            if !has_label {
                return false;
            }
        }

        if let Some(needle) = &self.title_contains {
            if !item.title.to_lowercase().contains(needle) {
                return false;
            }
        }

        if let Some(wanted) = &self.item_type {
            match &item.item_type {
                Some(t) if t.to_lowercase() == *wanted => {}
                _ => return false,
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(title: &str, labels: &[&str], item_type: Option<&str>) -> Item {
        Item {
            id: "1".into(),
            title: title.into(),
            ancestors: vec![],
            labels: labels.iter().map(|l| l.to_string()).collect(),
            item_type: item_type.map(String::from),
            version: None,
            updated_by: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = ItemFilter::from_config(&FiltersConfig::default());
        assert!(filter.is_empty());
        assert!(filter.matches(&item("Anything", &[], None)));
    }

    #[test]
    fn label_filter_needs_one_intersection() {
        let config = FiltersConfig {
            labels: vec!["API".into(), "runbook".into()],
            ..Default::default()
        };
        let filter = ItemFilter::from_config(&config);

        assert!(filter.matches(&item("Doc", &["api", "draft"], None)));
        assert!(filter.matches(&item("Doc", &["RUNBOOK"], None)));
        assert!(!filter.matches(&item("Doc", &["design"], None)));
        assert!(!filter.matches(&item("Doc", &[], None)));
    }

    #[test]
    fn title_filter_is_case_insensitive_substring() {
        let config = FiltersConfig {
            title_contains: Some("Design".into()),
            ..Default::default()
        };
        let filter = ItemFilter::from_config(&config);

        assert!(filter.matches(&item("API design notes", &[], None)));
        assert!(!filter.matches(&item("Meeting minutes", &[], None)));
    }

    #[test]
    fn type_filter_is_exact() {
        let config = FiltersConfig {
            item_type: Some("page".into()),
            ..Default::default()
        };
        let filter = ItemFilter::from_config(&config);

        assert!(filter.matches(&item("Doc", &[], Some("Page"))));
        assert!(!filter.matches(&item("Doc", &[], Some("blogpost"))));
        assert!(!filter.matches(&item("Doc", &[], None)));
    }

    #[test]
    fn criteria_combine_with_and() {
        let config = FiltersConfig {
            labels: vec!["api".into()],
            title_contains: Some("guide".into()),
            item_type: None,
        };
        let filter = ItemFilter::from_config(&config);

        assert!(filter.matches(&item("API Guide", &["api"], None)));
        assert!(!filter.matches(&item("API Guide", &["draft"], None)));
        assert!(!filter.matches(&item("API Reference", &["api"], None)));
    }
}
