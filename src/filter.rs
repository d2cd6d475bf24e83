//! The filter language: a conjunction of optional predicates, used both to
//! match live events and to query the store.

use std::collections::HashMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::event::Event;

/// All present predicates must hold for an event to match; an empty filter
/// matches everything. `limit` is not a match predicate, it only bounds
/// backfill queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub ids: Vec<String>,
    pub authors: Vec<String>,
    pub kinds: Vec<i64>,
    pub since: i64,
    pub until: i64,
    pub limit: i64,
    pub tag_filters: HashMap<String, Vec<String>>,
}

impl Filter {
    pub fn matches(&self, event: &Event) -> bool {
        if !self.ids.is_empty() && !self.ids.contains(&event.id) {
            return false;
        }
        if !self.authors.is_empty() && !self.authors.contains(&event.pubkey) {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
            return false;
        }
        if self.since > 0 && event.created_at < self.since {
            return false;
        }
        if self.until > 0 && event.created_at > self.until {
            return false;
        }
        for (name, allowed) in &self.tag_filters {
            let hit = event
                .tags
                .iter()
                .any(|t| t.len() >= 2 && &t[0] == name && allowed.contains(&t[1]));
            if !hit {
                return false;
            }
        }
        true
    }

    /// Disjunction over a filter set. An empty set matches nothing.
    pub fn match_any(filters: &[Filter], event: &Event) -> bool {
        filters.iter().any(|f| f.matches(event))
    }

    /// The backfill bound for a filter set: the largest `limit`, with zero
    /// meaning unbounded.
    pub fn max_limit(filters: &[Filter]) -> i64 {
        filters.iter().map(|f| f.limit).max().unwrap_or(0)
    }
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if !self.ids.is_empty() {
            map.serialize_entry("ids", &self.ids)?;
        }
        if !self.authors.is_empty() {
            map.serialize_entry("authors", &self.authors)?;
        }
        if !self.kinds.is_empty() {
            map.serialize_entry("kinds", &self.kinds)?;
        }
        if self.since > 0 {
            map.serialize_entry("since", &self.since)?;
        }
        if self.until > 0 {
            map.serialize_entry("until", &self.until)?;
        }
        if self.limit > 0 {
            map.serialize_entry("limit", &self.limit)?;
        }
        for (name, values) in &self.tag_filters {
            map.serialize_entry(&format!("#{name}"), values)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FilterVisitor;

        impl<'de> Visitor<'de> for FilterVisitor {
            type Value = Filter;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a filter object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Filter, A::Error> {
                let mut filter = Filter::default();
                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "ids" => filter.ids = map.next_value()?,
                        "authors" => filter.authors = map.next_value()?,
                        "kinds" => filter.kinds = map.next_value()?,
                        "since" => filter.since = map.next_value()?,
                        "until" => filter.until = map.next_value()?,
                        "limit" => filter.limit = map.next_value()?,
                        other => {
                            if let Some(name) = other.strip_prefix('#') {
                                let values: Vec<String> = map.next_value()?;
                                filter.tag_filters.insert(name.to_string(), values);
                            } else {
                                map.next_value::<serde::de::IgnoredAny>()?;
                            }
                        }
                    }
                }
                Ok(filter)
            }
        }

        deserializer.deserialize_map(FilterVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> Event {
        Event {
            id: "a1".repeat(32),
            pubkey: "b2".repeat(32),
            created_at: 1000,
            kind: 1,
            tags: vec![
                vec!["q".into(), "foo".into()],
                vec!["q".into(), "bar".into()],
                vec!["orphan".into()],
            ],
            content: "hi".into(),
            sig: String::new(),
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(Filter::default().matches(&event()));
    }

    #[test]
    fn id_author_kind_membership() {
        let e = event();
        let mut f = Filter {
            ids: vec![e.id.clone()],
            ..Default::default()
        };
        assert!(f.matches(&e));
        f.ids = vec!["00".repeat(32)];
        assert!(!f.matches(&e));

        let f = Filter {
            authors: vec![e.pubkey.clone()],
            kinds: vec![1, 2],
            ..Default::default()
        };
        assert!(f.matches(&e));
        let f = Filter {
            kinds: vec![5],
            ..Default::default()
        };
        assert!(!f.matches(&e));
    }

    #[test]
    fn time_bounds_are_inclusive_and_zero_is_unset() {
        let e = event();
        let f = Filter {
            since: 1000,
            until: 1000,
            ..Default::default()
        };
        assert!(f.matches(&e));
        let f = Filter {
            since: 1001,
            ..Default::default()
        };
        assert!(!f.matches(&e));
        let f = Filter {
            until: 999,
            ..Default::default()
        };
        assert!(!f.matches(&e));
        // zero bounds are "no constraint", not "created_at <= 0"
        assert!(Filter::default().matches(&e));
    }

    #[test]
    fn tag_filters_need_one_allowed_value_per_name() {
        let e = event();
        let mut f = Filter::default();
        f.tag_filters.insert("q".into(), vec!["bar".into()]);
        assert!(f.matches(&e));

        let mut f = Filter::default();
        f.tag_filters.insert("q".into(), vec!["baz".into()]);
        assert!(!f.matches(&e));

        // a name the event has no tag for fails the whole filter
        let mut f = Filter::default();
        f.tag_filters.insert("p".into(), vec!["bar".into()]);
        assert!(!f.matches(&e));

        // tags shorter than two entries never satisfy a tag filter
        let mut f = Filter::default();
        f.tag_filters.insert("orphan".into(), vec!["".into()]);
        assert!(!f.matches(&e));
    }

    #[test]
    fn match_any_is_a_disjunction() {
        let e = event();
        let miss = Filter {
            kinds: vec![5],
            ..Default::default()
        };
        let hit = Filter {
            ids: vec![e.id.clone()],
            ..Default::default()
        };
        assert!(Filter::match_any(&[miss.clone(), hit], &e));
        assert!(!Filter::match_any(&[miss], &e));
        assert!(!Filter::match_any(&[], &e));
    }

    #[test]
    fn empty_filter_encodes_as_empty_object() {
        let json = serde_json::to_string(&Filter::default()).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn json_round_trip() {
        let mut f = Filter {
            ids: vec!["ff".repeat(32)],
            kinds: vec![1, 5],
            since: 10,
            limit: 50,
            ..Default::default()
        };
        f.tag_filters.insert("e".into(), vec!["x".into(), "y".into()]);
        let json = serde_json::to_string(&f).unwrap();
        assert!(json.contains("\"#e\""));
        assert!(!json.contains("until"));
        let back: Filter = serde_json::from_str(&json).unwrap();
        assert_eq!(back, f);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let f: Filter = serde_json::from_str(r#"{"kinds":[1],"search":"zap"}"#).unwrap();
        assert_eq!(f.kinds, vec![1]);
        assert!(f.tag_filters.is_empty());
    }

    #[test]
    fn max_limit_over_filters() {
        let filters = vec![
            Filter {
                limit: 10,
                ..Default::default()
            },
            Filter::default(),
            Filter {
                limit: 25,
                ..Default::default()
            },
        ];
        assert_eq!(Filter::max_limit(&filters), 25);
        assert_eq!(Filter::max_limit(&[]), 0);
    }
}
