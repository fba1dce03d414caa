use std::{collections::BTreeMap, sync::Arc};

/// An immutable, cheaply cloneable set of object labels.
#[derive(Clone, Debug, Eq, Default, Hash)]
pub struct Labels(Arc<Map>);

pub type Map = BTreeMap<String, String>;

// === Labels ===

impl Labels {
    /// Returns true when every `match_labels` entry is present with the same
    /// value. An empty selector matches nothing: policies that select by label
    /// must name at least one label.
    pub fn selected_by(&self, match_labels: &Map) -> bool {
        if match_labels.is_empty() {
            return false;
        }
        match_labels
            .iter()
            .all(|(k, v)| self.0.get(k).map(|l| l == v).unwrap_or(false))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

impl From<Map> for Labels {
    #[inline]
    fn from(labels: Map) -> Self {
        Self(Arc::new(labels))
    }
}

impl From<Option<Map>> for Labels {
    #[inline]
    fn from(labels: Option<Map>) -> Self {
        labels.unwrap_or_default().into()
    }
}

impl AsRef<Map> for Labels {
    #[inline]
    fn as_ref(&self) -> &Map {
        self.0.as_ref()
    }
}

impl<T: AsRef<Map>> std::cmp::PartialEq<T> for Labels {
    #[inline]
    fn eq(&self, t: &T) -> bool {
        self.0.as_ref().eq(t.as_ref())
    }
}

impl std::iter::FromIterator<(String, String)> for Labels {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Labels {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn selected_by() {
        let labels = Labels::from_iter(vec![("app", "web"), ("tier", "frontend")]);
        for (selector, matches, msg) in [
            (Map::new(), false, "empty selector"),
            (btreemap! {"app".into() => "web".into()}, true, "subset"),
            (
                btreemap! {"app".into() => "web".into(), "tier".into() => "frontend".into()},
                true,
                "exact",
            ),
            (btreemap! {"app".into() => "api".into()}, false, "value mismatch"),
            (btreemap! {"zone".into() => "a".into()}, false, "missing key"),
        ] {
            assert_eq!(labels.selected_by(&selector), matches, "{msg}");
        }
    }
}
