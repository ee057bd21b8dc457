//! Chart-set diffing between ticks.

use std::collections::BTreeMap;

use crate::chart::{Chart, ChartSet};

/// Charts announced so far, by ID.
pub(crate) type Snapshot = BTreeMap<String, Chart>;

/// What changed since the last announced snapshot.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct ChartDiff {
    /// Charts never announced before.
    pub created: Vec<Chart>,
    /// Known charts whose definition changed. Dimensions that vanished are
    /// carried with the `obsolete` option so readers see them end.
    pub updated: Vec<Chart>,
    /// Charts that vanished or were marked obsolete by the collector.
    pub removed: Vec<String>,
}

impl ChartDiff {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Live charts of a set, keyed by ID.
pub(crate) fn snapshot(charts: &ChartSet) -> Snapshot {
    charts
        .iter()
        .filter(|c| !c.opts.obsolete)
        .map(|c| (c.id.clone(), c.clone()))
        .collect()
}

pub(crate) fn diff(prev: &Snapshot, current: &ChartSet) -> ChartDiff {
    let mut out = ChartDiff::default();

    for chart in current.iter() {
        if chart.opts.obsolete {
            continue;
        }
        match prev.get(&chart.id) {
            None => out.created.push(chart.clone()),
            Some(old) if old != chart => {
                let mut announced = chart.clone();
                for dim in &old.dims {
                    if !chart.has_dim(&dim.id) {
                        let mut gone = dim.clone();
                        gone.opts.obsolete = true;
                        announced.dims.push(gone);
                    }
                }
                out.updated.push(announced);
            }
            Some(_) => {}
        }
    }

    for id in prev.keys() {
        let live = current.get(id).is_some_and(|c| !c.opts.obsolete);
        if !live {
            out.removed.push(id.clone());
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::{ChartOpts, Dim};

    fn chart(id: &str, dims: &[&str]) -> Chart {
        let mut chart = Chart::new(id, "Title", "units", "family", "test.chart");
        for d in dims {
            chart = chart.with_dim(Dim::new(*d));
        }
        chart
    }

    fn set(charts: Vec<Chart>) -> ChartSet {
        let mut set = ChartSet::new();
        set.add_all(charts).unwrap();
        set
    }

    #[test]
    fn test_first_diff_creates_everything() {
        let current = set(vec![chart("a", &["x"]), chart("b", &["y"])]);
        let d = diff(&Snapshot::new(), &current);
        assert_eq!(d.created.len(), 2);
        assert!(d.updated.is_empty() && d.removed.is_empty());
    }

    #[test]
    fn test_unchanged_set_is_empty_diff() {
        let current = set(vec![chart("a", &["x"])]);
        assert!(diff(&snapshot(&current), &current).is_empty());
    }

    #[test]
    fn test_dimension_changes_reannounce_chart() {
        let before = set(vec![chart("a", &["x", "y"])]);
        let after = set(vec![chart("a", &["x", "z"])]);
        let d = diff(&snapshot(&before), &after);

        assert_eq!(d.updated.len(), 1);
        let dims: Vec<(&str, bool)> = d.updated[0]
            .dims
            .iter()
            .map(|dim| (dim.id.as_str(), dim.opts.obsolete))
            .collect();
        assert_eq!(dims, vec![("x", false), ("z", false), ("y", true)]);
        assert!(d.removed.is_empty());
    }

    #[test]
    fn test_vanished_and_obsolete_charts_are_removed() {
        let before = set(vec![chart("a", &["x"]), chart("b", &["y"])]);
        let after = set(vec![chart("a", &["x"]).with_opts(ChartOpts {
            obsolete: true,
            ..Default::default()
        })]);
        let d = diff(&snapshot(&before), &after);
        assert_eq!(d.removed, vec!["a".to_string(), "b".to_string()]);
        assert!(d.created.is_empty());
        assert!(snapshot(&after).is_empty());
    }
}
