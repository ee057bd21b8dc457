//! Keyed chart collection.

use std::collections::HashMap;

use super::types::{Chart, ChartError};

/// Charts owned by one collector instance.
///
/// Lookups are by chart ID; iteration is ordered by `(priority, insertion)`
/// so announcements come out in a stable order.
#[derive(Debug, Clone, Default)]
pub struct ChartSet {
    charts: HashMap<String, (u64, Chart)>,
    next_seq: u64,
}

impl ChartSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chart after validating it.
    ///
    /// # Errors
    /// Returns the validation error, or [`ChartError::Duplicate`] when the
    /// ID is already present.
    pub fn add(&mut self, chart: Chart) -> Result<(), ChartError> {
        chart.validate()?;
        if self.charts.contains_key(&chart.id) {
            return Err(ChartError::Duplicate(chart.id));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.charts.insert(chart.id.clone(), (seq, chart));
        Ok(())
    }

    /// Add every chart, stopping at the first failure.
    pub fn add_all(&mut self, charts: impl IntoIterator<Item = Chart>) -> Result<(), ChartError> {
        for chart in charts {
            self.add(chart)?;
        }
        Ok(())
    }

    pub fn has(&self, id: &str) -> bool {
        self.charts.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Chart> {
        self.charts.get(id).map(|(_, c)| c)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Chart> {
        self.charts.get_mut(id).map(|(_, c)| c)
    }

    pub fn remove(&mut self, id: &str) -> Option<Chart> {
        self.charts.remove(id).map(|(_, c)| c)
    }

    pub fn len(&self) -> usize {
        self.charts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.charts.is_empty()
    }

    /// Charts in announcement order.
    pub fn iter(&self) -> impl Iterator<Item = &Chart> {
        let mut ordered: Vec<&(u64, Chart)> = self.charts.values().collect();
        ordered.sort_by_key(|(seq, c)| (c.priority, *seq));
        ordered.into_iter().map(|(_, c)| c)
    }

    /// Chart IDs in announcement order.
    pub fn ids(&self) -> Vec<String> {
        self.iter().map(|c| c.id.clone()).collect()
    }

    /// Validate every chart, returning the first failure.
    pub fn validate(&self) -> Result<(), ChartError> {
        self.iter().try_for_each(Chart::validate)
    }
}
