use super::{Indicator, PriceSource};
use crate::engine::Bar;
use std::collections::VecDeque;

/// Rate of change: percent move of the price source over `period` bars.
///
/// Compares the current value against the one `period` bars ago, so the
/// first `period` bars yield `None`.
#[derive(Debug, Clone)]
pub struct Roc {
    name: String,
    period: usize,
    source: PriceSource,
    window: VecDeque<f64>,
}

impl Roc {
    /// Creates a ROC over `period` bars of the given price source.
    /// A zero period never becomes ready.
    pub fn new(period: usize, source: PriceSource) -> Self {
        Self {
            name: format!("roc_{period}_{}", source.label()),
            period,
            source,
            window: VecDeque::with_capacity(period + 1),
        }
    }
}

impl Indicator for Roc {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, bar: &Bar) -> Option<f64> {
        if self.period == 0 {
            return None;
        }
        self.window.push_back(self.source.extract(bar));
        if self.window.len() > self.period + 1 {
            self.window.pop_front();
        }
        if self.window.len() < self.period + 1 {
            return None;
        }
        let first = self.window.front()?;
        let last = self.window.back()?;
        Some((last / first - 1.0) * 100.0)
    }
}

#[cfg(test)]
use super::close_bar;

#[cfg(test)]
#[test]
fn needs_period_plus_one_bars() {
    let mut roc = Roc::new(2, PriceSource::Close);
    assert_eq!(roc.name(), "roc_2_close");

    assert_eq!(roc.update(&close_bar(0, 100.0)), None);
    assert_eq!(roc.update(&close_bar(1, 105.0)), None);
    assert_eq!(roc.update(&close_bar(2, 125.0)), Some(25.0));
}

#[cfg(test)]
#[test]
fn slides_over_the_window() {
    let mut roc = Roc::new(1, PriceSource::Close);
    assert_eq!(roc.update(&close_bar(0, 64.0)), None);
    assert_eq!(roc.update(&close_bar(1, 80.0)), Some(25.0));
    assert_eq!(roc.update(&close_bar(2, 40.0)), Some(-50.0));
    assert_eq!(roc.update(&close_bar(3, 40.0)), Some(0.0));
}

#[cfg(test)]
#[test]
fn flat_input_reads_zero() {
    let mut roc = Roc::new(3, PriceSource::Close);
    let mut last = None;
    for minute in 0..8 {
        last = roc.update(&close_bar(minute, 250.0));
    }
    assert_eq!(last, Some(0.0));
}
