//! Reshapes aggregate rows into chart series.
//!
//! Labels coming back from the database may differ only by stray whitespace
//! (`"5th"` vs `"5th "`), so every grouping here keys on the trimmed label and
//! keeps the first-seen order of labels.

use std::collections::HashMap;
use std::ops::AddAssign;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryValue<T> {
    pub name: String,
    pub value: T,
}

/// Sums values of labels that are equal after trimming.
pub fn merge_categories<I, T>(pairs: I) -> Vec<CategoryValue<T>>
where
    I: IntoIterator<Item = (String, T)>,
    T: AddAssign + Copy,
{
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<CategoryValue<T>> = Vec::new();

    for (label, value) in pairs {
        let name = label.trim().to_string();
        match index.get(&name) {
            Some(&slot) => merged[slot].value += value,
            None => {
                index.insert(name.clone(), merged.len());
                merged.push(CategoryValue { name, value });
            }
        }
    }

    merged
}

/// Recombines per-label partial averages into one mean per trimmed label.
///
/// Each partial average counts as a single observation, regardless of how
/// many rows produced it. Non-finite inputs are skipped.
pub fn average_by_category<I>(pairs: I) -> Vec<CategoryValue<f64>>
where
    I: IntoIterator<Item = (String, f64)>,
{
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut totals: Vec<(String, f64, u32)> = Vec::new();

    for (label, value) in pairs {
        if !value.is_finite() {
            continue;
        }
        let name = label.trim().to_string();
        match index.get(&name) {
            Some(&slot) => {
                totals[slot].1 += value;
                totals[slot].2 += 1;
            }
            None => {
                index.insert(name.clone(), totals.len());
                totals.push((name, value, 1));
            }
        }
    }

    totals
        .into_iter()
        .map(|(name, sum, count)| CategoryValue {
            name,
            value: sum / f64::from(count),
        })
        .collect()
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramSpec {
    pub floor: f64,
    pub width: f64,
    pub bins: usize,
}

impl HistogramSpec {
    /// CGPA distribution: 40 bins of 0.05 from 2.00 up to (not including) 4.00.
    pub const CGPA: HistogramSpec = HistogramSpec {
        floor: 2.0,
        width: 0.05,
        bins: 40,
    };

    /// `bins + 1` ascending edges. Edges are snapped to 1e-9 so that an input
    /// written as `2.05` compares equal to the edge labelled `2.05`.
    pub fn edges(&self) -> Vec<f64> {
        (0..=self.bins)
            .map(|i| ((self.floor + i as f64 * self.width) * 1e9).round() / 1e9)
            .collect()
    }

    pub fn labels(&self) -> Vec<String> {
        self.edges()
            .into_iter()
            .take(self.bins)
            .map(|edge| format!("{edge:.2}"))
            .collect()
    }

    pub fn bin_of(&self, edges: &[f64], value: f64) -> Option<usize> {
        let (first, last) = (*edges.first()?, *edges.last()?);
        if !(value >= first && value < last) {
            return None;
        }
        Some(edges.partition_point(|edge| *edge <= value) - 1)
    }

    pub fn count(&self, values: &[f64]) -> Vec<u32> {
        let edges = self.edges();
        let mut counts = vec![0u32; self.bins];
        for &value in values {
            if let Some(bin) = self.bin_of(&edges, value) {
                counts[bin] += 1;
            }
        }
        counts
    }
}

/// One histogram per category, in input order.
pub fn histogram_by_category<'a, I>(
    spec: &HistogramSpec,
    categories: I,
) -> Vec<CategoryValue<Vec<u32>>>
where
    I: IntoIterator<Item = (&'a str, &'a [f64])>,
{
    categories
        .into_iter()
        .map(|(name, values)| CategoryValue {
            name: name.to_string(),
            value: spec.count(values),
        })
        .collect()
}
