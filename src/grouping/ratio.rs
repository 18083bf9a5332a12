//! Between-group expression ratios

use super::partition::SamplePartition;
use super::table::ExpressionTable;

/// Per gene `max(mean_a / mean_b, mean_b / mean_a)`.
///
/// A zero mean in one group gives an infinite ratio; zero in both gives NaN.
pub fn group_ratios(table: &ExpressionTable, partition: &SamplePartition) -> Vec<f64> {
    let mean_a = table.row_means(&partition.group_a);
    let mean_b = table.row_means(&partition.group_b);
    mean_a
        .iter()
        .zip(&mean_b)
        .map(|(&a, &b)| {
            let (a_over_b, b_over_a) = (a / b, b / a);
            if a_over_b >= b_over_a {
                a_over_b
            } else {
                b_over_a
            }
        })
        .collect()
}

/// Table rows paired with their ratios
#[derive(Debug, Clone)]
pub struct RatioTable {
    pub table: ExpressionTable,
    pub ratios: Vec<f64>,
    /// Gene ids removed for an infinite ratio
    pub dropped: Vec<String>,
}

impl RatioTable {
    pub fn new(table: ExpressionTable, ratios: Vec<f64>) -> Self {
        Self {
            table,
            ratios,
            dropped: Vec::new(),
        }
    }

    /// Remove genes with an infinite ratio from the table and the ratio list
    /// together, matching rows by gene id.
    pub fn drop_infinite(self) -> Self {
        let Self { table, ratios, mut dropped } = self;
        let mut keep = Vec::with_capacity(ratios.len());
        for (i, r) in ratios.iter().enumerate() {
            if r.is_infinite() {
                dropped.push(table.gene_ids()[i].clone());
            } else {
                keep.push(i);
            }
        }
        if !dropped.is_empty() {
            log::info!("Dropped {} genes with a zero mean in one group", dropped.len());
        }
        Self {
            table: table.select_rows(&keep),
            ratios: keep.iter().map(|&i| ratios[i]).collect(),
            dropped,
        }
    }

    /// Row order by ascending ratio, NaN last
    pub fn ratio_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.ratios.len()).collect();
        order.sort_by(|&a, &b| {
            let (ra, rb) = (self.ratios[a], self.ratios[b]);
            match (ra.is_nan(), rb.is_nan()) {
                (false, false) => ra.total_cmp(&rb),
                (a_nan, b_nan) => a_nan.cmp(&b_nan),
            }
        });
        order
    }

    pub fn sorted_by_ratio(self) -> Self {
        let order = self.ratio_order();
        Self {
            table: self.table.select_rows(&order),
            ratios: order.iter().map(|&i| self.ratios[i]).collect(),
            dropped: self.dropped,
        }
    }
}
