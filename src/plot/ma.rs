//! MA plot: log2 fold change against mean expression

use std::path::Path;

use plotters::coord::Shift;
use plotters::prelude::*;

use super::{marker_radius, positive_range, save_figure, DrawResult, Figure};
use crate::error::Result;
use crate::io::DeResults;

#[derive(Debug, Clone)]
pub struct MaPlot {
    pub base_means: Vec<f64>,
    pub log2_fold_changes: Vec<f64>,
    /// Whether each gene passes `padj < alpha`
    pub significant: Vec<bool>,
    /// Marker area in square points
    pub marker_size: u32,
}

impl MaPlot {
    pub fn from_results(results: &DeResults, alpha: f64, marker_size: u32) -> Self {
        Self {
            base_means: results.base_means.clone(),
            log2_fold_changes: results.log2_fold_changes.clone(),
            significant: (0..results.n_genes()).map(|i| results.is_significant(i, alpha)).collect(),
            marker_size,
        }
    }

    fn points(&self, significant: bool) -> impl Iterator<Item = (f64, f64)> + '_ {
        (0..self.base_means.len())
            .filter(move |&i| self.significant[i] == significant)
            .map(|i| (self.base_means[i], self.log2_fold_changes[i]))
            .filter(|(m, l)| m.is_finite() && *m > 0.0 && l.is_finite())
    }
}

impl Figure for MaPlot {
    fn size(&self) -> (u32, u32) {
        (800, 600)
    }

    fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>, labels: bool) -> DrawResult<DB> {
        root.fill(&WHITE)?;
        let (x_lo, x_hi) = positive_range(self.base_means.iter()).unwrap_or((0.1, 10.0));
        let y_max = self
            .log2_fold_changes
            .iter()
            .filter(|l| l.is_finite())
            .fold(1.0_f64, |acc, l| acc.max(l.abs()))
            * 1.1;

        let mut chart = ChartBuilder::on(root)
            .margin(20)
            .x_label_area_size(45)
            .y_label_area_size(60)
            .build_cartesian_2d((x_lo..x_hi).log_scale(), -y_max..y_max)?;
        if labels {
            chart
                .configure_mesh()
                .x_desc("mean of normalized counts")
                .y_desc("log2 fold change")
                .draw()?;
        } else {
            let frame = Rectangle::new([(x_lo, -y_max), (x_hi, y_max)], BLACK.stroke_width(1));
            chart.draw_series(std::iter::once(frame))?;
        }

        let radius = marker_radius(self.marker_size);
        chart.draw_series(self.points(false).map(|p| Circle::new(p, radius, BLACK.mix(0.5).filled())))?;
        chart.draw_series(self.points(true).map(|p| Circle::new(p, radius, RED.mix(0.7).filled())))?;
        chart.draw_series(LineSeries::new(vec![(x_lo, 0.0), (x_hi, 0.0)], RED.stroke_width(1)))?;
        Ok(())
    }
}

/// MA plot of a results table; genes with `padj < alpha` are red
pub fn plot_ma<P: AsRef<Path>>(results: &DeResults, alpha: f64, marker_size: u32, path: P) -> Result<()> {
    save_figure(&MaPlot::from_results(results, alpha, marker_size), path)
}
