//! Dispersion diagnostic: gene-wise, fitted and final estimates against mean
//! normalized count on log-log axes

use std::path::Path;

use plotters::coord::Shift;
use plotters::prelude::*;

use super::{positive_range, save_figure, DrawResult, Figure};
use crate::data::DeseqDataSet;
use crate::error::{DeError, Result};

/// Point series of the dispersion plot, one entry per gene
#[derive(Debug, Clone)]
pub struct DispersionPlot {
    pub base_means: Vec<f64>,
    pub gene_wise: Vec<f64>,
    pub fitted: Vec<f64>,
    pub final_estimates: Vec<f64>,
}

impl DispersionPlot {
    pub fn from_dataset(dds: &DeseqDataSet) -> Result<Self> {
        let missing = |what: &str| DeError::InvalidInput {
            reason: format!("{} required for the dispersion plot", what),
        };
        Ok(Self {
            base_means: dds.base_means().ok_or_else(|| missing("size factors"))?,
            gene_wise: dds.gene_dispersions().ok_or_else(|| missing("gene-wise dispersions"))?.to_vec(),
            fitted: dds.trended_dispersions().ok_or_else(|| missing("trended dispersions"))?.to_vec(),
            final_estimates: dds.dispersions().ok_or_else(|| missing("MAP dispersions"))?.to_vec(),
        })
    }

    fn points<'a>(&'a self, values: &'a [f64]) -> impl Iterator<Item = (f64, f64)> + 'a {
        self.base_means
            .iter()
            .zip(values)
            .filter(|(m, d)| m.is_finite() && **m > 0.0 && d.is_finite() && **d > 0.0)
            .map(|(&m, &d)| (m, d))
    }
}

impl Figure for DispersionPlot {
    fn size(&self) -> (u32, u32) {
        (800, 600)
    }

    fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>, labels: bool) -> DrawResult<DB> {
        root.fill(&WHITE)?;
        let (x_lo, x_hi) = positive_range(self.base_means.iter()).unwrap_or((0.1, 10.0));
        let all = self.gene_wise.iter().chain(&self.fitted).chain(&self.final_estimates);
        let (y_lo, y_hi) = positive_range(all).unwrap_or((1e-3, 1.0));

        let mut chart = ChartBuilder::on(root)
            .margin(20)
            .x_label_area_size(45)
            .y_label_area_size(60)
            .build_cartesian_2d((x_lo..x_hi).log_scale(), (y_lo..y_hi).log_scale())?;
        if labels {
            chart
                .configure_mesh()
                .x_desc("mean of normalized counts")
                .y_desc("dispersion")
                .draw()?;
        } else {
            let frame = Rectangle::new([(x_lo, y_lo), (x_hi, y_hi)], BLACK.stroke_width(1));
            chart.draw_series(std::iter::once(frame))?;
        }

        let series = [
            (&self.gene_wise, BLACK, "gene-wise estimate"),
            (&self.final_estimates, BLUE, "final estimate"),
            (&self.fitted, RED, "fitted trend"),
        ];
        for (values, color, label) in series {
            chart
                .draw_series(self.points(values).map(|p| Circle::new(p, 2, color.mix(0.6).filled())))?
                .label(label)
                .legend(move |(x, y)| Circle::new((x, y), 3, color.filled()));
        }
        if labels {
            chart
                .configure_series_labels()
                .background_style(WHITE.mix(0.8))
                .border_style(BLACK)
                .position(SeriesLabelPosition::LowerLeft)
                .draw()?;
        }
        Ok(())
    }
}

/// Draw the dispersion plot of a fitted dataset
pub fn plot_dispersions<P: AsRef<Path>>(dds: &DeseqDataSet, path: P) -> Result<()> {
    save_figure(&DispersionPlot::from_dataset(dds)?, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispersion::{estimate_dispersions, DispersionParams};
    use crate::normalization::{estimate_size_factors, SizeFactorMethod};
    use crate::test_support::simulated;
    use tempfile::tempdir;

    #[test]
    fn test_requires_dispersions() {
        let mut dds = simulated(30, 3);
        estimate_size_factors(&mut dds, SizeFactorMethod::Ratio).unwrap();
        assert!(DispersionPlot::from_dataset(&dds).is_err());
    }

    #[test]
    fn test_writes_svg_and_png() {
        let mut dds = simulated(60, 3);
        estimate_size_factors(&mut dds, SizeFactorMethod::Ratio).unwrap();
        estimate_dispersions(&mut dds, &DispersionParams::default()).unwrap();
        let dir = tempdir().unwrap();
        for name in ["disp.svg", "disp.png"] {
            let path = dir.path().join(name);
            plot_dispersions(&dds, &path).unwrap();
            assert!(std::fs::metadata(&path).unwrap().len() > 0);
        }
        let png = std::fs::read(dir.path().join("disp.png")).unwrap();
        assert_eq!(&png[1..4], b"PNG");
        let svg = std::fs::read_to_string(dir.path().join("disp.svg")).unwrap();
        assert!(svg.contains("fitted trend"));
    }
}
