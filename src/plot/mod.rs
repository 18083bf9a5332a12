//! Figures of the report
//!
//! Every figure is drawn against a generic plotters backend; the output path
//! picks the backend: `.png` files are rasterised, anything else is SVG.
//! plotters is built without a font rasteriser, so bitmap figures carry the
//! geometry only and text goes to SVG output alone.

mod colormap;
mod dispersion;
mod heatmap;
mod ma;

pub use colormap::{mako, Colormap};
pub use dispersion::{plot_dispersions, DispersionPlot};
pub use heatmap::{plot_clustermap, ClusterHeatmap};
pub use ma::{plot_ma, MaPlot};

use std::fmt::Display;
use std::path::Path;

use plotters::coord::Shift;
use plotters::drawing::DrawingAreaErrorKind;
use plotters::prelude::*;

use crate::error::{DeError, Result};

pub(crate) type DrawResult<DB> = std::result::Result<(), DrawingAreaErrorKind<<DB as DrawingBackend>::ErrorType>>;

/// Something that can be drawn onto a drawing area
pub trait Figure {
    /// Width and height in pixels
    fn size(&self) -> (u32, u32);

    /// Draw onto `root`; text elements are drawn only when `labels` is set
    fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>, labels: bool) -> DrawResult<DB>;
}

fn plot_error(path: &Path, err: impl Display) -> DeError {
    DeError::PlotFailed {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

fn is_bitmap(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("png"))
}

/// Draw `figure` and write it to `path`
pub fn save_figure<F: Figure, P: AsRef<Path>>(figure: &F, path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    if is_bitmap(path) {
        let root = BitMapBackend::new(path, figure.size()).into_drawing_area();
        figure.draw(&root, false).map_err(|e| plot_error(path, e))?;
        root.present().map_err(|e| plot_error(path, e))?;
    } else {
        let root = SVGBackend::new(path, figure.size()).into_drawing_area();
        figure.draw(&root, true).map_err(|e| plot_error(path, e))?;
        root.present().map_err(|e| plot_error(path, e))?;
    }
    log::info!("Wrote {}", path.display());
    Ok(())
}

/// Bounds of the finite positive values, widened when degenerate
pub(crate) fn positive_range<'a>(values: impl Iterator<Item = &'a f64>) -> Option<(f64, f64)> {
    let (lo, hi) = values
        .filter(|v| v.is_finite() && **v > 0.0)
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return None;
    }
    if lo == hi {
        Some((lo / 2.0, hi * 2.0))
    } else {
        Some((lo / 1.2, hi * 1.2))
    }
}

/// Pixel radius of a scatter marker given its area in square points
pub(crate) fn marker_radius(area: u32) -> i32 {
    ((area as f64).sqrt() / 2.0 * 100.0 / 72.0).round().max(1.0) as i32
}
