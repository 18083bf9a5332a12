//! Clustered heatmap with row and column dendrograms

use std::path::Path;

use plotters::coord::Shift;
use plotters::prelude::*;

use super::colormap::{mako, Colormap};
use super::{save_figure, DrawResult, Figure};
use crate::cluster::{average_linkage, Linkage};
use crate::error::{DeError, Result};
use crate::grouping::ExpressionTable;

/// Rows beyond this count get no tick labels
const MAX_ROW_LABELS: usize = 80;

const WIDTH: u32 = 1000;
const HEIGHT: u32 = 1000;
const DENDROGRAM: i32 = 150;
const GAP: i32 = 10;
const LABEL_SPACE: i32 = 120;

/// Heatmap whose rows and columns are both ordered by average-linkage
/// clustering of Euclidean distances
pub struct ClusterHeatmap {
    /// Table already permuted into dendrogram order
    table: ExpressionTable,
    rows: Linkage,
    columns: Linkage,
    colormap: Colormap,
}

impl ClusterHeatmap {
    pub fn new(table: &ExpressionTable) -> Result<Self> {
        if table.n_genes() == 0 || table.n_samples() == 0 {
            return Err(DeError::EmptyData {
                reason: format!("cannot cluster a {} x {} table", table.n_genes(), table.n_samples()),
            });
        }
        let rows = average_linkage(table.values().view());
        let columns = average_linkage(table.values().t());
        let ordered = table.select_rows(&rows.leaf_order()).select_columns(&columns.leaf_order());
        Ok(Self {
            table: ordered,
            rows,
            columns,
            colormap: mako(),
        })
    }

    pub fn table(&self) -> &ExpressionTable {
        &self.table
    }

    fn value_range(&self) -> (f64, f64) {
        let (lo, hi) = self
            .table
            .values()
            .iter()
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        if lo.is_finite() {
            (lo, hi)
        } else {
            (0.0, 1.0)
        }
    }
}

/// Pixel box of the heatmap cells
struct Grid {
    x0: i32,
    y0: i32,
    cell_w: f64,
    cell_h: f64,
}

impl Grid {
    fn x(&self, pos: f64) -> i32 {
        self.x0 + (pos * self.cell_w).round() as i32
    }

    fn y(&self, pos: f64) -> i32 {
        self.y0 + (pos * self.cell_h).round() as i32
    }
}

impl Figure for ClusterHeatmap {
    fn size(&self) -> (u32, u32) {
        (WIDTH, HEIGHT)
    }

    fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>, labels: bool) -> DrawResult<DB> {
        root.fill(&WHITE)?;
        let (n_rows, n_cols) = (self.table.n_genes(), self.table.n_samples());
        let x0 = GAP + DENDROGRAM + GAP;
        let y0 = GAP + DENDROGRAM + GAP;
        let grid = Grid {
            x0,
            y0,
            cell_w: (WIDTH as i32 - x0 - LABEL_SPACE) as f64 / n_cols as f64,
            cell_h: (HEIGHT as i32 - y0 - LABEL_SPACE) as f64 / n_rows as f64,
        };

        let (lo, hi) = self.value_range();
        let values = self.table.values();
        for r in 0..n_rows {
            let (top, bottom) = (grid.y(r as f64), grid.y((r + 1) as f64));
            for c in 0..n_cols {
                let color = self.colormap.scaled(values[[r, c]], lo, hi);
                root.draw(&Rectangle::new(
                    [(grid.x(c as f64), top), (grid.x((c + 1) as f64), bottom.max(top + 1))],
                    color.filled(),
                ))?;
            }
        }

        let font = ("sans-serif", 12).into_font();
        if labels {
            for (c, sample) in self.table.sample_ids().iter().enumerate() {
                let at = (grid.x(c as f64 + 0.5) - 6, grid.y(n_rows as f64) + 6);
                root.draw(&Text::new(
                    sample.clone(),
                    at,
                    font.clone().transform(FontTransform::Rotate90),
                ))?;
            }
        }
        if labels && n_rows <= MAX_ROW_LABELS {
            for (r, gene) in self.table.gene_ids().iter().enumerate() {
                let at = (grid.x(n_cols as f64) + 6, grid.y(r as f64 + 0.5) - 6);
                root.draw(&Text::new(gene.clone(), at, font.clone()))?;
            }
        }

        // Row dendrogram grows leftwards from the heatmap edge
        let row_scale = if self.rows.max_height() > 0.0 {
            DENDROGRAM as f64 / self.rows.max_height()
        } else {
            0.0
        };
        let row_x = |h: f64| x0 - GAP - (h * row_scale).round() as i32;
        for (lp, lh, rp, rh, h) in self.rows.links() {
            let path = vec![
                (row_x(lh), grid.y(lp)),
                (row_x(h), grid.y(lp)),
                (row_x(h), grid.y(rp)),
                (row_x(rh), grid.y(rp)),
            ];
            root.draw(&PathElement::new(path, BLACK.stroke_width(1)))?;
        }

        // Column dendrogram grows upwards
        let col_scale = if self.columns.max_height() > 0.0 {
            DENDROGRAM as f64 / self.columns.max_height()
        } else {
            0.0
        };
        let col_y = |h: f64| y0 - GAP - (h * col_scale).round() as i32;
        for (lp, lh, rp, rh, h) in self.columns.links() {
            let path = vec![
                (grid.x(lp), col_y(lh)),
                (grid.x(lp), col_y(h)),
                (grid.x(rp), col_y(h)),
                (grid.x(rp), col_y(rh)),
            ];
            root.draw(&PathElement::new(path, BLACK.stroke_width(1)))?;
        }

        // Colorbar in the top-left corner
        let (bar_x, bar_top, bar_bottom) = (GAP + 10, GAP + 10, GAP + DENDROGRAM - 10);
        let steps = bar_bottom - bar_top;
        for k in 0..steps {
            let t = 1.0 - k as f64 / steps as f64;
            root.draw(&Rectangle::new(
                [(bar_x, bar_top + k), (bar_x + 15, bar_top + k + 1)],
                self.colormap.at(t).filled(),
            ))?;
        }
        if labels {
            root.draw(&Text::new(format!("{:.1}", hi), (bar_x + 20, bar_top - 4), font.clone()))?;
            root.draw(&Text::new(format!("{:.1}", lo), (bar_x + 20, bar_bottom - 8), font))?;
        }
        Ok(())
    }
}

/// Cluster `table` and draw it as a heatmap
pub fn plot_clustermap<P: AsRef<Path>>(table: &ExpressionTable, path: P) -> Result<()> {
    let heatmap = ClusterHeatmap::new(table)?;
    log::debug!(
        "Clustered {} rows x {} columns for {}",
        table.n_genes(),
        table.n_samples(),
        path.as_ref().display()
    );
    save_figure(&heatmap, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    fn table() -> ExpressionTable {
        ExpressionTable::new(
            array![[1.0, 50.0, 2.0], [100.0, 5.0, 90.0], [1.5, 48.0, 2.5], [95.0, 6.0, 99.0]],
            vec!["g1".into(), "g2".into(), "g3".into(), "g4".into()],
            vec!["a".into(), "b".into(), "c".into()],
        )
        .unwrap()
    }

    #[test]
    fn test_similar_rows_become_adjacent() {
        let heatmap = ClusterHeatmap::new(&table()).unwrap();
        let genes = heatmap.table().gene_ids();
        let pos = |g: &str| genes.iter().position(|x| x == g).unwrap();
        assert_eq!((pos("g1") as i32 - pos("g3") as i32).abs(), 1);
        assert_eq!((pos("g2") as i32 - pos("g4") as i32).abs(), 1);
        let samples = heatmap.table().sample_ids();
        let col = |s: &str| samples.iter().position(|x| x == s).unwrap();
        assert_eq!((col("a") as i32 - col("c") as i32).abs(), 1);
    }

    #[test]
    fn test_empty_table_rejected() {
        let empty = table().head(0);
        assert!(matches!(ClusterHeatmap::new(&empty), Err(DeError::EmptyData { .. })));
    }

    #[test]
    fn test_writes_svg_and_png() {
        let dir = tempdir().unwrap();
        for name in ["heat.svg", "heat.png"] {
            let path = dir.path().join(name);
            plot_clustermap(&table(), &path).unwrap();
            assert!(path.exists());
        }
        let png = std::fs::read(dir.path().join("heat.png")).unwrap();
        assert_eq!(&png[1..4], b"PNG");
        let svg = std::fs::read_to_string(dir.path().join("heat.svg")).unwrap();
        assert!(svg.contains("g1"));
        // a single row still draws
        plot_clustermap(&table().head(1), dir.path().join("one.svg")).unwrap();
    }
}
