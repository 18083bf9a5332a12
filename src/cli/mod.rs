//! Command-line interface for rust_de_report

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::pipeline::{InputPaths, OutputPaths};

#[derive(Parser)]
#[command(name = "rust_de_report")]
#[command(version)]
#[command(about = "Two-group differential expression report: dispersion, heatmap and MA plots")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full report
    #[command(
        long_about = "Run the full report\n\n\
            Filters samples and genes, fits the negative binomial model, writes the\n\
            dispersion plot, draws clustered heatmaps of normalized counts, runs the\n\
            Wald test, shrinks fold changes and writes the MA plot.\n\n\
            Image format follows the output extension: .png is rasterized, anything\n\
            else is written as SVG.",
        after_long_help = "\
Examples:
  rust_de_report run -c counts.tsv -m coldata.tsv -a WT -b KO \\
    --dispersion-plot disp.svg --heatmap heatmap.svg \\
    --top-heatmap top.svg --ma-plot ma.svg

  # Settings from the workflow config, with a per-run override
  rust_de_report run -c counts.tsv -m coldata.tsv --config config.yaml \\
    --threshold-plot 50 --dispersion-plot disp.png --heatmap h.png \\
    --top-heatmap top.png --ma-plot ma.png --results results.tsv"
    )]
    Run(RunArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Count table (TSV, gene ids in the `Reference` column)
    #[arg(short, long)]
    pub counts: PathBuf,

    /// Sample metadata (TSV, first column = sample id, needs `condition`)
    #[arg(short, long)]
    pub metadata: PathBuf,

    /// Dispersion plot output
    #[arg(long, value_name = "PATH")]
    pub dispersion_plot: PathBuf,

    /// Clustered heatmap of every retained gene
    #[arg(long, value_name = "PATH")]
    pub heatmap: PathBuf,

    /// Clustered heatmap of the first `threshold-plot` genes
    #[arg(long, value_name = "PATH")]
    pub top_heatmap: PathBuf,

    /// MA plot of shrunk fold changes
    #[arg(long, value_name = "PATH")]
    pub ma_plot: PathBuf,

    /// Optional results table (TSV)
    #[arg(short, long, value_name = "PATH")]
    pub results: Option<PathBuf>,

    /// Settings file (.json, or .yaml/.yml); flags below override its values
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Condition A identifier (reference level, sample-name substring)
    #[arg(short = 'a', long)]
    pub condition_a: Option<String>,

    /// Condition B identifier
    #[arg(short = 'b', long)]
    pub condition_b: Option<String>,

    /// Rows in the top heatmap [default: 20]
    #[arg(long)]
    pub threshold_plot: Option<usize>,

    /// Minimum total count for a gene to be kept [default: 10]
    #[arg(long)]
    pub min_gene_count: Option<f64>,

    /// Significance threshold [default: 0.05]
    #[arg(long)]
    pub alpha: Option<f64>,

    /// Sort heatmap rows by between-group ratio
    #[arg(long)]
    pub order_by_ratio: bool,

    /// Number of threads (0 = auto)
    #[arg(short = 't', long)]
    pub threads: Option<usize>,
}

impl RunArgs {
    /// File settings (or defaults) with command-line overrides applied
    pub fn analysis_config(&self) -> Result<AnalysisConfig> {
        let mut config = match &self.config {
            Some(path) => AnalysisConfig::from_file(path)?,
            None => AnalysisConfig::default(),
        };
        if let Some(a) = &self.condition_a {
            config.condition_a_identifier = a.clone();
        }
        if let Some(b) = &self.condition_b {
            config.condition_b_identifier = b.clone();
        }
        if let Some(n) = self.threshold_plot {
            config.threshold_plot = n;
        }
        if let Some(min) = self.min_gene_count {
            config.min_gene_count = min;
        }
        if let Some(alpha) = self.alpha {
            config.alpha = alpha;
        }
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        config.order_heatmap_by_ratio |= self.order_by_ratio;
        config.validate()?;
        Ok(config)
    }

    pub fn input_paths(&self) -> InputPaths {
        InputPaths {
            counts: self.counts.clone(),
            metadata: self.metadata.clone(),
        }
    }

    pub fn output_paths(&self) -> OutputPaths {
        OutputPaths {
            dispersion_plot: self.dispersion_plot.clone(),
            heatmap: self.heatmap.clone(),
            top_heatmap: self.top_heatmap.clone(),
            ma_plot: self.ma_plot.clone(),
            results: self.results.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeError;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const OUTPUTS: [&str; 8] = [
        "--dispersion-plot",
        "d.svg",
        "--heatmap",
        "h.svg",
        "--top-heatmap",
        "t.svg",
        "--ma-plot",
        "ma.svg",
    ];

    fn parse(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["rust_de_report", "run", "-c", "counts.tsv", "-m", "coldata.tsv"];
        argv.extend_from_slice(&OUTPUTS);
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Some(Commands::Run(args)) => args,
            None => panic!("no subcommand parsed"),
        }
    }

    #[test]
    fn test_flags_build_config() {
        let args = parse(&["-a", "WT", "-b", "KO", "--threshold-plot", "5"]);
        let config = args.analysis_config().unwrap();
        assert_eq!(config.condition_a_identifier, "WT");
        assert_eq!(config.threshold_plot, 5);
        assert_eq!(config.min_gene_count, 10.0);
        assert!(args.output_paths().results.is_none());
        assert_eq!(args.input_paths().counts, PathBuf::from("counts.tsv"));
    }

    #[test]
    fn test_flags_override_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"condition_a_identifier": "WT", "condition_b_identifier": "KO", "alpha": 0.1}}"#
        )
        .unwrap();
        let path = file.path().to_str().unwrap();
        let config = parse(&["--config", path, "-b", "HET", "--order-by-ratio"])
            .analysis_config()
            .unwrap();
        assert_eq!(config.condition_a_identifier, "WT");
        assert_eq!(config.condition_b_identifier, "HET");
        assert_eq!(config.alpha, 0.1);
        assert!(config.order_heatmap_by_ratio);
    }

    #[test]
    fn test_missing_identifiers_rejected() {
        let err = parse(&["-a", "WT"]).analysis_config().unwrap_err();
        assert!(matches!(err, DeError::InvalidConfig { .. }));
    }

    #[test]
    fn test_output_paths_required() {
        let argv = ["rust_de_report", "run", "-c", "counts.tsv", "-m", "coldata.tsv"];
        assert!(Cli::try_parse_from(argv).is_err());
    }
}
