//! rust_de_report command-line interface

use clap::Parser;
use log::{info, LevelFilter};

use rust_de_report::cli::{Cli, Commands, RunArgs};
use rust_de_report::error::Result;
use rust_de_report::pipeline::run_pipeline;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Some(Commands::Run(args)) => run_report(&args),
        None => {
            print_no_args();
            return;
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_no_args() {
    println!("rust_de_report v{}", VERSION);
    println!("Run `rust_de_report run --help` for usage.");
}

fn run_report(args: &RunArgs) -> Result<()> {
    let config = args.analysis_config()?;

    if config.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .build_global()
            .ok();
    }

    info!(
        "Comparing '{}' (B) against '{}' (A)",
        config.condition_b_identifier, config.condition_a_identifier
    );
    let report = run_pipeline(&args.input_paths(), &args.output_paths(), &config)?;

    let summary = report.shrunk.summary(config.alpha);
    info!(
        "Done: {} genes tested, {} significant at padj < {} ({} up, {} down)",
        summary.genes_tested, summary.significant, config.alpha, summary.upregulated, summary.downregulated
    );
    if !report.heatmap.ratios.dropped.is_empty() {
        info!(
            "{} genes left out of the heatmaps for an infinite group ratio",
            report.heatmap.ratios.dropped.len()
        );
    }
    Ok(())
}
