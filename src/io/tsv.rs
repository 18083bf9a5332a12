//! Tab-separated input tables and the results file

use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use ndarray::Array2;

use super::results::DeResults;
use crate::data::{is_missing, CountMatrix, SampleMetadata};
use crate::error::{DeError, Result};

/// Header of the count-table column holding gene identifiers
pub const GENE_ID_COLUMN: &str = "Reference";

fn tsv_reader<P: AsRef<Path>>(path: P) -> Result<csv::Reader<std::fs::File>> {
    Ok(ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .trim(Trim::All)
        .from_path(path)?)
}

/// Read a genes x samples count table.
///
/// The column named `Reference` holds gene ids; every other column is a
/// sample.
pub fn read_count_matrix<P: AsRef<Path>>(path: P) -> Result<CountMatrix> {
    let mut reader = tsv_reader(path)?;
    let headers = reader.headers()?.clone();
    let id_col = headers
        .iter()
        .position(|h| h == GENE_ID_COLUMN)
        .ok_or_else(|| DeError::InvalidCountMatrix {
            reason: format!("no '{}' column in header", GENE_ID_COLUMN),
        })?;
    let sample_cols: Vec<usize> = (0..headers.len()).filter(|&c| c != id_col).collect();
    let sample_ids: Vec<String> = sample_cols.iter().map(|&c| headers[c].to_string()).collect();
    if sample_ids.is_empty() {
        return Err(DeError::InvalidCountMatrix {
            reason: "count table has no sample columns".to_string(),
        });
    }

    let mut gene_ids = Vec::new();
    let mut values = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        gene_ids.push(record[id_col].to_string());
        for &c in &sample_cols {
            let raw = &record[c];
            let value = raw.parse::<f64>().map_err(|_| DeError::InvalidCountMatrix {
                reason: format!("row {}: '{}' in column '{}' is not a count", line + 2, raw, &headers[c]),
            })?;
            values.push(value);
        }
    }
    if gene_ids.is_empty() {
        return Err(DeError::EmptyData {
            reason: "count table has no genes".to_string(),
        });
    }

    let counts = Array2::from_shape_vec((gene_ids.len(), sample_ids.len()), values).map_err(|e| {
        DeError::InvalidCountMatrix {
            reason: e.to_string(),
        }
    })?;
    log::info!("Loaded {} genes x {} samples", gene_ids.len(), sample_ids.len());
    CountMatrix::new(counts, gene_ids, sample_ids)
}

/// Read sample annotations: first column is the sample id, every other
/// column is categorical. NA spellings become missing values.
pub fn read_metadata<P: AsRef<Path>>(path: P) -> Result<SampleMetadata> {
    let mut reader = tsv_reader(path)?;
    let headers = reader.headers()?.clone();
    if headers.len() < 2 {
        return Err(DeError::InvalidMetadata {
            reason: "metadata needs a sample column and at least one annotation".to_string(),
        });
    }

    let records: Vec<StringRecord> = reader.records().collect::<std::result::Result<_, _>>()?;
    if records.is_empty() {
        return Err(DeError::EmptyData {
            reason: "metadata has no samples".to_string(),
        });
    }

    let mut metadata = SampleMetadata::new(records.iter().map(|r| r[0].to_string()).collect());
    for (c, name) in headers.iter().enumerate().skip(1) {
        let values = records
            .iter()
            .map(|r| r.get(c).filter(|v| !is_missing(v)).map(str::to_string))
            .collect();
        metadata.add_column(name, values)?;
    }
    Ok(metadata)
}

fn field(v: f64) -> String {
    if v.is_nan() {
        "NA".to_string()
    } else {
        format!("{}", v)
    }
}

/// Write the results table as TSV, one row per gene
pub fn write_results<P: AsRef<Path>>(path: P, results: &DeResults) -> Result<()> {
    let mut writer = WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    writer.write_record([
        "gene_id",
        "baseMean",
        "baseVar",
        "log2FoldChange",
        "lfcSE",
        "stat",
        "pvalue",
        "padj",
        "dispersion",
        "genewise_dispersion",
        "trended_dispersion",
    ])?;
    for i in 0..results.n_genes() {
        let mut row = vec![results.gene_ids[i].clone()];
        row.extend(
            [
                results.base_means[i],
                results.base_vars[i],
                results.log2_fold_changes[i],
                results.lfc_se[i],
                results.stat[i],
                results.pvalues[i],
                results.padj[i],
                results.dispersions[i],
                results.gene_wise_dispersions[i],
                results.trended_dispersions[i],
            ]
            .into_iter()
            .map(field),
        );
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}
