//! # Feature/Label Dataset
//!
//! Holds the per-gene feature matrix and binary label vector, aligned row
//! by row with the gene vocabulary. Construction validates the alignment
//! once; the dataset is read-only afterwards.
//!
//! The TSV loader at the bottom is a collaborator shim with a strict
//! schema (`gene`, `label`, then one column per feature): failures are
//! assumed to be user-input errors, so `DataError` favors clear, actionable
//! messages over brevity.

use crate::graph::{GeneVocabulary, GraphError};
use ndarray::{Array1, Array2};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// A comprehensive error type for dataset construction and loading failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error while reading dataset: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Error from the underlying CSV reader: {0}")]
    CsvError(#[from] csv::Error),
    #[error(transparent)]
    GraphError(#[from] GraphError),
    #[error(
        "Feature matrix has {rows} rows, but the vocabulary declares {genes} genes. Every gene needs exactly one feature row."
    )]
    RowCountMismatch { rows: usize, genes: usize },
    #[error("Label vector has {labels} entries, but the vocabulary declares {genes} genes.")]
    LabelCountMismatch { labels: usize, genes: usize },
    #[error("Non-finite feature value for gene '{gene}' (column {column}). All features must be finite.")]
    NonFiniteFeature { gene: String, column: usize },
    #[error("Label for gene '{gene}' is {value}, but labels must be exactly 0 or 1.")]
    InvalidLabel { gene: String, value: f64 },
    #[error(
        "The required column '{0}' was not found in the dataset header. Expected 'gene', 'label', then feature columns."
    )]
    ColumnNotFound(&'static str),
    #[error("Could not parse '{value}' (row {row}, column '{column}') as a number.")]
    ValueNotNumeric {
        value: String,
        row: usize,
        column: String,
    },
    #[error("Row {row} has {found} fields but the header declares {expected}.")]
    RaggedRow {
        row: usize,
        found: usize,
        expected: usize,
    },
}

/// A validated, vocabulary-aligned dataset ready for training and
/// leave-one-gene-out evaluation.
#[derive(Debug, Clone)]
pub struct GeneDataset {
    vocab: Arc<GeneVocabulary>,
    features: Array2<f64>,
    labels: Array1<f64>,
}

impl GeneDataset {
    /// Validates alignment and value ranges once, at construction.
    ///
    /// A zero-width feature matrix is allowed: a run can be driven purely
    /// by graph-neighbor information.
    pub fn new(
        vocab: Arc<GeneVocabulary>,
        features: Array2<f64>,
        labels: Array1<f64>,
    ) -> Result<Self, DataError> {
        let genes = vocab.len();
        if features.nrows() != genes {
            return Err(DataError::RowCountMismatch {
                rows: features.nrows(),
                genes,
            });
        }
        if labels.len() != genes {
            return Err(DataError::LabelCountMismatch {
                labels: labels.len(),
                genes,
            });
        }
        for (i, row) in features.rows().into_iter().enumerate() {
            if let Some(column) = row.iter().position(|v| !v.is_finite()) {
                return Err(DataError::NonFiniteFeature {
                    gene: vocab.id(i).to_string(),
                    column,
                });
            }
        }
        for (i, &label) in labels.iter().enumerate() {
            if label != 0.0 && label != 1.0 {
                return Err(DataError::InvalidLabel {
                    gene: vocab.id(i).to_string(),
                    value: label,
                });
            }
        }
        Ok(Self {
            vocab,
            features,
            labels,
        })
    }

    pub fn vocabulary(&self) -> &Arc<GeneVocabulary> {
        &self.vocab
    }

    pub fn features(&self) -> &Array2<f64> {
        &self.features
    }

    pub fn labels(&self) -> &Array1<f64> {
        &self.labels
    }

    pub fn n_genes(&self) -> usize {
        self.vocab.len()
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }
}

/// Loads a dataset from a TSV file with a strict header: a `gene` column,
/// a `label` column, and any number of feature columns after them. The
/// vocabulary is assigned from the file's row order.
pub fn load_dataset_tsv(path: &Path) -> Result<GeneDataset, DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .from_reader(File::open(path)?);

    let headers = reader.headers()?.clone();
    let col_gene = headers
        .iter()
        .position(|h| h == "gene")
        .ok_or(DataError::ColumnNotFound("gene"))?;
    let col_label = headers
        .iter()
        .position(|h| h == "label")
        .ok_or(DataError::ColumnNotFound("label"))?;
    let feature_cols: Vec<usize> = (0..headers.len())
        .filter(|&c| c != col_gene && c != col_label)
        .collect();

    let mut gene_ids: Vec<String> = Vec::new();
    let mut labels: Vec<f64> = Vec::new();
    let mut feature_buffer: Vec<f64> = Vec::new();

    for (row, record) in reader.records().enumerate() {
        let record = record?;
        if record.len() != headers.len() {
            return Err(DataError::RaggedRow {
                row: row + 1,
                found: record.len(),
                expected: headers.len(),
            });
        }
        let parse = |c: usize| -> Result<f64, DataError> {
            let raw = record.get(c).unwrap_or("");
            raw.parse::<f64>().map_err(|_| DataError::ValueNotNumeric {
                value: raw.to_string(),
                row: row + 1,
                column: headers.get(c).unwrap_or("").to_string(),
            })
        };

        gene_ids.push(record.get(col_gene).unwrap_or("").to_string());
        labels.push(parse(col_label)?);
        for &c in &feature_cols {
            feature_buffer.push(parse(c)?);
        }
    }

    let vocab = Arc::new(GeneVocabulary::new(gene_ids)?);
    let n = vocab.len();
    let features = Array2::from_shape_vec((n, feature_cols.len()), feature_buffer)
        .expect("feature buffer dimensions are checked row by row");
    let labels = Array1::from_vec(labels);
    GeneDataset::new(vocab, features, labels)
}
