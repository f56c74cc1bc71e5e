//! # Gene Interaction Graph Store
//!
//! This module owns the interaction graph and the gene vocabulary it is
//! defined over. The vocabulary is assigned exactly once, at construction,
//! and every other structure in the pipeline (features, labels, fold
//! records) is indexed through it. Nothing here relies on the iteration
//! order of a hash map.
//!
//! The graph itself is a symmetric, non-negatively weighted adjacency
//! matrix with a zero diagonal. Its two Laplacian forms (`D - A` and the
//! symmetric-normalized variant) are derived lazily and cached; the graph
//! is immutable after construction, so a cached Laplacian never goes stale.

use ahash::AHashMap;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// A comprehensive error type for graph construction and loading failures.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("IO error while reading graph edges: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Error from the underlying CSV reader: {0}")]
    CsvError(#[from] csv::Error),
    #[error("The gene identifier '{0}' appears more than once in the vocabulary.")]
    DuplicateGene(String),
    #[error("The vocabulary must contain at least one gene identifier.")]
    EmptyVocabulary,
    #[error("Edge references the gene '{0}', which is not in the declared vocabulary.")]
    UnknownGene(String),
    #[error("Edge {a}-{b} has weight {weight}, but edge weights must be finite and non-negative.")]
    InvalidWeight { a: String, b: String, weight: f64 },
    #[error("Edge {0}-{0} is a self-loop; the adjacency matrix must have a zero diagonal.")]
    SelfLoop(String),
    #[error(
        "The required column '{0}' was not found in the edge file header. Expected 'gene_a', 'gene_b' and optionally 'weight'."
    )]
    ColumnNotFound(&'static str),
    #[error("Could not parse '{value}' in column 'weight' (row {row}) as a number.")]
    WeightNotNumeric { value: String, row: usize },
}

/// An ordered, immutable set of unique gene identifiers.
///
/// Index positions are assigned in the order identifiers are supplied and
/// remain stable for the lifetime of the pipeline run.
#[derive(Debug, Clone)]
pub struct GeneVocabulary {
    ids: Vec<String>,
    index: AHashMap<String, usize>,
}

impl GeneVocabulary {
    pub fn new<I, S>(ids: I) -> Result<Self, GraphError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return Err(GraphError::EmptyVocabulary);
        }
        let mut index = AHashMap::with_capacity(ids.len());
        for (i, id) in ids.iter().enumerate() {
            if index.insert(id.clone(), i).is_some() {
                return Err(GraphError::DuplicateGene(id.clone()));
            }
        }
        Ok(Self { ids, index })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// The identifier at a given index position.
    pub fn id(&self, index: usize) -> &str {
        &self.ids[index]
    }

    /// The index position of an identifier, if it is in the vocabulary.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }
}

/// Which Laplacian form to derive from the adjacency matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LaplacianKind {
    /// `L = D - A`.
    Unnormalized,
    /// `L = I* - D^{-1/2} A D^{-1/2}`, where `I*` carries a zero (not one)
    /// on the diagonal at zero-degree nodes. Substituting 0 for `D^{-1/2}`
    /// at isolated nodes keeps the matrix finite and PSD, and makes an
    /// edgeless gene contribute exactly zero to any quadratic form.
    SymmetricNormalized,
}

/// One undirected weighted edge, by gene identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphEdge {
    pub a: String,
    pub b: String,
    pub weight: f64,
}

impl GraphEdge {
    pub fn new(a: impl Into<String>, b: impl Into<String>, weight: f64) -> Self {
        Self {
            a: a.into(),
            b: b.into(),
            weight,
        }
    }
}

/// The validated interaction graph over a fixed vocabulary.
#[derive(Debug)]
pub struct InteractionGraph {
    vocab: Arc<GeneVocabulary>,
    adjacency: Array2<f64>,
    neighbor_lists: Vec<Vec<usize>>,
    lap_unnormalized: OnceLock<Array2<f64>>,
    lap_normalized: OnceLock<Array2<f64>>,
}

impl InteractionGraph {
    /// Builds the graph from an undirected edge list.
    ///
    /// Fails if an edge references an identifier outside the vocabulary, if
    /// a weight is negative or non-finite, or if an edge is a self-loop.
    /// Repeated edges accumulate their weights. Isolated nodes are
    /// permitted; they simply have no neighbors.
    pub fn from_edges(
        vocab: Arc<GeneVocabulary>,
        edges: &[GraphEdge],
    ) -> Result<Self, GraphError> {
        let n = vocab.len();
        let mut adjacency = Array2::<f64>::zeros((n, n));

        for edge in edges {
            let a = vocab
                .index_of(&edge.a)
                .ok_or_else(|| GraphError::UnknownGene(edge.a.clone()))?;
            let b = vocab
                .index_of(&edge.b)
                .ok_or_else(|| GraphError::UnknownGene(edge.b.clone()))?;
            if !edge.weight.is_finite() || edge.weight < 0.0 {
                return Err(GraphError::InvalidWeight {
                    a: edge.a.clone(),
                    b: edge.b.clone(),
                    weight: edge.weight,
                });
            }
            if a == b {
                return Err(GraphError::SelfLoop(edge.a.clone()));
            }
            adjacency[[a, b]] += edge.weight;
            adjacency[[b, a]] += edge.weight;
        }

        let neighbor_lists = (0..n)
            .map(|i| {
                (0..n)
                    .filter(|&j| adjacency[[i, j]] > 0.0)
                    .collect::<Vec<usize>>()
            })
            .collect();

        Ok(Self {
            vocab,
            adjacency,
            neighbor_lists,
            lap_unnormalized: OnceLock::new(),
            lap_normalized: OnceLock::new(),
        })
    }

    pub fn vocabulary(&self) -> &Arc<GeneVocabulary> {
        &self.vocab
    }

    pub fn adjacency(&self) -> &Array2<f64> {
        &self.adjacency
    }

    /// Immediate neighbors of a gene, as sorted index positions. Empty for
    /// an isolated node; isolation is not an error.
    pub fn neighbors(&self, index: usize) -> &[usize] {
        &self.neighbor_lists[index]
    }

    /// Weighted degree of a gene (row sum of the adjacency matrix).
    pub fn degree(&self, index: usize) -> f64 {
        self.adjacency.row(index).sum()
    }

    /// The requested Laplacian, computed on first use and cached.
    /// Deterministic given the graph; the graph never changes after
    /// construction, so the cache is never invalidated.
    pub fn laplacian(&self, kind: LaplacianKind) -> &Array2<f64> {
        match kind {
            LaplacianKind::Unnormalized => self
                .lap_unnormalized
                .get_or_init(|| self.build_unnormalized()),
            LaplacianKind::SymmetricNormalized => {
                self.lap_normalized.get_or_init(|| self.build_normalized())
            }
        }
    }

    fn build_unnormalized(&self) -> Array2<f64> {
        let n = self.vocab.len();
        let mut lap = -&self.adjacency;
        for i in 0..n {
            lap[[i, i]] = self.degree(i);
        }
        lap
    }

    fn build_normalized(&self) -> Array2<f64> {
        let n = self.vocab.len();
        let inv_sqrt_degree: Vec<f64> = (0..n)
            .map(|i| {
                let d = self.degree(i);
                if d > 0.0 { 1.0 / d.sqrt() } else { 0.0 }
            })
            .collect();

        let mut lap = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    lap[[i, i]] = if self.degree(i) > 0.0 { 1.0 } else { 0.0 };
                } else {
                    lap[[i, j]] =
                        -inv_sqrt_degree[i] * self.adjacency[[i, j]] * inv_sqrt_degree[j];
                }
            }
        }
        lap
    }
}

/// Loads an undirected edge list from a TSV file with a strict header:
/// `gene_a`, `gene_b`, and an optional `weight` column (defaulting to 1.0).
/// Validation against the vocabulary happens in [`InteractionGraph::from_edges`].
pub fn load_edges_tsv(path: &Path) -> Result<Vec<GraphEdge>, GraphError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_reader(File::open(path)?);

    let headers = reader.headers()?.clone();
    let col = |name: &'static str| headers.iter().position(|h| h == name);
    let col_a = col("gene_a").ok_or(GraphError::ColumnNotFound("gene_a"))?;
    let col_b = col("gene_b").ok_or(GraphError::ColumnNotFound("gene_b"))?;
    let col_w = col("weight");

    let mut edges = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let a = record.get(col_a).unwrap_or("").to_string();
        let b = record.get(col_b).unwrap_or("").to_string();
        let weight = match col_w {
            Some(c) => {
                let raw = record.get(c).unwrap_or("");
                raw.parse::<f64>()
                    .map_err(|_| GraphError::WeightNotNumeric {
                        value: raw.to_string(),
                        row: row + 1,
                    })?
            }
            None => 1.0,
        };
        edges.push(GraphEdge { a, b, weight });
    }
    Ok(edges)
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array1;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn vocab(ids: &[&str]) -> Arc<GeneVocabulary> {
        Arc::new(GeneVocabulary::new(ids.iter().copied()).unwrap())
    }

    fn path_graph_abc() -> InteractionGraph {
        // A - B - C, plus isolated D.
        let v = vocab(&["A", "B", "C", "D"]);
        InteractionGraph::from_edges(
            v,
            &[GraphEdge::new("A", "B", 1.0), GraphEdge::new("B", "C", 1.0)],
        )
        .unwrap()
    }

    #[test]
    fn vocabulary_assigns_stable_indices() {
        let v = vocab(&["TP53", "BRCA1", "EGFR"]);
        assert_eq!(v.len(), 3);
        assert_eq!(v.index_of("TP53"), Some(0));
        assert_eq!(v.index_of("EGFR"), Some(2));
        assert_eq!(v.id(1), "BRCA1");
        assert_eq!(v.index_of("MYC"), None);
    }

    #[test]
    fn vocabulary_rejects_duplicates() {
        let err = GeneVocabulary::new(["TP53", "EGFR", "TP53"]).unwrap_err();
        match err {
            GraphError::DuplicateGene(id) => assert_eq!(id, "TP53"),
            other => panic!("Expected DuplicateGene, got {other:?}"),
        }
    }

    #[test]
    fn vocabulary_rejects_empty() {
        let err = GeneVocabulary::new(Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, GraphError::EmptyVocabulary));
    }

    #[test]
    fn from_edges_rejects_unknown_gene() {
        let v = vocab(&["A", "B"]);
        let err =
            InteractionGraph::from_edges(v, &[GraphEdge::new("A", "Z", 1.0)]).unwrap_err();
        match err {
            GraphError::UnknownGene(id) => assert_eq!(id, "Z"),
            other => panic!("Expected UnknownGene, got {other:?}"),
        }
    }

    #[test]
    fn from_edges_rejects_negative_weight() {
        let v = vocab(&["A", "B"]);
        let err =
            InteractionGraph::from_edges(v, &[GraphEdge::new("A", "B", -0.5)]).unwrap_err();
        assert!(matches!(err, GraphError::InvalidWeight { .. }));
    }

    #[test]
    fn from_edges_rejects_self_loop() {
        let v = vocab(&["A", "B"]);
        let err =
            InteractionGraph::from_edges(v, &[GraphEdge::new("A", "A", 1.0)]).unwrap_err();
        assert!(matches!(err, GraphError::SelfLoop(_)));
    }

    #[test]
    fn repeated_edges_accumulate_weight() {
        let v = vocab(&["A", "B"]);
        let g = InteractionGraph::from_edges(
            v,
            &[GraphEdge::new("A", "B", 0.5), GraphEdge::new("B", "A", 0.25)],
        )
        .unwrap();
        assert_abs_diff_eq!(g.adjacency()[[0, 1]], 0.75, epsilon = 1e-12);
        assert_abs_diff_eq!(g.adjacency()[[1, 0]], 0.75, epsilon = 1e-12);
    }

    #[test]
    fn neighbors_and_isolated_nodes() {
        let g = path_graph_abc();
        assert_eq!(g.neighbors(0), &[1]);
        assert_eq!(g.neighbors(1), &[0, 2]);
        assert_eq!(g.neighbors(2), &[1]);
        // Isolation is not an error: D simply has no neighbors.
        assert!(g.neighbors(3).is_empty());
        assert_abs_diff_eq!(g.degree(3), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn unnormalized_laplacian_values() {
        let g = path_graph_abc();
        let lap = g.laplacian(LaplacianKind::Unnormalized);
        assert_abs_diff_eq!(lap[[0, 0]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(lap[[1, 1]], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(lap[[0, 1]], -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(lap[[0, 2]], 0.0, epsilon = 1e-12);
        // Isolated node: zero row and column.
        for j in 0..4 {
            assert_abs_diff_eq!(lap[[3, j]], 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(lap[[j, 3]], 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn normalized_laplacian_handles_isolated_nodes() {
        let g = path_graph_abc();
        let lap = g.laplacian(LaplacianKind::SymmetricNormalized);
        // Degree-carrying nodes have a unit diagonal.
        assert_abs_diff_eq!(lap[[0, 0]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(lap[[1, 1]], 1.0, epsilon = 1e-12);
        // A-B off-diagonal: -1/sqrt(1*2).
        assert_abs_diff_eq!(lap[[0, 1]], -1.0 / 2.0_f64.sqrt(), epsilon = 1e-12);
        // Isolated node: zero diagonal, never 1, never NaN.
        assert_abs_diff_eq!(lap[[3, 3]], 0.0, epsilon = 1e-12);
        assert!(lap.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn laplacians_are_symmetric_and_psd() {
        let v = vocab(&["A", "B", "C", "D", "E"]);
        let g = InteractionGraph::from_edges(
            v,
            &[
                GraphEdge::new("A", "B", 2.0),
                GraphEdge::new("B", "C", 0.5),
                GraphEdge::new("C", "A", 1.5),
                GraphEdge::new("D", "A", 3.0),
            ],
        )
        .unwrap();

        for kind in [LaplacianKind::Unnormalized, LaplacianKind::SymmetricNormalized] {
            let lap = g.laplacian(kind);
            for i in 0..5 {
                for j in 0..5 {
                    assert_abs_diff_eq!(lap[[i, j]], lap[[j, i]], epsilon = 1e-12);
                }
            }
            // PSD check via quadratic forms over a spread of directions.
            let probes = [
                Array1::from_vec(vec![1.0, 0.0, 0.0, 0.0, 0.0]),
                Array1::from_vec(vec![1.0, 1.0, 1.0, 1.0, 1.0]),
                Array1::from_vec(vec![1.0, -1.0, 2.0, -2.0, 0.5]),
                Array1::from_vec(vec![-3.0, 0.1, 0.0, 7.0, -0.4]),
                Array1::from_vec(vec![0.0, 0.0, 0.0, 0.0, 1.0]),
            ];
            for x in &probes {
                let quad = x.dot(&lap.dot(x));
                assert!(
                    quad >= -1e-10,
                    "quadratic form was negative ({quad}) for {kind:?}"
                );
            }
        }
    }

    #[test]
    fn edgeless_gene_contributes_zero_to_the_quadratic_form() {
        let g = path_graph_abc();
        for kind in [LaplacianKind::Unnormalized, LaplacianKind::SymmetricNormalized] {
            let lap = g.laplacian(kind);
            // Any vector supported only on the isolated gene D scores
            // exactly zero, whatever its magnitude.
            for magnitude in [1.0, -3.5, 1.0e9] {
                let x = Array1::from_vec(vec![0.0, 0.0, 0.0, magnitude]);
                assert_abs_diff_eq!(x.dot(&lap.dot(&x)), 0.0, epsilon = 0.0);
            }
        }
    }

    #[test]
    fn laplacian_is_cached() {
        let g = path_graph_abc();
        let first = g.laplacian(LaplacianKind::Unnormalized) as *const Array2<f64>;
        let second = g.laplacian(LaplacianKind::Unnormalized) as *const Array2<f64>;
        assert_eq!(first, second);
    }

    #[test]
    fn load_edges_tsv_with_and_without_weights() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "gene_a\tgene_b\tweight").unwrap();
        writeln!(file, "A\tB\t0.5").unwrap();
        writeln!(file, "B\tC\t2.0").unwrap();
        file.flush().unwrap();
        let edges = load_edges_tsv(file.path()).unwrap();
        assert_eq!(edges.len(), 2);
        assert_abs_diff_eq!(edges[0].weight, 0.5, epsilon = 1e-12);

        let mut unweighted = NamedTempFile::new().unwrap();
        writeln!(unweighted, "gene_a\tgene_b").unwrap();
        writeln!(unweighted, "A\tC").unwrap();
        unweighted.flush().unwrap();
        let edges = load_edges_tsv(unweighted.path()).unwrap();
        assert_eq!(edges.len(), 1);
        assert_abs_diff_eq!(edges[0].weight, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn load_edges_tsv_rejects_missing_column() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "gene_a\tpartner").unwrap();
        writeln!(file, "A\tB").unwrap();
        file.flush().unwrap();
        let err = load_edges_tsv(file.path()).unwrap_err();
        match err {
            GraphError::ColumnNotFound(col) => assert_eq!(col, "gene_b"),
            other => panic!("Expected ColumnNotFound, got {other:?}"),
        }
    }

    #[test]
    fn load_edges_tsv_rejects_bad_weight() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "gene_a\tgene_b\tweight").unwrap();
        writeln!(file, "A\tB\tstrong").unwrap();
        file.flush().unwrap();
        let err = load_edges_tsv(file.path()).unwrap_err();
        assert!(matches!(err, GraphError::WeightNotNumeric { row: 1, .. }));
    }
}
