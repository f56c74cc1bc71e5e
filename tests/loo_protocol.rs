//! Integration tests for the leave-one-gene-out protocol, driven entirely
//! through the public API with small hand-built fixtures.

use ndarray::{Array1, Array2, array};
use netprior::data::GeneDataset;
use netprior::graph::{GeneVocabulary, GraphEdge, InteractionGraph, LaplacianKind};
use netprior::infer::{self, EngineConfig, PredictionSource};
use netprior::model::ModelConfig;
use netprior::report::summarize;
use std::sync::Arc;

fn engine_config(lambda: f64, neighbor_imputation: bool) -> EngineConfig {
    EngineConfig {
        model: ModelConfig {
            lambda,
            max_iters: 800,
            tol: 1e-10,
            ..ModelConfig::default()
        },
        laplacian: LaplacianKind::SymmetricNormalized,
        neighbor_imputation,
        mask_features: false,
        refit_per_fold: true,
        parallel: false,
    }
}

/// Two six-gene communities, densely connected within and disconnected
/// between. One gene per community carries a strongly misleading feature;
/// the graph prior is what can rescue those folds.
fn community_fixture() -> (GeneDataset, InteractionGraph) {
    let ids: Vec<String> = (0..12).map(|i| format!("G{i}")).collect();
    let vocab = Arc::new(GeneVocabulary::new(ids.clone()).unwrap());

    let mut edges = Vec::new();
    for block in [0..6usize, 6..12usize] {
        let members: Vec<usize> = block.collect();
        for (a, &i) in members.iter().enumerate() {
            for &j in &members[a + 1..] {
                edges.push(GraphEdge::new(ids[i].clone(), ids[j].clone(), 1.0));
            }
        }
    }
    let graph = InteractionGraph::from_edges(vocab.clone(), &edges).unwrap();

    // Community 0 is labeled 0, community 1 labeled 1. Genes G4 and G10
    // have flipped, extreme features.
    let features = array![
        [-1.0],
        [-1.2],
        [-0.8],
        [-1.1],
        [2.5],
        [-0.9],
        [1.0],
        [1.1],
        [0.9],
        [1.2],
        [-2.5],
        [0.8]
    ];
    let labels = array![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0];
    let dataset = GeneDataset::new(vocab, features, labels).unwrap();
    (dataset, graph)
}

#[test]
fn run_is_deterministic_and_idempotent() {
    let (dataset, graph) = community_fixture();
    let mut config = engine_config(0.5, true);
    config.model.seed = Some(7);

    let first = infer::run(&dataset, &graph, &config).unwrap();
    let second = infer::run(&dataset, &graph, &config).unwrap();
    assert_eq!(first, second, "identical inputs and seed must reproduce identical records");

    // And the parallel schedule changes nothing.
    config.parallel = true;
    let parallel = infer::run(&dataset, &graph, &config).unwrap();
    assert_eq!(first, parallel);
}

#[test]
fn neighbor_imputation_changes_the_held_out_prediction() {
    // Vocabulary {A, B, C}, single edge A-B, features linearly separable
    // by label. Holding out A with imputation enabled must use B's fitted
    // contribution and differ measurably from the feature-only path.
    let vocab = Arc::new(GeneVocabulary::new(["A", "B", "C"]).unwrap());
    let graph =
        InteractionGraph::from_edges(vocab.clone(), &[GraphEdge::new("A", "B", 1.0)]).unwrap();
    let features = array![[0.6], [2.0], [-1.5]];
    let labels = array![1.0, 1.0, 0.0];
    let dataset = GeneDataset::new(vocab, features, labels).unwrap();

    let with_imputation = infer::run(&dataset, &graph, &engine_config(0.5, true)).unwrap();
    let without_imputation = infer::run(&dataset, &graph, &engine_config(0.5, false)).unwrap();

    let a_with = &with_imputation[0];
    let a_without = &without_imputation[0];
    assert_eq!(a_with.gene, "A");
    assert_eq!(a_with.metadata.source, PredictionSource::Blended);
    assert_eq!(a_with.metadata.neighbors_used, 1);
    assert_eq!(a_without.metadata.source, PredictionSource::Features);

    let gap = (a_with.predicted - a_without.predicted).abs();
    assert!(
        gap > 1e-3,
        "imputation should shift A's prediction measurably (gap {gap})"
    );
}

#[test]
fn lambda_sweep_has_an_interior_minimum() {
    // Regression baseline for the sweep {0, 0.1, 1, 10}: with misleading
    // features on two genes and a clean community graph, held-out log-loss
    // should dip at an interior lambda rather than change monotonically.
    let (dataset, graph) = community_fixture();
    let lambdas = [0.0, 0.1, 1.0, 10.0];

    let losses: Vec<f64> = lambdas
        .iter()
        .map(|&lambda| {
            let records =
                infer::run(&dataset, &graph, &engine_config(lambda, false)).unwrap();
            summarize(&records).mean_log_loss
        })
        .collect();

    let interior_best = losses[1].min(losses[2]);
    assert!(
        interior_best < losses[0],
        "an interior lambda should beat the unregularized end of the sweep ({losses:?})"
    );
    assert!(
        interior_best < losses[3],
        "an interior lambda should beat the over-smoothed end of the sweep ({losses:?})"
    );

    // The curve itself is the regression baseline: rerunning the sweep
    // must reproduce it bit for bit.
    let replayed: Vec<f64> = lambdas
        .iter()
        .map(|&lambda| {
            let records =
                infer::run(&dataset, &graph, &engine_config(lambda, false)).unwrap();
            summarize(&records).mean_log_loss
        })
        .collect();
    assert_eq!(losses, replayed);
}

#[test]
fn graph_prior_rescues_misleading_features() {
    // With imputation on, the flipped genes' neighbors vote them back
    // toward their community label.
    let (dataset, graph) = community_fixture();

    let feature_only = infer::run(&dataset, &graph, &engine_config(0.5, false)).unwrap();
    let with_graph = infer::run(&dataset, &graph, &engine_config(0.5, true)).unwrap();

    // G4 (index 4) is labeled 0 but carries a strongly positive feature.
    assert!(
        with_graph[4].predicted < feature_only[4].predicted,
        "neighbor voting should pull G4 toward its community label ({} vs {})",
        with_graph[4].predicted,
        feature_only[4].predicted
    );

    let summary_with = summarize(&with_graph);
    let summary_without = summarize(&feature_only);
    assert!(
        summary_with.mean_log_loss < summary_without.mean_log_loss,
        "the graph prior should improve held-out log-loss ({} vs {})",
        summary_with.mean_log_loss,
        summary_without.mean_log_loss
    );
}

#[test]
fn degraded_folds_are_flagged_not_skipped() {
    // A featureless dataset with one isolated gene: the isolated fold has
    // no information path at all and must be scored with the population
    // mean, flagged degraded, and still present in the output.
    let vocab = Arc::new(GeneVocabulary::new(["A", "B", "C", "LONE"]).unwrap());
    let graph = InteractionGraph::from_edges(
        vocab.clone(),
        &[GraphEdge::new("A", "B", 1.0), GraphEdge::new("B", "C", 1.0)],
    )
    .unwrap();
    let dataset = GeneDataset::new(
        vocab,
        Array2::zeros((4, 0)),
        Array1::from_vec(vec![0.0, 1.0, 1.0, 1.0]),
    )
    .unwrap();

    let records = infer::run(&dataset, &graph, &engine_config(0.5, true)).unwrap();
    assert_eq!(records.len(), 4);

    let lone = &records[3];
    assert_eq!(lone.gene, "LONE");
    assert!(lone.metadata.degraded);
    assert_eq!(lone.metadata.source, PredictionSource::PopulationMean);
    // Training labels for the LONE fold are {0, 1, 1}.
    assert!((lone.predicted - 2.0 / 3.0).abs() < 1e-12);

    // Connected genes still get the neighbor path.
    assert_eq!(records[0].metadata.source, PredictionSource::Neighbors);
    assert!(!records[0].metadata.degraded);
}

#[test]
fn fold_records_serialize_for_downstream_reporting() {
    let (dataset, graph) = community_fixture();
    let records = infer::run(&dataset, &graph, &engine_config(0.5, true)).unwrap();

    let json = serde_json::to_string(&records).unwrap();
    let restored: Vec<netprior::infer::FoldRecord> = serde_json::from_str(&json).unwrap();
    assert_eq!(records, restored);
}

#[test]
fn shared_fit_run_is_explicit_and_marked() {
    let (dataset, graph) = community_fixture();
    let config = EngineConfig {
        refit_per_fold: false,
        ..engine_config(0.5, true)
    };
    let records = infer::run(&dataset, &graph, &config).unwrap();
    assert!(records.iter().all(|r| r.metadata.shared_fit));

    let summary = summarize(&records);
    assert_eq!(summary.folds, 12);
    assert!(summary.mean_log_loss.is_finite());
}
