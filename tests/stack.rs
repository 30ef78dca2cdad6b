//! Stack composition and persistence integration tests.
//!
//! Focused on behavior and invariants: offset partitioning across
//! sub-models, shallow-copied stores, and full-stack save/load round trips.

mod common;

use std::io::Cursor;

use common::{cost_example, dense_stack, full_cost_vector, sparse_stack, unlabeled_example};
use reducers::persist::ModelIo;
use reducers::Parameters;

/// Contexts the round-trip suites train on: feature -> cheapest action.
const CONTEXTS: [(u64, f32); 3] = [(3, 0.0), (8, 2.0), (21, 3.0)];

fn train_bandit(ws: &mut reducers::Workspace, learner: &mut reducers::Learner, rounds: usize) {
    for _ in 0..rounds {
        for &(feature, cheap) in &CONTEXTS {
            let costs: Vec<f32> = (0..4)
                .map(|a| if a as f32 == cheap { 0.0 } else { 1.0 })
                .collect();
            let mut ex = cost_example(&[(feature, 1.0)], &full_cost_vector(&costs));
            learner.learn(ws, &mut ex, 0);
            ws.count_example();
        }
    }
}

fn predictions(ws: &mut reducers::Workspace, learner: &mut reducers::Learner) -> Vec<u32> {
    CONTEXTS
        .iter()
        .map(|&(feature, _)| {
            let mut ex = unlabeled_example(&[(feature, 1.0)]);
            learner.predict(ws, &mut ex, 0);
            ex.pred.action()
        })
        .collect()
}

#[test]
fn trained_stack_separates_contexts() {
    let (mut ws, mut learner) = dense_stack(4, 11);
    train_bandit(&mut ws, &mut learner, 60);

    let actions = predictions(&mut ws, &mut learner);
    assert_eq!(actions, vec![1, 3, 4]);
}

#[test]
fn sub_models_occupy_disjoint_blocks() {
    // One feature at index 0: every touched block id is exactly the node id
    // of a trained classifier, so block sets expose the offset partition.
    let (mut ws, mut learner) = dense_stack(5, 0);
    assert_eq!(learner.increment(), 4);

    let mut ex = cost_example(&[(0, 1.0)], &full_cost_vector(&[0.0, 1.0, 1.0, 1.0, 1.0]));
    learner.learn(&mut ws, &mut ex, 0);

    let blocks: Vec<u64> = ws.params.nonzero_blocks().iter().map(|&(id, _)| id).collect();
    assert!(!blocks.is_empty());
    // Only internal nodes 0..=3 exist; no write may escape their range.
    assert!(blocks.iter().all(|&id| id < 4), "blocks {blocks:?}");
    let mut deduped = blocks.clone();
    deduped.dedup();
    assert_eq!(blocks, deduped, "each classifier owns its own block");
}

#[test]
fn save_load_round_trip_binary() {
    let (mut ws, mut learner) = dense_stack(4, 11);
    train_bandit(&mut ws, &mut learner, 60);
    let trained = predictions(&mut ws, &mut learner);

    let mut buf = Vec::new();
    {
        let mut io = ModelIo::writer(&mut buf, false);
        learner.save_load(&mut ws, &mut io).unwrap();
    }

    let (mut ws2, mut learner2) = dense_stack(4, 99);
    let mut cursor = Cursor::new(buf);
    {
        let mut io = ModelIo::reader(&mut cursor, false);
        learner2.save_load(&mut ws2, &mut io).unwrap();
    }

    assert_eq!(predictions(&mut ws2, &mut learner2), trained);
}

#[test]
fn save_load_round_trip_text() {
    let (mut ws, mut learner) = dense_stack(4, 5);
    train_bandit(&mut ws, &mut learner, 40);
    let trained = predictions(&mut ws, &mut learner);

    let mut buf = Vec::new();
    {
        let mut io = ModelIo::writer(&mut buf, true);
        learner.save_load(&mut ws, &mut io).unwrap();
    }
    let text = String::from_utf8(buf.clone()).unwrap();
    // Stack order, outermost first.
    let stages: Vec<&str> = text.lines().map(|l| &l[..40usize.min(l.len())]).collect();
    assert_eq!(stages.len(), 2);
    assert!(stages[0].contains("offset_tree"));
    assert!(stages[1].contains("sgd"));

    let (mut ws2, mut learner2) = dense_stack(4, 0);
    let mut cursor = Cursor::new(buf);
    {
        let mut io = ModelIo::reader(&mut cursor, true);
        learner2.save_load(&mut ws2, &mut io).unwrap();
    }

    assert_eq!(predictions(&mut ws2, &mut learner2), trained);
}

#[test]
fn absent_stream_is_a_noop() {
    let (mut ws, mut learner) = dense_stack(4, 11);
    train_bandit(&mut ws, &mut learner, 20);
    let before = predictions(&mut ws, &mut learner);

    let mut io = ModelIo::absent();
    learner.save_load(&mut ws, &mut io).unwrap();

    assert_eq!(predictions(&mut ws, &mut learner), before);
}

#[test]
fn sparse_stack_round_trips() {
    // Same address space, different backing: the record is backing-agnostic.
    let (mut ws, mut learner) = sparse_stack(4, 11);
    train_bandit(&mut ws, &mut learner, 60);
    let trained = predictions(&mut ws, &mut learner);

    let mut buf = Vec::new();
    {
        let mut io = ModelIo::writer(&mut buf, false);
        learner.save_load(&mut ws, &mut io).unwrap();
    }

    let (mut ws2, mut learner2) = sparse_stack(4, 0);
    let mut cursor = Cursor::new(buf);
    {
        let mut io = ModelIo::reader(&mut cursor, false);
        learner2.save_load(&mut ws2, &mut io).unwrap();
    }
    assert_eq!(predictions(&mut ws2, &mut learner2), trained);
}

#[test]
fn shallow_copied_store_predicts_identically() {
    let (mut ws, mut learner) = dense_stack(4, 11);
    train_bandit(&mut ws, &mut learner, 60);
    let trained = predictions(&mut ws, &mut learner);

    // Fresh stack, adopting the trained weights read-only.
    let (mut ws2, mut learner2) = dense_stack(4, 0);
    ws2.params.shallow_copy(&ws.params);
    assert!(ws2.params.is_seeded());

    assert_eq!(predictions(&mut ws2, &mut learner2), trained);
}

#[test]
fn finish_releases_the_chain_once() {
    let (mut ws, mut learner) = dense_stack(4, 11);
    train_bandit(&mut ws, &mut learner, 5);
    // Consumes the chain; a second finish is unrepresentable.
    learner.finish(&mut ws);
}

#[test]
fn end_pass_folds_without_disturbing_predictions() {
    let (mut ws, mut learner) = dense_stack(4, 11);
    train_bandit(&mut ws, &mut learner, 30);
    let before = predictions(&mut ws, &mut learner);

    ws.count_pass();
    learner.end_pass(&mut ws);
    learner.end_examples(&mut ws);

    assert_eq!(predictions(&mut ws, &mut learner), before);
}

#[test]
fn stride_mismatch_is_rejected_on_load() {
    use reducers::sgd::SgdConfig;
    use reducers::workspace::WorkspaceConfig;

    let (mut ws, mut learner) = dense_stack(4, 11);
    train_bandit(&mut ws, &mut learner, 10);

    let mut buf = Vec::new();
    {
        let mut io = ModelIo::writer(&mut buf, false);
        learner.save_load(&mut ws, &mut io).unwrap();
    }

    // Adaptive store has stride 2; the record was written for stride 1.
    let (mut ws2, mut learner2) = common::offset_tree_stack(
        4,
        WorkspaceConfig::builder().num_bits(14u32).build().unwrap(),
        SgdConfig::builder().adaptive(true).build().unwrap(),
    );
    let mut cursor = Cursor::new(buf);
    let mut io = ModelIo::reader(&mut cursor, false);
    let err = learner2.save_load(&mut ws2, &mut io).unwrap_err();
    assert!(matches!(err, reducers::PersistError::Corrupt(_)));
}

#[test]
fn dense_and_sparse_train_identically() {
    // Same seed, same sequence, both backings: identical predictions and
    // identical non-zero blocks.
    let (mut dense_ws, mut dense_learner) = dense_stack(4, 21);
    let (mut sparse_ws, mut sparse_learner) = {
        use reducers::sgd::SgdConfig;
        use reducers::workspace::WorkspaceConfig;
        common::offset_tree_stack(
            4,
            WorkspaceConfig::builder()
                .num_bits(14u32)
                .sparse(true)
                .seed(21u64)
                .build()
                .unwrap(),
            SgdConfig::builder().learning_rate(0.25f32).build().unwrap(),
        )
    };

    train_bandit(&mut dense_ws, &mut dense_learner, 40);
    train_bandit(&mut sparse_ws, &mut sparse_learner, 40);

    assert_eq!(
        predictions(&mut dense_ws, &mut dense_learner),
        predictions(&mut sparse_ws, &mut sparse_learner)
    );

    let dense_blocks: Vec<(u64, Vec<f32>)> = dense_ws
        .params
        .nonzero_blocks()
        .into_iter()
        .map(|(id, b)| (id, b.to_vec()))
        .collect();
    let sparse_blocks: Vec<(u64, Vec<f32>)> = sparse_ws
        .params
        .nonzero_blocks()
        .into_iter()
        .map(|(id, b)| (id, b.to_vec()))
        .collect();
    assert_eq!(dense_blocks, sparse_blocks);
}

#[test]
fn seeded_store_kind_is_visible() {
    let original = Parameters::new_dense(10, 0);
    let mut copy = Parameters::new_dense(10, 0);
    copy.shallow_copy(&original);
    assert!(copy.is_seeded());
    assert!(!original.is_seeded());
}
