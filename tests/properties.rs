//! Property tests for the chunker and vector utilities.

use proptest::prelude::*;

use engram::chunk::chunk_text;
use engram::embedding::{average_embeddings, blob_to_vec, normalize_dimension, vec_to_blob};
use engram::models::EMBEDDING_DIM;

/// Stitch chunks back together using their offsets, dropping each chunk's
/// overlapping prefix.
fn reconstruct(text: &str, chunks: &[engram::chunk::TextChunk]) -> String {
    let mut out = String::new();
    let mut covered = 0usize;
    for c in chunks {
        assert!(c.start <= covered, "gap before chunk {}", c.index);
        out.push_str(&c.content[covered - c.start..]);
        covered = c.end;
    }
    out
}

proptest! {
    #[test]
    fn chunker_covers_any_input(
        text in ".{0,400}",
        max in 1usize..64,
        overlap in 0usize..64,
    ) {
        let chunks = chunk_text(&text, max, overlap);
        prop_assert_eq!(reconstruct(&text, &chunks), text.clone());
        for (i, c) in chunks.iter().enumerate() {
            prop_assert_eq!(c.index, i);
            prop_assert!(c.content.chars().count() <= max.max(1));
            prop_assert_eq!(&text[c.start..c.end], c.content.as_str());
        }
        // Offsets advance strictly, which is what guarantees termination.
        for pair in chunks.windows(2) {
            prop_assert!(pair[1].end > pair[0].end);
        }
    }

    #[test]
    fn averaging_is_permutation_invariant(
        vectors in proptest::collection::vec(
            proptest::collection::vec(-100.0f32..100.0, 8),
            1..6,
        ),
        seed in 0usize..120,
    ) {
        let mut shuffled = vectors.clone();
        // Cheap deterministic permutation.
        let len = shuffled.len();
        for i in 0..len {
            shuffled.swap(i, (i + seed) % len);
        }
        let a = average_embeddings(&vectors).unwrap();
        let b = average_embeddings(&shuffled).unwrap();
        prop_assert_eq!(a.len(), 8);
        for (x, y) in a.iter().zip(b.iter()) {
            prop_assert!((x - y).abs() < 1e-3);
        }
    }

    #[test]
    fn single_vector_average_is_identity(
        vector in proptest::collection::vec(-100.0f32..100.0, 1..32),
    ) {
        let out = average_embeddings(std::slice::from_ref(&vector)).unwrap();
        prop_assert_eq!(out, vector);
    }

    #[test]
    fn blob_roundtrip(vector in proptest::collection::vec(any::<f32>(), 0..64)) {
        let ok = vector.iter().all(|v| v.is_finite());
        prop_assume!(ok);
        prop_assert_eq!(blob_to_vec(&vec_to_blob(&vector)), vector);
    }

    #[test]
    fn normalized_vectors_are_768(len in 0usize..EMBEDDING_DIM + 1) {
        let vector = vec![0.25f32; len];
        let out = normalize_dimension(vector).unwrap();
        prop_assert_eq!(out.len(), EMBEDDING_DIM);
    }
}

#[test]
fn oversized_vectors_are_rejected() {
    assert!(normalize_dimension(vec![0.0; EMBEDDING_DIM + 1]).is_err());
}

#[test]
fn chunking_the_spec_example() {
    // "aaa. bbb. ccc. ddd." with max=10, overlap=2: sentence boundaries,
    // every chunk within budget, full coverage.
    let text = "aaa. bbb. ccc. ddd.";
    let chunks = chunk_text(text, 10, 2);
    assert!(chunks.len() >= 2);
    for c in &chunks {
        assert!(c.content.chars().count() <= 10);
    }
    for c in &chunks[..chunks.len() - 1] {
        assert!(c.content.trim_end().ends_with('.'), "{:?}", c.content);
    }
    assert_eq!(reconstruct(text, &chunks), text);
}
