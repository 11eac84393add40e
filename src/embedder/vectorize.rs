//! Deterministic feature-hashing embedder.
//!
//! Enrichment text is tokenized into words and bigrams, each rapidhashed
//! into one of 384 buckets with a hash-derived sign, and the result
//! L2-normalized. Deterministic and good enough for cosine reranking; a
//! learned model can replace it behind the same signature.

use rapidhash::v3::rapidhash_v3;

pub const DIMENSIONS: usize = 384;

/// Embed a text block. Returns `None` when the text carries no usable
/// tokens.
pub fn embed(text: &str) -> Option<Vec<f32>> {
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return None;
    }

    let mut vector = vec![0f32; DIMENSIONS];
    for token in &tokens {
        let (bucket, sign) = hash_feature(token);
        vector[bucket] += sign;
    }
    for pair in tokens.windows(2) {
        let bigram = format!("{} {}", pair[0], pair[1]);
        let (bucket, sign) = hash_feature(&bigram);
        vector[bucket] += sign;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return None;
    }
    for value in &mut vector {
        *value /= norm;
    }
    Some(vector)
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.len() >= 2)
        .map(str::to_lowercase)
        .collect()
}

fn hash_feature(feature: &str) -> (usize, f32) {
    let hash = rapidhash_v3(feature.as_bytes());
    let bucket = (hash % DIMENSIONS as u64) as usize;
    // The bucket consumes the low bits; take the sign from the high end
    let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
    (bucket, sign)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_is_deterministic() {
        let a = embed("riverside pub with garden and local ales").unwrap();
        let b = embed("riverside pub with garden and local ales").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn embedding_is_unit_length() {
        let vector = embed("seasonal menu, dog friendly, live music on fridays").unwrap();
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(vector.len(), DIMENSIONS);
    }

    #[test]
    fn different_texts_differ() {
        let a = embed("riverside pub with garden").unwrap();
        let b = embed("modern art museum with cafe").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn empty_text_has_no_embedding() {
        assert!(embed("").is_none());
        assert!(embed("a . !").is_none());
    }

    #[test]
    fn similar_texts_are_closer_than_dissimilar() {
        let pub_a = embed("riverside pub serving ales and seasonal food").unwrap();
        let pub_b = embed("riverside pub with seasonal food and ales").unwrap();
        let museum = embed("contemporary sculpture museum admission tickets").unwrap();

        let cosine = |a: &[f32], b: &[f32]| -> f32 {
            a.iter().zip(b).map(|(x, y)| x * y).sum()
        };
        assert!(cosine(&pub_a, &pub_b) > cosine(&pub_a, &museum));
    }
}
