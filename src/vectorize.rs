use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;
use thiserror::Error;

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\w\w+\b").expect("token pattern is valid"));

#[derive(Error, Debug, PartialEq, Eq)]
pub enum VectorizeError {
    #[error("empty vocabulary; {documents} document(s) contain no tokens")]
    EmptyVocabulary { documents: usize },
}

#[derive(Debug, Clone)]
pub struct TfidfVectorizer {
    vocabulary: HashMap<String, usize>,
    idf: Vec<f64>,
}

// Lowercase the whole text before matching; folding can change word classes.
fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    TOKEN
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

impl TfidfVectorizer {
    pub fn fit(documents: &[&str]) -> Result<Self, VectorizeError> {
        let mut document_frequency: BTreeMap<String, usize> = BTreeMap::new();
        for doc in documents {
            let unique: HashSet<String> = tokenize(doc).into_iter().collect();
            for term in unique {
                *document_frequency.entry(term).or_default() += 1;
            }
        }

        if document_frequency.is_empty() {
            return Err(VectorizeError::EmptyVocabulary {
                documents: documents.len(),
            });
        }

        let n = documents.len() as f64;
        let mut vocabulary = HashMap::with_capacity(document_frequency.len());
        let mut idf = Vec::with_capacity(document_frequency.len());
        // BTreeMap iteration gives the sorted feature order.
        for (index, (term, df)) in document_frequency.into_iter().enumerate() {
            idf.push(((1.0 + n) / (1.0 + df as f64)).ln() + 1.0);
            vocabulary.insert(term, index);
        }

        log::debug!(
            "Fitted TF-IDF over {} documents, vocabulary size {}",
            documents.len(),
            idf.len()
        );
        Ok(Self { vocabulary, idf })
    }

    pub fn fit_transform(documents: &[&str]) -> Result<(Self, Vec<Vec<f32>>), VectorizeError> {
        let vectorizer = Self::fit(documents)?;
        let vectors = documents.iter().map(|d| vectorizer.transform(d)).collect();
        Ok((vectorizer, vectors))
    }

    /// Vector length shared by every transformed document.
    pub fn dimension(&self) -> usize {
        self.idf.len()
    }

    #[cfg(test)]
    fn feature_index(&self, term: &str) -> Option<usize> {
        self.vocabulary.get(term).copied()
    }

    /// Dense, L2-normalized vector. Documents without known terms map to the
    /// zero vector.
    pub fn transform(&self, document: &str) -> Vec<f32> {
        let mut weights = vec![0.0f64; self.dimension()];
        for term in tokenize(document) {
            if let Some(&idx) = self.vocabulary.get(&term) {
                weights[idx] += 1.0;
            }
        }
        for (w, idf) in weights.iter_mut().zip(&self.idf) {
            *w *= idf;
        }

        let norm = weights.iter().map(|w| w * w).sum::<f64>().sqrt();
        if norm > 0.0 {
            for w in weights.iter_mut() {
                *w /= norm;
            }
        }
        weights.into_iter().map(|w| w as f32).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn matches_smoothed_idf_weights() {
        let (vectorizer, vectors) =
            TfidfVectorizer::fit_transform(&["a cat sat", "a dog sat"]).unwrap();
        assert_eq!(vectorizer.dimension(), 3);
        assert_eq!(vectorizer.feature_index("cat"), Some(0));
        assert_eq!(vectorizer.feature_index("dog"), Some(1));
        assert_eq!(vectorizer.feature_index("sat"), Some(2));
        // single-character tokens are not features
        assert_eq!(vectorizer.feature_index("a"), None);

        let first = &vectors[0];
        assert!(approx(first[0], 0.814_802_5), "{first:?}");
        assert!(approx(first[1], 0.0));
        assert!(approx(first[2], 0.579_738_7), "{first:?}");
    }

    #[test]
    fn every_vector_has_vocabulary_length() {
        let docs = [
            "A man finds a box.",
            "Two sisters open a bakery in Lisbon.",
            "Robots!",
        ];
        let (vectorizer, vectors) = TfidfVectorizer::fit_transform(&docs).unwrap();
        assert!(vectors.iter().all(|v| v.len() == vectorizer.dimension()));
    }

    #[test]
    fn vectors_are_unit_length() {
        let (_, vectors) =
            TfidfVectorizer::fit_transform(&["The Quick brown fox", "the lazy dog dog"]).unwrap();
        for v in vectors {
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!(approx(norm, 1.0));
        }
    }

    #[test]
    fn lowercases_before_counting() {
        let vectorizer = TfidfVectorizer::fit(&["Box BOX box"]).unwrap();
        assert_eq!(vectorizer.dimension(), 1);
    }

    #[test]
    fn tokens_come_from_the_lowercased_document() {
        for text in ["İSTANBUL Nights", "ΣΟΦΟΣ σοφος", "Straße STRASSE"] {
            let lowered = text.to_lowercase();
            let expected: Vec<String> = TOKEN
                .find_iter(&lowered)
                .map(|m| m.as_str().to_string())
                .collect();
            assert_eq!(tokenize(text), expected);
        }
        assert_eq!(tokenize("Box BOX"), vec!["box".to_string(), "box".to_string()]);
    }

    #[test]
    fn unknown_terms_give_zero_vector() {
        let vectorizer = TfidfVectorizer::fit(&["known words"]).unwrap();
        assert!(vectorizer.transform("x y z").iter().all(|w| *w == 0.0));
    }

    #[test]
    fn empty_vocabulary_is_an_error() {
        assert_eq!(
            TfidfVectorizer::fit(&["a", "! ?"]).unwrap_err(),
            VectorizeError::EmptyVocabulary { documents: 2 }
        );
        assert!(TfidfVectorizer::fit(&[]).is_err());
    }
}
