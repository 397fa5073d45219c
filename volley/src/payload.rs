//! Request payload production.
use crate::error::PayloadError;
use rand::Rng;
use std::path::Path;

/// Produces the raw text a workflow iteration is built around.
///
/// Implementations are called from every VU concurrently and must never block for long; any
/// expensive setup (such as loading a corpus) belongs in the constructor.
pub trait PayloadProducer: Send + Sync {
    fn produce(&self, iteration: u64) -> Result<Vec<u8>, PayloadError>;
}

impl<F> PayloadProducer for F
where
    F: Fn(u64) -> Result<Vec<u8>, PayloadError> + Send + Sync,
{
    fn produce(&self, iteration: u64) -> Result<Vec<u8>, PayloadError> {
        self(iteration)
    }
}

/// Samples a random snippet of up to `snippet_len` characters out of a preloaded text corpus.
///
/// Snippets starting near the end of the corpus are shorter, rather than wrapping around.
#[derive(Debug, Clone)]
pub struct CorpusSampler {
    corpus: String,
    snippet_len: usize,
}

impl CorpusSampler {
    pub fn new(corpus: impl Into<String>, snippet_len: usize) -> Result<Self, PayloadError> {
        let corpus = corpus.into();
        if corpus.is_empty() {
            return Err(PayloadError::EmptyCorpus);
        }

        Ok(Self {
            corpus,
            snippet_len,
        })
    }

    /// Load a corpus from disk. Invalid UTF-8 sequences are replaced rather than rejected.
    pub fn from_file(path: impl AsRef<Path>, snippet_len: usize) -> Result<Self, PayloadError> {
        let bytes = std::fs::read(path)?;
        Self::new(String::from_utf8_lossy(&bytes), snippet_len)
    }

    pub fn corpus_len(&self) -> usize {
        self.corpus.len()
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> &str {
        let mut start = rng.gen_range(0..self.corpus.len());
        while !self.corpus.is_char_boundary(start) {
            start -= 1;
        }

        let rest = &self.corpus[start..];
        let end = rest
            .char_indices()
            .nth(self.snippet_len)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());

        &rest[..end]
    }
}

impl PayloadProducer for CorpusSampler {
    fn produce(&self, _iteration: u64) -> Result<Vec<u8>, PayloadError> {
        Ok(self.sample(&mut rand::thread_rng()).as_bytes().to_vec())
    }
}
