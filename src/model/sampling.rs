use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::model::SamplingParams;

/// Temperature plus nucleus (top-p) sampling over a row of logits.
pub struct Sampler {
    temperature: f32,
    top_p: f32,
    rng: StdRng,
}

impl Sampler {
    pub fn new(params: &SamplingParams) -> Self {
        Self::with_rng(params, StdRng::from_os_rng())
    }

    pub fn with_rng(params: &SamplingParams, rng: StdRng) -> Self {
        Self {
            temperature: params.temperature as f32,
            top_p: params.top_p as f32,
            rng,
        }
    }

    /// Returns the chosen token index, or `None` for an empty row.
    pub fn sample(&mut self, logits: &[f32]) -> Option<usize> {
        if logits.is_empty() {
            return None;
        }
        if self.temperature <= 0.0 {
            return argmax(logits);
        }

        let max = logits
            .iter()
            .copied()
            .filter(|l| l.is_finite())
            .fold(f32::NEG_INFINITY, f32::max);
        if !max.is_finite() {
            return argmax(logits);
        }

        let mut probs: Vec<(usize, f32)> = logits
            .iter()
            .enumerate()
            .map(|(idx, &l)| {
                let p = if l.is_finite() {
                    ((l - max) / self.temperature).exp()
                } else {
                    0.0
                };
                (idx, p)
            })
            .collect();
        let total: f32 = probs.iter().map(|(_, p)| p).sum();
        probs.sort_by(|a, b| b.1.total_cmp(&a.1));

        // Smallest prefix whose mass reaches top_p; always keep the best token.
        let mut kept = 0usize;
        let mut mass = 0.0f32;
        for (_, p) in &probs {
            kept += 1;
            mass += p / total;
            if mass >= self.top_p {
                break;
            }
        }
        let nucleus = &probs[..kept];
        let nucleus_total: f32 = nucleus.iter().map(|(_, p)| p).sum();

        let mut target = self.rng.random::<f32>() * nucleus_total;
        for &(idx, p) in nucleus {
            if target < p {
                return Some(idx);
            }
            target -= p;
        }
        nucleus.last().map(|&(idx, _)| idx)
    }
}

fn argmax(logits: &[f32]) -> Option<usize> {
    logits
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(idx, _)| idx)
}
