// THEORY:
// Every per-pixel step of the novelty update is a pure function of the values at
// one index. The `Backend` decides only *how* those functions are swept over a
// grid: a plain loop on the calling thread, or rayon's data-parallel iterators.
// The math itself lives in `event.rs` and is shared by both, so the choice of
// backend can never change a result, only how long it takes.
//
// Parallelism here is strictly within one frame. The ordering of frames is
// still owned by the caller, which applies updates one after another.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Execution strategy for elementwise grid operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// A single loop on the calling thread.
    #[default]
    Sequential,
    /// Rayon work-stealing over the grid's flat storage.
    Parallel,
}

impl Backend {
    /// Overwrites every cell with `f(index)`.
    pub fn fill<T, F>(&self, cells: &mut [T], f: F)
    where
        T: Send,
        F: Fn(usize) -> T + Sync + Send,
    {
        match self {
            Backend::Sequential => {
                for (i, cell) in cells.iter_mut().enumerate() {
                    *cell = f(i);
                }
            }
            Backend::Parallel => {
                cells
                    .par_iter_mut()
                    .enumerate()
                    .for_each(|(i, cell)| *cell = f(i));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backends_fill_identically() {
        let mut sequential = vec![0u64; 1000];
        let mut parallel = vec![0u64; 1000];
        Backend::Sequential.fill(&mut sequential, |i| (i as u64 * 31) % 17);
        Backend::Parallel.fill(&mut parallel, |i| (i as u64 * 31) % 17);
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn deserializes_from_snake_case() {
        let backend: Backend = serde_json::from_str("\"parallel\"").unwrap();
        assert_eq!(backend, Backend::Parallel);
        assert_eq!(Backend::default(), Backend::Sequential);
    }
}
