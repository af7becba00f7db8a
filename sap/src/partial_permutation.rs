//! Partial permutations between a full index space and a contiguous subset of it.

use crate::Error;

/// Policy for entries of the full vector that do not participate in a permutation when scattering
/// permuted values back into full space.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScatterPolicy {
    /// Leave non-participating entries as they are.
    Untouched,
    /// Set non-participating entries to zero.
    Zeroed,
}

/// A bijection between a subset of the indices `0..N` of a "full" space and the contiguous range
/// `0..M` of a "permuted" space, `M <= N`.
///
/// The mapping is stored as two integer tables. Entries of the full table that do not
/// participate hold the `INVALID` sentinel.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct PartialPermutation {
    /// Permuted index for each full index or `INVALID` if the full index does not participate.
    permutation: Vec<usize>,
    /// Full index for each permuted index.
    inverse: Vec<usize>,
}

impl PartialPermutation {
    const INVALID: usize = usize::MAX;

    /// Creates a permutation of a full domain of size `domain_size` where the `k`-th entry of
    /// `participating` is mapped to permuted index `k`.
    ///
    /// Fails if any of the participating indices is out of range or appears more than once.
    pub fn new(domain_size: usize, participating: &[usize]) -> Result<Self, Error> {
        let mut permutation = vec![Self::INVALID; domain_size];
        for (permuted, &full) in participating.iter().enumerate() {
            if full >= domain_size {
                return Err(Error::OutOfRange {
                    index: full,
                    size: domain_size,
                });
            }
            if permutation[full] != Self::INVALID {
                return Err(Error::invalid_argument(format!(
                    "index {} participates more than once",
                    full
                )));
            }
            permutation[full] = permuted;
        }
        Ok(PartialPermutation {
            permutation,
            inverse: participating.to_vec(),
        })
    }

    /// Creates a permutation in which every index `i` with `participates[i] == true` is mapped to
    /// the next available permuted index in increasing order of `i`.
    pub fn from_participation(participates: &[bool]) -> Self {
        let mut inverse = Vec::new();
        let permutation = participates
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                if p {
                    inverse.push(i);
                    inverse.len() - 1
                } else {
                    Self::INVALID
                }
            })
            .collect();
        PartialPermutation {
            permutation,
            inverse,
        }
    }

    /// The identity permutation over `0..n`.
    pub fn identity(n: usize) -> Self {
        PartialPermutation {
            permutation: (0..n).collect(),
            inverse: (0..n).collect(),
        }
    }

    /// Size `N` of the full domain.
    #[inline]
    pub fn domain_size(&self) -> usize {
        self.permutation.len()
    }

    /// Size `M` of the permuted domain.
    #[inline]
    pub fn permuted_domain_size(&self) -> usize {
        self.inverse.len()
    }

    #[inline]
    pub fn participates(&self, full_index: usize) -> bool {
        self.permutation
            .get(full_index)
            .map_or(false, |&p| p != Self::INVALID)
    }

    /// Permuted index of the given full index.
    pub fn permuted_index(&self, full_index: usize) -> Result<usize, Error> {
        match self.permutation.get(full_index) {
            None => Err(Error::OutOfRange {
                index: full_index,
                size: self.domain_size(),
            }),
            Some(&p) if p == Self::INVALID => Err(Error::invalid_argument(format!(
                "index {} does not participate in the permutation",
                full_index
            ))),
            Some(&p) => Ok(p),
        }
    }

    /// Full index of the given permuted index.
    ///
    /// # Panics
    ///
    /// This function panics if `permuted_index` is not in `0..M`.
    #[inline]
    pub fn full_index(&self, permuted_index: usize) -> usize {
        self.inverse[permuted_index]
    }

    /// Full indices ordered by their permuted index.
    #[inline]
    pub fn permuted_to_full(&self) -> &[usize] {
        &self.inverse
    }

    /// Gathers the participating entries of `full` into a new permuted vector.
    pub fn apply<T: Copy>(&self, full: &[T]) -> Vec<T> {
        assert_eq!(full.len(), self.domain_size());
        self.inverse.iter().map(|&i| full[i]).collect()
    }

    /// Gathers the participating entries of `full` into `permuted`.
    pub fn apply_into<T: Copy>(&self, full: &[T], permuted: &mut [T]) {
        assert_eq!(full.len(), self.domain_size());
        assert_eq!(permuted.len(), self.permuted_domain_size());
        for (out, &i) in permuted.iter_mut().zip(self.inverse.iter()) {
            *out = full[i];
        }
    }

    /// Scatters `permuted` into the participating entries of `full`.
    ///
    /// Non-participating entries are handled according to `policy`.
    pub fn apply_inverse(&self, permuted: &[f64], full: &mut [f64], policy: ScatterPolicy) {
        assert_eq!(full.len(), self.domain_size());
        assert_eq!(permuted.len(), self.permuted_domain_size());
        if policy == ScatterPolicy::Zeroed {
            full.iter_mut().for_each(|x| *x = 0.0);
        }
        for (&p, &i) in permuted.iter().zip(self.inverse.iter()) {
            full[i] = p;
        }
    }

    /// Composes this permutation with a permutation of its permuted space.
    ///
    /// The result maps full indices of `self` directly to the permuted indices of `inner`. A full
    /// index participates in the result only if its image under `self` participates in `inner`.
    pub fn compose(&self, inner: &PartialPermutation) -> Result<PartialPermutation, Error> {
        if inner.domain_size() != self.permuted_domain_size() {
            return Err(Error::SizeMismatch {
                expected: self.permuted_domain_size(),
                actual: inner.domain_size(),
            });
        }
        let participating: Vec<usize> = inner
            .inverse
            .iter()
            .map(|&middle| self.inverse[middle])
            .collect();
        PartialPermutation::new(self.domain_size(), &participating)
    }

    /// Lifts a permutation of blocks to a permutation of their scalar entries.
    ///
    /// `block_sizes[b]` is the number of entries in full block `b`. Entries of a participating
    /// block keep their relative order and blocks are laid out in permuted block order.
    pub fn expand(&self, block_sizes: &[usize]) -> Result<PartialPermutation, Error> {
        if block_sizes.len() != self.domain_size() {
            return Err(Error::SizeMismatch {
                expected: self.domain_size(),
                actual: block_sizes.len(),
            });
        }
        let mut block_starts = Vec::with_capacity(block_sizes.len());
        let mut n = 0;
        for &size in block_sizes {
            block_starts.push(n);
            n += size;
        }
        let participating: Vec<usize> = self
            .inverse
            .iter()
            .flat_map(|&b| block_starts[b]..block_starts[b] + block_sizes[b])
            .collect();
        PartialPermutation::new(n, &participating)
    }
}
