// Batched spaces: the N-fold copy of a single space, as seen by a vector env.

use rand::Rng;

use super::space::{FlatSpace, Space};

/// `n` independent copies of `single`. Elements are vectors of length `n`.
#[derive(Clone, Debug, PartialEq)]
pub struct Batched<S> {
    single: S,
    n: usize,
}

impl<S> Batched<S> {
    pub fn new(single: S, n: usize) -> Self { Self { single, n } }

    /// The space of one slot.
    pub fn single(&self) -> &S { &self.single }

    /// Number of slots.
    pub fn n(&self) -> usize { self.n }
}

impl<S: Space> Space for Batched<S> {
    type Element = Vec<S::Element>;

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Self::Element {
        (0..self.n).map(|_| self.single.sample(rng)).collect()
    }

    fn contains(&self, elem: &Self::Element) -> bool {
        elem.len() == self.n && elem.iter().all(|e| self.single.contains(e))
    }

    fn has_shape(&self, elem: &Self::Element) -> bool {
        elem.len() == self.n && elem.iter().all(|e| self.single.has_shape(e))
    }
}

impl<S: FlatSpace> FlatSpace for Batched<S> {
    fn flat_dim(&self) -> usize { self.n * self.single.flat_dim() }

    fn flatten_into(&self, elem: &Self::Element, out: &mut [u64]) {
        let dim = self.single.flat_dim();
        for (e, chunk) in elem.iter().zip(out.chunks_mut(dim.max(1))) {
            self.single.flatten_into(e, chunk);
        }
    }

    fn unflatten(&self, lanes: &[u64]) -> Self::Element {
        let dim = self.single.flat_dim();
        (0..self.n).map(|i| self.single.unflatten(&lanes[i * dim..(i + 1) * dim])).collect()
    }
}
