//! Graph of cliques coupled by constraints.
//!
//! Nodes of the graph are cliques and edges are clique pairs coupled by at least one constraint.
//! All constraints coupling the same pair of cliques are grouped into a single
//! [`ConstraintCluster`]. Clusters define the block rows of the constraint Jacobian and the
//! off-diagonal block structure of the SAP Hessian.

use ahash::AHashMap;

use crate::{Error, PartialPermutation};

/// Unordered pair of clique indices stored as `(min, max)`.
///
/// A pair with equal entries denotes a self edge, i.e. constraints acting on a single clique.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CliquePair(usize, usize);

impl CliquePair {
    pub fn new(a: usize, b: usize) -> Self {
        if a <= b {
            CliquePair(a, b)
        } else {
            CliquePair(b, a)
        }
    }

    /// A pair referring to a single clique.
    pub fn single(c: usize) -> Self {
        CliquePair(c, c)
    }

    #[inline]
    pub fn first(&self) -> usize {
        self.0
    }

    #[inline]
    pub fn second(&self) -> usize {
        self.1
    }

    #[inline]
    pub fn is_self_edge(&self) -> bool {
        self.0 == self.1
    }
}

/// All constraints between the same pair of cliques.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstraintCluster {
    cliques: CliquePair,
    /// Constraint indices in increasing order.
    constraint_index: Vec<usize>,
    /// Number of equations of each constraint in `constraint_index`.
    constraint_num_equations: Vec<usize>,
    num_total_constraint_equations: usize,
}

impl ConstraintCluster {
    fn new(cliques: CliquePair) -> Self {
        ConstraintCluster {
            cliques,
            constraint_index: Vec::new(),
            constraint_num_equations: Vec::new(),
            num_total_constraint_equations: 0,
        }
    }

    #[inline]
    pub fn cliques(&self) -> CliquePair {
        self.cliques
    }

    #[inline]
    pub fn is_self_edge(&self) -> bool {
        self.cliques.is_self_edge()
    }

    #[inline]
    pub fn constraint_index(&self) -> &[usize] {
        &self.constraint_index
    }

    #[inline]
    pub fn num_constraints(&self) -> usize {
        self.constraint_index.len()
    }

    #[inline]
    pub fn num_constraint_equations(&self, k: usize) -> usize {
        self.constraint_num_equations[k]
    }

    #[inline]
    pub fn num_total_constraint_equations(&self) -> usize {
        self.num_total_constraint_equations
    }
}

/// Topology of a contact problem in terms of cliques and constraint clusters.
#[derive(Clone, Debug)]
pub struct ContactProblemGraph {
    num_cliques: usize,
    clusters: Vec<ConstraintCluster>,
    /// Cluster index of each constraint.
    constraint_cluster: Vec<usize>,
    num_constraint_equations: usize,
    cluster_lookup: AHashMap<CliquePair, usize>,
}

impl ContactProblemGraph {
    pub fn new(num_cliques: usize) -> Self {
        ContactProblemGraph {
            num_cliques,
            clusters: Vec::new(),
            constraint_cluster: Vec::new(),
            num_constraint_equations: 0,
            cluster_lookup: AHashMap::new(),
        }
    }

    /// Adds the next constraint acting on `first` and optionally `second` clique.
    ///
    /// Constraints are implicitly numbered in the order they are added. Returns the index of the
    /// cluster the constraint was assigned to.
    pub fn add_constraint(
        &mut self,
        first: usize,
        second: Option<usize>,
        num_equations: usize,
    ) -> Result<usize, Error> {
        for c in std::iter::once(first).chain(second) {
            if c >= self.num_cliques {
                return Err(Error::OutOfRange {
                    index: c,
                    size: self.num_cliques,
                });
            }
        }
        Ok(self.push_constraint(first, second, num_equations))
    }

    /// Adds a constraint whose cliques are known to be in range.
    pub(crate) fn push_constraint(
        &mut self,
        first: usize,
        second: Option<usize>,
        num_equations: usize,
    ) -> usize {
        let pair = CliquePair::new(first, second.unwrap_or(first));
        let num_clusters = self.clusters.len();
        let cluster_idx = *self.cluster_lookup.entry(pair).or_insert(num_clusters);
        if cluster_idx == num_clusters {
            self.clusters.push(ConstraintCluster::new(pair));
        }

        let constraint_idx = self.constraint_cluster.len();
        let cluster = &mut self.clusters[cluster_idx];
        cluster.constraint_index.push(constraint_idx);
        cluster.constraint_num_equations.push(num_equations);
        cluster.num_total_constraint_equations += num_equations;
        self.constraint_cluster.push(cluster_idx);
        self.num_constraint_equations += num_equations;
        cluster_idx
    }

    #[inline]
    pub fn num_cliques(&self) -> usize {
        self.num_cliques
    }

    #[inline]
    pub fn num_clusters(&self) -> usize {
        self.clusters.len()
    }

    #[inline]
    pub fn num_constraints(&self) -> usize {
        self.constraint_cluster.len()
    }

    #[inline]
    pub fn num_constraint_equations(&self) -> usize {
        self.num_constraint_equations
    }

    #[inline]
    pub fn clusters(&self) -> &[ConstraintCluster] {
        &self.clusters
    }

    /// Index of the cluster containing the given constraint.
    #[inline]
    pub fn cluster_of(&self, constraint: usize) -> usize {
        self.constraint_cluster[constraint]
    }

    /// Cliques referenced by at least one constraint, numbered in increasing clique order.
    pub fn participating_cliques(&self) -> PartialPermutation {
        let mut participates = vec![false; self.num_cliques];
        for cluster in self.clusters.iter() {
            participates[cluster.cliques.first()] = true;
            participates[cluster.cliques.second()] = true;
        }
        PartialPermutation::from_participation(&participates)
    }

    /// Builds the same graph with cliques renumbered by their participating index.
    ///
    /// Cluster order and constraint indices are preserved.
    pub fn make_graph_of_participating_cliques(&self) -> ContactProblemGraph {
        let participating = self.participating_cliques();
        let to_participating = |c: usize| {
            participating
                .permuted_index(c)
                .expect("every clique referenced by a cluster participates")
        };

        let clusters: Vec<_> = self
            .clusters
            .iter()
            .map(|cluster| ConstraintCluster {
                cliques: CliquePair::new(
                    to_participating(cluster.cliques.first()),
                    to_participating(cluster.cliques.second()),
                ),
                ..cluster.clone()
            })
            .collect();
        let cluster_lookup = clusters
            .iter()
            .enumerate()
            .map(|(i, cluster)| (cluster.cliques, i))
            .collect();

        ContactProblemGraph {
            num_cliques: participating.permuted_domain_size(),
            clusters,
            constraint_cluster: self.constraint_cluster.clone(),
            num_constraint_equations: self.num_constraint_equations,
            cluster_lookup,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_graph() -> Result<ContactProblemGraph, Error> {
        let mut graph = ContactProblemGraph::new(6);
        graph.add_constraint(3, Some(1), 3)?; // 0
        graph.add_constraint(4, None, 1)?; // 1
        graph.add_constraint(1, Some(3), 3)?; // 2
        graph.add_constraint(4, Some(4), 2)?; // 3
        graph.add_constraint(1, Some(5), 3)?; // 4
        Ok(graph)
    }

    #[test]
    fn clusters_in_first_seen_order() -> Result<(), Error> {
        let graph = make_graph()?;
        assert_eq!(graph.num_clusters(), 3);
        assert_eq!(graph.num_constraints(), 5);
        assert_eq!(graph.num_constraint_equations(), 12);

        let clusters = graph.clusters();
        assert_eq!(clusters[0].cliques(), CliquePair::new(1, 3));
        assert_eq!(clusters[0].constraint_index(), &[0, 2]);
        assert_eq!(clusters[0].num_total_constraint_equations(), 6);

        assert!(clusters[1].is_self_edge());
        assert_eq!(clusters[1].cliques(), CliquePair::single(4));
        assert_eq!(clusters[1].constraint_index(), &[1, 3]);
        assert_eq!(clusters[1].num_constraint_equations(1), 2);

        assert_eq!(clusters[2].cliques(), CliquePair::new(5, 1));
        assert_eq!(graph.cluster_of(4), 2);
        Ok(())
    }

    #[test]
    fn every_constraint_in_exactly_one_cluster() -> Result<(), Error> {
        let graph = make_graph()?;
        let mut seen = vec![0; graph.num_constraints()];
        for cluster in graph.clusters() {
            for &i in cluster.constraint_index() {
                seen[i] += 1;
            }
            assert!(cluster.constraint_index().windows(2).all(|w| w[0] < w[1]));
        }
        assert!(seen.iter().all(|&n| n == 1));

        let participating = graph.participating_cliques();
        assert_eq!(participating.permuted_to_full(), &[1, 3, 4, 5]);
        Ok(())
    }

    #[test]
    fn participating_graph() -> Result<(), Error> {
        let graph = make_graph()?.make_graph_of_participating_cliques();
        assert_eq!(graph.num_cliques(), 4);
        let pairs: Vec<_> = graph.clusters().iter().map(|c| c.cliques()).collect();
        assert_eq!(
            pairs,
            vec![
                CliquePair::new(0, 1),
                CliquePair::single(2),
                CliquePair::new(0, 3)
            ]
        );
        assert_eq!(graph.clusters()[0].constraint_index(), &[0, 2]);
        Ok(())
    }

    #[test]
    fn out_of_range_clique() {
        let mut graph = ContactProblemGraph::new(2);
        assert!(matches!(
            graph.add_constraint(0, Some(2), 1),
            Err(Error::OutOfRange { index: 2, size: 2 })
        ));
        assert_eq!(graph.num_constraints(), 0);
    }

    #[test]
    fn empty_graph() {
        let graph = ContactProblemGraph::new(0);
        assert_eq!(graph.num_clusters(), 0);
        assert_eq!(graph.participating_cliques().permuted_domain_size(), 0);
    }
}
