//! Similarity clustering and keeper selection.
//!
//! Images are grouped by connected components over the "similarity ≥
//! threshold" graph, so chains of near-duplicates land in one cluster even
//! when the endpoints alone fall below the threshold. Components are
//! tracked with a disjoint-set over image indices; the O(n²) pairwise
//! comparisons run on the rayon pool.

use std::path::Path;

use rayon::prelude::*;

use crate::error::{CullError, Result};
use crate::fingerprint::Fingerprint;

/// Disjoint-set forest with union by size and path halving.
struct DisjointSet {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (mut ra, mut rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        if self.size[ra] < self.size[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        self.size[ra] += self.size[rb];
    }
}

/// Partition fingerprints into clusters at the given similarity threshold.
///
/// The threshold is a percentage and inclusive: a pair at exactly the
/// threshold is linked. Values outside [0, 100] are rejected up front.
/// Every index appears in exactly one cluster; singletons are valid
/// clusters. Output order is deterministic: clusters sorted by their
/// smallest member, members ascending.
pub fn group_by_similarity(
    fingerprints: &[Fingerprint],
    threshold: f64,
) -> Result<Vec<Vec<usize>>> {
    if !(0.0..=100.0).contains(&threshold) || threshold.is_nan() {
        return Err(CullError::InvalidThreshold(threshold));
    }

    let n = fingerprints.len();
    let edges: Vec<(usize, usize)> = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut linked = Vec::new();
            for j in i + 1..n {
                if fingerprints[i].similarity(&fingerprints[j])? >= threshold {
                    linked.push((i, j));
                }
            }
            Ok(linked)
        })
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .flatten()
        .collect();

    let mut sets = DisjointSet::new(n);
    for (i, j) in edges {
        sets.union(i, j);
    }

    let mut by_root: Vec<Vec<usize>> = vec![Vec::new(); n];
    for i in 0..n {
        let root = sets.find(i);
        by_root[root].push(i);
    }
    let mut clusters: Vec<Vec<usize>> = by_root.into_iter().filter(|c| !c.is_empty()).collect();
    clusters.sort_by_key(|c| c[0]);
    Ok(clusters)
}

/// Mean pairwise similarity within a cluster; 100 for singletons.
pub fn average_similarity(fingerprints: &[Fingerprint], members: &[usize]) -> Result<f64> {
    let mut total = 0.0;
    let mut pairs = 0usize;
    for (pos, &a) in members.iter().enumerate() {
        for &b in &members[pos + 1..] {
            total += fingerprints[a].similarity(&fingerprints[b])?;
            pairs += 1;
        }
    }
    if pairs == 0 {
        Ok(100.0)
    } else {
        Ok(total / pairs as f64)
    }
}

/// Pick the keeper among `(path, composite score)` candidates: maximum
/// score, exact ties broken by lexicographically smallest path so reruns
/// always agree. Returns the index into `candidates`.
pub fn select_keeper(candidates: &[(&Path, f64)]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (idx, &(path, score)) in candidates.iter().enumerate() {
        best = match best {
            None => Some(idx),
            Some(cur) => {
                let (cur_path, cur_score) = candidates[cur];
                if score > cur_score || (score == cur_score && path < cur_path) {
                    Some(idx)
                } else {
                    Some(cur)
                }
            }
        };
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    /// 100-bit fingerprint with the given positions set.
    fn fp(set_bits: &[usize]) -> Fingerprint {
        let mut bits = vec![false; 100];
        for &i in set_bits {
            bits[i] = true;
        }
        Fingerprint::from_bits(&bits)
    }

    #[test]
    fn threshold_out_of_range_rejected() {
        let fps = vec![fp(&[])];
        assert!(matches!(
            group_by_similarity(&fps, -1.0),
            Err(CullError::InvalidThreshold(_))
        ));
        assert!(matches!(
            group_by_similarity(&fps, 100.5),
            Err(CullError::InvalidThreshold(_))
        ));
        assert!(group_by_similarity(&fps, f64::NAN).is_err());
    }

    #[test]
    fn empty_input_yields_no_clusters() {
        assert!(group_by_similarity(&[], 70.0).unwrap().is_empty());
    }

    #[test]
    fn clusters_partition_the_input() {
        let fps = vec![fp(&[]), fp(&[0]), fp(&(0..60).collect::<Vec<_>>()), fp(&[1, 2])];
        let clusters = group_by_similarity(&fps, 90.0).unwrap();
        let mut seen: Vec<usize> = clusters.iter().flatten().copied().collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn transitive_chain_merges_below_threshold_endpoints() {
        // d(a,b)=5, d(b,c)=20, d(a,c)=25 → similarities 95, 80, 75.
        let a = fp(&[]);
        let b = fp(&[0, 1, 2, 3, 4]);
        let c = fp(&(0..25).collect::<Vec<_>>());
        assert_eq!(a.similarity(&b).unwrap(), 95.0);
        assert_eq!(b.similarity(&c).unwrap(), 80.0);
        assert_eq!(a.similarity(&c).unwrap(), 75.0);

        // At 78, a–c alone is below threshold but the chain through b
        // still pulls all three together.
        let clusters = group_by_similarity(&[a.clone(), b.clone(), c.clone()], 78.0).unwrap();
        assert_eq!(clusters, vec![vec![0, 1, 2]]);

        // At 85 the b–c link breaks: {a, b} and {c}.
        let clusters = group_by_similarity(&[a, b, c], 85.0).unwrap();
        assert_eq!(clusters, vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn threshold_is_inclusive() {
        let a = fp(&[]);
        let b = fp(&(0..30).collect::<Vec<_>>()); // similarity exactly 70
        assert_eq!(a.similarity(&b).unwrap(), 70.0);
        let clusters = group_by_similarity(&[a, b], 70.0).unwrap();
        assert_eq!(clusters, vec![vec![0, 1]]);
    }

    #[test]
    fn raising_threshold_only_refines() {
        let fps: Vec<Fingerprint> = (0..8)
            .map(|i| fp(&(0..i * 4).collect::<Vec<_>>()))
            .collect();
        let coarse = group_by_similarity(&fps, 70.0).unwrap();
        let fine = group_by_similarity(&fps, 90.0).unwrap();

        // Every fine cluster must sit entirely inside one coarse cluster.
        for small in &fine {
            assert!(
                coarse
                    .iter()
                    .any(|big| small.iter().all(|m| big.contains(m))),
                "cluster {small:?} split across coarse clusters {coarse:?}"
            );
        }
    }

    #[test]
    fn identical_fingerprints_always_cluster() {
        let fps = vec![fp(&[3, 7]), fp(&[3, 7])];
        let clusters = group_by_similarity(&fps, 100.0).unwrap();
        assert_eq!(clusters, vec![vec![0, 1]]);
    }

    #[test]
    fn keeper_is_max_score() {
        let a = PathBuf::from("/photos/a.jpg");
        let b = PathBuf::from("/photos/b.jpg");
        let keeper = select_keeper(&[(a.as_path(), 98.7), (b.as_path(), 115.3)]);
        assert_eq!(keeper, Some(1));
    }

    #[test]
    fn keeper_tie_breaks_on_smallest_path() {
        let a = PathBuf::from("/photos/zz.jpg");
        let b = PathBuf::from("/photos/aa.jpg");
        let c = PathBuf::from("/photos/mm.jpg");
        let keeper = select_keeper(&[
            (a.as_path(), 50.0),
            (b.as_path(), 50.0),
            (c.as_path(), 50.0),
        ]);
        assert_eq!(keeper, Some(1));
    }

    #[test]
    fn keeper_selection_is_stable_across_reruns() {
        let a = PathBuf::from("/photos/a.jpg");
        let b = PathBuf::from("/photos/b.jpg");
        let candidates = [(a.as_path(), 12.5), (b.as_path(), 12.0)];
        let first = select_keeper(&candidates);
        for _ in 0..10 {
            assert_eq!(select_keeper(&candidates), first);
        }
    }

    #[test]
    fn no_keeper_for_empty_cluster() {
        assert_eq!(select_keeper(&[]), None);
    }
}
