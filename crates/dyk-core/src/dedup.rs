//! Near-duplicate detection.
//!
//! Similarity is the Ratcliff/Obershelp ratio `2·M / (|a| + |b|)` over the
//! characters of the lowercased, whitespace-collapsed `hook + explanation`,
//! where `M` counts characters in matching blocks found by recursively taking
//! the longest common substring. Input order is priority order: for each
//! insight the earliest sufficiently similar predecessor wins.
//!
//! Comparison is all-pairs. Each text is prepared once, and a pair only
//! reaches the full block search when three cheap upper bounds on `M`
//! (length, character multiset, bigram multiset) allow the threshold. The
//! block search itself gives up as soon as its running bound falls below the
//! threshold.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{DuplicateMarking, RawInsight};

/// Lowercase and collapse runs of whitespace to one space.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Ratio between two already-normalized strings.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let (a, b) = (Prepared::new(a), Prepared::new(b));
    let matched = matching_chars(&a, &b, 0.0, &mut Scratch::default()).unwrap_or_default();
    ratio_of(matched, a.len() + b.len())
}

fn ratio_of(matched: usize, total: usize) -> f64 {
    if total == 0 {
        return 1.0;
    }
    2.0 * matched as f64 / total as f64
}

/// A normalized text with the indexes every comparison needs.
struct Prepared {
    chars: Vec<char>,
    positions: HashMap<char, Vec<usize>>,
    bag: Vec<char>,
    bigrams: Vec<(char, char)>,
}

impl Prepared {
    fn new(text: &str) -> Self {
        let chars: Vec<char> = text.chars().collect();
        let mut positions: HashMap<char, Vec<usize>> = HashMap::new();
        for (j, c) in chars.iter().enumerate() {
            positions.entry(*c).or_default().push(j);
        }
        let mut bag = chars.clone();
        bag.sort_unstable();
        let mut bigrams: Vec<(char, char)> = chars.windows(2).map(|w| (w[0], w[1])).collect();
        bigrams.sort_unstable();
        Self {
            chars,
            positions,
            bag,
            bigrams,
        }
    }

    fn len(&self) -> usize {
        self.chars.len()
    }
}

/// Size of the multiset intersection of two sorted slices.
fn sorted_overlap<T: Ord>(a: &[T], b: &[T]) -> usize {
    let (mut i, mut j, mut shared) = (0, 0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                shared += 1;
                i += 1;
                j += 1;
            }
        }
    }
    shared
}

/// Upper bound on the ratio without searching for blocks.
///
/// With `r` blocks, the blocks contribute `M - r` shared bigrams, and
/// consecutive blocks are separated by at least one unmatched character on
/// one side, so `r <= |a| + |b| - 2M + 1`. Together: `3M <= Q2 + |a| + |b| + 1`.
fn ratio_upper_bound(a: &Prepared, b: &Prepared) -> f64 {
    let total = a.len() + b.len();
    let matched = a
        .len()
        .min(b.len())
        .min(sorted_overlap(&a.bag, &b.bag))
        .min((sorted_overlap(&a.bigrams, &b.bigrams) + total + 1) / 3);
    ratio_of(matched, total)
}

/// Run-length rows reused across every block search of a batch.
#[derive(Default)]
struct Scratch {
    prev: Vec<usize>,
    next: Vec<usize>,
    prev_touched: Vec<usize>,
    next_touched: Vec<usize>,
}

impl Scratch {
    fn reset(prev: &mut [usize], touched: &mut Vec<usize>) {
        for &t in touched.iter() {
            prev[t] = 0;
        }
        touched.clear();
    }
}

/// Total size of the matching blocks, or `None` once the ratio provably
/// stays below `floor`.
fn matching_chars(a: &Prepared, b: &Prepared, floor: f64, scratch: &mut Scratch) -> Option<usize> {
    let total = a.len() + b.len();
    let mut found = 0;
    // Sum of min(range widths) over ranges still queued
    let mut pending = a.len().min(b.len());
    let mut queue = vec![(0, a.len(), 0, b.len())];

    while let Some((alo, ahi, blo, bhi)) = queue.pop() {
        pending -= (ahi - alo).min(bhi - blo);
        let (i, j, k) = longest_match(&a.chars, b, (alo, ahi), (blo, bhi), scratch);
        if k > 0 {
            found += k;
            if alo < i && blo < j {
                pending += (i - alo).min(j - blo);
                queue.push((alo, i, blo, j));
            }
            if i + k < ahi && j + k < bhi {
                pending += (ahi - i - k).min(bhi - j - k);
                queue.push((i + k, ahi, j + k, bhi));
            }
        }
        if ratio_of(found + pending, total) < floor {
            return None;
        }
    }
    Some(found)
}

/// Longest common substring of `a[alo..ahi]` and `b[blo..bhi]` as
/// `(start_in_a, start_in_b, len)`; earliest in `a`, then in `b`, on ties.
fn longest_match(
    a: &[char],
    b: &Prepared,
    (alo, ahi): (usize, usize),
    (blo, bhi): (usize, usize),
    scratch: &mut Scratch,
) -> (usize, usize, usize) {
    let width = b.len() + 1;
    if scratch.prev.len() < width {
        scratch.prev.resize(width, 0);
        scratch.next.resize(width, 0);
    }
    let Scratch {
        prev,
        next,
        prev_touched,
        next_touched,
    } = scratch;

    let mut best = (alo, blo, 0);
    // prev[j + 1] is the length of the match ending at (i - 1, j)
    for (i, c) in a.iter().enumerate().take(ahi).skip(alo) {
        if let Some(positions) = b.positions.get(c) {
            for &j in positions {
                if j < blo {
                    continue;
                }
                if j >= bhi {
                    break;
                }
                let k = prev[j] + 1;
                next[j + 1] = k;
                next_touched.push(j + 1);
                if k > best.2 {
                    best = (i + 1 - k, j + 1 - k, k);
                }
            }
        }
        Scratch::reset(prev, prev_touched);
        std::mem::swap(prev, next);
        std::mem::swap(prev_touched, next_touched);
    }
    Scratch::reset(prev, prev_touched);
    best
}

/// Pairwise duplicate statistics over a batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DedupAnalytics {
    /// For each insight, how many others are at or above the threshold.
    pub duplicate_counts: Vec<usize>,
    /// Connected components of the "is similar" graph.
    pub clusters: usize,
    pub mean_duplicates: f64,
    pub marked_duplicates: usize,
}

/// Markings plus analytics from one all-pairs pass.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupReport {
    pub markings: Vec<DuplicateMarking>,
    pub analytics: DedupAnalytics,
}

#[derive(Debug, Clone, Copy)]
pub struct Deduplicator {
    threshold: f64,
}

impl Deduplicator {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn texts(insights: &[RawInsight]) -> Vec<Prepared> {
        insights
            .iter()
            .map(|i| Prepared::new(&normalize(&i.comparison_text())))
            .collect()
    }

    fn similar(&self, a: &Prepared, b: &Prepared, scratch: &mut Scratch) -> Option<f64> {
        if ratio_upper_bound(a, b) < self.threshold {
            return None;
        }
        let matched = matching_chars(a, b, self.threshold, scratch)?;
        let r = ratio_of(matched, a.len() + b.len());
        (r >= self.threshold).then_some(r)
    }

    /// Mark each insight that is similar to an earlier one.
    pub fn mark(&self, insights: &[RawInsight]) -> Vec<DuplicateMarking> {
        let texts = Self::texts(insights);
        let mut scratch = Scratch::default();
        (0..texts.len())
            .map(|j| {
                (0..j)
                    .find_map(|i| self.similar(&texts[i], &texts[j], &mut scratch).map(|r| (i, r)))
                    .map(|(i, similarity)| DuplicateMarking {
                        is_duplicate: true,
                        duplicate_of: Some(i),
                        similarity,
                    })
                    .unwrap_or_default()
            })
            .collect()
    }

    /// Compare every pair once; derive markings and cluster analytics.
    pub fn analyze(&self, insights: &[RawInsight]) -> DedupReport {
        let texts = Self::texts(insights);
        let n = texts.len();
        let mut markings = vec![DuplicateMarking::default(); n];
        let mut counts = vec![0; n];
        let mut components = UnionFind::new(n);
        let mut scratch = Scratch::default();

        for j in 0..n {
            for i in 0..j {
                let Some(r) = self.similar(&texts[i], &texts[j], &mut scratch) else {
                    continue;
                };
                counts[i] += 1;
                counts[j] += 1;
                components.union(i, j);
                if !markings[j].is_duplicate {
                    markings[j] = DuplicateMarking {
                        is_duplicate: true,
                        duplicate_of: Some(i),
                        similarity: r,
                    };
                }
            }
        }

        let marked_duplicates = markings.iter().filter(|m| m.is_duplicate).count();
        let mean_duplicates = if n == 0 {
            0.0
        } else {
            counts.iter().sum::<usize>() as f64 / n as f64
        };
        let analytics = DedupAnalytics {
            clusters: components.count(),
            duplicate_counts: counts,
            mean_duplicates,
            marked_duplicates,
        };

        debug!(
            insights = n,
            duplicates = marked_duplicates,
            clusters = analytics.clusters,
            threshold = self.threshold,
            "deduplication complete"
        );

        DedupReport { markings, analytics }
    }
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[rb] = ra;
        }
    }

    fn count(&mut self) -> usize {
        (0..self.parent.len()).filter(|&i| self.find(i) == i).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::tests::insight;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::time::{Duration, Instant};

    fn with_text(hook: &str, explanation: &str) -> RawInsight {
        RawInsight {
            hook: hook.into(),
            explanation: explanation.into(),
            ..insight()
        }
    }

    #[test]
    fn test_ratio_known_values() {
        assert_eq!(similarity_ratio("abcd", "abcd"), 1.0);
        assert_eq!(similarity_ratio("abcd", "bcde"), 0.75);
        assert_eq!(similarity_ratio("abc", "xyz"), 0.0);
        assert_eq!(similarity_ratio("", ""), 1.0);
        assert_eq!(similarity_ratio("abc", ""), 0.0);
    }

    #[test]
    fn test_ratio_counts_recursive_blocks() {
        // "ab" and "yz" match on both sides of the longest block "cdef"
        let r = similarity_ratio("abxcdefyz", "abcdefqyz");
        assert_eq!(r, 2.0 * 8.0 / 18.0);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Did   You\tKnow\n"), "did you know");
    }

    #[test]
    fn test_one_adjective_apart_is_duplicate() {
        let base = insight();
        let variant = with_text(
            &base.hook,
            &base.explanation.replace("steadily", "gradually"),
        );
        let markings = Deduplicator::new(0.85).mark(&[base, variant]);
        assert!(!markings[0].is_duplicate);
        assert!(markings[1].is_duplicate);
        assert_eq!(markings[1].duplicate_of, Some(0));
        assert!(markings[1].similarity > 0.85);
    }

    #[test]
    fn test_dissimilar_not_marked() {
        let a = insight();
        let b = with_text(
            "Did you know short walks after meals help blood sugar?",
            "A ten minute stroll after eating helps muscles absorb glucose.",
        );
        let markings = Deduplicator::new(0.85).mark(&[a, b]);
        assert!(markings.iter().all(|m| !m.is_duplicate));
    }

    #[test]
    fn test_marked_count_is_monotone_in_threshold() {
        let base = insight();
        let items = vec![
            base.clone(),
            with_text(&base.hook, &base.explanation.replace("steadily", "gradually")),
            with_text(&base.hook, "Quitting lowers risk within a few years."),
            with_text("Did you know smoking doubles stroke risk?", &base.explanation),
            with_text("Did you know sleep helps memory?", "Deep sleep consolidates memories."),
            with_text("Did you know sleep helps focus?", "Deep sleep consolidates memories."),
        ];

        let mut previous = usize::MAX;
        for step in 0..=20 {
            let threshold = step as f64 * 0.05;
            let marked = Deduplicator::new(threshold)
                .mark(&items)
                .iter()
                .filter(|m| m.is_duplicate)
                .count();
            assert!(marked <= previous, "threshold {threshold}: {marked} > {previous}");
            previous = marked;
        }
    }

    #[test]
    fn test_analyze_agrees_with_mark() {
        let base = insight();
        let items = vec![
            base.clone(),
            with_text("Did you know sleep helps memory?", "Deep sleep consolidates memories."),
            with_text(&base.hook, &base.explanation.replace("steadily", "gradually")),
        ];
        let dedup = Deduplicator::new(0.85);
        let report = dedup.analyze(&items);

        assert_eq!(report.markings, dedup.mark(&items));
        assert_eq!(report.analytics.duplicate_counts, vec![1, 0, 1]);
        assert_eq!(report.analytics.clusters, 2);
        assert_eq!(report.analytics.marked_duplicates, 1);
        assert!((report.analytics.mean_duplicates - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_upper_bound_never_below_ratio() {
        let base = normalize(&insight().comparison_text());
        let texts = [
            base.clone(),
            base.replace("steadily", "gradually"),
            "did you know sleep helps memory? deep sleep consolidates memories.".to_string(),
            "abxcdefyz".to_string(),
            "abcdefqyz".to_string(),
            "a".to_string(),
            String::new(),
        ];
        for a in &texts {
            for b in &texts {
                let bound = ratio_upper_bound(&Prepared::new(a), &Prepared::new(b));
                assert!(bound >= similarity_ratio(a, b), "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn test_early_exit_only_below_floor() {
        let (a, b) = (Prepared::new("abxcdefyz"), Prepared::new("abcdefqyz"));
        let mut scratch = Scratch::default();
        assert_eq!(matching_chars(&a, &b, 0.85, &mut scratch), None);
        assert_eq!(matching_chars(&a, &b, 0.8, &mut scratch), Some(8));
    }

    /// Random-word text, so pairs share vocabulary shape but not content.
    fn synthetic(rng: &mut StdRng, words: usize) -> String {
        (0..words)
            .map(|_| {
                let len = rng.gen_range(3..9);
                (0..len).map(|_| rng.gen_range(b'a'..=b'z') as char).collect::<String>()
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_analyze_thousand_insights_is_fast() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut items: Vec<RawInsight> = (0..1000)
            .map(|_| {
                let hook = synthetic(&mut rng, 12);
                let explanation = synthetic(&mut rng, 45);
                with_text(&hook, &explanation)
            })
            .collect();
        // Plant near-copies of earlier items
        for (copy, original) in [(250, 10), (600, 300), (999, 998)] {
            let source = items[original].clone();
            items[copy] = with_text(&source.hook, &format!("{} extra", source.explanation));
        }

        let started = Instant::now();
        let report = Deduplicator::new(0.85).analyze(&items);
        let elapsed = started.elapsed();

        assert!(elapsed < Duration::from_secs(30), "analyze took {elapsed:?}");
        assert_eq!(report.analytics.marked_duplicates, 3);
        assert_eq!(report.markings[250].duplicate_of, Some(10));
        assert_eq!(report.markings[600].duplicate_of, Some(300));
        assert_eq!(report.markings[999].duplicate_of, Some(998));
        assert_eq!(report.analytics.clusters, 997);
    }

    #[test]
    fn test_empty_batch() {
        let report = Deduplicator::new(0.85).analyze(&[]);
        assert!(report.markings.is_empty());
        assert_eq!(report.analytics.clusters, 0);
        assert_eq!(report.analytics.mean_duplicates, 0.0);
    }
}
