//! Purpose: Similarity scoring and ranked close-match lookup for column names.
//! Exports: `similarity`, `close_matches`, `Candidate`.
//! Role: Binds attribute paths to the header names a server actually returned.
//! Invariants: Scores are in [0, 1]; 1.0 only for identical strings.
//! Invariants: Ranking is by score, then by candidate text, both descending.

#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub value: String,
    pub score: f64,
}

/// Ratio `2*M/T` where `M` counts characters in matching blocks and `T` is
/// the combined length.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    ratio(matched_chars(&a, &b), a.len() + b.len())
}

/// Up to `n` candidates scoring at least `cutoff` against `word`, best first.
pub fn close_matches<'a, I>(word: &str, candidates: I, n: usize, cutoff: f64) -> Vec<Candidate>
where
    I: IntoIterator<Item = &'a str>,
{
    if n == 0 {
        return Vec::new();
    }
    let word: Vec<char> = word.chars().collect();
    let mut ranked = Vec::new();
    for candidate in candidates {
        let chars: Vec<char> = candidate.chars().collect();
        let total = word.len() + chars.len();
        if ratio(word.len().min(chars.len()), total) < cutoff {
            continue;
        }
        if ratio(common_multiset(&word, &chars), total) < cutoff {
            continue;
        }
        let score = ratio(matched_chars(&chars, &word), total);
        if score >= cutoff {
            ranked.push(Candidate {
                value: candidate.to_string(),
                score,
            });
        }
    }
    ranked.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then_with(|| right.value.cmp(&left.value))
    });
    ranked.truncate(n);
    ranked
}

fn ratio(matches: usize, total: usize) -> f64 {
    if total == 0 {
        return 1.0;
    }
    2.0 * matches as f64 / total as f64
}

fn common_multiset(a: &[char], b: &[char]) -> usize {
    let mut remaining = b.to_vec();
    let mut common = 0;
    for ch in a {
        if let Some(pos) = remaining.iter().position(|other| other == ch) {
            remaining.swap_remove(pos);
            common += 1;
        }
    }
    common
}

fn matched_chars(a: &[char], b: &[char]) -> usize {
    let mut total = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, size) = longest_match(a, b, alo, ahi, blo, bhi);
        if size == 0 {
            continue;
        }
        total += size;
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + size < ahi && j + size < bhi {
            pending.push((i + size, ahi, j + size, bhi));
        }
    }
    total
}

/// Longest common run in `a[alo..ahi]` and `b[blo..bhi]`; earliest in `a`, then in `b`, wins ties.
fn longest_match(
    a: &[char],
    b: &[char],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_size) = (alo, blo, 0);
    let width = bhi - blo;
    let mut prev = vec![0usize; width + 1];
    let mut cur = vec![0usize; width + 1];
    for i in alo..ahi {
        for j in blo..bhi {
            let col = j - blo + 1;
            if a[i] == b[j] {
                cur[col] = prev[col - 1] + 1;
                let size = cur[col];
                let start_i = i + 1 - size;
                let start_j = j + 1 - size;
                if size > best_size
                    || (size == best_size && (start_i, start_j) < (best_i, best_j))
                {
                    best_i = start_i;
                    best_j = start_j;
                    best_size = size;
                }
            } else {
                cur[col] = 0;
            }
        }
        std::mem::swap(&mut prev, &mut cur);
        cur.iter_mut().for_each(|cell| *cell = 0);
    }
    (best_i, best_j, best_size)
}

#[cfg(test)]
mod tests {
    use super::{close_matches, similarity};

    #[test]
    fn identical_strings_score_one() {
        assert_eq!(similarity("label", "label"), 1.0);
        assert_eq!(similarity("", ""), 1.0);
    }

    #[test]
    fn disjoint_strings_score_zero() {
        assert_eq!(similarity("abc", "xyz"), 0.0);
    }

    #[test]
    fn underscore_variant_scores_high() {
        let score = similarity("firstname", "first_name");
        assert!((score - 18.0 / 19.0).abs() < 1e-9, "score {score}");
    }

    #[test]
    fn blocks_on_both_sides_of_the_longest_run_count() {
        // "abxcd" vs "abycd": "ab" and "cd" match, x/y do not.
        assert!((similarity("abxcd", "abycd") - 0.8).abs() < 1e-9);
    }

    #[test]
    fn close_matches_ranks_best_first() {
        let headers = ["ID", "first_name", "last_name", "dob"];
        let found = close_matches("firstname", headers, 3, 0.6);
        assert_eq!(found[0].value, "first_name");
        assert!(found.iter().all(|candidate| candidate.score >= 0.6));
    }

    #[test]
    fn close_matches_respects_cutoff_and_limit() {
        let headers = ["ID", "label"];
        assert!(close_matches("firstname", headers, 3, 0.6).is_empty());
        let loose = close_matches("firstname", headers, 1, 0.0);
        assert_eq!(loose.len(), 1);
    }
}
