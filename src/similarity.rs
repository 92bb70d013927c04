//! Fuzzy string similarity on a 0-100 scale.
//!
//! Both metrics are built on Ratcliff/Obershelp matching blocks: the longest
//! common run of characters is found, then the same search recurses into the
//! unmatched remainders on each side of it. Scores are rounded half-to-even.

use std::collections::BTreeSet;

/// Maximal common run: `a[a_start..a_start + len] == b[b_start..b_start + len]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MatchingBlock {
    pub a_start: usize,
    pub b_start: usize,
    pub len: usize,
}

/// Best alignment of the shorter string against a window of the longer one.
pub fn partial_similarity(a: &str, b: &str) -> u8 {
    if let Some(score) = empty_input_score(a, b) {
        return score;
    }

    let a_chars = a.chars().collect::<Vec<char>>();
    let b_chars = b.chars().collect::<Vec<char>>();
    let (shorter, longer) = order_for_partial(&a_chars, &b_chars);

    let mut best = 0.0_f64;
    for block in matching_blocks(shorter, longer) {
        let window_start = block.b_start.saturating_sub(block.a_start);
        let window_end = (window_start + shorter.len()).min(longer.len());
        let window = &longer[window_start..window_end];

        let window_ratio = ratio_of(shorter, window);
        if window_ratio > 0.995 {
            return 100;
        }
        if window_ratio > best {
            best = window_ratio;
        }
    }

    to_score(best)
}

/// Shared-vocabulary similarity that ignores token order and duplicates.
pub fn token_set_similarity(a: &str, b: &str) -> u8 {
    if let Some(score) = empty_input_score(a, b) {
        return score;
    }

    let tokens_a = tokenize(a);
    let tokens_b = tokenize(b);

    let intersection = tokens_a
        .intersection(&tokens_b)
        .cloned()
        .collect::<Vec<String>>();
    let only_a = tokens_a.difference(&tokens_b).cloned().collect::<Vec<String>>();
    let only_b = tokens_b.difference(&tokens_a).cloned().collect::<Vec<String>>();

    let sorted_intersection = intersection.join(" ");
    let combined_a = join_nonempty(&sorted_intersection, &only_a.join(" "));
    let combined_b = join_nonempty(&sorted_intersection, &only_b.join(" "));

    [
        ratio(&sorted_intersection, &combined_a),
        ratio(&sorted_intersection, &combined_b),
        ratio(&combined_a, &combined_b),
    ]
    .into_iter()
    .max()
    .unwrap_or(0)
}

/// Plain Ratcliff/Obershelp ratio, `2 * matched / (len_a + len_b)`, scaled to 0-100.
/// Either side empty scores 0.
pub fn ratio(a: &str, b: &str) -> u8 {
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let a_chars = a.chars().collect::<Vec<char>>();
    let b_chars = b.chars().collect::<Vec<char>>();
    let (first, second) = canonical_order(&a_chars, &b_chars);
    to_score(ratio_of(first, second))
}

/// Matching blocks of `a` against `b`, sorted by position, adjacent runs
/// collapsed, terminated by the zero-length sentinel `(len_a, len_b, 0)`.
pub fn matching_blocks(a: &[char], b: &[char]) -> Vec<MatchingBlock> {
    let mut found = Vec::<MatchingBlock>::new();
    let mut queue = vec![(0, a.len(), 0, b.len())];

    while let Some((a_lo, a_hi, b_lo, b_hi)) = queue.pop() {
        let block = longest_match(a, b, a_lo, a_hi, b_lo, b_hi);
        if block.len == 0 {
            continue;
        }

        found.push(block);
        if a_lo < block.a_start && b_lo < block.b_start {
            queue.push((a_lo, block.a_start, b_lo, block.b_start));
        }
        let a_tail = block.a_start + block.len;
        let b_tail = block.b_start + block.len;
        if a_tail < a_hi && b_tail < b_hi {
            queue.push((a_tail, a_hi, b_tail, b_hi));
        }
    }

    found.sort();

    let mut collapsed = Vec::<MatchingBlock>::with_capacity(found.len() + 1);
    for block in found {
        if let Some(last) = collapsed.last_mut()
            && last.a_start + last.len == block.a_start
            && last.b_start + last.len == block.b_start
        {
            last.len += block.len;
            continue;
        }
        collapsed.push(block);
    }

    collapsed.push(MatchingBlock {
        a_start: a.len(),
        b_start: b.len(),
        len: 0,
    });
    collapsed
}

// Earliest longest run wins: lowest `a` index first, then lowest `b` index.
fn longest_match(
    a: &[char],
    b: &[char],
    a_lo: usize,
    a_hi: usize,
    b_lo: usize,
    b_hi: usize,
) -> MatchingBlock {
    let mut best = MatchingBlock {
        a_start: a_lo,
        b_start: b_lo,
        len: 0,
    };

    let width = b_hi - b_lo;
    let mut previous = vec![0_usize; width];
    let mut current = vec![0_usize; width];

    for i in a_lo..a_hi {
        for offset in 0..width {
            let j = b_lo + offset;
            current[offset] = if a[i] == b[j] {
                let run = if offset == 0 { 1 } else { previous[offset - 1] + 1 };
                if run > best.len {
                    best = MatchingBlock {
                        a_start: i + 1 - run,
                        b_start: j + 1 - run,
                        len: run,
                    };
                }
                run
            } else {
                0
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }

    best
}

fn ratio_of(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let matched = matching_blocks(a, b)
        .iter()
        .map(|block| block.len)
        .sum::<usize>();
    2.0 * matched as f64 / total as f64
}

fn to_score(ratio: f64) -> u8 {
    (100.0 * ratio).round_ties_even().clamp(0.0, 100.0) as u8
}

fn empty_input_score(a: &str, b: &str) -> Option<u8> {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => Some(100),
        (true, false) | (false, true) => Some(0),
        (false, false) => None,
    }
}

// Block search breaks ties by scan order, so argument order is fixed
// independently of the caller to keep both metrics symmetric.
fn canonical_order<'a>(a: &'a [char], b: &'a [char]) -> (&'a [char], &'a [char]) {
    if a <= b { (a, b) } else { (b, a) }
}

fn order_for_partial<'a>(a: &'a [char], b: &'a [char]) -> (&'a [char], &'a [char]) {
    match a.len().cmp(&b.len()) {
        std::cmp::Ordering::Less => (a, b),
        std::cmp::Ordering::Greater => (b, a),
        std::cmp::Ordering::Equal => canonical_order(a, b),
    }
}

fn tokenize(value: &str) -> BTreeSet<String> {
    value
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<BTreeSet<String>>()
}

fn join_nonempty(head: &str, tail: &str) -> String {
    match (head.is_empty(), tail.is_empty()) {
        (true, _) => tail.to_string(),
        (false, true) => head.to_string(),
        (false, false) => format!("{head} {tail}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(value: &str) -> Vec<char> {
        value.chars().collect()
    }

    #[test]
    fn matching_blocks_follow_ratcliff_obershelp() {
        let blocks = matching_blocks(&chars("abxcd"), &chars("abcd"));
        assert_eq!(
            blocks,
            vec![
                MatchingBlock {
                    a_start: 0,
                    b_start: 0,
                    len: 2
                },
                MatchingBlock {
                    a_start: 3,
                    b_start: 2,
                    len: 2
                },
                MatchingBlock {
                    a_start: 5,
                    b_start: 4,
                    len: 0
                },
            ]
        );
    }

    #[test]
    fn ratio_matches_known_values() {
        assert_eq!(ratio("abcd", "bcde"), 75);
        assert_eq!(ratio("kitten", "sitting"), 62);
        assert_eq!(ratio("same", "same"), 100);
        assert_eq!(ratio("", "text"), 0);
    }

    #[test]
    fn partial_similarity_finds_substring_alignment() {
        assert_eq!(partial_similarity("cat", "the cat sat"), 100);
        assert_eq!(partial_similarity("the cat sat", "cat"), 100);
        assert_eq!(partial_similarity("45 dollars", "total amount due 45 dollars"), 100);
        assert!(partial_similarity("cat", "the cat sat") >= partial_similarity("cat", "dog"));
    }

    #[test]
    fn partial_similarity_scores_near_misses() {
        assert_eq!(partial_similarity("abcd", "xxabcexx"), 75);
        assert_eq!(partial_similarity("cat", "dog"), 0);
    }

    #[test]
    fn token_set_similarity_ignores_order_and_extras() {
        assert_eq!(
            token_set_similarity("amount due", "due amount total"),
            100
        );
        assert_eq!(token_set_similarity("Fuzzy Wuzzy", "wuzzy fuzzy was a bear"), 100);
        assert!(token_set_similarity("invoice date", "shipping address") < 60);
    }

    #[test]
    fn empty_inputs_follow_convention() {
        assert_eq!(partial_similarity("", ""), 100);
        assert_eq!(token_set_similarity("", ""), 100);
        assert_eq!(partial_similarity("", "abc"), 0);
        assert_eq!(token_set_similarity("abc", ""), 0);
    }

    #[test]
    fn equal_length_inputs_are_symmetric() {
        let pairs = [("abcd", "dcba"), ("total", "tolat"), ("ab cd", "cd ab")];
        for (left, right) in pairs {
            assert_eq!(partial_similarity(left, right), partial_similarity(right, left));
            assert_eq!(token_set_similarity(left, right), token_set_similarity(right, left));
        }
    }

    #[test]
    fn scores_round_half_to_even() {
        // 1 matched char over 16 total chars -> 12.5
        assert_eq!(ratio("a", "abcdefghijklmno"), 12);
    }
}
