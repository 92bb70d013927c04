//! Word-level grounding inside matched lines.

use std::collections::BTreeSet;

use crate::geometry::BBox;
use crate::ranking::MatchCandidate;

/// Longest run of consecutive integers in `indices`; the earliest run wins a tie.
pub fn longest_consecutive_span(indices: &BTreeSet<usize>) -> Vec<usize> {
    let mut longest = Vec::<usize>::new();
    let mut current = Vec::<usize>::new();

    for &index in indices {
        let extends = current.last().is_some_and(|&last| last + 1 == index);
        if !extends {
            if current.len() > longest.len() {
                longest = std::mem::take(&mut current);
            }
            current.clear();
        }
        current.push(index);
    }

    if current.len() > longest.len() {
        longest = current;
    }
    longest
}

/// Boxes of the words that ground `answer` in each matched line: per line,
/// the longest consecutive run of words contained in the answer.
pub fn word_level_matches(answer: &str, candidates: &[MatchCandidate<'_>]) -> Vec<BBox> {
    let answer = answer.to_lowercase();
    let mut boxes = Vec::new();

    for candidate in candidates {
        let words = candidate.region.words();
        let hits = words
            .iter()
            .enumerate()
            .filter(|(_, word)| answer.contains(&word.text.to_lowercase()))
            .map(|(index, _)| index)
            .collect::<BTreeSet<usize>>();

        boxes.extend(
            longest_consecutive_span(&hits)
                .into_iter()
                .map(|index| words[index].bbox),
        );
    }

    boxes
}
