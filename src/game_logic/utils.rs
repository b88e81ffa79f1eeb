use std::cmp::min;
use std::collections::HashMap;

use super::words::normalize_text;

/// Computes the Damerau-Levenshtein distance between two strings,
/// returning `Some(distance)` if it's less than or equal to `threshold`,
/// or `None` otherwise. Rows whose whole band already exceeds the
/// threshold end the computation early.
fn damerau_levenshtein_threshold(s1: &str, s2: &str, threshold: usize) -> Option<usize> {
    let s1_chars: Vec<char> = s1.chars().collect();
    let s2_chars: Vec<char> = s2.chars().collect();
    let n = s1_chars.len();
    let m = s2_chars.len();

    if n.abs_diff(m) > threshold {
        return None;
    }
    if n == 0 || m == 0 {
        let distance = n.max(m);
        return (distance <= threshold).then_some(distance);
    }

    let capped = threshold + 1;
    let mut dp = vec![vec![capped; m + 1]; n + 1];
    for (i, row) in dp.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=m {
        dp[0][j] = j;
    }

    // Last row in which each character of s1 was seen.
    let mut last_row: HashMap<char, usize> = HashMap::new();

    for i in 1..=n {
        let mut last_match_col = 0;
        let mut band_min = capped;

        for j in 1..=m {
            let k = *last_row.get(&s2_chars[j - 1]).unwrap_or(&0);
            let l = last_match_col;

            let cost = if s1_chars[i - 1] == s2_chars[j - 1] {
                last_match_col = j;
                0
            } else {
                1
            };

            let mut value = min(
                dp[i - 1][j - 1].saturating_add(cost),
                min(dp[i][j - 1].saturating_add(1), dp[i - 1][j].saturating_add(1)),
            );

            if k > 0 && l > 0 {
                let transposition = dp[k - 1][l - 1]
                    .saturating_add(i - k - 1)
                    .saturating_add(1)
                    .saturating_add(j - l - 1);
                value = min(value, transposition);
            }

            dp[i][j] = min(value, capped);
            if i.abs_diff(j) <= threshold {
                band_min = min(band_min, dp[i][j]);
            }
        }
        last_row.insert(s1_chars[i - 1], i);

        if band_min > threshold {
            return None;
        }
    }

    let distance = dp[n][m];
    (distance <= threshold).then_some(distance)
}

/// Typo allowance for a normalized answer of the given length in characters.
fn determine_adaptive_threshold(answer_len: usize) -> usize {
    match answer_len {
        0..=2 => 0,
        3..=5 => 1,
        6..=9 => 2,
        _ => 3,
    }
}

/// True when a guess is a few edits away from the answer without containing it.
/// Such guesses are still relayed as chat; the guesser only gets a hint.
pub fn is_near_miss(answer: &str, guess: &str) -> bool {
    let answer = normalize_text(answer);
    let guess = normalize_text(guess);
    if answer.is_empty() || guess.is_empty() || guess.contains(&answer) {
        return false;
    }
    let threshold = determine_adaptive_threshold(answer.chars().count());
    if threshold == 0 {
        return false;
    }
    matches!(
        damerau_levenshtein_threshold(&answer, &guess, threshold),
        Some(distance) if distance > 0
    )
}
