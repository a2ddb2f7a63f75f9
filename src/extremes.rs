use std::collections::VecDeque;

/// How many consecutive most-recent samples the current value stays
/// strictly below. The history is newest-first and already time-ordered,
/// so this is a single scan that stops at the first reversal.
pub fn streak_below(history: &VecDeque<f64>, current: f64) -> usize {
    history.iter().take_while(|&&sample| current < sample).count()
}

/// Mirror of `streak_below` for new highs.
pub fn streak_above(history: &VecDeque<f64>, current: f64) -> usize {
    history.iter().take_while(|&&sample| current > sample).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(values: &[f64]) -> VecDeque<f64> {
        values.iter().copied().collect()
    }

    #[test]
    fn streak_below_stops_at_first_reversal() {
        // below 5 and 5, stops at 3 since 4 > 3
        let h = history(&[5.0, 5.0, 3.0, -1.0]);
        assert_eq!(streak_below(&h, 4.0), 2);
    }

    #[test]
    fn streak_is_zero_when_not_below_newest() {
        let h = history(&[5.0, 8.0]);
        assert_eq!(streak_below(&h, 6.0), 0);
        assert_eq!(streak_below(&h, 5.0), 0); // strictly below
    }

    #[test]
    fn streak_spans_whole_history_on_new_extreme() {
        let h = history(&[-1.0, -2.0, -3.0]);
        assert_eq!(streak_below(&h, -4.0), 3);
        assert_eq!(streak_above(&h, 0.0), 3);
    }

    #[test]
    fn empty_history_has_no_streak() {
        let h = history(&[]);
        assert_eq!(streak_below(&h, 1.0), 0);
        assert_eq!(streak_above(&h, 1.0), 0);
    }

    #[test]
    fn streak_above_counts_consecutive_highs() {
        let h = history(&[1.0, 2.0, 9.0, 0.0]);
        assert_eq!(streak_above(&h, 3.0), 2);
    }
}
