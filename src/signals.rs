#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossoverSignal {
    LongEntry,
    LongExit,
    Hold,
}

/// Compares the fast/slow ordering of the previous candle with the current one.
///
/// An upward cross (`prev_fast <= prev_slow` and `cur_fast > cur_slow`) is a long
/// entry, a downward cross (`prev_fast >= prev_slow` and `cur_fast < cur_slow`) is
/// a long exit. Any undefined average means no signal.
pub fn detect_crossover(
    prev_fast: Option<f64>,
    prev_slow: Option<f64>,
    cur_fast: Option<f64>,
    cur_slow: Option<f64>,
) -> CrossoverSignal {
    let (Some(prev_fast), Some(prev_slow), Some(cur_fast), Some(cur_slow)) =
        (prev_fast, prev_slow, cur_fast, cur_slow)
    else {
        return CrossoverSignal::Hold;
    };

    if prev_fast <= prev_slow && cur_fast > cur_slow {
        CrossoverSignal::LongEntry
    } else if prev_fast >= prev_slow && cur_fast < cur_slow {
        CrossoverSignal::LongExit
    } else {
        CrossoverSignal::Hold
    }
}

/// Signal at candle `index` given the two aligned average series.
///
/// Index 0 has no previous candle and never signals.
pub fn crossover_at(fast: &[Option<f64>], slow: &[Option<f64>], index: usize) -> CrossoverSignal {
    if index == 0 || index >= fast.len() || index >= slow.len() {
        return CrossoverSignal::Hold;
    }
    detect_crossover(fast[index - 1], slow[index - 1], fast[index], slow[index])
}
