/// Simple moving average aligned index-for-index with `prices`.
///
/// Entries before the window fills are `None`. A window of 0 or 1 is the
/// identity. A window longer than the series yields all `None`.
pub fn calculate_sma(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut sma_values = Vec::with_capacity(prices.len());
    fill_sma(&mut sma_values, prices, period);
    sma_values
}

/// Writes the moving average of `prices` into `out`, replacing its contents.
///
/// Lets callers reuse a buffer they allocated (and sized) themselves.
pub fn fill_sma(out: &mut Vec<Option<f64>>, prices: &[f64], period: usize) {
    out.clear();

    if period <= 1 {
        out.extend(prices.iter().map(|&price| defined(price)));
        return;
    }

    let mut window_sum = 0.0;
    for (i, &price) in prices.iter().enumerate() {
        window_sum += price;
        if i >= period {
            window_sum -= prices[i - period];
        }
        if i + 1 >= period {
            out.push(defined(window_sum / period as f64));
        } else {
            out.push(None);
        }
    }
}

fn defined(value: f64) -> Option<f64> {
    if value.is_nan() {
        None
    } else {
        Some(value)
    }
}
