//! Technical-analysis series.
//!
//! Each function returns a series aligned with its input. Positions without
//! enough history hold `NaN`; callers read the latest value with [`last`].

use confluence_core::Candle;

/// Latest finite value of a series.
#[must_use]
pub fn last(series: &[f64]) -> Option<f64> {
    series.last().copied().filter(|v| v.is_finite())
}

#[must_use]
pub fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

#[must_use]
pub fn volumes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.volume).collect()
}

/// Simple moving average.
#[must_use]
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period {
        return result;
    }
    let mut sum: f64 = values[..period].iter().sum();
    result[period - 1] = sum / period as f64;
    for i in period..n {
        sum += values[i] - values[i - period];
        result[i] = sum / period as f64;
    }
    result
}

/// Exponential moving average seeded with the SMA of the first `period` values.
#[must_use]
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period {
        return result;
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut prev = values[..period].iter().sum::<f64>() / period as f64;
    result[period - 1] = prev;
    for i in period..n {
        prev = alpha * values[i] + (1.0 - alpha) * prev;
        result[i] = prev;
    }
    result
}

/// Wilder smoothing (alpha = 1/period), seeded with the mean of the first
/// `period` finite values.
#[must_use]
pub fn wilder_smooth(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 {
        return result;
    }
    let Some(start) = values.iter().position(|v| v.is_finite()) else {
        return result;
    };
    if n - start < period {
        return result;
    }
    let seed_end = start + period;
    let mut prev = values[start..seed_end].iter().sum::<f64>() / period as f64;
    result[seed_end - 1] = prev;
    let alpha = 1.0 / period as f64;
    for i in seed_end..n {
        prev = alpha * values[i] + (1.0 - alpha) * prev;
        result[i] = prev;
    }
    result
}

/// True range. The first bar uses high - low.
#[must_use]
pub fn true_range(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .enumerate()
        .map(|(i, c)| {
            if i == 0 {
                c.high - c.low
            } else {
                let pc = candles[i - 1].close;
                (c.high - c.low).max((c.high - pc).abs()).max((c.low - pc).abs())
            }
        })
        .collect()
}

/// Average true range (Wilder).
#[must_use]
pub fn atr(candles: &[Candle], period: usize) -> Vec<f64> {
    wilder_smooth(&true_range(candles), period)
}

/// Relative strength index (Wilder). Flat series read 50.
#[must_use]
pub fn rsi(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period + 1 {
        return result;
    }
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let ch = values[i] - values[i - 1];
        if ch > 0.0 {
            avg_gain += ch;
        } else {
            avg_loss -= ch;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    result[period] = rsi_value(avg_gain, avg_loss);

    let alpha = 1.0 / period as f64;
    for i in (period + 1)..n {
        let ch = values[i] - values[i - 1];
        avg_gain = alpha * ch.max(0.0) + (1.0 - alpha) * avg_gain;
        avg_loss = alpha * (-ch).max(0.0) + (1.0 - alpha) * avg_loss;
        result[i] = rsi_value(avg_gain, avg_loss);
    }
    result
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss <= f64::EPSILON && avg_gain <= f64::EPSILON {
        50.0
    } else if avg_loss <= f64::EPSILON {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// MACD histogram: (EMA fast - EMA slow) - EMA(signal) of that line.
#[must_use]
pub fn macd_histogram(values: &[f64], fast: usize, slow: usize, signal: usize) -> Vec<f64> {
    let n = values.len();
    let fast_ema = ema(values, fast);
    let slow_ema = ema(values, slow);
    let line: Vec<f64> = fast_ema.iter().zip(&slow_ema).map(|(f, s)| f - s).collect();

    let mut result = vec![f64::NAN; n];
    let Some(start) = line.iter().position(|v| v.is_finite()) else {
        return result;
    };
    let signal_line = ema(&line[start..], signal);
    for (offset, sig) in signal_line.iter().enumerate() {
        let i = start + offset;
        if sig.is_finite() {
            result[i] = line[i] - sig;
        }
    }
    result
}

/// Directional movement reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adx {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

/// Average directional index (Wilder), latest value only.
#[must_use]
pub fn adx(candles: &[Candle], period: usize) -> Option<Adx> {
    let n = candles.len();
    if period == 0 || n < 2 * period + 1 {
        return None;
    }
    let mut plus_dm = vec![f64::NAN; n];
    let mut minus_dm = vec![f64::NAN; n];
    let mut tr = vec![f64::NAN; n];
    let full_tr = true_range(candles);
    for i in 1..n {
        let up = candles[i].high - candles[i - 1].high;
        let down = candles[i - 1].low - candles[i].low;
        plus_dm[i] = if up > down && up > 0.0 { up } else { 0.0 };
        minus_dm[i] = if down > up && down > 0.0 { down } else { 0.0 };
        tr[i] = full_tr[i];
    }
    let smooth_tr = wilder_smooth(&tr, period);
    let smooth_plus = wilder_smooth(&plus_dm, period);
    let smooth_minus = wilder_smooth(&minus_dm, period);

    let mut dx = vec![f64::NAN; n];
    let mut last_di = None;
    for i in 0..n {
        if !(smooth_tr[i].is_finite() && smooth_tr[i] > 0.0) {
            continue;
        }
        let plus_di = 100.0 * smooth_plus[i] / smooth_tr[i];
        let minus_di = 100.0 * smooth_minus[i] / smooth_tr[i];
        let sum = plus_di + minus_di;
        dx[i] = if sum > 0.0 {
            100.0 * (plus_di - minus_di).abs() / sum
        } else {
            0.0
        };
        last_di = Some((plus_di, minus_di));
    }
    let adx = last(&wilder_smooth(&dx, period))?;
    let (plus_di, minus_di) = last_di?;
    Some(Adx {
        adx,
        plus_di,
        minus_di,
    })
}

/// Stochastic %K over `period` bars.
#[must_use]
pub fn stochastic_k(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let window = &candles[candles.len() - period..];
    let high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    let close = window.last()?.close;
    if high - low <= f64::EPSILON {
        return Some(50.0);
    }
    Some(100.0 * (close - low) / (high - low))
}

/// On-balance volume.
#[must_use]
pub fn obv(candles: &[Candle]) -> Vec<f64> {
    let mut total = 0.0;
    candles
        .iter()
        .enumerate()
        .map(|(i, c)| {
            if i > 0 {
                let prev = candles[i - 1].close;
                if c.close > prev {
                    total += c.volume;
                } else if c.close < prev {
                    total -= c.volume;
                }
            }
            total
        })
        .collect()
}

/// Close location value: where the close sits inside the bar, in [-1, 1].
fn close_location(c: &Candle) -> f64 {
    let range = c.high - c.low;
    if range <= f64::EPSILON {
        0.0
    } else {
        ((c.close - c.low) - (c.high - c.close)) / range
    }
}

/// Accumulation/distribution line.
#[must_use]
pub fn accumulation_distribution(candles: &[Candle]) -> Vec<f64> {
    let mut total = 0.0;
    candles
        .iter()
        .map(|c| {
            total += close_location(c) * c.volume;
            total
        })
        .collect()
}

/// Chaikin money flow over the last `period` bars, in [-1, 1].
#[must_use]
pub fn chaikin_money_flow(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let window = &candles[candles.len() - period..];
    let volume: f64 = window.iter().map(|c| c.volume).sum();
    if volume <= f64::EPSILON {
        return Some(0.0);
    }
    let flow: f64 = window.iter().map(|c| close_location(c) * c.volume).sum();
    Some(flow / volume)
}

/// Money flow index over the last `period` bars. No flow reads 50.
#[must_use]
pub fn money_flow_index(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let start = candles.len() - period;
    let mut positive = 0.0;
    let mut negative = 0.0;
    for i in start..candles.len() {
        let tp = candles[i].typical_price();
        let prev = candles[i - 1].typical_price();
        let flow = tp * candles[i].volume;
        if tp > prev {
            positive += flow;
        } else if tp < prev {
            negative += flow;
        }
    }
    Some(rsi_value(positive, negative))
}

/// Volume-weighted average price over the last `period` bars.
#[must_use]
pub fn vwap(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let window = &candles[candles.len() - period..];
    let volume: f64 = window.iter().map(|c| c.volume).sum();
    if volume <= f64::EPSILON {
        return None;
    }
    Some(window.iter().map(|c| c.typical_price() * c.volume).sum::<f64>() / volume)
}

/// Least-squares slope of the last `period` points per step.
#[must_use]
pub fn slope(values: &[f64], period: usize) -> Option<f64> {
    if period < 2 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    let n = period as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = window.iter().sum::<f64>() / n;
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in window.iter().enumerate() {
        let dx = i as f64 - mean_x;
        num += dx * (y - mean_y);
        den += dx * dx;
    }
    if den <= 0.0 {
        return None;
    }
    Some(num / den)
}

/// First differences.
#[must_use]
pub fn diff(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Simple returns.
#[must_use]
pub fn returns(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .map(|w| if w[0] != 0.0 { w[1] / w[0] - 1.0 } else { 0.0 })
        .collect()
}
