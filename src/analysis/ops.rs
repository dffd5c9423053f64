//! Numeric kernels behind the analysis operators.
//!
//! Every kernel is pure and bounded by its input size. NaN and infinities
//! propagate through arithmetic; reductions over empty input yield NaN.

use rustfft::{num_complex::Complex, FftPlanner};
use statrs::statistics::Statistics;
use std::cell::RefCell;

thread_local! {
    static FFT_PLANNER: RefCell<FftPlanner<f64>> = RefCell::new(FftPlanner::new());
}

/// Value of `values` at `i`, repeating the last element past the end.
fn extended(values: &[f64], i: usize) -> f64 {
    values[i.min(values.len() - 1)]
}

/// Combine two sequences element-wise, extending the shorter one with its
/// last value. An empty operand yields an empty result.
pub fn zip_with(a: &[f64], b: &[f64], f: impl Fn(f64, f64) -> f64) -> Vec<f64> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let n = a.len().max(b.len());
    (0..n).map(|i| f(extended(a, i), extended(b, i))).collect()
}

/// Left fold of [`zip_with`] over several operands.
pub fn fold_with(operands: &[&[f64]], f: impl Fn(f64, f64) -> f64) -> Vec<f64> {
    let Some((first, rest)) = operands.split_first() else {
        return Vec::new();
    };
    rest.iter()
        .fold(first.to_vec(), |acc, operand| zip_with(&acc, operand, &f))
}

pub fn map(values: &[f64], f: impl Fn(f64) -> f64) -> Vec<f64> {
    values.iter().map(|&v| f(v)).collect()
}

fn gcd_u64(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

fn as_integer(v: f64) -> Option<u64> {
    let rounded = v.round().abs();
    (rounded.is_finite() && rounded <= u64::MAX as f64).then_some(rounded as u64)
}

/// Greatest common divisor of the rounded operands.
pub fn gcd(a: f64, b: f64) -> f64 {
    match (as_integer(a), as_integer(b)) {
        (Some(a), Some(b)) => gcd_u64(a, b) as f64,
        _ => f64::NAN,
    }
}

/// Least common multiple of the rounded operands.
pub fn lcm(a: f64, b: f64) -> f64 {
    match (as_integer(a), as_integer(b)) {
        (Some(0), _) | (_, Some(0)) => 0.0,
        (Some(a), Some(b)) => (a / gcd_u64(a, b)) as f64 * b as f64,
        _ => f64::NAN,
    }
}

/// Position and value of the extreme element of `y`.
///
/// `better(candidate, current)` decides whether a candidate replaces the
/// current extreme. Returns `(NaN, NaN)` for empty input.
pub fn extreme(x: Option<&[f64]>, y: &[f64], better: impl Fn(f64, f64) -> bool) -> (f64, f64) {
    let Some(&first) = y.first() else {
        return (f64::NAN, f64::NAN);
    };
    let mut best = (0, first);
    for (i, &v) in y.iter().enumerate().skip(1) {
        if better(v, best.1) {
            best = (i, v);
        }
    }
    (position(x, best.0), best.1)
}

fn position(x: Option<&[f64]>, index: usize) -> f64 {
    match x {
        Some(x) => x.get(index).copied().unwrap_or(f64::NAN),
        None => index as f64,
    }
}

/// Position of the first crossing of `threshold` in `y`.
pub fn threshold(x: Option<&[f64]>, y: &[f64], threshold: f64, falling: bool) -> f64 {
    y.windows(2)
        .position(|w| {
            if falling {
                w[0] > threshold && w[1] <= threshold
            } else {
                w[0] < threshold && w[1] >= threshold
            }
        })
        .map_or(f64::NAN, |i| position(x, i + 1))
}

/// Forward FFT of `re + i*im`, zero-padded to the next power of two.
pub fn fft(re: &[f64], im: Option<&[f64]>) -> (Vec<f64>, Vec<f64>) {
    if re.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let n = re.len().next_power_of_two();
    let mut buffer: Vec<Complex<f64>> = re
        .iter()
        .enumerate()
        .map(|(i, &r)| {
            let i_part = im.and_then(|im| im.get(i)).copied().unwrap_or(0.0);
            Complex::new(r, i_part)
        })
        .collect();
    buffer.resize(n, Complex::new(0.0, 0.0));

    FFT_PLANNER.with(|planner| {
        let fft = planner.borrow_mut().plan_fft_forward(n);
        fft.process(&mut buffer);
    });

    buffer.iter().map(|c| (c.re, c.im)).unzip()
}

/// Unnormalized autocorrelation `a[k] = Σ y[i]·y[i+k]`.
///
/// Lags are taken from `x` relative to its first element, or are sample
/// indices. Only lags within `[min_x, max_x]` are returned.
pub fn autocorrelation(
    x: Option<&[f64]>,
    y: &[f64],
    min_x: f64,
    max_x: f64,
) -> (Vec<f64>, Vec<f64>) {
    let n = y.len();
    let mut lags = Vec::new();
    let mut values = Vec::new();
    for k in 0..n {
        let lag = match x {
            Some(x) if x.len() > k => x[k] - x[0],
            Some(_) => break,
            None => k as f64,
        };
        if lag < min_x || lag > max_x {
            continue;
        }
        let sum: f64 = (0..n - k).map(|i| y[i] * y[i + k]).sum();
        lags.push(lag);
        values.push(sum);
    }
    (lags, values)
}

/// Slide the shorter sequence over the longer one: `|na - nb| + 1` sums of
/// products.
pub fn crosscorrelation(a: &[f64], b: &[f64]) -> Vec<f64> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    (0..=long.len() - short.len())
        .map(|offset| {
            short
                .iter()
                .zip(&long[offset..])
                .map(|(s, l)| s * l)
                .sum()
        })
        .collect()
}

/// Differences of neighbours (`n` values give `n - 1`).
pub fn differentiate(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Running sum.
pub fn integrate(values: &[f64]) -> Vec<f64> {
    values
        .iter()
        .scan(0.0, |sum, &v| {
            *sum += v;
            Some(*sum)
        })
        .collect()
}

/// Upper bound on the length of generated sequences and histograms.
pub const MAX_GENERATED_LEN: usize = 1 << 20;

/// Length argument of a generator: non-finite, negative or oversized yields none.
fn length(value: f64) -> usize {
    if value.is_finite() && value > 0.0 && value.round() <= MAX_GENERATED_LEN as f64 {
        value.round() as usize
    } else {
        0
    }
}

/// `length` evenly spaced values from `start` to `stop` inclusive.
pub fn ramp(start: f64, stop: f64, length_value: f64) -> Vec<f64> {
    match length(length_value) {
        0 => Vec::new(),
        1 => vec![start],
        n => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

pub fn constant(value: f64, length_value: f64) -> Vec<f64> {
    vec![value; length(length_value)]
}

/// Histogram with bins `[x0 + k·dx, x0 + (k+1)·dx)` spanning the data.
///
/// Yields nothing when the data would need more than [`MAX_GENERATED_LEN`] bins.
pub fn binning(values: &[f64], x0: f64, dx: f64) -> (Vec<f64>, Vec<f64>) {
    if !(dx.is_finite() && dx > 0.0 && x0.is_finite()) {
        return (Vec::new(), Vec::new());
    }
    let indices: Vec<f64> = values
        .iter()
        .filter(|v| v.is_finite())
        .map(|v| ((v - x0) / dx).floor())
        .collect();
    if indices.is_empty() || indices.iter().any(|k| !k.is_finite()) {
        return (Vec::new(), Vec::new());
    }
    let lo = indices.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = indices.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = hi - lo;
    if !span.is_finite() || span >= MAX_GENERATED_LEN as f64 {
        return (Vec::new(), Vec::new());
    }

    let bins = span as usize + 1;
    let mut counts = vec![0.0; bins];
    for index in indices {
        let bin = ((index - lo) as usize).min(bins - 1);
        counts[bin] += 1.0;
    }
    let starts = (0..bins).map(|k| x0 + (lo + k as f64) * dx).collect();
    (starts, counts)
}

/// Mean and sample standard deviation.
pub fn average(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    (values.iter().mean(), values.iter().std_dev())
}

/// Index range `[from, to)` clamped to `len`.
pub fn subrange_bounds(from: Option<f64>, to: Option<f64>, len: usize) -> (usize, usize) {
    let clamp = |v: f64| {
        if v.is_nan() || v <= 0.0 {
            0
        } else {
            (v.round() as usize).min(len)
        }
    };
    let start = from.map_or(0, clamp);
    let end = to.map_or(len, clamp);
    (start, end.max(start))
}

/// Indices where every array lies within its bounds.
///
/// Arrays are compared index by index up to the shortest one.
pub fn range_mask(filters: &[(&[f64], f64, f64)]) -> Vec<usize> {
    let n = filters.iter().map(|(a, _, _)| a.len()).min().unwrap_or(0);
    (0..n)
        .filter(|&i| {
            filters
                .iter()
                .all(|(a, min, max)| a[i] >= *min && a[i] <= *max)
        })
        .collect()
}

/// Permutation sorting `keys`; NaN sorts last.
pub fn sort_order(keys: &[f64], descending: bool) -> Vec<usize> {
    let mut order: Vec<usize> = (0..keys.len()).collect();
    order.sort_by(|&a, &b| {
        let (a, b) = (keys[a], keys[b]);
        match (a.is_nan(), b.is_nan()) {
            (true, true) => std::cmp::Ordering::Equal,
            (true, false) => std::cmp::Ordering::Greater,
            (false, true) => std::cmp::Ordering::Less,
            (false, false) if descending => b.total_cmp(&a),
            (false, false) => a.total_cmp(&b),
        }
    });
    order
}

/// Indices where every array has a finite value, up to the shortest array.
pub fn finite_mask(arrays: &[&[f64]]) -> Vec<usize> {
    let n = arrays.iter().map(|a| a.len()).min().unwrap_or(0);
    (0..n)
        .filter(|&i| arrays.iter().all(|a| a[i].is_finite()))
        .collect()
}

pub fn select(values: &[f64], indices: &[usize]) -> Vec<f64> {
    indices.iter().filter_map(|&i| values.get(i).copied()).collect()
}

/// Gaussian smoothing with a kernel of `sigma` samples, truncated at 3σ and
/// renormalized at the edges.
pub fn gauss_smooth(values: &[f64], sigma: f64) -> Vec<f64> {
    if !(sigma.is_finite() && sigma > 0.0) {
        return values.to_vec();
    }
    let radius = (3.0 * sigma).ceil() as isize;
    let weights: Vec<f64> = (-radius..=radius)
        .map(|k| (-(k * k) as f64 / (2.0 * sigma * sigma)).exp())
        .collect();

    let n = values.len() as isize;
    (0..n)
        .map(|i| {
            let mut sum = 0.0;
            let mut norm = 0.0;
            for (offset, w) in (-radius..=radius).zip(&weights) {
                let j = i + offset;
                if j >= 0 && j < n {
                    sum += w * values[j as usize];
                    norm += w;
                }
            }
            sum / norm
        })
        .collect()
}
