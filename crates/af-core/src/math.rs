//! Small numeric helpers shared by the extraction engines.

/// `n` evenly spaced samples over `[start, stop]` (both ends included).
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| if i == n - 1 { stop } else { start + step * i as f64 }).collect()
        }
    }
}

/// Trapezoidal integral of `y` over `x`.
pub fn trapezoid(x: &[f64], y: &[f64]) -> f64 {
    debug_assert_eq!(x.len(), y.len());
    x.windows(2).zip(y.windows(2)).map(|(xw, yw)| 0.5 * (xw[1] - xw[0]) * (yw[0] + yw[1])).sum()
}

/// Running trapezoidal integral of `y` over `x`, starting at 0.
pub fn cumulative_trapezoid(x: &[f64], y: &[f64]) -> Vec<f64> {
    debug_assert_eq!(x.len(), y.len());
    let mut out = Vec::with_capacity(x.len());
    let mut acc = 0.0;
    for k in 0..x.len() {
        if k > 0 {
            acc += trapezoid(&x[k - 1..=k], &y[k - 1..=k]);
        }
        out.push(acc);
    }
    out
}

/// Finite-difference gradient with unit spacing: central differences inside,
/// one-sided at the ends. Fewer than two samples yields NaN.
pub fn gradient(y: &[f64]) -> Vec<f64> {
    let n = y.len();
    if n < 2 {
        return vec![f64::NAN; n];
    }
    let mut g = Vec::with_capacity(n);
    g.push(y[1] - y[0]);
    for i in 1..n - 1 {
        g.push(0.5 * (y[i + 1] - y[i - 1]));
    }
    g.push(y[n - 1] - y[n - 2]);
    g
}

/// Gradient of `y` sampled at non-uniform `x`: second-order differences
/// inside, one-sided at the ends. Fewer than two samples yields NaN.
pub fn gradient_over(x: &[f64], y: &[f64]) -> Vec<f64> {
    debug_assert_eq!(x.len(), y.len());
    let n = y.len();
    if n < 2 {
        return vec![f64::NAN; n];
    }
    let mut g = Vec::with_capacity(n);
    g.push((y[1] - y[0]) / (x[1] - x[0]));
    for i in 1..n - 1 {
        let hs = x[i] - x[i - 1];
        let hd = x[i + 1] - x[i];
        g.push(
            (hs * hs * y[i + 1] + (hd * hd - hs * hs) * y[i] - hd * hd * y[i - 1])
                / (hs * hd * (hd + hs)),
        );
    }
    g.push((y[n - 1] - y[n - 2]) / (x[n - 1] - x[n - 2]));
    g
}

/// Centred moving average of width `window`; edges average over the samples
/// that exist. `window <= 1` returns a copy.
pub fn moving_average(y: &[f64], window: usize) -> Vec<f64> {
    if window <= 1 || y.is_empty() {
        return y.to_vec();
    }
    let n = y.len();
    let back = window / 2;
    let ahead = window - 1 - back;
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(back);
            let hi = (i + ahead).min(n - 1);
            y[lo..=hi].iter().sum::<f64>() / (hi - lo + 1) as f64
        })
        .collect()
}

/// Ordinary least-squares line `y = slope * x + intercept`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    /// Fitted slope
    pub slope: f64,
    /// Fitted intercept
    pub intercept: f64,
    /// Coefficient of determination (r^2)
    pub r_squared: f64,
    /// Standard error of the slope; NaN with fewer than three points
    pub stderr: f64,
    /// Standard error of the intercept; NaN with fewer than three points
    pub intercept_stderr: f64,
}

impl LinearFit {
    const UNDEFINED: Self = Self {
        slope: f64::NAN,
        intercept: f64::NAN,
        r_squared: f64::NAN,
        stderr: f64::NAN,
        intercept_stderr: f64::NAN,
    };
}

/// Least-squares line through `(x, y)`.
///
/// Fewer than two points or zero spread in `x` gives NaN slope/intercept and
/// NaN r^2. Zero spread in `y` gives r^2 = 0.
pub fn linregress(x: &[f64], y: &[f64]) -> LinearFit {
    debug_assert_eq!(x.len(), y.len());
    let n = x.len();
    if n < 2 {
        return LinearFit::UNDEFINED;
    }
    let nf = n as f64;
    let xm = x.iter().sum::<f64>() / nf;
    let ym = y.iter().sum::<f64>() / nf;

    let (mut ssxm, mut ssym, mut ssxym) = (0.0, 0.0, 0.0);
    for (&xi, &yi) in x.iter().zip(y) {
        let dx = xi - xm;
        let dy = yi - ym;
        ssxm += dx * dx;
        ssym += dy * dy;
        ssxym += dx * dy;
    }
    if ssxm == 0.0 {
        return LinearFit::UNDEFINED;
    }

    let slope = ssxym / ssxm;
    let intercept = ym - slope * xm;
    let r_squared = if ssym == 0.0 {
        0.0
    } else {
        let r = (ssxym / (ssxm * ssym).sqrt()).clamp(-1.0, 1.0);
        r * r
    };
    let (stderr, intercept_stderr) = if n > 2 {
        let s = ((1.0 - r_squared).max(0.0) * ssym / ssxm / (nf - 2.0)).sqrt();
        (s, s * (ssxm / nf + xm * xm).sqrt())
    } else {
        (f64::NAN, f64::NAN)
    };
    LinearFit { slope, intercept, r_squared, stderr, intercept_stderr }
}
