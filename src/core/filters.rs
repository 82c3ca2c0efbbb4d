// Numeric kernels shared by the store, parsers and pipeline stages

/// First index with `xs[i] >= v`.
pub fn lower_bound(xs: &[f64], v: f64) -> usize {
    xs.partition_point(|&x| x < v)
}

/// First index with `xs[i] > v`.
pub fn upper_bound(xs: &[f64], v: f64) -> usize {
    xs.partition_point(|&x| x <= v)
}

fn sorted(mut buf: Vec<f64>) -> Vec<f64> {
    buf.sort_by(|a, b| a.total_cmp(b));
    buf
}

/// Median over a `2*radius+1` window whose out-of-range taps repeat the edge sample.
pub fn median_edge_clamped(data: &[f64], radius: usize) -> Vec<f64> {
    if data.is_empty() || radius == 0 {
        return data.to_vec();
    }

    let last = data.len() as isize - 1;
    let r = radius as isize;
    let mut out = Vec::with_capacity(data.len());
    let mut window = Vec::with_capacity(2 * radius + 1);

    for i in 0..data.len() as isize {
        window.clear();
        for j in -r..=r {
            let idx = (i + j).clamp(0, last) as usize;
            window.push(data[idx]);
        }
        window.sort_by(|a, b| a.total_cmp(b));
        out.push(window[radius]);
    }

    out
}

/// Median over a window that shrinks at the edges; picks the upper middle for even sizes.
pub fn median_shrinking(data: &[f64], radius: usize) -> Vec<f64> {
    let n = data.len();
    (0..n)
        .map(|i| {
            let left = i.saturating_sub(radius);
            let right = (i + radius).min(n - 1);
            let win = sorted(data[left..=right].to_vec());
            win[win.len() / 2]
        })
        .collect()
}

/// Median over a shrinking window; even sizes average the two middle values.
pub fn median_shrinking_mean(data: &[f64], radius: usize) -> Vec<f64> {
    let n = data.len();
    if n == 0 || radius == 0 {
        return data.to_vec();
    }

    (0..n)
        .map(|i| {
            let left = i.saturating_sub(radius);
            let right = (i + radius).min(n - 1);
            let win = sorted(data[left..=right].to_vec());
            let m = win.len();
            if m % 2 == 1 {
                win[m / 2]
            } else {
                0.5 * (win[m / 2 - 1] + win[m / 2])
            }
        })
        .collect()
}

/// First-order exponential smoothing. No-op unless `alpha` is in (0, 1].
pub fn exp_filter(data: &mut [f64], alpha: f64) {
    if data.len() <= 1 || !(alpha > 0.0 && alpha <= 1.0) {
        return;
    }

    let keep = 1.0 - alpha;
    let mut y = data[0];
    for v in data.iter_mut().skip(1) {
        y = alpha * *v + keep * y;
        *v = y;
    }
}

/// Linear interpolation on a fixed grid from `ceil(x0/step)*step` to `floor(xn/step)*step`.
///
/// Stops at the first grid point that cannot be bracketed by two distinct samples.
pub fn resample_linear(xs: &[f64], ys: &[f64], step: f64) -> (Vec<f64>, Vec<f64>) {
    let n = xs.len().min(ys.len());
    if n < 2 || step <= 0.0 {
        return (Vec::new(), Vec::new());
    }

    let start = (xs[0] / step).ceil() * step;
    let finish = (xs[n - 1] / step).floor() * step;
    let cap = if finish >= start {
        ((finish - start) / step).floor() as usize + 1
    } else {
        0
    };

    let mut out_x = Vec::with_capacity(cap);
    let mut out_y = Vec::with_capacity(cap);
    let mut j = 0usize;
    let mut k = 0usize;

    loop {
        let x = start + k as f64 * step;
        if x > finish {
            break;
        }

        while j < n - 1 && x > xs[j + 1] {
            j += 1;
        }
        if j + 1 > n - 1 {
            break;
        }

        let (x0, x1) = (xs[j], xs[j + 1]);
        if !(x >= x0 && x <= x1) || x1 == x0 {
            break;
        }

        out_x.push(x);
        out_y.push(ys[j] + (x - x0) / (x1 - x0) * (ys[j + 1] - ys[j]));
        k += 1;
    }

    (out_x, out_y)
}

/// Samples the curve every `step` seconds from its first timestamp, numbering frames from zero.
pub fn resample_frames(xs: &[f64], ys: &[f64], step: f64) -> Option<(Vec<i32>, Vec<f64>)> {
    let n = xs.len().min(ys.len());
    if n < 2 || step <= 0.0 {
        return None;
    }

    let mut frames = Vec::new();
    let mut values = Vec::new();
    let mut t = xs[0];
    let mut i = 0usize;
    let mut frame = 0i32;

    while t <= xs[n - 1] {
        while i + 1 < n && xs[i + 1] < t {
            i += 1;
        }
        if i + 1 >= n {
            break;
        }

        let (x0, x1) = (xs[i], xs[i + 1]);
        let y = if x1 != x0 {
            ys[i] + (ys[i + 1] - ys[i]) * (t - x0) / (x1 - x0)
        } else {
            ys[i]
        };

        frames.push(frame);
        values.push(y);
        frame += 1;
        t += step;
    }

    Some((frames, values))
}
