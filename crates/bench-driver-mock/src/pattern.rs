//! Synthetic beam images for mock camera frames.

/// Linear congruential step (glibc constants) for reproducible speckle.
#[inline]
fn prng(seed: u64) -> u64 {
    seed.wrapping_mul(1103515245).wrapping_add(12345) & 0x7fffffff
}

/// Gaussian beam spot on a speckled background.
///
/// The spot sits near the frame center and wanders slowly with `frame_num`
/// (pointing jitter), so consecutive frames differ while staying
/// reproducible. `peak` is the height of the spot above the background.
///
/// # Returns
/// `height` rows of `width` pixel values
pub fn beam_profile(width: usize, height: usize, frame_num: u64, peak: f64) -> Vec<Vec<f64>> {
    let phase = frame_num as f64 * 0.1;
    let cx = width as f64 / 2.0 + phase.cos() * width as f64 * 0.02;
    let cy = height as f64 / 2.0 + phase.sin() * height as f64 * 0.02;
    let sigma = (width.min(height) as f64 / 8.0).max(0.5);
    let two_sigma_sq = 2.0 * sigma * sigma;

    let mut seed = frame_num.wrapping_add(1);
    (0..height)
        .map(|y| {
            (0..width)
                .map(|x| {
                    seed = prng(seed);
                    let background = (seed % 16) as f64;
                    let dx = x as f64 - cx;
                    let dy = y as f64 - cy;
                    background + peak * (-(dx * dx + dy * dy) / two_sigma_sq).exp()
                })
                .collect()
        })
        .collect()
}
