//! Small seeded-randomness helpers shared by the index backends.
//!
//! The reference implementation draws Gaussian projection matrices via
//! `numpy.random.randn`. `rand` alone only exposes uniform sampling, so this
//! applies the Box-Muller transform directly rather than pulling in an extra
//! distribution crate.

use rand::Rng;

/// Sample a single standard-normal value (mean 0, variance 1).
pub fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
    let u2: f32 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos()
}
