//! Metropolis-Hastings acceptance mathematics for the Ising energy.
//!
//! The energy couples each pixel to its 3×3 neighbourhood with strength β
//! and to its observed (initial) value with weight γ = ½·ln((1−π)/π),
//! where π is the assumed flip probability of the noise channel.

use crate::error::{Error, Result};
use crate::sub_image::Pixel;

#[derive(Clone, Copy, Debug)]
pub struct Sampler {
    beta: f64,
    gamma: f64,
}

impl Sampler {
    pub fn new(beta: f64, pi: f64) -> Result<Self> {
        if !(pi > 0.0 && pi < 1.0) {
            return Err(Error::Config(format!(
                "pi must lie in (0, 1), got {}",
                pi
            )));
        }
        Ok(Self {
            beta,
            gamma: 0.5 * ((1.0 - pi) / pi).ln(),
        })
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    /// The log acceptance ratio for flipping a pixel whose observed value
    /// is `initial`, current value is `current`, and whose in-window
    /// neighbours sum to `neighbour_sum`.
    pub fn delta_energy(&self, initial: Pixel, current: Pixel, neighbour_sum: i64) -> f64 {
        -2.0 * self.gamma * initial as f64 * current as f64
            - 2.0 * self.beta * current as f64 * neighbour_sum as f64
    }

    /// The log-domain Metropolis rule: accept iff `ln u ≤ ΔE` for
    /// `u ∈ (0, 1]`. Equivalent to `u ≤ exp(ΔE)` without clamping; the
    /// inequality already handles `ΔE ≥ 0`, and staying in the log domain
    /// cannot overflow for large positive `ΔE`.
    pub fn accepts(&self, delta_energy: f64, u: f64) -> bool {
        u.ln() <= delta_energy
    }
}
