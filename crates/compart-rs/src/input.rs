//! External spike sources for generator groups.

use dendrite_core::{DendriteError, Result, Timestep, MACRO_STEP_MS};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Produces the spikes of one generator group, one macro-step at a time
pub trait InputSource: Send {
    /// Append the local indices (`< size`) that spike at `timestep`.
    fn spikes(&mut self, timestep: Timestep, size: usize, out: &mut Vec<usize>);

    /// Number of neurons this source drives, if fixed
    fn size(&self) -> Option<usize> {
        None
    }
}

// ============================================================================
// POISSON
// ============================================================================

/// Independent Poisson trains with per-neuron rates (Hz)
#[derive(Debug, Clone)]
pub struct PoissonSource {
    rates: Vec<f64>,
    rng: StdRng,
}

impl PoissonSource {
    pub fn new(rates: Vec<f64>, seed: u64) -> Result<Self> {
        if let Some(bad) = rates.iter().find(|r| !(r.is_finite() && **r >= 0.0)) {
            return Err(DendriteError::config(format!(
                "Poisson rate must be finite and non-negative, got {}",
                bad
            )));
        }
        if rates.iter().any(|r| r * MACRO_STEP_MS / 1000.0 > 1.0) {
            return Err(DendriteError::config(
                "Poisson rate exceeds one spike per macro-step",
            ));
        }
        Ok(Self {
            rates,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Same rate for `size` neurons
    pub fn uniform(size: usize, rate_hz: f64, seed: u64) -> Result<Self> {
        Self::new(vec![rate_hz; size], seed)
    }

    pub fn rates(&self) -> &[f64] {
        &self.rates
    }
}

impl InputSource for PoissonSource {
    fn spikes(&mut self, _timestep: Timestep, size: usize, out: &mut Vec<usize>) {
        for (i, rate) in self.rates.iter().take(size).enumerate() {
            let p = rate * MACRO_STEP_MS / 1000.0;
            if self.rng.gen::<f64>() < p {
                out.push(i);
            }
        }
    }

    fn size(&self) -> Option<usize> {
        Some(self.rates.len())
    }
}

// ============================================================================
// SCHEDULED
// ============================================================================

/// Explicit `(index, timestep)` spike list
#[derive(Debug, Clone, Default)]
pub struct ScheduledSpikes {
    events: Vec<(Timestep, usize)>,
    cursor: usize,
}

impl ScheduledSpikes {
    pub fn new(spikes: impl IntoIterator<Item = (usize, Timestep)>) -> Self {
        let mut events: Vec<(Timestep, usize)> = spikes.into_iter().map(|(i, t)| (t, i)).collect();
        events.sort_unstable();
        events.dedup();
        Self { events, cursor: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.events.len() - self.cursor
    }
}

impl InputSource for ScheduledSpikes {
    fn spikes(&mut self, timestep: Timestep, size: usize, out: &mut Vec<usize>) {
        // skip anything already in the past
        while self.cursor < self.events.len() && self.events[self.cursor].0 < timestep {
            self.cursor += 1;
        }
        while self.cursor < self.events.len() && self.events[self.cursor].0 == timestep {
            let index = self.events[self.cursor].1;
            if index < size {
                out.push(index);
            }
            self.cursor += 1;
        }
    }
}
