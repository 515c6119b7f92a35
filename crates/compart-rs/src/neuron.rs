//! Nine-parameter Izhikevich compartment model.
//!
//! ```text
//! C dv/dt = k (v - vr)(v - vt) - u + I
//!   du/dt = a (b (v - vr) - u)
//! if v >= vpeak: v = c, u = u + d
//! ```

use dendrite_core::{Current, DendriteError, Result, Voltage};
use serde::{Deserialize, Serialize};

/// Receptor family a neuron drives when it spikes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeuronType {
    /// Drives AMPA/NMDA (COBA) or positive current (CUBA)
    Excitatory,
    /// Drives GABAa/GABAb (COBA) or negative current (CUBA)
    Inhibitory,
}

/// Parameters of the 9-parameter Izhikevich model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IzhikevichParams {
    pub capacitance: f64, // C (pF)
    pub k: f64,           // Quadratic gain (nS/mV)
    pub v_rest: Voltage,  // vr (mV)
    pub v_thresh: Voltage, // vt (mV)
    pub a: f64,           // Recovery time scale (1/ms)
    pub b: f64,           // Recovery sensitivity (nS)
    pub v_peak: Voltage,  // Spike cutoff (mV)
    pub v_reset: Voltage, // c (mV)
    pub d: f64,           // Recovery jump after a spike (pA)
}

impl Default for IzhikevichParams {
    fn default() -> Self {
        Self::regular_spiking()
    }
}

impl IzhikevichParams {
    /// Parameters in the conventional order `(C, k, vr, vt, a, b, vpeak, c, d)`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        capacitance: f64,
        k: f64,
        v_rest: Voltage,
        v_thresh: Voltage,
        a: f64,
        b: f64,
        v_peak: Voltage,
        v_reset: Voltage,
        d: f64,
    ) -> Self {
        Self {
            capacitance,
            k,
            v_rest,
            v_thresh,
            a,
            b,
            v_peak,
            v_reset,
            d,
        }
    }

    /// Regular spiking (RS) cortical pyramidal cell
    pub fn regular_spiking() -> Self {
        Self::new(100.0, 0.7, -60.0, -40.0, 0.03, -2.0, 35.0, -50.0, 100.0)
    }

    /// Fast spiking (FS) interneuron
    pub fn fast_spiking() -> Self {
        Self::new(20.0, 1.0, -55.0, -40.0, 0.2, -2.0, 25.0, -45.0, -55.0)
    }

    pub fn validate(&self) -> Result<()> {
        let values = [
            self.capacitance,
            self.k,
            self.v_rest,
            self.v_thresh,
            self.a,
            self.b,
            self.v_peak,
            self.v_reset,
            self.d,
        ];
        if values.iter().any(|x| !x.is_finite()) {
            return Err(DendriteError::config("neuron parameters must be finite"));
        }
        if self.capacitance <= 0.0 {
            return Err(DendriteError::config(format!(
                "capacitance must be positive, got {}",
                self.capacitance
            )));
        }
        if self.v_peak <= self.v_reset {
            return Err(DendriteError::config(format!(
                "v_peak ({}) must lie above v_reset ({})",
                self.v_peak, self.v_reset
            )));
        }
        Ok(())
    }

    /// State at rest: `(vr, 0)`
    pub fn resting_state(&self) -> (Voltage, f64) {
        (self.v_rest, 0.0)
    }

    /// Instantaneous `(dv/dt, du/dt)` for total input current `i`.
    #[inline]
    pub fn derivatives(&self, v: Voltage, u: f64, i: Current) -> (f64, f64) {
        let dv = (self.k * (v - self.v_rest) * (v - self.v_thresh) - u + i) / self.capacitance;
        let du = self.a * (self.b * (v - self.v_rest) - u);
        (dv, du)
    }

    #[inline]
    pub fn crossed(&self, v: Voltage) -> bool {
        v >= self.v_peak
    }

    /// Post-spike state
    #[inline]
    pub fn reset(&self, u: f64) -> (Voltage, f64) {
        (self.v_reset, u + self.d)
    }
}
