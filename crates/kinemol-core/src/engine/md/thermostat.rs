use crate::core::constants::KB_HARTREE;
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{ChiSquared, Distribution, StandardNormal};

/// Velocity-scaling thermostats, stored by value in the integrator.
///
/// [`Thermostat::apply`] rescales the velocities in place and returns the
/// kinetic energy exchanged with the heat bath, which the CSVR variant
/// accumulates for bookkeeping.
#[derive(Debug, Clone)]
pub enum Thermostat {
    /// Microcanonical: velocities pass through untouched.
    None,
    /// Deterministic first-order rescaling toward the target temperature.
    Berendsen { target: f64, coupling_fs: f64 },
    /// Stochastic velocity rescaling sampling the canonical ensemble
    /// (Bussi–Donadio–Parrinello).
    Csvr {
        target: f64,
        coupling_fs: f64,
        exchange_energy: f64,
    },
}

impl Thermostat {
    /// Builds the thermostat selected by name. `coupling_fs` is clamped to
    /// the integration step by the caller.
    pub fn from_name(name: &str, target: f64, coupling_fs: f64) -> Option<Self> {
        match name {
            "none" => Some(Thermostat::None),
            "berendsen" => Some(Thermostat::Berendsen { target, coupling_fs }),
            "csvr" => Some(Thermostat::Csvr {
                target,
                coupling_fs,
                exchange_energy: 0.0,
            }),
            _ => None,
        }
    }

    /// Total energy exchanged with the heat bath so far, Hartree.
    pub fn exchange_energy(&self) -> f64 {
        match self {
            Thermostat::Csvr {
                exchange_energy, ..
            } => *exchange_energy,
            _ => 0.0,
        }
    }

    /// Rescales `velocities` given the instantaneous kinetic energy
    /// (Hartree) and temperature (Kelvin); returns the applied scale factor.
    pub fn apply(
        &mut self,
        velocities: &mut [Vector3<f64>],
        ekin: f64,
        temperature: f64,
        dof: usize,
        dt_fs: f64,
        rng: &mut StdRng,
    ) -> f64 {
        if ekin <= 0.0 || temperature <= 0.0 {
            return 1.0;
        }
        let lambda = match self {
            Thermostat::None => 1.0,
            Thermostat::Berendsen { target, coupling_fs } => {
                (1.0 + (dt_fs / *coupling_fs) * (*target / temperature - 1.0)).sqrt()
            }
            Thermostat::Csvr {
                target,
                coupling_fs,
                exchange_energy,
            } => {
                let dof = dof as f64;
                let target_ekin = 0.5 * KB_HARTREE * *target * dof;
                let c = (-dt_fs / *coupling_fs).exp();
                let r: f64 = rng.sample(StandardNormal);
                let chi = ChiSquared::new(dof)
                    .expect("dof > 0 checked by the integrator")
                    .sample(rng);
                let ratio = target_ekin / (dof * ekin);
                let alpha2 = c
                    + (1.0 - c) * (chi + r * r) * ratio
                    + 2.0 * r * (c * (1.0 - c) * ratio).sqrt();
                *exchange_energy += ekin * (alpha2 - 1.0);
                alpha2.max(0.0).sqrt()
            }
        };
        for v in velocities.iter_mut() {
            *v *= lambda;
        }
        lambda
    }
}
