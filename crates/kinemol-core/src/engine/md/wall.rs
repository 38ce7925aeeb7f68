use crate::core::constants::KB_HARTREE;
use nalgebra::Vector3;

/// Numerically stable `ln(1 + eˣ)`.
#[inline]
fn softplus(x: f64) -> f64 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

/// Numerically stable logistic function `1 / (1 + e⁻ˣ)`.
#[inline]
fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Geometry of the confining wall; coordinates and radii in Bohr.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WallShape {
    None,
    Spheric {
        radius: f64,
    },
    Rect {
        x: (f64, f64),
        y: (f64, f64),
        z: (f64, f64),
    },
}

/// Functional form of the confinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WallKind {
    /// `kT_wall · ln(1 + exp(β(r − R)))` per atom, one-sided per face for
    /// rectangular shapes.
    LogFermi,
    /// `½·k·(r − R)²` beyond the boundary; `β` doubles as the spring
    /// constant in Hartree/Bohr².
    Harmonic,
}

/// The confining wall strategy, stored by value in the integrator.
///
/// Gradients are first-order only.
#[derive(Debug, Clone, Copy)]
pub struct Wall {
    pub shape: WallShape,
    pub kind: WallKind,
    /// Steepness of the log-Fermi edge (1/Bohr) or harmonic spring constant.
    pub beta: f64,
    /// Wall temperature in Kelvin; scales the log-Fermi height.
    pub temperature: f64,
}

impl Wall {
    pub fn none() -> Self {
        Self {
            shape: WallShape::None,
            kind: WallKind::LogFermi,
            beta: 6.0,
            temperature: 298.15,
        }
    }

    pub fn is_active(&self) -> bool {
        self.shape != WallShape::None
    }

    /// Adds the wall forces to `gradient` and returns the wall energy in
    /// Hartree. Positions and gradient are in Bohr and Hartree/Bohr.
    pub fn apply(&self, positions: &[Vector3<f64>], gradient: &mut [Vector3<f64>]) -> f64 {
        match self.shape {
            WallShape::None => 0.0,
            WallShape::Spheric { radius } => self.apply_spheric(radius, positions, gradient),
            WallShape::Rect { x, y, z } => self.apply_rect(x, y, z, positions, gradient),
        }
    }

    fn apply_spheric(
        &self,
        radius: f64,
        positions: &[Vector3<f64>],
        gradient: &mut [Vector3<f64>],
    ) -> f64 {
        let kt = KB_HARTREE * self.temperature;
        let mut energy = 0.0;
        for (pos, grad) in positions.iter().zip(gradient.iter_mut()) {
            let r = pos.norm();
            if r < 1e-12 {
                continue;
            }
            let direction = pos / r;
            match self.kind {
                WallKind::LogFermi => {
                    let argument = self.beta * (r - radius);
                    energy += kt * softplus(argument);
                    *grad += kt * self.beta * sigmoid(argument) * direction;
                }
                WallKind::Harmonic => {
                    if r > radius {
                        let overshoot = r - radius;
                        energy += 0.5 * self.beta * overshoot * overshoot;
                        *grad += self.beta * overshoot * direction;
                    }
                }
            }
        }
        energy
    }

    fn apply_rect(
        &self,
        x: (f64, f64),
        y: (f64, f64),
        z: (f64, f64),
        positions: &[Vector3<f64>],
        gradient: &mut [Vector3<f64>],
    ) -> f64 {
        let kt = KB_HARTREE * self.temperature;
        let bounds = [x, y, z];
        let mut energy = 0.0;
        for (pos, grad) in positions.iter().zip(gradient.iter_mut()) {
            for axis in 0..3 {
                let (low, high) = bounds[axis];
                let coordinate = pos[axis];
                match self.kind {
                    WallKind::LogFermi => {
                        // One term per face, each one-sided.
                        let below = self.beta * (low - coordinate);
                        let above = self.beta * (coordinate - high);
                        energy += kt * (softplus(below) + softplus(above));
                        grad[axis] += kt * self.beta * (sigmoid(above) - sigmoid(below));
                    }
                    WallKind::Harmonic => {
                        if coordinate < low {
                            let overshoot = low - coordinate;
                            energy += 0.5 * self.beta * overshoot * overshoot;
                            grad[axis] -= self.beta * overshoot;
                        } else if coordinate > high {
                            let overshoot = coordinate - high;
                            energy += 0.5 * self.beta * overshoot * overshoot;
                            grad[axis] += self.beta * overshoot;
                        }
                    }
                }
            }
        }
        energy
    }
}
