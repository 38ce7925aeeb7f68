//! Length unit conversions.
//!
//! The public boundary of the library speaks Ångström; quantum-style back
//! ends and the Hessian engine work in Bohr. Every conversion in the code
//! base goes through the two functions below so that the Bohr radius appears
//! in exactly one place.

use super::constants::BOHR_RADIUS_ANGSTROM;
use nalgebra::Vector3;

/// The length unit a potential back end expects its coordinates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthUnit {
    Angstrom,
    Bohr,
}

/// Converts a length from Ångström to Bohr.
#[inline]
pub fn angstrom_to_bohr(value: f64) -> f64 {
    value / BOHR_RADIUS_ANGSTROM
}

/// Converts a length from Bohr to Ångström.
#[inline]
pub fn bohr_to_angstrom(value: f64) -> f64 {
    value * BOHR_RADIUS_ANGSTROM
}

/// Converts a position vector from Ångström to Bohr.
#[inline]
pub fn vector_angstrom_to_bohr(v: &Vector3<f64>) -> Vector3<f64> {
    v / BOHR_RADIUS_ANGSTROM
}

/// Converts a position vector from Bohr to Ångström.
#[inline]
pub fn vector_bohr_to_angstrom(v: &Vector3<f64>) -> Vector3<f64> {
    v * BOHR_RADIUS_ANGSTROM
}

/// Converts a gradient component from Hartree/Ångström to Hartree/Bohr.
///
/// The chain rule flips the factor relative to positions: a derivative with
/// respect to a Bohr-valued coordinate shrinks by the Bohr radius.
#[inline]
pub fn gradient_angstrom_to_bohr(value: f64) -> f64 {
    value * BOHR_RADIUS_ANGSTROM
}

/// Converts a gradient component from Hartree/Bohr to Hartree/Ångström.
#[inline]
pub fn gradient_bohr_to_angstrom(value: f64) -> f64 {
    value / BOHR_RADIUS_ANGSTROM
}
