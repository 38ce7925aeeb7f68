//! Immutable physical constant tables.
//!
//! Everything in this module is compile-time data. Unit conversions that
//! involve [`BOHR_RADIUS_ANGSTROM`] must go through [`crate::core::units`]
//! rather than multiplying or dividing by the constant at the call site.

/// One Bohr expressed in Ångström (CODATA 2010).
pub const BOHR_RADIUS_ANGSTROM: f64 = 0.529_177_210_92;

/// Boltzmann constant in Hartree per Kelvin.
pub const KB_HARTREE: f64 = 3.166_811_563e-6;

/// Electron masses per unified atomic mass unit.
pub const AMU_TO_AU: f64 = 1_822.888_486_209;

/// Atomic time units per femtosecond.
///
/// With masses in electron masses, lengths in Bohr and times scaled by this
/// factor, `½·m·v²` comes out directly in Hartree.
pub const FS2AMU: f64 = 41.341_373_14;

/// Frequency scale applied to `√|λ|` of the mass-weighted Hessian
/// eigenvalues; the offset is [`FREQ_SCALE_OFFSET`]. The same pair is used
/// for every method.
pub const FREQ_SCALE_FACTOR: f64 = 5150.4;

/// Additive offset of the frequency scale, in cm⁻¹.
pub const FREQ_SCALE_OFFSET: f64 = 47.349;

/// Highest atomic number covered by the element tables.
pub const MAX_ELEMENT: usize = 54;

/// Standard atomic masses in amu, indexed by atomic number (index 0 unused).
const ATOMIC_MASS: [f64; MAX_ELEMENT + 1] = [
    0.0, // Z = 0
    1.008, 4.0026, 6.94, 9.0122, 10.81, 12.011, 14.007, 15.999, 18.998, 20.180, // H - Ne
    22.990, 24.305, 26.982, 28.085, 30.974, 32.06, 35.45, 39.948, // Na - Ar
    39.098, 40.078, 44.956, 47.867, 50.942, 51.996, 54.938, 55.845, // K - Fe
    58.933, 58.693, 63.546, 65.38, 69.723, 72.630, 74.922, 78.971, // Co - Se
    79.904, 83.798, // Br, Kr
    85.468, 87.62, 88.906, 91.224, 92.906, 95.95, 97.0, 101.07, // Rb - Ru
    102.91, 106.42, 107.87, 112.41, 114.82, 118.71, 121.76, 127.60, // Rh - Te
    126.90, 131.29, // I, Xe
];

/// Single-bond covalent radii in Ångström (Cordero et al.), indexed by
/// atomic number. Used for bond perception and topology checks.
const COVALENT_RADIUS: [f64; MAX_ELEMENT + 1] = [
    0.0, // Z = 0
    0.31, 0.28, 1.28, 0.96, 0.84, 0.76, 0.71, 0.66, 0.57, 0.58, // H - Ne
    1.66, 1.41, 1.21, 1.11, 1.07, 1.05, 1.02, 1.06, // Na - Ar
    2.03, 1.76, 1.70, 1.60, 1.53, 1.39, 1.39, 1.32, // K - Fe
    1.26, 1.24, 1.32, 1.22, 1.22, 1.20, 1.19, 1.20, // Co - Se
    1.20, 1.16, // Br, Kr
    2.20, 1.95, 1.90, 1.75, 1.64, 1.54, 1.47, 1.46, // Rb - Ru
    1.42, 1.39, 1.45, 1.44, 1.42, 1.39, 1.39, 1.38, // Rh - Te
    1.39, 1.40, // I, Xe
];

/// Pauling electronegativities, indexed by atomic number. Noble gases and
/// elements without a tabulated value carry 0.0.
const PAULING_EN: [f64; MAX_ELEMENT + 1] = [
    0.0, // Z = 0
    2.20, 0.0, 0.98, 1.57, 2.04, 2.55, 3.04, 3.44, 3.98, 0.0, // H - Ne
    0.93, 1.31, 1.61, 1.90, 2.19, 2.58, 3.16, 0.0, // Na - Ar
    0.82, 1.00, 1.36, 1.54, 1.63, 1.66, 1.55, 1.83, // K - Fe
    1.88, 1.91, 1.90, 1.65, 1.81, 2.01, 2.18, 2.55, // Co - Se
    2.96, 3.00, // Br, Kr
    0.82, 0.95, 1.22, 1.33, 1.60, 2.16, 1.90, 2.20, // Rb - Ru
    2.28, 2.20, 1.93, 1.69, 1.78, 1.96, 2.05, 2.10, // Rh - Te
    2.66, 2.60, // I, Xe
];

/// Element symbols, indexed by atomic number (index 0 unused).
const ELEMENT_SYMBOL: [&str; MAX_ELEMENT + 1] = [
    "X", // Z = 0
    "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", // 1 - 10
    "Na", "Mg", "Al", "Si", "P", "S", "Cl", "Ar", // 11 - 18
    "K", "Ca", "Sc", "Ti", "V", "Cr", "Mn", "Fe", // 19 - 26
    "Co", "Ni", "Cu", "Zn", "Ga", "Ge", "As", "Se", // 27 - 34
    "Br", "Kr", // 35, 36
    "Rb", "Sr", "Y", "Zr", "Nb", "Mo", "Tc", "Ru", // 37 - 44
    "Rh", "Pd", "Ag", "Cd", "In", "Sn", "Sb", "Te", // 45 - 52
    "I", "Xe", // 53, 54
];

/// Returns the element symbol for atomic number `z`.
pub fn element_symbol(z: u8) -> &'static str {
    ELEMENT_SYMBOL[z as usize]
}

/// Looks up an atomic number by element symbol, case-insensitively.
pub fn element_number(symbol: &str) -> Option<u8> {
    ELEMENT_SYMBOL
        .iter()
        .position(|s| s.eq_ignore_ascii_case(symbol))
        .filter(|&z| z > 0)
        .map(|z| z as u8)
}

/// Returns the standard atomic mass in amu for atomic number `z`.
///
/// # Panics
///
/// Panics if `z` is zero or beyond [`MAX_ELEMENT`]; element lists are
/// validated when a [`crate::core::models::system::System`] is constructed.
pub fn atomic_mass(z: u8) -> f64 {
    ATOMIC_MASS[z as usize]
}

/// Returns the single-bond covalent radius in Ångström for atomic number `z`.
pub fn covalent_radius(z: u8) -> f64 {
    COVALENT_RADIUS[z as usize]
}

/// Returns the Pauling electronegativity for atomic number `z`, or 0.0 where
/// no value is tabulated.
pub fn pauling_electronegativity(z: u8) -> f64 {
    PAULING_EN[z as usize]
}

/// True if `z` names an element covered by the tables.
pub fn is_supported_element(z: u8) -> bool {
    z >= 1 && (z as usize) <= MAX_ELEMENT
}
