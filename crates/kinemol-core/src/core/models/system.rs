use super::atom::Atom;
use crate::core::constants;
use nalgebra::Vector3;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SystemError {
    #[error("Element Z = {0} is not covered by the element tables")]
    UnsupportedElement(u8),
    #[error("Geometry has {got} positions but the system has {expected} atoms")]
    GeometryLengthMismatch { expected: usize, got: usize },
    #[error("Flat coordinate vector of length {0} is not a multiple of three")]
    NotCartesian(usize),
}

/// A molecular system: an immutable element list, mutable Cartesian
/// coordinates in Ångström, total charge and spin multiplicity.
///
/// The element list is fixed at construction; geometry is freely replaced
/// through [`System::set_geometry`] and friends.
#[derive(Debug, Clone)]
pub struct System {
    atoms: Vec<Atom>,
    geometry: Vec<Vector3<f64>>,
    charge: i32,
    multiplicity: u32,
}

impl System {
    /// Builds a system from atomic numbers and positions in Ångström.
    ///
    /// # Errors
    ///
    /// Fails if an element is outside the tabulated range or the position
    /// list does not match the element list.
    pub fn new(
        numbers: &[u8],
        geometry: Vec<Vector3<f64>>,
        charge: i32,
        multiplicity: u32,
    ) -> Result<Self, SystemError> {
        if let Some(&z) = numbers.iter().find(|&&z| !constants::is_supported_element(z)) {
            return Err(SystemError::UnsupportedElement(z));
        }
        if numbers.len() != geometry.len() {
            return Err(SystemError::GeometryLengthMismatch {
                expected: numbers.len(),
                got: geometry.len(),
            });
        }
        Ok(Self {
            atoms: numbers.iter().map(|&z| Atom::new(z)).collect(),
            geometry,
            charge,
            multiplicity,
        })
    }

    pub fn atom_count(&self) -> usize {
        self.atoms.len()
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    /// Atomic numbers in atom order.
    pub fn atomic_numbers(&self) -> Vec<u8> {
        self.atoms.iter().map(|a| a.z).collect()
    }

    /// Per-atom masses in amu, with hydrogen masses scaled by `hmass`.
    pub fn masses(&self, hmass: f64) -> Vec<f64> {
        self.atoms
            .iter()
            .map(|a| if a.is_hydrogen() { a.mass * hmass } else { a.mass })
            .collect()
    }

    pub fn charge(&self) -> i32 {
        self.charge
    }

    pub fn multiplicity(&self) -> u32 {
        self.multiplicity
    }

    /// Positions in Ångström.
    pub fn geometry(&self) -> &[Vector3<f64>] {
        &self.geometry
    }

    /// Replaces the geometry; the length must match the atom list.
    pub fn set_geometry(&mut self, geometry: Vec<Vector3<f64>>) -> Result<(), SystemError> {
        if geometry.len() != self.atoms.len() {
            return Err(SystemError::GeometryLengthMismatch {
                expected: self.atoms.len(),
                got: geometry.len(),
            });
        }
        self.geometry = geometry;
        Ok(())
    }

    /// Replaces the geometry from a flat `[x0, y0, z0, x1, …]` vector.
    pub fn set_geometry_flat(&mut self, coords: &[f64]) -> Result<(), SystemError> {
        if coords.len() % 3 != 0 {
            return Err(SystemError::NotCartesian(coords.len()));
        }
        let geometry = coords
            .chunks_exact(3)
            .map(|c| Vector3::new(c[0], c[1], c[2]))
            .collect();
        self.set_geometry(geometry)
    }

    /// The geometry flattened to `[x0, y0, z0, x1, …]`.
    pub fn geometry_flat(&self) -> Vec<f64> {
        self.geometry
            .iter()
            .flat_map(|p| [p.x, p.y, p.z])
            .collect()
    }

    /// The unweighted centroid of the geometry.
    pub fn centroid(&self) -> Vector3<f64> {
        if self.geometry.is_empty() {
            return Vector3::zeros();
        }
        self.geometry.iter().sum::<Vector3<f64>>() / self.geometry.len() as f64
    }

    /// The mass-weighted centre of the geometry.
    pub fn center_of_mass(&self) -> Vector3<f64> {
        let mut total = 0.0;
        let mut com = Vector3::zeros();
        for (atom, pos) in self.atoms.iter().zip(&self.geometry) {
            total += atom.mass;
            com += pos * atom.mass;
        }
        com / total
    }

    /// Translates every atom by `shift`.
    pub fn translate(&mut self, shift: Vector3<f64>) {
        for pos in &mut self.geometry {
            *pos += shift;
        }
    }

    /// Moves the centroid of the structure to the origin.
    pub fn center(&mut self) {
        let shift = -self.centroid();
        self.translate(shift);
    }

    /// Distance in Ångström between atoms `i` and `j`.
    #[inline]
    pub fn distance(&self, i: usize, j: usize) -> f64 {
        (self.geometry[i] - self.geometry[j]).norm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn water() -> System {
        System::new(
            &[8, 1, 1],
            vec![
                Vector3::new(0.0, 0.0, 0.117),
                Vector3::new(0.0, 0.757, -0.469),
                Vector3::new(0.0, -0.757, -0.469),
            ],
            0,
            1,
        )
        .unwrap()
    }

    #[test]
    fn rejects_unsupported_elements() {
        let result = System::new(&[119], vec![Vector3::zeros()], 0, 1);
        assert!(matches!(result, Err(SystemError::UnsupportedElement(119))));
    }

    #[test]
    fn rejects_mismatched_geometry_length() {
        let result = System::new(&[1, 1], vec![Vector3::zeros()], 0, 1);
        assert!(matches!(
            result,
            Err(SystemError::GeometryLengthMismatch { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn flat_geometry_round_trips() {
        let mut system = water();
        let flat = system.geometry_flat();
        assert_eq!(flat.len(), 9);
        system.set_geometry_flat(&flat).unwrap();
        assert!((system.geometry()[1].y - 0.757).abs() < 1e-14);
    }

    #[test]
    fn set_geometry_flat_rejects_non_cartesian_length() {
        let mut system = water();
        assert!(matches!(
            system.set_geometry_flat(&[1.0, 2.0]),
            Err(SystemError::NotCartesian(2))
        ));
    }

    #[test]
    fn hydrogen_mass_repartitioning_scales_only_hydrogen() {
        let system = water();
        let plain = system.masses(1.0);
        let scaled = system.masses(4.0);
        assert!((scaled[0] - plain[0]).abs() < 1e-12);
        assert!((scaled[1] - 4.0 * plain[1]).abs() < 1e-12);
    }

    #[test]
    fn center_moves_centroid_to_origin() {
        let mut system = water();
        system.translate(Vector3::new(5.0, -3.0, 1.0));
        system.center();
        assert!(system.centroid().norm() < 1e-12);
    }

    #[test]
    fn center_of_mass_is_near_oxygen_for_water() {
        let system = water();
        let com = system.center_of_mass();
        assert!((com - system.geometry()[0]).norm() < 0.15);
    }
}
