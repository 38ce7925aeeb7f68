use super::system::System;

/// Pairs of atoms closer than this multiple of the summed covalent radii are
/// considered bonded.
const BOND_DETECTION_SCALE: f64 = 1.3;

/// A symmetric boolean bond matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BondMatrix {
    n: usize,
    bonded: Vec<bool>,
}

impl BondMatrix {
    fn new(n: usize) -> Self {
        Self {
            n,
            bonded: vec![false; n * n],
        }
    }

    #[inline]
    pub fn is_bonded(&self, i: usize, j: usize) -> bool {
        self.bonded[i * self.n + j]
    }

    fn set(&mut self, i: usize, j: usize) {
        self.bonded[i * self.n + j] = true;
        self.bonded[j * self.n + i] = true;
    }

    pub fn atom_count(&self) -> usize {
        self.n
    }

    /// All bonded pairs with `i < j`, in lexicographic order.
    pub fn pairs(&self) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        for i in 0..self.n {
            for j in (i + 1)..self.n {
                if self.is_bonded(i, j) {
                    pairs.push((i, j));
                }
            }
        }
        pairs
    }

    /// Indices bonded to atom `i`.
    pub fn neighbors(&self, i: usize) -> Vec<usize> {
        (0..self.n).filter(|&j| self.is_bonded(i, j)).collect()
    }

    /// Number of entries in which the two matrices differ.
    ///
    /// Each changed bond counts twice, once per triangle, matching the
    /// element-wise difference of the full matrices.
    pub fn difference(&self, other: &BondMatrix) -> usize {
        self.bonded
            .iter()
            .zip(&other.bonded)
            .filter(|(a, b)| a != b)
            .count()
    }
}

/// Derives the bond matrix of `system` from summed covalent radii.
pub fn perceive_bonds(system: &System) -> BondMatrix {
    let n = system.atom_count();
    let atoms = system.atoms();
    let mut matrix = BondMatrix::new(n);
    for i in 0..n {
        for j in (i + 1)..n {
            let cutoff =
                BOND_DETECTION_SCALE * (atoms[i].covalent_radius() + atoms[j].covalent_radius());
            if system.distance(i, j) <= cutoff {
                matrix.set(i, j);
            }
        }
    }
    matrix
}

/// Splits the system into connected fragments over the bond matrix.
///
/// Returns atom index lists, each sorted ascending, ordered by their lowest
/// member.
pub fn fragments(bonds: &BondMatrix) -> Vec<Vec<usize>> {
    let n = bonds.atom_count();
    let mut assigned = vec![false; n];
    let mut result = Vec::new();
    for start in 0..n {
        if assigned[start] {
            continue;
        }
        let mut fragment = Vec::new();
        let mut stack = vec![start];
        assigned[start] = true;
        while let Some(i) = stack.pop() {
            fragment.push(i);
            for j in 0..n {
                if !assigned[j] && bonds.is_bonded(i, j) {
                    assigned[j] = true;
                    stack.push(j);
                }
            }
        }
        fragment.sort_unstable();
        result.push(fragment);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn methane_and_far_helium() -> System {
        System::new(
            &[6, 1, 1, 1, 1, 2],
            vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(0.629, 0.629, 0.629),
                Vector3::new(-0.629, -0.629, 0.629),
                Vector3::new(-0.629, 0.629, -0.629),
                Vector3::new(0.629, -0.629, -0.629),
                Vector3::new(10.0, 0.0, 0.0),
            ],
            0,
            1,
        )
        .unwrap()
    }

    #[test]
    fn methane_has_four_ch_bonds_and_no_hh_bonds() {
        let system = methane_and_far_helium();
        let bonds = perceive_bonds(&system);
        let pairs = bonds.pairs();
        assert_eq!(pairs, vec![(0, 1), (0, 2), (0, 3), (0, 4)]);
        assert_eq!(bonds.neighbors(0), vec![1, 2, 3, 4]);
    }

    #[test]
    fn distant_atom_forms_its_own_fragment() {
        let system = methane_and_far_helium();
        let bonds = perceive_bonds(&system);
        let frags = fragments(&bonds);
        assert_eq!(frags.len(), 2);
        assert_eq!(frags[0], vec![0, 1, 2, 3, 4]);
        assert_eq!(frags[1], vec![5]);
    }

    #[test]
    fn difference_counts_both_triangles_of_a_changed_bond() {
        let system = methane_and_far_helium();
        let reference = perceive_bonds(&system);

        let mut stretched = system.clone();
        let mut geometry = stretched.geometry().to_vec();
        geometry[1] = Vector3::new(5.0, 5.0, 5.0);
        stretched.set_geometry(geometry).unwrap();

        let changed = perceive_bonds(&stretched);
        assert_eq!(reference.difference(&changed), 2);
    }
}
