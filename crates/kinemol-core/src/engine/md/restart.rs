use crate::engine::error::EngineError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Serialized integrator state.
///
/// Every field is optional on read; missing keys fall back to the running
/// configuration. Geometry and velocities are pipe-delimited double lists of
/// length 3N, in the integrator's internal units (Bohr and Bohr per atomic
/// time unit).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestartState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(rename = "dT", skip_serializing_if = "Option::is_none")]
    pub dt: Option<f64>,
    #[serde(rename = "MaxTime", skip_serializing_if = "Option::is_none")]
    pub max_time: Option<f64>,
    #[serde(rename = "T", skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(rename = "currentStep", skip_serializing_if = "Option::is_none")]
    pub current_step: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nocenter: Option<bool>,
    #[serde(rename = "average_T", skip_serializing_if = "Option::is_none")]
    pub average_temperature: Option<f64>,
    #[serde(rename = "average_Epot", skip_serializing_if = "Option::is_none")]
    pub average_epot: Option<f64>,
    #[serde(rename = "average_Ekin", skip_serializing_if = "Option::is_none")]
    pub average_ekin: Option<f64>,
    #[serde(rename = "average_Etot", skip_serializing_if = "Option::is_none")]
    pub average_etot: Option<f64>,
    #[serde(rename = "average_Virial", skip_serializing_if = "Option::is_none")]
    pub average_virial: Option<f64>,
    #[serde(rename = "average_Wall", skip_serializing_if = "Option::is_none")]
    pub average_wall: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupling: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thermostat: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocities: Option<String>,
}

/// Renders a double list as a pipe-delimited string.
pub fn doubles_to_string(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| format!("{v:.17e}"))
        .collect::<Vec<_>>()
        .join("|")
}

/// Parses a pipe-delimited double list; empty strings yield an empty vector.
pub fn string_to_doubles(text: &str) -> Result<Vec<f64>, EngineError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    text.split('|')
        .map(|field| {
            field
                .trim()
                .parse::<f64>()
                .map_err(|_| EngineError::Restart(format!("'{field}' is not a double")))
        })
        .collect()
}

impl RestartState {
    /// Reads a restart file, tolerating missing keys. A malformed file is an
    /// [`EngineError::Restart`], which callers treat as "skip the restart".
    pub fn read(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| EngineError::Restart(format!("{}: {e}", path.display())))
    }

    pub fn write(&self, path: &Path) -> Result<(), EngineError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::Restart(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn geometry_values(&self) -> Result<Vec<f64>, EngineError> {
        self.geometry
            .as_deref()
            .map(string_to_doubles)
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    pub fn velocity_values(&self) -> Result<Vec<f64>, EngineError> {
        self.velocities
            .as_deref()
            .map(string_to_doubles)
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_round_trip_bit_exactly() {
        let values = vec![0.1, -2.5e-17, 3.0, f64::MIN_POSITIVE];
        let text = doubles_to_string(&values);
        let parsed = string_to_doubles(&text).unwrap();
        assert_eq!(values.len(), parsed.len());
        for (a, b) in values.iter().zip(&parsed) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn empty_double_list_parses_to_empty_vector() {
        assert!(string_to_doubles("").unwrap().is_empty());
        assert!(string_to_doubles("  ").unwrap().is_empty());
    }

    #[test]
    fn malformed_double_list_is_a_restart_error() {
        assert!(matches!(
            string_to_doubles("1.0|not-a-number"),
            Err(EngineError::Restart(_))
        ));
    }

    #[test]
    fn file_round_trip_preserves_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("restart.json");
        let state = RestartState {
            method: Some("ff".to_string()),
            dt: Some(0.5),
            current_step: Some(1200),
            geometry: Some(doubles_to_string(&[1.0, 2.0, 3.0])),
            velocities: Some(doubles_to_string(&[0.1, 0.2, 0.3])),
            ..RestartState::default()
        };
        state.write(&path).unwrap();

        let loaded = RestartState::read(&path).unwrap();
        assert_eq!(loaded.current_step, Some(1200));
        assert_eq!(loaded.geometry_values().unwrap(), vec![1.0, 2.0, 3.0]);
        assert_eq!(loaded.max_time, None);
    }

    #[test]
    fn reading_tolerates_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("restart.json");
        std::fs::write(&path, r#"{"dT": 2.0}"#).unwrap();
        let state = RestartState::read(&path).unwrap();
        assert_eq!(state.dt, Some(2.0));
        assert!(state.geometry_values().unwrap().is_empty());
    }

    #[test]
    fn malformed_json_is_a_restart_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("restart.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            RestartState::read(&path),
            Err(EngineError::Restart(_))
        ));
    }
}
