use crate::auction::agenda::CostTolerance;
use crate::auction::mechanism::MechanismKind;
use crate::sim::data::ScenarioGenParams;
use anyhow::{Context, Result, anyhow, bail};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::error;

/// Auctioneer parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuctioneerConfig {
    /// Scenario YAML, a directory of scenarios, or a path with a `{scenario_id}` placeholder
    pub scenario_file: PathBuf,
    pub scenario_id: Option<String>,
    pub mechanism: MechanismKind,
    /// Periodically audit committed items for strictly cheaper quotes
    pub reallocate: bool,
    pub round_deadline_ms: u64,
    pub cost_tolerance: CostTolerance,
    pub max_unassigned_retries: u32,
    /// 0 offers the whole backlog each round
    pub max_items_per_round: usize,
    /// 0 leaves agendas unbounded
    pub max_agenda_len: usize,
    pub reauction_tiebreak: bool,
    pub audit_interval_ms: u64,
    pub sim: SimSettings,
}

impl Default for AuctioneerConfig {
    fn default() -> Self {
        Self {
            scenario_file: PathBuf::from("scenarios/default.yaml"),
            scenario_id: None,
            mechanism: MechanismKind::Greedy,
            reallocate: false,
            round_deadline_ms: 500,
            cost_tolerance: CostTolerance::default(),
            max_unassigned_retries: 3,
            max_items_per_round: 0,
            max_agenda_len: 0,
            reauction_tiebreak: false,
            audit_interval_ms: 5000,
            sim: SimSettings::default(),
        }
    }
}

impl AuctioneerConfig {
    pub fn round_deadline(&self) -> Duration {
        Duration::from_millis(self.round_deadline_ms)
    }

    pub fn audit_interval(&self) -> Duration {
        Duration::from_millis(self.audit_interval_ms)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.round_deadline_ms == 0 {
            return Err(crate::Error::ConfigurationError(
                "round_deadline_ms must be positive".to_string(),
            ));
        }
        if self.reallocate && self.audit_interval_ms == 0 {
            return Err(crate::Error::ConfigurationError(
                "audit_interval_ms must be positive when reallocate is on".to_string(),
            ));
        }
        let tol = &self.cost_tolerance;
        if !(tol.absolute >= 0.0 && tol.relative >= 0.0) {
            return Err(crate::Error::ConfigurationError(
                "cost_tolerance must be non-negative".to_string(),
            ));
        }
        if !(self.sim.handling_secs_per_unit.is_finite() && self.sim.handling_secs_per_unit >= 0.0) {
            return Err(crate::Error::ConfigurationError(
                "sim.handling_secs_per_unit must be non-negative".to_string(),
            ));
        }
        if self.sim.tick_ms == 0 {
            return Err(crate::Error::ConfigurationError("sim.tick_ms must be positive".to_string()));
        }
        Ok(())
    }
}

/// Simulation driver settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimSettings {
    /// Sim time advanced per driver tick
    pub tick_ms: u64,
    /// Run is torn down when sim time passes this
    pub horizon_secs: f64,
    pub output_dir: String,
    pub use_timestamp: bool,
    pub timestamp_fmt: String,
    pub log_level: String,
    /// Seconds to collect one unit of material
    pub handling_secs_per_unit: f64,
    /// Generate a scenario instead of loading `scenario_file`
    pub random_scenario: Option<ScenarioGenParams>,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            horizon_secs: 3600.0,
            output_dir: "results".to_string(),
            use_timestamp: true,
            timestamp_fmt: "%Y-%m-%d_%H-%M-%S".to_string(),
            log_level: "info".to_string(),
            handling_secs_per_unit: 5.0,
            random_scenario: None,
        }
    }
}

/// Evaluate a Pkl module with the `pkl` CLI and read its JSON rendering
pub fn load_pkl<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let output = Command::new("pkl")
        .args(["eval", "--format", "json"])
        .arg(path)
        .output()
        .with_context(|| format!("Failed to run pkl on {}", path.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!("pkl eval of {} failed: {}", path.display(), stderr.trim());
        bail!("pkl eval of {} failed: {}", path.display(), stderr.trim());
    }
    parse_json(&output.stdout, path)
}

pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    parse_json(&bytes, path)
}

fn parse_json<T: DeserializeOwned>(bytes: &[u8], path: &Path) -> Result<T> {
    serde_json::from_slice(bytes).with_context(|| format!("Failed to parse json {}", path.display()))
}

pub fn load_yaml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("Failed to parse yaml {}", path.display()))
}

/// Load and validate an [`AuctioneerConfig`], picking the format from the extension
pub fn load_config(path: impl AsRef<Path>) -> Result<AuctioneerConfig> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let config: AuctioneerConfig = match ext.as_str() {
        "pkl" => load_pkl(path)?,
        "json" => load_json(path)?,
        "yaml" | "yml" => load_yaml(path)?,
        other => return Err(anyhow!("Unsupported config format '{}' for {}", other, path.display())),
    };
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "mechanism: sequential\nreallocate: true\nscenario_file: s.yaml").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.mechanism, MechanismKind::Sequential);
        assert!(config.reallocate);
        assert_eq!(config.round_deadline_ms, 500);
        assert_eq!(config.max_unassigned_retries, 3);
        assert_eq!(config.sim.tick_ms, 100);
    }

    #[test]
    fn test_json_config() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"mechanism": "round_robin", "cost_tolerance": {{"absolute": 0.01}}, "max_agenda_len": 4}}"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.mechanism, MechanismKind::RoundRobin);
        assert_eq!(config.cost_tolerance.absolute, 0.01);
        assert_eq!(config.cost_tolerance.relative, 1e-6);
        assert_eq!(config.max_agenda_len, 4);
    }

    fn pkl_installed() -> bool {
        Command::new("pkl")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    #[test]
    fn test_pkl_config() {
        let mut file = tempfile::Builder::new().suffix(".pkl").tempfile().unwrap();
        writeln!(
            file,
            "mechanism = \"round_robin\"\nround_deadline_ms = 250\nsim {{\n  tick_ms = 50\n}}"
        )
        .unwrap();

        if !pkl_installed() {
            assert!(load_config(file.path()).is_err());
            return;
        }
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.mechanism, MechanismKind::RoundRobin);
        assert_eq!(config.round_deadline_ms, 250);
        assert_eq!(config.sim.tick_ms, 50);
        assert_eq!(config.sim.horizon_secs, 3600.0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "round_deadline_ms: 0").unwrap();
        assert!(load_config(file.path()).is_err());

        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "mechanism: psi").unwrap();
        assert!(load_config(file.path()).is_err());

        let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        assert!(load_config(file.path()).is_err());
    }
}
