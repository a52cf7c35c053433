use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which counting path the engine runs.
///
/// Only the CPU path is implemented; `Accelerator` reserves the config surface
/// so a GPU counter can be added without changing derivation or persistence.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Cpu,
    Accelerator,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Cpu
    }
}

/// Engine configuration, immutable after construction.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PipsConfig {
    /// Counting path selector.
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Sampling stride in simulation steps.
    #[serde(default = "default_sample_stride")]
    pub sample_stride: u32,
    /// Whether `flush()` persists samples to the CSV log.
    #[serde(default = "default_save_data")]
    pub save_data: bool,
    /// Replication/symmetry multiplier applied to every derived interaction
    /// total (e.g. 2 when the counting pass visits only one direction of each
    /// symmetric pair).
    #[serde(default = "default_times_factor")]
    pub times_factor: u32,
    /// Locale-dependent CSV field separator: comma when true, semicolon
    /// otherwise. Row semantics are unaffected.
    #[serde(default = "default_csv_sep_comma")]
    pub csv_sep_comma: bool,
    /// Run output directory; the log is written to `<output_dir>/PIPS.csv`.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Hard ceiling on stored samples; reaching it aborts the run.
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
}

fn default_sample_stride() -> u32 {
    100
}

fn default_save_data() -> bool {
    true
}

fn default_times_factor() -> u32 {
    1
}

fn default_csv_sep_comma() -> bool {
    true
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_max_samples() -> usize {
    1 << 24
}

impl Default for PipsConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Cpu,
            sample_stride: default_sample_stride(),
            save_data: default_save_data(),
            times_factor: default_times_factor(),
            csv_sep_comma: default_csv_sep_comma(),
            output_dir: default_output_dir(),
            max_samples: default_max_samples(),
        }
    }
}

impl PipsConfig {
    /// Loads the configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let config_str = std::fs::read_to_string(path_ref).map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e)
        })?;
        let config: PipsConfig = toml::from_str(&config_str).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from '{}': {}", path_ref.display(), e)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration invariants the engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.sample_stride == 0 {
            anyhow::bail!("sample_stride must be at least 1.");
        }
        if self.times_factor == 0 {
            anyhow::bail!("times_factor must be at least 1.");
        }
        if self.max_samples < 2 {
            anyhow::bail!("max_samples must be at least 2 (interval derivation needs two samples).");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        PipsConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_stride_rejected() {
        let config = PipsConfig {
            sample_stride: 0,
            ..PipsConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_times_factor_rejected() {
        let config = PipsConfig {
            times_factor: 0,
            ..PipsConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let config: PipsConfig =
            toml::from_str("sample_stride = 50\nmode = \"cpu\"\ntimes_factor = 2\n").unwrap();
        assert_eq!(config.sample_stride, 50);
        assert_eq!(config.mode, ExecutionMode::Cpu);
        assert_eq!(config.times_factor, 2);
        assert!(config.save_data);
        assert!(config.csv_sep_comma);
    }
}
