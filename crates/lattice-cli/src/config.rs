//! Run configuration loading
//!
//! Reads the sectioned TOML file describing the model, the request and the
//! parallel layout, then validates it before any rank starts.

use lattice_types::{GenerationConfig, LatticeError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Configuration file used when none is given on the command line
pub const DEFAULT_CONFIG_PATH: &str = "configs/gpt_config.toml";

/// Start-id file looked up next to the configuration file
pub const DEFAULT_START_IDS_FILE: &str = "start_ids.csv";

/// Load and validate a configuration file
pub async fn load_config(path: &Path) -> Result<GenerationConfig> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| LatticeError::config(format!("Can't load '{}': {}", path.display(), e)))?;
    let config = parse_config(&content)
        .map_err(|e| LatticeError::config(format!("{}: {}", path.display(), e)))?;
    debug!(
        "Loaded {} (model {}, tp {}, pp {})",
        path.display(),
        config.ft_instance_hyperparameter.model_name,
        config.ft_instance_hyperparameter.tensor_para_size,
        config.ft_instance_hyperparameter.pipeline_para_size
    );
    Ok(config)
}

/// Parse and validate configuration text
pub fn parse_config(content: &str) -> Result<GenerationConfig> {
    let config: GenerationConfig = toml::from_str(content)
        .map_err(|e| LatticeError::config(format!("Failed to parse config: {}", e)))?;
    config.validate()?;
    Ok(config)
}

/// Start-id file for a run.
///
/// An explicit override wins. Otherwise `request.start_ids_file` is used, or
/// `start_ids.csv`; relative paths are taken from the configuration directory.
pub fn resolve_start_ids_path(
    config_path: &Path,
    config: &GenerationConfig,
    override_path: Option<&Path>,
) -> PathBuf {
    if let Some(path) = override_path {
        return path.to_path_buf();
    }
    let file = config
        .request
        .start_ids_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_START_IDS_FILE));
    if file.is_absolute() {
        return file;
    }
    match config_path.parent() {
        Some(dir) => dir.join(file),
        None => file,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[ft_instance_hyperparameter]
model_name = "gpt_124M"
max_batch_size = 8
max_seq_len = 128
beam_width = 1
top_k = 1
top_p = 0.0
temperature = 1.0
repetition_penalty = 1.0
model_dir = "models/gpt_124M"
tensor_para_size = 1
pipeline_para_size = 1
is_half = 0

[gpt_124M]
head_num = 12
size_per_head = 64
vocab_size = 50257
decoder_layers = 12

[request]
request_batch_size = 4
request_output_len = 16
"#;

    #[test]
    fn minimal_config_takes_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.run.warmup_iterations, 1);
        assert_eq!(config.run.output_file, PathBuf::from("out"));
        assert_eq!(config.model().unwrap().hidden_units(), 768);
    }

    #[test]
    fn missing_model_section_is_a_config_error() {
        let text = MINIMAL.replace("[gpt_124M]", "[gpt_other]");
        let err = parse_config(&text).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("[gpt_124M]"), "{}", err);
    }

    #[test]
    fn batch_larger_than_max_is_rejected() {
        let text = MINIMAL.replace("request_batch_size = 4", "request_batch_size = 9");
        assert!(parse_config(&text).unwrap_err().is_configuration());
    }

    #[tokio::test]
    async fn unreadable_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("nope.toml")).await.unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("Can't load"));
    }

    #[test]
    fn start_ids_resolve_against_config_dir() {
        let config = parse_config(MINIMAL).unwrap();
        let config_path = Path::new("/etc/lattice/gpt.toml");
        assert_eq!(
            resolve_start_ids_path(config_path, &config, None),
            PathBuf::from("/etc/lattice/start_ids.csv")
        );
        assert_eq!(
            resolve_start_ids_path(config_path, &config, Some(Path::new("ids.csv"))),
            PathBuf::from("ids.csv")
        );

        let mut custom = config.clone();
        custom.request.start_ids_file = Some(PathBuf::from("prompts/a.csv"));
        assert_eq!(
            resolve_start_ids_path(config_path, &custom, None),
            PathBuf::from("/etc/lattice/prompts/a.csv")
        );
    }
}
