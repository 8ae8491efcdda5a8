//! Standard locations of configuration files

use std::path::PathBuf;

/// Directory holding the engine's configuration
///
/// Returns: `{user config dir}/kowal`, or `./kowal` when the platform has none
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kowal")
}

/// Default engine config file
///
/// Returns: `{user config dir}/kowal/engine.yaml`
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("engine.yaml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_ends_with_kowal() {
        assert!(default_config_dir().ends_with("kowal"));
    }

    #[test]
    fn test_config_path_includes_filename() {
        assert!(default_config_path().ends_with("engine.yaml"));
    }
}
