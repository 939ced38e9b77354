//! Default configuration values

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "gantry.toml";

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "gantry.yaml";

/// Alternative configuration file name
pub const ALT_CONFIG_FILE: &str = ".gantry.toml";

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_TOML,
        DEFAULT_CONFIG_YAML,
        ALT_CONFIG_FILE,
        ".gantry.yaml",
    ]
}

/// Default configuration template
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Gantry Configuration

[package]
manifest = "package.json"
binary_name = "cli"
output_dir = "."

[build]
timeout_secs = 3600
retries = 0
container_runtime = "docker"
container_workdir = "/build"

[publish]
registry_url = "https://registry.npmjs.org"
token_env = "NPM_TOKEN"
tag = "latest"
on_incomplete = "abort"
artifacts_dir = "artifacts"

# Second package published from the same artifacts.
# Set enabled = false to publish the primary package only.
[publish.secondary]
enabled = true
name = "create-my-addon"
reserved_hooks = ["prepublishOnly"]

# Uncomment to replace the built-in target catalog.
# [[targets]]
# triple = "x86_64-unknown-linux-gnu"
# image = "ghcr.io/napi-rs/napi-rs/nodejs-rust:lts-debian"
# build = ["cargo build --release --target {target}"]
# strip = ["strip -x {artifact}"]
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{validate_config, Config};

    #[test]
    fn test_template_parses_and_validates() {
        let config: Config = toml::from_str(DEFAULT_CONFIG_TEMPLATE).unwrap();
        validate_config(&config).unwrap();
        assert_eq!(config.publish.artifacts_dir.to_str(), Some("artifacts"));
        assert!(config.publish.secondary.enabled);
        assert_eq!(
            config.publish.secondary.name.as_deref(),
            Some("create-my-addon")
        );
    }

    #[test]
    fn test_toml_searched_first() {
        assert_eq!(config_file_names()[0], DEFAULT_CONFIG_TOML);
    }
}
