//! Target matrix - the static catalog of build targets
//!
//! The matrix is built once at startup (from configuration or the built-in
//! catalog) and shared read-only afterwards. Nothing downstream depends on how
//! many targets it holds.

use std::collections::HashSet;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{Config, TargetConfig};
use crate::error::MatrixError;
use crate::types::TargetTriple;

const NAPI_IMAGE_DEBIAN: &str = "ghcr.io/napi-rs/napi-rs/nodejs-rust:lts-debian";
const NAPI_IMAGE_DEBIAN_AARCH64: &str = "ghcr.io/napi-rs/napi-rs/nodejs-rust:lts-debian-aarch64";
const NAPI_IMAGE_ALPINE: &str = "ghcr.io/napi-rs/napi-rs/nodejs-rust:lts-alpine";

const NAPI_BUILD: &str = "npx napi build --platform --release --target {target} {output_dir}";
const ANDROID_STRIP: &str =
    "${ANDROID_NDK_LATEST_HOME}/toolchains/llvm/prebuilt/linux-x86_64/bin/llvm-strip {artifact}";

/// Where a target's commands run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnvironmentSpec {
    /// Directly on the invoking host
    Native,
    /// Inside a container built from `image`, with the project mounted
    Isolated { image: String },
}

impl EnvironmentSpec {
    /// Short label for listings
    pub fn label(&self) -> &str {
        match self {
            Self::Native => "native",
            Self::Isolated { image } => image,
        }
    }
}

/// One entry of the target matrix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    /// Unique key of the target
    pub triple: TargetTriple,
    /// Execution environment
    pub environment: EnvironmentSpec,
    /// Provisioning steps
    pub setup: Vec<String>,
    /// Build steps (never empty)
    pub build: Vec<String>,
    /// Post-process steps, typically stripping
    pub strip: Vec<String>,
}

impl TargetDescriptor {
    /// Create a native target with a single build step
    pub fn new(triple: TargetTriple, build: impl Into<String>) -> Self {
        Self {
            triple,
            environment: EnvironmentSpec::Native,
            setup: Vec::new(),
            build: vec![build.into()],
            strip: Vec::new(),
        }
    }

    /// Run in a container image
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.environment = EnvironmentSpec::Isolated {
            image: image.into(),
        };
        self
    }

    /// Add a provisioning step
    pub fn with_setup(mut self, step: impl Into<String>) -> Self {
        self.setup.push(step.into());
        self
    }

    /// Add a build step
    pub fn with_build(mut self, step: impl Into<String>) -> Self {
        self.build.push(step.into());
        self
    }

    /// Add a post-process step
    pub fn with_strip(mut self, step: impl Into<String>) -> Self {
        self.strip.push(step.into());
        self
    }

    /// Artifact file name: `<binary_name>.<platform-arch[-abi]>.node`
    pub fn artifact_name(&self, binary_name: &str) -> String {
        format!("{}.{}.node", binary_name, self.triple.node_platform().suffix())
    }

    /// Build a descriptor from configuration
    pub fn from_config(config: &TargetConfig) -> Result<Self, MatrixError> {
        let triple = TargetTriple::parse(&config.triple)?;
        let environment = match &config.image {
            Some(image) if !image.is_empty() => EnvironmentSpec::Isolated {
                image: image.clone(),
            },
            _ => EnvironmentSpec::Native,
        };

        Ok(Self {
            triple,
            environment,
            setup: non_blank(&config.setup),
            build: non_blank(&config.build),
            strip: non_blank(&config.strip),
        })
    }
}

fn non_blank(steps: &[String]) -> Vec<String> {
    steps
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// The full set of build targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetMatrix {
    targets: Vec<TargetDescriptor>,
}

impl TargetMatrix {
    /// Create a matrix, rejecting duplicates and targets without build steps
    pub fn new(targets: Vec<TargetDescriptor>) -> Result<Self, MatrixError> {
        if targets.is_empty() {
            return Err(MatrixError::Empty);
        }

        let mut seen = HashSet::new();
        for target in &targets {
            if !seen.insert(&target.triple) {
                return Err(MatrixError::DuplicateTarget(target.triple.clone()));
            }
            if target.build.is_empty() {
                return Err(MatrixError::EmptyBuild(target.triple.clone()));
            }
        }

        Ok(Self { targets })
    }

    /// The built-in catalog
    pub fn builtin() -> &'static TargetMatrix {
        static BUILTIN: OnceLock<TargetMatrix> = OnceLock::new();
        BUILTIN.get_or_init(|| TargetMatrix {
            targets: builtin_targets(),
        })
    }

    /// Matrix declared in configuration, or the built-in catalog
    pub fn from_config(config: &Config) -> Result<Self, MatrixError> {
        if config.targets.is_empty() {
            debug!("no targets configured, using built-in catalog");
            return Ok(Self::builtin().clone());
        }

        let targets = config
            .targets
            .iter()
            .map(TargetDescriptor::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(targets)
    }

    /// All targets in declaration order
    pub fn targets(&self) -> &[TargetDescriptor] {
        &self.targets
    }

    /// Number of targets
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether the matrix has no targets
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Look up a target
    pub fn get(&self, triple: &TargetTriple) -> Option<&TargetDescriptor> {
        self.targets.iter().find(|t| &t.triple == triple)
    }

    /// Whether a triple is part of the matrix
    pub fn contains(&self, triple: &TargetTriple) -> bool {
        self.get(triple).is_some()
    }

    /// All triples in declaration order
    pub fn triples(&self) -> Vec<TargetTriple> {
        self.targets.iter().map(|t| t.triple.clone()).collect()
    }

    /// A reduced matrix holding only the given triples, in matrix order
    pub fn restrict(&self, triples: &[TargetTriple]) -> Result<Self, MatrixError> {
        if let Some(unknown) = triples.iter().find(|t| !self.contains(t)) {
            return Err(MatrixError::UnknownTarget(unknown.to_string()));
        }

        let wanted: HashSet<&TargetTriple> = triples.iter().collect();
        let targets = self
            .targets
            .iter()
            .filter(|t| wanted.contains(&t.triple))
            .cloned()
            .collect();
        Self::new(targets)
    }
}

fn triple(s: &str) -> TargetTriple {
    // Built-in triples are literals checked by tests
    TargetTriple::parse(s).unwrap_or_else(|_| panic!("invalid built-in triple {s}"))
}

fn builtin_targets() -> Vec<TargetDescriptor> {
    vec![
        TargetDescriptor::new(triple("x86_64-apple-darwin"), NAPI_BUILD)
            .with_strip("strip -x {artifact}"),
        TargetDescriptor::new(triple("aarch64-apple-darwin"), NAPI_BUILD)
            .with_setup("rustup target add {target}")
            .with_strip("strip -x {artifact}"),
        TargetDescriptor::new(triple("x86_64-pc-windows-msvc"), NAPI_BUILD),
        TargetDescriptor::new(triple("i686-pc-windows-msvc"), NAPI_BUILD)
            .with_setup("rustup target add {target}"),
        TargetDescriptor::new(triple("aarch64-pc-windows-msvc"), NAPI_BUILD)
            .with_setup("rustup target add {target}"),
        TargetDescriptor::new(triple("x86_64-unknown-linux-gnu"), NAPI_BUILD)
            .with_image(NAPI_IMAGE_DEBIAN)
            .with_strip("strip {artifact}"),
        TargetDescriptor::new(triple("aarch64-unknown-linux-gnu"), NAPI_BUILD)
            .with_image(NAPI_IMAGE_DEBIAN_AARCH64)
            .with_setup("rustup target add {target}")
            .with_strip("aarch64-unknown-linux-gnu-strip {artifact}"),
        TargetDescriptor::new(triple("x86_64-unknown-linux-musl"), NAPI_BUILD)
            .with_image(NAPI_IMAGE_ALPINE)
            .with_strip("strip {artifact}"),
        TargetDescriptor::new(triple("aarch64-unknown-linux-musl"), NAPI_BUILD)
            .with_image(NAPI_IMAGE_ALPINE)
            .with_setup("rustup target add {target}")
            .with_strip("/aarch64-linux-musl-cross/bin/aarch64-linux-musl-strip {artifact}"),
        TargetDescriptor::new(
            triple("armv7-unknown-linux-gnueabihf"),
            format!(
                "CARGO_TARGET_ARMV7_UNKNOWN_LINUX_GNUEABIHF_LINKER=arm-linux-gnueabihf-gcc {}",
                NAPI_BUILD
            ),
        )
        .with_setup("sudo apt-get update && sudo apt-get install -y gcc-arm-linux-gnueabihf")
        .with_setup("rustup target add {target}")
        .with_strip("arm-linux-gnueabihf-strip {artifact}"),
        TargetDescriptor::new(triple("aarch64-linux-android"), NAPI_BUILD)
            .with_setup("rustup target add {target}")
            .with_strip(ANDROID_STRIP),
        TargetDescriptor::new(triple("armv7-linux-androideabi"), NAPI_BUILD)
            .with_setup("rustup target add {target}")
            .with_strip(ANDROID_STRIP),
    ]
}
