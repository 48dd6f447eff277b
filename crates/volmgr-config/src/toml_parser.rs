//! TOML parser for geometry descriptions.

use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use volmgr::{IdSpec, VolumeManagerError};

/// Parsed geometry description, before any handle is built.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeometryConfig {
    /// Name of the world detector element (defaults to "World")
    #[serde(default = "default_world")]
    pub world: String,
    #[serde(default)]
    pub readouts: Vec<ReadoutConfig>,
    #[serde(default)]
    pub sensitive_detectors: Vec<SensitiveDetectorConfig>,
    #[serde(default)]
    pub volumes: Vec<VolumeConfig>,
    /// Top-level subdetectors, one placement tree each
    #[serde(default)]
    pub detectors: Vec<DetectorConfig>,
}

fn default_world() -> String {
    "World".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadoutConfig {
    pub name: String,
    /// Id descriptor, e.g. `"system:8,layer:8,strip:-16"`
    pub id: IdSpec,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensitiveDetectorConfig {
    pub name: String,
    /// Readout name; a sensitive detector without one is never registered
    pub readout: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolumeConfig {
    pub name: String,
    /// Sensitive detector name
    pub sensitive: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectorConfig {
    pub name: String,
    pub placement: PlacementConfig,
}

/// One node of a placement tree.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlacementConfig {
    /// Placement name (defaults to the volume name)
    pub name: Option<String>,
    pub volume: String,
    /// Volume ids attached to this node, in file order
    #[serde(default)]
    pub ids: IndexMap<String, i64>,
    /// Translation in the mother frame
    #[serde(default)]
    pub position: [f64; 3],
    /// XYZ Euler angles in degrees
    #[serde(default)]
    pub rotation: [f64; 3],
    /// Marks this node as the placement of a detector element
    pub element: Option<String>,
    pub replicate: Option<ReplicaConfig>,
    #[serde(default)]
    pub daughters: Vec<PlacementConfig>,
}

/// Largest `replicate.count` a single node may ask for.
pub const MAX_REPLICA_COUNT: u32 = 1 << 16;

/// Repeats a placement `count` times along `step`, numbering `field`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplicaConfig {
    pub count: u32,
    pub field: String,
    #[serde(default)]
    pub start: i64,
    #[serde(default)]
    pub step: [f64; 3],
}

impl GeometryConfig {
    /// Parse from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| GeometryConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_str(&content)
    }

    /// Parse from a TOML string and check all name references.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: GeometryConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let readouts = unique_names("readout", self.readouts.iter().map(|r| r.name.as_str()))?;
        let sensitive = unique_names(
            "sensitive detector",
            self.sensitive_detectors.iter().map(|s| s.name.as_str()),
        )?;
        let volumes = unique_names("volume", self.volumes.iter().map(|v| v.name.as_str()))?;
        unique_names("detector", self.detectors.iter().map(|d| d.name.as_str()))?;

        for sd in &self.sensitive_detectors {
            if let Some(readout) = &sd.readout
                && !readouts.contains(readout.as_str())
            {
                return Err(GeometryConfigError::UnknownReadout {
                    sensitive_detector: sd.name.clone(),
                    readout: readout.clone(),
                });
            }
        }
        for volume in &self.volumes {
            if let Some(sd) = &volume.sensitive
                && !sensitive.contains(sd.as_str())
            {
                return Err(GeometryConfigError::UnknownSensitiveDetector {
                    volume: volume.name.clone(),
                    sensitive_detector: sd.clone(),
                });
            }
        }
        for detector in &self.detectors {
            let top = &detector.placement;
            if top.replicate.is_some() || top.element.is_some() {
                return Err(GeometryConfigError::Validation(format!(
                    "{}: a subdetector placement cannot be replicated or name an element",
                    detector.name
                )));
            }
            validate_placement(&detector.placement, &detector.name, &volumes)?;
        }
        Ok(())
    }
}

fn unique_names<'a>(
    kind: &'static str,
    names: impl Iterator<Item = &'a str>,
) -> Result<HashSet<&'a str>> {
    let mut seen = HashSet::new();
    for name in names {
        if name.is_empty() {
            return Err(GeometryConfigError::Validation(format!("empty {kind} name")));
        }
        if !seen.insert(name) {
            return Err(GeometryConfigError::DuplicateName {
                kind,
                name: name.to_string(),
            });
        }
    }
    Ok(seen)
}

fn validate_placement(
    node: &PlacementConfig,
    parent_path: &str,
    volumes: &HashSet<&str>,
) -> Result<()> {
    let path = format!("{parent_path}/{}", node.display_name());
    if !volumes.contains(node.volume.as_str()) {
        return Err(GeometryConfigError::UnknownVolume {
            path,
            volume: node.volume.clone(),
        });
    }
    if let Some(replica) = &node.replicate {
        if replica.count == 0 {
            return Err(GeometryConfigError::Validation(format!(
                "{path}: replica count must be at least 1"
            )));
        }
        if replica.count > MAX_REPLICA_COUNT {
            return Err(GeometryConfigError::Validation(format!(
                "{path}: replica count {} exceeds {MAX_REPLICA_COUNT}",
                replica.count
            )));
        }
        if node.ids.contains_key(&replica.field) {
            return Err(GeometryConfigError::Validation(format!(
                "{path}: replica field '{}' is also set in ids",
                replica.field
            )));
        }
    }
    for daughter in &node.daughters {
        validate_placement(daughter, &path, volumes)?;
    }
    Ok(())
}

impl PlacementConfig {
    pub(crate) fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.volume)
    }
}

/// Result alias for geometry loading.
pub type Result<T, E = GeometryConfigError> = std::result::Result<T, E>;

/// Errors while loading a geometry description.
#[derive(Debug, Error)]
pub enum GeometryConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("duplicate {kind} name '{name}'")]
    DuplicateName { kind: &'static str, name: String },

    #[error("sensitive detector '{sensitive_detector}' uses unknown readout '{readout}'")]
    UnknownReadout {
        sensitive_detector: String,
        readout: String,
    },

    #[error("volume '{volume}' uses unknown sensitive detector '{sensitive_detector}'")]
    UnknownSensitiveDetector {
        volume: String,
        sensitive_detector: String,
    },

    #[error("{path}: unknown volume '{volume}'")]
    UnknownVolume { path: String, volume: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Registry(#[from] VolumeManagerError),
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[[readouts]]
name = "Hits"
id = "system:8,strip:8"

[[sensitive_detectors]]
name = "Tracker"
readout = "Hits"

[[volumes]]
name = "Envelope"

[[volumes]]
name = "Strip"
sensitive = "Tracker"

[[detectors]]
name = "Tracker"

[detectors.placement]
volume = "Envelope"
ids = { system = 1 }

[[detectors.placement.daughters]]
volume = "Strip"
position = [0.0, 0.0, 5.0]
replicate = { count = 4, field = "strip" }
"#;

    #[test]
    fn parse_minimal_config() {
        let config = GeometryConfig::from_str(MINIMAL).unwrap();

        assert_eq!(config.world, "World");
        assert_eq!(config.readouts[0].id.to_string(), "system:0:8,strip:8:8");
        assert_eq!(config.volumes[1].sensitive.as_deref(), Some("Tracker"));

        let env = &config.detectors[0].placement;
        assert_eq!(env.display_name(), "Envelope");
        assert_eq!(env.ids.get("system"), Some(&1));
        assert_eq!(env.rotation, [0.0; 3]);

        let strip = &env.daughters[0];
        assert_eq!(strip.position, [0.0, 0.0, 5.0]);
        let replica = strip.replicate.as_ref().unwrap();
        assert_eq!((replica.count, replica.field.as_str(), replica.start), (4, "strip", 0));
    }

    #[test]
    fn rejects_bad_id_descriptor() {
        let toml = MINIMAL.replace("system:8,strip:8", "system:8,strip:0");
        let err = GeometryConfig::from_str(&toml).unwrap_err();
        assert!(matches!(err, GeometryConfigError::Parse(_)));
        assert!(err.to_string().contains("strip"));
    }

    #[test]
    fn rejects_unknown_references() {
        let toml = MINIMAL.replace("readout = \"Hits\"", "readout = \"Missing\"");
        assert!(matches!(
            GeometryConfig::from_str(&toml),
            Err(GeometryConfigError::UnknownReadout { .. })
        ));

        let toml = MINIMAL.replace("sensitive = \"Tracker\"", "sensitive = \"Calo\"");
        assert!(matches!(
            GeometryConfig::from_str(&toml),
            Err(GeometryConfigError::UnknownSensitiveDetector { .. })
        ));

        let toml = MINIMAL.replace("volume = \"Strip\"", "volume = \"Pixel\"");
        match GeometryConfig::from_str(&toml) {
            Err(GeometryConfigError::UnknownVolume { path, volume }) => {
                assert_eq!(path, "Tracker/Envelope/Pixel");
                assert_eq!(volume, "Pixel");
            }
            other => panic!("expected UnknownVolume, got {other:?}"),
        }
    }

    #[test]
    fn rejects_duplicate_names() {
        let toml = format!("{MINIMAL}\n[[volumes]]\nname = \"Strip\"\n");
        match GeometryConfig::from_str(&toml) {
            Err(GeometryConfigError::DuplicateName { kind, name }) => {
                assert_eq!(kind, "volume");
                assert_eq!(name, "Strip");
            }
            other => panic!("expected DuplicateName, got {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_replica() {
        let toml = MINIMAL.replace("count = 4", "count = 0");
        assert!(matches!(
            GeometryConfig::from_str(&toml),
            Err(GeometryConfigError::Validation(_))
        ));

        let toml = MINIMAL.replace("position = [0.0, 0.0, 5.0]", "ids = { strip = 1 }");
        let err = GeometryConfig::from_str(&toml).unwrap_err();
        assert!(err.to_string().contains("replica field 'strip'"));
    }

    #[test]
    fn rejects_oversized_replica() {
        let toml = MINIMAL.replace("count = 4", "count = 4294967295");
        let err = GeometryConfig::from_str(&toml).unwrap_err();
        assert!(matches!(err, GeometryConfigError::Validation(_)));
        assert!(err.to_string().contains("Tracker/Envelope/Strip"));

        let toml = MINIMAL.replace("count = 4", &format!("count = {MAX_REPLICA_COUNT}"));
        assert!(GeometryConfig::from_str(&toml).is_ok());
    }

    #[test]
    fn ids_keep_file_order() {
        let toml = MINIMAL.replace(
            "ids = { system = 1 }",
            "ids = { system = 1, side = -1, module = 3 }",
        );
        let config = GeometryConfig::from_str(&toml).unwrap();

        let env = &config.detectors[0].placement;
        let names: Vec<&str> = env.ids.keys().map(String::as_str).collect();
        assert_eq!(names, ["system", "side", "module"]);
    }

    #[test]
    fn out_of_range_readout_offset_is_parse_error() {
        let toml = MINIMAL.replace("system:8,strip:8", "system:65535:8,strip:8");
        let err = GeometryConfig::from_str(&toml).unwrap_err();
        assert!(matches!(err, GeometryConfigError::Parse(_)));
        assert!(err.to_string().contains("system"));
    }

    #[test]
    fn rejects_unknown_keys() {
        let toml = MINIMAL.replace("position = [0.0, 0.0, 5.0]", "positon = [0.0, 0.0, 5.0]");
        assert!(matches!(
            GeometryConfig::from_str(&toml),
            Err(GeometryConfigError::Parse(_))
        ));
    }
}
