//! Geometry descriptions for volmgr, loaded from TOML.
//!
//! A description lists readouts, sensitive detectors and volumes by name,
//! then one placement tree per subdetector:
//!
//! ```toml
//! [[readouts]]
//! name = "TrackerHits"
//! id = "system:56:8,layer:8:8,strip:0:8"
//!
//! [[sensitive_detectors]]
//! name = "Tracker"
//! readout = "TrackerHits"
//!
//! [[volumes]]
//! name = "Strip"
//! sensitive = "Tracker"
//!
//! [[detectors]]
//! name = "Tracker"
//!
//! [detectors.placement]
//! volume = "TrackerEnvelope"
//! ids = { system = 3 }
//!
//! [[detectors.placement.daughters]]
//! volume = "Layer"
//! element = "layer"
//! replicate = { count = 4, field = "layer", step = [0.0, 0.0, 10.0] }
//! ```
//!
//! Nodes with `element` become detector elements below their subdetector;
//! `replicate` stamps out numbered copies of a node and its daughters.
//!
//! # Usage
//!
//! ```ignore
//! let geometry = volmgr_config::Geometry::from_file("detector.toml")?;
//! let manager = geometry.volume_manager(Topology::Tree)?;
//! ```

mod toml_parser;

pub use toml_parser::{
    DetectorConfig, GeometryConfig, GeometryConfigError, PlacementConfig, ReadoutConfig,
    ReplicaConfig, Result, SensitiveDetectorConfig, VolumeConfig, MAX_REPLICA_COUNT,
};

use std::collections::HashMap;
use std::path::Path;

use bevy::math::{DAffine3, DQuat, DVec3, EulerRot};
use tracing::debug;
use volmgr::{
    DetElement, PlacedVolume, Readout, SensitiveDetector, Topology, VolIds, Volume, VolumeManager,
};

/// Detector element tree and readouts built from a [`GeometryConfig`].
#[derive(Debug, Clone)]
pub struct Geometry {
    /// World element; its children are the subdetectors.
    pub world: DetElement,
    pub readouts: Vec<Readout>,
}

impl Geometry {
    /// Load and build a geometry from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_config(&GeometryConfig::from_file(path)?)
    }

    /// Load and build a geometry from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        Self::from_config(&GeometryConfig::from_str(content)?)
    }

    /// Build handles for every readout, volume and placement in `config`.
    pub fn from_config(config: &GeometryConfig) -> Result<Self> {
        let readouts: Vec<Readout> = config
            .readouts
            .iter()
            .map(|r| Readout::new(r.name.clone(), r.id.clone()))
            .collect();

        let sensitive: HashMap<&str, SensitiveDetector> = config
            .sensitive_detectors
            .iter()
            .map(|sd| {
                let readout = sd
                    .readout
                    .as_deref()
                    .and_then(|name| readouts.iter().find(|r| r.name() == name))
                    .cloned();
                (sd.name.as_str(), SensitiveDetector::new(sd.name.clone(), readout))
            })
            .collect();

        let volumes: HashMap<&str, Volume> = config
            .volumes
            .iter()
            .map(|v| {
                let volume = match v.sensitive.as_deref().and_then(|sd| sensitive.get(sd)) {
                    Some(sd) => Volume::sensitive(v.name.clone(), sd.clone()),
                    None => Volume::new(v.name.clone()),
                };
                (v.name.as_str(), volume)
            })
            .collect();

        let mut builder = TreeBuilder {
            volumes,
            placements: 0,
        };
        let mut detectors = Vec::with_capacity(config.detectors.len());
        for detector in &config.detectors {
            let top = builder
                .build_node(&detector.placement, &detector.name, DAffine3::IDENTITY)?
                .into_iter()
                .next()
                .ok_or_else(|| {
                    GeometryConfigError::Validation(format!("{}: empty placement", detector.name))
                })?;
            detectors.push(
                DetElement::builder(detector.name.clone())
                    .placement(top.placement)
                    .world_transformation(top.world)
                    .children(top.elements)
                    .build(),
            );
        }

        debug!(
            world = %config.world,
            detectors = detectors.len(),
            readouts = readouts.len(),
            placements = builder.placements,
            "geometry built"
        );

        Ok(Self {
            world: DetElement::builder(config.world.clone())
                .children(detectors)
                .build(),
            readouts,
        })
    }

    pub fn readout(&self, name: &str) -> Option<&Readout> {
        self.readouts.iter().find(|r| r.name() == name)
    }

    /// Populate a volume manager for this geometry.
    pub fn volume_manager(&self, topology: Topology) -> Result<VolumeManager> {
        Ok(VolumeManager::new(&self.world, None, topology)?)
    }
}

/// A built placement with its world transform and the detector elements
/// found at or below it.
struct Node {
    placement: PlacedVolume,
    world: DAffine3,
    elements: Vec<DetElement>,
}

struct TreeBuilder<'c> {
    volumes: HashMap<&'c str, Volume>,
    placements: usize,
}

impl TreeBuilder<'_> {
    /// Build one config node (every copy, if replicated) below a mother
    /// placed at `mother_world`.
    fn build_node(
        &mut self,
        node: &PlacementConfig,
        parent_path: &str,
        mother_world: DAffine3,
    ) -> Result<Vec<Node>> {
        let path = format!("{parent_path}/{}", node.display_name());
        let volume = self
            .volumes
            .get(node.volume.as_str())
            .cloned()
            .ok_or_else(|| GeometryConfigError::UnknownVolume {
                path: path.clone(),
                volume: node.volume.clone(),
            })?;

        let [rx, ry, rz] = node.rotation.map(f64::to_radians);
        let rotation = DQuat::from_euler(EulerRot::XYZ, rx, ry, rz);
        let position = DVec3::from_array(node.position);

        let copies = node.replicate.as_ref().map_or(1, |r| r.count);
        let mut built = Vec::with_capacity(copies as usize);
        for copy in 0..copies {
            let suffix = |name: &str| match node.replicate {
                Some(_) => format!("{name}_{copy}"),
                None => name.to_string(),
            };

            let mut ids: VolIds = node.ids.iter().map(|(k, &v)| (k.as_str(), v)).collect();
            let mut offset = DVec3::ZERO;
            if let Some(replica) = &node.replicate {
                ids.push(replica.field.clone(), replica.start + i64::from(copy));
                offset = DVec3::from_array(replica.step) * f64::from(copy);
            }

            let local = DAffine3::from_rotation_translation(rotation, position + offset);
            let world = mother_world * local;

            let mut daughters = Vec::new();
            let mut elements = Vec::new();
            for daughter in &node.daughters {
                for child in self.build_node(daughter, &path, world)? {
                    daughters.push(child.placement);
                    elements.extend(child.elements);
                }
            }

            let placement = PlacedVolume::builder(suffix(node.display_name()), volume.clone())
                .vol_ids(ids)
                .transform(local)
                .daughters(daughters)
                .build();
            self.placements += 1;

            if let Some(element) = &node.element {
                let de = DetElement::builder(suffix(element))
                    .placement(placement.clone())
                    .world_transformation(world)
                    .children(elements)
                    .build();
                elements = vec![de];
            }

            built.push(Node {
                placement,
                world,
                elements,
            });
        }
        Ok(built)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACKER: &str = r#"
world = "Lab"

[[readouts]]
name = "TrackerHits"
id = "system:8,layer:8,strip:8"

[[sensitive_detectors]]
name = "Tracker"
readout = "TrackerHits"

[[volumes]]
name = "Envelope"

[[volumes]]
name = "Layer"

[[volumes]]
name = "Strip"
sensitive = "Tracker"

[[detectors]]
name = "Tracker"

[detectors.placement]
name = "tracker_env"
volume = "Envelope"
ids = { system = 2 }
position = [100.0, 0.0, 0.0]

[[detectors.placement.daughters]]
volume = "Layer"
element = "layer"
replicate = { count = 2, field = "layer", start = 1, step = [0.0, 0.0, 10.0] }

[[detectors.placement.daughters.daughters]]
volume = "Strip"
replicate = { count = 3, field = "strip", step = [1.0, 0.0, 0.0] }
"#;

    #[test]
    fn builds_element_tree() {
        let geometry = Geometry::from_str(TRACKER).unwrap();

        assert_eq!(geometry.world.name(), "Lab");
        let tracker = geometry.world.child("Tracker").unwrap();
        assert_eq!(tracker.placement().unwrap().name(), "tracker_env");

        let names: Vec<&str> = tracker.children().iter().map(|c| c.name()).collect();
        assert_eq!(names, ["layer_0", "layer_1"]);

        let layer = tracker.child("layer_1").unwrap();
        assert_eq!(
            layer.world_transformation().translation,
            DVec3::new(100.0, 0.0, 10.0)
        );
        let layer_pv = layer.placement().unwrap();
        assert_eq!(layer_pv.name(), "Layer_1");
        assert_eq!(layer_pv.vol_ids().find("layer"), Some(2));
        assert_eq!(layer_pv.daughters().len(), 3);
        assert_eq!(layer_pv.daughters()[2].vol_ids().find("strip"), Some(2));
    }

    #[test]
    fn replicas_get_their_own_daughters() {
        let geometry = Geometry::from_str(TRACKER).unwrap();
        let tracker = geometry.world.child("Tracker").unwrap();
        let first = tracker.child("layer_0").unwrap().placement().unwrap();
        let second = tracker.child("layer_1").unwrap().placement().unwrap();

        assert_ne!(first.daughters()[0], second.daughters()[0]);
    }

    #[test]
    fn placement_ids_keep_file_order() {
        let toml = TRACKER.replace(
            "ids = { system = 2 }",
            "ids = { system = 2, side = 1, barrel = 0 }",
        );
        let geometry = Geometry::from_str(&toml).unwrap();
        let env = geometry.world.child("Tracker").unwrap().placement().unwrap();

        let names: Vec<&str> = env.vol_ids().iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["system", "side", "barrel"]);

        // Replica numbering is appended after the node's own ids.
        let toml = TRACKER.replace(
            "replicate = { count = 3, field = \"strip\"",
            "ids = { slice = 4 }\nreplicate = { count = 3, field = \"strip\"",
        );
        let geometry = Geometry::from_str(&toml).unwrap();
        let layer = geometry.world.child("Tracker").unwrap().child("layer_0").unwrap();
        let strip = &layer.placement().unwrap().daughters()[1];
        let ids: Vec<(&str, i64)> = strip.vol_ids().iter().collect();
        assert_eq!(ids, [("slice", 4), ("strip", 1)]);
    }

    #[test]
    fn rotation_is_in_degrees() {
        let toml = TRACKER.replace(
            "position = [100.0, 0.0, 0.0]",
            "rotation = [0.0, 0.0, 90.0]",
        );
        let geometry = Geometry::from_str(&toml).unwrap();
        let env = geometry.world.child("Tracker").unwrap().placement().unwrap();

        let x = env.transform().transform_vector3(DVec3::X);
        assert!((x - DVec3::Y).length() < 1e-12);
    }

    #[test]
    fn volume_manager_resolves_strips() {
        let geometry = Geometry::from_str(TRACKER).unwrap();
        let manager = geometry.volume_manager(Topology::Tree).unwrap();

        // 2 layers x 3 strips, 2 layers, envelope
        assert_eq!(manager.len(), 6 + 2 + 1);

        let ctx = manager.lookup_context(0x01_02_02).unwrap();
        assert_eq!(ctx.placement.name(), "Strip_1");
        assert_eq!(ctx.element.name(), "layer_1");
        assert_eq!(ctx.detector.name(), "Tracker");
        assert_eq!(
            ctx.local_to_world(DVec3::ZERO),
            DVec3::new(101.0, 0.0, 10.0)
        );
        let section = manager.subdetector(0x02).unwrap();
        assert_eq!(geometry.readout("TrackerHits"), section.readout());
    }

    #[test]
    fn sensitive_detector_without_readout_builds() {
        let toml = TRACKER.replace("readout = \"TrackerHits\"\n", "");
        let geometry = Geometry::from_str(&toml).unwrap();
        let manager = geometry.volume_manager(Topology::Tree).unwrap();

        assert!(manager.is_empty());
    }
}
