//! Geometry and detector-element handles consumed by the registry.
//!
//! The registry reads child lists, per-node volume ids and local transforms,
//! and the readout bound to a sensitive volume. Handles are `Arc`s compared
//! by identity: two placements with identical content are still distinct
//! placements.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bevy::math::{DAffine3, DVec3};

use crate::encoding::VolIds;
use crate::layout::IdSpec;

macro_rules! identity_handle {
    ($ty:ident) => {
        impl PartialEq for $ty {
            #[inline]
            fn eq(&self, other: &Self) -> bool {
                Arc::ptr_eq(&self.0, &other.0)
            }
        }

        impl Eq for $ty {}

        impl Hash for $ty {
            #[inline]
            fn hash<H: Hasher>(&self, state: &mut H) {
                std::ptr::hash(Arc::as_ptr(&self.0), state);
            }
        }
    };
}

// =============================================================================
// Readout / sensitive detector / volume
// =============================================================================

/// A readout: the identifier layout used by one sensitive detector.
#[derive(Clone, Debug)]
pub struct Readout(Arc<ReadoutData>);

#[derive(Debug)]
struct ReadoutData {
    name: String,
    id_spec: IdSpec,
}

impl Readout {
    pub fn new(name: impl Into<String>, id_spec: IdSpec) -> Self {
        Self(Arc::new(ReadoutData {
            name: name.into(),
            id_spec,
        }))
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Identifier layout of this readout.
    #[inline]
    pub fn id_spec(&self) -> &IdSpec {
        &self.0.id_spec
    }
}

identity_handle!(Readout);

/// A sensitive detector, optionally bound to a readout.
#[derive(Clone, Debug)]
pub struct SensitiveDetector(Arc<SensitiveDetectorData>);

#[derive(Debug)]
struct SensitiveDetectorData {
    name: String,
    readout: Option<Readout>,
}

impl SensitiveDetector {
    pub fn new(name: impl Into<String>, readout: Option<Readout>) -> Self {
        Self(Arc::new(SensitiveDetectorData {
            name: name.into(),
            readout,
        }))
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[inline]
    pub fn readout(&self) -> Option<&Readout> {
        self.0.readout.as_ref()
    }
}

identity_handle!(SensitiveDetector);

/// A logical volume. Sensitive volumes carry their sensitive detector.
#[derive(Clone, Debug)]
pub struct Volume(Arc<VolumeData>);

#[derive(Debug)]
struct VolumeData {
    name: String,
    sensitive_detector: Option<SensitiveDetector>,
}

impl Volume {
    /// A passive volume.
    pub fn new(name: impl Into<String>) -> Self {
        Self(Arc::new(VolumeData {
            name: name.into(),
            sensitive_detector: None,
        }))
    }

    /// A volume read out by `sd`.
    pub fn sensitive(name: impl Into<String>, sd: SensitiveDetector) -> Self {
        Self(Arc::new(VolumeData {
            name: name.into(),
            sensitive_detector: Some(sd),
        }))
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[inline]
    pub fn is_sensitive(&self) -> bool {
        self.0.sensitive_detector.is_some()
    }

    #[inline]
    pub fn sensitive_detector(&self) -> Option<&SensitiveDetector> {
        self.0.sensitive_detector.as_ref()
    }
}

identity_handle!(Volume);

// =============================================================================
// Placements
// =============================================================================

/// A placed volume: one node of the geometry tree.
#[derive(Clone)]
pub struct PlacedVolume(Arc<PlacedVolumeData>);

struct PlacedVolumeData {
    name: String,
    volume: Volume,
    vol_ids: VolIds,
    transform: DAffine3,
    daughters: Vec<PlacedVolume>,
}

impl PlacedVolume {
    /// Start building a placement of `volume`.
    pub fn builder(name: impl Into<String>, volume: Volume) -> PlacementBuilder {
        PlacementBuilder {
            name: name.into(),
            volume,
            vol_ids: VolIds::new(),
            transform: DAffine3::IDENTITY,
            daughters: Vec::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[inline]
    pub fn volume(&self) -> &Volume {
        &self.0.volume
    }

    /// Volume ids attached to this placement only (not its ancestors).
    #[inline]
    pub fn vol_ids(&self) -> &VolIds {
        &self.0.vol_ids
    }

    /// Transform from this placement's frame to its mother's frame.
    #[inline]
    pub fn transform(&self) -> &DAffine3 {
        &self.0.transform
    }

    #[inline]
    pub fn daughters(&self) -> &[PlacedVolume] {
        &self.0.daughters
    }
}

identity_handle!(PlacedVolume);

impl fmt::Debug for PlacedVolume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlacedVolume")
            .field("name", &self.0.name)
            .field("volume", &self.0.volume.name())
            .field("vol_ids", &self.0.vol_ids)
            .field("daughters", &self.0.daughters.len())
            .finish()
    }
}

/// Builder for [`PlacedVolume`]; daughters are built first.
#[derive(Debug)]
pub struct PlacementBuilder {
    name: String,
    volume: Volume,
    vol_ids: VolIds,
    transform: DAffine3,
    daughters: Vec<PlacedVolume>,
}

impl PlacementBuilder {
    pub fn vol_id(mut self, field: impl Into<String>, value: i64) -> Self {
        self.vol_ids.push(field, value);
        self
    }

    pub fn vol_ids(mut self, ids: VolIds) -> Self {
        self.vol_ids.extend_from(&ids);
        self
    }

    pub fn transform(mut self, transform: DAffine3) -> Self {
        self.transform = transform;
        self
    }

    pub fn translation(mut self, translation: DVec3) -> Self {
        self.transform = DAffine3::from_translation(translation);
        self
    }

    pub fn daughter(mut self, daughter: PlacedVolume) -> Self {
        self.daughters.push(daughter);
        self
    }

    pub fn daughters(mut self, daughters: impl IntoIterator<Item = PlacedVolume>) -> Self {
        self.daughters.extend(daughters);
        self
    }

    pub fn build(self) -> PlacedVolume {
        PlacedVolume(Arc::new(PlacedVolumeData {
            name: self.name,
            volume: self.volume,
            vol_ids: self.vol_ids,
            transform: self.transform,
            daughters: self.daughters,
        }))
    }
}

// =============================================================================
// Detector elements
// =============================================================================

/// A detector element: a node of the detector hierarchy, tied to the
/// placement that positions it.
#[derive(Clone)]
pub struct DetElement(Arc<DetElementData>);

struct DetElementData {
    name: String,
    placement: Option<PlacedVolume>,
    world: DAffine3,
    children: Vec<DetElement>,
}

impl DetElement {
    pub fn builder(name: impl Into<String>) -> DetElementBuilder {
        DetElementBuilder {
            name: name.into(),
            placement: None,
            world: None,
            children: Vec::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[inline]
    pub fn placement(&self) -> Option<&PlacedVolume> {
        self.0.placement.as_ref()
    }

    /// Transform from this element's frame to the world frame.
    #[inline]
    pub fn world_transformation(&self) -> &DAffine3 {
        &self.0.world
    }

    #[inline]
    pub fn children(&self) -> &[DetElement] {
        &self.0.children
    }

    /// Direct child by name.
    pub fn child(&self, name: &str) -> Option<&DetElement> {
        self.0.children.iter().find(|c| c.name() == name)
    }

    /// True if `pv` is the placement of this element.
    #[inline]
    pub fn is_placed_by(&self, pv: &PlacedVolume) -> bool {
        self.placement().is_some_and(|p| p == pv)
    }
}

identity_handle!(DetElement);

impl fmt::Debug for DetElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetElement")
            .field("name", &self.0.name)
            .field("placement", &self.0.placement.as_ref().map(|p| p.name()))
            .field("children", &self.0.children.len())
            .finish()
    }
}

/// Builder for [`DetElement`].
#[derive(Debug)]
pub struct DetElementBuilder {
    name: String,
    placement: Option<PlacedVolume>,
    world: Option<DAffine3>,
    children: Vec<DetElement>,
}

impl DetElementBuilder {
    pub fn placement(mut self, placement: PlacedVolume) -> Self {
        self.placement = Some(placement);
        self
    }

    /// Set the world transform explicitly.
    ///
    /// Default: the placement's own transform (an element placed directly
    /// in the world), or identity for an unplaced element.
    pub fn world_transformation(mut self, world: DAffine3) -> Self {
        self.world = Some(world);
        self
    }

    pub fn child(mut self, child: DetElement) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = DetElement>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn build(self) -> DetElement {
        let world = self.world.unwrap_or_else(|| {
            self.placement
                .as_ref()
                .map_or(DAffine3::IDENTITY, |p| *p.transform())
        });
        DetElement(Arc::new(DetElementData {
            name: self.name,
            placement: self.placement,
            world,
            children: self.children,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_compare_by_identity() {
        let a = Volume::new("Box");
        let b = Volume::new("Box");
        assert_eq!(a, a.clone());
        assert_ne!(a, b);

        let pv1 = PlacedVolume::builder("pv", a.clone()).build();
        let pv2 = PlacedVolume::builder("pv", a).build();
        assert_ne!(pv1, pv2);
    }

    #[test]
    fn placement_builder_collects_ids_and_daughters() {
        let leaf = PlacedVolume::builder("leaf", Volume::new("Leaf"))
            .vol_id("strip", 4)
            .build();
        let mother = PlacedVolume::builder("mother", Volume::new("Mother"))
            .vol_id("layer", 1)
            .translation(DVec3::new(0.0, 0.0, 5.0))
            .daughter(leaf.clone())
            .build();

        assert_eq!(mother.vol_ids().find("layer"), Some(1));
        assert_eq!(mother.daughters(), &[leaf]);
        assert_eq!(mother.transform().translation, DVec3::new(0.0, 0.0, 5.0));
    }

    #[test]
    fn det_element_world_defaults_to_placement() {
        let pv = PlacedVolume::builder("env", Volume::new("Envelope"))
            .translation(DVec3::X)
            .build();
        let de = DetElement::builder("Tracker").placement(pv.clone()).build();

        assert!(de.is_placed_by(&pv));
        assert_eq!(de.world_transformation().translation, DVec3::X);
        assert_eq!(
            *DetElement::builder("World").build().world_transformation(),
            DAffine3::IDENTITY
        );
    }

    #[test]
    fn sensitive_volume_exposes_readout() {
        let ro = Readout::new("Hits", IdSpec::parse("system:8").unwrap());
        let sd = SensitiveDetector::new("Tracker", Some(ro.clone()));
        let vol = Volume::sensitive("Sensor", sd);

        assert!(vol.is_sensitive());
        assert_eq!(vol.sensitive_detector().and_then(|sd| sd.readout()), Some(&ro));
        assert!(!Volume::new("Air").is_sensitive());
    }
}
