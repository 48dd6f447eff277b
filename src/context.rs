//! Cached placement record for one volume identifier.

use bevy::math::{DAffine3, DVec3};

use crate::encoding::VolIds;
use crate::geometry::{DetElement, PlacedVolume};
use crate::VolumeId;

/// Everything the registry knows about one registered placement.
///
/// Created once while populating and never mutated after it has been
/// adopted by a section.
#[derive(Clone, Debug)]
pub struct VolumeContext {
    /// Encoded volume identifier.
    pub identifier: VolumeId,
    /// Union of the masks of all fields used to encode `identifier`.
    pub mask: VolumeId,
    /// The placement the identifier resolves to.
    pub placement: PlacedVolume,
    /// Top-level subdetector element the placement lives under.
    pub detector: DetElement,
    /// Closest detector element above the placement.
    pub element: DetElement,
    /// Volume ids the identifier was computed from.
    pub vol_ids: VolIds,
    /// Placements from `element`'s placement down to `placement`.
    pub path: Vec<PlacedVolume>,
    /// Placement frame to world frame.
    pub to_world: DAffine3,
    /// Placement frame to the subdetector (`detector`) frame.
    pub to_detector: DAffine3,
}

impl VolumeContext {
    /// Build a context, computing both transforms from `path`.
    ///
    /// The first node of `path` is the placement of `element`; its effect is
    /// already part of the element's world transform, so only the nodes
    /// below it are chained.
    pub fn new(
        identifier: VolumeId,
        mask: VolumeId,
        detector: DetElement,
        element: DetElement,
        vol_ids: VolIds,
        path: Vec<PlacedVolume>,
    ) -> Option<Self> {
        let placement = path.last()?.clone();
        let local = path
            .iter()
            .skip(1)
            .fold(DAffine3::IDENTITY, |acc, pv| acc * *pv.transform());
        let to_world = *element.world_transformation() * local;
        let to_detector = detector.world_transformation().inverse() * to_world;
        Some(Self {
            identifier,
            mask,
            placement,
            detector,
            element,
            vol_ids,
            path,
            to_world,
            to_detector,
        })
    }

    /// Map a point from the placement frame to the world frame.
    #[inline]
    pub fn local_to_world(&self, local: DVec3) -> DVec3 {
        self.to_world.transform_point3(local)
    }

    /// Map a point from the placement frame to the subdetector frame.
    #[inline]
    pub fn local_to_detector(&self, local: DVec3) -> DVec3 {
        self.to_detector.transform_point3(local)
    }

    /// Map a world point into the placement frame.
    #[inline]
    pub fn world_to_local(&self, global: DVec3) -> DVec3 {
        self.to_world.inverse().transform_point3(global)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Volume;

    #[test]
    fn transforms_chain_below_element_placement() {
        let sensor = PlacedVolume::builder("sensor", Volume::new("Sensor"))
            .translation(DVec3::new(0.0, 2.0, 0.0))
            .build();
        let layer = PlacedVolume::builder("layer", Volume::new("Layer"))
            .translation(DVec3::new(0.0, 0.0, 10.0))
            .daughter(sensor.clone())
            .build();
        let env = PlacedVolume::builder("env", Volume::new("Envelope"))
            .translation(DVec3::new(100.0, 0.0, 0.0))
            .daughter(layer.clone())
            .build();
        let det = DetElement::builder("Tracker").placement(env.clone()).build();

        let ctx = VolumeContext::new(
            1,
            1,
            det.clone(),
            det,
            VolIds::new(),
            vec![env, layer, sensor.clone()],
        )
        .unwrap();

        assert_eq!(ctx.placement, sensor);
        assert_eq!(ctx.local_to_world(DVec3::ZERO), DVec3::new(100.0, 2.0, 10.0));
        assert_eq!(ctx.local_to_detector(DVec3::ZERO), DVec3::new(0.0, 2.0, 10.0));
        assert_eq!(ctx.world_to_local(DVec3::new(100.0, 2.0, 10.0)), DVec3::ZERO);
    }

    #[test]
    fn empty_path_has_no_context() {
        let det = DetElement::builder("Tracker").build();
        assert!(VolumeContext::new(0, 0, det.clone(), det, VolIds::new(), Vec::new()).is_none());
    }
}
