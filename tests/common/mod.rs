//! Shared geometry fixtures for integration tests.

#![allow(dead_code)]

use bevy::math::DVec3;
use volmgr::{DetElement, IdSpec, PlacedVolume, Readout, SensitiveDetector, Volume, VolumeId};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A small detector: a strip tracker and a calorimeter whose `system`
/// fields sit at different bit positions.
pub struct Detector {
    pub world: DetElement,
    pub tracker: DetElement,
    pub calo: DetElement,
    pub tracker_readout: Readout,
    pub calo_readout: Readout,
    /// `strips[layer][strip]`
    pub strips: Vec<Vec<PlacedVolume>>,
    pub cells: Vec<PlacedVolume>,
}

pub const TRACKER_SYSTEM: i64 = 3;
pub const CALO_SYSTEM: i64 = 7;

pub fn detector(layers: i64, strips_per_layer: i64, cells: i64) -> Detector {
    let tracker_readout = Readout::new(
        "TrackerHits",
        IdSpec::parse("system:56:8,layer:8:8,strip:0:8").unwrap(),
    );
    let calo_readout = Readout::new(
        "CaloHits",
        IdSpec::parse("system:6,cell:16,x:32:-16,y:-16").unwrap(),
    );

    let tracker_sd = SensitiveDetector::new("Tracker", Some(tracker_readout.clone()));
    let strip_volume = Volume::sensitive("Strip", tracker_sd);

    let strips: Vec<Vec<PlacedVolume>> = (0..layers)
        .map(|layer| {
            (0..strips_per_layer)
                .map(|strip| {
                    PlacedVolume::builder(format!("strip_{layer}_{strip}"), strip_volume.clone())
                        .vol_id("strip", strip)
                        .translation(DVec3::new(strip as f64 * 0.5, 0.0, 0.0))
                        .build()
                })
                .collect()
        })
        .collect();

    let layer_pvs: Vec<PlacedVolume> = strips
        .iter()
        .enumerate()
        .map(|(layer, strips)| {
            PlacedVolume::builder(format!("layer_{layer}"), Volume::new("Layer"))
                .vol_id("layer", layer as i64)
                .translation(DVec3::new(0.0, 0.0, 10.0 * (layer as f64 + 1.0)))
                .daughters(strips.iter().cloned())
                .build()
        })
        .collect();

    let tracker_env = PlacedVolume::builder("tracker_envelope", Volume::new("TrackerEnvelope"))
        .vol_id("system", TRACKER_SYSTEM)
        .daughters(layer_pvs)
        .build();
    let tracker = DetElement::builder("Tracker").placement(tracker_env).build();

    let calo_sd = SensitiveDetector::new("Calo", Some(calo_readout.clone()));
    let cell_volume = Volume::sensitive("Cell", calo_sd);
    let cell_pvs: Vec<PlacedVolume> = (0..cells)
        .map(|cell| {
            PlacedVolume::builder(format!("cell_{cell}"), cell_volume.clone())
                .vol_id("cell", cell)
                .build()
        })
        .collect();
    let calo_env = PlacedVolume::builder("calo_envelope", Volume::new("CaloEnvelope"))
        .vol_id("system", CALO_SYSTEM)
        .translation(DVec3::new(0.0, 0.0, 500.0))
        .daughters(cell_pvs.iter().cloned())
        .build();
    let calo = DetElement::builder("Calo").placement(calo_env).build();

    let world = DetElement::builder("World")
        .child(tracker.clone())
        .child(calo.clone())
        .build();

    Detector {
        world,
        tracker,
        calo,
        tracker_readout,
        calo_readout,
        strips,
        cells: cell_pvs,
    }
}

/// Identifier of a tracker strip.
pub fn strip_id(layer: i64, strip: i64) -> VolumeId {
    ((TRACKER_SYSTEM as u64) << 56) | ((layer as u64) << 8) | strip as u64
}

/// Identifier of a calorimeter cell.
pub fn cell_id(cell: i64) -> VolumeId {
    CALO_SYSTEM as u64 | ((cell as u64) << 6)
}
