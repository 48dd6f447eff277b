//! Bevy integration for the volume manager.
//!
//! Provides:
//! - `VolumeManagerPlugin`: builds the registry once and inserts it as a Resource
//! - `HitCells`: component holding the volume identifiers an entity touched
//!
//! # Example
//!
//! ```ignore
//! use bevy::prelude::*;
//! use volmgr::bevy::*;
//! use volmgr::VolumeManager;
//!
//! fn main() {
//!     App::new()
//!         .add_plugins(VolumeManagerPlugin::new(world))
//!         .add_systems(Update, locate_hits)
//!         .run();
//! }
//!
//! fn locate_hits(manager: Res<VolumeManager>, query: Query<&HitCells>) {
//!     for cells in query.iter() {
//!         for (id, placement) in cells.placements(&manager) {
//!             // ...
//!         }
//!     }
//! }
//! ```

use bevy::prelude::*;
use std::collections::HashSet;

use crate::{
    geometry::{DetElement, PlacedVolume, Readout},
    manager::{SectionId, Topology, VolumeManager},
    VolumeId,
};

// =============================================================================
// Plugin
// =============================================================================

/// Bevy plugin that populates a [`VolumeManager`] from a detector tree.
///
/// ```ignore
/// App::new()
///     .add_plugins(
///         VolumeManagerPlugin::new(world)
///             .topology(Topology::One)
///     )
/// ```
pub struct VolumeManagerPlugin {
    world: DetElement,
    readout: Option<Readout>,
    topology: Topology,
}

impl VolumeManagerPlugin {
    /// Plugin for `world` with the default tree topology and no top level
    /// readout.
    pub fn new(world: DetElement) -> Self {
        Self {
            world,
            readout: None,
            topology: Topology::default(),
        }
    }

    /// Readout attached to the top level section.
    pub fn readout(mut self, readout: Readout) -> Self {
        self.readout = Some(readout);
        self
    }

    /// How placements are distributed over sections.
    ///
    /// Default: [`Topology::Tree`]
    pub fn topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }
}

impl Plugin for VolumeManagerPlugin {
    fn build(&self, app: &mut App) {
        let manager = VolumeManager::new(&self.world, self.readout.as_ref(), self.topology)
            .unwrap_or_else(|err| {
                panic!("failed to build VolumeManager for '{}': {err}", self.world.name())
            });
        app.insert_resource(manager);
    }
}

impl Resource for VolumeManager {}

// =============================================================================
// HitCells Component
// =============================================================================

/// Volume identifiers attached to an entity (a track, a cluster, ...),
/// resolved against the [`VolumeManager`] resource on demand.
#[derive(Component, Clone, Debug, Default, PartialEq, Eq)]
pub struct HitCells {
    cells: HashSet<VolumeId>,
}

impl HitCells {
    /// Record a hit; returns `false` if the cell was already hit.
    #[inline]
    pub fn insert(&mut self, id: VolumeId) -> bool {
        self.cells.insert(id)
    }

    /// Placements of every identifier known to `manager`.
    ///
    /// Identifiers the manager cannot resolve are skipped.
    pub fn placements<'a>(
        &'a self,
        manager: &'a VolumeManager,
    ) -> impl Iterator<Item = (VolumeId, &'a PlacedVolume)> + 'a {
        self.cells
            .iter()
            .filter_map(move |&id| manager.lookup_placement(id).ok().map(|pv| (id, pv)))
    }

    /// Identifiers whose `system` value selects subdetector `section`.
    pub fn in_subdetector<'a>(
        &'a self,
        manager: &'a VolumeManager,
        section: SectionId,
    ) -> impl Iterator<Item = VolumeId> + 'a {
        self.cells.iter().copied().filter(move |&id| {
            manager
                .subdetector(id)
                .is_ok_and(|sub| sub.id() == section)
        })
    }

    /// True if any identifier belongs to subdetector `section`.
    pub fn has_in_subdetector(&self, manager: &VolumeManager, section: SectionId) -> bool {
        self.in_subdetector(manager, section).next().is_some()
    }
}

impl FromIterator<VolumeId> for HitCells {
    fn from_iter<T: IntoIterator<Item = VolumeId>>(iter: T) -> Self {
        Self {
            cells: iter.into_iter().collect(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
