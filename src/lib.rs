//! # Hierarchical Volume Identifier Registry (volmgr)
//!
//! Maps compact, bit-packed volume identifiers (as produced for every hit in a
//! simulated or real detector) back to the physical placement, the detector
//! element and the world transform they were derived from.
//!
//! ## Design
//!
//! A `VolumeId` is a `u64` whose bit layout is defined per subdetector by the
//! readout's id specification, for example `system:8,layer:8,strip:8` or with
//! explicit offsets:
//!
//! ```text
//! ┌──────────┬────────────────────────────────────┬──────────┬──────────┐
//! │ system   │ (unused, padded with 0)            │ layer    │ strip    │
//! │ 8 bits   │                                    │ 8 bits   │ 8 bits   │
//! │ [63:56]  │ [55:16]                            │ [15:8]   │ [7:0]    │
//! └──────────┴────────────────────────────────────┴──────────┴──────────┘
//! ```
//!
//! The only field every subdetector shares is `system`; its width and position
//! may differ between subdetectors, so the registry dispatches on it with a
//! linear scan over a handful of subdetector sections.
//!
//! ## Usage
//!
//! ```ignore
//! use volmgr::{Topology, VolumeManager};
//!
//! let manager = VolumeManager::new(&world, None, Topology::Tree)?;
//!
//! let context = manager.lookup_context(hit.cell_id)?;
//! let global = context.local_to_world(hit.local_position);
//! ```

pub mod bevy;
pub mod context;
pub mod encoding;
pub mod error;
pub mod geometry;
pub mod layout;
pub mod manager;
mod populate;

pub use context::VolumeContext;
pub use encoding::{encode, VolIds};
pub use error::{Result, VolumeManagerError};
pub use geometry::{
    DetElement, DetElementBuilder, PlacedVolume, PlacementBuilder, Readout, SensitiveDetector,
    Volume,
};
pub use layout::{BitField, IdSpec, SYSTEM_FIELD};
pub use manager::{Section, SectionId, Topology, VolumeManager};

/// Volume identifier: a detector address bit-packed into a u64.
///
/// The meaning of each bit range is defined by the [`IdSpec`] of the
/// readout the placement belongs to.
pub type VolumeId = u64;
