//! Error types for registry construction and lookup.

use thiserror::Error;

use crate::VolumeId;

/// Errors raised by the volume manager.
///
/// Configuration errors abort the operation that hit them. Registration
/// conflicts are skipped (and logged) while populating, but surface as hard
/// errors from direct [`adopt_placement`](crate::VolumeManager::adopt_placement)
/// calls. Lookup misses are always returned to the caller.
#[derive(Debug, Error)]
pub enum VolumeManagerError {
    /// An id descriptor string could not be parsed.
    #[error("invalid id specification '{spec}': {reason}")]
    InvalidIdSpec {
        /// The descriptor text.
        spec: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A volume id names a field the id specification does not define.
    #[error("id specification '{spec}' has no field '{field}'")]
    UnknownField {
        /// Field name that was requested.
        field: String,
        /// Canonical form of the id specification searched.
        spec: String,
    },

    /// A subdetector section was requested without a readout.
    #[error("only subdetectors with a valid readout descriptor are allowed [invalid detector element: {detector}]")]
    InvalidReadout {
        /// Name of the detector element.
        detector: String,
    },

    /// A subdetector section was requested for an unplaced detector element.
    #[error("only subdetectors with a valid placement are allowed [invalid detector element: {detector}]")]
    MissingPlacement {
        /// Name of the detector element.
        detector: String,
    },

    /// The subdetector placement carries no `system` volume id.
    #[error("only subdetectors with a 'system' placement volume id are allowed [invalid detector element: {detector}]")]
    MissingSystemField {
        /// Name of the detector element.
        detector: String,
    },

    /// Two placements encode to the same identifier within one section.
    #[error(
        "attempt to register twice volume with identical volume id {identifier:#018x} mask {mask:#018x} \
         to detector {detector}: '{placement}' clashes with '{existing}' [vol ids: {vol_ids}] [decoded: {decoded}]"
    )]
    DuplicateIdentifier {
        /// Colliding identifier.
        identifier: VolumeId,
        /// Mask of the rejected placement.
        mask: VolumeId,
        /// Name of the section's detector element.
        detector: String,
        /// Placement that was rejected.
        placement: String,
        /// Placement that was registered first and kept.
        existing: String,
        /// Volume ids of the rejected placement.
        vol_ids: String,
        /// Field-by-field decode of the identifier.
        decoded: String,
    },

    /// No section in the tree accepts the identifier.
    #[error("no section below '{detector}' accepts volume id {identifier:#018x} of '{placement}'")]
    NoMatchingSection {
        /// Identifier being inserted.
        identifier: VolumeId,
        /// Name of the section's detector element.
        detector: String,
        /// Placement being inserted.
        placement: String,
    },

    /// No context is registered for the identifier.
    #[error("failed to search volume context [unknown identifier {0:#018x}]")]
    UnknownIdentifier(VolumeId),

    /// No subdetector section matches the identifier's system value.
    #[error("attempt to access unknown subdetector section [identifier {0:#018x}]")]
    UnknownSubdetector(VolumeId),
}

/// Result alias used throughout the crate.
pub type Result<T, E = VolumeManagerError> = std::result::Result<T, E>;
