//! Sectioned registry of placement contexts.
//!
//! Sections live in an arena owned by [`VolumeManager`]; index 0 is the top
//! level section every other section redirects to. A child section is
//! created per subdetector and dispatches on the subdetector's `system`
//! field:
//!
//! ```text
//! TOP (World)                       lookup(id):
//! ├── Tracker   system:56:8 == 3      1. own cache
//! ├── Calo      system:0:6  == 7      2. every child cache (TREE)
//! └── Muon      system:0:8  == 12
//! ```
//!
//! The `system` field may sit at a different position in every subdetector,
//! so children are searched linearly instead of indexed by one shift/mask.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use bevy::math::DAffine3;
use tracing::{debug, warn};

use crate::context::VolumeContext;
use crate::error::{Result, VolumeManagerError};
use crate::geometry::{DetElement, PlacedVolume, Readout};
use crate::layout::{BitField, IdSpec, SYSTEM_FIELD};
use crate::populate::Populator;
use crate::VolumeId;

/// How placements are distributed over sections.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Topology {
    /// No dispatch rule: placements cannot be adopted.
    None,
    /// One flat cache in the top level section.
    One,
    /// One cache per subdetector section, dispatched on `system`.
    #[default]
    Tree,
}

/// Stable index of a section inside its [`VolumeManager`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionId(usize);

impl SectionId {
    /// The top level section.
    pub const ROOT: SectionId = SectionId(0);

    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug)]
struct SectionData {
    detector: DetElement,
    readout: Option<Readout>,
    system: Option<BitField>,
    sys_id: i64,
    parent: Option<SectionId>,
    volumes: HashMap<VolumeId, VolumeContext>,
    /// Children in creation order, keyed by detector element identity.
    subdetectors: Vec<(DetElement, SectionId)>,
    /// Children keyed by their system value.
    managers: BTreeMap<i64, SectionId>,
}

impl SectionData {
    fn new(
        detector: DetElement,
        readout: Option<Readout>,
        system: Option<BitField>,
        sys_id: i64,
        parent: Option<SectionId>,
    ) -> Self {
        Self {
            detector,
            readout,
            system,
            sys_id,
            parent,
            volumes: HashMap::new(),
            subdetectors: Vec::new(),
            managers: BTreeMap::new(),
        }
    }

    /// True if the `system` value encoded in `identifier` selects this section.
    #[inline]
    fn accepts(&self, identifier: VolumeId) -> bool {
        self.system
            .as_ref()
            .is_some_and(|field| field.value(identifier) == self.sys_id)
    }
}

/// Registry resolving volume identifiers to placement contexts.
///
/// Built once (populated from a detector element tree), then read-only.
/// All lookups take `&self`, so a finished manager can be shared between
/// threads without locking.
#[derive(Debug)]
pub struct VolumeManager {
    topology: Topology,
    sections: Vec<SectionData>,
}

impl VolumeManager {
    /// Build a manager for `world` and register every sensitive placement
    /// below it.
    ///
    /// # Errors
    ///
    /// Configuration errors found while populating (a subdetector without
    /// placement or `system` volume id, a volume id naming a field missing
    /// from the readout) abort construction. Registration conflicts do not;
    /// they are logged and the offending placement is skipped.
    pub fn new(world: &DetElement, readout: Option<&Readout>, topology: Topology) -> Result<Self> {
        let mut manager = Self::unpopulated(world, readout, topology);
        let registered = Populator::new(&mut manager).populate(world)?;
        debug!(
            world = world.name(),
            ?topology,
            sections = manager.sections.len(),
            registered,
            "volume manager populated"
        );
        Ok(manager)
    }

    /// A manager with only its top level section and no placements.
    ///
    /// Use [`add_subdetector`](Self::add_subdetector) and
    /// [`adopt_placement`](Self::adopt_placement) to fill it by hand.
    pub fn unpopulated(world: &DetElement, readout: Option<&Readout>, topology: Topology) -> Self {
        Self {
            topology,
            sections: vec![SectionData::new(
                world.clone(),
                readout.cloned(),
                None,
                0,
                None,
            )],
        }
    }

    #[inline]
    pub fn topology(&self) -> Topology {
        self.topology
    }

    /// The top level section.
    #[inline]
    pub fn root(&self) -> Section<'_> {
        Section {
            manager: self,
            id: SectionId::ROOT,
        }
    }

    /// Access a section by id.
    pub fn section(&self, id: SectionId) -> Option<Section<'_>> {
        (id.0 < self.sections.len()).then_some(Section { manager: self, id })
    }

    /// All sections, top level first.
    pub fn sections(&self) -> impl Iterator<Item = Section<'_>> + '_ {
        (0..self.sections.len()).map(move |i| Section {
            manager: self,
            id: SectionId(i),
        })
    }

    /// Total number of registered placements.
    pub fn len(&self) -> usize {
        self.sections.iter().map(|s| s.volumes.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(|s| s.volumes.is_empty())
    }

    /// Every registered context, in no particular order.
    pub fn contexts(&self) -> impl Iterator<Item = &VolumeContext> + '_ {
        self.sections.iter().flat_map(|s| s.volumes.values())
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Add (or reuse) the section for subdetector `detector` below the top
    /// level section.
    pub fn add_subdetector(
        &mut self,
        detector: &DetElement,
        readout: Option<&Readout>,
    ) -> Result<SectionId> {
        self.add_subdetector_to(SectionId::ROOT, detector, readout)
    }

    /// Add (or reuse) the section for subdetector `detector` below `parent`.
    ///
    /// Idempotent per detector element: repeated calls return the id created
    /// by the first one.
    ///
    /// # Errors
    ///
    /// - [`InvalidReadout`](VolumeManagerError::InvalidReadout) without readout
    /// - [`MissingPlacement`](VolumeManagerError::MissingPlacement) for an unplaced element
    /// - [`MissingSystemField`](VolumeManagerError::MissingSystemField) if the
    ///   placement has no `system` volume id
    /// - [`UnknownField`](VolumeManagerError::UnknownField) if the readout
    ///   defines no `system` field
    ///
    /// # Panics
    ///
    /// Panics if `parent` does not belong to this manager.
    pub fn add_subdetector_to(
        &mut self,
        parent: SectionId,
        detector: &DetElement,
        readout: Option<&Readout>,
    ) -> Result<SectionId> {
        if let Some(&(_, existing)) = self.sections[parent.0]
            .subdetectors
            .iter()
            .find(|(de, _)| de == detector)
        {
            return Ok(existing);
        }

        let name = || detector.name().to_string();
        let readout = readout.ok_or_else(|| VolumeManagerError::InvalidReadout { detector: name() })?;
        let placement = detector
            .placement()
            .ok_or_else(|| VolumeManagerError::MissingPlacement { detector: name() })?;
        let sys_id = placement
            .vol_ids()
            .find(SYSTEM_FIELD)
            .ok_or_else(|| VolumeManagerError::MissingSystemField { detector: name() })?;
        let system = readout.id_spec().require(SYSTEM_FIELD)?.clone();

        let id = SectionId(self.sections.len());
        self.sections.push(SectionData::new(
            detector.clone(),
            Some(readout.clone()),
            Some(system),
            sys_id,
            Some(parent),
        ));

        let parent_data = &mut self.sections[parent.0];
        parent_data.subdetectors.push((detector.clone(), id));
        if let Some(previous) = parent_data.managers.insert(sys_id, id) {
            warn!(
                detector = detector.name(),
                sys_id,
                replaced = self.sections[previous.0].detector.name(),
                "system id already used by another subdetector section"
            );
        }

        debug!(
            detector = detector.name(),
            readout = readout.name(),
            sys_id,
            section = id.0,
            "added subdetector section"
        );
        Ok(id)
    }

    /// Register a placement context, starting at `section`.
    ///
    /// - [`Topology::One`]: always stored in the top level section.
    /// - [`Topology::Tree`], child section: stored locally if the context's
    ///   `system` value selects this section, otherwise handed to the top.
    /// - [`Topology::Tree`], top level: handed to the first child selected by
    ///   the `system` value.
    ///
    /// # Errors
    ///
    /// [`DuplicateIdentifier`](VolumeManagerError::DuplicateIdentifier) if the
    /// target section already holds the identifier (the first entry is kept),
    /// [`NoMatchingSection`](VolumeManagerError::NoMatchingSection) if no
    /// section accepts it.
    ///
    /// # Panics
    ///
    /// Panics if `section` does not belong to this manager.
    pub fn adopt_placement(&mut self, section: SectionId, context: VolumeContext) -> Result<()> {
        match self.topology {
            Topology::One => self.insert_local(SectionId::ROOT, context),
            Topology::Tree if section != SectionId::ROOT => {
                if self.sections[section.0].accepts(context.identifier) {
                    self.insert_local(section, context)
                } else {
                    self.adopt_placement(SectionId::ROOT, context)
                }
            }
            Topology::Tree => {
                let root = &self.sections[SectionId::ROOT.0];
                let target = root
                    .managers
                    .values()
                    .copied()
                    .find(|sub| self.sections[sub.0].accepts(context.identifier));
                match target {
                    Some(sub) => self.insert_local(sub, context),
                    None => Err(self.no_matching_section(section, &context)),
                }
            }
            Topology::None => Err(self.no_matching_section(section, &context)),
        }
    }

    fn no_matching_section(&self, section: SectionId, context: &VolumeContext) -> VolumeManagerError {
        VolumeManagerError::NoMatchingSection {
            identifier: context.identifier,
            detector: self.sections[section.0].detector.name().to_string(),
            placement: context.placement.name().to_string(),
        }
    }

    fn insert_local(&mut self, section: SectionId, context: VolumeContext) -> Result<()> {
        let identifier = context.identifier;
        if let Some(existing) = self.sections[section.0].volumes.get(&identifier) {
            return Err(VolumeManagerError::DuplicateIdentifier {
                identifier,
                mask: context.mask,
                detector: self.sections[section.0].detector.name().to_string(),
                placement: context.placement.name().to_string(),
                existing: existing.placement.name().to_string(),
                vol_ids: context.vol_ids.to_string(),
                decoded: self
                    .spec_for(section, &context.detector)
                    .map(|spec| spec.describe(identifier))
                    .unwrap_or_default(),
            });
        }

        let data = &mut self.sections[section.0];
        debug!(
            section = data.detector.name(),
            count = data.volumes.len() + 1,
            placement = context.placement.name(),
            identifier = %Hex(identifier),
            mask = %Hex(context.mask),
            "inserted new volume"
        );
        data.volumes.insert(identifier, context);
        Ok(())
    }

    /// Id spec used to decode identifiers stored in `section`.
    ///
    /// The top level section of a flat registry usually has no readout; the
    /// subdetector section of `detector` knows the layout then.
    fn spec_for(&self, section: SectionId, detector: &DetElement) -> Option<&IdSpec> {
        let data = &self.sections[section.0];
        data.readout.as_ref().map(Readout::id_spec).or_else(|| {
            data.subdetectors
                .iter()
                .find(|(de, _)| de == detector)
                .and_then(|(_, sub)| self.sections[sub.0].readout.as_ref())
                .map(Readout::id_spec)
        })
    }

    // =========================================================================
    // Lookup (delegates to the top level section)
    // =========================================================================

    /// Context registered for `identifier`.
    #[inline]
    pub fn lookup_context(&self, identifier: VolumeId) -> Result<&VolumeContext> {
        self.root().lookup_context(identifier)
    }

    /// Placement registered for `identifier`.
    #[inline]
    pub fn lookup_placement(&self, identifier: VolumeId) -> Result<&PlacedVolume> {
        self.root().lookup_placement(identifier)
    }

    /// Subdetector element containing the placement for `identifier`.
    #[inline]
    pub fn lookup_detector(&self, identifier: VolumeId) -> Result<&DetElement> {
        self.root().lookup_detector(identifier)
    }

    /// Closest detector element containing the placement for `identifier`.
    #[inline]
    pub fn lookup_det_element(&self, identifier: VolumeId) -> Result<&DetElement> {
        self.root().lookup_det_element(identifier)
    }

    /// Placement-to-world transform for `identifier`.
    #[inline]
    pub fn world_transformation(&self, identifier: VolumeId) -> Result<&DAffine3> {
        self.root().world_transformation(identifier)
    }

    /// Subdetector section selected by the `system` value of `identifier`.
    #[inline]
    pub fn subdetector(&self, identifier: VolumeId) -> Result<Section<'_>> {
        self.root().subdetector(identifier)
    }
}

impl fmt::Display for VolumeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.root(), f)
    }
}

// =============================================================================
// Section view
// =============================================================================

/// Borrowed view of one section of a [`VolumeManager`].
#[derive(Clone, Copy)]
pub struct Section<'a> {
    manager: &'a VolumeManager,
    id: SectionId,
}

impl<'a> Section<'a> {
    #[inline]
    fn data(&self) -> &'a SectionData {
        &self.manager.sections[self.id.0]
    }

    #[inline]
    pub fn id(&self) -> SectionId {
        self.id
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.id == SectionId::ROOT
    }

    /// Detector element this section was created for.
    #[inline]
    pub fn detector(&self) -> &'a DetElement {
        &self.data().detector
    }

    #[inline]
    pub fn name(&self) -> &'a str {
        self.data().detector.name()
    }

    #[inline]
    pub fn readout(&self) -> Option<&'a Readout> {
        self.data().readout.as_ref()
    }

    #[inline]
    pub fn id_spec(&self) -> Option<&'a IdSpec> {
        self.readout().map(Readout::id_spec)
    }

    /// Field this section dispatches on; `None` for the top level section.
    #[inline]
    pub fn system(&self) -> Option<&'a BitField> {
        self.data().system.as_ref()
    }

    /// Value of the `system` field that selects this section.
    #[inline]
    pub fn sys_id(&self) -> i64 {
        self.data().sys_id
    }

    pub fn parent(&self) -> Option<Section<'a>> {
        self.data().parent.map(|id| Section {
            manager: self.manager,
            id,
        })
    }

    /// Number of placements cached in this section only.
    #[inline]
    pub fn len(&self) -> usize {
        self.data().volumes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data().volumes.is_empty()
    }

    /// Child sections in creation order.
    pub fn subsections(&self) -> impl Iterator<Item = Section<'a>> + use<'a> {
        let manager = self.manager;
        self.data()
            .subdetectors
            .iter()
            .map(move |&(_, id)| Section { manager, id })
    }

    /// Contexts cached in this section only.
    pub fn contexts(&self) -> impl Iterator<Item = &'a VolumeContext> + use<'a> {
        self.data().volumes.values()
    }

    /// Resolve `identifier` to its context.
    ///
    /// Searches this section's cache, then (unless the registry is flat)
    /// every child section's cache. In a flat registry child sections
    /// redirect to the top level section.
    pub fn lookup_context(&self, identifier: VolumeId) -> Result<&'a VolumeContext> {
        let manager = self.manager;
        if !self.is_root() && manager.topology == Topology::One {
            return manager.root().lookup_context(identifier);
        }

        let data = self.data();
        if let Some(context) = data.volumes.get(&identifier) {
            return Ok(context);
        }
        if manager.topology != Topology::One {
            for &(_, sub) in &data.subdetectors {
                if let Some(context) = manager.sections[sub.0].volumes.get(&identifier) {
                    return Ok(context);
                }
            }
        }
        Err(VolumeManagerError::UnknownIdentifier(identifier))
    }

    pub fn lookup_placement(&self, identifier: VolumeId) -> Result<&'a PlacedVolume> {
        self.lookup_context(identifier).map(|c| &c.placement)
    }

    pub fn lookup_detector(&self, identifier: VolumeId) -> Result<&'a DetElement> {
        self.lookup_context(identifier).map(|c| &c.detector)
    }

    pub fn lookup_det_element(&self, identifier: VolumeId) -> Result<&'a DetElement> {
        self.lookup_context(identifier).map(|c| &c.element)
    }

    pub fn world_transformation(&self, identifier: VolumeId) -> Result<&'a DAffine3> {
        self.lookup_context(identifier).map(|c| &c.to_world)
    }

    /// Child section selected by the `system` value of `identifier`.
    pub fn subdetector(&self, identifier: VolumeId) -> Result<Section<'a>> {
        self.subsections()
            .find(|sub| sub.data().accepts(identifier))
            .ok_or(VolumeManagerError::UnknownSubdetector(identifier))
    }

    fn dump(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data();
        let prefix = if self.is_root() { "" } else { "++  " };
        write!(
            f,
            "{prefix}{} Volume manager: {} IDD:{} SysID:{} {} subsections {} placements",
            if self.is_root() { "TOP Level" } else { "Secondary" },
            self.name(),
            self.id_spec().map(|s| s.to_string()).unwrap_or_default(),
            Hex(data.sys_id as u64),
            data.subdetectors.len(),
            data.volumes.len(),
        )?;

        let mut contexts: Vec<&VolumeContext> = data.volumes.values().collect();
        contexts.sort_unstable_by_key(|c| c.identifier);
        for context in contexts {
            write!(
                f,
                "\n{prefix}PV:{:<32} id:{:<18} mask:{:<18}",
                context.placement.name(),
                Hex(context.identifier).to_string(),
                Hex(context.mask).to_string(),
            )?;
        }
        for sub in self.subsections() {
            writeln!(f)?;
            sub.dump(f)?;
        }
        Ok(())
    }
}

impl fmt::Display for Section<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.dump(f)
    }
}

impl fmt::Debug for Section<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Section")
            .field("id", &self.id)
            .field("detector", &self.name())
            .field("sys_id", &self.sys_id())
            .field("placements", &self.len())
            .finish()
    }
}

/// Zero-padded hex formatting for identifiers in logs and dumps.
pub(crate) struct Hex(pub VolumeId);

impl fmt::Display for Hex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}
