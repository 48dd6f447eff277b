//! One-shot population of a [`VolumeManager`] from a detector element tree.
//!
//! Every top-level subdetector's placement tree is walked once. Sensitive
//! placements with a readout become contexts; mother volumes that carry
//! volume ids and contain sensitive placements are registered too, so
//! support structures stay addressable.

use std::collections::HashSet;

use tracing::{error, warn};

use crate::context::VolumeContext;
use crate::encoding::{encode, VolIds};
use crate::error::Result;
use crate::geometry::{DetElement, PlacedVolume, SensitiveDetector};
use crate::manager::VolumeManager;
use crate::VolumeId;

/// Chain of placements from the current detector element's placement down.
type Chain = Vec<PlacedVolume>;

pub(crate) struct Populator<'m> {
    manager: &'m mut VolumeManager,
    /// Identifiers already handled during the current subdetector scan.
    entries: HashSet<VolumeId>,
    registered: usize,
}

impl<'m> Populator<'m> {
    pub(crate) fn new(manager: &'m mut VolumeManager) -> Self {
        Self {
            manager,
            entries: HashSet::new(),
            registered: 0,
        }
    }

    /// Walk every child of `world`; returns the number of adopted contexts.
    pub(crate) fn populate(mut self, world: &DetElement) -> Result<usize> {
        for detector in world.children() {
            let Some(placement) = detector.placement() else {
                warn!(detector = detector.name(), "detector element has no placement");
                continue;
            };
            self.entries.clear();
            let mut chain = Chain::new();
            let mut sd = None;
            self.scan_physical_volume(
                detector,
                detector,
                placement,
                VolIds::new(),
                &mut sd,
                &mut chain,
            )?;
        }
        Ok(self.registered)
    }

    /// Scan one placement and everything below it.
    ///
    /// `sd` is the most recently seen sensitive detector; it is shared with
    /// siblings and the caller, so a mother volume is registered with the
    /// readout of the sensitive daughters found below it.
    ///
    /// Returns the number of sensitive placements found.
    fn scan_physical_volume(
        &mut self,
        detector: &DetElement,
        element: &DetElement,
        pv: &PlacedVolume,
        mut ids: VolIds,
        sd: &mut Option<SensitiveDetector>,
        chain: &mut Chain,
    ) -> Result<usize> {
        let mut count = 0;
        chain.push(pv.clone());
        ids.extend_from(pv.vol_ids());

        let volume = pv.volume();
        if let Some(sensitive) = volume.sensitive_detector() {
            *sd = Some(sensitive.clone());
            if sensitive.readout().is_some() {
                self.add_entry(sensitive, detector, element, pv, &ids, chain)?;
                count += 1;
            } else {
                warn!(
                    detector = detector.name(),
                    volume = volume.name(),
                    sensitive_detector = sensitive.name(),
                    "volume is sensitive, but has no readout"
                );
            }
        }

        for daughter in pv.daughters() {
            let found = match find_element(element, daughter) {
                Some(sub_element) => {
                    let mut sub_chain = Chain::new();
                    self.scan_physical_volume(
                        detector,
                        sub_element,
                        daughter,
                        ids.clone(),
                        sd,
                        &mut sub_chain,
                    )?
                }
                None => {
                    self.scan_physical_volume(detector, element, daughter, ids.clone(), sd, chain)?
                }
            };
            if count == 0 && found > 0 && !pv.vol_ids().is_empty() {
                if let Some(sensitive) = sd.clone() {
                    self.add_entry(&sensitive, detector, element, pv, &ids, chain)?;
                }
            }
            count += found;
        }

        chain.pop();
        Ok(count)
    }

    fn add_entry(
        &mut self,
        sd: &SensitiveDetector,
        detector: &DetElement,
        element: &DetElement,
        pv: &PlacedVolume,
        ids: &VolIds,
        chain: &Chain,
    ) -> Result<()> {
        let Some(readout) = sd.readout() else {
            warn!(
                detector = detector.name(),
                placement = pv.name(),
                sensitive_detector = sd.name(),
                "cannot register placement: sensitive detector has no readout"
            );
            return Ok(());
        };

        let section = self.manager.add_subdetector(detector, Some(readout))?;
        let (identifier, mask) = encode(readout.id_spec(), ids)?;
        if !self.entries.insert(identifier) {
            return Ok(());
        }

        let Some(context) = VolumeContext::new(
            identifier,
            mask,
            detector.clone(),
            element.clone(),
            ids.clone(),
            chain.clone(),
        ) else {
            return Ok(());
        };

        match self.manager.adopt_placement(section, context) {
            Ok(()) => self.registered += 1,
            Err(err) => error!(
                detector = detector.name(),
                element = element.name(),
                readout = readout.name(),
                placement = pv.name(),
                sensitive = pv.volume().is_sensitive(),
                vol_ids = %ids,
                decoded = %readout.id_spec().describe(identifier),
                "adopt placement failed: {err}"
            ),
        }
        Ok(())
    }
}

/// Detector element below `element` whose placement is `pv`.
///
/// Direct children are checked before descending.
fn find_element<'e>(element: &'e DetElement, pv: &PlacedVolume) -> Option<&'e DetElement> {
    element
        .children()
        .iter()
        .find(|child| child.is_placed_by(pv))
        .or_else(|| {
            element
                .children()
                .iter()
                .find_map(|child| find_element(child, pv))
        })
}
