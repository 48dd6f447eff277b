//! Volume id lists and their encoding into identifiers.
//!
//! Every placement carries an ordered list of `(field, value)` pairs. While
//! walking down the geometry tree the lists of all ancestors are
//! concatenated, and the full list is encoded with the readout's
//! [`IdSpec`](crate::IdSpec):
//!
//! ```text
//! world ─ Tracker {system=3} ─ Layer {layer=2} ─ Strip {strip=17}
//!
//! vol ids:    system=3; layer=2; strip=17
//! identifier: system.encode(3) | layer.encode(2) | strip.encode(17)
//! mask:       system.mask()    | layer.mask()    | strip.mask()
//! ```
//!
//! Bits not covered by any listed field stay 0.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::layout::IdSpec;
use crate::VolumeId;

/// Ordered `(field name, value)` pairs attached to a placement.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolIds(Vec<(String, i64)>);

impl VolIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: append an entry and return self.
    #[inline]
    pub fn with(mut self, field: impl Into<String>, value: i64) -> Self {
        self.push(field, value);
        self
    }

    /// Append an entry. Existing entries for the same field are kept.
    #[inline]
    pub fn push(&mut self, field: impl Into<String>, value: i64) {
        self.0.push((field.into(), value));
    }

    /// Append all entries of `other`, preserving order.
    pub fn extend_from(&mut self, other: &VolIds) {
        self.0.extend(other.0.iter().cloned());
    }

    /// Value of the first entry for `field`.
    pub fn find(&self, field: &str) -> Option<i64> {
        self.0.iter().find(|(name, _)| name == field).map(|&(_, v)| v)
    }

    #[inline]
    pub fn contains(&self, field: &str) -> bool {
        self.find(field).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> + '_ {
        self.0.iter().map(|(name, v)| (name.as_str(), *v))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, i64)> for VolIds {
    fn from_iter<T: IntoIterator<Item = (S, i64)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl<S: Into<String>> Extend<(S, i64)> for VolIds {
    fn extend<T: IntoIterator<Item = (S, i64)>>(&mut self, iter: T) {
        self.0.extend(iter.into_iter().map(|(k, v)| (k.into(), v)));
    }
}

impl fmt::Display for VolIds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

/// Encode a volume id list into an `(identifier, mask)` pair.
///
/// Deterministic; fails with
/// [`UnknownField`](crate::VolumeManagerError::UnknownField) if an entry
/// names a field `spec` does not define. Entries touching the same field
/// are OR-ed together.
pub fn encode(spec: &IdSpec, vol_ids: &VolIds) -> Result<(VolumeId, VolumeId)> {
    let mut identifier: VolumeId = 0;
    let mut mask: VolumeId = 0;
    for (name, value) in vol_ids.iter() {
        let field = spec.require(name)?;
        identifier |= field.encode(value);
        mask |= field.mask();
    }
    Ok((identifier, mask))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VolumeManagerError;

    fn tracker_spec() -> IdSpec {
        IdSpec::parse("system:56:8,layer:8:8,strip:0:8").unwrap()
    }

    #[test]
    fn encodes_tracker_strip() {
        let ids = VolIds::new().with("system", 3).with("layer", 2).with("strip", 17);
        let (id, mask) = encode(&tracker_spec(), &ids).unwrap();

        assert_eq!(id, 0x0300_0000_0000_0211);
        assert_eq!(mask, 0xff00_0000_0000_ffff);
    }

    #[test]
    fn mask_covers_fields_with_zero_value() {
        let ids = VolIds::new().with("system", 3).with("layer", 0);
        let (id, mask) = encode(&tracker_spec(), &ids).unwrap();

        assert_eq!(id, 0x0300_0000_0000_0000);
        assert_eq!(mask, 0xff00_0000_0000_ff00);
    }

    #[test]
    fn empty_list_encodes_to_zero() {
        assert_eq!(encode(&tracker_spec(), &VolIds::new()).unwrap(), (0, 0));
    }

    #[test]
    fn unknown_field_fails() {
        let ids = VolIds::new().with("system", 3).with("module", 1);
        let err = encode(&tracker_spec(), &ids).unwrap_err();
        assert!(matches!(err, VolumeManagerError::UnknownField { ref field, .. } if field == "module"));
    }

    #[test]
    fn repeated_field_is_ored() {
        let ids = VolIds::new().with("strip", 0x10).with("strip", 0x01);
        let (id, _) = encode(&tracker_spec(), &ids).unwrap();
        assert_eq!(id, 0x11);
    }

    #[test]
    fn signed_values_stay_in_their_field() {
        let spec = IdSpec::parse("system:8,x:-8,y:-8").unwrap();
        let ids = VolIds::new().with("system", 1).with("x", -1).with("y", 2);
        let (id, _) = encode(&spec, &ids).unwrap();

        assert_eq!(id, 0x02ff01);
        assert_eq!(spec.field("x").unwrap().value(id), -1);
        assert_eq!(spec.field("y").unwrap().value(id), 2);
    }

    #[test]
    fn vol_ids_find_and_display() {
        let ids: VolIds = [("system", 3), ("layer", 2)].into_iter().collect();
        assert_eq!(ids.find("layer"), Some(2));
        assert_eq!(ids.find("strip"), None);
        assert_eq!(ids.to_string(), "system=3; layer=2");
    }

    #[test]
    fn vol_ids_serde_keeps_order() {
        let ids = VolIds::new().with("system", 3).with("layer", 2);
        let json = serde_json::to_string(&ids).unwrap();
        assert_eq!(json, r#"[["system",3],["layer",2]]"#);

        let back: VolIds = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ids);
    }
}
