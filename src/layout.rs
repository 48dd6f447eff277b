//! Field layout: named bit ranges inside a 64-bit volume identifier.
//!
//! An [`IdSpec`] is parsed from a compact descriptor string:
//!
//! ```text
//! system:8,barrel:3,layer:6,module:-5,x:32:-16
//! │        │        │       │         └─ name:offset:width, explicit offset
//! │        │        │       └─ negative width: signed (two's complement) field
//! │        │        └─ offset follows the previous field (bits 11..17)
//! │        └─ bits 8..11
//! └─ bits 0..8
//! ```
//!
//! Every readout must define a field called [`SYSTEM_FIELD`]; its value
//! selects the subdetector section an identifier belongs to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VolumeManagerError};
use crate::VolumeId;

/// Name of the field that selects a subdetector.
pub const SYSTEM_FIELD: &str = "system";

/// Maximum number of bits in an identifier.
pub const ID_BITS: u8 = 64;

/// Mask covering `width` bits starting at `offset`.
#[inline]
pub const fn field_mask(offset: u8, width: u8) -> u64 {
    debug_assert!(width > 0 && offset as u16 + width as u16 <= ID_BITS as u16);
    if width >= ID_BITS {
        u64::MAX
    } else {
        ((1u64 << width) - 1) << offset
    }
}

/// One named bit range of an identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BitField {
    name: String,
    offset: u8,
    width: u8,
    signed: bool,
    mask: u64,
}

impl BitField {
    /// Create a field covering `width` bits starting at `offset`.
    pub fn new(name: impl Into<String>, offset: u8, width: u8, signed: bool) -> Result<Self> {
        let name = name.into();
        let invalid = |reason: String| VolumeManagerError::InvalidIdSpec {
            spec: name.clone(),
            reason,
        };
        if name.is_empty() {
            return Err(invalid("field name must not be empty".into()));
        }
        if width == 0 || width > ID_BITS {
            return Err(invalid(format!("width {width} is not in 1..=64")));
        }
        if offset as u16 + width as u16 > ID_BITS as u16 {
            return Err(invalid(format!(
                "offset {offset} + width {width} exceeds {ID_BITS} bits"
            )));
        }
        Ok(Self {
            mask: field_mask(offset, width),
            name,
            offset,
            width,
            signed,
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn offset(&self) -> u8 {
        self.offset
    }

    #[inline]
    pub fn width(&self) -> u8 {
        self.width
    }

    #[inline]
    pub fn is_signed(&self) -> bool {
        self.signed
    }

    /// Bits of the identifier owned by this field.
    #[inline]
    pub fn mask(&self) -> u64 {
        self.mask
    }

    /// Extract this field's value from a raw identifier.
    ///
    /// Signed fields are sign-extended from their width.
    #[inline]
    pub fn value(&self, raw: VolumeId) -> i64 {
        let bits = (raw & self.mask) >> self.offset;
        if self.signed && self.width < ID_BITS && (bits >> (self.width - 1)) & 1 == 1 {
            (bits | !((1u64 << self.width) - 1)) as i64
        } else {
            bits as i64
        }
    }

    /// Place `value` into this field's bit range.
    ///
    /// Bits that do not fit into the width are dropped; negative values of
    /// signed fields are stored in two's complement truncated to the width.
    #[inline]
    pub fn encode(&self, value: i64) -> VolumeId {
        ((value as u64) << self.offset) & self.mask
    }

    /// Smallest value representable by this field.
    pub fn min_value(&self) -> i64 {
        if self.signed {
            if self.width == ID_BITS {
                i64::MIN
            } else {
                -(1i64 << (self.width - 1))
            }
        } else {
            0
        }
    }

    /// Largest value representable by this field.
    pub fn max_value(&self) -> i64 {
        match (self.signed, self.width) {
            (true, w) => ((1u64 << (w - 1)) - 1) as i64,
            (false, w) if w >= 63 => i64::MAX,
            (false, w) => ((1u64 << w) - 1) as i64,
        }
    }
}

impl fmt::Display for BitField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = if self.signed {
            -(self.width as i16)
        } else {
            self.width as i16
        };
        write!(f, "{}:{}:{}", self.name, self.offset, width)
    }
}

/// Ordered set of named fields describing an identifier layout.
///
/// Serializes as its canonical descriptor string, so readouts can carry it
/// directly in configuration files.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdSpec {
    fields: Vec<BitField>,
    mask: u64,
}

impl IdSpec {
    /// Parse a descriptor like `system:8,layer:8:8,strip:0:8`.
    ///
    /// Entries are `name:width` or `name:offset:width`. A negative width
    /// marks a signed field. Without an explicit offset a field starts
    /// right after the previous one.
    pub fn parse(descriptor: &str) -> Result<Self> {
        let invalid = |reason: String| VolumeManagerError::InvalidIdSpec {
            spec: descriptor.to_string(),
            reason,
        };

        let mut fields = Vec::new();
        let mut next_offset: u16 = 0;

        for entry in descriptor.split(',').map(str::trim) {
            if entry.is_empty() {
                if descriptor.trim().is_empty() {
                    break;
                }
                return Err(invalid("empty field entry".into()));
            }

            let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
            let (name, offset, width) = match parts.as_slice() {
                [name, width] => (*name, None, *width),
                [name, offset, width] => (*name, Some(*offset), *width),
                _ => {
                    return Err(invalid(format!(
                        "entry '{entry}' is not 'name:width' or 'name:offset:width'"
                    )));
                }
            };

            let width: i16 = width
                .parse()
                .map_err(|_| invalid(format!("bad width '{width}' for field '{name}'")))?;
            let offset: u16 = match offset {
                Some(offset) => offset
                    .parse()
                    .map_err(|_| invalid(format!("bad offset '{offset}' for field '{name}'")))?,
                None => next_offset,
            };

            let abs_width = width.unsigned_abs();
            if abs_width == 0 || abs_width > ID_BITS as u16 {
                return Err(invalid(format!("field '{name}' has width {width}")));
            }
            let Some(end) = offset
                .checked_add(abs_width)
                .filter(|&end| end <= ID_BITS as u16)
            else {
                return Err(invalid(format!(
                    "field '{name}' at offset {offset} with width {abs_width} exceeds {ID_BITS} bits"
                )));
            };

            fields.push(BitField::new(name, offset as u8, abs_width as u8, width < 0).map_err(
                |e| match e {
                    VolumeManagerError::InvalidIdSpec { reason, .. } => invalid(reason),
                    other => other,
                },
            )?);
            next_offset = end;
        }

        Self::from_fields(fields).map_err(|e| match e {
            VolumeManagerError::InvalidIdSpec { reason, .. } => invalid(reason),
            other => other,
        })
    }

    /// Build a spec from already constructed fields.
    ///
    /// Rejects duplicate names and overlapping bit ranges.
    pub fn from_fields(fields: Vec<BitField>) -> Result<Self> {
        let mut mask = 0u64;
        for (i, field) in fields.iter().enumerate() {
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(VolumeManagerError::InvalidIdSpec {
                    spec: field.name.clone(),
                    reason: format!("duplicate field '{}'", field.name),
                });
            }
            if mask & field.mask != 0 {
                return Err(VolumeManagerError::InvalidIdSpec {
                    spec: field.name.clone(),
                    reason: format!("field '{}' overlaps a previous field", field.name),
                });
            }
            mask |= field.mask;
        }
        Ok(Self { fields, mask })
    }

    /// Look up a field by name.
    #[inline]
    pub fn field(&self, name: &str) -> Option<&BitField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up a field by name, failing with [`VolumeManagerError::UnknownField`].
    pub fn require(&self, name: &str) -> Result<&BitField> {
        self.field(name)
            .ok_or_else(|| VolumeManagerError::UnknownField {
                field: name.to_string(),
                spec: self.to_string(),
            })
    }

    /// All fields in declaration order.
    #[inline]
    pub fn fields(&self) -> &[BitField] {
        &self.fields
    }

    /// Union of all field masks.
    #[inline]
    pub fn mask(&self) -> u64 {
        self.mask
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Decode every field of a raw identifier.
    pub fn decode(&self, raw: VolumeId) -> Vec<(&str, i64)> {
        self.fields
            .iter()
            .map(|f| (f.name.as_str(), f.value(raw)))
            .collect()
    }

    /// Human-readable decode, e.g. `system=3 [56,8] layer=2 [8,8]`.
    pub fn describe(&self, raw: VolumeId) -> String {
        self.fields
            .iter()
            .map(|f| format!("{}={} [{},{}]", f.name, f.value(raw), f.offset, f.width))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for IdSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{field}")?;
        }
        Ok(())
    }
}

impl FromStr for IdSpec {
    type Err = VolumeManagerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for IdSpec {
    type Error = VolumeManagerError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<IdSpec> for String {
    fn from(spec: IdSpec) -> Self {
        spec.to_string()
    }
}
