//! VM id and locator definitions.
//!
//! A [`VmId`] is the numeric guest id the hypervisor assigns. A [`Locator`]
//! ties that id to the node it lives on and the kind of guest it is.

use std::str::FromStr;

use crate::LocatorError;

// =============================================================================
// VM Id
// =============================================================================

/// Numeric guest id as assigned by the hypervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VmId(u32);

impl VmId {
    /// Lowest id the hypervisor hands out to guests.
    pub const MIN: Self = Self(100);

    /// Highest id the hypervisor accepts.
    pub const MAX: Self = Self(999_999_999);

    /// Creates a VmId from a raw u32.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the underlying u32 value.
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// Returns the id directly above this one, if it fits.
    #[must_use]
    pub const fn next(&self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }

    /// Returns true if the hypervisor accepts this id for a guest.
    #[must_use]
    pub const fn is_guest_range(&self) -> bool {
        self.0 >= Self::MIN.0 && self.0 <= Self::MAX.0
    }
}

impl std::fmt::Display for VmId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl serde::Serialize for VmId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u32(self.0)
    }
}

impl<'de> serde::Deserialize<'de> for VmId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let id = u32::deserialize(deserializer)?;
        Ok(Self(id))
    }
}

// =============================================================================
// Locator
// =============================================================================

/// Durable handle for a provisioned resource: `{node}/{kind}/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    node: String,
    kind: String,
    id: VmId,
}

impl Locator {
    /// Kind string for QEMU guests.
    pub const QEMU_KIND: &'static str = "qemu";

    /// Separator between locator segments.
    pub const SEPARATOR: char = '/';

    /// Creates a locator. Node and kind are not validated here; callers must
    /// not pass values containing the separator.
    pub fn new(node: impl Into<String>, kind: impl Into<String>, id: VmId) -> Self {
        Self {
            node: node.into(),
            kind: kind.into(),
            id,
        }
    }

    /// Creates a locator for a QEMU guest.
    pub fn qemu(node: impl Into<String>, id: VmId) -> Self {
        Self::new(node, Self::QEMU_KIND, id)
    }

    /// Node the resource lives on.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Resource kind (for example `qemu`).
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Numeric VM id.
    pub fn id(&self) -> VmId {
        self.id
    }

    /// Splits the locator into its parts.
    pub fn into_parts(self) -> (String, String, VmId) {
        (self.node, self.kind, self.id)
    }

    /// Formats the locator in canonical form.
    #[must_use]
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Parses a locator from its canonical form.
    ///
    /// Requires exactly three `/`-separated non-empty segments, the last one
    /// made of ASCII digits only and fitting in a u32.
    pub fn decode(s: &str) -> Result<Self, LocatorError> {
        if s.is_empty() {
            return Err(LocatorError::Empty);
        }

        let segments: Vec<&str> = s.split(Self::SEPARATOR).collect();
        if segments.len() != 3 {
            return Err(LocatorError::WrongSegmentCount {
                input: s.to_string(),
                found: segments.len(),
            });
        }

        if let Some(position) = segments.iter().position(|segment| segment.is_empty()) {
            return Err(LocatorError::EmptySegment {
                input: s.to_string(),
                position: position + 1,
            });
        }

        let id = parse_id(segments[2]).map_err(|reason| LocatorError::InvalidId {
            input: s.to_string(),
            reason,
        })?;

        Ok(Self::new(segments[0], segments[1], id))
    }
}

// u32::from_str accepts a leading '+', which is not a canonical id.
fn parse_id(segment: &str) -> Result<VmId, String> {
    if !segment.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("'{segment}' is not a non-negative integer"));
    }
    segment
        .parse::<u32>()
        .map(VmId)
        .map_err(|e| format!("'{segment}': {e}"))
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.node, self.kind, self.id)
    }
}

impl FromStr for Locator {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl serde::Serialize for Locator {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Locator {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Encodes `(node, kind, id)` as `"{node}/{kind}/{id}"`.
pub fn encode_locator(node: &str, kind: &str, id: VmId) -> String {
    format!("{node}/{kind}/{id}")
}

/// Decodes a locator string into `(node, kind, id)`.
pub fn decode_locator(s: &str) -> Result<(String, String, VmId), LocatorError> {
    Locator::decode(s).map(Locator::into_parts)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[test]
    fn test_decode_valid_locator() {
        let (node, kind, id) = decode_locator("nodeA/qemu/100").unwrap();
        assert_eq!(node, "nodeA");
        assert_eq!(kind, "qemu");
        assert_eq!(id, VmId::new(100));
    }

    #[test]
    fn test_encode_locator() {
        assert_eq!(encode_locator("pve1", "qemu", VmId::new(4213)), "pve1/qemu/4213");
        assert_eq!(Locator::qemu("pve1", VmId::new(101)).encode(), "pve1/qemu/101");
    }

    #[test]
    fn test_decode_empty() {
        let err = Locator::decode("").unwrap_err();
        assert!(err.is_empty());
        assert_eq!(err.input(), None);
    }

    #[rstest]
    #[case("nodeA/qemu", 2)]
    #[case("nodeA", 1)]
    #[case("nodeA/qemu/100/extra", 4)]
    fn test_decode_wrong_segment_count(#[case] input: &str, #[case] expected: usize) {
        match Locator::decode(input).unwrap_err() {
            LocatorError::WrongSegmentCount { input: got, found } => {
                assert_eq!(got, input);
                assert_eq!(found, expected);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[rstest]
    #[case("/qemu/100", 1)]
    #[case("nodeA//100", 2)]
    #[case("nodeA/qemu/", 3)]
    fn test_decode_empty_segment(#[case] input: &str, #[case] expected: usize) {
        assert_eq!(
            Locator::decode(input).unwrap_err(),
            LocatorError::EmptySegment {
                input: input.to_string(),
                position: expected,
            }
        );
    }

    #[rstest]
    #[case("nodeA/qemu/abc")]
    #[case("nodeA/qemu/-1")]
    #[case("nodeA/qemu/+5")]
    #[case("nodeA/qemu/1.5")]
    #[case("nodeA/qemu/ 100")]
    #[case("nodeA/qemu/99999999999")]
    fn test_decode_invalid_id(#[case] input: &str) {
        let err = Locator::decode(input).unwrap_err();
        assert!(matches!(err, LocatorError::InvalidId { .. }), "{err:?}");
        assert_eq!(err.input(), Some(input));
    }

    #[test]
    fn test_from_str() {
        let locator: Locator = "pve2/qemu/0".parse().unwrap();
        assert_eq!(locator.node(), "pve2");
        assert_eq!(locator.kind(), Locator::QEMU_KIND);
        assert_eq!(locator.id().value(), 0);
    }

    #[test]
    fn test_locator_json_roundtrip() {
        let locator = Locator::qemu("pve1", VmId::new(105));
        let json = serde_json::to_string(&locator).unwrap();
        assert_eq!(json, "\"pve1/qemu/105\"");
        let parsed: Locator = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, locator);
    }

    #[test]
    fn test_locator_json_rejects_malformed() {
        let result: Result<Locator, _> = serde_json::from_str("\"pve1/qemu\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_vm_id_next() {
        assert_eq!(VmId::new(100).next(), Some(VmId::new(101)));
        assert_eq!(VmId::new(u32::MAX).next(), None);
    }

    #[test]
    fn test_vm_id_guest_range() {
        assert!(!VmId::new(99).is_guest_range());
        assert!(VmId::MIN.is_guest_range());
        assert!(VmId::MAX.is_guest_range());
        assert!(!VmId::new(1_000_000_000).is_guest_range());
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(
            node in "[A-Za-z0-9._-]{1,24}",
            kind in "[a-z0-9_-]{1,12}",
            id in any::<u32>(),
        ) {
            let encoded = encode_locator(&node, &kind, VmId::new(id));
            let decoded = decode_locator(&encoded).unwrap();
            prop_assert_eq!(decoded, (node, kind, VmId::new(id)));
        }
    }
}
