use serde::Serialize;
use std::fmt;

///
/// ValueKind
///
/// Stable canonical value-variant tag shared by field declarations, the
/// dynamic converter, and the tagged wire encoding.
///
/// IMPORTANT:
/// Tag bytes are part of the wire format and must remain fixed.
///

#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum ValueKind {
    Null = 0,
    Bool = 1,
    I8 = 2,
    I16 = 3,
    I32 = 4,
    I64 = 5,
    U8 = 6,
    U16 = 7,
    U32 = 8,
    U64 = 9,
    F32 = 10,
    F64 = 11,
    Text = 12,
    Bytes = 13,
    Timestamp = 14,
    Nested = 15,
    List = 16,

    /// Declaration-only marker for "any"-typed fields; never appears as a
    /// runtime `Value` kind. The dynamic converter replaces it with the
    /// concrete kind tag on the wire.
    Dynamic = 255,
}

impl ValueKind {
    /// Stable wire byte tag for this variant.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Decode a wire byte tag back into a kind.
    #[must_use]
    pub const fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Null),
            1 => Some(Self::Bool),
            2 => Some(Self::I8),
            3 => Some(Self::I16),
            4 => Some(Self::I32),
            5 => Some(Self::I64),
            6 => Some(Self::U8),
            7 => Some(Self::U16),
            8 => Some(Self::U32),
            9 => Some(Self::U64),
            10 => Some(Self::F32),
            11 => Some(Self::F64),
            12 => Some(Self::Text),
            13 => Some(Self::Bytes),
            14 => Some(Self::Timestamp),
            15 => Some(Self::Nested),
            16 => Some(Self::List),
            255 => Some(Self::Dynamic),
            _ => None,
        }
    }

    /// Stable human-readable label for diagnostics.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::Bool => "Bool",
            Self::I8 => "I8",
            Self::I16 => "I16",
            Self::I32 => "I32",
            Self::I64 => "I64",
            Self::U8 => "U8",
            Self::U16 => "U16",
            Self::U32 => "U32",
            Self::U64 => "U64",
            Self::F32 => "F32",
            Self::F64 => "F64",
            Self::Text => "Text",
            Self::Bytes => "Bytes",
            Self::Timestamp => "Timestamp",
            Self::Nested => "Nested",
            Self::List => "List",
            Self::Dynamic => "Dynamic",
        }
    }

    /// True for kinds that can key a cache entry or an index lookup.
    ///
    /// Floats are excluded on purpose: bit-pattern equality makes a poor
    /// lookup key even though `Value` itself is `Eq`.
    #[must_use]
    pub const fn is_indexable(self) -> bool {
        matches!(
            self,
            Self::Bool
                | Self::I8
                | Self::I16
                | Self::I32
                | Self::I64
                | Self::U8
                | Self::U16
                | Self::U32
                | Self::U64
                | Self::Text
                | Self::Timestamp
        )
    }

    /// True for fixed-width scalar kinds written in their natural byte width.
    #[must_use]
    pub const fn is_fixed_scalar(self) -> bool {
        matches!(
            self,
            Self::Bool
                | Self::I8
                | Self::I16
                | Self::I32
                | Self::I64
                | Self::U8
                | Self::U16
                | Self::U32
                | Self::U64
                | Self::F32
                | Self::F64
                | Self::Timestamp
        )
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
