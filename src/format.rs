use std::cell::RefCell;
use std::collections::HashMap;

use bitflags::bitflags;
use num_enum::TryFromPrimitive;

/// Basic format specifier occupying the low 6 bits of a format code.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
pub enum BasicFormatSpec {
    Default = 0,
    Decimal,
    Octal,
    Hex,
    HexUppercase,
    HexNoPrefix,
    HexUppercaseNoPrefix,
    Binary,
    BinaryNoPrefix,
    Scientific,
    ScientificMin,
    Character,
    CString,
    CStringNoQuotes,
    Utf8String,
    Utf8StringNoQuotes,
    WideString,
    WideStringNoQuotes,
    Utf32String,
    Utf32StringNoQuotes,
    Enum,
    HeapArray,
    Ignored,
}

impl BasicFormatSpec {
    /// String-like specifiers implicitly convert char pointers/arrays into
    /// string presentations.
    #[must_use]
    pub fn is_string_like(self) -> bool {
        matches!(
            self,
            Self::CString
                | Self::CStringNoQuotes
                | Self::Utf8String
                | Self::Utf8StringNoQuotes
                | Self::WideString
                | Self::WideStringNoQuotes
                | Self::Utf32String
                | Self::Utf32StringNoQuotes
        )
    }
}

bitflags! {
    /// Flag bits of a format code (bits 6..=10).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FormatFlags: u32 {
        const NO_ADDRESS = 1 << 6;
        const NO_DERIVED = 1 << 7;
        const NO_RAW_VIEW = 1 << 8;
        const RAW_VIEW = 1 << 9;
        const AS_ARRAY = 1 << 10;
    }
}

const BASIC_SPECS_MASK: u32 = (1 << 6) - 1;
const CUSTOM_VIEW_SHIFT: u32 = 20;

/// A bit-packed format code: basic spec in bits 0-5, flags in bits 6-10,
/// custom view spec id in bits 20 and up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FormatCode(u32);

impl FormatCode {
    pub const DEFAULT: Self = Self(0);
    pub const RAW_VIEW: Self = Self(FormatFlags::RAW_VIEW.bits());

    /// Flags inherited by child values; `RawView` stays on its value.
    const INHERITED_MASK: u32 = !FormatFlags::RAW_VIEW.bits();

    #[must_use]
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn basic_spec(self) -> BasicFormatSpec {
        BasicFormatSpec::try_from((self.0 & BASIC_SPECS_MASK) as u8)
            .unwrap_or(BasicFormatSpec::Default)
    }

    #[must_use]
    pub fn with_basic_spec(self, spec: BasicFormatSpec) -> Self {
        Self((self.0 & !BASIC_SPECS_MASK) | spec as u32)
    }

    #[must_use]
    pub fn flags(self) -> FormatFlags {
        FormatFlags::from_bits_truncate(self.0)
    }

    #[must_use]
    pub fn with_flags(self, flags: FormatFlags) -> Self {
        Self(self.0 | flags.bits())
    }

    #[must_use]
    pub fn custom_view_id(self) -> u32 {
        self.0 >> CUSTOM_VIEW_SHIFT
    }

    #[must_use]
    pub fn with_custom_view_id(self, view_id: u32) -> Self {
        Self(self.0 | (view_id << CUSTOM_VIEW_SHIFT))
    }

    /// The format a child value starts from, given its parent's format.
    #[must_use]
    pub fn inherited_by_child(self) -> Self {
        Self(self.0 & Self::INHERITED_MASK)
    }
}

impl From<FormatFlags> for FormatCode {
    fn from(flags: FormatFlags) -> Self {
        Self(flags.bits())
    }
}

/// Refresh the dynamic-type preference of a value from its format bits:
/// `NoDerived` pins the static type.
pub fn update_value_dynamic_state(val: &crate::eval::ValueRef) {
    use crate::eval::DynamicValueMode;

    let format = val.non_synthetic().format();
    if format.flags().contains(FormatFlags::NO_DERIVED) {
        val.set_prefer_dynamic(DynamicValueMode::NoDynamicValues);
    } else {
        val.set_prefer_dynamic(DynamicValueMode::DynamicDontRunTarget);
    }
}

/// Apply the inheritable format bits of a parent to a child that carries no
/// format of its own.
pub fn overlay_child_format(child: &crate::eval::ValueRef, parent_format: FormatCode) {
    let root = crate::eval::get_root_value(child);
    if root.format() == FormatCode::DEFAULT {
        root.set_format(parent_format.inherited_by_child());
    }
}

/// Summaries (unlike children) keep the array re-presentation of the
/// context value.
pub fn overlay_summary_format(result: &crate::eval::ValueRef, ctx: &crate::eval::ValueRef) {
    let ctx_format = crate::eval::get_root_value(ctx).format();
    if ctx_format.flags().contains(FormatFlags::AS_ARRAY) {
        let root = crate::eval::get_root_value(result);
        root.set_format(root.format().with_flags(FormatFlags::AS_ARRAY));
    }
}

thread_local! {
    static VIEW_SPEC_IDS: RefCell<HashMap<String, u32>> = RefCell::new(HashMap::new());
}

/// Id of a named custom view (`IncludeView`/`ExcludeView`); ids are handed
/// out sequentially per unique name, the empty name is always 0.
#[must_use]
pub fn custom_view_id_by_name(view_name: &str) -> u32 {
    if view_name.is_empty() {
        return 0;
    }
    VIEW_SPEC_IDS.with_borrow_mut(|ids| {
        let next_id = ids.len() as u32 + 1;
        *ids.entry(view_name.to_string()).or_insert(next_id)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_code_packing() {
        let code = FormatCode::DEFAULT
            .with_basic_spec(BasicFormatSpec::Hex)
            .with_flags(FormatFlags::NO_RAW_VIEW)
            .with_custom_view_id(3);
        assert_eq!(code.basic_spec(), BasicFormatSpec::Hex);
        assert!(code.flags().contains(FormatFlags::NO_RAW_VIEW));
        assert_eq!(code.custom_view_id(), 3);
    }

    #[test]
    fn test_child_inheritance_drops_raw_view() {
        let code = FormatCode::from(FormatFlags::RAW_VIEW | FormatFlags::NO_ADDRESS);
        let inherited = code.inherited_by_child();
        assert!(!inherited.flags().contains(FormatFlags::RAW_VIEW));
        assert!(inherited.flags().contains(FormatFlags::NO_ADDRESS));
    }

    #[test]
    fn test_view_ids_are_stable() {
        let a = custom_view_id_by_name("simple");
        let b = custom_view_id_by_name("detailed");
        assert_eq!(custom_view_id_by_name("simple"), a);
        assert_ne!(a, b);
        assert_eq!(custom_view_id_by_name(""), 0);
    }
}
