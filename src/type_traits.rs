use std::sync::LazyLock;

use regex::Regex;

/// How a recognized string-ish type compares against character pointers.
#[derive(Debug)]
pub struct StringTraits {
    pub type_prefixes: &'static [&'static str],
    pub char_type: &'static str,
    pub strncmp: &'static str,
    pub strlen: &'static str,
}

static SUPPORTED_STRING_TYPES: [StringTraits; 4] = [
    StringTraits {
        type_prefixes: &["std::basic_string<char,", "std::basic_string_view<(char),"],
        char_type: "char",
        strncmp: "::__builtin_strncmp",
        strlen: "::__builtin_strlen",
    },
    StringTraits {
        type_prefixes: &["std::basic_string<wchar_t,", "std::basic_string_view<(wchar_t),"],
        char_type: "wchar_t",
        strncmp: "::__builtin_wcsncmp",
        strlen: "::__builtin_wcslen",
    },
    StringTraits {
        type_prefixes: &["TStringView<ANSICHAR>", "TStringView<(char)>"],
        char_type: "char",
        strncmp: "::_strnicmp",
        strlen: "::__builtin_strlen",
    },
    StringTraits {
        type_prefixes: &["TStringView<WIDECHAR>", "TStringView<(wchar_t)>", "FString"],
        char_type: "wchar_t",
        strncmp: "::_wcsnicmp",
        strlen: "::__builtin_wcslen",
    },
];

/// Wildcard string-view registrations fan out into one entry per supported
/// character type.
static STRING_TYPES_SPECIALIZATIONS: [(&str, &[&str]); 2] = [
    (
        "std::basic_string_view<(.*),",
        &[
            "std::basic_string_view<(char),",
            "std::basic_string_view<(wchar_t),",
        ],
    ),
    (
        "TStringView<(.*)>",
        &["TStringView<(char)>", "TStringView<(wchar_t)>"],
    ),
];

/// String traits applying to `type_name`, paired with the (possibly
/// specialized) type name to register the comparators under.
#[must_use]
pub fn get_string_type_traits(type_name: &str) -> Vec<(String, &'static StringTraits)> {
    for (type_prefix, specializations) in &STRING_TYPES_SPECIALIZATIONS {
        if type_name.starts_with(type_prefix) {
            let mut spec_types = Vec::new();
            for specialization in *specializations {
                let specialized = type_name.replacen(type_prefix, specialization, 1);
                spec_types.extend(get_string_type_traits(&specialized));
            }
            return spec_types;
        }
    }

    let mut matched = Vec::new();
    for traits in &SUPPORTED_STRING_TYPES {
        for type_prefix in traits.type_prefixes {
            if type_name.starts_with(type_prefix) {
                matched.push((type_name.to_string(), traits));
            }
        }
    }
    matched
}

static REQUIRED_SUBSCRIPT_TYPES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("^(?:std::basic_string|TArray|TBitArray|TMulticastDelegate)").unwrap()
});

/// Types the evaluator cannot index without a declared `operator[]`.
#[must_use]
pub fn is_subscript_operator_required(type_name: &str) -> bool {
    REQUIRED_SUBSCRIPT_TYPES.is_match(type_name)
}
