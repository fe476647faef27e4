use std::fmt;
use std::rc::Rc;

use crate::format::{BasicFormatSpec, FormatFlags, custom_view_id_by_name};
use crate::intrinsics::IntrinsicsScope;
use crate::schema::nodes::ItemProvider;
use crate::template::{self, TypeNameTemplate};

/// A raw type name paired with its parsed template.
#[derive(Debug, Clone)]
pub struct TypeVizName {
    pub type_name: String,
    pub template: TypeNameTemplate,
}

impl TypeVizName {
    pub fn parse(type_name: &str) -> Result<Self, template::Error> {
        Ok(Self {
            type_name: type_name.to_string(),
            template: TypeNameTemplate::parse(type_name)?,
        })
    }

    #[must_use]
    pub fn has_wildcard(&self) -> bool {
        self.template.has_wildcard()
    }
}

impl fmt::Display for TypeVizName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.type_name)
    }
}

/// Per-expression view options parsed from a natvis format specifier.
#[derive(Debug, Clone, Default)]
pub struct FormatOptions {
    /// Expression yielding the element count for array presentation.
    pub array_size: Option<String>,
    pub format_spec: Option<BasicFormatSpec>,
    pub format_flags: FormatFlags,
    pub view_spec_id: u32,
}

/// A C++ expression together with its view options.
#[derive(Debug, Clone)]
pub struct TypeVizExpression {
    pub text: String,
    pub view_options: FormatOptions,
}

impl TypeVizExpression {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            view_options: FormatOptions::default(),
        }
    }
}

/// Condition guarding a node: an optional boolean expression plus
/// include/exclude view restrictions.
#[derive(Debug, Clone, Default)]
pub struct TypeVizCondition {
    pub condition: Option<String>,
    pub include_view_id: u32,
    pub exclude_view_id: u32,
}

impl TypeVizCondition {
    #[must_use]
    pub fn expression(condition: impl Into<String>) -> Self {
        Self {
            condition: Some(condition.into()),
            ..Self::default()
        }
    }
}

/// A display string with embedded `{expression}` holes, stored as
/// (literal, expression) pairs.
#[derive(Debug, Clone, Default)]
pub struct InterpolatedString {
    pub parts: Vec<(String, Option<TypeVizExpression>)>,
}

impl InterpolatedString {
    #[must_use]
    pub fn new(parts: Vec<(String, Option<TypeVizExpression>)>) -> Self {
        Self { parts }
    }

    /// Split a `text {expr} text` display string. Doubled braces escape a
    /// literal brace; format specifiers inside holes are the loader's
    /// business and are kept in the expression text verbatim.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = text.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut expr = String::new();
                    let mut depth = 1;
                    for inner in chars.by_ref() {
                        match inner {
                            '{' => depth += 1,
                            '}' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        }
                        expr.push(inner);
                    }
                    parts.push((
                        std::mem::take(&mut literal),
                        Some(TypeVizExpression::new(expr)),
                    ));
                }
                _ => literal.push(ch),
            }
        }
        if !literal.is_empty() || parts.is_empty() {
            parts.push((literal, None));
        }
        Self { parts }
    }
}

/// One `<DisplayString>` candidate.
#[derive(Debug, Clone)]
pub struct TypeVizSummary {
    pub condition: Option<TypeVizCondition>,
    pub value: InterpolatedString,
    pub optional: bool,
}

/// How much of the smart-pointer protocol a `<SmartPointer>` directive
/// requests. The natvis `Full` usage is documented as unsupported and is
/// downgraded to `Indexable` at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmartPointerUsage {
    Minimal,
    Indexable,
}

impl SmartPointerUsage {
    #[must_use]
    pub fn parse(usage: &str) -> Self {
        match usage {
            "Minimal" => Self::Minimal,
            // 'Full' needs a conversion operator the evaluator cannot
            // declare; treat it as 'Indexable'
            _ => Self::Indexable,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TypeVizSmartPointer {
    pub expression: TypeVizExpression,
    pub usage: SmartPointerUsage,
}

#[derive(Debug, Clone)]
pub struct TypeVizStringView {
    pub expression: TypeVizExpression,
    pub condition: Option<TypeVizCondition>,
}

/// One `<Type>` rule: name templates, summaries, item providers,
/// intrinsics and ancillary directives. Created by the loader and immutable
/// afterwards, except for `item_providers`, which storage may deep-copy
/// during visualizer detachment.
#[derive(Debug, Clone)]
pub struct TypeViz {
    pub type_viz_names: Vec<TypeVizName>,
    pub is_inheritable: bool,
    pub include_view: String,
    pub include_view_id: u32,
    pub exclude_view: String,
    pub exclude_view_id: u32,
    pub priority: i32,
    pub summaries: Vec<TypeVizSummary>,
    pub item_providers: Option<Vec<Rc<ItemProvider>>>,
    pub global_intrinsics: Rc<IntrinsicsScope>,
    pub type_intrinsics: Rc<IntrinsicsScope>,
    pub hide_raw_view: bool,
    pub smart_pointer: Option<TypeVizSmartPointer>,
    pub string_views: Vec<TypeVizStringView>,
}

impl TypeViz {
    #[must_use]
    pub fn new(
        type_viz_names: Vec<TypeVizName>,
        is_inheritable: bool,
        include_view: String,
        exclude_view: String,
        priority: i32,
        global_intrinsics: Rc<IntrinsicsScope>,
        type_intrinsics: Rc<IntrinsicsScope>,
    ) -> Self {
        let include_view_id = custom_view_id_by_name(&include_view);
        let exclude_view_id = custom_view_id_by_name(&exclude_view);
        Self {
            type_viz_names,
            is_inheritable,
            include_view,
            include_view_id,
            exclude_view,
            exclude_view_id,
            priority,
            summaries: Vec::new(),
            item_providers: None,
            global_intrinsics,
            type_intrinsics,
            hide_raw_view: false,
            smart_pointer: None,
            string_views: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolated_string_parse() {
        let parsed = InterpolatedString::parse("size={n}, cap={m}!");
        assert_eq!(parsed.parts.len(), 3);
        assert_eq!(parsed.parts[0].0, "size=");
        assert_eq!(parsed.parts[0].1.as_ref().unwrap().text, "n");
        assert_eq!(parsed.parts[1].0, ", cap=");
        assert_eq!(parsed.parts[1].1.as_ref().unwrap().text, "m");
        assert_eq!(parsed.parts[2].0, "!");
        assert!(parsed.parts[2].1.is_none());
    }

    #[test]
    fn test_interpolated_string_escapes() {
        let parsed = InterpolatedString::parse("{{literal}} {x}");
        assert_eq!(parsed.parts[0].0, "{literal} ");
        assert_eq!(parsed.parts[0].1.as_ref().unwrap().text, "x");
    }

    #[test]
    fn test_smart_pointer_full_downgrades() {
        assert_eq!(
            SmartPointerUsage::parse("Full"),
            SmartPointerUsage::Indexable
        );
        assert_eq!(
            SmartPointerUsage::parse("Minimal"),
            SmartPointerUsage::Minimal
        );
    }
}
