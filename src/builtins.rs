use std::rc::Rc;

use log::debug;

use crate::dispatch::{Engine, VisDescriptor};
use crate::eval::{EvalError, TypeClass, TypeRef, ValueRef};
use crate::expression::ItemExpression;
use crate::format::{BasicFormatSpec, FormatFlags, update_value_dynamic_state};
use crate::providers::{ChildrenProvider, INVALID_CHILD_INDEX, UpdateResult};
use crate::stream::Stream;

const CHAR_TYPES: [&str; 6] = ["char", "signed char", "unsigned char", "wchar_t", "char16_t", "char32_t"];
const NUMERIC_TYPES: [&str; 16] = [
    "short",
    "unsigned short",
    "int",
    "unsigned int",
    "long",
    "unsigned long",
    "long long",
    "unsigned long long",
    "float",
    "double",
    "long double",
    "bool",
    "size_t",
    "ssize_t",
    "ptrdiff_t",
    "intptr_t",
];

/// Fallback visualizer shapes for values no natvis rule matched. Only the
/// dispatch shape lives here; the presentation stays close to what the
/// host would print natively.
pub enum BuiltinDescriptor {
    Number,
    Char,
    CharArrayOrPointer {
        is_array: bool,
        array_size: Option<usize>,
    },
    GenericArray,
    GenericPointer {
        pointee_expands: bool,
        pointee_has_empty_description: bool,
    },
    GenericReference,
    Lambda {
        lambda_name: String,
    },
    Struct,
}

impl BuiltinDescriptor {
    pub fn output_summary(
        &self,
        engine: &Rc<Engine>,
        value_non_synth: &ValueRef,
        stream: &mut Stream,
    ) -> Result<(), EvalError> {
        match self {
            Self::Number => {
                stream.output_number(&value_non_synth.value_string().unwrap_or_default());
            }
            Self::Char => {
                stream.output_value(&value_non_synth.value_string().unwrap_or_default());
            }
            Self::CharArrayOrPointer { .. } => {
                let summary = value_non_synth
                    .value_string()
                    .unwrap_or_default();
                stream.output_string(&summary);
            }
            Self::GenericArray | Self::Struct => {
                let mut provider = StructChildrenProvider::new(value_non_synth.clone());
                engine.summarize_children(&mut provider, stream);
            }
            Self::GenericPointer {
                pointee_expands,
                pointee_has_empty_description,
            } => {
                let no_address = value_non_synth
                    .format()
                    .flags()
                    .contains(FormatFlags::NO_ADDRESS);
                if !no_address {
                    let address = value_non_synth.value_as_unsigned().unwrap_or(0);
                    stream.output_address(address);
                }
                if *pointee_expands && !pointee_has_empty_description {
                    if value_non_synth.value_as_unsigned().unwrap_or(0) == 0 {
                        return Ok(());
                    }
                    if !no_address {
                        stream.output(" ");
                    }
                    let pointee = ItemExpression::dereference(value_non_synth)?;
                    engine.output_object(stream, &pointee.non_synthetic());
                }
            }
            Self::GenericReference => {
                let referenced = value_non_synth.dereference()?;
                engine.output_object(stream, &referenced.non_synthetic());
            }
            Self::Lambda { lambda_name } => {
                stream.output_comment(lambda_name);
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn prepare_children(
        &self,
        _engine: &Rc<Engine>,
        value_non_synth: &ValueRef,
    ) -> Box<dyn ChildrenProvider> {
        match self {
            Self::GenericPointer {
                pointee_expands: true,
                ..
            } => Box::new(PointerChildrenProvider::new(value_non_synth.clone())),
            _ => Box::new(StructChildrenProvider::new(value_non_synth.clone())),
        }
    }
}

/// Native members of a value, with item expressions kept debuggable.
pub struct StructChildrenProvider {
    value: ValueRef,
}

impl StructChildrenProvider {
    #[must_use]
    pub fn new(value: ValueRef) -> Self {
        Self { value }
    }
}

impl ChildrenProvider for StructChildrenProvider {
    fn num_children(&mut self) -> usize {
        self.value.num_children()
    }

    fn get_child_index(&mut self, name: &str) -> usize {
        self.value
            .index_of_child_with_name(name)
            .unwrap_or(INVALID_CHILD_INDEX)
    }

    fn get_child_at_index(&mut self, index: usize) -> Result<ValueRef, EvalError> {
        let child = self
            .value
            .child_at_index(index)
            .ok_or_else(|| EvalError::runtime(format!("no child at index {index}")))?;
        update_value_dynamic_state(&child);
        ItemExpression::update_struct_child_item_expression(&child, &self.value);
        Ok(child)
    }

    fn try_update_size(&mut self, _value_non_synth: &ValueRef) -> UpdateResult {
        UpdateResult::empty()
    }
}

/// Children of a non-null pointer are the children of the pointee.
struct PointerChildrenProvider {
    value: ValueRef,
    pointee: Option<ValueRef>,
}

impl PointerChildrenProvider {
    fn new(value: ValueRef) -> Self {
        Self {
            value,
            pointee: None,
        }
    }

    fn pointee(&mut self) -> Option<ValueRef> {
        if self.pointee.is_none() {
            if self.value.value_as_unsigned().unwrap_or(0) == 0 {
                return None;
            }
            self.pointee = ItemExpression::dereference(&self.value).ok();
        }
        self.pointee.clone()
    }
}

impl ChildrenProvider for PointerChildrenProvider {
    fn num_children(&mut self) -> usize {
        self.pointee()
            .map(|pointee| pointee.num_children())
            .unwrap_or(0)
    }

    fn get_child_index(&mut self, name: &str) -> usize {
        self.pointee()
            .and_then(|pointee| pointee.index_of_child_with_name(name))
            .unwrap_or(INVALID_CHILD_INDEX)
    }

    fn get_child_at_index(&mut self, index: usize) -> Result<ValueRef, EvalError> {
        let pointee = self
            .pointee()
            .ok_or_else(|| EvalError::runtime("null pointer has no children"))?;
        let child = pointee
            .child_at_index(index)
            .ok_or_else(|| EvalError::runtime(format!("no child at index {index}")))?;
        update_value_dynamic_state(&child);
        ItemExpression::update_struct_child_item_expression(&child, &pointee);
        Ok(child)
    }
}

fn try_extract_lambda_type_name(type_name: &str) -> Option<String> {
    let idx = type_name.rfind("<lambda_")?;
    if !type_name.ends_with('>') {
        return None;
    }
    if idx == 0 {
        return Some(type_name.to_string());
    }
    let extracted = &type_name[idx + "<lambda_".len()..type_name.len() - 1];
    if extracted.is_empty() || !extracted.chars().all(char::is_alphanumeric) {
        return None;
    }
    Some(type_name[idx..].to_string())
}

/// Builtin dispatch for values without natvis rules: typedef unwrapping,
/// char/number scalars, char arrays and pointers, generic
/// pointers/references/arrays, base-class natvis inheritance, lambda and
/// struct displays.
pub fn try_get_matched_builtin_visualizer(
    engine: &Rc<Engine>,
    value_type: &TypeRef,
    natvis_enabled: bool,
    basic_spec: BasicFormatSpec,
) -> Option<VisDescriptor> {
    let value_type_name = value_type.name();
    debug!("Trying to find builtin visualizer for type: '{value_type_name}'");

    let type_class = value_type.type_class();
    if type_class == TypeClass::Typedef {
        if let Some(typedefed) = value_type.typedefed_type() {
            let typedefed_name = typedefed.name();
            debug!("Type '{value_type_name}' is typedef to type '{typedefed_name}'");
            if typedefed_name != value_type_name {
                return engine.try_get_matched_visualizers(&typedefed, natvis_enabled, basic_spec);
            }
        }
    }

    if type_class == TypeClass::Builtin {
        // with a string format spec, some integers present as char pointers
        if basic_spec.is_string_like() {
            return Some(VisDescriptor::Builtin(
                BuiltinDescriptor::CharArrayOrPointer {
                    is_array: false,
                    array_size: None,
                },
            ));
        }
        if CHAR_TYPES.contains(&value_type_name.as_str()) {
            return Some(VisDescriptor::Builtin(BuiltinDescriptor::Char));
        }
        if NUMERIC_TYPES.contains(&value_type_name.as_str()) {
            return Some(VisDescriptor::Builtin(BuiltinDescriptor::Number));
        }
    }

    if type_class == TypeClass::Array {
        if let Some(element_type) = value_type.element_type() {
            if CHAR_TYPES.contains(&element_type.name().as_str()) {
                let element_size = element_type.byte_size().max(1);
                let array_size = value_type.byte_size() / element_size;
                return Some(VisDescriptor::Builtin(
                    BuiltinDescriptor::CharArrayOrPointer {
                        is_array: true,
                        array_size: Some(array_size),
                    },
                ));
            }
        }
        return Some(VisDescriptor::Builtin(BuiltinDescriptor::GenericArray));
    }

    if type_class == TypeClass::Pointer {
        let pointee_type = value_type.pointee_type()?;
        let pointee_type_name = pointee_type.name();
        if CHAR_TYPES.contains(&pointee_type_name.as_str()) {
            return Some(VisDescriptor::Builtin(
                BuiltinDescriptor::CharArrayOrPointer {
                    is_array: false,
                    array_size: None,
                },
            ));
        }
        let pointee_type_class = pointee_type.type_class();
        let pointee_expands = matches!(
            pointee_type_class,
            TypeClass::Struct | TypeClass::Class | TypeClass::Union
        );
        let pointee_has_empty_description =
            pointee_type_name == "void" || pointee_type_class == TypeClass::Function;
        return Some(VisDescriptor::Builtin(BuiltinDescriptor::GenericPointer {
            pointee_expands,
            pointee_has_empty_description,
        }));
    }

    if type_class == TypeClass::Reference {
        return Some(VisDescriptor::Builtin(BuiltinDescriptor::GenericReference));
    }

    if matches!(
        type_class,
        TypeClass::Struct | TypeClass::Class | TypeClass::Union
    ) {
        if natvis_enabled {
            if let Some(natvis) = engine.find_matched_natvis_visualizer_for_base(value_type) {
                return Some(VisDescriptor::NatVis(natvis));
            }
        }
        if let Some(lambda_name) = try_extract_lambda_type_name(&value_type_name) {
            return Some(VisDescriptor::Builtin(BuiltinDescriptor::Lambda {
                lambda_name,
            }));
        }
        return Some(VisDescriptor::Builtin(BuiltinDescriptor::Struct));
    }

    // no matching builtin descriptor
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_lambda_type_name() {
        assert_eq!(
            try_extract_lambda_type_name("ns::outer::<lambda_1234>"),
            Some("<lambda_1234>".to_string())
        );
        assert_eq!(
            try_extract_lambda_type_name("<lambda_0>"),
            Some("<lambda_0>".to_string())
        );
        assert_eq!(try_extract_lambda_type_name("Vec<int>"), None);
        assert_eq!(try_extract_lambda_type_name("<lambda_1> x"), None);
    }
}
