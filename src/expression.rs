use crate::cpp;
use crate::eval::{EvalError, TypeClass, TypeRef, ValueRef};
use crate::methods::SyntheticMethodCall;

/// Maintains the debuggable C++ path of every produced child value, stored
/// in value metadata so re-evaluating the path yields the same value.
pub struct ItemExpression;

impl ItemExpression {
    pub const EXPRESSION_KEY: &'static str = "com.jetbrains.item.expression";
    pub const INVALID_EXPRESSION: &'static str = "/* Cannot make a path to the item. */";

    const MAX_EXPRESSION_LENGTH: usize = 1024;

    fn type_expression_named(value_type: &TypeRef, original_type_name: Option<String>) -> String {
        let type_name = original_type_name.unwrap_or_else(|| value_type.name());
        match value_type.type_class() {
            TypeClass::Class => cpp::insert_type_class_specifier(&type_name, "class"),
            TypeClass::Enumeration => cpp::insert_type_class_specifier(&type_name, "enum"),
            TypeClass::Struct => cpp::insert_type_class_specifier(&type_name, "struct"),
            TypeClass::Union => cpp::insert_type_class_specifier(&type_name, "union"),
            TypeClass::Reference => match value_type.dereferenced_type() {
                Some(inner) => Self::type_expression_named(&inner, Some(type_name)),
                None => type_name,
            },
            TypeClass::Pointer => match value_type.pointee_type() {
                Some(inner) => Self::type_expression_named(&inner, Some(type_name)),
                None => type_name,
            },
            TypeClass::Array | TypeClass::Vector => match value_type.element_type() {
                Some(inner) => Self::type_expression_named(&inner, Some(type_name)),
                None => type_name,
            },
            _ => type_name,
        }
    }

    fn type_expression(value_type: &TypeRef) -> String {
        Self::type_expression_named(value_type, None)
    }

    fn is_cast_allowed(value_type: &TypeRef) -> bool {
        !value_type.is_anonymous() && !cpp::has_lambda_in_type_expr(&value_type.name())
    }

    fn save_item_expression(non_synth: &ValueRef, expression: &str) -> String {
        let mut expression = if expression.len() >= Self::MAX_EXPRESSION_LENGTH {
            Self::as_raw_reference(non_synth)
        } else {
            expression.to_string()
        };

        if non_synth.is_dynamic() {
            if let Some(static_value) = non_synth.static_value() {
                let static_non_synth = static_value.non_synthetic();
                if static_non_synth.is_valid() {
                    static_non_synth.set_metadata(Self::EXPRESSION_KEY, &expression);
                    let dynamic_type = non_synth.value_type();
                    let static_type_name = static_non_synth.type_name();
                    if expression != Self::INVALID_EXPRESSION
                        && static_type_name != dynamic_type.name()
                    {
                        let is_ptr = dynamic_type.is_pointer();
                        let is_ref = dynamic_type.is_reference();
                        let original_dynamic_type = if is_ptr {
                            dynamic_type.pointee_type().unwrap_or_else(|| dynamic_type.clone())
                        } else if is_ref {
                            dynamic_type
                                .dereferenced_type()
                                .unwrap_or_else(|| dynamic_type.clone())
                        } else {
                            dynamic_type.clone()
                        };
                        if Self::is_cast_allowed(&original_dynamic_type) {
                            let ref_char = if is_ptr || is_ref { "" } else { " &" };
                            let type_expr = Self::type_expression(&dynamic_type);
                            expression = format!("(({type_expr}{ref_char}) {expression})");
                        } else {
                            expression = Self::INVALID_EXPRESSION.to_string();
                        }
                    }
                }
            }
        }

        non_synth.set_metadata(Self::EXPRESSION_KEY, &expression);
        expression
    }

    fn get_or_create_expression(non_synth: &ValueRef) -> String {
        if let Some(expression) = non_synth.metadata(Self::EXPRESSION_KEY) {
            if !expression.is_empty() {
                return expression;
            }
        }
        if non_synth.is_dynamic() {
            if let Some(static_value) = non_synth.static_value() {
                if let Some(expression) =
                    static_value.non_synthetic().metadata(Self::EXPRESSION_KEY)
                {
                    if !expression.is_empty() {
                        return Self::save_item_expression(non_synth, &expression);
                    }
                }
            }
        }
        if let Some(path) = non_synth.path().filter(|path| !path.is_empty()) {
            return Self::save_item_expression(non_synth, &path);
        }
        let raw = Self::as_raw_reference(non_synth);
        Self::save_item_expression(non_synth, &raw)
    }

    fn as_raw_reference(non_synth: &ValueRef) -> String {
        let value_type = non_synth.value_type();
        if Self::is_cast_allowed(&value_type) {
            if let Some(address) = non_synth.address() {
                let type_expr = Self::type_expression(&value_type.pointer_type());
                return format!("(*({type_expr})({address:#x}))");
            }
            if value_type.is_pointer() {
                let type_expr = Self::type_expression(&value_type);
                let pointer_value = non_synth.value_string().unwrap_or_default();
                return format!("(({type_expr})({pointer_value}))");
            }
        }
        Self::INVALID_EXPRESSION.to_string()
    }

    fn this_reference(non_synth: &ValueRef) -> String {
        let this_ref = Self::get_or_create_expression(non_synth);
        if this_ref != Self::INVALID_EXPRESSION {
            return this_ref;
        }
        Self::as_raw_reference(non_synth)
    }

    fn update_dereference_metadata(
        value_deref: &ValueRef,
        value_ptr: &ValueRef,
        allow_deref_star: bool,
    ) {
        let non_synth_deref = value_deref.non_synthetic();
        let non_synth_ptr = value_ptr.non_synthetic();
        if !non_synth_deref.is_valid() || !non_synth_ptr.is_valid() {
            return;
        }
        let expression = Self::get_or_create_expression(&non_synth_ptr);
        let ptr_is_pointer = non_synth_ptr.value_type().is_pointer();
        if expression != Self::INVALID_EXPRESSION {
            if allow_deref_star && ptr_is_pointer {
                let deref_expr = format!("(*{expression})");
                let merged = cpp::try_merge_deref_and_address_of(&deref_expr);
                Self::save_item_expression(&non_synth_deref, merged);
            } else {
                Self::save_item_expression(&non_synth_deref, &expression);
            }
            return;
        }

        if ptr_is_pointer && !Self::is_cast_allowed(&non_synth_deref.value_type()) {
            let type_expr = Self::type_expression(&non_synth_ptr.value_type());
            let pointer_value = non_synth_ptr.value_string().unwrap_or_default();
            let raw_ptr_deref = format!("(*({type_expr}){pointer_value})");
            Self::save_item_expression(&non_synth_deref, &raw_ptr_deref);
            return;
        }

        Self::save_item_expression(&non_synth_deref, Self::INVALID_EXPRESSION);
    }

    fn explicit_up_cast_for_base_class(inheritor_value: &ValueRef, base_class_value: &ValueRef) {
        let non_synth_inheritor = inheritor_value.non_synthetic();
        let non_synth_base = base_class_value.non_synthetic();
        if !non_synth_inheritor.is_valid() || !non_synth_base.is_valid() {
            return;
        }

        let base_class_type = base_class_value.value_type();
        if base_class_type.is_anonymous() {
            // anonymous bases inherit the parent expression verbatim
            Self::copy_item_expression(&non_synth_inheritor, &non_synth_base);
            return;
        }

        let this_ref = Self::this_reference(&non_synth_inheritor);
        if this_ref == Self::INVALID_EXPRESSION {
            Self::save_item_expression(&non_synth_base, Self::INVALID_EXPRESSION);
            return;
        }

        let type_expr = Self::type_expression(&base_class_type);
        Self::save_item_expression(&non_synth_base, &format!("(({type_expr} &) {this_ref})"));
    }

    /// Dereference a pointer value, keeping the child's path debuggable
    /// (and merging `*` with a trailing `&(X)`).
    pub fn dereference(value_ptr: &ValueRef) -> Result<ValueRef, EvalError> {
        let value_deref = value_ptr.dereference()?;
        Self::update_dereference_metadata(&value_deref, value_ptr, true);
        Ok(value_deref)
    }

    /// Reinterpret a pointer (or array) value as a pointer to `T[size]` and
    /// dereference it; the array-presentation path of `ArrayItems`.
    pub fn cast_value_to_array(
        non_synth: &ValueRef,
        is_array: bool,
        array_size: usize,
    ) -> Result<ValueRef, EvalError> {
        let val_type = non_synth.value_type();
        let (elem_type, base_value) = if is_array {
            let elem_type = val_type
                .element_type()
                .ok_or_else(|| EvalError::runtime("value is not of array type"))?;
            (elem_type, non_synth.address_of()?)
        } else {
            let elem_type = val_type
                .pointee_type()
                .ok_or_else(|| EvalError::runtime("value is not of pointer type"))?;
            (elem_type, non_synth.clone())
        };

        let array_pointer_type = elem_type.array_type(array_size).pointer_type();
        let casted_ptr = base_value.cast(&array_pointer_type)?;
        Self::copy_item_expression(&base_value, &casted_ptr);

        let value_deref = casted_ptr.dereference()?;
        Self::update_dereference_metadata(&value_deref, &casted_ptr, is_array);
        Ok(value_deref)
    }

    /// `&array`: the pointer inherits the array's expression.
    pub fn array_address_of(value_array: &ValueRef) -> Result<ValueRef, EvalError> {
        let non_synth_array = value_array.non_synthetic();
        let value_ptr = non_synth_array.address_of()?;
        let non_synth_ptr = value_ptr.non_synthetic();
        if non_synth_ptr.is_valid() && non_synth_array.is_valid() {
            let expression = Self::get_or_create_expression(&non_synth_array);
            Self::save_item_expression(&non_synth_ptr, &expression);
        }
        Ok(value_ptr)
    }

    /// Record the path of a native struct child: dereference for pointer
    /// parents, verbatim copy for anonymous members, up-cast for base-class
    /// subobjects, member access otherwise.
    pub fn update_struct_child_item_expression(child_value: &ValueRef, struct_value: &ValueRef) {
        if struct_value.value_type().is_pointer() {
            Self::update_dereference_metadata(child_value, struct_value, true);
            return;
        }
        if child_value.value_type().is_anonymous() {
            Self::copy_item_expression(struct_value, child_value);
            return;
        }
        if struct_value.path().is_some() && struct_value.path() == child_value.path() {
            Self::explicit_up_cast_for_base_class(struct_value, child_value);
            return;
        }

        match child_value.name() {
            None => Self::invalidate_item_expression(child_value),
            Some(child_name) => {
                Self::update_item_expression(child_value, struct_value, &child_name, None);
            }
        }
    }

    pub fn copy_item_expression(from_value: &ValueRef, to_value: &ValueRef) {
        let non_synth_from = from_value.non_synthetic();
        let non_synth_to = to_value.non_synthetic();
        if non_synth_to.is_valid() && non_synth_from.is_valid() {
            let expression = Self::get_or_create_expression(&non_synth_from);
            Self::save_item_expression(&non_synth_to, &expression);
        }
    }

    pub fn invalidate_item_expression(value: &ValueRef) {
        let non_synth = value.non_synthetic();
        if non_synth.is_valid() {
            Self::save_item_expression(&non_synth, Self::INVALID_EXPRESSION);
        }
    }

    /// Compose the path of an item produced by evaluating `expression`
    /// against `context_value`; registered synthetic getters win over the
    /// raw expression.
    pub fn update_item_expression(
        item_value: &ValueRef,
        context_value: &ValueRef,
        expression: &str,
        getter_call: Option<&SyntheticMethodCall>,
    ) {
        let non_synth_item = item_value.non_synthetic();
        let non_synth_context = context_value.non_synthetic();
        if !non_synth_item.is_valid() || !non_synth_context.is_valid() {
            return;
        }

        let simplified = cpp::simplify_cpp_expression(expression);

        let this_ref = Self::this_reference(&non_synth_context);
        if this_ref == Self::INVALID_EXPRESSION {
            let raw = Self::as_raw_reference(&non_synth_item);
            Self::save_item_expression(&non_synth_item, &raw);
            return;
        }
        if simplified == "this" {
            Self::save_item_expression(&non_synth_item, &format!("(&{this_ref})"));
            return;
        }
        if let Some(getter_call) = getter_call {
            let call_expr = getter_call.make_call_expr(&this_ref);
            Self::save_item_expression(&non_synth_item, &call_expr);
            return;
        }
        if cpp::is_array_access_expr(&simplified) {
            Self::save_item_expression(&non_synth_item, &format!("{this_ref}{simplified}"));
            return;
        }
        if cpp::is_trivial_expression(&simplified) {
            Self::save_item_expression(&non_synth_item, &format!("{this_ref}.{simplified}"));
            return;
        }
        if let Some((specifier, sub_expression)) =
            cpp::cut_deref_or_address_of_from_trivial(&simplified)
        {
            Self::save_item_expression(
                &non_synth_item,
                &format!("({specifier}({this_ref}.{sub_expression}))"),
            );
            return;
        }
        let raw = Self::as_raw_reference(&non_synth_item);
        Self::save_item_expression(&non_synth_item, &raw);
    }
}
