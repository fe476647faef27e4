use std::rc::Rc;

use crate::dispatch::Engine;
use crate::eval::{EvalError, EvalSettings, TypeRef, ValueRef, resolve_type_wildcards};
use crate::expression::ItemExpression;
use crate::methods::SyntheticMethod;
use crate::providers::{
    ChildrenProvider, UpdateResult, calculate_items_provider_size,
    evaluate_expression_and_apply_formatting, node_condition_holds, optional_node,
    parse_child_index_name,
};
use crate::schema::nodes::{ArrayItemsNode, ItemProvider, ValuePointerNode};

/// `<ArrayItems>`: children synthesised at `i * sizeof(elem)` offsets off
/// the winning value pointer.
pub struct ArrayItemsProvider {
    engine: Rc<Engine>,
    item_provider: Rc<ItemProvider>,
    size: usize,
    value_pointer: ValueRef,
    elem_type: TypeRef,
    elem_byte_size: usize,
    wildcards: Vec<String>,
    element_getter: Option<SyntheticMethod>,
}

impl ChildrenProvider for ArrayItemsProvider {
    fn num_children(&mut self) -> usize {
        self.size
    }

    fn get_child_index(&mut self, name: &str) -> usize {
        parse_child_index_name(name)
    }

    fn get_child_at_index(&mut self, index: usize) -> Result<ValueRef, EvalError> {
        let child_name = format!("[{index}]");
        let offset = index * self.elem_byte_size;
        let child = self
            .value_pointer
            .create_child_at_offset(&child_name, offset, &self.elem_type)?;
        let getter_call = self
            .element_getter
            .as_ref()
            .map(|getter| getter.call(vec![index.to_string()]));
        ItemExpression::update_item_expression(
            &child,
            &self.value_pointer,
            &child_name,
            getter_call.as_ref(),
        );
        Ok(child)
    }

    fn try_update_size(&mut self, value_non_synth: &ValueRef) -> UpdateResult {
        let ItemProvider::ArrayItems(node) = &*self.item_provider else {
            return UpdateResult::empty();
        };
        let rebuilt = build_array_items_provider(
            &self.engine,
            Rc::clone(&self.item_provider),
            node,
            value_non_synth,
            &self.wildcards,
        );
        // a failed rebuild usually means every provider needs rebuilding;
        // that is the caller's rare path
        let Ok(Some(new_provider)) = rebuilt else {
            return UpdateResult::empty();
        };
        let old_size = self.size;
        self.size = new_provider.size;
        self.value_pointer = new_provider.value_pointer;
        debug_assert_eq!(self.elem_type.name(), new_provider.elem_type.name());
        self.elem_type = new_provider.elem_type;
        self.elem_byte_size = new_provider.elem_byte_size;
        self.element_getter = new_provider.element_getter;
        if old_size != self.size {
            UpdateResult::SIZE_UPDATED
        } else {
            UpdateResult::empty()
        }
    }
}

fn process_value_pointer_node(
    engine: &Rc<Engine>,
    value_pointer_node: &ValuePointerNode,
    ctx_val: &ValueRef,
    wildcards: &[String],
) -> Result<Option<ValueRef>, EvalError> {
    if !node_condition_holds(
        engine,
        value_pointer_node.condition.as_ref(),
        ctx_val,
        wildcards,
        None,
    )? {
        return Ok(None);
    }
    let expression = resolve_type_wildcards(&value_pointer_node.expr.text, wildcards);
    let settings = EvalSettings::with_metadata(None);
    let value = evaluate_expression_and_apply_formatting(
        engine,
        ctx_val,
        &expression,
        &settings,
        &value_pointer_node.expr.view_options,
        wildcards,
        None,
    )?;
    Ok(Some(value))
}

fn build_array_items_provider(
    engine: &Rc<Engine>,
    item_provider: Rc<ItemProvider>,
    node: &ArrayItemsNode,
    ctx_val: &ValueRef,
    wildcards: &[String],
) -> Result<Option<ArrayItemsProvider>, EvalError> {
    if !node_condition_holds(engine, node.condition.as_ref(), ctx_val, wildcards, None)? {
        return Ok(None);
    }

    let size = calculate_items_provider_size(engine, &node.size_nodes, ctx_val, wildcards)?
        .ok_or_else(|| EvalError::runtime("No valid Size node found"))?;

    let mut found: Option<(ValueRef, usize)> = None;
    for (index, value_pointer_node) in node.value_pointer_nodes.iter().enumerate() {
        if let Some(value) = process_value_pointer_node(engine, value_pointer_node, ctx_val, wildcards)? {
            found = Some((value, index));
            break;
        }
    }
    let (mut value_pointer, winning_index) =
        found.ok_or_else(|| EvalError::runtime("No valid ValuePointer node found"))?;

    let value_pointer_type = value_pointer.non_synthetic().value_type();
    let elem_type = if value_pointer_type.is_pointer() {
        value_pointer_type
            .pointee_type()
            .ok_or_else(|| EvalError::runtime("pointer type without pointee"))?
    } else if value_pointer_type.is_array() {
        let elem_type = value_pointer_type
            .element_type()
            .ok_or_else(|| EvalError::runtime("array type without element type"))?;
        value_pointer = ItemExpression::array_address_of(&value_pointer)?;
        elem_type
    } else {
        return Err(EvalError::runtime(format!(
            "Value pointer is not of pointer or array type ({})",
            value_pointer_type.name()
        )));
    };

    let element_getter = node.value_pointer_nodes[winning_index]
        .getter
        .get()
        .or_else(|| node.getter.get());
    if element_getter.is_some() {
        ItemExpression::copy_item_expression(ctx_val, &value_pointer);
    }

    let elem_byte_size = elem_type.byte_size();
    Ok(Some(ArrayItemsProvider {
        engine: Rc::clone(engine),
        item_provider,
        size,
        value_pointer,
        elem_type,
        elem_byte_size,
        wildcards: wildcards.to_vec(),
        element_getter,
    }))
}

pub fn create_array_items_provider(
    engine: &Rc<Engine>,
    item_provider: Rc<ItemProvider>,
    node: &ArrayItemsNode,
    ctx_val: &ValueRef,
    wildcards: &[String],
) -> Result<Option<Box<dyn ChildrenProvider>>, EvalError> {
    let provider = optional_node(
        node.optional,
        build_array_items_provider(engine, item_provider, node, ctx_val, wildcards),
    )?;
    Ok(provider.map(|provider| Box::new(provider) as Box<dyn ChildrenProvider>))
}
