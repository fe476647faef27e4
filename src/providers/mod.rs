pub mod array;
pub mod custom;
pub mod index_list;
pub mod list;
pub mod nodes;
pub mod single;
pub mod tree;

use std::rc::Rc;

use bitflags::bitflags;
use log::debug;

use crate::dispatch::Engine;
use crate::eval::{
    DynamicValueMode, EvalError, EvalSettings, EvaluationContext, ValueRef, eval_condition,
    eval_expression, get_root_value, resolve_type_wildcards,
};
use crate::format::{FormatCode, FormatFlags};
use crate::schema::nodes::{ItemProvider, SizeNode};
use crate::schema::viz::{FormatOptions, TypeVizCondition};

pub use single::RAW_VIEW_ITEM_NAME;

/// Child index reported when a name does not resolve to a child.
pub const INVALID_CHILD_INDEX: usize = u32::MAX as usize;

bitflags! {
    /// Result of an incremental provider refresh.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UpdateResult: u32 {
        const SIZE_UPDATED = 1;
    }
}

/// The contract every item-block provider implements; one provider lives
/// for the duration of one variables-pane expansion.
pub trait ChildrenProvider {
    fn num_children(&mut self) -> usize;

    fn get_child_index(&mut self, _name: &str) -> usize {
        INVALID_CHILD_INDEX
    }

    fn get_child_at_index(&mut self, index: usize) -> Result<ValueRef, EvalError>;

    /// Cheap size refresh after the underlying value may have changed;
    /// cached items are discarded when the size moved.
    fn try_update_size(&mut self, _value_non_synth: &ValueRef) -> UpdateResult {
        UpdateResult::empty()
    }
}

/// `"[3]"` -> `3`; anything else is not an index-shaped child name.
#[must_use]
pub fn parse_child_index_name(name: &str) -> usize {
    name.strip_prefix('[')
        .and_then(|name| name.strip_suffix(']'))
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(INVALID_CHILD_INDEX)
}

/// Swallow an evaluation error of an `optional` node, turning it into "no
/// value"; non-optional nodes re-raise.
pub fn optional_node<T>(
    optional: bool,
    result: Result<Option<T>, EvalError>,
) -> Result<Option<T>, EvalError> {
    match result {
        Err(err) if optional => {
            debug!("Ignoring error of optional node: {err}");
            Ok(None)
        }
        other => other,
    }
}

/// Check the include/exclude views and the boolean condition of a node;
/// `$i` is substituted when an index is given.
pub fn process_node_condition(
    engine: &Rc<Engine>,
    condition: &TypeVizCondition,
    ctx_val: &ValueRef,
    wildcards: &[String],
    index: Option<usize>,
) -> Result<bool, EvalError> {
    if condition.include_view_id != 0
        && ctx_val.format().custom_view_id() != condition.include_view_id
    {
        return Ok(false);
    }
    if condition.exclude_view_id != 0
        && ctx_val.format().custom_view_id() == condition.exclude_view_id
    {
        return Ok(false);
    }
    if let Some(condition) = condition.condition.as_deref().filter(|cond| !cond.is_empty()) {
        let mut processed = resolve_type_wildcards(condition, wildcards);
        if let Some(index) = index {
            processed = processed.replace("$i", &index.to_string());
        }
        return eval_condition(engine.session(), ctx_val, Some(&processed), None);
    }
    Ok(true)
}

pub(crate) fn node_condition_holds(
    engine: &Rc<Engine>,
    condition: Option<&TypeVizCondition>,
    ctx_val: &ValueRef,
    wildcards: &[String],
    index: Option<usize>,
) -> Result<bool, EvalError> {
    match condition {
        Some(condition) => process_node_condition(engine, condition, ctx_val, wildcards, index),
        None => Ok(true),
    }
}

fn process_size_node(
    engine: &Rc<Engine>,
    size_node: &SizeNode,
    ctx_val: &ValueRef,
    wildcards: &[String],
) -> Result<Option<i64>, EvalError> {
    let applies = node_condition_holds(engine, size_node.condition.as_ref(), ctx_val, wildcards, None)?;
    if !applies {
        return Ok(None);
    }
    let expression = resolve_type_wildcards(&size_node.text, wildcards);
    let value = eval_expression(
        engine.session(),
        ctx_val,
        &expression,
        &EvalSettings::default(),
        None,
    )?;
    let size = value
        .value_as_signed()
        .ok_or_else(|| EvalError::runtime("Size value must be of integer type"))?;
    Ok(Some(size))
}

/// Evaluate the size nodes of an items block; the first node whose
/// condition holds and whose expression evaluates wins.
pub fn calculate_items_provider_size(
    engine: &Rc<Engine>,
    size_nodes: &[SizeNode],
    ctx_val: &ValueRef,
    wildcards: &[String],
) -> Result<Option<usize>, EvalError> {
    for size_node in size_nodes {
        let size = optional_node(
            size_node.optional,
            process_size_node(engine, size_node, ctx_val, wildcards),
        )?;
        if let Some(size) = size {
            return Ok(Some(size.max(0) as usize));
        }
    }
    Ok(None)
}

fn eval_array_size(
    engine: &Rc<Engine>,
    ctx_val: &ValueRef,
    size_expr: &str,
) -> Result<i64, EvalError> {
    let size_value = eval_expression(
        engine.session(),
        ctx_val,
        size_expr,
        &EvalSettings::default(),
        None,
    )?;
    size_value
        .value_as_signed()
        .ok_or_else(|| EvalError::runtime("Size value must be of integer type"))
}

/// Put the natvis view options of an expression onto the evaluated value:
/// basic format, flag bits, custom view id, and array re-presentation.
pub fn apply_value_formatting_impl(
    value: &ValueRef,
    format_options: &FormatOptions,
    array_size: Option<i64>,
) -> ValueRef {
    let mut code = FormatCode::DEFAULT;
    // a basic spec and a custom view spec never come together
    if let Some(spec) = format_options.format_spec {
        code = code.with_basic_spec(spec);
    } else if format_options.view_spec_id != 0 {
        code = code.with_custom_view_id(format_options.view_spec_id);
    }
    code = code.with_flags(format_options.format_flags);

    let root = get_root_value(value);
    if let Some(array_size) = array_size {
        code = code.with_flags(FormatFlags::AS_ARRAY);
        root.set_format_as_array_size(array_size);
    }
    root.set_format(code);

    if code.flags().contains(FormatFlags::NO_DERIVED) {
        value.set_prefer_dynamic(DynamicValueMode::NoDynamicValues);
    }
    value.clone()
}

pub fn apply_value_formatting(
    engine: &Rc<Engine>,
    value_to_format: &ValueRef,
    format_options: &FormatOptions,
    ctx: &ValueRef,
    wildcards: &[String],
) -> Result<ValueRef, EvalError> {
    let array_size = match &format_options.array_size {
        Some(size_expr) => {
            let size_expr = resolve_type_wildcards(size_expr, wildcards);
            Some(eval_array_size(engine, ctx, &size_expr)?)
        }
        None => None,
    };
    Ok(apply_value_formatting_impl(
        value_to_format,
        format_options,
        array_size,
    ))
}

pub fn evaluate_expression_and_apply_formatting(
    engine: &Rc<Engine>,
    ctx_val: &ValueRef,
    expression: &str,
    settings: &EvalSettings,
    format_options: &FormatOptions,
    wildcards: &[String],
    context: Option<&EvaluationContext>,
) -> Result<ValueRef, EvalError> {
    let value = eval_expression(engine.session(), ctx_val, expression, settings, context)?;
    apply_value_formatting(engine, &value, format_options, ctx_val, wildcards)
}

/// Build one child provider per item block whose condition holds, plus the
/// trailing `Raw View` entry unless hidden by the visualizer or the value's
/// format.
pub fn build_child_providers(
    engine: &Rc<Engine>,
    item_providers: &[Rc<ItemProvider>],
    value_non_synth: &ValueRef,
    wildcards: &[String],
    hide_raw_view: bool,
) -> Result<Vec<Box<dyn ChildrenProvider>>, EvalError> {
    let mut child_providers: Vec<Box<dyn ChildrenProvider>> = Vec::new();
    for item_provider in item_providers {
        let provider = match &**item_provider {
            ItemProvider::Single(node) => single::create_single_item_provider(
                engine,
                Rc::clone(item_provider),
                node,
                value_non_synth,
                wildcards,
            )?,
            ItemProvider::Expanded(node) => single::create_expanded_item_provider(
                engine,
                node,
                value_non_synth,
                wildcards,
            )?,
            ItemProvider::ArrayItems(node) => array::create_array_items_provider(
                engine,
                Rc::clone(item_provider),
                node,
                value_non_synth,
                wildcards,
            )?,
            ItemProvider::IndexListItems(node) => index_list::create_index_list_items_provider(
                engine,
                Rc::clone(item_provider),
                node,
                value_non_synth,
                wildcards,
            )?,
            ItemProvider::LinkedListItems(_) | ItemProvider::TreeItems(_) => {
                nodes::create_custom_items_provider(
                    engine,
                    Rc::clone(item_provider),
                    value_non_synth,
                    wildcards,
                )?
            }
            ItemProvider::CustomListItems(node) => custom::create_custom_list_items_provider(
                engine,
                Rc::clone(item_provider),
                node,
                value_non_synth,
                wildcards,
            )?,
        };
        if let Some(provider) = provider {
            child_providers.push(provider);
        }
    }

    if !hide_raw_view
        && !value_non_synth
            .format()
            .flags()
            .contains(FormatFlags::NO_RAW_VIEW)
    {
        child_providers.push(Box::new(single::RawViewItemProvider::new(value_non_synth)?));
    }

    Ok(child_providers)
}
