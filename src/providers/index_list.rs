use std::rc::Rc;
use std::sync::LazyLock;

use log::debug;
use regex::Regex;

use crate::dispatch::Engine;
use crate::eval::{EvalError, EvalSettings, ValueRef, eval_expression, resolve_type_wildcards};
use crate::methods::SyntheticMethod;
use crate::providers::{
    ChildrenProvider, UpdateResult, apply_value_formatting, calculate_items_provider_size,
    node_condition_holds, optional_node, parse_child_index_name,
};
use crate::schema::nodes::{IndexListItemsNode, IndexNode, ItemProvider};

static SUBSCRIPT_INDEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\[\s*\$i\s*\]\s*").unwrap());

/// `<IndexListItems>`: child `i` comes from the first `ValueNode` whose
/// condition holds with `$i = i`.
pub struct IndexListItemsProvider {
    engine: Rc<Engine>,
    item_provider: Rc<ItemProvider>,
    size: usize,
    ctx_val: ValueRef,
    wildcards: Vec<String>,
}

/// Evaluate an indexed element, falling back to the natvis children of the
/// indexed member when the member's type lacks `operator[]`. The fallback
/// is only authorised for `member[$i]`-shaped expressions over types known
/// to carry natvis `IndexListItems`, and is memoised per (type,
/// expression).
fn trying_get_indexed_item_value(
    engine: &Rc<Engine>,
    expression: &str,
    ctx_val: &ValueRef,
    index: usize,
    name: &str,
    element_getter: Option<&SyntheticMethod>,
) -> Result<ValueRef, EvalError> {
    let session = engine.session();
    let type_name = ctx_val.type_name();
    let cached_member_expression = session
        .subscript_missing
        .borrow()
        .get(&type_name)
        .and_then(|by_expr| by_expr.get(expression))
        .cloned();
    let already_calculated = cached_member_expression.is_some();

    let member_expression = match cached_member_expression {
        Some(member_expression) => member_expression,
        None => {
            let expanded = expression.replace("$i", &index.to_string());
            let getter_call =
                element_getter.map(|getter| getter.call(vec![index.to_string()]));
            let settings = EvalSettings::with_metadata_getter(Some(name), getter_call);
            match eval_expression(session, ctx_val, &expanded, &settings, None) {
                Ok(value) => return Ok(value),
                Err(err) if err.message.ends_with("does not provide a subscript operator") => {
                    debug!(
                        "Subscript operator is missing, trying to get children via natvis; \
                         only the simple 'member[$i]' syntax is supported"
                    );
                }
                Err(err) => return Err(err),
            }

            let Some(found) = SUBSCRIPT_INDEX.find(expression) else {
                debug!("Can't find expression '[$i]' to evaluate in '{expression}'");
                return Err(EvalError::runtime("Can't find expression '[$i]' to evaluate"));
            };
            if SUBSCRIPT_INDEX.find_at(expression, found.end()).is_some() {
                debug!("There is more than one expression '[$i]' in '{expression}'");
                return Err(EvalError::runtime("More than one expression '[$i]'"));
            }
            expression[..found.start()].to_string()
        }
    };

    let value = eval_expression(
        session,
        ctx_val,
        &member_expression,
        &EvalSettings::with_metadata(Some(name)),
        None,
    )?;

    if !already_calculated {
        // force the member's own providers, so its natvis registration (if
        // any) is visible in the session
        engine.force_synthetic_children(&value);
        let member_type_name = value.type_name();
        if !session
            .types_with_index_list_items
            .borrow()
            .contains(&member_type_name)
        {
            debug!(
                "IndexListItems expression '{expression}' doesn't have a subscript operator \
                 and no natvis implementation in type '{member_type_name}'"
            );
            return Err(EvalError::runtime(
                "IndexListItems item doesn't have subscript operator",
            ));
        }
        session
            .subscript_missing
            .borrow_mut()
            .entry(type_name)
            .or_default()
            .insert(expression.to_string(), member_expression);
    }

    engine
        .synthetic_child_at_index(&value, index)?
        .ok_or_else(|| EvalError::runtime(format!("no child at index {index}")))
}

fn process_index_value_node(
    engine: &Rc<Engine>,
    index: usize,
    name: &str,
    value_node: &IndexNode,
    ctx_val: &ValueRef,
    wildcards: &[String],
    element_getter: Option<&SyntheticMethod>,
) -> Result<Option<ValueRef>, EvalError> {
    if !node_condition_holds(
        engine,
        value_node.condition.as_ref(),
        ctx_val,
        wildcards,
        Some(index),
    )? {
        return Ok(None);
    }
    let expression = resolve_type_wildcards(&value_node.expr.text, wildcards);
    let value =
        trying_get_indexed_item_value(engine, &expression, ctx_val, index, name, element_getter)?;
    let value = apply_value_formatting(
        engine,
        &value,
        &value_node.expr.view_options,
        ctx_val,
        wildcards,
    )?;
    Ok(Some(value))
}

impl ChildrenProvider for IndexListItemsProvider {
    fn num_children(&mut self) -> usize {
        self.size
    }

    fn get_child_index(&mut self, name: &str) -> usize {
        parse_child_index_name(name)
    }

    fn get_child_at_index(&mut self, index: usize) -> Result<ValueRef, EvalError> {
        let name = format!("[{index}]");
        let node = Rc::clone(&self.item_provider);
        let ItemProvider::IndexListItems(node) = &*node else {
            unreachable!()
        };
        for value_node in &node.value_nodes {
            let element_getter = value_node.getter.get().or_else(|| node.getter.get());
            if let Some(value) = process_index_value_node(
                &self.engine,
                index,
                &name,
                value_node,
                &self.ctx_val,
                &self.wildcards,
                element_getter.as_ref(),
            )? {
                return Ok(value);
            }
        }
        Err(EvalError::runtime(format!(
            "no ValueNode produced child [{index}]"
        )))
    }

    fn try_update_size(&mut self, _value_non_synth: &ValueRef) -> UpdateResult {
        let old_size = self.size;
        let node = Rc::clone(&self.item_provider);
        let ItemProvider::IndexListItems(node) = &*node else {
            return UpdateResult::empty();
        };
        if let Ok(Some(size)) = calculate_items_provider_size(
            &self.engine,
            &node.size_nodes,
            &self.ctx_val,
            &self.wildcards,
        ) {
            self.size = size;
        }
        if old_size != self.size {
            UpdateResult::SIZE_UPDATED
        } else {
            UpdateResult::empty()
        }
    }
}

pub fn create_index_list_items_provider(
    engine: &Rc<Engine>,
    item_provider: Rc<ItemProvider>,
    node: &IndexListItemsNode,
    ctx_val: &ValueRef,
    wildcards: &[String],
) -> Result<Option<Box<dyn ChildrenProvider>>, EvalError> {
    optional_node(node.optional, (|| {
        if !node_condition_holds(engine, node.condition.as_ref(), ctx_val, wildcards, None)? {
            return Ok(None);
        }
        let size = calculate_items_provider_size(engine, &node.size_nodes, ctx_val, wildcards)?
            .ok_or_else(|| EvalError::runtime("No valid Size node found"))?;

        engine
            .session()
            .types_with_index_list_items
            .borrow_mut()
            .insert(ctx_val.type_name());

        Ok(Some(Box::new(IndexListItemsProvider {
            engine: Rc::clone(engine),
            item_provider,
            size,
            ctx_val: ctx_val.clone(),
            wildcards: wildcards.to_vec(),
        }) as Box<dyn ChildrenProvider>))
    })())
}
