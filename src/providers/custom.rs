use std::collections::HashMap;
use std::rc::Rc;

use crate::dispatch::Engine;
use crate::eval::{
    EvalError, EvalOptions, EvalSettings, EvaluationContext, ValueRef, eval_condition,
    eval_expression, resolve_type_wildcards,
};
use crate::providers::{
    ChildrenProvider, INVALID_CHILD_INDEX, UpdateResult, apply_value_formatting_impl,
    calculate_items_provider_size, node_condition_holds, optional_node,
};
use crate::schema::nodes::{CodeBlockNode, CustomListItemsNode, ItemProvider, VariableNode};
use crate::schema::viz::{FormatOptions, InterpolatedString};
use crate::session::VariableBindings;

type Target = Option<usize>;

/// One compiled step of a `<CustomListItems>` block. `<Loop>`/`<Break>`
/// back-edges are resolved to instruction indexes at compile time.
enum Instruction {
    Exec {
        code: String,
        condition: Option<String>,
        next: Target,
    },
    Item {
        name: Option<InterpolatedString>,
        expr: String,
        opts: FormatOptions,
        condition: Option<String>,
        next: Target,
    },
    If {
        condition: Option<String>,
        then_target: Target,
        else_target: Target,
    },
}

/// Compiles the nested code-block tree into a linear instruction stream.
/// Blocks are processed back to front so every instruction knows its
/// successor when it is created.
struct InstructionCompiler<'blocks> {
    instructions: Vec<Instruction>,
    wildcards: &'blocks [String],
}

impl<'blocks> InstructionCompiler<'blocks> {
    fn compile(
        code_blocks: &'blocks [CodeBlockNode],
        wildcards: &'blocks [String],
    ) -> (Vec<Instruction>, Target) {
        let mut compiler = Self {
            instructions: Vec::new(),
            wildcards,
        };
        let mut loop_breaks = Vec::new();
        let entry = compiler.process_block_nodes(code_blocks, None, &mut loop_breaks);
        (compiler.instructions, entry)
    }

    fn alloc(&mut self, instruction: Instruction) -> usize {
        self.instructions.push(instruction);
        self.instructions.len() - 1
    }

    fn resolve(&self, condition: &Option<String>) -> Option<String> {
        condition
            .as_deref()
            .filter(|condition| !condition.is_empty())
            .map(|condition| resolve_type_wildcards(condition, self.wildcards))
    }

    fn process_block_nodes(
        &mut self,
        block_nodes: &'blocks [CodeBlockNode],
        mut next: Target,
        loop_breaks: &mut Vec<Target>,
    ) -> Target {
        let mut end_if: Option<Target> = None;
        for node in block_nodes.iter().rev() {
            match node {
                CodeBlockNode::Exec { value, condition } => {
                    let code = resolve_type_wildcards(value, self.wildcards);
                    let condition = self.resolve(condition);
                    next = Some(self.alloc(Instruction::Exec {
                        code,
                        condition,
                        next,
                    }));
                }
                CodeBlockNode::Item {
                    name,
                    expr,
                    condition,
                } => {
                    let expression = resolve_type_wildcards(&expr.text, self.wildcards);
                    let condition = self.resolve(condition);
                    next = Some(self.alloc(Instruction::Item {
                        name: name.clone(),
                        expr: expression,
                        opts: expr.view_options.clone(),
                        condition,
                        next,
                    }));
                }
                CodeBlockNode::If { condition, body } => {
                    let condition = self.resolve(&Some(condition.clone()));
                    let join = *end_if.get_or_insert(next);
                    let then_target = self.process_block_nodes(body, join, loop_breaks);
                    next = Some(self.alloc(Instruction::If {
                        condition,
                        then_target,
                        else_target: next,
                    }));
                    end_if = None;
                }
                CodeBlockNode::Else { body } => {
                    end_if = Some(next);
                    next = self.process_block_nodes(body, next, loop_breaks);
                }
                CodeBlockNode::ElseIf { condition, body } => {
                    let condition = self.resolve(condition);
                    let join = *end_if.get_or_insert(next);
                    let then_target = self.process_block_nodes(body, join, loop_breaks);
                    next = Some(self.alloc(Instruction::If {
                        condition,
                        then_target,
                        else_target: next,
                    }));
                }
                CodeBlockNode::Loop { condition, body } => {
                    let condition = self.resolve(condition);
                    let loop_index = self.alloc(Instruction::If {
                        condition,
                        then_target: None,
                        else_target: next,
                    });
                    loop_breaks.push(next);
                    let then_target =
                        self.process_block_nodes(body, Some(loop_index), loop_breaks);
                    loop_breaks.pop();
                    if let Instruction::If {
                        then_target: slot, ..
                    } = &mut self.instructions[loop_index]
                    {
                        *slot = then_target;
                    }
                    next = Some(loop_index);
                }
                CodeBlockNode::Break { condition } => {
                    let break_target = loop_breaks.last().copied().flatten();
                    match self.resolve(condition) {
                        Some(condition) => {
                            next = Some(self.alloc(Instruction::If {
                                condition: Some(condition),
                                then_target: break_target,
                                else_target: next,
                            }));
                        }
                        None => next = break_target,
                    }
                }
            }
        }
        next
    }
}

/// Build the prolog/epilog realizing the `<Variable>` bindings; the
/// backing `$name<id>` convenience variables persist in the debugger
/// between evaluations.
fn build_variable_bindings(
    engine: &Rc<Engine>,
    variable_nodes: &[VariableNode],
    wildcards: &[String],
) -> VariableBindings {
    let mut prolog = String::new();
    let mut epilog = String::new();
    let mut first_time_code = String::new();
    let mut repeat_code = String::new();
    for node in variable_nodes {
        let initial_value = resolve_type_wildcards(&node.initial_value, wildcards);
        let persistent_name = format!("${}{}", node.name, engine.session().next_static_id());
        first_time_code.push_str(&format!("auto {persistent_name} = {initial_value};"));
        repeat_code.push_str(&format!("{persistent_name} = {initial_value};"));
        prolog.push_str(&format!("auto {} = {persistent_name};", node.name));
        epilog.push_str(&format!("{persistent_name} = {};", node.name));
    }
    first_time_code.push('1');
    repeat_code.push('1');
    VariableBindings {
        prolog,
        epilog,
        first_time_code,
        repeat_code,
    }
}

fn create_evaluation_context(
    engine: &Rc<Engine>,
    item_provider: &Rc<ItemProvider>,
    node: &CustomListItemsNode,
    ctx_val: &ValueRef,
    wildcards: &[String],
) -> Result<EvaluationContext, EvalError> {
    let key = (
        Rc::as_ptr(item_provider) as usize,
        wildcards.join("\u{1}"),
    );
    let session = engine.session();
    let (bindings, first_time) = {
        let known = session.variable_bindings.borrow().get(&key).cloned();
        match known {
            Some(bindings) => (bindings, false),
            None => {
                let bindings = build_variable_bindings(engine, &node.variables, wildcards);
                session
                    .variable_bindings
                    .borrow_mut()
                    .insert(key, bindings.clone());
                (bindings, true)
            }
        }
    };
    let init_code = if first_time {
        &bindings.first_time_code
    } else {
        &bindings.repeat_code
    };
    let settings = EvalSettings {
        options: EvalOptions {
            // the init code declares persistent variables
            suppress_persistent_result: false,
            ..EvalOptions::default()
        },
        ..EvalSettings::default()
    };
    eval_expression(session, ctx_val, init_code, &settings, None)?;
    Ok(EvaluationContext::new(
        bindings.prolog.clone(),
        bindings.epilog.clone(),
    ))
}

/// `<CustomListItems>`: steps the compiled instruction stream on demand
/// until the item collector holds the requested index.
pub struct CustomListItemsProvider {
    engine: Rc<Engine>,
    item_provider: Rc<ItemProvider>,
    instructions: Rc<Vec<Instruction>>,
    next_instruction: Target,
    ctx_val: ValueRef,
    context: EvaluationContext,
    wildcards: Vec<String>,
    cached_items: Vec<ValueRef>,
    size: usize,
    name_to_item: HashMap<String, usize>,
}

impl CustomListItemsProvider {
    fn execute_instruction(&mut self, index: usize) -> Result<Target, EvalError> {
        let engine = Rc::clone(&self.engine);
        let session = engine.session();
        let instructions = Rc::clone(&self.instructions);
        match &instructions[index] {
            Instruction::Exec {
                code,
                condition,
                next,
            } => {
                if eval_condition(session, &self.ctx_val, condition.as_deref(), Some(&self.context))? {
                    eval_expression(
                        session,
                        &self.ctx_val,
                        code,
                        &EvalSettings::default(),
                        Some(&self.context),
                    )?;
                }
                Ok(*next)
            }
            Instruction::Item {
                name,
                expr,
                opts,
                condition,
                next,
            } => {
                let next = *next;
                if !eval_condition(session, &self.ctx_val, condition.as_deref(), Some(&self.context))? {
                    return Ok(next);
                }
                let item_name = match name {
                    Some(name) => engine.eval_interpolated_string(
                        name,
                        &self.ctx_val,
                        &[],
                        Some(&self.context),
                    )?,
                    None => format!("[{}]", self.cached_items.len()),
                };
                let item = eval_expression(
                    session,
                    &self.ctx_val,
                    expr,
                    &EvalSettings::with_metadata(Some(&item_name)),
                    Some(&self.context),
                )?;
                let array_size = match &opts.array_size {
                    Some(size_expr) => {
                        let size_value = eval_expression(
                            session,
                            &self.ctx_val,
                            size_expr,
                            &EvalSettings::default(),
                            Some(&self.context),
                        )?;
                        size_value.value_as_signed()
                    }
                    None => None,
                };
                let item = apply_value_formatting_impl(&item, opts, array_size);
                self.cached_items.push(item);
                Ok(next)
            }
            Instruction::If {
                condition,
                then_target,
                else_target,
            } => {
                if eval_condition(session, &self.ctx_val, condition.as_deref(), Some(&self.context))? {
                    Ok(*then_target)
                } else {
                    Ok(*else_target)
                }
            }
        }
    }

    fn calculate_cache(&mut self, stop_at: usize) -> Result<(), EvalError> {
        let first_index = self.cached_items.len();
        while let Some(instruction) = self.next_instruction {
            if self.cached_items.len() > stop_at {
                break;
            }
            self.next_instruction = self.execute_instruction(instruction)?;
        }
        for index in first_index..self.cached_items.len() {
            if let Some(name) = self.cached_items[index].non_synthetic().name() {
                self.name_to_item.insert(name, index);
            }
        }
        Ok(())
    }
}

impl ChildrenProvider for CustomListItemsProvider {
    fn num_children(&mut self) -> usize {
        self.size
    }

    fn get_child_index(&mut self, name: &str) -> usize {
        self.name_to_item
            .get(name)
            .copied()
            .unwrap_or(INVALID_CHILD_INDEX)
    }

    fn get_child_at_index(&mut self, index: usize) -> Result<ValueRef, EvalError> {
        if index >= self.cached_items.len() {
            self.calculate_cache(index)?;
        }
        self.cached_items
            .get(index)
            .cloned()
            .ok_or_else(|| EvalError::runtime(format!("no item at index {index}")))
    }

    fn try_update_size(&mut self, value_non_synth: &ValueRef) -> UpdateResult {
        let provider_node = Rc::clone(&self.item_provider);
        let ItemProvider::CustomListItems(node) = &*provider_node else {
            return UpdateResult::empty();
        };
        let Ok(Some(new_provider)) = build_custom_list_items_provider(
            &self.engine,
            Rc::clone(&self.item_provider),
            node,
            value_non_synth,
            &self.wildcards,
        ) else {
            // the provider is probably no longer valid and everything
            // needs rebuilding; that is the caller's rare path
            return UpdateResult::empty();
        };
        let old_size = self.size;
        *self = new_provider;
        if old_size != self.size {
            UpdateResult::SIZE_UPDATED
        } else {
            UpdateResult::empty()
        }
    }
}

fn build_custom_list_items_provider(
    engine: &Rc<Engine>,
    item_provider: Rc<ItemProvider>,
    node: &CustomListItemsNode,
    ctx_val: &ValueRef,
    wildcards: &[String],
) -> Result<Option<CustomListItemsProvider>, EvalError> {
    if !node_condition_holds(engine, node.condition.as_ref(), ctx_val, wildcards, None)? {
        return Ok(None);
    }

    let (instructions, entry) = InstructionCompiler::compile(&node.code_blocks, wildcards);
    let size = calculate_items_provider_size(engine, &node.size_nodes, ctx_val, wildcards)?;
    let context = create_evaluation_context(engine, &item_provider, node, ctx_val, wildcards)?;

    let mut provider = CustomListItemsProvider {
        engine: Rc::clone(engine),
        item_provider,
        instructions: Rc::new(instructions),
        next_instruction: entry,
        ctx_val: ctx_val.clone(),
        context,
        wildcards: wildcards.to_vec(),
        cached_items: Vec::new(),
        size: 0,
        name_to_item: HashMap::new(),
    };
    match size {
        Some(size) => provider.size = size,
        None => {
            let max_children = engine.session().settings.max_num_children.get();
            provider.calculate_cache(max_children)?;
            provider.size = provider.cached_items.len();
        }
    }
    Ok(Some(provider))
}

pub fn create_custom_list_items_provider(
    engine: &Rc<Engine>,
    item_provider: Rc<ItemProvider>,
    node: &CustomListItemsNode,
    ctx_val: &ValueRef,
    wildcards: &[String],
) -> Result<Option<Box<dyn ChildrenProvider>>, EvalError> {
    let provider = optional_node(
        node.optional,
        build_custom_list_items_provider(engine, item_provider, node, ctx_val, wildcards),
    )?;
    Ok(provider.map(|provider| Box::new(provider) as Box<dyn ChildrenProvider>))
}
