use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::debug;

use crate::builtins::{self, StructChildrenProvider};
use crate::cpp;
use crate::eval::{
    DebuggerHost, EvalError, EvaluationContext, TypeRef, ValueRef, eval_expression,
    resolve_type_wildcards,
};
use crate::eval::EvalSettings;
use crate::format::{
    BasicFormatSpec, FormatCode, FormatFlags, overlay_child_format, overlay_summary_format,
    update_value_dynamic_state,
};
use crate::manager::FormattersManager;
use crate::providers::{
    self, ChildrenProvider, INVALID_CHILD_INDEX, RAW_VIEW_ITEM_NAME, UpdateResult,
    apply_value_formatting, build_child_providers, process_node_condition,
};
use crate::schema::viz::{InterpolatedString, TypeViz, TypeVizExpression, TypeVizName, TypeVizSummary};
use crate::session::Session;
use crate::stream::Stream;
use crate::template::TypeNameTemplate;

/// A visualizer selected for a concrete type: either a natvis rule set or
/// a builtin fallback shape.
pub enum VisDescriptor {
    NatVis(NatVisDescriptor),
    Builtin(builtins::BuiltinDescriptor),
}

type DescriptorCacheKey = (String, u8, bool);

/// The dispatch engine: owns the formatter registry, matches visualizers
/// to values, renders summaries and builds children providers.
pub struct Engine {
    session: Rc<Session>,
    host: Rc<dyn DebuggerHost>,
    manager: RefCell<FormattersManager>,
    descriptor_cache: RefCell<HashMap<DescriptorCacheKey, Option<Rc<VisDescriptor>>>>,
}

impl Engine {
    #[must_use]
    pub fn new(session: Rc<Session>, host: Rc<dyn DebuggerHost>) -> Rc<Self> {
        Rc::new(Self {
            session,
            host,
            manager: RefCell::new(FormattersManager::new()),
            descriptor_cache: RefCell::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn session(&self) -> &Rc<Session> {
        &self.session
    }

    #[must_use]
    pub fn host(&self) -> &Rc<dyn DebuggerHost> {
        &self.host
    }

    /// Run a mutation of the formatter registry; every structural change
    /// re-emits the top-level declarations and drops matched-descriptor
    /// caches.
    pub fn with_manager<R>(&self, action: impl FnOnce(&mut FormattersManager) -> R) -> R {
        let result = action(&mut self.manager.borrow_mut());
        self.manager
            .borrow_mut()
            .emit_all_top_level_declarations(&*self.host);
        self.descriptor_cache.borrow_mut().clear();
        result
    }

    fn new_stream(&self, initial_level: usize) -> Stream {
        Stream::new(
            self.host.address_byte_size() == 8,
            self.session.settings.markup.get(),
            initial_level,
        )
    }

    /// The visualizer descriptor for a type under a format code, cached
    /// per (type name, basic spec, natvis enabled).
    pub fn get_matched_visualizers(
        self: &Rc<Self>,
        value_type: &TypeRef,
        format_spec: FormatCode,
    ) -> Option<Rc<VisDescriptor>> {
        let basic_spec = format_spec.basic_spec();
        let natvis_enabled = !format_spec.flags().contains(FormatFlags::RAW_VIEW);
        let cache_key = (value_type.name(), basic_spec as u8, natvis_enabled);
        if let Some(descriptor) = self.descriptor_cache.borrow().get(&cache_key) {
            return descriptor.clone();
        }

        let descriptor = self
            .try_get_matched_visualizers(value_type, natvis_enabled, basic_spec)
            .map(Rc::new);
        self.descriptor_cache
            .borrow_mut()
            .insert(cache_key, descriptor.clone());
        descriptor
    }

    pub(crate) fn try_get_matched_visualizers(
        self: &Rc<Self>,
        value_type: &TypeRef,
        natvis_enabled: bool,
        basic_spec: BasicFormatSpec,
    ) -> Option<VisDescriptor> {
        let value_type = value_type.unqualified();

        if natvis_enabled {
            let value_type_name = cpp::remove_type_class_specifier(&value_type.name()).to_string();
            debug!("Trying to find natvis visualizer for type: '{value_type_name}'...");
            match TypeNameTemplate::parse(&value_type_name) {
                Ok(type_name_template) => {
                    let candidates = self.matched_type_visualizers(&type_name_template, false);
                    if !candidates.is_empty() {
                        debug!("Found natvis visualizer for type: '{value_type_name}'");
                        return Some(VisDescriptor::NatVis(NatVisDescriptor::new(
                            candidates,
                            type_name_template,
                        )));
                    }
                }
                Err(err) => {
                    debug!("Parsing typename {value_type_name} failed: {err}");
                }
            }
        }

        builtins::try_get_matched_builtin_visualizer(self, &value_type, natvis_enabled, basic_spec)
    }

    pub(crate) fn matched_type_visualizers(
        &self,
        type_name_template: &TypeNameTemplate,
        only_inherited: bool,
    ) -> Vec<(Rc<TypeViz>, TypeVizName)> {
        let mut result = Vec::new();
        let mut manager = self.manager.borrow_mut();
        for storage in manager.all_storages_mut() {
            for (viz, name) in storage.get_matched_types(type_name_template) {
                if !only_inherited || viz.is_inheritable {
                    result.push((viz, name));
                }
            }
        }
        result
    }

    /// Natvis visualizer inherited from the closest direct base class that
    /// has one.
    pub(crate) fn find_matched_natvis_visualizer_for_base(
        self: &Rc<Self>,
        value_type: &TypeRef,
    ) -> Option<NatVisDescriptor> {
        for base_type in value_type.direct_base_classes() {
            let base_type_name = base_type.name();
            let template = match TypeNameTemplate::parse(&base_type_name) {
                Ok(template) => template,
                Err(err) => {
                    debug!("Parsing typename {base_type_name} failed: {err}");
                    continue;
                }
            };
            let candidates = self.matched_type_visualizers(&template, true);
            if !candidates.is_empty() {
                return Some(NatVisDescriptor::new(candidates, template));
            }
            if let Some(deep_base) = self.find_matched_natvis_visualizer_for_base(&base_type) {
                return Some(deep_base);
            }
        }
        None
    }

    /// Render the summary of a value into `stream`, bumping the recursion
    /// level for the nested output.
    pub fn output_object(self: &Rc<Self>, stream: &mut Stream, val_non_synth: &ValueRef) {
        debug!(
            "Retrieving summary of value named '{}'...",
            val_non_synth.name().unwrap_or_default()
        );

        let val_type = val_non_synth.value_type();
        let format_spec = val_non_synth.format();
        let descriptor = self.get_matched_visualizers(&val_type, format_spec);

        stream.level += 1;
        let _level_guard = self.session.enter_recursion_level(stream.level);
        match descriptor {
            Some(descriptor) => {
                if let Err(err) = self.output_descriptor_summary(&descriptor, val_non_synth, stream)
                {
                    debug!("Internal error: {err}");
                }
            }
            None => self.output_object_fallback(stream, val_non_synth),
        }
        stream.level -= 1;
    }

    fn output_descriptor_summary(
        self: &Rc<Self>,
        descriptor: &VisDescriptor,
        val_non_synth: &ValueRef,
        stream: &mut Stream,
    ) -> Result<(), EvalError> {
        match descriptor {
            VisDescriptor::NatVis(natvis) => natvis.output_summary(self, val_non_synth, stream),
            VisDescriptor::Builtin(builtin) => builtin.output_summary(self, val_non_synth, stream),
        }
    }

    fn output_object_fallback(self: &Rc<Self>, stream: &mut Stream, val_non_synth: &ValueRef) {
        // force the raw descriptor
        let descriptor =
            self.get_matched_visualizers(&val_non_synth.value_type(), FormatCode::RAW_VIEW);
        match descriptor {
            Some(descriptor) => {
                if let Err(err) = self.output_descriptor_summary(&descriptor, val_non_synth, stream)
                {
                    debug!("Internal error: {err}");
                }
            }
            None => stream.output(&val_non_synth.value_string().unwrap_or_default()),
        }
    }

    /// Children providers of a value as its selected visualizer defines
    /// them; the struct fallback when nothing matches.
    pub fn prepare_children(self: &Rc<Self>, val_non_synth: &ValueRef) -> Box<dyn ChildrenProvider> {
        let descriptor =
            self.get_matched_visualizers(&val_non_synth.value_type(), val_non_synth.format());
        match descriptor {
            Some(descriptor) => match &*descriptor {
                VisDescriptor::NatVis(natvis) => natvis.prepare_children(self, val_non_synth),
                VisDescriptor::Builtin(builtin) => builtin.prepare_children(self, val_non_synth),
            },
            None => Box::new(StructChildrenProvider::new(val_non_synth.clone())),
        }
    }

    /// Build (and discard) the providers of a value, so session-level
    /// registrations its visualizer makes become observable.
    pub fn force_synthetic_children(self: &Rc<Self>, value: &ValueRef) {
        let _ = self.prepare_children(&value.non_synthetic());
    }

    /// A child as the value's own visualizer produces it.
    pub fn synthetic_child_at_index(
        self: &Rc<Self>,
        value: &ValueRef,
        index: usize,
    ) -> Result<Option<ValueRef>, EvalError> {
        let mut provider = self.prepare_children(&value.non_synthetic());
        if index >= provider.num_children() {
            return Ok(None);
        }
        provider.get_child_at_index(index).map(Some)
    }

    /// Evaluate an interpolated display string into `stream`.
    pub fn eval_interpolated_to_stream(
        self: &Rc<Self>,
        stream: &mut Stream,
        interp_string: &InterpolatedString,
        ctx_val: &ValueRef,
        wildcards: &[String],
        context: Option<&EvaluationContext>,
    ) -> Result<(), EvalError> {
        let max_stream_length = self.session.settings.max_string_length.get();

        let mut nested_stream = stream.create_nested();
        for (literal, expr) in &interp_string.parts {
            if nested_stream.length > max_stream_length {
                break;
            }
            nested_stream.output(literal);
            if let Some(expr) = expr {
                if nested_stream.length > max_stream_length {
                    break;
                }
                self.eval_display_string_expression(
                    &mut nested_stream,
                    ctx_val,
                    expr,
                    wildcards,
                    context,
                )?;
            }
        }

        stream.output(&nested_stream.into_string());
        Ok(())
    }

    /// Evaluate an interpolated string into a plain string (custom child
    /// names).
    pub fn eval_interpolated_string(
        self: &Rc<Self>,
        interp_string: &InterpolatedString,
        ctx_val: &ValueRef,
        wildcards: &[String],
        context: Option<&EvaluationContext>,
    ) -> Result<String, EvalError> {
        let mut stream = Stream::new(
            self.host.address_byte_size() == 8,
            false,
            self.session.recursion_level(),
        );
        self.eval_interpolated_to_stream(&mut stream, interp_string, ctx_val, wildcards, context)?;
        Ok(stream.into_string())
    }

    fn eval_display_string_expression(
        self: &Rc<Self>,
        stream: &mut Stream,
        ctx: &ValueRef,
        expr: &TypeVizExpression,
        wildcards: &[String],
        context: Option<&EvaluationContext>,
    ) -> Result<(), EvalError> {
        if stream.level >= self.session.settings.max_recursion_level.get() {
            return Ok(());
        }

        let expr_text = if wildcards.is_empty() {
            expr.text.clone()
        } else {
            resolve_type_wildcards(&expr.text, wildcards)
        };
        let result = eval_expression(
            &self.session,
            ctx,
            &expr_text,
            &EvalSettings::default(),
            context,
        )?;
        let result_non_synth = result.non_synthetic();
        if result_non_synth.error().is_some() {
            stream.output("???");
            return Ok(());
        }

        let result = apply_value_formatting(self, &result, &expr.view_options, ctx, wildcards)?;
        // parent size re-presentation applies to summaries only
        overlay_summary_format(&result, ctx);

        self.output_object(stream, &result.non_synthetic());
        Ok(())
    }

    /// `{child = summary, ...}` fallback used when a visualizer has no
    /// summary of its own.
    pub(crate) fn summarize_children(
        self: &Rc<Self>,
        provider: &mut dyn ChildrenProvider,
        stream: &mut Stream,
    ) {
        let max_string_length = self.session.settings.max_string_length.get();
        let num_children = provider.num_children();

        stream.output("{");
        if stream.length > max_string_length || num_children == 0 {
            stream.output("...");
        } else {
            for child_index in 0..num_children {
                let Ok(child) = provider.get_child_at_index(child_index) else {
                    continue;
                };
                let child_non_synth = child.non_synthetic();
                let child_name = child_non_synth.name().unwrap_or_default();
                if child_name == RAW_VIEW_ITEM_NAME {
                    continue;
                }
                if child_index != 0 {
                    stream.output(", ");
                }
                if child_index > 2 || stream.length > max_string_length {
                    stream.output("...");
                    break;
                }
                stream.output(&child_name);
                stream.output("=");
                if stream.length > max_string_length {
                    stream.output("...");
                    break;
                }
                self.output_object(stream, &child_non_synth);
            }
        }
        stream.output("}");
    }
}

/// Wildcard capture strings of a matched template, with breaking
/// `struct `/`class ` prefixes removed.
fn fix_wildcard_matches(matches: &[TypeNameTemplate]) -> Vec<String> {
    matches
        .iter()
        .map(|template| {
            let mut name = template.to_string();
            for prefix in ["struct ", "class "] {
                if let Some(stripped) = name.strip_prefix(prefix) {
                    name = stripped.to_string();
                }
            }
            name
        })
        .collect()
}

fn match_type_viz_template(
    viz_template: &TypeNameTemplate,
    type_name_template: &TypeNameTemplate,
) -> Option<Vec<String>> {
    let captures = viz_template.match_captures(type_name_template)?;
    Some(fix_wildcard_matches(&captures))
}

/// The natvis visualizer candidates matched for one concrete type, with
/// their wildcard captures precomputed.
pub struct NatVisDescriptor {
    type_name_template: TypeNameTemplate,
    candidates: Vec<(Rc<TypeViz>, TypeVizName, Vec<String>)>,
}

impl NatVisDescriptor {
    #[must_use]
    pub fn new(
        candidates: Vec<(Rc<TypeViz>, TypeVizName)>,
        type_name_template: TypeNameTemplate,
    ) -> Self {
        let candidates = candidates
            .into_iter()
            .filter_map(|(viz, name)| {
                match match_type_viz_template(&name.template, &type_name_template) {
                    Some(matches) => Some((viz, name, matches)),
                    None => {
                        debug!(
                            "Inconsistent type matching: can't match template {} with {}",
                            type_name_template, name.template
                        );
                        None
                    }
                }
            })
            .collect();
        Self {
            type_name_template,
            candidates,
        }
    }

    fn check_include_exclude_view(viz: &TypeViz, value_non_synth: &ValueRef) -> bool {
        let view_id = value_non_synth.format().custom_view_id();
        if viz.include_view_id != 0 && view_id != viz.include_view_id {
            debug!("IncludeView condition is not satisfied '{}'...", viz.include_view);
            return false;
        }
        if viz.exclude_view_id != 0 && view_id == viz.exclude_view_id {
            debug!("ExcludeView condition is not satisfied '{}'...", viz.exclude_view);
            return false;
        }
        true
    }

    fn process_summary_node(
        engine: &Rc<Engine>,
        summary: &TypeVizSummary,
        ctx_val: &ValueRef,
        wildcards: &[String],
        stream: &mut Stream,
    ) -> Result<Option<()>, EvalError> {
        if let Some(condition) = &summary.condition {
            if !process_node_condition(engine, condition, ctx_val, wildcards, None)? {
                return Ok(None);
            }
        }
        engine.eval_interpolated_to_stream(stream, &summary.value, ctx_val, wildcards, None)?;
        Ok(Some(()))
    }

    /// Try the summary of each candidate in order; the first successful
    /// interpolation wins, the children fallback closes the gap.
    pub fn output_summary(
        &self,
        engine: &Rc<Engine>,
        value_non_synth: &ValueRef,
        stream: &mut Stream,
    ) -> Result<(), EvalError> {
        for (viz, type_viz_name, matches) in &self.candidates {
            let _scope_guard = engine.session().install_intrinsics_scope(
                Some(Rc::clone(&viz.global_intrinsics)),
                Some(Rc::clone(&viz.type_intrinsics)),
                matches.clone(),
            );
            debug!("Trying visualizer for type '{type_viz_name}'...");
            let attempt = (|| -> Result<Option<()>, EvalError> {
                if !Self::check_include_exclude_view(viz, value_non_synth) {
                    return Ok(None);
                }
                if viz.summaries.is_empty() {
                    debug!("No user provided summary found, return default...");
                    self.output_summary_from_children(engine, value_non_synth, stream);
                    return Ok(Some(()));
                }
                for summary in &viz.summaries {
                    let processed = providers::optional_node(
                        summary.optional,
                        Self::process_summary_node(engine, summary, value_non_synth, matches, stream),
                    )?;
                    if processed.is_some() {
                        return Ok(Some(()));
                    }
                }
                Ok(None)
            })();
            match attempt {
                Ok(Some(())) => return Ok(()),
                Ok(None) => continue,
                Err(err) => {
                    debug!("Error occurred: {err}");
                    continue;
                }
            }
        }

        debug!("No matching display string candidate found, fallback to default");
        self.output_summary_from_children(engine, value_non_synth, stream);
        Ok(())
    }

    fn output_summary_from_children(
        &self,
        engine: &Rc<Engine>,
        value_non_synth: &ValueRef,
        stream: &mut Stream,
    ) {
        let mut provider = self.prepare_children(engine, value_non_synth);
        engine.summarize_children(provider.as_mut(), stream);
    }

    /// Select the first candidate whose providers build, bump the
    /// recursion level while building, and multiplex the block providers.
    pub fn prepare_children(
        &self,
        engine: &Rc<Engine>,
        value_non_synth: &ValueRef,
    ) -> Box<dyn ChildrenProvider> {
        let value_name = value_non_synth.name().unwrap_or_default();
        let value_type_name = value_non_synth.type_name();
        debug!(
            "Initial retrieving children of value named '{value_name}' of type '{value_type_name}'..."
        );

        let session = engine.session();
        let level = session.recursion_level();
        let max_level = session.settings.max_recursion_level.get();
        if level >= max_level.saturating_sub(1) {
            debug!(
                "Natvis visualizer for type '{value_type_name}' of value '{value_name}' has been \
                 ignored: recursion level exceeds the maximum supported limit of {max_level}"
            );
            return Box::new(StructChildrenProvider::new(value_non_synth.clone()));
        }

        for (viz, type_viz_name, matches) in &self.candidates {
            if !Self::check_include_exclude_view(viz, value_non_synth) {
                continue;
            }
            let Some(item_providers) = &viz.item_providers else {
                // a matching visualizer without an expansion: the value
                // keeps its struct children
                break;
            };
            debug!("Trying visualizer for type '{type_viz_name}'...");
            let _scope_guard = session.install_intrinsics_scope(
                Some(Rc::clone(&viz.global_intrinsics)),
                Some(Rc::clone(&viz.type_intrinsics)),
                matches.clone(),
            );
            let _level_guard = session.enter_recursion_level(level + 1);
            match build_child_providers(
                engine,
                item_providers,
                value_non_synth,
                matches,
                viz.hide_raw_view,
            ) {
                Ok(mut block_providers) => {
                    let mut start_indexes = Vec::with_capacity(block_providers.len());
                    let mut start_index = 0;
                    for provider in block_providers.iter_mut() {
                        start_indexes.push(start_index);
                        start_index += provider.num_children();
                    }
                    return Box::new(NatVisChildrenProvider {
                        engine: Rc::clone(engine),
                        viz: Rc::clone(viz),
                        child_providers: block_providers,
                        start_indexes,
                        format_spec: value_non_synth.format(),
                        wildcards: matches.clone(),
                    });
                }
                Err(err) => {
                    debug!("Error occurred: {err}");
                    continue;
                }
            }
        }

        debug!("No child provider found for '{value_type_name}'");
        Box::new(StructChildrenProvider::new(value_non_synth.clone()))
    }

    #[must_use]
    pub fn type_name_template(&self) -> &TypeNameTemplate {
        &self.type_name_template
    }
}

/// Multiplexes the block providers of the winning visualizer behind one
/// children interface; child indexes are split by running start offsets.
pub struct NatVisChildrenProvider {
    engine: Rc<Engine>,
    viz: Rc<TypeViz>,
    child_providers: Vec<Box<dyn ChildrenProvider>>,
    start_indexes: Vec<usize>,
    format_spec: FormatCode,
    wildcards: Vec<String>,
}

impl NatVisChildrenProvider {
    fn find_child_provider(&mut self, index: usize) -> Option<(usize, usize)> {
        let provider_index = match self
            .start_indexes
            .iter()
            .position(|&start| start > index)
        {
            Some(position) => position.checked_sub(1)?,
            None => self.child_providers.len().checked_sub(1)?,
        };
        let relative = index - self.start_indexes[provider_index];
        Some((provider_index, relative))
    }
}

impl ChildrenProvider for NatVisChildrenProvider {
    fn num_children(&mut self) -> usize {
        self.child_providers
            .iter_mut()
            .map(|provider| provider.num_children())
            .sum()
    }

    fn get_child_index(&mut self, name: &str) -> usize {
        for provider in &mut self.child_providers {
            let index = provider.get_child_index(name);
            if index != INVALID_CHILD_INDEX {
                return index;
            }
        }
        INVALID_CHILD_INDEX
    }

    fn get_child_at_index(&mut self, index: usize) -> Result<ValueRef, EvalError> {
        let (provider_index, relative_index) = self
            .find_child_provider(index)
            .ok_or_else(|| EvalError::runtime(format!("no provider for child {index}")))?;

        let _scope_guard = self.engine.session().install_intrinsics_scope(
            Some(Rc::clone(&self.viz.global_intrinsics)),
            Some(Rc::clone(&self.viz.type_intrinsics)),
            self.wildcards.clone(),
        );
        let child = self.child_providers[provider_index].get_child_at_index(relative_index)?;
        // apply inheritable formatting from the parent value
        overlay_child_format(&child, self.format_spec);
        Ok(child)
    }

    fn try_update_size(&mut self, value_non_synth: &ValueRef) -> UpdateResult {
        let old_size = self.num_children();
        let mut change = UpdateResult::empty();
        for provider in &mut self.child_providers {
            change |= provider.try_update_size(value_non_synth);
        }
        if change.contains(UpdateResult::SIZE_UPDATED) {
            let mut start_index = 0;
            self.start_indexes.clear();
            for provider in &mut self.child_providers {
                self.start_indexes.push(start_index);
                start_index += provider.num_children();
            }
        }
        if old_size != self.num_children() {
            UpdateResult::SIZE_UPDATED
        } else {
            UpdateResult::empty()
        }
    }
}

/// Top-level summary entry point: renders the summary string of a value
/// (with markup sentinels when enabled).
pub fn declarative_summary(engine: &Rc<Engine>, val: &ValueRef) -> String {
    update_value_dynamic_state(val);
    let val_non_synth = val.non_synthetic();
    let mut stream = engine.new_stream(engine.session().recursion_level());
    engine.output_object(&mut stream, &val_non_synth);
    stream.into_string()
}

/// The synthetic-children boundary the debugger talks to: creates the
/// children provider lazily, refreshes its size on `num_children`, and
/// swallows provider errors under the suppress-errors setting.
pub struct DeclarativeSynthProvider {
    engine: Rc<Engine>,
    val_non_synth: ValueRef,
    children_provider: Option<Box<dyn ChildrenProvider>>,
}

impl DeclarativeSynthProvider {
    #[must_use]
    pub fn new(engine: Rc<Engine>, val: &ValueRef) -> Self {
        update_value_dynamic_state(val);
        Self {
            engine,
            val_non_synth: val.non_synthetic(),
            children_provider: None,
        }
    }

    fn ensure_children_provider(&mut self) -> &mut Box<dyn ChildrenProvider> {
        if self.children_provider.is_none() {
            debug!(
                "Retrieving children of value named '{}'...",
                self.val_non_synth.name().unwrap_or_default()
            );
            self.children_provider = Some(self.engine.prepare_children(&self.val_non_synth));
        }
        self.children_provider.as_mut().unwrap()
    }

    /// The `max_children` hint is accepted for interface parity; sizes
    /// here are computed by the providers anyway.
    pub fn num_children(&mut self, _max_children: usize) -> usize {
        if self.children_provider.is_none() {
            self.ensure_children_provider();
        } else {
            let val = self.val_non_synth.clone();
            self.ensure_children_provider().try_update_size(&val);
        }
        self.ensure_children_provider().num_children()
    }

    pub fn get_child_index(&mut self, name: &str) -> usize {
        self.ensure_children_provider().get_child_index(name)
    }

    pub fn get_child_at_index(&mut self, index: usize) -> Option<ValueRef> {
        match self.ensure_children_provider().get_child_at_index(index) {
            Ok(child) => Some(child),
            Err(err) => {
                debug!("get_child_at_index({index}) failed: {err}");
                None
            }
        }
    }

    #[must_use]
    pub fn has_children(&self) -> bool {
        self.val_non_synth.might_have_children()
    }

    /// Children are rebuilt per stop; `num_children` refreshes sizes, so
    /// nothing is cached across stops.
    pub fn update(&mut self) -> bool {
        false
    }
}
