use std::cell::Cell;
use std::rc::Rc;

use log::debug;

use crate::cpp;
use crate::eval::{EvalError, EvalOptions, ValueRef, resolve_type_wildcards};
use crate::session::Session;

/// Prefix the loader puts on intrinsic call sites inside visualizer
/// expressions, so intrinsic calls never collide with target functions.
pub const INTRINSIC_NAME_PREFIX: &str = "jb$intrinsic$";

#[derive(Debug, Clone)]
pub struct IntrinsicParameter {
    pub parameter_type: String,
    pub parameter_name: Option<String>,
}

/// One `<Intrinsic>` helper definition, scoped to a visualizer or global.
#[derive(Debug)]
pub struct TypeVizIntrinsic {
    pub name: String,
    pub expression: String,
    pub parameters: Vec<IntrinsicParameter>,
    /// Set when some expression of the owning file calls this intrinsic.
    pub is_used: Cell<bool>,
    /// Lazy intrinsics become top-level declarations instead of prolog code.
    pub is_lazy: bool,
    pub optional: bool,
}

impl TypeVizIntrinsic {
    #[must_use]
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
            parameters: Vec::new(),
            is_used: Cell::new(false),
            is_lazy: false,
            optional: false,
        }
    }

    #[must_use]
    pub fn prefixed_name(&self) -> String {
        format!("{INTRINSIC_NAME_PREFIX}{}", self.name)
    }

    /// The prolog definition inlined before evaluated expressions.
    #[must_use]
    pub fn definition_code(&self) -> String {
        let params = self
            .parameters
            .iter()
            .map(|param| {
                format!(
                    "{} {}",
                    param.parameter_type,
                    param.parameter_name.as_deref().unwrap_or("")
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "auto {} = [&]({params}) {{ return ({}); }};",
            self.prefixed_name(),
            self.expression
        )
    }

    /// The code compiled to check that this intrinsic is valid in the
    /// current context, given its already validated dependencies.
    #[must_use]
    pub fn validate_code(&self, dependencies_code: &str) -> Option<String> {
        if self.expression.is_empty() {
            return None;
        }
        Some(format!("{dependencies_code}\n{}", self.definition_code()))
    }
}

/// Ordered list of intrinsics; the loader keeps it in dependency order.
#[derive(Debug, Default)]
pub struct IntrinsicsScope {
    intrinsics: Vec<Rc<TypeVizIntrinsic>>,
}

impl IntrinsicsScope {
    #[must_use]
    pub fn new(intrinsics: Vec<Rc<TypeVizIntrinsic>>) -> Self {
        Self { intrinsics }
    }

    #[must_use]
    pub fn sorted_list(&self) -> &[Rc<TypeVizIntrinsic>] {
        &self.intrinsics
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.intrinsics.is_empty()
    }

    /// Mark every intrinsic whose prefixed name is called inside
    /// `expression` as used.
    pub fn mark_usages_in(&self, expression: &str) {
        let mut search_start = 0;
        while let Some(call) = cpp::search_function_call(expression, search_start) {
            for intrinsic in &self.intrinsics {
                if call.base_name == intrinsic.prefixed_name() || call.base_name == intrinsic.name {
                    intrinsic.is_used.set(true);
                }
            }
            search_start = call.args_end_pos;
        }
    }
}

fn build_prolog(intrinsics: &[Rc<TypeVizIntrinsic>]) -> String {
    intrinsics
        .iter()
        .map(|intrinsic| intrinsic.definition_code())
        .collect::<Vec<_>>()
        .join("\n")
}

fn compile_check(val: &ValueRef, code: &str) -> Result<(), EvalError> {
    let result = val.evaluate_expression(code, &EvalOptions::default(), None)?;
    match result.non_synthetic().error() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn fill_validated_from_scope(
    val: &ValueRef,
    scope: Option<&Rc<IntrinsicsScope>>,
    skip_unused: bool,
    wildcards: &[String],
    validated: &mut Vec<Rc<TypeVizIntrinsic>>,
) -> Result<(), EvalError> {
    let Some(scope) = scope else {
        return Ok(());
    };
    for intrinsic in scope.sorted_list() {
        if skip_unused && !intrinsic.is_used.get() {
            // like VS, unused global intrinsics are not validated
            continue;
        }
        let dependencies_code = build_prolog(validated);
        let Some(check_code) = intrinsic.validate_code(&dependencies_code) else {
            continue;
        };
        let code = resolve_type_wildcards(&format!("{check_code}; 1"), wildcards);
        if let Err(error) = compile_check(val, &code) {
            if intrinsic.optional {
                debug!(
                    "Ignoring error on evaluating optional intrinsic '{}' with expression '{}' on object '{}'. Error: {error}",
                    intrinsic.name,
                    intrinsic.expression,
                    val.type_name()
                );
                continue;
            }
            debug!(
                "Error on evaluating the intrinsic '{}' with expression '{}' on object '{}'. Error: {error}",
                intrinsic.name,
                intrinsic.expression,
                val.type_name()
            );
            return Err(error);
        }

        match validated.iter().position(|item| item.name == intrinsic.name) {
            Some(index) => validated[index] = Rc::clone(intrinsic),
            None => validated.push(Rc::clone(intrinsic)),
        }
    }
    Ok(())
}

fn prepare_intrinsics_prolog(
    val: &ValueRef,
    global_scope: Option<&Rc<IntrinsicsScope>>,
    type_scope: Option<&Rc<IntrinsicsScope>>,
    wildcards: &[String],
) -> Result<String, EvalError> {
    let mut validated = Vec::new();
    fill_validated_from_scope(val, global_scope, true, wildcards, &mut validated)?;
    fill_validated_from_scope(val, type_scope, false, wildcards, &mut validated)?;
    Ok(build_prolog(&validated))
}

/// Prepend the validated, wildcard-resolved intrinsic prolog of the current
/// scope to `expression`. Prologs are cached per `(module path, type name)`
/// for the value's process and survive until a module or symbol event.
pub fn add_intrinsics_prolog(
    session: &Rc<Session>,
    val: &ValueRef,
    expression: String,
) -> Result<String, EvalError> {
    let frame = session.current_intrinsics();
    let has_global = frame
        .global_scope
        .as_ref()
        .is_some_and(|scope| !scope.is_empty());
    let has_type = frame
        .type_scope
        .as_ref()
        .is_some_and(|scope| !scope.is_empty());
    if !has_global && !has_type {
        return Ok(expression);
    }

    let cache_key = (val.module_path().unwrap_or_default(), val.type_name());
    let process = val.process().filter(|process| process.is_valid());
    let cached = process
        .as_ref()
        .and_then(|process| session.cached_prolog(process.unique_id(), &cache_key));

    let prolog = match cached {
        Some(prolog) => prolog,
        None => {
            let raw = prepare_intrinsics_prolog(
                val,
                frame.global_scope.as_ref(),
                frame.type_scope.as_ref(),
                &frame.wildcards,
            )?;
            let prolog = resolve_type_wildcards(&raw, &frame.wildcards);
            if let Some(process) = &process {
                session.store_prolog(process.unique_id(), cache_key, prolog.clone());
            }
            prolog
        }
    };

    if prolog.is_empty() {
        Ok(expression)
    } else {
        Ok(format!("{prolog}\n\n{expression}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_code() {
        let mut intrinsic = TypeVizIntrinsic::new("size", "last - first");
        intrinsic.parameters.push(IntrinsicParameter {
            parameter_type: "long long".to_string(),
            parameter_name: Some("idx".to_string()),
        });
        let code = intrinsic.definition_code();
        assert_eq!(
            code,
            "auto jb$intrinsic$size = [&](long long idx) { return (last - first); };"
        );
    }

    #[test]
    fn test_mark_usages() {
        let scope = IntrinsicsScope::new(vec![
            Rc::new(TypeVizIntrinsic::new("size", "n")),
            Rc::new(TypeVizIntrinsic::new("cap", "m")),
        ]);
        scope.mark_usages_in("1 + jb$intrinsic$size() * 2");
        assert!(scope.sorted_list()[0].is_used.get());
        assert!(!scope.sorted_list()[1].is_used.get());
    }

    #[test]
    fn test_empty_expression_is_skipped() {
        let intrinsic = TypeVizIntrinsic::new("nothing", "");
        assert!(intrinsic.validate_code("deps").is_none());
    }
}
