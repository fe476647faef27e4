use std::rc::Rc;
use std::{error, fmt};

use log::debug;

use crate::expression::ItemExpression;
use crate::format::FormatCode;
use crate::intrinsics;
use crate::methods::SyntheticMethodCall;
use crate::session::Session;

/// Shared handle to a debugger value.
pub type ValueRef = Rc<dyn DebugValue>;
/// Shared handle to a debugger type.
pub type TypeRef = Rc<dyn DebugType>;
/// Shared handle to a debugged process.
pub type ProcessRef = Rc<dyn DebugProcess>;

/// What went wrong while compiling or running an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalErrorKind {
    /// The expression failed to compile.
    Parse,
    /// The expression compiled but failed at runtime.
    Runtime,
    /// The evaluation could not even be set up.
    Setup,
}

/// An expression failed to compile or run; carries the original evaluator
/// message.
#[derive(Debug, Clone)]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub message: String,
}

impl EvalError {
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            kind: EvalErrorKind::Parse,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn runtime(message: impl Into<String>) -> Self {
        Self {
            kind: EvalErrorKind::Runtime,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn setup(message: impl Into<String>) -> Self {
        Self {
            kind: EvalErrorKind::Setup,
            message: message.into(),
        }
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            EvalErrorKind::Parse => write!(f, "can't parse expression: {}", self.message),
            EvalErrorKind::Runtime => write!(f, "evaluation failed: {}", self.message),
            EvalErrorKind::Setup => write!(f, "evaluation setup failed: {}", self.message),
        }
    }
}

impl error::Error for EvalError {}

/// Classification of a debugger type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeClass {
    Builtin,
    Class,
    Struct,
    Union,
    Enumeration,
    Pointer,
    Reference,
    Array,
    Vector,
    Typedef,
    Function,
    Other,
}

/// Debugger-side type handle, implemented by the host.
pub trait DebugType {
    fn name(&self) -> String;
    fn type_class(&self) -> TypeClass;
    fn byte_size(&self) -> usize;

    fn is_anonymous(&self) -> bool {
        false
    }

    /// Pointee of a pointer type.
    fn pointee_type(&self) -> Option<TypeRef> {
        None
    }

    /// Target of a reference type.
    fn dereferenced_type(&self) -> Option<TypeRef> {
        None
    }

    /// Element of an array or vector type.
    fn element_type(&self) -> Option<TypeRef> {
        None
    }

    /// Aliased type of a typedef.
    fn typedefed_type(&self) -> Option<TypeRef> {
        None
    }

    /// This type with cv-qualifiers stripped.
    fn unqualified(&self) -> TypeRef;

    /// `T[size]` for an element type `T`.
    fn array_type(&self, size: usize) -> TypeRef;

    /// `T *` for this type `T`.
    fn pointer_type(&self) -> TypeRef;

    fn direct_base_classes(&self) -> Vec<TypeRef> {
        Vec::new()
    }

    fn is_pointer(&self) -> bool {
        self.type_class() == TypeClass::Pointer
    }

    fn is_reference(&self) -> bool {
        self.type_class() == TypeClass::Reference
    }

    fn is_array(&self) -> bool {
        self.type_class() == TypeClass::Array
    }
}

/// Debugged process handle; partitions the process-scoped caches.
pub trait DebugProcess {
    fn unique_id(&self) -> u64;

    fn is_valid(&self) -> bool {
        true
    }
}

/// Dynamic-value preference of a value handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicValueMode {
    NoDynamicValues,
    DynamicDontRunTarget,
}

/// Options handed to the host for one expression evaluation.
#[derive(Debug, Clone)]
pub struct EvalOptions {
    pub suppress_persistent_result: bool,
    pub fetch_dynamic: DynamicValueMode,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            suppress_persistent_result: true,
            fetch_dynamic: DynamicValueMode::DynamicDontRunTarget,
        }
    }
}

/// Debugger-side value handle, implemented by the host. Mirrors the subset
/// of the debugger value API the engine relies on; metadata attach/read is
/// the side channel item expressions travel through.
pub trait DebugValue {
    fn name(&self) -> Option<String>;
    fn value_type(&self) -> TypeRef;

    fn type_name(&self) -> String {
        self.value_type().name()
    }

    fn is_valid(&self) -> bool {
        true
    }

    /// Runtime error carried by the value, if its computation failed.
    fn error(&self) -> Option<EvalError> {
        None
    }

    fn is_dynamic(&self) -> bool {
        false
    }

    /// The static counterpart of a dynamic value.
    fn static_value(&self) -> Option<ValueRef> {
        None
    }

    /// The value with any synthetic (engine-provided) layer peeled off.
    fn non_synthetic(&self) -> ValueRef;

    fn set_prefer_dynamic(&self, _mode: DynamicValueMode) {}

    fn format(&self) -> FormatCode;
    fn set_format(&self, code: FormatCode);
    fn set_format_as_array_size(&self, _size: i64) {}

    /// Debugger-computed access path of this value, when one exists.
    fn path(&self) -> Option<String> {
        None
    }

    /// Load address of the value, when it lives in target memory.
    fn address(&self) -> Option<u64> {
        None
    }

    fn value_as_unsigned(&self) -> Option<u64>;
    fn value_as_signed(&self) -> Option<i64>;

    /// The scalar display string (`GetValue`), when the value has one.
    fn value_string(&self) -> Option<String> {
        None
    }

    fn metadata(&self, key: &str) -> Option<String>;
    fn set_metadata(&self, key: &str, value: &str);

    fn evaluate_expression(
        &self,
        code: &str,
        options: &EvalOptions,
        name: Option<&str>,
    ) -> Result<ValueRef, EvalError>;

    fn create_child_at_offset(
        &self,
        name: &str,
        byte_offset: usize,
        child_type: &TypeRef,
    ) -> Result<ValueRef, EvalError>;

    fn create_value_from_address(
        &self,
        name: &str,
        address: u64,
        value_type: &TypeRef,
    ) -> Result<ValueRef, EvalError>;

    fn cast(&self, target: &TypeRef) -> Result<ValueRef, EvalError>;
    fn dereference(&self) -> Result<ValueRef, EvalError>;
    fn address_of(&self) -> Result<ValueRef, EvalError>;

    fn num_children(&self) -> usize;
    fn child_at_index(&self, index: usize) -> Option<ValueRef>;
    fn index_of_child_with_name(&self, name: &str) -> Option<usize>;

    fn might_have_children(&self) -> bool {
        self.num_children() > 0
    }

    fn process(&self) -> Option<ProcessRef> {
        None
    }

    /// Platform path of the module the current frame belongs to.
    fn module_path(&self) -> Option<String> {
        None
    }
}

/// Host entry points for auxiliary top-level declarations and target-wide
/// queries. A host without lazy-declaration support may implement these as
/// no-ops.
pub trait DebuggerHost {
    fn add_top_level_declaration(&self, full_name: &str, body: &str) -> Result<(), EvalError> {
        let _ = (full_name, body);
        Ok(())
    }

    fn add_top_level_declaration_by_regex(
        &self,
        name_regex: &str,
        body: &str,
    ) -> Result<(), EvalError> {
        let _ = (name_regex, body);
        Ok(())
    }

    fn remove_all_top_level_declarations(&self) {}

    /// Address size of the target, in bytes.
    fn address_byte_size(&self) -> usize {
        8
    }
}

/// Prolog/epilog pair wrapped around every evaluation of a
/// `CustomListItems` block so `<Variable>` bindings stay visible.
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    pub prolog: String,
    pub epilog: String,
}

impl EvaluationContext {
    #[must_use]
    pub fn new(prolog: String, epilog: String) -> Self {
        Self { prolog, epilog }
    }

    #[must_use]
    pub fn add_context(&self, expression: &str) -> String {
        if self.prolog.is_empty() && self.epilog.is_empty() {
            return expression.to_string();
        }
        format!(
            "{}; auto&& __natvis__result__ = ({expression}); {}; __natvis__result__;",
            self.prolog, self.epilog
        )
    }
}

/// Per-evaluation settings: optional result name, expression options, and
/// how the result's item expression is recorded.
#[derive(Default)]
pub struct EvalSettings {
    pub name: Option<String>,
    pub options: EvalOptions,
    pub save_expression_in_metadata: bool,
    pub getter_call: Option<SyntheticMethodCall>,
}

impl EvalSettings {
    #[must_use]
    pub fn with_metadata(name: Option<&str>) -> Self {
        Self {
            name: name.map(str::to_string),
            save_expression_in_metadata: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_metadata_getter(name: Option<&str>, getter_call: Option<SyntheticMethodCall>) -> Self {
        Self {
            name: name.map(str::to_string),
            save_expression_in_metadata: true,
            getter_call,
            ..Self::default()
        }
    }
}

/// Substitute `$Tn` wildcards, logging when some are left unresolved.
#[must_use]
pub fn resolve_type_wildcards(expression: &str, wildcards: &[String]) -> String {
    let (resolved, all_resolved) = crate::cpp::resolve_wildcards_checked(expression, wildcards);
    if !all_resolved {
        debug!("There are unresolved wildcards left in the expression '{resolved}'");
    }
    resolved
}

fn execute_eval(
    val: &ValueRef,
    code: &str,
    settings: &EvalSettings,
) -> Result<ValueRef, EvalError> {
    let result = val
        .evaluate_expression(code, &settings.options, settings.name.as_deref())
        .map_err(|err| {
            debug!("Evaluate failed: {err}");
            err
        })?;
    if settings.save_expression_in_metadata {
        ItemExpression::update_item_expression(&result, val, code, settings.getter_call.as_ref());
    } else if settings.name.is_some() {
        ItemExpression::invalidate_item_expression(&result);
    }
    Ok(result)
}

/// Evaluate `expr` in the context of `val`: wraps it with the variable
/// context (if any) and the validated intrinsic prolog, runs it through the
/// host evaluator, and records the item expression of the result.
///
/// A parse failure is an [`EvalError`]; a runtime failure is reported by
/// returning the value that carries the error.
pub fn eval_expression(
    session: &Rc<Session>,
    val: &ValueRef,
    expr: &str,
    settings: &EvalSettings,
    context: Option<&EvaluationContext>,
) -> Result<ValueRef, EvalError> {
    debug!(
        "Evaluate '{expr}' in context of '{}' of type '{}'",
        val.name().unwrap_or_default(),
        val.type_name()
    );

    let expression = match context {
        Some(context) => context.add_context(expr),
        None => expr.to_string(),
    };
    let expression = intrinsics::add_intrinsics_prolog(session, val, expression)?;
    let result = execute_eval(val, &expression, settings)?;

    let result_non_synth = result.non_synthetic();
    if let Some(err) = result_non_synth.error() {
        if err.kind == EvalErrorKind::Parse {
            debug!("Evaluate failed (can't parse expression): {err}");
            return Err(err);
        }
        // runtime errors are handled by the caller
        debug!("Returning value with error: {err}");
        return Ok(result);
    }

    debug!(
        "Evaluate succeed: result type - {}",
        result_non_synth.type_name()
    );
    Ok(result)
}

/// Evaluate a condition expression as `(bool)(…)`. An absent condition is
/// vacuously true.
pub fn eval_condition(
    session: &Rc<Session>,
    val: &ValueRef,
    condition: Option<&str>,
    context: Option<&EvaluationContext>,
) -> Result<bool, EvalError> {
    let Some(condition) = condition.filter(|cond| !cond.is_empty()) else {
        return Ok(true);
    };
    let code = format!("(bool)({condition})");
    let result = eval_expression(session, val, &code, &EvalSettings::default(), context)?;
    Ok(result.value_as_unsigned().unwrap_or(0) != 0)
}

/// The non-synthetic value with dynamic typing disabled; the root every
/// format get/set goes through.
#[must_use]
pub fn get_root_value(val: &ValueRef) -> ValueRef {
    let non_synth = val.non_synthetic();
    non_synth.set_prefer_dynamic(DynamicValueMode::NoDynamicValues);
    non_synth
}
