//! A miniature in-memory debugger target used to drive the engine
//! end-to-end: a graph of typed objects plus an evaluator for the small
//! C++ subset the visualizer fixtures use (members, subscripts, literals,
//! comparisons, assignment, increment, persistent variables).

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use natvis_engine::eval::{
    DebugType, DebugValue, DebuggerHost, EvalError, EvalOptions, TypeClass, TypeRef, ValueRef,
};
use natvis_engine::format::FormatCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeShape {
    Scalar(TypeClass),
    Pointer,
    Array(usize),
    Struct,
}

pub struct TypeData {
    name: String,
    shape: TypeShape,
    byte_size: usize,
    inner: Option<MockType>,
}

/// Cheap cloneable type handle.
#[derive(Clone)]
pub struct MockType(Rc<TypeData>);

impl MockType {
    pub fn scalar(name: &str, byte_size: usize) -> Self {
        Self(Rc::new(TypeData {
            name: name.to_string(),
            shape: TypeShape::Scalar(TypeClass::Builtin),
            byte_size,
            inner: None,
        }))
    }

    pub fn int() -> Self {
        Self::scalar("int", 4)
    }

    pub fn structure(name: &str) -> Self {
        Self(Rc::new(TypeData {
            name: name.to_string(),
            shape: TypeShape::Struct,
            byte_size: 16,
            inner: None,
        }))
    }

    pub fn pointer_to(inner: &MockType) -> Self {
        Self(Rc::new(TypeData {
            name: format!("{} *", inner.0.name),
            shape: TypeShape::Pointer,
            byte_size: 8,
            inner: Some(inner.clone()),
        }))
    }

    pub fn array_of(inner: &MockType, len: usize) -> Self {
        Self(Rc::new(TypeData {
            name: format!("{} [{len}]", inner.0.name),
            shape: TypeShape::Array(len),
            byte_size: inner.0.byte_size * len,
            inner: Some(inner.clone()),
        }))
    }
}

impl DebugType for MockType {
    fn name(&self) -> String {
        self.0.name.clone()
    }

    fn type_class(&self) -> TypeClass {
        match self.0.shape {
            TypeShape::Scalar(class) => class,
            TypeShape::Pointer => TypeClass::Pointer,
            TypeShape::Array(_) => TypeClass::Array,
            TypeShape::Struct => TypeClass::Struct,
        }
    }

    fn byte_size(&self) -> usize {
        self.0.byte_size
    }

    fn pointee_type(&self) -> Option<TypeRef> {
        match self.0.shape {
            TypeShape::Pointer => self.0.inner.clone().map(|t| Rc::new(t) as TypeRef),
            _ => None,
        }
    }

    fn element_type(&self) -> Option<TypeRef> {
        match self.0.shape {
            TypeShape::Array(_) => self.0.inner.clone().map(|t| Rc::new(t) as TypeRef),
            _ => None,
        }
    }

    fn unqualified(&self) -> TypeRef {
        Rc::new(self.clone())
    }

    fn array_type(&self, size: usize) -> TypeRef {
        Rc::new(Self::array_of(self, size))
    }

    fn pointer_type(&self) -> TypeRef {
        Rc::new(Self::pointer_to(self))
    }
}

/// Where a pointer lands: an element of an array object, or (index 0 of)
/// any other object.
#[derive(Clone)]
pub struct PointerTarget {
    pub object: Rc<Object>,
    pub index: usize,
}

pub enum Data {
    Int(Cell<i64>),
    Bool(Cell<bool>),
    Pointer(RefCell<Option<PointerTarget>>),
    Array(Vec<Rc<Object>>),
    Struct(Vec<(String, Rc<Object>)>),
}

pub struct Object {
    pub data: Data,
    pub type_: MockType,
    pub address: u64,
}

/// The fake debugged process: an object registry plus the persistent
/// convenience variables the `<Variable>` machinery creates.
pub struct MockTarget {
    objects: RefCell<HashMap<u64, Rc<Object>>>,
    persistent: RefCell<HashMap<String, RValue>>,
    next_address: Cell<u64>,
}

impl MockTarget {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            objects: RefCell::new(HashMap::new()),
            persistent: RefCell::new(HashMap::new()),
            next_address: Cell::new(0x1000),
        })
    }

    pub fn alloc(self: &Rc<Self>, type_: MockType, data: Data) -> Rc<Object> {
        let address = self.next_address.get();
        self.next_address.set(address + 0x40);
        let object = Rc::new(Object {
            data,
            type_,
            address,
        });
        self.objects.borrow_mut().insert(address, Rc::clone(&object));
        object
    }

    pub fn alloc_int(self: &Rc<Self>, value: i64) -> Rc<Object> {
        self.alloc(MockType::int(), Data::Int(Cell::new(value)))
    }

    pub fn alloc_int_array(self: &Rc<Self>, values: &[i64]) -> Rc<Object> {
        let elems: Vec<Rc<Object>> = values.iter().map(|&v| self.alloc_int(v)).collect();
        self.alloc(
            MockType::array_of(&MockType::int(), values.len()),
            Data::Array(elems),
        )
    }

    pub fn alloc_pointer(self: &Rc<Self>, pointee: &MockType, target: Option<PointerTarget>) -> Rc<Object> {
        self.alloc(
            MockType::pointer_to(pointee),
            Data::Pointer(RefCell::new(target)),
        )
    }

    pub fn alloc_struct(self: &Rc<Self>, type_name: &str, fields: Vec<(&str, Rc<Object>)>) -> Rc<Object> {
        self.alloc(
            MockType::structure(type_name),
            Data::Struct(
                fields
                    .into_iter()
                    .map(|(name, object)| (name.to_string(), object))
                    .collect(),
            ),
        )
    }
}

struct ValueCore {
    name: Option<String>,
    object: Rc<Object>,
    type_override: Option<MockType>,
    format: Cell<FormatCode>,
    metadata: RefCell<HashMap<String, String>>,
    target: Rc<MockTarget>,
    path: Option<String>,
}

/// Cheap cloneable value handle over one object.
#[derive(Clone)]
pub struct MockValue(Rc<ValueCore>);

impl MockValue {
    pub fn new(target: &Rc<MockTarget>, object: &Rc<Object>, name: Option<&str>, path: Option<&str>) -> Self {
        Self(Rc::new(ValueCore {
            name: name.map(str::to_string),
            object: Rc::clone(object),
            type_override: None,
            format: Cell::new(FormatCode::DEFAULT),
            metadata: RefCell::new(HashMap::new()),
            target: Rc::clone(target),
            path: path.map(str::to_string),
        }))
    }

    fn with_object(&self, object: &Rc<Object>, name: Option<&str>) -> Self {
        Self::new(&self.0.target, object, name, None)
    }

    fn mock_type(&self) -> MockType {
        self.0
            .type_override
            .clone()
            .unwrap_or_else(|| self.0.object.type_.clone())
    }

    pub fn as_ref(&self) -> ValueRef {
        Rc::new(self.clone())
    }
}

/// Intermediate result of the expression evaluator.
#[derive(Clone)]
enum RValue {
    Value(MockValue),
    Int(i64),
    Bool(bool),
    Null,
}

impl RValue {
    fn as_int(&self) -> Result<i64, EvalError> {
        match self {
            Self::Int(value) => Ok(*value),
            Self::Bool(value) => Ok(i64::from(*value)),
            Self::Null => Ok(0),
            Self::Value(value) => match &value.0.object.data {
                Data::Int(cell) => Ok(cell.get()),
                Data::Bool(cell) => Ok(i64::from(cell.get())),
                Data::Pointer(target) => Ok(target
                    .borrow()
                    .as_ref()
                    .map(|t| pointer_address(t) as i64)
                    .unwrap_or(0)),
                _ => Err(EvalError::runtime("value is not an integer")),
            },
        }
    }

    fn truthy(&self) -> Result<bool, EvalError> {
        Ok(self.as_int()? != 0)
    }
}

fn pointer_address(target: &PointerTarget) -> u64 {
    match &target.object.data {
        Data::Array(elems) => elems
            .get(target.index)
            .map(|e| e.address)
            .unwrap_or(target.object.address),
        _ => target.object.address,
    }
}

/// Recursive-descent evaluator over the statement list of one expression.
struct Interpreter<'ctx> {
    target: &'ctx Rc<MockTarget>,
    this_object: &'ctx Rc<Object>,
    this_value: &'ctx MockValue,
    locals: HashMap<String, RValue>,
}

impl<'ctx> Interpreter<'ctx> {
    fn run(&mut self, code: &str) -> Result<RValue, EvalError> {
        let mut last = RValue::Null;
        for statement in code.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            last = self.run_statement(statement)?;
        }
        Ok(last)
    }

    fn run_statement(&mut self, statement: &str) -> Result<RValue, EvalError> {
        for decl in ["auto&&", "auto"] {
            if let Some(rest) = statement.strip_prefix(decl) {
                if rest.starts_with([' ', '\t']) {
                    let (name, rest) = split_ident(rest.trim_start())
                        .ok_or_else(|| EvalError::parse(format!("bad declaration '{statement}'")))?;
                    let rest = rest
                        .trim_start()
                        .strip_prefix('=')
                        .ok_or_else(|| EvalError::parse("missing '=' in declaration"))?;
                    let value = self.eval_expr(rest.trim())?;
                    self.set_variable(name, value.clone());
                    return Ok(value);
                }
            }
        }
        if let Some(rest) = statement.strip_prefix("++") {
            let (name, _) = split_ident(rest.trim())
                .ok_or_else(|| EvalError::parse(format!("bad increment '{statement}'")))?;
            let value = RValue::Int(self.lookup(name)?.as_int()? + 1);
            self.set_variable(name, value.clone());
            return Ok(value);
        }
        if let Some((lhs, rhs)) = split_assignment(statement) {
            let value = self.eval_expr(rhs.trim())?;
            self.set_variable(lhs.trim(), value.clone());
            return Ok(value);
        }
        self.eval_expr(statement)
    }

    fn set_variable(&mut self, name: &str, value: RValue) {
        if name.starts_with('$') {
            self.target
                .persistent
                .borrow_mut()
                .insert(name.to_string(), value);
        } else {
            self.locals.insert(name.to_string(), value);
        }
    }

    fn lookup(&self, name: &str) -> Result<RValue, EvalError> {
        match name {
            "true" => return Ok(RValue::Bool(true)),
            "false" => return Ok(RValue::Bool(false)),
            "nullptr" => return Ok(RValue::Null),
            "this" => return Ok(RValue::Value(self.this_value.clone())),
            _ => {}
        }
        if name.starts_with('$') {
            if let Some(value) = self.target.persistent.borrow().get(name) {
                return Ok(value.clone());
            }
            return Err(EvalError::parse(format!("unknown variable '{name}'")));
        }
        if let Some(value) = self.locals.get(name) {
            return Ok(value.clone());
        }
        if let Data::Struct(fields) = &self.this_object.data {
            if let Some((_, object)) = fields.iter().find(|(field, _)| field == name) {
                return Ok(RValue::Value(self.this_value.with_object(object, Some(name))));
            }
        }
        Err(EvalError::parse(format!("use of undeclared identifier '{name}'")))
    }

    fn eval_expr(&mut self, expr: &str) -> Result<RValue, EvalError> {
        let mut parser = Parser {
            interp: self,
            s: expr,
            pos: 0,
        };
        let value = parser.parse_compare()?;
        parser.skip_ws();
        if parser.pos != parser.s.len() {
            return Err(EvalError::parse(format!(
                "unexpected trailing input in '{expr}'"
            )));
        }
        Ok(value)
    }
}

fn split_ident(s: &str) -> Option<(&str, &str)> {
    let end = s
        .char_indices()
        .find(|(i, c)| {
            !(c.is_alphanumeric() || *c == '_' || *c == '$' || (*i == 0 && *c == '$'))
        })
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    Some((&s[..end], &s[end..]))
}

/// Find a top-level `=` that is not part of `==`, `!=`, `<=`, `>=`.
fn split_assignment(statement: &str) -> Option<(&str, &str)> {
    let bytes = statement.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth = depth.saturating_sub(1),
            b'=' if depth == 0 => {
                let prev = i.checked_sub(1).map(|p| bytes[p]);
                if bytes.get(i + 1) == Some(&b'=') {
                    i += 2;
                    continue;
                }
                if matches!(prev, Some(b'=') | Some(b'!') | Some(b'<') | Some(b'>')) {
                    i += 1;
                    continue;
                }
                return Some((&statement[..i], &statement[i + 1..]));
            }
            _ => {}
        }
        i += 1;
    }
    None
}

struct Parser<'run, 'ctx> {
    interp: &'run mut Interpreter<'ctx>,
    s: &'run str,
    pos: usize,
}

impl Parser<'_, '_> {
    fn skip_ws(&mut self) {
        while self.s[self.pos..].starts_with([' ', '\t', '\n', '\r']) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if self.s[self.pos..].starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn parse_compare(&mut self) -> Result<RValue, EvalError> {
        let left = self.parse_additive()?;
        self.skip_ws();
        for op in ["==", "!=", "<=", ">=", "<", ">"] {
            if self.eat(op) {
                let right = self.parse_additive()?;
                let result = match op {
                    "==" => left.as_int()? == right.as_int()?,
                    "!=" => left.as_int()? != right.as_int()?,
                    "<=" => left.as_int()? <= right.as_int()?,
                    ">=" => left.as_int()? >= right.as_int()?,
                    "<" => left.as_int()? < right.as_int()?,
                    _ => left.as_int()? > right.as_int()?,
                };
                return Ok(RValue::Bool(result));
            }
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<RValue, EvalError> {
        let mut left = self.parse_unary()?;
        loop {
            self.skip_ws();
            if self.eat("+") {
                let right = self.parse_unary()?;
                left = RValue::Int(left.as_int()? + right.as_int()?);
            } else if self.s[self.pos..].starts_with('-') && !self.s[self.pos..].starts_with("->") {
                self.pos += 1;
                let right = self.parse_unary()?;
                left = RValue::Int(left.as_int()? - right.as_int()?);
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_unary(&mut self) -> Result<RValue, EvalError> {
        self.skip_ws();
        for cast in ["(bool)", "(long long)", "(unsigned long long)", "(int)"] {
            if self.eat(cast) {
                return self.parse_unary();
            }
        }
        if self.eat("++") {
            let name = self.parse_ident()?;
            let value = RValue::Int(self.interp.lookup(&name)?.as_int()? + 1);
            self.interp.set_variable(&name, value.clone());
            return Ok(value);
        }
        if self.eat("!") {
            let value = self.parse_unary()?;
            return Ok(RValue::Bool(!value.truthy()?));
        }
        if self.eat("*") {
            let value = self.parse_unary()?;
            return deref(&value);
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<RValue, EvalError> {
        let mut value = self.parse_primary()?;
        loop {
            self.skip_ws();
            if self.eat("->") {
                let name = self.parse_ident()?;
                value = member(&deref(&value)?, &name)?;
            } else if self.eat(".") {
                let name = self.parse_ident()?;
                value = member(&value, &name)?;
            } else if self.eat("[") {
                let index = self.parse_compare()?;
                if !self.eat("]") {
                    return Err(EvalError::parse("missing ']'"));
                }
                value = subscript(&value, index.as_int()?)?;
            } else {
                return Ok(value);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<RValue, EvalError> {
        self.skip_ws();
        if self.eat("(") {
            let value = self.parse_compare()?;
            if !self.eat(")") {
                return Err(EvalError::parse("missing ')'"));
            }
            return Ok(value);
        }
        let rest = &self.s[self.pos..];
        if rest.starts_with(|c: char| c.is_ascii_digit()) {
            let end = rest
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(rest.len());
            let number: i64 = rest[..end]
                .parse()
                .map_err(|_| EvalError::parse("bad number"))?;
            self.pos += end;
            return Ok(RValue::Int(number));
        }
        let name = self.parse_ident()?;
        self.interp.lookup(&name)
    }

    fn parse_ident(&mut self) -> Result<String, EvalError> {
        self.skip_ws();
        let (name, _) = split_ident(&self.s[self.pos..])
            .ok_or_else(|| EvalError::parse(format!("expected identifier at '{}'", &self.s[self.pos..])))?;
        self.pos += name.len();
        Ok(name.to_string())
    }
}

fn deref(value: &RValue) -> Result<RValue, EvalError> {
    let RValue::Value(value) = value else {
        return Err(EvalError::runtime("cannot dereference a non-pointer"));
    };
    match &value.0.object.data {
        Data::Pointer(target) => {
            let target = target
                .borrow()
                .clone()
                .ok_or_else(|| EvalError::runtime("null pointer dereference"))?;
            let object = resolve_pointer_target(&target)?;
            Ok(RValue::Value(value.with_object(&object, None)))
        }
        _ => Err(EvalError::runtime("cannot dereference a non-pointer")),
    }
}

fn resolve_pointer_target(target: &PointerTarget) -> Result<Rc<Object>, EvalError> {
    match &target.object.data {
        Data::Array(elems) => elems
            .get(target.index)
            .cloned()
            .ok_or_else(|| EvalError::runtime("pointer past the end")),
        _ if target.index == 0 => Ok(Rc::clone(&target.object)),
        _ => Err(EvalError::runtime("pointer past the end")),
    }
}

fn member(value: &RValue, name: &str) -> Result<RValue, EvalError> {
    let RValue::Value(value) = value else {
        return Err(EvalError::runtime("member access on a non-struct"));
    };
    // auto-deref one pointer hop, like the evaluator's member lookup
    let owner = match &value.0.object.data {
        Data::Pointer(_) => match deref(&RValue::Value(value.clone()))? {
            RValue::Value(v) => v,
            _ => unreachable!(),
        },
        _ => value.clone(),
    };
    match &owner.0.object.data {
        Data::Struct(fields) => fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, object)| RValue::Value(owner.with_object(object, Some(name))))
            .ok_or_else(|| EvalError::parse(format!("no member named '{name}'"))),
        _ => Err(EvalError::runtime("member access on a non-struct")),
    }
}

fn subscript(value: &RValue, index: i64) -> Result<RValue, EvalError> {
    let RValue::Value(value) = value else {
        return Err(EvalError::runtime("subscript on a non-container"));
    };
    let index = usize::try_from(index).map_err(|_| EvalError::runtime("negative subscript"))?;
    match &value.0.object.data {
        Data::Array(elems) => elems
            .get(index)
            .map(|object| RValue::Value(value.with_object(object, None)))
            .ok_or_else(|| EvalError::runtime("subscript out of range")),
        Data::Pointer(target) => {
            let target = target
                .borrow()
                .clone()
                .ok_or_else(|| EvalError::runtime("null pointer subscript"))?;
            let shifted = PointerTarget {
                object: target.object,
                index: target.index + index,
            };
            let object = resolve_pointer_target(&shifted)?;
            Ok(RValue::Value(value.with_object(&object, None)))
        }
        _ => Err(EvalError::runtime("subscript on a non-container")),
    }
}

impl DebugValue for MockValue {
    fn name(&self) -> Option<String> {
        self.0.name.clone()
    }

    fn value_type(&self) -> TypeRef {
        Rc::new(self.mock_type())
    }

    fn non_synthetic(&self) -> ValueRef {
        Rc::new(self.clone())
    }

    fn format(&self) -> FormatCode {
        self.0.format.get()
    }

    fn set_format(&self, code: FormatCode) {
        self.0.format.set(code);
    }

    fn path(&self) -> Option<String> {
        self.0.path.clone()
    }

    fn address(&self) -> Option<u64> {
        Some(self.0.object.address)
    }

    fn value_as_unsigned(&self) -> Option<u64> {
        match &self.0.object.data {
            Data::Int(cell) => Some(cell.get() as u64),
            Data::Bool(cell) => Some(u64::from(cell.get())),
            Data::Pointer(target) => Some(
                target
                    .borrow()
                    .as_ref()
                    .map(pointer_address)
                    .unwrap_or(0),
            ),
            _ => None,
        }
    }

    fn value_as_signed(&self) -> Option<i64> {
        self.value_as_unsigned().map(|v| v as i64)
    }

    fn value_string(&self) -> Option<String> {
        match &self.0.object.data {
            Data::Int(cell) => Some(cell.get().to_string()),
            Data::Bool(cell) => Some(cell.get().to_string()),
            Data::Pointer(target) => Some(format!(
                "0x{:x}",
                target.borrow().as_ref().map(pointer_address).unwrap_or(0)
            )),
            _ => None,
        }
    }

    fn metadata(&self, key: &str) -> Option<String> {
        self.0.metadata.borrow().get(key).cloned()
    }

    fn set_metadata(&self, key: &str, value: &str) {
        self.0
            .metadata
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
    }

    fn evaluate_expression(
        &self,
        code: &str,
        _options: &EvalOptions,
        name: Option<&str>,
    ) -> Result<ValueRef, EvalError> {
        let mut interp = Interpreter {
            target: &self.0.target,
            this_object: &self.0.object,
            this_value: self,
            locals: HashMap::new(),
        };
        let result = interp.run(code)?;
        let value = match result {
            RValue::Value(value) => MockValue(Rc::new(ValueCore {
                name: name.map(str::to_string),
                object: Rc::clone(&value.0.object),
                type_override: value.0.type_override.clone(),
                format: Cell::new(FormatCode::DEFAULT),
                metadata: RefCell::new(HashMap::new()),
                target: Rc::clone(&self.0.target),
                path: None,
            })),
            RValue::Int(int_value) => {
                let object = self.0.target.alloc_int(int_value);
                MockValue::new(&self.0.target, &object, name, None)
            }
            RValue::Bool(bool_value) => {
                let object = self
                    .0
                    .target
                    .alloc(MockType::scalar("bool", 1), Data::Bool(Cell::new(bool_value)));
                MockValue::new(&self.0.target, &object, name, None)
            }
            RValue::Null => {
                let object = self.0.target.alloc_pointer(&MockType::int(), None);
                MockValue::new(&self.0.target, &object, name, None)
            }
        };
        Ok(value.as_ref())
    }

    fn create_child_at_offset(
        &self,
        name: &str,
        byte_offset: usize,
        child_type: &TypeRef,
    ) -> Result<ValueRef, EvalError> {
        let Data::Pointer(target) = &self.0.object.data else {
            return Err(EvalError::runtime("not a pointer"));
        };
        let target = target
            .borrow()
            .clone()
            .ok_or_else(|| EvalError::runtime("null pointer"))?;
        let elem_size = child_type.byte_size().max(1);
        let shifted = PointerTarget {
            object: target.object,
            index: target.index + byte_offset / elem_size,
        };
        let object = resolve_pointer_target(&shifted)?;
        Ok(self.with_object(&object, Some(name)).as_ref())
    }

    fn create_value_from_address(
        &self,
        name: &str,
        address: u64,
        _value_type: &TypeRef,
    ) -> Result<ValueRef, EvalError> {
        let object = self
            .0
            .target
            .objects
            .borrow()
            .get(&address)
            .cloned()
            .ok_or_else(|| EvalError::runtime("no object at address"))?;
        Ok(self.with_object(&object, Some(name)).as_ref())
    }

    fn cast(&self, target: &TypeRef) -> Result<ValueRef, EvalError> {
        let core = ValueCore {
            name: self.0.name.clone(),
            object: Rc::clone(&self.0.object),
            type_override: Some(MockType(Rc::new(TypeData {
                name: target.name(),
                shape: match target.type_class() {
                    TypeClass::Pointer => TypeShape::Pointer,
                    TypeClass::Array => TypeShape::Array(0),
                    TypeClass::Struct => TypeShape::Struct,
                    class => TypeShape::Scalar(class),
                },
                byte_size: target.byte_size(),
                inner: None,
            }))),
            format: Cell::new(FormatCode::DEFAULT),
            metadata: RefCell::new(HashMap::new()),
            target: Rc::clone(&self.0.target),
            path: None,
        };
        Ok(MockValue(Rc::new(core)).as_ref())
    }

    fn dereference(&self) -> Result<ValueRef, EvalError> {
        match deref(&RValue::Value(self.clone()))? {
            RValue::Value(value) => Ok(value.as_ref()),
            _ => Err(EvalError::runtime("cannot dereference")),
        }
    }

    fn address_of(&self) -> Result<ValueRef, EvalError> {
        let pointee_type = self.mock_type();
        let object = self.0.target.alloc_pointer(
            &pointee_type,
            Some(PointerTarget {
                object: Rc::clone(&self.0.object),
                index: 0,
            }),
        );
        Ok(self.with_object(&object, None).as_ref())
    }

    fn num_children(&self) -> usize {
        match &self.0.object.data {
            Data::Struct(fields) => fields.len(),
            Data::Array(elems) => elems.len(),
            _ => 0,
        }
    }

    fn child_at_index(&self, index: usize) -> Option<ValueRef> {
        match &self.0.object.data {
            Data::Struct(fields) => fields
                .get(index)
                .map(|(name, object)| self.with_object(object, Some(name)).as_ref()),
            Data::Array(elems) => elems
                .get(index)
                .map(|object| self.with_object(object, Some(&format!("[{index}]"))).as_ref()),
            _ => None,
        }
    }

    fn index_of_child_with_name(&self, name: &str) -> Option<usize> {
        match &self.0.object.data {
            Data::Struct(fields) => fields.iter().position(|(field, _)| field == name),
            _ => None,
        }
    }
}

/// Collects the declarations a real debugger would register lazily.
#[derive(Default)]
pub struct MockHost {
    pub declarations: RefCell<Vec<(String, String, bool)>>,
}

impl DebuggerHost for MockHost {
    fn add_top_level_declaration(&self, full_name: &str, body: &str) -> Result<(), EvalError> {
        self.declarations
            .borrow_mut()
            .push((full_name.to_string(), body.to_string(), false));
        Ok(())
    }

    fn add_top_level_declaration_by_regex(
        &self,
        name_regex: &str,
        body: &str,
    ) -> Result<(), EvalError> {
        self.declarations
            .borrow_mut()
            .push((name_regex.to_string(), body.to_string(), true));
        Ok(())
    }

    fn remove_all_top_level_declarations(&self) {
        self.declarations.borrow_mut().clear();
    }
}

// --- fixture builders -------------------------------------------------

use natvis_engine::intrinsics::IntrinsicsScope;
use natvis_engine::schema::nodes::{
    ArrayItemsNode, CodeBlockNode, CustomListItemsNode, ItemProvider, LinkedListItemsNode,
    ListValueNode, SizeNode, SyntheticGetterSlot, TreeItemsNode, TreeValueNode, ValuePointerNode,
    VariableNode,
};
use natvis_engine::schema::viz::{
    InterpolatedString, TypeViz, TypeVizExpression, TypeVizName, TypeVizSummary,
};
use natvis_engine::manager::{LoadedVisualizers, VizFileLoader};
use natvis_engine::Error;

pub fn make_viz(names: &[&str], priority: i32) -> TypeViz {
    let type_viz_names = names
        .iter()
        .map(|name| TypeVizName::parse(name).unwrap())
        .collect();
    TypeViz::new(
        type_viz_names,
        true,
        String::new(),
        String::new(),
        priority,
        Rc::new(IntrinsicsScope::default()),
        Rc::new(IntrinsicsScope::default()),
    )
}

pub fn summary(display_string: &str) -> TypeVizSummary {
    TypeVizSummary {
        condition: None,
        value: InterpolatedString::parse(display_string),
        optional: false,
    }
}

pub fn array_items(size_expr: &str, pointer_expr: &str) -> ItemProvider {
    ItemProvider::ArrayItems(ArrayItemsNode {
        condition: None,
        optional: false,
        size_nodes: vec![SizeNode::new(size_expr)],
        value_pointer_nodes: vec![ValuePointerNode {
            expr: TypeVizExpression::new(pointer_expr),
            condition: None,
            getter: SyntheticGetterSlot::default(),
        }],
        getter: SyntheticGetterSlot::default(),
    })
}

pub fn linked_list_items(head: &str, next: &str, value: &str) -> ItemProvider {
    ItemProvider::LinkedListItems(LinkedListItemsNode {
        condition: None,
        optional: false,
        size_nodes: Vec::new(),
        head_pointer: head.to_string(),
        next_pointer: next.to_string(),
        value_node: ListValueNode {
            name: None,
            expr: TypeVizExpression::new(value),
        },
        getter: SyntheticGetterSlot::default(),
    })
}

pub fn tree_items(head: &str, left: &str, right: &str, value: &str) -> ItemProvider {
    ItemProvider::TreeItems(TreeItemsNode {
        condition: None,
        optional: false,
        size_nodes: Vec::new(),
        head_pointer: head.to_string(),
        left_pointer: left.to_string(),
        right_pointer: right.to_string(),
        value_node: TreeValueNode {
            name: None,
            expr: TypeVizExpression::new(value),
            condition: None,
        },
        getter: SyntheticGetterSlot::default(),
    })
}

pub fn custom_list_items(
    variables: Vec<(&str, &str)>,
    code_blocks: Vec<CodeBlockNode>,
) -> ItemProvider {
    ItemProvider::CustomListItems(CustomListItemsNode {
        condition: None,
        optional: false,
        size_nodes: Vec::new(),
        variables: variables
            .into_iter()
            .map(|(name, initial_value)| VariableNode {
                name: name.to_string(),
                initial_value: initial_value.to_string(),
            })
            .collect(),
        code_blocks,
    })
}

pub struct StaticLoader {
    pub visualizers: Vec<Rc<TypeViz>>,
}

impl VizFileLoader for StaticLoader {
    fn load(&self, _filepath: &str) -> Result<LoadedVisualizers, Error> {
        Ok(LoadedVisualizers {
            visualizers: self.visualizers.clone(),
            fingerprint: 1,
        })
    }
}
