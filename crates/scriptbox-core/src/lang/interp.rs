//! Tree-walking evaluation of a parsed [`Program`].
//!
//! Every statement and expression node ticks the [`BudgetMonitor`], and
//! every allocation reserves its bytes first, so budget violations abort
//! evaluation at the next node. Host namespace members are resolved through
//! the [`AccessPolicy`] each time they are touched.
//!
//! Two kinds of abrupt completion unwind through the evaluator (see
//! [`Unwind`]): script exceptions, which `try/catch` can intercept, and
//! sandbox failures (budget, access), which it cannot.

use std::cell::RefCell;
use std::rc::Rc;

use super::ast::{
    AssignOp, BinaryOp, DeclKind, Expr, ForHead, LogicalOp, Program, Stmt, UnaryOp,
};
use super::builtins::Builtin;
use super::heap::HeapMeter;
use super::host::{self, HostKind, HostObject};
use super::ops::{
    as_array_index, compare, display_bounded, display_summary, loose_equals, strict_equals,
    to_boolean, to_number, to_property_key, type_of, TextTooLong,
};
use super::value::{
    entry_bytes, function_scope_of, string_bytes, ArrayData, BoundMethod, Closure, EnvRef,
    Environment, JsStr, ObjectData, Tracked, Value, HEADER_BYTES, SLOT_BYTES,
    STRING_OVERHEAD_BYTES,
};
use crate::obs;
use crate::sandbox::budget::BudgetMonitor;
use crate::sandbox::context::ConsoleBuffer;
use crate::sandbox::engine::evaluate_access;
use crate::sandbox::error::{SandboxResult, ScriptFailure};
use crate::sandbox::policy::AccessPolicy;

/// Default limit on nested script function calls.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 128;

/// Values quoted in error messages are cut to this many bytes.
pub(super) const ERROR_PREVIEW_LEN: usize = 256;
/// Uncaught exception messages are cut to this many bytes.
const THROWN_MESSAGE_LEN: usize = 64 * 1024;

/// Tracked allocations are pruned of dead entries once the list reaches
/// this size (and then twice the surviving size).
const PRUNE_FLOOR: usize = 4_096;

/// Abrupt completion of an evaluation step.
#[derive(Debug, Clone)]
pub enum Unwind {
    /// A script exception; catchable.
    Throw(Value),
    /// A sandbox failure; propagates to the session untouched.
    Fail(ScriptFailure),
}

impl From<ScriptFailure> for Unwind {
    fn from(failure: ScriptFailure) -> Self {
        Unwind::Fail(failure)
    }
}

impl Unwind {
    /// The failure an uncaught unwind ends the execution with.
    pub fn into_failure(self) -> ScriptFailure {
        match self {
            Unwind::Fail(failure) => failure,
            Unwind::Throw(thrown) => ScriptFailure::Runtime(describe_thrown(&thrown)),
        }
    }
}

pub type Eval<T> = Result<T, Unwind>;

/// Normal or abrupt statement completion.
#[derive(Debug)]
pub(super) enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Error names used for catchable interpreter errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorName {
    Error,
    TypeError,
    RangeError,
    ReferenceError,
    SyntaxError,
}

impl ErrorName {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorName::Error => "Error",
            ErrorName::TypeError => "TypeError",
            ErrorName::RangeError => "RangeError",
            ErrorName::ReferenceError => "ReferenceError",
            ErrorName::SyntaxError => "SyntaxError",
        }
    }
}

/// One interpreter per execution; dropped (and its object graph torn down)
/// when the execution ends.
pub struct Interpreter<'a> {
    pub(super) monitor: &'a mut BudgetMonitor,
    policy: &'a AccessPolicy,
    pub(super) heap: Rc<HeapMeter>,
    /// Intrinsic objects (`Math`, `console`, …) are charged here so they do
    /// not count against the script's budget.
    pub(super) intrinsic_heap: Rc<HeapMeter>,
    pub(super) console: ConsoleBuffer,
    global: EnvRef,
    call_depth: usize,
    max_call_depth: usize,
    completion: Value,
    tracked: Vec<Tracked>,
    prune_at: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        monitor: &'a mut BudgetMonitor,
        policy: &'a AccessPolicy,
        console: ConsoleBuffer,
        max_call_depth: usize,
    ) -> Self {
        let heap = monitor.heap().clone();
        let global = Environment::global();
        let mut interp = Self {
            monitor,
            policy,
            heap,
            intrinsic_heap: HeapMeter::new(),
            console,
            global: global.clone(),
            call_depth: 0,
            max_call_depth,
            completion: Value::Undefined,
            tracked: Vec::new(),
            prune_at: PRUNE_FLOOR,
        };
        interp.track(Tracked::Env(Rc::downgrade(&global)));
        interp.install_intrinsics();
        interp
    }

    /// Bind a top-level variable.
    pub fn define_global(&mut self, name: &str, value: Value, mutable: bool) {
        self.global
            .borrow_mut()
            .declare(Rc::from(name), value, mutable);
    }

    /// Run `program` to completion; the result is the value of the last
    /// expression statement evaluated at top level (or a top-level `return`).
    pub fn run(&mut self, program: &Program) -> SandboxResult<Value> {
        let global = self.global.clone();
        hoist_vars(&program.body, &global);
        self.hoist_functions(&program.body, &global);
        for stmt in &program.body {
            match self.exec(stmt, &global) {
                Ok(Flow::Return(value)) => return Ok(value),
                Ok(_) => {}
                Err(unwind) => return Err(unwind.into_failure()),
            }
        }
        Ok(std::mem::take(&mut self.completion))
    }

    /// Record the current memory reading on the monitor.
    pub fn sample_memory(&mut self) {
        self.monitor.sample_memory();
    }

    // -- allocation --------------------------------------------------------

    /// Fail with `MemoryExceeded` unless `bytes` more fit in the budget.
    pub(super) fn reserve(&mut self, bytes: usize) -> Eval<()> {
        self.monitor.ensure_can_allocate(bytes)?;
        Ok(())
    }

    /// The `MemoryExceeded` failure for an allocation of `bytes`.
    pub fn memory_exceeded(&mut self, bytes: usize) -> Unwind {
        Unwind::Fail(self.monitor.exceeded_by(bytes))
    }

    /// Bytes of text a new string can still hold.
    pub(super) fn string_room(&self) -> usize {
        self.monitor
            .remaining_bytes()
            .saturating_sub(STRING_OVERHEAD_BYTES)
    }

    /// The display string of `value`, built only as far as the memory budget
    /// allows.
    pub(super) fn display(&mut self, value: &Value) -> Eval<String> {
        let room = self.string_room();
        self.display_within(value, room)
    }

    /// The display string of `value`, failing with `MemoryExceeded` once it
    /// outgrows `room` bytes.
    pub(super) fn display_within(&mut self, value: &Value, room: usize) -> Eval<String> {
        display_bounded(value, room)
            .map_err(|TextTooLong| self.memory_exceeded(room.saturating_add(1)))
    }

    pub(super) fn track(&mut self, tracked: Tracked) {
        if self.tracked.len() >= self.prune_at {
            self.tracked.retain(Tracked::is_alive);
            self.prune_at = (self.tracked.len() * 2).max(PRUNE_FLOOR);
        }
        self.tracked.push(tracked);
    }

    pub fn new_string(&mut self, text: String) -> Eval<Value> {
        self.reserve(string_bytes(text.len()))?;
        Ok(Value::Str(JsStr::charged(text, &self.heap)))
    }

    pub fn new_array(&mut self, items: Vec<Value>) -> Eval<Value> {
        self.reserve(HEADER_BYTES + items.len() * SLOT_BYTES)?;
        let array = Rc::new(RefCell::new(ArrayData::new(items, &self.heap)));
        self.track(Tracked::Array(Rc::downgrade(&array)));
        Ok(Value::Array(array))
    }

    pub fn new_object(&mut self, entries: Vec<(Rc<str>, Value)>) -> Eval<Value> {
        let bytes = HEADER_BYTES + entries.iter().map(|(k, _)| entry_bytes(k)).sum::<usize>();
        self.reserve(bytes)?;
        let mut data = ObjectData::new(&self.heap);
        for (key, value) in entries {
            data.set(key, value);
        }
        let object = Rc::new(RefCell::new(data));
        self.track(Tracked::Object(Rc::downgrade(&object)));
        Ok(Value::Object(object))
    }

    pub(super) fn new_host(&mut self, class: &'static str, kind: HostKind) -> Eval<Value> {
        self.reserve(host::footprint(&kind))?;
        let object = Rc::new(RefCell::new(HostObject::new(class, kind, &self.heap)));
        self.track(Tracked::Host(Rc::downgrade(&object)));
        Ok(Value::Host(object))
    }

    /// A frozen object charged to the intrinsic heap.
    pub(super) fn intrinsic_object(&mut self, entries: Vec<(&str, Value)>) -> Value {
        let mut data = ObjectData::new(&self.intrinsic_heap);
        for (key, value) in entries {
            data.set(Rc::from(key), value);
        }
        data.freeze();
        Value::Object(Rc::new(RefCell::new(data)))
    }

    // -- errors ------------------------------------------------------------

    /// A catchable `{name, message}` error.
    pub fn error(&mut self, name: ErrorName, message: impl Into<String>) -> Unwind {
        let message = message.into();
        let entries = vec![
            (Rc::from("name"), Value::literal_str(name.as_str())),
            (Rc::from("message"), Value::literal_str(&message)),
        ];
        match self.new_object(entries) {
            Ok(object) => Unwind::Throw(object),
            Err(unwind) => unwind,
        }
    }

    pub(super) fn type_error(&mut self, message: impl Into<String>) -> Unwind {
        self.error(ErrorName::TypeError, message)
    }

    pub(super) fn range_error(&mut self, message: impl Into<String>) -> Unwind {
        self.error(ErrorName::RangeError, message)
    }

    fn reference_error(&mut self, message: impl Into<String>) -> Unwind {
        self.error(ErrorName::ReferenceError, message)
    }

    pub(super) fn syntax_error(&mut self, message: impl Into<String>) -> Unwind {
        self.error(ErrorName::SyntaxError, message)
    }

    /// Consult the policy for `identifier`; a denial is an uncatchable
    /// [`ScriptFailure::AccessDenied`].
    pub(super) fn check_host_access(&mut self, identifier: &str) -> Eval<()> {
        let verdict = evaluate_access(self.policy, identifier);
        if verdict.decision.is_allowed() {
            return Ok(());
        }
        obs::emit_policy_denied(identifier, &verdict.rule);
        Err(Unwind::Fail(ScriptFailure::AccessDenied {
            identifier: identifier.to_string(),
        }))
    }

    // -- scopes ------------------------------------------------------------

    fn block_env(&mut self, parent: &EnvRef) -> EnvRef {
        let env = Environment::block(parent);
        self.track(Tracked::Env(Rc::downgrade(&env)));
        env
    }

    fn copy_env(&mut self, env: &EnvRef) -> EnvRef {
        let copy = Environment::copy_of(env);
        self.track(Tracked::Env(Rc::downgrade(&copy)));
        copy
    }

    fn hoist_functions(&mut self, stmts: &[Stmt], env: &EnvRef) {
        for stmt in stmts {
            if let Stmt::Function(def) = stmt {
                if let Some(name) = &def.name {
                    let closure = Value::Function(Rc::new(Closure {
                        def: def.clone(),
                        env: env.clone(),
                    }));
                    env.borrow_mut().declare(name.clone(), closure, true);
                }
            }
        }
    }

    fn resolve(&mut self, env: &EnvRef, name: &str) -> Eval<Option<Value>> {
        let mut current = env.clone();
        loop {
            if let Some(binding) = current.borrow().own(name) {
                return Ok(Some(binding.value.clone()));
            }
            if name == "arguments" && current.borrow().is_function_scope() {
                let args = current.borrow_mut().take_call_args();
                if let Some(args) = args {
                    let array = self.new_array(args)?;
                    current
                        .borrow_mut()
                        .declare(Rc::from("arguments"), array.clone(), true);
                    return Ok(Some(array));
                }
            }
            let parent = current.borrow().parent().cloned();
            match parent {
                Some(parent) => current = parent,
                None => return Ok(None),
            }
        }
    }

    fn lookup(&mut self, env: &EnvRef, name: &str) -> Eval<Value> {
        match self.resolve(env, name)? {
            Some(value) => Ok(value),
            None => Err(self.reference_error(format!("{name} is not defined"))),
        }
    }

    /// Assign to the nearest binding of `name`; undeclared names become
    /// globals.
    fn assign_var(&mut self, env: &EnvRef, name: &Rc<str>, value: Value) -> Eval<()> {
        let mut current = env.clone();
        loop {
            let constant = {
                let mut scope = current.borrow_mut();
                match scope.own_mut(name) {
                    Some(binding) if binding.mutable => {
                        binding.value = value;
                        return Ok(());
                    }
                    Some(_) => true,
                    None => false,
                }
            };
            if constant {
                return Err(self.type_error("Assignment to constant variable."));
            }
            let parent = current.borrow().parent().cloned();
            match parent {
                Some(parent) => current = parent,
                None => {
                    current.borrow_mut().declare(name.clone(), value, true);
                    return Ok(());
                }
            }
        }
    }

    // -- statements --------------------------------------------------------

    fn exec_statements(&mut self, stmts: &[Stmt], env: &EnvRef) -> Eval<Flow> {
        for stmt in stmts {
            match self.exec(stmt, env)? {
                Flow::Normal => {}
                abrupt => return Ok(abrupt),
            }
        }
        Ok(Flow::Normal)
    }

    /// Run a braced block, giving it its own scope only when it declares
    /// something block-scoped.
    fn exec_block(&mut self, stmts: &[Stmt], env: &EnvRef) -> Eval<Flow> {
        if needs_scope(stmts) {
            let scope = self.block_env(env);
            self.hoist_functions(stmts, &scope);
            self.exec_statements(stmts, &scope)
        } else {
            self.exec_statements(stmts, env)
        }
    }

    fn exec(&mut self, stmt: &Stmt, env: &EnvRef) -> Eval<Flow> {
        self.monitor.tick()?;
        match stmt {
            Stmt::Empty | Stmt::Function(_) => Ok(Flow::Normal),
            Stmt::Expr(expr) => {
                self.completion = self.eval(expr, env)?;
                Ok(Flow::Normal)
            }
            Stmt::Decl { kind, decls } => {
                for (name, init) in decls {
                    self.declare(*kind, name, init.as_ref(), env)?;
                }
                Ok(Flow::Normal)
            }
            Stmt::Return(arg) => {
                let value = match arg {
                    Some(expr) => self.eval(expr, env)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            Stmt::If {
                test,
                then,
                otherwise,
            } => {
                if to_boolean(&self.eval(test, env)?) {
                    self.exec(then, env)
                } else if let Some(otherwise) = otherwise {
                    self.exec(otherwise, env)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { test, body } => {
                while to_boolean(&self.eval(test, env)?) {
                    match self.exec(body, env)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::DoWhile { body, test } => {
                loop {
                    match self.exec(body, env)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if !to_boolean(&self.eval(test, env)?) {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => self.exec_for(init.as_deref(), test.as_ref(), update.as_ref(), body, env),
            Stmt::ForEach {
                head,
                kind,
                name,
                iterable,
                body,
            } => self.exec_for_each(head, *kind, name, iterable, body, env),
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            Stmt::Block(stmts) => self.exec_block(stmts, env),
            Stmt::Throw(expr) => {
                let value = self.eval(expr, env)?;
                Err(Unwind::Throw(value))
            }
            Stmt::Try {
                block,
                param,
                handler,
                finalizer,
            } => self.exec_try(block, param.as_ref(), handler.as_deref(), finalizer.as_deref(), env),
        }
    }

    fn declare(
        &mut self,
        kind: DeclKind,
        name: &Rc<str>,
        init: Option<&Expr>,
        env: &EnvRef,
    ) -> Eval<()> {
        if kind == DeclKind::Var {
            if let Some(init) = init {
                let value = self.eval(init, env)?;
                self.assign_var(env, name, value)?;
            }
            return Ok(());
        }
        let value = match init {
            Some(init) => self.eval(init, env)?,
            None => Value::Undefined,
        };
        if env.borrow().has_own(name) {
            return Err(self.syntax_error(format!("Identifier '{name}' has already been declared")));
        }
        env.borrow_mut()
            .declare(name.clone(), value, kind == DeclKind::Let);
        Ok(())
    }

    fn exec_for(
        &mut self,
        init: Option<&Stmt>,
        test: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
        env: &EnvRef,
    ) -> Eval<Flow> {
        let per_iteration = matches!(
            init,
            Some(Stmt::Decl {
                kind: DeclKind::Let | DeclKind::Const,
                ..
            })
        );
        let mut iter_env = if per_iteration {
            self.block_env(env)
        } else {
            env.clone()
        };
        if let Some(init) = init {
            self.exec(init, &iter_env)?;
        }
        loop {
            if let Some(test) = test {
                if !to_boolean(&self.eval(test, &iter_env)?) {
                    break;
                }
            }
            match self.exec(body, &iter_env)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
            if per_iteration {
                // Closures created in this iteration keep this iteration's
                // bindings; the update runs against a fresh copy.
                iter_env = self.copy_env(&iter_env);
            }
            if let Some(update) = update {
                self.eval(update, &iter_env)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_for_each(
        &mut self,
        head: &ForHead,
        kind: Option<DeclKind>,
        name: &Rc<str>,
        iterable: &Expr,
        body: &Stmt,
        env: &EnvRef,
    ) -> Eval<Flow> {
        let subject = self.eval(iterable, env)?;
        let items = match head {
            ForHead::In => self.enumerate_keys(&subject),
            ForHead::Of => self.iterate_values(&subject)?,
        };
        for item in items {
            self.monitor.tick()?;
            let iter_env = match kind {
                Some(kind @ (DeclKind::Let | DeclKind::Const)) => {
                    let scope = self.block_env(env);
                    scope
                        .borrow_mut()
                        .declare(name.clone(), item, kind == DeclKind::Let);
                    scope
                }
                _ => {
                    self.assign_var(env, name, item)?;
                    env.clone()
                }
            };
            match self.exec(body, &iter_env)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_try(
        &mut self,
        block: &[Stmt],
        param: Option<&Rc<str>>,
        handler: Option<&[Stmt]>,
        finalizer: Option<&[Stmt]>,
        env: &EnvRef,
    ) -> Eval<Flow> {
        let mut outcome = self.exec_block(block, env);
        let caught = match (&outcome, handler) {
            (Err(Unwind::Throw(thrown)), Some(handler)) => Some((thrown.clone(), handler)),
            _ => None,
        };
        if let Some((thrown, handler)) = caught {
            let scope = self.block_env(env);
            if let Some(param) = param {
                scope.borrow_mut().declare(param.clone(), thrown, true);
            }
            self.hoist_functions(handler, &scope);
            outcome = self.exec_statements(handler, &scope);
        }
        if let Some(finalizer) = finalizer {
            // Sandbox failures skip `finally`: the execution is over.
            if matches!(outcome, Err(Unwind::Fail(_))) {
                return outcome;
            }
            match self.exec_block(finalizer, env)? {
                Flow::Normal => {}
                abrupt => return Ok(abrupt),
            }
        }
        outcome
    }

    /// Keys visited by `for (k in subject)`.
    fn enumerate_keys(&self, subject: &Value) -> Vec<Value> {
        let index_keys =
            |len: usize| -> Vec<Value> { (0..len).map(|i| Value::literal_str(&i.to_string())).collect() };
        match subject {
            Value::Object(o) => o
                .borrow()
                .keys()
                .map(|k| Value::Str(JsStr::literal(k.clone())))
                .collect(),
            Value::Array(a) => index_keys(a.borrow().len()),
            Value::Str(s) => index_keys(s.as_str().chars().count()),
            Value::Host(h) => match h.borrow().kind() {
                HostKind::Map(map) => map
                    .keys()
                    .map(|k| Value::Str(JsStr::literal(k.clone())))
                    .collect(),
                HostKind::List(items) => index_keys(items.len()),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    /// Values visited by `for (x of subject)`.
    fn iterate_values(&mut self, subject: &Value) -> Eval<Vec<Value>> {
        let values = match subject {
            Value::Array(a) => a.borrow().items().to_vec(),
            Value::Str(s) => s
                .as_str()
                .chars()
                .map(|c| Value::literal_str(c.encode_utf8(&mut [0; 4])))
                .collect(),
            Value::Host(h) => match h.borrow().kind() {
                HostKind::List(items) => items.clone(),
                HostKind::Set(set) => set.values().cloned().collect(),
                HostKind::Map(map) => map
                    .keys()
                    .map(|k| Value::Str(JsStr::literal(k.clone())))
                    .collect(),
                HostKind::StringBuilder(_) => Vec::new(),
            },
            other => {
                let shown = display_summary(other, ERROR_PREVIEW_LEN);
                return Err(self.type_error(format!("{shown} is not iterable")));
            }
        };
        Ok(values)
    }

    // -- expressions -------------------------------------------------------

    pub(super) fn eval(&mut self, expr: &Expr, env: &EnvRef) -> Eval<Value> {
        self.monitor.tick()?;
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::Str(JsStr::literal(s.clone()))),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Undefined => Ok(Value::Undefined),
            Expr::Ident(name) => self.lookup(env, name),
            Expr::This => {
                let scope = function_scope_of(env);
                let this = scope.borrow().this_value().clone();
                Ok(this)
            }
            Expr::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, env)?);
                }
                self.new_array(values)
            }
            Expr::Object(props) => {
                let mut entries: Vec<(Rc<str>, Value)> = Vec::with_capacity(props.len());
                for (key, value) in props {
                    let value = self.eval(value, env)?;
                    match entries.iter_mut().find(|(k, _)| k == key) {
                        Some(slot) => slot.1 = value,
                        None => entries.push((key.clone(), value)),
                    }
                }
                self.new_object(entries)
            }
            Expr::Function(def) => Ok(Value::Function(Rc::new(Closure {
                def: def.clone(),
                env: env.clone(),
            }))),
            Expr::Unary { op, arg } => self.eval_unary(*op, arg, env),
            Expr::Update {
                increment,
                prefix,
                target,
            } => self.eval_update(*increment, *prefix, target, env),
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, env)?;
                let right = self.eval(right, env)?;
                self.binary(*op, left, right)
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left, env)?;
                let short_circuit = match op {
                    LogicalOp::And => !to_boolean(&left),
                    LogicalOp::Or => to_boolean(&left),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right, env)
                }
            }
            Expr::Conditional {
                test,
                then,
                otherwise,
            } => {
                if to_boolean(&self.eval(test, env)?) {
                    self.eval(then, env)
                } else {
                    self.eval(otherwise, env)
                }
            }
            Expr::Assign { op, target, value } => self.eval_assign(*op, target, value, env),
            Expr::Member { object, property } => {
                let object = self.eval(object, env)?;
                self.get_member(&object, &Value::Str(JsStr::literal(property.clone())))
            }
            Expr::Index { object, index } => {
                let object = self.eval(object, env)?;
                let key = self.eval(index, env)?;
                self.get_member(&object, &key)
            }
            Expr::Call { callee, args } => self.eval_call(callee, args, env),
            Expr::New { callee, args } => {
                let constructor = self.eval(callee, env)?;
                let args = self.eval_args(args, env)?;
                self.construct(constructor, args)
            }
            Expr::Sequence(items) => {
                let mut last = Value::Undefined;
                for item in items {
                    last = self.eval(item, env)?;
                }
                Ok(last)
            }
        }
    }

    fn eval_args(&mut self, args: &[Expr], env: &EnvRef) -> Eval<Vec<Value>> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, env)?);
        }
        Ok(values)
    }

    fn eval_unary(&mut self, op: UnaryOp, arg: &Expr, env: &EnvRef) -> Eval<Value> {
        if op == UnaryOp::Typeof {
            let value = match arg {
                Expr::Ident(name) => self.resolve(env, name)?.unwrap_or_default(),
                other => self.eval(other, env)?,
            };
            return Ok(Value::literal_str(type_of(&value)));
        }
        let value = self.eval(arg, env)?;
        Ok(match op {
            UnaryOp::Not => Value::Bool(!to_boolean(&value)),
            UnaryOp::Neg => Value::Number(-to_number(&value)),
            UnaryOp::Plus | UnaryOp::Typeof => Value::Number(to_number(&value)),
        })
    }

    fn eval_update(
        &mut self,
        increment: bool,
        prefix: bool,
        target: &Expr,
        env: &EnvRef,
    ) -> Eval<Value> {
        let delta = if increment { 1.0 } else { -1.0 };
        let (old, new) = match target {
            Expr::Ident(name) => {
                let old = to_number(&self.lookup(env, name)?);
                self.assign_var(env, name, Value::Number(old + delta))?;
                (old, old + delta)
            }
            Expr::Member { object, property } => {
                let object = self.eval(object, env)?;
                let key = Value::Str(JsStr::literal(property.clone()));
                let old = to_number(&self.get_member(&object, &key)?);
                self.set_member(&object, &key, Value::Number(old + delta))?;
                (old, old + delta)
            }
            Expr::Index { object, index } => {
                let object = self.eval(object, env)?;
                let key = self.eval(index, env)?;
                let old = to_number(&self.get_member(&object, &key)?);
                self.set_member(&object, &key, Value::Number(old + delta))?;
                (old, old + delta)
            }
            _ => return Err(self.syntax_error("Invalid left-hand side in update expression")),
        };
        Ok(Value::Number(if prefix { new } else { old }))
    }

    fn eval_assign(
        &mut self,
        op: AssignOp,
        target: &Expr,
        value: &Expr,
        env: &EnvRef,
    ) -> Eval<Value> {
        match target {
            Expr::Ident(name) => {
                let value = match op {
                    AssignOp::Assign => self.eval(value, env)?,
                    AssignOp::Compound(bop) => {
                        let current = self.lookup(env, name)?;
                        let rhs = self.eval(value, env)?;
                        self.binary(bop, current, rhs)?
                    }
                };
                self.assign_var(env, name, value.clone())?;
                Ok(value)
            }
            Expr::Member { object, property } => {
                let object = self.eval(object, env)?;
                let key = Value::Str(JsStr::literal(property.clone()));
                self.assign_member(object, key, op, value, env)
            }
            Expr::Index { object, index } => {
                let object = self.eval(object, env)?;
                let key = self.eval(index, env)?;
                self.assign_member(object, key, op, value, env)
            }
            _ => Err(self.syntax_error("Invalid left-hand side in assignment")),
        }
    }

    fn assign_member(
        &mut self,
        object: Value,
        key: Value,
        op: AssignOp,
        value: &Expr,
        env: &EnvRef,
    ) -> Eval<Value> {
        let value = match op {
            AssignOp::Assign => self.eval(value, env)?,
            AssignOp::Compound(bop) => {
                let current = self.get_member(&object, &key)?;
                let rhs = self.eval(value, env)?;
                self.binary(bop, current, rhs)?
            }
        };
        self.set_member(&object, &key, value.clone())?;
        Ok(value)
    }

    pub(super) fn binary(&mut self, op: BinaryOp, left: Value, right: Value) -> Eval<Value> {
        let number = |f: fn(f64, f64) -> f64| Value::Number(f(to_number(&left), to_number(&right)));
        let ordered = |accept: fn(std::cmp::Ordering) -> bool| {
            Value::Bool(compare(&left, &right).map(accept).unwrap_or(false))
        };
        let result = match op {
            BinaryOp::Add => return self.add(&left, &right),
            BinaryOp::Sub => number(|a, b| a - b),
            BinaryOp::Mul => number(|a, b| a * b),
            BinaryOp::Div => number(|a, b| a / b),
            BinaryOp::Rem => number(|a, b| a % b),
            BinaryOp::Eq => Value::Bool(loose_equals(&left, &right)),
            BinaryOp::NotEq => Value::Bool(!loose_equals(&left, &right)),
            BinaryOp::StrictEq => Value::Bool(strict_equals(&left, &right)),
            BinaryOp::StrictNotEq => Value::Bool(!strict_equals(&left, &right)),
            BinaryOp::Lt => ordered(|o| o.is_lt()),
            BinaryOp::Le => ordered(|o| o.is_le()),
            BinaryOp::Gt => ordered(|o| o.is_gt()),
            BinaryOp::Ge => ordered(|o| o.is_ge()),
            BinaryOp::In => return self.has_property(&right, &left),
        };
        Ok(result)
    }

    fn add(&mut self, left: &Value, right: &Value) -> Eval<Value> {
        let stringy = |v: &Value| !matches!(v, Value::Undefined | Value::Null | Value::Bool(_) | Value::Number(_));
        if !stringy(left) && !stringy(right) {
            return Ok(Value::Number(to_number(left) + to_number(right)));
        }
        let room = self.string_room();
        let mut joined = self.display_within(left, room)?;
        let rest = room.saturating_sub(joined.len());
        joined.push_str(&self.display_within(right, rest)?);
        self.new_string(joined)
    }

    fn has_property(&mut self, subject: &Value, key: &Value) -> Eval<Value> {
        let name = to_property_key(key);
        let found = match subject {
            Value::Object(o) => o.borrow().contains_key(&name),
            Value::Array(a) => {
                &*name == "length"
                    || as_array_index(key).is_some_and(|i| i < a.borrow().len())
            }
            Value::Host(h) => match h.borrow().kind() {
                HostKind::Map(map) => map.contains_key(&*name),
                _ => false,
            },
            other => {
                let shown = display_summary(other, ERROR_PREVIEW_LEN);
                return Err(self.type_error(format!(
                    "Cannot use 'in' operator to search for '{name}' in {shown}"
                )));
            }
        };
        Ok(Value::Bool(found))
    }

    // -- property access ---------------------------------------------------

    fn bind_method(&self, receiver: Value, name: Rc<str>) -> Value {
        Value::Method(Rc::new(BoundMethod { receiver, name }))
    }

    pub(super) fn get_member(&mut self, object: &Value, key: &Value) -> Eval<Value> {
        match object {
            Value::Undefined | Value::Null => {
                let name = to_property_key(key);
                let shown = display_summary(object, ERROR_PREVIEW_LEN);
                Err(self.type_error(format!(
                    "Cannot read properties of {shown} (reading '{name}')"
                )))
            }
            Value::Array(a) => {
                if let Some(index) = as_array_index(key) {
                    return Ok(a.borrow().get(index));
                }
                let name = to_property_key(key);
                if &*name == "length" {
                    return Ok(Value::Number(a.borrow().len() as f64));
                }
                if super::builtins::is_array_method(&name) {
                    return Ok(self.bind_method(object.clone(), name));
                }
                Ok(Value::Undefined)
            }
            Value::Str(s) => {
                if let Some(index) = as_array_index(key) {
                    return Ok(s
                        .as_str()
                        .chars()
                        .nth(index)
                        .map(|c| Value::literal_str(c.encode_utf8(&mut [0; 4])))
                        .unwrap_or_default());
                }
                let name = to_property_key(key);
                if &*name == "length" {
                    return Ok(Value::Number(s.as_str().chars().count() as f64));
                }
                if super::builtins::is_string_method(&name) {
                    return Ok(self.bind_method(object.clone(), name));
                }
                Ok(Value::Undefined)
            }
            Value::Number(_) => {
                let name = to_property_key(key);
                if super::builtins::is_number_method(&name) {
                    return Ok(self.bind_method(object.clone(), name));
                }
                Ok(Value::Undefined)
            }
            Value::Object(o) => {
                let name = to_property_key(key);
                Ok(o.borrow().get(&name).cloned().unwrap_or_default())
            }
            Value::Function(closure) => {
                let name = to_property_key(key);
                Ok(match &*name {
                    "name" => Value::Str(JsStr::literal(
                        closure.def.name.clone().unwrap_or_else(|| Rc::from("")),
                    )),
                    "length" => Value::Number(closure.def.params.len() as f64),
                    _ => Value::Undefined,
                })
            }
            Value::Host(h) => {
                let class = h.borrow().class_name();
                self.check_host_access(class)?;
                let name = to_property_key(key);
                if h.borrow().kind().has_method(&name) {
                    return Ok(self.bind_method(object.clone(), name));
                }
                Ok(Value::Undefined)
            }
            Value::HostClass(id) => {
                self.check_host_access(id)?;
                let name = to_property_key(key);
                if let Some(field) = host::static_field(id, &name) {
                    return Ok(field);
                }
                if host::has_static_method(id, &name) {
                    return Ok(self.bind_method(object.clone(), name));
                }
                Ok(Value::Undefined)
            }
            Value::Namespace(path) => {
                let name = to_property_key(key);
                self.namespace_member(path, &name)
            }
            Value::Bool(_) | Value::Native(_) | Value::Method(_) => Ok(Value::Undefined),
        }
    }

    /// `host.<path>.<name>`: uppercase names are classes and go through the
    /// policy; lowercase names are deeper namespaces.
    fn namespace_member(&mut self, path: &str, name: &str) -> Eval<Value> {
        let child = format!("{path}.{name}");
        if !name.starts_with(|c: char| c.is_ascii_uppercase()) {
            return Ok(Value::Namespace(Rc::from(child)));
        }
        self.check_host_access(&child)?;
        if host::is_provided_class(&child) {
            Ok(Value::HostClass(Rc::from(child)))
        } else {
            Err(self.type_error(format!("{child} is not available in this sandbox")))
        }
    }

    pub(super) fn set_member(&mut self, object: &Value, key: &Value, value: Value) -> Eval<()> {
        match object {
            Value::Undefined | Value::Null => {
                let name = to_property_key(key);
                let shown = display_summary(object, ERROR_PREVIEW_LEN);
                Err(self.type_error(format!(
                    "Cannot set properties of {shown} (setting '{name}')"
                )))
            }
            Value::Array(a) => {
                if a.borrow().is_frozen() {
                    let name = to_property_key(key);
                    return Err(self.type_error(format!(
                        "Cannot assign to read only property '{name}' of array"
                    )));
                }
                let len = a.borrow().len();
                if let Some(index) = as_array_index(key) {
                    if index >= len {
                        self.reserve((index + 1 - len) * SLOT_BYTES)?;
                    }
                    a.borrow_mut().mutate(|items| {
                        if index >= items.len() {
                            items.resize(index + 1, Value::Undefined);
                        }
                        items[index] = value;
                    });
                } else if &*to_property_key(key) == "length" {
                    let Some(new_len) = as_array_index(&Value::Number(to_number(&value))) else {
                        return Err(self.range_error("Invalid array length"));
                    };
                    if new_len > len {
                        self.reserve((new_len - len) * SLOT_BYTES)?;
                    }
                    let removed = a.borrow_mut().mutate(|items| {
                        if new_len < items.len() {
                            items.split_off(new_len)
                        } else {
                            items.resize(new_len, Value::Undefined);
                            Vec::new()
                        }
                    });
                    drop(removed);
                }
                Ok(())
            }
            Value::Object(o) => {
                let name = to_property_key(key);
                if o.borrow().is_frozen() {
                    return Err(self.type_error(format!(
                        "Cannot assign to read only property '{name}' of object"
                    )));
                }
                if !o.borrow().contains_key(&name) {
                    self.reserve(entry_bytes(&name))?;
                }
                let previous = o.borrow().get(&name).cloned();
                o.borrow_mut().set(name, value);
                drop(previous);
                Ok(())
            }
            Value::Host(h) => {
                let class = h.borrow().class_name();
                self.check_host_access(class)?;
                let name = to_property_key(key);
                Err(self.type_error(format!("Cannot set property '{name}' of {class}")))
            }
            Value::HostClass(id) => {
                self.check_host_access(id)?;
                let name = to_property_key(key);
                Err(self.type_error(format!("Cannot set property '{name}' of {id}")))
            }
            Value::Namespace(path) => {
                let name = to_property_key(key);
                Err(self.type_error(format!("Cannot set property '{name}' of {path}")))
            }
            _ => Ok(()),
        }
    }

    // -- calls -------------------------------------------------------------

    fn eval_call(&mut self, callee: &Expr, args: &[Expr], env: &EnvRef) -> Eval<Value> {
        match callee {
            Expr::Member { object, property } => {
                let receiver = self.eval(object, env)?;
                let args = self.eval_args(args, env)?;
                self.invoke(receiver, property.clone(), args)
            }
            Expr::Index { object, index } => {
                let receiver = self.eval(object, env)?;
                let key = self.eval(index, env)?;
                let args = self.eval_args(args, env)?;
                self.invoke(receiver, to_property_key(&key), args)
            }
            other => {
                let function = self.eval(other, env)?;
                let args = self.eval_args(args, env)?;
                self.call_value(&function, Value::Undefined, args)
            }
        }
    }

    /// `receiver.name(args)`.
    pub(super) fn invoke(&mut self, receiver: Value, name: Rc<str>, args: Vec<Value>) -> Eval<Value> {
        match &receiver {
            Value::Str(_)
            | Value::Array(_)
            | Value::Number(_)
            | Value::Host(_)
            | Value::HostClass(_) => self.call_method(receiver, &name, args),
            _ => {
                let key = Value::Str(JsStr::literal(name.clone()));
                let function = self.get_member(&receiver, &key)?;
                if !function.is_callable() {
                    return Err(self.type_error(format!("{name} is not a function")));
                }
                self.call_value(&function, receiver, args)
            }
        }
    }

    /// Dispatch a native method on a string, array, number or host value.
    fn call_method(&mut self, receiver: Value, name: &str, args: Vec<Value>) -> Eval<Value> {
        match receiver {
            Value::Str(s) => self.string_method(&s, name, args),
            Value::Array(a) => self.array_method(&a, name, args),
            Value::Number(n) => self.number_method(n, name, args),
            Value::Host(h) => {
                let class = h.borrow().class_name();
                self.check_host_access(class)?;
                self.host_method(&h, name, args)
            }
            Value::HostClass(id) => {
                self.check_host_access(&id)?;
                self.host_static(&id, name, args)
            }
            other => {
                let shown = display_summary(&other, ERROR_PREVIEW_LEN);
                Err(self.type_error(format!("{shown}.{name} is not a function")))
            }
        }
    }

    pub fn call_value(&mut self, function: &Value, this: Value, args: Vec<Value>) -> Eval<Value> {
        match function {
            Value::Function(closure) => self.call_closure(closure, this, args),
            Value::Native(builtin) => self.call_builtin(*builtin, args),
            Value::Method(method) => {
                let receiver = method.receiver.clone();
                self.call_method(receiver, &method.name, args)
            }
            Value::HostClass(id) => Err(self.type_error(format!(
                "Class constructor {id} cannot be invoked without 'new'"
            ))),
            other => {
                let shown = display_summary(other, ERROR_PREVIEW_LEN);
                Err(self.type_error(format!("{shown} is not a function")))
            }
        }
    }

    fn call_closure(&mut self, closure: &Rc<Closure>, this: Value, args: Vec<Value>) -> Eval<Value> {
        if self.call_depth >= self.max_call_depth {
            return Err(self.range_error("Maximum call stack size exceeded"));
        }
        let def = closure.def.clone();
        let env = Environment::function(&closure.env, this, &def.params, args);
        self.track(Tracked::Env(Rc::downgrade(&env)));
        if let Some(name) = &def.name {
            if !env.borrow().has_own(name) {
                env.borrow_mut()
                    .declare(name.clone(), Value::Function(closure.clone()), true);
            }
        }
        hoist_vars(&def.body, &env);
        self.hoist_functions(&def.body, &env);

        self.call_depth += 1;
        let saved = std::mem::take(&mut self.completion);
        let result = self.exec_statements(&def.body, &env);
        self.completion = saved;
        self.call_depth -= 1;

        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::Undefined),
        }
    }

    fn construct(&mut self, constructor: Value, args: Vec<Value>) -> Eval<Value> {
        match constructor {
            Value::HostClass(id) => {
                self.check_host_access(&id)?;
                self.host_construct(&id, args)
            }
            Value::Native(builtin @ Builtin::ErrorFn(_)) => self.call_builtin(builtin, args),
            Value::Function(closure) => {
                let this = self.new_object(Vec::new())?;
                let result = self.call_closure(&closure, this.clone(), args)?;
                Ok(match result {
                    Value::Object(_) | Value::Array(_) | Value::Host(_) => result,
                    _ => this,
                })
            }
            other => {
                let shown = display_summary(&other, ERROR_PREVIEW_LEN);
                Err(self.type_error(format!("{shown} is not a constructor")))
            }
        }
    }
}

impl Drop for Interpreter<'_> {
    fn drop(&mut self) {
        self.completion = Value::Undefined;
        let mut tracked = std::mem::take(&mut self.tracked);
        // The global scope stays first (it is tracked in `new` and never
        // pruned) and is emptied last.
        let global = if tracked.is_empty() { None } else { Some(tracked.remove(0)) };
        for allocation in tracked {
            allocation.clear();
        }
        if let Some(global) = global {
            global.clear();
        }
    }
}

/// Pre-declare every `var` in `stmts` (not descending into nested
/// functions) on the function scope `scope`.
fn hoist_vars(stmts: &[Stmt], scope: &EnvRef) {
    for stmt in stmts {
        hoist_var_stmt(stmt, scope);
    }
}

fn hoist_var_stmt(stmt: &Stmt, scope: &EnvRef) {
    let declare = |name: &Rc<str>| {
        let mut s = scope.borrow_mut();
        if !s.has_own(name) {
            s.declare(name.clone(), Value::Undefined, true);
        }
    };
    match stmt {
        Stmt::Decl {
            kind: DeclKind::Var,
            decls,
        } => decls.iter().for_each(|(name, _)| declare(name)),
        Stmt::If {
            then, otherwise, ..
        } => {
            hoist_var_stmt(then, scope);
            if let Some(otherwise) = otherwise {
                hoist_var_stmt(otherwise, scope);
            }
        }
        Stmt::While { body, .. } | Stmt::DoWhile { body, .. } => hoist_var_stmt(body, scope),
        Stmt::For { init, body, .. } => {
            if let Some(init) = init {
                hoist_var_stmt(init, scope);
            }
            hoist_var_stmt(body, scope);
        }
        Stmt::ForEach {
            kind, name, body, ..
        } => {
            if matches!(kind, Some(DeclKind::Var)) {
                declare(name);
            }
            hoist_var_stmt(body, scope);
        }
        Stmt::Block(stmts) => hoist_vars(stmts, scope),
        Stmt::Try {
            block,
            handler,
            finalizer,
            ..
        } => {
            hoist_vars(block, scope);
            if let Some(handler) = handler {
                hoist_vars(handler, scope);
            }
            if let Some(finalizer) = finalizer {
                hoist_vars(finalizer, scope);
            }
        }
        _ => {}
    }
}

/// Whether a block declares anything scoped to the block itself.
fn needs_scope(stmts: &[Stmt]) -> bool {
    stmts.iter().any(|stmt| {
        matches!(
            stmt,
            Stmt::Function(_)
                | Stmt::Decl {
                    kind: DeclKind::Let | DeclKind::Const,
                    ..
                }
        )
    })
}

/// `"Name: message"` for error objects, the display string otherwise.
fn describe_thrown(thrown: &Value) -> String {
    if let Value::Object(o) = thrown {
        if let Ok(o) = o.try_borrow() {
            if let Some(message) = o.get("message") {
                let name = o
                    .get("name")
                    .map(|name| display_summary(name, ERROR_PREVIEW_LEN))
                    .unwrap_or_else(|| ErrorName::Error.as_str().to_string());
                return format!("{name}: {}", display_summary(message, THROWN_MESSAGE_LEN));
            }
        }
    }
    display_summary(thrown, THROWN_MESSAGE_LEN)
}
