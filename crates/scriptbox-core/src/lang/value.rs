//! Runtime values of the script language.
//!
//! Composite values are shared (`Rc<RefCell<_>>`) the way script references
//! are shared. Every interpreter-owned allocation carries a charge on the
//! execution's [`HeapMeter`] that is refunded when the allocation drops.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use super::ast::FunctionDef;
use super::builtins::Builtin;
use super::heap::HeapMeter;
use super::host::HostObject;

/// Bytes charged per array slot.
pub const SLOT_BYTES: usize = std::mem::size_of::<Value>();
/// Fixed bytes charged per string allocation.
pub const STRING_OVERHEAD_BYTES: usize = 16;
/// Fixed bytes charged per object property, on top of key and slot.
pub const ENTRY_OVERHEAD_BYTES: usize = 16;
/// Fixed bytes charged per array or object header.
pub const HEADER_BYTES: usize = 48;

/// Bytes to charge for one object property named `key`.
pub fn entry_bytes(key: &str) -> usize {
    ENTRY_OVERHEAD_BYTES + key.len() + SLOT_BYTES
}

/// Bytes to charge for a string of `len` bytes.
pub fn string_bytes(len: usize) -> usize {
    STRING_OVERHEAD_BYTES + len
}

thread_local! {
    static DEFERRED: RefCell<Vec<Value>> = const { RefCell::new(Vec::new()) };
    static RELEASING: Cell<bool> = const { Cell::new(false) };
}

/// Drop `values` without recursing through nested composites.
///
/// Composite values are queued and dropped one at a time by the outermost
/// call; drops they trigger land back in the queue. Stack use stays flat no
/// matter how deeply the released values nest.
pub fn release_values(values: impl IntoIterator<Item = Value>) {
    let queued = DEFERRED.try_with(|deferred| {
        let mut deferred = deferred.borrow_mut();
        for value in values {
            if value.is_composite() {
                deferred.push(value);
            }
        }
    });
    if queued.is_err() || RELEASING.with(|flag| flag.replace(true)) {
        return;
    }
    loop {
        let next = DEFERRED.with(|deferred| deferred.borrow_mut().pop());
        match next {
            Some(value) => drop(value),
            None => break,
        }
    }
    RELEASING.with(|flag| flag.set(false));
}

/// A refund-on-drop charge against a [`HeapMeter`].
#[derive(Debug)]
pub struct Charge {
    bytes: usize,
    heap: Rc<HeapMeter>,
}

impl Charge {
    pub fn new(heap: &Rc<HeapMeter>, bytes: usize) -> Self {
        heap.charge(bytes);
        Self {
            bytes,
            heap: heap.clone(),
        }
    }
}

impl Drop for Charge {
    fn drop(&mut self) {
        self.heap.release(self.bytes);
    }
}

/// Immutable script string. Literals borrow the program text and are free;
/// computed strings are charged to the heap.
#[derive(Clone)]
pub struct JsStr {
    text: Rc<str>,
    _charge: Option<Rc<Charge>>,
}

impl JsStr {
    /// A string that costs nothing (literal text or an intrinsic name).
    pub fn literal(text: Rc<str>) -> Self {
        Self {
            text,
            _charge: None,
        }
    }

    /// A computed string charged to `heap`.
    pub fn charged(text: String, heap: &Rc<HeapMeter>) -> Self {
        let charge = Charge::new(heap, string_bytes(text.len()));
        Self {
            text: Rc::from(text),
            _charge: Some(Rc::new(charge)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The shared text, e.g. for use as a property key.
    pub fn text(&self) -> Rc<str> {
        self.text.clone()
    }
}

impl PartialEq for JsStr {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl fmt::Debug for JsStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.text, f)
    }
}

/// Backing store of a script array.
pub struct ArrayData {
    items: Vec<Value>,
    frozen: bool,
    charged: usize,
    heap: Rc<HeapMeter>,
}

impl ArrayData {
    pub fn new(items: Vec<Value>, heap: &Rc<HeapMeter>) -> Self {
        let charged = HEADER_BYTES + items.len() * SLOT_BYTES;
        heap.charge(charged);
        Self {
            items,
            frozen: false,
            charged,
            heap: heap.clone(),
        }
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Element at `index`, or `undefined` past the end.
    pub fn get(&self, index: usize) -> Value {
        self.items.get(index).cloned().unwrap_or(Value::Undefined)
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Apply `f` to the element vector and re-charge for its new length.
    pub fn mutate<R>(&mut self, f: impl FnOnce(&mut Vec<Value>) -> R) -> R {
        let out = f(&mut self.items);
        let charged = HEADER_BYTES + self.items.len() * SLOT_BYTES;
        self.heap.adjust(self.charged, charged);
        self.charged = charged;
        out
    }

    /// Drop every element, returning them so the caller controls when they
    /// are released.
    pub fn take_all(&mut self) -> Vec<Value> {
        self.mutate(std::mem::take)
    }
}

impl Drop for ArrayData {
    fn drop(&mut self) {
        self.heap.release(self.charged);
        release_values(std::mem::take(&mut self.items));
    }
}

/// Backing store of a script object: insertion-ordered string-keyed slots.
pub struct ObjectData {
    entries: Vec<(Rc<str>, Value)>,
    index: HashMap<Rc<str>, usize>,
    frozen: bool,
    charged: usize,
    heap: Rc<HeapMeter>,
}

impl ObjectData {
    pub fn new(heap: &Rc<HeapMeter>) -> Self {
        heap.charge(HEADER_BYTES);
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            frozen: false,
            charged: HEADER_BYTES,
            heap: heap.clone(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Insert or overwrite. Returns `false` (and changes nothing) when frozen.
    pub fn set(&mut self, key: Rc<str>, value: Value) -> bool {
        if self.frozen {
            return false;
        }
        if let Some(&i) = self.index.get(&key) {
            self.entries[i].1 = value;
            return true;
        }
        let bytes = entry_bytes(&key);
        self.heap.charge(bytes);
        self.charged += bytes;
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, value));
        true
    }

    pub fn keys(&self) -> impl Iterator<Item = &Rc<str>> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn entries(&self) -> &[(Rc<str>, Value)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Remove every property regardless of the frozen flag.
    pub fn take_all(&mut self) -> Vec<(Rc<str>, Value)> {
        self.index.clear();
        self.heap.release(self.charged - HEADER_BYTES);
        self.charged = HEADER_BYTES;
        std::mem::take(&mut self.entries)
    }
}

impl Drop for ObjectData {
    fn drop(&mut self) {
        self.heap.release(self.charged);
        release_values(std::mem::take(&mut self.entries).into_iter().map(|(_, v)| v));
    }
}

/// A script function together with the environment it closes over.
pub struct Closure {
    pub def: Rc<FunctionDef>,
    pub env: EnvRef,
}

/// A method looked up on a receiver but not yet called (`var f = list.push`).
pub struct BoundMethod {
    pub receiver: Value,
    pub name: Rc<str>,
}

impl Drop for BoundMethod {
    fn drop(&mut self) {
        release_values([std::mem::take(&mut self.receiver)]);
    }
}

/// A runtime value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(JsStr),
    Array(Rc<RefCell<ArrayData>>),
    Object(Rc<RefCell<ObjectData>>),
    Function(Rc<Closure>),
    Native(Builtin),
    Method(Rc<BoundMethod>),
    Host(Rc<RefCell<HostObject>>),
    /// An allow-listed host class, by fully-qualified identifier.
    HostClass(Rc<str>),
    /// A host namespace path such as `host.util`.
    Namespace(Rc<str>),
}

impl Value {
    pub fn literal_str(text: &str) -> Self {
        Value::Str(JsStr::literal(Rc::from(text)))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Function(_) | Value::Native(_) | Value::Method(_)
        )
    }

    /// Whether dropping this value can release other values.
    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            Value::Array(_)
                | Value::Object(_)
                | Value::Function(_)
                | Value::Method(_)
                | Value::Host(_)
        )
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Array(a) => match a.try_borrow() {
                Ok(a) => write!(f, "Array(len={})", a.len()),
                Err(_) => f.write_str("Array(<borrowed>)"),
            },
            Value::Object(o) => match o.try_borrow() {
                Ok(o) => write!(f, "Object(keys={})", o.len()),
                Err(_) => f.write_str("Object(<borrowed>)"),
            },
            Value::Function(c) => match &c.def.name {
                Some(name) => write!(f, "Function({name})"),
                None => f.write_str("Function(<anonymous>)"),
            },
            Value::Native(b) => write!(f, "Native({b:?})"),
            Value::Method(m) => write!(f, "Method({})", m.name),
            Value::Host(h) => match h.try_borrow() {
                Ok(h) => write!(f, "Host({})", h.class_name()),
                Err(_) => f.write_str("Host(<borrowed>)"),
            },
            Value::HostClass(id) => write!(f, "HostClass({id})"),
            Value::Namespace(path) => write!(f, "Namespace({path})"),
        }
    }
}

/// One variable slot.
#[derive(Debug, Clone)]
pub struct Binding {
    pub value: Value,
    pub mutable: bool,
}

pub type EnvRef = Rc<RefCell<Environment>>;

/// The variable slots of one scope.
#[derive(Debug, Default, Clone)]
struct Bindings(HashMap<Rc<str>, Binding>);

impl Drop for Bindings {
    fn drop(&mut self) {
        release_values(self.0.drain().map(|(_, b)| b.value));
    }
}

/// Lexical environment record.
///
/// `var` bindings live in the nearest function scope; `let`/`const` live in
/// the block that declares them.
#[derive(Debug, Default)]
pub struct Environment {
    vars: Bindings,
    parent: Option<EnvRef>,
    function_scope: bool,
    this: Value,
    call_args: Option<Vec<Value>>,
}

impl Environment {
    /// The outermost scope of an execution.
    pub fn global() -> EnvRef {
        Rc::new(RefCell::new(Self {
            function_scope: true,
            ..Self::default()
        }))
    }

    /// A block scope nested in `parent`.
    pub fn block(parent: &EnvRef) -> EnvRef {
        Rc::new(RefCell::new(Self {
            parent: Some(parent.clone()),
            ..Self::default()
        }))
    }

    /// The scope of one function activation, with `params` bound to `args`
    /// (missing arguments are `undefined`).
    pub fn function(parent: &EnvRef, this: Value, params: &[Rc<str>], args: Vec<Value>) -> EnvRef {
        let vars = Bindings(
            params
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    let value = args.get(i).cloned().unwrap_or_default();
                    (name.clone(), Binding { value, mutable: true })
                })
                .collect(),
        );
        Rc::new(RefCell::new(Self {
            vars,
            parent: Some(parent.clone()),
            function_scope: true,
            this,
            call_args: Some(args),
        }))
    }

    /// A sibling copy of this scope's own bindings (per-iteration `let`).
    pub fn copy_of(env: &EnvRef) -> EnvRef {
        let source = env.borrow();
        Rc::new(RefCell::new(Self {
            vars: source.vars.clone(),
            parent: source.parent.clone(),
            function_scope: source.function_scope,
            this: source.this.clone(),
            call_args: None,
        }))
    }

    pub fn declare(&mut self, name: Rc<str>, value: Value, mutable: bool) {
        self.vars.0.insert(name, Binding { value, mutable });
    }

    pub fn has_own(&self, name: &str) -> bool {
        self.vars.0.contains_key(name)
    }

    pub fn is_function_scope(&self) -> bool {
        self.function_scope
    }

    pub fn parent(&self) -> Option<&EnvRef> {
        self.parent.as_ref()
    }

    pub fn own(&self, name: &str) -> Option<&Binding> {
        self.vars.0.get(name)
    }

    pub fn own_mut(&mut self, name: &str) -> Option<&mut Binding> {
        self.vars.0.get_mut(name)
    }

    pub fn this_value(&self) -> &Value {
        &self.this
    }

    /// The arguments of the activation this scope belongs to, taken once.
    pub fn take_call_args(&mut self) -> Option<Vec<Value>> {
        self.call_args.take()
    }

    /// Break reference cycles through this scope.
    pub fn clear(&mut self) -> Vec<Value> {
        self.parent = None;
        self.call_args = None;
        let this = std::mem::take(&mut self.this);
        let mut released: Vec<Value> = self.vars.0.drain().map(|(_, b)| b.value).collect();
        released.push(this);
        released
    }
}

/// Make `value` and everything reachable from it read-only.
pub fn freeze_deep(value: &Value) {
    freeze_at(value, 0);
}

fn freeze_at(value: &Value, depth: usize) {
    if depth > 64 {
        return;
    }
    let children: Vec<Value> = match value {
        Value::Array(a) => match a.try_borrow_mut() {
            Ok(mut a) => {
                a.freeze();
                a.items().to_vec()
            }
            Err(_) => return,
        },
        Value::Object(o) => match o.try_borrow_mut() {
            Ok(mut o) => {
                o.freeze();
                o.entries().iter().map(|(_, v)| v.clone()).collect()
            }
            Err(_) => return,
        },
        _ => return,
    };
    for child in &children {
        freeze_at(child, depth + 1);
    }
}

/// The nearest function scope enclosing `env` (inclusive).
pub fn function_scope_of(env: &EnvRef) -> EnvRef {
    let mut current = env.clone();
    loop {
        let next = {
            let scope = current.borrow();
            if scope.is_function_scope() {
                None
            } else {
                scope.parent().cloned()
            }
        };
        match next {
            Some(parent) => current = parent,
            None => return current,
        }
    }
}

/// A weak handle on an interpreter allocation, kept so the interpreter can
/// break reference cycles when an execution ends.
pub enum Tracked {
    Env(Weak<RefCell<Environment>>),
    Array(Weak<RefCell<ArrayData>>),
    Object(Weak<RefCell<ObjectData>>),
    Host(Weak<RefCell<HostObject>>),
}

impl Tracked {
    pub fn is_alive(&self) -> bool {
        match self {
            Tracked::Env(w) => w.strong_count() > 0,
            Tracked::Array(w) => w.strong_count() > 0,
            Tracked::Object(w) => w.strong_count() > 0,
            Tracked::Host(w) => w.strong_count() > 0,
        }
    }

    /// Empty the allocation if it is still alive and not borrowed.
    pub fn clear(&self) {
        // Released values are dropped after the borrow ends, since dropping
        // them can cascade into other allocations.
        let released: Vec<Value> = match self {
            Tracked::Env(w) => w
                .upgrade()
                .and_then(|e| e.try_borrow_mut().ok().map(|mut e| e.clear()))
                .unwrap_or_default(),
            Tracked::Array(w) => w
                .upgrade()
                .and_then(|a| a.try_borrow_mut().ok().map(|mut a| a.take_all()))
                .unwrap_or_default(),
            Tracked::Object(w) => w
                .upgrade()
                .and_then(|o| {
                    o.try_borrow_mut()
                        .ok()
                        .map(|mut o| o.take_all().into_iter().map(|(_, v)| v).collect())
                })
                .unwrap_or_default(),
            Tracked::Host(w) => w
                .upgrade()
                .and_then(|h| h.try_borrow_mut().ok().map(|mut h| h.take_all()))
                .unwrap_or_default(),
        };
        drop(released);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computed_strings_refund_on_drop() {
        let heap = HeapMeter::new();
        let s = JsStr::charged("hello".to_string(), &heap);
        let copy = s.clone();
        assert_eq!(heap.live_bytes(), string_bytes(5) as i64);
        drop(s);
        assert_eq!(heap.live_bytes(), string_bytes(5) as i64);
        drop(copy);
        assert_eq!(heap.live_bytes(), 0);
    }

    #[test]
    fn literal_strings_are_free() {
        let heap = HeapMeter::new();
        let _s = JsStr::literal(Rc::from("abc"));
        assert_eq!(heap.live_bytes(), 0);
    }

    #[test]
    fn array_charge_follows_length() {
        let heap = HeapMeter::new();
        let mut a = ArrayData::new(vec![Value::Null; 2], &heap);
        assert_eq!(heap.live_bytes(), (HEADER_BYTES + 2 * SLOT_BYTES) as i64);
        a.mutate(|items| items.push(Value::Bool(true)));
        assert_eq!(heap.live_bytes(), (HEADER_BYTES + 3 * SLOT_BYTES) as i64);
        drop(a);
        assert_eq!(heap.live_bytes(), 0);
    }

    #[test]
    fn object_keeps_insertion_order_and_rejects_writes_when_frozen() {
        let heap = HeapMeter::new();
        let mut o = ObjectData::new(&heap);
        assert!(o.set(Rc::from("b"), Value::Number(1.0)));
        assert!(o.set(Rc::from("a"), Value::Number(2.0)));
        assert!(o.set(Rc::from("b"), Value::Number(3.0)));
        let keys: Vec<&str> = o.keys().map(|k| &**k).collect();
        assert_eq!(keys, vec!["b", "a"]);
        o.freeze();
        assert!(!o.set(Rc::from("c"), Value::Null));
        assert!(o.get("c").is_none());
        drop(o);
        assert_eq!(heap.live_bytes(), 0);
    }

    #[test]
    fn deeply_nested_arrays_release_without_recursion() {
        let heap = HeapMeter::new();
        let mut current = Value::Null;
        for _ in 0..200_000 {
            let array = ArrayData::new(vec![current], &heap);
            current = Value::Array(Rc::new(RefCell::new(array)));
        }
        assert!(heap.live_bytes() > 0);
        drop(current);
        assert_eq!(heap.live_bytes(), 0);
    }

    #[test]
    fn deeply_nested_scopes_release_without_recursion() {
        let heap = HeapMeter::new();
        let mut current = Value::Null;
        for _ in 0..200_000 {
            let env = Environment::global();
            env.borrow_mut().declare(Rc::from("next"), current, true);
            let mut object = ObjectData::new(&heap);
            object.set(Rc::from("scope"), Value::Function(Rc::new(Closure {
                def: Rc::new(FunctionDef {
                    name: None,
                    params: Vec::new(),
                    body: Vec::new(),
                }),
                env,
            })));
            current = Value::Object(Rc::new(RefCell::new(object)));
        }
        drop(current);
        assert_eq!(heap.live_bytes(), 0);
    }

    #[test]
    fn clearing_tracked_environment_breaks_cycle() {
        let env = Environment::global();
        let closure = Rc::new(Closure {
            def: Rc::new(FunctionDef {
                name: None,
                params: Vec::new(),
                body: Vec::new(),
            }),
            env: env.clone(),
        });
        env.borrow_mut()
            .declare(Rc::from("f"), Value::Function(closure), true);
        let weak = Rc::downgrade(&env);
        let tracked = Tracked::Env(weak.clone());
        tracked.clear();
        drop(env);
        assert_eq!(weak.strong_count(), 0);
    }
}
