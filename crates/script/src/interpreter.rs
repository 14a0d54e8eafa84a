//! Tree-walking evaluator.
//!
//! Evaluation is async because utility functions may suspend. Recursive
//! methods return boxed futures. Every statement and every loop iteration
//! ticks the [`ExecutionMeter`].
//!
//! Name resolution order: locals (innermost scope first), sandbox states,
//! sandbox utilities, builtins. A state is read and written through its
//! binding: `count`, `count.value` and `count.value.items[0]` all address
//! the state's value, and every write ends in one `StateBinding::set` call.
//!
//! A loop variable, a callback parameter or a local initialised from a
//! state path stands for the element it was read from: writing through it
//! (`todo.done = true`, `item.tags.push(t)`) also writes that element.
//! Rebinding the name itself (`todo = {}`) does not.

use futures::future::BoxFuture;
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::fmt;

use crate::ScriptError;
use crate::ast::*;
use crate::builtins::{self, is_global, is_namespace};
use crate::sandbox::{ExecutionMeter, Sandbox};
use crate::value::{self, number, to_display, truthy, type_name};

/// Array methods whose first argument is an arrow callback.
const CALLBACK_METHODS: &[&str] = &[
    "map", "filter", "find", "findIndex", "some", "every", "forEach", "reduce",
];

/// What a finished script produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    /// The value of the top-level `return`, or `null`.
    pub value: Value,
    /// Lines written with `log()` / `console.log()`.
    pub logs: Vec<String>,
}

/// Run a parsed program against `sandbox`, metered by `meter`.
pub async fn execute(
    program: &Program,
    sandbox: &Sandbox,
    meter: &ExecutionMeter,
) -> Result<ExecutionOutcome, ScriptError> {
    let mut interpreter = Interpreter {
        sandbox,
        meter,
        scopes: vec![HashMap::new()],
        logs: Vec::new(),
    };
    let value = match interpreter.exec_stmts(&program.body).await? {
        Flow::Normal => Value::Null,
        Flow::Return(value) => value,
        Flow::Break | Flow::Continue => {
            return Err(ScriptError::Type(
                "'break' and 'continue' are only valid inside a loop".into(),
            ));
        }
    };
    Ok(ExecutionOutcome {
        value,
        logs: interpreter.logs,
    })
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

struct Local {
    value: Value,
    mutable: bool,
    /// Where an object or array value was read from.
    origin: Option<Place>,
}

/// A storage location: a state or a local, and the path below it.
#[derive(Debug, Clone)]
struct Place {
    root: String,
    /// Scope index of a local root; `None` for a state.
    scope: Option<usize>,
    segments: Vec<Segment>,
}

impl Place {
    fn child(&self, segment: Segment) -> Place {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Place {
            root: self.root.clone(),
            scope: self.scope,
            segments,
        }
    }
}

/// One step of an assignment path below its root name.
#[derive(Debug, Clone)]
enum Segment {
    Key(String),
    Index(Value),
}

impl Segment {
    fn key(&self) -> String {
        match self {
            Segment::Key(k) => k.clone(),
            Segment::Index(v) => to_display(v),
        }
    }

    fn position(&self) -> Option<usize> {
        match self {
            Segment::Index(Value::Number(n)) => position(n),
            _ => None,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

struct Interpreter<'s> {
    sandbox: &'s Sandbox,
    meter: &'s ExecutionMeter,
    scopes: Vec<HashMap<String, Local>>,
    logs: Vec<String>,
}

impl<'s> Interpreter<'s> {
    fn local(&self, name: &str) -> Option<&Local> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    /// Index of the innermost scope declaring `name`.
    fn local_scope(&self, name: &str) -> Option<usize> {
        self.scopes.iter().rposition(|scope| scope.contains_key(name))
    }

    /// Whether `name` is shadowed by a local or bound in the sandbox.
    fn is_bound(&self, name: &str) -> bool {
        self.local(name).is_some()
            || self.sandbox.state(name).is_some()
            || self.sandbox.function(name).is_some()
    }

    /// Declare a local. It writes through to `origin` when its value is an
    /// object or array.
    fn declare(
        &mut self,
        name: &str,
        value: Value,
        mutable: bool,
        origin: Option<Place>,
    ) -> Result<(), ScriptError> {
        let origin = origin.filter(|_| value.is_object() || value.is_array());
        let Some(scope) = self.scopes.last_mut() else {
            return Err(ScriptError::Type("no active scope".into()));
        };
        if scope.contains_key(name) {
            return Err(ScriptError::Type(format!(
                "Identifier '{name}' has already been declared"
            )));
        }
        scope.insert(
            name.to_string(),
            Local {
                value,
                mutable,
                origin,
            },
        );
        Ok(())
    }

    // ── Statements ──────────────────────────────────────────────────────

    fn exec_stmts<'a>(&'a mut self, stmts: &'a [Stmt]) -> BoxFuture<'a, Result<Flow, ScriptError>> {
        Box::pin(async move {
            for stmt in stmts {
                match self.exec_stmt(stmt).await? {
                    Flow::Normal => {}
                    flow => return Ok(flow),
                }
            }
            Ok(Flow::Normal)
        })
    }

    /// Run `stmts` in a fresh block scope.
    fn exec_scoped<'a>(
        &'a mut self,
        stmts: &'a [Stmt],
    ) -> BoxFuture<'a, Result<Flow, ScriptError>> {
        Box::pin(async move {
            self.scopes.push(HashMap::new());
            let result = self.exec_stmts(stmts).await;
            self.scopes.pop();
            result
        })
    }

    fn exec_stmt<'a>(&'a mut self, stmt: &'a Stmt) -> BoxFuture<'a, Result<Flow, ScriptError>> {
        Box::pin(async move {
            let result = match self.meter.tick() {
                Ok(()) => self.exec_kind(&stmt.kind).await,
                Err(e) => Err(e),
            };
            result.map_err(|e| at_line(stmt.line, e))
        })
    }

    fn exec_kind<'a>(&'a mut self, kind: &'a StmtKind) -> BoxFuture<'a, Result<Flow, ScriptError>> {
        Box::pin(async move {
            match kind {
                StmtKind::Declare {
                    name,
                    mutable,
                    init,
                } => {
                    let (value, origin) = match init {
                        Some(expr) => self.eval_place(expr).await?,
                        None => (Value::Null, None),
                    };
                    self.declare(name, value, *mutable, origin)?;
                }
                StmtKind::Assign { target, op, value } => {
                    let new_value = match op.binary() {
                        None => self.eval(value).await?,
                        Some(bin) => {
                            let current = self.eval(target).await?;
                            let rhs = self.eval(value).await?;
                            binary(bin, &current, &rhs)?
                        }
                    };
                    self.assign(target, new_value).await?;
                }
                StmtKind::Update { target, delta } => {
                    let current = self.eval(target).await?;
                    let Some(n) = current.as_f64() else {
                        return Err(ScriptError::Type(format!(
                            "cannot increment or decrement {}",
                            type_name(&current)
                        )));
                    };
                    self.assign(target, number(n + delta)).await?;
                }
                StmtKind::Expr(expr) => {
                    self.eval(expr).await?;
                }
                StmtKind::If {
                    cond,
                    then_branch,
                    else_branch,
                } => {
                    let cond = self.eval(cond).await?;
                    if truthy(&cond) {
                        return self.exec_scoped(then_branch).await;
                    } else if let Some(else_branch) = else_branch {
                        return self.exec_scoped(else_branch).await;
                    }
                }
                StmtKind::While { cond, body } => loop {
                    self.meter.tick()?;
                    let keep_going = self.eval(cond).await?;
                    if !truthy(&keep_going) {
                        break;
                    }
                    match self.exec_scoped(body).await? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                },
                StmtKind::ForOf {
                    name,
                    iterable,
                    body,
                } => {
                    let (value, place) = self.eval_place(iterable).await?;
                    let place = place.filter(|_| value.is_array());
                    let items = iterate(value)?;
                    for (i, item) in items.into_iter().enumerate() {
                        self.meter.tick()?;
                        let origin = place
                            .as_ref()
                            .map(|p| p.child(Segment::Index(number(i as f64))));
                        self.scopes.push(HashMap::new());
                        let result = match self.declare(name, item, true, origin) {
                            Ok(()) => self.exec_stmts(body).await,
                            Err(e) => Err(e),
                        };
                        self.scopes.pop();
                        match result? {
                            Flow::Break => break,
                            Flow::Return(v) => return Ok(Flow::Return(v)),
                            Flow::Normal | Flow::Continue => {}
                        }
                    }
                }
                StmtKind::For {
                    init,
                    cond,
                    update,
                    body,
                } => {
                    self.scopes.push(HashMap::new());
                    let result = self.exec_for(init.as_deref(), cond.as_ref(), update.as_deref(), body).await;
                    self.scopes.pop();
                    return result;
                }
                StmtKind::Return(expr) => {
                    let value = match expr {
                        Some(expr) => self.eval(expr).await?,
                        None => Value::Null,
                    };
                    return Ok(Flow::Return(value));
                }
                StmtKind::Break => return Ok(Flow::Break),
                StmtKind::Continue => return Ok(Flow::Continue),
                StmtKind::Block(stmts) => return self.exec_scoped(stmts).await,
            }
            Ok(Flow::Normal)
        })
    }

    fn exec_for<'a>(
        &'a mut self,
        init: Option<&'a Stmt>,
        cond: Option<&'a Expr>,
        update: Option<&'a Stmt>,
        body: &'a [Stmt],
    ) -> BoxFuture<'a, Result<Flow, ScriptError>> {
        Box::pin(async move {
            if let Some(init) = init {
                self.exec_stmt(init).await?;
            }
            loop {
                self.meter.tick()?;
                if let Some(cond) = cond {
                    let keep_going = self.eval(cond).await?;
                    if !truthy(&keep_going) {
                        break;
                    }
                }
                match self.exec_scoped(body).await? {
                    Flow::Break => break,
                    Flow::Return(v) => return Ok(Flow::Return(v)),
                    Flow::Normal | Flow::Continue => {}
                }
                if let Some(update) = update {
                    self.exec_stmt(update).await?;
                }
            }
            Ok(Flow::Normal)
        })
    }

    // ── Assignment ──────────────────────────────────────────────────────

    fn assign<'a>(&'a mut self, target: &'a Expr, value: Value) -> BoxFuture<'a, Result<(), ScriptError>> {
        Box::pin(async move {
            let (root, segments) = self.lvalue_path(target).await?;
            self.write(&root, segments, value)
        })
    }

    /// Flatten an lvalue into its root name and the evaluated path below it.
    fn lvalue_path<'a>(
        &'a mut self,
        target: &'a Expr,
    ) -> BoxFuture<'a, Result<(String, Vec<Segment>), ScriptError>> {
        Box::pin(async move {
            match target {
                Expr::Ident(name) => Ok((name.clone(), Vec::new())),
                Expr::Member { object, property } => {
                    let (root, mut segments) = self.lvalue_path(object).await?;
                    segments.push(Segment::Key(property.clone()));
                    Ok((root, segments))
                }
                Expr::Index { object, index } => {
                    let (root, mut segments) = self.lvalue_path(object).await?;
                    let index = self.eval(index).await?;
                    segments.push(Segment::Index(index));
                    Ok((root, segments))
                }
                _ => Err(ScriptError::Type("invalid assignment target".into())),
            }
        })
    }

    /// Evaluate `expr`, also returning its storage location when it is a
    /// path rooted at a local or a state. Index expressions run once.
    fn eval_place<'a>(
        &'a mut self,
        expr: &'a Expr,
    ) -> BoxFuture<'a, Result<(Value, Option<Place>), ScriptError>> {
        Box::pin(async move {
            let rooted = root_name(expr).is_some_and(|root| {
                self.local_scope(root).is_some() || self.sandbox.state(root).is_some()
            });
            if !rooted {
                return Ok((self.eval(expr).await?, None));
            }
            let (root, segments) = self.lvalue_path(expr).await?;
            let place = Place {
                scope: self.local_scope(&root),
                root,
                segments,
            };
            let value = self.read(&place)?;
            Ok((value, Some(place)))
        })
    }

    fn read(&self, place: &Place) -> Result<Value, ScriptError> {
        let (mut value, segments) = match place.scope {
            Some(scope) => {
                let local = self
                    .scopes
                    .get(scope)
                    .and_then(|s| s.get(&place.root))
                    .ok_or_else(|| ScriptError::Reference(place.root.clone()))?;
                (local.value.clone(), place.segments.as_slice())
            }
            None => {
                let state = self
                    .sandbox
                    .state(&place.root)
                    .ok_or_else(|| ScriptError::Reference(place.root.clone()))?;
                (state.get(), state_path(&place.segments))
            }
        };
        for segment in segments {
            value = match segment {
                Segment::Key(key) => member(&value, key)?,
                Segment::Index(index) => index_value(&value, index)?,
            };
        }
        Ok(value)
    }

    /// Assign `value` at `segments` below the name `root`.
    fn write(&mut self, root: &str, segments: Vec<Segment>, value: Value) -> Result<(), ScriptError> {
        if let Some(scope) = self.local_scope(root) {
            return self.write_local(scope, root, segments, value, false);
        }
        if self.sandbox.state(root).is_some() {
            return self.write_state(root, segments, value);
        }
        if self.sandbox.function(root).is_some() || is_global(root) || is_namespace(root) {
            return Err(ScriptError::Type(format!("cannot assign to '{root}'")));
        }
        Err(ScriptError::Reference(root.to_string()))
    }

    /// Store the result of an in-place mutation such as `xs.push(1)`.
    /// Constants may be mutated in place, just not rebound.
    fn write_place(&mut self, place: &Place, value: Value) -> Result<(), ScriptError> {
        let segments = place.segments.clone();
        match place.scope {
            Some(scope) => self.write_local(scope, &place.root, segments, value, true),
            None => self.write_state(&place.root, segments, value),
        }
    }

    fn write_local(
        &mut self,
        scope: usize,
        name: &str,
        segments: Vec<Segment>,
        value: Value,
        in_place: bool,
    ) -> Result<(), ScriptError> {
        let Some(local) = self.scopes.get_mut(scope).and_then(|s| s.get_mut(name)) else {
            return Err(ScriptError::Reference(name.to_string()));
        };
        if segments.is_empty() && !in_place {
            if !local.mutable {
                return Err(ScriptError::Type(format!(
                    "Assignment to constant variable '{name}'"
                )));
            }
            local.value = value;
            local.origin = None;
            return Ok(());
        }

        if let Some(origin) = local.origin.clone() {
            let mut path = origin.segments.clone();
            path.extend(segments.iter().cloned());
            self.write_place(
                &Place {
                    segments: path,
                    ..origin
                },
                value.clone(),
            )?;
        }
        let Some(local) = self.scopes.get_mut(scope).and_then(|s| s.get_mut(name)) else {
            return Err(ScriptError::Reference(name.to_string()));
        };
        set_in(&mut local.value, &segments, value)
    }

    fn write_state(&mut self, name: &str, segments: Vec<Segment>, value: Value) -> Result<(), ScriptError> {
        let Some(state) = self.sandbox.state(name) else {
            return Err(ScriptError::Reference(name.to_string()));
        };
        let segments = state_path(&segments);
        let updated = if segments.is_empty() {
            value
        } else {
            let mut current = state.get();
            set_in(&mut current, segments, value)?;
            current
        };
        tracing::debug!(state = name, "Script assigned state");
        state.set(updated).map_err(|reason| ScriptError::Binding {
            name: name.to_string(),
            reason,
        })
    }

    // ── Expressions ─────────────────────────────────────────────────────

    fn lookup(&self, name: &str) -> Result<Value, ScriptError> {
        if let Some(local) = self.local(name) {
            return Ok(local.value.clone());
        }
        if let Some(state) = self.sandbox.state(name) {
            return Ok(state.get());
        }
        if self.sandbox.function(name).is_some() || is_global(name) || is_namespace(name) {
            return Err(ScriptError::Type(format!(
                "'{name}' is a function and can only be called"
            )));
        }
        Err(ScriptError::Reference(name.to_string()))
    }

    fn eval<'a>(&'a mut self, expr: &'a Expr) -> BoxFuture<'a, Result<Value, ScriptError>> {
        Box::pin(async move {
            match expr {
                Expr::Literal(value) => Ok(value.clone()),
                Expr::Ident(name) => self.lookup(name),
                Expr::Array(items) => Ok(Value::Array(self.eval_args(items).await?)),
                Expr::Object(props) => {
                    let mut map = Map::new();
                    for (key, expr) in props {
                        let value = self.eval(expr).await?;
                        map.insert(key.clone(), value);
                    }
                    Ok(Value::Object(map))
                }
                Expr::Template(parts) => {
                    let mut out = String::new();
                    for part in parts {
                        match part {
                            TemplatePart::Text(text) => out.push_str(text),
                            TemplatePart::Expr(expr) => {
                                let value = self.eval(expr).await?;
                                out.push_str(&to_display(&value));
                            }
                        }
                    }
                    Ok(Value::String(out))
                }
                Expr::Member { object, property } => {
                    if let Expr::Ident(name) = object.as_ref() {
                        if self.local(name).is_none() {
                            if let Some(state) = self.sandbox.state(name) {
                                if property == "value" {
                                    return Ok(state.get());
                                }
                            } else if is_namespace(name) {
                                return builtins::namespace_property(name, property).ok_or_else(
                                    || ScriptError::Type(format!("{name}.{property} is not a value")),
                                );
                            }
                        }
                    }
                    let object = self.eval(object).await?;
                    member(&object, property)
                }
                Expr::Index { object, index } => {
                    let object = self.eval(object).await?;
                    let index = self.eval(index).await?;
                    index_value(&object, &index)
                }
                Expr::Call { callee, args } => self.call(callee, args).await,
                Expr::Arrow(_) => Err(ScriptError::Type(
                    "arrow functions can only be passed to array methods like map() and filter()"
                        .into(),
                )),
                Expr::Unary { op, expr } => {
                    let value = self.eval(expr).await?;
                    unary(*op, &value)
                }
                Expr::Binary { op, left, right } => {
                    let left = self.eval(left).await?;
                    let right = self.eval(right).await?;
                    binary(*op, &left, &right)
                }
                Expr::Logical { op, left, right } => {
                    let left = self.eval(left).await?;
                    let short_circuit = match op {
                        LogicalOp::And => !truthy(&left),
                        LogicalOp::Or => truthy(&left),
                        LogicalOp::Nullish => !left.is_null(),
                    };
                    if short_circuit {
                        Ok(left)
                    } else {
                        self.eval(right).await
                    }
                }
                Expr::Conditional {
                    cond,
                    then,
                    otherwise,
                } => {
                    let cond = self.eval(cond).await?;
                    if truthy(&cond) {
                        self.eval(then).await
                    } else {
                        self.eval(otherwise).await
                    }
                }
                Expr::Await(inner) => self.eval(inner).await,
            }
        })
    }

    fn eval_args<'a>(&'a mut self, args: &'a [Expr]) -> BoxFuture<'a, Result<Vec<Value>, ScriptError>> {
        Box::pin(async move {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(self.eval(arg).await?);
            }
            Ok(values)
        })
    }

    fn call<'a>(&'a mut self, callee: &'a Expr, args: &'a [Expr]) -> BoxFuture<'a, Result<Value, ScriptError>> {
        Box::pin(async move {
            match callee {
                Expr::Ident(name) => {
                    if self.local(name).is_some() || self.sandbox.state(name).is_some() {
                        return Err(ScriptError::Type(format!("'{name}' is not a function")));
                    }
                    let args = self.eval_args(args).await?;
                    if let Some(function) = self.sandbox.function(name) {
                        tracing::debug!(utility = %name, "Script called utility");
                        return function
                            .call(args)
                            .await
                            .map_err(|reason| ScriptError::Function {
                                name: name.clone(),
                                reason,
                            });
                    }
                    if is_global(name) {
                        return builtins::call_global(name, &args, &mut self.logs);
                    }
                    Err(ScriptError::Reference(name.clone()))
                }
                Expr::Member { object, property } => self.call_method(object, property, args).await,
                _ => Err(ScriptError::Type("expression is not callable".into())),
            }
        })
    }

    fn call_method<'a>(
        &'a mut self,
        object: &'a Expr,
        method: &'a str,
        arg_exprs: &'a [Expr],
    ) -> BoxFuture<'a, Result<Value, ScriptError>> {
        Box::pin(async move {
            if let Expr::Ident(name) = object {
                if is_namespace(name) && !self.is_bound(name) {
                    let args = self.eval_args(arg_exprs).await?;
                    return builtins::call_namespace(name, method, &args, &mut self.logs);
                }
            }

            let (receiver, place) = self.eval_place(object).await?;
            match receiver {
                Value::Array(items) => {
                    if CALLBACK_METHODS.contains(&method) {
                        return self.call_with_callback(items, place, method, arg_exprs).await;
                    }
                    let args = self.eval_args(arg_exprs).await?;
                    if builtins::MUTATING_ARRAY_METHODS.contains(&method) {
                        let mut items = items;
                        let result = builtins::mutate_array(&mut items, method, &args)?;
                        if let Some(place) = &place {
                            self.write_place(place, Value::Array(items))?;
                        }
                        return Ok(result);
                    }
                    builtins::call_array_method(&items, method, &args)
                }
                Value::String(s) => {
                    let args = self.eval_args(arg_exprs).await?;
                    builtins::call_string_method(&s, method, &args)
                }
                Value::Null => Err(ScriptError::Type(format!(
                    "cannot read property '{method}' of null"
                ))),
                other => Err(ScriptError::Type(format!(
                    "{}.{method} is not a function",
                    type_name(&other)
                ))),
            }
        })
    }

    /// Run an array method that takes an arrow callback. When the array
    /// has a storage location, each element passed to the callback writes
    /// through to it.
    fn call_with_callback<'a>(
        &'a mut self,
        items: Vec<Value>,
        place: Option<Place>,
        method: &'a str,
        arg_exprs: &'a [Expr],
    ) -> BoxFuture<'a, Result<Value, ScriptError>> {
        Box::pin(async move {
            let Some(Expr::Arrow(callback)) = arg_exprs.first() else {
                return Err(ScriptError::Type(format!(
                    "{method}() expects an arrow function callback"
                )));
            };

            if method == "reduce" {
                let mut entries = items.into_iter().enumerate();
                let mut acc = match arg_exprs.get(1) {
                    Some(initial) => self.eval(initial).await?,
                    None => match entries.next() {
                        Some((_, first)) => first,
                        None => {
                            return Err(ScriptError::Type(
                                "reduce() of empty array with no initial value".into(),
                            ));
                        }
                    },
                };
                for (i, item) in entries {
                    self.meter.tick()?;
                    acc = self
                        .call_arrow(callback, vec![acc, item, number(i as f64)], None)
                        .await?;
                }
                return Ok(acc);
            }

            let mut mapped = Vec::new();
            for (i, item) in items.into_iter().enumerate() {
                self.meter.tick()?;
                let origin = place
                    .as_ref()
                    .map(|p| p.child(Segment::Index(number(i as f64))));
                let result = self
                    .call_arrow(callback, vec![item.clone(), number(i as f64)], origin)
                    .await?;
                match method {
                    "map" => mapped.push(result),
                    "filter" => {
                        if truthy(&result) {
                            mapped.push(item);
                        }
                    }
                    "find" if truthy(&result) => return Ok(item),
                    "findIndex" if truthy(&result) => return Ok(number(i as f64)),
                    "some" if truthy(&result) => return Ok(Value::Bool(true)),
                    "every" if !truthy(&result) => return Ok(Value::Bool(false)),
                    _ => {}
                }
            }

            Ok(match method {
                "map" | "filter" => Value::Array(mapped),
                "findIndex" => number(-1.0),
                "some" => Value::Bool(false),
                "every" => Value::Bool(true),
                _ => Value::Null,
            })
        })
    }

    /// Call `arrow` in a fresh scope. `origin` is where the first argument
    /// was read from.
    fn call_arrow<'a>(
        &'a mut self,
        arrow: &'a Arrow,
        args: Vec<Value>,
        origin: Option<Place>,
    ) -> BoxFuture<'a, Result<Value, ScriptError>> {
        Box::pin(async move {
            self.scopes.push(HashMap::new());
            let mut args = args.into_iter();
            let mut origin = origin;
            for param in &arrow.params {
                let value = args.next().unwrap_or(Value::Null);
                if let Err(e) = self.declare(param, value, true, origin.take()) {
                    self.scopes.pop();
                    return Err(e);
                }
            }
            let result = match &arrow.body {
                ArrowBody::Expr(expr) => self.eval(expr).await,
                ArrowBody::Block(stmts) => match self.exec_stmts(stmts).await {
                    Ok(Flow::Return(value)) => Ok(value),
                    Ok(Flow::Normal) => Ok(Value::Null),
                    Ok(Flow::Break | Flow::Continue) => Err(ScriptError::Type(
                        "'break' and 'continue' are only valid inside a loop".into(),
                    )),
                    Err(e) => Err(e),
                },
            };
            self.scopes.pop();
            result
        })
    }
}

/// Attach a line number to an error unless it already carries one.
fn at_line(line: usize, error: ScriptError) -> ScriptError {
    match error {
        ScriptError::Runtime { .. } | ScriptError::Syntax { .. } => error,
        other => ScriptError::Runtime {
            line,
            error: Box::new(other),
        },
    }
}

/// The name at the root of a member/index chain.
fn root_name(mut expr: &Expr) -> Option<&str> {
    loop {
        match expr {
            Expr::Ident(name) => return Some(name),
            Expr::Member { object, .. } | Expr::Index { object, .. } => expr = object,
            _ => return None,
        }
    }
}

/// A state path without its leading `.value`.
fn state_path(segments: &[Segment]) -> &[Segment] {
    match segments.split_first() {
        Some((Segment::Key(key), rest)) if key == "value" => rest,
        _ => segments,
    }
}

fn position(n: &Number) -> Option<usize> {
    let f = n.as_f64()?;
    (f >= 0.0 && f.fract() == 0.0).then_some(f as usize)
}

fn iterate(value: Value) -> Result<Vec<Value>, ScriptError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
        other => Err(ScriptError::Type(format!(
            "{} is not iterable",
            type_name(&other)
        ))),
    }
}

fn member(object: &Value, property: &str) -> Result<Value, ScriptError> {
    match object {
        Value::Null => Err(ScriptError::Type(format!(
            "cannot read property '{property}' of null"
        ))),
        Value::Object(map) => Ok(map.get(property).cloned().unwrap_or(Value::Null)),
        Value::Array(items) if property == "length" => Ok(number(items.len() as f64)),
        Value::String(s) if property == "length" => Ok(number(s.chars().count() as f64)),
        _ => Ok(Value::Null),
    }
}

fn index_value(object: &Value, index: &Value) -> Result<Value, ScriptError> {
    match (object, index) {
        (Value::Null, _) => Err(ScriptError::Type(format!(
            "cannot read index {} of null",
            to_display(index)
        ))),
        (Value::Array(items), Value::Number(n)) => Ok(position(n)
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or(Value::Null)),
        (Value::String(s), Value::Number(n)) => Ok(position(n)
            .and_then(|i| s.chars().nth(i))
            .map(|c| Value::String(c.to_string()))
            .unwrap_or(Value::Null)),
        (_, Value::String(key)) => member(object, key),
        (Value::Object(_), other) => member(object, &to_display(other)),
        _ => Ok(Value::Null),
    }
}

/// Write `value` at `segments` below `target`.
fn set_in(target: &mut Value, segments: &[Segment], value: Value) -> Result<(), ScriptError> {
    let Some((first, rest)) = segments.split_first() else {
        *target = value;
        return Ok(());
    };
    let slot = match target {
        Value::Object(map) => {
            let key = first.key();
            if rest.is_empty() {
                map.insert(key, value);
                return Ok(());
            }
            match map.get_mut(&key) {
                Some(slot) => slot,
                None => {
                    return Err(ScriptError::Type(format!(
                        "cannot set property '{}' of undefined '{key}'",
                        rest[0]
                    )));
                }
            }
        }
        Value::Array(items) => {
            let Some(index) = first.position() else {
                return Err(ScriptError::Type(format!("invalid array index '{first}'")));
            };
            let len = items.len();
            if rest.is_empty() {
                if index < len {
                    items[index] = value;
                } else if index == len {
                    items.push(value);
                } else {
                    return Err(ScriptError::Type(format!(
                        "index {index} is out of range for an array of length {len}"
                    )));
                }
                return Ok(());
            }
            match items.get_mut(index) {
                Some(slot) => slot,
                None => {
                    return Err(ScriptError::Type(format!(
                        "index {index} is out of range for an array of length {len}"
                    )));
                }
            }
        }
        other => {
            return Err(ScriptError::Type(format!(
                "cannot set property '{first}' on {}",
                type_name(other)
            )));
        }
    };
    set_in(slot, rest, value)
}

fn unary(op: UnaryOp, value: &Value) -> Result<Value, ScriptError> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!truthy(value))),
        UnaryOp::Plus => Ok(number(builtins::to_number(value)?)),
        UnaryOp::Neg => value
            .as_f64()
            .map(|n| number(-n))
            .ok_or_else(|| ScriptError::Type(format!("cannot negate {}", type_name(value)))),
    }
}

fn op_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Rem => "%",
        BinaryOp::Eq => "==",
        BinaryOp::NotEq => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ScriptError> {
    let mismatch = || {
        ScriptError::Type(format!(
            "cannot apply '{}' to {} and {}",
            op_symbol(op),
            type_name(left),
            type_name(right)
        ))
    };

    match op {
        BinaryOp::Eq => return Ok(Value::Bool(value::equals(left, right))),
        BinaryOp::NotEq => return Ok(Value::Bool(!value::equals(left, right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = value::compare(left, right).ok_or_else(mismatch)?;
            return Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }));
        }
        BinaryOp::Add if left.is_string() || right.is_string() => {
            return Ok(Value::String(format!(
                "{}{}",
                to_display(left),
                to_display(right)
            )));
        }
        _ => {}
    }

    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Err(mismatch());
    };
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Rem if b == 0.0 => {
            return Err(ScriptError::Type("division by zero".into()));
        }
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        _ => return Err(mismatch()),
    };
    Ok(number(result))
}
