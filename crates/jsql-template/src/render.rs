//! Evaluation of parsed templates.
//!
//! The [`Renderer`] walks a [`Node`] tree against a [`Context`], resolving
//! names from the context first and the environment's globals second.
//! Rendering writes into a private buffer that is only handed back when the
//! whole tree rendered, so a failing `assert_safe` never leaks partial output.

use std::cmp::Ordering;
use std::collections::HashMap;

use jsql_core::error::{JsqlError, JsqlResult};

use crate::context::{Context, ContextValue};
use crate::filters::FilterRegistry;
use crate::parser::{BinOp, Expr, Literal, Node};

/// Renders node trees using a filter registry and a set of globals.
pub struct Renderer<'a> {
    filters: &'a FilterRegistry,
    globals: &'a HashMap<String, ContextValue>,
}

impl<'a> Renderer<'a> {
    /// Creates a renderer.
    pub const fn new(
        filters: &'a FilterRegistry,
        globals: &'a HashMap<String, ContextValue>,
    ) -> Self {
        Self { filters, globals }
    }

    /// Renders `nodes` to a string.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by any expression, filter, or tag;
    /// nothing rendered before it is returned.
    pub fn render(&self, nodes: &[Node], context: &mut Context) -> JsqlResult<String> {
        let mut buf = String::new();
        self.render_nodes(nodes, context, &mut buf)?;
        Ok(buf)
    }

    fn render_nodes(&self, nodes: &[Node], context: &mut Context, buf: &mut String) -> JsqlResult<()> {
        for node in nodes {
            self.render_node(node, context, buf)?;
        }
        Ok(())
    }

    fn render_node(&self, node: &Node, context: &mut Context, buf: &mut String) -> JsqlResult<()> {
        match node {
            Node::Data(text) => buf.push_str(text),
            Node::Output(expr) => {
                let value = self.eval(expr, context)?;
                buf.push_str(&value.to_display_string());
            }
            Node::If {
                branches,
                else_body,
            } => {
                for (cond, body) in branches {
                    if self.eval(cond, context)?.is_truthy() {
                        return self.render_nodes(body, context, buf);
                    }
                }
                self.render_nodes(else_body, context, buf)?;
            }
            Node::For {
                targets,
                iter,
                body,
                else_body,
            } => {
                let items = iterate(self.eval(iter, context)?)?;
                if items.is_empty() {
                    return self.render_nodes(else_body, context, buf);
                }
                context.push();
                let result = self.render_loop(targets, items, body, context, buf);
                context.pop();
                result?;
            }
            Node::Set { name, value } => {
                let value = self.eval(value, context)?;
                context.set(name.clone(), value);
            }
        }
        Ok(())
    }

    fn render_loop(
        &self,
        targets: &[String],
        items: Vec<ContextValue>,
        body: &[Node],
        context: &mut Context,
        buf: &mut String,
    ) -> JsqlResult<()> {
        let length = items.len();
        for (index0, item) in items.into_iter().enumerate() {
            context.set("loop", loop_info(index0, length));
            bind_targets(targets, item, context)?;
            self.render_nodes(body, context, buf)?;
        }
        Ok(())
    }

    /// Evaluates an expression.
    ///
    /// # Errors
    ///
    /// Returns a `RenderError` for type errors, unknown filters, calls on
    /// non-callables, and arithmetic failures; filter errors (including
    /// `UnsafeSql`) pass through unchanged.
    pub fn eval(&self, expr: &Expr, context: &Context) -> JsqlResult<ContextValue> {
        match expr {
            Expr::Name(name) => Ok(context
                .get(name)
                .or_else(|| self.globals.get(name))
                .cloned()
                .unwrap_or(ContextValue::None)),
            Expr::Literal(lit) => Ok(match lit {
                Literal::Str(s) => ContextValue::String(s.clone()),
                Literal::Integer(i) => ContextValue::Integer(*i),
                Literal::Float(f) => ContextValue::Float(*f),
                Literal::Bool(b) => ContextValue::Bool(*b),
                Literal::None => ContextValue::None,
            }),
            Expr::List(items) => Ok(ContextValue::List(
                items
                    .iter()
                    .map(|item| self.eval(item, context))
                    .collect::<JsqlResult<_>>()?,
            )),
            Expr::Getattr(obj, attr) => Ok(self
                .eval(obj, context)?
                .resolve_path(attr)
                .cloned()
                .unwrap_or(ContextValue::None)),
            Expr::Getitem(obj, key) => {
                let obj = self.eval(obj, context)?;
                let key = self.eval(key, context)?;
                Ok(get_item(&obj, &key))
            }
            Expr::Call(func, args) => {
                let callee = self.eval(func, context)?;
                let args = self.eval_args(args, context)?;
                match callee {
                    ContextValue::Function(f) => f.call(&args),
                    other => Err(JsqlError::RenderError(format!(
                        "{} is not callable",
                        describe_callee(func, &other)
                    ))),
                }
            }
            Expr::Filter { expr, name, args } => {
                let value = self.eval(expr, context)?;
                let args = self.eval_args(args, context)?;
                self.filters.apply(name, &value, &args)
            }
            Expr::Not(inner) => Ok(ContextValue::Bool(!self.eval(inner, context)?.is_truthy())),
            Expr::Neg(inner) => match self.eval(inner, context)? {
                ContextValue::Integer(i) => i
                    .checked_neg()
                    .map(ContextValue::Integer)
                    .ok_or_else(|| JsqlError::RenderError("integer overflow".to_string())),
                ContextValue::Float(f) => Ok(ContextValue::Float(-f)),
                other => Err(JsqlError::RenderError(format!(
                    "cannot negate '{}'",
                    other.to_display_string()
                ))),
            },
            Expr::Binary(BinOp::And, left, right) => {
                let left = self.eval(left, context)?;
                if left.is_truthy() {
                    self.eval(right, context)
                } else {
                    Ok(left)
                }
            }
            Expr::Binary(BinOp::Or, left, right) => {
                let left = self.eval(left, context)?;
                if left.is_truthy() {
                    Ok(left)
                } else {
                    self.eval(right, context)
                }
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left, context)?;
                let right = self.eval(right, context)?;
                binary(*op, &left, &right)
            }
        }
    }

    fn eval_args(&self, args: &[Expr], context: &Context) -> JsqlResult<Vec<ContextValue>> {
        args.iter().map(|arg| self.eval(arg, context)).collect()
    }
}

fn describe_callee(func: &Expr, value: &ContextValue) -> String {
    match func {
        Expr::Name(name) if matches!(value, ContextValue::None) => format!("undefined name '{name}'"),
        Expr::Name(name) => format!("'{name}'"),
        _ => "expression".to_string(),
    }
}

fn loop_info(index0: usize, length: usize) -> ContextValue {
    let mut info = HashMap::new();
    info.insert("index".to_string(), ContextValue::from(index0 + 1));
    info.insert("index0".to_string(), ContextValue::from(index0));
    info.insert("revindex".to_string(), ContextValue::from(length - index0));
    info.insert("revindex0".to_string(), ContextValue::from(length - index0 - 1));
    info.insert("first".to_string(), ContextValue::Bool(index0 == 0));
    info.insert("last".to_string(), ContextValue::Bool(index0 + 1 == length));
    info.insert("length".to_string(), ContextValue::from(length));
    ContextValue::Dict(info)
}

fn bind_targets(targets: &[String], item: ContextValue, context: &mut Context) -> JsqlResult<()> {
    if let [single] = targets {
        context.set(single.clone(), item);
        return Ok(());
    }
    match item {
        ContextValue::List(values) if values.len() == targets.len() => {
            for (name, value) in targets.iter().zip(values) {
                context.set(name.clone(), value);
            }
            Ok(())
        }
        other => Err(JsqlError::RenderError(format!(
            "cannot unpack '{}' into {} loop variables",
            other.to_display_string(),
            targets.len()
        ))),
    }
}

fn iterate(value: ContextValue) -> JsqlResult<Vec<ContextValue>> {
    match value {
        ContextValue::List(items) => Ok(items),
        ContextValue::Dict(map) => {
            let mut keys: Vec<String> = map.into_keys().collect();
            keys.sort();
            Ok(keys.into_iter().map(ContextValue::String).collect())
        }
        ContextValue::None => Ok(Vec::new()),
        other => Err(JsqlError::RenderError(format!(
            "'{}' is not iterable",
            other.to_display_string()
        ))),
    }
}

#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn get_item(obj: &ContextValue, key: &ContextValue) -> ContextValue {
    match (obj, key) {
        (ContextValue::List(items), ContextValue::Integer(idx)) => {
            let len = items.len() as i64;
            let idx = if *idx < 0 { len + idx } else { *idx };
            if (0..len).contains(&idx) {
                items[idx as usize].clone()
            } else {
                ContextValue::None
            }
        }
        (ContextValue::Dict(map), key) => map
            .get(&key.to_display_string())
            .cloned()
            .unwrap_or(ContextValue::None),
        _ => ContextValue::None,
    }
}

enum Number {
    Int(i64),
    Float(f64),
}

#[allow(clippy::cast_precision_loss)]
impl Number {
    fn of(value: &ContextValue) -> Option<Self> {
        match value {
            ContextValue::Integer(i) => Some(Self::Int(*i)),
            ContextValue::Float(f) => Some(Self::Float(*f)),
            _ => None,
        }
    }

    fn as_f64(&self) -> f64 {
        match self {
            Self::Int(i) => *i as f64,
            Self::Float(f) => *f,
        }
    }
}

fn overflow() -> JsqlError {
    JsqlError::RenderError("integer overflow".to_string())
}

fn type_error(op: BinOp, left: &ContextValue, right: &ContextValue) -> JsqlError {
    JsqlError::RenderError(format!(
        "unsupported operand types for {op:?}: '{}' and '{}'",
        left.to_display_string(),
        right.to_display_string()
    ))
}

fn binary(op: BinOp, left: &ContextValue, right: &ContextValue) -> JsqlResult<ContextValue> {
    match op {
        BinOp::Eq => Ok(ContextValue::Bool(left == right)),
        BinOp::Ne => Ok(ContextValue::Bool(left != right)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = compare(left, right).ok_or_else(|| type_error(op, left, right))?;
            Ok(ContextValue::Bool(match op {
                BinOp::Lt => ordering == Ordering::Less,
                BinOp::Le => ordering != Ordering::Greater,
                BinOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinOp::In => contains(right, left).map(ContextValue::Bool),
        BinOp::NotIn => contains(right, left).map(|found| ContextValue::Bool(!found)),
        BinOp::Concat => Ok(ContextValue::String(format!(
            "{}{}",
            left.to_display_string(),
            right.to_display_string()
        ))),
        BinOp::Add => match (left, right) {
            (ContextValue::String(a), ContextValue::String(b)) => {
                Ok(ContextValue::String(format!("{a}{b}")))
            }
            (ContextValue::List(a), ContextValue::List(b)) => {
                Ok(ContextValue::List(a.iter().chain(b).cloned().collect()))
            }
            _ => arithmetic(op, left, right),
        },
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => arithmetic(op, left, right),
        BinOp::And => Ok(if left.is_truthy() {
            right.clone()
        } else {
            left.clone()
        }),
        BinOp::Or => Ok(if left.is_truthy() {
            left.clone()
        } else {
            right.clone()
        }),
    }
}

fn arithmetic(op: BinOp, left: &ContextValue, right: &ContextValue) -> JsqlResult<ContextValue> {
    let (Some(a), Some(b)) = (Number::of(left), Number::of(right)) else {
        return Err(type_error(op, left, right));
    };

    if op == BinOp::Div {
        let divisor = b.as_f64();
        if divisor == 0.0 {
            return Err(JsqlError::RenderError("division by zero".to_string()));
        }
        return Ok(ContextValue::Float(a.as_f64() / divisor));
    }

    match (a, b) {
        (Number::Int(x), Number::Int(y)) => {
            let result = match op {
                BinOp::Add => x.checked_add(y),
                BinOp::Sub => x.checked_sub(y),
                BinOp::Mul => x.checked_mul(y),
                _ => {
                    if y == 0 {
                        return Err(JsqlError::RenderError("modulo by zero".to_string()));
                    }
                    x.checked_rem_euclid(y)
                }
            };
            result.map(ContextValue::Integer).ok_or_else(overflow)
        }
        (a, b) => {
            let (x, y) = (a.as_f64(), b.as_f64());
            Ok(ContextValue::Float(match op {
                BinOp::Add => x + y,
                BinOp::Sub => x - y,
                BinOp::Mul => x * y,
                _ => {
                    if y == 0.0 {
                        return Err(JsqlError::RenderError("modulo by zero".to_string()));
                    }
                    x.rem_euclid(y)
                }
            }))
        }
    }
}

fn compare(left: &ContextValue, right: &ContextValue) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (Number::of(left), Number::of(right)) {
        return a.as_f64().partial_cmp(&b.as_f64());
    }
    match (left.as_str(), right.as_str()) {
        (Some(a), Some(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn contains(haystack: &ContextValue, needle: &ContextValue) -> JsqlResult<bool> {
    match haystack {
        ContextValue::List(items) => Ok(items.contains(needle)),
        ContextValue::Dict(map) => Ok(map.contains_key(&needle.to_display_string())),
        ContextValue::String(s) => Ok(s.contains(&needle.to_display_string())),
        other => Err(JsqlError::RenderError(format!(
            "argument of type '{}' is not a container",
            other.to_display_string()
        ))),
    }
}
