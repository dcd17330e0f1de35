//! Declarative expression nodes.
//!
//! A [`Symbol`] is one node of the computation DAG described before
//! compilation. Nodes are addressed by identity: cloning a `Symbol` shares
//! the underlying node, and using one node under several parents means
//! "reuse this subgraph", never "duplicate it". Building a tree allocates
//! memory and nothing else; no engine resource is touched until the graph
//! compiler walks it.

pub mod ops;
mod serial;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::{AttrKey, OpId};
use crate::tensor::{dim, Dimension, Initializer, ValueInit};

pub use serial::{load_symbol, save_symbol, SymbolDoc};

/// Tag of an expression node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeOp {
    /// The network input placeholder.
    Input,
    /// Trainable named variable.
    Var,
    /// Non-trainable named variable.
    NogVar,
    /// Scalar literal, consumed by scalar-operator rewriting.
    Scalar,
    /// Named forward reference, resolved during compilation.
    Ref,
    /// Named external-link variable, never registered for reuse.
    Link,
    /// Marks the wrapped child as a collected side output.
    Output,
    /// Composes all children, yields the first.
    Bound,
    /// Composes dependencies first, yields the primary child.
    Depend,
    /// Multi-output grouping.
    Group,
    /// Primitive engine operator.
    Prim(OpId),
}

#[derive(Serialize, Deserialize)]
pub(crate) struct Node {
    pub op: NodeOp,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Symbol>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attr: BTreeMap<AttrKey, String>,
    #[serde(skip)]
    pub init: Option<Arc<dyn Initializer>>,
    #[serde(default, skip_serializing_if = "Dimension::empty")]
    pub dim: Dimension,
    #[serde(default, skip_serializing_if = "is_false")]
    pub output: bool,
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl Node {
    fn leaf(op: NodeOp) -> Node {
        Node {
            op,
            value: String::new(),
            name: None,
            args: Vec::new(),
            attr: BTreeMap::new(),
            init: None,
            dim: Dimension::default(),
            output: false,
        }
    }
}

/// A shareable expression node. Clones share identity.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(Arc<Node>);

impl Symbol {
    pub(crate) fn from_node(node: Node) -> Symbol {
        Symbol(Arc::new(node))
    }

    pub(crate) fn node(&self) -> &Node {
        &self.0
    }

    /// Identity key: stable while any clone of this symbol is alive.
    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// True when `self` and `other` are the same allocated node.
    pub fn same(&self, other: &Symbol) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn op(&self) -> NodeOp {
        self.0.op
    }

    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    pub fn args(&self) -> &[Symbol] {
        &self.0.args
    }

    pub fn declared_dim(&self) -> Dimension {
        self.0.dim
    }

    pub fn is_scalar(&self) -> bool {
        self.0.op == NodeOp::Scalar
    }

    pub(crate) fn scalar_value(&self) -> &str {
        &self.0.value
    }

    pub(crate) fn initializer(&self) -> Option<Arc<dyn Initializer>> {
        self.0.init.clone()
    }

    pub fn is_output(&self) -> bool {
        self.0.output
    }

    fn update(mut self, f: impl FnOnce(&mut Node)) -> Symbol {
        let node = Arc::get_mut(&mut self.0).expect("cannot modify a symbol that is already shared");
        f(node);
        self
    }

    /// Names the node. Must be applied before the node is shared.
    pub fn with_name(self, name: impl Into<String>) -> Symbol {
        self.update(|n| n.name = Some(name.into()))
    }

    /// Flags the node as a collected side output.
    pub fn with_output(self, on: bool) -> Symbol {
        if !on && !self.0.output {
            return self;
        }
        self.update(|n| n.output = on)
    }

    /// Declares the dimension of a variable whose shape cannot be inferred.
    /// Placeholder entries are resolved against the network input dimension
    /// at compile time.
    pub fn with_dim(self, dim: Dimension) -> Symbol {
        self.update(|n| n.dim = dim)
    }

    /// Attaches an initializer invoked for this variable's tensor.
    pub fn with_init(self, init: Arc<dyn Initializer>) -> Symbol {
        self.update(|n| n.init = Some(init))
    }

    pub fn maybe_init(self, init: Option<Arc<dyn Initializer>>) -> Symbol {
        match init {
            Some(init) => self.with_init(init),
            None => self,
        }
    }

    /// Turns a trainable variable into a non-trainable one.
    pub fn no_grad(self) -> Symbol {
        self.update(|n| {
            if n.op == NodeOp::Var {
                n.op = NodeOp::NogVar;
            }
        })
    }

    /// Clone used by the compiler to resolve a generator node: same node in
    /// every respect except a fresh attribute map carrying the resolved
    /// shape. The clone has its own identity and is memoized as an alias of
    /// the original.
    pub(crate) fn resolve_generator(&self, shape: Dimension) -> Symbol {
        let n = &self.0;
        let mut attr = n.attr.clone();
        attr.insert(AttrKey::Shape, shape.to_string());
        Symbol(Arc::new(Node {
            op: n.op,
            value: n.value.clone(),
            name: n.name.clone(),
            args: n.args.clone(),
            attr,
            init: n.init.clone(),
            dim: n.dim,
            output: n.output,
        }))
    }
}

impl std::fmt::Debug for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Symbol")
            .field("op", &self.0.op)
            .field("name", &self.0.name)
            .field("args", &self.0.args.len())
            .finish()
    }
}

/// The network input placeholder.
pub fn input() -> Symbol {
    Symbol::from_node(Node::leaf(NodeOp::Input))
}

/// A named trainable variable. Names starting with `_` are internal and
/// never receive gradients; use [`Symbol::no_grad`] for non-trainable
/// variables under other names.
pub fn var(name: impl Into<String>) -> Symbol {
    let mut node = Node::leaf(NodeOp::Var);
    node.name = Some(name.into());
    Symbol::from_node(node)
}

/// A named variable holding explicit constant values.
pub fn value(name: impl Into<String>, values: &[f32]) -> Symbol {
    var(name)
        .with_dim(dim([values.len() as i32]))
        .with_init(Arc::new(ValueInit {
            values: values.to_vec(),
        }))
}

/// A named forward reference, resolved against the name table the compiler
/// builds as it walks the tree. Referencing a name that was never registered
/// is a hard compile error.
pub fn reference(name: impl Into<String>, args: Vec<Symbol>) -> Symbol {
    let mut node = Node::leaf(NodeOp::Ref);
    node.name = Some(name.into());
    node.args = args;
    Symbol::from_node(node)
}

/// A named external-link variable: composes to a fresh engine variable every
/// time, never registered for reuse.
pub fn link(name: impl Into<String>) -> Symbol {
    let mut node = Node::leaf(NodeOp::Link);
    node.name = Some(name.into());
    Symbol::from_node(node)
}

/// Marks `a` as a named side output collected into the compiled graph.
pub fn output(a: &Symbol, name: impl Into<String>) -> Symbol {
    let mut node = Node::leaf(NodeOp::Output);
    node.name = Some(name.into());
    node.args = vec![a.clone()];
    Symbol::from_node(node)
}

/// Composes every child for its side effects and yields the first.
pub fn bound(args: Vec<Symbol>) -> Symbol {
    let mut node = Node::leaf(NodeOp::Bound);
    node.args = args;
    Symbol::from_node(node)
}

/// Composes the dependencies (all children after the first) before yielding
/// the primary child.
pub fn depend(args: Vec<Symbol>) -> Symbol {
    let mut node = Node::leaf(NodeOp::Depend);
    node.args = args;
    Symbol::from_node(node)
}

/// Groups several heads into one multi-output node.
pub fn group(args: Vec<Symbol>) -> Symbol {
    let mut node = Node::leaf(NodeOp::Group);
    node.args = args;
    Symbol::from_node(node)
}

pub(crate) fn scalar(text: String) -> Symbol {
    let mut node = Node::leaf(NodeOp::Scalar);
    node.value = text;
    Symbol::from_node(node)
}

/// Conversion into an expression node. Numbers become scalar literals,
/// strings become named variables.
pub trait IntoSymbol {
    fn into_symbol(self) -> Symbol;
}

impl IntoSymbol for Symbol {
    fn into_symbol(self) -> Symbol {
        self
    }
}

impl IntoSymbol for &Symbol {
    fn into_symbol(self) -> Symbol {
        self.clone()
    }
}

impl IntoSymbol for &str {
    fn into_symbol(self) -> Symbol {
        var(self)
    }
}

macro_rules! scalar_into_symbol {
    ($($ty:ty),*) => {
        $(impl IntoSymbol for $ty {
            fn into_symbol(self) -> Symbol {
                scalar(format!("{}", self))
            }
        })*
    };
}

scalar_into_symbol!(f32, f64, i8, i32, i64, u8, u32, u64, usize);
