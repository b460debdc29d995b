/*!
The matcher graph.

A grammar is an arena of tagged nodes referenced by [`NodeId`]; cycles
(left recursion) are expressed with [`Node::Delayed`] placeholders tied to
their referent before the graph is frozen. Every variant exposes its
children in construction order and can rebuild itself from replacement
children, which is the whole substrate the rewriters stand on: a rewrite is
node surgery on a cloned arena followed by [`Grammar::compact`], the
canonicalizing clone that drops unreachable nodes.

Nodes are immutable during evaluation; the only mutation after the rewriter
chain is the materialization pass that compiles pattern sources against the
configured alphabet.
*/
use std::{collections::HashMap, fmt, sync::Arc};

use bitflags::bitflags;
use bon::bon;
use tangle_automata::{dfa::Dfa, interval::Character, nfa::Nfa};

use crate::{
    lexer::{BlockPolicy, LexerSpec, TokenTag},
    matchers::Value,
    ParseError,
};

/// Reference to a node in a [`Grammar`] arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A result-list transformation attached to a [`Node::Transform`].
#[derive(Clone)]
pub struct TransformFn(
    pub(crate) Arc<dyn Fn(Vec<Value>) -> Result<Vec<Value>, ParseError> + Send + Sync>,
);

impl TransformFn {
    pub fn new(
        f: impl Fn(Vec<Value>) -> Result<Vec<Value>, ParseError> + Send + Sync + 'static,
    ) -> Self {
        TransformFn(Arc::new(f))
    }

    pub fn apply(&self, results: Vec<Value>) -> Result<Vec<Value>, ParseError> {
        (self.0)(results)
    }

    /// Right-to-left composition: `self` runs after `inner`.
    pub fn compose(&self, inner: &TransformFn) -> TransformFn {
        let outer = self.clone();
        let inner = inner.clone();
        TransformFn::new(move |results| outer.apply(inner.apply(results)?))
    }
}

impl fmt::Debug for TransformFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<fn>")
    }
}

/// A matcher node. The `Option` automaton fields start out `None` and are
/// filled by the materialization pass.
#[derive(Clone, Debug)]
pub enum Node {
    And {
        children: Vec<NodeId>,
    },
    Or {
        children: Vec<NodeId>,
    },
    /// One char, optionally restricted to a set.
    Any {
        charset: Option<String>,
        set: Option<Character>,
    },
    Literal {
        text: String,
    },
    Regexp {
        pattern: String,
        nfa: Option<Arc<Nfa<()>>>,
    },
    Lookahead {
        child: NodeId,
        negated: bool,
    },
    Repeat {
        child: NodeId,
        min: u32,
        max: Option<u32>,
        separator: Option<NodeId>,
        greedy: bool,
    },
    Transform {
        child: NodeId,
        function: TransformFn,
    },
    /// Knot-tying placeholder; `target` is written exactly once.
    Delayed {
        target: Option<NodeId>,
    },
    Token {
        tag: TokenTag,
        pattern: String,
        content: Option<NodeId>,
        complete: bool,
    },
    Indent,
    Block {
        lines: Vec<NodeId>,
        policy: Option<BlockPolicy>,
    },
    NfaRegexp {
        pattern: String,
        nfa: Option<Arc<Nfa<()>>>,
    },
    DfaRegexp {
        pattern: String,
        dfa: Option<Arc<Dfa<()>>>,
    },
    LMemo {
        child: NodeId,
    },
    RMemo {
        child: NodeId,
    },
    /// Turns the character stream into a token stream before the wrapped
    /// grammar runs. Installed by the lexer rewriter.
    Lexer {
        child: NodeId,
        spec: Arc<LexerSpec>,
    },
    /// Requires the wrapped grammar to produce a result (and, with `eos`,
    /// to exhaust the stream), turning exhaustion into a diagnostic.
    FullMatch {
        child: NodeId,
        eos: bool,
    },
}

impl Node {
    pub fn kind(&self) -> &'static str {
        match self {
            Node::And { .. } => "And",
            Node::Or { .. } => "Or",
            Node::Any { .. } => "Any",
            Node::Literal { .. } => "Literal",
            Node::Regexp { .. } => "Regexp",
            Node::Lookahead { .. } => "Lookahead",
            Node::Repeat { .. } => "Repeat",
            Node::Transform { .. } => "Transform",
            Node::Delayed { .. } => "Delayed",
            Node::Token { .. } => "Token",
            Node::Indent => "Indent",
            Node::Block { .. } => "Block",
            Node::NfaRegexp { .. } => "NfaRegexp",
            Node::DfaRegexp { .. } => "DfaRegexp",
            Node::LMemo { .. } => "LMemo",
            Node::RMemo { .. } => "RMemo",
            Node::Lexer { .. } => "Lexer",
            Node::FullMatch { .. } => "FullMatch",
        }
    }

    /// Child references in construction order.
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            Node::And { children } | Node::Or { children } => children.clone(),
            Node::Block { lines, .. } => lines.clone(),
            Node::Repeat {
                child, separator, ..
            } => {
                let mut out = vec![*child];
                out.extend(*separator);
                out
            }
            Node::Lookahead { child, .. }
            | Node::Transform { child, .. }
            | Node::LMemo { child }
            | Node::RMemo { child }
            | Node::Lexer { child, .. }
            | Node::FullMatch { child, .. } => vec![*child],
            Node::Token { content, .. } => content.iter().copied().collect(),
            Node::Delayed { target } => target.iter().copied().collect(),
            Node::Any { .. }
            | Node::Literal { .. }
            | Node::Regexp { .. }
            | Node::NfaRegexp { .. }
            | Node::DfaRegexp { .. }
            | Node::Indent => Vec::new(),
        }
    }

    /// The same node with its children replaced in construction order.
    /// `children` must have the length `self.children()` returned.
    pub fn rebuild(&self, children: &[NodeId]) -> Node {
        let mut node = self.clone();
        match &mut node {
            Node::And { children: slots } | Node::Or { children: slots } => {
                slots.copy_from_slice(children);
            }
            Node::Block { lines, .. } => lines.copy_from_slice(children),
            Node::Repeat {
                child, separator, ..
            } => {
                if let Some(&c) = children.first() {
                    *child = c;
                }
                if let Some(sep) = separator {
                    if let Some(&s) = children.get(1) {
                        *sep = s;
                    }
                }
            }
            Node::Lookahead { child, .. }
            | Node::Transform { child, .. }
            | Node::LMemo { child }
            | Node::RMemo { child }
            | Node::Lexer { child, .. }
            | Node::FullMatch { child, .. } => {
                if let Some(&c) = children.first() {
                    *child = c;
                }
            }
            Node::Token { content, .. } => {
                if content.is_some() {
                    *content = children.first().copied();
                }
            }
            Node::Delayed { target } => {
                if target.is_some() {
                    *target = children.first().copied();
                }
            }
            Node::Any { .. }
            | Node::Literal { .. }
            | Node::Regexp { .. }
            | Node::NfaRegexp { .. }
            | Node::DfaRegexp { .. }
            | Node::Indent => {}
        }
        node
    }
}

bitflags! {
    /// Edge classification from [`Grammar::dfs_edges`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Edge: u8 {
        const FORWARD = 1;
        const BACKWARD = 2;
        /// A revisit of an already-seen node (loop or shared subtree).
        const NONTREE = 4;
        const ROOT = 8;
    }
}

/// A frozen matcher graph.
#[derive(Clone, Debug)]
pub struct Grammar {
    nodes: Vec<Node>,
    root: NodeId,
    /// Nodes flagged for evaluation without a coroutine bounce.
    direct: Vec<bool>,
}

impl Grammar {
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub(crate) fn set_root(&mut self, root: NodeId) {
        self.root = root;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub(crate) fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.direct.push(false);
        NodeId(self.nodes.len() as u32 - 1)
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    pub fn is_direct(&self, id: NodeId) -> bool {
        self.direct[id.index()]
    }

    pub(crate) fn set_direct(&mut self, id: NodeId, direct: bool) {
        self.direct[id.index()] = direct;
    }

    /// Follow `Delayed` indirections to the real matcher.
    pub fn resolve(&self, id: NodeId) -> Result<NodeId, ParseError> {
        let mut at = id;
        for _ in 0..=self.nodes.len() {
            match self.node(at) {
                Node::Delayed { target: Some(t) } => at = *t,
                Node::Delayed { target: None } => {
                    return Err(ParseError::configuration("delayed matcher was never tied"))
                }
                _ => return Ok(at),
            }
        }
        Err(ParseError::configuration("delayed matchers form a cycle"))
    }

    /// Iterative DFS over the graph, yielding `(parent, child, flags)`
    /// edges. The root appears as a `FORWARD | ROOT` self-edge first and a
    /// `BACKWARD | ROOT` one last.
    pub fn dfs_edges(&self) -> Vec<(NodeId, NodeId, Edge)> {
        let mut out = Vec::new();
        let root = self.root;
        out.push((root, root, Edge::FORWARD | Edge::ROOT));
        let mut visited = vec![false; self.nodes.len()];
        visited[root.index()] = true;
        // (node, children, next child index)
        let mut stack: Vec<(NodeId, Vec<NodeId>, usize)> =
            vec![(root, self.node(root).children(), 0)];
        loop {
            let next = match stack.last_mut() {
                None => break,
                Some((parent, children, at)) if *at < children.len() => {
                    let child = children[*at];
                    *at += 1;
                    Some((*parent, child))
                }
                Some(_) => None,
            };
            match next {
                Some((parent, child)) => {
                    if visited[child.index()] {
                        out.push((parent, child, Edge::NONTREE));
                    } else {
                        visited[child.index()] = true;
                        out.push((parent, child, Edge::FORWARD));
                        stack.push((child, self.node(child).children(), 0));
                    }
                }
                None => {
                    let node = match stack.pop() {
                        Some((node, _, _)) => node,
                        None => break,
                    };
                    match stack.last() {
                        Some(&(parent, _, _)) => out.push((parent, node, Edge::BACKWARD)),
                        None => out.push((node, node, Edge::BACKWARD | Edge::ROOT)),
                    }
                }
            }
        }
        out
    }

    /// Unique nodes reachable from the root, children before parents.
    pub fn postorder(&self) -> Vec<NodeId> {
        self.dfs_edges()
            .into_iter()
            .filter(|(_, _, flags)| flags.contains(Edge::BACKWARD))
            .map(|(_, child, _)| child)
            .collect()
    }

    /// Canonicalizing clone: rebuild every reachable node into a fresh
    /// arena in first-visit order, dropping the rest. Applying it twice
    /// yields a structurally identical graph.
    pub fn compact(&self) -> Grammar {
        let mut map: HashMap<NodeId, NodeId> = HashMap::new();
        let mut order: Vec<NodeId> = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if map.contains_key(&id) {
                continue;
            }
            map.insert(id, NodeId(order.len() as u32));
            order.push(id);
            let children = self.node(id).children();
            for &child in children.iter().rev() {
                if !map.contains_key(&child) {
                    stack.push(child);
                }
            }
        }
        let mut nodes = Vec::with_capacity(order.len());
        let mut direct = Vec::with_capacity(order.len());
        for &old in &order {
            let children: Vec<NodeId> = self
                .node(old)
                .children()
                .into_iter()
                .map(|c| map[&c])
                .collect();
            nodes.push(self.node(old).rebuild(&children));
            direct.push(self.direct[old.index()]);
        }
        Grammar {
            nodes,
            root: map[&self.root],
            direct,
        }
    }

    /// An ASCII rendering of the graph, loops marked.
    pub fn describe(&self) -> String {
        fn leaf_detail(node: &Node) -> String {
            match node {
                Node::Literal { text } => format!(" {text:?}"),
                Node::Any {
                    charset: Some(charset),
                    ..
                } => format!(" {charset:?}"),
                Node::Regexp { pattern, .. }
                | Node::NfaRegexp { pattern, .. }
                | Node::DfaRegexp { pattern, .. } => format!(" /{pattern}/"),
                Node::Token { tag, pattern, .. } => format!(" {tag:?} /{pattern}/"),
                _ => String::new(),
            }
        }
        fn walk(
            grammar: &Grammar,
            id: NodeId,
            first: &str,
            rest: &str,
            on_stack: &mut Vec<NodeId>,
            out: &mut String,
        ) {
            let node = grammar.node(id);
            out.push_str(first);
            out.push_str(node.kind());
            if on_stack.contains(&id) {
                out.push_str(" <loop>\n");
                return;
            }
            out.push_str(&leaf_detail(node));
            out.push('\n');
            on_stack.push(id);
            let children = node.children();
            for (i, &child) in children.iter().enumerate() {
                let last = i + 1 == children.len();
                let head = format!("{rest}{}", if last { " `- " } else { " +- " });
                let tail = format!("{rest}{}", if last { "    " } else { " |  " });
                walk(grammar, child, &head, &tail, on_stack, out);
            }
            on_stack.pop();
        }
        let mut out = String::new();
        let mut on_stack = Vec::new();
        walk(self, self.root, "", "", &mut on_stack, &mut out);
        out
    }
}

/// Allocates nodes and token ids, ties delayed knots, and freezes the
/// result into a [`Grammar`].
#[derive(Debug, Default)]
pub struct GrammarBuilder {
    nodes: Vec<Node>,
    next_token_id: u32,
}

impl GrammarBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() as u32 - 1)
    }

    pub fn and(&mut self, children: impl IntoIterator<Item = NodeId>) -> NodeId {
        let children = children.into_iter().collect();
        self.push(Node::And { children })
    }

    pub fn or(&mut self, children: impl IntoIterator<Item = NodeId>) -> NodeId {
        let children = children.into_iter().collect();
        self.push(Node::Or { children })
    }

    /// One char; `charset` lists the accepted chars, `None` accepts any.
    pub fn any(&mut self, charset: Option<&str>) -> NodeId {
        self.push(Node::Any {
            charset: charset.map(str::to_owned),
            set: None,
        })
    }

    pub fn literal(&mut self, text: &str) -> NodeId {
        self.push(Node::Literal {
            text: text.to_owned(),
        })
    }

    pub fn regexp(&mut self, pattern: &str) -> NodeId {
        self.push(Node::Regexp {
            pattern: pattern.to_owned(),
            nfa: None,
        })
    }

    pub fn nfa_regexp(&mut self, pattern: &str) -> NodeId {
        self.push(Node::NfaRegexp {
            pattern: pattern.to_owned(),
            nfa: None,
        })
    }

    pub fn dfa_regexp(&mut self, pattern: &str) -> NodeId {
        self.push(Node::DfaRegexp {
            pattern: pattern.to_owned(),
            dfa: None,
        })
    }

    pub fn lookahead(&mut self, child: NodeId, negated: bool) -> NodeId {
        self.push(Node::Lookahead { child, negated })
    }

    pub fn transform(
        &mut self,
        child: NodeId,
        function: impl Fn(Vec<Value>) -> Result<Vec<Value>, ParseError> + Send + Sync + 'static,
    ) -> NodeId {
        self.push(Node::Transform {
            child,
            function: TransformFn::new(function),
        })
    }

    /// Match `child` but drop its results.
    pub fn suppress(&mut self, child: NodeId) -> NodeId {
        self.transform(child, |_| Ok(Vec::new()))
    }

    /// A knot-tying placeholder, to be tied with [`GrammarBuilder::tie`].
    pub fn delayed(&mut self) -> NodeId {
        self.push(Node::Delayed { target: None })
    }

    /// Tie a delayed placeholder to its referent. One shot.
    pub fn tie(&mut self, delayed: NodeId, target: NodeId) -> Result<(), ParseError> {
        match &mut self.nodes[delayed.index()] {
            Node::Delayed { target: slot @ None } => {
                *slot = Some(target);
                Ok(())
            }
            Node::Delayed { target: Some(_) } => Err(ParseError::configuration(
                "delayed matcher was already tied",
            )),
            other => Err(ParseError::configuration(format!(
                "cannot tie a {} matcher",
                other.kind()
            ))),
        }
    }

    pub fn lmemo(&mut self, child: NodeId) -> NodeId {
        self.push(Node::LMemo { child })
    }

    pub fn rmemo(&mut self, child: NodeId) -> NodeId {
        self.push(Node::RMemo { child })
    }

    pub fn indent(&mut self) -> NodeId {
        self.push(Node::Indent)
    }

    /// The `END` item the indent-aware lexer emits at each line end.
    pub fn end_of_line(&mut self) -> NodeId {
        self.push(Node::Token {
            tag: TokenTag::End,
            pattern: String::new(),
            content: None,
            complete: true,
        })
    }

    /// A line in a block: indent and line end matched but suppressed.
    pub fn line(&mut self, child: NodeId) -> NodeId {
        let indent = self.indent();
        let indent = self.suppress(indent);
        let end = self.end_of_line();
        let end = self.suppress(end);
        self.and([indent, child, end])
    }

    /// Freeze the graph. Fails if any delayed placeholder is still untied.
    pub fn build(self, root: NodeId) -> Result<Grammar, ParseError> {
        for node in &self.nodes {
            if matches!(node, Node::Delayed { target: None }) {
                return Err(ParseError::configuration(
                    "grammar contains an untied delayed matcher",
                ));
            }
        }
        let len = self.nodes.len();
        Ok(Grammar {
            direct: vec![false; len],
            nodes: self.nodes,
            root,
        })
    }
}

#[bon]
impl GrammarBuilder {
    /// Repetition of `child`, `min..=max` times (`max = None` unbounded),
    /// with an optional separator between items. Greedy enumerates
    /// longest-first, reluctant shortest-first.
    #[builder(finish_fn = id)]
    pub fn repeat(
        &mut self,
        #[builder(start_fn)] child: NodeId,
        #[builder(default = 0)] min: u32,
        max: Option<u32>,
        separator: Option<NodeId>,
        #[builder(default = true)] greedy: bool,
    ) -> NodeId {
        self.push(Node::Repeat {
            child,
            min,
            max,
            separator,
            greedy,
        })
    }

    /// A lexer token. `content` optionally matches inside the token's text;
    /// with `complete` it must consume that text entirely.
    #[builder(finish_fn = id)]
    pub fn token(
        &mut self,
        #[builder(start_fn)] pattern: &str,
        content: Option<NodeId>,
        #[builder(default = true)] complete: bool,
    ) -> NodeId {
        let id = self.next_token_id;
        self.next_token_id += 1;
        self.push(Node::Token {
            tag: TokenTag::Tok(id),
            pattern: pattern.to_owned(),
            content,
            complete,
        })
    }

    /// An offside-rule block over `lines`. Without an explicit policy the
    /// grammar-wide one (or the tabsize default) applies.
    #[builder(finish_fn = id)]
    pub fn block(
        &mut self,
        #[builder(start_fn)] lines: Vec<NodeId>,
        policy: Option<BlockPolicy>,
    ) -> NodeId {
        self.push(Node::Block { lines, policy })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Grammar {
        // expr = expr '+' term | term ; term = 'x'
        let mut g = GrammarBuilder::new();
        let expr = g.delayed();
        let plus = g.literal("+");
        let term = g.literal("x");
        let sum = g.and([expr, plus, term]);
        let alt = g.or([sum, term]);
        g.tie(expr, alt).expect("tie");
        g.build(alt).expect("grammar")
    }

    #[test]
    fn children_and_rebuild_round_trip() {
        let g = sample();
        for id in g.ids() {
            let node = g.node(id);
            let children = node.children();
            let rebuilt = node.rebuild(&children);
            assert_eq!(rebuilt.children(), children, "{}", node.kind());
        }
    }

    #[test]
    fn untied_delayed_is_rejected() {
        let mut g = GrammarBuilder::new();
        let d = g.delayed();
        let root = g.and([d]);
        assert!(g.build(root).is_err());
    }

    #[test]
    fn tie_is_one_shot() {
        let mut g = GrammarBuilder::new();
        let d = g.delayed();
        let a = g.literal("a");
        g.tie(d, a).expect("tie");
        assert!(g.tie(d, a).is_err());
    }

    #[test]
    fn postorder_is_unique_with_root_last() {
        let g = sample();
        let order = g.postorder();
        assert_eq!(order.len(), g.len());
        let mut sorted = order.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), order.len());
        assert_eq!(order.last().copied(), Some(g.root()));
    }

    #[test]
    fn dfs_edges_flags_loops() {
        let g = sample();
        let edges = g.dfs_edges();
        assert!(edges.iter().any(|&(_, _, f)| f.contains(Edge::NONTREE)));
        assert_eq!(edges[0].2, Edge::FORWARD | Edge::ROOT);
        assert_eq!(
            edges.last().map(|&(_, _, f)| f),
            Some(Edge::BACKWARD | Edge::ROOT)
        );
    }

    #[test]
    fn compact_is_idempotent_and_drops_garbage() {
        let mut builder = GrammarBuilder::new();
        let a = builder.literal("a");
        let _dead = builder.literal("dead");
        let root = builder.and([a]);
        let g = builder.build(root).expect("grammar");
        let once = g.compact();
        assert_eq!(once.len(), 2);
        let twice = once.compact();
        assert_eq!(once.len(), twice.len());
        for (x, y) in once.ids().zip(twice.ids()) {
            assert_eq!(once.node(x).kind(), twice.node(y).kind());
            assert_eq!(once.node(x).children(), twice.node(y).children());
        }
    }

    #[test]
    fn compact_preserves_cycles() {
        let g = sample().compact();
        let described = g.describe();
        assert!(described.contains("<loop>"), "{described}");
    }

    #[test]
    fn resolve_follows_delayed() {
        let g = sample();
        // node 0 is the delayed expr
        let resolved = g.resolve(NodeId(0)).expect("resolve");
        assert_eq!(resolved, g.root());
    }
}
