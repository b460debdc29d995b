/*!
Graph rewriters.

Each rewriter is a pure `Grammar -> Grammar` function applied at
materialization time, before any evaluation. They are declared as an enum
so two rewriters compare equal exactly when their type and parameters do,
which is what lets the configuration builder keep only the last of two
competing registrations.

The left-recursion analyses live here too: a node is on a left-recursive
cycle when it can reach itself through edges that consume no input
(`conservative` widens that to all child edges).
*/
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::debug;
use tangle_automata::{
    alphabet::Alphabet, interval::Character, nfa::NfaBuilder, syntax::Regexp as RegexpTree,
};

use crate::{
    graph::{Grammar, Node, NodeId},
    lexer::{BlockPolicy, LexerSpec, TokenTag},
    ParseError,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegexpKind {
    Nfa,
    Dfa,
}

/// Grammar-wide named-argument injection.
#[derive(Clone, Debug, PartialEq)]
pub enum SetArguments {
    /// Set the policy of every `Block`.
    BlockPolicy(BlockPolicy),
    /// Set `complete` on every `Token`.
    TokenComplete(bool),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Rewriter {
    /// Collapse `And(And(x, y), z)` into `And(x, y, z)`, same for `Or`.
    Flatten,
    /// Fuse transform chains and let transforms over leaf matchers run
    /// without a coroutine bounce.
    ComposeTransforms,
    /// Move left-recursive `Or` branches last so the non-recursive
    /// alternatives are tried first.
    OptimizeOr { conservative: bool },
    /// Wrap left-recursive-cycle nodes in `LMemo`; with `full`, wrap the
    /// rest in `RMemo`.
    AutoMemoize { conservative: bool, full: bool },
    /// Wrap every matcher in `LMemo` (`left`) or `RMemo`.
    Memoize { left: bool },
    /// Lift maximal `And`/`Or`/`Repeat` subgraphs over `Any`/`Literal`/
    /// `Regexp` leaves into single compiled-regexp nodes.
    CompileRegexp { kind: RegexpKind },
    SetArguments(SetArguments),
    /// Wrap the root so a resultless parse raises a diagnostic carrying
    /// the furthest position observed across all attempted paths; with
    /// `eos`, results must exhaust the stream.
    FullMatch { eos: bool },
    /// Flag simple matchers for evaluation without a coroutine bounce.
    DirectEvaluation,
    /// Compile the grammar's tokens and prepend the lexer stage.
    AddLexer {
        discard: Option<String>,
        offside: bool,
        tabsize: usize,
    },
}

impl Rewriter {
    /// Same rewriter kind, parameters ignored: the builder's last-wins key.
    pub(crate) fn same_kind(&self, other: &Rewriter) -> bool {
        match (self, other) {
            (Rewriter::SetArguments(a), Rewriter::SetArguments(b)) => {
                std::mem::discriminant(a) == std::mem::discriminant(b)
            }
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }

    pub(crate) fn apply(
        &self,
        grammar: Grammar,
        alphabet: &Arc<dyn Alphabet>,
    ) -> Result<Grammar, ParseError> {
        match self {
            Rewriter::Flatten => Ok(flatten(grammar)),
            Rewriter::ComposeTransforms => Ok(compose_transforms(grammar)),
            Rewriter::OptimizeOr { conservative } => Ok(optimize_or(grammar, *conservative)),
            Rewriter::AutoMemoize { conservative, full } => {
                Ok(auto_memoize(grammar, *conservative, *full))
            }
            Rewriter::Memoize { left } => {
                let left = *left;
                Ok(wrap_memo(grammar, |_, _| Some(left)))
            }
            Rewriter::CompileRegexp { kind } => compile_regexp(grammar, *kind, alphabet),
            Rewriter::SetArguments(arguments) => Ok(set_arguments(grammar, arguments)),
            Rewriter::FullMatch { eos } => Ok(full_match(grammar, *eos)),
            Rewriter::DirectEvaluation => Ok(direct_evaluation(grammar)),
            Rewriter::AddLexer {
                discard,
                offside,
                tabsize,
            } => add_lexer(grammar, discard.clone(), *offside, *tabsize, alphabet),
        }
    }
}

fn tree_nullable(tree: &RegexpTree) -> bool {
    match tree {
        RegexpTree::Empty => true,
        RegexpTree::Class(_) => false,
        RegexpTree::Choice(items) => items.iter().any(tree_nullable),
        RegexpTree::Sequence(items) => items.iter().all(tree_nullable),
        RegexpTree::Repeat { node, min, .. } => *min == 0 || tree_nullable(node),
    }
}

fn pattern_nullable(pattern: &str) -> bool {
    match RegexpTree::parse(pattern, &tangle_automata::alphabet::Unicode) {
        Ok(tree) => tree_nullable(&tree),
        // be safe about patterns this engine cannot even parse
        Err(_) => true,
    }
}

/// Which nodes can match without consuming input. Monotone fixpoint.
fn nullable(grammar: &Grammar) -> Vec<bool> {
    let mut null = vec![false; grammar.len()];
    for id in grammar.ids() {
        null[id.index()] = match grammar.node(id) {
            Node::Lookahead { .. } => true,
            Node::Literal { text } => text.is_empty(),
            Node::Regexp { pattern, .. }
            | Node::NfaRegexp { pattern, .. }
            | Node::DfaRegexp { pattern, .. } => pattern_nullable(pattern),
            _ => false,
        };
    }
    loop {
        let mut changed = false;
        for id in grammar.ids() {
            let value = match grammar.node(id) {
                Node::And { children } | Node::Block { lines: children, .. } => {
                    children.iter().all(|c| null[c.index()])
                }
                Node::Or { children } => children.iter().any(|c| null[c.index()]),
                Node::Repeat {
                    child,
                    min,
                    separator,
                    ..
                } => {
                    *min == 0
                        || (null[child.index()]
                            && (*min <= 1
                                || separator.map(|s| null[s.index()]).unwrap_or(true)))
                }
                Node::Transform { child, .. }
                | Node::LMemo { child }
                | Node::RMemo { child }
                | Node::Lexer { child, .. }
                | Node::FullMatch { child, .. } => null[child.index()],
                Node::Delayed { target: Some(t) } => null[t.index()],
                _ => continue,
            };
            if value != null[id.index()] {
                null[id.index()] = value;
                changed = true;
            }
        }
        if !changed {
            return null;
        }
    }
}

/// Edges reachable without consuming input first. With `conservative`,
/// every child edge counts.
fn left_edges(grammar: &Grammar, conservative: bool) -> Vec<Vec<NodeId>> {
    if conservative {
        return grammar
            .ids()
            .map(|id| grammar.node(id).children())
            .collect();
    }
    let null = nullable(grammar);
    grammar
        .ids()
        .map(|id| match grammar.node(id) {
            Node::And { children } | Node::Block { lines: children, .. } => {
                let mut out = Vec::new();
                for &child in children {
                    out.push(child);
                    if !null[child.index()] {
                        break;
                    }
                }
                out
            }
            Node::Or { children } => children.clone(),
            Node::Repeat {
                child, separator, ..
            } => {
                let mut out = vec![*child];
                if null[child.index()] {
                    out.extend(*separator);
                }
                out
            }
            Node::Lookahead { child, .. }
            | Node::Transform { child, .. }
            | Node::LMemo { child }
            | Node::RMemo { child }
            | Node::Lexer { child, .. }
            | Node::FullMatch { child, .. } => vec![*child],
            Node::Delayed { target } => target.iter().copied().collect(),
            // a token's content matches a different (sub)stream
            Node::Token { .. }
            | Node::Indent
            | Node::Any { .. }
            | Node::Literal { .. }
            | Node::Regexp { .. }
            | Node::NfaRegexp { .. }
            | Node::DfaRegexp { .. } => Vec::new(),
        })
        .collect()
}

fn reachable_from(edges: &[Vec<NodeId>], from: NodeId, to: NodeId) -> bool {
    let mut seen = vec![false; edges.len()];
    let mut stack = vec![from];
    while let Some(at) = stack.pop() {
        if at == to {
            return true;
        }
        if seen[at.index()] {
            continue;
        }
        seen[at.index()] = true;
        stack.extend(edges[at.index()].iter().copied());
    }
    false
}

/// Nodes that can reach themselves through the given edge relation.
fn recursive_set(grammar: &Grammar, conservative: bool) -> HashSet<NodeId> {
    let edges = left_edges(grammar, conservative);
    grammar
        .ids()
        .filter(|&id| {
            edges[id.index()]
                .iter()
                .any(|&child| reachable_from(&edges, child, id))
        })
        .collect()
}

fn flatten(mut grammar: Grammar) -> Grammar {
    fn collect(grammar: &Grammar, and: bool, children: &[NodeId], out: &mut Vec<NodeId>) {
        for &child in children {
            match grammar.node(child) {
                Node::And { children } if and => collect(grammar, and, children, out),
                Node::Or { children } if !and => collect(grammar, and, children, out),
                _ => out.push(child),
            }
        }
    }
    for id in grammar.ids().collect::<Vec<_>>() {
        let replacement = match grammar.node(id) {
            Node::And { children } => {
                let mut out = Vec::new();
                collect(&grammar, true, children, &mut out);
                (out.len() != children.len()).then_some(Node::And { children: out })
            }
            Node::Or { children } => {
                let mut out = Vec::new();
                collect(&grammar, false, children, &mut out);
                (out.len() != children.len()).then_some(Node::Or { children: out })
            }
            _ => None,
        };
        if let Some(node) = replacement {
            *grammar.node_mut(id) = node;
        }
    }
    grammar.compact()
}

fn compose_transforms(mut grammar: Grammar) -> Grammar {
    // fuse chains bottom-up until stable
    loop {
        let mut changed = false;
        for id in grammar.ids().collect::<Vec<_>>() {
            let fused = match grammar.node(id) {
                Node::Transform { child, function } => match grammar.node(*child) {
                    Node::Transform {
                        child: inner,
                        function: inner_function,
                    } => Some(Node::Transform {
                        child: *inner,
                        function: function.compose(inner_function),
                    }),
                    _ => None,
                },
                _ => None,
            };
            if let Some(node) = fused {
                *grammar.node_mut(id) = node;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    // a transform over a leaf matcher needs no coroutine of its own
    for id in grammar.ids().collect::<Vec<_>>() {
        if let Node::Transform { child, .. } = grammar.node(id) {
            if matches!(
                grammar.node(*child),
                Node::Literal { .. }
                    | Node::Any { .. }
                    | Node::Regexp { .. }
                    | Node::NfaRegexp { .. }
                    | Node::DfaRegexp { .. }
            ) {
                grammar.set_direct(id, true);
            }
        }
    }
    grammar.compact()
}

fn optimize_or(mut grammar: Grammar, conservative: bool) -> Grammar {
    let edges = left_edges(&grammar, conservative);
    for id in grammar.ids().collect::<Vec<_>>() {
        if let Node::Or { children } = grammar.node(id) {
            let children = children.clone();
            let (recursive, plain): (Vec<NodeId>, Vec<NodeId>) = children
                .iter()
                .copied()
                .partition(|&child| reachable_from(&edges, child, id));
            if !recursive.is_empty() && !plain.is_empty() {
                debug!("moving {} left-recursive alternatives last", recursive.len());
                let mut reordered = plain;
                reordered.extend(recursive);
                *grammar.node_mut(id) = Node::Or {
                    children: reordered,
                };
            }
        }
    }
    grammar.compact()
}

fn memoizable(node: &Node) -> bool {
    !matches!(
        node,
        Node::Delayed { .. }
            | Node::Token { .. }
            | Node::Indent
            | Node::Block { .. }
            | Node::Lexer { .. }
            | Node::FullMatch { .. }
            | Node::LMemo { .. }
            | Node::RMemo { .. }
    )
}

fn auto_memoize(grammar: Grammar, conservative: bool, full: bool) -> Grammar {
    let recursive = recursive_set(&grammar, conservative);
    wrap_memo(grammar, |id, _| {
        if recursive.contains(&id) {
            Some(true)
        } else if full {
            Some(false)
        } else {
            None
        }
    })
}

/// Wrap nodes in memo matchers; `chooser` returns `Some(true)` for
/// `LMemo`, `Some(false)` for `RMemo`, `None` to leave a node alone.
fn wrap_memo(mut grammar: Grammar, chooser: impl Fn(NodeId, &Node) -> Option<bool>) -> Grammar {
    let mut wrappers: HashMap<NodeId, NodeId> = HashMap::new();
    for id in grammar.ids().collect::<Vec<_>>() {
        if !memoizable(grammar.node(id)) {
            continue;
        }
        let wrapper = match chooser(id, grammar.node(id)) {
            Some(true) => Node::LMemo { child: id },
            Some(false) => Node::RMemo { child: id },
            None => continue,
        };
        let wrapper = grammar.push(wrapper);
        wrappers.insert(id, wrapper);
    }
    if wrappers.is_empty() {
        return grammar;
    }
    debug!("memoizing {} matchers", wrappers.len());
    // redirect every reference (except the wrappers' own children)
    let wrapper_ids: HashSet<NodeId> = wrappers.values().copied().collect();
    for id in grammar.ids().collect::<Vec<_>>() {
        if wrapper_ids.contains(&id) {
            continue;
        }
        let children = grammar.node(id).children();
        let mapped: Vec<NodeId> = children
            .iter()
            .map(|c| wrappers.get(c).copied().unwrap_or(*c))
            .collect();
        if mapped != children {
            let node = grammar.node(id).rebuild(&mapped);
            *grammar.node_mut(id) = node;
        }
    }
    let root = grammar.root();
    if let Some(&wrapped) = wrappers.get(&root) {
        grammar.set_root(wrapped);
    }
    grammar.compact()
}

/// The regexp tree a subgraph denotes, when it denotes one.
fn liftable(
    grammar: &Grammar,
    alphabet: &Arc<dyn Alphabet>,
    trees: &mut HashMap<NodeId, Option<RegexpTree>>,
    on_stack: &mut HashSet<NodeId>,
    id: NodeId,
) -> Option<RegexpTree> {
    if let Some(known) = trees.get(&id) {
        return known.clone();
    }
    if !on_stack.insert(id) {
        // a cycle can never be a finite regexp
        return None;
    }
    let tree = match grammar.node(id) {
        Node::Any { charset, .. } => Some(RegexpTree::Class(match charset {
            Some(charset) => Character::of_chars(charset, &**alphabet),
            None => Character::new(
                [(alphabet.min_code(), alphabet.max_code())],
                &**alphabet,
            ),
        })),
        Node::Literal { text } => Some(RegexpTree::literal(text, &**alphabet)),
        Node::Regexp { pattern, .. } => RegexpTree::parse(pattern, &**alphabet).ok(),
        Node::And { children } => children
            .iter()
            .map(|&c| liftable(grammar, alphabet, trees, on_stack, c))
            .collect::<Option<Vec<_>>>()
            .map(RegexpTree::Sequence),
        Node::Or { children } => children
            .iter()
            .map(|&c| liftable(grammar, alphabet, trees, on_stack, c))
            .collect::<Option<Vec<_>>>()
            .map(RegexpTree::Choice),
        Node::Repeat {
            child,
            min,
            max,
            separator: None,
            greedy,
        } => liftable(grammar, alphabet, trees, on_stack, *child).map(|tree| {
            RegexpTree::Repeat {
                node: Box::new(tree),
                min: *min,
                max: *max,
                greedy: *greedy,
            }
        }),
        _ => None,
    };
    on_stack.remove(&id);
    trees.insert(id, tree.clone());
    tree
}

fn compile_regexp(
    mut grammar: Grammar,
    kind: RegexpKind,
    alphabet: &Arc<dyn Alphabet>,
) -> Result<Grammar, ParseError> {
    let mut trees: HashMap<NodeId, Option<RegexpTree>> = HashMap::new();
    let mut on_stack = HashSet::new();
    let candidates: Vec<(NodeId, RegexpTree)> = grammar
        .ids()
        .filter(|&id| {
            matches!(
                grammar.node(id),
                Node::And { .. } | Node::Or { .. } | Node::Repeat { .. }
            )
        })
        .filter_map(|id| {
            liftable(&grammar, alphabet, &mut trees, &mut on_stack, id).map(|tree| (id, tree))
        })
        .collect();
    for (id, tree) in candidates {
        let pattern = tree.to_string();
        debug!("compiled subgraph {id:?} to /{pattern}/");
        // compile from the tree directly; the pattern text is cosmetic
        let mut builder = NfaBuilder::new();
        builder.pattern(&tree, ());
        let nfa = builder.build();
        *grammar.node_mut(id) = match kind {
            RegexpKind::Nfa => Node::NfaRegexp {
                pattern,
                nfa: Some(Arc::new(nfa)),
            },
            RegexpKind::Dfa => Node::DfaRegexp {
                pattern,
                dfa: Some(Arc::new(nfa.determinize(&**alphabet))),
            },
        };
    }
    Ok(grammar.compact())
}

fn set_arguments(mut grammar: Grammar, arguments: &SetArguments) -> Grammar {
    for id in grammar.ids().collect::<Vec<_>>() {
        match (arguments, grammar.node_mut(id)) {
            (SetArguments::BlockPolicy(policy), Node::Block { policy: slot, .. }) => {
                *slot = Some(policy.clone());
            }
            (SetArguments::TokenComplete(complete), Node::Token { complete: slot, .. }) => {
                *slot = *complete;
            }
            _ => {}
        }
    }
    grammar
}

fn full_match(mut grammar: Grammar, eos: bool) -> Grammar {
    let root = grammar.root();
    if let Node::FullMatch { eos: slot, .. } = grammar.node_mut(root) {
        *slot = eos;
        return grammar;
    }
    let wrapper = grammar.push(Node::FullMatch { child: root, eos });
    grammar.set_root(wrapper);
    grammar
}

fn direct_evaluation(mut grammar: Grammar) -> Grammar {
    for id in grammar.postorder() {
        let direct = match grammar.node(id) {
            Node::Literal { .. }
            | Node::Any { .. }
            | Node::Regexp { .. }
            | Node::NfaRegexp { .. }
            | Node::DfaRegexp { .. } => true,
            Node::Transform { child, .. } | Node::Lookahead { child, .. } => {
                grammar.is_direct(*child)
            }
            _ => false,
        };
        if direct {
            grammar.set_direct(id, true);
        }
    }
    grammar
}

fn add_lexer(
    mut grammar: Grammar,
    discard: Option<String>,
    offside: bool,
    tabsize: usize,
    alphabet: &Arc<dyn Alphabet>,
) -> Result<Grammar, ParseError> {
    let mut tokens: Vec<(u32, String)> = Vec::new();
    let mut any_token = false;
    for id in grammar.ids() {
        match grammar.node(id) {
            Node::Token { tag, pattern, .. } => {
                any_token = true;
                if let TokenTag::Tok(token_id) = tag {
                    tokens.push((*token_id, pattern.clone()));
                }
            }
            Node::Indent => any_token = true,
            _ => {}
        }
    }
    if !any_token {
        return Ok(grammar);
    }
    tokens.sort_by_key(|&(id, _)| id);
    tokens.dedup_by_key(|&mut (id, _)| id);

    let spec = LexerSpec::compile(tokens)
        .maybe_discard(discard)
        .offside(offside)
        .tabsize(tabsize)
        .alphabet(alphabet.clone())
        .call()?;
    let spec = Arc::new(spec);
    let root = grammar.root();
    if let Node::Lexer { spec: slot, .. } = grammar.node_mut(root) {
        *slot = spec;
        return Ok(grammar);
    }
    let wrapper = grammar.push(Node::Lexer { child: root, spec });
    grammar.set_root(wrapper);
    Ok(grammar)
}

/// The materialization pass run after the rewriter chain: compile every
/// pattern source against the configured alphabet and validate repeat
/// bounds. The graph is immutable from here on.
pub(crate) fn materialize(
    grammar: &mut Grammar,
    alphabet: &Arc<dyn Alphabet>,
) -> Result<(), ParseError> {
    for id in grammar.ids().collect::<Vec<_>>() {
        match grammar.node(id) {
            Node::Repeat {
                min, max: Some(max), ..
            } if max < min => {
                return Err(ParseError::configuration(format!(
                    "repeat bounds {min}..{max} are reversed"
                )))
            }
            _ => {}
        }
        let compiled = match grammar.node(id) {
            Node::Any {
                charset: Some(charset),
                set: None,
            } => Some(Node::Any {
                charset: Some(charset.clone()),
                set: Some(Character::of_chars(charset, &**alphabet)),
            }),
            Node::Regexp { pattern, nfa: None } => {
                let tree = RegexpTree::parse(pattern, &**alphabet)?;
                let mut builder = NfaBuilder::new();
                builder.pattern(&tree, ());
                Some(Node::Regexp {
                    pattern: pattern.clone(),
                    nfa: Some(Arc::new(builder.build())),
                })
            }
            Node::NfaRegexp { pattern, nfa: None } => {
                let tree = RegexpTree::parse(pattern, &**alphabet)?;
                let mut builder = NfaBuilder::new();
                builder.pattern(&tree, ());
                Some(Node::NfaRegexp {
                    pattern: pattern.clone(),
                    nfa: Some(Arc::new(builder.build())),
                })
            }
            Node::DfaRegexp { pattern, dfa: None } => {
                let tree = RegexpTree::parse(pattern, &**alphabet)?;
                let mut builder = NfaBuilder::new();
                builder.pattern(&tree, ());
                Some(Node::DfaRegexp {
                    pattern: pattern.clone(),
                    dfa: Some(Arc::new(builder.build().determinize(&**alphabet))),
                })
            }
            _ => None,
        };
        if let Some(node) = compiled {
            *grammar.node_mut(id) = node;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GrammarBuilder;
    use tangle_automata::alphabet::Unicode;

    fn unicode() -> Arc<dyn Alphabet> {
        Arc::new(Unicode)
    }

    fn left_recursive_expr() -> Grammar {
        // expr = expr '+' num | num
        let mut g = GrammarBuilder::new();
        let expr = g.delayed();
        let plus = g.literal("+");
        let num = g.regexp("[0-9]+");
        let sum = g.and([expr, plus, num]);
        let alt = g.or([sum, num]);
        g.tie(expr, alt).expect("tie");
        g.build(alt).expect("grammar")
    }

    #[test]
    fn flatten_collapses_nested_same_kind() {
        let mut g = GrammarBuilder::new();
        let a = g.literal("a");
        let b = g.literal("b");
        let c = g.literal("c");
        let inner = g.and([a, b]);
        let outer = g.and([inner, c]);
        let grammar = g.build(outer).expect("grammar");
        let flat = flatten(grammar);
        match flat.node(flat.root()) {
            Node::And { children } => assert_eq!(children.len(), 3),
            other => panic!("{}", other.kind()),
        }
        // idempotent
        let again = flatten(flat.clone());
        assert_eq!(again.len(), flat.len());
    }

    #[test]
    fn nullable_analysis() {
        let mut g = GrammarBuilder::new();
        let a = g.literal("a");
        let star = g.repeat(a).min(0).id();
        let empty = g.literal("");
        let root = g.and([star, empty]);
        let grammar = g.build(root).expect("grammar");
        let null = nullable(&grammar);
        assert!(null[star.index()]);
        assert!(null[empty.index()]);
        assert!(null[root.index()]);
        assert!(!null[a.index()]);
    }

    #[test]
    fn recursion_detection_finds_left_recursion_only() {
        let grammar = left_recursive_expr();
        let recursive = recursive_set(&grammar, false);
        // the Or and the And are on the left cycle; the leaves are not
        assert!(recursive.contains(&grammar.root()));
        assert!(!recursive.is_empty());
        // right recursion is not left recursion under the precise analysis
        let mut g = GrammarBuilder::new();
        let expr = g.delayed();
        let num = g.regexp("[0-9]+");
        let plus = g.literal("+");
        let sum = g.and([num, plus, expr]);
        let alt = g.or([sum, num]);
        g.tie(expr, alt).expect("tie");
        let right = g.build(alt).expect("grammar");
        assert!(recursive_set(&right, false).is_empty());
        assert!(!recursive_set(&right, true).is_empty());
    }

    #[test]
    fn auto_memoize_wraps_cycles() {
        let grammar = left_recursive_expr();
        let rewritten = auto_memoize(grammar, false, false);
        let lmemos = rewritten
            .ids()
            .filter(|&id| matches!(rewritten.node(id), Node::LMemo { .. }))
            .count();
        assert!(lmemos > 0);
        assert!(matches!(
            rewritten.node(rewritten.root()),
            Node::LMemo { .. }
        ));
    }

    #[test]
    fn auto_memoize_full_wraps_the_rest() {
        let mut g = GrammarBuilder::new();
        let a = g.literal("a");
        let b = g.literal("b");
        let root = g.and([a, b]);
        let grammar = g.build(root).expect("grammar");
        let rewritten = auto_memoize(grammar, false, true);
        let rmemos = rewritten
            .ids()
            .filter(|&id| matches!(rewritten.node(id), Node::RMemo { .. }))
            .count();
        assert_eq!(rmemos, 3);
    }

    #[test]
    fn optimize_or_moves_recursive_branches_last() {
        // expr = expr '+' num | num, with the recursive branch first
        let grammar = left_recursive_expr();
        let rewritten = optimize_or(grammar, true);
        let or = rewritten
            .ids()
            .find(|&id| matches!(rewritten.node(id), Node::Or { .. }))
            .expect("or node");
        match rewritten.node(or) {
            Node::Or { children } => {
                // the plain alternative now comes first
                assert!(matches!(
                    rewritten.node(children[0]),
                    Node::Regexp { .. }
                ));
                assert!(matches!(rewritten.node(children[1]), Node::And { .. }));
            }
            other => panic!("{}", other.kind()),
        }
    }

    #[test]
    fn compile_regexp_lifts_composite_subgraphs() {
        let mut g = GrammarBuilder::new();
        let any = g.any(Some("ab"));
        let rep = g.repeat(any).min(3).max(5).id();
        let grammar = g.build(rep).expect("grammar");
        let rewritten = compile_regexp(grammar, RegexpKind::Nfa, &unicode()).expect("rewrite");
        assert_eq!(rewritten.len(), 1);
        match rewritten.node(rewritten.root()) {
            Node::NfaRegexp { pattern, .. } => assert_eq!(pattern, "[a-b]{3,5}"),
            other => panic!("{}", other.kind()),
        }
    }

    #[test]
    fn compile_regexp_leaves_transforms_alone() {
        let mut g = GrammarBuilder::new();
        let a = g.literal("a");
        let t = g.transform(a, Ok);
        let b = g.literal("b");
        let root = g.and([t, b]);
        let grammar = g.build(root).expect("grammar");
        let rewritten =
            compile_regexp(grammar.clone(), RegexpKind::Nfa, &unicode()).expect("rewrite");
        assert!(matches!(rewritten.node(rewritten.root()), Node::And { .. }));
    }

    #[test]
    fn rewriter_equality_is_type_and_parameters() {
        assert_eq!(
            Rewriter::OptimizeOr { conservative: true },
            Rewriter::OptimizeOr { conservative: true }
        );
        assert_ne!(
            Rewriter::OptimizeOr { conservative: true },
            Rewriter::OptimizeOr {
                conservative: false
            }
        );
        assert!(Rewriter::OptimizeOr { conservative: true }
            .same_kind(&Rewriter::OptimizeOr {
                conservative: false
            }));
        assert!(!Rewriter::Flatten.same_kind(&Rewriter::DirectEvaluation));
    }

    #[test]
    fn applying_a_rewriter_twice_is_idempotent() {
        let grammar = left_recursive_expr();
        for rewriter in [
            Rewriter::Flatten,
            Rewriter::OptimizeOr { conservative: true },
            Rewriter::CompileRegexp {
                kind: RegexpKind::Nfa,
            },
        ] {
            let once = rewriter
                .apply(grammar.clone(), &unicode())
                .expect("rewrite");
            let twice = rewriter.apply(once.clone(), &unicode()).expect("rewrite");
            assert_eq!(once.len(), twice.len(), "{rewriter:?}");
            for (x, y) in once.ids().zip(twice.ids()) {
                assert_eq!(once.node(x).kind(), twice.node(y).kind(), "{rewriter:?}");
            }
        }
    }

    #[test]
    fn full_match_wraps_once() {
        let mut g = GrammarBuilder::new();
        let a = g.literal("a");
        let grammar = g.build(a).expect("grammar");
        let once = full_match(grammar, true);
        let twice = full_match(once.clone(), false);
        assert_eq!(once.len(), twice.len());
        assert!(matches!(
            twice.node(twice.root()),
            Node::FullMatch { eos: false, .. }
        ));
    }
}
