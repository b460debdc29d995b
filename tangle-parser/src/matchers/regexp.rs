/*!
Regexp-backed matchers and the direct-evaluation fast path.

An `NfaRegexp` enumerates every distinct match length longest-first; a
`DfaRegexp` commits to the single longest match and cannot backtrack into
shorter ones. Both compute their (finite, small) result sequences on first
pull and replay them, which is also what lets the direct-evaluation
rewriter run them without a coroutine bounce.
*/
use std::sync::Arc;

use tangle_automata::{alphabet::Unicode, dfa::Dfa, interval::Character, nfa::Nfa};

use crate::{
    graph::{Grammar, Node, NodeId},
    stream::Stream,
    trampoline::{Context, Coroutine, MatchResult, Reply, Step},
    ParseError, Value,
};

fn no_codes(pattern: &str) -> ParseError {
    ParseError::configuration(format!(
        "pattern /{pattern}/ needs a character stream; it cannot match tokens"
    ))
}

fn uncompiled(pattern: &str) -> ParseError {
    ParseError::internal(format!(
        "pattern /{pattern}/ was not compiled during materialization"
    ))
}

fn nfa_results(
    pattern: &str,
    nfa: &Option<Arc<Nfa<()>>>,
    stream: &Stream,
) -> Result<Vec<MatchResult>, ParseError> {
    let nfa = nfa.as_ref().ok_or_else(|| uncompiled(pattern))?;
    let codes = stream.codes().ok_or_else(|| no_codes(pattern))?;
    let found = nfa.match_all(codes);
    let mut out = Vec::with_capacity(found.len());
    for m in &found {
        if let Some((text, next)) = stream.next_str(m.len) {
            out.push((vec![Value::Text(text)], next));
        }
    }
    if out.is_empty() {
        stream.shared().note_failure(stream.global_offset(), pattern);
    }
    Ok(out)
}

fn dfa_results(
    pattern: &str,
    dfa: &Option<Arc<Dfa<()>>>,
    stream: &Stream,
) -> Result<Vec<MatchResult>, ParseError> {
    let dfa = dfa.as_ref().ok_or_else(|| uncompiled(pattern))?;
    let codes = stream.codes().ok_or_else(|| no_codes(pattern))?;
    match dfa.longest(codes) {
        Some(m) => match stream.next_str(m.len) {
            Some((text, next)) => Ok(vec![(vec![Value::Text(text)], next)]),
            None => Ok(Vec::new()),
        },
        None => {
            stream.shared().note_failure(stream.global_offset(), pattern);
            Ok(Vec::new())
        }
    }
}

/// Lazily computed longest-first replay of every NFA match.
pub(crate) struct NfaGen {
    pattern: String,
    nfa: Option<Arc<Nfa<()>>>,
    stream: Stream,
    results: Option<Vec<MatchResult>>,
    at: usize,
}

impl NfaGen {
    pub(crate) fn new(pattern: String, nfa: Option<Arc<Nfa<()>>>, stream: Stream) -> Self {
        NfaGen {
            pattern,
            nfa,
            stream,
            results: None,
            at: 0,
        }
    }
}

impl Coroutine for NfaGen {
    fn name(&self) -> &'static str {
        "NfaRegexp"
    }

    fn resume(&mut self, _ctx: &mut Context, _reply: Reply) -> Result<Step, ParseError> {
        if self.results.is_none() {
            self.results = Some(nfa_results(&self.pattern, &self.nfa, &self.stream)?);
        }
        let results = match &self.results {
            Some(results) => results,
            None => return Ok(Step::Done),
        };
        match results.get(self.at) {
            Some((values, next)) => {
                self.at += 1;
                Ok(Step::Yield(values.clone(), next.clone()))
            }
            None => Ok(Step::Done),
        }
    }
}

/// Longest match only; no backtracking into shorter matches.
pub(crate) struct DfaGen {
    pattern: String,
    dfa: Option<Arc<Dfa<()>>>,
    stream: Stream,
    fired: bool,
}

impl DfaGen {
    pub(crate) fn new(pattern: String, dfa: Option<Arc<Dfa<()>>>, stream: Stream) -> Self {
        DfaGen {
            pattern,
            dfa,
            stream,
            fired: false,
        }
    }
}

impl Coroutine for DfaGen {
    fn name(&self) -> &'static str {
        "DfaRegexp"
    }

    fn resume(&mut self, _ctx: &mut Context, _reply: Reply) -> Result<Step, ParseError> {
        if self.fired {
            return Ok(Step::Done);
        }
        self.fired = true;
        let mut results = dfa_results(&self.pattern, &self.dfa, &self.stream)?;
        match results.pop() {
            Some((values, next)) => Ok(Step::Yield(values, next)),
            None => Ok(Step::Done),
        }
    }
}

/// Evaluate a direct-flagged matcher eagerly. Only the simple shapes the
/// direct-evaluation rewriter flags are supported here.
pub(crate) fn eval_direct(
    grammar: &Grammar,
    node: NodeId,
    stream: &Stream,
) -> Result<Vec<MatchResult>, ParseError> {
    let id = grammar.resolve(node)?;
    match grammar.node(id) {
        Node::Literal { text } => Ok(match stream.take_literal(text) {
            Some(next) => vec![(vec![Value::Text(text.clone())], next)],
            None => Vec::new(),
        }),
        Node::Any { charset, set } => Ok(match stream.next_char() {
            Some((c, next)) => {
                let accepted = match (set, charset) {
                    (Some(set), _) => set.contains(c as u32),
                    (None, Some(charset)) => {
                        Character::of_chars(charset, &Unicode).contains(c as u32)
                    }
                    (None, None) => true,
                };
                if accepted {
                    vec![(vec![Value::Text(c.to_string())], next)]
                } else {
                    Vec::new()
                }
            }
            None => Vec::new(),
        }),
        Node::Regexp { pattern, nfa } | Node::NfaRegexp { pattern, nfa } => {
            nfa_results(pattern, nfa, stream)
        }
        Node::DfaRegexp { pattern, dfa } => dfa_results(pattern, dfa, stream),
        Node::Transform { child, function } => {
            let inner = eval_direct(grammar, *child, stream)?;
            let mut out = Vec::with_capacity(inner.len());
            for (values, next) in inner {
                out.push((function.apply(values)?, next));
            }
            Ok(out)
        }
        Node::Lookahead { child, negated } => {
            let inner = eval_direct(grammar, *child, stream)?;
            if inner.is_empty() == *negated {
                Ok(vec![(Vec::new(), stream.clone())])
            } else {
                Ok(Vec::new())
            }
        }
        other => Err(ParseError::internal(format!(
            "{} cannot be evaluated directly",
            other.kind()
        ))),
    }
}
