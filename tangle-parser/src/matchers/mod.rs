/*!
Matcher evaluation.

Every graph node evaluates as a coroutine state machine producing a lazy
sequence of `(results, next stream)` pairs through the trampoline protocol.
The leaf matchers live here; combinators, regexp-backed matchers, the
token/offside matchers and the memo wrappers have their own modules.

Matchers flagged for direct evaluation skip the coroutine protocol: their
whole (small) result sequence is computed up front and replayed.
*/
use std::fmt;

use tangle_automata::{alphabet::Unicode, interval::Character};

use crate::{
    graph::{Grammar, Node, NodeId, TransformFn},
    stream::Stream,
    trampoline::{Context, Coroutine, MatchResult, Reply, Step},
    ParseError,
};

pub(crate) mod combine;
pub(crate) mod memo;
pub(crate) mod regexp;
pub(crate) mod token;

/// A parse result value. `And` and `Repeat` concatenate the lists their
/// children produce; `Transform` maps whole lists, typically folding them
/// into a single [`Value::List`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Text(String),
    List(Vec<Value>),
}

impl Value {
    pub fn text(text: impl Into<String>) -> Value {
        Value::Text(text.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            Value::List(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(text) => write!(f, "{text}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Construct the coroutine for `node` at `stream`. `Delayed` indirections
/// are resolved here, so they never cost a bounce.
pub(crate) fn build(
    grammar: &Grammar,
    node: NodeId,
    stream: Stream,
) -> Result<Box<dyn Coroutine>, ParseError> {
    let id = grammar.resolve(node)?;
    if grammar.is_direct(id) {
        let results = regexp::eval_direct(grammar, id, &stream)?;
        return Ok(Box::new(Replay::new("Direct", results)));
    }
    Ok(match grammar.node(id) {
        Node::And { children } => Box::new(combine::AndGen::new(children.clone(), stream)),
        Node::Or { children } => Box::new(combine::OrGen::new(children.clone(), stream)),
        Node::Any { charset, set } => Box::new(AnyGen {
            set: match (set, charset) {
                (Some(set), _) => Some(set.clone()),
                // tolerate an unprepared graph by assuming Unicode
                (None, Some(charset)) => Some(Character::of_chars(charset, &Unicode)),
                (None, None) => None,
            },
            stream,
            fired: false,
        }),
        Node::Literal { text } => Box::new(LiteralGen {
            text: text.clone(),
            stream,
            fired: false,
        }),
        Node::Regexp { pattern, nfa } | Node::NfaRegexp { pattern, nfa } => Box::new(
            regexp::NfaGen::new(pattern.clone(), nfa.clone(), stream),
        ),
        Node::DfaRegexp { pattern, dfa } => Box::new(regexp::DfaGen::new(
            pattern.clone(),
            dfa.clone(),
            stream,
        )),
        Node::Lookahead { child, negated } => Box::new(combine::LookaheadGen::new(
            *child, *negated, stream,
        )),
        Node::Repeat {
            child,
            min,
            max,
            separator,
            greedy,
        } => Box::new(combine::RepeatGen::new(
            *child, *min, *max, *separator, *greedy, stream,
        )),
        Node::Transform { child, function } => Box::new(TransformGen {
            child: *child,
            function: function.clone(),
            stream,
            gen: None,
        }),
        Node::Token {
            tag,
            content,
            complete,
            ..
        } => Box::new(token::TokenGen::new(*tag, *content, *complete, stream)),
        Node::Indent => Box::new(token::IndentGen::new(stream)),
        Node::Block { lines, policy } => Box::new(token::BlockGen::new(
            id,
            lines.clone(),
            policy.clone().unwrap_or_default(),
            stream,
        )),
        Node::LMemo { child } => Box::new(memo::LMemoGen::new(id, *child, stream)),
        Node::RMemo { child } => Box::new(memo::RMemoGen::new(id, *child, stream)),
        Node::Lexer { child, spec } => Box::new(token::LexerGen::new(*child, spec.clone(), stream)),
        Node::FullMatch { child, eos } => {
            Box::new(token::FullMatchGen::new(*child, *eos, stream))
        }
        Node::Delayed { .. } => {
            return Err(ParseError::internal("unresolved delayed matcher at parse"))
        }
    })
}

/// Replays a precomputed result sequence.
pub(crate) struct Replay {
    name: &'static str,
    results: Vec<MatchResult>,
    at: usize,
}

impl Replay {
    pub(crate) fn new(name: &'static str, results: Vec<MatchResult>) -> Self {
        Replay {
            name,
            results,
            at: 0,
        }
    }
}

impl Coroutine for Replay {
    fn name(&self) -> &'static str {
        self.name
    }

    fn resume(&mut self, _ctx: &mut Context, _reply: Reply) -> Result<Step, ParseError> {
        match self.results.get(self.at) {
            Some((results, stream)) => {
                self.at += 1;
                Ok(Step::Yield(results.clone(), stream.clone()))
            }
            None => Ok(Step::Done),
        }
    }
}

struct LiteralGen {
    text: String,
    stream: Stream,
    fired: bool,
}

impl Coroutine for LiteralGen {
    fn name(&self) -> &'static str {
        "Literal"
    }

    fn resume(&mut self, _ctx: &mut Context, _reply: Reply) -> Result<Step, ParseError> {
        if self.fired {
            return Ok(Step::Done);
        }
        self.fired = true;
        match self.stream.take_literal(&self.text) {
            Some(next) => Ok(Step::Yield(vec![Value::Text(self.text.clone())], next)),
            None => Ok(Step::Done),
        }
    }
}

struct AnyGen {
    set: Option<Character>,
    stream: Stream,
    fired: bool,
}

impl Coroutine for AnyGen {
    fn name(&self) -> &'static str {
        "Any"
    }

    fn resume(&mut self, _ctx: &mut Context, _reply: Reply) -> Result<Step, ParseError> {
        if self.fired {
            return Ok(Step::Done);
        }
        self.fired = true;
        match self.stream.next_char() {
            Some((c, next)) => {
                let accepted = match &self.set {
                    Some(set) => set.contains(c as u32),
                    None => true,
                };
                if accepted {
                    Ok(Step::Yield(vec![Value::Text(c.to_string())], next))
                } else {
                    Ok(Step::Done)
                }
            }
            None => Ok(Step::Done),
        }
    }
}

struct TransformGen {
    child: NodeId,
    function: TransformFn,
    stream: Stream,
    gen: Option<crate::trampoline::GenId>,
}

impl Coroutine for TransformGen {
    fn name(&self) -> &'static str {
        "Transform"
    }

    fn resume(&mut self, ctx: &mut Context, reply: Reply) -> Result<Step, ParseError> {
        match reply {
            Reply::Pull => {
                let gen = match self.gen {
                    Some(gen) => gen,
                    None => {
                        let gen = ctx.spawn(self.child, self.stream.clone())?;
                        self.gen = Some(gen);
                        gen
                    }
                };
                Ok(Step::Call(gen))
            }
            Reply::Value(results, stream) => {
                Ok(Step::Yield(self.function.apply(results)?, stream))
            }
            Reply::Exhausted => Ok(Step::Done),
        }
    }
}
