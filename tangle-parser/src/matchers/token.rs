/*!
Token-level matchers, the offside-rule pair, and the two pipeline
wrappers installed by rewriters (lexer and full-match).

`Token` asserts the current token item carries its tag and optionally runs
a content matcher over the item's text. `Indent` additionally checks the
observed indent against the block monitor's current level. `Block` reads
the indent ahead (without consuming it), computes the new required level
through its policy, and keeps that level pushed exactly while its lines
evaluate, so nested indent checks see it and sibling matchers do not.
*/
use std::sync::Arc;

use log::debug;

use crate::{
    graph::NodeId,
    lexer::{BlockPolicy, LexerSpec, TokenTag, NO_BLOCKS},
    matchers::combine::AndGen,
    stream::{Stream, StreamKey},
    trampoline::{Context, Coroutine, GenId, Reply, Step},
    ParseError, Value,
};

fn strip_eol(mut text: String) -> String {
    if text.ends_with('\n') {
        text.pop();
    }
    text
}

enum TokState {
    Start,
    Content { gen: GenId, next: Stream },
    Emitted,
    Finished,
}

pub(crate) struct TokenGen {
    tag: TokenTag,
    content: Option<NodeId>,
    complete: bool,
    stream: Stream,
    state: TokState,
}

impl TokenGen {
    pub(crate) fn new(
        tag: TokenTag,
        content: Option<NodeId>,
        complete: bool,
        stream: Stream,
    ) -> Self {
        TokenGen {
            tag,
            content,
            complete,
            stream,
            state: TokState::Start,
        }
    }
}

impl Coroutine for TokenGen {
    fn name(&self) -> &'static str {
        "Token"
    }

    fn resume(&mut self, ctx: &mut Context, reply: Reply) -> Result<Step, ParseError> {
        match (&self.state, reply) {
            (TokState::Finished, _) | (TokState::Emitted, _) => Ok(Step::Done),
            (TokState::Start, _) => {
                if self.stream.is_text() {
                    return Err(ParseError::configuration(
                        "a token matcher needs the lexer rewriter; configure it with lexer()",
                    ));
                }
                let (item, next) = match self.stream.next_token()? {
                    Some(found) => found,
                    None => {
                        self.state = TokState::Finished;
                        return Ok(Step::Done);
                    }
                };
                if !item.has(self.tag) {
                    self.state = TokState::Finished;
                    return Ok(Step::Done);
                }
                match self.content {
                    None => {
                        self.state = TokState::Emitted;
                        Ok(Step::Yield(vec![Value::Text(item.text)], next))
                    }
                    Some(content) => {
                        let gen = ctx.spawn(content, item.content.clone())?;
                        self.state = TokState::Content { gen, next };
                        Ok(Step::Call(gen))
                    }
                }
            }
            (TokState::Content { gen, .. }, Reply::Pull) => Ok(Step::Call(*gen)),
            (TokState::Content { gen, next }, Reply::Value(results, after_content)) => {
                // an incomplete content match only counts when allowed
                if self.complete && !after_content.is_empty()? {
                    return Ok(Step::Call(*gen));
                }
                Ok(Step::Yield(results, next.clone()))
            }
            (TokState::Content { .. }, Reply::Exhausted) => {
                self.state = TokState::Finished;
                Ok(Step::Done)
            }
        }
    }
}

pub(crate) struct IndentGen {
    stream: Stream,
    fired: bool,
}

impl IndentGen {
    pub(crate) fn new(stream: Stream) -> Self {
        IndentGen {
            stream,
            fired: false,
        }
    }
}

impl Coroutine for IndentGen {
    fn name(&self) -> &'static str {
        "Indent"
    }

    fn resume(&mut self, ctx: &mut Context, _reply: Reply) -> Result<Step, ParseError> {
        if self.fired {
            return Ok(Step::Done);
        }
        self.fired = true;
        let current = match &ctx.block {
            Some(block) => block.indent(),
            None => {
                return Err(ParseError::offside(
                    "no initial indentation has been set; configure block_policy or \
                     block_start",
                ))
            }
        };
        let (item, next) = match self.stream.next_token()? {
            Some(found) => found,
            None => return Ok(Step::Done),
        };
        if !item.has(TokenTag::Indent) {
            return Ok(Step::Done);
        }
        let text = strip_eol(item.text);
        if current == NO_BLOCKS || text.chars().count() as i64 == current {
            Ok(Step::Yield(vec![Value::Text(text)], next))
        } else {
            debug!(
                "incorrect indent ({} != len({:?}))",
                current, text
            );
            Ok(Step::Done)
        }
    }
}

enum BlockState {
    Start,
    Running,
    Finished,
}

pub(crate) struct BlockGen {
    node: NodeId,
    lines: Vec<NodeId>,
    policy: BlockPolicy,
    stream: Stream,
    state: BlockState,
    lines_gen: Option<GenId>,
    level: i64,
    pushed: bool,
    key: Option<(NodeId, StreamKey)>,
}

impl BlockGen {
    pub(crate) fn new(
        node: NodeId,
        lines: Vec<NodeId>,
        policy: BlockPolicy,
        stream: Stream,
    ) -> Self {
        BlockGen {
            node,
            lines,
            policy,
            stream,
            state: BlockState::Start,
            lines_gen: None,
            level: NO_BLOCKS,
            pushed: false,
            key: None,
        }
    }

    fn push_level(&mut self, ctx: &mut Context) {
        if let Some(block) = &mut ctx.block {
            block.push_level(self.level);
            self.pushed = true;
        }
    }

    fn pop_level(&mut self, ctx: &mut Context) {
        if self.pushed {
            if let Some(block) = &mut ctx.block {
                block.pop_level();
            }
            self.pushed = false;
        }
    }

    fn finish(&mut self, ctx: &mut Context) {
        self.pop_level(ctx);
        if let Some(key) = self.key.take() {
            if let Some(block) = &mut ctx.block {
                block.active.remove(&key);
            }
        }
        self.state = BlockState::Finished;
    }
}

impl Coroutine for BlockGen {
    fn name(&self) -> &'static str {
        "Block"
    }

    fn resume(&mut self, ctx: &mut Context, reply: Reply) -> Result<Step, ParseError> {
        match (&self.state, reply) {
            (BlockState::Finished, _) => Ok(Step::Done),
            (BlockState::Start, _) => {
                let current = match &ctx.block {
                    Some(block) => block.indent(),
                    None => {
                        return Err(ParseError::offside(
                            "a block matcher needs a block configuration; configure \
                             block_policy or block_start",
                        ))
                    }
                };
                let key = (self.node, self.stream.key());
                if let Some(block) = &ctx.block {
                    if block.active.contains(&key) {
                        debug!("avoided left recursive call to Block");
                        self.state = BlockState::Finished;
                        return Ok(Step::Done);
                    }
                }
                // peek the indent; the lines will match (and consume) it
                let item = match self.stream.next_token()? {
                    Some((item, _)) if item.has(TokenTag::Indent) => item,
                    _ => {
                        self.state = BlockState::Finished;
                        return Ok(Step::Done);
                    }
                };
                let observed = strip_eol(item.text);
                let level = match self.policy.apply(current, &observed) {
                    Some(level) => level,
                    None => {
                        self.state = BlockState::Finished;
                        return Ok(Step::Done);
                    }
                };
                if let Some(block) = &mut ctx.block {
                    block.active.insert(key);
                }
                self.key = Some(key);
                self.level = level;
                let lines_gen =
                    ctx.adopt(Box::new(AndGen::new(self.lines.clone(), self.stream.clone())));
                self.lines_gen = Some(lines_gen);
                self.state = BlockState::Running;
                self.push_level(ctx);
                Ok(Step::Call(lines_gen))
            }
            (BlockState::Running, Reply::Pull) => {
                let lines_gen = match self.lines_gen {
                    Some(lines_gen) => lines_gen,
                    None => return Err(ParseError::internal("block without lines")),
                };
                self.push_level(ctx);
                Ok(Step::Call(lines_gen))
            }
            (BlockState::Running, Reply::Value(results, stream)) => {
                self.pop_level(ctx);
                Ok(Step::Yield(results, stream))
            }
            (BlockState::Running, Reply::Exhausted) => {
                self.finish(ctx);
                Ok(Step::Done)
            }
        }
    }

    fn close(&mut self, ctx: &mut Context) {
        self.finish(ctx);
    }
}

/// Turns the character stream into a token stream before the wrapped
/// grammar runs. A pre-built token stream passes through untouched.
pub(crate) struct LexerGen {
    child: NodeId,
    spec: Arc<LexerSpec>,
    stream: Stream,
    gen: Option<GenId>,
}

impl LexerGen {
    pub(crate) fn new(child: NodeId, spec: Arc<LexerSpec>, stream: Stream) -> Self {
        LexerGen {
            child,
            spec,
            stream,
            gen: None,
        }
    }
}

impl Coroutine for LexerGen {
    fn name(&self) -> &'static str {
        "Lexer"
    }

    fn resume(&mut self, ctx: &mut Context, reply: Reply) -> Result<Step, ParseError> {
        match reply {
            Reply::Pull => {
                let gen = match self.gen {
                    Some(gen) => gen,
                    None => {
                        let stream = if self.stream.is_text() {
                            self.spec.token_stream(self.stream.clone())
                        } else {
                            self.stream.clone()
                        };
                        let gen = ctx.spawn(self.child, stream)?;
                        self.gen = Some(gen);
                        gen
                    }
                };
                Ok(Step::Call(gen))
            }
            Reply::Value(results, stream) => Ok(Step::Yield(results, stream)),
            Reply::Exhausted => Ok(Step::Done),
        }
    }
}

/// Demands at least one result (leaving an empty stream when `eos`), and
/// turns exhaustion into a diagnostic carrying the furthest position
/// observed across all attempted paths.
pub(crate) struct FullMatchGen {
    child: NodeId,
    eos: bool,
    stream: Stream,
    gen: Option<GenId>,
    yielded: bool,
}

impl FullMatchGen {
    pub(crate) fn new(child: NodeId, eos: bool, stream: Stream) -> Self {
        FullMatchGen {
            child,
            eos,
            stream,
            gen: None,
            yielded: false,
        }
    }
}

impl Coroutine for FullMatchGen {
    fn name(&self) -> &'static str {
        "FullMatch"
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
                if self.eos && !stream.is_empty()? {
                    let gen = match self.gen {
                        Some(gen) => gen,
                        None => return Err(ParseError::internal("full match without child")),
                    };
                    return Ok(Step::Call(gen));
                }
                self.yielded = true;
                Ok(Step::Yield(results, stream))
            }
            Reply::Exhausted => {
                if self.yielded {
                    return Ok(Step::Done);
                }
                let shared = self.stream.shared();
                let furthest = shared.furthest();
                let expected = shared
                    .expected_hint()
                    .map(|pattern| format!(" (expected /{pattern}/)"))
                    .unwrap_or_default();
                Err(ParseError::FullMatch {
                    location: shared.locate(furthest),
                    snippet: shared.snippet(furthest, 16),
                    expected,
                })
            }
        }
    }
}
