/*!
Token generation.

The lexer is a state machine over a character stream that produces
`(tags, substream)` items on demand: at each position it tries the combined
token DFA, falls back to the discard pattern, and fails with a lex error
when neither matches. The indent-aware variant walks the input a line at a
time, emitting an `INDENT` item (tabs expanded) at each line start and an
`END` item at each line end, which is what the offside-rule matchers key on.

Everything here is driven lazily through [`TokenSource`]; a stream over
tokens only lexes as far as it has been read.
*/
use std::{
    collections::HashSet,
    fmt,
    sync::{Arc, Mutex},
};

use bon::bon;
use itertools::Itertools;
use log::trace;
use tangle_automata::{
    alphabet::{Alphabet, Unicode},
    dfa::Dfa,
    nfa::NfaBuilder,
    syntax::Regexp,
};

use crate::{
    graph::NodeId,
    stream::{SharedInput, Stream, StreamKey},
    ParseError,
};

/// The default number of spaces for a tab.
pub const DEFAULT_TABSIZE: usize = 8;

/// Magic level disabling indentation checks.
pub const NO_BLOCKS: i64 = -1;

/// Identity of a lexed item. Ordinary tokens carry the id allocated when
/// the grammar author created them; `Indent` and `End` are the structural
/// items of the indent-aware mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TokenTag {
    Tok(u32),
    Indent,
    End,
}

/// One lexed item: the tags of every token whose pattern matched (in
/// declaration order) plus the matched text and a substream over it.
#[derive(Clone, Debug)]
pub struct TokenItem {
    pub tags: Vec<TokenTag>,
    pub text: String,
    pub content: Stream,
}

impl TokenItem {
    pub fn has(&self, tag: TokenTag) -> bool {
        self.tags.contains(&tag)
    }
}

/// The compiled lexer: token union and discard DFAs plus the offside
/// settings, shared by every parse of the materialized matcher.
pub struct LexerSpec {
    tokens: Dfa<TokenTag>,
    discard: Dfa<()>,
    offside: Option<OffsideSpec>,
    describe: String,
}

struct OffsideSpec {
    indent: Dfa<()>,
    tabsize: usize,
}

impl fmt::Debug for LexerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LexerSpec({})", self.describe)
    }
}

#[bon]
impl LexerSpec {
    /// Compile the token set. `tokens` pairs each token id with its pattern
    /// source, in declaration order; earlier tokens win tie-breaks.
    #[builder]
    pub fn compile(
        #[builder(start_fn)] tokens: Vec<(u32, String)>,

        /// Matched and skipped wherever no token matches.
        #[builder(default = String::from(r"\s+"))]
        discard: String,

        /// Emit `INDENT`/`END` items around each line.
        #[builder(default = false)]
        offside: bool,

        /// Spaces per tab in `INDENT` items.
        #[builder(default = DEFAULT_TABSIZE)]
        tabsize: usize,

        alphabet: Option<Arc<dyn Alphabet>>,
    ) -> Result<LexerSpec, ParseError> {
        let alphabet: Arc<dyn Alphabet> = alphabet.unwrap_or_else(|| Arc::new(Unicode));
        let describe = tokens
            .iter()
            .map(|(id, pattern)| format!("{id}:{pattern}"))
            .join(" ");

        let mut union = NfaBuilder::new();
        for (id, pattern) in &tokens {
            let tree = Regexp::parse(pattern, &*alphabet)?;
            union.pattern(&tree, TokenTag::Tok(*id));
        }
        let tokens = union.build().determinize(&*alphabet);

        let discard = compile_dfa(&discard, &*alphabet)?;
        let offside = if offside {
            Some(OffsideSpec {
                indent: compile_dfa(r"[ \t]*", &*alphabet)?,
                tabsize,
            })
        } else {
            None
        };
        trace!("compiled lexer over {describe:?}");
        Ok(LexerSpec {
            tokens,
            discard,
            offside,
            describe,
        })
    }
}

fn compile_dfa(pattern: &str, alphabet: &dyn Alphabet) -> Result<Dfa<()>, ParseError> {
    let tree = Regexp::parse(pattern, alphabet)?;
    let mut builder = NfaBuilder::new();
    builder.pattern(&tree, ());
    Ok(builder.build().determinize(alphabet))
}

impl LexerSpec {
    pub fn is_offside(&self) -> bool {
        self.offside.is_some()
    }

    /// A lazy token stream over `base`.
    pub fn token_stream(self: &Arc<Self>, base: Stream) -> Stream {
        let machine = LexMachine::new(self.clone(), base.clone());
        Stream::from_tokens(Arc::new(TokenSource::new(
            base.shared().clone(),
            base.shared().fresh_id(),
            machine,
        )))
    }
}

enum LexState {
    /// Plain mode: tokens and discards from here.
    Simple { at: Stream },
    /// Offside mode: the next item is the `INDENT` of the line at `at`.
    LineStart { at: Stream },
    /// Offside mode: tokens within the current line, then `END`.
    InLine { line: Stream, after: Stream },
    Finished,
}

struct LexMachine {
    spec: Arc<LexerSpec>,
    state: LexState,
}

impl LexMachine {
    fn new(spec: Arc<LexerSpec>, base: Stream) -> Self {
        let state = if spec.is_offside() {
            LexState::LineStart { at: base }
        } else {
            LexState::Simple { at: base }
        };
        LexMachine { spec, state }
    }

    fn next_item(&mut self) -> Result<Option<TokenItem>, ParseError> {
        loop {
            match std::mem::replace(&mut self.state, LexState::Finished) {
                LexState::Finished => return Ok(None),
                LexState::Simple { at } => {
                    if at.is_empty()? {
                        return Ok(None);
                    }
                    match self.cycle(at)? {
                        (Some(item), at) => {
                            self.state = LexState::Simple { at };
                            return Ok(Some(item));
                        }
                        (None, at) => {
                            self.state = LexState::Simple { at };
                        }
                    }
                }
                LexState::LineStart { at } => {
                    let (line_text, after) = match at.line(false) {
                        Some(line) => line,
                        None => return Ok(None),
                    };
                    let line = at.substream(&line_text);
                    let spec = match &self.spec.offside {
                        Some(spec) => spec,
                        None => return Err(ParseError::internal("offside state without spec")),
                    };
                    let size = spec
                        .indent
                        .longest(codes_of(&line))
                        .map(|m| m.len)
                        .unwrap_or(0);
                    let (raw, line) = line
                        .next_str(size)
                        .unwrap_or_else(|| (String::new(), line.clone()));
                    let expanded = raw.replace('\t', &" ".repeat(spec.tabsize));
                    let item = TokenItem {
                        tags: vec![TokenTag::Indent],
                        content: at.substream(&expanded),
                        text: expanded,
                    };
                    self.state = LexState::InLine { line, after };
                    return Ok(Some(item));
                }
                LexState::InLine { line, after } => {
                    if line.is_empty()? {
                        let item = TokenItem {
                            tags: vec![TokenTag::End],
                            text: String::new(),
                            content: line.substream(""),
                        };
                        self.state = LexState::LineStart { at: after };
                        return Ok(Some(item));
                    }
                    match self.cycle(line)? {
                        (Some(item), line) => {
                            self.state = LexState::InLine { line, after };
                            return Ok(Some(item));
                        }
                        (None, line) => {
                            self.state = LexState::InLine { line, after };
                        }
                    }
                }
            }
        }
    }

    /// One emission cycle: a token item, or `None` after skipping a discard.
    fn cycle(&self, at: Stream) -> Result<(Option<TokenItem>, Stream), ParseError> {
        if let Some(found) = self.spec.tokens.longest(codes_of(&at)) {
            if found.len > 0 {
                let (text, next) = at
                    .next_str(found.len)
                    .ok_or_else(|| ParseError::internal("token match past end of stream"))?;
                let item = TokenItem {
                    tags: found.tags,
                    content: at.substream(&text),
                    text,
                };
                return Ok((Some(item), next));
            }
        }
        // the discard path only needs the size, not the text
        if let Some(skip) = self.spec.discard.longest(codes_of(&at)) {
            if skip.len > 0 {
                let (_, next) = at
                    .next_str(skip.len)
                    .ok_or_else(|| ParseError::internal("discard match past end of stream"))?;
                return Ok((None, next));
            }
        }
        at.shared()
            .note_failure(at.global_offset(), &self.spec.describe);
        Err(ParseError::Lex {
            location: at.location(),
            rest: at.rest(16),
        })
    }
}

fn codes_of(stream: &Stream) -> impl Iterator<Item = u32> + '_ {
    stream.codes().into_iter().flatten()
}

/// The lazily-extended item cache behind a token stream. All derived token
/// streams share one source, so items are lexed exactly once and keep a
/// stable identity for memo keys.
pub struct TokenSource {
    id: u64,
    shared: Arc<SharedInput>,
    inner: Mutex<TokenInner>,
}

struct TokenInner {
    items: Vec<TokenItem>,
    machine: Option<LexMachine>,
    /// Sticky lex failure: (location, rest).
    failed: Option<(String, String)>,
}

impl fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenSource({})", self.id)
    }
}

impl TokenSource {
    fn new(shared: Arc<SharedInput>, id: u64, machine: LexMachine) -> Self {
        TokenSource {
            id,
            shared,
            inner: Mutex::new(TokenInner {
                items: Vec::new(),
                machine: Some(machine),
                failed: None,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn shared(&self) -> &Arc<SharedInput> {
        &self.shared
    }

    /// The item at `index`, lexing forward as required. `None` marks the
    /// end of the input.
    pub fn get(&self, index: usize) -> Result<Option<TokenItem>, ParseError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| ParseError::internal("token source poisoned"))?;
        while inner.items.len() <= index {
            if let Some((location, rest)) = &inner.failed {
                return Err(ParseError::Lex {
                    location: location.clone(),
                    rest: rest.clone(),
                });
            }
            let item = match &mut inner.machine {
                None => return Ok(None),
                Some(machine) => machine.next_item(),
            };
            match item {
                Ok(Some(item)) => inner.items.push(item),
                Ok(None) => inner.machine = None,
                Err(ParseError::Lex { location, rest }) => {
                    inner.machine = None;
                    inner.failed = Some((location.clone(), rest.clone()));
                    return Err(ParseError::Lex { location, rest });
                }
                Err(other) => return Err(other),
            }
        }
        Ok(inner.items.get(index).cloned())
    }

    /// Global char offset of the item at `index`, without lexing further.
    pub fn global_offset(&self, index: usize) -> usize {
        let inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(_) => return 0,
        };
        if let Some(item) = inner.items.get(index) {
            item.content.global_offset()
        } else if let Some(last) = inner.items.last() {
            last.content.global_offset() + last.text.chars().count()
        } else {
            0
        }
    }

    /// Already-lexed upcoming items, for diagnostics only.
    pub fn describe_rest(&self, index: usize, n: usize) -> String {
        match self.inner.lock() {
            Ok(inner) => inner
                .items
                .iter()
                .skip(index)
                .take(n)
                .map(|item| item.text.as_str())
                .join(" "),
            Err(_) => String::new(),
        }
    }
}

/// Computes the required indent of a new block from the enclosing level and
/// the observed indent text.
#[derive(Clone)]
pub enum BlockPolicy {
    /// Increment the current level by a fixed number of spaces.
    Constant(usize),
    /// Accept whatever indent is observed.
    Rightmost,
    /// Accept only a strictly deeper indent, fail otherwise.
    ToRight,
    Custom(Arc<dyn Fn(i64, &str) -> Option<i64> + Send + Sync>),
}

impl BlockPolicy {
    /// `None` fails the block match.
    pub fn apply(&self, current: i64, observed: &str) -> Option<i64> {
        let observed_len = observed.chars().count() as i64;
        match self {
            BlockPolicy::Constant(n) => Some(current + *n as i64),
            BlockPolicy::Rightmost => Some(observed_len),
            BlockPolicy::ToRight => (observed_len > current).then_some(observed_len),
            BlockPolicy::Custom(policy) => policy(current, observed),
        }
    }
}

impl Default for BlockPolicy {
    fn default() -> Self {
        BlockPolicy::Constant(DEFAULT_TABSIZE)
    }
}

impl fmt::Debug for BlockPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockPolicy::Constant(n) => write!(f, "Constant({n})"),
            BlockPolicy::Rightmost => write!(f, "Rightmost"),
            BlockPolicy::ToRight => write!(f, "ToRight"),
            BlockPolicy::Custom(_) => write!(f, "Custom"),
        }
    }
}

impl PartialEq for BlockPolicy {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (BlockPolicy::Constant(a), BlockPolicy::Constant(b)) => a == b,
            (BlockPolicy::Rightmost, BlockPolicy::Rightmost) => true,
            (BlockPolicy::ToRight, BlockPolicy::ToRight) => true,
            (BlockPolicy::Custom(a), BlockPolicy::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Per-parse indent state threaded through indent-aware evaluation. A block
/// level is on the stack exactly while the block's lines evaluate.
#[derive(Debug)]
pub struct BlockMonitor {
    levels: Vec<i64>,
    /// Blocks currently matching, to short-circuit nested left-recursive
    /// calls at the same position.
    pub(crate) active: HashSet<(NodeId, StreamKey)>,
}

impl BlockMonitor {
    pub fn new(start: i64) -> Self {
        BlockMonitor {
            levels: vec![start],
            active: HashSet::new(),
        }
    }

    /// The current required indent, or [`NO_BLOCKS`] with no levels left.
    pub fn indent(&self) -> i64 {
        self.levels.last().copied().unwrap_or(NO_BLOCKS)
    }

    pub(crate) fn push_level(&mut self, level: i64) {
        trace!("block level -> {level}");
        self.levels.push(level);
    }

    pub(crate) fn pop_level(&mut self) {
        self.levels.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(tokens: &[(u32, &str)]) -> Arc<LexerSpec> {
        Arc::new(
            LexerSpec::compile(
                tokens
                    .iter()
                    .map(|&(id, pattern)| (id, pattern.to_owned()))
                    .collect(),
            )
            .call()
            .expect("lexer spec"),
        )
    }

    fn all_items(spec: &Arc<LexerSpec>, input: &str) -> Vec<TokenItem> {
        let stream = spec.token_stream(Stream::from_text(input));
        let mut out = Vec::new();
        let mut at = stream;
        while let Some((item, next)) = at.next_token().expect("lex") {
            out.push(item);
            at = next;
        }
        out
    }

    #[test]
    fn discard_skips_between_tokens() {
        let spec = spec(&[(0, "[a-z]+"), (1, ",")]);
        let items = all_items(&spec, " foo ,  bar ");
        let texts: Vec<_> = items.iter().map(|i| i.text.as_str()).collect();
        assert_eq!(texts, vec!["foo", ",", "bar"]);
    }

    #[test]
    fn longest_match_with_declaration_order_ties() {
        let spec = spec(&[(0, "[a-z]+"), (1, "if")]);
        let items = all_items(&spec, "if iffy");
        assert_eq!(items[0].tags, vec![TokenTag::Tok(0), TokenTag::Tok(1)]);
        assert_eq!(items[1].text, "iffy");
        assert_eq!(items[1].tags, vec![TokenTag::Tok(0)]);
    }

    #[test]
    fn lex_error_when_nothing_matches() {
        let spec = spec(&[(0, "[a-z]+")]);
        let stream = spec.token_stream(Stream::from_text("abc !"));
        let (_, at) = stream.next_token().expect("lex").expect("item");
        match at.next_token() {
            Err(ParseError::Lex { location, rest }) => {
                assert_eq!(location, "line 1, character 5");
                assert_eq!(rest, "!");
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn offside_mode_emits_indent_and_end() {
        let spec = Arc::new(
            LexerSpec::compile(vec![(0, "[a-z]+".to_owned())])
                .offside(true)
                .tabsize(4)
                .call()
                .expect("lexer spec"),
        );
        let items = all_items(&spec, "ab\n\tcd");
        let tags: Vec<_> = items.iter().map(|i| i.tags[0]).collect();
        assert_eq!(
            tags,
            vec![
                TokenTag::Indent,
                TokenTag::Tok(0),
                TokenTag::End,
                TokenTag::Indent,
                TokenTag::Tok(0),
                TokenTag::End,
            ]
        );
        // the second line's tab expands to the configured tabsize
        assert_eq!(items[3].text, "    ");
    }

    #[test]
    fn token_source_is_lazy_and_sticky_on_error() {
        let spec = spec(&[(0, "[a-z]+")]);
        let stream = spec.token_stream(Stream::from_text("ok !"));
        // first item lexes fine even though the input has an error later
        let (item, at) = stream.next_token().expect("lex").expect("item");
        assert_eq!(item.text, "ok");
        assert!(at.next_token().is_err());
        // and the failure repeats on every probe
        assert!(at.next_token().is_err());
        assert!(at.is_empty().is_err());
    }

    #[test]
    fn block_policies() {
        assert_eq!(BlockPolicy::Constant(4).apply(0, "  "), Some(4));
        assert_eq!(BlockPolicy::Rightmost.apply(0, "      "), Some(6));
        assert_eq!(BlockPolicy::ToRight.apply(4, "  "), None);
        assert_eq!(BlockPolicy::ToRight.apply(1, "    "), Some(4));
    }
}
