/*!
Immutable input cursors.

A [`Stream`] is a cheap handle: a shared source plus an offset. Advancing
never mutates, it returns a new handle. Two source kinds exist: plain text
and the token items produced lazily by the lexer. Every advance records the
furthest *global* offset reached on a marker shared by the whole input, which
is what full-match diagnostics report after a failed parse.
*/
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use crate::lexer::{TokenItem, TokenSource};

/// Memo identity of a position: (source id, offset within the source).
pub type StreamKey = (u64, usize);

/// State shared by every stream derived from one input: the original text,
/// the furthest-position marker and the id allocator.
#[derive(Debug)]
pub struct SharedInput {
    root: String,
    max: AtomicUsize,
    next_id: AtomicU64,
    /// Deepest pattern failure seen so far: (global offset, pattern source).
    deepest: Mutex<Option<(usize, String)>>,
}

impl SharedInput {
    fn new(root: String) -> Arc<Self> {
        Arc::new(SharedInput {
            root,
            max: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            deepest: Mutex::new(None),
        })
    }

    pub(crate) fn fresh_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn note_offset(&self, global: usize) {
        self.max.fetch_max(global, Ordering::Relaxed);
    }

    /// Record a pattern that failed at `global`; the deepest one becomes the
    /// "expected" hint of a full-match error.
    pub(crate) fn note_failure(&self, global: usize, pattern: &str) {
        if let Ok(mut deepest) = self.deepest.lock() {
            match &*deepest {
                Some((at, _)) if *at > global => {}
                _ => *deepest = Some((global, pattern.to_owned())),
            }
        }
    }

    pub fn furthest(&self) -> usize {
        self.max.load(Ordering::Relaxed)
    }

    pub(crate) fn expected_hint(&self) -> Option<String> {
        let deepest = self.deepest.lock().ok()?;
        match &*deepest {
            Some((at, pattern)) if *at >= self.furthest() => Some(pattern.clone()),
            _ => None,
        }
    }

    /// Human-readable location of a global char offset.
    pub fn locate(&self, global: usize) -> String {
        let mut line = 1;
        let mut column = 1;
        for (i, c) in self.root.chars().enumerate() {
            if i >= global {
                break;
            }
            if c == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
        format!("line {line}, character {column}")
    }

    /// Up to `n` chars of the original input from a global offset.
    pub fn snippet(&self, global: usize, n: usize) -> String {
        self.root.chars().skip(global).take(n).collect()
    }
}

#[derive(Debug)]
struct TextSource {
    id: u64,
    chars: Vec<char>,
    /// Char offset of this text within the root input, best effort for
    /// substreams whose text was rewritten (tab expansion).
    base: usize,
    shared: Arc<SharedInput>,
}

#[derive(Clone)]
enum Source {
    Text(Arc<TextSource>),
    Tokens(Arc<TokenSource>),
}

/// An immutable position over the input.
#[derive(Clone)]
pub struct Stream {
    source: Source,
    offset: usize,
}

impl Stream {
    /// The root stream over a plain text input.
    pub fn from_text(input: &str) -> Stream {
        let shared = SharedInput::new(input.to_owned());
        Stream {
            source: Source::Text(Arc::new(TextSource {
                id: 0,
                chars: input.chars().collect(),
                base: 0,
                shared,
            })),
            offset: 0,
        }
    }

    pub(crate) fn from_tokens(source: Arc<TokenSource>) -> Stream {
        Stream {
            source: Source::Tokens(source),
            offset: 0,
        }
    }

    pub fn shared(&self) -> &Arc<SharedInput> {
        match &self.source {
            Source::Text(text) => &text.shared,
            Source::Tokens(tokens) => tokens.shared(),
        }
    }

    /// Position identity for memo keys.
    pub fn key(&self) -> StreamKey {
        (self.id(), self.offset)
    }

    pub fn id(&self) -> u64 {
        match &self.source {
            Source::Text(text) => text.id,
            Source::Tokens(tokens) => tokens.id(),
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Global char offset of this position within the root input.
    pub fn global_offset(&self) -> usize {
        match &self.source {
            Source::Text(text) => text.base + self.offset,
            Source::Tokens(tokens) => tokens.global_offset(self.offset),
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self.source, Source::Text(_))
    }

    /// Emptiness. Probing a token stream may run the lexer, which can fail.
    pub fn is_empty(&self) -> Result<bool, crate::ParseError> {
        match &self.source {
            Source::Text(text) => Ok(self.offset >= text.chars.len()),
            Source::Tokens(tokens) => Ok(tokens.get(self.offset)?.is_none()),
        }
    }

    fn advanced(&self, by: usize) -> Stream {
        let next = Stream {
            source: self.source.clone(),
            offset: self.offset + by,
        };
        self.shared().note_offset(next.global_offset());
        next
    }

    /// One char and the advanced stream (text sources only).
    pub fn next_char(&self) -> Option<(char, Stream)> {
        match &self.source {
            Source::Text(text) => {
                let c = *text.chars.get(self.offset)?;
                Some((c, self.advanced(1)))
            }
            Source::Tokens(_) => None,
        }
    }

    /// The next `n` chars and the advanced stream, or `None` when fewer
    /// remain.
    pub fn next_str(&self, n: usize) -> Option<(String, Stream)> {
        match &self.source {
            Source::Text(text) => {
                let end = self.offset.checked_add(n)?;
                if end > text.chars.len() {
                    return None;
                }
                let chunk: String = text.chars[self.offset..end].iter().collect();
                Some((chunk, self.advanced(n)))
            }
            Source::Tokens(_) => None,
        }
    }

    /// Advance past a literal if the stream starts with it.
    pub fn take_literal(&self, literal: &str) -> Option<Stream> {
        match &self.source {
            Source::Text(text) => {
                let mut at = self.offset;
                for c in literal.chars() {
                    if text.chars.get(at) != Some(&c) {
                        return None;
                    }
                    at += 1;
                }
                Some(self.advanced(at - self.offset))
            }
            Source::Tokens(_) => None,
        }
    }

    /// The next token item and the advanced stream (token sources only).
    pub fn next_token(&self) -> Result<Option<(TokenItem, Stream)>, crate::ParseError> {
        match &self.source {
            Source::Text(_) => Ok(None),
            Source::Tokens(tokens) => match tokens.get(self.offset)? {
                Some(item) => Ok(Some((item, self.advanced(1)))),
                None => Ok(None),
            },
        }
    }

    /// The current line and the stream past its terminator. `include_eol`
    /// keeps the terminator in the returned text; the next stream always
    /// starts on the following line.
    pub fn line(&self, include_eol: bool) -> Option<(String, Stream)> {
        match &self.source {
            Source::Text(text) => {
                if self.offset >= text.chars.len() {
                    return None;
                }
                let rest = &text.chars[self.offset..];
                let nl = rest.iter().position(|&c| c == '\n');
                let (text_end, next) = match nl {
                    Some(nl) if include_eol => (nl + 1, nl + 1),
                    Some(nl) => (nl, nl + 1),
                    None => (rest.len(), rest.len()),
                };
                let line: String = rest[..text_end].iter().collect();
                Some((line, self.advanced(next)))
            }
            Source::Tokens(_) => None,
        }
    }

    /// Remaining codes of a text stream, for the automata.
    pub fn codes(&self) -> Option<impl Iterator<Item = u32> + '_> {
        match &self.source {
            Source::Text(text) => {
                Some(text.chars[self.offset.min(text.chars.len())..]
                    .iter()
                    .map(|&c| c as u32))
            }
            Source::Tokens(_) => None,
        }
    }

    /// Remaining text, for diagnostics.
    pub fn rest(&self, n: usize) -> String {
        match &self.source {
            Source::Text(text) => text.chars[self.offset.min(text.chars.len())..]
                .iter()
                .take(n)
                .collect(),
            Source::Tokens(tokens) => tokens.describe_rest(self.offset, n),
        }
    }

    /// A derived text stream over `text`, anchored at this position for
    /// diagnostics.
    pub fn substream(&self, text: &str) -> Stream {
        let shared = self.shared().clone();
        Stream {
            source: Source::Text(Arc::new(TextSource {
                id: shared.fresh_id(),
                chars: text.chars().collect(),
                base: self.global_offset(),
                shared,
            })),
            offset: 0,
        }
    }

    /// Format a diagnostic template. `{location}`, `{rest}` and `{text}`
    /// are substituted.
    pub fn fmt(&self, template: &str) -> String {
        template
            .replace("{location}", &self.location())
            .replace("{rest}", &format!("{:?}", self.rest(16)))
            .replace("{text}", &self.shared().snippet(0, 32))
    }

    pub fn location(&self) -> String {
        self.shared().locate(self.global_offset())
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stream({}:{})", self.id(), self.offset)
    }
}

/// Builds the initial stream for a parse. Only plain text inputs are in
/// scope; richer input adapters sit outside the engine.
pub trait StreamFactory: fmt::Debug + Send + Sync {
    fn stream(&self, input: &str) -> Stream;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TextStreamFactory;

impl StreamFactory for TextStreamFactory {
    fn stream(&self, input: &str) -> Stream {
        Stream::from_text(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advancing_is_immutable() {
        let s = Stream::from_text("abc");
        let (c, next) = s.next_char().expect("char");
        assert_eq!(c, 'a');
        assert_eq!(s.offset(), 0);
        assert_eq!(next.offset(), 1);
        assert_eq!(s.key().0, next.key().0);
    }

    #[test]
    fn lines_with_and_without_eol() {
        let s = Stream::from_text("ab\ncd");
        let (line, next) = s.line(false).expect("line");
        assert_eq!(line, "ab");
        let (line2, _) = next.line(true).expect("line");
        assert_eq!(line2, "cd");
        let (line, _) = s.line(true).expect("line");
        assert_eq!(line, "ab\n");
    }

    #[test]
    fn max_marker_tracks_furthest_path() {
        let s = Stream::from_text("abcdef");
        let (_, a) = s.next_str(2).expect("chunk");
        let _ = a.next_str(3);
        // a shorter, separate advance must not move the marker back
        let _ = s.next_char();
        assert_eq!(s.shared().furthest(), 5);
    }

    #[test]
    fn substreams_have_fresh_identity() {
        let s = Stream::from_text("hello world");
        let (_, at) = s.next_str(6).expect("chunk");
        let sub = at.substream("world");
        assert_ne!(sub.key().0, at.key().0);
        assert_eq!(sub.global_offset(), 6);
        assert_eq!(sub.rest(5), "world");
    }

    #[test]
    fn locations_are_line_and_character() {
        let s = Stream::from_text("ab\ncd");
        let (_, at) = s.next_str(4).expect("chunk");
        assert_eq!(at.location(), "line 2, character 2");
        assert_eq!(s.fmt("at {location}"), "at line 1, character 1");
    }
}
