/*!
Parser materialization.

[`make_matcher`] applies the configured rewriters left to right, compiles
every pattern source, and returns a [`Matcher`] whose graph is immutable
and shared by all subsequent parses (each parse gets fresh monitors and
per-parse state). [`Parser`] bundles a grammar with a [`ConfigBuilder`]
and rebuilds the materialized matcher only when the configuration changed.
*/
use std::sync::Arc;

use crate::{
    config::{ConfigBuilder, Configuration, MonitorFactory},
    graph::Grammar,
    rewrite,
    stream::{Stream, StreamFactory},
    trampoline::{MatchResult, Trampoline},
    ParseError, Value,
};

/// Rewrite and compile `grammar` under `config`.
pub fn make_matcher(grammar: &Grammar, config: &Configuration) -> Result<Matcher, ParseError> {
    let mut rewritten = grammar.compact();
    for rewriter in &config.rewriters {
        rewritten = rewriter.apply(rewritten, &config.alphabet)?;
    }
    rewrite::materialize(&mut rewritten, &config.alphabet)?;
    Ok(Matcher {
        grammar: Arc::new(rewritten),
        monitors: config.monitors.clone(),
        stream_factory: config.stream_factory.clone(),
        block_start: config.block_start,
    })
}

/// [`make_matcher`], wrapped to return only the first result per input.
pub fn make_parser(
    grammar: &Grammar,
    config: &Configuration,
) -> Result<impl Fn(&str) -> Result<Option<Vec<Value>>, ParseError>, ParseError> {
    let matcher = make_matcher(grammar, config)?;
    Ok(move |input: &str| matcher.parse(input))
}

/// A materialized matcher: the rewritten, compiled grammar plus everything
/// needed to start parses against it.
pub struct Matcher {
    grammar: Arc<Grammar>,
    monitors: Vec<MonitorFactory>,
    stream_factory: Arc<dyn StreamFactory>,
    block_start: Option<i64>,
}

impl Matcher {
    pub fn grammar(&self) -> &Arc<Grammar> {
        &self.grammar
    }

    /// The lazy sequence of all results for `input`.
    pub fn matches(&self, input: &str) -> MatchIter {
        self.matches_stream(self.stream_factory.stream(input))
    }

    /// Like [`Matcher::matches`], against a pre-built stream.
    pub fn matches_stream(&self, stream: Stream) -> MatchIter {
        let monitors = self.monitors.iter().map(|factory| factory()).collect();
        match Trampoline::new(self.grammar.clone(), stream, monitors, self.block_start) {
            Ok(trampoline) => MatchIter(MatchState::Running(trampoline)),
            Err(error) => MatchIter(MatchState::Failed(Some(error))),
        }
    }

    /// The first result for `input`, or `None` without a full-match
    /// rewriter.
    pub fn parse(&self, input: &str) -> Result<Option<Vec<Value>>, ParseError> {
        match self.matches(input).next() {
            Some(Ok((results, _))) => Ok(Some(results)),
            Some(Err(error)) => Err(error),
            None => Ok(None),
        }
    }

    /// First result against a pre-built stream.
    pub fn parse_stream(&self, stream: Stream) -> Result<Option<Vec<Value>>, ParseError> {
        match self.matches_stream(stream).next() {
            Some(Ok((results, _))) => Ok(Some(results)),
            Some(Err(error)) => Err(error),
            None => Ok(None),
        }
    }
}

enum MatchState {
    Failed(Option<ParseError>),
    Running(Trampoline),
}

/// Iterator over all results of one parse. The first error ends the
/// sequence.
pub struct MatchIter(MatchState);

impl Iterator for MatchIter {
    type Item = Result<MatchResult, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.0 {
            MatchState::Failed(error) => error.take().map(Err),
            MatchState::Running(trampoline) => trampoline.next_match(),
        }
    }
}

/// A grammar with its configuration, rebuilding the materialized matcher
/// only when the configuration changed since the last parse.
pub struct Parser {
    grammar: Grammar,
    config: ConfigBuilder,
    cache: Option<Matcher>,
}

impl Parser {
    pub fn new(grammar: Grammar) -> Self {
        Parser {
            grammar,
            config: ConfigBuilder::new(),
            cache: None,
        }
    }

    pub fn config(&mut self) -> &mut ConfigBuilder {
        &mut self.config
    }

    pub fn matcher(&mut self) -> Result<&Matcher, ParseError> {
        if self.cache.is_none() || self.config.changed() {
            let configuration = self.config.configuration();
            self.cache = Some(make_matcher(&self.grammar, &configuration)?);
        }
        match &self.cache {
            Some(matcher) => Ok(matcher),
            None => Err(ParseError::internal("matcher cache miss")),
        }
    }

    pub fn parse(&mut self, input: &str) -> Result<Option<Vec<Value>>, ParseError> {
        self.matcher()?.parse(input)
    }

    pub fn matches(&mut self, input: &str) -> Result<MatchIter, ParseError> {
        Ok(self.matcher()?.matches(input))
    }
}
