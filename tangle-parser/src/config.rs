/*!
Configuration.

[`ConfigBuilder`] accumulates rewriters and monitor factories;
[`ConfigBuilder::configuration`] freezes them into a [`Configuration`]
value consumed by matcher materialization. Adding the same rewriter kind
twice keeps only the later registration. A `changed` flag lets a caller
reuse a previously materialized matcher when the configuration was read
but not modified in between.
*/
use std::sync::Arc;

use tangle_automata::alphabet::{Alphabet, Unicode};

use crate::{
    lexer::{BlockPolicy, DEFAULT_TABSIZE},
    rewrite::{RegexpKind, Rewriter, SetArguments},
    stream::{StreamFactory, TextStreamFactory},
    trampoline::{GeneratorManager, Monitor, TraceResults},
    ParseError,
};

pub type MonitorFactory = Arc<dyn Fn() -> Box<dyn Monitor> + Send + Sync>;

/// A frozen configuration: rewriters (applied left to right), per-parse
/// monitor factories, the stream factory and the alphabet.
#[derive(Clone)]
pub struct Configuration {
    pub(crate) rewriters: Vec<Rewriter>,
    pub(crate) monitors: Vec<MonitorFactory>,
    pub(crate) stream_factory: Arc<dyn StreamFactory>,
    pub(crate) alphabet: Arc<dyn Alphabet>,
    pub(crate) block_start: Option<i64>,
}

impl Configuration {
    pub fn rewriters(&self) -> &[Rewriter] {
        &self.rewriters
    }
}

pub struct ConfigBuilder {
    used: bool,
    changed: bool,
    rewriters: Vec<Rewriter>,
    monitors: Vec<MonitorFactory>,
    stream_factory: Arc<dyn StreamFactory>,
    alphabet: Option<Arc<dyn Alphabet>>,
    block_start: Option<i64>,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        ConfigBuilder {
            used: false,
            changed: true,
            rewriters: Vec::new(),
            monitors: Vec::new(),
            stream_factory: Arc::new(TextStreamFactory),
            alphabet: None,
            block_start: None,
        }
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the configuration was modified since it was last read.
    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn add_rewriter(&mut self, rewriter: Rewriter) -> &mut Self {
        self.used = true;
        self.changed = true;
        // last registration of a kind wins
        self.rewriters.retain(|known| !known.same_kind(&rewriter));
        self.rewriters.push(rewriter);
        self
    }

    pub fn add_monitor(&mut self, monitor: MonitorFactory) -> &mut Self {
        self.used = true;
        self.changed = true;
        self.monitors.push(monitor);
        self
    }

    pub fn stream_factory(&mut self, factory: Arc<dyn StreamFactory>) -> &mut Self {
        self.used = true;
        self.changed = true;
        self.stream_factory = factory;
        self
    }

    /// Set the alphabet. Conflicting with one already fixed (perhaps by a
    /// rewriter that read the default) is a configuration error.
    pub fn alphabet(&mut self, alphabet: Arc<dyn Alphabet>) -> Result<&mut Self, ParseError> {
        if let Some(known) = &self.alphabet {
            if !Arc::ptr_eq(known, &alphabet) {
                return Err(ParseError::configuration(
                    "alphabet has changed during configuration (perhaps the default was \
                     already used?)",
                ));
            }
        }
        self.used = true;
        self.changed = true;
        self.alphabet = Some(alphabet);
        Ok(self)
    }

    pub fn flatten(&mut self) -> &mut Self {
        self.add_rewriter(Rewriter::Flatten)
    }

    pub fn compose_transforms(&mut self) -> &mut Self {
        self.add_rewriter(Rewriter::ComposeTransforms)
    }

    pub fn optimize_or(&mut self, conservative: bool) -> &mut Self {
        self.add_rewriter(Rewriter::OptimizeOr { conservative })
    }

    pub fn auto_memoize(&mut self, conservative: bool, full: bool) -> &mut Self {
        self.add_rewriter(Rewriter::AutoMemoize { conservative, full })
    }

    /// Wrap every matcher in `LMemo`, regardless of recursion.
    pub fn left_memoize(&mut self) -> &mut Self {
        self.add_rewriter(Rewriter::Memoize { left: true })
    }

    /// Wrap every matcher in `RMemo`.
    pub fn right_memoize(&mut self) -> &mut Self {
        self.add_rewriter(Rewriter::Memoize { left: false })
    }

    pub fn compile_to_nfa(&mut self) -> &mut Self {
        self.add_rewriter(Rewriter::CompileRegexp {
            kind: RegexpKind::Nfa,
        })
    }

    pub fn compile_to_dfa(&mut self) -> &mut Self {
        self.add_rewriter(Rewriter::CompileRegexp {
            kind: RegexpKind::Dfa,
        })
    }

    /// Tokenize with the grammar's tokens, skipping `discard` (default
    /// whitespace) between them.
    pub fn lexer(&mut self, discard: Option<&str>) -> &mut Self {
        self.add_rewriter(Rewriter::AddLexer {
            discard: discard.map(str::to_owned),
            offside: false,
            tabsize: DEFAULT_TABSIZE,
        })
    }

    pub fn set_arguments(&mut self, arguments: SetArguments) -> &mut Self {
        self.add_rewriter(Rewriter::SetArguments(arguments))
    }

    pub fn full_match(&mut self, eos: bool) -> &mut Self {
        self.add_rewriter(Rewriter::FullMatch { eos })
    }

    pub fn direct_evaluation(&mut self) -> &mut Self {
        self.add_rewriter(Rewriter::DirectEvaluation)
    }

    pub fn trace(&mut self, enabled: bool) -> &mut Self {
        self.add_monitor(Arc::new(move || {
            Box::new(TraceResults::new(enabled)) as Box<dyn Monitor>
        }))
    }

    /// Cap live coroutines at `queue_len` (zero disables the cap).
    pub fn manage(&mut self, queue_len: usize) -> &mut Self {
        self.add_monitor(Arc::new(move || {
            Box::new(GeneratorManager::new(queue_len)) as Box<dyn Monitor>
        }))
    }

    /// Like [`ConfigBuilder::manage`], with an iteration budget acting as
    /// a timeout.
    pub fn manage_with_budget(&mut self, queue_len: usize, max_epochs: u64) -> &mut Self {
        self.add_monitor(Arc::new(move || {
            Box::new(GeneratorManager::with_epoch_budget(queue_len, max_epochs))
                as Box<dyn Monitor>
        }))
    }

    /// Line- and indent-aware parsing. Giving either `block_policy` or
    /// `block_start` enables offside-rule blocks.
    pub fn line_aware(
        &mut self,
        tabsize: Option<usize>,
        block_policy: Option<BlockPolicy>,
        block_start: Option<i64>,
        discard: Option<&str>,
    ) -> &mut Self {
        self.clear();
        let use_blocks = block_policy.is_some() || block_start.is_some();
        if use_blocks {
            self.block_start = Some(block_start.unwrap_or(0));
            self.set_arguments(SetArguments::BlockPolicy(
                block_policy.unwrap_or_default(),
            ));
        }
        self.add_rewriter(Rewriter::AddLexer {
            discard: discard.map(str::to_owned),
            offside: true,
            tabsize: tabsize.unwrap_or(DEFAULT_TABSIZE),
        })
    }

    /// [`ConfigBuilder::line_aware`] plus the standard rewriters.
    pub fn default_line_aware(
        &mut self,
        tabsize: Option<usize>,
        block_policy: Option<BlockPolicy>,
        block_start: Option<i64>,
        discard: Option<&str>,
    ) -> &mut Self {
        self.line_aware(tabsize, block_policy, block_start, discard);
        self.flatten();
        self.compose_transforms();
        self.optimize_or(true);
        self.auto_memoize(true, false)
    }

    pub fn clear(&mut self) -> &mut Self {
        self.used = true;
        self.changed = true;
        self.rewriters.clear();
        self.monitors.clear();
        self.stream_factory = Arc::new(TextStreamFactory);
        self.alphabet = None;
        self.block_start = None;
        self
    }

    /// The standard configuration.
    pub fn default_config(&mut self) -> &mut Self {
        self.clear();
        self.flatten();
        self.compose_transforms();
        self.lexer(None);
        self.auto_memoize(false, false);
        self.trace(false)
    }

    /// Freeze. An untouched builder freezes the standard configuration.
    pub fn configuration(&mut self) -> Configuration {
        if !self.used {
            self.default_config();
        }
        self.changed = false;
        Configuration {
            rewriters: self.rewriters.clone(),
            monitors: self.monitors.clone(),
            stream_factory: self.stream_factory.clone(),
            alphabet: self
                .alphabet
                .get_or_insert_with(|| Arc::new(Unicode))
                .clone(),
            block_start: self.block_start,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untouched_builder_freezes_the_default() {
        let mut builder = ConfigBuilder::new();
        let config = builder.configuration();
        assert!(config
            .rewriters()
            .iter()
            .any(|r| matches!(r, Rewriter::Flatten)));
        assert!(config
            .rewriters()
            .iter()
            .any(|r| matches!(r, Rewriter::AutoMemoize { .. })));
    }

    #[test]
    fn last_registration_of_a_kind_wins() {
        let mut builder = ConfigBuilder::new();
        builder.optimize_or(true).optimize_or(false);
        let config = builder.configuration();
        let optimizers: Vec<_> = config
            .rewriters()
            .iter()
            .filter(|r| matches!(r, Rewriter::OptimizeOr { .. }))
            .collect();
        assert_eq!(optimizers.len(), 1);
        assert_eq!(
            optimizers[0],
            &Rewriter::OptimizeOr {
                conservative: false
            }
        );
    }

    #[test]
    fn changed_flag_resets_on_read() {
        let mut builder = ConfigBuilder::new();
        builder.flatten();
        assert!(builder.changed());
        let _ = builder.configuration();
        assert!(!builder.changed());
        builder.full_match(true);
        assert!(builder.changed());
    }

    #[test]
    fn alphabet_conflict_is_an_error() {
        let mut builder = ConfigBuilder::new();
        let unicode: Arc<dyn Alphabet> = Arc::new(Unicode);
        builder.alphabet(unicode.clone()).expect("first set");
        assert!(builder.alphabet(unicode).is_ok());
        let other: Arc<dyn Alphabet> = Arc::new(Unicode);
        assert!(builder.alphabet(other).is_err());
    }

    #[test]
    fn line_aware_with_blocks_sets_block_start() {
        let mut builder = ConfigBuilder::new();
        builder.line_aware(Some(4), Some(BlockPolicy::Constant(4)), None, None);
        let config = builder.configuration();
        assert_eq!(config.block_start, Some(0));
        assert!(config
            .rewriters()
            .iter()
            .any(|r| matches!(r, Rewriter::AddLexer { offside: true, .. })));
    }
}
