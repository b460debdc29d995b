/*!
The cooperative driver.

Matchers evaluate as coroutine state machines held in a per-parse arena and
addressed by [`GenId`]; a parent keeps its child's id and calls it again for
further results, which is all backtracking is. The driver keeps a stack of
ids, resumes the top, and routes each [`Step`]:

- `Call(child)` pushes the child and pulls it;
- `Yield(results, stream)` pops the yielder and sends the pair into the new
  top, or hands it to the outer consumer when the stack has emptied;
- `Done` pops and throws exhaustion into the new top so it can try its next
  alternative;
- an error closes the stacked coroutines in order and surfaces.

Monitors observe every one of those transitions and may request
cancellation or eviction of live coroutines.
*/
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{debug, warn};

use crate::{
    graph::{Grammar, NodeId},
    lexer::BlockMonitor,
    matchers::{
        self,
        memo::{LMemoEntry, MemoKey, RMemoEntry},
        Value,
    },
    stream::Stream,
    ParseError,
};

pub type GenId = usize;

/// One parse result: the value list and the stream after the match.
pub type MatchResult = (Vec<Value>, Stream);

/// What a coroutine is resumed with.
#[derive(Debug)]
pub enum Reply {
    /// Produce your next result.
    Pull,
    /// The child you called yielded this pair.
    Value(Vec<Value>, Stream),
    /// The child you called is exhausted.
    Exhausted,
}

/// What a coroutine hands back to the driver.
pub enum Step {
    /// Evaluate this coroutine and send me its next result.
    Call(GenId),
    /// A result pair for my caller.
    Yield(Vec<Value>, Stream),
    /// My result sequence is exhausted.
    Done,
}

pub(crate) trait Coroutine: Send {
    fn name(&self) -> &'static str;

    fn resume(&mut self, ctx: &mut Context, reply: Reply) -> Result<Step, ParseError>;

    /// Called when the driver discards this coroutine before exhaustion
    /// (error unwind, cancellation, eviction).
    fn close(&mut self, _ctx: &mut Context) {}
}

enum Slot {
    Live(Box<dyn Coroutine>),
    /// Temporarily taken out for resumption.
    Busy,
    Closed,
}

/// Per-parse state: the coroutine arena, the memo caches and the block
/// monitor. Dropped when the last result has been drained.
pub struct Context {
    grammar: Arc<Grammar>,
    slots: Vec<Slot>,
    names: Vec<&'static str>,
    pub(crate) lmemo: HashMap<MemoKey, LMemoEntry>,
    pub(crate) rmemo: HashMap<MemoKey, RMemoEntry>,
    /// Every curtailed replay, in order. Lets a memo driver tell whether a
    /// pass depended on someone else's still-growing entry.
    pub(crate) curtailments: Vec<MemoKey>,
    pub(crate) block: Option<BlockMonitor>,
}

impl Context {
    pub(crate) fn new(grammar: Arc<Grammar>, block_start: Option<i64>) -> Self {
        Context {
            grammar,
            slots: Vec::new(),
            names: Vec::new(),
            lmemo: HashMap::new(),
            rmemo: HashMap::new(),
            curtailments: Vec::new(),
            block: block_start.map(BlockMonitor::new),
        }
    }

    /// Memo identity of a matcher at a position. The current block level
    /// is part of the key: the same matcher at the same position can
    /// legitimately differ across indent contexts.
    pub(crate) fn memo_key(&self, node: NodeId, stream: &Stream) -> MemoKey {
        let level = self.block.as_ref().map(|block| block.indent());
        (node, stream.key(), level.unwrap_or(i64::MIN))
    }

    /// Create the coroutine for `node` at `stream`.
    pub(crate) fn spawn(&mut self, node: NodeId, stream: Stream) -> Result<GenId, ParseError> {
        let grammar = self.grammar.clone();
        Ok(self.adopt(matchers::build(&grammar, node, stream)?))
    }

    /// Register an already-built coroutine in the arena.
    pub(crate) fn adopt(&mut self, gen: Box<dyn Coroutine>) -> GenId {
        self.names.push(gen.name());
        self.slots.push(Slot::Live(gen));
        self.slots.len() - 1
    }

    pub(crate) fn name(&self, gen: GenId) -> &'static str {
        self.names.get(gen).copied().unwrap_or("?")
    }

    fn take(&mut self, gen: GenId) -> Option<Box<dyn Coroutine>> {
        match std::mem::replace(&mut self.slots[gen], Slot::Busy) {
            Slot::Live(state) => Some(state),
            other => {
                self.slots[gen] = other;
                None
            }
        }
    }

    fn restore(&mut self, gen: GenId, state: Box<dyn Coroutine>) {
        self.slots[gen] = Slot::Live(state);
    }

    /// Drop a coroutine, giving it a chance to release block levels and
    /// other parse state.
    pub(crate) fn close_slot(&mut self, gen: GenId) {
        match std::mem::replace(&mut self.slots[gen], Slot::Closed) {
            Slot::Live(mut state) => state.close(self),
            Slot::Busy | Slot::Closed => {}
        }
    }
}

/// Observer hooks mirroring every driver transition, in invocation order.
/// All hooks default to no-ops; [`Monitor::commands`] is polled once per
/// iteration and may redirect control.
pub trait Monitor: Send {
    fn next_iteration(&mut self, _epoch: u64, _depth: usize) {}
    fn push(&mut self, _gen: GenId, _name: &str) {}
    fn pop(&mut self, _gen: GenId) {}
    fn before_next(&mut self, _gen: GenId) {}
    fn after_next(&mut self, _gen: GenId) {}
    fn before_send(&mut self, _gen: GenId, _value: &MatchResult) {}
    fn after_send(&mut self, _gen: GenId) {}
    fn before_throw(&mut self, _gen: GenId) {}
    fn after_throw(&mut self, _gen: GenId) {}
    fn exception(&mut self, _error: &ParseError) {}
    fn yield_(&mut self, _value: &MatchResult) {}
    fn raise_(&mut self, _error: &ParseError) {}
    fn commands(&mut self) -> MonitorCommands {
        MonitorCommands::default()
    }
}

/// Control requests from an active monitor.
#[derive(Debug, Default)]
pub struct MonitorCommands {
    /// Close the current top coroutine on this iteration.
    pub cancel_top: bool,
    /// Close these live coroutines (ignored for any currently stacked).
    pub evict: Vec<GenId>,
    /// Abort the whole parse.
    pub abort: Option<String>,
}

/// The driver. One instance per parse; repeated [`Trampoline::next_match`]
/// calls restart the root coroutine chain, which is how backtracking
/// between results works.
pub struct Trampoline {
    ctx: Context,
    monitors: Vec<Box<dyn Monitor>>,
    stack: Vec<GenId>,
    root_gen: GenId,
    epoch: u64,
    finished: bool,
}

impl Trampoline {
    pub(crate) fn new(
        grammar: Arc<Grammar>,
        stream: Stream,
        monitors: Vec<Box<dyn Monitor>>,
        block_start: Option<i64>,
    ) -> Result<Self, ParseError> {
        let mut ctx = Context::new(grammar.clone(), block_start);
        let root_gen = ctx.spawn(grammar.root(), stream)?;
        Ok(Trampoline {
            ctx,
            monitors,
            stack: Vec::new(),
            root_gen,
            epoch: 0,
            finished: false,
        })
    }

    pub fn next_match(&mut self) -> Option<Result<MatchResult, ParseError>> {
        if self.finished {
            return None;
        }
        if self.stack.is_empty() {
            self.stack.push(self.root_gen);
            let name = self.ctx.name(self.root_gen);
            for monitor in &mut self.monitors {
                monitor.push(self.root_gen, name);
            }
        }
        let mut reply = Reply::Pull;
        loop {
            self.epoch += 1;
            let depth = self.stack.len();
            for monitor in &mut self.monitors {
                monitor.next_iteration(self.epoch, depth);
            }

            let mut cancel_top = false;
            for monitor in &mut self.monitors {
                let commands = monitor.commands();
                cancel_top |= commands.cancel_top;
                for gen in commands.evict {
                    if gen != self.root_gen && !self.stack.contains(&gen) {
                        self.ctx.close_slot(gen);
                    }
                }
                if let Some(reason) = commands.abort {
                    let error = ParseError::Cancelled(reason);
                    return Some(Err(self.fail(error)));
                }
            }

            let top = match self.stack.last() {
                Some(&top) => top,
                None => {
                    self.finished = true;
                    return None;
                }
            };

            if cancel_top {
                debug!("cancelling {}", self.ctx.name(top));
                self.ctx.close_slot(top);
            }

            let step = match self.ctx.take(top) {
                None => Ok(Step::Done),
                Some(mut state) => {
                    if !self.monitors.is_empty() {
                        match &reply {
                            Reply::Pull => {
                                self.monitors.iter_mut().for_each(|m| m.before_next(top))
                            }
                            Reply::Value(results, stream) => {
                                let value = (results.clone(), stream.clone());
                                self.monitors
                                    .iter_mut()
                                    .for_each(|m| m.before_send(top, &value));
                            }
                            Reply::Exhausted => {
                                self.monitors.iter_mut().for_each(|m| m.before_throw(top))
                            }
                        }
                    }
                    let after: fn(&mut dyn Monitor, GenId) = match &reply {
                        Reply::Pull => |m, g| m.after_next(g),
                        Reply::Value(..) => |m, g| m.after_send(g),
                        Reply::Exhausted => |m, g| m.after_throw(g),
                    };
                    let step = state.resume(&mut self.ctx, std::mem::replace(&mut reply, Reply::Pull));
                    self.ctx.restore(top, state);
                    self.monitors.iter_mut().for_each(|m| after(&mut **m, top));
                    step
                }
            };

            match step {
                Ok(Step::Call(child)) => {
                    let name = self.ctx.name(child);
                    for monitor in &mut self.monitors {
                        monitor.push(child, name);
                    }
                    self.stack.push(child);
                    reply = Reply::Pull;
                }
                Ok(Step::Yield(results, stream)) => {
                    self.stack.pop();
                    for monitor in &mut self.monitors {
                        monitor.pop(top);
                    }
                    if self.stack.is_empty() {
                        let value = (results, stream);
                        for monitor in &mut self.monitors {
                            monitor.yield_(&value);
                        }
                        return Some(Ok(value));
                    }
                    reply = Reply::Value(results, stream);
                }
                Ok(Step::Done) => {
                    self.stack.pop();
                    for monitor in &mut self.monitors {
                        monitor.pop(top);
                    }
                    self.ctx.close_slot(top);
                    if self.stack.is_empty() {
                        self.finished = true;
                        return None;
                    }
                    reply = Reply::Exhausted;
                }
                Err(error) => {
                    warn!("coroutine failed at epoch {}: {error}", self.epoch);
                    for monitor in &mut self.monitors {
                        monitor.exception(&error);
                    }
                    return Some(Err(self.fail(error)));
                }
            }
        }
    }

    /// Unwind the stack, closing every frame, and finish the parse.
    fn fail(&mut self, error: ParseError) -> ParseError {
        while let Some(gen) = self.stack.pop() {
            for monitor in &mut self.monitors {
                monitor.pop(gen);
            }
            self.ctx.close_slot(gen);
        }
        for monitor in &mut self.monitors {
            monitor.raise_(&error);
        }
        self.finished = true;
        error
    }
}

/// Logs every driver transition when enabled. Inert otherwise, so it can
/// sit in the default configuration.
#[derive(Debug, Default)]
pub struct TraceResults {
    enabled: bool,
}

impl TraceResults {
    pub fn new(enabled: bool) -> Self {
        TraceResults { enabled }
    }
}

impl Monitor for TraceResults {
    fn push(&mut self, gen: GenId, name: &str) {
        if self.enabled {
            debug!("push {gen} ({name})");
        }
    }

    fn pop(&mut self, gen: GenId) {
        if self.enabled {
            debug!("pop {gen}");
        }
    }

    fn yield_(&mut self, value: &MatchResult) {
        if self.enabled {
            debug!("yield {:?} at {:?}", value.0, value.1);
        }
    }

    fn raise_(&mut self, error: &ParseError) {
        if self.enabled {
            debug!("raise {error}");
        }
    }
}

/// Caps the number of live coroutines (evicting least-recently-suspended
/// ones) and optionally bounds the iteration count, which is the engine's
/// timeout mechanism.
#[derive(Debug, Default)]
pub struct GeneratorManager {
    /// Zero disables the cap.
    queue_len: usize,
    max_epochs: Option<u64>,
    /// Suspended coroutines, least recently suspended first.
    suspended: VecDeque<GenId>,
    over_budget: bool,
}

impl GeneratorManager {
    pub fn new(queue_len: usize) -> Self {
        GeneratorManager {
            queue_len,
            ..Self::default()
        }
    }

    pub fn with_epoch_budget(queue_len: usize, max_epochs: u64) -> Self {
        GeneratorManager {
            queue_len,
            max_epochs: Some(max_epochs),
            ..Self::default()
        }
    }
}

impl Monitor for GeneratorManager {
    fn next_iteration(&mut self, epoch: u64, _depth: usize) {
        if let Some(max) = self.max_epochs {
            if epoch > max {
                self.over_budget = true;
            }
        }
    }

    fn push(&mut self, gen: GenId, _name: &str) {
        self.suspended.retain(|&g| g != gen);
    }

    fn pop(&mut self, gen: GenId) {
        self.suspended.retain(|&g| g != gen);
        self.suspended.push_back(gen);
    }

    fn commands(&mut self) -> MonitorCommands {
        let mut commands = MonitorCommands::default();
        if self.over_budget {
            commands.abort = Some("iteration budget exhausted".to_owned());
            return commands;
        }
        if self.queue_len > 0 {
            while self.suspended.len() > self.queue_len {
                match self.suspended.pop_front() {
                    Some(gen) => commands.evict.push(gen),
                    None => break,
                }
            }
        }
        commands
    }
}
