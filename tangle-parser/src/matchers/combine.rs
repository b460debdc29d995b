/*!
Combinators: sequence, alternatives, lookahead and repetition.

`And` evaluates strictly left to right, backtracking a child at a time.
`Or` tries alternatives in declaration order. `Repeat` enumerates counts
depth-first: greedy yields longest-first, reluctant shortest-first.
*/
use crate::{
    graph::NodeId,
    stream::Stream,
    trampoline::{Context, Coroutine, GenId, Reply, Step},
    ParseError, Value,
};

pub(crate) struct AndGen {
    children: Vec<NodeId>,
    stream: Stream,
    /// One frame per started child: its coroutine and the results
    /// accumulated before it.
    frames: Vec<(GenId, Vec<Value>)>,
    started: bool,
    emitted_empty: bool,
}

impl AndGen {
    pub(crate) fn new(children: Vec<NodeId>, stream: Stream) -> Self {
        AndGen {
            children,
            stream,
            frames: Vec::new(),
            started: false,
            emitted_empty: false,
        }
    }
}

impl Coroutine for AndGen {
    fn name(&self) -> &'static str {
        "And"
    }

    fn resume(&mut self, ctx: &mut Context, reply: Reply) -> Result<Step, ParseError> {
        match reply {
            Reply::Pull => {
                if !self.started {
                    self.started = true;
                    if self.children.is_empty() {
                        self.emitted_empty = true;
                        return Ok(Step::Yield(Vec::new(), self.stream.clone()));
                    }
                    let gen = ctx.spawn(self.children[0], self.stream.clone())?;
                    self.frames.push((gen, Vec::new()));
                    return Ok(Step::Call(gen));
                }
                if self.emitted_empty {
                    return Ok(Step::Done);
                }
                match self.frames.last() {
                    Some(&(gen, _)) => Ok(Step::Call(gen)),
                    None => Ok(Step::Done),
                }
            }
            Reply::Value(results, stream) => {
                let acc = match self.frames.last() {
                    Some((_, acc)) => {
                        let mut acc = acc.clone();
                        acc.extend(results);
                        acc
                    }
                    None => results,
                };
                if self.frames.len() == self.children.len() {
                    Ok(Step::Yield(acc, stream))
                } else {
                    let gen = ctx.spawn(self.children[self.frames.len()], stream)?;
                    self.frames.push((gen, acc));
                    Ok(Step::Call(gen))
                }
            }
            Reply::Exhausted => {
                self.frames.pop();
                match self.frames.last() {
                    Some(&(gen, _)) => Ok(Step::Call(gen)),
                    None => Ok(Step::Done),
                }
            }
        }
    }
}

pub(crate) struct OrGen {
    children: Vec<NodeId>,
    stream: Stream,
    at: usize,
    gen: Option<GenId>,
}

impl OrGen {
    pub(crate) fn new(children: Vec<NodeId>, stream: Stream) -> Self {
        OrGen {
            children,
            stream,
            at: 0,
            gen: None,
        }
    }

    fn advance(&mut self, ctx: &mut Context) -> Result<Step, ParseError> {
        match self.children.get(self.at) {
            Some(&child) => {
                let gen = ctx.spawn(child, self.stream.clone())?;
                self.gen = Some(gen);
                Ok(Step::Call(gen))
            }
            None => Ok(Step::Done),
        }
    }
}

impl Coroutine for OrGen {
    fn name(&self) -> &'static str {
        "Or"
    }

    fn resume(&mut self, ctx: &mut Context, reply: Reply) -> Result<Step, ParseError> {
        match reply {
            Reply::Pull => match self.gen {
                Some(gen) => Ok(Step::Call(gen)),
                None => self.advance(ctx),
            },
            Reply::Value(results, stream) => Ok(Step::Yield(results, stream)),
            Reply::Exhausted => {
                self.gen = None;
                self.at += 1;
                self.advance(ctx)
            }
        }
    }
}

/// Succeeds (once, consuming nothing, with an empty result list) when its
/// child matches; negated, when it does not.
pub(crate) struct LookaheadGen {
    child: NodeId,
    negated: bool,
    stream: Stream,
    fired: bool,
}

impl LookaheadGen {
    pub(crate) fn new(child: NodeId, negated: bool, stream: Stream) -> Self {
        LookaheadGen {
            child,
            negated,
            stream,
            fired: false,
        }
    }
}

impl Coroutine for LookaheadGen {
    fn name(&self) -> &'static str {
        "Lookahead"
    }

    fn resume(&mut self, ctx: &mut Context, reply: Reply) -> Result<Step, ParseError> {
        match reply {
            Reply::Pull => {
                if self.fired {
                    return Ok(Step::Done);
                }
                self.fired = true;
                let gen = ctx.spawn(self.child, self.stream.clone())?;
                Ok(Step::Call(gen))
            }
            Reply::Value(..) => {
                if self.negated {
                    Ok(Step::Done)
                } else {
                    Ok(Step::Yield(Vec::new(), self.stream.clone()))
                }
            }
            Reply::Exhausted => {
                if self.negated {
                    Ok(Step::Yield(Vec::new(), self.stream.clone()))
                } else {
                    Ok(Step::Done)
                }
            }
        }
    }
}

struct RepFrame {
    /// Stream entering the frame, before any separator.
    entry: Stream,
    /// Results accumulated before this frame.
    acc: Vec<Value>,
    sep_gen: Option<GenId>,
    /// `acc` extended with the current separator alternative's results.
    acc_sep: Vec<Value>,
    child_gen: Option<GenId>,
    /// Current child alternative: full results and the stream after.
    completed: Option<(Vec<Value>, Stream)>,
    emitted: bool,
}

enum RepPhase {
    Idle,
    AwaitSep,
    AwaitChild,
    AfterYield,
    AfterEmpty,
    Finished,
}

pub(crate) struct RepeatGen {
    child: NodeId,
    min: u32,
    max: Option<u32>,
    separator: Option<NodeId>,
    greedy: bool,
    base: Stream,
    frames: Vec<RepFrame>,
    phase: RepPhase,
    emitted_empty: bool,
}

impl RepeatGen {
    pub(crate) fn new(
        child: NodeId,
        min: u32,
        max: Option<u32>,
        separator: Option<NodeId>,
        greedy: bool,
        base: Stream,
    ) -> Self {
        RepeatGen {
            child,
            min,
            max,
            separator,
            greedy,
            base,
            frames: Vec::new(),
            phase: RepPhase::Idle,
            emitted_empty: false,
        }
    }

    fn can_extend(&self, count: usize, after: &Stream) -> bool {
        if let Some(max) = self.max {
            if count as u32 >= max {
                return false;
            }
        }
        // an unbounded repeat must not grow on a consumption-free match
        if self.max.is_none() {
            if let Some(frame) = self.frames.last() {
                if after.key() == frame.entry.key() {
                    return false;
                }
            }
        }
        true
    }

    /// Open the next frame at `entry` with `acc` results before it.
    fn push_frame(
        &mut self,
        ctx: &mut Context,
        acc: Vec<Value>,
        entry: Stream,
    ) -> Result<Step, ParseError> {
        let needs_sep = !self.frames.is_empty() && self.separator.is_some();
        if needs_sep {
            let separator = match self.separator {
                Some(separator) => separator,
                None => return Err(ParseError::internal("separator frame without separator")),
            };
            let sep_gen = ctx.spawn(separator, entry.clone())?;
            self.frames.push(RepFrame {
                entry,
                acc,
                sep_gen: Some(sep_gen),
                acc_sep: Vec::new(),
                child_gen: None,
                completed: None,
                emitted: false,
            });
            self.phase = RepPhase::AwaitSep;
            Ok(Step::Call(sep_gen))
        } else {
            let child_gen = ctx.spawn(self.child, entry.clone())?;
            self.frames.push(RepFrame {
                entry,
                acc_sep: acc.clone(),
                acc,
                sep_gen: None,
                child_gen: Some(child_gen),
                completed: None,
                emitted: false,
            });
            self.phase = RepPhase::AwaitChild;
            Ok(Step::Call(child_gen))
        }
    }

    /// The current frame is exhausted; fall back to the one below.
    fn backtrack(&mut self, ctx: &mut Context) -> Result<Step, ParseError> {
        self.frames.pop();
        let count = self.frames.len();
        match self.frames.last_mut() {
            None => {
                if self.min == 0 && !self.emitted_empty {
                    self.emitted_empty = true;
                    self.phase = RepPhase::AfterEmpty;
                    return Ok(Step::Yield(Vec::new(), self.base.clone()));
                }
                self.phase = RepPhase::Finished;
                Ok(Step::Done)
            }
            Some(frame) => {
                // greedy emits a count only after its extensions are spent
                if self.greedy && !frame.emitted && frame.completed.is_some() {
                    if count as u32 >= self.min {
                        frame.emitted = true;
                        let (results, stream) = match &frame.completed {
                            Some(completed) => completed.clone(),
                            None => return Err(ParseError::internal("missing repeat result")),
                        };
                        self.phase = RepPhase::AfterYield;
                        return Ok(Step::Yield(results, stream));
                    }
                }
                self.next_alternative(ctx)
            }
        }
    }

    /// Ask the current frame's child for its next alternative.
    fn next_alternative(&mut self, _ctx: &mut Context) -> Result<Step, ParseError> {
        match self.frames.last().and_then(|frame| frame.child_gen) {
            Some(child_gen) => {
                self.phase = RepPhase::AwaitChild;
                Ok(Step::Call(child_gen))
            }
            None => Err(ParseError::internal("repeat frame without child")),
        }
    }
}

impl Coroutine for RepeatGen {
    fn name(&self) -> &'static str {
        "Repeat"
    }

    fn resume(&mut self, ctx: &mut Context, reply: Reply) -> Result<Step, ParseError> {
        match (&self.phase, reply) {
            (RepPhase::Finished, _) => Ok(Step::Done),
            (RepPhase::Idle, _) => {
                if self.max == Some(0) || (!self.greedy && self.min == 0) {
                    if self.min == 0 {
                        self.emitted_empty = true;
                        self.phase = if self.max == Some(0) {
                            RepPhase::Finished
                        } else {
                            RepPhase::AfterEmpty
                        };
                        return Ok(Step::Yield(Vec::new(), self.base.clone()));
                    }
                    self.phase = RepPhase::Finished;
                    return Ok(Step::Done);
                }
                self.push_frame(ctx, Vec::new(), self.base.clone())
            }
            (RepPhase::AfterEmpty, _) => {
                // reluctant: the empty match came first, now grow
                if !self.greedy && self.frames.is_empty() && self.max != Some(0) {
                    return self.push_frame(ctx, Vec::new(), self.base.clone());
                }
                self.phase = RepPhase::Finished;
                Ok(Step::Done)
            }
            (RepPhase::AwaitSep, Reply::Value(results, stream)) => {
                let child = self.child;
                let child_gen = ctx.spawn(child, stream)?;
                let frame = match self.frames.last_mut() {
                    Some(frame) => frame,
                    None => return Err(ParseError::internal("separator without frame")),
                };
                let mut acc_sep = frame.acc.clone();
                acc_sep.extend(results);
                frame.acc_sep = acc_sep;
                frame.child_gen = Some(child_gen);
                frame.completed = None;
                self.phase = RepPhase::AwaitChild;
                Ok(Step::Call(child_gen))
            }
            (RepPhase::AwaitSep, Reply::Exhausted) => self.backtrack(ctx),
            (RepPhase::AwaitSep, Reply::Pull) => match self.frames.last().and_then(|f| f.sep_gen)
            {
                Some(sep_gen) => Ok(Step::Call(sep_gen)),
                None => Err(ParseError::internal("separator frame without separator")),
            },
            (RepPhase::AwaitChild, Reply::Value(results, stream)) => {
                let count = self.frames.len();
                let completed = {
                    let frame = match self.frames.last_mut() {
                        Some(frame) => frame,
                        None => return Err(ParseError::internal("child without frame")),
                    };
                    let mut full = frame.acc_sep.clone();
                    full.extend(results);
                    frame.completed = Some((full.clone(), stream.clone()));
                    frame.emitted = false;
                    (full, stream)
                };
                let extendable = self.can_extend(count, &completed.1);
                if self.greedy {
                    if extendable {
                        self.push_frame(ctx, completed.0, completed.1)
                    } else if count as u32 >= self.min {
                        if let Some(frame) = self.frames.last_mut() {
                            frame.emitted = true;
                        }
                        self.phase = RepPhase::AfterYield;
                        Ok(Step::Yield(completed.0, completed.1))
                    } else {
                        self.next_alternative(ctx)
                    }
                } else if count as u32 >= self.min {
                    if let Some(frame) = self.frames.last_mut() {
                        frame.emitted = true;
                    }
                    self.phase = RepPhase::AfterYield;
                    Ok(Step::Yield(completed.0, completed.1))
                } else if extendable {
                    self.push_frame(ctx, completed.0, completed.1)
                } else {
                    self.next_alternative(ctx)
                }
            }
            (RepPhase::AwaitChild, Reply::Exhausted) => {
                // try the next separator alternative before giving up
                let sep_gen = self.frames.last().and_then(|frame| frame.sep_gen);
                match sep_gen {
                    Some(sep_gen) => {
                        self.phase = RepPhase::AwaitSep;
                        Ok(Step::Call(sep_gen))
                    }
                    None => self.backtrack(ctx),
                }
            }
            (RepPhase::AwaitChild, Reply::Pull) => self.next_alternative(ctx),
            (RepPhase::AfterYield, _) => {
                let count = self.frames.len();
                if self.greedy {
                    // extensions were exhausted before the yield
                    self.next_alternative(ctx)
                } else {
                    let completed = self.frames.last().and_then(|f| f.completed.clone());
                    match completed {
                        Some((results, stream)) if self.can_extend(count, &stream) => {
                            self.push_frame(ctx, results, stream)
                        }
                        _ => self.next_alternative(ctx),
                    }
                }
            }
        }
    }
}
