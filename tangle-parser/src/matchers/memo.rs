/*!
Memoizing wrappers.

Both caches key on `(matcher identity, stream position, block level)` and
live in the parse context, so they are discarded when the last result is
drained.

`LMemo` is the left-recursion-safe variant. The first call at a key
installs a curtailed entry with an empty result list and drives the
wrapped matcher; recursive calls at the same key see the curtailed flag
and replay only the results cached so far. Whenever a full pass over the
wrapped matcher added results, it is restarted with the enlarged seed,
until a pass adds nothing. Results are deduplicated by value and ending
position, so growth is monotone over a finite space and the fixpoint
terminates.

A pass that consulted someone *else's* still-curtailed entry saw an
incomplete seed, so its own result set cannot be trusted as complete:
such an entry is dropped when its driver finishes, and the matcher is
recomputed on the next call (the enclosing fixpoint is what makes that
recomputation converge). The curtailment log in the context is how a
driver knows.

`RMemo` is straight caching: replay the cached prefix, then pump the
single live wrapped coroutine for unexplored suffixes.

Errors pass through both wrappers without being cached.
*/
use crate::{
    graph::NodeId,
    stream::{Stream, StreamKey},
    trampoline::{Context, Coroutine, GenId, MatchResult, Reply, Step},
    ParseError,
};

/// (matcher identity, position, block level or `i64::MIN`).
pub(crate) type MemoKey = (NodeId, StreamKey, i64);

#[derive(Debug, Default)]
pub(crate) struct LMemoEntry {
    /// True while the outer driver at this key is still running, which is
    /// exactly when recursive calls must be curtailed.
    pub curtailed: bool,
    pub results: Vec<MatchResult>,
}

#[derive(Debug, Default)]
pub(crate) struct RMemoEntry {
    pub results: Vec<MatchResult>,
    pub gen: Option<GenId>,
    pub exhausted: bool,
    /// Guards against re-entrant pumping of the shared coroutine.
    pub pumping: bool,
}

enum LMemoState {
    Start,
    /// Replay cached results up to the snapshot taken at call time.
    Replay { at: usize, cap: usize },
    /// Outer driver: pumping the wrapped coroutine.
    Driving { gen: GenId, added: bool },
    Finished,
}

pub(crate) struct LMemoGen {
    node: NodeId,
    child: NodeId,
    stream: Stream,
    state: LMemoState,
    /// Curtailment-log watermark for the current pass.
    log_start: usize,
}

impl LMemoGen {
    pub(crate) fn new(node: NodeId, child: NodeId, stream: Stream) -> Self {
        LMemoGen {
            node,
            child,
            stream,
            state: LMemoState::Start,
            log_start: 0,
        }
    }

    fn replay(&mut self, ctx: &mut Context) -> Result<Step, ParseError> {
        let key = ctx.memo_key(self.node, &self.stream);
        if let LMemoState::Replay { at, cap } = &mut self.state {
            if at < cap {
                if let Some(entry) = ctx.lmemo.get(&key) {
                    if let Some((results, stream)) = entry.results.get(*at) {
                        let step = Step::Yield(results.clone(), stream.clone());
                        *at += 1;
                        return Ok(step);
                    }
                }
            }
        }
        self.state = LMemoState::Finished;
        Ok(Step::Done)
    }

    /// Did this pass depend on a foreign entry that was still growing?
    fn tainted(&self, ctx: &Context, key: &MemoKey) -> bool {
        ctx.curtailments[self.log_start.min(ctx.curtailments.len())..]
            .iter()
            .any(|seen| seen != key)
    }
}

impl Coroutine for LMemoGen {
    fn name(&self) -> &'static str {
        "LMemo"
    }

    fn resume(&mut self, ctx: &mut Context, reply: Reply) -> Result<Step, ParseError> {
        let key = ctx.memo_key(self.node, &self.stream);
        match (&mut self.state, reply) {
            (LMemoState::Finished, _) => Ok(Step::Done),
            (LMemoState::Start, _) => match ctx.lmemo.get(&key) {
                Some(entry) => {
                    if entry.curtailed {
                        ctx.curtailments.push(key);
                    }
                    // replay the snapshot: everything cached right now
                    self.state = LMemoState::Replay {
                        at: 0,
                        cap: entry.results.len(),
                    };
                    self.replay(ctx)
                }
                None => {
                    ctx.lmemo.insert(
                        key,
                        LMemoEntry {
                            curtailed: true,
                            results: Vec::new(),
                        },
                    );
                    self.log_start = ctx.curtailments.len();
                    let gen = ctx.spawn(self.child, self.stream.clone())?;
                    self.state = LMemoState::Driving { gen, added: false };
                    Ok(Step::Call(gen))
                }
            },
            (LMemoState::Replay { .. }, _) => self.replay(ctx),
            (LMemoState::Driving { gen, .. }, Reply::Pull) => Ok(Step::Call(*gen)),
            (LMemoState::Driving { gen, added }, Reply::Value(results, stream)) => {
                let gen = *gen;
                let entry = ctx
                    .lmemo
                    .get_mut(&key)
                    .ok_or_else(|| ParseError::internal("lost memo entry"))?;
                let seen = entry
                    .results
                    .iter()
                    .any(|(r, s)| r == &results && s.key() == stream.key());
                if seen {
                    Ok(Step::Call(gen))
                } else {
                    entry.results.push((results.clone(), stream.clone()));
                    *added = true;
                    Ok(Step::Yield(results, stream))
                }
            }
            (LMemoState::Driving { added, .. }, Reply::Exhausted) => {
                if *added {
                    // the seed grew: run another pass over the child
                    self.log_start = ctx.curtailments.len();
                    let gen = ctx.spawn(self.child, self.stream.clone())?;
                    self.state = LMemoState::Driving { gen, added: false };
                    Ok(Step::Call(gen))
                } else {
                    if self.tainted(ctx, &key) {
                        // computed against an incomplete seed; recompute on
                        // the next call instead of caching
                        ctx.lmemo.remove(&key);
                    } else if let Some(entry) = ctx.lmemo.get_mut(&key) {
                        entry.curtailed = false;
                    }
                    self.state = LMemoState::Finished;
                    Ok(Step::Done)
                }
            }
        }
    }

    fn close(&mut self, ctx: &mut Context) {
        // an abandoned driver must not leave a curtailed entry behind
        if let LMemoState::Driving { .. } = self.state {
            let key = ctx.memo_key(self.node, &self.stream);
            ctx.lmemo.remove(&key);
        }
    }
}

pub(crate) struct RMemoGen {
    node: NodeId,
    child: NodeId,
    stream: Stream,
    at: usize,
}

impl RMemoGen {
    pub(crate) fn new(node: NodeId, child: NodeId, stream: Stream) -> Self {
        RMemoGen {
            node,
            child,
            stream,
            at: 0,
        }
    }
}

impl Coroutine for RMemoGen {
    fn name(&self) -> &'static str {
        "RMemo"
    }

    fn resume(&mut self, ctx: &mut Context, reply: Reply) -> Result<Step, ParseError> {
        let key = ctx.memo_key(self.node, &self.stream);
        match reply {
            Reply::Pull => {
                let needs_gen = match ctx.rmemo.get(&key) {
                    None => true,
                    Some(entry) => entry.gen.is_none() && !entry.exhausted,
                };
                if needs_gen {
                    let gen = ctx.spawn(self.child, self.stream.clone())?;
                    let entry = ctx.rmemo.entry(key).or_default();
                    entry.gen = Some(gen);
                }
                let entry = ctx
                    .rmemo
                    .get_mut(&key)
                    .ok_or_else(|| ParseError::internal("lost memo entry"))?;
                if let Some((results, stream)) = entry.results.get(self.at) {
                    let step = Step::Yield(results.clone(), stream.clone());
                    self.at += 1;
                    return Ok(step);
                }
                if entry.exhausted || entry.pumping {
                    // a live coroutine already being pumped higher up the
                    // stack cannot be shared; curtail
                    return Ok(Step::Done);
                }
                match entry.gen {
                    Some(gen) => {
                        entry.pumping = true;
                        Ok(Step::Call(gen))
                    }
                    None => Ok(Step::Done),
                }
            }
            Reply::Value(results, stream) => {
                let entry = ctx
                    .rmemo
                    .get_mut(&key)
                    .ok_or_else(|| ParseError::internal("lost memo entry"))?;
                entry.pumping = false;
                entry.results.push((results.clone(), stream.clone()));
                self.at = entry.results.len();
                Ok(Step::Yield(results, stream))
            }
            Reply::Exhausted => {
                if let Some(entry) = ctx.rmemo.get_mut(&key) {
                    entry.pumping = false;
                    entry.exhausted = true;
                }
                Ok(Step::Done)
            }
        }
    }
}
