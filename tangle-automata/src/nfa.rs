/*!
Thompson construction and NFA simulation.

Every [`Regexp`] node compiles to a sub-automaton with a single entry and a
single exit, linked by ε edges; state ids are dense integers handed out by
the builder. Several patterns can share one automaton (the lexer compiles
its whole token set into one), each with its own terminal tag; tags keep
their registration order so that earlier-declared patterns win tie-breaks.
*/
use crate::{alphabet::Alphabet, interval::Character, syntax::Regexp};

pub type StateId = usize;

#[derive(Clone, Debug)]
pub(crate) struct State<T> {
    /// Outgoing edges in priority order; a `None` label is an ε edge.
    pub(crate) edges: Vec<(Option<Character>, StateId)>,
    /// Terminal tags with their registration sequence number.
    pub(crate) terminals: Vec<(u32, T)>,
}

impl<T> State<T> {
    fn new() -> Self {
        State {
            edges: Vec::new(),
            terminals: Vec::new(),
        }
    }
}

/// A match found by [`Nfa::match_all`]: the consumed code count plus the
/// tags of every pattern accepting at that length, in declaration order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NfaMatch<T> {
    pub tags: Vec<T>,
    pub len: usize,
}

/// A non-deterministic finite automaton over [`Character`] labels.
#[derive(Clone, Debug)]
pub struct Nfa<T> {
    pub(crate) states: Vec<State<T>>,
    pub(crate) start: StateId,
}

/// Builds an [`Nfa`] from one or more tagged patterns.
#[derive(Debug)]
pub struct NfaBuilder<T> {
    states: Vec<State<T>>,
    start: StateId,
    next_seq: u32,
}

impl<T: Clone> Default for NfaBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> NfaBuilder<T> {
    pub fn new() -> Self {
        NfaBuilder {
            states: vec![State::new()],
            start: 0,
            next_seq: 0,
        }
    }

    /// Add a pattern accepting with `tag`. Patterns added earlier keep
    /// priority on ties.
    pub fn pattern(&mut self, regexp: &Regexp, tag: T) {
        let (entry, exit) = self.compile(regexp);
        self.eps(self.start, entry);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.states[exit].terminals.push((seq, tag));
    }

    pub fn build(self) -> Nfa<T> {
        Nfa {
            states: self.states,
            start: self.start,
        }
    }

    fn add_state(&mut self) -> StateId {
        self.states.push(State::new());
        self.states.len() - 1
    }

    fn eps(&mut self, from: StateId, to: StateId) {
        self.states[from].edges.push((None, to));
    }

    fn edge(&mut self, from: StateId, label: Character, to: StateId) {
        self.states[from].edges.push((Some(label), to));
    }

    fn compile(&mut self, regexp: &Regexp) -> (StateId, StateId) {
        match regexp {
            Regexp::Empty => {
                let entry = self.add_state();
                let exit = self.add_state();
                self.eps(entry, exit);
                (entry, exit)
            }
            Regexp::Class(character) => {
                let entry = self.add_state();
                let exit = self.add_state();
                self.edge(entry, character.clone(), exit);
                (entry, exit)
            }
            Regexp::Sequence(items) => {
                let entry = self.add_state();
                let mut at = entry;
                for item in items {
                    let (ie, ix) = self.compile(item);
                    self.eps(at, ie);
                    at = ix;
                }
                (entry, at)
            }
            Regexp::Choice(items) => {
                let entry = self.add_state();
                let exit = self.add_state();
                for item in items {
                    let (ie, ix) = self.compile(item);
                    self.eps(entry, ie);
                    self.eps(ix, exit);
                }
                (entry, exit)
            }
            Regexp::Repeat {
                node,
                min,
                max,
                greedy,
            } => self.compile_repeat(node, *min, *max, *greedy),
        }
    }

    fn compile_repeat(
        &mut self,
        node: &Regexp,
        min: u32,
        max: Option<u32>,
        greedy: bool,
    ) -> (StateId, StateId) {
        let exit = self.add_state();
        // the optional tail, innermost-first
        let tail = match max {
            None => {
                // unbounded loop with entry-or-exit choice
                let loop_entry = self.add_state();
                let (ie, ix) = self.compile(node);
                if greedy {
                    self.eps(loop_entry, ie);
                    self.eps(loop_entry, exit);
                } else {
                    self.eps(loop_entry, exit);
                    self.eps(loop_entry, ie);
                }
                self.eps(ix, loop_entry);
                loop_entry
            }
            Some(max) => {
                let mut next = exit;
                for _ in min..max {
                    let opt = self.add_state();
                    let (ie, ix) = self.compile(node);
                    self.eps(ix, next);
                    if greedy {
                        self.eps(opt, ie);
                        self.eps(opt, exit);
                    } else {
                        self.eps(opt, exit);
                        self.eps(opt, ie);
                    }
                    next = opt;
                }
                next
            }
        };
        // the required prefix
        let entry = self.add_state();
        let mut at = entry;
        for _ in 0..min {
            let (ie, ix) = self.compile(node);
            self.eps(at, ie);
            at = ix;
        }
        self.eps(at, tail);
        (entry, exit)
    }
}

impl<T: Clone> Nfa<T> {
    /// Compile a single pattern with a unit-like tag.
    pub fn single(regexp: &Regexp, tag: T) -> Nfa<T> {
        let mut builder = NfaBuilder::new();
        builder.pattern(regexp, tag);
        builder.build()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub(crate) fn edges_of(&self, state: StateId) -> &[(Option<Character>, StateId)] {
        &self.states[state].edges
    }

    pub(crate) fn tags_of(&self, set: &[StateId]) -> Vec<T> {
        let mut tags: Vec<(u32, T)> = Vec::new();
        for &s in set {
            tags.extend(self.states[s].terminals.iter().cloned());
        }
        tags.sort_by_key(|&(seq, _)| seq);
        tags.dedup_by_key(|&mut (seq, _)| seq);
        tags.into_iter().map(|(_, tag)| tag).collect()
    }

    /// All distinct match lengths from the start of `input`, longest first.
    ///
    /// An empty result means no match at all; a legal empty match appears as
    /// a `len == 0` entry.
    pub fn match_all(&self, mut input: impl Iterator<Item = u32>) -> Vec<NfaMatch<T>> {
        let mut current = vec![self.start];
        closure_of(self, &mut current);
        let mut out = Vec::new();
        let mut len = 0;
        loop {
            let tags = self.tags_of(&current);
            if !tags.is_empty() {
                out.push(NfaMatch { tags, len });
            }
            let code = match input.next() {
                Some(code) => code,
                None => break,
            };
            let mut next = Vec::new();
            for &s in &current {
                for &(ref label, to) in &self.states[s].edges {
                    if let Some(character) = label {
                        if character.contains(code) && !next.contains(&to) {
                            next.push(to);
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            closure_of(self, &mut next);
            current = next;
            len += 1;
        }
        out.reverse();
        out
    }

    /// The longest match only.
    pub fn longest(&self, input: impl Iterator<Item = u32>) -> Option<NfaMatch<T>> {
        self.match_all(input).into_iter().next()
    }
}

pub(crate) fn closure_of<T>(nfa: &Nfa<T>, set: &mut Vec<StateId>) {
    let mut seen = vec![false; nfa.states.len()];
    for &s in set.iter() {
        seen[s] = true;
    }
    let mut at = 0;
    while at < set.len() {
        let s = set[at];
        at += 1;
        for &(ref label, to) in &nfa.states[s].edges {
            if label.is_none() && !seen[to] {
                seen[to] = true;
                set.push(to);
            }
        }
    }
    set.sort_unstable();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{alphabet::Unicode, syntax::Regexp};

    fn codes(text: &str) -> impl Iterator<Item = u32> + '_ {
        text.chars().map(|c| c as u32)
    }

    fn nfa(source: &str) -> Nfa<usize> {
        Nfa::single(&Regexp::parse(source, &Unicode).expect("pattern"), 0)
    }

    #[test]
    fn longest_first_enumeration() {
        let n = nfa("a*");
        let lens: Vec<_> = n.match_all(codes("aaab")).iter().map(|m| m.len).collect();
        assert_eq!(lens, vec![3, 2, 1, 0]);
    }

    #[test]
    fn no_match_is_distinct_from_empty_match() {
        let n = nfa("ab");
        assert!(n.match_all(codes("ba")).is_empty());
        let n = nfa("a?");
        assert_eq!(n.longest(codes("b")).map(|m| m.len), Some(0));
    }

    #[test]
    fn bounded_repetition() {
        let n = nfa("a{2,3}");
        let lens: Vec<_> = n.match_all(codes("aaaaa")).iter().map(|m| m.len).collect();
        assert_eq!(lens, vec![3, 2]);
        assert!(n.match_all(codes("a")).is_empty());
    }

    #[test]
    fn alternation_and_classes() {
        let n = nfa("ab|[a-c]x");
        assert_eq!(n.longest(codes("cx!")).map(|m| m.len), Some(2));
        assert_eq!(n.longest(codes("ab")).map(|m| m.len), Some(2));
    }

    #[test]
    fn tie_tags_in_declaration_order() {
        let tree_a = Regexp::parse("[ab]+", &Unicode).expect("pattern");
        let tree_b = Regexp::parse("ab", &Unicode).expect("pattern");
        let mut builder = NfaBuilder::new();
        builder.pattern(&tree_a, "word");
        builder.pattern(&tree_b, "ab");
        let n = builder.build();
        let m = n.longest(codes("ab")).expect("match");
        assert_eq!(m.len, 2);
        assert_eq!(m.tags, vec!["word", "ab"]);
    }

    #[test]
    fn reluctant_flag_does_not_change_the_match_set() {
        let greedy = nfa("a+");
        let lazy = nfa("a+?");
        let a: Vec<_> = greedy.match_all(codes("aaa")).iter().map(|m| m.len).collect();
        let b: Vec<_> = lazy.match_all(codes("aaa")).iter().map(|m| m.len).collect();
        assert_eq!(a, b);
    }
}
