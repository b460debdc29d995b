/*!
Subset construction and DFA execution.

The label partition of each subset is computed with
[`TaggedFragments`](crate::interval::TaggedFragments), tagging every
interval fragment with the NFA states it leads to; the resulting DFA has no
ε edges and no two overlapping outgoing intervals. Terminal tags keep their
declaration order on tied subsets.

A DFA does not backtrack: execution is a single longest-match pass.
*/
use std::collections::HashMap;

use itertools::Itertools;
use log::trace;

use crate::{
    alphabet::Alphabet,
    interval::{IntervalMap, TaggedFragments},
    nfa::{closure_of, Nfa, NfaMatch, StateId},
};

#[derive(Clone, Debug)]
struct DfaState<T> {
    transitions: IntervalMap<StateId>,
    /// Tags of the accepting NFA states in this subset, declaration order.
    terminals: Vec<T>,
}

/// A deterministic finite automaton produced by [`Nfa::determinize`].
#[derive(Clone, Debug)]
pub struct Dfa<T> {
    states: Vec<DfaState<T>>,
    start: StateId,
}

impl<T: Clone> Nfa<T> {
    /// Subset construction.
    pub fn determinize(&self, alphabet: &dyn Alphabet) -> Dfa<T> {
        let mut start = vec![self.start];
        closure_of(self, &mut start);

        let mut subsets: HashMap<Vec<StateId>, StateId> = HashMap::new();
        let mut pending = vec![start.clone()];
        let mut states: Vec<DfaState<T>> = Vec::new();
        subsets.insert(start, 0);
        states.push(DfaState {
            transitions: IntervalMap::new(),
            terminals: Vec::new(),
        });

        while let Some(subset) = pending.pop() {
            let id = subsets[&subset];

            // partition the outgoing labels of the whole subset
            let mut fragments = TaggedFragments::new();
            for &s in &subset {
                for (label, to) in self.edges_of(s) {
                    if let Some(character) = label {
                        fragments.append(character, *to, alphabet);
                    }
                }
            }

            let mut transitions = IntervalMap::new();
            for &(interval, ref targets) in fragments.iter() {
                let mut target: Vec<StateId> =
                    targets.iter().copied().sorted_unstable().dedup().collect();
                closure_of(self, &mut target);
                let next = match subsets.get(&target) {
                    Some(&next) => next,
                    None => {
                        let next = states.len();
                        states.push(DfaState {
                            transitions: IntervalMap::new(),
                            terminals: Vec::new(),
                        });
                        subsets.insert(target.clone(), next);
                        pending.push(target);
                        next
                    }
                };
                transitions.insert(interval, next);
            }
            states[id].transitions = transitions;
            states[id].terminals = self.tags_of(&subset);
        }

        trace!(
            "determinized {} nfa states into {} dfa states",
            self.len(),
            states.len()
        );
        Dfa { states, start: 0 }
    }
}

impl<T: Clone> Dfa<T> {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// The longest match from the start of `input`, or `None` when nothing
    /// matches (an empty match is `Some` with `len == 0`).
    pub fn longest(&self, input: impl Iterator<Item = u32>) -> Option<NfaMatch<T>> {
        let mut state = self.start;
        let mut len = 0;
        let mut last: Option<NfaMatch<T>> = self.accept_at(state, len);
        for code in input {
            match self.states[state].transitions.get(code) {
                Some(&next) => {
                    state = next;
                    len += 1;
                    if let Some(found) = self.accept_at(state, len) {
                        last = Some(found);
                    }
                }
                None => break,
            }
        }
        last
    }

    fn accept_at(&self, state: StateId, len: usize) -> Option<NfaMatch<T>> {
        let terminals = &self.states[state].terminals;
        if terminals.is_empty() {
            None
        } else {
            Some(NfaMatch {
                tags: terminals.clone(),
                len,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{alphabet::Unicode, nfa::NfaBuilder, syntax::Regexp};

    fn codes(text: &str) -> impl Iterator<Item = u32> + '_ {
        text.chars().map(|c| c as u32)
    }

    fn dfa(source: &str) -> Dfa<usize> {
        Nfa::single(&Regexp::parse(source, &Unicode).expect("pattern"), 0)
            .determinize(&Unicode)
    }

    #[test]
    fn longest_match_only() {
        let d = dfa("a+");
        assert_eq!(d.longest(codes("aaab")).map(|m| m.len), Some(3));
        assert_eq!(d.longest(codes("b")), None);
    }

    #[test]
    fn empty_match_is_not_failure() {
        let d = dfa("a*");
        assert_eq!(d.longest(codes("b")).map(|m| m.len), Some(0));
    }

    #[test]
    fn agrees_with_nfa_on_longest() {
        for source in ["a(b|c)*d?", "[a-m]+x", "(ab)+"] {
            let tree = Regexp::parse(source, &Unicode).expect("pattern");
            let n = Nfa::single(&tree, 0);
            let d = n.determinize(&Unicode);
            for input in ["abccbd", "abcx", "ababab", "zzz", ""] {
                assert_eq!(
                    n.longest(codes(input)).map(|m| m.len),
                    d.longest(codes(input)).map(|m| m.len),
                    "{source} on {input:?}"
                );
            }
        }
    }

    #[test]
    fn token_union_keeps_declaration_order_on_ties() {
        let mut builder = NfaBuilder::new();
        builder.pattern(&Regexp::parse("[a-z]+", &Unicode).expect("pattern"), "name");
        builder.pattern(&Regexp::parse("if", &Unicode).expect("pattern"), "kw");
        let d = builder.build().determinize(&Unicode);
        let m = d.longest(codes("if ")).expect("match");
        assert_eq!(m.len, 2);
        assert_eq!(m.tags, vec!["name", "kw"]);
    }

    #[test]
    fn overlapping_classes_are_partitioned() {
        // [a-f]x vs [d-k]y share d-f; the split must route both correctly
        let mut builder = NfaBuilder::new();
        builder.pattern(&Regexp::parse("[a-f]x", &Unicode).expect("pattern"), 0);
        builder.pattern(&Regexp::parse("[d-k]y", &Unicode).expect("pattern"), 1);
        let d = builder.build().determinize(&Unicode);
        assert_eq!(d.longest(codes("ex")).map(|m| m.tags), Some(vec![0]));
        assert_eq!(d.longest(codes("ey")).map(|m| m.tags), Some(vec![1]));
        assert_eq!(d.longest(codes("jy")).map(|m| m.tags), Some(vec![1]));
        assert_eq!(d.longest(codes("jx")), None);
    }
}
