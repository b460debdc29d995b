/*!
Interval alphabets and a small NFA/DFA regular expression compiler.

This crate is the automaton half of the `tangle` engine:

- [`alphabet`]: ordered code domains with neighbor queries
  ([`alphabet::Unicode`] being the usual one);
- [`interval`]: disjoint-interval character sets, overlap-aware fragment
  refinement, and interval maps with bisection lookup;
- [`syntax`]: the pattern source parser (tokenized with [`logos`]);
- [`nfa`]: Thompson construction and all-matches simulation;
- [`dfa`]: subset construction and single-pass longest match.

## Usage
```
use tangle_automata::{alphabet::Unicode, nfa::Nfa, syntax::Regexp};

let tree = Regexp::parse("ab|a+", &Unicode)?;
let nfa = Nfa::single(&tree, "tag");
let lens: Vec<usize> = nfa
    .match_all("aaa".chars().map(|c| c as u32))
    .iter()
    .map(|m| m.len)
    .collect();
assert_eq!(lens, vec![3, 2, 1]);

let dfa = nfa.determinize(&Unicode);
assert_eq!(dfa.longest("ab".chars().map(|c| c as u32)).unwrap().len, 2);
# Ok::<(), tangle_automata::RegexError>(())
```
*/

pub mod alphabet;
pub mod dfa;
pub mod interval;
pub mod nfa;
pub mod syntax;

/// Errors from pattern parsing and compilation.
#[derive(Debug, thiserror::Error)]
pub enum RegexError {
    #[error("malformed pattern at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("pattern is incompatible with the configured alphabet: {0}")]
    Alphabet(String),
}

impl RegexError {
    pub(crate) fn parse(offset: usize, message: impl Into<String>) -> Self {
        RegexError::Parse {
            offset,
            message: message.into(),
        }
    }
}
