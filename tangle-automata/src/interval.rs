/*!
Disjoint-interval sets over an [`Alphabet`].

A [`Character`] is the label type of every non-ε automaton edge: a set of
codes stored as ordered, disjoint, non-adjacent inclusive intervals.
[`Fragments`] and [`TaggedFragments`] are the refinement structures used by
subset construction: instead of merging, every appended interval splits the
held intervals at each overlap boundary, so the result is the finest common
partition of everything appended.
*/
use std::fmt;

use crate::alphabet::Alphabet;

/// An inclusive interval pair. Reversed input is canonicalized on insert.
pub type Interval = (u32, u32);

fn canonical((a, b): Interval) -> Interval {
    if b < a {
        (b, a)
    } else {
        (a, b)
    }
}

/// A set of codes described as ordered disjoint intervals.
///
/// Appending merges overlapping *and adjacent* intervals (adjacency is
/// decided by the alphabet's `before`/`after` neighbors), so the stored form
/// is canonical: equal sets compare and hash equal. The empty `Character` is
/// legal and contains nothing.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Character {
    intervals: Vec<Interval>,
}

impl Character {
    pub fn new(intervals: impl IntoIterator<Item = Interval>, alphabet: &dyn Alphabet) -> Self {
        let mut char_ = Character::default();
        for interval in intervals {
            char_.append(interval, alphabet);
        }
        char_
    }

    /// A `Character` holding exactly the chars of `text`.
    pub fn of_chars(text: &str, alphabet: &dyn Alphabet) -> Self {
        Self::new(text.chars().map(|c| (c as u32, c as u32)), alphabet)
    }

    /// Add an interval, maintaining the normalized form.
    pub fn append(&mut self, interval: Interval, alphabet: &dyn Alphabet) {
        let (mut a1, b1) = canonical(interval);
        let old = std::mem::take(&mut self.intervals);
        let mut out = Vec::with_capacity(old.len() + 1);
        let mut rest = old.len();
        let mut done = false;
        for (i, &(a0, b0)) in old.iter().enumerate() {
            rest = i + 1;
            if a0 <= a1 {
                if b0 < a1 && b0 != alphabet.before(a1) {
                    // old ends before new starts, not adjacent: keep old
                    out.push((a0, b0));
                } else if b1 <= b0 {
                    // old swallows new entirely
                    out.push((a0, b0));
                    done = true;
                    break;
                } else {
                    // partial overlap (or adjacency): extend new leftwards
                    // and keep scanning, it may swallow more
                    a1 = a0;
                }
            } else if b1 < a0 && b1 != alphabet.before(a0) {
                // new ends before old starts, not adjacent: emit both
                out.push((a1, b1));
                out.push((a0, b0));
                done = true;
                break;
            } else if b0 <= b1 {
                // new swallows old: drop old and keep scanning
            } else {
                // partial overlap: merge and stop
                out.push((a1, b0));
                done = true;
                break;
            }
        }
        if !done {
            out.push((a1, b1));
            rest = old.len();
        }
        out.extend_from_slice(&old[rest..]);
        self.intervals = out;
    }

    /// Set complement with respect to the alphabet's full range.
    pub fn complement(&self, alphabet: &dyn Alphabet) -> Character {
        let mut out = Character::default();
        let mut next = alphabet.min_code();
        let mut open = true;
        for &(a, b) in &self.intervals {
            if open && a > alphabet.min_code() && next <= alphabet.before(a) {
                out.append((next, alphabet.before(a)), alphabet);
            }
            if b >= alphabet.max_code() {
                open = false;
                break;
            }
            next = alphabet.after(b);
        }
        if open {
            out.append((next, alphabet.max_code()), alphabet);
        }
        out
    }

    /// Membership test by bisection on interval upper bounds.
    pub fn contains(&self, code: u32) -> bool {
        let index = self.intervals.partition_point(|&(_, b)| b < code);
        match self.intervals.get(index) {
            Some(&(a, b)) => a <= code && code <= b,
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    pub fn iter(&self) -> impl Iterator<Item = Interval> + '_ {
        self.intervals.iter().copied()
    }
}

impl fmt::Debug for Character {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            crate::alphabet::Unicode.fmt_intervals(&self.intervals)
        )
    }
}

/// The finest common refinement of a sequence of appended characters.
///
/// Where [`Character::append`] merges, this splits: appending `(3,5)` to
/// `(1,4) (7,8)` gives `(1,2) (3,4) (5,5) (7,8)`.
#[derive(Clone, Debug, Default)]
pub struct Fragments {
    intervals: Vec<Interval>,
}

impl Fragments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, character: &Character, alphabet: &dyn Alphabet) {
        for interval in character.iter() {
            self.append_interval(interval, alphabet);
        }
    }

    fn append_interval(&mut self, interval: Interval, alphabet: &dyn Alphabet) {
        let (mut a1, b1) = canonical(interval);
        let old = std::mem::take(&mut self.intervals);
        let mut out = Vec::with_capacity(old.len() + 2);
        let mut rest = old.len();
        let mut done = false;
        for (i, &(a0, b0)) in old.iter().enumerate() {
            rest = i + 1;
            if a0 <= a1 {
                if b0 < a1 {
                    // old entirely before new
                    out.push((a0, b0));
                } else if b1 <= b0 {
                    // old covers new: up to three pieces
                    if a0 < a1 {
                        out.push((a0, alphabet.before(a1)));
                    }
                    out.push((a1, b1));
                    if b1 < b0 {
                        out.push((alphabet.after(b1), b0));
                    }
                    done = true;
                    break;
                } else {
                    // old starts first, partial overlap: split old, continue
                    if a0 < a1 {
                        out.push((a0, alphabet.before(a1)));
                    }
                    out.push((a1, b0));
                    a1 = alphabet.after(b0);
                }
            } else if b1 < a0 {
                // new entirely before old
                out.push((a1, b1));
                out.push((a0, b0));
                done = true;
                break;
            } else if b0 <= b1 {
                // new starts first and extends past old: split, continue
                out.push((a1, alphabet.before(a0)));
                out.push((a0, b0));
                if b1 > b0 {
                    a1 = alphabet.after(b0);
                } else {
                    done = true;
                    break;
                }
            } else {
                // new starts first, ends inside old
                out.push((a1, alphabet.before(a0)));
                out.push((a0, b1));
                out.push((alphabet.after(b1), b0));
                done = true;
                break;
            }
        }
        if !done {
            out.push((a1, b1));
            rest = old.len();
        }
        out.extend_from_slice(&old[rest..]);
        self.intervals = out;
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Interval> + '_ {
        self.intervals.iter().copied()
    }
}

/// Like [`Fragments`], but every interval carries the tags of the appended
/// characters that cover it. Overlap concatenates tag lists in insertion
/// order, which is what lets earlier-declared tokens win tie-breaks.
#[derive(Clone, Debug)]
pub struct TaggedFragments<T> {
    intervals: Vec<(Interval, Vec<T>)>,
}

impl<T> Default for TaggedFragments<T> {
    fn default() -> Self {
        Self {
            intervals: Vec::new(),
        }
    }
}

impl<T: Clone> TaggedFragments<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, character: &Character, tag: T, alphabet: &dyn Alphabet) {
        for interval in character.iter() {
            self.append_interval(interval, vec![tag.clone()], alphabet);
        }
    }

    fn append_interval(&mut self, interval: Interval, v1: Vec<T>, alphabet: &dyn Alphabet) {
        let (mut a1, b1) = canonical(interval);
        let old = std::mem::take(&mut self.intervals);
        let mut out: Vec<(Interval, Vec<T>)> = Vec::with_capacity(old.len() + 2);
        let mut iter = old.into_iter();
        let mut done = false;
        for ((a0, b0), v0) in iter.by_ref() {
            if a0 <= a1 {
                if b0 < a1 {
                    out.push(((a0, b0), v0));
                } else if b1 <= b0 {
                    if a0 < a1 {
                        out.push(((a0, alphabet.before(a1)), v0.clone()));
                    }
                    let mut both = v0.clone();
                    both.extend(v1.iter().cloned());
                    out.push(((a1, b1), both));
                    if b1 < b0 {
                        out.push(((alphabet.after(b1), b0), v0));
                    }
                    done = true;
                    break;
                } else {
                    if a0 < a1 {
                        out.push(((a0, alphabet.before(a1)), v0.clone()));
                    }
                    let mut both = v0;
                    both.extend(v1.iter().cloned());
                    out.push(((a1, b0), both));
                    a1 = alphabet.after(b0);
                }
            } else if b1 < a0 {
                out.push(((a1, b1), v1.clone()));
                out.push(((a0, b0), v0));
                done = true;
                break;
            } else if b0 <= b1 {
                out.push(((a1, alphabet.before(a0)), v1.clone()));
                let mut both = v0;
                both.extend(v1.iter().cloned());
                out.push(((a0, b0), both));
                if b1 > b0 {
                    a1 = alphabet.after(b0);
                } else {
                    done = true;
                    break;
                }
            } else {
                out.push(((a1, alphabet.before(a0)), v1.clone()));
                let mut both = v0.clone();
                both.extend(v1.iter().cloned());
                out.push(((a0, b1), both));
                out.push(((alphabet.after(b1), b0), v0));
                done = true;
                break;
            }
        }
        if !done {
            out.push(((a1, b1), v1));
        }
        out.extend(iter);
        self.intervals = out;
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Interval, Vec<T>)> {
        self.intervals.iter()
    }
}

/// Map from disjoint intervals to values with point lookup by bisection.
///
/// Intervals must not overlap; the automaton invariants guarantee that for
/// every insert this structure sees.
#[derive(Clone, Debug, Default)]
pub struct IntervalMap<V> {
    entries: Vec<(Interval, V)>,
}

impl<V> IntervalMap<V> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn insert(&mut self, interval: Interval, value: V) {
        let interval = canonical(interval);
        let at = self
            .entries
            .partition_point(|&((_, b), _)| b < interval.0);
        self.entries.insert(at, (interval, value));
    }

    pub fn get(&self, point: u32) -> Option<&V> {
        let index = self.entries.partition_point(|&((_, b), _)| b < point);
        match self.entries.get(index) {
            Some(&((a, b), ref value)) if a <= point && point <= b => Some(value),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Interval, V)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::Unicode;

    fn character(intervals: &[(char, char)]) -> Character {
        Character::new(
            intervals.iter().map(|&(a, b)| (a as u32, b as u32)),
            &Unicode,
        )
    }

    #[test]
    fn append_merges_overlap_and_adjacency() {
        let mut c = character(&[('a', 'c')]);
        c.append(('b' as u32, 'e' as u32), &Unicode);
        assert_eq!(c.intervals(), &[('a' as u32, 'e' as u32)]);
        // adjacent intervals merge too
        c.append(('f' as u32, 'h' as u32), &Unicode);
        assert_eq!(c.intervals(), &[('a' as u32, 'h' as u32)]);
        // disjoint stays disjoint
        c.append(('x' as u32, 'z' as u32), &Unicode);
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn append_canonicalizes_reversed_input() {
        let mut c = Character::default();
        c.append(('e' as u32, 'a' as u32), &Unicode);
        assert_eq!(c.intervals(), &[('a' as u32, 'e' as u32)]);
    }

    #[test]
    fn normalized_after_any_append_sequence() {
        let mut c = Character::default();
        for iv in [(10, 12), (30, 40), (13, 13), (5, 60), (70, 70), (61, 69)] {
            c.append(iv, &Unicode);
            // disjoint, ascending, non-adjacent
            for w in c.intervals().windows(2) {
                assert!(w[0].1 < w[1].0, "{:?}", c.intervals());
                assert!(Unicode.after(w[0].1) != w[1].0, "{:?}", c.intervals());
            }
        }
        assert_eq!(c.intervals(), &[(5, 70)]);
    }

    #[test]
    fn contains_uses_bisection() {
        let c = character(&[('a', 'c'), ('x', 'z')]);
        assert!(c.contains('b' as u32));
        assert!(c.contains('x' as u32));
        assert!(!c.contains('d' as u32));
        assert!(!Character::default().contains('a' as u32));
    }

    #[test]
    fn complement_round_trip() {
        let c = character(&[('b', 'd')]);
        let n = c.complement(&Unicode);
        assert!(!n.contains('c' as u32));
        assert!(n.contains('a' as u32));
        assert!(n.contains('e' as u32));
        assert_eq!(n.complement(&Unicode), c);
    }

    #[test]
    fn fragments_refine() {
        let mut f = Fragments::new();
        f.append(&character(&[('\u{1}', '\u{4}')]), &Unicode);
        f.append(&character(&[('\u{7}', '\u{8}')]), &Unicode);
        f.append(&character(&[('\u{3}', '\u{5}')]), &Unicode);
        let got: Vec<_> = f.iter().collect();
        assert_eq!(got, vec![(1, 2), (3, 4), (5, 5), (7, 8)]);
    }

    #[test]
    fn fragments_exact_cover() {
        // every input interval is exactly covered by a union of fragments
        let inputs = [
            character(&[('a', 'm')]),
            character(&[('g', 'z')]),
            character(&[('c', 'c')]),
        ];
        let mut f = Fragments::new();
        for c in &inputs {
            f.append(c, &Unicode);
        }
        for c in &inputs {
            for (a, b) in c.iter() {
                let mut covered = a;
                for (fa, fb) in f.iter().filter(|&(fa, fb)| fa >= a && fb <= b) {
                    assert_eq!(fa, covered);
                    covered = Unicode.after(fb);
                }
                assert!(covered > b);
            }
        }
    }

    #[test]
    fn tagged_fragments_preserve_tag_order() {
        let mut f = TaggedFragments::new();
        f.append(&character(&[('a', 'f')]), 0, &Unicode);
        f.append(&character(&[('d', 'k')]), 1, &Unicode);
        let got: Vec<_> = f
            .iter()
            .map(|((a, b), v)| ((*a, *b), v.clone()))
            .collect();
        assert_eq!(
            got,
            vec![
                (('a' as u32, 'c' as u32), vec![0]),
                (('d' as u32, 'f' as u32), vec![0, 1]),
                (('g' as u32, 'k' as u32), vec![1]),
            ]
        );
    }

    #[test]
    fn interval_map_point_lookup() {
        let mut m = IntervalMap::new();
        m.insert((10, 20), "x");
        m.insert((30, 30), "y");
        m.insert((1, 4), "z");
        assert_eq!(m.get(15), Some(&"x"));
        assert_eq!(m.get(30), Some(&"y"));
        assert_eq!(m.get(4), Some(&"z"));
        assert_eq!(m.get(25), None);
    }
}
