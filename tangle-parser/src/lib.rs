/*!
A backtracking parser-combinator engine.

Grammars are graphs of matcher nodes built with a [`GrammarBuilder`]
(cycles, and so left recursion, via [`GrammarBuilder::delayed`] knots). A
[`ConfigBuilder`] collects rewriters that restructure the graph before
evaluation (flattening, transform fusion, regexp subgraph compilation,
automatic left-recursion memoization, lexer insertion), and evaluation
itself is a single-threaded cooperative trampoline driving matcher
coroutines with full backtracking, yielding every parse of an ambiguous
grammar as a lazy sequence.

## Usage
```
use tangle_parser::{GrammarBuilder, Parser, Value};

// phone book lines: name ',' number
let mut g = GrammarBuilder::new();
let name = g.token("[a-z]+").id();
let comma = g.token(",").id();
let comma = g.suppress(comma);
let number = g.token("[0-9]+").id();
let entry = g.and([name, comma, number]);
let entry = g.transform(entry, |values| Ok(vec![Value::List(values)]));
let root = g.repeat(entry).min(1).id();

let mut parser = Parser::new(g.build(root)?);
let found = parser.parse("andrew, 3333253\n bob, 12345")?.unwrap();
assert_eq!(
    found,
    vec![
        Value::List(vec![Value::text("andrew"), Value::text("3333253")]),
        Value::List(vec![Value::text("bob"), Value::text("12345")]),
    ],
);
# Ok::<(), tangle_parser::ParseError>(())
```

Left recursion works under the default configuration (the left-recursive
cycles are wrapped in `LMemo` automatically), and ambiguous grammars yield
all their parses through [`Matcher::matches`].
*/

pub mod config;
pub mod error;
pub mod graph;
pub mod lexer;
pub mod matchers;
pub mod parser;
pub mod rewrite;
pub mod stream;
pub mod trampoline;

pub use config::{ConfigBuilder, Configuration};
pub use error::ParseError;
pub use graph::{Grammar, GrammarBuilder, Node, NodeId, TransformFn};
pub use lexer::{BlockPolicy, TokenTag, DEFAULT_TABSIZE, NO_BLOCKS};
pub use matchers::Value;
pub use parser::{make_matcher, make_parser, MatchIter, Matcher, Parser};
pub use rewrite::{RegexpKind, Rewriter, SetArguments};
pub use stream::{Stream, StreamFactory, TextStreamFactory};
pub use trampoline::{GeneratorManager, Monitor, MonitorCommands, TraceResults};

#[cfg(test)]
mod tests {
    use super::*;

    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn joined(values: &[Value]) -> String {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn name_phone_lines() {
        init_logs();
        let mut g = GrammarBuilder::new();
        let name = g.token("[a-z]+").id();
        let comma = g.token(",").id();
        let comma = g.suppress(comma);
        let number = g.token("[0-9]+").id();
        let entry = g.and([name, comma, number]);
        let entry = g.transform(entry, |values| Ok(vec![Value::List(values)]));
        let root = g.repeat(entry).min(1).id();

        let mut parser = Parser::new(g.build(root).expect("grammar"));
        let found = parser
            .parse("andrew, 3333253\n bob, 12345")
            .expect("parse")
            .expect("match");
        assert_eq!(
            found,
            vec![
                Value::List(vec![Value::text("andrew"), Value::text("3333253")]),
                Value::List(vec![Value::text("bob"), Value::text("12345")]),
            ],
        );
    }

    /// `E ::= E '+' E | E '*' E | n` is ambiguous; under LMemo the parse
    /// of `1+2*3` terminates and yields both association orders.
    #[test]
    fn left_recursive_arithmetic_yields_all_trees() {
        init_logs();
        let mut g = GrammarBuilder::new();
        let expr = g.delayed();
        let plus = g.literal("+");
        let times = g.literal("*");
        let num = g.regexp("[0-9]");
        let sum = g.and([expr, plus, expr]);
        let sum = g.transform(sum, |v| Ok(vec![Value::text(format!("({})", joined(&v)))]));
        let prod = g.and([expr, times, expr]);
        let prod = g.transform(prod, |v| Ok(vec![Value::text(format!("({})", joined(&v)))]));
        let alt = g.or([sum, prod, num]);
        g.tie(expr, alt).expect("tie");

        let mut parser = Parser::new(g.build(alt).expect("grammar"));
        parser
            .config()
            .clear()
            .auto_memoize(false, false)
            .full_match(true);
        let mut found: Vec<String> = Vec::new();
        for result in parser.matches("1+2*3").expect("materialize") {
            let (values, _) = result.expect("match");
            found.push(joined(&values));
        }
        assert!(found.contains(&"(1+(2*3))".to_owned()), "{found:?}");
        assert!(found.contains(&"((1+2)*3)".to_owned()), "{found:?}");
    }

    #[test]
    fn left_recursion_terminates_without_explicit_memo_nodes() {
        // expr = expr '+' num | num, default configuration
        let mut g = GrammarBuilder::new();
        let expr = g.delayed();
        let plus = g.literal("+");
        let num = g.regexp("[0-9]+");
        let sum = g.and([expr, plus, num]);
        let alt = g.or([sum, num]);
        g.tie(expr, alt).expect("tie");

        let mut parser = Parser::new(g.build(alt).expect("grammar"));
        parser.config().clear().auto_memoize(false, false).full_match(true);
        let found = parser.parse("1+2+3").expect("parse").expect("match");
        assert_eq!(joined(&found), "1+2+3");
    }

    /// Compiling a liftable subgraph to an automaton must not change what
    /// is matched (results compared as consumed text and end position).
    #[test]
    fn regexp_compilation_equivalence() {
        fn outcomes(compile: bool, input: &str) -> Vec<(String, usize)> {
            let mut g = GrammarBuilder::new();
            let any = g.any(Some("ab"));
            let root = g.repeat(any).min(3).max(5).id();
            let mut parser = Parser::new(g.build(root).expect("grammar"));
            parser.config().clear();
            if compile {
                parser.config().compile_to_nfa();
            }
            let mut out: Vec<(String, usize)> = parser
                .matches(input)
                .expect("materialize")
                .map(|result| {
                    let (values, stream) = result.expect("match");
                    (joined(&values), stream.global_offset())
                })
                .collect();
            out.sort();
            out
        }
        for input in ["abab", "aaaaa", "a"] {
            assert_eq!(outcomes(false, input), outcomes(true, input), "{input}");
        }
    }

    #[test]
    fn offside_blocks() {
        init_logs();
        let mut g = GrammarBuilder::new();
        let word = g.token("[a-z]+").id();
        let colon = g.token(":").id();
        let statement = g.delayed();
        let simple = g.line(word);
        let body = g.repeat(statement).min(1).id();
        let body = g.transform(body, |v| Ok(vec![Value::List(v)]));
        let block = g.block(vec![body]).id();
        let intro = g.and([word, word, colon]);
        let intro = g.line(intro);
        let compound = g.and([intro, block]);
        let compound = g.transform(compound, |v| Ok(vec![Value::List(v)]));
        let alt = g.or([compound, simple]);
        g.tie(statement, alt).expect("tie");
        let root = g.repeat(alt).min(1).id();

        let mut parser = Parser::new(g.build(root).expect("grammar"));
        parser
            .config()
            .default_line_aware(Some(4), Some(BlockPolicy::Constant(4)), Some(0), None)
            .full_match(true);
        let found = parser
            .parse("if x:\n    a\n    b\nc")
            .expect("parse")
            .expect("match");
        assert_eq!(
            found,
            vec![
                Value::List(vec![
                    Value::text("if"),
                    Value::text("x"),
                    Value::text(":"),
                    Value::List(vec![Value::text("a"), Value::text("b")]),
                ]),
                Value::text("c"),
            ],
        );
    }

    #[test]
    fn lexer_discard_drops_whitespace_only() {
        let mut g = GrammarBuilder::new();
        let word = g.token("[a-z]+").id();
        let comma = g.token(",").id();
        let item = g.or([word, comma]);
        let root = g.repeat(item).min(1).id();
        let mut parser = Parser::new(g.build(root).expect("grammar"));
        parser.config().clear().lexer(None).full_match(true);
        let found = parser.parse(" foo ,  bar ").expect("parse").expect("match");
        assert_eq!(
            found,
            vec![Value::text("foo"), Value::text(","), Value::text("bar")],
        );
    }

    #[test]
    fn full_match_failure_reports_the_furthest_position() {
        let mut g = GrammarBuilder::new();
        let root = g.literal("abc");
        let mut parser = Parser::new(g.build(root).expect("grammar"));
        parser.config().clear().full_match(true);
        match parser.parse("abcd") {
            Err(ParseError::FullMatch {
                location, snippet, ..
            }) => {
                assert_eq!(location, "line 1, character 4");
                assert_eq!(snippet, "d");
            }
            other => panic!("{other:?}"),
        }
    }

    /// Without left recursion, memoization must not change the results.
    #[test]
    fn memoization_neutrality() {
        fn outcomes(memoize: bool) -> Vec<(String, usize)> {
            let mut g = GrammarBuilder::new();
            let a1 = g.any(Some("a"));
            let left = g.repeat(a1).id();
            let a2 = g.any(Some("a"));
            let right = g.repeat(a2).id();
            let root = g.and([left, right]);
            let mut parser = Parser::new(g.build(root).expect("grammar"));
            parser.config().clear();
            if memoize {
                parser.config().auto_memoize(false, true);
            }
            parser
                .matches("aaa")
                .expect("materialize")
                .map(|result| {
                    let (values, stream) = result.expect("match");
                    (joined(&values), stream.global_offset())
                })
                .collect()
        }
        assert_eq!(outcomes(false), outcomes(true));
    }

    /// Flattening nested `And`/`Or` must not change the result sequence.
    #[test]
    fn flatten_preserves_results() {
        fn outcomes(flatten: bool) -> Vec<(String, usize)> {
            let mut g = GrammarBuilder::new();
            let a = g.literal("a");
            let b = g.literal("b");
            let c = g.literal("c");
            let a2 = g.literal("a");
            let b2 = g.literal("b");
            let prefix = g.and([a, b]);
            let inner_or = g.or([c, a2]);
            let suffix = g.or([inner_or, b2]);
            let root = g.and([prefix, suffix]);
            let mut parser = Parser::new(g.build(root).expect("grammar"));
            parser.config().clear();
            if flatten {
                parser.config().flatten();
            }
            parser
                .matches("aba")
                .expect("materialize")
                .map(|result| {
                    let (values, stream) = result.expect("match");
                    (joined(&values), stream.global_offset())
                })
                .collect()
        }
        let plain = outcomes(false);
        assert_eq!(plain, outcomes(true));
        assert_eq!(plain, vec![("aba".to_owned(), 3)]);
    }

    #[test]
    fn repeated_parses_are_deterministic() {
        let mut g = GrammarBuilder::new();
        let a = g.any(Some("ab"));
        let root = g.repeat(a).min(1).id();
        let mut parser = Parser::new(g.build(root).expect("grammar"));
        let first: Vec<_> = parser
            .matches("abba")
            .expect("materialize")
            .map(|r| r.expect("match").0)
            .collect();
        let second: Vec<_> = parser
            .matches("abba")
            .expect("materialize")
            .map(|r| r.expect("match").0)
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn or_backtracks_in_declaration_order() {
        let mut g = GrammarBuilder::new();
        let ab = g.literal("ab");
        let a = g.literal("a");
        let root = g.or([ab, a]);
        let mut parser = Parser::new(g.build(root).expect("grammar"));
        parser.config().clear();
        let found: Vec<String> = parser
            .matches("ab")
            .expect("materialize")
            .map(|r| joined(&r.expect("match").0))
            .collect();
        assert_eq!(found, vec!["ab".to_owned(), "a".to_owned()]);
    }

    #[test]
    fn greedy_and_reluctant_orders() {
        fn lengths(greedy: bool) -> Vec<usize> {
            let mut g = GrammarBuilder::new();
            let a = g.any(Some("a"));
            let root = g.repeat(a).greedy(greedy).id();
            let mut parser = Parser::new(g.build(root).expect("grammar"));
            parser.config().clear();
            parser
                .matches("aa")
                .expect("materialize")
                .map(|r| r.expect("match").0.len())
                .collect()
        }
        assert_eq!(lengths(true), vec![2, 1, 0]);
        assert_eq!(lengths(false), vec![0, 1, 2]);
    }

    #[test]
    fn lookahead_consumes_nothing() {
        let mut g = GrammarBuilder::new();
        let ahead = g.literal("ab");
        let look = g.lookahead(ahead, false);
        let a = g.literal("a");
        let root = g.and([look, a]);
        let mut parser = Parser::new(g.build(root).expect("grammar"));
        parser.config().clear();
        let found = parser.parse("ab").expect("parse").expect("match");
        assert_eq!(joined(&found), "a");

        let mut g = GrammarBuilder::new();
        let ahead = g.literal("b");
        let not_b = g.lookahead(ahead, true);
        let a = g.literal("a");
        let root = g.and([not_b, a]);
        let mut parser = Parser::new(g.build(root).expect("grammar"));
        parser.config().clear();
        assert!(parser.parse("ab").expect("parse").is_some());
        assert!(parser.parse("ba").expect("parse").is_none());
    }

    #[test]
    fn separators_sit_between_repetitions() {
        let mut g = GrammarBuilder::new();
        let num = g.regexp("[0-9]+");
        let comma = g.literal(",");
        let comma = g.suppress(comma);
        let root = g.repeat(num).min(1).separator(comma).id();
        let mut parser = Parser::new(g.build(root).expect("grammar"));
        parser.config().clear().full_match(true);
        let found = parser.parse("1,22,333").expect("parse").expect("match");
        assert_eq!(
            found,
            vec![Value::text("1"), Value::text("22"), Value::text("333")],
        );
    }

    #[test]
    fn iteration_budget_cancels_runaway_parses() {
        // unmemoized left recursion never terminates on its own
        let mut g = GrammarBuilder::new();
        let expr = g.delayed();
        let plus = g.literal("+");
        let num = g.regexp("[0-9]+");
        let sum = g.and([expr, plus, num]);
        let alt = g.or([sum, num]);
        g.tie(expr, alt).expect("tie");
        let mut parser = Parser::new(g.build(alt).expect("grammar"));
        parser.config().clear().full_match(true);
        parser.config().manage_with_budget(0, 10_000);
        match parser.parse("1+2") {
            Err(ParseError::Cancelled(_)) => {}
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn config_reuse_skips_rematerialization() {
        let mut g = GrammarBuilder::new();
        let root = g.literal("x");
        let mut parser = Parser::new(g.build(root).expect("grammar"));
        assert!(parser.parse("x").expect("parse").is_some());
        let first = std::sync::Arc::as_ptr(parser.matcher().expect("matcher").grammar());
        assert!(parser.parse("x").expect("parse").is_some());
        let second = std::sync::Arc::as_ptr(parser.matcher().expect("matcher").grammar());
        assert_eq!(first, second);
        parser.config().full_match(true);
        let third = std::sync::Arc::as_ptr(parser.matcher().expect("matcher").grammar());
        assert_ne!(first, third);
    }
}
