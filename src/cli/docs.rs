//! Documentation content for the tsexpr CLI

use super::CliError;
use crate::Registry;
use crate::backend;

/// Available documentation categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocCategory {
    Syntax,
    Operators,
    Joins,
    Functions,
    Backends,
}

impl DocCategory {
    /// Parse category name from string
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "syntax" => Some(Self::Syntax),
            "operators" | "ops" => Some(Self::Operators),
            "joins" | "join" | "union" => Some(Self::Joins),
            "functions" | "funcs" => Some(Self::Functions),
            "backends" | "backend" | "queries" => Some(Self::Backends),
            _ => None,
        }
    }
}

/// Get the docs overview (category listing)
pub fn get_docs_overview() -> &'static str {
    r#"TSEXPR DOCUMENTATION

tsexpr evaluates alerting expressions over tagged time series. Queries fetch
series from backends, functions reduce and reshape them, and operators join
the results group by group.

DOCUMENTATION CATEGORIES

  syntax            Literals, strings, function calls and sub-expressions
  operators         Arithmetic, comparison and logical operators
  joins             How operators pair up grouped results
  functions         Every builtin function with its signature
  backends          Query functions, federation and caching

QUICK REFERENCE

  q("cpu{host=*}", "1h", "")       Series of the last hour
  avg(...)  max(...)  last(...)     Reduce series to numbers
  a > 80 && b < 5                   Compare and combine per group

Run 'tsexpr doc <category>' for detailed documentation.
"#
}

/// Get documentation for a specific category
pub fn get_doc_category(name: &str) -> Result<String, CliError> {
    match DocCategory::from_name(name) {
        Some(DocCategory::Syntax) => Ok(SYNTAX_DOC.to_string()),
        Some(DocCategory::Operators) => Ok(OPERATORS_DOC.to_string()),
        Some(DocCategory::Joins) => Ok(JOINS_DOC.to_string()),
        Some(DocCategory::Functions) => Ok(function_reference(&Registry::builtin())),
        Some(DocCategory::Backends) => {
            let mut doc = BACKENDS_DOC.to_string();
            doc.push_str(&function_reference(&backend::functions::registry()));
            Ok(doc)
        }
        None => Err(CliError::UnknownCategory(name.to_string())),
    }
}

/// One line per function: name, signature and summary.
fn function_reference(registry: &Registry) -> String {
    let mut out = String::from("FUNCTIONS\n\n");
    for name in registry.names() {
        if let Some(func) = registry.get(name) {
            out.push_str(&format!("  {}{}\n      {}\n", name, func.signature(), func.doc));
        }
    }
    out
}

const SYNTAX_DOC: &str = r#"SYNTAX

NUMBERS
  42  3.5  .5  1e3
    Literal numbers are ungrouped scalars.

STRINGS
  "cpu{host=*}"
    Double quoted with \" \\ \n \t escapes.
  """raw "quotes" here"""
    Triple quoted strings take their content verbatim.

FUNCTION CALLS
  name(arg, arg, ...)
    Arguments are type checked when the expression is parsed. Unknown
    functions, wrong argument counts and mismatched types are reported with
    the line and column of the call.

SUB-EXPRESSIONS
  map(series, expr(v() * 2))
    expr(...) captures a numeric expression. map() evaluates it once per
    point with v() bound to that point's value. v() is only valid there.
"#;

const OPERATORS_DOC: &str = r#"OPERATORS

From lowest to highest precedence:

  ||                  1 when either side is nonzero
  &&                  1 when both sides are nonzero
  == != < > <= >=     1 or 0
  + -
  * / %
  **                  power, left associative
  ! -                 unary, bind tighter than **  (-2**2 is 4)

Both sides of || and && are always evaluated. A NaN operand makes the result
NaN, except that || with a nonzero left side is 1 and && with a zero left
side is 0.

Two series sets cannot be combined directly; reduce one side first.
"#;

const JOINS_DOC: &str = r#"JOINS

Every result belongs to a group, the tag set of the series it came from.
A binary operator pairs the results of both sides:

  - equal groups pair up
  - an ungrouped result pairs with every result of the other side
  - {host=a} pairs with {host=a,dc=x}; the result keeps the larger group

A result with no partner is paired with NaN, or with the value set by nv().
dropunjoined(x) drops unmatched results of x instead; dropotherunjoined(x)
drops unmatched results of the other side. With --unjoined-ok every
unmatched result is dropped.

Two results ending up with the same group is an error.
"#;

const BACKENDS_DOC: &str = r#"BACKENDS

  q("metric{key=value,key=*,key=a|b}", "start", "end")
    Series from the default backend. Start and end are durations back from
    the evaluation time ("1h", "30m"); an empty end means now. Failed queries
    are retried. Results are grouped by the tag keys in the query.

  fq(query("cpu{host=*}", "1h", ""), resources("east,west"))
    Runs one query against several backends at once. Each series gets a
    source=<backend> tag.

Identical queries within one evaluation hit the backend once.

"#;
