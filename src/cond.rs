//! Predicate expression tree and filter rendering.
//!
//! A [`Cond`] collects clauses from heterogeneous inputs and renders them
//! to a single filter string with AND/OR joining. Clauses inside one group
//! stay flat: mixing [`Cond::and_where`] and [`Cond::or_where`] does not
//! introduce precedence nesting. Callers needing `(a AND b) OR (c AND d)`
//! attach an explicit sub-group via [`Cond::or_group`]. This is a
//! deliberate design constraint of the builder, not a general
//! boolean-algebra engine.
//!
//! Rendering is deterministic and idempotent; an empty `Cond` renders to
//! an empty string. Field names are backtick-quoted and every literal goes
//! through [`crate::value::escape_string`].

use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Attribute map used by the map form of `and_where`/`or_where` and by the
/// `first_or_create`/`first_or_update` protocol. A `BTreeMap` so key order
/// is lexical and rendering is stable across calls.
pub type Attrs = BTreeMap<String, Value>;

/// One leaf clause. Structured leaves re-render on every `to_string` call
/// so a table prefix set after the clause was added still applies.
#[derive(Debug, Clone)]
enum Leaf {
    /// `` `field` = 'value' ``
    Eq { field: String, value: Value },
    /// `` `field` <op> 'value' ``
    Op {
        field: String,
        op: &'static str,
        value: Value,
    },
    /// `` `field` IN ('a', 'b') `` / `NOT IN`
    In {
        field: String,
        negated: bool,
        values: Vec<Value>,
    },
    /// Caller-supplied fragment; binds already spliced, prefix not applied.
    Raw(String),
    /// Constant-false clause used by the empty-IN short circuit.
    AlwaysFalse,
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(Leaf),
    Group(Cond),
}

#[derive(Debug, Clone)]
struct Item {
    /// Join operator linking this item to the content before it. The first
    /// rendered item's operator is not emitted.
    or: bool,
    node: Node,
}

/// Composable predicate tree owned by a `Scope`.
///
/// # Example
///
/// ```
/// use dbx::Cond;
///
/// let mut cond = Cond::new();
/// cond.and_where(("status", 1)).and_where(("`age` >= ?", 18));
/// assert_eq!(cond.to_string(), "`status` = '1' AND `age` >= '18'");
/// ```
#[derive(Debug, Clone, Default)]
pub struct Cond {
    top_level: bool,
    table_prefix: Option<String>,
    items: Vec<Item>,
}

impl Cond {
    /// A fresh sub-group. Wrapped in parentheses when rendered inside
    /// another group with more than one clause of its own.
    pub fn new() -> Self {
        Self::default()
    }

    /// The outermost group of a scope; never parenthesized.
    pub(crate) fn top() -> Self {
        Self {
            top_level: true,
            ..Self::default()
        }
    }

    /// Qualifier prepended to bare field names, rendered as
    /// `` `prefix`.`field` ``. Applies to all structured clauses of this
    /// group, including ones added before the call. Raw fragments are left
    /// untouched.
    pub fn set_table_prefix(&mut self, prefix: impl Into<String>) -> &mut Self {
        self.table_prefix = Some(prefix.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append clause(s) joined to existing content by AND.
    ///
    /// Accepted forms (see [`IntoClauses`]):
    /// - an [`Attrs`] map — one equality clause per key, keys in lexical
    ///   order, all ANDed;
    /// - `(raw_sql, binds...)` — the fragment with each `?` placeholder
    ///   substituted by the escaped, quoted bind value;
    /// - `(field, value)` — `` `field` = 'value' `` when `field` is a bare
    ///   identifier;
    /// - a bare `&str` fragment with no binds.
    ///
    /// # Panics
    ///
    /// Panics when a raw fragment's `?` placeholder count does not match
    /// the number of bind values (programming-contract violation; a
    /// malformed clause is never silently dropped).
    pub fn and_where<A: IntoClauses>(&mut self, args: A) -> &mut Self {
        self.push_clauses(args.into_clauses(), false);
        self
    }

    /// Append clause(s) joined to prior content by OR.
    ///
    /// Same argument forms as [`Cond::and_where`]. On an otherwise-empty
    /// group the first clause simply seeds the filter (no leading
    /// operator). A multi-clause form (map) joins its first clause by OR
    /// and keeps the remaining clauses ANDed, still flat; use
    /// [`Cond::or_group`] for `(… ) OR ( …)` shapes.
    pub fn or_where<A: IntoClauses>(&mut self, args: A) -> &mut Self {
        self.push_clauses(args.into_clauses(), true);
        self
    }

    /// Attach a sub-group joined by AND. Empty groups render to nothing.
    pub fn and_group(&mut self, group: Cond) -> &mut Self {
        self.items.push(Item {
            or: false,
            node: Node::Group(group),
        });
        self
    }

    /// Attach a sub-group joined by OR.
    pub fn or_group(&mut self, group: Cond) -> &mut Self {
        self.items.push(Item {
            or: true,
            node: Node::Group(group),
        });
        self
    }

    /// Internal comparison primitive: `` `field` <op> 'value' ``.
    pub(crate) fn where_op(
        &mut self,
        field: impl Into<String>,
        op: &'static str,
        value: Value,
    ) -> &mut Self {
        self.items.push(Item {
            or: false,
            node: Node::Leaf(Leaf::Op {
                field: field.into(),
                op,
                value,
            }),
        });
        self
    }

    /// IN / NOT IN construction.
    ///
    /// An empty inclusion list renders the constant-false clause `1 = 0`
    /// (never `IN ()`, which is invalid in most dialects). An empty
    /// exclusion list adds no clause: excluding nothing filters nothing.
    /// Non-empty lists are de-duplicated, first occurrence wins.
    pub(crate) fn where_in(
        &mut self,
        field: impl Into<String>,
        negated: bool,
        values: Vec<Value>,
    ) -> &mut Self {
        if values.is_empty() {
            if !negated {
                self.items.push(Item {
                    or: false,
                    node: Node::Leaf(Leaf::AlwaysFalse),
                });
            }
            return self;
        }
        let mut seen = Vec::with_capacity(values.len());
        let mut deduped = Vec::with_capacity(values.len());
        for v in values {
            let key = v.quoted();
            if !seen.contains(&key) {
                seen.push(key);
                deduped.push(v);
            }
        }
        self.items.push(Item {
            or: false,
            node: Node::Leaf(Leaf::In {
                field: field.into(),
                negated,
                values: deduped,
            }),
        });
        self
    }

    fn push_clauses(&mut self, clauses: Vec<Clause>, or: bool) {
        for (i, clause) in clauses.into_iter().enumerate() {
            self.items.push(Item {
                // Only the first clause of a multi-clause form carries the
                // caller's join operator; the rest stay ANDed.
                or: or && i == 0,
                node: Node::Leaf(clause.0),
            });
        }
    }

    fn quote_field(&self, field: &str) -> String {
        match &self.table_prefix {
            Some(prefix) => format!("`{prefix}`.`{field}`"),
            None => format!("`{field}`"),
        }
    }

    fn render_leaf(&self, leaf: &Leaf) -> String {
        match leaf {
            Leaf::Eq { field, value } => {
                format!("{} = {}", self.quote_field(field), value.quoted())
            }
            Leaf::Op { field, op, value } => {
                format!("{} {} {}", self.quote_field(field), op, value.quoted())
            }
            Leaf::In {
                field,
                negated,
                values,
            } => {
                let list = values
                    .iter()
                    .map(Value::quoted)
                    .collect::<Vec<_>>()
                    .join(", ");
                let op = if *negated { "NOT IN" } else { "IN" };
                format!("{} {} ({})", self.quote_field(field), op, list)
            }
            Leaf::Raw(text) => text.clone(),
            Leaf::AlwaysFalse => "1 = 0".to_string(),
        }
    }

    fn render(&self) -> String {
        let mut rendered: Vec<(bool, String)> = Vec::with_capacity(self.items.len());
        for item in &self.items {
            let text = match &item.node {
                Node::Leaf(leaf) => self.render_leaf(leaf),
                Node::Group(group) => group.render(),
            };
            if text.is_empty() {
                // An empty child contributes neither text nor operator.
                continue;
            }
            rendered.push((item.or, text));
        }
        if rendered.is_empty() {
            return String::new();
        }
        let mut out = String::new();
        for (i, (or, text)) in rendered.iter().enumerate() {
            if i > 0 {
                out.push_str(if *or { " OR " } else { " AND " });
            }
            out.push_str(text);
        }
        if !self.top_level && rendered.len() > 1 {
            out = format!("({out})");
        }
        out
    }
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// One fully specified clause produced by argument conversion.
pub struct Clause(Leaf);

/// Conversion from the accepted `and_where`/`or_where` argument forms into
/// clauses. The tuple impls are the typed analog of the original variadic
/// call surface.
pub trait IntoClauses {
    fn into_clauses(self) -> Vec<Clause>;
}

fn is_bare_identifier(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with(|c: char| c.is_ascii_digit())
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Substitute each `?` placeholder with an escaped, quoted bind value.
///
/// Panics on placeholder/bind arity mismatch.
fn splice_raw(raw: &str, binds: &[Value]) -> String {
    let placeholders = raw.matches('?').count();
    assert!(
        placeholders == binds.len(),
        "raw clause {raw:?} has {placeholders} placeholder(s) but {} bind value(s)",
        binds.len()
    );
    let mut out = String::with_capacity(raw.len() + binds.len() * 8);
    let mut parts = raw.split('?');
    if let Some(first) = parts.next() {
        out.push_str(first);
    }
    for (part, bind) in parts.zip(binds) {
        out.push_str(&bind.quoted());
        out.push_str(part);
    }
    out
}

impl IntoClauses for &str {
    fn into_clauses(self) -> Vec<Clause> {
        vec![Clause(Leaf::Raw(splice_raw(self, &[])))]
    }
}

impl IntoClauses for String {
    fn into_clauses(self) -> Vec<Clause> {
        self.as_str().into_clauses()
    }
}

impl<V: Into<Value>> IntoClauses for (&str, V) {
    fn into_clauses(self) -> Vec<Clause> {
        let (target, value) = (self.0, self.1.into());
        if is_bare_identifier(target) {
            vec![Clause(Leaf::Eq {
                field: target.to_string(),
                value,
            })]
        } else {
            vec![Clause(Leaf::Raw(splice_raw(target, &[value])))]
        }
    }
}

impl<A: Into<Value>, B: Into<Value>> IntoClauses for (&str, A, B) {
    fn into_clauses(self) -> Vec<Clause> {
        vec![Clause(Leaf::Raw(splice_raw(
            self.0,
            &[self.1.into(), self.2.into()],
        )))]
    }
}

impl<A: Into<Value>, B: Into<Value>, C: Into<Value>> IntoClauses for (&str, A, B, C) {
    fn into_clauses(self) -> Vec<Clause> {
        vec![Clause(Leaf::Raw(splice_raw(
            self.0,
            &[self.1.into(), self.2.into(), self.3.into()],
        )))]
    }
}

impl IntoClauses for Attrs {
    fn into_clauses(self) -> Vec<Clause> {
        // BTreeMap iteration is already lexical, which keeps map-form
        // rendering stable across repeated calls.
        self.into_iter()
            .map(|(field, value)| Clause(Leaf::Eq { field, value }))
            .collect()
    }
}

impl IntoClauses for &Attrs {
    fn into_clauses(self) -> Vec<Clause> {
        self.iter()
            .map(|(field, value)| {
                Clause(Leaf::Eq {
                    field: field.clone(),
                    value: value.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs;

    #[test]
    fn test_empty_cond_renders_empty_string() {
        let cond = Cond::top();
        assert_eq!(cond.to_string(), "");
        assert_eq!(Cond::new().to_string(), "");
    }

    #[test]
    fn test_rendering_is_idempotent() {
        let mut cond = Cond::top();
        cond.and_where(("id", 1)).or_where(("name", "aaa"));
        let first = cond.to_string();
        assert_eq!(cond.to_string(), first);
    }

    #[test]
    fn test_pair_form_equality() {
        let mut cond = Cond::top();
        cond.and_where(("deleted_at", 0));
        assert_eq!(cond.to_string(), "`deleted_at` = '0'");
    }

    #[test]
    fn test_or_where_round_trip() {
        // Top-level group, so no parentheses.
        let mut cond = Cond::top();
        cond.or_where(("id", 1)).or_where(("name", "aaa"));
        assert_eq!(cond.to_string(), "`id` = '1' OR `name` = 'aaa'");
    }

    #[test]
    fn test_map_form_sorted_and_stable() {
        let attrs = attrs! { "zeta" => 1, "alpha" => 2, "mid" => 3 };
        let mut a = Cond::top();
        a.and_where(attrs.clone());
        let mut b = Cond::top();
        b.and_where(attrs);
        assert_eq!(
            a.to_string(),
            "`alpha` = '2' AND `mid` = '3' AND `zeta` = '1'"
        );
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_raw_form_with_binds() {
        let mut cond = Cond::top();
        cond.and_where(("`age` >= ? AND `age` < ?", 18, 65));
        assert_eq!(cond.to_string(), "`age` >= '18' AND `age` < '65'");
    }

    #[test]
    fn test_raw_form_with_three_binds() {
        let mut cond = Cond::top();
        cond.and_where(("`a` = ? OR `b` = ? OR `c` = ?", 1, "two", 3));
        assert_eq!(cond.to_string(), "`a` = '1' OR `b` = 'two' OR `c` = '3'");
    }

    #[test]
    fn test_raw_bind_values_are_escaped() {
        let mut cond = Cond::top();
        cond.and_where(("`name` = ?", "a'b"));
        assert_eq!(cond.to_string(), "`name` = 'a\\'b'");
    }

    #[test]
    #[should_panic(expected = "placeholder")]
    fn test_raw_bind_arity_mismatch_panics() {
        let mut cond = Cond::top();
        cond.and_where(("`a` = ? AND `b` = ?", 1));
    }

    #[test]
    fn test_mixed_where_or_where_stays_flat() {
        let mut cond = Cond::top();
        cond.and_where(("a", 1))
            .or_where(("b", 2))
            .and_where(("c", 3));
        assert_eq!(
            cond.to_string(),
            "`a` = '1' OR `b` = '2' AND `c` = '3'"
        );
    }

    #[test]
    fn test_sub_groups_for_explicit_precedence() {
        let mut left = Cond::new();
        left.and_where(("a", 1)).and_where(("b", 2));
        let mut right = Cond::new();
        right.and_where(("c", 3)).and_where(("d", 4));
        let mut cond = Cond::top();
        cond.and_group(left).or_group(right);
        assert_eq!(
            cond.to_string(),
            "(`a` = '1' AND `b` = '2') OR (`c` = '3' AND `d` = '4')"
        );
    }

    #[test]
    fn test_single_clause_sub_group_not_wrapped() {
        let mut inner = Cond::new();
        inner.and_where(("a", 1));
        let mut cond = Cond::top();
        cond.and_where(("b", 2)).and_group(inner);
        assert_eq!(cond.to_string(), "`b` = '2' AND `a` = '1'");
    }

    #[test]
    fn test_empty_sub_group_injects_no_operator() {
        let mut cond = Cond::top();
        cond.and_where(("a", 1)).or_group(Cond::new());
        assert_eq!(cond.to_string(), "`a` = '1'");

        let mut leading = Cond::top();
        leading.and_group(Cond::new()).and_where(("a", 1));
        assert_eq!(leading.to_string(), "`a` = '1'");
    }

    #[test]
    fn test_where_in_dedup_and_render() {
        let mut cond = Cond::top();
        cond.where_in(
            "status",
            false,
            vec![Value::from(1), Value::from(2), Value::from(1)],
        );
        assert_eq!(cond.to_string(), "`status` IN ('1', '2')");
    }

    #[test]
    fn test_where_in_empty_renders_always_false() {
        let mut cond = Cond::top();
        cond.where_in("status", false, vec![]);
        assert_eq!(cond.to_string(), "1 = 0");
    }

    #[test]
    fn test_where_not_in_empty_is_noop() {
        let mut cond = Cond::top();
        cond.and_where(("a", 1));
        let before = cond.to_string();
        cond.where_in("status", true, vec![]);
        assert_eq!(cond.to_string(), before);
    }

    #[test]
    fn test_where_not_in_renders() {
        let mut cond = Cond::top();
        cond.where_in("status", true, vec![Value::from("x"), Value::from("y")]);
        assert_eq!(cond.to_string(), "`status` NOT IN ('x', 'y')");
    }

    #[test]
    fn test_table_prefix_applies_to_earlier_clauses() {
        let mut cond = Cond::top();
        cond.and_where(("id", 7));
        cond.set_table_prefix("u");
        assert_eq!(cond.to_string(), "`u`.`id` = '7'");
    }

    #[test]
    fn test_table_prefix_leaves_raw_untouched() {
        let mut cond = Cond::top();
        cond.set_table_prefix("u");
        cond.and_where(("`id` < ?", 10));
        assert_eq!(cond.to_string(), "`id` < '10'");
    }

    #[test]
    fn test_where_op_primitive() {
        let mut cond = Cond::top();
        cond.where_op("age", "<", Value::from(30));
        assert_eq!(cond.to_string(), "`age` < '30'");
    }

    #[test]
    fn test_bare_raw_fragment() {
        let mut cond = Cond::top();
        cond.and_where("`deleted_at` = 0");
        assert_eq!(cond.to_string(), "`deleted_at` = 0");
    }
}
