use std::sync::LazyLock;

use regex::Regex;

const IDENT_PATTERN: &str = r"[A-Za-z_$][\w$]*";
const SUBSCRIPT_PATTERN: &str = r"\[\d+\]";

static IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^{IDENT_PATTERN}$")).unwrap());
// Expression like that: foo->bar[1][0].baz
static TRIVIAL_EXPR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        "^{IDENT_PATTERN}(?:{SUBSCRIPT_PATTERN})*(?:(?:\\.|->){IDENT_PATTERN}(?:{SUBSCRIPT_PATTERN})*)*$"
    ))
    .unwrap()
});
static ARRAY_ACCESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!("^{SUBSCRIPT_PATTERN}$")).unwrap());
static LAMBDA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<lambda_[0-9a-f]{32}>").unwrap());
static FUNC_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_$][\w$]*\s*\(").unwrap());
static WILDCARD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$T([1-9][0-9]*)").unwrap());

const SPECIFIERS_CV: [&str; 2] = ["const", "volatile"];
const SPECIFIERS_TYPE_CLASS: [&str; 4] = ["class", "struct", "union", "enum"];

#[must_use]
pub fn is_identifier(expr: &str) -> bool {
    IDENT.is_match(expr)
}

#[must_use]
pub fn is_trivial_expression(expr: &str) -> bool {
    TRIVIAL_EXPR.is_match(expr)
}

#[must_use]
pub fn is_array_access_expr(expr: &str) -> bool {
    ARRAY_ACCESS.is_match(expr)
}

#[must_use]
pub fn is_literal_expr(expr: &str) -> bool {
    if expr.is_empty() {
        return false;
    }
    if expr == "true" || expr == "false" {
        return true;
    }
    let digits = expr.strip_prefix(['-', '+']).unwrap_or(expr);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

#[must_use]
pub fn has_lambda_in_type_expr(type_expr: &str) -> bool {
    LAMBDA.is_match(type_expr)
}

/// Strip `//…` and `/*…*/` comments while respecting string literals.
/// `#pragma` fragments are kept on their own line.
#[must_use]
pub fn remove_cpp_comments(code: &str) -> String {
    let bytes = code.as_bytes();
    let code_len = bytes.len();
    let mut comment_pos = Vec::new();
    let mut in_string = false;
    let mut i = 0;
    while i < code_len {
        let ch = bytes[i];
        if !in_string && ch == b'/' && i + 1 < code_len {
            let comment_end_seq: Option<&str> = match bytes[i + 1] {
                b'/' => Some("\n"),
                b'*' => Some("*/"),
                _ => None,
            };
            if let Some(end_seq) = comment_end_seq {
                let comment_end = match code[i + 2..].find(end_seq) {
                    Some(pos) => i + 2 + pos + end_seq.len(),
                    None => code_len,
                };
                comment_pos.push((i, comment_end));
                i = comment_end;
                continue;
            }
        }
        if ch == b'"' {
            in_string = !in_string;
        }
        i += 1;
    }

    if comment_pos.is_empty() {
        return code.to_string();
    }

    let mut pieces = Vec::new();
    let mut code_pos = 0;
    for (comment_start, comment_end) in comment_pos {
        if code_pos < comment_start {
            pieces.push(code[code_pos..comment_start].trim());
        }
        code_pos = comment_end;
    }
    if code_pos < code_len {
        pieces.push(code[code_pos..].trim());
    }
    pieces
        .into_iter()
        .map(|piece| {
            if piece.starts_with("#pragma") {
                format!("\n{piece}\n")
            } else {
                piece.to_string()
            }
        })
        .collect()
}

/// `true` iff `s` starts with `(`, ends with `)` and the parenthesis count
/// never dips below zero in between (outside of string literals).
#[must_use]
pub fn is_outer_parentheses_balanced(s: &str) -> bool {
    if !s.starts_with('(') || !s.ends_with(')') || s.len() < 2 {
        return false;
    }
    let mut counter = 0i32;
    let mut in_string = false;
    for ch in s[1..s.len() - 1].bytes() {
        if ch == b'"' {
            in_string = !in_string;
        } else if !in_string {
            match ch {
                b'(' => counter += 1,
                b')' => {
                    counter -= 1;
                    if counter < 0 {
                        // closing parenthesis without a matching opening one
                        return false;
                    }
                }
                _ => {}
            }
        }
    }
    counter == 0 && !in_string
}

/// Repeatedly strip balanced outer parentheses.
#[must_use]
pub fn try_remove_outer_parentheses(s: &str) -> &str {
    let mut s = s.trim();
    while is_outer_parentheses_balanced(s) {
        s = s[1..s.len() - 1].trim();
    }
    s.trim()
}

/// `(*(&(X)))` -> `(X)` when each layer is balanced.
#[must_use]
pub fn try_merge_deref_and_address_of(s: &str) -> &str {
    if !s.starts_with("(*(&(") || !s.ends_with(")))") {
        return s;
    }
    if !is_outer_parentheses_balanced(s) {
        return s;
    }
    // (*(&(<expr>))) -> (&(<expr>))
    let no_deref = &s[2..s.len() - 1];
    if !is_outer_parentheses_balanced(no_deref) {
        return s;
    }
    // (&(<expr>)) -> (<expr>)
    let no_address_of = &no_deref[2..no_deref.len() - 1];
    if !is_outer_parentheses_balanced(no_address_of) {
        return s;
    }
    no_address_of
}

/// Split a leading `*` or `&` off a trivial expression, e.g.
/// `&(m_ptr)` -> `('&', "m_ptr")`.
#[must_use]
pub fn cut_deref_or_address_of_from_trivial(expr: &str) -> Option<(char, &str)> {
    let expr = expr.trim();
    let specifier = expr.chars().next()?;
    if specifier != '*' && specifier != '&' {
        return None;
    }
    let sub_expr = try_remove_outer_parentheses(&expr[1..]);
    is_trivial_expression(sub_expr).then_some((specifier, sub_expr))
}

#[must_use]
pub fn simplify_cpp_expression(expr: &str) -> String {
    let expr = remove_cpp_comments(expr.trim());
    try_remove_outer_parentheses(&expr).to_string()
}

/// Insert `class|struct|union|enum` before the type name, preserving any
/// leading cv-qualifiers. A type that already carries a class-kind
/// specifier is returned unchanged.
#[must_use]
pub fn insert_type_class_specifier(type_expr: &str, type_class_specifier: &str) -> String {
    if !SPECIFIERS_TYPE_CLASS.contains(&type_class_specifier) {
        return type_expr.to_string();
    }
    let type_expr = type_expr.trim_start();
    let mut kept_cv = Vec::new();
    let mut rest = type_expr;
    loop {
        let word_end = rest.find(char::is_whitespace);
        let word = match word_end {
            Some(end) => &rest[..end],
            None => rest,
        };
        if SPECIFIERS_TYPE_CLASS.contains(&word) {
            return type_expr.to_string();
        }
        if SPECIFIERS_CV.contains(&word) {
            kept_cv.push(word);
            rest = match word_end {
                Some(end) => rest[end..].trim_start(),
                None => {
                    // trailing cv-qualifier with no type tail
                    kept_cv.push(type_class_specifier);
                    return kept_cv.join(" ");
                }
            };
            continue;
        }
        break;
    }
    kept_cv.push(type_class_specifier);
    kept_cv.push(rest);
    kept_cv.join(" ")
}

/// Remove a single leading `class|struct|union|enum` specifier.
#[must_use]
pub fn remove_type_class_specifier(type_expr: &str) -> &str {
    let type_expr = type_expr.trim_start();
    for specifier in SPECIFIERS_TYPE_CLASS {
        if let Some(tail) = type_expr.strip_prefix(specifier) {
            if tail.starts_with(char::is_whitespace) {
                return tail.trim_start();
            }
        }
    }
    type_expr
}

/// A `name(args…)` occurrence found inside an expression.
#[derive(Debug)]
pub struct FunctionCall<'expr> {
    pub base_name: &'expr str,
    pub args: Vec<String>,
    pub args_begin_pos: usize,
    pub args_end_pos: usize,
}

/// Find the next function call at or after `search_start`. Member calls
/// (preceded by `.` or `->`) are skipped.
#[must_use]
pub fn search_function_call(expr: &str, search_start: usize) -> Option<FunctionCall<'_>> {
    let mut pos = search_start;
    while pos < expr.len() {
        let m = FUNC_NAME.find_at(expr, pos)?;
        let start = m.start();
        let preceded_by_member_access = expr[..start].ends_with('.')
            || expr[..start].ends_with("->")
            || expr[..start]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$');
        if preceded_by_member_access {
            pos = m.end();
            continue;
        }
        let name_end = m.as_str().find(['(', ' ', '\t', '\n', '\r']).unwrap_or(0);
        let base_name = &expr[start..start + name_end];
        let args_begin_pos = m.end();
        let (args, args_end_pos) = parse_call_args(expr, args_begin_pos);
        return Some(FunctionCall {
            base_name,
            args,
            args_begin_pos,
            args_end_pos,
        });
    }
    None
}

/// Collect comma-separated argument slices starting right after an opening
/// `(`, skipping strings, char literals, comments and nested brackets.
/// Returns the arguments and the position just past the closing bracket.
#[must_use]
pub fn parse_call_args(expr: &str, pos: usize) -> (Vec<String>, usize) {
    let mut parser = ArgsParser {
        expr: expr.as_bytes(),
        source: expr,
        pos,
    };
    parser.parse_args(Some(b')'))
}

struct ArgsParser<'expr> {
    expr: &'expr [u8],
    source: &'expr str,
    pos: usize,
}

impl ArgsParser<'_> {
    fn peek(&self, offset: usize) -> Option<u8> {
        self.expr.get(self.pos + offset).copied()
    }

    fn parse_args(&mut self, exit_sym: Option<u8>) -> (Vec<String>, usize) {
        let mut args = Vec::new();
        let mut arg_start: Option<usize> = None;

        while self.pos < self.expr.len() {
            let current = self.expr[self.pos];
            match current {
                b'"' => {
                    arg_start.get_or_insert(self.pos);
                    self.skip_string();
                }
                b'/' if self.peek(1) == Some(b'*') => self.skip_comment(),
                b'\'' => self.skip_char_literal(),
                b'(' => {
                    arg_start.get_or_insert(self.pos);
                    self.pos += 1;
                    self.parse_args(Some(b')'));
                }
                b')' if exit_sym == Some(b')') => {
                    if let Some(start) = arg_start {
                        args.push(self.source[start..self.pos].to_string());
                    }
                    self.pos += 1;
                    break;
                }
                b',' => {
                    match arg_start.take() {
                        Some(start) => args.push(self.source[start..self.pos].to_string()),
                        None => args.push(String::new()),
                    }
                    self.pos += 1;
                }
                b'{' => {
                    arg_start.get_or_insert(self.pos);
                    self.pos += 1;
                    self.parse_args(Some(b'}'));
                }
                b'[' => {
                    arg_start.get_or_insert(self.pos);
                    self.pos += 1;
                    self.parse_args(Some(b']'));
                }
                b']' | b'}' if exit_sym == Some(current) => {
                    self.pos += 1;
                    break;
                }
                c if c.is_ascii_whitespace() => self.pos += 1,
                _ => {
                    arg_start.get_or_insert(self.pos);
                    self.pos += 1;
                }
            }
        }
        (args, self.pos)
    }

    fn skip_string(&mut self) {
        self.pos += 1;
        while self.pos < self.expr.len() && self.expr[self.pos] != b'"' {
            if self.expr[self.pos] == b'\\' {
                self.pos += 1;
            }
            self.pos += 1;
        }
        self.pos += 1;
    }

    fn skip_comment(&mut self) {
        self.pos += 2;
        while self.pos + 1 < self.expr.len()
            && !(self.expr[self.pos] == b'*' && self.expr[self.pos + 1] == b'/')
        {
            self.pos += 1;
        }
        self.pos = (self.pos + 2).min(self.expr.len());
    }

    fn skip_char_literal(&mut self) {
        self.pos += 1;
    }
}

/// Replace every `$Tn` (n >= 1) with `repl(n - 1)`. A `None` replacement
/// leaves the wildcard verbatim and clears the all-substituted flag. When a
/// substitution ends in `>` right before another `>`, a space is inserted.
pub fn substitute_wildcards(
    expr: &str,
    mut repl: impl FnMut(usize) -> Option<String>,
) -> (String, bool) {
    let mut out = String::with_capacity(expr.len());
    let mut all_substituted = true;
    let mut i = 0;
    while i < expr.len() {
        let Some(caps) = WILDCARD.captures_at(expr, i) else {
            out.push_str(&expr[i..]);
            break;
        };
        let m = caps.get(0).unwrap();
        out.push_str(&expr[i..m.start()]);
        let wildcard_idx: usize = caps[1].parse::<usize>().unwrap() - 1;
        let replacement = match repl(wildcard_idx) {
            Some(replacement) => replacement,
            None => {
                all_substituted = false;
                m.as_str().to_string()
            }
        };
        out.push_str(&replacement);
        i = m.end();
        if replacement.ends_with('>') && expr[i..].starts_with('>') {
            // write extra space between >>
            out.push(' ');
        }
    }
    (out, all_substituted)
}

/// Substitute `$Tn` from a captured wildcard list; out-of-range indexes are
/// left in place.
pub fn resolve_wildcards_checked(expr: &str, wildcards: &[String]) -> (String, bool) {
    substitute_wildcards(expr, |index| wildcards.get(index).cloned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expression_classification() {
        assert!(is_identifier("_foo$1"));
        assert!(!is_identifier("foo.bar"));
        assert!(is_trivial_expression("foo->bar[1][0].baz"));
        assert!(is_trivial_expression("m_data"));
        assert!(!is_trivial_expression("a + b"));
        assert!(!is_trivial_expression("f()"));
        assert!(is_array_access_expr("[42]"));
        assert!(!is_array_access_expr("[i]"));
        assert!(is_literal_expr("-15"));
        assert!(is_literal_expr("true"));
        assert!(!is_literal_expr("0x10"));
        assert!(has_lambda_in_type_expr(
            "Outer<<lambda_0123456789abcdef0123456789abcdef>>"
        ));
    }

    #[test]
    fn test_remove_cpp_comments() {
        assert_eq!(remove_cpp_comments("a /* b */ c"), "ac");
        assert_eq!(remove_cpp_comments("a // line\nb"), "ab");
        assert_eq!(remove_cpp_comments("\"/* not */\""), "\"/* not */\"");
        assert_eq!(remove_cpp_comments("x /* open"), "x");
        assert!(remove_cpp_comments("/*c*/ #pragma pack\n x").contains("\n#pragma pack"));
    }

    #[test]
    fn test_parentheses() {
        assert!(is_outer_parentheses_balanced("(a(b)c)"));
        assert!(!is_outer_parentheses_balanced("(a)(b)"));
        assert!(!is_outer_parentheses_balanced("(a))"));
        assert_eq!(try_remove_outer_parentheses("((x))"), "x");
        assert_eq!(try_remove_outer_parentheses("(a)(b)"), "(a)(b)");
        // idempotent
        let once = try_remove_outer_parentheses("(( a + b ))");
        assert_eq!(try_remove_outer_parentheses(once), once);
    }

    #[test]
    fn test_merge_deref_and_address_of() {
        assert_eq!(try_merge_deref_and_address_of("(*(&(x.y)))"), "(x.y)");
        assert_eq!(try_merge_deref_and_address_of("(*(&(a))(b))"), "(*(&(a))(b))");
        assert_eq!(try_merge_deref_and_address_of("(x)"), "(x)");
    }

    #[test]
    fn test_cut_deref_or_address_of() {
        assert_eq!(
            cut_deref_or_address_of_from_trivial("&(m_ptr)"),
            Some(('&', "m_ptr"))
        );
        assert_eq!(
            cut_deref_or_address_of_from_trivial("*head->next"),
            Some(('*', "head->next"))
        );
        assert_eq!(cut_deref_or_address_of_from_trivial("&(a + b)"), None);
        assert_eq!(cut_deref_or_address_of_from_trivial("m_ptr"), None);
    }

    #[test]
    fn test_type_class_specifier() {
        assert_eq!(insert_type_class_specifier("X", "struct"), "struct X");
        assert_eq!(
            insert_type_class_specifier("const X", "class"),
            "const class X"
        );
        assert_eq!(insert_type_class_specifier("struct X", "struct"), "struct X");
        assert_eq!(remove_type_class_specifier("struct X"), "X");
        assert_eq!(remove_type_class_specifier("structX"), "structX");
        // round-trip
        assert_eq!(
            insert_type_class_specifier(remove_type_class_specifier("struct X"), "struct"),
            "struct X"
        );
    }

    #[test]
    fn test_search_function_call() {
        let call = search_function_call("1 + size(a, b) + x.method(c)", 0).unwrap();
        assert_eq!(call.base_name, "size");
        assert_eq!(call.args, ["a", "b"]);
        assert!(search_function_call("x.method(c)", 0).is_none());
        assert!(search_function_call("p->get(c)", 0).is_none());
    }

    #[test]
    fn test_parse_call_args() {
        let (args, end) = parse_call_args("f(a, g(b, c), \"x,y\")rest", 2);
        assert_eq!(args, ["a", "g(b, c)", "\"x,y\""]);
        assert_eq!(&"f(a, g(b, c), \"x,y\")rest"[end..], "rest");
        let (args, _) = parse_call_args("f(a,,b)", 2);
        assert_eq!(args, ["a", "", "b"]);
    }

    #[test]
    fn test_substitute_wildcards() {
        let wildcards = vec!["int".to_string(), "std::vector<int>".to_string()];
        let (resolved, all) = resolve_wildcards_checked("std::map<$T1, $T2>", &wildcards);
        assert_eq!(resolved, "std::map<int, std::vector<int> >");
        assert!(all);

        let (resolved, all) = resolve_wildcards_checked("$T3", &wildcards);
        assert_eq!(resolved, "$T3");
        assert!(!all);

        // idempotent when replacements carry no wildcards
        let (once, _) = resolve_wildcards_checked("pair<$T1,$T2>", &wildcards);
        let (twice, _) = resolve_wildcards_checked(&once, &wildcards);
        assert_eq!(once, twice);
    }
}
