use std::{error, fmt};

/// Type-name template parse errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    UnbalancedAngleBrackets,
    EmptyName,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::UnbalancedAngleBrackets => "unbalanced angle brackets in type name",
            Self::EmptyName => "empty type name",
        })
    }
}

impl error::Error for Error {}

/// One piece of the reconstruction pattern of a template: either literal
/// text or a hole for the n-th template argument.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FmtPiece {
    Text(String),
    Arg(usize),
}

/// A parsed C++ qualified type name, e.g. `Ns::Foo<A, B *>`.
///
/// Template arguments are parsed recursively; a free `*` token becomes a
/// wildcard leaf. Only leaves may be wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeNameTemplate {
    /// Name prefix up to the template argument list
    pub name: String,
    /// Parsed template arguments, in order
    pub args: Vec<TypeNameTemplate>,
    /// Whether this node is a free `*` wildcard
    pub is_wildcard: bool,
    fmt: Vec<FmtPiece>,
}

impl TypeNameTemplate {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::EmptyName);
        }
        if raw == "*" {
            return Ok(Self::wildcard());
        }

        let Some(open) = raw.find('<') else {
            return Ok(Self {
                name: raw.to_string(),
                args: Vec::new(),
                is_wildcard: false,
                fmt: vec![FmtPiece::Text(raw.to_string())],
            });
        };

        let name = raw[..open].trim_end().to_string();
        if name.is_empty() {
            return Err(Error::EmptyName);
        }
        let close = find_matching_angle(raw, open)?;
        let args_text = &raw[open + 1..close];
        let suffix = &raw[close + 1..];

        let mut args = Vec::new();
        let mut fmt = vec![FmtPiece::Text(format!("{name}<"))];
        for (index, arg_text) in split_top_level_args(args_text).into_iter().enumerate() {
            if index > 0 {
                fmt.push(FmtPiece::Text(",".to_string()));
            }
            fmt.push(FmtPiece::Arg(index));
            args.push(Self::parse(arg_text)?);
        }
        fmt.push(FmtPiece::Text(format!(">{suffix}")));
        Ok(Self {
            name,
            args,
            is_wildcard: false,
            fmt,
        })
    }

    #[must_use]
    pub fn wildcard() -> Self {
        Self {
            name: "*".to_string(),
            args: Vec::new(),
            is_wildcard: true,
            fmt: vec![FmtPiece::Text("*".to_string())],
        }
    }

    /// Whether any leaf of this tree is a wildcard.
    #[must_use]
    pub fn has_wildcard(&self) -> bool {
        self.is_wildcard || self.args.iter().any(Self::has_wildcard)
    }

    /// Storage bucket key: everything up to the first `<`, or the whole name.
    #[must_use]
    pub fn storage_key(&self) -> &str {
        match self.name.find('<') {
            Some(idx) => &self.name[..idx],
            None => &self.name,
        }
    }

    /// Match `other` against this template. A wildcard leaf matches any
    /// subtree; non-wildcard nodes require equal names and pairwise-matching
    /// argument lists.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        self.match_into(other, &mut Vec::new())
    }

    /// Like [`Self::matches`], additionally returning the subtrees captured
    /// by wildcard leaves, in order.
    #[must_use]
    pub fn match_captures(&self, other: &Self) -> Option<Vec<TypeNameTemplate>> {
        let mut captures = Vec::new();
        self.match_into(other, &mut captures).then_some(captures)
    }

    fn match_into(&self, other: &Self, captures: &mut Vec<TypeNameTemplate>) -> bool {
        if self.is_wildcard {
            captures.push(other.clone());
            return true;
        }
        if self.name != other.name || self.args.len() != other.args.len() {
            return false;
        }
        if self.suffix_text() != other.suffix_text() {
            return false;
        }
        self.args
            .iter()
            .zip(&other.args)
            .all(|(own, theirs)| own.match_into(theirs, captures))
    }

    fn suffix_text(&self) -> &str {
        match self.fmt.last() {
            Some(FmtPiece::Text(text)) if !self.args.is_empty() => text,
            _ => "",
        }
    }

    /// Render a regex matching every concrete instantiation of this
    /// template; wildcard leaves become capture groups.
    #[must_use]
    pub fn build_regex(&self) -> String {
        if self.is_wildcard {
            return "(.*)".to_string();
        }
        if self.args.is_empty() {
            return regex::escape(&self.name);
        }
        let mut out = String::new();
        for piece in &self.fmt {
            match piece {
                FmtPiece::Text(text) => out.push_str(&regex::escape(text)),
                FmtPiece::Arg(index) => out.push_str(&self.args[*index].build_regex()),
            }
        }
        out
    }
}

impl fmt::Display for TypeNameTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for piece in &self.fmt {
            match piece {
                FmtPiece::Text(text) => f.write_str(text)?,
                FmtPiece::Arg(index) => fmt::Display::fmt(&self.args[*index], f)?,
            }
        }
        Ok(())
    }
}

fn find_matching_angle(raw: &str, open: usize) -> Result<usize, Error> {
    let mut depth = 0usize;
    for (offset, ch) in raw[open..].char_indices() {
        match ch {
            '<' => depth += 1,
            '>' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(open + offset);
                }
            }
            _ => {}
        }
    }
    Err(Error::UnbalancedAngleBrackets)
}

fn split_top_level_args(args_text: &str) -> Vec<&str> {
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (index, ch) in args_text.char_indices() {
        match ch {
            '<' | '(' | '[' => depth += 1,
            '>' | ')' | ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                args.push(args_text[start..index].trim());
                start = index + 1;
            }
            _ => {}
        }
    }
    let last = args_text[start..].trim();
    if !last.is_empty() || !args.is_empty() {
        args.push(last);
    }
    args
}
