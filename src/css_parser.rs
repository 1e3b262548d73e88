use std::collections::HashMap;

use crate::errors::{Error, Result};
use crate::selector::Selector;

/// One cascaded rule: a selector and its declarations. `!important`
/// declarations are split into their own rule wrapped in
/// `Selector::Important` at parse time.
#[derive(Debug, Clone)]
pub struct Rule {
    pub selector: Selector,
    pub declarations: HashMap<String, String>,
}

impl Rule {
    pub fn priority(&self) -> i32 {
        self.selector.priority()
    }
}

const BORDER_STYLES: [&str; 10] = [
    "none", "hidden", "dotted", "dashed", "solid", "double", "groove", "ridge", "inset", "outset",
];

/// Tolerant recursive-descent CSS parser. Errors inside a rule skip to the
/// next `}`, errors inside a declaration to the next `;`; the rest of the
/// sheet still parses.
pub struct CssParser {
    chars: Vec<char>,
    i: usize,
}

impl CssParser {
    pub fn new(style: &str) -> Self {
        CssParser { chars: style.chars().collect(), i: 0 }
    }

    /// Parses a whole stylesheet.
    pub fn parse(&mut self) -> Vec<Rule> {
        let mut rules = Vec::new();
        loop {
            self.whitespace();
            if self.eof() {
                break;
            }
            match self.rule() {
                Ok(mut parsed) => rules.append(&mut parsed),
                Err(_) => {
                    self.skip_until(&['}']);
                    self.advance_if('}');
                }
            }
        }
        rules
    }

    /// Parses a standalone selector string (querySelectorAll).
    pub fn parse_selector(selector: &str) -> Result<Selector> {
        CssParser::new(selector).selector()
    }

    /// Parses an inline `style="…"` attribute body. Importance is
    /// meaningless there (inline already wins), so both halves merge.
    pub fn parse_inline(style: &str) -> HashMap<String, String> {
        let mut parser = CssParser::new(style);
        let (mut normal, important) = parser.body();
        normal.extend(important);
        normal
    }

    fn rule(&mut self) -> Result<Vec<Rule>> {
        let selector = self.selector()?;
        self.literal('{')?;
        let (normal, important) = self.body();
        self.whitespace();
        if !self.eof() {
            self.literal('}')?;
        }
        let mut rules = Vec::new();
        if !normal.is_empty() {
            rules.push(Rule { selector: selector.clone(), declarations: normal });
        }
        if !important.is_empty() {
            rules.push(Rule {
                selector: Selector::Important(Box::new(selector)),
                declarations: important,
            });
        }
        Ok(rules)
    }

    /// Declaration block up to (not including) `}`. Returns the normal and
    /// the `!important` halves separately.
    fn body(&mut self) -> (HashMap<String, String>, HashMap<String, String>) {
        let mut normal = HashMap::new();
        let mut important = HashMap::new();
        loop {
            self.whitespace();
            if self.eof() || self.peek() == Some('}') {
                break;
            }
            match self.pair() {
                Ok((prop, value)) => {
                    let (value, is_important) = match value.strip_suffix("!important") {
                        Some(rest) => (rest.trim_end().to_string(), true),
                        None => (value, false),
                    };
                    let target = if is_important { &mut important } else { &mut normal };
                    expand_declaration(target, &prop, &value);
                    self.whitespace();
                    self.advance_if(';');
                }
                Err(_) => {
                    self.skip_until(&[';', '}']);
                    self.advance_if(';');
                }
            }
        }
        (normal, important)
    }

    fn pair(&mut self) -> Result<(String, String)> {
        let prop = self.word("#-.%!")?;
        self.whitespace();
        self.literal(':')?;
        let mut words = Vec::new();
        loop {
            self.whitespace();
            match self.peek() {
                None | Some(';') | Some('}') => break,
                _ => words.push(self.word("#-.%!")?),
            }
        }
        if words.is_empty() {
            return Err(Error::Protocol("empty declaration value".into()));
        }
        Ok((prop.to_lowercase(), words.join(" ")))
    }

    /// Selector production up to `{`. Whitespace is the descendant
    /// combinator, commas build an `Or` group.
    fn selector(&mut self) -> Result<Selector> {
        let mut branches: Vec<Selector> = Vec::new();
        let mut current: Option<Selector> = None;
        loop {
            self.whitespace();
            match self.peek() {
                None | Some('{') => break,
                Some(',') => {
                    self.i += 1;
                    let done = current
                        .take()
                        .ok_or_else(|| Error::Protocol("empty selector branch".into()))?;
                    branches.push(done);
                }
                _ => {
                    let word = self.word("#-.%():")?;
                    let simple = compound_selector(&word)?;
                    current = Some(match current.take() {
                        None => simple,
                        Some(prev) => Selector::Descendant {
                            ancestor: Box::new(prev),
                            descendant: Box::new(simple),
                        },
                    });
                }
            }
        }
        let last = current.ok_or_else(|| Error::Protocol("empty selector".into()))?;
        if branches.is_empty() {
            Ok(last)
        } else {
            branches.push(last);
            Ok(Selector::Or(branches))
        }
    }

    fn whitespace(&mut self) {
        loop {
            while self.peek().is_some_and(|c| c.is_whitespace()) {
                self.i += 1;
            }
            // Comments count as whitespace.
            if self.peek() == Some('/') && self.chars.get(self.i + 1) == Some(&'*') {
                self.i += 2;
                while !self.eof() {
                    if self.peek() == Some('*') && self.chars.get(self.i + 1) == Some(&'/') {
                        self.i += 2;
                        break;
                    }
                    self.i += 1;
                }
            } else {
                break;
            }
        }
    }

    fn word(&mut self, extra: &str) -> Result<String> {
        let start = self.i;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || extra.contains(c) {
                self.i += 1;
            } else {
                break;
            }
        }
        if self.i == start {
            return Err(Error::Protocol(format!("expected word at {}", self.i)));
        }
        Ok(self.chars[start..self.i].iter().collect())
    }

    fn literal(&mut self, expected: char) -> Result<()> {
        if self.peek() == Some(expected) {
            self.i += 1;
            Ok(())
        } else {
            Err(Error::Protocol(format!("expected {expected:?} at {}", self.i)))
        }
    }

    fn skip_until(&mut self, stops: &[char]) {
        while let Some(c) = self.peek() {
            if stops.contains(&c) {
                break;
            }
            self.i += 1;
        }
    }

    fn advance_if(&mut self, c: char) {
        if self.peek() == Some(c) {
            self.i += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.i).copied()
    }

    fn eof(&self) -> bool {
        self.i >= self.chars.len()
    }
}

/// Parses one compound token like `a.red:visited` or `ul:has(li)` into a
/// selector. Pseudo-classes wrap whatever precedes them.
fn compound_selector(word: &str) -> Result<Selector> {
    let chars: Vec<char> = word.chars().collect();
    let mut i = 0;
    let mut current: Option<Selector> = None;

    let push_unit = |current: &mut Option<Selector>, unit: Selector| {
        *current = Some(match current.take() {
            None => unit,
            Some(Selector::Sequence(mut parts)) => {
                parts.push(unit);
                Selector::Sequence(parts)
            }
            Some(prev) => Selector::Sequence(vec![prev, unit]),
        });
    };

    while i < chars.len() {
        match chars[i] {
            '.' => {
                i += 1;
                let name = take_name(&chars, &mut i)?;
                push_unit(&mut current, Selector::Class(name));
            }
            ':' => {
                i += 1;
                let name = take_name(&chars, &mut i)?;
                let base = current
                    .take()
                    .ok_or_else(|| Error::Protocol(format!("pseudo-class without base: {word}")))?;
                match name.as_str() {
                    "visited" => current = Some(Selector::Visited(Box::new(base))),
                    "has" => {
                        if chars.get(i) != Some(&'(') {
                            return Err(Error::Protocol(format!("expected ( in {word}")));
                        }
                        i += 1;
                        let mut inner = String::new();
                        while i < chars.len() && chars[i] != ')' {
                            inner.push(chars[i]);
                            i += 1;
                        }
                        if chars.get(i) != Some(&')') {
                            return Err(Error::Protocol(format!("unclosed :has in {word}")));
                        }
                        i += 1;
                        let inner = compound_selector(inner.trim())?;
                        current = Some(Selector::Has {
                            base: Box::new(base),
                            inner: Box::new(inner),
                        });
                    }
                    other => {
                        return Err(Error::Protocol(format!("unknown pseudo-class :{other}")))
                    }
                }
            }
            _ => {
                let name = take_name(&chars, &mut i)?;
                push_unit(&mut current, Selector::Tag(name.to_lowercase()));
            }
        }
    }
    current.ok_or_else(|| Error::Protocol("empty selector token".into()))
}

fn take_name(chars: &[char], i: &mut usize) -> Result<String> {
    let start = *i;
    while *i < chars.len() && (chars[*i].is_alphanumeric() || chars[*i] == '-' || chars[*i] == '_')
    {
        *i += 1;
    }
    if *i == start {
        return Err(Error::Protocol("expected name".into()));
    }
    Ok(chars[start..*i].iter().collect())
}

/// Expands the `font`, `background`, `border` and `padding` shorthands;
/// everything else is stored as-is.
fn expand_declaration(map: &mut HashMap<String, String>, prop: &str, value: &str) {
    match prop {
        "font" => {
            let mut family = Vec::new();
            for word in value.split_whitespace() {
                match word {
                    "italic" => {
                        map.insert("font-style".into(), "italic".into());
                    }
                    "bold" => {
                        map.insert("font-weight".into(), "bold".into());
                    }
                    w if looks_like_size(w) => {
                        map.insert("font-size".into(), w.into());
                    }
                    w => family.push(w),
                }
            }
            if !family.is_empty() {
                map.insert("font-family".into(), family.join(" "));
            }
        }
        "background" => {
            map.insert("background-color".into(), value.into());
        }
        "border" => {
            for word in value.split_whitespace() {
                if BORDER_STYLES.contains(&word) {
                    map.insert("border-style".into(), word.into());
                } else if word.starts_with(|c: char| c.is_ascii_digit()) {
                    map.insert("border-width".into(), word.into());
                } else {
                    map.insert("border-color".into(), word.into());
                }
            }
        }
        "padding" => {
            let values: Vec<&str> = value.split_whitespace().collect();
            let (top, right, bottom, left) = match values.as_slice() {
                [v] => (*v, *v, *v, *v),
                [v, h] => (*v, *h, *v, *h),
                [t, h, b] => (*t, *h, *b, *h),
                [t, r, b, l, ..] => (*t, *r, *b, *l),
                [] => return,
            };
            map.insert("padding-top".into(), top.into());
            map.insert("padding-right".into(), right.into());
            map.insert("padding-bottom".into(), bottom.into());
            map.insert("padding-left".into(), left.into());
        }
        _ => {
            map.insert(prop.into(), value.into());
        }
    }
}

fn looks_like_size(word: &str) -> bool {
    word.ends_with('%')
        || word.ends_with("px")
        || word.ends_with("em")
        || word.ends_with("rem")
        || word.chars().all(|c| c.is_ascii_digit())
}
