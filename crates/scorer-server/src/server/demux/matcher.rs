//! Connection classification rules.
//!
//! A [`Classifier`] is an ordered list of [`Matcher`]s, each bound to a
//! [`Route`]. The only way to finish building one is
//! [`ClassifierBuilder::catch_all`], which appends a matcher that accepts
//! anything, so every connection is eventually routed.
//!
//! Rules are consulted in order. While the earliest rule that has not ruled a
//! prefix out is still [`Verdict::Undecided`], classification waits for more
//! bytes; a later rule never overtakes an earlier undecided one. Once the peek
//! window is full, undecided rules count as non-matching.

use super::Route;

/// Answer of a matcher for the bytes seen so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Match,
    NoMatch,
    /// The prefix is consistent with a match but not yet conclusive.
    Undecided,
}

/// Inspects the leading bytes of a connection.
pub trait Matcher: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Judges `prefix`, the bytes received so far. Must be monotonic: once a
    /// prefix yields `Match` or `NoMatch`, every extension yields the same.
    fn inspect(&self, prefix: &[u8]) -> Verdict;
}

/// Matches a syntactically valid HTTP/1.x request line.
///
/// `METHOD SP request-target SP HTTP/1.<digit> CRLF`, where METHOD is a token
/// and the target is visible ASCII. A bare LF line ending is tolerated.
#[derive(Debug, Default, Clone, Copy)]
pub struct Http1Matcher;

/// Longest method accepted; real methods are far shorter.
const MAX_METHOD_LEN: usize = 24;
const VERSION_PREFIX: &[u8] = b"HTTP/1.";

const fn is_tchar(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.'
        | b'^' | b'_' | b'`' | b'|' | b'~')
        || b.is_ascii_alphanumeric()
}

const fn is_target_byte(b: u8) -> bool {
    b.is_ascii_graphic()
}

impl Matcher for Http1Matcher {
    fn name(&self) -> &'static str {
        "http1"
    }

    fn inspect(&self, prefix: &[u8]) -> Verdict {
        let method_len = prefix.iter().take_while(|b| is_tchar(**b)).count();
        if method_len > MAX_METHOD_LEN {
            return Verdict::NoMatch;
        }
        if method_len == prefix.len() {
            return Verdict::Undecided;
        }
        if method_len == 0 || prefix[method_len] != b' ' {
            return Verdict::NoMatch;
        }
        let rest = &prefix[method_len + 1..];

        let target_len = rest.iter().take_while(|b| is_target_byte(**b)).count();
        if target_len == rest.len() {
            return Verdict::Undecided;
        }
        if target_len == 0 || rest[target_len] != b' ' {
            return Verdict::NoMatch;
        }
        let rest = &rest[target_len + 1..];

        let seen = rest.len().min(VERSION_PREFIX.len());
        if rest[..seen] != VERSION_PREFIX[..seen] {
            return Verdict::NoMatch;
        }
        let Some((minor, line_end)) = rest[seen..].split_first() else {
            return Verdict::Undecided;
        };
        if !minor.is_ascii_digit() {
            return Verdict::NoMatch;
        }

        match line_end {
            [] | [b'\r'] => Verdict::Undecided,
            [b'\r', b'\n', ..] | [b'\n', ..] => Verdict::Match,
            _ => Verdict::NoMatch,
        }
    }
}

/// Accepts every connection. Always the last rule of a [`Classifier`].
#[derive(Debug, Default, Clone, Copy)]
pub struct AnyMatcher;

impl Matcher for AnyMatcher {
    fn name(&self) -> &'static str {
        "any"
    }

    fn inspect(&self, _prefix: &[u8]) -> Verdict {
        Verdict::Match
    }
}

struct Rule {
    route: Route,
    matcher: Box<dyn Matcher>,
}

/// Ordered, total routing policy.
pub struct Classifier {
    rules: Vec<Rule>,
}

/// Builder for a [`Classifier`]; finished by [`ClassifierBuilder::catch_all`].
#[must_use = "a classifier only exists once `catch_all` is called"]
pub struct ClassifierBuilder {
    rules: Vec<Rule>,
}

impl ClassifierBuilder {
    /// Appends a rule, consulted after every rule added before it.
    pub fn rule(mut self, route: Route, matcher: impl Matcher + 'static) -> Self {
        self.rules.push(Rule {
            route,
            matcher: Box::new(matcher),
        });
        self
    }

    /// Terminates the rule list with a matcher that accepts anything.
    pub fn catch_all(mut self, route: Route) -> Classifier {
        self.rules.push(Rule {
            route,
            matcher: Box::new(AnyMatcher),
        });
        Classifier { rules: self.rules }
    }
}

impl Classifier {
    pub fn builder() -> ClassifierBuilder {
        ClassifierBuilder { rules: Vec::new() }
    }

    /// HTTP/1.x to the HTTP route, everything else to RPC.
    pub fn standard() -> Self {
        Self::builder()
            .rule(Route::Http, Http1Matcher)
            .catch_all(Route::Rpc)
    }

    /// Rules in evaluation order, as `(matcher name, route)`.
    pub fn order(&self) -> Vec<(&'static str, Route)> {
        self.rules
            .iter()
            .map(|rule| (rule.matcher.name(), rule.route))
            .collect()
    }

    /// Routes `prefix`, or returns `None` while more bytes are needed.
    ///
    /// `exhausted` means no more bytes will be considered, either because the
    /// peek window is full or because the caller forces a decision.
    pub fn classify(&self, prefix: &[u8], exhausted: bool) -> Option<Route> {
        for rule in &self.rules {
            match rule.matcher.inspect(prefix) {
                Verdict::Match => return Some(rule.route),
                Verdict::Undecided if !exhausted => return None,
                Verdict::Undecided | Verdict::NoMatch => {}
            }
        }
        // `catch_all` guarantees the last rule matches.
        self.rules.last().map(|rule| rule.route)
    }
}

impl core::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.order()).finish()
    }
}
