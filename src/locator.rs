//! Lazy search over embedded page data
//!
//! Pages embed dozens of unrelated JSON blobs. The locator walks a value tree
//! depth-first and yields the sub-values accepted by a predicate, without
//! descending into a match once it has been accepted.

use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// One step of a [`PathSpec`]: an object key or an array index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Fixed accessor applied to every match before it is yielded.
///
/// Parsed from a dotted string where numeric segments index into arrays,
/// e.g. `"3.0.__bbox.require"`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PathSpec {
    segments: Vec<PathSegment>,
}

impl PathSpec {
    pub fn from_dotted(path: &str) -> Self {
        let segments = path
            .split('.')
            .filter(|segment| !segment.is_empty())
            .map(|segment| match segment.parse::<usize>() {
                Ok(index) => PathSegment::Index(index),
                Err(_) => PathSegment::Key(segment.to_string()),
            })
            .collect();

        Self { segments }
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Follows the path from `value`, returning `None` as soon as a segment
    /// does not exist or the node has the wrong shape.
    pub fn resolve<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(value, |node, segment| match (segment, node) {
                (PathSegment::Key(key), Value::Object(map)) => map.get(key),
                (PathSegment::Index(index), Value::Array(items)) => items.get(*index),
                _ => None,
            })
    }
}

impl FromStr for PathSpec {
    type Err = std::convert::Infallible;

    fn from_str(path: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_dotted(path))
    }
}

impl fmt::Display for PathSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .segments
            .iter()
            .map(|segment| match segment {
                PathSegment::Key(key) => key.clone(),
                PathSegment::Index(index) => index.to_string(),
            })
            .collect();
        write!(f, "{}", rendered.join("."))
    }
}

/// Depth-first iterator returned by [`search`] and [`search_path`].
pub struct Search<'a, P> {
    stack: Vec<&'a Value>,
    predicate: P,
    path: Option<PathSpec>,
}

impl<'a, P> Iterator for Search<'a, P>
where
    P: FnMut(&Value) -> bool,
{
    type Item = &'a Value;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            if (self.predicate)(node) {
                match &self.path {
                    None => return Some(node),
                    Some(path) => match path.resolve(node) {
                        Some(found) => return Some(found),
                        None => continue,
                    },
                }
            }

            // Children are pushed in reverse so they pop in document order.
            match node {
                Value::Array(items) => self.stack.extend(items.iter().rev()),
                Value::Object(map) => self.stack.extend(map.values().rev()),
                _ => {}
            }
        }

        None
    }
}

/// Yields every sub-value of `root` accepted by `predicate`, in depth-first
/// pre-order. Matches are terminal: their children are not searched.
pub fn search<P>(root: &Value, predicate: P) -> Search<'_, P>
where
    P: FnMut(&Value) -> bool,
{
    Search {
        stack: vec![root],
        predicate,
        path: None,
    }
}

/// Like [`search`], but each match is narrowed through `path` first. Matches
/// where the path does not resolve are skipped.
pub fn search_path<P>(root: &Value, predicate: P, path: PathSpec) -> Search<'_, P>
where
    P: FnMut(&Value) -> bool,
{
    Search {
        stack: vec![root],
        predicate,
        path: Some(path),
    }
}

/// Matches arrays whose first element is the string `tag`,
/// e.g. `["ScheduledServerJS", "handle", null, [...]]`.
pub fn tagged(tag: &str) -> impl Fn(&Value) -> bool + '_ {
    move |value: &Value| {
        value
            .as_array()
            .and_then(|items| items.first())
            .and_then(Value::as_str)
            == Some(tag)
    }
}

/// Matches objects whose `tracePolicy` field equals `policy`.
pub fn trace_policy(policy: &str) -> impl Fn(&Value) -> bool + '_ {
    move |value: &Value| {
        value
            .as_object()
            .and_then(|map| map.get("tracePolicy"))
            .and_then(Value::as_str)
            == Some(policy)
    }
}
