//! The shape of the output a caller asked for, and the selective fetch check
//! built on top of it.
//!
//! A [`RequestedShape`] is built once per top-level operation by whatever
//! layer knows what the caller wants (usually from a query's field
//! selection), and is read-only after that. Resolvers ask it whether a path
//! was requested before paying for an optional sub-fetch.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::iter::Peekable;
use std::str::{CharIndices, FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A tree of requested field names. Each node's children are the fields
/// requested beneath it; a leaf is a field requested without any
/// sub-selection.
///
/// Serializes as nested maps: `{"results": {"id": {}, "price": {}}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestedShape {
    fields: BTreeMap<String, RequestedShape>,
}

impl RequestedShape {
    /// A shape with nothing requested.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a shape from dotted paths, like `"results.price.amount"`.
    /// Every prefix of every path is requested too.
    pub fn from_paths<I>(paths: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        paths
            .into_iter()
            .fold(Self::new(), |shape, path| shape.with_path(path.as_ref()))
    }

    /// Add a dotted path to this shape.
    pub fn with_path(mut self, path: &str) -> Self {
        self.insert(path.split('.').filter(|segment| !segment.is_empty()));
        self
    }

    /// Add a path, given as separate segments, to this shape.
    pub fn insert<'a>(&mut self, path: impl IntoIterator<Item = &'a str>) {
        path.into_iter().fold(self, |node, segment| {
            node.fields.entry(segment.to_owned()).or_default()
        });
    }

    /// The sub-shape requested under `name`, if it was requested at all.
    pub fn field(&self, name: &str) -> Option<&RequestedShape> {
        self.fields.get(name)
    }

    /// The names of the fields requested directly under this node.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// True if no fields are requested under this node.
    pub fn is_leaf(&self) -> bool {
        self.fields.is_empty()
    }

    /// Check whether `path` was requested. Each segment must be a field
    /// requested under the previous one. The last segment doesn't need to be
    /// a leaf: requesting `results { price { amount } }` means that
    /// `["results", "price"]` was requested.
    ///
    /// An empty path is always requested.
    pub fn is_requested<S: AsRef<str>>(&self, path: &[S]) -> bool {
        path.iter()
            .try_fold(self, |node, segment| node.field(segment.as_ref()))
            .is_some()
    }

    /// [`is_requested`][RequestedShape::is_requested], with the path given
    /// in dotted form.
    pub fn is_requested_dotted(&self, path: &str) -> bool {
        path.split('.')
            .filter(|segment| !segment.is_empty())
            .try_fold(self, |node, segment| node.field(segment))
            .is_some()
    }
}

/// Check whether `path` is present in `shape`. See
/// [`RequestedShape::is_requested`].
pub fn is_requested<S: AsRef<str>>(path: &[S], shape: &RequestedShape) -> bool {
    shape.is_requested(path)
}

/// Selection text couldn't be parsed into a [`RequestedShape`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeParseError {
    #[error("unexpected character {found:?} at offset {offset}")]
    UnexpectedChar { found: char, offset: usize },

    #[error("unexpected end of selection, expected {expected}")]
    UnexpectedEnd { expected: &'static str },

    #[error("field {field:?} has an empty selection")]
    EmptySelection { field: String },
}

/// Parses GraphQL-like selection text:
///
/// ```
/// use coalescer::RequestedShape;
///
/// let shape: RequestedShape = "{ results { id price { amount } } pagination { page } }"
///     .parse()
///     .unwrap();
///
/// assert!(shape.is_requested(&["results", "price"]));
/// assert!(!shape.is_requested(&["results", "name"]));
/// ```
///
/// Commas and whitespace are insignificant, and the outer braces are
/// optional.
impl FromStr for RequestedShape {
    type Err = ShapeParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut parser = Parser {
            chars: input.char_indices().peekable(),
        };

        let shape = match parser.peek_significant() {
            Some((_, '{')) => {
                parser.chars.next();
                parser.selection(Some("outer selection"))?
            }
            _ => parser.selection(None)?,
        };

        match parser.peek_significant() {
            None => Ok(shape),
            Some((offset, found)) => Err(ShapeParseError::UnexpectedChar { found, offset }),
        }
    }
}

struct Parser<'a> {
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Parser<'a> {
    fn peek_significant(&mut self) -> Option<(usize, char)> {
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_whitespace() || c == ',' {
                self.chars.next();
            } else {
                break;
            }
        }

        self.chars.peek().copied()
    }

    /// Parse fields until a closing brace (if `closing` names what it's
    /// closing) or the end of input (if it doesn't).
    fn selection(&mut self, closing: Option<&'static str>) -> Result<RequestedShape, ShapeParseError> {
        let mut shape = RequestedShape::new();

        loop {
            match (self.peek_significant(), closing) {
                (None, None) => return Ok(shape),
                (None, Some(expected)) => {
                    return Err(ShapeParseError::UnexpectedEnd { expected })
                }
                (Some((_, '}')), Some(_)) => {
                    self.chars.next();
                    return Ok(shape);
                }
                (Some((offset, c)), _) if is_name_start(c) => {
                    let name = self.name(offset);
                    let child = match self.peek_significant() {
                        Some((_, '{')) => {
                            self.chars.next();
                            let child = self.selection(Some("closing brace"))?;
                            if child.is_leaf() {
                                return Err(ShapeParseError::EmptySelection {
                                    field: name.to_owned(),
                                });
                            }
                            child
                        }
                        _ => RequestedShape::new(),
                    };

                    shape.merge(name, child);
                }
                (Some((offset, found)), _) => {
                    return Err(ShapeParseError::UnexpectedChar { found, offset })
                }
            }
        }
    }

    fn name(&mut self, start: usize) -> String {
        let mut name = String::new();
        while let Some(&(offset, c)) = self.chars.peek() {
            if offset == start && is_name_start(c) || offset > start && is_name_char(c) {
                name.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        name
    }
}

impl RequestedShape {
    // Selecting the same field twice requests the union of both selections.
    fn merge(&mut self, name: String, child: RequestedShape) {
        let node = self.fields.entry(name).or_default();
        for (field, grandchild) in child.fields {
            node.merge(field, grandchild);
        }
    }
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

impl Display for RequestedShape {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (name, child) in &self.fields {
            write!(f, " {}", name)?;
            if !child.is_leaf() {
                write!(f, " {}", child)?;
            }
        }
        f.write_str(" }")
    }
}
