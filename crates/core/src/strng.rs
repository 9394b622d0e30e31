//! Strng provides a cheaply clonable, immutable string type.
//!
//! Strings are reference counted and, for literals, entirely allocation free.
//! The type is used pervasively for names (models, providers, clusters) that
//! are created once and copied many times across requests.

pub use arcstr::{ArcStr, format, literal};

pub type Strng = ArcStr;

pub fn new<A: AsRef<str>>(s: A) -> Strng {
	ArcStr::from(s.as_ref())
}

pub const EMPTY: Strng = literal!("");
