//! Structural descriptions of decodable native types.
//!
//! A [`Shape`] names what a [`Get`](crate::Get) implementation accepts. It is
//! used for error messages and for the bind-time overload shadow analysis,
//! which asks whether one parameter accepts every value another one does.

use std::fmt;

/// The structural category of a native type as seen from script.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Shape {
    Nil,
    Boolean,
    /// Integer targets: integer subtype, or floats with an exact integral value.
    Integer,
    /// Float targets: any number.
    Number,
    String,
    Optional(Box<Shape>),
    /// Fixed-length sequence.
    Array(Box<Shape>, usize),
    /// Dynamic sequence.
    Sequence(Box<Shape>),
    Tuple(Vec<Shape>),
    Map(Box<Shape>, Box<Shape>),
    /// A registered usertype, by script name.
    Usertype(&'static str),
    /// Something callable: a function, or a value with `__call`.
    Function,
    /// Any scalar the dynamic [`Value`](crate::Value) accepts.
    Scalar,
    /// Placeholder slot accepting anything.
    Any,
}

impl Shape {
    /// Whether every runtime value accepted by `other` is also accepted by `self`.
    ///
    /// This is conservative: `false` means "not provably covered". Numeric
    /// shapes carry no range, so two integer shapes (or two number shapes)
    /// are never assumed to cover each other; callers compare the concrete
    /// Rust types for that.
    pub fn covers(&self, other: &Shape) -> bool {
        match (self, other) {
            (Shape::Any, _) => true,
            (Shape::Number, Shape::Integer) => true,
            (Shape::Integer | Shape::Number, _) => false,
            (
                Shape::Scalar,
                Shape::Nil | Shape::Boolean | Shape::Integer | Shape::Number | Shape::String | Shape::Scalar,
            ) => true,
            (Shape::Scalar, Shape::Optional(inner)) => Shape::Scalar.covers(inner),
            (Shape::Optional(_), Shape::Nil) => true,
            (Shape::Optional(a), Shape::Optional(b)) => a.covers(b),
            (Shape::Optional(a), b) => a.covers(b),
            (Shape::Sequence(a), Shape::Sequence(b) | Shape::Array(b, _)) => a.covers(b),
            (Shape::Array(a, n), Shape::Array(b, m)) => n == m && a.covers(b),
            (Shape::Tuple(a), Shape::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.covers(y))
            }
            (Shape::Sequence(a), Shape::Tuple(items)) => items.iter().all(|item| a.covers(item)),
            (Shape::Map(ka, va), Shape::Map(kb, vb)) => ka.covers(kb) && va.covers(vb),
            _ => self == other,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Nil => f.write_str("nil"),
            Shape::Boolean => f.write_str("boolean"),
            Shape::Integer => f.write_str("integer"),
            Shape::Number => f.write_str("number"),
            Shape::String => f.write_str("string"),
            Shape::Optional(inner) => write!(f, "{inner}?"),
            Shape::Array(inner, len) => write!(f, "{inner}[{len}]"),
            Shape::Sequence(inner) => write!(f, "{inner}[]"),
            Shape::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Shape::Map(key, value) => write!(f, "table<{key}, {value}>"),
            Shape::Usertype(name) => f.write_str(name),
            Shape::Function => f.write_str("function"),
            Shape::Scalar => f.write_str("scalar"),
            Shape::Any => f.write_str("any"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_covers_integer_but_not_reverse() {
        assert!(Shape::Number.covers(&Shape::Integer));
        assert!(!Shape::Integer.covers(&Shape::Number));
    }

    #[test]
    fn numeric_leaves_do_not_cover_themselves() {
        // An `u8` and an `i64` parameter share a shape but not a range.
        assert!(!Shape::Integer.covers(&Shape::Integer));
        assert!(!Shape::Number.covers(&Shape::Number));
        assert!(Shape::String.covers(&Shape::String));
        assert!(Shape::Usertype("vec3").covers(&Shape::Usertype("vec3")));
        assert!(!Shape::Usertype("vec3").covers(&Shape::Usertype("vec2")));
    }

    #[test]
    fn string_and_number_are_disjoint() {
        assert!(!Shape::String.covers(&Shape::Number));
        assert!(!Shape::Number.covers(&Shape::String));
    }

    #[test]
    fn optional_covers_nil_and_inner() {
        let opt = Shape::Optional(Box::new(Shape::String));
        assert!(opt.covers(&Shape::Nil));
        assert!(opt.covers(&Shape::String));
        assert!(!Shape::String.covers(&opt));
    }

    #[test]
    fn sequences_cover_fixed_arrays_of_any_length() {
        let seq = Shape::Sequence(Box::new(Shape::Number));
        assert!(seq.covers(&Shape::Array(Box::new(Shape::Integer), 2)));
        let one = Shape::Array(Box::new(Shape::Number), 1);
        let two = Shape::Array(Box::new(Shape::Number), 2);
        assert!(!one.covers(&two));
    }

    #[test]
    fn display_is_readable() {
        let shape = Shape::Sequence(Box::new(Shape::Tuple(vec![
            Shape::Boolean,
            Shape::Tuple(vec![Shape::String, Shape::Number]),
        ])));
        assert_eq!(shape.to_string(), "(boolean, (string, number))[]");
        assert_eq!(
            Shape::Map(Box::new(Shape::String), Box::new(Shape::Integer)).to_string(),
            "table<string, integer>"
        );
        assert_eq!(Shape::Optional(Box::new(Shape::Usertype("vec3"))).to_string(), "vec3?");
    }
}
