//! Invocation arguments and their source rendering.

use serde_json::Value;

use crate::{
    name::{Category, RemoteName},
    statement::BuildError,
    traits::SessionId,
};

/// Plain value rendered as a source literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// `null`.
    Null,
    /// `true` or `false`.
    Bool(bool),
    /// Integer, rendered bare.
    Int(i64),
    /// Finite float; NaN and infinities fail to render.
    Float(f64),
    /// String, rendered quoted and escaped.
    Str(String),
    /// Bracketed list.
    Array(Vec<Literal>),
    /// Key order is kept as authored.
    Map(Vec<(String, Literal)>),
}

impl Literal {
    /// Render as engine source text.
    ///
    /// Strings are quoted and escaped, arrays bracketed, numbers bare.
    /// Elements are joined with `,` and no whitespace.
    ///
    /// # Errors
    /// Returns error for NaN or infinite floats, which have no literal form.
    pub fn render(&self) -> Result<String, BuildError> {
        let mut out = String::new();
        self.render_into(&mut out)?;
        Ok(out)
    }

    fn render_into(&self, out: &mut String) -> Result<(), BuildError> {
        match self {
            Self::Null => out.push_str("null"),
            Self::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Self::Int(i) => out.push_str(&i.to_string()),
            Self::Float(f) => {
                let number =
                    serde_json::Number::from_f64(*f).ok_or(BuildError::NonFiniteNumber(*f))?;
                out.push_str(&number.to_string());
            }
            Self::Str(s) => out.push_str(&quote(s)?),
            Self::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.render_into(out)?;
                }
                out.push(']');
            }
            Self::Map(entries) => {
                out.push('{');
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&quote(key)?);
                    out.push(':');
                    value.render_into(out)?;
                }
                out.push('}');
            }
        }
        Ok(())
    }
}

fn quote(s: &str) -> Result<String, BuildError> {
    serde_json::to_string(s).map_err(|e| BuildError::UnsupportedLiteral(e.to_string()))
}

impl From<bool> for Literal {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Literal {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Literal {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<u32> for Literal {
    fn from(i: u32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Literal {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Literal {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl<T: Into<Self>> From<Vec<T>> for Literal {
    fn from(items: Vec<T>) -> Self {
        Self::Array(items.into_iter().map(Into::into).collect())
    }
}

impl TryFrom<Value> for Literal {
    type Error = BuildError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Ok(match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if n.is_u64() {
                    return Err(BuildError::UnsupportedLiteral(format!(
                        "integer {n} does not fit in a signed 64-bit literal"
                    )));
                } else {
                    n.as_f64()
                        .map(Self::Float)
                        .ok_or_else(|| BuildError::UnsupportedLiteral(n.to_string()))?
                }
            }
            Value::String(s) => Self::Str(s),
            Value::Array(items) => Self::Array(
                items
                    .into_iter()
                    .map(Self::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| Ok((k, Self::try_from(v)?)))
                    .collect::<Result<_, BuildError>>()?,
            ),
        })
    }
}

/// Function source shipped to the engine for recompilation.
///
/// The text is emitted exactly as authored, whitespace and newlines included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFragment(String);

impl SourceFragment {
    /// Wrap function source text.
    ///
    /// # Errors
    /// Returns error if the text is blank.
    pub fn new(text: impl Into<String>) -> Result<Self, BuildError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(BuildError::EmptySource);
        }
        Ok(Self(text))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Reference to a remote object owned by a session.
///
/// Only a name the owning session has actually issued is accepted when the
/// reference is used; anything else fails the build.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandleRef {
    session: SessionId,
    name: RemoteName,
}

impl HandleRef {
    #[must_use]
    pub const fn new(session: SessionId, name: RemoteName) -> Self {
        Self { session, name }
    }

    /// Session that issued the name.
    #[must_use]
    pub const fn session(&self) -> SessionId {
        self.session
    }

    /// Remote variable the reference points at.
    #[must_use]
    pub const fn name(&self) -> &RemoteName {
        &self.name
    }
}

/// Target of an invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Receiver {
    /// A previously created remote object.
    Handle(HandleRef),
    /// An engine-side global such as `sqlContext` or `functions`.
    Static(String),
    /// Result of another invocation, emitted first.
    Call(Box<Invocation>),
}

impl From<HandleRef> for Receiver {
    fn from(handle: HandleRef) -> Self {
        Self::Handle(handle)
    }
}

impl From<&str> for Receiver {
    fn from(global: &str) -> Self {
        Self::Static(global.to_string())
    }
}

impl From<Invocation> for Receiver {
    fn from(invocation: Invocation) -> Self {
        Self::Call(Box::new(invocation))
    }
}

/// One argument of an invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Plain value.
    Literal(Literal),
    /// Existing remote object, passed by name.
    Handle(HandleRef),
    /// Function source, emitted verbatim.
    Source(SourceFragment),
    /// Nested invocation whose result is passed by name.
    Call(Box<Invocation>),
}

impl From<Literal> for Arg {
    fn from(literal: Literal) -> Self {
        Self::Literal(literal)
    }
}

macro_rules! literal_arg {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Arg {
                fn from(value: $ty) -> Self {
                    Self::Literal(value.into())
                }
            }
        )*
    };
}

literal_arg!(bool, i64, i32, u32, f64, &str, String);

impl<T: Into<Literal>> From<Vec<T>> for Arg {
    fn from(items: Vec<T>) -> Self {
        Self::Literal(items.into())
    }
}

impl From<HandleRef> for Arg {
    fn from(handle: HandleRef) -> Self {
        Self::Handle(handle)
    }
}

impl From<SourceFragment> for Arg {
    fn from(source: SourceFragment) -> Self {
        Self::Source(source)
    }
}

/// A method call on a receiver, optionally retaining its result.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Object the method is called on.
    pub receiver: Receiver,
    /// Method name; must be a plain identifier.
    pub method: String,
    /// Arguments in call order.
    pub args: Vec<Arg>,
    /// Category of the retained result; `None` for terminal actions.
    pub returns: Option<Category>,
}

impl Invocation {
    /// Create an invocation with no arguments and no retained result.
    #[must_use]
    pub fn new(receiver: impl Into<Receiver>, method: impl Into<String>) -> Self {
        Self {
            receiver: receiver.into(),
            method: method.into(),
            args: Vec::new(),
            returns: None,
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append a handle argument.
    #[must_use]
    pub fn handle_arg(mut self, handle: HandleRef) -> Self {
        self.args.push(Arg::Handle(handle));
        self
    }

    /// Append a function-source argument.
    #[must_use]
    pub fn source_arg(mut self, source: SourceFragment) -> Self {
        self.args.push(Arg::Source(source));
        self
    }

    /// Append a nested invocation argument.
    #[must_use]
    pub fn call_arg(mut self, invocation: Self) -> Self {
        self.args.push(Arg::Call(Box::new(invocation)));
        self
    }

    /// Retain the result under a new name of `category`.
    #[must_use]
    pub fn returns(mut self, category: Category) -> Self {
        self.returns = Some(category);
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_literal_rendering() {
        assert_eq!(Literal::from("age > 20").render().unwrap(), r#""age > 20""#);
        assert_eq!(Literal::from(vec!["name"]).render().unwrap(), r#"["name"]"#);
        assert_eq!(
            Literal::from(vec!["name", "age"]).render().unwrap(),
            r#"["name","age"]"#
        );
        assert_eq!(Literal::from(21).render().unwrap(), "21");
        assert_eq!(Literal::from(0.5).render().unwrap(), "0.5");
        assert_eq!(Literal::from(true).render().unwrap(), "true");
        assert_eq!(Literal::Null.render().unwrap(), "null");
    }

    #[test]
    fn test_string_escaping() {
        let lit = Literal::from("say \"hi\"\n");
        assert_eq!(lit.render().unwrap(), r#""say \"hi\"\n""#);
    }

    #[test]
    fn test_map_keeps_author_order() {
        let lit = Literal::Map(vec![
            ("zeta".to_string(), Literal::from(1)),
            ("alpha".to_string(), Literal::from(vec![1, 2])),
        ]);
        assert_eq!(lit.render().unwrap(), r#"{"zeta":1,"alpha":[1,2]}"#);
    }

    #[test]
    fn test_non_finite_float_is_rejected() {
        let err = Literal::from(f64::NAN).render().unwrap_err();
        assert!(matches!(err, BuildError::NonFiniteNumber(_)));
        let nested = Literal::Array(vec![Literal::from(1), Literal::from(f64::INFINITY)]);
        assert!(nested.render().is_err());
    }

    #[test]
    fn test_from_json_value() {
        let lit = Literal::try_from(json!({"cols": ["a", "b"], "limit": 10, "on": null})).unwrap();
        let rendered = lit.render().unwrap();
        assert!(rendered.contains(r#""cols":["a","b"]"#));
        assert!(rendered.contains(r#""limit":10"#));
        assert!(rendered.contains(r#""on":null"#));

        assert!(Literal::try_from(json!(u64::MAX)).is_err());
    }

    #[test]
    fn test_blank_source_is_rejected() {
        assert!(matches!(
            SourceFragment::new("  \n\t"),
            Err(BuildError::EmptySource)
        ));
        let src = SourceFragment::new("function (x) {\n  return x;\n}").unwrap();
        assert_eq!(src.as_str(), "function (x) {\n  return x;\n}");
    }
}
