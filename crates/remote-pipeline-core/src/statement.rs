//! Statement synthesis.

use thiserror::Error;

use crate::{
    literal::{Arg, HandleRef, Invocation, Receiver},
    name::{NameAllocator, RemoteName},
    traits::SessionId,
};

/// Argument or invocation that cannot be rendered.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    /// NaN or an infinity.
    #[error("Number has no source literal: {0}")]
    NonFiniteNumber(f64),
    /// JSON value with no literal form, such as an out-of-range integer.
    #[error("Unsupported literal: {0}")]
    UnsupportedLiteral(String),
    /// Blank function source.
    #[error("Function source is empty")]
    EmptySource,
    /// Method, receiver or category that is not a plain identifier.
    #[error("Invalid {kind} identifier: {value:?}")]
    InvalidIdentifier { kind: &'static str, value: String },
    /// Handle created by a different session.
    #[error("Handle {name} belongs to another session")]
    ForeignHandle { name: RemoteName },
    /// Handle naming something this session never issued.
    #[error("Handle {name} was never issued by this session")]
    UnknownHandle { name: RemoteName },
    /// Nested call whose result is needed but not retained.
    #[error("Nested call to {method} is used as a value but retains no result")]
    UnretainedIntermediate { method: String },
}

/// One unit of generated source submitted to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// Variable the result is bound to; `None` for terminal actions.
    pub result_name: Option<RemoteName>,
    /// Source text, terminated by `;`.
    pub text: String,
}

impl Statement {
    /// Whether the statement binds no result.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.result_name.is_none()
    }
}

/// Renders invocations into statements, allocating result names as it goes.
///
/// Nested invocations are emitted before the statement that uses them: the
/// receiver first, then arguments left to right. Names are allocated in the
/// same order, so they increase along the emitted batch.
pub struct StatementBuilder<'a> {
    session: SessionId,
    names: &'a mut NameAllocator,
}

impl<'a> StatementBuilder<'a> {
    #[must_use]
    pub const fn new(session: SessionId, names: &'a mut NameAllocator) -> Self {
        Self { session, names }
    }

    /// Build the ordered batch of statements for `invocation`.
    ///
    /// The whole invocation tree is validated before any name is allocated,
    /// so a failed build leaves the counters untouched.
    ///
    /// # Errors
    /// Returns error if any argument, receiver or method name is malformed.
    pub fn build(&mut self, invocation: &Invocation) -> Result<Vec<Statement>, BuildError> {
        self.validate(invocation)?;
        let mut batch = Vec::new();
        self.emit(invocation, &mut batch)?;
        Ok(batch)
    }

    fn validate(&self, invocation: &Invocation) -> Result<(), BuildError> {
        check_identifier("method", &invocation.method)?;
        match &invocation.receiver {
            Receiver::Handle(handle) => self.check_handle(handle)?,
            Receiver::Static(path) => {
                for segment in path.split('.') {
                    check_identifier("receiver", segment).map_err(|_| {
                        BuildError::InvalidIdentifier {
                            kind: "receiver",
                            value: path.clone(),
                        }
                    })?;
                }
            }
            Receiver::Call(inner) => self.validate_intermediate(inner)?,
        }
        for arg in &invocation.args {
            match arg {
                Arg::Literal(literal) => {
                    literal.render()?;
                }
                Arg::Handle(handle) => self.check_handle(handle)?,
                Arg::Source(_) => {}
                Arg::Call(inner) => self.validate_intermediate(inner)?,
            }
        }
        Ok(())
    }

    fn validate_intermediate(&self, inner: &Invocation) -> Result<(), BuildError> {
        if inner.returns.is_none() {
            return Err(BuildError::UnretainedIntermediate {
                method: inner.method.clone(),
            });
        }
        self.validate(inner)
    }

    fn check_handle(&self, handle: &HandleRef) -> Result<(), BuildError> {
        let name = handle.name();
        if handle.session() != self.session {
            return Err(BuildError::ForeignHandle { name: name.clone() });
        }
        // Issued names were enqueued with their defining statement already.
        if !self.names.was_issued(name) {
            return Err(BuildError::UnknownHandle { name: name.clone() });
        }
        Ok(())
    }

    fn emit(
        &mut self,
        invocation: &Invocation,
        batch: &mut Vec<Statement>,
    ) -> Result<Option<RemoteName>, BuildError> {
        let receiver = match &invocation.receiver {
            Receiver::Handle(handle) => handle.name().to_string(),
            Receiver::Static(path) => path.clone(),
            Receiver::Call(inner) => self.emit_intermediate(inner, batch)?.to_string(),
        };

        let mut rendered = Vec::with_capacity(invocation.args.len());
        for arg in &invocation.args {
            rendered.push(match arg {
                Arg::Literal(literal) => literal.render()?,
                Arg::Handle(handle) => handle.name().to_string(),
                Arg::Source(source) => source.as_str().to_string(),
                Arg::Call(inner) => self.emit_intermediate(inner, batch)?.to_string(),
            });
        }

        let call = format!("{receiver}.{}({})", invocation.method, rendered.join(","));
        let result_name = invocation.returns.as_ref().map(|c| self.names.next(c));
        let text = match &result_name {
            Some(name) => format!("var {name} = {call};"),
            None => format!("{call};"),
        };
        batch.push(Statement {
            result_name: result_name.clone(),
            text,
        });
        Ok(result_name)
    }

    fn emit_intermediate(
        &mut self,
        inner: &Invocation,
        batch: &mut Vec<Statement>,
    ) -> Result<RemoteName, BuildError> {
        self.emit(inner, batch)?
            .ok_or_else(|| BuildError::UnretainedIntermediate {
                method: inner.method.clone(),
            })
    }
}

fn check_identifier(kind: &'static str, value: &str) -> Result<(), BuildError> {
    let mut chars = value.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if valid {
        Ok(())
    } else {
        Err(BuildError::InvalidIdentifier {
            kind,
            value: value.to_string(),
        })
    }
}
