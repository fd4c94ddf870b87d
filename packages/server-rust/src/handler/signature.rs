//! One-time validation of handler shapes.
//!
//! A [`Signature`] lists a handler's parameter and return kinds.
//! [`Signature::bind`] checks it against the six supported calling
//! conventions and resolves the [`Variant`] that drives argument assembly at
//! dispatch time. The typed constructors on
//! [`HandlerDescriptor`](super::HandlerDescriptor) describe their own shape
//! and run through the same check.

use std::any::{type_name, TypeId};
use std::fmt;

// ---------------------------------------------------------------------------
// TypeTag
// ---------------------------------------------------------------------------

/// Runtime identity of a Rust type, used to compare bound-parameter types.
#[derive(Clone, Copy)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeTag {}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

// ---------------------------------------------------------------------------
// Shape description
// ---------------------------------------------------------------------------

/// Kind of a single handler parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Per-request [`RequestContext`](super::RequestContext).
    Context,
    /// Transport request head (`http::request::Parts`).
    Request,
    /// A structured message type.
    Message(TypeTag),
    /// Any other type; only valid as a bound parameter.
    Value(TypeTag),
}

/// Kind of a single handler return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    /// A structured message.
    Message,
    /// An error implementing [`HandlerError`](super::HandlerError).
    Error,
    /// Anything else, named for diagnostics.
    Value(&'static str),
}

/// Calling convention resolved for a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    /// `fn(&Req)`
    Message,
    /// `fn(&RequestContext, &Req)`
    ContextMessage,
    /// `fn(&Parts, &Req)`
    RequestMessage,
    /// `fn(&P, &Req)`
    BoundMessage,
    /// `fn(&RequestContext, &P, &Req)`
    ContextBoundMessage,
    /// `fn(&Parts, &P, &Req)`
    RequestBoundMessage,
}

impl Variant {
    /// Whether the handler receives a bound parameter.
    #[must_use]
    pub fn takes_bound(self) -> bool {
        matches!(
            self,
            Self::BoundMessage | Self::ContextBoundMessage | Self::RequestBoundMessage
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::ContextMessage => "context+message",
            Self::RequestMessage => "request+message",
            Self::BoundMessage => "param+message",
            Self::ContextBoundMessage => "context+param+message",
            Self::RequestBoundMessage => "request+param+message",
        }
    }
}

/// Result of a successful bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    /// Resolved calling convention.
    pub variant: Variant,
    /// Concrete request message type.
    pub request: TypeTag,
    /// Declared bound-parameter type, for bound variants.
    pub bound: Option<TypeTag>,
    /// Whether the handler returns an error alongside the message.
    pub fallible: bool,
}

/// Reasons a handler shape is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    #[error("handler must return 1 or 2 values, found {0}")]
    ReturnArity(usize),
    #[error("handler's first return value must be a message, found {0}")]
    ReturnNotMessage(&'static str),
    #[error("handler's second return value must be an error, found {0}")]
    ReturnNotError(&'static str),
    #[error("handler must take 1, 2 or 3 parameters, found {0}")]
    ParamArity(usize),
    #[error("handler's last parameter must be a message type")]
    ParamNotMessage,
    #[error("handler's first parameter must be a context or transport request")]
    InvalidLeadingParameter,
    #[error("handler's bound parameter cannot be a context or transport request")]
    InvalidBoundParameter,
    #[error("handler takes a bound parameter of type {expected} but none was supplied")]
    MissingBoundParameter { expected: TypeTag },
    #[error("bound parameter of type {found} is not assignable to {expected}")]
    BoundParameterMismatch { expected: TypeTag, found: TypeTag },
    #[error("bound parameter of type {0} supplied to a handler that takes none")]
    UnexpectedBoundParameter(TypeTag),
}

/// Explicit description of a handler's parameters and returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    params: Vec<ParamKind>,
    returns: Vec<ReturnKind>,
}

impl Signature {
    #[must_use]
    pub fn new(params: impl Into<Vec<ParamKind>>, returns: impl Into<Vec<ReturnKind>>) -> Self {
        Self {
            params: params.into(),
            returns: returns.into(),
        }
    }

    /// Validates the shape and resolves its calling convention.
    ///
    /// `supplied` is the type of the bound value the caller intends to pass,
    /// if any.
    ///
    /// # Errors
    ///
    /// Returns a [`BindError`] naming the first rule the shape violates.
    pub fn bind(&self, supplied: Option<TypeTag>) -> Result<Binding, BindError> {
        let fallible = self.check_returns()?;

        let (variant, request, bound) = match self.params.as_slice() {
            [only] => (Variant::Message, message_tag(*only)?, None),
            [first, last] => {
                let request = message_tag(*last)?;
                match first {
                    ParamKind::Context => (Variant::ContextMessage, request, None),
                    ParamKind::Request => (Variant::RequestMessage, request, None),
                    ParamKind::Message(tag) | ParamKind::Value(tag) => {
                        (Variant::BoundMessage, request, Some(*tag))
                    }
                }
            }
            [first, middle, last] => {
                let request = message_tag(*last)?;
                let variant = match first {
                    ParamKind::Context => Variant::ContextBoundMessage,
                    ParamKind::Request => Variant::RequestBoundMessage,
                    _ => return Err(BindError::InvalidLeadingParameter),
                };
                let bound = match middle {
                    ParamKind::Message(tag) | ParamKind::Value(tag) => *tag,
                    ParamKind::Context | ParamKind::Request => {
                        return Err(BindError::InvalidBoundParameter)
                    }
                };
                (variant, request, Some(bound))
            }
            other => return Err(BindError::ParamArity(other.len())),
        };

        match (bound, supplied) {
            (Some(expected), None) => return Err(BindError::MissingBoundParameter { expected }),
            (Some(expected), Some(found)) if expected != found => {
                return Err(BindError::BoundParameterMismatch { expected, found })
            }
            (None, Some(found)) => return Err(BindError::UnexpectedBoundParameter(found)),
            _ => {}
        }

        Ok(Binding {
            variant,
            request,
            bound,
            fallible,
        })
    }

    fn check_returns(&self) -> Result<bool, BindError> {
        let (first, second) = match self.returns.as_slice() {
            [first] => (*first, None),
            [first, second] => (*first, Some(*second)),
            other => return Err(BindError::ReturnArity(other.len())),
        };
        if first != ReturnKind::Message {
            return Err(BindError::ReturnNotMessage(return_name(first)));
        }
        match second {
            None => Ok(false),
            Some(ReturnKind::Error) => Ok(true),
            Some(other) => Err(BindError::ReturnNotError(return_name(other))),
        }
    }
}

fn message_tag(kind: ParamKind) -> Result<TypeTag, BindError> {
    match kind {
        ParamKind::Message(tag) => Ok(tag),
        _ => Err(BindError::ParamNotMessage),
    }
}

fn return_name(kind: ReturnKind) -> &'static str {
    match kind {
        ReturnKind::Message => "message",
        ReturnKind::Error => "error",
        ReturnKind::Value(name) => name,
    }
}
