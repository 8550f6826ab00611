use std::fmt;

use crate::error::ConfigurationError;

/// How a callable was declared on its owner.
///
/// This is the explicit counterpart of wrapping a function in a `property`,
/// `staticmethod` or `classmethod` transformer. Plain functions and ordinary
/// methods are both declared as [`Transformer::Function`]; which of the two
/// they are is decided from their first parameter name.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Transformer {
    #[default]
    Function,
    Property,
    StaticMethod,
    ClassMethod,
}

/// Classification of a decorated callable, fixed at decoration time.
///
/// # Examples
///
/// ```
/// use memoist_core::{CallableShape, Transformer};
///
/// let aliases = vec!["self".to_string()];
/// let shape = CallableShape::classify("area", &["self", "scale"], Transformer::Function, &aliases, false).unwrap();
/// assert_eq!(shape, CallableShape::UnboundMethod);
///
/// let shape = CallableShape::classify("fib", &["n"], Transformer::Function, &aliases, false).unwrap();
/// assert_eq!(shape, CallableShape::Function);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallableShape {
    Function,
    BoundMethod,
    UnboundMethod,
    Property,
    StaticMethod,
    ClassMethod,
}

impl CallableShape {
    /// Determines the shape from the declared parameter names and transformer.
    ///
    /// `bound` is true when the callable is decorated together with a fixed receiver.
    pub fn classify(
        callable: &str,
        params: &[&str],
        transformer: Transformer,
        receiver_aliases: &[String],
        bound: bool,
    ) -> Result<Self, ConfigurationError> {
        if bound && transformer != Transformer::Function {
            return Err(ConfigurationError::InvalidBinding {
                callable: callable.to_string(),
                transformer,
            });
        }

        let shape = match transformer {
            Transformer::Property => CallableShape::Property,
            Transformer::StaticMethod => CallableShape::StaticMethod,
            Transformer::ClassMethod => CallableShape::ClassMethod,
            Transformer::Function if bound => CallableShape::BoundMethod,
            Transformer::Function => match params.first() {
                Some(first) if receiver_aliases.iter().any(|alias| alias == first) => {
                    CallableShape::UnboundMethod
                }
                _ => CallableShape::Function,
            },
        };

        if shape.takes_receiver() && params.is_empty() {
            return Err(ConfigurationError::MissingReceiverParameter {
                callable: callable.to_string(),
                shape,
            });
        }
        Ok(shape)
    }

    /// True for shapes whose first argument is the receiving object.
    pub fn takes_receiver(self) -> bool {
        matches!(
            self,
            CallableShape::BoundMethod
                | CallableShape::UnboundMethod
                | CallableShape::Property
                | CallableShape::ClassMethod
        )
    }

    /// True for shapes that may keep one cache per receiver.
    pub fn is_method(self) -> bool {
        self.takes_receiver()
    }
}

impl fmt::Display for CallableShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallableShape::Function => "function",
            CallableShape::BoundMethod => "bound method",
            CallableShape::UnboundMethod => "unbound method",
            CallableShape::Property => "property",
            CallableShape::StaticMethod => "static method",
            CallableShape::ClassMethod => "class method",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aliases() -> Vec<String> {
        vec!["self".to_string(), "this".to_string()]
    }

    #[test]
    fn test_function_and_unbound_method() {
        let shape = CallableShape::classify("f", &["x"], Transformer::Function, &aliases(), false);
        assert_eq!(shape, Ok(CallableShape::Function));

        let shape = CallableShape::classify("m", &["this", "x"], Transformer::Function, &aliases(), false);
        assert_eq!(shape, Ok(CallableShape::UnboundMethod));
    }

    #[test]
    fn test_no_params_is_function() {
        let shape = CallableShape::classify("now", &[], Transformer::Function, &aliases(), false);
        assert_eq!(shape, Ok(CallableShape::Function));
    }

    #[test]
    fn test_bound_method_requires_receiver_param() {
        let shape = CallableShape::classify("m", &["self"], Transformer::Function, &aliases(), true);
        assert_eq!(shape, Ok(CallableShape::BoundMethod));

        let err = CallableShape::classify("m", &[], Transformer::Function, &aliases(), true);
        assert!(matches!(
            err,
            Err(ConfigurationError::MissingReceiverParameter { .. })
        ));
    }

    #[test]
    fn test_property_and_class_method_require_first_param() {
        for transformer in [Transformer::Property, Transformer::ClassMethod] {
            let err = CallableShape::classify("p", &[], transformer, &aliases(), false);
            assert!(err.is_err());
        }
        let shape = CallableShape::classify("create", &["cls"], Transformer::ClassMethod, &aliases(), false);
        assert_eq!(shape, Ok(CallableShape::ClassMethod));
    }

    #[test]
    fn test_static_method_never_takes_receiver() {
        let shape = CallableShape::classify("s", &["self"], Transformer::StaticMethod, &aliases(), false);
        assert_eq!(shape, Ok(CallableShape::StaticMethod));
        assert!(!CallableShape::StaticMethod.takes_receiver());
    }

    #[test]
    fn test_binding_non_function_fails() {
        let err = CallableShape::classify("p", &["self"], Transformer::Property, &aliases(), true);
        assert!(matches!(err, Err(ConfigurationError::InvalidBinding { .. })));
    }
}
