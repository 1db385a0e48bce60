//! Extensions to `Result`.

/// Flip `Result<T, E>` to `Result<E, T>`.
pub trait FlipResult<T, E> {
    /// Flip `Result<T, E>` to `Result<E, T>`.
    fn flip(self) -> Result<E, T>;
}

impl<T, E> FlipResult<T, E> for Result<T, E> {
    fn flip(self) -> Result<E, T> {
        match self {
            Ok(t) => Err(t),
            Err(e) => Ok(e),
        }
    }
}

/// Lift a plain value into `Ok`, inferring the error type from context.
pub trait WrapOk: Sized {
    /// Wrap `self` in `Ok`.
    fn wrap_ok<E>(self) -> Result<Self, E> {
        Ok(self)
    }
}

impl<T> WrapOk for T {}

/// Lower a bare value (usually an `error_stack::Report`) into `Err`,
/// inferring the success type from context.
pub trait WrapErr<T>: Sized {
    /// Wrap `self` in `Err`.
    fn wrap_err(self) -> Result<T, Self>;
}

impl<T, C> WrapErr<T> for error_stack::Report<C> {
    fn wrap_err(self) -> Result<T, Self> {
        Err(self)
    }
}

/// Discard the success payload of a `Result`, keeping only whether it succeeded.
///
/// Used primarily on the tuple returned by `try_join!`, where the individual
/// worker return values carry no information worth keeping.
pub trait DiscardResult<E> {
    /// Discard the `Ok` payload.
    fn discard_ok(self) -> Result<(), E>;
}

impl<T, E> DiscardResult<E> for Result<T, E> {
    fn discard_ok(self) -> Result<(), E> {
        self.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use error_stack::Report;

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("some error")]
    struct Error;

    #[test]
    fn wrap_ok_infers_error_type() {
        let value: Result<u8, Error> = 1u8.wrap_ok();
        assert_eq!(value.expect("must be ok"), 1);
    }

    #[test]
    fn wrap_err_wraps_report() {
        let report = Report::new(Error);
        let value: Result<u8, Report<Error>> = report.wrap_err();
        assert!(value.is_err());
    }

    #[test]
    fn discard_ok_drops_payload() {
        let value: Result<(u8, &str), Error> = Ok((1, "two"));
        assert_eq!(value.discard_ok(), Ok(()));
    }
}
