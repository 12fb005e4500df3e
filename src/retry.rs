//! Support utilities for [`keen_retry`]'s retry API.

use keen_retry::RetryResult;
use reqwest::StatusCode;

/// On error, return a [`RetryResult::Transient`] value.
macro_rules! try_transient {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(error) => {
                debug!("Potentially transient error: {:?}", error);
                return ::keen_retry::RetryResult::Transient {
                    input: (),
                    error: From::from(error),
                };
            }
        }
    };
}

/// On error, return either a [`RetryResult::Transient`] or [`RetryResult::Fatal`]
/// value, depending on the return value of [`IsKnownTransient::is_known_transient`].
macro_rules! try_potentially_transient {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(error) if IsKnownTransient::is_known_transient(&error) => {
                debug!("Potentially transient error: {:?}", error);
                return ::keen_retry::RetryResult::Transient {
                    input: (),
                    error: From::from(error),
                };
            }
            Err(error) => {
                return ::keen_retry::RetryResult::Fatal {
                    input: (),
                    error: From::from(error),
                };
            }
        }
    };
}

// Export our macros within the crate as if they were normal symbols.
pub(crate) use {try_potentially_transient, try_transient};

/// Build an [`RetryResult::Ok`] value.
pub(crate) fn retry_result_ok<T, E>(output: T) -> RetryResult<(), (), T, E> {
    RetryResult::Ok {
        reported_input: (),
        output,
    }
}

/// Build either a [`RetryResult::Transient`] or [`RetryResult::Fatal`] value,
/// depending on whether `status` is known to be transient.
pub(crate) fn retry_result_for_status<T, E>(
    status: StatusCode,
    error: E,
) -> RetryResult<(), (), T, E> {
    if status.is_known_transient() {
        RetryResult::Transient { input: (), error }
    } else {
        RetryResult::Fatal { input: (), error }
    }
}

/// Is this error a known transient error?
///
/// We assume errors are permanent until they've been seen in the wild and
/// shown to clear up on retry. Otherwise we'd spend minutes backing off on
/// requests that can never succeed.
pub trait IsKnownTransient {
    /// Is this error likely to be transient?
    fn is_known_transient(&self) -> bool;
}

impl IsKnownTransient for reqwest::Error {
    fn is_known_transient(&self) -> bool {
        if let Some(status) = self.status() {
            status.is_known_transient()
        } else {
            // Connection resets, DNS hiccups and timeouts all land here, and
            // `reqwest` doesn't tell them apart well enough to be picky.
            true
        }
    }
}

impl IsKnownTransient for StatusCode {
    fn is_known_transient(&self) -> bool {
        let transient_failures = [
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::GATEWAY_TIMEOUT,
        ];
        transient_failures.contains(self)
    }
}
