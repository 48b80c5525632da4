use std::time::Duration;

/// Attempts per chunk before the whole upload is abandoned.
pub const UPLOAD_ATTEMPTS: u32 = 3;

/// Fixed delay between attempts.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Retry a closure on transient `ureq::Error`s under the upload policy:
/// three attempts, one second apart. Client errors are never retried.
#[allow(clippy::result_large_err)]
pub fn retry_request<T>(
    op_name: &str,
    f: impl Fn() -> Result<T, ureq::Error>,
) -> Result<T, ureq::Error> {
    retry_request_with(op_name, is_retryable, f)
}

/// Like [`retry_request`] with a caller-chosen classification. Chunk uploads
/// use this to also retry CRC-mismatch rejections, where the bytes were
/// damaged in transit and a resend is exactly the fix.
#[allow(clippy::result_large_err)]
pub fn retry_request_with<T>(
    op_name: &str,
    retryable: impl Fn(&ureq::Error) -> bool,
    f: impl Fn() -> Result<T, ureq::Error>,
) -> Result<T, ureq::Error> {
    let mut last_err = None;

    for attempt in 0..UPLOAD_ATTEMPTS {
        if attempt > 0 {
            std::thread::sleep(RETRY_DELAY);
        }
        match f() {
            Ok(val) => return Ok(val),
            Err(e) if retryable(&e) && attempt + 1 < UPLOAD_ATTEMPTS => {
                tracing::warn!(
                    "{op_name}: transient error (attempt {}/{UPLOAD_ATTEMPTS}), retrying: {e}",
                    attempt + 1,
                );
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap())
}

/// Whether an HTTP error is transient and worth retrying.
pub fn is_retryable(err: &ureq::Error) -> bool {
    match err {
        ureq::Error::Transport(_) => true,
        ureq::Error::Status(code, _) => *code == 429 || *code >= 500,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering::Relaxed};

    use super::*;

    fn status_error(code: u16) -> ureq::Error {
        let resp = ureq::Response::new(code, "Error", "").unwrap();
        ureq::Error::Status(code, resp)
    }

    #[test]
    fn server_errors_are_retryable() {
        assert!(is_retryable(&status_error(500)));
        assert!(is_retryable(&status_error(503)));
        assert!(is_retryable(&status_error(429)));
    }

    #[test]
    fn client_errors_are_not_retryable() {
        assert!(!is_retryable(&status_error(400)));
        assert!(!is_retryable(&status_error(403)));
        assert!(!is_retryable(&status_error(404)));
    }

    #[test]
    fn gives_up_immediately_on_client_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_request("test", || {
            calls.fetch_add(1, Relaxed);
            Err(status_error(400))
        });
        assert!(result.is_err());
        assert_eq!(calls.load(Relaxed), 1);
    }

    #[test]
    fn exhausts_the_attempt_budget_on_server_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_request("test", || {
            calls.fetch_add(1, Relaxed);
            Err(status_error(500))
        });
        assert!(result.is_err());
        assert_eq!(calls.load(Relaxed), UPLOAD_ATTEMPTS);
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_request("test", || {
            if calls.fetch_add(1, Relaxed) < 1 {
                Err(status_error(502))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Relaxed), 2);
    }
}
