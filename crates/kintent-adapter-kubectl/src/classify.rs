//! Map kubectl failures onto [`ClassifiedError`].

use kintent_core::ClassifiedError;

const CONFLICT_MARKERS: &[&str] = &[
    "the object has been modified",
    "(conflict)",
    "(alreadyexists)",
    "already exists",
    "precondition failed",
];

const RETRYABLE_MARKERS: &[&str] = &[
    "(toomanyrequests)",
    "(serviceunavailable)",
    "(internalerror)",
    "(timeout)",
    "(servertimeout)",
    "the server is currently unable to handle the request",
    "unable to connect to the server",
    "connection refused",
    "connection reset by peer",
    "i/o timeout",
    "tls handshake timeout",
    "context deadline exceeded",
    "etcdserver: request timed out",
    "unexpected eof",
    "http2: client connection lost",
];

/// Classify a failed kubectl call from its stderr.
///
/// Anything not recognised as a conflict or a transient failure is fatal.
pub fn classify(stderr: &str) -> ClassifiedError {
    let stderr = stderr.trim();
    let message = if stderr.is_empty() {
        "kubectl exited with an error and no output".to_string()
    } else {
        stderr.to_string()
    };
    let lower = stderr.to_ascii_lowercase();

    if CONFLICT_MARKERS.iter().any(|m| lower.contains(m)) {
        ClassifiedError::Conflict(message)
    } else if RETRYABLE_MARKERS.iter().any(|m| lower.contains(m)) {
        ClassifiedError::Retryable(message)
    } else {
        ClassifiedError::Fatal(message)
    }
}

/// Whether a failed `get` only means the object does not exist.
pub fn is_not_found(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("(notfound)") || lower.contains("\" not found")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_resource_version_is_conflict() {
        let err = classify(
            "Error from server (Conflict): Operation cannot be fulfilled on deployments.apps \"web\": \
             the object has been modified; please apply your changes to the latest version and try again",
        );
        assert!(err.is_conflict());
    }

    #[test]
    fn test_create_of_existing_object_is_conflict() {
        let err = classify(
            "Error from server (AlreadyExists): error when creating \"STDIN\": deployments.apps \"web\" already exists",
        );
        assert!(err.is_conflict());
    }

    #[test]
    fn test_transport_failures_are_retryable() {
        for stderr in [
            "The connection to the server 127.0.0.1:6443 was refused - did you specify the right host or port? connection refused",
            "Unable to connect to the server: net/http: TLS handshake timeout",
            "Error from server (TooManyRequests): the server has received too many requests",
            "Error from server (ServiceUnavailable): the server is currently unable to handle the request",
            "Error from server (InternalError): etcdserver: request timed out",
        ] {
            assert!(classify(stderr).is_retryable(), "{stderr}");
        }
    }

    #[test]
    fn test_validation_and_auth_failures_are_fatal() {
        for stderr in [
            "Error from server (Forbidden): deployments.apps is forbidden: User \"dev\" cannot create resource",
            "The Deployment \"web\" is invalid: spec.replicas: Invalid value: -1",
            "Error from server (NotFound): deployments.apps \"web\" not found",
            "error: You must be logged in to the server (Unauthorized)",
        ] {
            assert!(
                matches!(classify(stderr), ClassifiedError::Fatal(_)),
                "{stderr}"
            );
        }
    }

    #[test]
    fn test_empty_stderr_still_has_message() {
        match classify("  ") {
            ClassifiedError::Fatal(message) => assert!(message.contains("no output")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_not_found() {
        assert!(is_not_found(
            "Error from server (NotFound): deployments.apps \"web\" not found"
        ));
        assert!(!is_not_found("Error from server (Forbidden): forbidden"));
    }
}
