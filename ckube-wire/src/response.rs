//! The Kubernetes `Status` response shape.
//!
//! The router renders every error it surfaces to clients (`SelectorError`,
//! `UnknownKey`, `ValueNotNumeric`, `OutOfPage`, `NotFound`, `Unauthorized`,
//! `Upstream`, `Panic`) as one of these, so that unmodified client libraries
//! parse router-originated errors exactly like apiserver-originated ones.
use serde::{Deserialize, Serialize};

/// A Kubernetes status object.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    /// Always `"Status"`.
    pub kind: String,
    /// Always `"v1"`.
    pub api_version: String,
    /// `Success` or `Failure`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    /// A human-readable description of the status of this operation.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// A machine-readable description of why this operation is in the
    /// "Failure" status.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    /// Suggested HTTP return code.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub code: u16,
}

fn is_zero(v: &u16) -> bool {
    *v == 0
}

impl Status {
    /// Build a failure status with the given HTTP code, reason and message.
    pub fn failure(code: u16, reason: &str, message: impl Into<String>) -> Self {
        Self {
            kind: "Status".into(),
            api_version: "v1".into(),
            status: "Failure".into(),
            message: message.into(),
            reason: reason.into(),
            code,
        }
    }
}

#[cfg(test)]
mod test {
    use super::Status;

    #[test]
    fn delete_deserialize_test() {
        let statusresp = r#"{"kind":"Status","apiVersion":"v1","status":"Failure","reason":"NotFound","code":404}"#;
        let s: Status = serde_json::from_str(statusresp).unwrap();
        assert_eq!(s.code, 404);
        assert_eq!(s.reason, "NotFound");
    }

    #[test]
    fn failure_round_trips() {
        let s = Status::failure(400, "BadRequest", "out of page");
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["code"], 400);
        assert_eq!(v["status"], "Failure");
    }
}
