//! RPC request envelope shared by clients and the daemon.

use serde::{Deserialize, Serialize};

/// Body of an RPC request.
///
/// `url` names the target repository (its last path segment). For push
/// requests `data` is `<branch>#<commit>`; for drive requests it is the
/// drive path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestBody {
    /// URL of the repository the request is about.
    pub url: String,
    /// RPC method name, repeated inside the body so it can be signed.
    pub method: String,
    /// Method specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// User, `user:role`, branch or drive key depending on the method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Selects branch protection instead of user role for ACL methods.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub branch: bool,
    /// Byte offset for drive reads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

impl RequestBody {
    /// Body with only url and method set.
    pub fn new(url: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            ..Self::default()
        }
    }

    /// Sets `data`.
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Sets `name`.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Marks the request as a branch protection request.
    pub fn for_branch(mut self, branch: bool) -> Self {
        self.branch = branch;
        self
    }

    /// Sets the drive read offset.
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// A full RPC request: body plus optional auth header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Request body.
    pub body: RequestBody,
    /// Base64 signed event, present when a signed auth scheme is in use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_json_shape() {
        let req = Request {
            body: RequestBody::new("pear://k/foo", "push").with_data("master#abc"),
            header: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"body": {"url": "pear://k/foo", "method": "push", "data": "master#abc"}})
        );
    }

    #[test]
    fn test_request_defaults_when_fields_missing() {
        let req: Request =
            serde_json::from_str(r#"{"body":{"url":"u","method":"get-acl","branch":true}}"#).unwrap();
        assert!(req.body.branch);
        assert!(req.body.data.is_none());
        assert!(req.header.is_none());
    }
}
