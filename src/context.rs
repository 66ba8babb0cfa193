/// Identity of the caller, built once per request by the identity layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Opaque per-user token
    pub owner: String,
    /// Unique id of this request, used to address its one-shot topics
    pub request_id: String,
}

impl RequestContext {
    pub fn new(owner: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            request_id: request_id.into(),
        }
    }
}
