use serde::{Deserialize, Serialize};

/// Claim kinds this service reads from validated bearer tokens.
pub mod claims {
    pub const UPN: &str = "upn";
    pub const PREFERRED_USERNAME: &str = "preferred_username";
    pub const OBJECT_ID: &str = "oid";
    pub const SCOPE: &str = "scp";
    pub const ROLES: &str = "roles";
    /// `idtyp` is "app" on tokens issued to an application rather than a user.
    pub const IDENTITY_TYPE: &str = "idtyp";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub kind: String,
    pub value: String,
}

impl Claim {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

/// The caller identity dehydrated from a validated bearer token.
///
/// Holds the flattened claim list and, when built from a request, the raw
/// assertion so the token broker can exchange it downstream.
#[derive(Debug, Clone, Default)]
pub struct ClaimsPrincipal {
    claims: Vec<Claim>,
    assertion: Option<String>,
}

impl ClaimsPrincipal {
    pub fn new(claims: Vec<Claim>) -> Self {
        Self {
            claims,
            assertion: None,
        }
    }

    pub fn with_assertion(mut self, assertion: impl Into<String>) -> Self {
        self.assertion = Some(assertion.into());
        self
    }

    /// A principal carrying nothing but a UPN claim. The token broker uses
    /// this to retry a username acquisition through the delegated path.
    pub fn from_upn(upn: &str) -> Self {
        Self::new(vec![Claim::new(claims::UPN, upn)])
    }

    /// Builds a principal from decoded token claims. String claims map
    /// one-to-one; array claims (e.g. `roles`) produce one claim per element.
    pub fn from_json_claims(decoded: &serde_json::Value) -> Self {
        let mut out = Vec::new();
        if let Some(map) = decoded.as_object() {
            for (kind, value) in map {
                match value {
                    serde_json::Value::String(s) => out.push(Claim::new(kind, s.clone())),
                    serde_json::Value::Array(items) => {
                        for item in items {
                            let value = item
                                .as_str()
                                .map(str::to_string)
                                .unwrap_or_else(|| item.to_string());
                            out.push(Claim::new(kind, value));
                        }
                    }
                    serde_json::Value::Bool(b) => out.push(Claim::new(kind, b.to_string())),
                    serde_json::Value::Number(n) => out.push(Claim::new(kind, n.to_string())),
                    _ => {}
                }
            }
        }
        Self::new(out)
    }

    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    pub fn assertion(&self) -> Option<&str> {
        self.assertion.as_deref()
    }

    /// First claim of the given kind.
    pub fn claim(&self, kind: &str) -> Option<&str> {
        self.claims
            .iter()
            .find(|c| c.kind == kind)
            .map(|c| c.value.as_str())
    }

    /// The user principal name; tokens without `upn` carry it as
    /// `preferred_username`.
    pub fn upn(&self) -> Option<&str> {
        self.claim(claims::UPN)
            .or_else(|| self.claim(claims::PREFERRED_USERNAME))
    }

    pub fn object_id(&self) -> Option<&str> {
        self.claim(claims::OBJECT_ID)
    }

    /// Delegated scopes, space-separated in the `scp` claim.
    pub fn scopes(&self) -> Vec<&str> {
        self.claim(claims::SCOPE)
            .map(|s| s.split_whitespace().collect())
            .unwrap_or_default()
    }

    /// Application permissions, one `roles` claim per granted role.
    pub fn app_roles(&self) -> Vec<&str> {
        self.claims
            .iter()
            .filter(|c| c.kind == claims::ROLES)
            .map(|c| c.value.as_str())
            .collect()
    }

    pub fn is_app_only(&self) -> bool {
        self.claim(claims::IDENTITY_TYPE) == Some("app")
    }
}

/// How a caller identity is handed to the token broker.
#[derive(Debug, Clone)]
pub enum IdentityRef {
    Principal(ClaimsPrincipal),
    Claims(Vec<Claim>),
    Username(String),
}
