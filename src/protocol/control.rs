// src/protocol/control.rs

/// Proxied authorization v2 request control (RFC 4370).
pub const PROXIED_AUTHORIZATION_OID: &str = "2.16.840.1.113730.3.4.18";

/// A request or response control attached to a protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub oid: String,
    pub criticality: bool,
    pub value: Option<Vec<u8>>,
}

impl Control {
    pub fn new(oid: impl Into<String>, criticality: bool, value: Option<Vec<u8>>) -> Self {
        Self {
            oid: oid.into(),
            criticality,
            value,
        }
    }

    /// Builds a critical proxied authorization control asserting `dn`.
    ///
    /// The control value is the authorization identity in its `dn:` form.
    pub fn proxied_authorization(dn: &str) -> Self {
        Self::new(
            PROXIED_AUTHORIZATION_OID,
            true,
            Some(format!("dn:{dn}").into_bytes()),
        )
    }

    pub fn is_proxied_authorization(&self) -> bool {
        self.oid == PROXIED_AUTHORIZATION_OID
    }

    /// The asserted identity with its `dn:` prefix removed, if this is a
    /// proxied authorization control carrying a DN.
    pub fn proxied_dn(&self) -> Option<&str> {
        if !self.is_proxied_authorization() {
            return None;
        }
        let value = std::str::from_utf8(self.value.as_deref()?).ok()?;
        value.strip_prefix("dn:")
    }
}
