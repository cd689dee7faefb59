// src/protocol/request.rs
use super::control::Control;
use std::fmt;

/// A client request: one protocol operation plus the controls sent with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub operation: Operation,
    pub controls: Vec<Control>,
}

impl Request {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            controls: Vec::new(),
        }
    }

    pub fn with_control(mut self, control: Control) -> Self {
        self.controls.push(control);
        self
    }

    pub fn kind(&self) -> OperationKind {
        self.operation.kind()
    }

    /// The proxied authorization control on this request, if any.
    pub fn proxied_authorization(&self) -> Option<&Control> {
        self.controls.iter().find(|c| c.is_proxied_authorization())
    }
}

impl From<Operation> for Request {
    fn from(operation: Operation) -> Self {
        Self::new(operation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Bind(BindRequest),
    Add(AddRequest),
    Delete(DeleteRequest),
    Modify(ModifyRequest),
    ModifyDn(ModifyDnRequest),
    Compare(CompareRequest),
    Search(SearchRequest),
    Extended(ExtendedRequest),
    /// Abandon the operation with the given message id.
    Abandon(i32),
    Unbind,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Bind(_) => OperationKind::Bind,
            Operation::Add(_) => OperationKind::Add,
            Operation::Delete(_) => OperationKind::Delete,
            Operation::Modify(_) => OperationKind::Modify,
            Operation::ModifyDn(_) => OperationKind::ModifyDn,
            Operation::Compare(_) => OperationKind::Compare,
            Operation::Search(_) => OperationKind::Search,
            Operation::Extended(_) => OperationKind::Extended,
            Operation::Abandon(_) => OperationKind::Abandon,
            Operation::Unbind => OperationKind::Unbind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Bind,
    Add,
    Delete,
    Modify,
    ModifyDn,
    Compare,
    Search,
    Extended,
    Abandon,
    Unbind,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Bind => "bind",
            OperationKind::Add => "add",
            OperationKind::Delete => "delete",
            OperationKind::Modify => "modify",
            OperationKind::ModifyDn => "modify_dn",
            OperationKind::Compare => "compare",
            OperationKind::Search => "search",
            OperationKind::Extended => "extended",
            OperationKind::Abandon => "abandon",
            OperationKind::Unbind => "unbind",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct BindRequest {
    pub version: u8,
    pub name: String,
    pub authentication: Authentication,
}

impl BindRequest {
    pub fn simple(name: impl Into<String>, password: impl Into<Vec<u8>>) -> Self {
        Self {
            version: 3,
            name: name.into(),
            authentication: Authentication::Simple(password.into()),
        }
    }

    pub fn sasl(name: impl Into<String>, mechanism: impl Into<String>) -> Self {
        Self {
            version: 3,
            name: name.into(),
            authentication: Authentication::Sasl {
                mechanism: mechanism.into(),
                credentials: None,
            },
        }
    }

    pub fn is_simple(&self) -> bool {
        matches!(self.authentication, Authentication::Simple(_))
    }

    /// A simple bind naming a DN but carrying no password (RFC 4513
    /// section 5.1.2). Servers that accept it authenticate nobody.
    pub fn is_unauthenticated(&self) -> bool {
        matches!(&self.authentication, Authentication::Simple(password) if password.is_empty())
            && !self.name.is_empty()
    }
}

// Keeps passwords out of logs.
impl fmt::Debug for BindRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindRequest")
            .field("version", &self.version)
            .field("name", &self.name)
            .field("mechanism", &self.authentication.mechanism())
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum Authentication {
    Simple(Vec<u8>),
    Sasl {
        mechanism: String,
        credentials: Option<Vec<u8>>,
    },
}

impl Authentication {
    pub fn mechanism(&self) -> &str {
        match self {
            Authentication::Simple(_) => "SIMPLE",
            Authentication::Sasl { mechanism, .. } => mechanism,
        }
    }
}

impl fmt::Debug for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Authentication({})", self.mechanism())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub values: Vec<Vec<u8>>,
}

impl Attribute {
    pub fn new<V: Into<Vec<u8>>>(name: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddRequest {
    pub entry: String,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    pub entry: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyOperation {
    Add,
    Delete,
    Replace,
    Increment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    pub operation: ModifyOperation,
    pub attribute: Attribute,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyRequest {
    pub object: String,
    pub changes: Vec<Modification>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyDnRequest {
    pub entry: String,
    pub new_rdn: String,
    pub delete_old_rdn: bool,
    pub new_superior: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareRequest {
    pub entry: String,
    pub attribute: String,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    BaseObject,
    SingleLevel,
    WholeSubtree,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerefAliases {
    Never,
    InSearching,
    FindingBase,
    Always,
}

/// Search parameters. The filter is carried in its string representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub base: String,
    pub scope: SearchScope,
    pub deref_aliases: DerefAliases,
    pub size_limit: i32,
    pub time_limit: i32,
    pub types_only: bool,
    pub filter: String,
    pub attributes: Vec<String>,
}

impl SearchRequest {
    pub fn new(base: impl Into<String>, scope: SearchScope, filter: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            scope,
            deref_aliases: DerefAliases::Never,
            size_limit: 0,
            time_limit: 0,
            types_only: false,
            filter: filter.into(),
            attributes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedRequest {
    pub oid: String,
    pub value: Option<Vec<u8>>,
}

impl ExtendedRequest {
    pub fn new(oid: impl Into<String>) -> Self {
        Self {
            oid: oid.into(),
            value: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_debug_hides_password() {
        let bind = BindRequest::simple("uid=alice,dc=example", "s3cret");
        let rendered = format!("{bind:?}");
        assert!(rendered.contains("uid=alice,dc=example"));
        assert!(rendered.contains("SIMPLE"));
        assert!(!rendered.contains("s3cret"));
    }

    #[test]
    fn sasl_bind_is_not_simple() {
        let bind = BindRequest::sasl("", "EXTERNAL");
        assert!(!bind.is_simple());
        assert!(!bind.is_unauthenticated());
        assert_eq!(bind.authentication.mechanism(), "EXTERNAL");
    }

    #[test]
    fn name_without_password_is_unauthenticated_bind() {
        assert!(BindRequest::simple("uid=alice,dc=example", Vec::new()).is_unauthenticated());
        assert!(!BindRequest::simple("uid=alice,dc=example", "pw").is_unauthenticated());
        // Anonymous: no name either.
        assert!(!BindRequest::simple("", Vec::new()).is_unauthenticated());
    }

    #[test]
    fn finds_proxied_authorization_control() {
        let request = Request::new(Operation::Delete(DeleteRequest {
            entry: "cn=x".into(),
        }))
        .with_control(Control::new("1.2.3", false, None))
        .with_control(Control::proxied_authorization("uid=bob"));

        assert_eq!(request.kind(), OperationKind::Delete);
        assert_eq!(
            request.proxied_authorization().and_then(Control::proxied_dn),
            Some("uid=bob")
        );
    }
}
