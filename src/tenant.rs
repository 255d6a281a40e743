use std::fmt;

use serde_json::Value;

/// Tenant identifier: either a string or an integer, nothing else.
///
/// Rows carry this in a configured column; it also keys the tenant map
/// inside [`crate::multitenant::MultiTenantKeyProvider`].
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum TenantId {
    Str(String),
    Int(i64),
}

impl TenantId {
    /// Read a tenant id out of a JSON row value. Only strings and
    /// integral numbers qualify.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(TenantId::Str(s.clone())),
            Value::Number(n) => n.as_i64().map(TenantId::Int),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            TenantId::Str(s) => Value::String(s.clone()),
            TenantId::Int(i) => Value::Number((*i).into()),
        }
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenantId::Str(s) => f.write_str(s),
            TenantId::Int(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        TenantId::Str(s.to_owned())
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        TenantId::Str(s)
    }
}

impl From<i64> for TenantId {
    fn from(i: i64) -> Self {
        TenantId::Int(i)
    }
}
