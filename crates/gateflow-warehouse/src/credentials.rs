//! Connection resolution.
//!
//! Nodes carry connection ids, never secrets. The engine asks a
//! `ConnectionProvider` for the handle or the keys at dispatch time.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::adapter::Warehouse;
use crate::error::{Error, Result};

/// Object-store access keys for a bulk load.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStoreCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub session_token: Option<String>,
}

impl ObjectStoreCredentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    /// Read `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and the optional
    /// `AWS_SESSION_TOKEN` from the process environment.
    pub fn from_env() -> Option<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").ok()?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").ok()?;
        Some(Self {
            access_key_id,
            secret_access_key,
            session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
        })
    }
}

impl fmt::Debug for ObjectStoreCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .finish()
    }
}

pub trait ConnectionProvider: Send + Sync {
    fn warehouse(&self, conn_id: &str) -> Result<Arc<dyn Warehouse>>;
    fn object_store(&self, conn_id: &str) -> Result<ObjectStoreCredentials>;
}

/// Fixed map of connection ids, built up front.
#[derive(Default, Clone)]
pub struct StaticProvider {
    warehouses: HashMap<String, Arc<dyn Warehouse>>,
    object_stores: HashMap<String, ObjectStoreCredentials>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_warehouse(mut self, conn_id: impl Into<String>, wh: Arc<dyn Warehouse>) -> Self {
        self.warehouses.insert(conn_id.into(), wh);
        self
    }

    pub fn with_object_store(
        mut self,
        conn_id: impl Into<String>,
        creds: ObjectStoreCredentials,
    ) -> Self {
        self.object_stores.insert(conn_id.into(), creds);
        self
    }
}

impl ConnectionProvider for StaticProvider {
    fn warehouse(&self, conn_id: &str) -> Result<Arc<dyn Warehouse>> {
        self.warehouses
            .get(conn_id)
            .cloned()
            .ok_or_else(|| Error::MissingConnection(conn_id.to_string()))
    }

    fn object_store(&self, conn_id: &str) -> Result<ObjectStoreCredentials> {
        self.object_stores
            .get(conn_id)
            .cloned()
            .ok_or_else(|| Error::MissingConnection(conn_id.to_string()))
    }
}
