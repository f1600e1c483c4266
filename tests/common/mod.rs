//! Mock backend clients for resolver and cache tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::Mutex;

use node_resolver::api::{
    PrimaryApi, PrimaryNetwork, PrimaryServer, PublicIpv4, PublicIpv6, PublicNet, SecondaryApi,
    SecondaryServer, ServerType,
};
use node_resolver::ApiError;

static TRACING: Once = Once::new();

/// Route crate logs through the test harness, once per process. Controlled
/// by `RUST_LOG` like the production subscriber.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Failure a fake backend should produce on its next calls.
#[derive(Clone)]
pub enum FakeFailure {
    Transport,
    RateLimited(SystemTime),
}

impl FakeFailure {
    fn to_error(&self, op: &'static str) -> ApiError {
        match self {
            FakeFailure::Transport => ApiError::transport(op, "connection refused"),
            FakeFailure::RateLimited(retry_after) => ApiError::RateLimited {
                retry_after: *retry_after,
            },
        }
    }
}

pub fn primary_server(id: i64, name: &str) -> PrimaryServer {
    PrimaryServer {
        id,
        name: name.to_string(),
        status: "running".to_string(),
        public_net: PublicNet {
            ipv4: Some(PublicIpv4 {
                ip: "1.2.3.4".parse().unwrap(),
            }),
            ipv6: Some(PublicIpv6 {
                ip: "2001:db8:1234::/64".to_string(),
            }),
        },
        private_net: Vec::new(),
        server_type: ServerType {
            name: "cx22".to_string(),
        },
    }
}

pub fn secondary_server(id: i64, name: &str) -> SecondaryServer {
    SecondaryServer {
        id,
        name: name.to_string(),
        ipv4: "123.123.123.12".to_string(),
        ipv6_network: "2a01:f48:111:4221::".to_string(),
        product: "AX41-NVMe".to_string(),
        dc: "FSN1-DC14".to_string(),
    }
}

#[derive(Default)]
pub struct FakePrimary {
    pub servers: Mutex<Vec<PrimaryServer>>,
    pub networks: Mutex<Vec<PrimaryNetwork>>,
    pub failure: Mutex<Option<FakeFailure>>,
    pub server_calls: AtomicUsize,
    pub network_calls: AtomicUsize,
}

impl FakePrimary {
    pub fn with_servers(servers: Vec<PrimaryServer>) -> Self {
        Self {
            servers: Mutex::new(servers),
            ..Self::default()
        }
    }

    pub fn server_calls(&self) -> usize {
        self.server_calls.load(Ordering::SeqCst)
    }

    fn check_failure(&self, op: &'static str) -> Result<(), ApiError> {
        match self.failure.lock().as_ref() {
            Some(failure) => Err(failure.to_error(op)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PrimaryApi for FakePrimary {
    async fn server_by_id(&self, id: i64) -> Result<Option<PrimaryServer>, ApiError> {
        self.server_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure("primary/get-server-by-id")?;
        Ok(self.servers.lock().iter().find(|s| s.id == id).cloned())
    }

    async fn server_by_name(&self, name: &str) -> Result<Option<PrimaryServer>, ApiError> {
        self.server_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure("primary/get-server-by-name")?;
        Ok(self.servers.lock().iter().find(|s| s.name == name).cloned())
    }

    async fn network(&self, id_or_name: &str) -> Result<Option<PrimaryNetwork>, ApiError> {
        self.network_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure("primary/get-network")?;
        Ok(self
            .networks
            .lock()
            .iter()
            .find(|n| n.name == id_or_name || n.id.to_string() == id_or_name)
            .cloned())
    }
}

#[derive(Default)]
pub struct FakeSecondary {
    pub servers: Mutex<Vec<SecondaryServer>>,
    pub failure: Mutex<Option<FakeFailure>>,
    pub list_calls: AtomicUsize,
}

impl FakeSecondary {
    pub fn with_servers(servers: Vec<SecondaryServer>) -> Self {
        Self {
            servers: Mutex::new(servers),
            ..Self::default()
        }
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecondaryApi for FakeSecondary {
    async fn list_servers(&self) -> Result<Vec<SecondaryServer>, ApiError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.failure.lock().as_ref() {
            return Err(failure.to_error("secondary/list-servers"));
        }
        Ok(self.servers.lock().clone())
    }
}
