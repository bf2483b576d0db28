use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// "Is something accepting TCP connections on this local port?"
#[async_trait]
pub trait PortProbe: Send + Sync + std::fmt::Debug {
    async fn is_listening(&self, port: u16) -> io::Result<bool>;
}

/// Connect probe against `127.0.0.1` and `::1`.
#[derive(Debug, Clone)]
pub struct TcpConnectProbe {
    timeout: Duration,
}

impl TcpConnectProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// Ok(true) = accepted, Ok(false) = refused or no answer within `timeout`.
async fn connect(addr: SocketAddr, timeout: Duration) -> io::Result<bool> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => Ok(true),
        Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => Ok(false),
        Ok(Err(e)) => Err(e),
        Err(_) => Ok(false),
    }
}

#[async_trait]
impl PortProbe for TcpConnectProbe {
    async fn is_listening(&self, port: u16) -> io::Result<bool> {
        let v4 = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        if connect(v4, self.timeout).await? {
            return Ok(true);
        }
        // 仅监听 IPv6 的服务；本机未开 IPv6 时忽略错误
        let v6 = SocketAddr::from((Ipv6Addr::LOCALHOST, port));
        Ok(connect(v6, self.timeout).await.unwrap_or(false))
    }
}

/// TTL cache in front of a [`PortProbe`].
#[derive(Debug, Clone)]
pub struct PortMonitor {
    probe: Arc<dyn PortProbe>,
    ttl: Duration,
    cache: Arc<StdMutex<HashMap<u16, (bool, Instant)>>>,
}

impl PortMonitor {
    pub fn new(probe: Arc<dyn PortProbe>, ttl: Duration) -> Self {
        Self {
            probe,
            ttl,
            cache: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Cached occupancy; probes when the entry is missing or older than the TTL.
    pub async fn is_in_use(&self, port: u16) -> bool {
        let cached = {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            cache
                .get(&port)
                .filter(|(_, at)| at.elapsed() < self.ttl)
                .map(|(in_use, _)| *in_use)
        };
        match cached {
            Some(in_use) => in_use,
            None => self.probe_fresh(port).await,
        }
    }

    /// Bypass the cache and store the fresh result.
    pub async fn probe_fresh(&self, port: u16) -> bool {
        let in_use = match self.probe.is_listening(port).await {
            Ok(in_use) => in_use,
            Err(e) => {
                warn!(port, error = %e, "port probe failed");
                false
            }
        };
        debug!(port, in_use, "port probed");
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(port, (in_use, Instant::now()));
        in_use
    }

    pub fn invalidate(&self, port: u16) {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&port);
    }

    pub fn clear(&self) {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
