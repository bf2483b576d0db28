//! Liveness probes: TCP port occupancy and OS process table.

mod port;
mod process;

pub use port::{PortMonitor, PortProbe, TcpConnectProbe};
pub use process::{ProcessProbe, SysinfoProcessProbe};
