pub mod balancer;
pub mod broadcast;
pub mod discovery;
pub mod router;

pub use balancer::LoadBalancer;
pub use broadcast::Broadcaster;
pub use discovery::{MachineDiscovery, MachineMapServer};
pub use router::{DispatchMode, InboundHandler, MessageFormatter, SocketRouter};
