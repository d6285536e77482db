//! `bookbuddy-events`: row-change events and the pub/sub mechanics that carry them.

pub mod bus;
pub mod change;
pub mod envelope;
pub mod filter;
pub mod in_memory_bus;

pub use bus::{ChangeBus, Subscription};
pub use change::{ChangeError, ChangeEvent, ChangeKind};
pub use envelope::ChangeEnvelope;
pub use filter::ServerFilter;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
