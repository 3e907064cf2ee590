//! # devsync Client
//!
//! Managed-session engine for device management over an abstract pub/sub
//! transport.
//!
//! ## Components
//!
//! - [`Transport`]: the broker seam; implementations publish and feed
//!   [`TransportEvent`]s to the session runtime
//! - [`CorrelationEngine`]: request/response matching for client-initiated
//!   operations
//! - [`PublishWorker`] / [`ActionWorker`]: single-consumer queues for
//!   outbound traffic and long-running device actions
//! - [`handlers`]: one operation handler per server request kind
//! - [`ManagedClient`]: the session lifecycle (manage, renew, reconnect
//!   recovery, unmanage)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod correlation;
pub mod error;
pub mod handlers;
pub mod publisher;
pub mod session;
pub mod transport;
pub mod worker;

pub use correlation::{CorrelationEngine, RESPONSE_TIMEOUT};
pub use error::ClientError;
pub use handlers::{
    ActionRequest, ActionStatus, CustomAction, CustomActionHandler, DeviceActionHandler,
    FirmwareHandle, FirmwareHandler, HandlerRegistry,
};
pub use publisher::{Outbound, PublishWorker};
pub use session::{ManagedClient, SessionOptions, RENEWAL_MARGIN};
pub use transport::{Qos, Transport, TransportError, TransportEvent};
pub use worker::{ActionJob, ActionWorker};
