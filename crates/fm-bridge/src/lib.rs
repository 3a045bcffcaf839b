pub mod api_error;
pub mod delta;
pub mod http_api;
pub mod protocol;
pub mod session_bus;

pub use api_error::ApiError;
pub use delta::{DeltaError, DeltaTracker};
pub use http_api::{api_router, ApiState};
pub use protocol::{BlockKind, BridgeMessage, StreamBlock};
pub use session_bus::SessionBus;
