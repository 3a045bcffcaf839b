pub mod adapter;
pub mod manager;
pub mod state_machine;

pub use adapter::{
    AdapterError, CliProviderAdapter, ProcessExit, ProviderAdapter, ResumeDirective, SpawnResult,
    SpawnSpec, StubAdapter,
};
pub use manager::{SessionError, SessionLifecycleManager, SessionNotice, StartOptions};
pub use state_machine::{can_transition, InvalidTransition, SessionStateMachine};
