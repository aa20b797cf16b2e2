//! Event dispatch and persistence for short-lived charm invocations: hierarchical
//! handles, typed event declarations, observer bindings, stored-state bags and the
//! dispatcher that replays deferred notices before delivering a trigger.

pub mod config;
pub mod dispatcher;
pub mod entry;
pub mod error;
pub mod event;
pub mod handle;
pub mod observer;
pub mod state;

pub use charm_store::{LockPolicy, Notice, ObserverRef, StateKey};
pub use charm_value::{Snapshot, Value};
pub use config::DispatcherConfig;
pub use dispatcher::{Aborted, COMMIT, DispatchReport, Dispatcher, FRAMEWORK_PATH, PRE_COMMIT, Phase};
pub use entry::{invoke, run_invocation};
pub use error::{HandleError, KernelError, RegistrationError, SnapshotError};
pub use event::{Event, EventRegistry, Outcome, Payload, PayloadType, Trigger};
pub use handle::{Handle, HandleRegistry};
pub use observer::{Binding, ObserverTable};
pub use state::StateBag;
