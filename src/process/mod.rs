pub mod error;
pub mod events;
pub mod handle;
pub mod launch;
pub mod state;
pub mod status_store;
pub mod supervisor;

pub use error::{ProcessError, ProcessResult};
pub use events::{server_event_channel, OutputStream, ServerEvent, ServerEventReceiver, ServerEventSender};
pub use handle::{OwnedProcess, ProcessPoll, ReconnectedProcess, ServerProcess};
pub use launch::{find_server_jar, resolve_java, LaunchSpec};
pub use state::{ExitChoice, RunMode, StopMode, StopOutcome, SupervisorState};
pub use status_store::{StatusRecord, StatusStore, STATUS_FILE_NAME};
pub use supervisor::{ProcessSupervisor, STOP_COMMAND};
