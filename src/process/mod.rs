// Process module - Launching, observing and supervising application instances

pub mod monitor;
pub mod restart;
pub mod spawner;
pub mod supervisor;
pub mod types;

pub use monitor::{HealthEvent, HealthEventKind, HealthMonitor, MemorySampler, SysinfoSampler, WatchTarget};
pub use restart::{decide, Action, Backoff, Fault, RestartPolicy, RestartTracker};
pub use spawner::{spawn_process, SpawnedProcess};
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorHandle};
pub use types::{AppState, AppStatus, ExitReport, InstanceState, InstanceStatus, ProcessInstance};
