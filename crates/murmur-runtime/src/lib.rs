//! Process lifecycle plumbing: the shutdown signal, OS signal watching, the
//! service supervisor, and the job scheduler it tears down in order.

mod scheduler;
mod shutdown;
mod signals;
mod supervisor;


pub use scheduler::{JobFn, JobScheduler};
pub use shutdown::ShutdownSignal;
pub use signals::wait_for_shutdown_signal;
pub use supervisor::ServiceSupervisor;
