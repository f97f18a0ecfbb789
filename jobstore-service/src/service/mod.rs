//! Service Module
//!
//! The execution coordinator and the workers it hands jobs to.

pub mod job;
pub mod reaper;
pub mod remote;
pub mod runner;

/// Name of the current OS thread, stamped on records this instance creates or activates
pub(crate) fn current_thread_name() -> String {
    let thread = std::thread::current();
    match thread.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", thread.id()),
    }
}
