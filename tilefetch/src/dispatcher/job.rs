//! Job trait for work executed on the dispatcher.

use std::fmt;

/// A unit of work executed once on a dispatcher worker.
///
/// Jobs are consumed by [`run`](Job::run). A job that is cancelled before a
/// worker picks it up is dropped without running, so any cleanup a job needs
/// on every path belongs in `run` (or in a drop guard created there).
///
/// # Example
///
/// ```
/// use tilefetch::dispatcher::Job;
///
/// struct Greet(String);
///
/// impl Job for Greet {
///     fn name(&self) -> String {
///         format!("greet {}", self.0)
///     }
///
///     fn run(self: Box<Self>) {
///         println!("hello {}", self.0);
///     }
/// }
/// ```
pub trait Job: Send + 'static {
    /// Short description for logging.
    fn name(&self) -> String;

    /// Execute the job.
    fn run(self: Box<Self>);
}

/// Adapts a closure into a [`Job`].
pub struct FnJob<F> {
    name: String,
    f: F,
}

impl<F> FnJob<F>
where
    F: FnOnce() + Send + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Job for FnJob<F>
where
    F: FnOnce() + Send + 'static,
{
    fn name(&self) -> String {
        self.name.clone()
    }

    fn run(self: Box<Self>) {
        (self.f)()
    }
}

impl<F> fmt::Debug for FnJob<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnJob").field("name", &self.name).finish()
    }
}
