/// A unit of deferred work.
///
/// `run` is invoked at most once, on the queue's worker thread, outside the
/// pending lock. A `true` return means the callee has taken ownership of
/// `self` and the queue must not drop it a second time; callers building
/// plain closures never need this — the blanket [`FnOnce`] impl below always
/// returns `false`.
pub trait Task: Send {
    fn run(self: Box<Self>) -> bool;
}

impl<F> Task for F
where
    F: FnOnce() -> bool + Send,
{
    fn run(self: Box<Self>) -> bool {
        (*self)()
    }
}

pub type BoxedTask = Box<dyn Task>;

/// Wraps a plain `FnOnce()` (no return value) as a [`Task`] that always
/// relinquishes ownership back to the queue after running once.
pub fn task_from_fn<F>(f: F) -> BoxedTask
where
    F: FnOnce() + Send + 'static,
{
    Box::new(move || {
        f();
        false
    })
}
