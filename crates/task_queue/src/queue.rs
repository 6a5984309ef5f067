use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crate::clock::now_ms;
use crate::current;
use crate::error::{Result, TaskQueueError};
use crate::event::{OnceEvent, WakeEvent};
use crate::priority::Priority;
use crate::task::{task_from_fn, BoxedTask, Task};

/// Strictly-increasing submission token, minted under the pending lock.
/// Breaks ties between an immediate task and a delayed task that become
/// eligible at the same instant, and defines the total order delayed
/// entries with equal `fire_at_ms` run in.
type OrderId = u64;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct DelayedKey {
    fire_at_ms: u64,
    order: OrderId,
}

struct ImmediateEntry {
    order: OrderId,
    task: BoxedTask,
}

struct State {
    immediate: VecDeque<ImmediateEntry>,
    delayed: BTreeMap<DelayedKey, BoxedTask>,
    next_order: OrderId,
}

impl State {
    fn mint_order(&mut self) -> OrderId {
        let order = self.next_order;
        self.next_order += 1;
        order
    }
}

enum NextAction {
    Run(BoxedTask),
    /// Milliseconds to sleep before re-checking; `0` means wait indefinitely.
    Sleep(u64),
}

/// Merges the immediate FIFO and the delayed map into a single dispatch
/// decision. See the module-level scheduling policy documented on
/// [`TaskQueue`].
fn get_next_task(state: &mut State) -> NextAction {
    let tick = now_ms();

    let due_key = state
        .delayed
        .first_key_value()
        .filter(|(key, _)| tick >= key.fire_at_ms)
        .map(|(key, _)| *key);

    if let Some(due_key) = due_key {
        let immediate_wins = state
            .immediate
            .front()
            .is_some_and(|entry| entry.order < due_key.order);

        if immediate_wins {
            let entry = state
                .immediate
                .pop_front()
                .expect("checked non-empty above");
            return NextAction::Run(entry.task);
        }

        let task = state
            .delayed
            .remove(&due_key)
            .expect("key was just observed under the same lock");
        return NextAction::Run(task);
    }

    if let Some((key, _)) = state.delayed.first_key_value() {
        let sleep_ms = key.fire_at_ms - tick;
        if let Some(entry) = state.immediate.pop_front() {
            return NextAction::Run(entry.task);
        }
        return NextAction::Sleep(sleep_ms);
    }

    if let Some(entry) = state.immediate.pop_front() {
        return NextAction::Run(entry.task);
    }

    NextAction::Sleep(0)
}

struct Inner {
    name: String,
    priority: Priority,
    state: Mutex<State>,
    quit: AtomicBool,
    wake: WakeEvent,
    started: OnceEvent,
    stopped: OnceEvent,
    worker_thread_id: OnceLock<ThreadId>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
    dead_worker_warned: AtomicBool,
}

/// A single-threaded task queue.
///
/// Producers on any thread call [`TaskQueue::post`], [`TaskQueue::post_delayed`],
/// or [`TaskQueue::post_and_reply`] to hand work to the queue's dedicated
/// worker thread, which runs every task to completion, one at a time, in the
/// order the scheduling policy picks (see the module documentation).
///
/// The value returned by [`TaskQueue::new`] is the queue's unique owner:
/// dropping it runs the full shutdown handshake (stop accepting new
/// dispatch, drain pending immediate work, join the worker thread). Clones
/// obtained from [`TaskQueue::clone`], [`TaskQueue::current`], or captured
/// internally by `post_and_reply` are plain references to the same engine —
/// dropping one of those does nothing. Only the original, owning value
/// drives shutdown.
pub struct TaskQueue {
    inner: Arc<Inner>,
    is_owner: bool,
}

impl TaskQueue {
    /// Spawns the worker thread and blocks until it is ready to accept
    /// submissions.
    pub fn new(name: impl Into<String>, priority: Priority) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            tracing::error!("refusing to construct a task queue with an empty name");
            return Err(TaskQueueError::MissingName);
        }

        let inner = Arc::new(Inner {
            name: name.clone(),
            priority,
            state: Mutex::new(State {
                immediate: VecDeque::new(),
                delayed: BTreeMap::new(),
                next_order: 0,
            }),
            quit: AtomicBool::new(false),
            wake: WakeEvent::new(),
            started: OnceEvent::new(),
            stopped: OnceEvent::new(),
            worker_thread_id: OnceLock::new(),
            join_handle: Mutex::new(None),
            dead_worker_warned: AtomicBool::new(false),
        });

        let worker_inner = Arc::clone(&inner);
        let thread_name = format!("{name}[{}]", priority.as_label());
        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || worker_loop(worker_inner))
            .expect("failed to spawn task queue worker thread");

        *inner.join_handle.lock().unwrap() = Some(handle);
        inner.started.wait();

        tracing::debug!(queue = %name, priority = priority.as_label(), "task queue ready");

        Ok(Self {
            inner,
            is_owner: true,
        })
    }

    fn non_owning(inner: Arc<Inner>) -> Self {
        Self {
            inner,
            is_owner: false,
        }
    }

    /// The queue returned by [`TaskQueue::current`] when called on this
    /// queue's worker thread; `None` on any other thread.
    pub fn current() -> Option<TaskQueue> {
        current::current()
    }

    /// Whether the calling thread is this queue's worker thread.
    pub fn is_current(&self) -> bool {
        self.inner.worker_thread_id.get() == Some(&thread::current().id())
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn priority(&self) -> Priority {
        self.inner.priority
    }

    /// Enqueues `task` to run as soon as the worker reaches it, after every
    /// immediate task already posted from any thread.
    pub fn post(&self, task: impl Task + 'static) {
        self.post_boxed(Box::new(task));
    }

    fn post_boxed(&self, task: BoxedTask) {
        {
            let mut state = self.inner.state.lock().unwrap();
            let order = state.mint_order();
            state.immediate.push_back(ImmediateEntry { order, task });
        }
        tracing::trace!(queue = %self.inner.name, "immediate task posted");
        self.inner.wake.signal();
        self.warn_if_worker_died();
    }

    /// Best-effort check for a worker thread that already exited (most
    /// likely from a task panic). The queue keeps accepting submissions
    /// regardless — they simply pile up undelivered — but this surfaces the
    /// condition once instead of silently swallowing every future post.
    fn warn_if_worker_died(&self) {
        let dead = self
            .inner
            .join_handle
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(JoinHandle::is_finished);

        if dead
            && self
                .inner
                .dead_worker_warned
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            tracing::warn!(
                queue = %self.inner.name,
                "posted to a task queue whose worker thread has already exited"
            );
        }
    }

    /// Enqueues `task` to run no earlier than `delay_ms` from now. The task
    /// may run later if the worker is busy with earlier work.
    pub fn post_delayed(&self, task: impl Task + 'static, delay_ms: u32) {
        let fire_at_ms = now_ms() + u64::from(delay_ms);
        {
            let mut state = self.inner.state.lock().unwrap();
            let order = state.mint_order();
            state
                .delayed
                .insert(DelayedKey { fire_at_ms, order }, Box::new(task));
        }
        tracing::trace!(queue = %self.inner.name, delay_ms, "delayed task posted");
        self.inner.wake.signal();
        self.warn_if_worker_died();
    }

    /// Posts `task` to this queue; once it has run, posts `reply` to
    /// `reply_queue`. Pass `self` as `reply_queue` to re-post `reply` back
    /// onto this same queue.
    ///
    /// If `reply_queue` is dropped before the wrapper task runs, the
    /// reply is still posted — `reply_queue`'s worker thread has already
    /// stopped by then, so it simply accumulates in that queue's immediate
    /// list and is never dispatched. See the crate documentation's note on
    /// dangling replies.
    pub fn post_and_reply(
        &self,
        task: impl Task + 'static,
        reply: impl Task + 'static,
        reply_queue: &TaskQueue,
    ) {
        let reply_queue = reply_queue.clone();
        let task: BoxedTask = Box::new(task);
        let reply: BoxedTask = Box::new(reply);

        self.post_boxed(task_from_fn(move || {
            let _ownership_transferred = task.run();
            reply_queue.post_boxed(reply);
        }));
    }

    fn shutdown(&self) {
        if self.is_current() {
            tracing::error!(
                queue = %self.inner.name,
                "task queue dropped from its own worker thread"
            );
            panic!(
                "TaskQueue \"{}\" dropped from its own worker thread (self-destruction)",
                self.inner.name
            );
        }

        self.inner.quit.store(true, Ordering::Release);
        self.inner.wake.signal();

        // A panicked worker unwinds out of the loop without ever reaching
        // the `stopped.signal()` at its tail, so waiting on `stopped`
        // unconditionally would block forever. Poll it with a bound instead,
        // falling back to the join handle's own finished state to break out
        // once the worker is gone regardless of whether it got to signal.
        while !self.inner.stopped.wait_timeout(Duration::from_millis(50)) {
            let worker_already_dead = self
                .inner
                .join_handle
                .lock()
                .unwrap()
                .as_ref()
                .is_some_and(JoinHandle::is_finished);

            if worker_already_dead {
                break;
            }
        }

        if let Some(handle) = self.inner.join_handle.lock().unwrap().take() {
            let _ = handle.join();
        }

        tracing::debug!(queue = %self.inner.name, "task queue shut down");
    }
}

impl Clone for TaskQueue {
    /// Returns a non-owning reference to the same queue. Dropping the
    /// clone never shuts the queue down — only the original owner does.
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            is_owner: false,
        }
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("name", &self.inner.name)
            .field("priority", &self.inner.priority)
            .field("is_owner", &self.is_owner)
            .finish()
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        if self.is_owner {
            self.shutdown();
        }
    }
}

fn worker_loop(inner: Arc<Inner>) {
    inner
        .worker_thread_id
        .set(thread::current().id())
        .expect("worker thread id set exactly once");

    current::bind(TaskQueue::non_owning(Arc::clone(&inner)));
    inner.started.signal();

    tracing::debug!(queue = %inner.name, "task queue worker started");

    loop {
        let next = {
            let mut state = inner.state.lock().unwrap();
            get_next_task(&mut state)
        };

        match next {
            NextAction::Run(task) => {
                tracing::trace!(queue = %inner.name, "dispatching task");
                let _ownership_transferred = task.run();
                continue;
            }
            NextAction::Sleep(sleep_ms) => {
                if inner.quit.load(Ordering::Acquire) {
                    break;
                }

                if sleep_ms == 0 {
                    inner.wake.wait_forever();
                } else {
                    inner.wake.wait_timeout(Duration::from_millis(sleep_ms));
                }
            }
        }
    }

    inner.stopped.signal();
    tracing::debug!(queue = %inner.name, "task queue worker stopped");
}
