// Thread-local binding from a worker thread back to the queue it drives.
// Set once, by the worker, before it starts dispatching tasks; read by
// `TaskQueue::current()` from inside a running task that wants to know
// "which queue am I on" without holding an explicit reference.

use std::cell::RefCell;

use crate::queue::TaskQueue;

thread_local! {
    static CURRENT_QUEUE: RefCell<Option<TaskQueue>> = const { RefCell::new(None) };
}

pub(crate) fn bind(queue: TaskQueue) {
    CURRENT_QUEUE.with(|cell| {
        *cell.borrow_mut() = Some(queue);
    });
}

pub(crate) fn current() -> Option<TaskQueue> {
    CURRENT_QUEUE.with(|cell| cell.borrow().clone())
}
