use std::thread::{self, ThreadId};

/// Identifies the thread that owns project registry mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundDispatcher {
    thread: ThreadId,
    name: Option<String>,
}

impl ForegroundDispatcher {
    /// Bind to the calling thread.
    pub fn current() -> Self {
        let current = thread::current();
        Self {
            thread: current.id(),
            name: current.name().map(str::to_owned),
        }
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread
    }

    pub fn is_foreground_thread(&self) -> bool {
        thread::current().id() == self.thread
    }

    /// Panics unless called on the foreground thread.
    #[track_caller]
    pub fn assert_foreground_thread(&self) {
        if !self.is_foreground_thread() {
            let current = thread::current();
            panic!(
                "project manager accessed off the foreground thread (foreground: {:?} {:?}, caller: {:?} {:?})",
                self.name,
                self.thread,
                current.name(),
                current.id()
            );
        }
    }
}
