use std::{
    io,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use parking_lot::{Condvar, Mutex};

use crate::{RuntimeError, Value};

type ThreadResult = Result<Value, RuntimeError>;

/// Native thread running one execution context's toplevel.
#[derive(Debug)]
pub struct ContextThread {
    name: Arc<str>,
    handle: JoinHandle<ThreadResult>,
    done: Arc<(Mutex<bool>, Condvar)>,
}

/// Flags the thread as done however its body exits, panics included.
struct DoneSignal(Arc<(Mutex<bool>, Condvar)>);

impl Drop for DoneSignal {
    fn drop(&mut self) {
        let (ref mx, ref cv) = *self.0;
        *mx.lock() = true;
        cv.notify_all();
    }
}

impl ContextThread {
    pub fn spawn<F>(name: &str, f: F) -> io::Result<Self>
    where
        F: FnOnce() -> ThreadResult,
        F: Send + 'static,
    {
        let done = Arc::new((Mutex::new(false), Condvar::new()));
        let signal = DoneSignal(done.clone());
        let handle = thread::Builder::new()
            .name(format!("ctx-{name}"))
            .spawn(move || {
                let _signal = signal;
                f()
            })?;
        Ok(Self {
            name: Arc::from(name),
            handle,
            done,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits up to `dur` for the thread to finish. Returns whether it did.
    pub fn join_timeout(&self, dur: Duration) -> bool {
        let (ref mx, ref cv) = *self.done;
        let mut done = mx.lock();
        if *done {
            return true;
        }
        let res = cv.wait_for(&mut done, dur);
        !res.timed_out() || *done
    }

    pub fn join(self) -> ThreadResult {
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => {
                log::error!("thread {} panicked", self.name);
                Err(RuntimeError::ThreadPanicked(self.name))
            }
        }
    }
}
