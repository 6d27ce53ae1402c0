//! Background threads with cooperative shutdown.

use {
    crate::error::Result,
    log::{debug, error},
    std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread::{self, JoinHandle},
    },
};

/// Shutdown flag handed to a worker body.
#[derive(Debug, Clone, Default)]
pub(crate) struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub(crate) fn is_requested(&self) -> bool {
        self.0
            .load(Ordering::Relaxed)
    }

    fn request(&self) {
        self.0
            .store(true, Ordering::Relaxed);
    }
}

/// A named thread that runs until its body returns or shutdown is requested.
///
/// Bodies must poll [`Shutdown::is_requested`] at least every few hundred
/// milliseconds; dropping the worker blocks until the thread has exited.
pub(crate) struct Worker {
    handle: Option<JoinHandle<()>>,
    shutdown: Shutdown,
    name: String,
}

impl Worker {
    pub(crate) fn spawn<F>(name: &str, body: F) -> Result<Self>
    where
        F: FnOnce(Shutdown) + Send + 'static,
    {
        let shutdown = Shutdown::default();
        let flag = shutdown.clone();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(flag))?;
        debug!("Started {name}");

        Ok(Self {
            handle: Some(handle),
            shutdown,
            name: name.to_string(),
        })
    }

    pub(crate) fn stop(&mut self) {
        self.shutdown
            .request();
        if let Some(handle) = self
            .handle
            .take()
        {
            if handle
                .join()
                .is_err()
            {
                error!("{} panicked", self.name);
            } else {
                debug!("Stopped {}", self.name);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}
