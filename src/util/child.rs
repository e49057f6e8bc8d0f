//! Forked child processes, including function execution.

use std::fmt::Display;
use std::fs::File;
use std::io::Read;
use std::io::Write;
use std::io::{self};
use std::panic::AssertUnwindSafe;
use std::panic::{self};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::sys::wait::waitpid;
use nix::unistd::ForkResult;
use nix::unistd::Pid;
use nix::unistd::fork;
use nix::unistd::pipe2;

use crate::util::panic_message;

/// Exit status of a child whose function succeeded.
pub const EXIT_SUCCESS: i32 = 0;

/// Exit status of a child whose function returned an error.
pub const EXIT_FAILURE: i32 = 1;

/// Exit status of a child whose function panicked.
pub const EXIT_PANIC: i32 = 101;

/// A pipe carrying the child's error message back to the parent.
///
/// The child writes only on failure; an empty pipe at EOF means no message.
struct ResultPipe {
    /// The read end, kept by the parent.
    read: Option<File>,

    /// The write end, kept by the child.
    write: Option<File>,
}

impl ResultPipe {
    fn new() -> io::Result<Self> {
        let (read, write) = pipe2(OFlag::O_CLOEXEC)?;
        Ok(Self {
            read: Some(File::from(read)),
            write: Some(File::from(write)),
        })
    }

    fn close_write(&mut self) {
        let _ = self.write.take();
    }

    fn close_read(&mut self) {
        let _ = self.read.take();
    }

    fn report(&mut self, message: &str) {
        if let Some(write) = self.write.as_mut() {
            let _ = write.write_all(message.as_bytes());
        }
    }

    /// Read until every write end is closed.
    fn drain(&mut self) -> String {
        let mut buffer = Vec::new();
        if let Some(mut read) = self.read.take() {
            let _ = read.read_to_end(&mut buffer);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// How a child process terminated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChildExit {
    /// The child exited on its own, with whatever it wrote to its result pipe.
    Exited { status: i32, message: String },

    /// The child was killed by a signal.
    Signaled(Signal),
}

impl ChildExit {
    /// Whether the child ran its function to a successful end.
    pub fn success(&self) -> bool {
        matches!(self, ChildExit::Exited { status: EXIT_SUCCESS, message } if message.is_empty())
    }
}

/// A forked child process running a single function.
///
/// The child is reaped exactly once. A child that is dropped without having been
/// waited on is reaped in `drop`, blocking until it exits.
pub struct Child {
    /// The process ID of the child.
    pid: Pid,

    /// The pipe for the child's error message.
    pipe: ResultPipe,

    /// The cached exit, once reaped.
    exit: Option<ChildExit>,
}

impl Child {
    /// Run a function in a forked child process.
    ///
    /// The child runs `f`, writes the error (or panic message) to its result pipe,
    /// flushes stdout and exits without unwinding back into the caller's frames. The
    /// child starts with a copy of the caller's whole address space and never
    /// communicates with the parent except through that pipe and its exit status.
    ///
    /// Only the calling thread survives in the child. No other thread of the caller
    /// may hold a lock the child needs, such as the stdout lock, at the moment of the
    /// fork.
    ///
    /// # Returns
    ///
    /// The child handle in the parent, or the error from `pipe2` or `fork`.
    pub fn run<F, E>(f: F) -> io::Result<Self>
    where
        F: FnOnce() -> Result<(), E>,
        E: Display,
    {
        let mut pipe = ResultPipe::new()?;

        // Buffered output would otherwise be written twice.
        let _ = io::stdout().flush();

        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                pipe.close_read();
                let status = match panic::catch_unwind(AssertUnwindSafe(f)) {
                    Ok(Ok(())) => EXIT_SUCCESS,
                    Ok(Err(error)) => {
                        pipe.report(&error.to_string());
                        EXIT_FAILURE
                    }
                    Err(payload) => {
                        pipe.report(&panic_message(payload.as_ref()));
                        EXIT_PANIC
                    }
                };
                pipe.close_write();
                let _ = io::stdout().flush();
                unsafe { libc::_exit(status) }
            }
            Ok(ForkResult::Parent { child }) => {
                pipe.close_write();
                Ok(Self {
                    pid: child,
                    pipe,
                    exit: None,
                })
            }
            Err(errno) => Err(errno.into()),
        }
    }

    /// Return the process ID of the child.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Block until the child exits and return how it exited.
    ///
    /// Only this child's pid is waited on. Repeated calls return the cached exit.
    pub fn wait(&mut self) -> io::Result<ChildExit> {
        if let Some(exit) = &self.exit {
            return Ok(exit.clone());
        }

        // EOF arrives once the child has exited, so a long message cannot fill the
        // pipe and stall the child.
        let message = self.pipe.drain();
        let exit = loop {
            match waitpid(self.pid, None) {
                Ok(WaitStatus::Exited(_, status)) => break ChildExit::Exited { status, message },
                Ok(WaitStatus::Signaled(_, signal, _)) => break ChildExit::Signaled(signal),
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(errno.into()),
            }
        };
        self.exit = Some(exit.clone());
        Ok(exit)
    }
}

impl Drop for Child {
    fn drop(&mut self) {
        if self.exit.is_none() {
            let _ = self.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use anyhow::anyhow;
    use nix::sys::signal;

    use super::*;
    use crate::util::fork_lock;

    #[test]
    fn test_run_success() -> Result<()> {
        let _guard = fork_lock();
        let mut child = Child::run(|| Ok::<(), anyhow::Error>(()))?;
        let exit = child.wait()?;
        assert!(exit.success());
        assert_eq!(
            exit,
            ChildExit::Exited {
                status: EXIT_SUCCESS,
                message: String::new()
            }
        );
        Ok(())
    }

    #[test]
    fn test_run_error() -> Result<()> {
        let _guard = fork_lock();
        let mut child = Child::run(|| Err(anyhow!("Test error")))?;
        match child.wait()? {
            ChildExit::Exited { status, message } => {
                assert_eq!(status, EXIT_FAILURE);
                assert!(message.contains("Test error"));
            }
            other => panic!("unexpected exit: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_run_panic() -> Result<()> {
        let _guard = fork_lock();
        let mut child = Child::run(|| -> Result<()> { panic!("boom") })?;
        let exit = child.wait()?;
        assert!(!exit.success());
        assert!(matches!(
            exit,
            ChildExit::Exited { status: EXIT_PANIC, ref message } if message.contains("boom")
        ));
        Ok(())
    }

    #[test]
    fn test_signaled_child() -> Result<()> {
        let _guard = fork_lock();
        let mut child = Child::run(|| -> Result<()> {
            let _ = signal::raise(Signal::SIGKILL);
            Ok(())
        })?;
        assert_eq!(child.wait()?, ChildExit::Signaled(Signal::SIGKILL));
        Ok(())
    }

    #[test]
    fn test_wait_is_cached() -> Result<()> {
        let _guard = fork_lock();
        let mut child = Child::run(|| Err(anyhow!("once")))?;
        let first = child.wait()?;
        let second = child.wait()?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn test_child_memory_is_private() -> Result<()> {
        let _guard = fork_lock();
        let mut value = 1u32;
        let mut child = Child::run(|| {
            value = 2;
            if value == 2 { Ok(()) } else { Err(anyhow!("write lost")) }
        })?;
        assert!(child.wait()?.success());
        assert_eq!(value, 1);
        Ok(())
    }
}
