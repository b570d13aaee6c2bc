//! Overlapped I/O engine.
//!
//! Reads and writes are issued under the handle lock and, if the driver
//! reports them pending, waited on outside it using the channel's notifier.
//! At most one read and one write are outstanding per handle. A read that
//! times out stays outstanding and the next `read` resumes it instead of
//! issuing another.

use crate::error::{DeviceError, DeviceResult, Operation};
use crate::handle::{Native, Port, PortHandle};
use crate::port::IoStatus;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Lifecycle of one overlapped operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationState {
    #[default]
    Idle,
    /// Issued and not yet observed complete.
    Issued,
    /// Finished, transferring this many bytes.
    Completed(usize),
    /// The last wait expired; the operation is still outstanding.
    TimedOut,
    /// The driver reported a failure; nothing is outstanding.
    Failed,
}

/// Book-keeping for one direction of a handle.
#[derive(Debug, Default)]
pub(crate) struct PendingOperation {
    state: OperationState,
    issued_at: Option<Instant>,
    requested: usize,
}

impl PendingOperation {
    pub(crate) fn state(&self) -> OperationState {
        self.state
    }

    pub(crate) fn is_pending(&self) -> bool {
        matches!(self.state, OperationState::Issued | OperationState::TimedOut)
    }

    fn issue(&mut self, requested: usize) {
        self.state = OperationState::Issued;
        self.issued_at = Some(Instant::now());
        self.requested = requested;
    }

    fn complete(&mut self, transferred: usize) {
        if let Some(issued_at) = self.issued_at.take() {
            trace!(
                "{} of {} bytes after {:?}",
                transferred,
                self.requested,
                issued_at.elapsed()
            );
        }
        self.state = OperationState::Completed(transferred);
    }

    fn time_out(&mut self) {
        if self.is_pending() {
            self.state = OperationState::TimedOut;
        }
    }

    fn fail(&mut self) {
        self.state = OperationState::Failed;
        self.issued_at = None;
    }
}

/// Issue a read, or resume the outstanding one.
fn read_step(native: &mut Native, buf: &mut [u8], port_id: &str) -> DeviceResult<Option<usize>> {
    let status = if native.read_op.is_pending() {
        native.channel.read_result(buf)
    } else {
        native.read_op.issue(buf.len());
        native.channel.start_read(buf)
    };

    match status {
        Ok(IoStatus::Complete(n)) => {
            native.read_op.complete(n);
            trace!("Read {} bytes from {}", n, port_id);
            Ok(Some(n))
        }
        Ok(IoStatus::Pending) => Ok(None),
        Err(source) => {
            native.read_op.fail();
            warn!("Read on {} failed: {}", port_id, source);
            Err(DeviceError::Read(source))
        }
    }
}

/// Poll the outstanding write. A write that is no longer outstanding
/// reports its last completed count.
fn write_poll(native: &mut Native, port_id: &str) -> DeviceResult<Option<usize>> {
    if !native.write_op.is_pending() {
        return Ok(match native.write_op.state() {
            OperationState::Completed(n) => Some(n),
            _ => Some(0),
        });
    }

    match native.channel.write_result() {
        Ok(IoStatus::Complete(n)) => {
            native.write_op.complete(n);
            trace!("Wrote {} bytes to {}", n, port_id);
            Ok(Some(n))
        }
        Ok(IoStatus::Pending) => Ok(None),
        Err(source) => {
            native.write_op.fail();
            warn!("Write on {} failed: {}", port_id, source);
            Err(DeviceError::Write(source))
        }
    }
}

enum WriteStep {
    Done(usize),
    Issued,
    Busy,
}

impl Port {
    /// Poll `step` under the lock until it yields a count or `deadline`
    /// passes, sleeping on the notifier in between.
    ///
    /// Returns `Ok(None)` on expiry. A handle closed mid-wait surfaces as
    /// [`DeviceError::ShutdownRace`].
    fn await_completion(
        &self,
        operation: Operation,
        deadline: Instant,
        mut step: impl FnMut(&mut Native) -> DeviceResult<Option<usize>>,
    ) -> DeviceResult<Option<usize>> {
        loop {
            let seen = self.notifier().generation();
            match self.with_native(&mut step) {
                Ok(Some(n)) => return Ok(Some(n)),
                Ok(None) => {}
                Err(DeviceError::NotOpen) => {
                    warn!("Port {} closed while a {} was pending", self.port_id(), operation);
                    return Err(DeviceError::ShutdownRace { operation });
                }
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            self.notifier().wait_past(seen, deadline - now);
        }
    }

    pub(crate) fn write(&self, data: &[u8], timeout: Option<Duration>) -> DeviceResult<usize> {
        let start = Instant::now();
        let bound = match timeout {
            Some(bound) => bound,
            None => self.with_native(|native| Ok(native.timeouts.write_total(data.len())))?,
        };
        let deadline = start + bound;
        let port_id = self.port_id();

        loop {
            let step = self.with_native(|native| {
                if native.write_op.is_pending() {
                    return Ok(WriteStep::Busy);
                }
                if data.is_empty() {
                    return Ok(WriteStep::Done(0));
                }
                native.write_op.issue(data.len());
                match native.channel.start_write(data) {
                    Ok(IoStatus::Complete(n)) => {
                        native.write_op.complete(n);
                        trace!("Wrote {} bytes to {}", n, port_id);
                        Ok(WriteStep::Done(n))
                    }
                    Ok(IoStatus::Pending) => Ok(WriteStep::Issued),
                    Err(source) => {
                        native.write_op.fail();
                        warn!("Write on {} failed: {}", port_id, source);
                        Err(DeviceError::Write(source))
                    }
                }
            })?;

            match step {
                WriteStep::Done(n) => return Ok(n),
                WriteStep::Issued => {
                    let done = self.await_completion(Operation::Write, deadline, |native| {
                        write_poll(native, port_id)
                    })?;
                    return match done {
                        Some(n) => Ok(n),
                        None => {
                            self.with_native(|native| {
                                native.write_op.time_out();
                                Ok(())
                            })?;
                            debug!("Write of {} bytes to {} still pending after {:?}", data.len(), port_id, bound);
                            Ok(0)
                        }
                    };
                }
                WriteStep::Busy => {
                    trace!("Resuming pending write on {}", port_id);
                    let earlier = match self.await_completion(Operation::Write, deadline, |native| {
                        write_poll(native, port_id)
                    }) {
                        Ok(earlier) => earlier,
                        // The failed write belonged to an earlier call; ours is still unsent.
                        Err(DeviceError::Write(source)) => {
                            warn!(
                                "Earlier write on {} failed ({}); issuing {} bytes",
                                port_id,
                                source,
                                data.len()
                            );
                            continue;
                        }
                        Err(e) => return Err(e),
                    };
                    if earlier.is_none() {
                        debug!(
                            "Earlier write on {} still pending; {} bytes not issued",
                            port_id,
                            data.len()
                        );
                        return Ok(0);
                    }
                }
            }
        }
    }

    pub(crate) fn read(&self, buf: &mut [u8], timeout: Duration) -> DeviceResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let deadline = Instant::now() + timeout;
        let port_id = self.port_id();

        if let Some(n) = self.with_native(|native| read_step(native, &mut *buf, port_id))? {
            return Ok(n);
        }

        let done = self.await_completion(Operation::Read, deadline, |native| {
            read_step(native, &mut *buf, port_id)
        })?;
        match done {
            Some(n) => Ok(n),
            None => {
                self.with_native(|native| {
                    native.read_op.time_out();
                    Ok(())
                })?;
                trace!("Read on {} timed out after {:?}", port_id, timeout);
                Ok(0)
            }
        }
    }

    pub(crate) fn available_bytes(&self) -> DeviceResult<usize> {
        self.with_native(|native| native.channel.available_bytes().map_err(DeviceError::Read))
    }
}

impl PortHandle {
    /// Write `data`, bounded by the staged write total timeout
    /// (`constant + multiplier * len`).
    ///
    /// Returns the number of bytes the driver reports written; `0` if the
    /// write is still pending when the bound expires, in which case the next
    /// write first waits for it. If that earlier write fails, the failure is
    /// logged and this call goes on to issue `data`; `DeviceError::Write` is
    /// only returned for bytes this call issued.
    pub fn write(&self, data: &[u8]) -> DeviceResult<usize> {
        self.port.write(data, None)
    }

    /// Write `data`, waiting at most `timeout` for completion.
    pub fn write_with_timeout(&self, data: &[u8], timeout: Duration) -> DeviceResult<usize> {
        self.port.write(data, Some(timeout))
    }

    /// Read into `buf`, waiting at most `timeout`.
    ///
    /// Returns `0` on expiry and leaves the read outstanding; the next call
    /// resumes it. On driver failure the outstanding read is cleared.
    pub fn read(&self, buf: &mut [u8], timeout: Duration) -> DeviceResult<usize> {
        self.port.read(buf, timeout)
    }

    /// Bytes received and ready to read, without blocking.
    pub fn available_bytes(&self) -> DeviceResult<usize> {
        self.port.available_bytes()
    }

    /// State of the read direction.
    pub fn pending_read(&self) -> DeviceResult<OperationState> {
        self.port.with_native(|native| Ok(native.read_op.state()))
    }

    /// State of the write direction.
    pub fn pending_write(&self) -> DeviceResult<OperationState> {
        self.port.with_native(|native| Ok(native.write_op.state()))
    }
}
