// per-device command queue worker
use super::{BufferStorage, NativeKernel, WorkItem};
use crate::status::Status;
use crossbeam_channel::{Receiver, Sender};
use std::ops::Range;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use tracing::{error, trace};

/// Raw destination of a non-blocking read.
pub(crate) struct HostSlice {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the enqueuing caller guarantees the region stays valid and
// unaliased until the queue has been finished; only the worker touches it.
unsafe impl Send for HostSlice {}

impl HostSlice {
    pub(crate) fn new(dst: &mut [u8]) -> Self {
        Self {
            ptr: dst.as_mut_ptr(),
            len: dst.len(),
        }
    }
}

pub(crate) enum Command {
    Execute {
        kernel: NativeKernel,
        buffer: std::sync::Arc<BufferStorage>,
        offset: [usize; 2],
        extent: [usize; 2],
    },
    Read {
        buffer: std::sync::Arc<BufferStorage>,
        byte_offset: usize,
        dst: HostSlice,
    },
    Finish {
        done: Sender<Result<(), Status>>,
    },
}

pub(crate) struct QueueWorker {
    sender: Option<Sender<Command>>,
    thread: Option<JoinHandle<()>>,
}

impl QueueWorker {
    /// Spawn the worker thread. `fault` simulates the device failing every
    /// kernel it runs.
    pub(crate) fn spawn(name: String, fault: Option<Status>) -> std::io::Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let thread = thread::Builder::new()
            .name(name)
            .spawn(move || run(receiver, fault))?;

        Ok(Self {
            sender: Some(sender),
            thread: Some(thread),
        })
    }

    pub(crate) fn submit(&self, command: Command) -> Result<(), Status> {
        self.sender
            .as_ref()
            .ok_or(Status::INVALID_COMMAND_QUEUE)?
            .send(command)
            .map_err(|_| Status::INVALID_COMMAND_QUEUE)
    }

    /// Block until every earlier command has run.
    pub(crate) fn finish(&self) -> Result<(), Status> {
        let (done, wait) = crossbeam_channel::bounded(1);
        self.submit(Command::Finish { done })?;
        wait.recv().map_err(|_| Status::INVALID_COMMAND_QUEUE)?
    }
}

impl Drop for QueueWorker {
    fn drop(&mut self) {
        // closing the channel lets the worker drain what is left and exit
        self.sender.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

// main loop
fn run(receiver: Receiver<Command>, fault: Option<Status>) {
    let mut failed: Option<Status> = None;

    for command in receiver {
        match command {
            Command::Execute {
                kernel,
                buffer,
                offset,
                extent,
            } => {
                if failed.is_some() {
                    continue;
                }
                if let Some(status) = fault {
                    failed = Some(status);
                    continue;
                }
                if let Err(status) = execute(&kernel, &buffer, offset, extent) {
                    failed = Some(status);
                }
            }
            Command::Read {
                buffer,
                byte_offset,
                dst,
            } => {
                if failed.is_some() {
                    continue;
                }
                let data = buffer.data.lock();
                match data.get(byte_offset..byte_offset + dst.len) {
                    Some(src) => {
                        // SAFETY: see `HostSlice`
                        let dst = unsafe { std::slice::from_raw_parts_mut(dst.ptr, dst.len) };
                        dst.copy_from_slice(src);
                    }
                    None => failed = Some(Status::INVALID_VALUE),
                }
            }
            Command::Finish { done } => {
                let _ = done.send(failed.take().map_or(Ok(()), Err));
            }
        }
    }
}

fn execute(
    kernel: &NativeKernel,
    buffer: &BufferStorage,
    offset: [usize; 2],
    extent: [usize; 2],
) -> Result<(), Status> {
    trace!(?offset, ?extent, "executing ND-range");

    // The kernel runs unlocked on a private copy of the buffer, so queues
    // on other devices execute at the same time. Only the span it changed
    // is written back. Bands cover disjoint rows, so that span never
    // overlaps bytes another queue is writing.
    let before = buffer.data.lock().clone();
    let mut scratch = before.clone();

    let result = catch_unwind(AssertUnwindSafe(|| {
        for y in offset[1]..offset[1] + extent[1] {
            for x in offset[0]..offset[0] + extent[0] {
                let item = WorkItem {
                    global_id: [x, y],
                    global_size: extent,
                    global_offset: offset,
                };
                kernel(&item, &mut scratch);
            }
        }
    }));

    result.map_err(|_| {
        error!("native kernel panicked");
        Status::OUT_OF_RESOURCES
    })?;

    if let Some(span) = changed_span(&before, &scratch) {
        buffer.data.lock()[span.clone()].copy_from_slice(&scratch[span]);
    }
    Ok(())
}

// smallest byte range holding every difference
fn changed_span(before: &[u8], after: &[u8]) -> Option<Range<usize>> {
    let start = before.iter().zip(after).position(|(a, b)| a != b)?;
    let end = before.iter().zip(after).rposition(|(a, b)| a != b)? + 1;
    Some(start..end)
}
