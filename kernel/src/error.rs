//! Error types for the System Alpha kernel
//!
//! Two layers: [`KernelError`] is the structured error type used between
//! kernel subsystems, and [`Errno`] is the small negative-integer taxonomy
//! that crosses the syscall boundary in `eax`.

use core::fmt;

/// Result alias used throughout the kernel.
pub type KernelResult<T> = Result<T, KernelError>;

/// Main kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// Physical frame stack is empty
    OutOfFrames,
    /// Kernel heap cannot satisfy the request
    OutOfHeap {
        requested: usize,
    },
    /// The fixed node pool backing the per-task page lists is exhausted
    PageListExhausted,
    /// No free slot in the task table
    TaskTableFull,
    /// PID does not name a live task
    ProcessNotFound {
        pid: u32,
    },
    /// Receiver mailbox is at capacity
    MailboxFull {
        pid: u32,
    },
    /// Caller mailbox has no pending message
    MailboxEmpty,
    /// Virtual address is not mapped in the active space
    UnmappedAddress {
        vaddr: usize,
    },
    InvalidArgument {
        name: &'static str,
    },
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::OutOfFrames => write!(f, "out of physical frames"),
            KernelError::OutOfHeap { requested } => {
                write!(f, "kernel heap exhausted ({} bytes requested)", requested)
            }
            KernelError::PageListExhausted => write!(f, "user page node pool exhausted"),
            KernelError::TaskTableFull => write!(f, "no free task slot"),
            KernelError::ProcessNotFound { pid } => write!(f, "no such process: {}", pid),
            KernelError::MailboxFull { pid } => write!(f, "mailbox full for pid {}", pid),
            KernelError::MailboxEmpty => write!(f, "mailbox empty"),
            KernelError::UnmappedAddress { vaddr } => {
                write!(f, "address {:#010x} not mapped", vaddr)
            }
            KernelError::InvalidArgument { name } => write!(f, "invalid argument: {}", name),
        }
    }
}

/// Syscall error codes, returned negated in `eax`.
///
/// `Again` is the blocking signal for `send`/`recv`: the handler has
/// already yielded the caller's slice, so a retry runs only after the
/// scheduler picks the caller again.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    Inval = 1,
    NoSys = 2,
    Perm = 3,
    NoMem = 4,
    Again = 5,
}

impl Errno {
    /// The negative `eax` encoding of this error.
    pub const fn as_ret(self) -> i32 {
        -(self as i32)
    }

    /// Decode a negative syscall return value.
    pub fn from_ret(ret: i32) -> Option<Self> {
        match -ret {
            1 => Some(Errno::Inval),
            2 => Some(Errno::NoSys),
            3 => Some(Errno::Perm),
            4 => Some(Errno::NoMem),
            5 => Some(Errno::Again),
            _ => None,
        }
    }
}

impl From<KernelError> for Errno {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::OutOfFrames | KernelError::OutOfHeap { .. } => Errno::NoMem,
            KernelError::PageListExhausted => Errno::NoMem,
            KernelError::TaskTableFull => Errno::NoMem,
            KernelError::ProcessNotFound { .. } => Errno::Inval,
            KernelError::MailboxFull { .. } | KernelError::MailboxEmpty => Errno::Again,
            KernelError::UnmappedAddress { .. } => Errno::Inval,
            KernelError::InvalidArgument { .. } => Errno::Inval,
        }
    }
}
