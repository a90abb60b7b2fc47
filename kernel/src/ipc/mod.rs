//! Message-passing IPC
//!
//! Every task owns one bounded mailbox: a fixed FIFO ring of
//! [`MAX_MESSAGES`] messages. `send` enqueues at the tail, `recv`
//! dequeues at the head; a full mailbox is the sender's problem (it
//! yields and retries), an empty one is the receiver's. The ring is the
//! arena rendering of a linked message list: no allocation, no pointer
//! graphs, and dropping the task slot drops every pending message with
//! it.

use crate::error::Errno;
use crate::sched::task::Pid;

/// Mailbox capacity per task.
pub const MAX_MESSAGES: usize = 64;

/// Number of argument words carried by one message.
pub const MESSAGE_ARGS: usize = 5;

/// One queued message. Owned by the receiving mailbox until `recv`
/// consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub sender: Pid,
    pub args: [i32; MESSAGE_ARGS],
}

impl Message {
    pub const fn new(sender: Pid, args: [i32; MESSAGE_ARGS]) -> Self {
        Self { sender, args }
    }

    /// Ring filler value; never observable through `pop`.
    const EMPTY: Message = Message::new(Pid(0), [0; MESSAGE_ARGS]);
}

/// IPC-specific errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcError {
    /// The receiver already holds [`MAX_MESSAGES`] messages.
    MailboxFull,
    /// `recv` found nothing pending.
    MailboxEmpty,
}

impl From<IpcError> for Errno {
    fn from(err: IpcError) -> Self {
        match err {
            // Both directions block; the caller yields and retries.
            IpcError::MailboxFull | IpcError::MailboxEmpty => Errno::Again,
        }
    }
}

/// Bounded per-task FIFO of pending messages.
pub struct Mailbox {
    slots: [Message; MAX_MESSAGES],
    head: usize,
    count: usize,
}

impl Mailbox {
    pub const fn new() -> Self {
        Self {
            slots: [Message::EMPTY; MAX_MESSAGES],
            head: 0,
            count: 0,
        }
    }

    /// Enqueue at the tail. Delivery is strictly FIFO per receiver.
    pub fn push(&mut self, message: Message) -> Result<(), IpcError> {
        if self.count == MAX_MESSAGES {
            return Err(IpcError::MailboxFull);
        }
        let tail = (self.head + self.count) % MAX_MESSAGES;
        self.slots[tail] = message;
        self.count += 1;
        Ok(())
    }

    /// Dequeue the head, consuming the message.
    pub fn pop(&mut self) -> Option<Message> {
        if self.count == 0 {
            return None;
        }
        let message = self.slots[self.head];
        self.head = (self.head + 1) % MAX_MESSAGES;
        self.count -= 1;
        Some(message)
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == MAX_MESSAGES
    }

    /// Drop every pending message. Runs when a task slot is recycled so a
    /// new task never inherits a corpse's mail.
    pub fn clear(&mut self) {
        self.head = 0;
        self.count = 0;
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(sender: u32, tag: i32) -> Message {
        Message::new(Pid(sender), [tag, tag + 1, tag + 2, tag + 3, tag + 4])
    }

    #[test]
    fn delivery_is_fifo() {
        let mut mbox = Mailbox::new();
        for i in 0..10 {
            mbox.push(msg(1, i)).unwrap();
        }
        for i in 0..10 {
            let m = mbox.pop().unwrap();
            assert_eq!(m.sender, Pid(1));
            assert_eq!(m.args[0], i);
        }
        assert!(mbox.pop().is_none());
    }

    #[test]
    fn capacity_is_enforced() {
        let mut mbox = Mailbox::new();
        for i in 0..MAX_MESSAGES as i32 {
            mbox.push(msg(1, i)).unwrap();
        }
        assert!(mbox.is_full());
        assert_eq!(mbox.push(msg(1, 64)), Err(IpcError::MailboxFull));

        // Consuming one opens exactly one slot, and order is preserved.
        assert_eq!(mbox.pop().unwrap().args[0], 0);
        mbox.push(msg(1, 64)).unwrap();
        assert_eq!(mbox.push(msg(1, 65)), Err(IpcError::MailboxFull));

        let mut expected = 1;
        while let Some(m) = mbox.pop() {
            assert_eq!(m.args[0], expected);
            expected += 1;
        }
        assert_eq!(expected, 65);
    }

    #[test]
    fn ring_wraps_without_reordering() {
        let mut mbox = Mailbox::new();
        // Drive head deep into the ring, then wrap the tail past the end.
        for i in 0..MAX_MESSAGES as i32 {
            mbox.push(msg(2, i)).unwrap();
        }
        for i in 0..50 {
            assert_eq!(mbox.pop().unwrap().args[0], i);
        }
        for i in 64..100 {
            mbox.push(msg(2, i)).unwrap();
        }
        for i in 50..100 {
            assert_eq!(mbox.pop().unwrap().args[0], i);
        }
        assert!(mbox.is_empty());
    }

    #[test]
    fn clear_empties_the_ring() {
        let mut mbox = Mailbox::new();
        mbox.push(msg(3, 7)).unwrap();
        mbox.push(msg(3, 8)).unwrap();
        mbox.clear();
        assert!(mbox.is_empty());
        assert_eq!(mbox.pop(), None);
    }

    #[test]
    fn blocking_errors_convert_to_eagain() {
        assert_eq!(Errno::from(IpcError::MailboxFull), Errno::Again);
        assert_eq!(Errno::from(IpcError::MailboxEmpty), Errno::Again);
    }
}
