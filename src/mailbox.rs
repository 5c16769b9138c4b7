use crate::error::MailboxError;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::time::Duration;
use tracing::trace;

/// Bounded message queue owned by a component
///
/// Other threads push through a [`MailboxSender`]; the owning component drains
/// it from inside `run()`. Enqueueing never blocks, so a full mailbox rejects
/// the message instead of stalling the producer.
pub struct Mailbox<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
    capacity: usize,
}

/// Cloneable producer side of a [`Mailbox`]
pub struct MailboxSender<T> {
    sender: Sender<T>,
}

impl<T> Mailbox<T> {
    /// Create a mailbox holding at most `capacity` messages
    pub fn new(capacity: usize) -> Self {
        if capacity == 0 {
            panic!("Mailbox capacity must be greater than 0");
        }

        let (sender, receiver) = channel::bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    pub fn sender(&self) -> MailboxSender<T> {
        MailboxSender {
            sender: self.sender.clone(),
        }
    }

    pub fn enqueue(&self, item: T) -> Result<(), MailboxError> {
        try_send(&self.sender, item)
    }

    /// Pop a message, waiting up to `timeout`. A zero timeout never blocks.
    pub fn dequeue(&self, timeout: Duration) -> Option<T> {
        if timeout.is_zero() {
            return self.try_dequeue();
        }

        match self.receiver.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_dequeue(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> MailboxSender<T> {
    pub fn enqueue(&self, item: T) -> Result<(), MailboxError> {
        try_send(&self.sender, item)
    }
}

impl<T> Clone for MailboxSender<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

fn try_send<T>(sender: &Sender<T>, item: T) -> Result<(), MailboxError> {
    match sender.try_send(item) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(_)) => {
            trace!("Mailbox full, message dropped");
            Err(MailboxError::Full)
        }
        Err(TrySendError::Disconnected(_)) => Err(MailboxError::Disconnected),
    }
}
