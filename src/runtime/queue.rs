// src/runtime/queue.rs

use crate::error::Errno;
use crate::message::Message;
use crate::runtime::OpGuard;

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

/// A bounded FIFO of messages shared between engine tasks.
///
/// Socket send and receive buffers are built on this. Waiters park on
/// [`Notify`] and always re-check state under the lock after waking.
#[derive(Debug)]
pub(crate) struct MessageQueue {
  inner: Mutex<QueueInner>,
  readable: Notify,
  writable: Notify,
}

#[derive(Debug)]
struct QueueInner {
  items: VecDeque<Message>,
  capacity: usize,
  closed: bool,
}

impl MessageQueue {
  pub(crate) fn new(capacity: usize) -> Self {
    Self {
      inner: Mutex::new(QueueInner {
        items: VecDeque::new(),
        capacity: capacity.max(1),
        closed: false,
      }),
      readable: Notify::new(),
      writable: Notify::new(),
    }
  }

  pub(crate) fn len(&self) -> usize {
    self.inner.lock().items.len()
  }

  /// Whether any queued message matches `pred`.
  pub(crate) fn contains(&self, pred: impl Fn(&Message) -> bool) -> bool {
    self.inner.lock().items.iter().any(pred)
  }

  /// Adds a message if there is room. Hands it back otherwise.
  pub(crate) fn try_put(&self, msg: Message) -> Result<(), (Errno, Message)> {
    {
      let mut inner = self.inner.lock();
      if inner.closed {
        return Err((Errno::ECLOSED, msg));
      }
      if inner.items.len() >= inner.capacity {
        return Err((Errno::EAGAIN, msg));
      }
      inner.items.push_back(msg);
    }
    self.readable.notify_waiters();
    Ok(())
  }

  /// Adds a message, discarding the oldest queued one when full.
  pub(crate) fn put_evicting(&self, msg: Message) -> Result<(), Errno> {
    {
      let mut inner = self.inner.lock();
      if inner.closed {
        return Err(Errno::ECLOSED);
      }
      if inner.items.len() >= inner.capacity {
        inner.items.pop_front();
      }
      inner.items.push_back(msg);
    }
    self.readable.notify_waiters();
    Ok(())
  }

  /// Puts a message back at the head, ignoring capacity. Used when a message
  /// was taken for a pipe that went away before it could be delivered.
  pub(crate) fn put_front(&self, msg: Message) {
    {
      let mut inner = self.inner.lock();
      if inner.closed {
        return;
      }
      inner.items.push_front(msg);
    }
    self.readable.notify_waiters();
  }

  /// Adds a message, waiting for room.
  pub(crate) async fn put(&self, mut msg: Message, guard: &OpGuard) -> Result<(), (Errno, Message)> {
    loop {
      let notified = self.writable.notified();
      tokio::pin!(notified);
      notified.as_mut().enable();

      match self.try_put(msg) {
        Ok(()) => return Ok(()),
        Err((Errno::EAGAIN, back)) => msg = back,
        Err(other) => return Err(other),
      }

      tokio::select! {
        biased;
        errno = guard.interrupted() => return Err((errno, msg)),
        _ = &mut notified => {}
      }
    }
  }

  pub(crate) fn try_get(&self) -> Result<Message, Errno> {
    let msg = {
      let mut inner = self.inner.lock();
      match inner.items.pop_front() {
        Some(msg) => msg,
        None if inner.closed => return Err(Errno::ECLOSED),
        None => return Err(Errno::EAGAIN),
      }
    };
    self.writable.notify_waiters();
    Ok(msg)
  }

  /// Takes the oldest message, waiting for one to arrive.
  pub(crate) async fn get(&self, guard: &OpGuard) -> Result<Message, Errno> {
    loop {
      let notified = self.readable.notified();
      tokio::pin!(notified);
      notified.as_mut().enable();

      match self.try_get() {
        Err(Errno::EAGAIN) => {}
        other => return other,
      }

      tokio::select! {
        biased;
        errno = guard.interrupted() => return Err(errno),
        _ = &mut notified => {}
      }
    }
  }

  /// Changes the capacity. Messages already queued beyond it are kept.
  pub(crate) fn resize(&self, capacity: usize) {
    self.inner.lock().capacity = capacity.max(1);
    self.writable.notify_waiters();
  }

  /// Drops everything queued and wakes all waiters with `ECLOSED`.
  pub(crate) fn close(&self) {
    {
      let mut inner = self.inner.lock();
      inner.closed = true;
      inner.items.clear();
    }
    self.readable.notify_waiters();
    self.writable.notify_waiters();
  }

  /// Discards queued messages without closing.
  pub(crate) fn clear(&self) {
    self.inner.lock().items.clear();
    self.writable.notify_waiters();
  }
}
