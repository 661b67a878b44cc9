//! Bounded queues between the radio and the dispatcher
//!
//! Both queues are tiny and never block: a push into a full queue fails
//! immediately and the caller drops the item.

use bytes::Bytes;
use std::collections::VecDeque;

use crate::error::{MeshError, Result};
use crate::frame::Frame;

/// Fixed-capacity FIFO
#[derive(Debug, Clone)]
pub struct BoundedQueue<T> {
    name: &'static str,
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Create an empty queue, `name` shows up in errors and logs
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name,
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an item, fails with [`MeshError::QueueFull`] if there is no slot
    pub fn push(&mut self, item: T) -> Result<()> {
        if self.is_full() {
            return Err(MeshError::QueueFull {
                queue: self.name,
                capacity: self.capacity,
            });
        }
        self.items.push_back(item);
        Ok(())
    }

    /// Remove the oldest item
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Look at the oldest item
    pub fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Check if every slot is taken
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queue name
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// A raw frame handed over by the radio receive path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    /// Received bytes
    pub data: Bytes,
    /// Signal strength in dBm
    pub rssi: i16,
    /// Signal to noise ratio in dB
    pub snr: i8,
}

impl InboundFrame {
    /// Wrap received bytes with their link quality
    pub fn new(data: impl Into<Bytes>, rssi: i16, snr: i8) -> Self {
        Self {
            data: data.into(),
            rssi,
            snr,
        }
    }

    /// Size of the received frame
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the frame carried no bytes
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A frame waiting for the radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Frame to transmit
    pub frame: Frame,
}

impl OutboundMessage {
    /// Queue a frame for transmission
    pub fn new(frame: impl Into<Frame>) -> Self {
        Self {
            frame: frame.into(),
        }
    }

    /// Wire bytes to hand to the radio
    pub fn encode(&self) -> Bytes {
        self.frame.encode()
    }
}
