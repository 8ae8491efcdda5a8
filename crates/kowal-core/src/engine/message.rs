//! Bounded message queues between the control engine and the mixer
//!
//! Commands travel in fixed-capacity queues that never grow after
//! construction:
//!
//! ```text
//! Engine::outgoing ──flush under lock──► SharedState::to_mixer ──try-lock drain──► Mixer::incoming
//! Mixer::outgoing  ──try-lock flush────► SharedState::from_mixer ──flush under lock──► Engine::incoming
//! ```
//!
//! A full queue rejects the message and hands it back to the caller. The
//! control side reports that as [`KwlError::MessageQueueFull`]; the mixer
//! side counts it.
//!
//! [`KwlError::MessageQueueFull`]: crate::KwlError::MessageQueueFull

use basedrop::{Owned, Shared};

use super::handle::EventHandle;
use super::instance::RenderState;
use super::mixer::MixerData;
use crate::data::WaveBankAudio;
use crate::decoder::StreamTap;

/// Default capacity of every message queue
///
/// Sized for the worst-case number of commands issued in one control tick.
pub const MESSAGE_QUEUE_CAPACITY: usize = 500;

/// Fixed-capacity FIFO of messages
///
/// Storage is reserved once in [`MessageQueue::with_capacity`]; `push` and
/// `drain_into` never allocate.
pub struct MessageQueue<M> {
    messages: Vec<M>,
    capacity: usize,
}

impl<M> MessageQueue<M> {
    /// Create a queue with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(MESSAGE_QUEUE_CAPACITY)
    }

    /// Create a queue holding at most `capacity` messages
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            messages: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a message
    ///
    /// Returns `Err(message)` if the queue is full; the queue is unchanged.
    pub fn push(&mut self, message: M) -> Result<(), M> {
        if self.messages.len() >= self.capacity {
            return Err(message);
        }
        self.messages.push(message);
        Ok(())
    }

    /// Move every message into `other`, then clear this queue
    ///
    /// Messages beyond `other`'s free space are dropped. Returns the number
    /// of dropped messages so the caller can account for the overrun.
    pub fn drain_into(&mut self, other: &mut MessageQueue<M>) -> usize {
        let free = other.remaining();
        let total = self.messages.len();
        let moved = total.min(free);

        other.messages.extend(self.messages.drain(..moved));
        self.messages.clear();
        total - moved
    }

    /// Move as many messages as fit into `other`, keeping the rest queued
    ///
    /// Returns the number of messages still waiting here.
    pub fn move_into(&mut self, other: &mut MessageQueue<M>) -> usize {
        let moved = self.messages.len().min(other.remaining());
        other.messages.extend(self.messages.drain(..moved));
        self.messages.len()
    }

    /// Remove all messages in FIFO order
    pub fn drain(&mut self) -> std::vec::Drain<'_, M> {
        self.messages.drain(..)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of messages that can still be pushed
    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity - self.messages.len()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &M> {
        self.messages.iter()
    }
}

impl<M> Default for MessageQueue<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Commands sent from the control engine to the mixer
///
/// Payloads that the mixer takes ownership of are wrapped in basedrop
/// handles so releasing them on the audio thread defers the free.
pub enum ToMixer {
    // ─────────────────────────────────────────────────────────────
    // Event playback
    // ─────────────────────────────────────────────────────────────
    /// Start an event that is not playing
    ///
    /// Freeform events carry their mixer-side state; streaming events carry
    /// the decoder's buffer handoff.
    EventStart {
        event: EventHandle,
        fade_in_secs: f32,
        voice: Option<Owned<RenderState>>,
        stream: Option<Owned<StreamTap>>,
    },
    /// Restart a playing non-streaming event from its first buffer
    EventRetrigger { event: EventHandle, fade_in_secs: f32 },
    /// Request a stop, optionally fading out
    EventStop { event: EventHandle, fade_out_secs: f32 },
    EventPause(EventHandle),
    EventResume(EventHandle),
    /// Stop a freeform event and report it for unloading
    FreeformEventStop(EventHandle),

    // ─────────────────────────────────────────────────────────────
    // Data lifetime
    // ─────────────────────────────────────────────────────────────
    /// Make a freshly loaded wave bank's audio visible to the mixer
    WaveBankLoaded { bank: usize, audio: Shared<WaveBankAudio> },
    /// Stop every event referencing a wave bank, then echo `UnloadWaveBank`
    StopAllReferencingWaveBank(usize),
    /// Stop all data-driven events and release the bus tree at the end of the tick
    PrepareEngineDataUnload,
    /// Install a newly loaded bus tree with its sounds and event instances
    SetMasterBus(Owned<MixerData>),
}

/// Notifications sent from the mixer back to the control engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FromMixer {
    EventStopped(EventHandle),
    UnloadFreeformEvent(EventHandle),
    UnloadWaveBank(usize),
    UnloadEngineData,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_fails_past_capacity() {
        let mut queue = MessageQueue::with_capacity(3);
        for i in 0..3 {
            assert!(queue.push(i).is_ok());
        }
        assert_eq!(queue.push(99), Err(99));
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.remaining(), 0);
    }

    #[test]
    fn test_drain_into_clamps_to_destination() {
        let mut src = MessageQueue::with_capacity(10);
        let mut dst = MessageQueue::with_capacity(4);
        dst.push(100).unwrap();
        for i in 0..6 {
            src.push(i).unwrap();
        }

        let dropped = src.drain_into(&mut dst);
        assert_eq!(dropped, 3);
        assert!(src.is_empty());
        assert_eq!(dst.len(), dst.capacity());
        assert_eq!(dst.iter().copied().collect::<Vec<_>>(), vec![100, 0, 1, 2]);
    }

    #[test]
    fn test_drain_preserves_fifo_order() {
        let mut queue = MessageQueue::with_capacity(8);
        queue.push(FromMixer::UnloadWaveBank(1)).unwrap();
        queue.push(FromMixer::UnloadEngineData).unwrap();
        let drained: Vec<_> = queue.drain().collect();
        assert_eq!(
            drained,
            vec![FromMixer::UnloadWaveBank(1), FromMixer::UnloadEngineData]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_into_does_not_allocate_past_capacity() {
        let mut src = MessageQueue::with_capacity(MESSAGE_QUEUE_CAPACITY);
        let mut dst = MessageQueue::with_capacity(MESSAGE_QUEUE_CAPACITY);
        for i in 0..MESSAGE_QUEUE_CAPACITY {
            src.push(i).unwrap();
            dst.push(i).unwrap();
        }
        assert_eq!(src.drain_into(&mut dst), MESSAGE_QUEUE_CAPACITY);
        assert_eq!(dst.len(), MESSAGE_QUEUE_CAPACITY);
    }

    #[test]
    fn test_move_into_keeps_overflow() {
        let mut src = MessageQueue::with_capacity(8);
        let mut dst = MessageQueue::with_capacity(3);
        for i in 0..5 {
            src.push(i).unwrap();
        }

        assert_eq!(src.move_into(&mut dst), 2);
        assert_eq!(dst.iter().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
        dst.clear();
        assert_eq!(src.move_into(&mut dst), 0);
        assert_eq!(dst.iter().copied().collect::<Vec<_>>(), vec![3, 4]);
    }
}
