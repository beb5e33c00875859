//! The per-channel transfer queue and RX byte-packing state machine.

use std::collections::VecDeque;

use thiserror::Error;
use vp_host::IoRequest;

use crate::transfer::{ChannelId, TransferDescriptor, TransferSize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelDirection {
    Rx,
    Tx,
}

/// Errors `push_data` can report: a byte-push overflow, or pushing into a channel with no
/// current transfer. The controller turns both into a trace warning and drops the bytes.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RxPushError {
    #[error("no current transfer to receive data")]
    NoCurrentTransfer,
    #[error("pushed {incoming} bytes with {pending} already pending (max 4)")]
    Overflow { pending: usize, incoming: usize },
}

/// A uDMA channel: direction, shadow registers, the 2-slot descriptor pool, and (RX only) the
/// byte-packing accumulator.
#[derive(Debug)]
pub struct Channel {
    id: usize,
    event_id: u32,
    direction: ChannelDirection,
    saddr: u64,
    size_reg: u64,
    continuous_mode: bool,
    transfer_size_code: TransferSize,
    descriptors: [TransferDescriptor; 2],
    free_slots: VecDeque<u8>,
    pending_slots: VecDeque<u8>,
    current_slot: Option<u8>,
    pending_word: [u8; 4],
    pending_byte_index: usize,
    ready_reqs: VecDeque<IoRequest<ChannelId>>,
}

impl Channel {
    pub fn new(id: usize, event_id: u32, direction: ChannelDirection) -> Self {
        Self {
            id,
            event_id,
            direction,
            saddr: 0,
            size_reg: 0,
            continuous_mode: false,
            transfer_size_code: TransferSize::default(),
            descriptors: Default::default(),
            free_slots: VecDeque::from([0, 1]),
            pending_slots: VecDeque::new(),
            current_slot: None,
            pending_word: [0; 4],
            pending_byte_index: 0,
            ready_reqs: VecDeque::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn event_id(&self) -> u32 {
        self.event_id
    }

    pub fn direction(&self) -> ChannelDirection {
        self.direction
    }

    pub fn saddr(&self) -> u64 {
        self.saddr
    }

    pub fn set_saddr(&mut self, saddr: u64) {
        self.saddr = saddr;
    }

    pub fn size_reg(&self) -> u64 {
        self.size_reg
    }

    pub fn set_size_reg(&mut self, size: u64) {
        self.size_reg = size;
    }

    pub fn continuous_mode(&self) -> bool {
        self.continuous_mode
    }

    pub fn set_continuous_mode(&mut self, continuous: bool) {
        self.continuous_mode = continuous;
    }

    pub fn transfer_size_code(&self) -> TransferSize {
        self.transfer_size_code
    }

    pub fn set_transfer_size_code(&mut self, code: TransferSize) {
        self.transfer_size_code = code;
    }

    pub fn has_current(&self) -> bool {
        self.current_slot.is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending_slots.len()
    }

    pub fn free_count(&self) -> usize {
        self.free_slots.len()
    }

    pub fn current_descriptor(&self) -> Option<&TransferDescriptor> {
        self.current_slot.map(|slot| &self.descriptors[slot as usize])
    }

    fn current_descriptor_mut(&mut self) -> Option<&mut TransferDescriptor> {
        self.current_slot.map(|slot| &mut self.descriptors[slot as usize])
    }

    /// Pops a free descriptor slot and shadows the current registers into it. Returns `false`
    /// (and mutates nothing) if both slots are already in use.
    pub fn try_enqueue(&mut self) -> bool {
        let Some(slot) = self.free_slots.pop_front() else {
            return false;
        };
        self.descriptors[slot as usize].reset(
            self.saddr,
            self.size_reg,
            self.transfer_size_code,
            self.continuous_mode,
        );
        self.pending_slots.push_back(slot);
        true
    }

    /// Promotes the head pending descriptor to current, if there is no current one already.
    pub fn promote_pending(&mut self) -> bool {
        if self.current_slot.is_some() {
            return false;
        }
        let Some(slot) = self.pending_slots.pop_front() else {
            return false;
        };
        self.current_slot = Some(slot);
        true
    }

    /// Frees the current descriptor back to the pool.
    pub fn finish_current(&mut self) {
        if let Some(slot) = self.current_slot.take() {
            self.free_slots.push_back(slot);
        }
        self.pending_byte_index = 0;
    }

    /// Clears the current transfer and channel configuration, freeing any in-flight descriptor
    /// back to the pool (`Udma_channel::reset`).
    pub fn reset(&mut self) {
        if let Some(slot) = self.current_slot.take() {
            self.free_slots.push_back(slot);
        }
        self.continuous_mode = false;
        self.transfer_size_code = TransferSize::default();
        self.pending_byte_index = 0;
    }

    /// Shapes the next read request for a TX channel's current transfer.
    pub fn prepare_read_req(&mut self, req: &mut IoRequest<ChannelId>) -> bool {
        let id = ChannelId(self.id);
        self.current_descriptor_mut()
            .expect("a channel only sits in ready_tx_channels while it has a current transfer")
            .prepare_req(req, id)
    }

    /// Records a completed read delivered by the central pipeline. Returns whether the transfer
    /// is now fully received.
    pub fn push_ready_req(&mut self, req: IoRequest<ChannelId>) -> (IoRequest<ChannelId>, bool) {
        let size = req.size();
        self.ready_reqs.push_back(req.clone());
        let desc = self
            .current_descriptor_mut()
            .expect("a channel delivering a completion always has a current transfer");
        desc.record_received(size);
        let ended = desc.is_fully_received();
        // The original drains `ready_reqs` in the same call that fills it (`handle_ready_reqs`
        // immediately follows `handle_ready_req`); nothing else in this core ever consumes the
        // queue, so we pop it back off straight away rather than letting it grow unbounded.
        self.ready_reqs.pop_back();
        (req, ended)
    }

    /// Accepts up to 4 peripheral-side bytes into the pending word. Returns a shaped write
    /// request once the word is full or the transfer is nearly done.
    pub fn push_data(&mut self, buf: &[u8]) -> Result<Option<(IoRequest<ChannelId>, bool)>, RxPushError> {
        if self.current_slot.is_none() {
            return Err(RxPushError::NoCurrentTransfer);
        }
        if self.pending_byte_index + buf.len() > 4 {
            return Err(RxPushError::Overflow {
                pending: self.pending_byte_index,
                incoming: buf.len(),
            });
        }
        self.pending_word[self.pending_byte_index..self.pending_byte_index + buf.len()].copy_from_slice(buf);
        self.pending_byte_index += buf.len();

        let remaining = self.current_descriptor().expect("checked above").remaining_size();
        let flush = self.pending_byte_index >= 4 || self.pending_byte_index as i64 >= remaining;
        if !flush {
            return Ok(None);
        }

        let mut req = IoRequest::with_data(0, true, self.pending_word.to_vec());
        self.pending_byte_index = 0;
        let id = ChannelId(self.id);
        let desc = self.current_descriptor_mut().expect("checked above");
        let ended = desc.prepare_req(&mut req, id);
        Ok(Some((req, ended)))
    }
}
