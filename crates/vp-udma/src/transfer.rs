//! Per-channel transfer descriptors and their 32-bit-aligned shaping.

use vp_host::IoRequest;

/// Tags a pooled `IoRequest` with the channel that owns it, replacing the original's `void*`
/// `arg_get(0)` scratch slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelId(pub usize);

/// Width a peripheral programs a transfer with. The memory-side request is always 4 bytes wide
/// regardless of this — it only affects how a peripheral packs/unpacks bytes, which is out of
/// this core's scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferSize {
    #[default]
    Byte,
    HalfWord,
    Word,
}

impl TransferSize {
    /// The `CFG.SIZE` register only carries a single bit (0 or 1) — `Word` (code 2) exists in the
    /// data model but is unreachable through the register and reserved there.
    pub fn from_reg_bit(bit: bool) -> Self {
        if bit {
            TransferSize::HalfWord
        } else {
            TransferSize::Byte
        }
    }

    pub fn as_reg_bit(self) -> bool {
        matches!(self, TransferSize::HalfWord)
    }
}

/// One programmed DMA job. Allocated from a channel's 2-slot pool, lives `free -> pending ->
/// current -> free`.
#[derive(Debug, Clone, Default)]
pub struct TransferDescriptor {
    start_addr: u64,
    current_addr: u64,
    total_size: u64,
    remaining_size: i64,
    received_size: u64,
    transfer_size_code: TransferSize,
    continuous_mode: bool,
}

impl TransferDescriptor {
    pub fn reset(&mut self, saddr: u64, size: u64, transfer_size_code: TransferSize, continuous_mode: bool) {
        self.start_addr = saddr;
        self.current_addr = saddr;
        self.total_size = size;
        self.remaining_size = size as i64;
        self.received_size = 0;
        self.transfer_size_code = transfer_size_code;
        self.continuous_mode = continuous_mode;
    }

    pub fn start_addr(&self) -> u64 {
        self.start_addr
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn received_size(&self) -> u64 {
        self.received_size
    }

    pub fn continuous_mode(&self) -> bool {
        self.continuous_mode
    }

    pub fn transfer_size_code(&self) -> TransferSize {
        self.transfer_size_code
    }

    pub fn is_fully_received(&self) -> bool {
        self.received_size >= self.total_size
    }

    pub fn remaining_size(&self) -> i64 {
        self.remaining_size
    }

    /// Shapes `req` into the next 32-bit-aligned, 4-byte memory access for this descriptor.
    /// Returns whether this was the last shaping needed to cover `total_size`.
    pub fn prepare_req<A>(&mut self, req: &mut IoRequest<A>, channel: A) -> bool {
        req.set_addr(self.current_addr & !0x3);
        req.set_arg(channel);
        self.current_addr += 4;
        self.remaining_size -= 4;
        self.remaining_size <= 0
    }

    pub(crate) fn record_received(&mut self, size: u64) {
        self.received_size += size;
    }
}
