//! The memory-mapped I/O transaction type shared by the router and the uDMA controller.

/// Status returned by a target (or by the router/uDMA pipelines themselves) in response to an
/// [`IoRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    Ok,
    Invalid,
}

/// A single memory-mapped I/O transaction.
///
/// Mirrors the fields the original simulator's request object exposes to device models: address,
/// size, direction, a data buffer, and latency/duration bookkeeping the router and uDMA mutate in
/// place. The per-request scratch slot (`arg`) is generic instead of a type-erased pointer, and
/// there is no intrusive `next` field — queueing is done with owned `VecDeque<IoRequest<A>>`s at
/// the call site instead.
#[derive(Debug, Clone)]
pub struct IoRequest<A = ()> {
    addr: u64,
    size: u64,
    is_write: bool,
    data: Vec<u8>,
    latency: u64,
    duration: u64,
    debug: bool,
    arg: Option<A>,
}

impl<A> IoRequest<A> {
    pub fn new(addr: u64, size: u64, is_write: bool) -> Self {
        Self {
            addr,
            size,
            is_write,
            data: vec![0u8; size as usize],
            latency: 0,
            duration: 0,
            debug: false,
            arg: None,
        }
    }

    pub fn with_data(addr: u64, is_write: bool, data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self {
            addr,
            size,
            is_write,
            data,
            latency: 0,
            duration: 0,
            debug: false,
            arg: None,
        }
    }

    pub fn addr(&self) -> u64 {
        self.addr
    }

    pub fn set_addr(&mut self, addr: u64) {
        self.addr = addr;
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_write(&self) -> bool {
        self.is_write
    }

    pub fn is_read(&self) -> bool {
        !self.is_write
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn latency(&self) -> u64 {
        self.latency
    }

    pub fn set_latency(&mut self, latency: u64) {
        self.latency = latency;
    }

    pub fn inc_latency(&mut self, delta: u64) {
        self.latency += delta;
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }

    pub fn set_duration(&mut self, duration: u64) {
        self.duration = duration;
    }

    /// Debug-only accesses bypass bandwidth accounting.
    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn arg(&self) -> Option<&A> {
        self.arg.as_ref()
    }

    pub fn set_arg(&mut self, arg: A) {
        self.arg = Some(arg);
    }

    pub fn take_arg(&mut self) -> Option<A> {
        self.arg.take()
    }

    /// The span covered by this request, used by the router's bandwidth accounting.
    pub fn length(&self) -> u64 {
        self.size
    }
}
