//! Router decode and forwarding.

use vp_host::{IoRequest, IoStatus, TraceSink};

use crate::map::{ErrorRegion, Leaf, Node, NodeKind};

/// A bound master port: the target a leaf forwards to. The router calls `request` and propagates
/// the returned status unchanged.
pub trait IoTarget: Send {
    fn request(&mut self, req: &mut IoRequest<()>) -> IoStatus;
}

/// An address-decoding interconnect router, compiled from a [`crate::map::RouterBuilder`] and
/// immutable after that except for the per-leaf bandwidth cursor.
pub struct Router {
    bandwidth: u32,
    bandwidth_accounting: bool,
    targets: Vec<Box<dyn IoTarget>>,
    nodes: Vec<Node>,
    root: Option<usize>,
    leaves: Vec<Leaf>,
    default: Option<Leaf>,
    error: Option<ErrorRegion>,
}

/// Which region a decode matched, and whether it was the default fallback (the default leaf is
/// not part of the decision tree, so bandwidth-cursor updates must address it separately).
enum Matched {
    Leaf(usize),
    Default,
}

impl Router {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        bandwidth: u32,
        bandwidth_accounting: bool,
        targets: Vec<Box<dyn IoTarget>>,
        nodes: Vec<Node>,
        root: Option<usize>,
        leaves: Vec<Leaf>,
        default: Option<Leaf>,
        error: Option<ErrorRegion>,
    ) -> Self {
        Self {
            bandwidth,
            bandwidth_accounting,
            targets,
            nodes,
            root,
            leaves,
            default,
            error,
        }
    }

    /// Logs the routing table the way the original `router::start()` does, one line per leaf in
    /// ascending-base order followed by the error and default entries if present.
    pub fn log_table(&self, trace: &mut dyn TraceSink) {
        trace.debug("Building router table");
        for leaf in &self.leaves {
            trace.debug(&format!(
                "  {:#018x} : {:#018x} -> {}",
                leaf.base,
                leaf.base + leaf.size,
                leaf.name
            ));
        }
        if let Some(err) = &self.error {
            trace.debug(&format!(
                "  {:#018x} : {:#018x} -> ERROR",
                err.base,
                err.base + err.size
            ));
        }
        if let Some(default) = &self.default {
            trace.debug(&format!("       -     :      -     -> {}", default.name));
        }
    }

    fn decode_leaf_idx(&self, offset: u64) -> usize {
        let mut idx = self.root.expect("decode_leaf_idx requires a non-empty tree");
        loop {
            match &self.nodes[idx].kind {
                NodeKind::Leaf(leaf_idx) => return *leaf_idx,
                NodeKind::Internal {
                    split_base,
                    left,
                    right,
                } => {
                    idx = if offset >= *split_base { *right } else { *left };
                }
            }
        }
    }

    /// Number of internal nodes visited decoding `offset`, exposed so callers can assert the
    /// O(log N) decode-cost property directly.
    pub fn decode_visits(&self, offset: u64) -> usize {
        let Some(mut idx) = self.root else {
            return 0;
        };
        let mut visits = 0;
        loop {
            match &self.nodes[idx].kind {
                NodeKind::Leaf(_) => return visits,
                NodeKind::Internal {
                    split_base,
                    left,
                    right,
                } => {
                    visits += 1;
                    idx = if offset >= *split_base { *right } else { *left };
                }
            }
        }
    }

    fn in_range(base: u64, size: u64, offset: u64, req_size: u64) -> bool {
        req_size > 0 && offset >= base && offset + req_size - 1 <= base + size - 1
    }

    /// Decodes and forwards `req`, mutating its address and latency in place and returning the
    /// target's status.
    pub fn request(&mut self, req: &mut IoRequest<()>, trace: &mut dyn TraceSink, now: u64) -> IoStatus {
        let offset = req.addr();
        let size = req.size();
        trace.debug(&format!(
            "Received IO req (offset: {:#x}, size: {:#x}, isRead: {})",
            offset,
            size,
            req.is_read()
        ));

        let mut matched_leaf_idx = None;
        if self.root.is_some() {
            let idx = self.decode_leaf_idx(offset);
            let leaf = &self.leaves[idx];
            if Self::in_range(leaf.base, leaf.size, offset, size) {
                matched_leaf_idx = Some(idx);
            }
        }

        let matched = match matched_leaf_idx {
            Some(idx) => Matched::Leaf(idx),
            None => {
                if let Some(err) = &self.error {
                    if Self::in_range(err.base, err.size, offset, size) {
                        trace.warning(&format!(
                            "Invalid access (offset: {offset:#x}, size: {size:#x})"
                        ));
                        return IoStatus::Invalid;
                    }
                }
                if self.default.is_some() {
                    Matched::Default
                } else {
                    trace.warning(&format!(
                        "Invalid access (offset: {offset:#x}, size: {size:#x})"
                    ));
                    return IoStatus::Invalid;
                }
            }
        };

        let leaf = match &matched {
            Matched::Leaf(idx) => &self.leaves[*idx],
            Matched::Default => self.default.as_ref().unwrap(),
        };
        match &matched {
            Matched::Leaf(_) => trace.debug(&format!("Routing to entry (target: {})", leaf.name)),
            Matched::Default => trace.debug(&format!(
                "Routing to default entry (target: {})",
                leaf.name
            )),
        }

        let (remove_offset, add_offset, latency, target_idx, next_packet_time) =
            (leaf.remove_offset, leaf.add_offset, leaf.latency, leaf.target, leaf.next_packet_time);

        if self.bandwidth_accounting && self.bandwidth != 0 && !req.is_debug() {
            req.set_duration(size / self.bandwidth as u64);

            let now_i = now as i64;
            let router_time = now_i.max(next_packet_time);
            let packet_time =
                (router_time + latency as i64).max(now_i + req.latency() as i64 + latency as i64);
            req.set_latency((packet_time - now_i) as u64);

            let new_next_packet_time = router_time + req.length() as i64;
            match &matched {
                Matched::Leaf(idx) => self.leaves[*idx].next_packet_time = new_next_packet_time,
                Matched::Default => self.default.as_mut().unwrap().next_packet_time = new_next_packet_time,
            }
        } else {
            req.inc_latency(latency as u64);
        }

        if remove_offset != 0 {
            req.set_addr(offset - remove_offset);
        } else if add_offset != 0 {
            req.set_addr(offset + add_offset);
        }

        self.targets[target_idx].request(req)
    }
}
