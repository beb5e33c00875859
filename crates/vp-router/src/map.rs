//! The address-map data structure and its compile step.

use std::collections::BTreeMap;

use vp_host::RouterConfig;

use crate::router::{IoTarget, Router};

/// A routable leaf: `[base, base+size)` forwards to `target` with the given offset translation
/// and latency. `next_packet_time` is the per-leaf bandwidth cursor mutated by `Router::request`
/// — the only state a leaf carries once the tree is built.
#[derive(Debug, Clone)]
pub(crate) struct Leaf {
    pub name: String,
    pub base: u64,
    pub size: u64,
    pub remove_offset: u64,
    pub add_offset: u64,
    pub latency: u32,
    pub target: usize,
    pub next_packet_time: i64,
}

/// The declared error region: an address range that, when unmatched by any leaf, fails the
/// access rather than falling through to the default route.
#[derive(Debug, Clone)]
pub(crate) struct ErrorRegion {
    pub base: u64,
    pub size: u64,
}

/// One entry of the compiled decision tree's arena. Leaves are addressed by index into
/// `Router::leaves`; internal nodes are addressed by index into `Router::nodes` itself — an
/// arena-of-indices instead of `Box`-linked nodes, avoiding intrusive/aliased pointers.
#[derive(Debug, Clone)]
pub(crate) enum NodeKind {
    Leaf(usize),
    Internal { split_base: u64, left: usize, right: usize },
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub kind: NodeKind,
    pub lowest_base: u64,
}

/// Per-region build input, independent of how the target is resolved (explicit handle or config
/// lookup by name).
#[derive(Debug, Clone)]
pub struct RegionSpec {
    pub name: String,
    pub base: u64,
    pub size: u64,
    pub remove_offset: u64,
    pub add_offset: u64,
    pub latency: u32,
}

impl RegionSpec {
    pub fn new(name: impl Into<String>, base: u64, size: u64) -> Self {
        Self {
            name: name.into(),
            base,
            size,
            remove_offset: 0,
            add_offset: 0,
            latency: 0,
        }
    }

    pub fn with_remove_offset(mut self, remove_offset: u64) -> Self {
        self.remove_offset = remove_offset;
        self
    }

    pub fn with_add_offset(mut self, add_offset: u64) -> Self {
        self.add_offset = add_offset;
        self
    }

    pub fn with_latency(mut self, latency: u32) -> Self {
        self.latency = latency;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("region `{name}` (base {base:#x}, size {size:#x}) overlaps region `{other}`")]
    OverlappingRegions {
        name: String,
        other: String,
        base: u64,
        size: u64,
    },
    #[error("default region `{name}` has no bound target")]
    DefaultMissingTarget { name: String },
    #[error("mapping `{name}` references unknown target `{target}`")]
    UnknownTarget { name: String, target: String },
}

/// Accumulates regions, then compiles them into a [`Router`].
pub struct RouterBuilder {
    bandwidth: u32,
    bandwidth_accounting: bool,
    targets: Vec<Box<dyn IoTarget>>,
    leaves: Vec<Leaf>,
    default: Option<Leaf>,
    error: Option<ErrorRegion>,
}

impl RouterBuilder {
    pub fn new(bandwidth: u32) -> Self {
        Self {
            bandwidth,
            bandwidth_accounting: false,
            targets: Vec::new(),
            leaves: Vec::new(),
            default: None,
            error: None,
        }
    }

    /// Enables bandwidth/latency accounting on every leaf. Disabled by default, matching the
    /// upstream source shipping it `#if 0`'d out.
    pub fn with_bandwidth_accounting(mut self, enabled: bool) -> Self {
        self.bandwidth_accounting = enabled;
        self
    }

    /// Inserts one region. `target = None` with `size > 0` records the error region; `size == 0`
    /// always records the default region (and requires a target); otherwise the region is
    /// inserted into the sorted leaf list.
    pub fn add_region(
        &mut self,
        spec: RegionSpec,
        target: Option<Box<dyn IoTarget>>,
    ) -> Result<(), RouterError> {
        if spec.size == 0 {
            let Some(target) = target else {
                return Err(RouterError::DefaultMissingTarget { name: spec.name });
            };
            let target_idx = self.targets.len();
            self.targets.push(target);
            self.default = Some(Leaf {
                name: spec.name,
                base: spec.base,
                size: spec.size,
                remove_offset: spec.remove_offset,
                add_offset: spec.add_offset,
                latency: spec.latency,
                target: target_idx,
                next_packet_time: 0,
            });
            return Ok(());
        }

        let Some(target) = target else {
            self.error = Some(ErrorRegion {
                base: spec.base,
                size: spec.size,
            });
            return Ok(());
        };

        let target_idx = self.targets.len();
        self.targets.push(target);
        let leaf = Leaf {
            name: spec.name,
            base: spec.base,
            size: spec.size,
            remove_offset: spec.remove_offset,
            add_offset: spec.add_offset,
            latency: spec.latency,
            target: target_idx,
            next_packet_time: 0,
        };

        // Stable ascending-base insertion: walk past every existing entry with a strictly
        // smaller base, matching the original's `while(current && current->base < base)`.
        let pos = self
            .leaves
            .iter()
            .position(|l| l.base >= leaf.base)
            .unwrap_or(self.leaves.len());
        self.leaves.insert(pos, leaf);
        Ok(())
    }

    /// Builds a [`RouterBuilder`] from the parsed configuration, resolving each mapping's
    /// `target` name (if any) against `targets`.
    pub fn from_config(
        cfg: &RouterConfig,
        mut targets: BTreeMap<String, Box<dyn IoTarget>>,
    ) -> Result<Self, RouterError> {
        let mut builder = RouterBuilder::new(cfg.bandwidth);
        for (name, mapping) in &cfg.mappings {
            let target = match &mapping.target {
                Some(target_name) => Some(targets.remove(target_name).ok_or_else(|| {
                    RouterError::UnknownTarget {
                        name: name.clone(),
                        target: target_name.clone(),
                    }
                })?),
                None => None,
            };
            let spec = RegionSpec {
                name: name.clone(),
                base: mapping.base,
                size: mapping.size,
                remove_offset: mapping.remove_offset,
                add_offset: mapping.add_offset,
                latency: mapping.latency,
            };
            builder.add_region(spec, target)?;
        }
        Ok(builder)
    }

    /// Checks the non-overlap invariant and compiles the sorted leaf list into the balanced
    /// binary decision tree.
    pub fn build(self) -> Result<Router, RouterError> {
        for pair in self.leaves.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if a.base + a.size > b.base {
                return Err(RouterError::OverlappingRegions {
                    name: b.name.clone(),
                    other: a.name.clone(),
                    base: b.base,
                    size: b.size,
                });
            }
        }

        let n = self.leaves.len();
        let mut nodes = Vec::with_capacity(2 * n);
        for (i, leaf) in self.leaves.iter().enumerate() {
            nodes.push(Node {
                kind: NodeKind::Leaf(i),
                lowest_base: leaf.base,
            });
        }

        let mut level: Vec<usize> = (0..n).collect();
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            let mut it = level.into_iter();
            while let Some(a) = it.next() {
                match it.next() {
                    Some(b) => {
                        let split_base = nodes[b].lowest_base;
                        let lowest_base = nodes[a].lowest_base;
                        nodes.push(Node {
                            kind: NodeKind::Internal {
                                split_base,
                                left: a,
                                right: b,
                            },
                            lowest_base,
                        });
                        next.push(nodes.len() - 1);
                    }
                    None => next.push(a),
                }
            }
            level = next;
        }
        let root = level.first().copied();

        Ok(Router::from_parts(
            self.bandwidth,
            self.bandwidth_accounting,
            self.targets,
            nodes,
            root,
            self.leaves,
            self.default,
            self.error,
        ))
    }
}
