//! Control-flow graph
//!
//! Blocks live in an arena and are referred to by [`BlockId`] handles,
//! so the cyclic edges a loop creates never turn into ownership
//! cycles. Placement is two-phase: a block can be allocated *deferred*
//! (it has a handle but no position) and placed later, which lets the
//! lowering hand out jump targets before it knows where they will land
//! in the final order. A placed block's `idx` is its position in that
//! order; `-1` means deferred.

pub mod pretty;

use crate::ast::{for_each_stmt_id, Stmt, StmtKind};
use rustc_hash::FxHashSet;

/// Handle of a block in the graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

impl BlockId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

const DEFERRED: i32 = -1;

/// A basic block: a straight-line statement sequence whose last
/// statement is a terminator (`Jump`, `Branch`, `Invoke`, `Return` or
/// `Raise`).
#[derive(Debug)]
pub struct CfgBlock {
    /// Arena handle of this block
    pub id: BlockId,
    /// Position in placement order, or `-1` while deferred
    pub idx: i32,
    /// Optional human-readable tag for debugging
    pub info: Option<&'static str>,
    /// Statements, terminator last
    pub body: Vec<Stmt>,
    /// Incoming edges
    pub predecessors: Vec<BlockId>,
    /// Outgoing edges (0–2)
    pub successors: Vec<BlockId>,
}

impl CfgBlock {
    fn new(id: BlockId) -> Self {
        CfgBlock {
            id,
            idx: DEFERRED,
            info: None,
            body: Vec::new(),
            predecessors: Vec::new(),
            successors: Vec::new(),
        }
    }

    /// True once the block has a position in the final order.
    #[inline]
    pub fn is_placed(&self) -> bool {
        self.idx >= 0
    }

    /// The block's terminator, if any statement has been emitted.
    pub fn terminator(&self) -> Option<&Stmt> {
        self.body.last()
    }
}

/// The graph: block arena plus placement order. The starting block is
/// always placed first.
#[derive(Debug, Default)]
pub struct Cfg {
    arena: Vec<Option<CfgBlock>>,
    order: Vec<BlockId>,
}

impl Cfg {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&mut self) -> BlockId {
        let id = BlockId(self.arena.len() as u32);
        self.arena.push(Some(CfgBlock::new(id)));
        id
    }

    /// Allocate a block and place it immediately.
    pub fn add_block(&mut self) -> BlockId {
        let id = self.alloc();
        self.place_block(id);
        id
    }

    /// Allocate a block without placing it. Jumps and branches may
    /// target it; it must be placed (or discarded) before the
    /// post-pass runs.
    pub fn add_deferred_block(&mut self) -> BlockId {
        self.alloc()
    }

    /// Append a deferred block to the placement order, assigning its
    /// `idx`.
    pub fn place_block(&mut self, id: BlockId) {
        let idx = self.order.len() as i32;
        let block = self.block_mut(id);
        assert!(!block.is_placed(), "{id} placed twice");
        block.idx = idx;
        self.order.push(id);
    }

    /// Drop a deferred block that turned out to be unreachable. The
    /// block must be untouched: unplaced, empty, and edge-free.
    pub fn discard_block(&mut self, id: BlockId) {
        {
            let block = self.block(id);
            assert!(!block.is_placed(), "cannot discard placed {id}");
            assert!(
                block.body.is_empty()
                    && block.predecessors.is_empty()
                    && block.successors.is_empty(),
                "cannot discard non-empty {id}"
            );
        }
        self.arena[id.index()] = None;
    }

    /// Borrow a block.
    #[inline]
    pub fn block(&self, id: BlockId) -> &CfgBlock {
        self.arena[id.index()]
            .as_ref()
            .unwrap_or_else(|| panic!("{id} was removed"))
    }

    /// Borrow a block mutably.
    #[inline]
    pub fn block_mut(&mut self, id: BlockId) -> &mut CfgBlock {
        self.arena[id.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("{id} was removed"))
    }

    /// Tag a block with a debug label.
    pub fn set_info(&mut self, id: BlockId, info: &'static str) {
        self.block_mut(id).info = Some(info);
    }

    /// The entry block (first placed).
    pub fn entry(&self) -> BlockId {
        self.order[0]
    }

    /// Placed blocks, in placement order.
    pub fn blocks(&self) -> impl Iterator<Item = &CfgBlock> {
        self.order.iter().map(move |&id| self.block(id))
    }

    /// Placement order as a slice of handles.
    pub fn block_order(&self) -> &[BlockId] {
        &self.order
    }

    /// Number of placed blocks.
    pub fn block_count(&self) -> usize {
        self.order.len()
    }

    /// Add the edge `from → to`. The source must not already have two
    /// successors. Unless `allow_backedge`, the target must be
    /// deferred or placed after the source, which is what keeps the
    /// final order topological.
    pub fn connect(&mut self, from: BlockId, to: BlockId, allow_backedge: bool) {
        {
            let from_block = self.block(from);
            assert!(
                from_block.successors.len() <= 1,
                "{from} already has {} successors",
                from_block.successors.len()
            );
            if !allow_backedge {
                assert!(from_block.is_placed(), "edge from unplaced {from}");
                let from_idx = from_block.idx;
                let to_block = self.block(to);
                assert!(
                    to_block.idx == DEFERRED || to_block.idx > from_idx,
                    "edge from {} ({:?}) to {} ({:?}) breaks placement order",
                    from_idx,
                    from_block.info,
                    to_block.idx,
                    to_block.info,
                );
            }
        }
        self.block_mut(from).successors.push(to);
        self.block_mut(to).predecessors.push(from);
    }

    /// Remove the edge `from → to`.
    pub fn disconnect(&mut self, from: BlockId, to: BlockId) {
        self.block_mut(from).successors.retain(|&s| s != to);
        self.block_mut(to).predecessors.retain(|&p| p != from);
    }

    /// Check the structural invariants the IR generator relies on.
    /// Run after construction, before block merging.
    pub fn validate(&self) -> Result<(), String> {
        if self.order.is_empty() {
            return Err("cfg has no blocks".to_owned());
        }
        let entry = self.entry();
        if !self.block(entry).predecessors.is_empty() {
            return Err(format!("entry {entry} has predecessors"));
        }
        if self.block(entry).idx != 0 {
            return Err(format!("entry {entry} is not placed first"));
        }

        for &id in &self.order {
            let b = self.block(id);
            if !b.is_placed() {
                return Err(format!("{id} was never placed"));
            }
            for &other in b.predecessors.iter().chain(&b.successors) {
                if !self.block(other).is_placed() {
                    return Err(format!("{id} has an edge to unplaced {other}"));
                }
            }
            if b.body.is_empty() {
                return Err(format!("{id} is empty"));
            }
            if b.successors.len() > 2 {
                return Err(format!("{id} has {} successors", b.successors.len()));
            }
            if b.successors.is_empty() {
                match b.terminator().map(|s| &s.kind) {
                    Some(StmtKind::Return { .. }) | Some(StmtKind::Raise { .. }) => {}
                    _ => return Err(format!("terminal {id} does not end in return or raise")),
                }
            }
            if b.predecessors.is_empty() && id != entry {
                return Err(format!("{id} is unreachable"));
            }
            for &s in &b.successors {
                if !self.block(s).predecessors.contains(&id) {
                    return Err(format!("edge {id} -> {s} is not mutual"));
                }
            }
            for &p in &b.predecessors {
                if !self.block(p).successors.contains(&id) {
                    return Err(format!("edge {p} -> {id} is not mutual"));
                }
            }
        }

        // The IR generator can't split edges, so none may be critical.
        for &id in &self.order {
            let b = self.block(id);
            if b.successors.len() >= 2 {
                for &s in &b.successors {
                    if self.block(s).predecessors.len() >= 2 {
                        return Err(format!("critical edge from {id} to {s}"));
                    }
                }
            }
        }

        // Blocks are generated in rough program order: every non-entry
        // block has a predecessor that was placed earlier, and the
        // first predecessor in particular.
        for &id in &self.order[1..] {
            let b = self.block(id);
            if !b.predecessors.iter().any(|&p| self.block(p).idx < b.idx) {
                return Err(format!("{id} has no earlier predecessor"));
            }
            if self.block(b.predecessors[0]).idx >= b.idx {
                return Err(format!("{id}'s first predecessor is not earlier"));
            }
        }

        // No reduced-AST node may appear in two places.
        let mut seen = FxHashSet::default();
        let mut dup = None;
        for &id in &self.order {
            for stmt in &self.block(id).body {
                for_each_stmt_id(stmt, &mut |node| {
                    if !seen.insert(node) && dup.is_none() {
                        dup = Some(node);
                    }
                });
            }
        }
        if let Some(node) = dup {
            return Err(format!("ast node {node} appears in more than one place"));
        }

        Ok(())
    }

    fn merge_candidate(&self, b: BlockId) -> Option<BlockId> {
        let blk = self.block(b);
        if blk.successors.len() != 1 {
            return None;
        }
        let b2 = blk.successors[0];
        if self.block(b2).predecessors.len() != 1 {
            return None;
        }
        match blk.terminator().map(|s| &s.kind) {
            Some(StmtKind::Jump { .. }) => Some(b2),
            Some(StmtKind::Invoke {
                normal_dest,
                exc_dest,
                ..
            }) => {
                // A raise-invoke aliases both destinations; it is a
                // terminator and cannot be spliced over.
                assert_eq!(normal_dest, exc_dest, "invoke in mergeable {b}");
                None
            }
            other => panic!("single-successor {b} ends in {other:?}"),
        }
    }

    /// Merge trivially-joinable block pairs: while a block's only
    /// terminator is a jump to a block with no other predecessors,
    /// splice that block into it. Idempotent after the first run.
    ///
    /// Landing-pad trampolines take part like any other block: a
    /// handler reached from a single invoke is spliced into its
    /// trampoline, which then ends in the handler's terminator rather
    /// than a jump. The capture assignment stays first in the block
    /// an invoke's exception edge points at.
    pub fn merge_trivial_blocks(&mut self) {
        let mut i = 0;
        while i < self.order.len() {
            let b = self.order[i];
            while let Some(b2) = self.merge_candidate(b) {
                let jump = self.block_mut(b).body.pop();
                debug_assert!(matches!(
                    jump.as_ref().map(|s| &s.kind),
                    Some(StmtKind::Jump { .. })
                ));
                self.disconnect(b, b2);

                let spliced = std::mem::take(&mut self.block_mut(b2).body);
                self.block_mut(b).body.extend(spliced);

                let succs = self.block(b2).successors.clone();
                for b3 in succs {
                    self.connect(b, b3, true);
                    self.disconnect(b2, b3);
                }

                self.order.retain(|&x| x != b2);
                self.arena[b2.index()] = None;
            }
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::NodeFactory;

    fn jump(nodes: &NodeFactory, target: BlockId) -> Stmt {
        nodes.stmt(StmtKind::Jump { target })
    }

    fn ret(nodes: &NodeFactory) -> Stmt {
        nodes.stmt(StmtKind::Return { value: None })
    }

    #[test]
    fn placement_assigns_indices_in_order() {
        let mut cfg = Cfg::new();
        let a = cfg.add_block();
        let d = cfg.add_deferred_block();
        let b = cfg.add_block();
        assert_eq!(cfg.block(a).idx, 0);
        assert_eq!(cfg.block(b).idx, 1);
        assert!(!cfg.block(d).is_placed());
        cfg.place_block(d);
        assert_eq!(cfg.block(d).idx, 2);
        assert_eq!(cfg.block_count(), 3);
    }

    #[test]
    fn connect_is_mutual() {
        let mut cfg = Cfg::new();
        let a = cfg.add_block();
        let b = cfg.add_block();
        cfg.connect(a, b, false);
        assert_eq!(cfg.block(a).successors, vec![b]);
        assert_eq!(cfg.block(b).predecessors, vec![a]);
        cfg.disconnect(a, b);
        assert!(cfg.block(a).successors.is_empty());
        assert!(cfg.block(b).predecessors.is_empty());
    }

    #[test]
    #[should_panic(expected = "breaks placement order")]
    fn backward_edge_requires_opt_in() {
        let mut cfg = Cfg::new();
        let a = cfg.add_block();
        let b = cfg.add_block();
        cfg.connect(b, a, false);
    }

    #[test]
    fn backward_edge_allowed_when_requested() {
        let mut cfg = Cfg::new();
        let a = cfg.add_block();
        let b = cfg.add_block();
        cfg.connect(a, b, false);
        cfg.connect(b, a, true);
        assert_eq!(cfg.block(a).predecessors, vec![b]);
    }

    #[test]
    #[should_panic(expected = "already has")]
    fn at_most_two_successors() {
        let mut cfg = Cfg::new();
        let a = cfg.add_block();
        let b = cfg.add_block();
        let c = cfg.add_block();
        let d = cfg.add_block();
        cfg.connect(a, b, false);
        cfg.connect(a, c, false);
        cfg.connect(a, d, false);
    }

    #[test]
    fn merge_splices_jump_chains() {
        let nodes = NodeFactory::new();
        let mut cfg = Cfg::new();
        let a = cfg.add_block();
        let b = cfg.add_block();
        let c = cfg.add_block();

        let j_ab = jump(&nodes, b);
        cfg.block_mut(a).body.push(j_ab);
        cfg.connect(a, b, false);
        let j_bc = jump(&nodes, c);
        cfg.block_mut(b).body.push(j_bc);
        cfg.connect(b, c, false);
        cfg.block_mut(c).body.push(ret(&nodes));

        cfg.validate().unwrap();
        cfg.merge_trivial_blocks();

        assert_eq!(cfg.block_count(), 1);
        let entry = cfg.block(cfg.entry());
        assert_eq!(entry.body.len(), 1);
        assert!(matches!(entry.body[0].kind, StmtKind::Return { .. }));

        // Second run is a no-op.
        cfg.merge_trivial_blocks();
        assert_eq!(cfg.block_count(), 1);
    }

    #[test]
    fn validate_rejects_unplaced_targets() {
        let nodes = NodeFactory::new();
        let mut cfg = Cfg::new();
        let a = cfg.add_block();
        let d = cfg.add_deferred_block();
        let j = jump(&nodes, d);
        cfg.block_mut(a).body.push(j);
        cfg.connect(a, d, false);
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("unplaced"), "{err}");
    }
}
