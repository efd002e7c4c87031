//! The register-allocation context.
//!
//! One [RaContext] compiles one function at a time, running a fixed pipeline over the module's
//! node list:
//!
//! 1. `fetch` (target hook): attach work data to every reachable node, record the returning,
//!    unreachable and conditional-jump nodes, and give every referenced virtual register a dense
//!    local ID.
//! 2. Remove unreachable code ([unreachable]).
//! 3. Liveness analysis ([liveness]): a backward data-flow over the node list producing a
//!    per-node bitmap of live registers.
//! 4. Annotate ([annotate]), only when IR logging is enabled.
//! 5. `translate` (target hook): assign physical registers and rewrite nodes, consuming the
//!    liveness sets and the frame cells ([frame]).
//!
//! The first stage to fail aborts the pipeline.

mod annotate;
pub mod frame;
mod liveness;
#[cfg(test)]
pub(crate) mod testing;
mod unreachable;

use crate::{
    ir::{Module, NodeIdx, NodeKind, VRegIdx},
    log::{log_ir, should_log_ir, IRPhase},
    CompilationError,
};
use frame::StackFrame;

/// The target-specific halves of the pass.
pub trait RaTarget {
    /// Populate the per-node work data and the context's work lists.
    ///
    /// On success the following must hold: every node on a backward path from a node in the
    /// returning list to the function node carries work data (the tied list may be empty); every
    /// virtual register referenced by a tied entry has been given a dense local ID via
    /// [RaContext::register_vreg]; and unconditional jumps tie no virtual registers (the
    /// analysis equates their live-in with their target's).
    fn fetch(&mut self, ctx: &mut RaContext, m: &mut Module) -> Result<(), CompilationError>;

    /// Assign physical registers and rewrite the surviving nodes for emission.
    fn translate(&mut self, ctx: &mut RaContext, m: &mut Module)
        -> Result<(), CompilationError>;
}

/// Number of columns an inline comment occupies before the liveness strip.
const DEFAULT_ANNOTATION_LENGTH: usize = 12;

pub struct RaContext {
    /// The entry node of the function being compiled.
    func: Option<NodeIdx>,
    /// The first node past the function, if any.
    stop: Option<NodeIdx>,
    /// The node after which out-of-line code may be inserted.
    extra_block: Option<NodeIdx>,
    /// Registered virtual registers; the position is the register's local ID.
    vreg_ids: Vec<VRegIdx>,
    /// Nodes suspected to start unreachable regions.
    unreachable_list: Vec<NodeIdx>,
    /// Nodes at which the function exits; the roots of the liveness analysis.
    returning_list: Vec<NodeIdx>,
    /// Conditional jumps, collected for the translator.
    jcc_list: Vec<NodeIdx>,
    frame: StackFrame,
    annotation_length: usize,
}

impl RaContext {
    pub fn new() -> Self {
        Self {
            func: None,
            stop: None,
            extra_block: None,
            vreg_ids: Vec::new(),
            unreachable_list: Vec::new(),
            returning_list: Vec::new(),
            jcc_list: Vec::new(),
            frame: StackFrame::default(),
            annotation_length: DEFAULT_ANNOTATION_LENGTH,
        }
    }

    /// Run the pipeline over the function whose entry node is `func`.
    pub fn compile(
        &mut self,
        m: &mut Module,
        target: &mut dyn RaTarget,
        func: NodeIdx,
    ) -> Result<(), CompilationError> {
        let end = match m.node(func).kind() {
            NodeKind::Func { end } => *end,
            _ => panic!("compile() requires a function entry node"),
        };
        self.func = Some(func);
        self.stop = m.node(end).next();
        self.extra_block = Some(end);

        target.fetch(self, m)?;
        if should_log_ir(IRPhase::PreRa) {
            log_ir(&format!("--- Begin ra-pre ---\n{m}--- End ra-pre ---\n"));
        }
        self.remove_unreachable_code(m)?;
        self.liveness_analysis(m)?;
        if should_log_ir(IRPhase::Liveness) {
            self.annotate(m);
            log_ir(&format!(
                "--- Begin ra-liveness ---\n{m}--- End ra-liveness ---\n"
            ));
        }
        target.translate(self, m)?;

        // Nodes may have disappeared and new code must not be added after compilation, so the
        // cursor no longer has a meaningful position.
        m.set_cursor(None);
        Ok(())
    }

    /// Give `vreg` a dense local ID, registering it on first sight. Returns the ID.
    pub fn register_vreg(&mut self, m: &mut Module, vreg: VRegIdx) -> u32 {
        if let Some(id) = m.vreg(vreg).local_id() {
            return id;
        }
        let id = u32::try_from(self.vreg_ids.len()).unwrap();
        m.vreg_mut(vreg).set_local_id(id);
        self.vreg_ids.push(vreg);
        id
    }

    /// Record that `node` starts a suspected unreachable region.
    pub fn mark_unreachable(&mut self, node: NodeIdx) {
        self.unreachable_list.push(node);
    }

    /// Record that the function exits at `node`.
    pub fn mark_returning(&mut self, node: NodeIdx) {
        self.returning_list.push(node);
    }

    /// Record a conditional jump for the translator.
    pub fn mark_jcc(&mut self, node: NodeIdx) {
        self.jcc_list.push(node);
    }

    pub fn func(&self) -> Option<NodeIdx> {
        self.func
    }

    pub fn stop(&self) -> Option<NodeIdx> {
        self.stop
    }

    pub fn extra_block(&self) -> Option<NodeIdx> {
        self.extra_block
    }

    /// Number of registered virtual registers; also the width of every liveness bitmap.
    pub fn vreg_count(&self) -> usize {
        self.vreg_ids.len()
    }

    /// The virtual register with local ID `id`.
    pub fn local_vreg(&self, id: u32) -> VRegIdx {
        self.vreg_ids[id as usize]
    }

    pub fn returning_list(&self) -> &[NodeIdx] {
        &self.returning_list
    }

    pub fn jcc_list(&self) -> &[NodeIdx] {
        &self.jcc_list
    }

    pub fn frame(&self) -> &StackFrame {
        &self.frame
    }

    pub fn frame_mut(&mut self) -> &mut StackFrame {
        &mut self.frame
    }

    pub fn set_annotation_length(&mut self, columns: usize) {
        self.annotation_length = columns;
    }

    /// Hand the virtual registers back to the module's owner: local and physical IDs are
    /// per-compilation state and must not leak into the next run.
    pub fn cleanup(&mut self, m: &mut Module) {
        for &v in &self.vreg_ids {
            let vr = m.vreg_mut(v);
            vr.reset_local_id();
            vr.reset_phys_id();
        }
        self.vreg_ids.clear();
        self.extra_block = None;
    }

    /// Release all per-function state.
    pub fn reset(&mut self) {
        *self = RaContext::new();
    }
}

impl Default for RaContext {
    fn default() -> Self {
        Self::new()
    }
}
