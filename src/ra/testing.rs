//! Test helpers: a minimal target whose fetch follows the control flow of a [Module].

use std::collections::HashMap;

use super::{RaContext, RaTarget};
use crate::{
    ir::{Module, NodeIdx, NodeKind, RaWorkData, TiedReg, VRegIdx},
    CompilationError,
};

/// A target for tests. Tied registers and returning nodes are declared up front; fetch walks
/// the control flow from the function entry, attaching work data to exactly the reachable
/// nodes, and translate does nothing.
pub(crate) struct TestTarget {
    tied: HashMap<NodeIdx, Vec<TiedReg>>,
    returns: Vec<NodeIdx>,
}

impl TestTarget {
    pub(crate) fn new() -> Self {
        Self {
            tied: HashMap::new(),
            returns: Vec::new(),
        }
    }

    /// Declare that `node` touches `vreg` as described by `flags`.
    pub(crate) fn tie(&mut self, node: NodeIdx, vreg: VRegIdx, flags: u32) {
        self.tied
            .entry(node)
            .or_default()
            .push(TiedReg::new(vreg, flags));
    }

    /// Declare that the function exits at `node`.
    pub(crate) fn ret(&mut self, node: NodeIdx) {
        self.returns.push(node);
    }
}

impl RaTarget for TestTarget {
    fn fetch(&mut self, ctx: &mut RaContext, m: &mut Module) -> Result<(), CompilationError> {
        // Register every virtual register up front so local IDs match creation order and tests
        // can predict bit positions.
        let vregs: Vec<VRegIdx> = m.vreg_indices().collect();
        for v in vregs {
            ctx.register_vreg(m, v);
        }

        let func = ctx.func().expect("fetch runs inside compile()");
        let stop = ctx.stop();

        // The function end hosts the epilogue and is always live.
        let end = match m.node(func).kind() {
            NodeKind::Func { end } => *end,
            _ => unreachable!("compile() checked the entry node"),
        };
        m.node_mut(end).set_work(RaWorkData::default());

        let mut work = vec![func];
        while let Some(start) = work.pop() {
            let mut cur = Some(start);
            while cur != stop {
                let n = cur.expect("function is not terminated");
                if m.node(n).work().is_some() {
                    break;
                }
                let tied = self.tied.get(&n).cloned().unwrap_or_default();
                m.node_mut(n).set_work(RaWorkData {
                    liveness: None,
                    tied: tied.into(),
                });

                let mut fall_through = true;
                if let NodeKind::Jump {
                    target,
                    conditional,
                } = m.node(n).kind()
                {
                    if let Some(t) = *target {
                        work.push(t);
                    }
                    if *conditional {
                        ctx.mark_jcc(n);
                    } else {
                        fall_through = false;
                    }
                }
                if self.returns.contains(&n) {
                    ctx.mark_returning(n);
                    fall_through = false;
                }
                if !fall_through {
                    if let Some(next) = m.node(n).next() {
                        ctx.mark_unreachable(next);
                    }
                    break;
                }
                cur = m.node(n).next();
            }
        }
        Ok(())
    }

    fn translate(
        &mut self,
        _ctx: &mut RaContext,
        _m: &mut Module,
    ) -> Result<(), CompilationError> {
        Ok(())
    }
}
