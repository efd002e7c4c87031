//! Removal of nodes the fetch stage found to be unreachable.

use super::RaContext;
use crate::{
    ir::Module,
    log::{log_ir, should_log_ir, IRPhase},
    CompilationError,
};

impl RaContext {
    /// Sweep every region recorded in the unreachable list.
    ///
    /// A region runs from its entry to the first node carrying work data (that node is live) or
    /// to the end of the function. Within the region, everything is removed until the first
    /// label; the label may still be referenced from live code, so from there on only removable
    /// nodes go -- directives in particular stay.
    pub(crate) fn remove_unreachable_code(
        &mut self,
        m: &mut Module,
    ) -> Result<(), CompilationError> {
        let stop = self.stop;
        for &entry in &self.unreachable_list {
            // An entry may have been unlinked by an earlier region, and the head of the list can
            // never be unreachable.
            if Some(entry) == stop || m.node(entry).prev().is_none() {
                continue;
            }

            let first = entry;
            let mut cur = Some(entry);
            while cur != stop {
                let n = cur.expect("stop node must be on the forward chain");
                if m.node(n).work().is_some() {
                    break;
                }
                cur = m.node(n).next();
            }
            let end = cur;
            if end == Some(first) {
                continue;
            }

            let mut remove_everything = true;
            let mut cur = Some(first);
            while cur != end {
                let n = cur.expect("region end must be on the forward chain");
                let next = m.node(n).next();
                let mut remove = m.node(n).is_removable();
                if !remove {
                    if m.node(n).is_label() {
                        remove_everything = false;
                    }
                    remove = remove_everything;
                }
                if remove {
                    if should_log_ir(IRPhase::PreRa) {
                        log_ir(&format!(
                            "ra: removed unreachable {}\n",
                            m.display_node(n)
                        ));
                    }
                    m.remove_node(n);
                }
                cur = next;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::RaContext;
    use crate::ir::{Module, NodeIdx, RaWorkData};

    /// Builds `func; jmp L; dir1; inst1; L:; dir2; inst2; live; func_end` where only `func`,
    /// `jmp`, `live` and `func_end` carry work data, and returns
    /// `(m, ctx, [dir1, inst1, label, dir2, inst2, live])`.
    fn unreachable_run() -> (Module, RaContext, Vec<NodeIdx>) {
        let mut m = Module::new();
        let (func, end) = m.add_func();
        let l = m.new_label();
        let jmp = m.add_jump(Some(l));
        let dir1 = m.add_directive();
        let inst1 = m.add_inst();
        m.bind(l);
        let dir2 = m.add_directive();
        let inst2 = m.add_inst();
        let live = m.add_inst();

        for n in [func, jmp, live, end] {
            m.node_mut(n).set_work(RaWorkData::default());
        }

        let mut ctx = RaContext::new();
        ctx.func = Some(func);
        ctx.stop = m.node(end).next();
        ctx.mark_unreachable(dir1);

        (m, ctx, vec![dir1, inst1, l, dir2, inst2, live])
    }

    #[test]
    fn two_phase_removal() {
        let (mut m, mut ctx, nodes) = unreachable_run();
        let [dir1, inst1, l, dir2, inst2, live] = nodes[..] else {
            unreachable!()
        };
        ctx.remove_unreachable_code(&mut m).unwrap();

        let left: Vec<_> = m.iter_nodes().collect();
        // Before the label everything goes, directives included; after it only removable nodes.
        assert!(!left.contains(&dir1));
        assert!(!left.contains(&inst1));
        assert!(left.contains(&l));
        assert!(left.contains(&dir2));
        assert!(!left.contains(&inst2));
        assert!(left.contains(&live));
    }

    #[test]
    fn sweep_is_idempotent() {
        let (mut m, mut ctx, _nodes) = unreachable_run();
        ctx.remove_unreachable_code(&mut m).unwrap();
        let first: Vec<_> = m.iter_nodes().collect();
        ctx.remove_unreachable_code(&mut m).unwrap();
        let second: Vec<_> = m.iter_nodes().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_list_is_noop() {
        let mut m = Module::new();
        let (func, end) = m.add_func();
        let i = m.add_inst();
        let mut ctx = RaContext::new();
        ctx.func = Some(func);
        ctx.stop = m.node(end).next();

        ctx.remove_unreachable_code(&mut m).unwrap();
        assert_eq!(m.iter_nodes().collect::<Vec<_>>(), vec![func, i, end]);
    }

    #[test]
    fn run_ending_at_live_node_only() {
        // A region whose entry already carries work data must not be touched.
        let mut m = Module::new();
        let (func, end) = m.add_func();
        let i = m.add_inst();
        m.node_mut(i).set_work(RaWorkData::default());
        let mut ctx = RaContext::new();
        ctx.func = Some(func);
        ctx.stop = m.node(end).next();
        ctx.mark_unreachable(i);

        ctx.remove_unreachable_code(&mut m).unwrap();
        assert_eq!(m.iter_nodes().collect::<Vec<_>>(), vec![func, i, end]);
    }
}
