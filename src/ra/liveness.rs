//! Backward liveness analysis over the node list.
//!
//! This is a may-analysis: bit `i` of a node's bitmap means "the register with local ID `i` may
//! be read on some path from this node before it is written". The analysis starts at each node
//! in the returning list and walks backwards, carrying a working set `b_cur`. A node visited for
//! the first time gets a copy of the working set with its own effects applied (writes kill,
//! uses gen); a node seen again is *patched*: the working set's new bits are unioned in and the
//! walk only continues while something actually changed, which bounds the whole analysis by
//! monotone bit growth.
//!
//! Labels are merge points: when the walk reaches one, every jump in its `from` chain is
//! re-entered with the label's current live set before the walk falls through to the label's
//! ordinary predecessor. The chain positions in flight are kept on a stack of
//! [LivenessTarget]s so nested labels unwind correctly.

use super::RaContext;
use crate::{
    ir::{Module, NodeIdx, NodeKind},
    CompilationError,
};
use vob::Vob;

/// The back edge of a label currently being propagated through.
struct LivenessTarget {
    /// The label node.
    node: NodeIdx,
    /// Position of the back edge being followed in the label's `from` chain.
    from_pos: usize,
}

enum State {
    /// First arrival at a node: install its bitmap and apply its transfer.
    Visit,
    /// The node already has a bitmap: union the working set in; stop when nothing changes.
    Patch,
    /// Arrived at a label: decide whether to start, resume or skip its back-edge walk.
    Target,
    /// Head of the back-edge loop: refresh the working set and pick the next edge.
    TargetLoop,
    /// Test whether the working set adds anything to the current back edge's jump.
    JumpNext,
    /// All back edges of the current label are done: propagate to its list predecessor.
    FallThrough,
    /// The current walk ended: unwind the target stack or start the next returning node.
    Done,
}

impl RaContext {
    /// Run the analysis. Afterwards every node reachable backwards from the returning list has
    /// `work().liveness == Some(..)`; a module with no registered virtual registers is a no-op.
    pub(crate) fn liveness_analysis(&mut self, m: &mut Module) -> Result<(), CompilationError> {
        let b_len = self.vreg_ids.len();
        if b_len == 0 {
            return Ok(());
        }

        let func = self
            .func
            .expect("liveness analysis needs compile() to have set the function");
        assert!(
            !self.returning_list.is_empty(),
            "fetch must record at least one returning node"
        );

        let mut lt_stack: Vec<LivenessTarget> = Vec::new();
        let mut b_cur = Vob::from_elem(false, b_len);
        let mut ret_pos = 0;
        let mut node = self.returning_list[0];
        let mut state = State::Visit;

        loop {
            state = match state {
                State::Visit => loop {
                    let visited = m
                        .node(node)
                        .work()
                        .expect("backward walk reached a node without work data")
                        .liveness
                        .is_some();
                    if visited {
                        let wd = m.node_mut(node).work_mut().unwrap();
                        let live = wd.liveness.as_mut().unwrap();
                        break if add_bits_del_source(live, &mut b_cur) {
                            State::Patch
                        } else {
                            State::Done
                        };
                    }

                    // First visit: the node's live-in is the working set plus everything the
                    // node touches; write-only registers are no longer live above it.
                    let tied = m.node(node).work().unwrap().tied.clone();
                    let mut b_node = b_cur.clone();
                    for t in &tied {
                        let local =
                            m.vreg(t.vreg).local_id().expect("tied register has no local id")
                                as usize;
                        b_node.set(local, true);
                        if t.is_write_only() {
                            b_cur.set(local, false);
                        } else {
                            b_cur.set(local, true);
                        }
                    }
                    m.node_mut(node).work_mut().unwrap().liveness = Some(b_node);

                    if m.node(node).is_label() {
                        break State::Target;
                    }
                    if node == func {
                        break State::Done;
                    }
                    node = m
                        .node(node)
                        .prev()
                        .expect("walked past the head of the node list");
                },

                State::Patch => loop {
                    let changed = {
                        let wd = m
                            .node_mut(node)
                            .work_mut()
                            .expect("patch reached a node without work data");
                        let live = wd
                            .liveness
                            .as_mut()
                            .expect("patch reached a node without a live set");
                        add_bits_del_source(live, &mut b_cur)
                    };
                    if !changed {
                        break State::Done;
                    }
                    if m.node(node).is_label() {
                        break State::Target;
                    }
                    if node == func {
                        break State::Done;
                    }
                    node = m
                        .node(node)
                        .prev()
                        .expect("walked past the head of the node list");
                },

                State::Target => {
                    let refs = match m.node(node).kind() {
                        NodeKind::Label { refs, .. } => *refs,
                        _ => unreachable!("target state requires a label"),
                    };
                    if refs == 0 {
                        // No jump references the label: it is reachable by fall-through only.
                        State::FallThrough
                    } else if lt_stack.last().map(|lt| lt.node == node) == Some(true) {
                        State::JumpNext
                    } else {
                        lt_stack.push(LivenessTarget { node, from_pos: 0 });
                        State::TargetLoop
                    }
                }

                State::TargetLoop => {
                    let (label, pos) = {
                        let lt = lt_stack
                            .last()
                            .expect("target loop needs an active liveness target");
                        (lt.node, lt.from_pos)
                    };
                    node = label;
                    let from = match m.node(label).kind() {
                        NodeKind::Label { from, .. } => from.get(pos).copied(),
                        _ => unreachable!("liveness target is not a label"),
                    };
                    match from {
                        None => {
                            lt_stack.pop();
                            State::FallThrough
                        }
                        Some(from) => {
                            b_cur = m
                                .node(label)
                                .work()
                                .unwrap()
                                .liveness
                                .as_ref()
                                .unwrap()
                                .clone();
                            if m.node(from)
                                .work()
                                .expect("jump on a from chain has no work data")
                                .liveness
                                .is_none()
                            {
                                node = from;
                                State::Visit
                            } else {
                                State::JumpNext
                            }
                        }
                    }
                }

                State::JumpNext => {
                    let (label, pos) = {
                        let lt = lt_stack
                            .last()
                            .expect("jump-next needs an active liveness target");
                        (lt.node, lt.from_pos)
                    };
                    node = label;
                    let from = match m.node(label).kind() {
                        NodeKind::Label { from, .. } => from[pos],
                        _ => unreachable!("liveness target is not a label"),
                    };
                    let remaining = {
                        let live = m
                            .node(from)
                            .work()
                            .expect("jump on a from chain has no work data")
                            .liveness
                            .as_ref()
                            .expect("jump-next requires the jump to have a live set");
                        del_bits(&mut b_cur, live)
                    };
                    if remaining {
                        // The jump does not yet carry some of the label's live bits: patch the
                        // code above it with exactly those bits.
                        node = from;
                        State::Patch
                    } else {
                        lt_stack.last_mut().unwrap().from_pos += 1;
                        State::TargetLoop
                    }
                }

                State::FallThrough => {
                    // `node` is the label; its ordinary predecessor sees the label's live-in.
                    b_cur = m
                        .node(node)
                        .work()
                        .unwrap()
                        .liveness
                        .as_ref()
                        .unwrap()
                        .clone();
                    node = m.node(node).prev().expect("label has no predecessor");
                    if m.node(node).is_uncond_jump() {
                        // Control cannot fall through a plain jump into the label. The jump's
                        // own live-in was handled through the from chain of its target.
                        debug_assert!(
                            m.node(node).work().map_or(true, |wd| wd.tied.is_empty()),
                            "unconditional jumps must not tie virtual registers"
                        );
                        State::Done
                    } else if m.node(node).work().is_none() {
                        State::Done
                    } else if m.node(node).work().unwrap().liveness.is_none() {
                        State::Visit
                    } else {
                        let remaining = {
                            let live = m.node(node).work().unwrap().liveness.as_ref().unwrap();
                            del_bits(&mut b_cur, live)
                        };
                        if remaining {
                            State::Patch
                        } else {
                            State::Done
                        }
                    }
                }

                State::Done => {
                    if let Some(lt) = lt_stack.last() {
                        node = lt.node;
                        State::JumpNext
                    } else {
                        ret_pos += 1;
                        if ret_pos < self.returning_list.len() {
                            node = self.returning_list[ret_pos];
                            // Every returning node starts from an empty working set.
                            b_cur = Vob::from_elem(false, b_len);
                            State::Visit
                        } else {
                            return Ok(());
                        }
                    }
                }
            };
        }
    }
}

/// `dst |= src`, then strip from `src` every bit `dst` already had: afterwards `src` holds
/// exactly the bits that were new to `dst`. Returns true if `dst` gained any bit.
pub(crate) fn add_bits_del_source(dst: &mut Vob, src: &mut Vob) -> bool {
    let mut delta = dst.clone();
    let changed = dst.or(src);
    delta.xor(dst);
    *src = delta;
    changed
}

/// `a &= !b`. Returns true if any bit remains set in `a`.
pub(crate) fn del_bits(a: &mut Vob, b: &Vob) -> bool {
    for i in b.iter_set_bits(..) {
        a.set(i, false);
    }
    a.iter_set_bits(..).next().is_some()
}
