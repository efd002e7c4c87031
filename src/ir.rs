//! The linearised IR the register-allocation pass operates on.
//!
//! Nodes live in slot storage (an [IndexVec]) and are threaded onto a doubly-linked list through
//! `prev`/`next` indices: the unreachable-code sweep needs cheap unlinking mid-iteration, and
//! node indices must stay stable across removals because jumps and labels refer to each other by
//! index. Detached slots are never reused within a module.
//!
//! Virtual registers are owned by the module and outlive a single register-allocation run: the
//! pass assigns their dense local IDs during fetch and resets them again at cleanup.
//!
//! A [Module] implements [fmt::Display] so it can be dumped by the `RAPASS_LOG_IR` machinery;
//! inline comments (including the liveness annotations) appear after a `;` on each line.

use index_vec::IndexVec;
use smallvec::SmallVec;
use std::fmt;
use vob::Vob;

use crate::ra::frame::CellIdx;

index_vec::define_index_type! {
    /// An index into a [Module]'s node storage.
    pub struct NodeIdx = u32;
}

index_vec::define_index_type! {
    /// An index into a [Module]'s virtual register storage.
    pub struct VRegIdx = u32;
}

/// The effect of one node on one virtual register.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TiedReg {
    pub vreg: VRegIdx,
    pub flags: u32,
}

impl TiedReg {
    /// The node reads the register (any kind of read).
    pub const R: u32 = 1 << 0;
    /// The node writes the register (any kind of write).
    pub const W: u32 = 1 << 1;
    /// This node is the last use of the register on this path.
    pub const UNUSE: u32 = 1 << 2;

    pub fn new(vreg: VRegIdx, flags: u32) -> Self {
        Self { vreg, flags }
    }

    pub fn is_read_only(&self) -> bool {
        (self.flags & Self::R != 0) && (self.flags & Self::W == 0)
    }

    pub fn is_write_only(&self) -> bool {
        (self.flags & Self::R == 0) && (self.flags & Self::W != 0)
    }

    pub fn is_read_write(&self) -> bool {
        (self.flags & Self::R != 0) && (self.flags & Self::W != 0)
    }

    pub fn is_last_use(&self) -> bool {
        self.flags & Self::UNUSE != 0
    }
}

/// Per-node scratch record attached by the fetch stage to every node that takes part in the
/// analysis.
#[derive(Debug, Default)]
pub struct RaWorkData {
    /// The registers live just before this node executes, one bit per local ID. `None` until the
    /// liveness analysis first visits the node.
    pub liveness: Option<Vob>,
    /// How this node touches each virtual register it references.
    pub tied: SmallVec<[TiedReg; 4]>,
}

/// A virtual register. Created by the module's owner; the pass only borrows it for the duration
/// of one compilation.
#[derive(Debug)]
pub struct VirtReg {
    size: u32,
    alignment: u32,
    is_stack: bool,
    local_id: Option<u32>,
    phys_id: Option<u32>,
    cell: Option<CellIdx>,
}

impl VirtReg {
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn alignment(&self) -> u32 {
        self.alignment
    }

    /// Does this register denote an explicit stack allocation rather than a spillable variable?
    pub fn is_stack(&self) -> bool {
        self.is_stack
    }

    /// The dense ID the current compilation knows this register by.
    pub fn local_id(&self) -> Option<u32> {
        self.local_id
    }

    pub fn phys_id(&self) -> Option<u32> {
        self.phys_id
    }

    /// The frame cell backing this register, once one has been created.
    pub fn cell(&self) -> Option<CellIdx> {
        self.cell
    }

    pub fn set_phys_id(&mut self, phys_id: u32) {
        self.phys_id = Some(phys_id);
    }

    pub(crate) fn set_local_id(&mut self, local_id: u32) {
        self.local_id = Some(local_id);
    }

    pub(crate) fn set_cell(&mut self, cell: CellIdx) {
        self.cell = Some(cell);
    }

    pub(crate) fn reset_local_id(&mut self) {
        self.local_id = None;
    }

    pub(crate) fn reset_phys_id(&mut self) {
        self.phys_id = None;
    }
}

#[derive(Debug)]
pub enum NodeKind {
    /// Top-of-function sentinel. Backward propagation stops here.
    Func { end: NodeIdx },
    /// End-of-function sentinel; the epilogue is emitted after it.
    FuncEnd,
    /// A jump target. `refs` counts the jumps referencing it and `from` is the chain of those
    /// jump nodes, in the order they were created.
    Label { refs: u32, from: Vec<NodeIdx> },
    /// A control transfer. `target == None` models a jump to an external label.
    Jump {
        target: Option<NodeIdx>,
        conditional: bool,
    },
    /// Any other instruction; its register effects live in the node's work data.
    Inst,
    /// An alignment or data directive. Must survive unreachable-code removal.
    Directive,
    /// An informational node.
    Comment,
}

/// One slot of a [Module]'s node list.
#[derive(Debug)]
pub struct Node {
    prev: Option<NodeIdx>,
    next: Option<NodeIdx>,
    kind: NodeKind,
    removable: bool,
    comment: Option<String>,
    work: Option<RaWorkData>,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        let removable = matches!(
            kind,
            NodeKind::Inst | NodeKind::Jump { .. } | NodeKind::Comment
        );
        Self {
            prev: None,
            next: None,
            kind,
            removable,
            comment: None,
            work: None,
        }
    }

    pub fn prev(&self) -> Option<NodeIdx> {
        self.prev
    }

    pub fn next(&self) -> Option<NodeIdx> {
        self.next
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_removable(&self) -> bool {
        self.removable
    }

    pub fn is_label(&self) -> bool {
        matches!(self.kind, NodeKind::Label { .. })
    }

    pub fn is_uncond_jump(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Jump {
                conditional: false,
                ..
            }
        )
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn set_comment(&mut self, comment: String) {
        self.comment = Some(comment);
    }

    pub fn work(&self) -> Option<&RaWorkData> {
        self.work.as_ref()
    }

    pub fn work_mut(&mut self) -> Option<&mut RaWorkData> {
        self.work.as_mut()
    }

    pub fn set_work(&mut self, work: RaWorkData) {
        self.work = Some(work);
    }
}

/// A single function's IR: the node list plus the virtual registers it references.
#[derive(Debug, Default)]
pub struct Module {
    nodes: IndexVec<NodeIdx, Node>,
    vregs: IndexVec<VRegIdx, VirtReg>,
    first: Option<NodeIdx>,
    last: Option<NodeIdx>,
    cursor: Option<NodeIdx>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, n: NodeIdx) -> &Node {
        &self.nodes[n]
    }

    pub fn node_mut(&mut self, n: NodeIdx) -> &mut Node {
        &mut self.nodes[n]
    }

    pub fn vreg(&self, v: VRegIdx) -> &VirtReg {
        &self.vregs[v]
    }

    pub fn vreg_mut(&mut self, v: VRegIdx) -> &mut VirtReg {
        &mut self.vregs[v]
    }

    pub fn vreg_indices(&self) -> impl Iterator<Item = VRegIdx> + '_ {
        (0..self.vregs.len()).map(VRegIdx::from_usize)
    }

    /// Create a virtual register of `size` bytes.
    pub fn new_vreg(&mut self, size: u32, alignment: u32) -> VRegIdx {
        self.vregs.push(VirtReg {
            size,
            alignment,
            is_stack: false,
            local_id: None,
            phys_id: None,
            cell: None,
        })
    }

    /// Create a virtual register denoting an explicit stack allocation.
    pub fn new_stack_vreg(&mut self, size: u32, alignment: u32) -> VRegIdx {
        let v = self.new_vreg(size, alignment);
        self.vregs[v].is_stack = true;
        v
    }

    /// Append a function entry/end pair and leave the cursor on the entry, so subsequent nodes
    /// land inside the function.
    pub fn add_func(&mut self) -> (NodeIdx, NodeIdx) {
        let end = self.nodes.push(Node::new(NodeKind::FuncEnd));
        let func = self.insert_new(Node::new(NodeKind::Func { end }));
        self.link_after(func, end);
        self.cursor = Some(func);
        (func, end)
    }

    pub fn add_inst(&mut self) -> NodeIdx {
        self.insert_new(Node::new(NodeKind::Inst))
    }

    pub fn add_directive(&mut self) -> NodeIdx {
        self.insert_new(Node::new(NodeKind::Directive))
    }

    pub fn add_comment(&mut self, text: &str) -> NodeIdx {
        let n = self.insert_new(Node::new(NodeKind::Comment));
        self.nodes[n].comment = Some(text.to_owned());
        n
    }

    /// Create a label node without placing it on the list; [Module::bind] inserts it.
    pub fn new_label(&mut self) -> NodeIdx {
        self.nodes.push(Node::new(NodeKind::Label {
            refs: 0,
            from: Vec::new(),
        }))
    }

    /// Place a label created with [Module::new_label] at the cursor.
    pub fn bind(&mut self, label: NodeIdx) {
        assert!(
            self.nodes[label].is_label() && self.nodes[label].prev.is_none(),
            "bind() requires an unbound label"
        );
        self.insert_existing(label);
    }

    /// Append an unconditional jump. `target == None` jumps to an external label.
    pub fn add_jump(&mut self, target: Option<NodeIdx>) -> NodeIdx {
        let n = self.insert_new(Node::new(NodeKind::Jump {
            target,
            conditional: false,
        }));
        if let Some(t) = target {
            self.add_label_ref(t, n);
        }
        n
    }

    /// Append a conditional jump to `target`.
    pub fn add_jcc(&mut self, target: NodeIdx) -> NodeIdx {
        let n = self.insert_new(Node::new(NodeKind::Jump {
            target: Some(target),
            conditional: true,
        }));
        self.add_label_ref(target, n);
        n
    }

    fn add_label_ref(&mut self, label: NodeIdx, jump: NodeIdx) {
        match &mut self.nodes[label].kind {
            NodeKind::Label { refs, from } => {
                *refs += 1;
                from.push(jump);
            }
            _ => panic!("jump target must be a label"),
        }
    }

    /// Unlink `n` from the list. The slot stays allocated so outstanding indices stay valid.
    pub fn remove_node(&mut self, n: NodeIdx) {
        let (prev, next) = (self.nodes[n].prev, self.nodes[n].next);
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => {
                if self.first == Some(n) {
                    self.first = next;
                }
            }
        }
        match next {
            Some(x) => self.nodes[x].prev = prev,
            None => {
                if self.last == Some(n) {
                    self.last = prev;
                }
            }
        }
        if self.cursor == Some(n) {
            self.cursor = prev;
        }
        self.nodes[n].prev = None;
        self.nodes[n].next = None;
    }

    pub fn cursor(&self) -> Option<NodeIdx> {
        self.cursor
    }

    /// Move the insertion point. `None` appends at the end of the list.
    pub fn set_cursor(&mut self, cursor: Option<NodeIdx>) {
        self.cursor = cursor;
    }

    /// The nodes currently on the list, in order.
    pub fn iter_nodes(&self) -> impl Iterator<Item = NodeIdx> + '_ {
        let mut cur = self.first;
        std::iter::from_fn(move || {
            let n = cur?;
            cur = self.nodes[n].next;
            Some(n)
        })
    }

    fn insert_new(&mut self, node: Node) -> NodeIdx {
        let n = self.nodes.push(node);
        self.insert_existing(n);
        n
    }

    fn insert_existing(&mut self, n: NodeIdx) {
        match self.cursor {
            Some(at) => self.link_after(at, n),
            None => self.link_last(n),
        }
        self.cursor = Some(n);
    }

    fn link_after(&mut self, at: NodeIdx, n: NodeIdx) {
        let next = self.nodes[at].next;
        self.nodes[at].next = Some(n);
        self.nodes[n].prev = Some(at);
        self.nodes[n].next = next;
        match next {
            Some(x) => self.nodes[x].prev = Some(n),
            None => self.last = Some(n),
        }
    }

    fn link_last(&mut self, n: NodeIdx) {
        match self.last {
            Some(l) => {
                self.nodes[l].next = Some(n);
                self.nodes[n].prev = Some(l);
            }
            None => self.first = Some(n),
        }
        self.last = Some(n);
    }

    pub(crate) fn display_node(&self, n: NodeIdx) -> String {
        let node = &self.nodes[n];
        match &node.kind {
            NodeKind::Func { .. } => "func".to_owned(),
            NodeKind::FuncEnd => "func_end".to_owned(),
            NodeKind::Label { .. } => format!("L{}:", n.index()),
            NodeKind::Jump {
                target,
                conditional,
            } => {
                let op = if *conditional { "jcc" } else { "jmp" };
                match target {
                    Some(t) => format!("{op} L{}", t.index()),
                    None => format!("{op} <extern>"),
                }
            }
            NodeKind::Inst => "inst".to_owned(),
            NodeKind::Directive => ".directive".to_owned(),
            NodeKind::Comment => format!("; {}", node.comment.as_deref().unwrap_or("")),
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for n in self.iter_nodes() {
            let node = &self.nodes[n];
            let indent = if matches!(
                node.kind,
                NodeKind::Label { .. } | NodeKind::Func { .. } | NodeKind::FuncEnd
            ) {
                ""
            } else {
                "  "
            };
            let s = self.display_node(n);
            match (&node.kind, node.comment.as_deref()) {
                (NodeKind::Comment, _) | (_, None) => writeln!(f, "{indent}{s}")?,
                (_, Some(c)) => writeln!(f, "{indent}{s} ; {c}")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linking() {
        let mut m = Module::new();
        let (func, end) = m.add_func();
        let a = m.add_inst();
        let b = m.add_inst();

        let order: Vec<_> = m.iter_nodes().collect();
        assert_eq!(order, vec![func, a, b, end]);
        assert_eq!(m.node(a).prev(), Some(func));
        assert_eq!(m.node(b).next(), Some(end));

        m.remove_node(a);
        let order: Vec<_> = m.iter_nodes().collect();
        assert_eq!(order, vec![func, b, end]);
        assert_eq!(m.node(b).prev(), Some(func));
        assert_eq!(m.node(a).prev(), None);
        assert_eq!(m.node(a).next(), None);
    }

    #[test]
    fn cursor_insertion() {
        let mut m = Module::new();
        let (func, end) = m.add_func();
        let a = m.add_inst();
        m.set_cursor(Some(func));
        let b = m.add_inst();

        let order: Vec<_> = m.iter_nodes().collect();
        assert_eq!(order, vec![func, b, a, end]);
    }

    #[test]
    fn label_refs() {
        let mut m = Module::new();
        let (_func, _end) = m.add_func();
        let l = m.new_label();
        let j1 = m.add_jcc(l);
        let j2 = m.add_jump(Some(l));
        m.bind(l);

        match m.node(l).kind() {
            NodeKind::Label { refs, from } => {
                assert_eq!(*refs, 2);
                assert_eq!(from, &vec![j1, j2]);
            }
            _ => panic!(),
        }
        assert!(m.node(j2).is_uncond_jump());
        assert!(!m.node(j1).is_uncond_jump());
    }

    #[test]
    fn removability() {
        let mut m = Module::new();
        let (func, end) = m.add_func();
        let i = m.add_inst();
        let d = m.add_directive();
        let l = m.new_label();
        m.bind(l);
        let c = m.add_comment("note");

        assert!(m.node(i).is_removable());
        assert!(m.node(c).is_removable());
        assert!(!m.node(d).is_removable());
        assert!(!m.node(l).is_removable());
        assert!(!m.node(func).is_removable());
        assert!(!m.node(end).is_removable());
    }

    #[test]
    fn display() {
        let mut m = Module::new();
        let (_func, _end) = m.add_func();
        let l = m.new_label();
        m.add_jump(Some(l));
        m.bind(l);
        let i = m.add_inst();
        m.node_mut(i).set_comment("the answer".to_owned());

        let s = m.to_string();
        assert_eq!(
            s,
            format!(
                "func\n  jmp L{idx}\nL{idx}:\n  inst ; the answer\nfunc_end\n",
                idx = l.index()
            )
        );
    }
}
