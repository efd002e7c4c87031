//! Human-readable liveness annotations.
//!
//! Each annotated node shows its inline comment padded to a fixed column, then one character per
//! registered virtual register: space for "not involved", `.` for "live here", and `r`/`w`/`x`/
//! `u` for the node's own effect on the register (read, write, both, unknown), uppercased when
//! this is the register's last use.

use super::RaContext;
use crate::ir::{Module, NodeIdx};

impl RaContext {
    /// Append `node`'s inline comment and liveness strip to `dst`. Nodes without a computed live
    /// set only contribute their comment.
    pub fn format_inline_comment(&self, dst: &mut String, m: &Module, node: NodeIdx) {
        if let Some(comment) = m.node(node).comment() {
            dst.push_str(comment);
        }
        let Some(wd) = m.node(node).work() else {
            return;
        };
        let Some(live) = wd.liveness.as_ref() else {
            return;
        };

        while dst.len() < self.annotation_length {
            dst.push(' ');
        }

        let mut strip = vec![b' '; self.vreg_ids.len()];
        for i in live.iter_set_bits(..) {
            strip[i] = b'.';
        }
        for t in &wd.tied {
            let mut c = b'u';
            if t.is_read_only() {
                c = b'r';
            }
            if t.is_write_only() {
                c = b'w';
            }
            if t.is_read_write() {
                c = b'x';
            }
            if t.is_last_use() {
                c = c.to_ascii_uppercase();
            }
            let local = m
                .vreg(t.vreg)
                .local_id()
                .expect("tied register has no local id") as usize;
            strip[local] = c;
        }

        dst.push('[');
        dst.push_str(std::str::from_utf8(&strip).unwrap());
        dst.push(']');
    }

    /// Store the formatted annotation as the inline comment of every node carrying work data,
    /// so a subsequent IR dump shows the live sets.
    pub fn annotate(&self, m: &mut Module) {
        let func = self
            .func
            .expect("annotate needs compile() to have set the function");
        let stop = self.stop;
        let mut cur = Some(func);
        while cur != stop {
            let n = cur.expect("function is not terminated");
            if m.node(n).work().is_some() {
                let mut dst = String::new();
                self.format_inline_comment(&mut dst, m, n);
                if !dst.is_empty() {
                    m.node_mut(n).set_comment(dst);
                }
            }
            cur = m.node(n).next();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        ir::{Module, RaWorkData, TiedReg},
        ra::RaContext,
    };
    use smallvec::smallvec;
    use vob::Vob;

    #[test]
    fn strip_format() {
        let mut m = Module::new();
        let vs: Vec<_> = (0..4).map(|_| m.new_vreg(8, 8)).collect();
        let mut ctx = RaContext::new();
        for &v in &vs {
            ctx.register_vreg(&mut m, v);
        }

        let n = m.add_inst();
        m.node_mut(n).set_comment("add".to_owned());
        let mut live = Vob::from_elem(false, 4);
        live.set(1, true);
        live.set(3, true);
        m.node_mut(n).set_work(RaWorkData {
            liveness: Some(live),
            tied: smallvec![TiedReg::new(vs[0], TiedReg::R | TiedReg::UNUSE)],
        });

        let mut dst = String::new();
        ctx.format_inline_comment(&mut dst, &m, n);
        assert_eq!(dst, "add         [R. .]");
    }

    #[test]
    fn tied_direction_chars() {
        let mut m = Module::new();
        let vs: Vec<_> = (0..4).map(|_| m.new_vreg(4, 4)).collect();
        let mut ctx = RaContext::new();
        for &v in &vs {
            ctx.register_vreg(&mut m, v);
        }

        let n = m.add_inst();
        m.node_mut(n).set_work(RaWorkData {
            liveness: Some(Vob::from_elem(false, 4)),
            tied: smallvec![
                TiedReg::new(vs[0], TiedReg::R),
                TiedReg::new(vs[1], TiedReg::W),
                TiedReg::new(vs[2], TiedReg::R | TiedReg::W),
                TiedReg::new(vs[3], 0),
            ],
        });

        let mut dst = String::new();
        ctx.format_inline_comment(&mut dst, &m, n);
        assert_eq!(dst, "            [rwxu]");
    }

    #[test]
    fn long_comment_is_not_padded() {
        let mut m = Module::new();
        let v = m.new_vreg(4, 4);
        let mut ctx = RaContext::new();
        ctx.register_vreg(&mut m, v);

        let n = m.add_inst();
        m.node_mut(n)
            .set_comment("a rather long comment".to_owned());
        m.node_mut(n).set_work(RaWorkData {
            liveness: Some(Vob::from_elem(false, 1)),
            tied: smallvec![],
        });

        let mut dst = String::new();
        ctx.format_inline_comment(&mut dst, &m, n);
        assert_eq!(dst, "a rather long comment[ ]");
    }

    #[test]
    fn comment_only_without_live_set() {
        let mut m = Module::new();
        let mut ctx = RaContext::new();
        let n = m.add_inst();
        m.node_mut(n).set_comment("plain".to_owned());
        m.node_mut(n).set_work(RaWorkData::default());

        let mut dst = String::new();
        ctx.format_inline_comment(&mut dst, &m, n);
        assert_eq!(dst, "plain");
    }
}
