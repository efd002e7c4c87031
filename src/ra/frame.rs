//! The function frame: variable and stack cells.
//!
//! Every non-stack virtual register that needs memory gets a *variable cell* whose size and
//! alignment are the register's (power-of-two) size; explicit stack allocations get *stack
//! cells* of arbitrary size. Offset resolution lays the variable cells out in seven contiguous
//! runs, largest class first, so natural alignment falls out for free; stack cells follow,
//! sorted by descending alignment.

use index_vec::IndexVec;

use crate::ir::{Module, VRegIdx};

index_vec::define_index_type! {
    /// An index into a [StackFrame]'s cell storage.
    pub struct CellIdx = u32;
}

/// A unit of frame storage.
#[derive(Debug)]
pub struct RaCell {
    /// Final byte offset of the cell in the frame; filled in by
    /// [StackFrame::resolve_cell_offsets].
    pub offset: u32,
    pub size: u32,
    pub alignment: u32,
}

/// The alignment implied by `size`: the smallest power of two >= `size`, capped at 64.
fn default_alignment(size: u32) -> u32 {
    if size > 32 {
        64
    } else if size > 16 {
        32
    } else if size > 8 {
        16
    } else if size > 4 {
        8
    } else if size > 2 {
        4
    } else if size > 1 {
        2
    } else {
        1
    }
}

/// Map a variable size onto its class exponent.
fn size_class(size: u32) -> usize {
    match size {
        1 => 0,
        2 => 1,
        4 => 2,
        8 => 3,
        16 => 4,
        32 => 5,
        64 => 6,
        _ => panic!("{size} is not a valid variable size"),
    }
}

fn align_up(x: u32, align: u32) -> u32 {
    let mask = align - 1;
    (x + mask) & !mask
}

/// All cells of a single function, plus the counters needed to resolve their offsets.
#[derive(Debug, Default)]
pub struct StackFrame {
    cells: IndexVec<CellIdx, RaCell>,
    /// Variable cells, newest first.
    var_cells: Vec<CellIdx>,
    /// Stack cells, sorted by descending alignment, ties broken by descending size.
    stack_cells: Vec<CellIdx>,
    /// Variable cells per power-of-two size class; the index is the exponent.
    vars_used: [u32; 7],
    stack_cells_used: u32,
    max_align: u32,
    var_total: u32,
    stack_total: u32,
    all_total: u32,
}

impl StackFrame {
    /// Create the memory cell backing `vreg` and attach it to the register.
    ///
    /// # Panics
    ///
    /// Panics if the register already has a cell, or if it is a non-stack register whose size is
    /// not one of the seven power-of-two classes.
    pub fn new_var_cell(&mut self, m: &mut Module, vreg: VRegIdx) -> CellIdx {
        assert!(
            m.vreg(vreg).cell().is_none(),
            "virtual register already has a cell"
        );
        let (size, alignment, is_stack) = {
            let vr = m.vreg(vreg);
            (vr.size(), vr.alignment(), vr.is_stack())
        };
        let cell = if is_stack {
            self.new_stack_cell(size, alignment)
        } else {
            let class = size_class(size);
            let cell = self.cells.push(RaCell {
                offset: 0,
                size,
                alignment: size,
            });
            self.var_cells.push(cell);
            self.vars_used[class] += 1;
            self.max_align = self.max_align.max(size);
            self.var_total += size;
            cell
        };
        m.vreg_mut(vreg).set_cell(cell);
        cell
    }

    /// Create an explicit stack cell. An `alignment` of zero is derived from `size`; anything
    /// above 64 is clamped to 64. The size is rounded up to the alignment.
    pub fn new_stack_cell(&mut self, size: u32, alignment: u32) -> CellIdx {
        assert!(size > 0, "stack cells must occupy at least one byte");
        let mut alignment = if alignment == 0 {
            default_alignment(size)
        } else {
            alignment
        };
        if alignment > 64 {
            alignment = 64;
        }
        assert!(
            alignment.is_power_of_two(),
            "stack cell alignment must be a power of two"
        );
        let size = align_up(size, alignment);

        let cell = self.cells.push(RaCell {
            offset: 0,
            size,
            alignment,
        });
        let pos = self
            .stack_cells
            .iter()
            .position(|&c| {
                let cur = &self.cells[c];
                !(cur.alignment > alignment
                    || (cur.alignment == alignment && cur.size > size))
            })
            .unwrap_or(self.stack_cells.len());
        self.stack_cells.insert(pos, cell);

        self.stack_cells_used += 1;
        self.max_align = self.max_align.max(alignment);
        self.stack_total += size;
        cell
    }

    /// Compute the final offset of every cell.
    ///
    /// Variable cells are packed into seven contiguous runs in the order 64, 32, 16, 8, 4, 2, 1;
    /// each cell's offset comes from its class's cursor. Stack cells follow in their sorted
    /// order. Calling this again recomputes the same offsets: the cell lists are not consumed.
    pub fn resolve_cell_offsets(&mut self) {
        let mut pos = [0u32; 7];
        let mut acc = 0;
        for class in (0..7).rev() {
            pos[class] = acc;
            acc += self.vars_used[class] * (1u32 << class);
        }
        let mut stack_pos = acc;

        let mut gap_alignment = self
            .stack_cells
            .first()
            .map_or(0, |&c| self.cells[c].alignment);
        let mut gap_size = 0u32;
        // The gap is seeded empty, so the gap branch below never fires yet.
        // TODO: seed it from the alignment rounding between the variable and the stack region so
        // stack cells can fill the hole.
        let mut gap_pos = stack_pos;
        let mut all_total = stack_pos;

        for &c in self.var_cells.iter().rev() {
            let cell = &mut self.cells[c];
            let class = size_class(cell.size);
            cell.offset = pos[class];
            pos[class] += cell.size;
        }

        for i in 0..self.stack_cells.len() {
            let c = self.stack_cells[i];
            let (size, alignment) = {
                let cell = &self.cells[c];
                (cell.size, cell.alignment)
            };
            let offset = if size <= gap_size && alignment <= gap_alignment {
                let offset = gap_pos;
                gap_size -= size;
                gap_pos -= size;
                if alignment < gap_alignment {
                    gap_alignment = alignment;
                }
                offset
            } else {
                let offset = stack_pos;
                stack_pos += size;
                all_total += size;
                offset
            };
            self.cells[c].offset = offset;
        }

        self.all_total = all_total;
    }

    pub fn cell(&self, c: CellIdx) -> &RaCell {
        &self.cells[c]
    }

    /// Number of variable cells of exactly `size` bytes.
    pub fn vars_used(&self, size: u32) -> u32 {
        self.vars_used[size_class(size)]
    }

    pub fn stack_cells_used(&self) -> u32 {
        self.stack_cells_used
    }

    /// The largest alignment of any cell created so far; the frame itself must be aligned to
    /// this.
    pub fn max_align(&self) -> u32 {
        self.max_align
    }

    pub fn var_total(&self) -> u32 {
        self.var_total
    }

    pub fn stack_total(&self) -> u32 {
        self.stack_total
    }

    /// Total frame bytes after [StackFrame::resolve_cell_offsets].
    pub fn all_total(&self) -> u32 {
        self.all_total
    }

    /// The stack cells in their resolved order.
    pub fn stack_cells(&self) -> impl Iterator<Item = CellIdx> + '_ {
        self.stack_cells.iter().copied()
    }
}
