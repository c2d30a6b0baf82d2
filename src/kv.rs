//! KV cache introspection.
//!
//! The cache itself lives in the model executor; this module only defines
//! the read-only [`KVCacheView`] snapshot the executor produces on demand
//! and the [`KVCacheInspector`] that formats it for diagnostics. Nothing
//! here mutates decoding state, so dumps can be taken at any time.

use std::fmt::Write as _;

use crate::core::sequence::SequenceId;

/// One cache cell: the sequences whose keys/values occupy it.
///
/// An empty id set means the cell is free.
#[derive(Debug, Clone, Default)]
pub struct KVCacheCell {
    /// Sequences resident in this cell.
    pub seq_ids: Vec<SequenceId>,
}

impl KVCacheCell {
    /// Whether any sequence occupies this cell.
    pub fn is_occupied(&self) -> bool {
        !self.seq_ids.is_empty()
    }
}

/// Read-only snapshot of cache occupancy, produced on demand and never
/// cached by this crate.
#[derive(Debug, Clone)]
pub struct KVCacheView {
    /// All cells, in cache order.
    pub cells: Vec<KVCacheCell>,
}

impl KVCacheView {
    /// Total cell count.
    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    /// Number of occupied cells.
    pub fn used_cells(&self) -> usize {
        self.cells.iter().filter(|c| c.is_occupied()).count()
    }

    /// Total tokens resident in the cache (one per sequence per cell).
    pub fn total_tokens(&self) -> usize {
        self.cells.iter().map(|c| c.seq_ids.len()).sum()
    }

    /// Length and start of the largest contiguous run of free cells.
    pub fn largest_free_run(&self) -> (usize, usize) {
        let mut best = (0, 0);
        let mut run = 0;
        let mut run_start = 0;
        for (i, cell) in self.cells.iter().enumerate() {
            if cell.is_occupied() {
                run = 0;
            } else {
                if run == 0 {
                    run_start = i;
                }
                run += 1;
                if run > best.0 {
                    best = (run, run_start);
                }
            }
        }
        best
    }
}

/// Plain-text formatter for [`KVCacheView`] snapshots.
#[derive(Debug, Clone, Copy)]
pub struct KVCacheInspector;

impl KVCacheInspector {
    /// Format a cache view as a 2-D grid, `row_width` cells per row.
    ///
    /// The compact variant marks each cell with `.` when empty and its
    /// sequence count (capped at 9) when occupied. The detailed variant
    /// lists every resident sequence per cell, each sequence mapped to a
    /// stable one-character symbol.
    pub fn dump(view: &KVCacheView, row_width: usize, detailed: bool) -> String {
        if detailed {
            Self::dump_seqs(view, row_width)
        } else {
            Self::dump_counts(view, row_width)
        }
    }

    fn header(view: &KVCacheView) -> String {
        let (free_run, free_at) = view.largest_free_run();
        format!(
            "=== KV cache: {} cells, {} populated, {} tokens, largest free run {} @ {}\n",
            view.n_cells(),
            view.used_cells(),
            view.total_tokens(),
            free_run,
            free_at,
        )
    }

    fn dump_counts(view: &KVCacheView, row_width: usize) -> String {
        let row_width = row_width.max(1);
        let mut out = Self::header(view);

        for (i, cell) in view.cells.iter().enumerate() {
            if i % row_width == 0 {
                let _ = write!(out, "\n{i:5}: ");
            }
            let mark = match cell.seq_ids.len() {
                0 => '.',
                n => char::from_digit(n.min(9) as u32, 10).unwrap_or('9'),
            };
            out.push(mark);
        }
        out.push('\n');
        out
    }

    fn dump_seqs(view: &KVCacheView, row_width: usize) -> String {
        let row_width = row_width.max(1);
        let mut out = Self::header(view);

        // Stable symbol per sequence, assigned in order of first
        // residence.
        const SYMBOLS: &[u8] =
            b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
        let mut seq_symbols: Vec<SequenceId> = Vec::new();
        for cell in &view.cells {
            for &seq in &cell.seq_ids {
                if !seq_symbols.contains(&seq) {
                    seq_symbols.push(seq);
                }
            }
        }
        let symbol = |seq: SequenceId| -> char {
            match seq_symbols.iter().position(|&s| s == seq) {
                Some(i) if i < SYMBOLS.len() => SYMBOLS[i] as char,
                _ => '+',
            }
        };

        let width = seq_symbols.len().max(1);
        for (i, cell) in view.cells.iter().enumerate() {
            if i % row_width == 0 {
                let _ = write!(out, "\n{i:5}: ");
            }
            let mut field = String::with_capacity(width + 1);
            for &seq in &cell.seq_ids {
                field.push(symbol(seq));
            }
            while field.len() < width {
                field.push('.');
            }
            out.push_str(&field);
            out.push(' ');
        }
        out.push('\n');

        for (i, &seq) in seq_symbols.iter().enumerate() {
            let _ = writeln!(out, "  {} = seq {}", SYMBOLS[i.min(SYMBOLS.len() - 1)] as char, seq);
        }
        out
    }
}
