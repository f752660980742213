//! Reconstruction of per-trace trees from a flat span window.
//!
//! A flushed window is unordered with respect to the trace structure: a child
//! may appear before its root, and the root may have been overwritten
//! altogether. [`TraceTreeBuilder::build`] resolves spans with a worklist:
//!
//! 1. Each pass walks the unresolved spans. A root (parent id `0`) opens the
//!    tree for its trace id; any other span joins the tree of its trace id if
//!    that tree is already open. Everything else stays for the next pass.
//! 2. The loop stops once the worklist is empty or a pass resolved nothing.
//!    Every pass that continues strictly shrinks the worklist, so there are at
//!    most `n + 1` passes for `n` spans.
//! 3. Whatever remains is orphaned (its root is outside the window) and is
//!    dropped.
//!
//! Descendants are grouped by trace id, not by direct parent: a tree is its
//! root plus one flat list of every other span in the same trace.

use crate::invariants::debug_assert_worklist_shrinks;
use crate::span::Span;
use std::collections::HashMap;

/// A root span plus every other retained span of its trace.
#[derive(Debug, Clone)]
pub struct TraceTree {
    pub root: Span,
    pub children: Vec<Span>,
}

impl TraceTree {
    fn new(root: Span) -> Self {
        Self {
            root,
            children: Vec::new(),
        }
    }

    pub fn trace_id(&self) -> u128 {
        self.root.trace_id
    }

    /// Number of spans in the tree, root included.
    pub fn span_count(&self) -> usize {
        1 + self.children.len()
    }

    /// Root first, then children.
    pub fn spans(&self) -> impl Iterator<Item = &Span> {
        std::iter::once(&self.root).chain(self.children.iter())
    }
}

/// Groups flat spans into [`TraceTree`]s.
#[derive(Debug, Default)]
pub struct TraceTreeBuilder {
    trees: Vec<TraceTree>,
    by_trace: HashMap<u128, usize>,
}

impl TraceTreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds one tree per trace id with a root in `spans`.
    ///
    /// Trees come back in the order their roots appeared; orphaned spans are
    /// dropped.
    pub fn build(spans: Vec<Span>) -> Vec<TraceTree> {
        let mut builder = Self::new();
        let orphans = builder.resolve(spans);
        if !orphans.is_empty() {
            tracing::debug!(
                orphans = orphans.len(),
                trees = builder.trees.len(),
                "dropped spans whose trace root is not in the window"
            );
        }
        builder.trees
    }

    /// Runs the worklist to a fixed point and returns the unresolved spans.
    fn resolve(&mut self, spans: Vec<Span>) -> Vec<Span> {
        let mut pending = spans;
        while !pending.is_empty() {
            let before = pending.len();
            let mut unresolved = Vec::new();
            for span in pending {
                if let Err(span) = self.place(span) {
                    unresolved.push(span);
                }
            }
            debug_assert_worklist_shrinks!(before, unresolved.len());

            let progressed = unresolved.len() < before;
            pending = unresolved;
            if !progressed {
                break;
            }
        }
        pending
    }

    /// Places a span into its tree, handing it back if its tree is not open yet.
    fn place(&mut self, span: Span) -> Result<(), Span> {
        match self.by_trace.get(&span.trace_id) {
            Some(&index) => {
                // A second root for a known trace joins as a child
                self.trees[index].children.push(span);
                Ok(())
            }
            None if span.is_root() => {
                self.by_trace.insert(span.trace_id, self.trees.len());
                self.trees.push(TraceTree::new(span));
                Ok(())
            }
            None => Err(span),
        }
    }
}
