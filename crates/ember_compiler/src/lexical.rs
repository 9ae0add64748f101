//! The chain of constructs enclosing the node that is currently being lowered.
//!
//! Frames are pushed on entry and popped on exit, so the stack always mirrors the static nesting of the
//! tree. Scope depths are computed by counting frames instead of following parent links.

use std::fmt;
use std::sync::Arc;

use ember_middle::ast::{BlockId, FunctionId, Symbol};

use crate::emitter::Label;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JumpKind {
    Break,
    Continue,
}

impl fmt::Display for JumpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JumpKind::Break => f.write_str("break"),
            JumpKind::Continue => f.write_str("continue"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakableKind {
    Loop,
    Switch,
    /// A labeled statement that is not a loop
    Labeled,
}

#[derive(Debug, Clone)]
pub enum Frame {
    Function {
        id: FunctionId,
        has_eval: bool,
    },
    Block {
        id: BlockId,
        /// Whether the block pushed its own scope record
        needs_scope: bool,
    },
    Breakable {
        kind: BreakableKind,
        labels: Vec<Arc<str>>,
        break_label: Label,
        continue_label: Option<Label>,
    },
    /// The body of a `with` statement, which pushes the with object onto the scope chain
    With,
    /// The boundary of a split sub-unit
    Split,
}

impl Frame {
    /// Whether leaving this frame pops a record off the scope chain
    pub fn owns_scope(&self) -> bool {
        matches!(self, Frame::Block { needs_scope: true, .. } | Frame::With)
    }
}

#[derive(Debug)]
pub struct FrameEntry {
    pub frame: Frame,
    /// Index of the emitter that lowers the code of this frame
    pub emitter: usize,
}

#[derive(Debug, Default)]
pub struct LexicalContext {
    frames: Vec<FrameEntry>,
}

impl LexicalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: Frame, emitter: usize) -> usize {
        self.frames.push(FrameEntry { frame, emitter });
        self.frames.len() - 1
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop().map(|e| e.frame)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FrameEntry> {
        self.frames.get(index)
    }

    pub fn frames(&self) -> impl DoubleEndedIterator<Item = (usize, &FrameEntry)> {
        self.frames.iter().enumerate()
    }

    /// Index of the innermost function frame
    pub fn current_function(&self) -> Option<usize> {
        self.frames.iter().rposition(|e| matches!(e.frame, Frame::Function { .. }))
    }

    /// Index of the innermost split boundary within the current function
    pub fn current_split(&self) -> Option<usize> {
        let function = self.current_function().unwrap_or(0);
        self.frames[function..]
            .iter()
            .rposition(|e| matches!(e.frame, Frame::Split))
            .map(|i| i + function)
    }

    /// Whether a construct that can add bindings at run time encloses the current position
    pub fn in_dynamic_scope(&self) -> bool {
        self.frames.iter().any(|e| match e.frame {
            Frame::With => true,
            Frame::Function { has_eval, .. } => has_eval,
            _ => false,
        })
    }

    /// Whether the position of `symbol` on the scope chain is statically known
    pub fn is_fast_scope(&self, symbol: &Symbol) -> bool {
        if !self.in_dynamic_scope() {
            return true;
        }
        if symbol.is_global() {
            return false;
        }

        let mut previous_was_block = false;
        for entry in self.frames.iter().rev() {
            match entry.frame {
                Frame::Block { id, .. } if id == symbol.block => return true,
                Frame::Block { .. } => previous_was_block = true,
                Frame::With if previous_was_block => return false,
                Frame::Function { has_eval: true, .. } => return false,
                _ => previous_was_block = false,
            }
        }

        false
    }

    /// Number of scope records between the current position and the record of `block`, or -1 if `block` is not
    /// on the chain
    pub fn scope_proto_depth(&self, block: BlockId) -> i32 {
        let mut depth = 0;
        for entry in self.frames.iter().rev() {
            match entry.frame {
                Frame::Block { id, .. } if id == block => return depth,
                ref frame if frame.owns_scope() => depth += 1,
                _ => {}
            }
        }
        -1
    }

    /// Number of scope records pushed by frames above `index`
    pub fn scopes_above(&self, index: usize) -> usize {
        self.frames
            .iter()
            .skip(index + 1)
            .filter(|e| e.frame.owns_scope())
            .count()
    }

    /// Finds the frame a `break` or `continue` refers to.
    ///
    /// Unlabeled breaks target the innermost loop or switch, unlabeled continues the innermost loop.
    /// The search does not leave the current function.
    pub fn find_jump_target(&self, kind: JumpKind, label: Option<&str>) -> Option<usize> {
        let function = self.current_function().unwrap_or(0);

        for (index, entry) in self.frames.iter().enumerate().skip(function).rev() {
            let Frame::Breakable {
                kind: breakable,
                labels,
                continue_label,
                ..
            } = &entry.frame
            else {
                continue;
            };

            let matches = match label {
                Some(label) => labels.iter().any(|l| &**l == label),
                None => match kind {
                    JumpKind::Break => *breakable != BreakableKind::Labeled,
                    JumpKind::Continue => *breakable == BreakableKind::Loop,
                },
            };

            if matches {
                if kind == JumpKind::Continue && continue_label.is_none() {
                    return None;
                }
                return Some(index);
            }
        }

        None
    }

    /// The label a jump of `kind` to the breakable frame at `index` branches to
    pub fn jump_label(&self, index: usize, kind: JumpKind) -> Option<Label> {
        match &self.frames.get(index)?.frame {
            Frame::Breakable {
                break_label,
                continue_label,
                ..
            } => match kind {
                JumpKind::Break => Some(*break_label),
                JumpKind::Continue => *continue_label,
            },
            _ => None,
        }
    }

    /// Whether the current function owns a scope record that a split sub-unit can report its state through
    pub fn has_open_scope(&self) -> bool {
        let function = self.current_function().unwrap_or(0);
        self.frames[function..].iter().any(|e| e.frame.owns_scope())
    }
}
