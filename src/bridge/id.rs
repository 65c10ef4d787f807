//! Identity types for bridged objects.
//!
//! Pipelines and elements are keyed by newtypes over `u64`. Both are drawn
//! from one counter owned by the [`Registry`](super::Registry), so a raw id
//! carried by a native callback never names two objects at once.

use std::fmt;

/// Value of the id counter before the first allocation.
pub const FIRST_ID_BASE: u64 = 10_000;

/// Id of a registered pipeline.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineId(pub u64);

impl PipelineId {
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PipelineId({})", self.0)
    }
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipeline#{}", self.0)
    }
}

/// Id of a registered stream element.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u64);

impl ElementId {
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ElementId({})", self.0)
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "element#{}", self.0)
    }
}

/// Which table a raw id currently resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Pipeline(PipelineId),
    Element(ElementId),
}

impl HandleKind {
    pub fn raw(self) -> u64 {
        match self {
            HandleKind::Pipeline(id) => id.raw(),
            HandleKind::Element(id) => id.raw(),
        }
    }
}
