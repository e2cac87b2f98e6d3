use crate::model::Indicator;
use crate::scan::ScanContext;

bitflags::bitflags! {
    /// What a check reads, so the runner can skip work nobody needs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Needs: u32 {
        const OBJECT_GRAPH  = 0b0000_0001;
        const STREAM_DECODE = 0b0000_0010;
        const GRAPH_NOTES   = 0b0000_0100;
        const RAW_BYTES     = 0b0000_1000;
    }
}

impl Needs {
    /// Whether a check still reports on a graph cut short by the budget:
    /// anything that needs no decoding, and the graph note mapping.
    pub fn runs_on_partial_graph(self) -> bool {
        !self.contains(Needs::STREAM_DECODE) || self.contains(Needs::GRAPH_NOTES)
    }
}

/// One entry of the check catalogue. Checks are pure: they read the scan
/// context and return indicators, never mutating shared state.
pub trait Detector: Send + Sync {
    fn id(&self) -> &'static str;
    fn needs(&self) -> Needs;
    fn run(&self, ctx: &ScanContext) -> anyhow::Result<Vec<Indicator>>;
}
