use fb_core::EvalId;

/// Lifecycle of one evaluate call.
///
/// `Received -> Instantiated -> Executing -> (Succeeded | Failed) ->
/// Released`; a call that fails before its case exists goes straight from
/// `Received` to `Failed`, and a call answered from the journal goes
/// `Received -> Reused -> Succeeded -> Released` without a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalStage {
    Received,
    Reused,
    Instantiated,
    Executing,
    Succeeded,
    Failed,
    Released,
}

impl EvalStage {
    pub fn label(self) -> &'static str {
        match self {
            EvalStage::Received => "received",
            EvalStage::Reused => "reused",
            EvalStage::Instantiated => "instantiated",
            EvalStage::Executing => "executing",
            EvalStage::Succeeded => "succeeded",
            EvalStage::Failed => "failed",
            EvalStage::Released => "released",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, EvalStage::Released)
    }
}

#[derive(Debug, Clone)]
pub struct EvalProgressEvent {
    pub eval_id: EvalId,
    pub model: String,
    pub stage: EvalStage,
    pub elapsed_wall_s: f64,
    pub message: Option<String>,
}
