use tch::nn::{self, OptimizerConfig};
use tch::TchError;

/// Optimizer selection. Tags follow the launch-strategy names used by the
/// training configs; anything unrecognized falls back to plain AdamW.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerStrategy {
    /// Accelerator-resident fused Adam (stage-3 sharding).
    FusedAdam,
    /// Adam with host-memory optimizer state (offload stages).
    OffloadedAdam,
    /// Decoupled-weight-decay Adam, the default.
    AdamW,
}

impl OptimizerStrategy {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "deepspeed_stage_3" => OptimizerStrategy::FusedAdam,
            "deepspeed_stage_2_offload" | "deepspeed_stage_3_offload" => {
                OptimizerStrategy::OffloadedAdam
            }
            other => {
                if other.starts_with("deepspeed") {
                    log::warn!("unrecognized deepspeed strategy {:?}, using AdamW", other);
                }
                OptimizerStrategy::AdamW
            }
        }
    }

    /// Build the optimizer over every trainable variable of `vs`. All
    /// variants share the `(parameters, lr, weight_decay)` inputs; where
    /// the Adam moments live is owned by the launch strategy, not here.
    pub fn build(
        self,
        vs: &nn::VarStore,
        lr: f64,
        weight_decay: f64,
    ) -> Result<nn::Optimizer, TchError> {
        match self {
            OptimizerStrategy::FusedAdam | OptimizerStrategy::OffloadedAdam => nn::Adam {
                wd: weight_decay,
                ..Default::default()
            }
            .build(vs, lr),
            OptimizerStrategy::AdamW => nn::AdamW {
                wd: weight_decay,
                ..Default::default()
            }
            .build(vs, lr),
        }
    }
}
