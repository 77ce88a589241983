use std::collections::HashMap;

use anyhow::Result;

/// Collective operations the prediction path depends on. The gather is a
/// blocking barrier by contract: every worker must reach it together.
/// Multi-worker implementations live with the launch engine; this crate
/// ships the single-process identity.
pub trait Collective {
    /// Every worker contributes its partial index -> text map and
    /// receives the union of all workers' maps.
    fn all_gather_predictions(&self, local: HashMap<i64, String>) -> Result<HashMap<i64, String>>;
}

/// Identity collective for single-process runs.
#[derive(Debug, Default)]
pub struct SingleProcess;

impl Collective for SingleProcess {
    fn all_gather_predictions(&self, local: HashMap<i64, String>) -> Result<HashMap<i64, String>> {
        Ok(local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_process_gather_is_identity() {
        let mut local = HashMap::new();
        local.insert(3i64, "a summary".to_string());
        local.insert(9, "another".to_string());
        let gathered = SingleProcess.all_gather_predictions(local.clone()).unwrap();
        assert_eq!(gathered, local);
    }
}
