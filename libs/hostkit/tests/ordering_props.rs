//! Registry walk order under arbitrary component counts and pause/resume cycles.

mod common;

use std::collections::HashMap;

use common::{empty_config, recorder_registry, CallLog, HostTree};
use hostkit::ComponentOrchestrator;
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

fn calls(op: &str, names: &[String]) -> Vec<String> {
    names.iter().map(|n| format!("{op}({n})")).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn pause_resume_and_unload_orders(n in 1usize..6, cycles in 0usize..4) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let tree = HostTree::new();
        let names: Vec<String> = (0..n).map(|i| format!("C{i}")).collect();
        let paths = names.iter().map(|name| tree.component(name, &[])).collect();
        let log = CallLog::default();
        let orch = ComponentOrchestrator::new(
            tree.settings(paths),
            recorder_registry(&log, HashMap::new()),
            empty_config(),
        );

        let forward = names.clone();
        let reverse: Vec<String> = names.iter().rev().cloned().collect();

        rt.block_on(async {
            orch.run_components(CancellationToken::new()).await.unwrap();
        });
        prop_assert_eq!(log.take(), calls("Start", &forward));

        for _ in 0..cycles {
            rt.block_on(orch.pause_all());
            prop_assert_eq!(log.take(), calls("Pause", &reverse));
            rt.block_on(orch.resume_all());
            prop_assert_eq!(log.take(), calls("Resume", &forward));
        }

        rt.block_on(orch.unload_all());
        prop_assert_eq!(log.take(), calls("Stop", &reverse));
        prop_assert!(orch.get_components().is_empty());
    }
}
