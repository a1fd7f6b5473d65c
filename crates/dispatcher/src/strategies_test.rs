mod strategies_tests {
    use crate::strategies::*;
    use crate::test_utils::worker;
    use orchestrator_core::Job;
    use serde_json::json;

    fn scan_job(capabilities: &[&str]) -> Job {
        Job::new("file_scan", json!("/srv/sample"), 5, None)
            .with_required_capabilities(capabilities.iter().copied())
    }

    #[test]
    fn test_least_load_picks_minimum_load_factor() {
        let strategy = LeastLoadStrategy::new();
        let workers = vec![
            worker("w1", &[], 8, 10),
            worker("w2", &[], 2, 10),
            worker("w3", &[], 5, 10),
        ];

        let selected = strategy.select(&workers, None).unwrap();
        assert_eq!(selected.worker_id, "w2");
    }

    #[test]
    fn test_least_load_tie_goes_to_first() {
        let strategy = LeastLoadStrategy::new();
        let workers = vec![
            worker("w1", &[], 1, 4),
            worker("w2", &[], 2, 8),
            worker("w3", &[], 3, 4),
        ];

        let selected = strategy.select(&workers, None).unwrap();
        assert_eq!(selected.worker_id, "w1");
    }

    #[test]
    fn test_round_robin_cycles_and_keeps_counter() {
        let strategy = RoundRobinStrategy::new();
        let workers = vec![
            worker("w1", &[], 0, 5),
            worker("w2", &[], 0, 5),
            worker("w3", &[], 0, 5),
        ];

        let picks: Vec<String> = (0..5)
            .map(|_| strategy.select(&workers, None).unwrap().worker_id.clone())
            .collect();
        assert_eq!(picks, vec!["w1", "w2", "w3", "w1", "w2"]);

        // 计数器不因候选集合变化而重置: 5 % 2 == 1
        let fewer = vec![worker("w1", &[], 0, 5), worker("w2", &[], 0, 5)];
        assert_eq!(strategy.select(&fewer, None).unwrap().worker_id, "w2");
    }

    #[test]
    fn test_capability_match_prefers_superset() {
        let strategy = CapabilityMatchStrategy::new();
        let workers = vec![worker("w1", &["exe"], 0, 5), worker("w2", &["pdf", "exe"], 4, 5)];

        let selected = strategy.select(&workers, Some(&scan_job(&["pdf"]))).unwrap();
        assert_eq!(selected.worker_id, "w2");
    }

    #[test]
    fn test_capability_match_least_load_within_subset() {
        let strategy = CapabilityMatchStrategy::new();
        let workers = vec![
            worker("w1", &["pdf"], 3, 5),
            worker("w2", &["exe"], 0, 5),
            worker("w3", &["pdf", "zip"], 1, 5),
        ];

        let selected = strategy.select(&workers, Some(&scan_job(&["pdf"]))).unwrap();
        assert_eq!(selected.worker_id, "w3");
    }

    #[test]
    fn test_capability_match_falls_back_to_all_workers() {
        let strategy = CapabilityMatchStrategy::new();
        let workers = vec![worker("w1", &["exe"], 3, 5), worker("w2", &["zip"], 1, 5)];

        let selected = strategy.select(&workers, Some(&scan_job(&["pdf"]))).unwrap();
        assert_eq!(selected.worker_id, "w2");

        let no_requirement = strategy.select(&workers, Some(&scan_job(&[]))).unwrap();
        assert_eq!(no_requirement.worker_id, "w2");
        assert_eq!(strategy.select(&workers, None).unwrap().worker_id, "w2");
    }

    #[test]
    fn test_empty_eligible_list_returns_none() {
        let job = scan_job(&["pdf"]);
        let strategies: Vec<Box<dyn LoadBalancer>> = vec![
            Box::new(LeastLoadStrategy::new()),
            Box::new(RoundRobinStrategy::new()),
            Box::new(CapabilityMatchStrategy::new()),
        ];

        for strategy in strategies {
            assert!(strategy.select(&[], None).is_none(), "{}", strategy.name());
            assert!(strategy.select(&[], Some(&job)).is_none(), "{}", strategy.name());
        }
    }

    #[test]
    fn test_factory_resolves_names() {
        assert_eq!(LoadBalancerFactory::from_name("least_load").name(), "least_load");
        assert_eq!(LoadBalancerFactory::from_name("round-robin").name(), "round_robin");
        assert_eq!(
            LoadBalancerFactory::from_name("Capability_Match").name(),
            "capability_match"
        );
        assert_eq!(LoadBalancerFactory::from_name("random").name(), "least_load");
    }
}
