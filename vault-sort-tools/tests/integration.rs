#[cfg(test)]
mod integration_tests {
    use serde_json::json;
    use std::collections::HashSet;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;
    use vault_sort_tools::*;

    fn setup() -> (TempDir, VaultLayout, ToolDispatcherImpl) {
        let temp = TempDir::new().unwrap();
        let layout = VaultLayout::new(temp.path()).unwrap();
        layout.ensure().unwrap();
        let builder = Arc::new(SnapshotBuilder::new(SnapshotLimits::default()));
        let registry = ToolRegistryImpl::for_vault(&layout, builder).unwrap();
        (temp, layout, ToolDispatcherImpl::new(Arc::new(registry)))
    }

    fn ctx(step: u64, dry_run: bool) -> ExecutionContext {
        ExecutionContext::new(step, dry_run, 5000)
    }

    #[tokio::test]
    async fn test_registry_has_three_tools() {
        let (_temp, layout, _dispatcher) = setup();
        let builder = Arc::new(SnapshotBuilder::new(SnapshotLimits::default()));
        let registry = ToolRegistryImpl::for_vault(&layout, builder).unwrap();

        assert_eq!(registry.count(), 3);
        assert_eq!(registry.list(), vec!["inspect_file", "list_dir", "plan_move"]);
    }

    #[tokio::test]
    async fn test_list_dir_returns_sorted_entries() {
        let (_temp, layout, dispatcher) = setup();
        let folder = layout.inbox().join("Scans");
        fs::create_dir(&folder).unwrap();
        fs::write(folder.join("b.pdf"), "b").unwrap();
        fs::write(folder.join("a.pdf"), "a").unwrap();

        let result = dispatcher
            .dispatch(ctx(1, false), "list_dir", json!({"path": folder}))
            .await
            .unwrap();
        let output: ListDirOutput = serde_json::from_value(result.output.unwrap()).unwrap();

        assert_eq!(output.entries, vec![folder.join("a.pdf"), folder.join("b.pdf")]);
        assert!(!output.truncated);
        assert_eq!(output.observation.children.unwrap().files, 2);
    }

    #[tokio::test]
    async fn test_list_dir_is_idempotent() {
        let (_temp, layout, dispatcher) = setup();
        fs::write(layout.inbox().join("x.txt"), "x").unwrap();

        let first = dispatcher
            .dispatch(ctx(1, false), "list_dir", json!({"path": "INBOX"}))
            .await
            .unwrap();
        let second = dispatcher
            .dispatch(ctx(2, false), "list_dir", json!({"path": "INBOX"}))
            .await
            .unwrap();
        assert_eq!(first.output, second.output);
    }

    #[tokio::test]
    async fn test_inspect_file_returns_excerpt() {
        let (_temp, layout, dispatcher) = setup();
        let file = layout.inbox().join("note.txt");
        fs::write(&file, "invoice number 42").unwrap();

        let result = dispatcher
            .dispatch(ctx(1, false), "inspect_file", json!({"path": file}))
            .await
            .unwrap();
        let obs: Observation = serde_json::from_value(result.output.unwrap()).unwrap();
        assert_eq!(obs.excerpt.as_deref(), Some("invoice number 42"));
    }

    #[tokio::test]
    async fn test_inspect_file_rejects_directory() {
        let (_temp, layout, dispatcher) = setup();
        let result = dispatcher
            .dispatch(ctx(1, false), "inspect_file", json!({"path": layout.inbox()}))
            .await;
        assert!(matches!(result, Err(ToolError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_plan_move_through_dispatcher() {
        let (_temp, layout, dispatcher) = setup();
        let src = layout.inbox().join("report.pdf");
        fs::write(&src, "pdf").unwrap();

        let request = MoveRequest {
            source: src.clone(),
            destination_root: DestinationRoot::Documents,
            segments: vec!["Finance".into()],
            file_name: "report.pdf".into(),
        };
        let result = dispatcher
            .dispatch(ctx(1, false), "plan_move", serde_json::to_value(&request).unwrap())
            .await
            .unwrap();
        let record: MoveRecord = serde_json::from_value(result.output.unwrap()).unwrap();

        assert_eq!(
            record.destination,
            layout.root().join("Documents/Finance/report.pdf")
        );
        assert!(record.destination.is_file());
        assert!(!src.exists());
        assert_eq!(fs::read_dir(record.breadcrumb.parent().unwrap()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_same_name_moves_never_overwrite() {
        let (_temp, layout, dispatcher) = setup();
        let mut destinations = HashSet::new();

        for i in 0..5 {
            let dir = layout.inbox().join(format!("batch{}", i));
            fs::create_dir(&dir).unwrap();
            let src = dir.join("scan.pdf");
            fs::write(&src, format!("content {}", i)).unwrap();

            let request = MoveRequest {
                source: src,
                destination_root: DestinationRoot::Documents,
                segments: vec!["Identity".into()],
                file_name: "scan.pdf".into(),
            };
            let result = dispatcher
                .dispatch(ctx(i, false), "plan_move", serde_json::to_value(&request).unwrap())
                .await
                .unwrap();
            let record: MoveRecord = serde_json::from_value(result.output.unwrap()).unwrap();
            assert!(destinations.insert(record.destination));
        }

        let target = layout.root().join("Documents/Identity");
        assert_eq!(fs::read_dir(&target).unwrap().count(), 5);
        assert!(target.join("scan (4).pdf").is_file());
    }

    #[tokio::test]
    async fn test_unknown_tool_rejected() {
        let (_temp, _layout, dispatcher) = setup();
        let result = dispatcher
            .dispatch(ctx(1, false), "shell_exec", json!({"cmd": "rm"}))
            .await;
        assert!(matches!(result, Err(ToolError::ValidationError(_))));
    }
}
