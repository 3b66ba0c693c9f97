//! End-to-end scan scenarios over a static inventory.

mod common;

use chrono::{Duration, Utc};
use cloudsift::{
    aws::inventory::RegionInventory,
    aws::types::{UserInfo, Volume},
    dispatcher::ScanRequest,
    pricing::round4,
    types::IgnoreFilters,
};
use common::*;
use std::{collections::HashMap, sync::Arc, time::Instant};
use tokio_util::sync::CancellationToken;

fn request(account_id: &str, scanners: &[&str]) -> ScanRequest {
    ScanRequest {
        accounts: vec![account(account_id)],
        regions: Vec::new(),
        scanners: scanners.iter().map(|s| s.to_string()).collect(),
        days_unused: 90,
        ignore: IgnoreFilters::default(),
    }
}

#[tokio::test]
async fn empty_world_scans_clean() {
    let inventory = empty_inventory("100000000001", &["us-east-1", "us-west-2"]);
    let harness = harness(inventory, &[]).await;

    let outcome = harness
        .dispatcher
        .run(request("100000000001", &[]), CancellationToken::new())
        .await
        .unwrap();

    assert!(outcome.results.is_empty());
    assert!(!outcome.cancelled);
    // accounts x regions x scanners
    assert_eq!(outcome.metrics.total_tasks, 1 * 2 * 15);
    assert_eq!(outcome.metrics.failed_tasks, 0);
    assert_eq!(outcome.metrics.completed_tasks, 30);
    harness.pool.close().await;
}

#[tokio::test]
async fn unattached_volume_is_found_and_priced_from_cache() {
    let mut inventory = empty_inventory("100000000002", &["us-east-1"]);
    let mut region = RegionInventory::default();
    region.volumes.push(available_volume("vol-unattached", 100, 120));
    inventory
        .inventories
        .insert(region_key("100000000002", "us-east-1"), region);

    let harness = harness(inventory, &[("EBSVolume_us-east-1_gp2", 0.10)]).await;
    let outcome = harness
        .dispatcher
        .run(
            request("100000000002", &["ebs-volumes"]),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 1);
    let result = &outcome.results[0];
    assert_eq!(result.resource_id, "vol-unattached");
    assert!(result.reason.contains("not attached"));

    let cost = result.cost.as_ref().unwrap();
    let hourly = cost["total"]["hourly_rate"].as_f64().unwrap();
    assert_eq!(hourly, round4(100.0 * 0.10 / 730.0));
    assert_eq!(hourly, 0.0137);
    let daily = cost["total"]["daily_rate"].as_f64().unwrap();
    let monthly = cost["total"]["monthly_rate"].as_f64().unwrap();
    assert_eq!(monthly, round4(daily * 30.0));
    assert!(cost["total"]["lifetime"].as_f64().is_some());
    harness.pool.close().await;
}

#[tokio::test]
async fn stopped_instance_reports_ebs_but_no_compute_cost() {
    let mut inventory = empty_inventory("100000000003", &["us-east-1"]);
    let mut region = RegionInventory::default();
    let mut instance = stopped_instance("i-dormant", 200, 150);
    instance.volume_ids = vec!["vol-root".to_string()];
    region.instances.push(instance);
    region.volumes.push(Volume {
        id: "vol-root".to_string(),
        state: "in-use".to_string(),
        size_gb: 50,
        volume_type: "gp2".to_string(),
        create_time: Some(Utc::now() - Duration::days(200)),
        attached_instance_ids: vec!["i-dormant".to_string()],
        tags: HashMap::new(),
    });
    inventory
        .inventories
        .insert(region_key("100000000003", "us-east-1"), region);

    let harness = harness(inventory, &[("EBSVolume_us-east-1_gp2", 0.10)]).await;
    let outcome = harness
        .dispatcher
        .run(
            request("100000000003", &["ec2-instances"]),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 1);
    let result = &outcome.results[0];
    assert!(result
        .reason
        .starts_with("Instance has been stopped for 90 days"));

    let cost = result.cost.as_ref().unwrap();
    assert!(cost.get("instance").is_none());
    let ebs_hourly = cost["ebs"]["hourly_rate"].as_f64().unwrap();
    assert_eq!(ebs_hourly, round4(50.0 * 0.10 / 730.0));
    assert_eq!(
        cost["total"]["hourly_rate"].as_f64().unwrap(),
        ebs_hourly
    );
    harness.pool.close().await;
}

#[tokio::test]
async fn throttled_scan_converges_to_the_clean_result_set() {
    let mut inventory = empty_inventory("100000000004", &["us-east-1"]);
    let mut region = RegionInventory::default();
    for i in 0..3 {
        region
            .volumes
            .push(available_volume(&format!("vol-{i}"), 10, 100));
    }
    inventory
        .inventories
        .insert(region_key("100000000004", "us-east-1"), region.clone());

    // Clean run first, for the expected result set.
    let clean = harness(inventory.clone(), &[("EBSVolume_us-east-1_gp2", 0.10)]).await;
    let clean_outcome = clean
        .dispatcher
        .run(
            request("100000000004", &["ebs-volumes"]),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    clean.pool.close().await;

    // Same inventory, but every 3rd remote call throttles.
    let provider = Arc::new(ThrottlingSessionProvider::new(inventory, 3));
    let throttled = harness_with_provider(
        provider.clone(),
        &[("EBSVolume_us-east-1_gp2", 0.10)],
    )
    .await;
    let throttled_outcome = throttled
        .dispatcher
        .run(
            request("100000000004", &["ebs-volumes"]),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    throttled.pool.close().await;

    assert!(provider.throttle_count() >= 1);
    assert_eq!(throttled_outcome.metrics.failed_tasks, 0);

    let mut clean_ids: Vec<_> = clean_outcome
        .results
        .iter()
        .map(|r| r.resource_id.clone())
        .collect();
    let mut throttled_ids: Vec<_> = throttled_outcome
        .results
        .iter()
        .map(|r| r.resource_id.clone())
        .collect();
    clean_ids.sort();
    throttled_ids.sort();
    assert_eq!(clean_ids, throttled_ids);
    assert_eq!(throttled_ids.len(), 3);
}

#[tokio::test]
async fn ignore_by_tag_is_case_insensitive() {
    let mut inventory = empty_inventory("100000000005", &["us-east-1"]);
    let mut region = RegionInventory::default();
    let mut tagged = available_volume("vol-prod", 20, 120);
    tagged
        .tags
        .insert("Environment".to_string(), "production".to_string());
    region.volumes.push(tagged);
    region.volumes.push(available_volume("vol-scratch", 20, 120));
    inventory
        .inventories
        .insert(region_key("100000000005", "us-east-1"), region);

    let harness = harness(inventory, &[]).await;
    let mut request = request("100000000005", &["ebs-volumes"]);
    request.ignore = IgnoreFilters {
        tags: HashMap::from([("environment".to_string(), "PRODUCTION".to_string())]),
        ..Default::default()
    };

    let outcome = harness
        .dispatcher
        .run(request, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].resource_id, "vol-scratch");
    harness.pool.close().await;
}

#[tokio::test]
async fn cancellation_returns_promptly_with_partial_results() {
    let regions: Vec<String> = (0..5).map(|i| format!("test-region-{i}")).collect();
    let mut inventory = empty_inventory("100000000006", &[]);
    inventory.regions = regions;

    let provider = Arc::new(SlowSessionProvider::new(
        inventory,
        std::time::Duration::from_millis(50),
    ));
    let harness = harness_with_provider(provider, &[]).await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let outcome = harness
        .dispatcher
        .run(request("100000000006", &[]), cancel)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(outcome.cancelled);
    // 5 regions x 15 scanners at 50ms per session on 4 workers would take
    // around a second; cancellation must cut that short.
    assert!(elapsed < std::time::Duration::from_secs(2));
    assert!(outcome.metrics.completed_tasks <= outcome.metrics.total_tasks);
    harness.pool.close().await;
}

#[tokio::test]
async fn account_global_scanner_runs_once_across_regions() {
    let mut inventory = empty_inventory(
        "100000000007",
        &["us-east-1", "us-west-2", "eu-west-1"],
    );
    let stale_user = UserInfo {
        user_name: "dormant-user".to_string(),
        create_date: Some(Utc::now() - Duration::days(400)),
        password_last_used: None,
        tags: HashMap::new(),
    };
    for region in ["us-east-1", "us-west-2", "eu-west-1"] {
        let mut data = RegionInventory::default();
        data.users.push(stale_user.clone());
        inventory
            .inventories
            .insert(region_key("100000000007", region), data);
    }

    let harness = harness(inventory, &[]).await;
    let outcome = harness
        .dispatcher
        .run(
            request("100000000007", &["iam-users"]),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    // One task per region, but the account-global scanner fires once.
    assert_eq!(outcome.metrics.total_tasks, 3);
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].resource_id, "dormant-user");
    assert_eq!(outcome.results[0].account_id, "100000000007");
    harness.pool.close().await;
}
