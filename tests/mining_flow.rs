//! End-to-end mining runs against templates on disk

use template_miner::worker::{partition, search_range};
use template_miner::{
    Blake2s, Config, Error, MinerPool, NonceLayout, PoolConfig, StreamingHash, Target, Template,
};
use std::path::Path;
use std::time::Duration;

const TEMPLATE: &str = r#"{"height":7,"nonce":"0000000000000000000000000000000000000000000000000000000000000000","txs":[]}"#;

fn write_template(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("target.txt");
    std::fs::write(&path, TEMPLATE).unwrap();
    path
}

#[tokio::test]
async fn test_mine_template_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let template_path = write_template(dir.path());
    let output = dir.path().join("mined_block.txt");

    let template = Template::load(&template_path, 1_000_000).unwrap();
    let offset = template.locate_nonce_field(b"nonce\":\"").unwrap();
    assert_eq!(&TEMPLATE.as_bytes()[..offset], br#"{"height":7,"nonce":""#);

    let hasher = Blake2s::blake2s_256().unwrap();
    let config = PoolConfig {
        workers: 3,
        trials_per_worker: 500,
        start_nonce: 10_000,
        target: Target::leading_zero_bits(6).unwrap(),
        output: Some(output.clone()),
        stop_on_first: false,
        progress_interval: Duration::ZERO,
    };
    let pool = MinerPool::new(config, hasher.clone()).unwrap();
    let report = pool.run(&template, offset).await.unwrap();

    assert_eq!(report.workers(), 3);
    assert_eq!(report.total_trials(), 1500);

    let winners: Vec<_> = report.winners().collect();
    // 1 in 64 odds per hash over 500 trials per worker
    assert_eq!(winners.len(), 3);

    let layout = NonceLayout::for_workers(3).unwrap();
    for block in &winners {
        assert!(block.verify(&hasher, &Target::LeadingZeroBits(6)).unwrap());
        assert_eq!(block.bytes.len(), TEMPLATE.len());
        assert_eq!(&block.bytes[..offset], &TEMPLATE.as_bytes()[..offset]);
        assert_eq!(&block.bytes[offset + 64..], &TEMPLATE.as_bytes()[offset + 64..]);

        let (worker_id, nonce) = layout.decode(&block.bytes[offset..offset + 64]).unwrap();
        assert_eq!(worker_id, block.worker_id);
        assert_eq!(nonce, block.nonce);
        assert!(pool.ranges()[worker_id].contains(nonce.value()));
    }

    let written = std::fs::read(&output).unwrap();
    assert!(winners.iter().any(|block| block.bytes == written));
    assert!(report.outcomes.iter().all(|outcome| outcome.persist_error.is_none()));

    // The caller's template is never patched
    assert_eq!(template.bytes(), TEMPLATE.as_bytes());
}

#[tokio::test]
async fn test_mine_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let template_path = write_template(dir.path());
    let output = dir.path().join("out.txt");

    let config = Config::load_from([
        "template-miner",
        "--template",
        template_path.to_str().unwrap(),
        "--output",
        output.to_str().unwrap(),
        "--thread-count",
        "2",
        "--trials",
        "4000",
        "--target",
        "bits:8",
        "--stop-on-first",
    ])
    .await
    .unwrap();

    let template = Template::load(&config.template, config.max_template_size).unwrap();
    let offset = template.locate_nonce_field(config.marker.as_bytes()).unwrap();
    let pool = MinerPool::new(config.pool_config(0).unwrap(), config.hasher().unwrap()).unwrap();
    let report = pool.run(&template, offset).await.unwrap();

    assert!(report.winners().count() >= 1);
    let hasher = config.hasher().unwrap();
    let written = std::fs::read(&output).unwrap();
    let digest = hasher.digest(&written).unwrap();
    assert!(config.target().unwrap().meets_target(digest.as_bytes()));
}

#[test]
fn test_sequential_search_matches_partition() {
    let hasher = Blake2s::blake2s_256().unwrap();
    let target = Target::leading_zero_bits(4).unwrap();
    let ranges = partition(0, 200, 2).unwrap();

    let mut template = Template::from_bytes(TEMPLATE);
    let offset = template.locate_nonce_field(b"nonce\":\"").unwrap();

    for (worker_id, range) in ranges.iter().enumerate() {
        let block = search_range(
            hasher.clone(),
            target,
            &mut template,
            offset,
            range.start(),
            range.len(),
            worker_id,
        )
        .unwrap()
        .expect("a 4 bit target is met within 200 trials");

        assert!(range.contains(block.nonce.value()));
        assert_eq!(block.bytes[offset], b'0' + worker_id as u8);
        assert!(block.verify(&hasher, &target).unwrap());
    }
}

#[test]
fn test_missing_marker_and_template() {
    let dir = tempfile::tempdir().unwrap();

    let missing = Template::load(dir.path().join("absent.txt"), 1_000_000);
    assert!(matches!(missing, Err(Error::TemplateRead { .. })));

    let template = Template::from_bytes(r#"{"height":7}"#);
    assert!(matches!(
        template.locate_nonce_field(b"nonce\":\""),
        Err(Error::MarkerNotFound { .. })
    ));
}
