//! Cross-checks between the RPKI validators
//!
//! The bulk validator and the storage-backed single validator must agree on
//! every (route, ROA set) input.

use ipnetwork::{IpNetwork, Ipv4Network};
use rand::Rng;
use std::net::Ipv4Addr;
use std::sync::Arc;

use irr_core::{Roa, RpkiStatus};
use irr_routing::{BulkRouteValidator, RouteValidator, SingleRouteValidator};
use irr_storage::{StorageConfig, StorageContext};
use tempfile::TempDir;

fn random_network(rng: &mut impl Rng, min_len: u8, max_len: u8) -> IpNetwork {
    // Keep addresses inside 10.0.0.0/12 so overlaps are common
    let address = Ipv4Addr::from(0x0A00_0000 | (rng.random::<u32>() & 0x000F_FFFF));
    let len = rng.random_range(min_len..=max_len);
    let network = Ipv4Network::new(address, len).unwrap();
    IpNetwork::V4(Ipv4Network::new(network.network(), len).unwrap())
}

fn setup(roas: &[Roa]) -> (Arc<StorageContext>, TempDir) {
    let temp = TempDir::new().unwrap();
    let ctx = Arc::new(StorageContext::open(StorageConfig::with_base_dir(temp.path())).unwrap());
    ctx.roa_store().replace_all(roas).unwrap();
    (ctx, temp)
}

// ============================================================================
// Agreement Tests
// ============================================================================

#[test]
fn test_bulk_and_single_agree_on_random_input() {
    let mut rng = rand::rng();
    let origins = [0u32, 64500, 64501, 64502];

    let roas: Vec<Roa> = (0..200)
        .map(|_| {
            let prefix = random_network(&mut rng, 12, 24);
            let max_length = rng.random_range(prefix.prefix()..=28);
            let asn = origins[rng.random_range(0..origins.len())];
            Roa::new(prefix, asn, max_length, "TEST-TA")
        })
        .collect();
    let (ctx, _temp) = setup(&roas);

    let bulk = BulkRouteValidator::new(roas.clone(), Vec::new());
    let single = SingleRouteValidator::new(ctx.roa_store(), Vec::new());

    let mut seen = [0usize; 3];
    for _ in 0..1000 {
        let prefix = random_network(&mut rng, 8, 32);
        let origin = origins[rng.random_range(0..origins.len())];
        let expected = bulk.validate_route(&prefix, origin, "TEST").unwrap();
        let actual = single.validate_route(&prefix, origin, "TEST").unwrap();
        assert_eq!(expected, actual, "disagreement for {prefix} AS{origin}");
        seen[match expected {
            RpkiStatus::Valid => 0,
            RpkiStatus::Invalid => 1,
            RpkiStatus::NotFound => 2,
        }] += 1;
    }
    // Every outcome should have been exercised
    assert!(seen.iter().all(|&n| n > 0), "outcomes seen: {seen:?}");
}

#[test]
fn test_documented_roa_cases_single_mode() {
    let roas = vec![
        Roa::new("192.0.2.0/24".parse().unwrap(), 65546, 28, "TEST-TA"),
        Roa::new("198.51.100.0/24".parse().unwrap(), 0, 32, "TEST-TA"),
    ];
    let (ctx, _temp) = setup(&roas);
    let single = SingleRouteValidator::new(ctx.roa_store(), vec!["LEGACY".to_string()]);

    let check = |prefix: &str, origin: u32, source: &str| {
        single
            .validate_route(&prefix.parse().unwrap(), origin, source)
            .unwrap()
    };
    assert_eq!(check("192.0.2.0/24", 65546, "TEST"), RpkiStatus::Valid);
    assert_eq!(check("192.0.2.0/25", 65546, "TEST"), RpkiStatus::Valid);
    assert_eq!(check("192.0.2.0/29", 65546, "TEST"), RpkiStatus::Invalid);
    assert_eq!(check("203.0.113.0/24", 65546, "TEST"), RpkiStatus::NotFound);
    assert_eq!(check("198.51.100.0/24", 0, "TEST"), RpkiStatus::Invalid);
    assert_eq!(check("198.51.100.0/24", 65546, "TEST"), RpkiStatus::Invalid);
    assert_eq!(check("192.0.2.0/29", 65546, "LEGACY"), RpkiStatus::NotFound);
}
