//! Cross-worker port arbitration through claim markers.

use std::collections::BTreeSet;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::{Arc, Barrier};
use std::thread;

use color_eyre::eyre::{Result, ensure, eyre};
use pg_test_fixtures::test_support::utf8_tempdir;
use pg_test_fixtures::{FixtureErrorKind, PortAllocator, PortClaim, PortSpec, claim_path};
use rstest::rstest;

const WORKERS: usize = 6;

/// Finds `count` consecutive free ports near an ephemeral port so the range
/// request has room for every worker.
fn free_range(count: u16) -> Result<std::ops::RangeInclusive<u16>> {
    for _ in 0..20 {
        let anchor = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?.local_addr()?.port();
        let Some(end) = anchor.checked_add(count.saturating_sub(1)) else {
            continue;
        };
        let all_free =
            (anchor..=end).all(|port| TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok());
        if all_free {
            return Ok(anchor..=end);
        }
    }
    Err(eyre!("no run of {count} free ports found"))
}

#[rstest]
fn racing_workers_claim_distinct_ports() -> Result<()> {
    let (_guard, root) = utf8_tempdir()?;
    let range = free_range(40)?;
    let barrier = Arc::new(Barrier::new(WORKERS));

    let claims: Vec<PortClaim> = thread::scope(|scope| {
        let handles: Vec<_> = (0..WORKERS)
            .map(|_| {
                let gate = Arc::clone(&barrier);
                let allocator = PortAllocator::new(root.clone()).with_search_count(40);
                let spec = PortSpec::Range(range.clone());
                scope.spawn(move || {
                    gate.wait();
                    allocator.allocate(&spec)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .map_err(|_| eyre!("allocation thread panicked"))?
                    .map_err(|err| eyre!(err))
            })
            .collect::<Result<_>>()
    })?;

    let ports: BTreeSet<u16> = claims.iter().map(PortClaim::port).collect();
    ensure!(ports.len() == WORKERS, "duplicate claims: {ports:?}");
    ensure!(ports.iter().all(|port| range.contains(port)));
    for claim in &claims {
        ensure!(claim.path().exists(), "marker missing for {}", claim.port());
    }
    Ok(())
}

#[rstest]
fn released_ports_can_be_claimed_again() -> Result<()> {
    let (_guard, root) = utf8_tempdir()?;
    let allocator = PortAllocator::new(root.clone()).with_search_count(0);
    let first = allocator.allocate(&PortSpec::Any)?;
    let port = first.port();

    let err = allocator
        .allocate(&PortSpec::Fixed(port))
        .err()
        .ok_or_else(|| eyre!("port {port} is still claimed"))?;
    ensure!(err.kind() == FixtureErrorKind::PortSelectionExhausted);

    first.release()?;
    ensure!(!claim_path(&root, "postgresql", port).exists());
    let second = allocator.allocate(&PortSpec::Fixed(port))?;
    ensure!(second.port() == port);
    Ok(())
}

#[rstest]
fn services_do_not_share_claims() -> Result<()> {
    let (_guard, root) = utf8_tempdir()?;
    let postgres = PortAllocator::new(root.clone());
    let other = PortAllocator::new(root.clone()).with_service("redis");

    let claim = postgres.allocate(&PortSpec::Any)?;
    let same_port = other.allocate(&PortSpec::Fixed(claim.port()))?;
    ensure!(same_port.port() == claim.port());
    ensure!(same_port.path() != claim.path());
    Ok(())
}

#[rstest]
fn dropped_claims_leave_their_marker() -> Result<()> {
    let (_guard, root) = utf8_tempdir()?;
    let allocator = PortAllocator::new(root.clone());
    let claim = allocator.allocate(&PortSpec::Any)?;
    let marker = claim.path().to_path_buf();
    drop(claim);
    ensure!(marker.exists());
    Ok(())
}
