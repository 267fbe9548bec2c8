//! Whole-cluster scenarios run on the simulator.

use crate::harness::{SimCluster, SimConfig};
use crate::network::NetworkCondition;
use crate::seed::SimSeed;
use murmur_core::{ElectionStatus, Health, Membership, Rumor, RumorPayload, Service};
use murmur_swim::SwimConfig;

fn advertise_all(cluster: &mut SimCluster, group: &str) {
    for i in 0..cluster.len() {
        let id = cluster.id(i);
        cluster
            .with_node(i, |node, _| node.advertise_service(Service::new(id, group, "10.0.0.1", 5432)))
            .unwrap();
    }
    let members = cluster.len();
    let spread = cluster.run_until(5_000, |c| (0..c.len()).all(|i| c.node(i).services(group).count() == members));
    assert!(spread, "service advertisements did not spread");
}

#[test]
fn test_unreachable_member_is_confirmed_everywhere() {
    let mut cluster = SimCluster::meshed(SimConfig::default(), 5);
    cluster.run_for(300);
    assert_eq!(cluster.network_health_of(1), Some(Health::Alive));

    cluster.isolate(1);
    assert!(cluster.run_until(5_000, |c| c.network_health_of(1) == Some(Health::Confirmed)));

    let id = cluster.id(1);
    let seen: Vec<Health> = cluster
        .events(0)
        .iter()
        .filter(|e| e.member.id == id)
        .map(|e| e.health)
        .collect();
    assert_eq!(seen.last(), Some(&Health::Confirmed));
    assert!(seen.contains(&Health::Suspect));
}

#[test]
fn test_crashed_member_is_confirmed() {
    let mut cluster = SimCluster::meshed(SimConfig::default(), 4);
    cluster.run_for(300);
    cluster.crash(3);
    assert!(cluster.run_until(5_000, |c| c.network_health_of(3) == Some(Health::Confirmed)));
    for i in 0..3 {
        assert_eq!(cluster.health_of(i, (i + 1) % 3), Some(Health::Alive));
    }
}

#[test]
fn test_false_suspicion_is_refuted() {
    let config = SimConfig::default().with_swim(
        SwimConfig::new()
            .with_probe_interval(100)
            .with_ack_timeouts(20, 60)
            .with_suspicion_timeout(3_000)
            .with_gossip_interval(50)
            .with_retransmit_mult(10),
    );
    let mut cluster = SimCluster::meshed(config, 5);
    cluster.run_for(300);

    let suspected = cluster.node(1).local().clone();
    let id = suspected.id.clone();
    let accuser = cluster.id(0);
    cluster.with_node(0, |node, now| {
        node.handle_rumor(
            Rumor::member(Membership::new(suspected, Health::Suspect)).with_from(accuser),
            now,
        );
    });
    assert_eq!(cluster.health_of(0, 1), Some(Health::Suspect));

    let refuted = cluster.run_until(2_500, |c| {
        (0..c.len()).filter(|&i| i != 1).all(|i| {
            c.node(i)
                .member_list()
                .current(&id)
                .is_some_and(|r| r.health == Health::Alive && r.member.incarnation >= 1)
        })
    });
    assert!(refuted);
    assert!(cluster.node(1).local().incarnation >= 1);
}

#[test]
fn test_relayed_acks_prevent_suspicion() {
    let mut cluster = SimCluster::meshed(SimConfig::default(), 5);
    cluster.block(0, 1);
    cluster.block(1, 0);
    cluster.run_for(3_000);
    assert_eq!(cluster.health_of(0, 1), Some(Health::Alive));
    assert_eq!(cluster.health_of(1, 0), Some(Health::Alive));
    assert_eq!(cluster.network_health_of(1), Some(Health::Alive));
}

#[test]
fn test_persistent_members_recover_after_partition_heals() {
    let mut cluster = SimCluster::new(SimConfig::default());
    for _ in 0..4 {
        cluster.add_member(true);
    }
    cluster.mesh();
    cluster.run_for(300);

    cluster.partition(&[&[0, 1], &[2, 3]]);
    let across = |c: &SimCluster, health: Health| {
        [0, 1].iter().all(|&a| {
            [2, 3]
                .iter()
                .all(|&b| c.health_of(a, b) == Some(health) && c.health_of(b, a) == Some(health))
        })
    };
    assert!(cluster.run_until(10_000, |c| across(c, Health::Confirmed)));
    assert_eq!(cluster.health_of(0, 1), Some(Health::Alive));
    assert_eq!(cluster.health_of(2, 3), Some(Health::Alive));

    cluster.heal();
    let recovered = cluster.run_until(10_000, |c| {
        (0..c.len()).all(|i| (0..c.len()).all(|j| c.health_of(i, j) == Some(Health::Alive)))
    });
    assert!(recovered);
    for i in 0..cluster.len() {
        assert!(cluster.node(i).local().incarnation >= 1);
    }
}

#[test]
fn test_released_member_rejoins() {
    let mut cluster = SimCluster::new(SimConfig::default());
    for _ in 0..3 {
        cluster.add_member(true);
    }
    cluster.mesh();
    cluster.run_for(300);
    cluster.isolate(2);
    assert!(cluster.run_until(10_000, |c| c.network_health_of(2) == Some(Health::Confirmed)));

    cluster.unpartition(&[2]);
    let rejoined = cluster.run_until(10_000, |c| {
        c.network_health_of(2) == Some(Health::Alive)
            && c.health_of(2, 0) == Some(Health::Alive)
            && c.health_of(2, 1) == Some(Health::Alive)
    });
    assert!(rejoined);
}

#[test]
fn test_late_joiner_learns_everyone() {
    let mut cluster = SimCluster::meshed(SimConfig::default(), 4);
    cluster.run_for(300);
    let joiner = cluster.add_member(false);
    cluster.join(joiner, 0);

    let converged = cluster.run_until(5_000, |c| {
        (0..c.len()).all(|i| (0..c.len()).all(|j| c.health_of(i, j) == Some(Health::Alive)))
    });
    assert!(converged);
}

#[test]
fn test_leader_elected_across_cluster() {
    let mut cluster = SimCluster::meshed(SimConfig::default(), 5);
    cluster.run_for(300);
    advertise_all(&mut cluster, "db");

    let started = cluster.with_node(0, |node, _| node.start_election("db", 5));
    assert!(started.is_some());

    let leader = cluster.id(0);
    let elected = cluster.run_until(5_000, |c| (0..c.len()).all(|i| c.node(i).leader("db") == Some(&leader)));
    assert!(elected);
    let election = cluster.node(3).election("db").unwrap();
    assert_eq!(election.status, ElectionStatus::Finished);
    assert!(election.votes.len() * 2 > 5);
}

#[test]
fn test_elections_started_before_services_spread() {
    let mut cluster = SimCluster::meshed(SimConfig::default(), 3);
    for i in 0..cluster.len() {
        let id = cluster.id(i);
        cluster.with_node(i, |node, _| {
            node.advertise_service(Service::new(id, "db", "10.0.0.1", 5432))
                .unwrap();
            node.start_election("db", 5)
        });
    }
    // Each member only knows its own advertisement at this point
    assert!((0..3).all(|i| cluster.node(i).leader("db") == Some(&cluster.id(i))));

    cluster.run_for(5_000);
    let leader = cluster.id(0);
    for i in 0..cluster.len() {
        let node = cluster.node(i);
        assert_eq!(node.services("db").count(), 3);
        let election = node.election("db").unwrap();
        assert_eq!(election.member_id, leader);
        assert_eq!(election.status, ElectionStatus::Finished);
        assert!(election.votes.len() * 2 > 3, "member {i} finished with {:?}", election.votes);
    }
}

#[test]
fn test_lost_leader_is_replaced() {
    let mut cluster = SimCluster::meshed(SimConfig::default(), 5);
    cluster.run_for(300);
    advertise_all(&mut cluster, "db");
    cluster.with_node(0, |node, _| node.start_election("db", 5));
    let first = cluster.id(0);
    assert!(cluster.run_until(5_000, |c| (0..c.len()).all(|i| c.node(i).leader("db") == Some(&first))));
    let term = cluster.node(1).election("db").unwrap().term;

    cluster.isolate(0);
    // Equal suitability among the rest, so the smallest id wins
    let second = cluster.id(1);
    let replaced = cluster.run_until(10_000, |c| (1..c.len()).all(|i| c.node(i).leader("db") == Some(&second)));
    assert!(replaced);
    assert!(cluster.node(2).election("db").unwrap().term > term);
}

#[test]
fn test_fake_rumor_reaches_everyone() {
    let mut cluster = SimCluster::meshed(SimConfig::default(), 5);
    cluster.run_for(300);
    let origin = cluster.id(2);
    let rumor = Rumor::new(RumorPayload::Fake).with_from(origin).with_tag(vec!["canary".to_string()]);
    let key = rumor.key();
    cluster.with_node(2, |node, now| node.handle_rumor(rumor, now));

    assert!(cluster.run_until(3_000, |c| (0..c.len()).all(|i| c.node(i).rumors().get(&key).is_some())));
}

#[test]
fn test_membership_survives_packet_loss() {
    let config = SimConfig::new(SimSeed::from_literal(7))
        .with_condition(NetworkCondition::PacketLoss { probability: 0.05 });
    let mut cluster = SimCluster::meshed(config, 5);
    cluster.run_for(300);
    cluster.isolate(4);
    assert!(cluster.run_until(10_000, |c| c.network_health_of(4) == Some(Health::Confirmed)));
    assert!(cluster.stats().dropped > 0);
}

#[test]
fn test_same_seed_same_run() {
    let run = || {
        let mut cluster = SimCluster::meshed(SimConfig::new(SimSeed::from_literal(99)), 5);
        cluster.run_for(300);
        cluster.isolate(2);
        cluster.run_for(2_000);
        let rounds: Vec<u64> = (0..cluster.len()).map(|i| cluster.node(i).probe_rounds()).collect();
        let health: Vec<Option<Health>> = (0..cluster.len()).map(|i| cluster.health_of(0, i)).collect();
        (cluster.stats(), rounds, health)
    };
    assert_eq!(run(), run());
}
